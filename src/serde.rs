//! JSON-deserializable schema description.
//!
//! These types describe the *shape* of a wire format. They are intended to
//! be loaded from JSON (for example a schema file shipped with your
//! application) and then converted into core builder types with
//! [`SchemaDef::into_types`]. The expressible subset covers the built-in
//! converters, validators, and checksum algorithms; schemas needing custom
//! implementations use the builder API directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::binding::{
    Binding, BitsBind, ChecksumBind, Header, IntegerBind, ObjectBind, SizeExpr,
    StringFixedBind, StringTerminatedBind, VariantChoices,
};
use crate::bits::ByteOrder;
use crate::charset::Charset;
use crate::convert::{
    Converter, ConverterChoices, EnumMap, FloatBits32, FloatBits64, IntRange, NonEmptyString,
    ScaleOffset,
};
use crate::checksum::{Crc16Ccitt, Crc32, Sum8};
use crate::template::TypeDef;

/// Top-level schema definition: every type of one protocol.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaDef {
    pub types: Vec<TypeDefDef>,
}

impl SchemaDef {
    /// Converts the whole schema into builder types, ready for
    /// registration on a `CoreBuilder`.
    pub fn into_types(self) -> Vec<TypeDef> {
        self.types.into_iter().map(Into::into).collect()
    }
}

/// Description of a single user type.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TypeDefDef {
    pub name: String,
    #[serde(default)]
    pub header: Option<HeaderDef>,
    pub fields: Vec<FieldEntryDef>,
    #[serde(default)]
    pub evaluated: Vec<EvaluatedDef>,
    #[serde(default)]
    pub post_processed: Vec<PostProcessedDef>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HeaderDef {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub charset: CharsetDef,
    #[serde(default)]
    pub min_protocol: String,
    #[serde(default)]
    pub max_protocol: String,
}

/// One field: binding, optional collection wrapper, preceding skips.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FieldEntryDef {
    pub name: String,
    pub binding: BindingDef,
    #[serde(default)]
    pub repeat: RepeatDef,
    #[serde(default)]
    pub skips: Vec<SkipDef>,
}

/// A size given as a number or as an expression string.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum SizeDef {
    Fixed(usize),
    Expr(String),
}

impl From<SizeDef> for SizeExpr {
    fn from(value: SizeDef) -> Self {
        match value {
            SizeDef::Fixed(size) => SizeExpr::fixed(size),
            SizeDef::Expr(expr) => SizeExpr::expr(expr),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default)]
pub enum ByteOrderDef {
    #[default]
    Big,
    Little,
}

impl From<ByteOrderDef> for ByteOrder {
    fn from(value: ByteOrderDef) -> Self {
        match value {
            ByteOrderDef::Big => ByteOrder::Big,
            ByteOrderDef::Little => ByteOrder::Little,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default)]
pub enum CharsetDef {
    #[default]
    Utf8,
    Ascii,
    Iso8859_1,
}

impl From<CharsetDef> for Charset {
    fn from(value: CharsetDef) -> Self {
        match value {
            CharsetDef::Utf8 => Charset::Utf8,
            CharsetDef::Ascii => Charset::Ascii,
            CharsetDef::Iso8859_1 => Charset::Iso8859_1,
        }
    }
}

/// How one field's bits map to a value.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind")]
pub enum BindingDef {
    Integer {
        size: SizeDef,
        #[serde(default)]
        order: ByteOrderDef,
        #[serde(default)]
        signed: bool,
        #[serde(default)]
        converter: Option<ConverterDef>,
        #[serde(default)]
        validator: Option<ValidatorDef>,
    },
    Bits {
        size: SizeDef,
        #[serde(default)]
        order: ByteOrderDef,
    },
    StringFixed {
        size: SizeDef,
        #[serde(default)]
        charset: CharsetDef,
        #[serde(default)]
        validator: Option<ValidatorDef>,
    },
    StringTerminated {
        terminator: u8,
        #[serde(default = "default_true")]
        consume: bool,
        #[serde(default)]
        charset: CharsetDef,
        #[serde(default)]
        validator: Option<ValidatorDef>,
    },
    Object {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        select: Option<SelectDef>,
    },
    Checksum {
        bits: u32,
        #[serde(default)]
        order: ByteOrderDef,
        algorithm: AlgorithmDef,
        #[serde(default)]
        skip_start: usize,
        #[serde(default)]
        skip_end: usize,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(tag = "kind")]
pub enum RepeatDef {
    #[default]
    One,
    Array {
        count: SizeDef,
    },
    List {
        terminator: u8,
        #[serde(default)]
        charset: CharsetDef,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind")]
pub enum SkipDef {
    Bits {
        size: SizeDef,
    },
    Until {
        terminator: u8,
        #[serde(default = "default_true")]
        consume: bool,
    },
}

/// Variant selection over subtypes.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SelectDef {
    #[serde(default)]
    pub prefix_bits: u32,
    #[serde(default)]
    pub prefix_order: ByteOrderDef,
    pub choices: Vec<ChoiceDef>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChoiceDef {
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub prefix: Option<u64>,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// The built-in converters expressible from JSON.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind")]
pub enum ConverterDef {
    ScaleOffset {
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    Float32,
    Float64,
    EnumMap {
        labels: BTreeMap<i64, String>,
    },
}

impl From<ConverterDef> for ConverterChoices {
    fn from(value: ConverterDef) -> Self {
        fn of(converter: impl Converter + 'static) -> ConverterChoices {
            ConverterChoices::of(converter)
        }

        match value {
            ConverterDef::ScaleOffset { scale, offset } => of(ScaleOffset::new(scale, offset)),
            ConverterDef::Float32 => of(FloatBits32),
            ConverterDef::Float64 => of(FloatBits64),
            ConverterDef::EnumMap { labels } => of(EnumMap::new(
                labels.into_iter().map(|(k, v)| (k as i128, v)).collect(),
            )),
        }
    }
}

/// The built-in validators expressible from JSON.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind")]
pub enum ValidatorDef {
    IntRange { min: i64, max: i64 },
    NonEmptyString,
}

fn apply_validator<B>(bind: B, validator: Option<ValidatorDef>, attach: impl Fn(B, ValidatorDef) -> B) -> B {
    match validator {
        Some(v) => attach(bind, v),
        None => bind,
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub enum AlgorithmDef {
    Crc16Ccitt,
    Crc32,
    Sum8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EvaluatedDef {
    pub name: String,
    #[serde(default)]
    pub condition: String,
    pub expr: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PostProcessedDef {
    pub name: String,
    #[serde(default)]
    pub condition: String,
    pub decode: String,
    pub encode: String,
}

impl From<BindingDef> for Binding {
    fn from(value: BindingDef) -> Self {
        match value {
            BindingDef::Integer {
                size,
                order,
                signed,
                converter,
                validator,
            } => {
                let mut bind = IntegerBind::new(SizeExpr::from(size)).order(order.into());
                if signed {
                    bind = bind.signed();
                }
                if let Some(converter) = converter {
                    bind = bind.converter(converter.into());
                }
                bind = apply_validator(bind, validator, |b, v| match v {
                    ValidatorDef::IntRange { min, max } => {
                        b.validator(IntRange::new(min as i128, max as i128))
                    }
                    ValidatorDef::NonEmptyString => b.validator(NonEmptyString),
                });
                Binding::Integer(bind)
            }
            BindingDef::Bits { size, order } => {
                Binding::Bits(BitsBind::new(SizeExpr::from(size)).order(order.into()))
            }
            BindingDef::StringFixed {
                size,
                charset,
                validator,
            } => {
                let bind = StringFixedBind::new(SizeExpr::from(size)).charset(charset.into());
                let bind = apply_validator(bind, validator, |b, v| match v {
                    ValidatorDef::IntRange { min, max } => {
                        b.validator(IntRange::new(min as i128, max as i128))
                    }
                    ValidatorDef::NonEmptyString => b.validator(NonEmptyString),
                });
                Binding::StringFixed(bind)
            }
            BindingDef::StringTerminated {
                terminator,
                consume,
                charset,
                validator,
            } => {
                let mut bind = StringTerminatedBind::new(terminator).charset(charset.into());
                if !consume {
                    bind = bind.keep_terminator();
                }
                let bind = apply_validator(bind, validator, |b, v| match v {
                    ValidatorDef::IntRange { min, max } => {
                        b.validator(IntRange::new(min as i128, max as i128))
                    }
                    ValidatorDef::NonEmptyString => b.validator(NonEmptyString),
                });
                Binding::StringTerminated(bind)
            }
            BindingDef::Object { type_name, select } => {
                let mut bind = ObjectBind::new(type_name);
                if let Some(select) = select {
                    bind = bind.select(select.into());
                }
                Binding::Object(bind)
            }
            BindingDef::Checksum {
                bits,
                order,
                algorithm,
                skip_start,
                skip_end,
            } => {
                let bind = match algorithm {
                    AlgorithmDef::Crc16Ccitt => ChecksumBind::new(bits, Crc16Ccitt),
                    AlgorithmDef::Crc32 => ChecksumBind::new(bits, Crc32),
                    AlgorithmDef::Sum8 => ChecksumBind::new(bits, Sum8),
                };
                Binding::Checksum(bind.order(order.into()).skip(skip_start, skip_end))
            }
        }
    }
}

impl From<SelectDef> for VariantChoices {
    fn from(value: SelectDef) -> Self {
        let mut select = if value.prefix_bits > 0 {
            VariantChoices::prefixed(value.prefix_bits)
        } else {
            VariantChoices::untagged()
        };
        select = select.prefix_order(value.prefix_order.into());
        for choice in value.choices {
            select = match choice.prefix {
                Some(prefix) if choice.condition.is_empty() => {
                    select.when_prefix(prefix as u128, choice.type_name)
                }
                _ => select.when(choice.condition, choice.type_name),
            };
        }
        if let Some(default) = value.default {
            select = select.or_default(default);
        }

        select
    }
}

impl From<HeaderDef> for Header {
    fn from(value: HeaderDef) -> Self {
        Header {
            start: value.start,
            end: value.end,
            charset: value.charset.into(),
            min_protocol: value.min_protocol,
            max_protocol: value.max_protocol,
        }
    }
}

impl From<TypeDefDef> for TypeDef {
    fn from(value: TypeDefDef) -> Self {
        let mut def = TypeDef::new(value.name);
        if let Some(header) = value.header {
            def = def.header(header.into());
        }
        for field in value.fields {
            for skip in field.skips {
                def = match skip {
                    SkipDef::Bits { size } => def.skip_bits(SizeExpr::from(size)),
                    SkipDef::Until {
                        terminator,
                        consume,
                    } => def.skip_until(terminator, consume),
                };
            }
            let binding: Binding = field.binding.into();
            def = match field.repeat {
                RepeatDef::One => def.field(field.name, binding),
                RepeatDef::Array { count } => def.array(field.name, binding, SizeExpr::from(count)),
                RepeatDef::List {
                    terminator,
                    charset,
                } => def.list(field.name, binding, terminator, charset.into()),
            };
        }
        for ev in value.evaluated {
            def = def.evaluated(ev.name, ev.condition, ev.expr);
        }
        for pp in value.post_processed {
            def = def.post_processed(pp.name, pp.condition, pp.decode, pp.encode);
        }

        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreBuilder;
    use crate::value::Value;

    #[test]
    fn test_schema_from_json() {
        let json = r#"{
            "types": [{
                "name": "Reading",
                "fields": [
                    { "name": "id", "binding": { "kind": "Integer", "size": 8 } },
                    {
                        "name": "level",
                        "binding": {
                            "kind": "Integer",
                            "size": 8,
                            "converter": { "kind": "ScaleOffset", "scale": 0.5 }
                        }
                    }
                ]
            }]
        }"#;

        let schema: SchemaDef = serde_json::from_str(json).unwrap();
        let mut builder = CoreBuilder::new();
        for def in schema.into_types() {
            builder = builder.register_type(def);
        }
        let core = builder.build().unwrap();

        let message = core.parse("Reading", &[0x07, 0x08]).unwrap();
        assert_eq!(message.get("id"), Some(&Value::UInt(7)));
        assert_eq!(message.get("level"), Some(&Value::F64(4.0)));
    }

    #[test]
    fn test_variant_schema_from_json() {
        let json = r#"{
            "types": [
                { "name": "A", "fields": [ { "name": "x", "binding": { "kind": "Integer", "size": 6 } } ] },
                { "name": "B", "fields": [ { "name": "y", "binding": { "kind": "Integer", "size": 6 } } ] },
                {
                    "name": "Frame",
                    "fields": [{
                        "name": "body",
                        "binding": {
                            "kind": "Object",
                            "type": "A",
                            "select": {
                                "prefix_bits": 2,
                                "choices": [
                                    { "prefix": 1, "type": "A" },
                                    { "prefix": 2, "type": "B" }
                                ]
                            }
                        }
                    }]
                }
            ]
        }"#;

        let schema: SchemaDef = serde_json::from_str(json).unwrap();
        let mut builder = CoreBuilder::new();
        for def in schema.into_types() {
            builder = builder.register_type(def);
        }
        let core = builder.build().unwrap();

        // 0b01_000011: prefix 1 selects A, x = 3.
        let message = core.parse("Frame", &[0b0100_0011]).unwrap();
        let body = message.get("body").unwrap().as_object().unwrap();
        assert_eq!(body.type_name(), "A");
        assert_eq!(body.get("x"), Some(&Value::UInt(3)));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let json = r#"{ "types": [{ "name": "T", "fields": [
            { "name": "x", "binding": { "kind": "Blob", "size": 8 } }
        ]}]}"#;
        assert!(serde_json::from_str::<SchemaDef>(json).is_err());
    }
}
