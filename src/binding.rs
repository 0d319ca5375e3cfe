//! Field bindings: the declarative description of one slot in the wire layout.
//!
//! A [`Binding`] says how bits map to a value; a [`Repeat`] says whether the
//! slot holds one value, a counted array, or a terminator-separated list;
//! [`Skip`]s are discard regions executed before the field. These are the
//! inputs to the template compiler.

use std::sync::Arc;

use crate::bits::ByteOrder;
use crate::charset::Charset;
use crate::checksum::ChecksumAlgorithm;
use crate::convert::{ConverterChoices, Validator};
use crate::errors::Result;
use crate::eval::{Context, Evaluator};
use crate::value::Message;

/// A size given either as a literal or as an expression over the message
/// decoded so far.
#[derive(Debug, Clone)]
pub struct SizeExpr(pub(crate) String);

impl SizeExpr {
    pub fn fixed(size: usize) -> Self {
        SizeExpr(size.to_string())
    }

    pub fn expr(expr: impl Into<String>) -> Self {
        SizeExpr(expr.into())
    }

    /// The literal value, when the expression is a plain decimal number.
    pub(crate) fn static_value(&self) -> Option<i64> {
        let trimmed = self.0.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            trimmed.parse().ok()
        } else {
            None
        }
    }

    pub(crate) fn resolve(
        &self,
        evaluator: &dyn Evaluator,
        root: &Message,
        ctx: &Context,
    ) -> Result<i64> {
        evaluator.evaluate_size(&self.0, root, ctx)
    }
}

impl From<usize> for SizeExpr {
    fn from(size: usize) -> Self {
        SizeExpr::fixed(size)
    }
}

impl From<&str> for SizeExpr {
    fn from(expr: &str) -> Self {
        SizeExpr::expr(expr)
    }
}

impl From<String> for SizeExpr {
    fn from(expr: String) -> Self {
        SizeExpr::expr(expr)
    }
}

/// Discriminator used for codec dispatch. The four scalar kinds share the
/// default codec; objects and checksums have dedicated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Integer,
    Bits,
    StringFixed,
    StringTerminated,
    Object,
    Checksum,
}

/// How one field's bits map to a value.
#[derive(Debug, Clone)]
pub enum Binding {
    Integer(IntegerBind),
    Bits(BitsBind),
    StringFixed(StringFixedBind),
    StringTerminated(StringTerminatedBind),
    Object(ObjectBind),
    Checksum(ChecksumBind),
}

impl Binding {
    pub fn kind(&self) -> BindingKind {
        match self {
            Binding::Integer(_) => BindingKind::Integer,
            Binding::Bits(_) => BindingKind::Bits,
            Binding::StringFixed(_) => BindingKind::StringFixed,
            Binding::StringTerminated(_) => BindingKind::StringTerminated,
            Binding::Object(_) => BindingKind::Object,
            Binding::Checksum(_) => BindingKind::Checksum,
        }
    }

    pub(crate) fn converter(&self) -> Option<&ConverterChoices> {
        match self {
            Binding::Integer(b) => Some(&b.converter),
            Binding::Bits(b) => Some(&b.converter),
            Binding::StringFixed(b) => Some(&b.converter),
            Binding::StringTerminated(b) => Some(&b.converter),
            Binding::Object(b) => Some(&b.converter),
            Binding::Checksum(_) => None,
        }
    }

    pub(crate) fn validator(&self) -> Option<&Arc<dyn Validator>> {
        match self {
            Binding::Integer(b) => b.validator.as_ref(),
            Binding::Bits(b) => b.validator.as_ref(),
            Binding::StringFixed(b) => b.validator.as_ref(),
            Binding::StringTerminated(b) => b.validator.as_ref(),
            Binding::Object(b) => b.validator.as_ref(),
            Binding::Checksum(_) => None,
        }
    }
}

impl From<IntegerBind> for Binding {
    fn from(bind: IntegerBind) -> Self {
        Binding::Integer(bind)
    }
}

impl From<BitsBind> for Binding {
    fn from(bind: BitsBind) -> Self {
        Binding::Bits(bind)
    }
}

impl From<StringFixedBind> for Binding {
    fn from(bind: StringFixedBind) -> Self {
        Binding::StringFixed(bind)
    }
}

impl From<StringTerminatedBind> for Binding {
    fn from(bind: StringTerminatedBind) -> Self {
        Binding::StringTerminated(bind)
    }
}

impl From<ObjectBind> for Binding {
    fn from(bind: ObjectBind) -> Self {
        Binding::Object(bind)
    }
}

impl From<ChecksumBind> for Binding {
    fn from(bind: ChecksumBind) -> Self {
        Binding::Checksum(bind)
    }
}

/// Arbitrary-width integer, 1..=128 bits, two's complement when signed.
#[derive(Debug, Clone)]
pub struct IntegerBind {
    pub size: SizeExpr,
    pub order: ByteOrder,
    pub signed: bool,
    pub converter: ConverterChoices,
    pub validator: Option<Arc<dyn Validator>>,
}

impl IntegerBind {
    pub fn new(size: impl Into<SizeExpr>) -> Self {
        IntegerBind {
            size: size.into(),
            order: ByteOrder::Big,
            signed: false,
            converter: ConverterChoices::identity(),
            validator: None,
        }
    }

    pub fn order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn converter(mut self, converter: ConverterChoices) -> Self {
        self.converter = converter;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// Raw bits as a set. Big-endian emits bit 0 first; little-endian reverses.
#[derive(Debug, Clone)]
pub struct BitsBind {
    pub size: SizeExpr,
    pub order: ByteOrder,
    pub converter: ConverterChoices,
    pub validator: Option<Arc<dyn Validator>>,
}

impl BitsBind {
    pub fn new(size: impl Into<SizeExpr>) -> Self {
        BitsBind {
            size: size.into(),
            order: ByteOrder::Big,
            converter: ConverterChoices::identity(),
            validator: None,
        }
    }

    pub fn order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn converter(mut self, converter: ConverterChoices) -> Self {
        self.converter = converter;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// Text of a fixed byte count. Encode truncates at a character boundary and
/// zero-pads on the right; decode strips trailing NUL bytes.
#[derive(Debug, Clone)]
pub struct StringFixedBind {
    pub size: SizeExpr,
    pub charset: Charset,
    pub converter: ConverterChoices,
    pub validator: Option<Arc<dyn Validator>>,
}

impl StringFixedBind {
    pub fn new(size: impl Into<SizeExpr>) -> Self {
        StringFixedBind {
            size: size.into(),
            charset: Charset::Utf8,
            converter: ConverterChoices::identity(),
            validator: None,
        }
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn converter(mut self, converter: ConverterChoices) -> Self {
        self.converter = converter;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// Text ending at a terminator byte. `consume` also applies on encode: the
/// terminator is written back iff it was consumed on decode.
#[derive(Debug, Clone)]
pub struct StringTerminatedBind {
    pub terminator: u8,
    pub consume: bool,
    pub charset: Charset,
    pub converter: ConverterChoices,
    pub validator: Option<Arc<dyn Validator>>,
}

impl StringTerminatedBind {
    pub fn new(terminator: u8) -> Self {
        StringTerminatedBind {
            terminator,
            consume: true,
            charset: Charset::Utf8,
            converter: ConverterChoices::identity(),
            validator: None,
        }
    }

    pub fn keep_terminator(mut self) -> Self {
        self.consume = false;
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn converter(mut self, converter: ConverterChoices) -> Self {
        self.converter = converter;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// A nested message, optionally dispatched across subtypes.
#[derive(Debug, Clone)]
pub struct ObjectBind {
    /// Template used when no selection is declared, and the fallback
    /// wire type for diagnostics.
    pub type_name: String,
    pub select: Option<VariantChoices>,
    pub converter: ConverterChoices,
    pub validator: Option<Arc<dyn Validator>>,
}

impl ObjectBind {
    pub fn new(type_name: impl Into<String>) -> Self {
        ObjectBind {
            type_name: type_name.into(),
            select: None,
            converter: ConverterChoices::identity(),
            validator: None,
        }
    }

    pub fn select(mut self, select: VariantChoices) -> Self {
        self.select = Some(select);
        self
    }

    pub fn converter(mut self, converter: ConverterChoices) -> Self {
        self.converter = converter;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

/// Whole-message checksum stored at this position.
///
/// The covered range is `bytes[skip_start .. total_len - skip_end]` of the
/// complete encoded message; the field's own bytes must be excluded through
/// the skip margins. Width must be a whole number of bytes in 8..=64 bits.
#[derive(Debug, Clone)]
pub struct ChecksumBind {
    pub bits: u32,
    pub order: ByteOrder,
    pub algorithm: Arc<dyn ChecksumAlgorithm>,
    pub skip_start: usize,
    pub skip_end: usize,
}

impl ChecksumBind {
    pub fn new(bits: u32, algorithm: impl ChecksumAlgorithm + 'static) -> Self {
        ChecksumBind {
            bits,
            order: ByteOrder::Big,
            algorithm: Arc::new(algorithm),
            skip_start: 0,
            skip_end: 0,
        }
    }

    pub fn order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn skip(mut self, start: usize, end: usize) -> Self {
        self.skip_start = start;
        self.skip_end = end;
        self
    }
}

/// Collection wrapper around a binding.
#[derive(Debug, Clone)]
pub enum Repeat {
    One,
    /// Exactly `count` elements.
    Array(SizeExpr),
    /// Elements until the peeked tag text is empty; the tag is peeked up
    /// to `terminator` and re-read by the element's own fields.
    SeparatedList { terminator: u8, charset: Charset },
}

/// A discard region executed before its field.
#[derive(Debug, Clone)]
pub enum Skip {
    /// Read-and-discard (decode) or write zeros (encode).
    Bits(SizeExpr),
    /// Discard up to the terminator (decode) or write it (encode).
    UntilTerminator { terminator: u8, consume: bool },
}

/// Ordered alternatives for variant selection.
///
/// With `prefix_bits > 0` the selector reads a tag of that width in
/// `prefix_order` and exposes it as `#prefix`; choices are scanned in
/// declaration order and the first true condition wins. A choice with an
/// empty condition matches on equality with its literal `prefix`. With no
/// match, `default_type` is used or selection fails.
#[derive(Debug, Clone, Default)]
pub struct VariantChoices {
    pub prefix_bits: u32,
    pub prefix_order: ByteOrder,
    pub choices: Vec<VariantChoice>,
    pub default_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VariantChoice {
    pub condition: String,
    pub prefix: Option<u128>,
    pub type_name: String,
}

impl VariantChoices {
    /// Selection driven purely by conditions (no in-stream tag).
    pub fn untagged() -> Self {
        Self::default()
    }

    /// Selection keyed by an integer prefix of `prefix_bits` bits.
    pub fn prefixed(prefix_bits: u32) -> Self {
        VariantChoices {
            prefix_bits,
            ..Self::default()
        }
    }

    pub fn prefix_order(mut self, order: ByteOrder) -> Self {
        self.prefix_order = order;
        self
    }

    /// Adds a condition-driven alternative.
    pub fn when(mut self, condition: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.choices.push(VariantChoice {
            condition: condition.into(),
            prefix: None,
            type_name: type_name.into(),
        });
        self
    }

    /// Adds an alternative matched on prefix equality.
    pub fn when_prefix(mut self, prefix: u128, type_name: impl Into<String>) -> Self {
        self.choices.push(VariantChoice {
            condition: String::new(),
            prefix: Some(prefix),
            type_name: type_name.into(),
        });
        self
    }

    pub fn or_default(mut self, type_name: impl Into<String>) -> Self {
        self.default_type = Some(type_name.into());
        self
    }

    /// Every type name this selection can produce.
    pub(crate) fn referenced_types(&self) -> impl Iterator<Item = &str> {
        self.choices
            .iter()
            .map(|c| c.type_name.as_str())
            .chain(self.default_type.as_deref())
    }
}

/// The wire prefix to write back for a choice: its explicit literal, or the
/// integer compared against `#prefix` in its condition (syntactic match on
/// `#prefix == N`).
pub(crate) fn wire_prefix(choice: &VariantChoice) -> Option<u128> {
    if choice.prefix.is_some() {
        return choice.prefix;
    }

    let condition = choice.condition.as_str();
    let at = condition.find("#prefix")?;
    let rest = condition[at + "#prefix".len()..].trim_start();
    let rest = rest.strip_prefix("==")?.trim_start();

    let (radix, digits) = if let Some(hex) = rest.strip_prefix("0x") {
        (16, hex)
    } else if let Some(bin) = rest.strip_prefix("0b") {
        (2, bin)
    } else {
        (10, rest)
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    u128::from_str_radix(&digits[..end], radix).ok()
}

/// Message frame: a start marker, an optional end marker, and the protocol
/// gate checked at compile time.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub start: String,
    pub end: String,
    pub charset: Charset,
    pub min_protocol: String,
    pub max_protocol: String,
}

impl Header {
    pub fn starting_with(start: impl Into<String>) -> Self {
        Header {
            start: start.into(),
            ..Self::default()
        }
    }

    pub fn ending_with(mut self, end: impl Into<String>) -> Self {
        self.end = end.into();
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn protocols(mut self, min: impl Into<String>, max: impl Into<String>) -> Self {
        self.min_protocol = min.into();
        self.max_protocol = max.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_expr_static() {
        assert_eq!(SizeExpr::fixed(16).static_value(), Some(16));
        assert_eq!(SizeExpr::expr("8").static_value(), Some(8));
        assert_eq!(SizeExpr::expr("len * 8").static_value(), None);
        assert_eq!(SizeExpr::expr("").static_value(), None);
    }

    #[test]
    fn test_wire_prefix_from_explicit() {
        let choice = VariantChoice {
            condition: String::new(),
            prefix: Some(3),
            type_name: "A".into(),
        };
        assert_eq!(wire_prefix(&choice), Some(3));
    }

    #[test]
    fn test_wire_prefix_extracted_from_condition() {
        for (condition, expected) in [
            ("#prefix == 1", Some(1)),
            ("#prefix == 0b10", Some(2)),
            ("#prefix == 0x1F", Some(0x1F)),
            ("#prefix == 5 && version == 2", Some(5)),
            ("version == 2", None),
            ("#prefix != 1", None),
        ] {
            let choice = VariantChoice {
                condition: condition.into(),
                prefix: None,
                type_name: "A".into(),
            };
            assert_eq!(wire_prefix(&choice), expected, "condition `{condition}`");
        }
    }

    #[test]
    fn test_builder_chain() {
        let bind = IntegerBind::new(12).order(ByteOrder::Little).signed();
        assert!(bind.signed);
        assert_eq!(bind.order, ByteOrder::Little);
        assert_eq!(bind.size.static_value(), Some(12));
    }
}
