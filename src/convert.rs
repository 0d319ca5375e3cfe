//! Converters and validators interposed between wire values and field values.
//!
//! A [`Converter`] is a pair of total functions: `decode` maps the raw wire
//! value into the in-memory value, `encode` maps it back. A [`Validator`] is
//! a predicate run once per field: after conversion on decode, before
//! conversion on encode. Converter selection may be conditioned on the
//! message decoded so far via [`ConverterChoices`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::eval::{Context, Evaluator};
use crate::value::{Message, Value};

pub trait Converter: fmt::Debug + Send + Sync {
    /// Wire value to in-memory value.
    fn decode(&self, wire: Value) -> Result<Value>;

    /// In-memory value back to its wire shape.
    fn encode(&self, value: Value) -> Result<Value>;
}

pub trait Validator: fmt::Debug + Send + Sync {
    fn is_valid(&self, value: &Value) -> bool;
}

/// An ordered list of condition/converter pairs with an optional default.
///
/// Selection is a first-true scan against the root message, in declaration
/// order. With no matching condition and no default, the value passes
/// through unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConverterChoices {
    choices: Vec<ConverterChoice>,
    default: Option<Arc<dyn Converter>>,
}

#[derive(Debug, Clone)]
struct ConverterChoice {
    condition: String,
    converter: Arc<dyn Converter>,
}

impl ConverterChoices {
    /// No conversion: values pass through unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn of(converter: impl Converter + 'static) -> Self {
        ConverterChoices {
            choices: Vec::new(),
            default: Some(Arc::new(converter)),
        }
    }

    /// Adds a conditioned alternative; earlier entries win.
    pub fn when(mut self, condition: impl Into<String>, converter: impl Converter + 'static) -> Self {
        self.choices.push(ConverterChoice {
            condition: condition.into(),
            converter: Arc::new(converter),
        });
        self
    }

    pub fn otherwise(mut self, converter: impl Converter + 'static) -> Self {
        self.default = Some(Arc::new(converter));
        self
    }

    pub(crate) fn is_identity(&self) -> bool {
        self.choices.is_empty() && self.default.is_none()
    }

    pub(crate) fn select(
        &self,
        evaluator: &dyn Evaluator,
        root: &Message,
        ctx: &Context,
    ) -> Result<Option<Arc<dyn Converter>>> {
        for choice in &self.choices {
            if evaluator.evaluate_bool(&choice.condition, root, ctx)? {
                return Ok(Some(choice.converter.clone()));
            }
        }

        Ok(self.default.clone())
    }
}

/// Applies a converter element-wise over arrays, scalar otherwise.
fn apply(converter: &dyn Converter, value: Value, encode: bool) -> Result<Value> {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(apply(converter, item, encode)?);
            }
            Ok(Value::Array(out))
        }
        single if encode => converter.encode(single),
        single => converter.decode(single),
    }
}

/// Decode side of the pipeline: convert, then validate.
pub(crate) fn decode_value(
    choices: &ConverterChoices,
    validator: Option<&Arc<dyn Validator>>,
    evaluator: &dyn Evaluator,
    root: &Message,
    ctx: &Context,
    raw: Value,
) -> Result<Value> {
    let value = match choices.select(evaluator, root, ctx)? {
        Some(converter) => apply(converter.as_ref(), raw, false)?,
        None => raw,
    };

    if let Some(validator) = validator {
        if !validator.is_valid(&value) {
            return Err(Error::ValidationFailed(format!("{value:?}")));
        }
    }

    Ok(value)
}

/// Encode side of the pipeline: validate, then convert back.
pub(crate) fn encode_value(
    choices: &ConverterChoices,
    validator: Option<&Arc<dyn Validator>>,
    evaluator: &dyn Evaluator,
    root: &Message,
    ctx: &Context,
    value: Value,
) -> Result<Value> {
    if let Some(validator) = validator {
        if !validator.is_valid(&value) {
            return Err(Error::ValidationFailed(format!("{value:?}")));
        }
    }

    match choices.select(evaluator, root, ctx)? {
        Some(converter) => apply(converter.as_ref(), value, true),
        None => Ok(value),
    }
}

/// Passes values through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct Identity;

impl Converter for Identity {
    fn decode(&self, wire: Value) -> Result<Value> {
        Ok(wire)
    }

    fn encode(&self, value: Value) -> Result<Value> {
        Ok(value)
    }
}

/// Linear mapping `value * scale + offset`, decoding to `F64`.
#[derive(Debug, Clone, Copy)]
pub struct ScaleOffset {
    pub scale: f64,
    pub offset: f64,
}

impl ScaleOffset {
    pub fn new(scale: f64, offset: f64) -> Self {
        ScaleOffset { scale, offset }
    }
}

impl Converter for ScaleOffset {
    fn decode(&self, wire: Value) -> Result<Value> {
        if !self.scale.is_finite() || self.scale == 0.0 || !self.offset.is_finite() {
            return Err(Error::Converter("scale/offset must be finite and non-zero".into()));
        }

        let raw = match wire {
            Value::Int(v) => v as f64,
            Value::UInt(v) => v as f64,
            Value::F64(v) => v,
            Value::F32(v) => v as f64,
            other => {
                return Err(Error::Converter(format!(
                    "scale/offset expects a number, got {}",
                    other.kind_name()
                )));
            }
        };

        Ok(Value::F64(raw * self.scale + self.offset))
    }

    fn encode(&self, value: Value) -> Result<Value> {
        if !self.scale.is_finite() || self.scale == 0.0 || !self.offset.is_finite() {
            return Err(Error::Converter("scale/offset must be finite and non-zero".into()));
        }

        let scaled = match value {
            Value::F64(v) => v,
            Value::F32(v) => v as f64,
            Value::Int(v) => v as f64,
            Value::UInt(v) => v as f64,
            other => {
                return Err(Error::Converter(format!(
                    "scale/offset expects a number, got {}",
                    other.kind_name()
                )));
            }
        };
        let raw = (scaled - self.offset) / self.scale;
        if !raw.is_finite() {
            return Err(Error::Converter("scaled value is not finite".into()));
        }

        Ok(Value::Int(raw.round() as i128))
    }
}

/// Reinterprets a 32-bit raw integer as an IEEE-754 float.
#[derive(Debug, Clone, Copy)]
pub struct FloatBits32;

impl Converter for FloatBits32 {
    fn decode(&self, wire: Value) -> Result<Value> {
        let bits = wire
            .as_uint()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::Converter("expected a 32-bit raw value".into()))?;

        Ok(Value::F32(f32::from_bits(bits)))
    }

    fn encode(&self, value: Value) -> Result<Value> {
        match value {
            Value::F32(v) => Ok(Value::UInt(v.to_bits() as u128)),
            other => Err(Error::Converter(format!(
                "expected an f32, got {}",
                other.kind_name()
            ))),
        }
    }
}

/// Reinterprets a 64-bit raw integer as an IEEE-754 double.
#[derive(Debug, Clone, Copy)]
pub struct FloatBits64;

impl Converter for FloatBits64 {
    fn decode(&self, wire: Value) -> Result<Value> {
        let bits = wire
            .as_uint()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| Error::Converter("expected a 64-bit raw value".into()))?;

        Ok(Value::F64(f64::from_bits(bits)))
    }

    fn encode(&self, value: Value) -> Result<Value> {
        match value {
            Value::F64(v) => Ok(Value::UInt(v.to_bits() as u128)),
            other => Err(Error::Converter(format!(
                "expected an f64, got {}",
                other.kind_name()
            ))),
        }
    }
}

/// Bijective mapping between integer codes and string labels.
#[derive(Debug, Clone, Default)]
pub struct EnumMap {
    labels: BTreeMap<i128, String>,
}

impl EnumMap {
    pub fn new(labels: BTreeMap<i128, String>) -> Self {
        EnumMap { labels }
    }

    pub fn entry(mut self, code: i128, label: impl Into<String>) -> Self {
        self.labels.insert(code, label.into());
        self
    }
}

impl Converter for EnumMap {
    fn decode(&self, wire: Value) -> Result<Value> {
        let code = wire
            .as_int()
            .ok_or_else(|| Error::Converter("enum mapping expects an integer".into()))?;
        self.labels
            .get(&code)
            .map(|label| Value::Str(label.clone()))
            .ok_or_else(|| Error::Converter(format!("no enum label for {code}")))
    }

    fn encode(&self, value: Value) -> Result<Value> {
        let label = value
            .as_str()
            .ok_or_else(|| Error::Converter("enum mapping expects a label".into()))?;
        self.labels
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(code, _)| Value::Int(*code))
            .ok_or_else(|| Error::Converter(format!("no enum code for `{label}`")))
    }
}

/// Accepts integers in `min..=max`.
#[derive(Debug, Clone, Copy)]
pub struct IntRange {
    pub min: i128,
    pub max: i128,
}

impl IntRange {
    pub fn new(min: i128, max: i128) -> Self {
        IntRange { min, max }
    }
}

impl Validator for IntRange {
    fn is_valid(&self, value: &Value) -> bool {
        match value {
            Value::Array(items) => items.iter().all(|v| self.is_valid(v)),
            single => single
                .as_int()
                .is_some_and(|v| v >= self.min && v <= self.max),
        }
    }
}

/// Rejects empty strings.
#[derive(Debug, Clone, Copy)]
pub struct NonEmptyString;

impl Validator for NonEmptyString {
    fn is_valid(&self, value: &Value) -> bool {
        match value {
            Value::Array(items) => items.iter().all(|v| self.is_valid(v)),
            single => single.as_str().is_some_and(|s| !s.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::BasicEvaluator;

    fn run_decode(choices: &ConverterChoices, raw: Value) -> Result<Value> {
        decode_value(
            choices,
            None,
            &BasicEvaluator,
            &Message::new("T"),
            &Context::new(),
            raw,
        )
    }

    #[test]
    fn test_scale_offset_round_trip() {
        let conv = ScaleOffset::new(2.0, 1.0);
        assert_eq!(conv.decode(Value::Int(10)).unwrap(), Value::F64(21.0));
        assert_eq!(conv.encode(Value::F64(21.0)).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_float_bits() {
        let bits = std::f32::consts::PI.to_bits() as u128;
        assert_eq!(
            FloatBits32.decode(Value::UInt(bits)).unwrap(),
            Value::F32(std::f32::consts::PI)
        );
        assert_eq!(
            FloatBits32.encode(Value::F32(std::f32::consts::PI)).unwrap(),
            Value::UInt(bits)
        );
        assert!(FloatBits32.decode(Value::Str("x".into())).is_err());
    }

    #[test]
    fn test_enum_map_both_ways() {
        let map = EnumMap::default().entry(1, "one").entry(2, "two");
        assert_eq!(map.decode(Value::Int(2)).unwrap(), Value::Str("two".into()));
        assert_eq!(map.encode(Value::Str("one".into())).unwrap(), Value::Int(1));
        assert!(map.decode(Value::Int(3)).is_err());
        assert!(map.encode(Value::Str("three".into())).is_err());
    }

    #[test]
    fn test_array_applies_element_wise() {
        let choices = ConverterChoices::of(ScaleOffset::new(2.0, 1.0));
        let raw = Value::Array(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(
            run_decode(&choices, raw).unwrap(),
            Value::Array(vec![Value::F64(21.0), Value::F64(41.0)])
        );
    }

    #[test]
    fn test_choice_selection_order() {
        let root = Message::new("T").with("mode", Value::Int(1));
        let choices = ConverterChoices::identity()
            .when("mode == 1", ScaleOffset::new(10.0, 0.0))
            .when("mode >= 1", ScaleOffset::new(100.0, 0.0));
        let out = decode_value(
            &choices,
            None,
            &BasicEvaluator,
            &root,
            &Context::new(),
            Value::Int(5),
        )
        .unwrap();
        assert_eq!(out, Value::F64(50.0));
    }

    #[test]
    fn test_validator_rejects() {
        let validator: Arc<dyn Validator> = Arc::new(IntRange::new(0, 10));
        let err = decode_value(
            &ConverterChoices::identity(),
            Some(&validator),
            &BasicEvaluator,
            &Message::new("T"),
            &Context::new(),
            Value::Int(11),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
    }

    #[test]
    fn test_identity_passthrough() {
        let out = run_decode(&ConverterChoices::identity(), Value::Str("ok".into())).unwrap();
        assert_eq!(out, Value::Str("ok".into()));
    }
}
