//! Runtime value model: what decode produces and compose consumes.

use std::collections::BTreeMap;

use crate::bits::BitSet;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer of any width up to 128 bits.
    Int(i128),
    /// Unsigned integer of any width up to 128 bits.
    UInt(u128),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Raw bitmap, bit 0 = first on the wire.
    Bits(BitSet),
    /// A nested message.
    Object(Message),
    Array(Vec<Value>),
}

impl Value {
    /// Any integer variant widened to `i128`. Unsigned values above
    /// `i128::MAX` do not fit and return `None`.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i128::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u128::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Message> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Short tag used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Bits(_) => "bits",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }
}

/// A message instance: the runtime counterpart of a registered type.
///
/// Field order is irrelevant here; the wire order lives in the compiled
/// template. Variant selection at encode matches on [`type_name`](Self::type_name).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(type_name: impl Into<String>) -> Self {
        Message {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolves a dotted path (`a.b.c`) through nested objects.
    pub fn path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_resolution() {
        let inner = Message::new("Inner").with("x", Value::Int(7));
        let outer = Message::new("Outer")
            .with("inner", Value::Object(inner))
            .with("y", Value::Str("hi".into()));

        assert_eq!(outer.path("inner.x"), Some(&Value::Int(7)));
        assert_eq!(outer.path("y"), Some(&Value::Str("hi".into())));
        assert_eq!(outer.path("inner.missing"), None);
        assert_eq!(outer.path("y.x"), None);
    }

    #[test]
    fn test_as_int_widening() {
        assert_eq!(Value::UInt(5).as_int(), Some(5));
        assert_eq!(Value::Int(-5).as_uint(), None);
        assert_eq!(Value::UInt(u128::MAX).as_int(), None);
        assert_eq!(Value::Str("5".into()).as_int(), None);
    }
}
