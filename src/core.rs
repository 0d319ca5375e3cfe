//! The public entry point: a builder that compiles registered types into an
//! immutable [`Core`], and the parse/compose/describe operations on it.

use std::sync::Arc;

use tracing::debug;

use crate::binding::BindingKind;
use crate::buffer::BitReader;
use crate::codec::{Codec, CodecRegistry, EncodeSink, Engine};
use crate::describe;
use crate::errors::Result;
use crate::eval::{BasicEvaluator, Context, Evaluator};
use crate::parser;
use crate::template::{self, TemplateSet, TypeDef};
use crate::value::{Message, Value};

/// Configuration collector. Nothing is validated until [`build`](Self::build).
pub struct CoreBuilder {
    evaluator: Arc<dyn Evaluator>,
    types: Vec<TypeDef>,
    codecs: Vec<(BindingKind, Arc<dyn Codec>)>,
}

impl Default for CoreBuilder {
    fn default() -> Self {
        CoreBuilder {
            evaluator: Arc::new(BasicEvaluator),
            types: Vec::new(),
            codecs: Vec::new(),
        }
    }
}

impl CoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in an external expression evaluator.
    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn register_type(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }

    /// Replaces the built-in codec for one binding kind.
    pub fn register_codec(mut self, kind: BindingKind, codec: impl Codec + 'static) -> Self {
        self.codecs.push((kind, Arc::new(codec)));
        self
    }

    /// Compiles every registered type. Schema violations surface here, not
    /// at parse time.
    pub fn build(self) -> Result<Core> {
        let templates = template::compile(&self.types)?;
        let mut registry = CodecRegistry::with_defaults();
        for (kind, codec) in self.codecs {
            registry.register(kind, codec);
        }
        debug!("core built with {} templates", self.types.len());

        Ok(Core {
            evaluator: self.evaluator,
            registry,
            templates,
        })
    }
}

/// Immutable codec engine: templates, codecs, and the evaluator. Shared
/// freely across threads; each parse or compose call owns its own buffer
/// and context.
pub struct Core {
    evaluator: Arc<dyn Evaluator>,
    registry: CodecRegistry,
    templates: TemplateSet,
}

impl Core {
    fn engine(&self) -> Engine<'_> {
        Engine {
            evaluator: self.evaluator.as_ref(),
            registry: &self.registry,
            templates: &self.templates,
        }
    }

    /// Decodes `bytes` as one message of the named type.
    pub fn parse(&self, type_name: &str, bytes: &[u8]) -> Result<Message> {
        let template = self.templates.get(type_name)?;
        let mut reader = BitReader::new(bytes);
        let mut ctx = Context::new();

        parser::decode(&self.engine(), &template, &mut reader, &mut ctx)
    }

    /// Encodes a message of the named type into a fresh byte vector. The
    /// message itself is left untouched.
    pub fn compose(&self, type_name: &str, message: &Message) -> Result<Vec<u8>> {
        let template = self.templates.get(type_name)?;
        let mut sink = EncodeSink::new();
        let mut ctx = Context::new();

        parser::encode(&self.engine(), &template, message, &mut sink, &mut ctx)?;
        sink.finalize()
    }

    /// Debug description of a compiled template as a value tree.
    pub fn describe(&self, type_name: &str) -> Result<Value> {
        Ok(describe::describe(self.templates.get(type_name)?.as_ref()))
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::IntegerBind;
    use crate::bits::ByteOrder;

    #[test]
    fn test_build_and_round_trip() {
        let core = CoreBuilder::new()
            .register_type(
                TypeDef::new("Pair")
                    .field("a", IntegerBind::new(5))
                    .field("b", IntegerBind::new(3)),
            )
            .build()
            .unwrap();

        let decoded = core.parse("Pair", &[0xAD]).unwrap();
        assert_eq!(decoded.get("a"), Some(&Value::UInt(21)));
        assert_eq!(decoded.get("b"), Some(&Value::UInt(5)));

        let encoded = core.compose("Pair", &decoded).unwrap();
        assert_eq!(encoded, vec![0xAD]);
    }

    #[test]
    fn test_unknown_type() {
        let core = CoreBuilder::new().build().unwrap();
        assert!(core.parse("Nope", &[]).is_err());
    }

    #[test]
    fn test_core_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Core>();
    }

    #[test]
    fn test_describe_shape() {
        let core = CoreBuilder::new()
            .register_type(
                TypeDef::new("T").field("x", IntegerBind::new(16).order(ByteOrder::Little)),
            )
            .build()
            .unwrap();

        let description = core.describe("T").unwrap();
        let root = description.as_object().unwrap();
        assert_eq!(root.get("type"), Some(&Value::Str("T".into())));
        let fields = root.get("fields").unwrap().as_array().unwrap();
        assert_eq!(fields.len(), 1);
        let field = fields[0].as_object().unwrap();
        assert_eq!(field.get("kind"), Some(&Value::Str("integer".into())));
        assert_eq!(field.get("name"), Some(&Value::Str("x".into())));
    }
}
