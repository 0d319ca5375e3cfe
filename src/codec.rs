//! Codec dispatch: one [`Codec`] per binding kind, driven by the parser.
//!
//! The registry maps a [`BindingKind`] to its codec. The four scalar kinds
//! share [`DefaultCodec`]; objects and checksums have dedicated codecs. A
//! custom codec registered under a kind replaces the built-in one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::binding::{
    Binding, BindingKind, ChecksumBind, ObjectBind, Repeat, VariantChoices, wire_prefix,
};
use crate::bits::ByteOrder;
use crate::buffer::{BitReader, BitWriter};
use crate::checksum::ChecksumAlgorithm;
use crate::errors::{Error, Result};
use crate::eval::{Context, Evaluator};
use crate::parser;
use crate::template::TemplateSet;
use crate::value::{Message, Value};

/// Shared engine state threaded through every codec call: the evaluator,
/// the codec registry, and the compiled templates.
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    pub evaluator: &'a dyn Evaluator,
    pub registry: &'a CodecRegistry,
    pub templates: &'a TemplateSet,
}

impl<'a> Engine<'a> {
    /// Decodes a registered type at the reader's current position. This is
    /// the recursion point for object-like codecs.
    pub fn decode_template(
        &self,
        type_name: &str,
        reader: &mut BitReader,
        ctx: &mut Context,
    ) -> Result<Message> {
        let template = self.templates.get(type_name)?;
        parser::decode(self, &template, reader, ctx)
    }

    /// Encodes a message of a registered type into the sink.
    pub fn encode_template(
        &self,
        message: &Message,
        sink: &mut EncodeSink,
        ctx: &mut Context,
    ) -> Result<()> {
        let template = self.templates.get(message.type_name())?;
        parser::encode(self, &template, message, sink, ctx)
    }
}

/// Write-side state for one compose call: the bit writer plus checksum
/// placeholders to patch once the full message is known.
#[derive(Debug, Default)]
pub struct EncodeSink {
    pub writer: BitWriter,
    pending: Vec<PendingChecksum>,
}

#[derive(Debug)]
struct PendingChecksum {
    at: usize,
    bits: u32,
    order: ByteOrder,
    algorithm: Arc<dyn ChecksumAlgorithm>,
    skip_start: usize,
    skip_end: usize,
}

pub(crate) fn width_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl EncodeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushes the writer, patches every checksum placeholder over the
    /// final bytes, and returns the buffer.
    pub(crate) fn finalize(mut self) -> Result<Vec<u8>> {
        self.writer.flush();
        let total = self.writer.byte_len();

        for pending in std::mem::take(&mut self.pending) {
            let end = total
                .checked_sub(pending.skip_end)
                .filter(|end| pending.skip_start <= *end)
                .ok_or(Error::Internal("checksum range outside the message"))?;
            let computed = pending
                .algorithm
                .compute(&self.writer.written()[pending.skip_start..end])
                & width_mask(pending.bits);

            let count = (pending.bits / 8) as usize;
            let mut bytes: Vec<u8> = (0..count)
                .rev()
                .map(|i| (computed >> (8 * i)) as u8)
                .collect();
            if pending.order == ByteOrder::Little {
                bytes.reverse();
            }
            self.writer.patch_bytes(pending.at, &bytes)?;
        }

        Ok(self.writer.into_bytes())
    }
}

/// A field codec: the two directions of one binding kind.
pub trait Codec: Send + Sync {
    fn decode(
        &self,
        eng: &Engine,
        reader: &mut BitReader,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
        repeat: &Repeat,
    ) -> Result<Value>;

    fn encode(
        &self,
        eng: &Engine,
        sink: &mut EncodeSink,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
        repeat: &Repeat,
        value: &Value,
    ) -> Result<()>;
}

/// Binding-kind to codec mapping, immutable after configuration.
pub struct CodecRegistry {
    map: HashMap<BindingKind, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub(crate) fn with_defaults() -> Self {
        let default: Arc<dyn Codec> = Arc::new(DefaultCodec);
        let mut map: HashMap<BindingKind, Arc<dyn Codec>> = HashMap::new();
        map.insert(BindingKind::Integer, default.clone());
        map.insert(BindingKind::Bits, default.clone());
        map.insert(BindingKind::StringFixed, default.clone());
        map.insert(BindingKind::StringTerminated, default);
        map.insert(BindingKind::Object, Arc::new(ObjectCodec));
        map.insert(BindingKind::Checksum, Arc::new(ChecksumCodec));

        CodecRegistry { map }
    }

    pub(crate) fn register(&mut self, kind: BindingKind, codec: Arc<dyn Codec>) {
        self.map.insert(kind, codec);
    }

    pub(crate) fn get(&self, kind: BindingKind) -> Result<Arc<dyn Codec>> {
        self.map
            .get(&kind)
            .cloned()
            .ok_or(Error::Internal("no codec registered for binding kind"))
    }
}

/// Resolves a size expression that must land in `min..=max`.
fn resolve_width(
    eng: &Engine,
    root: &Message,
    ctx: &Context,
    size: &crate::binding::SizeExpr,
    min: i64,
    max: i64,
) -> Result<usize> {
    let width = size.resolve(eng.evaluator, root, ctx)?;
    if width < min || width > max {
        return Err(Error::Converter(format!(
            "resolved size {width} outside {min}..={max}"
        )));
    }

    Ok(width as usize)
}

/// Codec for the four scalar binding kinds.
pub struct DefaultCodec;

impl DefaultCodec {
    fn decode_element(
        &self,
        eng: &Engine,
        reader: &mut BitReader,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
    ) -> Result<Value> {
        match binding {
            Binding::Integer(bind) => {
                let width = resolve_width(eng, root, ctx, &bind.size, 1, 128)?;
                if bind.signed {
                    Ok(Value::Int(reader.read_int(width, bind.order)?))
                } else {
                    Ok(Value::UInt(reader.read_uint(width, bind.order)?))
                }
            }
            Binding::Bits(bind) => {
                let width = resolve_width(eng, root, ctx, &bind.size, 0, i64::MAX)?;
                let bits = reader.read_bits(width)?;
                Ok(Value::Bits(match bind.order {
                    ByteOrder::Big => bits,
                    ByteOrder::Little => bits.reversed(),
                }))
            }
            Binding::StringFixed(bind) => {
                let count = resolve_width(eng, root, ctx, &bind.size, 0, i64::MAX)?;
                let text = reader.read_text_fixed(count, bind.charset)?;
                Ok(Value::Str(text.trim_end_matches('\0').to_string()))
            }
            Binding::StringTerminated(bind) => Ok(Value::Str(reader.read_text_until(
                bind.terminator,
                bind.charset,
                bind.consume,
            )?)),
            _ => Err(Error::Internal("default codec got a non-scalar binding")),
        }
    }

    fn encode_element(
        &self,
        eng: &Engine,
        sink: &mut EncodeSink,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
        value: &Value,
    ) -> Result<()> {
        match binding {
            Binding::Integer(bind) => {
                let width = resolve_width(eng, root, ctx, &bind.size, 1, 128)?;
                if bind.signed {
                    let v = value.as_int().ok_or_else(|| wrong_shape("integer", value))?;
                    sink.writer.write_int(v, width, bind.order);
                } else {
                    let v = value.as_uint().ok_or_else(|| wrong_shape("integer", value))?;
                    sink.writer.write_uint(v, width, bind.order);
                }
                Ok(())
            }
            Binding::Bits(bind) => {
                let width = resolve_width(eng, root, ctx, &bind.size, 0, i64::MAX)?;
                let Value::Bits(bits) = value else {
                    return Err(wrong_shape("bitmap", value));
                };
                if bits.len() != width {
                    return Err(Error::SizeMismatch {
                        declared: width,
                        actual: bits.len(),
                    });
                }
                match bind.order {
                    ByteOrder::Big => sink.writer.write_bits(bits),
                    ByteOrder::Little => sink.writer.write_bits(&bits.reversed()),
                }
                Ok(())
            }
            Binding::StringFixed(bind) => {
                let count = resolve_width(eng, root, ctx, &bind.size, 0, i64::MAX)?;
                let text = value.as_str().ok_or_else(|| wrong_shape("string", value))?;
                let mut bytes = bind.charset.encode(text)?;
                bind.charset.truncate(&mut bytes, count);
                bytes.resize(count, 0);
                sink.writer.write_bytes(&bytes);
                Ok(())
            }
            Binding::StringTerminated(bind) => {
                let text = value.as_str().ok_or_else(|| wrong_shape("string", value))?;
                sink.writer.write_text(text, bind.charset)?;
                if bind.consume {
                    sink.writer.write_byte(bind.terminator);
                }
                Ok(())
            }
            _ => Err(Error::Internal("default codec got a non-scalar binding")),
        }
    }
}

fn wrong_shape(expected: &str, value: &Value) -> Error {
    Error::Converter(format!(
        "expected a {expected} value, got {}",
        value.kind_name()
    ))
}

impl Codec for DefaultCodec {
    fn decode(
        &self,
        eng: &Engine,
        reader: &mut BitReader,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
        repeat: &Repeat,
    ) -> Result<Value> {
        match repeat {
            Repeat::One => self.decode_element(eng, reader, ctx, root, binding),
            Repeat::Array(count) => {
                let count = resolve_width(eng, root, ctx, count, 1, i64::MAX)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_element(eng, reader, ctx, root, binding)?);
                }
                Ok(Value::Array(items))
            }
            Repeat::SeparatedList { .. } => {
                Err(Error::Internal("separated list on a scalar binding"))
            }
        }
    }

    fn encode(
        &self,
        eng: &Engine,
        sink: &mut EncodeSink,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
        repeat: &Repeat,
        value: &Value,
    ) -> Result<()> {
        match repeat {
            Repeat::One => self.encode_element(eng, sink, ctx, root, binding, value),
            Repeat::Array(count) => {
                let count = resolve_width(eng, root, ctx, count, 1, i64::MAX)?;
                let items = value.as_array().ok_or_else(|| wrong_shape("array", value))?;
                if items.len() != count {
                    return Err(Error::SizeMismatch {
                        declared: count,
                        actual: items.len(),
                    });
                }
                for item in items {
                    self.encode_element(eng, sink, ctx, root, binding, item)?;
                }
                Ok(())
            }
            Repeat::SeparatedList { .. } => {
                Err(Error::Internal("separated list on a scalar binding"))
            }
        }
    }
}

/// Codec for nested objects, including variant selection and the
/// separated-list walk.
pub struct ObjectCodec;

/// Runs `body` with `#prefix` bound, restoring the previous binding after.
fn with_prefix<T>(
    ctx: &mut Context,
    prefix: Value,
    body: impl FnOnce(&mut Context) -> Result<T>,
) -> Result<T> {
    let previous = ctx.remove_var("prefix");
    ctx.set_var("prefix", prefix);
    let result = body(ctx);
    match previous {
        Some(v) => ctx.set_var("prefix", v),
        None => {
            ctx.remove_var("prefix");
        }
    }

    result
}

impl ObjectCodec {
    /// First-true scan over the choices; `#prefix` must already be bound
    /// by the caller when the selection is tagged.
    fn scan_choices(
        eng: &Engine,
        ctx: &Context,
        root: &Message,
        bind: &ObjectBind,
        select: &VariantChoices,
    ) -> Result<String> {
        for choice in &select.choices {
            let matched = if !choice.condition.trim().is_empty() {
                eng.evaluator.evaluate_bool(&choice.condition, root, ctx)?
            } else if let Some(prefix) = choice.prefix {
                ctx.var("prefix").and_then(Value::as_uint) == Some(prefix)
            } else {
                false
            };
            if matched {
                return Ok(choice.type_name.clone());
            }
        }

        select
            .default_type
            .clone()
            .ok_or_else(|| Error::NoAlternative(bind.type_name.clone()))
    }

    fn decode_one(
        &self,
        eng: &Engine,
        reader: &mut BitReader,
        ctx: &mut Context,
        root: &Message,
        bind: &ObjectBind,
    ) -> Result<Value> {
        let message = match &bind.select {
            Some(select) if select.prefix_bits > 0 => {
                let prefix =
                    reader.read_uint(select.prefix_bits as usize, select.prefix_order)?;
                with_prefix(ctx, Value::UInt(prefix), |ctx| {
                    let type_name = Self::scan_choices(eng, ctx, root, bind, select)?;
                    eng.decode_template(&type_name, reader, ctx)
                })?
            }
            Some(select) => {
                let type_name = Self::scan_choices(eng, ctx, root, bind, select)?;
                eng.decode_template(&type_name, reader, ctx)?
            }
            None => eng.decode_template(&bind.type_name, reader, ctx)?,
        };

        Ok(Value::Object(message))
    }

    fn encode_one(
        &self,
        eng: &Engine,
        sink: &mut EncodeSink,
        ctx: &mut Context,
        bind: &ObjectBind,
        value: &Value,
        write_tag: bool,
    ) -> Result<()> {
        let message = value.as_object().ok_or_else(|| wrong_shape("object", value))?;

        if let Some(select) = &bind.select {
            let choice = select
                .choices
                .iter()
                .find(|c| c.type_name == message.type_name());
            if choice.is_none() && select.default_type.as_deref() != Some(message.type_name()) {
                return Err(Error::NoAlternative(message.type_name().to_string()));
            }
            if write_tag && select.prefix_bits > 0 {
                let prefix = choice.and_then(wire_prefix).unwrap_or(0);
                sink.writer
                    .write_uint(prefix, select.prefix_bits as usize, select.prefix_order);
            }
        }

        eng.encode_template(message, sink, ctx)
    }
}

impl Codec for ObjectCodec {
    fn decode(
        &self,
        eng: &Engine,
        reader: &mut BitReader,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
        repeat: &Repeat,
    ) -> Result<Value> {
        let Binding::Object(bind) = binding else {
            return Err(Error::Internal("object codec got a non-object binding"));
        };

        match repeat {
            Repeat::One => self.decode_one(eng, reader, ctx, root, bind),
            Repeat::Array(count) => {
                let count = resolve_width(eng, root, ctx, count, 1, i64::MAX)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_one(eng, reader, ctx, root, bind)?);
                }
                Ok(Value::Array(items))
            }
            Repeat::SeparatedList {
                terminator,
                charset,
            } => {
                let mut items = Vec::new();
                loop {
                    let tag = reader.peek_text_until(*terminator, *charset)?;
                    if tag.is_empty() {
                        break;
                    }
                    let before = reader.bit_position();
                    let element = with_prefix(ctx, Value::Str(tag), |ctx| {
                        let type_name = match &bind.select {
                            Some(select) => Self::scan_choices(eng, ctx, root, bind, select)?,
                            None => bind.type_name.clone(),
                        };
                        eng.decode_template(&type_name, reader, ctx)
                    })?;
                    if reader.bit_position() == before {
                        return Err(Error::Internal("list element consumed no bits"));
                    }
                    items.push(Value::Object(element));
                }
                Ok(Value::Array(items))
            }
        }
    }

    fn encode(
        &self,
        eng: &Engine,
        sink: &mut EncodeSink,
        ctx: &mut Context,
        root: &Message,
        binding: &Binding,
        repeat: &Repeat,
        value: &Value,
    ) -> Result<()> {
        let Binding::Object(bind) = binding else {
            return Err(Error::Internal("object codec got a non-object binding"));
        };

        match repeat {
            Repeat::One => self.encode_one(eng, sink, ctx, bind, value, true),
            Repeat::Array(count) => {
                let count = resolve_width(eng, root, ctx, count, 1, i64::MAX)?;
                let items = value.as_array().ok_or_else(|| wrong_shape("array", value))?;
                if items.len() != count {
                    return Err(Error::SizeMismatch {
                        declared: count,
                        actual: items.len(),
                    });
                }
                for item in items {
                    self.encode_one(eng, sink, ctx, bind, item, true)?;
                }
                Ok(())
            }
            Repeat::SeparatedList { .. } => {
                let items = value.as_array().ok_or_else(|| wrong_shape("array", value))?;
                for item in items {
                    // Tags are ordinary fields of the element templates;
                    // nothing extra goes on the wire here.
                    self.encode_one(eng, sink, ctx, bind, item, false)?;
                }
                Ok(())
            }
        }
    }
}

/// Codec for checksum fields: reads the stored value, writes a placeholder
/// to patch at finalization.
pub struct ChecksumCodec;

impl Codec for ChecksumCodec {
    fn decode(
        &self,
        _eng: &Engine,
        reader: &mut BitReader,
        _ctx: &mut Context,
        _root: &Message,
        binding: &Binding,
        _repeat: &Repeat,
    ) -> Result<Value> {
        let Binding::Checksum(bind) = binding else {
            return Err(Error::Internal("checksum codec got a non-checksum binding"));
        };

        Ok(Value::UInt(reader.read_uint(bind.bits as usize, bind.order)?))
    }

    fn encode(
        &self,
        _eng: &Engine,
        sink: &mut EncodeSink,
        _ctx: &mut Context,
        _root: &Message,
        binding: &Binding,
        _repeat: &Repeat,
        _value: &Value,
    ) -> Result<()> {
        let Binding::Checksum(bind) = binding else {
            return Err(Error::Internal("checksum codec got a non-checksum binding"));
        };
        if !sink.writer.is_byte_aligned() {
            return Err(Error::Internal("checksum field is not byte-aligned"));
        }

        sink.pending.push(PendingChecksum {
            at: sink.writer.byte_len(),
            bits: bind.bits,
            order: bind.order,
            algorithm: bind.algorithm.clone(),
            skip_start: bind.skip_start,
            skip_end: bind.skip_end,
        });
        sink.writer.write_uint(0, bind.bits as usize, bind.order);

        Ok(())
    }
}

pub(crate) fn checksum_bind(binding: &Binding) -> Result<&ChecksumBind> {
    match binding {
        Binding::Checksum(bind) => Ok(bind),
        _ => Err(Error::Internal("expected a checksum binding")),
    }
}
