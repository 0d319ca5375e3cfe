//! The template walk: drives codecs field by field over a bit buffer.
//!
//! Decode verifies the header, runs skips, dispatches each bound field to
//! its codec, pushes the result through the converter/validator pipeline,
//! and finishes with the post-pass: evaluated fields, post-processed
//! fields, checksum verification, trailer. Encode mirrors the walk over a
//! working copy of the caller's message, leaving the input untouched.

use tracing::trace;

use crate::binding::{Binding, Skip};
use crate::buffer::BitReader;
use crate::codec::{Engine, EncodeSink, checksum_bind, width_mask};
use crate::convert;
use crate::errors::{Error, Result};
use crate::eval::Context;
use crate::template::{PostProcessedField, Template};
use crate::value::{Message, Value};

pub(crate) fn decode(
    eng: &Engine,
    template: &Template,
    reader: &mut BitReader,
    ctx: &mut Context,
) -> Result<Message> {
    trace!("decoding `{}` at bit {}", template.name, reader.bit_position());

    if let Some(header) = &template.header {
        if !header.start.is_empty() {
            let got = reader
                .read_bytes(header.start.len())
                .map_err(|_| Error::NoHeader)?;
            if got != header.start {
                return Err(Error::NoHeader);
            }
        }
    }

    let mut message = Message::new(&template.name);
    for field in &template.fields {
        let wrap = |e: Error| e.in_field(&template.name, &field.name);

        for skip in &field.skips {
            run_skip_decode(eng, reader, ctx, &message, skip).map_err(wrap)?;
        }

        let codec = eng.registry.get(field.binding.kind())?;
        let raw = codec
            .decode(eng, reader, ctx, &message, &field.binding, &field.repeat)
            .map_err(wrap)?;

        let value = match field.binding.converter() {
            Some(choices) => convert::decode_value(
                choices,
                field.binding.validator(),
                eng.evaluator,
                &message,
                ctx,
                raw,
            )
            .map_err(wrap)?,
            // Checksum fields bypass the pipeline; the raw value is
            // compared in the post-pass.
            None => raw,
        };
        message.set(&field.name, value);
    }

    for ev in &template.evaluated {
        let wrap = |e: Error| e.in_field(&template.name, &ev.name);
        if eng
            .evaluator
            .evaluate_bool(&ev.condition, &message, ctx)
            .map_err(wrap)?
        {
            let value = eng
                .evaluator
                .evaluate_size(&ev.expr, &message, ctx)
                .map_err(wrap)?;
            message.set(&ev.name, Value::Int(value as i128));
        }
    }

    for pp in &template.post_processed {
        let wrap = |e: Error| e.in_field(&template.name, &pp.name);
        if eng
            .evaluator
            .evaluate_bool(&pp.condition, &message, ctx)
            .map_err(wrap)?
        {
            let value = eng
                .evaluator
                .evaluate_size(&pp.decode_expr, &message, ctx)
                .map_err(wrap)?;
            message.set(&pp.name, Value::Int(value as i128));
        }
    }

    if let Some(index) = template.checksum {
        verify_checksum(template, index, reader, &message)?;
    }

    if let Some(header) = &template.header {
        if !header.end.is_empty() {
            let got = reader
                .read_bytes(header.end.len())
                .map_err(|_| Error::NoTrailer)?;
            if got != header.end {
                return Err(Error::NoTrailer);
            }
        }
    }

    Ok(message)
}

fn run_skip_decode(
    eng: &Engine,
    reader: &mut BitReader,
    ctx: &Context,
    root: &Message,
    skip: &Skip,
) -> Result<()> {
    match skip {
        Skip::Bits(size) => {
            let bits = size.resolve(eng.evaluator, root, ctx)?;
            if bits < 0 {
                return Err(Error::Internal("skip size did not resolve"));
            }
            reader.skip(bits as usize)
        }
        Skip::UntilTerminator {
            terminator,
            consume,
        } => reader.skip_until(*terminator, *consume),
    }
}

/// Recomputes the declared range and compares it against the stored field.
/// Runs before the trailer is read, so the trailer's statically known
/// length is added to the consumed byte count.
fn verify_checksum(
    template: &Template,
    index: usize,
    reader: &BitReader,
    message: &Message,
) -> Result<()> {
    let field = &template.fields[index];
    let bind = checksum_bind(&field.binding)?;

    let stored = message
        .get(&field.name)
        .and_then(Value::as_uint)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or(Error::Internal("checksum field holds no integer"))?;

    let consumed = (reader.bit_position() + 7) / 8;
    let trailer_len = template.header.as_ref().map_or(0, |h| h.end.len());
    let total = consumed + trailer_len;

    let end = total
        .checked_sub(bind.skip_end)
        .filter(|end| bind.skip_start <= *end)
        .ok_or(Error::Internal("checksum range outside the message"))?;
    if end > reader.data().len() {
        return Err(Error::UnexpectedEof);
    }

    let computed =
        bind.algorithm.compute(&reader.data()[bind.skip_start..end]) & width_mask(bind.bits);
    if computed != stored {
        return Err(Error::ChecksumMismatch { computed, stored });
    }

    Ok(())
}

pub(crate) fn encode(
    eng: &Engine,
    template: &Template,
    message: &Message,
    sink: &mut EncodeSink,
    ctx: &mut Context,
) -> Result<()> {
    trace!("encoding `{}`", template.name);

    // The caller's message stays read-only; evaluated and post-processed
    // assignments land in a working copy.
    let mut working = message.clone();

    for ev in &template.evaluated {
        let wrap = |e: Error| e.in_field(&template.name, &ev.name);
        if eng
            .evaluator
            .evaluate_bool(&ev.condition, &working, ctx)
            .map_err(wrap)?
        {
            let value = eng
                .evaluator
                .evaluate_size(&ev.expr, &working, ctx)
                .map_err(wrap)?;
            working.set(&ev.name, Value::Int(value as i128));
        }
    }

    if let Some(header) = &template.header {
        sink.writer.write_bytes(&header.start);
    }

    for field in &template.fields {
        let wrap = |e: Error| e.in_field(&template.name, &field.name);

        for pp in post_processing_for(template, &field.name) {
            if eng
                .evaluator
                .evaluate_bool(&pp.condition, &working, ctx)
                .map_err(wrap)?
            {
                let value = eng
                    .evaluator
                    .evaluate_size(&pp.encode_expr, &working, ctx)
                    .map_err(wrap)?;
                working.set(&pp.name, Value::Int(value as i128));
            }
        }

        for skip in &field.skips {
            run_skip_encode(eng, sink, ctx, &working, skip).map_err(wrap)?;
        }

        let codec = eng.registry.get(field.binding.kind())?;
        if matches!(field.binding, Binding::Checksum(_)) {
            // Placeholder only; the value is computed at finalization.
            codec
                .encode(
                    eng,
                    sink,
                    ctx,
                    &working,
                    &field.binding,
                    &field.repeat,
                    &Value::UInt(0),
                )
                .map_err(wrap)?;
            continue;
        }

        let value = working.get(&field.name).cloned().ok_or(Error::MissingValue).map_err(wrap)?;
        let wire = match field.binding.converter() {
            Some(choices) => convert::encode_value(
                choices,
                field.binding.validator(),
                eng.evaluator,
                &working,
                ctx,
                value,
            )
            .map_err(wrap)?,
            None => value,
        };
        codec
            .encode(eng, sink, ctx, &working, &field.binding, &field.repeat, &wire)
            .map_err(wrap)?;
    }

    if let Some(header) = &template.header {
        sink.writer.write_bytes(&header.end);
    }

    Ok(())
}

fn post_processing_for<'a>(
    template: &'a Template,
    field_name: &'a str,
) -> impl Iterator<Item = &'a PostProcessedField> {
    template
        .post_processed
        .iter()
        .filter(move |pp| pp.name == field_name)
}

fn run_skip_encode(
    eng: &Engine,
    sink: &mut EncodeSink,
    ctx: &Context,
    root: &Message,
    skip: &Skip,
) -> Result<()> {
    match skip {
        Skip::Bits(size) => {
            let bits = size.resolve(eng.evaluator, root, ctx)?;
            if bits < 0 {
                return Err(Error::Internal("skip size did not resolve"));
            }
            let mut remaining = bits as usize;
            while remaining > 0 {
                let chunk = remaining.min(64);
                sink.writer.write_uint(0, chunk, crate::bits::ByteOrder::Big);
                remaining -= chunk;
            }
            Ok(())
        }
        Skip::UntilTerminator { terminator, .. } => {
            sink.writer.write_byte(*terminator);
            Ok(())
        }
    }
}
