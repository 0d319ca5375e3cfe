//! Map-shaped description of a compiled template, for debugging and tooling.

use crate::binding::{Binding, Repeat, Skip};
use crate::template::Template;
use crate::value::{Message, Value};

/// Renders the compiled schema as a value tree: scalar facts as strings
/// and integers, substructures as nested objects and arrays.
pub(crate) fn describe(template: &Template) -> Value {
    let mut root = Message::new("template");
    root.set("type", Value::Str(template.name.clone()));

    if let Some(header) = &template.header {
        let mut desc = Message::new("header");
        desc.set("start", Value::Bytes(header.start.clone()));
        desc.set("end", Value::Bytes(header.end.clone()));
        desc.set("charset", Value::Str(header.charset.name().to_string()));
        root.set("header", Value::Object(desc));
    }

    let fields: Vec<Value> = template
        .fields
        .iter()
        .map(|field| {
            let mut desc = describe_binding(&field.binding);
            desc.set("name", Value::Str(field.name.clone()));
            desc.set("repeat", Value::Str(describe_repeat(&field.repeat)));
            if !field.skips.is_empty() {
                desc.set(
                    "skips",
                    Value::Array(field.skips.iter().map(describe_skip).collect()),
                );
            }
            Value::Object(desc)
        })
        .collect();
    root.set("fields", Value::Array(fields));

    if !template.evaluated.is_empty() {
        let evaluated: Vec<Value> = template
            .evaluated
            .iter()
            .map(|ev| {
                let mut desc = Message::new("evaluated");
                desc.set("name", Value::Str(ev.name.clone()));
                desc.set("condition", Value::Str(ev.condition.clone()));
                desc.set("expression", Value::Str(ev.expr.clone()));
                Value::Object(desc)
            })
            .collect();
        root.set("evaluated", Value::Array(evaluated));
    }

    if !template.post_processed.is_empty() {
        let processed: Vec<Value> = template
            .post_processed
            .iter()
            .map(|pp| {
                let mut desc = Message::new("postProcessed");
                desc.set("name", Value::Str(pp.name.clone()));
                desc.set("condition", Value::Str(pp.condition.clone()));
                desc.set("decode", Value::Str(pp.decode_expr.clone()));
                desc.set("encode", Value::Str(pp.encode_expr.clone()));
                Value::Object(desc)
            })
            .collect();
        root.set("postProcessed", Value::Array(processed));
    }

    Value::Object(root)
}

fn describe_binding(binding: &Binding) -> Message {
    let mut desc = Message::new("field");
    match binding {
        Binding::Integer(bind) => {
            desc.set("kind", Value::Str("integer".into()));
            desc.set("size", Value::Str(bind.size.0.clone()));
            desc.set("order", Value::Str(format!("{:?}", bind.order)));
            desc.set("signed", Value::UInt(bind.signed as u128));
        }
        Binding::Bits(bind) => {
            desc.set("kind", Value::Str("bits".into()));
            desc.set("size", Value::Str(bind.size.0.clone()));
            desc.set("order", Value::Str(format!("{:?}", bind.order)));
        }
        Binding::StringFixed(bind) => {
            desc.set("kind", Value::Str("string".into()));
            desc.set("size", Value::Str(bind.size.0.clone()));
            desc.set("charset", Value::Str(bind.charset.name().to_string()));
        }
        Binding::StringTerminated(bind) => {
            desc.set("kind", Value::Str("terminatedString".into()));
            desc.set("terminator", Value::UInt(bind.terminator as u128));
            desc.set("consume", Value::UInt(bind.consume as u128));
            desc.set("charset", Value::Str(bind.charset.name().to_string()));
        }
        Binding::Object(bind) => {
            desc.set("kind", Value::Str("object".into()));
            desc.set("objectType", Value::Str(bind.type_name.clone()));
            if let Some(select) = &bind.select {
                let mut selection = Message::new("select");
                selection.set("prefixBits", Value::UInt(select.prefix_bits as u128));
                selection.set(
                    "choices",
                    Value::Array(
                        select
                            .choices
                            .iter()
                            .map(|c| {
                                let mut choice = Message::new("choice");
                                choice.set("type", Value::Str(c.type_name.clone()));
                                choice.set("condition", Value::Str(c.condition.clone()));
                                if let Some(prefix) = c.prefix {
                                    choice.set("prefix", Value::UInt(prefix));
                                }
                                Value::Object(choice)
                            })
                            .collect(),
                    ),
                );
                if let Some(default) = &select.default_type {
                    selection.set("default", Value::Str(default.clone()));
                }
                desc.set("select", Value::Object(selection));
            }
        }
        Binding::Checksum(bind) => {
            desc.set("kind", Value::Str("checksum".into()));
            desc.set("bits", Value::UInt(bind.bits as u128));
            desc.set("order", Value::Str(format!("{:?}", bind.order)));
            desc.set("algorithm", Value::Str(format!("{:?}", bind.algorithm)));
            desc.set("skipStart", Value::UInt(bind.skip_start as u128));
            desc.set("skipEnd", Value::UInt(bind.skip_end as u128));
        }
    }
    if binding.converter().is_some_and(|c| !c.is_identity()) {
        desc.set("converted", Value::UInt(1));
    }
    if binding.validator().is_some() {
        desc.set("validated", Value::UInt(1));
    }

    desc
}

fn describe_repeat(repeat: &Repeat) -> String {
    match repeat {
        Repeat::One => "one".to_string(),
        Repeat::Array(count) => format!("array[{}]", count.0),
        Repeat::SeparatedList { terminator, .. } => {
            format!("list[terminator={terminator:#04x}]")
        }
    }
}

fn describe_skip(skip: &Skip) -> Value {
    match skip {
        Skip::Bits(size) => Value::Str(format!("skip[{}]", size.0)),
        Skip::UntilTerminator { terminator, .. } => {
            Value::Str(format!("skipUntil[{terminator:#04x}]"))
        }
    }
}
