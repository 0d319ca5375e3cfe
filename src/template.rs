//! Type descriptions and the template compiler.
//!
//! A [`TypeDef`] is the explicit, builder-assembled description of one user
//! type: its header, its bound fields in wire order, and its derived
//! fields. [`compile`] validates every description and produces immutable
//! [`Template`]s, memoized by type name and shared read-only afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::binding::{Binding, Header, Repeat, SizeExpr, Skip, VariantChoices};
use crate::charset::Charset;
use crate::errors::{Error, Result};

/// Builder for one user type's wire description.
#[derive(Debug, Clone, Default)]
pub struct TypeDef {
    name: String,
    header: Option<Header>,
    fields: Vec<FieldDef>,
    evaluated: Vec<EvaluatedField>,
    post_processed: Vec<PostProcessedField>,
    pending_skips: Vec<Skip>,
}

/// One described field: binding, collection wrapper, and preceding skips.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub binding: Binding,
    pub repeat: Repeat,
    pub skips: Vec<Skip>,
}

/// Derived field assigned after decode when its condition holds.
#[derive(Debug, Clone)]
pub struct EvaluatedField {
    pub name: String,
    pub condition: String,
    pub expr: String,
}

/// Symmetric transform applied to an owning field: `decode_expr` after the
/// message is read, `encode_expr` right before the field is written.
#[derive(Debug, Clone)]
pub struct PostProcessedField {
    pub name: String,
    pub condition: String,
    pub decode_expr: String,
    pub encode_expr: String,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        TypeDef {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(mut self, header: Header) -> Self {
        self.header = Some(header);
        self
    }

    /// Appends a single-value field; queued skips attach to it.
    pub fn field(self, name: impl Into<String>, binding: impl Into<Binding>) -> Self {
        self.push_field(name, binding.into(), Repeat::One)
    }

    /// Appends a counted-array field.
    pub fn array(
        self,
        name: impl Into<String>,
        binding: impl Into<Binding>,
        count: impl Into<SizeExpr>,
    ) -> Self {
        self.push_field(name, binding.into(), Repeat::Array(count.into()))
    }

    /// Appends a terminator-separated list field.
    pub fn list(
        self,
        name: impl Into<String>,
        binding: impl Into<Binding>,
        terminator: u8,
        charset: Charset,
    ) -> Self {
        self.push_field(
            name,
            binding.into(),
            Repeat::SeparatedList {
                terminator,
                charset,
            },
        )
    }

    fn push_field(mut self, name: impl Into<String>, binding: Binding, repeat: Repeat) -> Self {
        let skips = std::mem::take(&mut self.pending_skips);
        self.fields.push(FieldDef {
            name: name.into(),
            binding,
            repeat,
            skips,
        });
        self
    }

    /// Queues a skip region ahead of the next field.
    pub fn skip_bits(mut self, size: impl Into<SizeExpr>) -> Self {
        self.pending_skips.push(Skip::Bits(size.into()));
        self
    }

    pub fn skip_until(mut self, terminator: u8, consume: bool) -> Self {
        self.pending_skips.push(Skip::UntilTerminator { terminator, consume });
        self
    }

    /// Declares a derived field evaluated after decode.
    pub fn evaluated(
        mut self,
        name: impl Into<String>,
        condition: impl Into<String>,
        expr: impl Into<String>,
    ) -> Self {
        self.evaluated.push(EvaluatedField {
            name: name.into(),
            condition: condition.into(),
            expr: expr.into(),
        });
        self
    }

    /// Declares a symmetric post-processing transform on a field.
    pub fn post_processed(
        mut self,
        name: impl Into<String>,
        condition: impl Into<String>,
        decode_expr: impl Into<String>,
        encode_expr: impl Into<String>,
    ) -> Self {
        self.post_processed.push(PostProcessedField {
            name: name.into(),
            condition: condition.into(),
            decode_expr: decode_expr.into(),
            encode_expr: encode_expr.into(),
        });
        self
    }
}

/// Compiled, immutable schema for one user type.
#[derive(Debug)]
pub struct Template {
    pub(crate) name: String,
    pub(crate) header: Option<CompiledHeader>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) evaluated: Vec<EvaluatedField>,
    pub(crate) post_processed: Vec<PostProcessedField>,
    /// Index of the checksum field, if any.
    pub(crate) checksum: Option<usize>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledHeader {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub charset: Charset,
}

/// The compiled templates of every registered type.
#[derive(Debug, Default)]
pub struct TemplateSet {
    map: HashMap<String, Arc<Template>>,
}

impl TemplateSet {
    pub fn get(&self, name: &str) -> Result<Arc<Template>> {
        self.map
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// Compiles every registered [`TypeDef`] into an immutable [`TemplateSet`].
pub(crate) fn compile(defs: &[TypeDef]) -> Result<TemplateSet> {
    let known: HashSet<&str> = defs.iter().map(|d| d.name.as_str()).collect();
    if known.len() != defs.len() {
        return Err(Error::annotation(
            "<registry>",
            "<registry>",
            "duplicate type registration",
        ));
    }

    let mut set = TemplateSet::default();
    for def in defs {
        let template = compile_type(def, &known)?;
        debug!(
            "compiled template for `{}` ({} fields)",
            template.name,
            template.fields.len()
        );
        set.map.insert(def.name.clone(), Arc::new(template));
    }

    detect_recursion(defs)?;

    Ok(set)
}

fn compile_type(def: &TypeDef, known: &HashSet<&str>) -> Result<Template> {
    if def.name.is_empty() {
        return Err(Error::annotation("<anonymous>", "", "type name is empty"));
    }
    if !def.pending_skips.is_empty() {
        return Err(Error::annotation(
            &def.name,
            "<end>",
            "skip declared with no following field",
        ));
    }

    let mut names = HashSet::new();
    for field in &def.fields {
        if !names.insert(field.name.as_str()) {
            return Err(Error::annotation(&def.name, &field.name, "duplicate field"));
        }
        validate_field(&def.name, field, known)?;
    }

    for ev in &def.evaluated {
        if !names.insert(ev.name.as_str()) {
            return Err(Error::annotation(
                &def.name,
                &ev.name,
                "evaluated field shadows another field",
            ));
        }
        if ev.expr.trim().is_empty() {
            return Err(Error::annotation(
                &def.name,
                &ev.name,
                "evaluated field has no expression",
            ));
        }
    }

    for pp in &def.post_processed {
        if !names.contains(pp.name.as_str()) {
            return Err(Error::annotation(
                &def.name,
                &pp.name,
                "post-processing refers to an unknown field",
            ));
        }
        if pp.decode_expr.trim().is_empty() || pp.encode_expr.trim().is_empty() {
            return Err(Error::annotation(
                &def.name,
                &pp.name,
                "post-processing needs both decode and encode expressions",
            ));
        }
    }

    let checksum = checksum_index(def)?;
    let header = def.header.as_ref().map(|h| compile_header(&def.name, h)).transpose()?;

    Ok(Template {
        name: def.name.clone(),
        header,
        fields: def.fields.clone(),
        evaluated: def.evaluated.clone(),
        post_processed: def.post_processed.clone(),
        checksum,
    })
}

fn validate_field(type_name: &str, field: &FieldDef, known: &HashSet<&str>) -> Result<()> {
    let fail = |reason: String| Err(Error::annotation(type_name, &field.name, reason));

    for skip in &field.skips {
        if let Skip::Bits(size) = skip {
            if size.static_value().is_some_and(|v| v < 0) {
                return fail("skip size must be non-negative".into());
            }
        }
    }

    if let Repeat::Array(count) = &field.repeat {
        if count.static_value().is_some_and(|v| v < 1) {
            return fail("array count must be positive".into());
        }
    }

    match &field.binding {
        Binding::Integer(bind) => {
            if let Some(size) = bind.size.static_value() {
                if !(1..=128).contains(&size) {
                    return fail(format!("integer width {size} outside 1..=128"));
                }
            }
        }
        Binding::Bits(bind) => {
            if bind.size.static_value().is_some_and(|v| v < 0) {
                return fail("bitmap width must be non-negative".into());
            }
        }
        Binding::StringFixed(bind) => {
            if bind.size.static_value().is_some_and(|v| v < 0) {
                return fail("string byte count must be non-negative".into());
            }
        }
        Binding::StringTerminated(_) => {}
        Binding::Object(bind) => {
            if let Some(select) = &bind.select {
                validate_select(type_name, field, select, known)?;
            } else if !known.contains(bind.type_name.as_str()) {
                return fail(format!("unknown object type `{}`", bind.type_name));
            }
        }
        Binding::Checksum(bind) => {
            if !matches!(field.repeat, Repeat::One) {
                return fail("checksum fields cannot repeat".into());
            }
            if !(8..=64).contains(&bind.bits) || bind.bits % 8 != 0 {
                return fail(format!(
                    "checksum width {} must be a whole number of bytes in 8..=64",
                    bind.bits
                ));
            }
        }
    }

    if matches!(field.repeat, Repeat::SeparatedList { .. })
        && !matches!(field.binding, Binding::Object(_))
    {
        return fail("separated lists require object elements".into());
    }

    Ok(())
}

fn validate_select(
    type_name: &str,
    field: &FieldDef,
    select: &VariantChoices,
    known: &HashSet<&str>,
) -> Result<()> {
    let fail = |reason: String| Err(Error::annotation(type_name, &field.name, reason));

    if select.prefix_bits > 32 {
        return fail(format!("prefix length {} outside 0..=32", select.prefix_bits));
    }
    if select.choices.is_empty() && select.default_type.is_none() {
        return fail("variant selection declares no choices".into());
    }
    for choice in &select.choices {
        if choice.type_name.is_empty() {
            return fail("variant choice has no type".into());
        }
        if choice.condition.trim().is_empty() && choice.prefix.is_none() {
            return fail(format!(
                "choice for `{}` needs a condition or a prefix literal",
                choice.type_name
            ));
        }
    }
    for referenced in select.referenced_types() {
        if !known.contains(referenced) {
            return fail(format!("unknown variant type `{referenced}`"));
        }
    }

    Ok(())
}

fn checksum_index(def: &TypeDef) -> Result<Option<usize>> {
    let mut found = None;
    for (index, field) in def.fields.iter().enumerate() {
        if matches!(field.binding, Binding::Checksum(_)) {
            if found.is_some() {
                return Err(Error::annotation(
                    &def.name,
                    &field.name,
                    "more than one checksum field",
                ));
            }
            found = Some(index);
        }
    }

    Ok(found)
}

fn compile_header(type_name: &str, header: &Header) -> Result<CompiledHeader> {
    if !header.min_protocol.is_empty() && !header.max_protocol.is_empty() {
        let min = parse_version(type_name, &header.min_protocol)?;
        let max = parse_version(type_name, &header.max_protocol)?;
        if min > max {
            return Err(Error::annotation(
                type_name,
                "<header>",
                format!(
                    "protocol range {}..{} is inverted",
                    header.min_protocol, header.max_protocol
                ),
            ));
        }
    }

    Ok(CompiledHeader {
        start: header.charset.encode(&header.start)?,
        end: header.charset.encode(&header.end)?,
        charset: header.charset,
    })
}

fn parse_version(type_name: &str, version: &str) -> Result<Vec<u64>> {
    version
        .split('.')
        .map(|part| {
            part.parse::<u64>().map_err(|_| {
                Error::annotation(
                    type_name,
                    "<header>",
                    format!("malformed protocol version `{version}`"),
                )
            })
        })
        .collect()
}

/// Rejects type graphs that recurse through unbounded object edges.
/// Counted arrays may close a cycle: their count expression bounds the
/// depth at runtime.
fn detect_recursion(defs: &[TypeDef]) -> Result<()> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for def in defs {
        let targets = edges.entry(def.name.as_str()).or_default();
        for field in &def.fields {
            if matches!(field.repeat, Repeat::Array(_)) {
                continue;
            }
            if let Binding::Object(bind) = &field.binding {
                match &bind.select {
                    Some(select) => targets.extend(select.referenced_types()),
                    None => targets.push(bind.type_name.as_str()),
                }
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                return Err(Error::annotation(
                    node,
                    "<object>",
                    "recursive layout without a bounding array count",
                ));
            }
            None => {}
        }
        marks.insert(node, Mark::InProgress);
        for next in edges.get(node).into_iter().flatten() {
            visit(next, edges, marks)?;
        }
        marks.insert(node, Mark::Done);

        Ok(())
    }

    let mut marks = HashMap::new();
    for def in defs {
        visit(def.name.as_str(), &edges, &mut marks)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{ChecksumBind, Header, IntegerBind, ObjectBind, StringFixedBind};
    use crate::checksum::Crc16Ccitt;

    fn leaf() -> TypeDef {
        TypeDef::new("Leaf").field("value", IntegerBind::new(8))
    }

    #[test]
    fn test_compile_simple_type() {
        let set = compile(&[leaf()]).unwrap();
        let template = set.get("Leaf").unwrap();
        assert_eq!(template.name(), "Leaf");
        assert_eq!(template.field_count(), 1);
        assert!(set.get("Other").is_err());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let def = TypeDef::new("T")
            .field("x", IntegerBind::new(8))
            .field("x", IntegerBind::new(8));
        assert!(matches!(
            compile(&[def]),
            Err(Error::Annotation { .. })
        ));
    }

    #[test]
    fn test_integer_width_limits() {
        for width in [0usize, 129] {
            let def = TypeDef::new("T").field("x", IntegerBind::new(width));
            assert!(compile(&[def]).is_err(), "width {width}");
        }
        let ok = TypeDef::new("T").field("x", IntegerBind::new(128));
        assert!(compile(&[ok]).is_ok());
    }

    #[test]
    fn test_array_count_must_be_positive() {
        let def = TypeDef::new("T").array("xs", IntegerBind::new(8), 0usize);
        assert!(compile(&[def]).is_err());
    }

    #[test]
    fn test_unknown_object_type_rejected() {
        let def = TypeDef::new("T").field("inner", ObjectBind::new("Missing"));
        assert!(compile(&[def]).is_err());
    }

    #[test]
    fn test_checksum_constraints() {
        let bad_width = TypeDef::new("T").field("crc", ChecksumBind::new(12, Crc16Ccitt));
        assert!(compile(&[bad_width]).is_err());

        let doubled = TypeDef::new("T")
            .field("a", ChecksumBind::new(16, Crc16Ccitt))
            .field("b", ChecksumBind::new(16, Crc16Ccitt));
        assert!(compile(&[doubled]).is_err());

        let ok = TypeDef::new("T")
            .field("x", IntegerBind::new(8))
            .field("crc", ChecksumBind::new(16, Crc16Ccitt));
        let set = compile(&[ok]).unwrap();
        assert_eq!(set.get("T").unwrap().checksum, Some(1));
    }

    #[test]
    fn test_trailing_skip_rejected() {
        let def = TypeDef::new("T")
            .field("x", IntegerBind::new(8))
            .skip_bits(4usize);
        assert!(compile(&[def]).is_err());
    }

    #[test]
    fn test_recursion_through_plain_object_rejected() {
        let a = TypeDef::new("A").field("b", ObjectBind::new("B"));
        let b = TypeDef::new("B").field("a", ObjectBind::new("A"));
        assert!(compile(&[a, b]).is_err());
    }

    #[test]
    fn test_recursion_through_counted_array_allowed() {
        let node = TypeDef::new("Node")
            .field("count", IntegerBind::new(8))
            .array("children", ObjectBind::new("Node"), "count");
        assert!(compile(&[node]).is_ok());
    }

    #[test]
    fn test_protocol_gate() {
        let inverted = TypeDef::new("T")
            .header(Header::starting_with("$").protocols("2.0", "1.0"))
            .field("x", IntegerBind::new(8));
        assert!(compile(&[inverted]).is_err());

        let ok = TypeDef::new("T")
            .header(Header::starting_with("$").protocols("1.0", "1.2"))
            .field("x", IntegerBind::new(8));
        assert!(compile(&[ok]).is_ok());
    }

    #[test]
    fn test_post_processing_must_target_known_field() {
        let def = TypeDef::new("T")
            .field("x", IntegerBind::new(8))
            .post_processed("ghost", "", "x + 1", "x - 1");
        assert!(compile(&[def]).is_err());
    }

    #[test]
    fn test_separated_list_requires_objects() {
        let def = TypeDef::new("T").list(
            "items",
            StringFixedBind::new(2),
            b',',
            Charset::Ascii,
        );
        assert!(compile(&[def]).is_err());
    }
}
