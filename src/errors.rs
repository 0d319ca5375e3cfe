//! Error taxonomy shared by the compiler, the codecs, and the public API.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Schema compilation failed: invalid size, unknown type, bad width,
    /// recursive layout, and so on. Carries the offending type and field.
    #[error("invalid schema for `{type_name}.{field}`: {reason}")]
    Annotation {
        type_name: String,
        field: String,
        reason: String,
    },

    /// The reader ran past the end of the input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Variant selection exhausted every choice and no default was declared.
    #[error("no alternative matched for `{0}`")]
    NoAlternative(String),

    /// A declared array count does not match the value being encoded.
    #[error("declared size {declared} does not match actual length {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    /// A validator rejected a field value.
    #[error("validation rejected value {0}")]
    ValidationFailed(String),

    /// A converter could not map a value to or from its wire shape, or a
    /// value had the wrong shape for its binding.
    #[error("conversion failed: {0}")]
    Converter(String),

    /// The recomputed checksum differs from the stored one.
    #[error("checksum mismatch: computed {computed:#x}, stored {stored:#x}")]
    ChecksumMismatch { computed: u64, stored: u64 },

    /// The declared start marker was not found at the head of the input.
    #[error("header start marker did not match")]
    NoHeader,

    /// The declared end marker was not found after the last field.
    #[error("trailing end marker did not match")]
    NoTrailer,

    /// An expression failed to parse or evaluate.
    #[error("expression `{expr}` failed: {reason}")]
    Expression { expr: String, reason: String },

    /// The message carries no value for a bound field at encode time.
    #[error("field has no value")]
    MissingValue,

    /// No template was registered under this name.
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// Guard failure that indicates a bug in the engine or a codec.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// Context wrapper: the field the parser was working on when the
    /// underlying error surfaced.
    #[error("in `{type_name}.{field}`: {source}")]
    Field {
        type_name: String,
        field: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn annotation(
        type_name: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Annotation {
            type_name: type_name.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn expression(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Expression {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn in_field(self, type_name: &str, field: &str) -> Self {
        Error::Field {
            type_name: type_name.to_string(),
            field: field.to_string(),
            source: Box::new(self),
        }
    }

    /// Unwraps the `Field` context layers down to the root cause.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
