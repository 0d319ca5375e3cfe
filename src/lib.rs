//! # bitbind
//!
//! A declarative, schema-driven binary codec. Describe a wire format field
//! by field (widths, byte order, character encoding, termination, array
//! cardinality, variant selection, converters, validators, skip regions,
//! checksums) and the engine walks the compiled description twice: once to
//! decode a bit-packed stream into a message, once to encode a message back.
//!
//! Types are registered explicitly on a [`core::CoreBuilder`], which
//! validates every description at build time and returns an immutable
//! [`core::Core`] that can be shared across threads.
//!
//! ## Example
//!
//! ```
//! use bitbind::binding::IntegerBind;
//! use bitbind::core::CoreBuilder;
//! use bitbind::template::TypeDef;
//! use bitbind::value::Value;
//!
//! let core = CoreBuilder::new()
//!     .register_type(
//!         TypeDef::new("Reading")
//!             .field("id", IntegerBind::new(8))
//!             .field("level", IntegerBind::new(8)),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let message = core.parse("Reading", &[0x01, 0x2A]).unwrap();
//! assert_eq!(message.get("level"), Some(&Value::UInt(42)));
//! assert_eq!(core.compose("Reading", &message).unwrap(), vec![0x01, 0x2A]);
//! ```

pub mod binding;
pub mod bits;
pub mod buffer;
pub mod charset;
pub mod checksum;
pub mod codec;
pub mod convert;
pub mod core;
mod describe;
pub mod errors;
pub mod eval;
mod parser;
#[cfg(feature = "serde")]
pub mod serde;
pub mod template;
pub mod value;
