//! Self-describing binary object codec.
//!
//! objwire-codec encodes dynamic application values into a compact tagged
//! byte stream and decodes them back, preserving shared references and
//! cycles, interning repeated strings on the wire, and optionally running
//! precompiled per-type field programs instead of descriptor-driven
//! dispatch.
//!
//! # Overview
//!
//! - [`Codec`] — the facade: `register`, `encode`, `decode`, `precompile`
//! - [`Value`] — the dynamic value model; composites are shared handles
//! - [`TypeDescriptor`] / [`FieldDescriptor`] — registered type metadata
//! - [`DeclaredType`] — what a caller or field position declares
//! - [`TypeRegistry`] — process-wide id/name mapping with per-call snapshots
//!
//! # Example
//!
//! ```
//! use objwire_codec::{
//!     Codec, DeclaredType, FieldDescriptor, PrimitiveType, TypeDescriptor, Value,
//! };
//!
//! let codec = Codec::new();
//! codec.register(TypeDescriptor::object(
//!     16,
//!     "Point",
//!     vec![
//!         FieldDescriptor::slot("x", DeclaredType::Primitive(PrimitiveType::Int), 0),
//!         FieldDescriptor::slot("y", DeclaredType::Primitive(PrimitiveType::Int), 1),
//!     ],
//! ))?;
//!
//! let point = Value::object(16, vec![Value::Int(3), Value::Int(-4)]);
//! let declared = DeclaredType::Registered(16);
//!
//! let wire = codec.encode(&point, &declared)?;
//! let back = codec.decode(&wire, &declared)?;
//! assert!(back.deep_eq(&point));
//! # Ok::<(), objwire_codec::CodecError>(())
//! ```

mod codec;
mod config;
mod context;
mod decode;
mod descriptor;
mod encode;
mod error;
mod program;
mod registry;
mod value;

pub use codec::Codec;
pub use config::CodecConfig;
pub use descriptor::{
    DeclaredType, EnumShape, FieldAccessor, FieldDescriptor, ObjectShape, PrimitiveType,
    TypeDescriptor, TypeShape, FIRST_USER_TYPE_ID,
};
pub use error::{CodecError, ErrorSite, Result};
pub use registry::{RegistrySnapshot, TypeRegistry};
pub use value::{EnumValue, ObjectValue, Value};
