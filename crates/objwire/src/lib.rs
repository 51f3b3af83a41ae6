//! Compact self-describing binary object codec.
//!
//! objwire encodes arbitrary application values into a tagged byte stream
//! and decodes them back, preserving shared references and cycles,
//! interning repeated strings, and optionally running precompiled per-type
//! codecs instead of descriptor-driven dispatch.
//!
//! # Crate Structure
//!
//! - [`wire`] — Byte-level primitives: chunked output buffer, input cursor,
//!   varints, tag bytes
//! - [`codec`] — The codec core: registry, descriptors, dispatcher,
//!   compiled programs

/// Re-export wire primitive types.
pub mod wire {
    pub use objwire_bytes::*;
}

/// Re-export codec types.
pub mod codec {
    pub use objwire_codec::*;
}

pub use objwire_codec::{
    Codec, CodecConfig, CodecError, DeclaredType, EnumValue, FieldAccessor, FieldDescriptor,
    ObjectValue, PrimitiveType, TypeDescriptor, TypeRegistry, Value,
};
