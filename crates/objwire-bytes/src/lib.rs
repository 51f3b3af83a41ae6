//! Wire primitives for the objwire codec.
//!
//! This crate owns the byte-level building blocks the codec is written
//! against:
//!
//! - [`OutputBuffer`] — append-only chunked byte sink; writes never fail
//! - [`InputCursor`] — bounded sequential byte source with a position
//! - [`varint`] — base-128 little-endian varints and ZigZag signed mapping
//! - [`Tag`] — the closed enumeration of wire tag bytes
//!
//! No type knowledge lives here; everything above the tag byte belongs to
//! `objwire-codec`.

pub mod buffer;
pub mod cursor;
pub mod error;
pub mod tag;
pub mod varint;

pub use buffer::{OutputBuffer, DEFAULT_CHUNK_SIZE};
pub use cursor::InputCursor;
pub use error::{Result, WireError};
pub use tag::Tag;
