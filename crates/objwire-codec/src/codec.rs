use bytes::Bytes;

use crate::config::CodecConfig;
use crate::decode::Decoder;
use crate::descriptor::{DeclaredType, TypeDescriptor, TypeShape};
use crate::encode::Encoder;
use crate::error::Result;
use crate::program::ProgramCache;
use crate::registry::TypeRegistry;
use crate::value::Value;

/// The codec facade: type registry, limits, and the compiled-program cache.
///
/// A `Codec` is cheap to share behind an `Arc`; concurrent top-level calls
/// on different values are supported. Each call takes one registry snapshot
/// and holds it for its whole duration, so late registration never shifts
/// the ground under an in-flight encode or decode.
pub struct Codec {
    registry: TypeRegistry,
    programs: ProgramCache,
    config: CodecConfig,
}

impl Codec {
    /// A codec with default limits and an empty registry.
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    /// A codec with explicit limits.
    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            registry: TypeRegistry::new(),
            programs: ProgramCache::new(),
            config,
        }
    }

    /// The type registry backing this codec.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Limits applied to every call.
    pub fn config(&self) -> CodecConfig {
        self.config
    }

    /// Register a type descriptor. See [`TypeRegistry::register`].
    pub fn register(&self, descriptor: TypeDescriptor) -> Result<()> {
        self.registry.register(descriptor)
    }

    /// Eagerly build the compiled codec for a registered object type and
    /// every object type reachable from its fields.
    ///
    /// Purely a performance lever: encode and decode behave identically
    /// with or without it. Enum and polymorphic-root types have nothing to
    /// compile and are accepted as no-ops.
    pub fn precompile(&self, type_id: u32) -> Result<()> {
        let snapshot = self.registry.snapshot();
        match &snapshot.by_id(type_id)?.shape {
            TypeShape::Object(_) => {
                self.programs.ensure(type_id, &snapshot)?;
                Ok(())
            }
            TypeShape::Enum(_) | TypeShape::PolymorphicRoot => Ok(()),
        }
    }

    /// Encode one value under a declared type into a self-describing byte
    /// stream.
    ///
    /// Failures discard the buffer; no partial output is ever returned.
    pub fn encode(&self, value: &Value, declared: &DeclaredType) -> Result<Bytes> {
        let snapshot = self.registry.snapshot();
        let mut encoder = Encoder::new(&snapshot, &self.programs, self.config);
        encoder.encode_value(value, declared)?;
        Ok(encoder.into_bytes())
    }

    /// Decode one value from a byte stream under a declared type.
    ///
    /// The top-level value is decoded to completion; trailing bytes are
    /// ignored. Failures return no partial value.
    pub fn decode(&self, input: &[u8], declared: &DeclaredType) -> Result<Value> {
        let snapshot = self.registry.snapshot();
        let mut decoder = Decoder::new(input, &snapshot, &self.programs, self.config);
        decoder.decode_value(declared)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}
