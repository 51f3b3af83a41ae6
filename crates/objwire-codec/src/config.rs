use objwire_bytes::DEFAULT_CHUNK_SIZE;

/// Limits applied to every encode and decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Maximum composite nesting depth accepted on either side.
    pub max_depth: usize,
    /// Chunk size of the encode output buffer.
    pub chunk_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
