use bytes::Bytes;

/// Default size of each buffer chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Append-only byte sink backed by a chain of fixed-size chunks.
///
/// Writes never fail: a full chunk is followed by a freshly allocated one.
/// Nothing is moved until [`OutputBuffer::snapshot`] or
/// [`OutputBuffer::into_bytes`] flattens the chain.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: Vec<Box<[u8]>>,
    chunk_size: usize,
    len: usize,
}

impl OutputBuffer {
    /// Create a buffer with the default chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a buffer with an explicit chunk size.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            chunks: vec![new_chunk(chunk_size)],
            chunk_size,
            len: 0,
        }
    }

    /// Total bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, byte: u8) {
        if self.tail_used() == self.chunk_size {
            self.chunks.push(new_chunk(self.chunk_size));
        }
        let used = self.tail_used();
        let tail = self.chunks.last_mut().expect("buffer has at least one chunk");
        tail[used] = byte;
        self.len += 1;
    }

    /// Append a slice, spilling across chunk boundaries as needed.
    pub fn put_slice(&mut self, mut src: &[u8]) {
        while !src.is_empty() {
            if self.tail_used() == self.chunk_size {
                self.chunks.push(new_chunk(self.chunk_size));
            }
            let used = self.tail_used();
            let room = self.chunk_size - used;
            let take = room.min(src.len());
            let tail = self.chunks.last_mut().expect("buffer has at least one chunk");
            tail[used..used + take].copy_from_slice(&src[..take]);
            self.len += take;
            src = &src[take..];
        }
    }

    /// Append `len` bytes of `src` starting at `start`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds for `src`.
    pub fn put_slice_range(&mut self, src: &[u8], start: usize, len: usize) {
        self.put_slice(&src[start..start + len]);
    }

    /// Contiguous copy of everything written so far.
    pub fn snapshot(&self) -> Bytes {
        Bytes::from(self.flatten())
    }

    /// Consume the buffer, returning everything written.
    ///
    /// With a single chunk this reuses the chunk's allocation; otherwise the
    /// chain is flattened into one region.
    pub fn into_bytes(mut self) -> Bytes {
        if self.chunks.len() == 1 {
            let chunk = self.chunks.remove(0);
            let mut vec = chunk.into_vec();
            vec.truncate(self.len);
            return Bytes::from(vec);
        }
        Bytes::from(self.flatten())
    }

    fn flatten(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.len);
        let mut remaining = self.len;
        for chunk in &self.chunks {
            let take = remaining.min(self.chunk_size);
            flat.extend_from_slice(&chunk[..take]);
            remaining -= take;
        }
        flat
    }

    fn tail_used(&self) -> usize {
        self.len - (self.chunks.len() - 1) * self.chunk_size
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn new_chunk(size: usize) -> Box<[u8]> {
    vec![0u8; size].into_boxed_slice()
}
