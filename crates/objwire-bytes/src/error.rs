/// Errors from the wire primitive layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The input ran out of bytes mid-value.
    #[error("unexpected end of input at byte {offset} ({needed} more bytes needed)")]
    UnexpectedEnd { offset: usize, needed: usize },

    /// A varint ran past its maximum length or carried garbage in its final byte.
    #[error("malformed varint at byte {offset}")]
    VarintOverflow { offset: usize },
}

pub type Result<T> = std::result::Result<T, WireError>;
