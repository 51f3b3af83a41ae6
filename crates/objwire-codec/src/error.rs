use std::fmt;

use objwire_bytes::WireError;

/// Where an error was detected: a byte offset on decode, a field path on
/// encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSite {
    /// Byte offset into the input buffer.
    Offset(usize),
    /// Field path from the encode root, e.g. `.friends[2]`.
    Path(String),
}

impl fmt::Display for ErrorSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSite::Offset(offset) => write!(f, "byte {offset}"),
            ErrorSite::Path(path) if path.is_empty() => write!(f, "root"),
            ErrorSite::Path(path) => write!(f, "root{path}"),
        }
    }
}

/// Errors raised by encode, decode, and registration.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No registration for the stable id or type name.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Stable id or name already bound, or id inside the reserved range.
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Wire tag or payload type id incompatible with the declared type.
    #[error("type mismatch at {site}: {detail}")]
    TypeMismatch { site: ErrorSite, detail: String },

    /// Numeric value does not fit the declared narrower type.
    #[error("value out of range at {site}: {detail}")]
    RangeError { site: ErrorSite, detail: String },

    /// Malformed varint.
    #[error("malformed varint at byte {offset}")]
    VarintOverflow { offset: usize },

    /// Input exhausted mid-value.
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEnd { offset: usize },

    /// Composite nesting exceeded the configured limit.
    #[error("nesting depth exceeded limit {limit} at {site}")]
    DepthLimitExceeded { limit: usize, site: ErrorSite },

    /// A reference targets an instance that cannot be observed before it is
    /// fully constructed.
    #[error("unsupported cycle through reference {id} at {site}")]
    UnsupportedCycle { id: u64, site: ErrorSite },

    /// A field accessor reported failure.
    #[error("field access failed at {site}: {message}")]
    AccessorFailure { site: ErrorSite, message: String },
}

impl From<WireError> for CodecError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::UnexpectedEnd { offset, .. } => CodecError::UnexpectedEnd { offset },
            WireError::VarintOverflow { offset } => CodecError::VarintOverflow { offset },
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
