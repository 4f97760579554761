//! NDR error types

use thiserror::Error;

/// Upper bound on a single decoded allocation (string or array element
/// count). Conformance fields are attacker-controlled; a stream must not be
/// able to request an arbitrary reservation.
pub const MAX_DECODE_ALLOCATION: usize = 1 << 20;

/// NDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum NdrError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow: needed {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// Value cannot be encoded under the requested shape
    #[error("marshal error: {0}")]
    Marshal(String),

    /// Wire data does not match the expected shape
    #[error("unmarshal error: {0}")]
    Unmarshal(String),

    /// Union did not hold exactly one active member at encode time
    #[error("union holds {0} active members, exactly one required")]
    DiscriminantSerialization(usize),

    /// Decoded discriminant has no registered member shape
    #[error("no member registered for union discriminant {0}")]
    DiscriminantDeserialization(String),

    /// Reference pointers must not be null
    #[error("null referent on a reference pointer")]
    NullReference,

    /// No wire shape can be inferred for the value
    #[error("cannot infer a wire shape for {0}")]
    TypeInference(&'static str),

    /// Invalid string - bad offset or encoding
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// Conformance mismatch
    #[error("conformance mismatch: max_count={max_count}, actual_count={actual_count}")]
    ConformanceMismatch { max_count: u32, actual_count: u32 },

    /// Decoded conformance requests an unreasonable allocation
    #[error("allocation limit exceeded: requested {requested}, limit {limit}")]
    AllocationLimitExceeded { requested: usize, limit: usize },
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;
