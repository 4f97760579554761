//! Error types for connection-oriented RPC

use thiserror::Error;

/// RPC framing and dispatch errors
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header/body length mismatch or truncated fragment
    #[error("malformed PDU: {0}")]
    MalformedPdu(String),

    #[error("unsupported RPC version: {0}")]
    VersionMismatch(u8),

    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("context negotiation rejected: {0}")]
    BindRejected(String),

    #[error("fault: status 0x{0:08x}")]
    Fault(u32),

    #[error("call ID mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: u32, got: u32 },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("PDU too large: {size} bytes exceeds maximum {max}")]
    PduTooLarge { size: usize, max: usize },
}

// A body that runs out of bytes mid-decode is a framing defect, not a
// marshaling one: the header promised more than the fragment held.
impl From<ndr::NdrError> for RpcError {
    fn from(err: ndr::NdrError) -> Self {
        RpcError::MalformedPdu(err.to_string())
    }
}

/// Result type for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
