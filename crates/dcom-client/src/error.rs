//! DCOM client error types

use thiserror::Error;
use uuid::Uuid;

/// Result type for DCOM operations
pub type Result<T> = std::result::Result<T, DcomError>;

/// DCOM-specific errors
#[derive(Error, Debug)]
pub enum DcomError {
    /// Operation requires a live session
    #[error("session not attached")]
    SessionNotAttached,

    /// Remote operation attempted on a local-only object
    #[error("remote operation not implemented for a local-only object")]
    RemoteOperationNotImplemented,

    /// QueryInterface miss
    #[error("interface not supported: {0}")]
    InterfaceNotSupported(Uuid),

    /// Non-zero result code from a remote call
    #[error("remote call failed: 0x{0:08x}")]
    RemoteCallFailure(u32),

    /// No correlated response within the deadline. The remote side is not
    /// guaranteed to have aborted; the call's effect is unknown.
    #[error("call timed out")]
    Timeout,

    /// Underlying RPC error
    #[error("RPC error: {0}")]
    Rpc(#[from] corpc::RpcError),

    /// Marshaling error
    #[error("NDR error: {0}")]
    Ndr(#[from] ndr::NdrError),
}

/// HRESULT codes used by the object layer
pub mod hresult {
    /// Operation successful
    pub const S_OK: u32 = 0x0000_0000;
    /// Unspecified error
    pub const E_FAIL: u32 = 0x8000_4005;
    /// No such interface supported
    pub const E_NOINTERFACE: u32 = 0x8000_4002;
    /// Not implemented
    pub const E_NOTIMPL: u32 = 0x8000_4001;
}
