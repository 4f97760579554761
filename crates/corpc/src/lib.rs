//! Connection-oriented MSRPC framing
//!
//! This crate implements the wire layer a DCOM client speaks: the common
//! 16-byte PDU header, the negotiation bodies (bind, bind-ack, bind-nak,
//! alter-context, alter-context-response), request/response/fault bodies,
//! the shutdown notification, presentation contexts, and a framed transport
//! adapter over any async byte stream.
//!
//! Bodies read and write themselves through the [`ndr::NdrStream`]
//! primitives, so alignment and byte-order handling live in one place. All
//! multi-byte fields honor the data-representation label recorded in the
//! header.

pub mod context;
pub mod error;
pub mod pdu;
pub mod transport;

pub use context::{
    ContextResult, NegotiationResult, PresentationContext, SyntaxId, NDR_TRANSFER_SYNTAX,
    NDR_TRANSFER_SYNTAX_VERSION,
};
pub use error::{Result, RpcError};
pub use pdu::{
    AlterContextBody, AlterContextResponseBody, BindAckBody, BindBody, BindNakBody,
    DataRepresentation, FaultBody, PacketFlags, PacketType, Pdu, PduBody, PduHeader, RequestBody,
    ResponseBody, DEFAULT_FRAGMENT_SIZE, RPC_VERSION, RPC_VERSION_MINOR,
};
pub use transport::{RpcTransport, DEFAULT_MAX_PDU_SIZE};
