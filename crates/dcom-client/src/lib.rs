//! Client-side DCOM over connection-oriented MSRPC
//!
//! This crate lets a process obtain, call methods on, and manage the
//! lifetime of COM objects hosted by a remote server, entirely over a
//! connection-oriented RPC transport and without a native COM runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Object layer (this crate)               │
//! ├─────────────────────────────────────────────────────────┤
//! │  ObjectProxy          │  Session                        │
//! │  - QueryInterface     │  - call dispatch / correlation  │
//! │  - batched AddRef /   │  - presentation contexts        │
//! │    Release            │  - fragmentation / reassembly   │
//! │  - dispatch probe     │  - reference-count batching     │
//! ├─────────────────────────────────────────────────────────┤
//! │              PDU framing (corpc crate)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │              NDR marshaling (ndr crate)                 │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`Session`] is bound to one server process over any reliable ordered
//! byte stream. Proxies created from it share the channel: calls suspend
//! cooperatively until the correlated response arrives, and remote
//! reference-count traffic is batched so that N local add_refs cost at most
//! ⌈N/batch⌉ round trips.

pub mod call;
pub mod error;
pub mod proxy;
pub mod refs;
pub mod session;
pub mod types;

pub use call::RemoteCall;
pub use error::{hresult, DcomError, Result};
pub use proxy::ObjectProxy;
pub use refs::{DEFAULT_REF_BATCH, OPNUM_ADD_REF, OPNUM_QUERY_INTERFACE, OPNUM_RELEASE};
pub use session::{Session, SessionConfig};
pub use types::{iid, InterfacePointer};
