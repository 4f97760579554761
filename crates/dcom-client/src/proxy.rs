//! Remote object proxy
//!
//! The client-side handle to one remote interface instance. A proxy holds a
//! non-owning reference to its session: sessions outlive proxies logically,
//! but a proxy must tolerate session teardown by failing fast, never by
//! dereferencing dead state.
//!
//! Every remote operation runs the attachment guard first: a local-only
//! proxy rejects with `RemoteOperationNotImplemented`, a dead or detached
//! session with `SessionNotAttached`, and in both cases zero bytes reach the
//! transport.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use ndr::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::call::RemoteCall;
use crate::error::{DcomError, Result};
use crate::refs::OPNUM_QUERY_INTERFACE;
use crate::session::Session;
use crate::types::{iid, InterfacePointer, NIL_UUID};

/// Cached outcome of the dual-interface probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DualState {
    Unknown,
    Supported,
    Unsupported,
}

/// Client-side handle to a remote COM object interface.
pub struct ObjectProxy {
    session: Weak<Session>,
    pointer: InterfacePointer,
    local_only: bool,
    call_timeout: StdMutex<Option<Duration>>,
    connection_points: StdMutex<HashMap<String, (InterfacePointer, u32)>>,
    dual: StdMutex<DualState>,
}

impl ObjectProxy {
    pub(crate) fn attached(session: Weak<Session>, pointer: InterfacePointer) -> Self {
        Self {
            session,
            pointer,
            local_only: false,
            call_timeout: StdMutex::new(None),
            connection_points: StdMutex::new(HashMap::new()),
            dual: StdMutex::new(DualState::Unknown),
        }
    }

    pub(crate) fn local(session: Weak<Session>, pointer: InterfacePointer) -> Self {
        Self {
            local_only: true,
            ..Self::attached(session, pointer)
        }
    }

    /// The interface pointer this proxy wraps.
    pub fn pointer(&self) -> &InterfacePointer {
        &self.pointer
    }

    /// Object identity.
    pub fn ipid(&self) -> Uuid {
        self.pointer.ipid()
    }

    /// Interface identity.
    pub fn iid(&self) -> Uuid {
        self.pointer.iid()
    }

    pub fn is_local_only(&self) -> bool {
        self.local_only
    }

    /// Instance-level call timeout; `None` falls back to the session default.
    pub fn call_timeout(&self) -> Option<Duration> {
        *self.call_timeout.lock().unwrap()
    }

    pub fn set_call_timeout(&self, timeout: Option<Duration>) {
        *self.call_timeout.lock().unwrap() = timeout;
    }

    /// Mandatory first check of every remote operation.
    fn guard(&self) -> Result<Arc<Session>> {
        if self.local_only {
            return Err(DcomError::RemoteOperationNotImplemented);
        }
        let session = self
            .session
            .upgrade()
            .ok_or(DcomError::SessionNotAttached)?;
        if !session.is_attached() {
            return Err(DcomError::SessionNotAttached);
        }
        Ok(session)
    }

    /// Query the remote object for another interface.
    ///
    /// Returns a new proxy bound to the returned interface pointer, or
    /// [`DcomError::InterfaceNotSupported`] when the remote side reports no
    /// such interface.
    pub async fn query_interface(&self, requested: Uuid) -> Result<ObjectProxy> {
        let session = self.guard()?;
        let call = RemoteCall::new(OPNUM_QUERY_INTERFACE)
            .in_param(Value::Uuid(requested))
            .out_shape(Value::I32(0))
            .out_shape(Value::Uuid(NIL_UUID));
        let results = session
            .dispatch(&call, &self.pointer, self.call_timeout())
            .await?;

        let hresult = match results.first() {
            Some(Value::I32(code)) => *code as u32,
            _ => {
                return Err(DcomError::Ndr(ndr::NdrError::Unmarshal(
                    "QueryInterface response missing result code".to_string(),
                )))
            }
        };
        if hresult != 0 {
            trace!(%requested, hresult, "interface not supported");
            return Err(DcomError::InterfaceNotSupported(requested));
        }
        match results.get(1) {
            Some(Value::Uuid(ipid)) => Ok(ObjectProxy::attached(
                self.session.clone(),
                InterfacePointer::new(*ipid, requested),
            )),
            _ => Err(DcomError::Ndr(ndr::NdrError::Unmarshal(
                "QueryInterface response missing interface pointer".to_string(),
            ))),
        }
    }

    /// Take one remote reference on this object. Increments are batched;
    /// most calls consume a credit the session already holds.
    pub async fn add_ref(&self) -> Result<()> {
        let session = self.guard()?;
        session.add_ref(&self.pointer).await
    }

    /// Give back one remote reference. Best-effort: delivery failures never
    /// block local cleanup, so only guard failures surface here. Safe to
    /// call even when the remote object is already gone.
    pub async fn release(&self) -> Result<()> {
        let session = self.guard()?;
        session.release(&self.pointer).await;
        Ok(())
    }

    /// Probe once for the standard dispatch interface and cache the answer.
    /// A failed probe means "no", never an error; the temporary proxy is
    /// released immediately regardless of outcome.
    pub async fn is_dispatch_supported(&self) -> Result<bool> {
        self.guard()?;
        match *self.dual.lock().unwrap() {
            DualState::Supported => return Ok(true),
            DualState::Unsupported => return Ok(false),
            DualState::Unknown => {}
        }

        let supported = match self.query_interface(iid::IDISPATCH).await {
            Ok(probe) => {
                let _ = probe.release().await;
                true
            }
            Err(err) => {
                debug!(error = %err, "dispatch probe failed");
                false
            }
        };
        *self.dual.lock().unwrap() = if supported {
            DualState::Supported
        } else {
            DualState::Unsupported
        };
        Ok(supported)
    }

    /// Invoke a method with the instance-level timeout.
    pub async fn call(&self, call: &RemoteCall) -> Result<Vec<Value>> {
        let session = self.guard()?;
        session
            .dispatch(call, &self.pointer, self.call_timeout())
            .await
    }

    /// Invoke a method with an explicit per-call timeout.
    pub async fn call_with_timeout(
        &self,
        call: &RemoteCall,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let session = self.guard()?;
        session.dispatch(call, &self.pointer, Some(timeout)).await
    }

    /// Store a connection-point registration and return its opaque handle.
    pub fn register_connection_point(
        &self,
        connection_point: InterfacePointer,
        cookie: u32,
    ) -> Result<String> {
        self.guard()?;
        let handle = Uuid::new_v4().to_string();
        self.connection_points
            .lock()
            .unwrap()
            .insert(handle.clone(), (connection_point, cookie));
        Ok(handle)
    }

    /// Look up a stored connection-point registration.
    pub fn connection_point(&self, handle: &str) -> Result<Option<(InterfacePointer, u32)>> {
        self.guard()?;
        Ok(self.connection_points.lock().unwrap().get(handle).copied())
    }

    /// Remove a stored connection-point registration.
    pub fn unregister_connection_point(
        &self,
        handle: &str,
    ) -> Result<Option<(InterfacePointer, u32)>> {
        self.guard()?;
        Ok(self.connection_points.lock().unwrap().remove(handle))
    }
}

/// Two proxies are the same object when their object identifiers match;
/// interface identity and session do not participate, since one object may
/// be reached through several interface pointers.
impl PartialEq for ObjectProxy {
    fn eq(&self, other: &Self) -> bool {
        self.pointer.ipid() == other.pointer.ipid()
    }
}

impl Eq for ObjectProxy {}

impl Hash for ObjectProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pointer.ipid().hash(state);
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("pointer", &self.pointer)
            .field("local_only", &self.local_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_proxy(pointer: InterfacePointer) -> ObjectProxy {
        ObjectProxy::attached(Weak::new(), pointer)
    }

    #[test]
    fn test_equality_is_object_identity_only() {
        let ipid = Uuid::new_v4();
        let a = detached_proxy(InterfacePointer::new(ipid, iid::IUNKNOWN));
        let b = detached_proxy(InterfacePointer::new(ipid, iid::IDISPATCH));
        let c = detached_proxy(InterfacePointer::new(Uuid::new_v4(), iid::IUNKNOWN));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_dead_session_fails_fast() {
        let proxy = detached_proxy(InterfacePointer::new(Uuid::new_v4(), iid::IUNKNOWN));
        assert!(matches!(
            proxy.add_ref().await,
            Err(DcomError::SessionNotAttached)
        ));
        assert!(matches!(
            proxy.query_interface(iid::IDISPATCH).await,
            Err(DcomError::SessionNotAttached)
        ));
    }

    #[tokio::test]
    async fn test_local_only_rejected_before_session_check() {
        // Even with no session at all, the local-only rejection wins.
        let proxy = ObjectProxy::local(
            Weak::new(),
            InterfacePointer::new(Uuid::new_v4(), iid::IUNKNOWN),
        );
        assert!(matches!(
            proxy.add_ref().await,
            Err(DcomError::RemoteOperationNotImplemented)
        ));
        assert!(matches!(
            proxy.release().await,
            Err(DcomError::RemoteOperationNotImplemented)
        ));
        assert!(matches!(
            proxy.call(&RemoteCall::new(3)).await,
            Err(DcomError::RemoteOperationNotImplemented)
        ));
    }
}
