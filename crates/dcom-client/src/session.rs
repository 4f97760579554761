//! Session: the authenticated logical channel to one server process
//!
//! A session owns the framed transport, correlates request/response pairs by
//! call id, manages the negotiated presentation contexts, and batches remote
//! reference counting. Calls suspend cooperatively: dispatch registers a
//! oneshot channel keyed by call id, a spawned reader task routes the
//! correlated reply (reassembling fragmented responses), and the caller
//! awaits under its timeout.
//!
//! Framing onto the transport is serialized: one logical message's fragments
//! are written to completion under the write lock before the next message
//! starts, while any number of calls stay outstanding on distinct call ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use corpc::{
    AlterContextBody, BindBody, PacketFlags, Pdu, PduBody, PduHeader, PresentationContext,
    RequestBody, RpcError, RpcTransport, SyntaxId,
};
use ndr::{NdrStream, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::call::RemoteCall;
use crate::error::{DcomError, Result};
use crate::proxy::ObjectProxy;
use crate::refs::{
    check_ref_change_results, ref_change_call, DEFAULT_REF_BATCH, OPNUM_ADD_REF, OPNUM_RELEASE,
};
use crate::types::InterfacePointer;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type CallReply = std::result::Result<Pdu, RpcError>;

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Applied when neither the call nor the proxy specifies a timeout
    pub default_call_timeout: Duration,
    /// Largest fragment accepted from the peer
    pub max_pdu_size: usize,
    /// Remote references requested per RemAddRef round trip
    pub ref_batch_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_call_timeout: Duration::from_secs(30),
            max_pdu_size: corpc::DEFAULT_MAX_PDU_SIZE,
            ref_batch_size: DEFAULT_REF_BATCH,
        }
    }
}

/// Negotiated association parameters from the bind handshake.
#[derive(Debug, Clone, Copy)]
struct Negotiated {
    max_xmit_frag: u16,
    max_recv_frag: u16,
    assoc_group_id: u32,
}

/// Per-object remote reference account.
///
/// `credits` are remote references already granted but not yet consumed by
/// local add_refs; `pending_release` is the accumulated negative delta not
/// yet flushed. Both are mutated under one lock so concurrent proxies for
/// the same object cannot lose increments.
#[derive(Debug)]
struct RefAccount {
    pointer: InterfacePointer,
    credits: u32,
    pending_release: u32,
}

impl RefAccount {
    fn new(pointer: InterfacePointer) -> Self {
        Self {
            pointer,
            credits: 0,
            pending_release: 0,
        }
    }
}

struct Shared {
    config: SessionConfig,
    write: Mutex<RpcTransport<BoxedWrite>>,
    pending: StdMutex<HashMap<u32, oneshot::Sender<CallReply>>>,
    next_call_id: AtomicU32,
    next_context_id: AtomicU32,
    contexts: Mutex<HashMap<Uuid, u16>>,
    negotiated: StdMutex<Negotiated>,
    ref_accounts: Mutex<HashMap<Uuid, RefAccount>>,
    open: AtomicBool,
}

impl Shared {
    fn deliver(&self, call_id: u32, reply: CallReply) {
        let sender = self.pending.lock().unwrap().remove(&call_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => trace!(call_id, "uncorrelated reply dropped"),
        }
    }

    fn fail_all(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
    }
}

/// Logical channel to one remote server process.
pub struct Session {
    shared: Arc<Shared>,
    reader: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Bind to the peer over `stream` for the given interface, then start
    /// the reader task. The stream is assumed reliable and ordered.
    pub async fn connect<T>(stream: T, iid: Uuid, config: SessionConfig) -> Result<Arc<Self>>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut read_transport = RpcTransport::new(Box::new(read_half) as BoxedRead)
            .with_max_pdu_size(config.max_pdu_size);
        let mut write_transport = RpcTransport::new(Box::new(write_half) as BoxedWrite);

        let call_id = 1;
        let bind = BindBody::new(vec![PresentationContext::new(0, SyntaxId::new(iid, 0, 0))]);
        debug!(%iid, "binding session");
        write_transport
            .write_frame(&Pdu::new(PduBody::Bind(bind), call_id).frame())
            .await
            .map_err(DcomError::Rpc)?;

        let frame = read_transport.read_frame().await.map_err(DcomError::Rpc)?;
        let reply = Pdu::parse(&frame).map_err(DcomError::Rpc)?;
        if reply.header.call_id != call_id {
            return Err(DcomError::Rpc(RpcError::CallIdMismatch {
                expected: call_id,
                got: reply.header.call_id,
            }));
        }

        let negotiated = match reply.body {
            PduBody::BindAck(ack) => {
                match ack.results.first() {
                    Some(result) if result.is_accepted() => {}
                    _ => {
                        return Err(DcomError::Rpc(RpcError::BindRejected(
                            "no accepted presentation context".to_string(),
                        )))
                    }
                }
                Negotiated {
                    max_xmit_frag: ack.max_xmit_frag,
                    max_recv_frag: ack.max_recv_frag,
                    assoc_group_id: ack.assoc_group_id,
                }
            }
            PduBody::BindNak(nak) => {
                return Err(DcomError::Rpc(RpcError::BindRejected(format!(
                    "bind rejected, reason {}",
                    nak.reject_reason
                ))))
            }
            PduBody::Fault(fault) => return Err(DcomError::Rpc(RpcError::Fault(fault.status))),
            _ => {
                return Err(DcomError::Rpc(RpcError::MalformedPdu(
                    "unexpected bind reply".to_string(),
                )))
            }
        };
        debug!(
            max_xmit = negotiated.max_xmit_frag,
            max_recv = negotiated.max_recv_frag,
            assoc_group = negotiated.assoc_group_id,
            "bind complete"
        );

        let mut contexts = HashMap::new();
        contexts.insert(iid, 0u16);

        let shared = Arc::new(Shared {
            config,
            write: Mutex::new(write_transport),
            pending: StdMutex::new(HashMap::new()),
            next_call_id: AtomicU32::new(2),
            next_context_id: AtomicU32::new(1),
            contexts: Mutex::new(contexts),
            negotiated: StdMutex::new(negotiated),
            ref_accounts: Mutex::new(HashMap::new()),
            open: AtomicBool::new(true),
        });
        let reader = tokio::spawn(run_reader(read_transport, Arc::clone(&shared)));
        Ok(Arc::new(Self {
            shared,
            reader: StdMutex::new(Some(reader)),
        }))
    }

    /// Whether the channel is still usable. Proxies fail fast once this
    /// turns false.
    pub fn is_attached(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Negotiated transmit fragment limit.
    pub fn max_xmit_frag(&self) -> u16 {
        self.shared.negotiated.lock().unwrap().max_xmit_frag
    }

    /// Negotiated receive fragment limit.
    pub fn max_recv_frag(&self) -> u16 {
        self.shared.negotiated.lock().unwrap().max_recv_frag
    }

    /// Association group assigned by the server.
    pub fn assoc_group_id(&self) -> u32 {
        self.shared.negotiated.lock().unwrap().assoc_group_id
    }

    /// Create a proxy for a remote interface pointer bound to this session.
    pub fn object(self: &Arc<Self>, pointer: InterfacePointer) -> ObjectProxy {
        ObjectProxy::attached(Arc::downgrade(self), pointer)
    }

    /// Create a local-only proxy: all remote operations fail without I/O.
    pub fn local_object(self: &Arc<Self>, pointer: InterfacePointer) -> ObjectProxy {
        ObjectProxy::local(Arc::downgrade(self), pointer)
    }

    /// Dispatch a call to `target`, suspending until the correlated response
    /// arrives or the timeout fires.
    pub async fn dispatch(
        &self,
        call: &RemoteCall,
        target: &InterfacePointer,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>> {
        if !self.is_attached() {
            return Err(DcomError::SessionNotAttached);
        }
        let context_id = self.ensure_context(target.iid()).await?;

        let mut stub_stream = NdrStream::new();
        ndr::marshal(&mut stub_stream, call.in_params())?;
        let stub = stub_stream.into_bytes();

        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::SeqCst);
        let frames =
            self.build_request_frames(call_id, context_id, call.opnum(), target.ipid(), stub);
        debug!(
            call_id,
            opnum = call.opnum(),
            frames = frames.len(),
            object = %target.ipid(),
            "dispatching call"
        );

        let reply = self.transact(call_id, frames, timeout).await?;
        match reply.body {
            PduBody::Response(response) => {
                let mut out = NdrStream::from_slice_with_byte_order(
                    &response.stub,
                    reply.header.data_rep.is_little_endian(),
                );
                Ok(ndr::unmarshal(&mut out, call.out_shapes())?)
            }
            PduBody::Fault(fault) => Err(DcomError::Rpc(RpcError::Fault(fault.status))),
            _ => Err(DcomError::Rpc(RpcError::MalformedPdu(
                "unexpected reply to a request".to_string(),
            ))),
        }
    }

    /// Consume one remote reference credit for `target`, refilling with a
    /// batched RemAddRef when the account is exhausted.
    pub(crate) async fn add_ref(&self, target: &InterfacePointer) -> Result<()> {
        if !self.is_attached() {
            return Err(DcomError::SessionNotAttached);
        }
        let mut accounts = self.shared.ref_accounts.lock().await;
        let batch = self.shared.config.ref_batch_size;
        let account = accounts
            .entry(target.ipid())
            .or_insert_with(|| RefAccount::new(*target));
        if account.credits == 0 {
            self.send_ref_change(OPNUM_ADD_REF, target, batch).await?;
            account.credits += batch;
            debug!(object = %target.ipid(), batch, "acquired remote reference batch");
        }
        account.credits -= 1;
        Ok(())
    }

    /// Record one released reference for `target`, flushing a batched
    /// RemRelease once the batch size is reached. Delivery failures are
    /// logged and swallowed; the object may already be gone.
    pub(crate) async fn release(&self, target: &InterfacePointer) {
        let mut accounts = self.shared.ref_accounts.lock().await;
        let batch = self.shared.config.ref_batch_size;
        let account = accounts
            .entry(target.ipid())
            .or_insert_with(|| RefAccount::new(*target));
        account.pending_release += 1;
        if account.pending_release >= batch {
            let count = account.pending_release;
            account.pending_release = 0;
            if let Err(err) = self.send_ref_change(OPNUM_RELEASE, target, count).await {
                warn!(object = %target.ipid(), error = %err, "best-effort release failed");
            }
        }
    }

    async fn send_ref_change(
        &self,
        opnum: u16,
        target: &InterfacePointer,
        count: u32,
    ) -> Result<()> {
        let call = ref_change_call(opnum, target.ipid(), count)?;
        let results = self.dispatch(&call, target, None).await?;
        check_ref_change_results(&results)
    }

    /// Flush outstanding release deltas, notify the peer, and detach. All
    /// proxies bound to this session subsequently fail fast.
    pub async fn shutdown(&self) {
        if !self.is_attached() {
            return;
        }

        let drained: Vec<(InterfacePointer, u32)> = {
            let mut accounts = self.shared.ref_accounts.lock().await;
            accounts
                .values_mut()
                .filter(|account| account.pending_release > 0)
                .map(|account| {
                    let count = account.pending_release;
                    account.pending_release = 0;
                    (account.pointer, count)
                })
                .collect()
        };
        for (pointer, count) in drained {
            if let Err(err) = self.send_ref_change(OPNUM_RELEASE, &pointer, count).await {
                warn!(object = %pointer.ipid(), error = %err, "release flush failed");
            }
        }

        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::SeqCst);
        let notice = Pdu::new(PduBody::Shutdown, call_id).frame();
        let sent = {
            let mut write = self.shared.write.lock().await;
            write.write_frame(&notice).await
        };
        if let Err(err) = sent {
            debug!(error = %err, "shutdown notification failed");
        }

        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.fail_all();
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
        debug!("session detached");
    }

    /// Look up or negotiate the presentation context for an interface.
    async fn ensure_context(&self, iid: Uuid) -> Result<u16> {
        let mut contexts = self.shared.contexts.lock().await;
        if let Some(context_id) = contexts.get(&iid) {
            return Ok(*context_id);
        }

        let context_id = self.shared.next_context_id.fetch_add(1, Ordering::SeqCst) as u16;
        debug!(%iid, context_id, "negotiating presentation context");
        let body =
            AlterContextBody::new(vec![PresentationContext::new(context_id, SyntaxId::new(iid, 0, 0))]);
        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::SeqCst);
        let capacity = usize::from(self.max_recv_frag());
        let frame = Pdu::new(PduBody::AlterContext(body), call_id).frame_with_capacity(capacity);

        let reply = self.transact(call_id, vec![frame], None).await?;
        match reply.body {
            PduBody::AlterContextResponse(response) => match response.results.first() {
                Some(result) if result.is_accepted() => {
                    contexts.insert(iid, context_id);
                    Ok(context_id)
                }
                _ => Err(DcomError::Rpc(RpcError::BindRejected(format!(
                    "presentation context for {iid} rejected"
                )))),
            },
            PduBody::Fault(fault) => Err(DcomError::Rpc(RpcError::Fault(fault.status))),
            _ => Err(DcomError::Rpc(RpcError::MalformedPdu(
                "unexpected alter-context reply".to_string(),
            ))),
        }
    }

    /// Register the pending slot, write all fragments under the write lock,
    /// then await the correlated reply.
    async fn transact(
        &self,
        call_id: u32,
        frames: Vec<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Pdu> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(call_id, tx);

        let written = {
            let mut write = self.shared.write.lock().await;
            let mut result = Ok(());
            for frame in &frames {
                if let Err(err) = write.write_frame(frame).await {
                    result = Err(err);
                    break;
                }
            }
            result
        };
        if let Err(err) = written {
            self.shared.pending.lock().unwrap().remove(&call_id);
            return Err(err.into());
        }

        let deadline = timeout.unwrap_or(self.shared.config.default_call_timeout);
        match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&call_id);
                trace!(call_id, "call timed out");
                Err(DcomError::Timeout)
            }
            Ok(Err(_)) => Err(DcomError::Rpc(RpcError::ConnectionClosed)),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Ok(Ok(pdu))) => Ok(pdu),
        }
    }

    /// Frame a request, splitting the stub across fragments when it exceeds
    /// the negotiated transmit size.
    fn build_request_frames(
        &self,
        call_id: u32,
        context_id: u16,
        opnum: u16,
        object: Uuid,
        stub: Bytes,
    ) -> Vec<Bytes> {
        let max_stub = max_stub_size(self.max_xmit_frag());
        let total = stub.len();

        if total <= max_stub {
            let mut body = RequestBody::new(opnum, stub);
            body.context_id = context_id;
            body.object = Some(object);
            return vec![Pdu::new(PduBody::Request(body), call_id).frame()];
        }

        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < total {
            let chunk = stub.slice(offset..(offset + max_stub).min(total));
            let is_first = offset == 0;
            let is_last = offset + chunk.len() >= total;

            let body = RequestBody {
                alloc_hint: total as u32,
                context_id,
                opnum,
                object: Some(object),
                stub: chunk.clone(),
            };
            let mut pdu = Pdu::new(PduBody::Request(body), call_id);
            let mut flags = PacketFlags::new();
            if is_first {
                flags.set_first_frag();
            }
            if is_last {
                flags.set_last_frag();
            }
            flags.set_object_uuid();
            pdu.header.packet_flags = flags;

            trace!(call_id, offset, len = chunk.len(), is_last, "request fragment");
            frames.push(pdu.frame());
            offset += chunk.len();
        }
        frames
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Stub bytes that fit one request fragment alongside the header, the
/// request body header, and the object UUID.
fn max_stub_size(max_frag: u16) -> usize {
    let overhead = PduHeader::SIZE + 8 + 16;
    usize::from(max_frag).saturating_sub(overhead).max(1)
}

/// Reader task: parses inbound fragments, reassembles fragmented responses
/// per call id, and routes completed replies to their pending slots.
async fn run_reader(mut transport: RpcTransport<BoxedRead>, shared: Arc<Shared>) {
    let mut partial: HashMap<u32, BytesMut> = HashMap::new();
    loop {
        let frame = match transport.read_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "transport closed");
                break;
            }
        };
        let pdu = match Pdu::parse(&frame) {
            Ok(pdu) => pdu,
            Err(err) => {
                warn!(error = %err, "dropping session on malformed PDU");
                break;
            }
        };

        let call_id = pdu.header.call_id;
        let header = pdu.header.clone();
        match pdu.body {
            PduBody::Shutdown => {
                debug!("peer requested shutdown");
                break;
            }
            PduBody::Response(response) => {
                let is_first = header.packet_flags.is_first_frag();
                let is_last = header.packet_flags.is_last_frag();
                if is_first && is_last {
                    shared.deliver(
                        call_id,
                        Ok(Pdu {
                            header,
                            body: PduBody::Response(response),
                        }),
                    );
                    continue;
                }

                let buffer = partial.entry(call_id).or_default();
                buffer.extend_from_slice(&response.stub);
                trace!(call_id, assembled = buffer.len(), is_last, "response fragment");
                if is_last {
                    let stub = partial
                        .remove(&call_id)
                        .map(BytesMut::freeze)
                        .unwrap_or_default();
                    let mut complete = response;
                    complete.stub = stub;
                    let mut complete_header = header;
                    complete_header.packet_flags = PacketFlags::complete();
                    shared.deliver(
                        call_id,
                        Ok(Pdu {
                            header: complete_header,
                            body: PduBody::Response(complete),
                        }),
                    );
                }
            }
            body => shared.deliver(call_id, Ok(Pdu { header, body })),
        }
    }
    shared.open.store(false, Ordering::SeqCst);
    shared.fail_all();
}
