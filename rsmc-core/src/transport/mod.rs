//! Transport (spec.md §4.4): one TCP connection, pipelined, self-healing.
//!
//! A `Transport` owns exactly one socket at a time. `try_send` never
//! suspends on I/O (spec.md §5): it records the request in the pending
//! FIFO and hands it to an already-running send loop over a channel,
//! then returns. A separate, already-running receive loop matches each
//! reply to the head of the FIFO by `opaque` and delivers it. Both loops
//! are spawned once, by the owning runtime binding (e.g. `rsmc-tokio`),
//! when the transport is constructed or reconnects — this crate only
//! describes the loop bodies as plain `async fn`s so it stays
//! runtime-agnostic, the way the teacher's core stays agnostic over
//! `Connection`.

pub mod auth;
mod io;
mod state;

pub use io::{ReadHalf, Socket, WriteHalf};
pub use state::TransportState;

#[cfg(test)]
pub(crate) use io::test_support;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::protocol::{Opcode, ProtocolError, ResponseHeader, HEADER_LEN};
use crate::request::{Reply, Request};

/// Observer hooks (spec.md §4.4 "Events emitted", §9 "Event hooks"):
/// a small set of fan-out listener lists populated at construction.
#[derive(Default)]
pub struct TransportObservers {
    pub on_transport_error: Vec<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_memcache_error: Vec<Box<dyn Fn(&ResponseHeader) + Send + Sync>>,
    pub on_memcache_response: Vec<Box<dyn Fn(&ResponseHeader) + Send + Sync>>,
    pub on_transport_dead: Vec<Box<dyn Fn() + Send + Sync>>,
}

impl TransportObservers {
    fn fire_error(&self, message: &str) {
        for hook in &self.on_transport_error {
            hook(message);
        }
    }

    fn fire_memcache_error(&self, header: &ResponseHeader) {
        for hook in &self.on_memcache_error {
            hook(header);
        }
    }

    fn fire_memcache_response(&self, header: &ResponseHeader) {
        for hook in &self.on_memcache_response {
            hook(header);
        }
    }

    fn fire_dead(&self) {
        for hook in &self.on_transport_dead {
            hook();
        }
    }
}

/// Fields spec.md §6 enumerates as configuration surface that a
/// transport itself needs (the rest — `authenticator`, the factories —
/// live one level up, at `Node`/`Cluster`).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub pinned_buffer_size: usize,
    pub socket_timeout: Duration,
    /// 0 = unbounded.
    pub queue_length: u32,
    /// SO_RCVBUF/SO_SNDBUF value applied by the runtime binding at
    /// connect time; `None` leaves the OS default (spec.md §6).
    pub recv_buffer_size: Option<i32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            pinned_buffer_size: 16 * 1024,
            socket_timeout: Duration::from_secs(5),
            queue_length: 0,
            recv_buffer_size: None,
        }
    }
}

/// One TCP connection to one endpoint: pipelined, authenticated,
/// self-healing (spec.md §4.4).
pub struct Transport<S: Socket> {
    endpoint: String,
    config: TransportConfig,
    state: Mutex<TransportState>,
    pending: Mutex<VecDeque<Arc<dyn Request>>>,
    outgoing_tx: mpsc::UnboundedSender<Arc<dyn Request>>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<dyn Request>>>>,
    registered: AtomicBool,
    availability_deferred: AtomicBool,
    /// Called once per fully-written request frame ("send-complete",
    /// spec.md §4.4 "Availability signal"). Normally re-admits this
    /// transport into its Node's available pool; swapped to a no-op for
    /// the duration of authentication (spec.md §9).
    send_complete: Mutex<Arc<dyn Fn() + Send + Sync>>,
    observers: TransportObservers,
    next_local_opaque: AtomicU32,
    _socket: std::marker::PhantomData<S>,
}

fn is_dead(state: TransportState) -> bool {
    matches!(state, TransportState::Disposed)
}

impl<S: Socket> Transport<S> {
    pub fn new(endpoint: String, config: TransportConfig, observers: TransportObservers) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded();
        Arc::new(Transport {
            endpoint,
            config,
            state: Mutex::new(TransportState::Unconnected),
            pending: Mutex::new(VecDeque::new()),
            outgoing_tx: tx,
            outgoing_rx: Mutex::new(Some(rx)),
            registered: AtomicBool::new(false),
            availability_deferred: AtomicBool::new(false),
            send_complete: Mutex::new(Arc::new(|| {})),
            observers,
            next_local_opaque: AtomicU32::new(0),
            _socket: std::marker::PhantomData,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// SO_RCVBUF/SO_SNDBUF to apply when the runtime binding dials this
    /// transport's socket; `None` leaves the OS default (spec.md §6).
    pub fn recv_buffer_size(&self) -> Option<i32> {
        self.config.recv_buffer_size
    }

    /// Set (or replace) the callback fired after each request frame is
    /// fully written. The Node calls this once, at registration time,
    /// with a closure that re-admits the transport into its pool.
    pub fn set_send_complete(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        *self.send_complete.lock() = callback;
    }

    pub fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        !is_dead(*self.state.lock())
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn set_state(&self, next: TransportState) {
        *self.state.lock() = next;
    }

    /// Called by the runtime binding once it has connected the socket
    /// and, if configured, finished authenticating. Before this,
    /// `try_send` will still accept and queue requests; nothing is
    /// written to the wire until a send loop is spawned and running.
    pub fn mark_ready(&self) {
        self.set_state(TransportState::Ready);
    }

    pub fn mark_authenticating(&self) {
        self.set_state(TransportState::Authenticating);
    }

    pub fn mark_connect_failed(&self) {
        self.set_state(TransportState::ConnectFailed);
        self.fail_all_pending();
        self.observers.fire_dead();
    }

    /// spec.md §4.4 public contract: enqueue `request` for sending.
    /// Never blocks on network I/O. Returns `false` if disposed, shutting
    /// down, or the pending queue is saturated.
    pub fn try_send(&self, request: Arc<dyn Request>) -> bool {
        let state = *self.state.lock();
        if matches!(
            state,
            TransportState::Disposed | TransportState::Draining
        ) {
            return false;
        }

        let queue_length = self.config.queue_length;
        // Hold `pending` across the push and the channel send: both must
        // happen as one step, or a concurrent `try_send` can push between
        // them and the rollback below would then `pop_back` someone
        // else's already-sent request instead of this one.
        let mut pending = self.pending.lock();
        if queue_length > 0 && pending.len() as u32 >= queue_length {
            self.availability_deferred.store(true, Ordering::Release);
            if !pending.is_empty() {
                return false;
            }
            // Queue drained concurrently: let the caller try another
            // transport, but this one stays in the pool (spec.md
            // §4.4 backpressure step 3).
            if self.availability_deferred.swap(false, Ordering::AcqRel) {
                return false;
            }
        }

        pending.push_back(request.clone());
        if self.outgoing_tx.unbounded_send(request).is_err() {
            // The send loop is gone; still holding `pending`, so this is
            // definitely the entry we just pushed.
            pending.pop_back();
            return false;
        }
        true
    }

    /// Idempotent. With a callback, issues a best-effort `QUIT` whose
    /// reply invokes `callback` before disposing; without one, fails all
    /// pending requests and disposes immediately.
    pub fn shutdown(self: &Arc<Self>, callback: Option<Arc<dyn Fn() + Send + Sync>>) {
        let already_done = {
            let mut state = self.state.lock();
            if matches!(*state, TransportState::Disposed | TransportState::Draining) {
                true
            } else {
                *state = TransportState::Draining;
                false
            }
        };
        if already_done {
            return;
        }

        match callback {
            Some(cb) if self.is_alive() => {
                let quit = Arc::new(QuitRequest::new(
                    self.next_local_opaque.fetch_add(1, Ordering::Relaxed),
                    {
                        let this = self.clone();
                        let cb = cb.clone();
                        move || {
                            cb();
                            this.dispose();
                        }
                    },
                ));
                if !self.try_send(quit) {
                    self.fail_all_pending();
                    self.dispose();
                }
            }
            _ => {
                self.fail_all_pending();
                self.dispose();
            }
        }
    }

    /// Release the socket and buffers. Subsequent operations are no-ops.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if *state == TransportState::Disposed {
            return;
        }
        *state = TransportState::Disposed;
        drop(state);
        self.observers.fire_dead();
    }

    fn fail_all_pending(&self) {
        let mut pending = self.pending.lock();
        for request in pending.drain(..) {
            request.fail();
        }
    }

    /// spec.md §4.4 matching rules. Returns the request a reply belongs
    /// to, or a fatal `ProtocolError` if the wire desynced.
    fn dequeue_to_match(&self, header: &ResponseHeader) -> Result<Arc<dyn Request>, ProtocolError> {
        let opcode = Opcode::from(header.opcode);
        if opcode.is_quiet() {
            return Err(ProtocolError::QuietOpcodeReply(header.opcode));
        }

        let is_stat_row = matches!(opcode, Opcode::Stat)
            && header.body_len != 0
            && header.status() == crate::protocol::Status::NoError;

        let mut pending = self.pending.lock();
        let request = if is_stat_row {
            pending.front().cloned()
        } else {
            pending.pop_front()
        };

        let request = match request {
            Some(request) => request,
            None => {
                return Err(ProtocolError::UnexpectedOpaque {
                    expected: 0,
                    got: header.opaque,
                })
            }
        };

        if request.request_id() != header.opaque {
            drop(pending);
            request.fail();
            return Err(ProtocolError::UnexpectedOpaque {
                expected: request.request_id(),
                got: header.opaque,
            });
        }

        Ok(request)
    }

    fn queue_drained_below_threshold(&self) {
        if self.availability_deferred.swap(false, Ordering::AcqRel) {
            (self.send_complete.lock())();
        }
    }

    /// The pipelined send loop (spec.md §4.4 "Pipelined send"). Walks
    /// each request's bytes through the pinned send buffer in chunks,
    /// retrying on partial writes. Runs until the socket is gone.
    pub async fn send_loop(self: Arc<Self>, mut writer: S::Write) {
        let mut rx = match self.outgoing_rx.lock().take() {
            Some(rx) => rx,
            None => return,
        };
        let buffer_size = self.config.pinned_buffer_size;

        while let Some(request) = rx.next().await {
            if !self.is_alive() {
                request.fail();
                continue;
            }
            let frame = request.query_buffer();
            let mut offset = 0usize;
            let mut failed = false;
            while offset < frame.len() {
                let end = std::cmp::min(offset + buffer_size, frame.len());
                match writer.write(&frame[offset..end]).await {
                    Ok(0) => {
                        failed = true;
                        break;
                    }
                    Ok(written) => offset += written,
                    Err(err) => {
                        self.observers.fire_error(&err.to_string());
                        warn!(endpoint = %self.endpoint, error = %err, "transport send failed");
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                self.set_state(TransportState::ConnectFailed);
                self.fail_all_pending();
                self.observers.fire_dead();
                return;
            }
            (self.send_complete.lock())();
        }
    }

    /// The pipelined receive loop (spec.md §4.4 "Pipelined receive").
    /// Reads a fixed 24-byte header, then exactly `total_body_length`
    /// bytes of body, then matches and delivers.
    pub async fn receive_loop(self: Arc<Self>, mut reader: S::Read) {
        let mut header_buf = vec![0u8; HEADER_LEN];
        let mut body_buf = vec![0u8; self.config.pinned_buffer_size];

        loop {
            if !self.is_alive() {
                return;
            }
            if let Err(err) = read_exact(&mut reader, &mut header_buf).await {
                self.on_receive_failure(&err.to_string());
                return;
            }
            let header = match ResponseHeader::decode(&header_buf) {
                Ok(header) => header,
                Err(err) => {
                    self.on_receive_failure(&err.to_string());
                    return;
                }
            };
            if !header.is_well_formed() {
                self.on_receive_failure("total_body_length smaller than key+extras length");
                return;
            }

            let mut accumulated = Vec::with_capacity(header.body_len as usize);
            let mut remaining = header.body_len as usize;
            while remaining > 0 {
                let chunk_len = std::cmp::min(remaining, body_buf.len());
                if let Err(err) = read_exact(&mut reader, &mut body_buf[..chunk_len]).await {
                    self.on_receive_failure(&err.to_string());
                    return;
                }
                accumulated.extend_from_slice(&body_buf[..chunk_len]);
                remaining -= chunk_len;
            }

            let extras_end = header.extras_length as usize;
            let key_end = extras_end + header.key_length as usize;
            let extras = &accumulated[..extras_end];
            let key = &accumulated[extras_end..key_end];
            let value = &accumulated[key_end..];

            match self.dequeue_to_match(&header) {
                Ok(request) => {
                    self.queue_drained_below_threshold();
                    if header.status() == crate::protocol::Status::NoError {
                        self.observers.fire_memcache_response(&header);
                    } else {
                        self.observers.fire_memcache_error(&header);
                    }
                    request.handle_response(Reply::from_response(&header, key, extras, value));
                }
                Err(err) => {
                    error!(endpoint = %self.endpoint, error = %err, "fatal protocol error");
                    self.on_receive_failure(&err.to_string());
                    return;
                }
            }
        }
    }

    fn on_receive_failure(&self, message: &str) {
        // spec.md §4.4 "Receive failure": tear down, fail pending, but do
        // NOT allocate a replacement here — the next send discovers the
        // dead socket and takes the send-failure path instead.
        self.set_state(TransportState::ConnectFailed);
        self.observers.fire_error(message);
        self.fail_all_pending();
        self.queue_drained_below_threshold();
        debug!(endpoint = %self.endpoint, "receive loop exiting after failure");
    }
}

async fn read_exact<R: ReadHalf>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        let n = reader.read(&mut buf[offset..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "socket closed mid-frame",
            ));
        }
        offset += n;
    }
    Ok(())
}

/// The best-effort `QUIT` request `shutdown()` sends (spec.md §4.4,
/// §4.5): its only job is to invoke a callback once answered (or
/// failed), not to carry a value back to a caller.
struct QuitRequest {
    opaque: u32,
    fired: AtomicBool,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl QuitRequest {
    fn new(opaque: u32, callback: impl FnOnce() + Send + 'static) -> Self {
        QuitRequest {
            opaque,
            fired: AtomicBool::new(false),
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            if let Some(cb) = self.callback.lock().take() {
                cb();
            }
        }
    }
}

impl Request for QuitRequest {
    fn query_buffer(&self) -> Vec<u8> {
        crate::protocol::encode_request(Opcode::QUIT, 0, self.opaque, 0, &[], &[], &[])
    }

    fn request_id(&self) -> u32 {
        self.opaque
    }

    fn replicas(&self) -> u8 {
        0
    }

    fn policy(&self) -> crate::request::ReplicationPolicy {
        crate::request::ReplicationPolicy::AnyOk
    }

    fn vbucket(&self) -> u16 {
        0
    }

    fn set_vbucket(&self, _vbucket: u16) {}

    fn handle_response(&self, _reply: Reply) {
        self.fire();
    }

    fn fail(&self) {
        self.fire();
    }
}
