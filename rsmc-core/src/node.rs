//! Node (spec.md §4.5): an endpoint-scoped pool of transports with
//! admission control.
//!
//! A `Node` never performs I/O itself and never spawns tasks — it stays
//! as runtime-agnostic as [`crate::transport::Transport`]. Actually
//! dialing a socket and running a transport's send/receive loops is the
//! job of a [`TransportDriver`] supplied by the runtime binding (e.g.
//! `rsmc-tokio`); `Node` only decides *when* a transport needs
//! (re)connecting and hands back the inert object for the caller to
//! drive. This keeps the reconnect timer's ownership exactly as spec.md
//! §9 describes: the timer holds a weak reference and no-ops once the
//! owning `Node` is gone, and `Node` never holds a strong cycle back to
//! a `Transport`'s own callbacks (those close over `Weak<Node<S>>`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::request::Request;
use crate::transport::{Socket, Transport, TransportConfig, TransportObservers};

/// Connects a transport's socket and starts its send/receive loops.
/// Implemented once per async runtime; `Node` calls it once per
/// (re)connection attempt and awaits only the setup, not the connection's
/// lifetime — the loops keep running after this returns.
#[async_trait]
pub trait TransportDriver<S: Socket>: Send + Sync {
    async fn connect(&self, transport: Arc<Transport<S>>);
}

/// Substitutes for [`Transport::new`]; spec.md §6's `transport_factory`,
/// for tests or transport substitution.
pub type TransportFactory<S> =
    Arc<dyn Fn(String, TransportConfig, TransportObservers) -> Arc<Transport<S>> + Send + Sync>;

pub struct Node<S: Socket> {
    endpoint: String,
    config: TransportConfig,
    pool_size: usize,
    driver: Arc<dyn TransportDriver<S>>,
    transport_factory: Option<TransportFactory<S>>,
    transports: Mutex<Vec<Arc<Transport<S>>>>,
    available: Mutex<Vec<Arc<Transport<S>>>>,
    dead: AtomicBool,
    closing: AtomicBool,
}

impl<S: Socket> Node<S> {
    pub fn new(
        endpoint: String,
        config: TransportConfig,
        pool_size: usize,
        driver: Arc<dyn TransportDriver<S>>,
    ) -> Arc<Self> {
        Self::with_transport_factory(endpoint, config, pool_size, driver, None)
    }

    /// As [`Node::new`], but substituting `transport_factory` for
    /// [`Transport::new`] when building each pool slot (spec.md §6).
    pub fn with_transport_factory(
        endpoint: String,
        config: TransportConfig,
        pool_size: usize,
        driver: Arc<dyn TransportDriver<S>>,
        transport_factory: Option<TransportFactory<S>>,
    ) -> Arc<Self> {
        Arc::new(Node {
            endpoint,
            config,
            pool_size,
            driver,
            transport_factory,
            transports: Mutex::new(Vec::new()),
            available: Mutex::new(Vec::new()),
            dead: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Build `pool_size` transports and connect all of them. Call once,
    /// right after `new`, on whatever executor the caller runs on.
    pub async fn bootstrap(self: &Arc<Self>) {
        let mut connecting = Vec::with_capacity(self.pool_size);
        for _ in 0..self.pool_size {
            let transport = self.spawn_transport();
            connecting.push(self.driver.connect(transport));
        }
        futures::future::join_all(connecting).await;
    }

    /// Construct one transport wired into this node's pool (spec.md
    /// §4.5 "Transport creation"): an on-register hook adds it to
    /// `transports`, and an on-available hook (the transport's
    /// send-complete callback) pushes it onto `available`.
    fn spawn_transport(self: &Arc<Self>) -> Arc<Transport<S>> {
        let weak_self: Weak<Node<S>> = Arc::downgrade(self);
        let dead_weak = weak_self.clone();

        let mut observers = TransportObservers::default();
        observers.on_transport_dead.push(Box::new(move || {
            if let Some(node) = dead_weak.upgrade() {
                node.on_transport_died();
            }
        }));

        let transport = match &self.transport_factory {
            Some(factory) => factory(self.endpoint.clone(), self.config.clone(), observers),
            None => Transport::new(self.endpoint.clone(), self.config.clone(), observers),
        };
        transport.mark_registered();

        let readmit_weak = weak_self;
        let readmit_transport = Arc::downgrade(&transport);
        transport.set_send_complete(Arc::new(move || {
            if let (Some(node), Some(transport)) =
                (readmit_weak.upgrade(), readmit_transport.upgrade())
            {
                node.readmit(transport);
            }
        }));

        self.transports.lock().push(transport.clone());
        transport
    }

    fn readmit(&self, transport: Arc<Transport<S>>) {
        if !transport.is_alive() || !transport.is_registered() {
            return;
        }
        let mut available = self.available.lock();
        if !available.iter().any(|t| Arc::ptr_eq(t, &transport)) {
            available.push(transport);
        }
        drop(available);
        self.dead.store(false, Ordering::Release);
    }

    fn on_transport_died(self: &Arc<Self>) {
        warn!(endpoint = %self.endpoint, "transport died");
        self.available.lock().retain(|t| t.is_alive());
        self.transports.lock().retain(|t| t.is_alive());
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        if self.transports.lock().is_empty() {
            self.dead.store(true, Ordering::Release);
        }
        // The caller's reconnect timer notices the shrunken pool (via
        // `needs_replacement`) and calls `replace_dead_transport`.
    }

    /// True if the live transport count has fallen below `pool_size` and
    /// this node isn't shutting down — the reconnect timer's cue to call
    /// [`Node::replace_dead_transport`].
    pub fn needs_replacement(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && self.transports.lock().len() < self.pool_size
    }

    /// Build and connect one more transport to bring the pool back up to
    /// `pool_size`. Called by the runtime binding's reconnect timer
    /// (spec.md §6 `transport_connect_timer_period`), which holds only a
    /// `Weak<Node<S>>` so it no-ops once the node is gone (spec.md §9).
    pub async fn replace_dead_transport(self: &Arc<Self>) {
        if !self.needs_replacement() {
            return;
        }
        let transport = self.spawn_transport();
        self.driver.connect(transport).await;
    }

    /// spec.md §4.5 dispatch: pop an available transport and try it; on
    /// refusal, try the next one; if none remain, fail the request and
    /// mark the node dead until a transport recovers.
    pub fn try_send(&self, request: Arc<dyn Request>) -> bool {
        loop {
            let candidate = self.available.lock().pop();
            match candidate {
                Some(transport) => {
                    if transport.try_send(request.clone()) {
                        return true;
                    }
                    // Not re-pushed: a transport that refused is either
                    // dead (dropped here) or backpressured (it will
                    // re-admit itself via send-complete once it drains).
                }
                None => {
                    request.fail();
                    self.dead.store(true, Ordering::Release);
                    return false;
                }
            }
        }
    }

    /// spec.md §4.5 shutdown: mark closing, best-effort `QUIT` each live
    /// transport, dispose after a grace period.
    pub fn shutdown(self: &Arc<Self>) {
        self.closing.store(true, Ordering::Release);
        let transports = self.transports.lock().clone();
        info!(endpoint = %self.endpoint, count = transports.len(), "node shutting down");
        for transport in transports {
            let t = transport.clone();
            transport.shutdown(Some(Arc::new(move || {
                t.dispose();
            })));
        }
    }

    /// Whether `shutdown()` has been called; transports consult this as
    /// the `node_closing` predicate (spec.md §4.5) to avoid being
    /// replaced while draining.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn live_transport_count(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn available_transport_count(&self) -> usize {
        self.available.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ReplicationPolicy, SimpleRequest};
    use crate::transport::test_support::TestSocket;
    use std::sync::atomic::AtomicUsize;

    struct NoopDriver;

    #[async_trait]
    impl TransportDriver<TestSocket> for NoopDriver {
        async fn connect(&self, _transport: Arc<Transport<TestSocket>>) {
            // Tests drive transport state directly; no real socket here.
        }
    }

    fn node() -> Arc<Node<TestSocket>> {
        Node::new(
            "test:11211".into(),
            TransportConfig::default(),
            2,
            Arc::new(NoopDriver),
        )
    }

    #[test]
    fn try_send_with_empty_pool_fails_request_and_marks_dead() {
        let node = node();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let request: Arc<dyn Request> = Arc::new(SimpleRequest::new(
            crate::protocol::Opcode::GET,
            b"k".to_vec(),
            vec![],
            vec![],
            1,
            0,
            ReplicationPolicy::AnyOk,
            move |reply| {
                if reply.status == crate::protocol::Status::InternalError {
                    fired2.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));
        assert!(!node.try_send(request));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(node.is_dead());
    }

    #[test]
    fn readmit_then_try_send_dispatches_to_available_transport() {
        let node = node();
        let transport = node.spawn_transport();
        transport.mark_ready();
        node.readmit(transport.clone());
        assert_eq!(node.available_transport_count(), 1);

        let request: Arc<dyn Request> = Arc::new(SimpleRequest::new(
            crate::protocol::Opcode::GET,
            b"k".to_vec(),
            vec![],
            vec![],
            1,
            0,
            ReplicationPolicy::AnyOk,
            |_reply| {},
        ));
        assert!(node.try_send(request));
    }

    #[test]
    fn needs_replacement_once_pool_shrinks() {
        let node = node();
        let _a = node.spawn_transport();
        let _b = node.spawn_transport();
        assert!(!node.needs_replacement());
        node.transports.lock().pop();
        assert!(node.needs_replacement());
    }

    #[test]
    fn transport_factory_override_is_used_instead_of_transport_new() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let factory: TransportFactory<TestSocket> = Arc::new(move |endpoint, config, observers| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Transport::new(endpoint, config, observers)
        });
        let node = Node::with_transport_factory(
            "test:11211".into(),
            TransportConfig::default(),
            1,
            Arc::new(NoopDriver),
            Some(factory),
        );
        let _transport = node.spawn_transport();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
