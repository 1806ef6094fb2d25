//! The request state machine (spec.md §3, §4.3): aggregates up to
//! `replicas + 1` per-attempt replies into exactly one callback firing,
//! according to the request's [`ReplicationPolicy`].

use std::sync::atomic::{AtomicU16, Ordering};

use parking_lot::Mutex;

use crate::protocol::{ResponseHeader, Status};

/// `AnyOK` succeeds on the first `NoError` attempt; `AllOK` requires every
/// attempt to succeed. See spec.md GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationPolicy {
    AnyOk,
    AllOk,
}

/// One reply delivered to a request, either from a real server response
/// or synthesized by [`fail`](Request::fail).
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: Status,
    pub key: Option<Vec<u8>>,
    pub extras: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

impl Reply {
    pub fn from_response(header: &ResponseHeader, key: &[u8], extras: &[u8], value: &[u8]) -> Self {
        Reply {
            status: header.status(),
            key: if key.is_empty() { None } else { Some(key.to_vec()) },
            extras: if extras.is_empty() {
                None
            } else {
                Some(extras.to_vec())
            },
            value: if value.is_empty() { None } else { Some(value.to_vec()) },
        }
    }

    /// The reply synthesized by `fail()` (spec.md §3, §4.3): status
    /// `InternalError`, no body.
    pub fn internal_error() -> Self {
        Reply {
            status: Status::InternalError,
            key: None,
            extras: None,
            value: None,
        }
    }
}

/// A polymorphic request object, opaque to the rest of the core apart
/// from this contract (spec.md §3).
pub trait Request: Send + Sync {
    /// A fully formed binary request, including the `opaque` identifier
    /// returned by [`Request::request_id`].
    fn query_buffer(&self) -> Vec<u8>;
    /// The `opaque` field embedded in `query_buffer()`.
    fn request_id(&self) -> u32;
    /// Number of *additional* nodes this request is dispatched to; total
    /// attempts is `replicas() + 1`.
    fn replicas(&self) -> u8;
    fn policy(&self) -> ReplicationPolicy;
    /// The vbucket slot a locator may write before re-encoding the frame.
    fn vbucket(&self) -> u16;
    fn set_vbucket(&self, vbucket: u16);
    /// Deliver one reply. May be called up to `replicas() + 1` times.
    fn handle_response(&self, reply: Reply);
    /// Equivalent to a reply with status `InternalError` and no body.
    fn fail(&self) {
        self.handle_response(Reply::internal_error());
    }
}

struct AggregatorState {
    remaining: u8,
    fired: bool,
    /// AnyOK: best (lowest-rank) non-NoError reply seen so far.
    /// AllOK: first non-NoError reply seen, and the most recent reply
    /// (used if every attempt turned out NoError).
    best_or_first_error: Option<Reply>,
    last_reply: Option<Reply>,
}

/// Reusable aggregation state machine backing a `Request` impl (spec.md
/// §4.3). A concrete `Request` holds one of these and forwards
/// `handle_response`/`fail` into [`ResponseAggregator::on_reply`].
pub struct ResponseAggregator {
    policy: ReplicationPolicy,
    state: Mutex<AggregatorState>,
    callback: Box<dyn Fn(Reply) + Send + Sync>,
}

impl ResponseAggregator {
    pub fn new(
        replicas: u8,
        policy: ReplicationPolicy,
        callback: impl Fn(Reply) + Send + Sync + 'static,
    ) -> Self {
        ResponseAggregator {
            policy,
            state: Mutex::new(AggregatorState {
                remaining: replicas + 1,
                fired: false,
                best_or_first_error: None,
                last_reply: None,
            }),
            callback: Box::new(callback),
        }
    }

    pub fn on_reply(&self, reply: Reply) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if state.fired {
            return;
        }

        match self.policy {
            ReplicationPolicy::AnyOk => {
                if reply.status == Status::NoError {
                    state.fired = true;
                    drop(state);
                    (self.callback)(reply);
                    return;
                }
                let replace = match &state.best_or_first_error {
                    None => true,
                    Some(existing) => reply.status.rank() < existing.status.rank(),
                };
                if replace {
                    state.best_or_first_error = Some(reply);
                }
                if state.remaining == 0 {
                    state.fired = true;
                    let winner = state.best_or_first_error.take().expect(
                        "AnyOK with no NoError reply must have recorded at least one failure",
                    );
                    drop(state);
                    (self.callback)(winner);
                }
            }
            ReplicationPolicy::AllOk => {
                if reply.status != Status::NoError && state.best_or_first_error.is_none() {
                    state.best_or_first_error = Some(reply.clone());
                }
                state.last_reply = Some(reply);
                if state.remaining == 0 {
                    state.fired = true;
                    let winner = state
                        .best_or_first_error
                        .take()
                        .or_else(|| state.last_reply.take())
                        .expect("at least one reply must have been recorded");
                    drop(state);
                    (self.callback)(winner);
                }
            }
        }
    }
}

/// A minimal [`Request`] implementation for tests and doctests: building
/// typed operations (Get/Set/Delete/...) on top of this contract is the
/// out-of-scope façade (spec.md §1), but exercising the aggregation
/// policy and transport needs *some* concrete request.
pub struct SimpleRequest {
    opcode: u8,
    key: Vec<u8>,
    extras: Vec<u8>,
    value: Vec<u8>,
    opaque: u32,
    cas: u64,
    replicas: u8,
    vbucket: AtomicU16,
    aggregator: ResponseAggregator,
}

impl SimpleRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opcode: u8,
        key: impl Into<Vec<u8>>,
        extras: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        opaque: u32,
        replicas: u8,
        policy: ReplicationPolicy,
        callback: impl Fn(Reply) + Send + Sync + 'static,
    ) -> Self {
        SimpleRequest {
            opcode,
            key: key.into(),
            extras: extras.into(),
            value: value.into(),
            opaque,
            cas: 0,
            replicas,
            vbucket: AtomicU16::new(0),
            aggregator: ResponseAggregator::new(replicas, policy, callback),
        }
    }
}

impl Request for SimpleRequest {
    fn query_buffer(&self) -> Vec<u8> {
        crate::protocol::encode_request(
            self.opcode,
            self.vbucket(),
            self.opaque,
            self.cas,
            &self.extras,
            &self.key,
            &self.value,
        )
    }

    fn request_id(&self) -> u32 {
        self.opaque
    }

    fn replicas(&self) -> u8 {
        self.replicas
    }

    fn policy(&self) -> ReplicationPolicy {
        self.aggregator.policy
    }

    fn vbucket(&self) -> u16 {
        self.vbucket.load(Ordering::Acquire)
    }

    fn set_vbucket(&self, vbucket: u16) {
        self.vbucket.store(vbucket, Ordering::Release);
    }

    fn handle_response(&self, reply: Reply) {
        self.aggregator.on_reply(reply);
    }
}
