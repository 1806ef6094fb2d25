//! The socket abstraction a [`crate::transport::Transport`] is generic
//! over (spec.md §4.4, §9 "Callback-style async on a socket"). Mirrors
//! the teacher's `Connection` trait, but split into independently owned
//! read/write halves so the send loop and receive loop can each hold
//! their own single outstanding I/O operation without contending on a
//! lock (spec.md §5: "a single outstanding asynchronous send and a
//! single outstanding asynchronous receive per transport").

use async_trait::async_trait;
use std::io;

/// The read half of a connected socket.
#[async_trait]
pub trait ReadHalf: Send + 'static {
    /// Read into `buf`, returning the number of bytes read (0 on EOF),
    /// the same short-read semantics as `AsyncRead`. Callers loop until
    /// they have what they need (spec.md §4.4's receive loop).
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The write half of a connected socket.
#[async_trait]
pub trait WriteHalf: Send + 'static {
    /// Write from `buf`, returning the number of bytes actually written
    /// (a partial write is legal and must be retried by the caller from
    /// the new offset, spec.md §4.4).
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// A connectable, splittable duplex socket. Implemented once per async
/// runtime (see `rsmc-tokio`); `Transport` is generic over it the same
/// way the teacher's `Client` is generic over `Connection`.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    type Read: ReadHalf;
    type Write: WriteHalf;

    /// `recv_buffer_size` is spec.md §6's `transport_receive_buffer_size`
    /// (SO_RCVBUF/SO_SNDBUF); `None` leaves the OS default.
    async fn connect(endpoint: &str, recv_buffer_size: Option<i32>) -> io::Result<(Self::Read, Self::Write)>;
}

/// An in-memory [`Socket`] double used by `rsmc-core`'s own unit tests to
/// drive the pipelining, backpressure, and matching invariants (spec.md
/// §8) without a live memcached server. `rsmc-tokio`'s tests instead run
/// against a real process, the way the teacher's integration tests do;
/// both styles are kept at the layer they fit.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Default)]
    struct Shared {
        /// Bytes the transport under test has written to the "wire".
        written: VecDeque<u8>,
        /// Bytes queued up to be "received" by the transport under test.
        to_read: VecDeque<u8>,
    }

    #[derive(Clone, Default)]
    pub struct TestSocket {
        shared: Arc<Mutex<Shared>>,
    }

    impl TestSocket {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue bytes the transport will read on its next `read()` calls.
        pub fn push_incoming(&self, bytes: &[u8]) {
            self.shared.lock().to_read.extend(bytes.iter().copied());
        }

        /// Drain everything written so far (for assertions).
        pub fn take_written(&self) -> Vec<u8> {
            self.shared.lock().written.drain(..).collect()
        }
    }

    pub struct TestReadHalf(Arc<Mutex<Shared>>);
    pub struct TestWriteHalf(Arc<Mutex<Shared>>);

    #[async_trait]
    impl ReadHalf for TestReadHalf {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut shared = self.0.lock();
            let n = std::cmp::min(buf.len(), shared.to_read.len());
            for slot in buf.iter_mut().take(n) {
                *slot = shared.to_read.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    #[async_trait]
    impl WriteHalf for TestWriteHalf {
        async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut shared = self.0.lock();
            shared.written.extend(buf.iter().copied());
            Ok(buf.len())
        }
    }

    #[async_trait]
    impl Socket for TestSocket {
        type Read = TestReadHalf;
        type Write = TestWriteHalf;

        async fn connect(_endpoint: &str, _recv_buffer_size: Option<i32>) -> io::Result<(Self::Read, Self::Write)> {
            let shared = Arc::new(Mutex::new(Shared::default()));
            Ok((TestReadHalf(shared.clone()), TestWriteHalf(shared)))
        }
    }
}
