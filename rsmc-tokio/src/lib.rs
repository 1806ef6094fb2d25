//! Tokio binding for `rsmc-core`: TCP sockets, loop spawning, and a
//! reconnect timer. `rsmc-core` describes `Transport`/`Node` as plain
//! `async fn`s over a generic [`rsmc_core::Socket`] so it never depends
//! on a runtime; this crate is where that gets wired to real sockets and
//! `tokio::spawn`, the way the teacher's `TokioConnection` did for its
//! own, simpler `Connection` trait.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpSocket;
use tracing::{info, warn};

use rsmc_core::node::TransportDriver;
use rsmc_core::transport::auth::{run_handshake, Authenticator};
use rsmc_core::{Cluster, ReadHalf, Socket, Transport, WriteHalf};

pub struct TokioReadHalf(OwnedReadHalf);
pub struct TokioWriteHalf(OwnedWriteHalf);

#[async_trait]
impl ReadHalf for TokioReadHalf {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }
}

#[async_trait]
impl WriteHalf for TokioWriteHalf {
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf).await
    }
}

/// The [`Socket`] binding used for every real connection. Test doubles
/// live in `rsmc-core` itself (`transport::test_support`); this type
/// only ever talks to a real TCP endpoint.
pub struct TokioSocket;

#[async_trait]
impl Socket for TokioSocket {
    type Read = TokioReadHalf;
    type Write = TokioWriteHalf;

    async fn connect(endpoint: &str, recv_buffer_size: Option<i32>) -> io::Result<(Self::Read, Self::Write)> {
        let addr = tokio::net::lookup_host(endpoint)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(size) = recv_buffer_size {
            let size = size.max(0) as u32;
            socket.set_recv_buffer_size(size)?;
            socket.set_send_buffer_size(size)?;
        }
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok((TokioReadHalf(read), TokioWriteHalf(write)))
    }
}

/// Connects a transport's socket, runs the SASL handshake if configured,
/// and spawns its send/receive loops on the tokio runtime (spec.md §4.4,
/// §9's send-complete-hook-swap design realized via
/// `rsmc_core::transport::auth::run_handshake`).
pub struct TokioDriver {
    authenticator: Option<Arc<dyn Authenticator>>,
    socket_timeout: Duration,
}

impl TokioDriver {
    pub fn new(authenticator: Option<Arc<dyn Authenticator>>, socket_timeout: Duration) -> Arc<Self> {
        Arc::new(TokioDriver {
            authenticator,
            socket_timeout,
        })
    }
}

#[async_trait]
impl TransportDriver<TokioSocket> for TokioDriver {
    async fn connect(&self, transport: Arc<Transport<TokioSocket>>) {
        let endpoint = transport.endpoint().to_string();
        let (read, write) = match TokioSocket::connect(&endpoint, transport.recv_buffer_size()).await {
            Ok(halves) => halves,
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "connect failed");
                transport.mark_connect_failed();
                return;
            }
        };

        tokio::spawn(transport.clone().receive_loop(read));
        tokio::spawn(transport.clone().send_loop(write));

        if let Some(authenticator) = &self.authenticator {
            transport.mark_authenticating();
            let transport_for_send = transport.clone();
            let outcome = run_handshake(authenticator.as_ref(), self.socket_timeout, |request| {
                let transport = transport_for_send.clone();
                async move {
                    if !transport.try_send(request.clone()) {
                        request.fail();
                    }
                }
            })
            .await;
            if let Err(err) = outcome {
                warn!(endpoint = %endpoint, error = %err, "authentication failed");
                transport.mark_connect_failed();
                return;
            }
        }

        info!(endpoint = %endpoint, "transport ready");
        transport.mark_ready();
    }
}

/// Drives [`Cluster::maintain`] on an interval, the runtime-owned half
/// of spec.md §6's `transport_connect_timer_period`. Pass a
/// `Weak`-derived shutdown by simply dropping the returned handle; the
/// loop checks `Arc::strong_count` on nothing — callers instead abort
/// the `JoinHandle` when tearing the cluster down.
pub fn spawn_reconnect_timer(
    cluster: Arc<Cluster<TokioSocket>>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            cluster.maintain().await;
            cluster.recompute_liveness();
        }
    })
}
