//! The transport lifecycle (spec.md §4.4 "State machine"), collapsed
//! into one enum per spec.md §9's design note rather than the source's
//! four independent atomic flags.

/// ```text
///           ┌──► Unconnected ──connect success──► Authenticating ──auth OK──► Ready ──┐
///           │        ▲                                    │                            │
///           │        │                                    │ auth fail                   │
///           │  reconnect timer                            ▼                            │
///           └── ConnectFailed ◄── send/recv error ─── Ready ──shutdown──► Draining ──► Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Initial state if the transport plans to connect up front.
    Unconnected,
    /// Running the SASL handshake before general traffic is allowed.
    Authenticating,
    /// Connected, authenticated (if configured), accepting traffic.
    Ready,
    /// A send or receive failure tore the socket down; a reconnect timer
    /// is pending (or this transport is about to be replaced).
    ConnectFailed,
    /// `shutdown()` was called; draining in-flight requests.
    Draining,
    /// Terminal. All operations are no-ops.
    Disposed,
}
