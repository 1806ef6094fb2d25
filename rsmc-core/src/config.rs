//! Configuration surface (spec.md §6). Mirrors the teacher's
//! `ClientConfig`, expanded to cover the pool/reconnect/auth knobs this
//! core needs that the teacher's synchronous client didn't.

use std::sync::Arc;
use std::time::Duration;

use crate::node::{Node, TransportDriver, TransportFactory};
use crate::transport::auth::Authenticator;
use crate::transport::{Socket, TransportConfig};

/// Builds a node in place of [`Node::new`]; spec.md §6's `node_factory`,
/// for tests or node substitution. Receives the same [`TransportFactory`]
/// the node should thread down to its own transports, if one is set.
pub type NodeFactory<S> = Arc<
    dyn Fn(
            String,
            TransportConfig,
            usize,
            Arc<dyn TransportDriver<S>>,
            Option<TransportFactory<S>>,
        ) -> Arc<Node<S>>
        + Send
        + Sync,
>;

/// Cluster-wide configuration. `pool_size` and `nodes` feed `Cluster`
/// directly; the rest is forwarded into each `Node`'s transports.
pub struct ClusterConfig<S: Socket> {
    /// Endpoints in `host:port` form, in the order locators index them.
    pub nodes: Vec<String>,
    /// Transports per node.
    pub pool_size: usize,
    /// Size of per-transport pinned I/O buffers.
    pub pinned_buffer_size: usize,
    /// SO_RCVBUF/SO_SNDBUF value; `None` leaves the OS default.
    pub transport_receive_buffer_size: Option<i32>,
    /// Retry backoff between reconnect attempts.
    pub transport_connect_timer_period: Duration,
    /// Authentication step timeout.
    pub socket_timeout: Duration,
    /// 0 = unbounded; otherwise per-transport pending cap.
    pub queue_length: u32,
    /// SASL plugin. `None` skips authentication entirely.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Substitutes for `Transport::new`; for tests or transport
    /// substitution (spec.md §6).
    pub transport_factory: Option<TransportFactory<S>>,
    /// Substitutes for `Node::new`; for tests or node substitution
    /// (spec.md §6).
    pub node_factory: Option<NodeFactory<S>>,
}

impl<S: Socket> Clone for ClusterConfig<S> {
    fn clone(&self) -> Self {
        ClusterConfig {
            nodes: self.nodes.clone(),
            pool_size: self.pool_size,
            pinned_buffer_size: self.pinned_buffer_size,
            transport_receive_buffer_size: self.transport_receive_buffer_size,
            transport_connect_timer_period: self.transport_connect_timer_period,
            socket_timeout: self.socket_timeout,
            queue_length: self.queue_length,
            authenticator: self.authenticator.clone(),
            transport_factory: self.transport_factory.clone(),
            node_factory: self.node_factory.clone(),
        }
    }
}

impl<S: Socket> Default for ClusterConfig<S> {
    fn default() -> Self {
        ClusterConfig {
            nodes: Vec::new(),
            pool_size: 1,
            pinned_buffer_size: 16 * 1024,
            transport_receive_buffer_size: None,
            transport_connect_timer_period: Duration::from_secs(1),
            socket_timeout: Duration::from_secs(5),
            queue_length: 0,
            authenticator: None,
            transport_factory: None,
            node_factory: None,
        }
    }
}

impl<S: Socket> ClusterConfig<S> {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            pinned_buffer_size: self.pinned_buffer_size,
            socket_timeout: self.socket_timeout,
            queue_length: self.queue_length,
            recv_buffer_size: self.transport_receive_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::TestSocket;

    #[test]
    fn default_is_unbounded_single_node_pool() {
        let config = ClusterConfig::<TestSocket>::default();
        assert_eq!(config.queue_length, 0);
        assert_eq!(config.pool_size, 1);
        assert!(config.authenticator.is_none());
        assert!(config.transport_factory.is_none());
        assert!(config.node_factory.is_none());
    }

    #[test]
    fn transport_config_projects_the_shared_fields() {
        let config = ClusterConfig::<TestSocket> {
            pinned_buffer_size: 4096,
            queue_length: 10,
            transport_receive_buffer_size: Some(65536),
            ..ClusterConfig::default()
        };
        let transport_config = config.transport_config();
        assert_eq!(transport_config.pinned_buffer_size, 4096);
        assert_eq!(transport_config.queue_length, 10);
        assert_eq!(transport_config.recv_buffer_size, Some(65536));
    }
}
