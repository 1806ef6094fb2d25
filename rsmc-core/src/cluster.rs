//! Cluster facade (spec.md §4.7): boundary-only summary — compose a
//! locator with a node list, dispatch requests, keep liveness current.
//! Everything above this (typed operations, user-facing API) is the
//! out-of-scope façade (spec.md §1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::ClusterConfig;
use crate::locator::{Locator, NodeLiveness};
use crate::node::{Node, TransportDriver};
use crate::request::Request;
use crate::transport::{Socket, TransportConfig};

struct DeadFlags {
    flags: Vec<AtomicBool>,
}

impl NodeLiveness for DeadFlags {
    fn node_count(&self) -> usize {
        self.flags.len()
    }

    fn is_dead(&self, index: usize) -> bool {
        self.flags[index].load(Ordering::Acquire)
    }
}

/// Composes a [`Locator`] with a fixed set of [`Node`]s (spec.md §4.7).
/// The node list is supplied at construction — no cluster-membership
/// discovery (spec.md §1, explicit non-goal).
pub struct Cluster<S: Socket> {
    nodes: Vec<Arc<Node<S>>>,
    locator: Arc<dyn Locator>,
    liveness: Arc<DeadFlags>,
}

impl<S: Socket> Cluster<S> {
    pub fn new(
        endpoints: Vec<String>,
        pool_size: usize,
        transport_config: TransportConfig,
        driver: Arc<dyn TransportDriver<S>>,
        locator_from_liveness: impl FnOnce(Arc<dyn NodeLiveness>) -> Arc<dyn Locator>,
    ) -> Arc<Self> {
        let config = ClusterConfig {
            nodes: endpoints,
            pool_size,
            ..ClusterConfig::default()
        };
        Self::from_config(&config, transport_config, driver, locator_from_liveness)
    }

    /// As [`Cluster::new`], but sourced from a full [`ClusterConfig`] so
    /// its `transport_factory`/`node_factory` test-substitution hooks
    /// (spec.md §6) reach every node this cluster builds.
    pub fn from_config(
        config: &ClusterConfig<S>,
        transport_config: TransportConfig,
        driver: Arc<dyn TransportDriver<S>>,
        locator_from_liveness: impl FnOnce(Arc<dyn NodeLiveness>) -> Arc<dyn Locator>,
    ) -> Arc<Self> {
        let liveness = Arc::new(DeadFlags {
            flags: config.nodes.iter().map(|_| AtomicBool::new(false)).collect(),
        });
        let nodes = config
            .nodes
            .iter()
            .cloned()
            .map(|endpoint| match &config.node_factory {
                Some(factory) => factory(
                    endpoint,
                    transport_config.clone(),
                    config.pool_size,
                    driver.clone(),
                    config.transport_factory.clone(),
                ),
                None => Node::with_transport_factory(
                    endpoint,
                    transport_config.clone(),
                    config.pool_size,
                    driver.clone(),
                    config.transport_factory.clone(),
                ),
            })
            .collect();
        let liveness_handle: Arc<dyn NodeLiveness> = liveness.clone();
        let locator = locator_from_liveness(liveness_handle);
        Arc::new(Cluster {
            nodes,
            locator,
            liveness,
        })
    }

    /// Bring every node's transport pool up.
    pub async fn bootstrap(&self) {
        for node in &self.nodes {
            node.bootstrap().await;
        }
    }

    /// spec.md §4.7 dispatch: ask the locator for `replicas + 1` nodes,
    /// `try_send` on each; a node that refuses fails the request (so
    /// aggregation still progresses toward a final answer).
    pub fn dispatch(&self, key: &[u8], request: Arc<dyn Request>) {
        let replicas = request.replicas();
        let selection = self.locator.locate(key, request.as_ref(), replicas);
        if selection.is_empty() {
            request.fail();
            return;
        }
        for index in selection {
            match self.nodes.get(index) {
                Some(node) if !node.is_dead() => {
                    if !node.try_send(request.clone()) {
                        request.fail();
                    }
                }
                _ => request.fail(),
            }
        }
    }

    /// spec.md §4.7: "periodically recomputes node liveness". Call from
    /// a timer owned by the runtime binding.
    pub fn recompute_liveness(&self) {
        for (index, node) in self.nodes.iter().enumerate() {
            let dead = node.is_dead();
            self.liveness.flags[index].store(dead, Ordering::Release);
            if dead {
                debug!(endpoint = %node.endpoint(), "node marked dead");
            }
        }
    }

    /// Reconnect timer hook: replace any node whose pool has shrunk
    /// below `pool_size`. Call periodically from the runtime binding.
    pub async fn maintain(&self) {
        for node in &self.nodes {
            if node.needs_replacement() {
                node.replace_dead_transport().await;
            }
        }
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown();
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ReplicationPolicy, SimpleRequest};
    use crate::transport::test_support::TestSocket;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct NoopDriver;

    #[async_trait]
    impl TransportDriver<TestSocket> for NoopDriver {
        async fn connect(&self, _transport: Arc<crate::transport::Transport<TestSocket>>) {}
    }

    #[test]
    fn dispatch_with_no_live_transports_fails_request() {
        let cluster = Cluster::<TestSocket>::new(
            vec!["a:1".into(), "b:2".into()],
            1,
            crate::transport::TransportConfig::default(),
            Arc::new(NoopDriver),
            |liveness| Arc::new(crate::locator::RoundRobinLocator::new(liveness)),
        );

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
        cluster.dispatch(b"k", request);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recompute_liveness_reflects_dead_nodes() {
        let cluster = Cluster::<TestSocket>::new(
            vec!["a:1".into()],
            1,
            crate::transport::TransportConfig::default(),
            Arc::new(NoopDriver),
            |liveness| Arc::new(crate::locator::RoundRobinLocator::new(liveness)),
        );
        cluster.nodes[0].try_send(Arc::new(SimpleRequest::new(
            crate::protocol::Opcode::GET,
            b"k".to_vec(),
            vec![],
            vec![],
            1,
            0,
            ReplicationPolicy::AnyOk,
            |_r| {},
        )));
        cluster.recompute_liveness();
        assert!(cluster.liveness.is_dead(0));
    }

    #[test]
    fn node_factory_override_builds_every_node() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let config = ClusterConfig::<TestSocket> {
            nodes: vec!["a:1".into(), "b:2".into()],
            pool_size: 1,
            node_factory: Some(Arc::new(move |endpoint, config, pool_size, driver, transport_factory| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Node::with_transport_factory(endpoint, config, pool_size, driver, transport_factory)
            })),
            ..ClusterConfig::default()
        };
        let cluster = Cluster::from_config(
            &config,
            crate::transport::TransportConfig::default(),
            Arc::new(NoopDriver),
            |liveness| Arc::new(crate::locator::RoundRobinLocator::new(liveness)),
        );
        assert_eq!(cluster.node_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
