//! Runtime-agnostic core for a memcached binary-protocol client:
//! framing, the request/reply state machine, per-connection transports,
//! node pools, and key-to-node locators. The typed operation façade
//! (Get/Set/Delete/...), serializer choice, and configuration parsing
//! live one layer up, outside this crate.

pub mod cluster;
pub mod config;
pub mod error;
pub mod hash;
pub mod locator;
pub mod node;
pub mod protocol;
pub mod request;
pub mod transport;

pub use cluster::Cluster;
pub use config::{ClusterConfig, NodeFactory};
pub use error::Error;
pub use node::{Node, TransportDriver, TransportFactory};
pub use request::{Reply, ReplicationPolicy, Request, ResponseAggregator};
pub use transport::{ReadHalf, Socket, Transport, TransportConfig, TransportObservers, TransportState, WriteHalf};
