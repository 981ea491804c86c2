//! A node runtime for bipartite topologies.
//!
//! A bipartite network has two disjoint partitions of nodes, hubs and spokes.
//! Every node of one partition can call, broadcast to, or stream data from the
//! nodes of the other. User logic implements [`node::NodeLogic`] and is wrapped
//! by a [`node::NodeRuntime`], which owns the node's identity, its outbound
//! proxies, its table of in-flight futures and its flow-control state.
//!
//! The runtime is single threaded per node. Concurrency lives between nodes:
//! [`node::host`] gives each node its own task and mailbox, and
//! [`net::LocalNetwork`] routes calls between mailboxes in process.

pub mod deferred;
pub mod net;
pub mod node;
pub mod ops;
pub mod sites;
pub mod value;

pub use deferred::{FuturePool, Response, ResponseFuture};
pub use net::{Network, NetworkError};
pub use node::{
    BufferedRuntime, HandlerError, NodeContext, NodeLogic, NodeRuntime, RuntimeError,
};
pub use ops::{CallKind, InterfaceDecl, MethodRegistry, OperationDecl, RemoteCallIdentifier};
pub use sites::{NetworkDescriptor, NodeId, Partition};
pub use value::{Payload, Value, ValueKind};
