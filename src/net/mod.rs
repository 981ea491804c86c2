//! The network boundary.
//!
//! The runtime never touches bytes or sockets. Everything it needs from a
//! transport is the [`Network`] trait: unicast, fan-out and a description of
//! the topology's shape.

use std::collections::BTreeMap;

use crate::ops::{ParamType, RemoteCallIdentifier};
use crate::sites::{NetworkDescriptor, NodeId};
use crate::value::{Payload, ValueKind};

mod error;
pub mod local;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::NetworkError;
pub use local::{LocalNetwork, QuerierMessage};

/// Destination of each envelope of a fan-out.
pub type BroadcastCalls = BTreeMap<NodeId, RemoteCallIdentifier>;

pub trait Network: Send + Sync {
    /// Sends one envelope. A `None` destination addresses the network itself,
    /// which is how nodes answer the querier.
    fn send(
        &self,
        source: NodeId,
        destination: Option<NodeId>,
        call: RemoteCallIdentifier,
        payload: Payload,
    ) -> Result<(), NetworkError>;

    /// Sends one logical call to many destinations, each with its own
    /// envelope.
    fn broadcast(
        &self,
        source: NodeId,
        calls: BroadcastCalls,
        payload: Payload,
    ) -> Result<(), NetworkError>;

    fn describe(&self) -> NetworkDescriptor;

    /// Whether values of the named parameter type can be carried. Defaults to
    /// the canonical [`ValueKind`] names.
    fn can_transport(&self, ty: &ParamType) -> bool {
        ValueKind::from_type_name(ty.name()).is_some()
    }
}
