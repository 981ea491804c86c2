//! Identities of nodes and networks.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;

/// Which side of the bipartite graph a node lives on.
#[derive(
    Archive, Serialize, Deserialize, Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Hash, Eq, PartialEq))]
pub enum Partition {
    Hub,
    Spoke,
}

impl Partition {
    /// The partition a node of this partition talks to.
    pub fn opposite(self) -> Self {
        match self {
            Partition::Hub => Partition::Spoke,
            Partition::Spoke => Partition::Hub,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("the index of a node cannot be negative (got {0})")]
    NegativeIndex(i64),
    #[error("node index {0} does not fit in 32 bits")]
    IndexOverflow(i64),
}

/// The identifier of a node in a bipartite network.
///
/// Indices are dense per partition, starting at zero, so a hub with index 3
/// and a spoke with index 3 are different nodes.
#[derive(
    Archive, Serialize, Deserialize, Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Hash, Eq, PartialEq))]
pub struct NodeId {
    partition: Partition,
    index: u32,
}

impl NodeId {
    pub const fn new(partition: Partition, index: u32) -> Self {
        Self { partition, index }
    }

    pub const fn hub(index: u32) -> Self {
        Self::new(Partition::Hub, index)
    }

    pub const fn spoke(index: u32) -> Self {
        Self::new(Partition::Spoke, index)
    }

    /// Builds an id from a signed index, as received from hosts that carry
    /// indices as plain integers.
    pub fn try_new(partition: Partition, index: i64) -> Result<Self, IdError> {
        if index < 0 {
            return Err(IdError::NegativeIndex(index));
        }
        let index = u32::try_from(index).map_err(|_| IdError::IndexOverflow(index))?;
        Ok(Self { partition, index })
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_hub(&self) -> bool {
        self.partition == Partition::Hub
    }

    pub fn is_spoke(&self) -> bool {
        self.partition == Partition::Spoke
    }

    /// Returns a copy of this id pointing at another index of the same
    /// partition.
    pub fn with_index(&self, index: i64) -> Result<Self, IdError> {
        Self::try_new(self.partition, index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition {
            Partition::Hub => write!(f, "HUB: {}", self.index),
            Partition::Spoke => write!(f, "SPOKE: {}", self.index),
        }
    }
}

/// The shape of a network, as reported by the transport.
#[derive(Archive, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct NetworkDescriptor {
    pub network_id: u32,
    pub hubs: u32,
    pub spokes: u32,
}

impl NetworkDescriptor {
    pub const fn new(network_id: u32, hubs: u32, spokes: u32) -> Self {
        Self {
            network_id,
            hubs,
            spokes,
        }
    }

    /// Number of nodes in a partition.
    pub fn size_of(&self, partition: Partition) -> u32 {
        match partition {
            Partition::Hub => self.hubs,
            Partition::Spoke => self.spokes,
        }
    }

    /// Number of nodes a node of `partition` can address, i.e. the size of
    /// the opposite partition.
    pub fn peers_of(&self, partition: Partition) -> u32 {
        self.size_of(partition.opposite())
    }
}
