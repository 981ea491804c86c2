use thiserror::Error;

use crate::sites::NodeId;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no node {0} is attached to network {1}")]
    UnknownDestination(NodeId, u32),
    #[error("the mailbox of node {0} is closed")]
    MailboxClosed(NodeId),
    #[error("network {0} has no querier attached")]
    NoQuerier(u32),
    #[error("transport failure: {0}")]
    Transport(String),
}
