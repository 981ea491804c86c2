//! In-process network.
//!
//! Routes envelopes straight into the mailboxes of nodes hosted by
//! [`crate::node::host`]. Every node keeps its own task; the network only
//! holds the sending half of each mailbox.

use std::sync::{Mutex, PoisonError, RwLock};

use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{BroadcastCalls, Network, NetworkError};
use crate::node::host::{NodeEvent, NodeHandle};
use crate::ops::RemoteCallIdentifier;
use crate::sites::{NetworkDescriptor, NodeId};
use crate::value::Payload;

/// An envelope a node addressed to the network itself.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerierMessage {
    pub source: NodeId,
    pub call: RemoteCallIdentifier,
    pub payload: Payload,
}

pub struct LocalNetwork {
    descriptor: RwLock<NetworkDescriptor>,
    mailboxes: RwLock<HashMap<NodeId, mpsc::UnboundedSender<NodeEvent>>>,
    querier: Mutex<Option<mpsc::UnboundedSender<QuerierMessage>>>,
}

impl LocalNetwork {
    pub fn new(network_id: u32, hubs: u32, spokes: u32) -> Self {
        Self {
            descriptor: RwLock::new(NetworkDescriptor::new(network_id, hubs, spokes)),
            mailboxes: RwLock::new(HashMap::new()),
            querier: Mutex::new(None),
        }
    }

    /// Attaches a node's mailbox. Replaces any mailbox previously attached
    /// under the same id.
    pub fn attach(&self, handle: &NodeHandle) {
        debug!(node = %handle.id(), "attaching node");
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.id(), handle.sender());
    }

    pub fn detach(&self, id: NodeId) -> bool {
        debug!(node = %id, "detaching node");
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Starts collecting the envelopes nodes send to the network itself.
    /// A second subscription replaces the first.
    pub fn subscribe_querier(&self) -> mpsc::UnboundedReceiver<QuerierMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.querier.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    pub fn resize(&self, hubs: u32, spokes: u32) {
        let mut desc = self
            .descriptor
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        desc.hubs = hubs;
        desc.spokes = spokes;
    }

    fn deliver(&self, destination: NodeId, event: NodeEvent) -> Result<(), NetworkError> {
        let mailboxes = self.mailboxes.read().unwrap_or_else(PoisonError::into_inner);
        let mailbox = mailboxes.get(&destination).ok_or_else(|| {
            NetworkError::UnknownDestination(destination, self.describe().network_id)
        })?;
        mailbox
            .send(event)
            .map_err(|_| NetworkError::MailboxClosed(destination))
    }
}

impl Network for LocalNetwork {
    fn send(
        &self,
        source: NodeId,
        destination: Option<NodeId>,
        call: RemoteCallIdentifier,
        payload: Payload,
    ) -> Result<(), NetworkError> {
        trace!(%source, ?destination, %call, "send");
        match destination {
            Some(destination) => self.deliver(
                destination,
                NodeEvent::Message {
                    source,
                    call,
                    payload,
                },
            ),
            None => {
                let querier = self.querier.lock().unwrap_or_else(PoisonError::into_inner);
                let network_id = self.describe().network_id;
                let tx = querier.as_ref().ok_or(NetworkError::NoQuerier(network_id))?;
                tx.send(QuerierMessage {
                    source,
                    call,
                    payload,
                })
                .map_err(|_| NetworkError::NoQuerier(network_id))
            }
        }
    }

    fn broadcast(
        &self,
        source: NodeId,
        calls: BroadcastCalls,
        payload: Payload,
    ) -> Result<(), NetworkError> {
        trace!(%source, destinations = calls.len(), "broadcast");
        for (destination, call) in calls {
            self.deliver(
                destination,
                NodeEvent::Message {
                    source,
                    call,
                    payload: payload.clone(),
                },
            )?;
        }
        Ok(())
    }

    fn describe(&self) -> NetworkDescriptor {
        *self.descriptor.read().unwrap_or_else(PoisonError::into_inner)
    }
}
