//! A [`Network`] that records what it is asked to send instead of sending it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BroadcastCalls, Network, NetworkError};
use crate::ops::{CallKind, RemoteCallIdentifier};
use crate::sites::{NetworkDescriptor, NodeId};
use crate::value::Payload;

#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Unicast {
        source: NodeId,
        destination: Option<NodeId>,
        call: RemoteCallIdentifier,
        payload: Payload,
    },
    Broadcast {
        source: NodeId,
        calls: BroadcastCalls,
        payload: Payload,
    },
}

impl Sent {
    /// Flattens a broadcast into one unicast per destination.
    pub fn unicasts(&self) -> Vec<(Option<NodeId>, RemoteCallIdentifier, Payload)> {
        match self {
            Sent::Unicast {
                destination,
                call,
                payload,
                ..
            } => vec![(*destination, call.clone(), payload.clone())],
            Sent::Broadcast { calls, payload, .. } => calls
                .iter()
                .map(|(dest, call)| (Some(*dest), call.clone(), payload.clone()))
                .collect(),
        }
    }
}

pub struct RecordingNetwork {
    descriptor: Mutex<NetworkDescriptor>,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNetwork {
    pub fn new(network_id: u32, hubs: u32, spokes: u32) -> Self {
        Self {
            descriptor: Mutex::new(NetworkDescriptor::new(network_id, hubs, spokes)),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn resize(&self, hubs: u32, spokes: u32) {
        let mut desc = lock(&self.descriptor);
        desc.hubs = hubs;
        desc.spokes = spokes;
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Every envelope sent so far, broadcasts flattened, in send order.
    pub fn envelopes(&self) -> Vec<(Option<NodeId>, RemoteCallIdentifier, Payload)> {
        lock(&self.sent).iter().flat_map(Sent::unicasts).collect()
    }

    /// The response envelopes sent so far.
    pub fn responses(&self) -> Vec<(Option<NodeId>, RemoteCallIdentifier, Payload)> {
        self.envelopes()
            .into_iter()
            .filter(|(_, call, _)| call.kind() == CallKind::Response)
            .collect()
    }
}

impl Network for RecordingNetwork {
    fn send(
        &self,
        source: NodeId,
        destination: Option<NodeId>,
        call: RemoteCallIdentifier,
        payload: Payload,
    ) -> Result<(), NetworkError> {
        lock(&self.sent).push(Sent::Unicast {
            source,
            destination,
            call,
            payload,
        });
        Ok(())
    }

    fn broadcast(
        &self,
        source: NodeId,
        calls: BroadcastCalls,
        payload: Payload,
    ) -> Result<(), NetworkError> {
        lock(&self.sent).push(Sent::Broadcast {
            source,
            calls,
            payload,
        });
        Ok(())
    }

    fn describe(&self) -> NetworkDescriptor {
        *lock(&self.descriptor)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
