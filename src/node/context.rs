use std::sync::Arc;

use super::error::{ProtocolViolation, RuntimeError};
use super::proxy::{Proxy, Target};
use super::runtime::Core;
use crate::deferred::{
    BroadcastResponses, Promise, PromiseId, PromiseTicket, PromisedResponses,
};
use crate::ops::{CallKind, RemoteCallIdentifier};
use crate::sites::NodeId;
use crate::value::Payload;

/// Everything user logic can reach from inside a callback: the node's
/// identity, proxies to its peers and the querier, its promises and its
/// flow-control state.
pub struct NodeContext<'a, N> {
    core: &'a mut Core<N>,
}

impl<'a, N> NodeContext<'a, N> {
    pub(crate) fn new(core: &'a mut Core<N>) -> Self {
        Self { core }
    }

    pub fn node_id(&self) -> NodeId {
        self.core.id
    }

    pub fn network_id(&self) -> u32 {
        self.core.descriptor.network_id
    }

    pub fn hubs(&self) -> u32 {
        self.core.descriptor.hubs
    }

    pub fn spokes(&self) -> u32 {
        self.core.descriptor.spokes
    }

    /// Size of the proxy set: the nodes of the opposite partition.
    pub fn peer_count(&self) -> u32 {
        self.core.peers.len() as u32
    }

    /// Proxy to one peer of the opposite partition.
    pub fn proxy(&mut self, index: u32) -> Result<Proxy<'_, N>, RuntimeError> {
        let target = *self
            .core
            .peers
            .get(index as usize)
            .ok_or(RuntimeError::UnknownPeer {
                node: self.core.id,
                index,
            })?;
        let interface = Arc::clone(&self.core.remote);
        Ok(Proxy::new(self.core, interface, Target::Direct(target)))
    }

    /// Proxy fanning out to every peer of the opposite partition.
    pub fn broadcast(&mut self) -> Proxy<'_, N> {
        let interface = Arc::clone(&self.core.remote);
        Proxy::new(self.core, interface, Target::Wildcard)
    }

    /// Proxy answering the querier through the network.
    pub fn querier(&mut self) -> Proxy<'_, N> {
        let interface = Arc::clone(&self.core.querier);
        Proxy::new(self.core, interface, Target::Null)
    }

    /// The peer whose message is being dispatched.
    pub fn current_caller(&self) -> Option<NodeId> {
        self.core.current_caller
    }

    pub fn current_call(&self) -> Option<&RemoteCallIdentifier> {
        self.core.current_call.as_ref()
    }

    fn awaiting_caller(&self) -> Result<(NodeId, u64), ProtocolViolation> {
        match (&self.core.current_caller, &self.core.current_call) {
            (Some(caller), Some(call)) if call.kind() == CallKind::TwoWay => {
                Ok((*caller, call.call_number()))
            }
            _ => Err(ProtocolViolation::NotAwaitingAnswer),
        }
    }

    /// Defers the answer to the current two-way call. Settle it later with
    /// [`fulfill_promise`](Self::fulfill_promise) or as part of a batch.
    pub fn make_promise(&mut self) -> Result<PromiseTicket, RuntimeError> {
        let (caller, call_number) = self.awaiting_caller()?;
        let promise = Promise::new(
            Arc::clone(&self.core.network),
            self.core.id,
            caller,
            call_number,
        );
        Ok(self.core.promises.insert(caller.index(), promise))
    }

    /// Defers the answer to the current two-way call until an answer for the
    /// whole broadcast round is known.
    pub fn make_broadcast_promise(&mut self) -> Result<PromiseTicket, RuntimeError> {
        let (caller, call_number) = self.awaiting_caller()?;
        let promise = Promise::new(
            Arc::clone(&self.core.network),
            self.core.id,
            caller,
            call_number,
        );
        Ok(self.core.promises.insert_broadcast(caller.index(), promise))
    }

    /// Sends the answer to one promise and forgets it.
    pub fn fulfill_promise(
        &mut self,
        caller: u32,
        promise: PromiseId,
        answer: Payload,
    ) -> Result<(), RuntimeError> {
        let promise = self.core.promises.take(caller, promise)?;
        promise.answer(answer)?;
        Ok(())
    }

    /// Pairs every promise made to `caller` with an answer, in creation
    /// order. The batch is sent when returned from a two-way operation or
    /// through [`PromisedResponses::send`].
    pub fn fulfill_promises(
        &mut self,
        caller: u32,
        answers: Vec<Payload>,
    ) -> Result<PromisedResponses, RuntimeError> {
        Ok(self.core.promises.settle(caller, answers)?)
    }

    /// [`fulfill_promises`](Self::fulfill_promises) for the current caller.
    pub fn fulfill_current_caller(
        &mut self,
        answers: Vec<Payload>,
    ) -> Result<PromisedResponses, RuntimeError> {
        let caller = self
            .core
            .current_caller
            .ok_or(ProtocolViolation::NotAwaitingAnswer)?;
        self.fulfill_promises(caller.index(), answers)
    }

    /// Settles the current broadcast round, one fan-out per answer.
    pub fn fulfill_broadcast_promises(
        &mut self,
        answers: Vec<Payload>,
    ) -> Result<BroadcastResponses, RuntimeError> {
        let network = Arc::clone(&self.core.network);
        Ok(self
            .core
            .promises
            .settle_broadcast(network, self.core.id, answers)?)
    }

    pub fn pending_promises(&self, caller: u32) -> usize {
        self.core.promises.pending(caller)
    }

    pub fn is_blocked(&self) -> bool {
        self.core.blocked
    }

    /// Stops stream processing until [`unblock_stream`](Self::unblock_stream).
    pub fn block_stream(&mut self) -> Result<(), RuntimeError> {
        Ok(self.core.block()?)
    }

    pub fn unblock_stream(&mut self) -> Result<(), RuntimeError> {
        Ok(self.core.unblock()?)
    }
}
