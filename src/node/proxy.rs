use std::sync::Arc;

use tracing::trace;

use super::error::RuntimeError;
use super::runtime::Core;
use crate::deferred::{FuturePool, ResponseFuture};
use crate::net::BroadcastCalls;
use crate::ops::{OperationStub, RemoteCallIdentifier, RemoteInterface};
use crate::sites::NodeId;
use crate::value::Payload;

/// Who a proxy talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// One peer of the opposite partition.
    Direct(NodeId),
    /// The network itself, on behalf of the querier.
    Null,
    /// Every peer of the opposite partition.
    Wildcard,
}

/// What an outbound call leaves the caller holding.
pub enum CallHandle<N> {
    Sent,
    Future(ResponseFuture<N>),
    Pool(FuturePool<N>),
}

impl<N> CallHandle<N> {
    pub fn into_future(self) -> Option<ResponseFuture<N>> {
        match self {
            CallHandle::Future(future) => Some(future),
            _ => None,
        }
    }

    pub fn into_pool(self) -> Option<FuturePool<N>> {
        match self {
            CallHandle::Pool(pool) => Some(pool),
            _ => None,
        }
    }
}

/// Outbound stub for a validated remote interface.
///
/// Every proxy of a node shares the node's call counter, so call numbers
/// never collide across targets.
pub struct Proxy<'a, N> {
    core: &'a mut Core<N>,
    interface: Arc<RemoteInterface>,
    target: Target,
}

impl<'a, N> Proxy<'a, N> {
    pub(crate) fn new(
        core: &'a mut Core<N>,
        interface: Arc<RemoteInterface>,
        target: Target,
    ) -> Self {
        Self {
            core,
            interface,
            target,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Calls `operation` on the target. Two-way operations register a future
    /// per addressed peer; the runtime folds them into its blocking count once
    /// the current callback returns.
    pub fn call(
        &mut self,
        operation: &str,
        payload: Payload,
    ) -> Result<CallHandle<N>, RuntimeError> {
        let stub = self
            .interface
            .operation(operation)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownRemoteOperation {
                interface: self.interface.name().to_owned(),
                operation: operation.to_owned(),
            })?;
        match self.target {
            Target::Direct(peer) => self.call_peer(peer, stub, payload),
            Target::Null => {
                trace!(node = %self.core.id, operation, "calling the querier");
                self.core.network.send(
                    self.core.id,
                    None,
                    RemoteCallIdentifier::one_way(stub.id),
                    payload,
                )?;
                Ok(CallHandle::Sent)
            }
            Target::Wildcard => self.call_all(stub, payload),
        }
    }

    /// Calls an operation for its side effects only.
    pub fn send(&mut self, operation: &str, payload: Payload) -> Result<(), RuntimeError> {
        self.call(operation, payload).map(drop)
    }

    /// Calls a two-way operation on a single peer.
    pub fn request(
        &mut self,
        operation: &str,
        payload: Payload,
    ) -> Result<ResponseFuture<N>, RuntimeError> {
        self.call(operation, payload)?
            .into_future()
            .ok_or_else(|| RuntimeError::NoFuture {
                operation: operation.to_owned(),
            })
    }

    /// Calls a two-way operation on every peer.
    pub fn request_all(
        &mut self,
        operation: &str,
        payload: Payload,
    ) -> Result<FuturePool<N>, RuntimeError> {
        self.call(operation, payload)?
            .into_pool()
            .ok_or_else(|| RuntimeError::NoFuture {
                operation: operation.to_owned(),
            })
    }

    fn call_peer(
        &mut self,
        peer: NodeId,
        stub: OperationStub,
        payload: Payload,
    ) -> Result<CallHandle<N>, RuntimeError> {
        let core = &mut *self.core;
        if !stub.expects_response {
            trace!(node = %core.id, %peer, operation = %stub.id, "one-way call");
            core.network
                .send(core.id, Some(peer), RemoteCallIdentifier::one_way(stub.id), payload)?;
            return Ok(CallHandle::Sent);
        }
        let call_number = core.allocate_call_number();
        trace!(node = %core.id, %peer, operation = %stub.id, call_number, "two-way call");
        core.network.send(
            core.id,
            Some(peer),
            RemoteCallIdentifier::two_way(stub.id, call_number),
            payload,
        )?;
        let future = ResponseFuture::new();
        core.futures
            .entry(call_number)
            .or_default()
            .insert(peer.index(), future.clone());
        core.new_futures.push(future.clone());
        Ok(CallHandle::Future(future))
    }

    fn call_all(
        &mut self,
        stub: OperationStub,
        payload: Payload,
    ) -> Result<CallHandle<N>, RuntimeError> {
        let core = &mut *self.core;
        let side = core.id.partition().opposite();
        let peers = core.network.describe().peers_of(core.id.partition());
        if !stub.expects_response {
            trace!(node = %core.id, peers, operation = %stub.id, "one-way broadcast");
            let call = RemoteCallIdentifier::one_way(stub.id);
            let calls: BroadcastCalls = (0..peers)
                .map(|i| (NodeId::new(side, i), call.clone()))
                .collect();
            core.network.broadcast(core.id, calls, payload)?;
            return Ok(CallHandle::Sent);
        }
        let call_number = core.allocate_call_number();
        trace!(
            node = %core.id,
            peers,
            operation = %stub.id,
            call_number,
            "two-way broadcast"
        );
        let call = RemoteCallIdentifier::two_way(stub.id, call_number);
        let calls: BroadcastCalls = (0..peers)
            .map(|i| (NodeId::new(side, i), call.clone()))
            .collect();
        core.network.broadcast(core.id, calls, payload)?;
        let members: Vec<ResponseFuture<N>> =
            (0..peers).map(|_| ResponseFuture::new()).collect();
        if !members.is_empty() {
            let pending = core.futures.entry(call_number).or_default();
            for (index, member) in (0..peers).zip(&members) {
                pending.insert(index, member.clone());
            }
        }
        core.new_futures.extend(members.iter().cloned());
        let pool = FuturePool::new(members);
        if pool.is_empty() {
            core.empty_pools.push(pool.clone());
        }
        Ok(CallHandle::Pool(pool))
    }
}
