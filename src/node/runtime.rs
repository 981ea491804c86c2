use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, debug_span, trace, warn};

use super::context::NodeContext;
use super::error::{DispatchPath, HandlerError, ProtocolViolation, RuntimeError};
use super::NodeLogic;
use crate::deferred::{FuturePool, PromiseTable, Response, ResponseFuture};
use crate::net::Network;
use crate::ops::registry::Handler;
use crate::ops::{
    call::next_call_number, CallKind, CallNumber, InterfaceDecl, MethodRegistry,
    RemoteCallIdentifier, RemoteInterface,
};
use crate::sites::{NetworkDescriptor, NodeId};
use crate::value::Payload;

/// What every node of one type shares: the interface it calls on its peers,
/// the interface of the querier and its own handlers.
pub struct NodeBlueprint<N> {
    remote: InterfaceDecl,
    querier: InterfaceDecl,
    registry: MethodRegistry<N>,
}

impl<N> NodeBlueprint<N> {
    pub fn new(
        remote: InterfaceDecl,
        querier: InterfaceDecl,
        registry: MethodRegistry<N>,
    ) -> Self {
        Self {
            remote,
            querier,
            registry,
        }
    }

    pub fn remote(&self) -> &InterfaceDecl {
        &self.remote
    }

    pub fn querier(&self) -> &InterfaceDecl {
        &self.querier
    }

    pub fn registry(&self) -> &MethodRegistry<N> {
        &self.registry
    }
}

/// Runtime state of one node, everything but the user logic itself.
pub(crate) struct Core<N> {
    pub(super) id: NodeId,
    pub(super) network: Arc<dyn Network>,
    pub(super) descriptor: NetworkDescriptor,
    pub(super) remote: Arc<RemoteInterface>,
    pub(super) querier: Arc<RemoteInterface>,
    /// One entry per node of the opposite partition, by index.
    pub(super) peers: Vec<NodeId>,
    /// Unresolved futures by call number, then by responder index.
    pub(super) futures: HashMap<CallNumber, HashMap<u32, ResponseFuture<N>>>,
    /// Futures created by the running callback, not yet accounted for.
    pub(super) new_futures: Vec<ResponseFuture<N>>,
    /// Broadcast pools with no members, fired at the end of the callback.
    pub(super) empty_pools: Vec<FuturePool<N>>,
    pub(super) sync_futures: u64,
    pub(super) blocked: bool,
    pub(super) current_caller: Option<NodeId>,
    pub(super) current_call: Option<RemoteCallIdentifier>,
    pub(super) call_counter: CallNumber,
    pub(super) promises: PromiseTable,
}

impl<N> Core<N> {
    fn new(
        id: NodeId,
        network: Arc<dyn Network>,
        blueprint: &NodeBlueprint<N>,
    ) -> Result<Self, RuntimeError> {
        let descriptor = network.describe();
        let remote = RemoteInterface::new(&blueprint.remote, network.as_ref())?;
        let querier = RemoteInterface::new(&blueprint.querier, network.as_ref())?;
        let side = id.partition().opposite();
        let peers = (0..descriptor.peers_of(id.partition()))
            .map(|index| NodeId::new(side, index))
            .collect();
        Ok(Self {
            id,
            network,
            descriptor,
            remote: Arc::new(remote),
            querier: Arc::new(querier),
            peers,
            futures: HashMap::new(),
            new_futures: Vec::new(),
            empty_pools: Vec::new(),
            sync_futures: 0,
            blocked: false,
            current_caller: None,
            current_call: None,
            call_counter: 0,
            promises: PromiseTable::new(),
        })
    }

    /// Next call number not held by any unresolved future.
    pub(super) fn allocate_call_number(&mut self) -> CallNumber {
        while self
            .futures
            .get(&self.call_counter)
            .is_some_and(|pending| !pending.is_empty())
        {
            self.call_counter = next_call_number(self.call_counter);
        }
        let call_number = self.call_counter;
        self.call_counter = next_call_number(call_number);
        call_number
    }

    pub(super) fn block(&mut self) -> Result<(), ProtocolViolation> {
        if self.blocked {
            return Err(ProtocolViolation::AlreadyBlocked(self.id));
        }
        self.blocked = true;
        debug!(node = %self.id, pending = self.sync_futures, "blocked");
        Ok(())
    }

    pub(super) fn unblock(&mut self) -> Result<(), ProtocolViolation> {
        if !self.blocked {
            return Err(ProtocolViolation::AlreadyUnblocked(self.id));
        }
        self.blocked = false;
        debug!(node = %self.id, "unblocked");
        Ok(())
    }

    /// Accounts for the futures created by the last callback and blocks the
    /// node if any of them is synchronous.
    fn fold_new_futures(&mut self) -> Result<(), RuntimeError> {
        let created = std::mem::take(&mut self.new_futures);
        let sync = created.iter().filter(|future| future.account()).count() as u64;
        if sync > 0 {
            self.sync_futures += sync;
            trace!(
                node = %self.id,
                sync,
                total = self.sync_futures,
                "new synchronous futures"
            );
            if !self.blocked {
                self.block()?;
            }
        }
        Ok(())
    }

    fn respond(
        &mut self,
        source: NodeId,
        call: &RemoteCallIdentifier,
        response: Response,
    ) -> Result<(), RuntimeError> {
        match response {
            Response::Value(payload) => {
                trace!(node = %self.id, %source, %call, "answering");
                self.network
                    .send(self.id, Some(source), call.answer(), payload)?;
            }
            Response::Promised(batch) => batch.send()?,
            Response::Broadcast(rounds) => rounds.send()?,
            Response::Promise(_) | Response::Empty => {}
        }
        Ok(())
    }
}

/// Wraps one user node and dispatches everything that arrives for it.
///
/// A runtime without a node is empty: every dispatch is a no-op. Empty
/// runtimes stand in for instances that were merged away.
pub struct NodeRuntime<N: NodeLogic> {
    blueprint: Arc<NodeBlueprint<N>>,
    node: Option<N>,
    core: Core<N>,
    initialized: bool,
}

impl<N: NodeLogic> NodeRuntime<N> {
    /// Validates both interfaces against the network and wraps `node`.
    /// Does not run [`NodeLogic::init`].
    pub fn new(
        id: NodeId,
        node: N,
        network: Arc<dyn Network>,
        blueprint: Arc<NodeBlueprint<N>>,
    ) -> Result<Self, RuntimeError> {
        let core = Core::new(id, network, &blueprint)?;
        Ok(Self {
            blueprint,
            node: Some(node),
            core,
            initialized: false,
        })
    }

    /// [`new`](Self::new) followed by [`init`](Self::init).
    pub fn start(
        id: NodeId,
        node: N,
        network: Arc<dyn Network>,
        blueprint: Arc<NodeBlueprint<N>>,
    ) -> Result<Self, RuntimeError> {
        let mut runtime = Self::new(id, node, network, blueprint)?;
        runtime.init()?;
        Ok(runtime)
    }

    pub fn empty(
        id: NodeId,
        network: Arc<dyn Network>,
        blueprint: Arc<NodeBlueprint<N>>,
    ) -> Result<Self, RuntimeError> {
        let core = Core::new(id, network, &blueprint)?;
        Ok(Self {
            blueprint,
            node: None,
            core,
            initialized: false,
        })
    }

    /// Runs [`NodeLogic::init`]. Only the first call reaches the node.
    pub fn init(&mut self) -> Result<(), RuntimeError> {
        let span = debug_span!("init", node = %self.core.id);
        let _enter = span.enter();
        let Some(node) = self.node.as_mut() else {
            return Ok(());
        };
        if self.initialized {
            debug!("already initialized");
            return Ok(());
        }
        self.initialized = true;
        let mut ctx = NodeContext::new(&mut self.core);
        node.init(&mut ctx)
            .map_err(RuntimeError::handler(DispatchPath::Init))?;
        self.finish(DispatchPath::Init)
    }

    /// Hands a query to the node. Futures it creates are accounted for on
    /// the next dispatch.
    pub fn receive_query(
        &mut self,
        query_id: u64,
        query: Payload,
    ) -> Result<(), RuntimeError> {
        let span = debug_span!("receive_query", node = %self.core.id, query_id);
        let _enter = span.enter();
        let Some(node) = self.node.as_mut() else {
            return Ok(());
        };
        let network_id = self.core.network.describe().network_id;
        let mut ctx = NodeContext::new(&mut self.core);
        node.on_query(&mut ctx, query_id, network_id, query)
            .map_err(RuntimeError::handler(DispatchPath::Query))?;
        self.fire_empty_pools(DispatchPath::Query)
    }

    /// Dispatches one envelope from `source`: a response resolves the future
    /// waiting on it, a request runs the registered handler.
    pub fn receive_msg(
        &mut self,
        source: NodeId,
        call: RemoteCallIdentifier,
        payload: Payload,
    ) -> Result<(), RuntimeError> {
        let span =
            debug_span!("receive_msg", node = %self.core.id, %source, %call);
        let _enter = span.enter();
        if self.node.is_none() {
            return Ok(());
        }
        self.core.current_caller = Some(source);
        self.core.current_call = Some(call.clone());
        let dispatched = match call.kind() {
            CallKind::Response => {
                self.resolve(source, call.call_number(), payload)
            }
            CallKind::OneWay | CallKind::TwoWay => {
                self.dispatch_request(source, &call, payload)
            }
        };
        self.core.current_caller = None;
        self.core.current_call = None;
        dispatched?;
        self.finish(DispatchPath::Message)
    }

    /// Hands one stream tuple to the node. Blocking is the buffering
    /// decorator's concern; this always delivers.
    pub fn receive_tuple(&mut self, tuple: Payload) -> Result<(), RuntimeError> {
        let span = debug_span!("receive_tuple", node = %self.core.id);
        let _enter = span.enter();
        let Some(node) = self.node.as_mut() else {
            return Ok(());
        };
        let mut ctx = NodeContext::new(&mut self.core);
        node.on_tuple(&mut ctx, tuple)
            .map_err(RuntimeError::handler(DispatchPath::Tuple))?;
        self.finish(DispatchPath::Tuple)
    }

    /// Runs `work` against the node outside of any dispatch, then accounts
    /// for the futures it created. Returns `None` for an empty runtime.
    pub fn with_context<R>(
        &mut self,
        work: impl FnOnce(&mut N, &mut NodeContext<'_, N>) -> Result<R, HandlerError>,
    ) -> Result<Option<R>, RuntimeError> {
        let Some(node) = self.node.as_mut() else {
            return Ok(None);
        };
        let mut ctx = NodeContext::new(&mut self.core);
        let out = work(node, &mut ctx)
            .map_err(RuntimeError::handler(DispatchPath::Host))?;
        self.finish(DispatchPath::Host)?;
        Ok(Some(out))
    }

    /// Closes a callback: fires memberless pools, then accounts for the new
    /// futures.
    fn finish(&mut self, path: DispatchPath) -> Result<(), RuntimeError> {
        self.fire_empty_pools(path)?;
        self.core.fold_new_futures()
    }

    /// A broadcast to zero peers is complete as soon as it is made. Its
    /// continuation runs with no answers.
    fn fire_empty_pools(&mut self, path: DispatchPath) -> Result<(), RuntimeError> {
        let Some(node) = self.node.as_mut() else {
            return Ok(());
        };
        loop {
            let ready = std::mem::take(&mut self.core.empty_pools);
            if ready.is_empty() {
                return Ok(());
            }
            for pool in ready {
                let Some(continuation) = pool.take_ready() else {
                    continue;
                };
                trace!(node = %self.core.id, "firing memberless pool");
                let mut ctx = NodeContext::new(&mut self.core);
                continuation(node, &mut ctx, Vec::new())
                    .map_err(RuntimeError::handler(path))?;
            }
        }
    }

    fn resolve(
        &mut self,
        source: NodeId,
        call_number: CallNumber,
        payload: Payload,
    ) -> Result<(), RuntimeError> {
        let future = match self
            .core
            .futures
            .get(&call_number)
            .and_then(|pending| pending.get(&source.index()))
        {
            Some(future) => future.clone(),
            None => {
                warn!(
                    node = %self.core.id,
                    %source,
                    call_number,
                    "no future waits for this response"
                );
                return Ok(());
            }
        };
        if let Some(node) = self.node.as_mut() {
            let mut ctx = NodeContext::new(&mut self.core);
            future
                .resolve(node, &mut ctx, payload)
                .map_err(RuntimeError::handler(DispatchPath::Message))?;
        }
        if future.holds_node() {
            self.core.sync_futures -= 1;
            if self.core.sync_futures == 0 {
                self.core.unblock()?;
            }
        }
        if let Some(pending) = self.core.futures.get_mut(&call_number) {
            pending.remove(&source.index());
            if pending.is_empty() {
                self.core.futures.remove(&call_number);
            }
        }
        Ok(())
    }

    fn dispatch_request(
        &mut self,
        source: NodeId,
        call: &RemoteCallIdentifier,
        payload: Payload,
    ) -> Result<(), RuntimeError> {
        let operation = call
            .operation()
            .cloned()
            .ok_or(ProtocolViolation::MissingOperation)?;
        let id = self.core.id;
        let blueprint = Arc::clone(&self.blueprint);
        let registry = blueprint.registry();
        let Some(node) = self.node.as_mut() else {
            return Ok(());
        };
        let mut ctx = NodeContext::new(&mut self.core);
        let wrap = RuntimeError::handler(DispatchPath::Message);
        match (call.kind(), registry.get(&operation)) {
            (CallKind::TwoWay, Some(Handler::TwoWay(handler))) => {
                let response = handler(node, &mut ctx, payload).map_err(wrap)?;
                self.core.respond(source, call, response)
            }
            (CallKind::TwoWay, Some(Handler::OneWay(_))) => {
                Err(ProtocolViolation::MissingResponse(operation).into())
            }
            (CallKind::OneWay, Some(Handler::OneWay(handler))) => {
                handler(node, &mut ctx, payload).map_err(wrap)
            }
            (CallKind::OneWay, Some(Handler::TwoWay(handler))) => {
                match handler(node, &mut ctx, payload).map_err(wrap)? {
                    Response::Empty => Ok(()),
                    _ => Err(ProtocolViolation::ResponseOnOneWay(operation).into()),
                }
            }
            (CallKind::OneWay, None) => match registry.default_handler() {
                Some(handler) => handler(node, &mut ctx, payload).map_err(wrap),
                None => Err(RuntimeError::UnknownOperation {
                    node: id,
                    operation,
                }),
            },
            (_, None) => Err(RuntimeError::UnknownOperation {
                node: id,
                operation,
            }),
            (CallKind::Response, Some(_)) => Ok(()),
        }
    }

    /// Folds the nodes of `peers` into this one. Runtimes without a node
    /// contribute nothing.
    pub fn merge(&mut self, peers: Vec<NodeRuntime<N>>) -> Result<(), RuntimeError> {
        let span = debug_span!("merge", node = %self.core.id, peers = peers.len());
        let _enter = span.enter();
        let Some(node) = self.node.as_mut() else {
            return Ok(());
        };
        let peers: Vec<N> = peers.into_iter().filter_map(|peer| peer.node).collect();
        let mut ctx = NodeContext::new(&mut self.core);
        node.on_merge(&mut ctx, peers)
            .map_err(RuntimeError::handler(DispatchPath::Merge))?;
        self.finish(DispatchPath::Merge)
    }

    /// Takes over the identity, node, network, promises and call counter of
    /// `peers[index]`, then merges the remaining peers into it. Futures of
    /// the replaced instance are dropped.
    pub fn merge_into(
        &mut self,
        index: usize,
        mut peers: Vec<NodeRuntime<N>>,
    ) -> Result<(), RuntimeError> {
        if index >= peers.len() {
            return Err(RuntimeError::MergeIndex {
                index,
                len: peers.len(),
            });
        }
        let NodeRuntime {
            blueprint,
            node,
            core,
            initialized,
        } = peers.remove(index);
        let mut adopted = Core::new(core.id, core.network, &blueprint)?;
        adopted.promises = core.promises;
        adopted.call_counter = core.call_counter;
        debug!(from = %self.core.id, to = %adopted.id, "adopting merged identity");
        self.blueprint = blueprint;
        self.node = node;
        self.core = adopted;
        self.initialized = initialized;
        self.merge(peers)
    }

    /// Installs `node` under identity `id` on `network`, then merges `peers`
    /// into it.
    pub fn merge_as(
        &mut self,
        id: NodeId,
        node: N,
        network: Arc<dyn Network>,
        peers: Vec<NodeRuntime<N>>,
    ) -> Result<(), RuntimeError> {
        self.core = Core::new(id, network, &self.blueprint)?;
        self.node = Some(node);
        self.initialized = true;
        self.merge(peers)
    }

    pub fn node_id(&self) -> NodeId {
        self.core.id
    }

    pub fn node(&self) -> Option<&N> {
        self.node.as_ref()
    }

    pub fn node_mut(&mut self) -> Option<&mut N> {
        self.node.as_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.core.network
    }

    pub fn is_blocked(&self) -> bool {
        self.core.blocked
    }

    /// Unresolved synchronous futures.
    pub fn pending_sync(&self) -> u64 {
        self.core.sync_futures
    }

    /// Call numbers with at least one unresolved future.
    pub fn pending_calls(&self) -> usize {
        self.core.futures.len()
    }

    pub fn call_counter(&self) -> CallNumber {
        self.core.call_counter
    }

    pub fn set_call_counter(&mut self, counter: CallNumber) {
        self.core.call_counter = counter;
    }
}
