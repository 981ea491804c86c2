use std::sync::Arc;

use tracing::{debug_span, trace};

use super::buffer::{BufferConfig, DataBuffer};
use super::error::RuntimeError;
use super::runtime::NodeRuntime;
use super::NodeLogic;
use crate::net::Network;
use crate::ops::RemoteCallIdentifier;
use crate::sites::NodeId;
use crate::value::Payload;

/// A [`NodeRuntime`] that holds stream tuples back while its node is
/// blocked and replays them, in arrival order, once it is not.
pub struct BufferedRuntime<N: NodeLogic> {
    runtime: NodeRuntime<N>,
    buffer: DataBuffer<Payload>,
    config: BufferConfig,
    mean_buffer_size: f64,
    samples: u64,
}

impl<N: NodeLogic> BufferedRuntime<N> {
    pub fn new(runtime: NodeRuntime<N>, config: BufferConfig) -> Self {
        Self {
            runtime,
            buffer: DataBuffer::new(config),
            config,
            mean_buffer_size: 0.0,
            samples: 0,
        }
    }

    pub fn receive_tuple(&mut self, tuple: Payload) -> Result<(), RuntimeError> {
        if self.runtime.is_blocked() {
            if self.buffer.push(tuple).is_some() {
                trace!(node = %self.runtime.node_id(), "buffer full, evicted oldest tuple");
            }
        } else if self.buffer.is_empty() {
            self.runtime.receive_tuple(tuple)?;
        } else {
            self.buffer.push(tuple);
            self.drain()?;
        }
        self.samples += 1;
        self.mean_buffer_size +=
            (self.buffer.len() as f64 - self.mean_buffer_size) / self.samples as f64;
        Ok(())
    }

    pub fn receive_msg(
        &mut self,
        source: NodeId,
        call: RemoteCallIdentifier,
        payload: Payload,
    ) -> Result<(), RuntimeError> {
        self.runtime.receive_msg(source, call, payload)?;
        self.drain()
    }

    pub fn receive_query(&mut self, query_id: u64, query: Payload) -> Result<(), RuntimeError> {
        self.runtime.receive_query(query_id, query)?;
        self.drain()
    }

    /// Replays buffered tuples if the node is no longer blocked.
    pub fn toggle(&mut self) -> Result<(), RuntimeError> {
        self.drain()
    }

    fn drain(&mut self) -> Result<(), RuntimeError> {
        if self.buffer.is_empty() || self.runtime.is_blocked() {
            return Ok(());
        }
        let span = debug_span!(
            "drain",
            node = %self.runtime.node_id(),
            buffered = self.buffer.len()
        );
        let _enter = span.enter();
        while !self.runtime.is_blocked() {
            let Some(tuple) = self.buffer.pop() else {
                break;
            };
            self.runtime.receive_tuple(tuple)?;
        }
        Ok(())
    }

    /// Merges the peers' nodes into this one and interleaves every buffer,
    /// this runtime's first.
    pub fn merge(&mut self, peers: Vec<BufferedRuntime<N>>) -> Result<(), RuntimeError> {
        let (runtimes, buffers) = split(peers);
        self.runtime.merge(runtimes)?;
        self.absorb(buffers);
        self.drain()
    }

    /// Adopts `peers[index]` through [`NodeRuntime::merge_into`] and merges
    /// the rest. No buffered tuple is lost: this runtime's buffer leads the
    /// interleave, followed by every peer's in order.
    pub fn merge_into(
        &mut self,
        index: usize,
        peers: Vec<BufferedRuntime<N>>,
    ) -> Result<(), RuntimeError> {
        let (runtimes, buffers) = split(peers);
        self.runtime.merge_into(index, runtimes)?;
        self.absorb(buffers);
        self.drain()
    }

    pub fn merge_as(
        &mut self,
        id: NodeId,
        node: N,
        network: Arc<dyn Network>,
        peers: Vec<BufferedRuntime<N>>,
    ) -> Result<(), RuntimeError> {
        let (runtimes, buffers) = split(peers);
        self.runtime.merge_as(id, node, network, runtimes)?;
        self.absorb(buffers);
        self.drain()
    }

    fn absorb(&mut self, buffers: Vec<DataBuffer<Payload>>) {
        let own = std::mem::replace(&mut self.buffer, DataBuffer::new(self.config));
        let all = std::iter::once(own).chain(buffers).collect();
        self.buffer = DataBuffer::interleave(all, self.config);
    }

    pub fn runtime(&self) -> &NodeRuntime<N> {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut NodeRuntime<N> {
        &mut self.runtime
    }

    pub fn buffer(&self) -> &DataBuffer<Payload> {
        &self.buffer
    }

    /// Running mean of the buffer length, sampled after every tuple.
    pub fn mean_buffer_size(&self) -> f64 {
        self.mean_buffer_size
    }

    pub fn into_parts(self) -> (NodeRuntime<N>, DataBuffer<Payload>) {
        (self.runtime, self.buffer)
    }
}

fn split<N: NodeLogic>(
    peers: Vec<BufferedRuntime<N>>,
) -> (Vec<NodeRuntime<N>>, Vec<DataBuffer<Payload>>) {
    peers.into_iter().map(BufferedRuntime::into_parts).unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Response;
    use crate::net::testing::RecordingNetwork;
    use crate::node::{HandlerError, NodeBlueprint, NodeContext};
    use crate::ops::{InterfaceDecl, MethodRegistry, OperationDecl};
    use crate::value::{Value, ValueKind};

    #[derive(Default)]
    struct Learner {
        seen: Vec<i64>,
        peers: usize,
        sync_on_merge: bool,
    }

    impl NodeLogic for Learner {
        fn on_tuple(
            &mut self,
            ctx: &mut NodeContext<'_, Self>,
            tuple: Payload,
        ) -> Result<(), HandlerError> {
            let n = tuple.first().and_then(Value::as_int).unwrap_or_default();
            self.seen.push(n);
            if n < 0 {
                // negative tuples wait on two synchronous pulls
                for hub in 0..2 {
                    ctx.proxy(hub)?.request("pull", vec![])?.set_sync()?;
                }
            }
            Ok(())
        }

        fn on_merge(
            &mut self,
            ctx: &mut NodeContext<'_, Self>,
            peers: Vec<Self>,
        ) -> Result<(), HandlerError> {
            self.peers += peers.len();
            if self.sync_on_merge {
                ctx.proxy(0)?.request("pull", vec![])?.set_sync()?;
            }
            Ok(())
        }
    }

    fn blueprint() -> Arc<NodeBlueprint<Learner>> {
        let hub = InterfaceDecl::new("Hub")
            .operation(OperationDecl::two_way("pull"))
            .operation(OperationDecl::one_way("push").param(ValueKind::Int));
        let own = InterfaceDecl::new("Spoke").operation(OperationDecl::two_way("size"));
        let registry = MethodRegistry::builder(&own)
            .two_way("size", |node: &mut Learner, _, _| {
                Ok(Response::single(node.seen.len() as i64))
            })
            .build()
            .unwrap();
        Arc::new(NodeBlueprint::new(hub, InterfaceDecl::new("Querier"), registry))
    }

    fn buffered(
        net: &Arc<RecordingNetwork>,
        index: u32,
        capacity: usize,
    ) -> BufferedRuntime<Learner> {
        let network: Arc<dyn Network> = net.clone();
        let id = NodeId::spoke(index);
        let runtime =
            NodeRuntime::start(id, Learner::default(), network, blueprint()).unwrap();
        BufferedRuntime::new(runtime, BufferConfig::builder().capacity(capacity).build())
    }

    fn tuple(n: i64) -> Payload {
        vec![Value::Int(n)]
    }

    #[test]
    fn tuples_wait_until_every_sync_answer_arrives() {
        let net = Arc::new(RecordingNetwork::new(0, 2, 1));
        let mut node = buffered(&net, 0, 8);
        node.receive_tuple(tuple(-1)).unwrap();
        assert!(node.runtime().is_blocked());

        node.receive_tuple(tuple(1)).unwrap();
        assert_eq!(node.buffer().len(), 1);

        let calls = net.envelopes();
        node.receive_msg(NodeId::hub(1), calls[1].1.answer(), vec![])
            .unwrap();
        assert!(node.runtime().is_blocked());
        assert_eq!(node.runtime().node().unwrap().seen, vec![-1]);

        node.receive_msg(NodeId::hub(0), calls[0].1.answer(), vec![])
            .unwrap();
        assert!(!node.runtime().is_blocked());
        assert_eq!(node.runtime().node().unwrap().seen, vec![-1, 1]);
        assert!(node.buffer().is_empty());
    }

    #[test]
    fn drain_stops_when_a_tuple_blocks_again() {
        let net = Arc::new(RecordingNetwork::new(0, 2, 1));
        let mut node = buffered(&net, 0, 8);
        node.receive_tuple(tuple(-1)).unwrap();
        for n in [2, -3, 4] {
            node.receive_tuple(tuple(n)).unwrap();
        }
        for (dest, call, _) in net.take().iter().flat_map(|s| s.unicasts()) {
            node.receive_msg(dest.unwrap(), call.answer(), vec![]).unwrap();
        }
        assert!(node.runtime().is_blocked());
        assert_eq!(node.runtime().node().unwrap().seen, vec![-1, 2, -3]);
        let held: Vec<Payload> = node.buffer().iter().cloned().collect();
        assert_eq!(held, vec![tuple(4)]);
    }

    #[test]
    fn overflow_keeps_the_most_recent() {
        let net = Arc::new(RecordingNetwork::new(0, 2, 1));
        let mut node = buffered(&net, 0, 3);
        node.receive_tuple(tuple(-1)).unwrap();
        for n in 1..=4 {
            node.receive_tuple(tuple(n)).unwrap();
        }
        let held: Vec<Payload> = node.buffer().iter().cloned().collect();
        assert_eq!(held, vec![tuple(2), tuple(3), tuple(4)]);
        assert!(node.mean_buffer_size() > 0.0);
    }

    #[test]
    fn messages_and_queries_are_not_gated() {
        let net = Arc::new(RecordingNetwork::new(0, 2, 1));
        let mut node = buffered(&net, 0, 8);
        node.receive_tuple(tuple(-1)).unwrap();
        net.take();
        let size = InterfaceDecl::new("Spoke")
            .operation(OperationDecl::two_way("size"))
            .find("size")
            .unwrap()
            .id();
        let call = RemoteCallIdentifier::two_way(size, 5);
        node.receive_msg(NodeId::hub(0), call, vec![]).unwrap();
        node.receive_query(1, vec![]).unwrap();
        assert_eq!(net.responses().len(), 1);
        assert!(node.runtime().is_blocked());
    }

    #[test]
    fn merged_buffers_interleave() {
        let net = Arc::new(RecordingNetwork::new(0, 2, 3));
        let blocked = |index, tuples: &[i64]| {
            let mut node = buffered(&net, index, 16);
            node.receive_tuple(tuple(-1)).unwrap();
            for n in tuples {
                node.receive_tuple(tuple(*n)).unwrap();
            }
            node
        };
        let mut survivor = blocked(0, &[1, 2]);
        survivor
            .merge_into(0, vec![blocked(1, &[3]), blocked(2, &[])])
            .unwrap();
        let runtime = survivor.runtime();
        assert_eq!(runtime.node_id(), NodeId::spoke(1));
        assert_eq!(runtime.node().unwrap().peers, 1);
        // the adopted node starts unblocked, so the merged backlog replays
        assert_eq!(runtime.node().unwrap().seen, vec![-1, 1, 3, 2]);
        assert!(survivor.buffer().is_empty());
    }

    #[test]
    fn merged_backlog_waits_for_a_sync_request_made_by_merge() {
        let net = Arc::new(RecordingNetwork::new(0, 2, 3));
        let blocked = |index, tuples: &[i64]| {
            let mut node = buffered(&net, index, 16);
            node.receive_tuple(tuple(-1)).unwrap();
            for n in tuples {
                node.receive_tuple(tuple(*n)).unwrap();
            }
            node
        };
        let peers = vec![blocked(1, &[1, 2]), blocked(2, &[3])];
        let mut survivor = buffered(&net, 0, 16);
        net.take();
        survivor.runtime_mut().node_mut().unwrap().sync_on_merge = true;

        survivor.merge(peers).unwrap();
        assert!(survivor.runtime().is_blocked());
        assert_eq!(survivor.runtime().pending_sync(), 1);
        assert_eq!(survivor.runtime().node().unwrap().peers, 2);
        assert!(survivor.runtime().node().unwrap().seen.is_empty());
        let held: Vec<Payload> = survivor.buffer().iter().cloned().collect();
        assert_eq!(held, vec![tuple(1), tuple(3), tuple(2)]);

        let calls = net.envelopes();
        assert_eq!(calls.len(), 1);
        survivor
            .receive_msg(NodeId::hub(0), calls[0].1.answer(), vec![])
            .unwrap();
        assert!(!survivor.runtime().is_blocked());
        assert_eq!(survivor.runtime().node().unwrap().seen, vec![1, 3, 2]);
        assert!(survivor.buffer().is_empty());
    }
}
