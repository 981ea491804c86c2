use std::sync::Arc;

use bipartite::net::{LocalNetwork, QuerierMessage};
use bipartite::node::host::{self, NodeHandle, NodeTask};
use bipartite::node::{BufferConfig, NodeBlueprint};
use bipartite::{
    BufferedRuntime, HandlerError, InterfaceDecl, MethodRegistry, Network, NodeContext, NodeId,
    NodeLogic, NodeRuntime, OperationDecl, Payload, RemoteCallIdentifier, Response, Value,
    ValueKind,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Answers pulls only when told to.
#[derive(Default)]
struct Gate {
    waiting: Vec<u32>,
    level: i64,
    inits: u32,
}

impl NodeLogic for Gate {
    fn init(&mut self, _: &mut NodeContext<'_, Self>) -> Result<(), HandlerError> {
        self.inits += 1;
        Ok(())
    }

    fn on_tuple(&mut self, _: &mut NodeContext<'_, Self>, _: Payload) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_merge(
        &mut self,
        _: &mut NodeContext<'_, Self>,
        _: Vec<Self>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Default)]
struct Reader {
    seen: Vec<Payload>,
    levels: Vec<i64>,
}

impl NodeLogic for Reader {
    fn on_query(
        &mut self,
        ctx: &mut NodeContext<'_, Self>,
        _: u64,
        _: u32,
        _: Payload,
    ) -> Result<(), HandlerError> {
        let blocked = ctx.is_blocked();
        ctx.querier()
            .send("report", vec![Value::Int(self.seen.len() as i64), Value::Bool(blocked)])?;
        Ok(())
    }

    fn on_tuple(
        &mut self,
        ctx: &mut NodeContext<'_, Self>,
        tuple: Payload,
    ) -> Result<(), HandlerError> {
        let wants_sync = tuple.first().and_then(Value::as_text) == Some("sync");
        self.seen.push(tuple);
        if wants_sync {
            ctx.broadcast()
                .request_all("pull", vec![])?
                .then_sync(|reader, _, answers| {
                    reader
                        .levels
                        .extend(answers.iter().filter_map(|a| a.first().and_then(Value::as_int)));
                    Ok(())
                })?;
        }
        Ok(())
    }

    fn on_merge(
        &mut self,
        _: &mut NodeContext<'_, Self>,
        _: Vec<Self>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

fn gate_interface() -> InterfaceDecl {
    InterfaceDecl::new("Gate")
        .operation(OperationDecl::two_way("pull"))
        .operation(OperationDecl::one_way("release").param(ValueKind::Int))
}

fn querier() -> InterfaceDecl {
    InterfaceDecl::new("Querier").operation(
        OperationDecl::one_way("report")
            .param(ValueKind::Int)
            .param(ValueKind::Bool),
    )
}

fn gate_blueprint() -> Arc<NodeBlueprint<Gate>> {
    let registry = MethodRegistry::builder(&gate_interface())
        .two_way("pull", |gate: &mut Gate, ctx, _| {
            let caller = ctx.current_caller().ok_or("pull without a caller")?;
            gate.waiting.push(caller.index());
            ctx.make_promise()?;
            Ok(Response::Empty)
        })
        .one_way("release", |gate, ctx, payload| {
            gate.level = payload.first().and_then(Value::as_int).unwrap_or(0);
            for caller in std::mem::take(&mut gate.waiting) {
                ctx.fulfill_promises(caller, vec![vec![Value::Int(gate.level)]])?
                    .send()?;
            }
            Ok(())
        })
        .build()
        .unwrap();
    Arc::new(NodeBlueprint::new(
        InterfaceDecl::new("Reader"),
        querier(),
        registry,
    ))
}

fn reader_blueprint() -> Arc<NodeBlueprint<Reader>> {
    Arc::new(NodeBlueprint::new(
        gate_interface(),
        querier(),
        MethodRegistry::empty("Reader"),
    ))
}

struct Topology {
    network: Arc<LocalNetwork>,
    reports: UnboundedReceiver<QuerierMessage>,
    hubs: Vec<(NodeHandle, NodeTask<Gate>)>,
    spokes: Vec<(NodeHandle, NodeTask<Reader>)>,
}

fn topology(hubs: u32, spokes: u32) -> Topology {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let network = Arc::new(LocalNetwork::new(3, hubs, spokes));
    let reports = network.subscribe_querier();
    let shared: Arc<dyn Network> = network.clone();
    let gates = gate_blueprint();
    let readers = reader_blueprint();
    let hubs = (0..hubs)
        .map(|i| {
            let id = NodeId::hub(i);
            let rt = NodeRuntime::start(id, Gate::default(), shared.clone(), gates.clone())
                .unwrap();
            let hosted = host::spawn(BufferedRuntime::new(rt, BufferConfig::default()));
            network.attach(&hosted.0);
            hosted
        })
        .collect();
    let spokes = (0..spokes)
        .map(|i| {
            let id = NodeId::spoke(i);
            let rt =
                NodeRuntime::start(id, Reader::default(), shared.clone(), readers.clone())
                    .unwrap();
            let hosted = host::spawn(BufferedRuntime::new(rt, BufferConfig::default()));
            network.attach(&hosted.0);
            hosted
        })
        .collect();
    Topology {
        network,
        reports,
        hubs,
        spokes,
    }
}

async fn report(topology: &mut Topology, spoke: usize) -> (i64, bool) {
    topology.spokes[spoke].0.query(0, vec![]).unwrap();
    let msg = topology.reports.recv().await.unwrap();
    assert_eq!(msg.source, NodeId::spoke(spoke as u32));
    let seen = msg.payload[0].as_int().unwrap();
    (seen, msg.payload[1] == Value::Bool(true))
}

fn release(topology: &Topology, hub: u32, level: i64) {
    let id = gate_interface().find("release").unwrap().id();
    topology
        .network
        .send(
            NodeId::spoke(99),
            Some(NodeId::hub(hub)),
            RemoteCallIdentifier::one_way(id),
            vec![Value::Int(level)],
        )
        .unwrap();
}

#[tokio::test]
async fn blocked_reader_resumes_after_every_hub_answers(
) -> Result<(), Box<dyn std::error::Error>> {
    let mut topology = topology(2, 1);
    let reader = topology.spokes[0].0.clone();
    reader.tuple(vec![Value::Text("sync".into())])?;
    reader.tuple(vec![Value::Int(1)])?;
    reader.tuple(vec![Value::Int(2)])?;

    assert_eq!(report(&mut topology, 0).await, (1, true));

    release(&topology, 1, 20);
    assert_eq!(report(&mut topology, 0).await, (1, true));

    release(&topology, 0, 10);
    // hubs answer on their own tasks, so poll until the reader drains
    let mut state = report(&mut topology, 0).await;
    while state.1 {
        tokio::task::yield_now().await;
        state = report(&mut topology, 0).await;
    }
    assert_eq!(state, (3, false));

    reader.shutdown()?;
    let (runtime, buffer) = topology.spokes.remove(0).1.await??.into_parts();
    assert!(buffer.is_empty());
    let node = runtime.node().unwrap();
    assert_eq!(node.levels, vec![10, 20]);
    assert_eq!(
        node.seen,
        vec![
            vec![Value::Text("sync".into())],
            vec![Value::Int(1)],
            vec![Value::Int(2)]
        ]
    );

    for (hub, task) in topology.hubs {
        hub.shutdown()?;
        let gate = task.await??;
        assert!(gate.runtime().node().unwrap().waiting.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn sends_to_stopped_nodes_fail() -> Result<(), Box<dyn std::error::Error>> {
    let topology = topology(1, 1);
    let (hub, task) = topology.hubs.into_iter().next().unwrap();
    hub.shutdown()?;
    task.await??;
    assert!(hub.tuple(vec![]).is_err());

    topology.network.detach(NodeId::hub(0));
    let id = gate_interface().find("release").unwrap().id();
    let sent = topology.network.send(
        NodeId::spoke(0),
        Some(NodeId::hub(0)),
        RemoteCallIdentifier::one_way(id),
        vec![Value::Int(1)],
    );
    assert!(sent.is_err());
    Ok(())
}

#[tokio::test]
async fn init_events_do_not_rerun_a_started_node() -> Result<(), Box<dyn std::error::Error>> {
    let topology = topology(1, 1);
    let (hub, task) = topology.hubs.into_iter().next().unwrap();
    hub.init()?;
    hub.init()?;
    hub.shutdown()?;
    let gate = task.await??;
    assert_eq!(gate.runtime().node().unwrap().inits, 1);
    Ok(())
}
