use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use bipartite::net::LocalNetwork;
use bipartite::node::host::{self, NodeHandle, NodeTask};
use bipartite::node::{BufferConfig, NodeBlueprint};
use bipartite::{
    BufferedRuntime, HandlerError, InterfaceDecl, MethodRegistry, Network, NodeContext,
    NodeId, NodeLogic, NodeRuntime, OperationDecl, Payload, Response, Value, ValueKind,
};
use hashbrown::HashMap;
use tracing::info;

const HUBS: u32 = 2;
const SPOKES: u32 = 3;
const DIM: usize = 4;
const ROUNDS: usize = 6;
/// Workers refresh their model from every hub after this many tuples.
const SYNC_EVERY: usize = 2;

/// Holds one shard of the model.
struct ParamServer {
    shard: Vec<f64>,
    updates: u64,
}

impl NodeLogic for ParamServer {
    fn on_tuple(&mut self, _: &mut NodeContext<'_, Self>, _: Payload) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_merge(
        &mut self,
        _: &mut NodeContext<'_, Self>,
        peers: Vec<Self>,
    ) -> Result<(), HandlerError> {
        for peer in peers {
            self.updates += peer.updates;
            for (w, p) in self.shard.iter_mut().zip(peer.shard) {
                *w += p;
            }
        }
        Ok(())
    }
}

/// Streams gradients to the hubs and periodically pulls the whole model.
#[derive(Default)]
struct Worker {
    seen: usize,
    model: Vec<f64>,
}

impl NodeLogic for Worker {
    fn on_query(
        &mut self,
        ctx: &mut NodeContext<'_, Self>,
        _: u64,
        _: u32,
        _: Payload,
    ) -> Result<(), HandlerError> {
        let blocked = ctx.is_blocked();
        ctx.querier().send(
            "report",
            vec![Value::Int(self.seen as i64), Value::Bool(blocked)],
        )?;
        Ok(())
    }

    fn on_tuple(
        &mut self,
        ctx: &mut NodeContext<'_, Self>,
        tuple: Payload,
    ) -> Result<(), HandlerError> {
        self.seen += 1;
        let gradient = tuple
            .first()
            .and_then(Value::as_floats)
            .map(<[f64]>::to_vec)
            .unwrap_or_default();
        let hub = (self.seen as u32 + ctx.node_id().index()) % ctx.peer_count();
        ctx.proxy(hub)?.send("push", vec![Value::Floats(gradient)])?;

        if self.seen % SYNC_EVERY == 0 {
            ctx.broadcast()
                .request_all("pull", vec![])?
                .then_sync(|worker, ctx, shards| {
                    worker.model = shards
                        .into_iter()
                        .flatten()
                        .filter_map(|v| v.as_floats().map(<[f64]>::to_vec))
                        .flatten()
                        .collect();
                    info!(node = %ctx.node_id(), model = ?worker.model, "model refreshed");
                    Ok(())
                })?;
        }
        Ok(())
    }

    fn on_merge(
        &mut self,
        _: &mut NodeContext<'_, Self>,
        peers: Vec<Self>,
    ) -> Result<(), HandlerError> {
        self.seen += peers.iter().map(|p| p.seen).sum::<usize>();
        Ok(())
    }
}

fn hub_interface() -> InterfaceDecl {
    InterfaceDecl::new("ParamServer")
        .operation(OperationDecl::one_way("push").param(ValueKind::Floats))
        .operation(OperationDecl::two_way("pull"))
}

fn querier_interface() -> InterfaceDecl {
    InterfaceDecl::new("Querier").operation(
        OperationDecl::one_way("report")
            .param(ValueKind::Int)
            .param(ValueKind::Bool),
    )
}

fn server_blueprint() -> Result<NodeBlueprint<ParamServer>, Box<dyn Error>> {
    let registry = MethodRegistry::builder(&hub_interface())
        .one_way("push", |server: &mut ParamServer, _, payload: Payload| {
            if let Some(gradient) = payload.first().and_then(Value::as_floats) {
                for (w, g) in server.shard.iter_mut().zip(gradient) {
                    *w += g;
                }
                server.updates += 1;
            }
            Ok(())
        })
        .two_way("pull", |server, _, _| {
            Ok(Response::single(server.shard.clone()))
        })
        .build()?;
    Ok(NodeBlueprint::new(
        InterfaceDecl::new("Worker"),
        querier_interface(),
        registry,
    ))
}

fn worker_blueprint() -> Result<NodeBlueprint<Worker>, Box<dyn Error>> {
    let registry = MethodRegistry::empty("Worker");
    Ok(NodeBlueprint::new(hub_interface(), querier_interface(), registry))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let network = Arc::new(LocalNetwork::new(0, HUBS, SPOKES));
    let mut reports = network.subscribe_querier();
    let shared: Arc<dyn Network> = network.clone();

    let servers = Arc::new(server_blueprint()?);
    let mut hubs: Vec<(NodeHandle, NodeTask<ParamServer>)> = Vec::new();
    for index in 0..HUBS {
        let server = ParamServer {
            shard: vec![0.0; DIM / HUBS as usize],
            updates: 0,
        };
        let id = NodeId::hub(index);
        let runtime = NodeRuntime::start(id, server, shared.clone(), servers.clone())?;
        let buffered = BufferedRuntime::new(runtime, BufferConfig::default());
        let (handle, task) = host::spawn(buffered);
        network.attach(&handle);
        hubs.push((handle, task));
    }

    let workers = Arc::new(worker_blueprint()?);
    let mut spokes: Vec<(NodeHandle, NodeTask<Worker>)> = Vec::new();
    for index in 0..SPOKES {
        let id = NodeId::spoke(index);
        let runtime =
            NodeRuntime::start(id, Worker::default(), shared.clone(), workers.clone())?;
        let buffered = BufferedRuntime::new(runtime, BufferConfig::default());
        let (handle, task) = host::spawn(buffered);
        network.attach(&handle);
        spokes.push((handle, task));
    }

    let shard = DIM / HUBS as usize;
    for round in 0..ROUNDS {
        for (handle, _) in &spokes {
            let gradient = vec![0.1 * (round + 1) as f64; shard];
            handle.tuple(vec![Value::Floats(gradient)])?;
        }
    }

    // poll until every worker has processed its stream and holds no sync call
    let mut query = 0;
    loop {
        query += 1;
        for (handle, _) in &spokes {
            handle.query(query, vec![])?;
        }
        let mut done: HashMap<NodeId, bool> = HashMap::new();
        while done.len() < spokes.len() {
            let Some(report) = reports.recv().await else {
                return Err("querier channel closed".into());
            };
            let seen = report.payload.first().and_then(Value::as_int).unwrap_or(0);
            let blocked = matches!(report.payload.get(1), Some(Value::Bool(true)));
            done.insert(report.source, seen as usize == ROUNDS && !blocked);
        }
        if done.values().all(|ok| *ok) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for (handle, task) in spokes {
        handle.shutdown()?;
        let runtime = task.await??;
        let (runtime, _) = runtime.into_parts();
        if let Some(worker) = runtime.node() {
            info!(
                node = %runtime.node_id(),
                seen = worker.seen,
                model = ?worker.model,
                "worker done"
            );
        }
    }
    for (handle, task) in hubs {
        handle.shutdown()?;
        let runtime = task.await??;
        if let Some(server) = runtime.runtime().node() {
            info!(
                node = %handle.id(),
                updates = server.updates,
                shard = ?server.shard,
                "server done"
            );
        }
    }
    Ok(())
}
