//! One task per node.
//!
//! A hosted node owns its [`BufferedRuntime`] outright and drains a mailbox
//! of [`NodeEvent`]s, running each to completion before taking the next.
//! Nothing else touches the runtime while the task runs; the task hands it
//! back on shutdown.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, Instrument};

use super::buffering::BufferedRuntime;
use super::error::RuntimeError;
use super::NodeLogic;
use crate::net::NetworkError;
use crate::ops::RemoteCallIdentifier;
use crate::sites::NodeId;
use crate::value::Payload;

#[derive(Debug)]
pub enum NodeEvent {
    /// Runs the node's `init`, for runtimes built without it.
    Init,
    Query {
        id: u64,
        query: Payload,
    },
    Message {
        source: NodeId,
        call: RemoteCallIdentifier,
        payload: Payload,
    },
    Tuple(Payload),
    /// Replays buffered tuples if the node is unblocked.
    Toggle,
    Shutdown,
}

/// Sending side of a hosted node's mailbox.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    id: NodeId,
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<NodeEvent> {
        self.tx.clone()
    }

    pub fn post(&self, event: NodeEvent) -> Result<(), NetworkError> {
        self.tx
            .send(event)
            .map_err(|_| NetworkError::MailboxClosed(self.id))
    }

    pub fn init(&self) -> Result<(), NetworkError> {
        self.post(NodeEvent::Init)
    }

    pub fn tuple(&self, tuple: Payload) -> Result<(), NetworkError> {
        self.post(NodeEvent::Tuple(tuple))
    }

    pub fn query(&self, id: u64, query: Payload) -> Result<(), NetworkError> {
        self.post(NodeEvent::Query { id, query })
    }

    pub fn toggle(&self) -> Result<(), NetworkError> {
        self.post(NodeEvent::Toggle)
    }

    pub fn shutdown(&self) -> Result<(), NetworkError> {
        self.post(NodeEvent::Shutdown)
    }
}

/// Yields the runtime back on shutdown, or the first fatal error.
pub type NodeTask<N> = JoinHandle<Result<BufferedRuntime<N>, RuntimeError>>;

/// Moves `runtime` onto its own task.
pub fn spawn<N: NodeLogic>(runtime: BufferedRuntime<N>) -> (NodeHandle, NodeTask<N>) {
    let id = runtime.runtime().node_id();
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(runtime, rx).instrument(debug_span!("node", node = %id)));
    (NodeHandle { id, tx }, task)
}

async fn run<N: NodeLogic>(
    mut runtime: BufferedRuntime<N>,
    mut rx: mpsc::UnboundedReceiver<NodeEvent>,
) -> Result<BufferedRuntime<N>, RuntimeError> {
    debug!("node started");
    while let Some(event) = rx.recv().await {
        let handled = match event {
            NodeEvent::Init => runtime.runtime_mut().init().and_then(|_| runtime.toggle()),
            NodeEvent::Query { id, query } => runtime.receive_query(id, query),
            NodeEvent::Message {
                source,
                call,
                payload,
            } => runtime.receive_msg(source, call, payload),
            NodeEvent::Tuple(tuple) => runtime.receive_tuple(tuple),
            NodeEvent::Toggle => runtime.toggle(),
            NodeEvent::Shutdown => break,
        };
        if let Err(e) = handled {
            error!("node failed: {e}");
            return Err(e);
        }
    }
    debug!("node stopped");
    Ok(runtime)
}
