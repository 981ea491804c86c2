use std::fmt;

use thiserror::Error;

use crate::deferred::{FutureError, PromiseId};
use crate::net::NetworkError;
use crate::ops::{InterfaceError, OperationId};
use crate::sites::{IdError, NodeId};

/// Error type user handlers return. Anything implementing `Error` converts
/// into it with `?`, including [`RuntimeError`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Where a user handler failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPath {
    Init,
    Query,
    Message,
    Tuple,
    Merge,
    /// Work run by the host through
    /// [`NodeRuntime::with_context`](super::NodeRuntime::with_context).
    Host,
}

impl fmt::Display for DispatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = match self {
            DispatchPath::Init => "init",
            DispatchPath::Query => "receive_query",
            DispatchPath::Message => "receive_msg",
            DispatchPath::Tuple => "receive_tuple",
            DispatchPath::Merge => "merge",
            DispatchPath::Host => "host",
        };
        f.write_str(path)
    }
}

/// Bookkeeping bugs in the runtime or its caller. Never recovered in place.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("node {0} is already blocked")]
    AlreadyBlocked(NodeId),
    #[error("node {0} is already unblocked")]
    AlreadyUnblocked(NodeId),
    #[error("no promises were made to caller {caller}")]
    NoPromisesFor { caller: u32 },
    #[error("no promise with id {promise} was made to caller {caller}")]
    UnknownPromise { caller: u32, promise: PromiseId },
    #[error("caller {caller} holds {promises} promises but {answers} answers were given")]
    PromiseCountMismatch {
        caller: u32,
        promises: usize,
        answers: usize,
    },
    #[error("no broadcast promises made to fulfill")]
    NoBroadcastPromises,
    #[error("no promise can be made: the current call does not wait for an answer")]
    NotAwaitingAnswer,
    #[error("one-way call to {0} produced a response")]
    ResponseOnOneWay(OperationId),
    #[error("two-way call to {0} reached a one-way handler")]
    MissingResponse(OperationId),
    #[error("request envelope carries no operation")]
    MissingOperation,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Interface(#[from] InterfaceError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Future(#[from] FutureError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("node {node} has no handler for operation {operation}")]
    UnknownOperation { node: NodeId, operation: OperationId },
    #[error("{interface} declares no operation named {operation}")]
    UnknownRemoteOperation { interface: String, operation: String },
    #[error("calling {operation} on this target yields no future of the requested kind")]
    NoFuture { operation: String },
    #[error("node {node} has no peer with index {index}")]
    UnknownPeer { node: NodeId, index: u32 },
    #[error("merge index {index} is out of range for {len} peers")]
    MergeIndex { index: usize, len: usize },
    #[error("failed wrapper.{path}")]
    Handler {
        path: DispatchPath,
        #[source]
        source: HandlerError,
    },
}

impl RuntimeError {
    pub(crate) fn handler(path: DispatchPath) -> impl FnOnce(HandlerError) -> Self {
        move |source| RuntimeError::Handler { path, source }
    }

    /// The protocol violation behind this error, looking through handler
    /// failures raised by runtime calls made from user code.
    pub fn protocol_violation(&self) -> Option<&ProtocolViolation> {
        match self {
            RuntimeError::Protocol(violation) => Some(violation),
            RuntimeError::Handler { source, .. } => source
                .downcast_ref::<RuntimeError>()
                .and_then(RuntimeError::protocol_violation)
                .or_else(|| source.downcast_ref::<ProtocolViolation>()),
            _ => None,
        }
    }
}
