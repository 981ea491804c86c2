//! Node runtime.
//!
//! [`NodeRuntime`] wraps one user node, dispatches everything arriving for it
//! and owns its futures, promises and blocked state. [`BufferedRuntime`] adds
//! the tuple buffer that holds stream data while the node is blocked, and
//! [`host`] runs a buffered runtime on its own task.

mod buffer;
mod buffering;
mod context;
mod error;
pub mod host;
mod proxy;
mod runtime;

pub use buffer::{BufferConfig, DataBuffer, DEFAULT_BUFFER_CAPACITY};
pub use buffering::BufferedRuntime;
pub use context::NodeContext;
pub use error::{DispatchPath, HandlerError, ProtocolViolation, RuntimeError};
pub use proxy::{CallHandle, Proxy, Target};
pub use runtime::{NodeBlueprint, NodeRuntime};

use crate::value::Payload;

/// The business logic of a node.
///
/// Remote operations are registered separately in a
/// [`MethodRegistry`](crate::ops::MethodRegistry); the methods here are the
/// fixed entry points every node has. All of them run on the node's own
/// thread of control and may issue calls through the context.
pub trait NodeLogic: Send + Sized + 'static {
    /// Runs once, when the node joins the network.
    fn init(&mut self, _ctx: &mut NodeContext<'_, Self>) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_query(
        &mut self,
        _ctx: &mut NodeContext<'_, Self>,
        _query_id: u64,
        _network_id: u32,
        _query: Payload,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_tuple(&mut self, ctx: &mut NodeContext<'_, Self>, tuple: Payload)
        -> Result<(), HandlerError>;

    /// Folds the state of other instances into this one.
    fn on_merge(&mut self, ctx: &mut NodeContext<'_, Self>, peers: Vec<Self>)
        -> Result<(), HandlerError>;
}
