//! Futures and promises.
//!
//! The caller of a two-way operation holds a [`ResponseFuture`] (or a
//! [`FuturePool`] for a broadcast). The callee answers with a [`Response`]:
//! right away, or later through a promise.

mod future;
mod pool;
mod promise;
mod response;

pub use future::{Continuation, FutureError, ResponseFuture};
pub use pool::{FuturePool, PoolContinuation};
pub use promise::{
    BroadcastResponses, Promise, PromiseId, PromiseTable, PromiseTicket, PromisedResponses,
};
pub use response::Response;
