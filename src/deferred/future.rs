use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use thiserror::Error;

use super::pool::PoolLink;
use crate::node::{HandlerError, NodeContext};
use crate::value::Payload;

/// Work to run on the owning node once a future resolves.
pub type Continuation<N> = Box<
    dyn FnOnce(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<(), HandlerError> + Send,
>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FutureError {
    #[error("the future is already resolved")]
    AlreadyResolved,
    #[error("a continuation is already registered")]
    ContinuationSet,
    #[error("the future was already accounted for and can no longer become synchronous")]
    SyncTooLate,
}

pub(crate) struct Cell<N> {
    value: Option<Payload>,
    sync: bool,
    /// Set once the runtime has seen this future. Only futures counted as
    /// synchronous at that point hold the node blocked.
    counted: Option<bool>,
    continuation: Option<Continuation<N>>,
    wakers: Vec<Waker>,
    pool: Option<PoolLink<N>>,
}

/// Single-assignment placeholder for the answer to a two-way call.
///
/// Cloning yields another handle to the same cell. The handle is also a
/// [`Future`], so an async host can await the payload directly.
pub struct ResponseFuture<N> {
    cell: Arc<Mutex<Cell<N>>>,
}

impl<N> Clone for ResponseFuture<N> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<N> ResponseFuture<N> {
    pub(crate) fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(Cell {
                value: None,
                sync: false,
                counted: None,
                continuation: None,
                wakers: Vec::new(),
                pool: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cell<N>> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().value.is_some()
    }

    pub fn is_sync(&self) -> bool {
        self.lock().sync
    }

    pub fn value(&self) -> Option<Payload> {
        self.lock().value.clone()
    }

    /// Marks the future synchronous: the node stops processing stream tuples
    /// until it resolves. Must happen in the callback that issued the call.
    pub fn set_sync(&self) -> Result<(), FutureError> {
        let mut cell = self.lock();
        if cell.value.is_some() {
            return Err(FutureError::AlreadyResolved);
        }
        if cell.counted.is_some() {
            return Err(FutureError::SyncTooLate);
        }
        cell.sync = true;
        Ok(())
    }

    /// Registers the work to run on the node when the answer arrives.
    pub fn then<F>(&self, continuation: F) -> Result<(), FutureError>
    where
        F: FnOnce(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<(), HandlerError>
            + Send
            + 'static,
    {
        let mut cell = self.lock();
        if cell.value.is_some() {
            return Err(FutureError::AlreadyResolved);
        }
        if cell.continuation.is_some() {
            return Err(FutureError::ContinuationSet);
        }
        cell.continuation = Some(Box::new(continuation));
        Ok(())
    }

    /// [`set_sync`](Self::set_sync) followed by [`then`](Self::then).
    pub fn then_sync<F>(&self, continuation: F) -> Result<(), FutureError>
    where
        F: FnOnce(&mut N, &mut NodeContext<'_, N>, Payload) -> Result<(), HandlerError>
            + Send
            + 'static,
    {
        self.set_sync()?;
        self.then(continuation)
    }

    /// Records that the runtime has seen this future and returns whether it
    /// counts towards the node's synchronous obligations.
    pub(crate) fn account(&self) -> bool {
        let mut cell = self.lock();
        let counts = cell.sync && cell.value.is_none();
        cell.counted = Some(counts);
        counts
    }

    /// Whether resolving this future releases one synchronous obligation.
    pub(crate) fn holds_node(&self) -> bool {
        self.lock().counted == Some(true)
    }

    pub(crate) fn link(&self, link: PoolLink<N>) {
        self.lock().pool = Some(link);
    }

    /// Stores the answer, wakes async waiters, then runs the continuation
    /// and, if this completes a pool, the pool's continuation.
    pub(crate) fn resolve(
        &self,
        node: &mut N,
        ctx: &mut NodeContext<'_, N>,
        payload: Payload,
    ) -> Result<(), HandlerError> {
        let (continuation, pool) = {
            let mut cell = self.lock();
            if cell.value.is_some() {
                return Err(Box::new(FutureError::AlreadyResolved));
            }
            cell.value = Some(payload.clone());
            for waker in cell.wakers.drain(..) {
                waker.wake();
            }
            (cell.continuation.take(), cell.pool.clone())
        };
        if let Some(pool) = pool {
            if let Some(k) = continuation {
                k(node, ctx, payload.clone())?;
            }
            pool.record(node, ctx, payload)
        } else if let Some(k) = continuation {
            k(node, ctx, payload)
        } else {
            Ok(())
        }
    }
}

impl<N> Future for ResponseFuture<N> {
    type Output = Payload;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Payload> {
        let mut cell = self.lock();
        match &cell.value {
            Some(value) => Poll::Ready(value.clone()),
            None => {
                cell.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    struct Unused;

    #[test]
    fn sync_can_only_be_set_before_accounting() {
        let f: ResponseFuture<Unused> = ResponseFuture::new();
        f.set_sync().unwrap();
        assert!(f.account());
        assert!(f.holds_node());
        assert_eq!(f.set_sync(), Err(FutureError::SyncTooLate));

        let g: ResponseFuture<Unused> = ResponseFuture::new();
        assert!(!g.account());
        assert!(!g.holds_node());
    }

    #[test]
    fn only_one_continuation() {
        let f: ResponseFuture<Unused> = ResponseFuture::new();
        f.then(|_, _, _| Ok(())).unwrap();
        assert_eq!(f.then(|_, _, _| Ok(())), Err(FutureError::ContinuationSet));
    }

    #[test]
    fn awaiting_sees_the_stored_value() {
        let f: ResponseFuture<Unused> = ResponseFuture::new();
        f.lock().value = Some(vec![Value::Int(5)]);
        let got = ::futures::executor::block_on(f.clone());
        assert_eq!(got, vec![Value::Int(5)]);
        assert!(f.is_resolved());
    }
}
