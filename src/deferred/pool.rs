use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;

use super::future::{FutureError, ResponseFuture};
use crate::node::{HandlerError, NodeContext};
use crate::value::Payload;

/// Work to run once every member of a pool has resolved. Receives the
/// answers in peer-index order.
pub type PoolContinuation<N> = Box<
    dyn FnOnce(&mut N, &mut NodeContext<'_, N>, Vec<Payload>) -> Result<(), HandlerError>
        + Send,
>;

pub(crate) struct PoolCell<N> {
    values: Vec<Option<Payload>>,
    remaining: usize,
    /// Set once the continuation slot has been consumed.
    fired: bool,
    continuation: Option<PoolContinuation<N>>,
}

pub(crate) struct PoolLink<N> {
    cell: Arc<Mutex<PoolCell<N>>>,
    index: usize,
}

impl<N> Clone for PoolLink<N> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            index: self.index,
        }
    }
}

impl<N> PoolLink<N> {
    /// Stores one member's answer. The member completing the pool runs the
    /// pool continuation.
    pub(crate) fn record(
        &self,
        node: &mut N,
        ctx: &mut NodeContext<'_, N>,
        payload: Payload,
    ) -> Result<(), HandlerError> {
        let ready = {
            let mut cell = lock(&self.cell);
            if cell.values[self.index].is_some() {
                return Err(Box::new(FutureError::AlreadyResolved));
            }
            cell.values[self.index] = Some(payload);
            cell.remaining -= 1;
            if cell.remaining > 0 {
                None
            } else {
                let values: Vec<Payload> =
                    cell.values.iter().flatten().cloned().collect();
                cell.fired = true;
                cell.continuation.take().map(|k| (k, values))
            }
        };
        match ready {
            Some((k, values)) => k(node, ctx, values),
            None => Ok(()),
        }
    }
}

/// The futures of one broadcast call, one per peer in peer-index order.
pub struct FuturePool<N> {
    members: Vec<ResponseFuture<N>>,
    cell: Arc<Mutex<PoolCell<N>>>,
}

impl<N> Clone for FuturePool<N> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<N> FuturePool<N> {
    pub(crate) fn new(members: Vec<ResponseFuture<N>>) -> Self {
        let cell = Arc::new(Mutex::new(PoolCell {
            values: vec![None; members.len()],
            remaining: members.len(),
            fired: false,
            continuation: None,
        }));
        for (index, member) in members.iter().enumerate() {
            member.link(PoolLink {
                cell: Arc::clone(&cell),
                index,
            });
        }
        Self { members, cell }
    }

    pub fn members(&self) -> &[ResponseFuture<N>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.cell).remaining == 0
    }

    pub fn resolved(&self) -> usize {
        let cell = lock(&self.cell);
        cell.values.len() - cell.remaining
    }

    /// Registers the work to run once, when the last member resolves. A
    /// pool without members runs it at the end of the current dispatch.
    pub fn then<F>(&self, continuation: F) -> Result<(), FutureError>
    where
        F: FnOnce(&mut N, &mut NodeContext<'_, N>, Vec<Payload>) -> Result<(), HandlerError>
            + Send
            + 'static,
    {
        let mut cell = lock(&self.cell);
        if cell.fired {
            return Err(FutureError::AlreadyResolved);
        }
        if cell.continuation.is_some() {
            return Err(FutureError::ContinuationSet);
        }
        cell.continuation = Some(Box::new(continuation));
        Ok(())
    }

    /// Marks every member synchronous, then registers the continuation.
    pub fn then_sync<F>(&self, continuation: F) -> Result<(), FutureError>
    where
        F: FnOnce(&mut N, &mut NodeContext<'_, N>, Vec<Payload>) -> Result<(), HandlerError>
            + Send
            + 'static,
    {
        self.set_sync()?;
        self.then(continuation)
    }

    pub fn set_sync(&self) -> Result<(), FutureError> {
        self.members.iter().try_for_each(ResponseFuture::set_sync)
    }

    /// Consumes the continuation of a pool without members. Later calls to
    /// [`then`](Self::then) fail as for any completed pool.
    pub(crate) fn take_ready(&self) -> Option<PoolContinuation<N>> {
        let mut cell = lock(&self.cell);
        if cell.remaining > 0 || cell.fired {
            return None;
        }
        cell.fired = true;
        cell.continuation.take()
    }

    /// Awaits every member and yields the answers in peer-index order.
    pub async fn wait(&self) -> Vec<Payload> {
        join_all(self.members.iter().cloned()).await
    }
}

fn lock<N>(cell: &Mutex<PoolCell<N>>) -> MutexGuard<'_, PoolCell<N>> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}
