use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::net::{BroadcastCalls, Network, NetworkError};
use crate::node::ProtocolViolation;
use crate::ops::{CallNumber, RemoteCallIdentifier};
use crate::sites::NodeId;
use crate::value::Payload;

pub type PromiseId = u64;

/// Correlates a deferred answer with the promise it settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PromiseTicket {
    pub caller: u32,
    pub id: PromiseId,
}

/// A deferred answer owed to one caller for one call.
#[derive(Clone)]
pub struct Promise {
    network: Arc<dyn Network>,
    source: NodeId,
    destination: NodeId,
    call: RemoteCallIdentifier,
}

impl Promise {
    pub fn new(
        network: Arc<dyn Network>,
        source: NodeId,
        destination: NodeId,
        call_number: CallNumber,
    ) -> Self {
        Self {
            network,
            source,
            destination,
            call: RemoteCallIdentifier::response(call_number),
        }
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// The response envelope the answer travels in.
    pub fn call(&self) -> &RemoteCallIdentifier {
        &self.call
    }

    pub fn answer(&self, payload: Payload) -> Result<(), NetworkError> {
        self.network
            .send(self.source, Some(self.destination), self.call.clone(), payload)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("call", &self.call)
            .finish()
    }
}

/// Promises fulfilled together, each paired with its answer.
#[derive(Debug)]
pub struct PromisedResponses {
    answers: Vec<(Promise, Payload)>,
}

impl PromisedResponses {
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn send(self) -> Result<(), NetworkError> {
        for (promise, answer) in self.answers {
            promise.answer(answer)?;
        }
        Ok(())
    }
}

/// The fan-outs settling a round of broadcast promises: one broadcast per
/// answer, each reaching every caller with that caller's envelope.
pub struct BroadcastResponses {
    network: Arc<dyn Network>,
    source: NodeId,
    rounds: Vec<(BroadcastCalls, Payload)>,
}

impl BroadcastResponses {
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn send(self) -> Result<(), NetworkError> {
        for (calls, answer) in self.rounds {
            self.network.broadcast(self.source, calls, answer)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BroadcastResponses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastResponses")
            .field("source", &self.source)
            .field("rounds", &self.rounds)
            .finish()
    }
}

type Ledger = HashMap<u32, BTreeMap<PromiseId, Promise>>;

/// The promises a node has made, per caller index.
///
/// Promise ids start at zero per caller and follow creation order, so batch
/// answers line up with the promises they settle.
#[derive(Default, Debug)]
pub struct PromiseTable {
    promises: Ledger,
    broadcast: Ledger,
    /// The current broadcast round has been fulfilled; the next broadcast
    /// promise starts a new round.
    broadcasted: bool,
}

impl PromiseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, caller: u32, promise: Promise) -> PromiseTicket {
        let id = push(&mut self.promises, caller, promise);
        PromiseTicket { caller, id }
    }

    pub fn insert_broadcast(&mut self, caller: u32, promise: Promise) -> PromiseTicket {
        if self.broadcasted {
            debug!("starting a new broadcast round");
            self.broadcast.values_mut().for_each(BTreeMap::clear);
            self.broadcasted = false;
        }
        let id = push(&mut self.broadcast, caller, promise);
        PromiseTicket { caller, id }
    }

    /// Number of promises pending for `caller`.
    pub fn pending(&self, caller: u32) -> usize {
        self.promises.get(&caller).map_or(0, BTreeMap::len)
    }

    pub fn pending_broadcast(&self) -> usize {
        self.broadcast.values().map(BTreeMap::len).sum()
    }

    /// Removes and returns one promise.
    pub fn take(&mut self, caller: u32, id: PromiseId) -> Result<Promise, ProtocolViolation> {
        let promises = self
            .promises
            .get_mut(&caller)
            .ok_or(ProtocolViolation::NoPromisesFor { caller })?;
        promises
            .remove(&id)
            .ok_or(ProtocolViolation::UnknownPromise { caller, promise: id })
    }

    /// Pairs every promise made to `caller` with an answer, in creation
    /// order, and empties the caller's entry. Nothing changes on error.
    pub fn settle(
        &mut self,
        caller: u32,
        answers: Vec<Payload>,
    ) -> Result<PromisedResponses, ProtocolViolation> {
        let promises = self
            .promises
            .get_mut(&caller)
            .ok_or(ProtocolViolation::NoPromisesFor { caller })?;
        if promises.len() != answers.len() {
            return Err(ProtocolViolation::PromiseCountMismatch {
                caller,
                promises: promises.len(),
                answers: answers.len(),
            });
        }
        let answers = std::mem::take(promises)
            .into_values()
            .zip(answers)
            .collect();
        Ok(PromisedResponses { answers })
    }

    /// Builds the fan-outs settling the current broadcast round. Every
    /// caller must hold exactly one promise per answer.
    pub fn settle_broadcast(
        &mut self,
        network: Arc<dyn Network>,
        source: NodeId,
        answers: Vec<Payload>,
    ) -> Result<BroadcastResponses, ProtocolViolation> {
        if self.pending_broadcast() == 0 {
            return Err(ProtocolViolation::NoBroadcastPromises);
        }
        let callers: Vec<&BTreeMap<PromiseId, Promise>> =
            self.broadcast.values().filter(|p| !p.is_empty()).collect();
        if let Some((caller, promises)) = self
            .broadcast
            .iter()
            .find(|(_, p)| !p.is_empty() && p.len() != answers.len())
        {
            return Err(ProtocolViolation::PromiseCountMismatch {
                caller: *caller,
                promises: promises.len(),
                answers: answers.len(),
            });
        }
        let mut rounds = Vec::with_capacity(answers.len());
        for (i, answer) in answers.into_iter().enumerate() {
            let calls: BroadcastCalls = callers
                .iter()
                .filter_map(|promises| promises.values().nth(i))
                .map(|p| (p.destination, p.call.clone()))
                .collect();
            rounds.push((calls, answer));
        }
        self.broadcasted = true;
        Ok(BroadcastResponses {
            network,
            source,
            rounds,
        })
    }
}

fn push(ledger: &mut Ledger, caller: u32, promise: Promise) -> PromiseId {
    let promises = ledger.entry(caller).or_default();
    let id = promises.keys().next_back().map_or(0, |last| last + 1);
    promises.insert(id, promise);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::RecordingNetwork;
    use crate::ops::CallKind;
    use crate::value::Value;

    fn promise(net: &Arc<RecordingNetwork>, caller: u32, call_number: CallNumber) -> Promise {
        Promise::new(net.clone(), NodeId::hub(0), NodeId::spoke(caller), call_number)
    }

    #[test]
    fn ids_are_sequential_per_caller() {
        let net = Arc::new(RecordingNetwork::new(0, 1, 2));
        let mut table = PromiseTable::new();
        assert_eq!(table.insert(0, promise(&net, 0, 10)).id, 0);
        assert_eq!(table.insert(0, promise(&net, 0, 11)).id, 1);
        assert_eq!(table.insert(1, promise(&net, 1, 3)).id, 0);
        assert_eq!(table.pending(0), 2);
    }

    #[test]
    fn fulfilling_one_promise_removes_it() {
        let net = Arc::new(RecordingNetwork::new(0, 1, 2));
        let mut table = PromiseTable::new();
        let ticket = table.insert(1, promise(&net, 1, 7));
        table.take(1, ticket.id).unwrap().answer(vec![Value::Int(1)]).unwrap();
        assert_eq!(table.pending(1), 0);
        assert_eq!(
            table.take(1, ticket.id).unwrap_err(),
            ProtocolViolation::UnknownPromise { caller: 1, promise: 0 }
        );
        assert_eq!(
            table.take(0, 0).unwrap_err(),
            ProtocolViolation::NoPromisesFor { caller: 0 }
        );
        let responses = net.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, Some(NodeId::spoke(1)));
        assert_eq!(responses[0].1.call_number(), 7);
    }

    #[test]
    fn batch_must_match_the_number_of_promises() {
        let net = Arc::new(RecordingNetwork::new(0, 1, 1));
        let mut table = PromiseTable::new();
        table.insert(0, promise(&net, 0, 1));
        table.insert(0, promise(&net, 0, 2));

        let three = vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]];
        assert_eq!(
            table.settle(0, three).unwrap_err(),
            ProtocolViolation::PromiseCountMismatch {
                caller: 0,
                promises: 2,
                answers: 3
            }
        );
        assert_eq!(table.pending(0), 2);

        let two = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
        table.settle(0, two).unwrap().send().unwrap();
        assert_eq!(table.pending(0), 0);

        let numbers: Vec<(CallNumber, Payload)> = net
            .responses()
            .into_iter()
            .map(|(_, call, payload)| (call.call_number(), payload))
            .collect();
        assert_eq!(
            numbers,
            vec![(1, vec![Value::Int(1)]), (2, vec![Value::Int(2)])]
        );
    }

    #[test]
    fn a_new_broadcast_round_discards_the_old_one() {
        let net = Arc::new(RecordingNetwork::new(0, 1, 2));
        let mut table = PromiseTable::new();
        assert_eq!(
            table
                .settle_broadcast(net.clone(), NodeId::hub(0), vec![])
                .unwrap_err(),
            ProtocolViolation::NoBroadcastPromises
        );

        table.insert_broadcast(0, promise(&net, 0, 4));
        table.insert_broadcast(1, promise(&net, 1, 9));
        let round = table
            .settle_broadcast(net.clone(), NodeId::hub(0), vec![vec![Value::Float(0.5)]])
            .unwrap();
        assert_eq!(round.len(), 1);
        round.send().unwrap();

        let envelopes = net.envelopes();
        assert_eq!(envelopes.len(), 2);
        assert!(envelopes.iter().all(|(_, call, payload)| {
            call.kind() == CallKind::Response && payload == &vec![Value::Float(0.5)]
        }));
        assert_eq!(envelopes[0].1.call_number(), 4);
        assert_eq!(envelopes[1].1.call_number(), 9);

        table.insert_broadcast(1, promise(&net, 1, 12));
        assert_eq!(table.pending_broadcast(), 1);
    }
}
