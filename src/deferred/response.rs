use super::promise::{BroadcastResponses, PromiseTicket, PromisedResponses};
use crate::value::{Payload, Value};

/// What a two-way operation hands back to the runtime.
#[derive(Debug)]
pub enum Response {
    /// Sent to the caller right away.
    Value(Payload),
    /// The answer comes later through the promise behind the ticket.
    Promise(PromiseTicket),
    /// A batch of earlier promises, settled now.
    Promised(PromisedResponses),
    /// A round of broadcast promises, settled now.
    Broadcast(BroadcastResponses),
    /// Nothing is sent.
    Empty,
}

impl Response {
    pub fn value(payload: impl Into<Payload>) -> Self {
        Response::Value(payload.into())
    }

    /// A one-element value response.
    pub fn single(value: impl Into<Value>) -> Self {
        Response::Value(vec![value.into()])
    }
}
