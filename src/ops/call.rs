use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use super::interface::OperationId;

/// Caller-chosen number scoping a response to one outstanding call.
pub type CallNumber = u64;

/// Largest call number before the counter wraps back to zero. Deployed peers
/// keep the counter in a signed 64 bit integer, so the range stops there.
pub const MAX_CALL_NUMBER: CallNumber = i64::MAX as CallNumber;

/// The call number that follows `n`.
pub fn next_call_number(n: CallNumber) -> CallNumber {
    if n >= MAX_CALL_NUMBER {
        0
    } else {
        n + 1
    }
}

#[derive(Archive, Serialize, Deserialize, Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum CallKind {
    /// A request that expects no answer.
    OneWay,
    /// A request whose answer comes back as a [`CallKind::Response`].
    TwoWay,
    /// An answer, matched by call number and source alone.
    Response,
}

/// The envelope identifying a request or a response on the wire.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct RemoteCallIdentifier {
    kind: CallKind,
    operation: Option<OperationId>,
    call_number: CallNumber,
}

impl RemoteCallIdentifier {
    pub fn one_way(operation: OperationId) -> Self {
        Self {
            kind: CallKind::OneWay,
            operation: Some(operation),
            call_number: 0,
        }
    }

    pub fn two_way(operation: OperationId, call_number: CallNumber) -> Self {
        Self {
            kind: CallKind::TwoWay,
            operation: Some(operation),
            call_number,
        }
    }

    pub fn response(call_number: CallNumber) -> Self {
        Self {
            kind: CallKind::Response,
            operation: None,
            call_number,
        }
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn operation(&self) -> Option<&OperationId> {
        self.operation.as_ref()
    }

    pub fn call_number(&self) -> CallNumber {
        self.call_number
    }

    /// The envelope answering this call.
    pub fn answer(&self) -> Self {
        Self::response(self.call_number)
    }
}

impl fmt::Display for RemoteCallIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operation {
            Some(op) => write!(
                f,
                "RemoteCallIdentifier({:?}, {}, {})",
                self.kind, op, self.call_number
            ),
            None => write!(
                f,
                "RemoteCallIdentifier({:?}, -, {})",
                self.kind, self.call_number
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_past_the_signed_maximum() {
        assert_eq!(next_call_number(0), 1);
        assert_eq!(next_call_number(MAX_CALL_NUMBER - 1), MAX_CALL_NUMBER);
        assert_eq!(next_call_number(MAX_CALL_NUMBER), 0);
    }

    #[test]
    fn answers_carry_no_operation() {
        let call = RemoteCallIdentifier::two_way(OperationId::for_signature("pull[long]"), 42);
        let answer = call.answer();
        assert_eq!(answer.kind(), CallKind::Response);
        assert_eq!(answer.call_number(), 42);
        assert!(answer.operation().is_none());
    }
}
