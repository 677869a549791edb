//! Pending-call table
//!
//! Sequence number -> call awaiting a response. A sequence number is present
//! exactly while its response is still expected.

use std::collections::HashMap;

use super::call::Call;

#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<u64, Call>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `call` under `seq`. Sequence numbers are never reused.
    pub fn insert(&mut self, seq: u64, call: Call) {
        let previous = self.calls.insert(seq, call);
        debug_assert!(previous.is_none(), "sequence number {} reused", seq);
    }

    /// Stop tracking `seq`, returning its call if it was still pending
    pub fn remove(&mut self, seq: u64) -> Option<Call> {
        self.calls.remove(&seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.calls.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Remove every pending call
    pub fn drain(&mut self) -> impl Iterator<Item = (u64, Call)> + '_ {
        self.calls.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::CallRequest;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn call(method: &str) -> Call {
        let (tx, _rx) = mpsc::channel(1);
        Call::new(CallRequest::new("Test", method, Bytes::new()).expect_reply(), tx)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut pending = PendingCalls::new();
        pending.insert(0, call("A"));
        pending.insert(1, call("B"));
        assert_eq!(pending.len(), 2);
        assert!(pending.contains(1));

        let removed = pending.remove(1).unwrap();
        assert_eq!(removed.service_method, "Test.B");
        assert!(!pending.contains(1));
        assert!(pending.remove(1).is_none());
    }

    #[test]
    fn test_drain_empties_table() {
        let mut pending = PendingCalls::new();
        for seq in 0..5 {
            pending.insert(seq, call("X"));
        }

        let mut seqs: Vec<u64> = pending.drain().map(|(seq, _)| seq).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(pending.is_empty());
    }
}
