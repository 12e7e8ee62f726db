use crate::errors::RpcError;
use crate::message_types::CallId;
use futures::channel::oneshot;
use log::*;
use serde_json::Value;
use std::collections::HashMap;

pub(crate) type CallSender = oneshot::Sender<Result<Value, RpcError>>;

/// The correlation table: outbound calls whose response has not arrived yet, keyed by call id.
///
/// Entries are added once the request datagram has been written, and removed when the matching response arrives.
/// Callers that give up waiting (attempt timeout, retry budget) drop their receiver; those entries are pruned the
/// next time a call is registered, so a very late response for them is reported as unmatched.
#[derive(Default)]
pub(crate) struct PendingCalls {
    pending: HashMap<CallId, CallSender>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self { pending: HashMap::new() }
    }

    pub fn register(&mut self, id: CallId, sender: CallSender) {
        let pruned = self.prune_abandoned();
        if pruned > 0 {
            trace!("Pruned {pruned} abandoned calls from the correlation table");
        }
        if let Some(previous) = self.pending.insert(id, sender) {
            // Only possible if the id counter wrapped around while a call was still outstanding.
            error!("Call id {id} was already pending. The earlier call can no longer be completed.");
            drop(previous);
        }
    }

    pub fn remove(&mut self, id: CallId) -> Option<CallSender> {
        self.pending.remove(&id)
    }

    /// Drop every entry whose caller has stopped waiting. Returns the number of entries removed.
    pub fn prune_abandoned(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, sender| !sender.is_canceled());
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn completes_registered_calls() {
        let mut calls = PendingCalls::new();
        let (sender, mut receiver) = oneshot::channel();
        calls.register(1, sender);
        assert_eq!(calls.len(), 1);
        let sender = calls.remove(1).expect("call 1 to be pending");
        sender.send(Ok(Value::from("value1"))).unwrap();
        assert_eq!(receiver.try_recv().unwrap().unwrap().unwrap(), Value::from("value1"));
        assert!(calls.remove(1).is_none());
        assert!(calls.is_empty());
    }

    #[test]
    fn abandoned_calls_are_pruned_on_register() {
        let mut calls = PendingCalls::new();
        let (abandoned, receiver) = oneshot::channel();
        calls.register(1, abandoned);
        drop(receiver);
        let (live, _receiver) = oneshot::channel();
        calls.register(2, live);
        assert_eq!(calls.len(), 1);
        assert!(calls.remove(1).is_none());
        assert!(calls.remove(2).is_some());
    }

    #[test]
    fn prune_keeps_waiting_callers() {
        let mut calls = PendingCalls::new();
        let (a, _keep_a) = oneshot::channel();
        let (b, drop_b) = oneshot::channel();
        calls.register(1, a);
        calls.register(2, b);
        drop(drop_b);
        assert_eq!(calls.prune_abandoned(), 1);
        assert_eq!(calls.prune_abandoned(), 0);
        assert_eq!(calls.len(), 1);
    }
}
