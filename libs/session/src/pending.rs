use std::collections::HashMap;

use chatlink_core::{ChatError, RequestId};
use metrics::counter;
use serde_json::Value;
use tokio::{sync::oneshot, task::AbortHandle};
use tracing::debug;

pub type Reply = Result<Value, ChatError>;

/// Caller side of a registered request.
#[derive(Debug)]
pub struct PendingReply {
    request_id: RequestId,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Waits for the outcome. A table dropped with the entry still in it
    /// reports the runtime as gone.
    pub async fn wait(self) -> Reply {
        self.rx.await.unwrap_or(Err(ChatError::RuntimeNotReady))
    }
}

struct Entry {
    tx: oneshot::Sender<Reply>,
    expiry: Option<AbortHandle>,
}

impl Entry {
    fn settle(self, reply: Reply) {
        if let Some(expiry) = self.expiry {
            expiry.abort();
        }
        // The caller may have stopped waiting.
        let _ = self.tx.send(reply);
    }
}

/// Correlates outbound requests with their asynchronous acks.
///
/// Each entry settles at most once: whichever of `resolve`, `fail` or
/// `cancel_all` reaches it first removes it, and every later call for the same
/// id is a no-op.
#[derive(Default)]
pub struct PendingRequestTable {
    entries: HashMap<RequestId, Entry>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, request_id: RequestId) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.entries.insert(
            request_id.clone(),
            Entry { tx, expiry: None },
        ) {
            debug!(request_id = %request_id, "request id reused; failing previous waiter");
            previous.settle(Err(ChatError::Unknown("request id reused".into())));
        }
        PendingReply { request_id, rx }
    }

    /// Ties an expiry task to an entry so settling it cancels the timer.
    pub fn attach_expiry(&mut self, request_id: &RequestId, expiry: AbortHandle) {
        match self.entries.get_mut(request_id) {
            Some(entry) => entry.expiry = Some(expiry),
            None => expiry.abort(),
        }
    }

    pub fn resolve(&mut self, request_id: &RequestId, value: Value) -> bool {
        self.settle(request_id, Ok(value), "resolved")
    }

    pub fn fail(&mut self, request_id: &RequestId, error: ChatError) -> bool {
        self.settle(request_id, Err(error), "failed")
    }

    pub fn expire(&mut self, request_id: &RequestId) -> bool {
        self.settle(
            request_id,
            Err(ChatError::Unknown("request timed out".into())),
            "expired",
        )
    }

    /// Fails every outstanding entry and empties the table.
    pub fn cancel_all(&mut self, error: ChatError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.settle(Err(error.clone()));
        }
        if count > 0 {
            counter!("chatlink_requests_total", "outcome" => "cancelled").increment(count as u64);
            debug!(count, "cancelled pending requests");
        }
        count
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn settle(&mut self, request_id: &RequestId, reply: Reply, outcome: &'static str) -> bool {
        match self.entries.remove(request_id) {
            Some(entry) => {
                counter!("chatlink_requests_total", "outcome" => outcome).increment(1);
                entry.settle(reply);
                true
            }
            None => {
                debug!(request_id = %request_id, outcome, "no pending request for id; ignoring");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_value_once() {
        let mut table = PendingRequestTable::new();
        let id = RequestId::from("r1");
        let reply = table.register(id.clone());

        assert!(table.resolve(&id, json!({"count": 1})));
        assert!(!table.resolve(&id, json!({"count": 2})));
        assert!(!table.fail(&id, ChatError::RuntimeNotReady));
        assert!(table.is_empty());
        assert_eq!(reply.wait().await.unwrap(), json!({"count": 1}));
    }

    #[tokio::test]
    async fn fail_then_resolve_keeps_failure() {
        let mut table = PendingRequestTable::new();
        let id = RequestId::from("r2");
        let reply = table.register(id.clone());

        assert!(table.fail(&id, ChatError::InvalidResponse("bad".into())));
        assert!(!table.resolve(&id, json!(true)));
        assert_eq!(
            reply.wait().await,
            Err(ChatError::InvalidResponse("bad".into()))
        );
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut table = PendingRequestTable::new();
        assert!(!table.resolve(&RequestId::from("ghost"), json!(null)));
        assert!(!table.fail(&RequestId::from("ghost"), ChatError::RuntimeNotReady));
        assert!(!table.expire(&RequestId::from("ghost")));
    }

    #[tokio::test]
    async fn cancel_all_fails_every_entry() {
        let mut table = PendingRequestTable::new();
        let first = table.register(RequestId::from("a"));
        let second = table.register(RequestId::from("b"));

        assert_eq!(table.cancel_all(ChatError::RuntimeNotReady), 2);
        assert!(table.is_empty());
        assert_eq!(first.wait().await, Err(ChatError::RuntimeNotReady));
        assert_eq!(second.wait().await, Err(ChatError::RuntimeNotReady));
    }

    #[tokio::test]
    async fn dropped_table_reports_runtime_not_ready() {
        let reply = {
            let mut table = PendingRequestTable::new();
            table.register(RequestId::from("orphan"))
        };
        assert_eq!(reply.wait().await, Err(ChatError::RuntimeNotReady));
    }

    #[tokio::test]
    async fn settling_aborts_expiry_timer() {
        let mut table = PendingRequestTable::new();
        let id = RequestId::from("timed");
        let _reply = table.register(id.clone());
        let timer = tokio::spawn(std::future::pending::<()>());
        table.attach_expiry(&id, timer.abort_handle());

        table.resolve(&id, json!(1));
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
