//! Scripted stand-in for the embedded widget runtime.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chatlink_core::{
    LinkAction, RuntimeError, RuntimeFactory, SharedListener, SharedRuntime, WidgetRuntime,
    decode_script,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use url::Url;

use crate::lock;

/// How `load` behaves for runtimes created by a factory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadMode {
    #[default]
    Immediate,
    /// Loads wait for [`FakeRuntime::complete_load`].
    Manual,
    Fail(String),
}

/// Reply the fake page sends for requests of one action.
#[derive(Debug, Clone, PartialEq)]
pub enum AckRule {
    Reply(Value),
    Fail(Value),
    Silent,
}

/// Creates [`FakeRuntime`]s and keeps every instance for inspection.
///
/// By default `startSession` and `stopSession` requests are acked with `{}`,
/// every other request stays unanswered until configured with [`ack`](Self::ack).
pub struct FakeRuntimeFactory {
    load_mode: LoadMode,
    acks: HashMap<String, AckRule>,
    runtimes: Mutex<Vec<Arc<FakeRuntime>>>,
}

impl Default for FakeRuntimeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntimeFactory {
    pub fn new() -> Self {
        let acks = HashMap::from([
            ("startSession".to_string(), AckRule::Reply(json!({}))),
            ("stopSession".to_string(), AckRule::Reply(json!({}))),
        ]);
        Self {
            load_mode: LoadMode::Immediate,
            acks,
            runtimes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    pub fn ack(mut self, action: &str, payload: Value) -> Self {
        self.acks.insert(action.to_string(), AckRule::Reply(payload));
        self
    }

    pub fn fail_ack(mut self, action: &str, error: Value) -> Self {
        self.acks.insert(action.to_string(), AckRule::Fail(error));
        self
    }

    pub fn silent(mut self, action: &str) -> Self {
        self.acks.insert(action.to_string(), AckRule::Silent);
        self
    }

    pub fn created(&self) -> usize {
        lock(&self.runtimes).len()
    }

    pub fn latest(&self) -> Option<Arc<FakeRuntime>> {
        lock(&self.runtimes).last().cloned()
    }

    pub fn runtimes(&self) -> Vec<Arc<FakeRuntime>> {
        lock(&self.runtimes).clone()
    }
}

impl RuntimeFactory for FakeRuntimeFactory {
    fn create(&self, listener: SharedListener) -> SharedRuntime {
        let runtime = Arc::new(FakeRuntime {
            listener,
            load_mode: self.load_mode.clone(),
            acks: self.acks.clone(),
            loads: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            pending_load: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        });
        lock(&self.runtimes).push(Arc::clone(&runtime));
        runtime
    }
}

/// Records every envelope evaluated in it and answers requests per its rules.
pub struct FakeRuntime {
    listener: SharedListener,
    load_mode: LoadMode,
    acks: HashMap<String, AckRule>,
    loads: Mutex<Vec<Url>>,
    sent: Mutex<Vec<Value>>,
    pending_load: Mutex<Option<oneshot::Sender<Result<(), RuntimeError>>>>,
    torn_down: AtomicBool,
}

impl FakeRuntime {
    /// Finishes a [`LoadMode::Manual`] load. Returns false when none is waiting.
    pub fn complete_load(&self, result: Result<(), RuntimeError>) -> bool {
        match lock(&self.pending_load).take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn load_pending(&self) -> bool {
        lock(&self.pending_load).is_some()
    }

    /// Posts a raw message as if the page sent it.
    pub fn post(&self, message: Value) {
        if !self.is_torn_down() {
            self.listener.on_message(message);
        }
    }

    pub fn emit(&self, name: &str, data: Option<Value>) {
        let mut payload = json!({ "name": name });
        if let Some(data) = data {
            payload["data"] = data;
        }
        self.post(json!({ "action": "emit", "payload": payload }));
    }

    pub fn ack(&self, request_id: &str, payload: Value) {
        self.post(json!({ "action": "ack", "requestId": request_id, "payload": payload }));
    }

    pub fn disappear(&self) {
        self.listener.on_view_disappeared();
    }

    pub fn click_link(&self, url: &Url) -> LinkAction {
        self.listener.on_link_clicked(url)
    }

    pub fn loads(&self) -> Vec<Url> {
        lock(&self.loads).clone()
    }

    pub fn sent(&self) -> Vec<Value> {
        lock(&self.sent).clone()
    }

    pub fn sent_actions(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|envelope| envelope["action"].as_str().map(str::to_string))
            .collect()
    }

    pub fn sent_with_action(&self, action: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|envelope| envelope["action"] == action)
            .collect()
    }

    /// Request id of the most recent envelope for `action`.
    pub fn last_request_id(&self, action: &str) -> Option<String> {
        self.sent_with_action(action)
            .last()
            .and_then(|envelope| envelope["requestId"].as_str().map(str::to_string))
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn respond(&self, envelope: &Value) {
        let (Some(action), Some(request_id)) = (
            envelope["action"].as_str(),
            envelope["requestId"].as_str(),
        ) else {
            return;
        };
        match self.acks.get(action) {
            Some(AckRule::Reply(payload)) => self.ack(request_id, payload.clone()),
            Some(AckRule::Fail(error)) => self.post(json!({
                "action": "ack",
                "requestId": request_id,
                "error": error,
            })),
            Some(AckRule::Silent) | None => {}
        }
    }
}

#[async_trait]
impl WidgetRuntime for FakeRuntime {
    async fn load(&self, url: Url) -> Result<(), RuntimeError> {
        lock(&self.loads).push(url);
        match &self.load_mode {
            LoadMode::Immediate => Ok(()),
            LoadMode::Fail(reason) => Err(RuntimeError::Load(reason.clone())),
            LoadMode::Manual => {
                let (tx, rx) = oneshot::channel();
                *lock(&self.pending_load) = Some(tx);
                rx.await.unwrap_or(Err(RuntimeError::Closed))
            }
        }
    }

    async fn evaluate(&self, script: String) -> Result<(), RuntimeError> {
        if self.is_torn_down() {
            return Err(RuntimeError::Closed);
        }
        let envelope =
            decode_script(&script).map_err(|err| RuntimeError::Evaluate(err.to_string()))?;
        lock(&self.sent).push(envelope.clone());
        self.respond(&envelope);
        Ok(())
    }

    fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        if let Some(tx) = lock(&self.pending_load).take() {
            let _ = tx.send(Err(RuntimeError::Closed));
        }
    }
}
