//! Single point of contact with the embedded widget runtime.
//!
//! The bridge owns the current runtime instance together with its outbound
//! queue, pending request table and readiness state. It lives inside the
//! controller actor, so every method runs on the owner context; slow work
//! (page load, script evaluation, request expiry) runs in spawned tasks that
//! report back through [`Signal`]s tagged with the instance generation.
use std::{collections::VecDeque, sync::Arc, time::Duration};

use chatlink_core::{
    ChatConfig, ChatDelegate, ChatError, Credentials, IdentityLookup, InboundMessage, LinkAction,
    OutboundAction, OutboundEnvelope, RequestId, RuntimeFactory, RuntimeListener, SharedRuntime,
    WidgetEvent, decode_inbound,
};
use metrics::counter;
use serde_json::Value;
use tokio::{
    sync::{OnceCell, mpsc, oneshot},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    controller::{Signal, SignalSender},
    gate::{Readiness, WaitFor},
    pending::{PendingReply, PendingRequestTable},
};

pub(crate) type LoadWaiter = oneshot::Sender<Result<(), ChatError>>;

/// Team identity resolved once and reused by every later load.
pub(crate) struct IdentityCache {
    lookup: Arc<dyn IdentityLookup>,
    team_id: OnceCell<String>,
}

impl IdentityCache {
    pub(crate) fn new(lookup: Arc<dyn IdentityLookup>) -> Self {
        Self {
            lookup,
            team_id: OnceCell::new(),
        }
    }

    pub(crate) async fn team_id(&self) -> String {
        self.team_id
            .get_or_init(|| async {
                match self.lookup.team_id().await {
                    Some(team_id) => team_id,
                    None => {
                        debug!("identity lookup returned no team id");
                        String::new()
                    }
                }
            })
            .await
            .clone()
    }
}

/// Inbound traffic the controller has to act on.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Routed {
    Event(WidgetEvent),
    Failure(ChatError),
}

struct Queued {
    action: OutboundAction,
    request_id: Option<RequestId>,
    wait_for: WaitFor,
}

struct Frame {
    action: &'static str,
    script: String,
    request_id: Option<RequestId>,
}

struct RuntimeInstance {
    generation: u64,
    runtime: SharedRuntime,
    writer: mpsc::UnboundedSender<Frame>,
    writer_task: JoinHandle<()>,
    load_task: JoinHandle<()>,
}

pub(crate) struct BridgeDeps {
    pub factory: Arc<dyn RuntimeFactory>,
    pub delegate: Arc<dyn ChatDelegate>,
    pub identity: Arc<IdentityCache>,
    pub signals: SignalSender,
    pub request_timeout: Duration,
    pub load_timeout: Duration,
}

pub(crate) struct RuntimeBridge {
    config: Arc<ChatConfig>,
    deps: BridgeDeps,
    generation: u64,
    instance: Option<RuntimeInstance>,
    readiness: Readiness,
    queue: VecDeque<Queued>,
    pending: PendingRequestTable,
    load_waiters: Vec<LoadWaiter>,
}

impl RuntimeBridge {
    pub(crate) fn new(config: ChatConfig, deps: BridgeDeps) -> Self {
        Self {
            config: Arc::new(config),
            deps,
            generation: 0,
            instance: None,
            readiness: Readiness::NotLoaded,
            queue: VecDeque::new(),
            pending: PendingRequestTable::new(),
            load_waiters: Vec::new(),
        }
    }

    pub(crate) fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.instance
            .as_ref()
            .is_some_and(|instance| instance.generation == generation)
    }

    pub(crate) fn runtime(&self) -> Option<SharedRuntime> {
        self.instance
            .as_ref()
            .map(|instance| Arc::clone(&instance.runtime))
    }

    pub(crate) fn has_runtime(&self) -> bool {
        self.instance.is_some()
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Starts a load unless one is loaded or in flight. `waiter` fires once
    /// the session is restored, or with an error if this instance fails.
    pub(crate) fn load_if_needed(&mut self, waiter: Option<LoadWaiter>) {
        if let Some(waiter) = waiter {
            if self.readiness.is_restored() {
                let _ = waiter.send(Ok(()));
            } else {
                self.load_waiters.push(waiter);
            }
        }
        if let Some(instance) = &self.instance {
            debug!(
                generation = instance.generation,
                readiness = self.readiness.as_str(),
                "runtime already loaded or loading"
            );
            return;
        }
        self.spawn_instance();
    }

    fn spawn_instance(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let listener = Arc::new(BridgeListener {
            generation,
            signals: self.deps.signals.clone(),
            delegate: Arc::clone(&self.deps.delegate),
        });
        let runtime = self.deps.factory.create(listener);

        let (writer, frames) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_frames(
            generation,
            Arc::clone(&runtime),
            frames,
            self.deps.signals.clone(),
        ));
        let load_task = tokio::spawn(load_runtime(
            generation,
            Arc::clone(&runtime),
            Arc::clone(&self.config),
            Arc::clone(&self.deps.identity),
            self.deps.load_timeout,
            self.deps.signals.clone(),
        ));

        info!(generation, app_id = %self.config.app_id, "loading chat runtime");
        self.readiness = Readiness::NotLoaded;
        self.instance = Some(RuntimeInstance {
            generation,
            runtime,
            writer,
            writer_task,
            load_task,
        });
    }

    /// Opens the view-ready gate after the page finished loading.
    pub(crate) fn mark_view_ready(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.readiness != Readiness::NotLoaded {
            debug!(generation, "ignoring stale load completion");
            return false;
        }
        self.readiness = Readiness::ViewReady;
        debug!(generation, "view ready");
        self.flush();
        true
    }

    /// Sends the `startSession` handshake. Only the first call per instance
    /// yields a reply; the handshake itself waits only for the view gate.
    pub(crate) fn begin_restore(&mut self, credentials: Option<Credentials>) -> Option<PendingReply> {
        if self.readiness != Readiness::ViewReady {
            debug!(
                readiness = self.readiness.as_str(),
                "restore already started for this runtime"
            );
            return None;
        }
        self.readiness = Readiness::Restoring;
        Some(self.request(
            OutboundAction::StartSession { credentials },
            WaitFor::ViewReady,
        ))
    }

    /// Opens the session-restored gate. `replay` is delivered before the
    /// queued envelopes.
    pub(crate) fn mark_restored(&mut self, generation: u64, replay: Vec<OutboundAction>) -> bool {
        if !self.is_current(generation) || self.readiness != Readiness::Restoring {
            debug!(generation, "ignoring stale restore completion");
            return false;
        }
        self.readiness = Readiness::Restored;
        info!(generation, replayed = replay.len(), "session restored");
        for action in replay {
            self.deliver(Queued {
                action,
                request_id: None,
                wait_for: WaitFor::SessionRestored,
            });
        }
        self.flush();
        for waiter in self.load_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        true
    }

    /// Load or restore failed for `generation`; the instance is discarded.
    pub(crate) fn fail_instance(&mut self, generation: u64, error: &ChatError) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        warn!(generation, error = %error, "chat runtime failed; discarding instance");
        self.destroy_runtime();
        true
    }

    pub(crate) fn enqueue_or_send(&mut self, action: OutboundAction, wait_for: WaitFor) {
        self.queue.push_back(Queued {
            action,
            request_id: None,
            wait_for,
        });
        self.flush();
    }

    /// Registers a request and queues its envelope. The reply expires after
    /// the configured request timeout.
    pub(crate) fn request(&mut self, action: OutboundAction, wait_for: WaitFor) -> PendingReply {
        let request_id = RequestId::new();
        let reply = self.pending.register(request_id.clone());

        let signals = self.deps.signals.clone();
        let expired = request_id.clone();
        let request_timeout = self.deps.request_timeout;
        let expiry = tokio::spawn(async move {
            sleep(request_timeout).await;
            let _ = signals.send(Signal::RequestExpired {
                request_id: expired,
            });
        });
        self.pending
            .attach_expiry(&request_id, expiry.abort_handle());

        self.queue.push_back(Queued {
            action,
            request_id: Some(request_id),
            wait_for,
        });
        self.flush();
        reply
    }

    /// Routes a message posted by runtime `generation`.
    pub(crate) fn dispatch(&mut self, generation: u64, message: Value) -> Option<Routed> {
        if !self.is_current(generation) {
            debug!(generation, "dropping message from stale runtime");
            return None;
        }
        match decode_inbound(message) {
            Ok(InboundMessage::Ack {
                request_id,
                outcome,
            }) => {
                match outcome {
                    Ok(value) => self.pending.resolve(&request_id, value),
                    Err(detail) => self
                        .pending
                        .fail(&request_id, ChatError::Reported(detail)),
                };
                None
            }
            Ok(InboundMessage::Emit(event)) => Some(Routed::Event(event)),
            Ok(InboundMessage::Error(detail)) => {
                warn!(generation, "chat runtime reported an error");
                Some(Routed::Failure(ChatError::Reported(detail)))
            }
            Ok(InboundMessage::Unknown(action)) => {
                debug!(generation, action = %action, "ignoring unknown inbound action");
                None
            }
            Err(err) => {
                warn!(generation, error = %err, "malformed inbound message");
                Some(Routed::Failure(err.into()))
            }
        }
    }

    pub(crate) fn fail_request(&mut self, request_id: &RequestId, error: ChatError) {
        self.pending.fail(request_id, error);
    }

    pub(crate) fn expire_request(&mut self, request_id: &RequestId) {
        if self.pending.expire(request_id) {
            warn!(request_id = %request_id, "request timed out without ack");
        }
    }

    /// Tears the runtime down. Queued envelopes are dropped and every waiter
    /// fails with `RuntimeNotReady`; a later load starts a fresh instance.
    pub(crate) fn destroy_runtime(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.pending.cancel_all(ChatError::RuntimeNotReady);
        for waiter in self.load_waiters.drain(..) {
            let _ = waiter.send(Err(ChatError::RuntimeNotReady));
        }
        self.readiness = Readiness::NotLoaded;
        if let Some(instance) = self.instance.take() {
            instance.load_task.abort();
            instance.writer_task.abort();
            instance.runtime.teardown();
            info!(
                generation = instance.generation,
                dropped, "chat runtime torn down"
            );
        }
    }

    fn flush(&mut self) {
        if self.instance.is_none() {
            return;
        }
        let readiness = self.readiness;
        let queued = std::mem::take(&mut self.queue);
        for item in queued {
            if readiness.admits(item.wait_for) {
                self.deliver(item);
            } else {
                self.queue.push_back(item);
            }
        }
    }

    fn deliver(&mut self, item: Queued) {
        let Some(instance) = self.instance.as_ref() else {
            self.queue.push_back(item);
            return;
        };

        let mut envelope = match OutboundEnvelope::new(&item.action) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(action = item.action.name(), error = %err, "failed to encode envelope");
                if let Some(request_id) = &item.request_id {
                    self.pending.fail(request_id, err.into());
                }
                return;
            }
        };
        if let Some(request_id) = &item.request_id {
            envelope = envelope.with_request_id(request_id.clone());
        }
        let script = match envelope.to_script() {
            Ok(script) => script,
            Err(err) => {
                warn!(action = envelope.action, error = %err, "failed to encode envelope");
                if let Some(request_id) = &item.request_id {
                    self.pending.fail(request_id, err.into());
                }
                return;
            }
        };

        debug!(
            generation = instance.generation,
            action = envelope.action,
            request_id = item.request_id.as_ref().map(RequestId::as_str),
            "sending envelope"
        );
        counter!("chatlink_envelopes_sent_total", "action" => envelope.action).increment(1);
        let frame = Frame {
            action: envelope.action,
            script,
            request_id: item.request_id,
        };
        if let Err(mpsc::error::SendError(frame)) = instance.writer.send(frame) {
            if let Some(request_id) = &frame.request_id {
                self.pending.fail(request_id, ChatError::RuntimeNotReady);
            }
        }
    }
}

impl Drop for RuntimeBridge {
    fn drop(&mut self) {
        self.destroy_runtime();
    }
}

struct BridgeListener {
    generation: u64,
    signals: SignalSender,
    delegate: Arc<dyn ChatDelegate>,
}

impl RuntimeListener for BridgeListener {
    fn on_message(&self, message: Value) {
        let _ = self.signals.send(Signal::Inbound {
            generation: self.generation,
            message,
        });
    }

    fn on_view_disappeared(&self) {
        let _ = self.signals.send(Signal::ViewDisappeared {
            generation: self.generation,
        });
    }

    fn on_link_clicked(&self, url: &Url) -> LinkAction {
        let action = self.delegate.link_did_click(url);
        debug!(generation = self.generation, url = %url, ?action, "link clicked");
        action
    }
}

async fn load_runtime(
    generation: u64,
    runtime: SharedRuntime,
    config: Arc<ChatConfig>,
    identity: Arc<IdentityCache>,
    load_timeout: Duration,
    signals: SignalSender,
) {
    let result = match timeout(load_timeout, load_page(&runtime, &config, &identity)).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::Unknown(format!(
            "widget page did not load within {load_timeout:?}"
        ))),
    };
    let _ = signals.send(Signal::RuntimeLoaded { generation, result });
}

async fn load_page(
    runtime: &SharedRuntime,
    config: &ChatConfig,
    identity: &IdentityCache,
) -> Result<(), ChatError> {
    let team_id = identity.team_id().await;
    let url = config.widget_url(&team_id)?;
    debug!(host = config.host(), "loading widget page");
    runtime.load(url).await?;
    Ok(())
}

/// Evaluates frames one at a time so envelopes reach the page in queue order.
async fn write_frames(
    generation: u64,
    runtime: SharedRuntime,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    signals: SignalSender,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(err) = runtime.evaluate(frame.script).await {
            warn!(generation, action = frame.action, error = %err, "script evaluation failed");
            if let Some(request_id) = frame.request_id {
                let _ = signals.send(Signal::SendFailed {
                    request_id,
                    error: err.into(),
                });
            }
        }
    }
}
