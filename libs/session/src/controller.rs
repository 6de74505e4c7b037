//! Owner context for all session and bridge state.
//!
//! Public operations arrive as [`Command`]s from `ChatSession` handles; spawned
//! work (runtime loads, acks, timers) reports back as [`Signal`]s. Both are
//! processed one at a time by [`Controller::run`], so the session and
//! visibility state machines never see concurrent mutation.
use std::sync::Arc;

use chatlink_core::{
    BotRequest, ChatConfig, ChatDelegate, ChatError, Credentials, EmbedContainer, ModalHost,
    OutboundAction, RequestId, RuntimeFactory, SessionState, SharedRuntime, UnreadMessageInfo,
    VisibilityState, VisitorProfile, WidgetEvent, decode_can_start_bot, decode_unread_response,
};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::AbortHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    bridge::{BridgeDeps, IdentityCache, RuntimeBridge, Routed},
    gate::WaitFor,
    pending::PendingReply,
    settings::{HideMode, SessionSettings},
};

pub(crate) type SignalSender = mpsc::UnboundedSender<Signal>;

/// Observable controller state published after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionSnapshot {
    pub session: SessionState,
    pub visibility: VisibilityState,
    /// Whether the current runtime finished the session-restore handshake.
    pub restored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HideRequest {
    Dismiss,
    Remove,
}

impl HideRequest {
    fn as_str(self) -> &'static str {
        match self {
            HideRequest::Dismiss => "dismiss",
            HideRequest::Remove => "remove",
        }
    }
}

pub(crate) enum Command {
    Configure(ChatConfig),
    SetLanguage(String),
    StartSession(Option<Credentials>),
    StopSession {
        clear_cache: bool,
        done: oneshot::Sender<()>,
    },
    SetVisitorData {
        visitor: VisitorProfile,
        hash: Option<String>,
    },
    Present(Option<Arc<dyn ModalHost>>),
    Embed(Arc<dyn EmbedContainer>),
    Hide(HideRequest),
    SetDeviceToken(String),
    StartBot(String),
    OpenFaq(Option<String>),
    GetUnreadMessage(oneshot::Sender<Result<UnreadMessageInfo, ChatError>>),
    CanStartBot {
        bot_id: Option<String>,
        reply: oneshot::Sender<Result<bool, ChatError>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    Acknowledged,
    Unacknowledged,
    Fallback,
    LoadFailed,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            StopReason::Acknowledged => "acknowledged",
            StopReason::Unacknowledged => "unacknowledged",
            StopReason::Fallback => "fallback_timeout",
            StopReason::LoadFailed => "load_failed",
        }
    }
}

pub(crate) enum Signal {
    RuntimeLoaded {
        generation: u64,
        result: Result<(), ChatError>,
    },
    RestoreFinished {
        generation: u64,
        result: Result<Value, ChatError>,
    },
    Inbound {
        generation: u64,
        message: Value,
    },
    ViewDisappeared {
        generation: u64,
    },
    SendFailed {
        request_id: RequestId,
        error: ChatError,
    },
    RequestExpired {
        request_id: RequestId,
    },
    StopReady {
        epoch: u64,
        result: Result<(), ChatError>,
    },
    StopFinished {
        epoch: u64,
        reason: StopReason,
    },
    PresentRetry {
        epoch: u64,
        attempt: u32,
        host: Arc<dyn ModalHost>,
    },
    InactivityElapsed {
        epoch: u64,
    },
}

enum Surface {
    Modal(Arc<dyn ModalHost>),
    Embedded(Arc<dyn EmbedContainer>),
}

struct StopInFlight {
    epoch: u64,
    clear_cache: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

pub(crate) struct ControllerDeps {
    pub factory: Arc<dyn RuntimeFactory>,
    pub delegate: Arc<dyn ChatDelegate>,
    pub identity: Arc<IdentityCache>,
    pub default_host: Option<Arc<dyn ModalHost>>,
    pub settings: SessionSettings,
}

pub(crate) struct Controller {
    deps: ControllerDeps,
    signals: SignalSender,
    state: watch::Sender<SessionSnapshot>,
    config: Option<ChatConfig>,
    language: Option<String>,
    device_token: Option<String>,
    credentials: Option<Credentials>,
    visitor: Option<(VisitorProfile, Option<String>)>,
    pending_bot: Option<BotRequest>,
    session: SessionState,
    visibility: VisibilityState,
    surface: Option<Surface>,
    bridge: Option<RuntimeBridge>,
    stop: Option<StopInFlight>,
    stop_epoch: u64,
    present_epoch: u64,
    inactivity_epoch: u64,
    inactivity_timer: Option<AbortHandle>,
}

impl Controller {
    pub(crate) fn new(
        deps: ControllerDeps,
        signals: SignalSender,
        state: watch::Sender<SessionSnapshot>,
    ) -> Self {
        Self {
            deps,
            signals,
            state,
            config: None,
            language: None,
            device_token: None,
            credentials: None,
            visitor: None,
            pending_bot: None,
            session: SessionState::NotStarted,
            visibility: VisibilityState::Hidden,
            surface: None,
            bridge: None,
            stop: None,
            stop_epoch: 0,
            present_epoch: 0,
            inactivity_epoch: 0,
            inactivity_timer: None,
        }
    }

    /// Processes commands and signals until every handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
            }
        }
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Configure(config) => self.configure(config),
            Command::SetLanguage(language) => self.set_language(language),
            Command::StartSession(credentials) => self.start_session(credentials),
            Command::StopSession { clear_cache, done } => self.stop_session(clear_cache, done),
            Command::SetVisitorData { visitor, hash } => self.set_visitor_data(visitor, hash),
            Command::Present(host) => self.present(host),
            Command::Embed(container) => self.embed(container),
            Command::Hide(request) => self.hide(request),
            Command::SetDeviceToken(token) => self.set_device_token(token),
            Command::StartBot(bot_id) => self.start_bot(bot_id),
            Command::OpenFaq(article) => self.open_faq(article),
            Command::GetUnreadMessage(reply) => self.get_unread_message(reply),
            Command::CanStartBot { bot_id, reply } => self.can_start_bot(bot_id, reply),
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::RuntimeLoaded { generation, result } => self.on_runtime_loaded(generation, result),
            Signal::RestoreFinished { generation, result } => {
                self.on_restore_finished(generation, result)
            }
            Signal::Inbound {
                generation,
                message,
            } => self.on_inbound(generation, message),
            Signal::ViewDisappeared { generation } => self.on_view_disappeared(generation),
            Signal::SendFailed { request_id, error } => {
                if let Some(bridge) = self.bridge.as_mut() {
                    bridge.fail_request(&request_id, error);
                }
            }
            Signal::RequestExpired { request_id } => {
                if let Some(bridge) = self.bridge.as_mut() {
                    bridge.expire_request(&request_id);
                }
            }
            Signal::StopReady { epoch, result } => self.on_stop_ready(epoch, result),
            Signal::StopFinished { epoch, reason } => self.finish_stop(epoch, reason),
            Signal::PresentRetry {
                epoch,
                attempt,
                host,
            } => self.try_present(host, epoch, attempt),
            Signal::InactivityElapsed { epoch } => self.on_inactivity_elapsed(epoch),
        }
    }

    fn configure(&mut self, config: ChatConfig) {
        if self.session.is_started() {
            warn!(
                state = self.session.as_str(),
                "configure ignored while a session is started"
            );
            return;
        }
        if let Err(err) = config.validate() {
            warn!(error = %err, "configure ignored: invalid configuration");
            return;
        }
        info!(app_id = %config.app_id, region = %config.region, "chat configured");
        self.config = Some(config);
    }

    fn set_language(&mut self, language: String) {
        if self.session.is_started() {
            warn!(
                state = self.session.as_str(),
                "setLanguage ignored while a session is started"
            );
            return;
        }
        debug!(language = %language, "language override stored");
        self.language = Some(language);
    }

    fn start_session(&mut self, credentials: Option<Credentials>) {
        if self.session.is_started() {
            warn!(
                state = self.session.as_str(),
                "startSession ignored: session already started"
            );
            return;
        }
        let Some(mut config) = self.config.clone() else {
            warn!("startSession ignored: chat is not configured");
            return;
        };
        if let Some(language) = &self.language {
            config.language = Some(language.clone());
        }
        if let Some(token) = &self.device_token {
            config.device_token = Some(token.clone());
        }
        self.credentials = credentials;

        let identity = Arc::clone(&self.deps.identity);
        tokio::spawn(async move {
            identity.team_id().await;
        });

        let mut bridge = RuntimeBridge::new(
            config,
            BridgeDeps {
                factory: Arc::clone(&self.deps.factory),
                delegate: Arc::clone(&self.deps.delegate),
                identity: Arc::clone(&self.deps.identity),
                signals: self.signals.clone(),
                request_timeout: self.deps.settings.request_timeout,
                load_timeout: self.deps.settings.load_timeout,
            },
        );
        bridge.load_if_needed(None);
        self.bridge = Some(bridge);
        self.session = SessionState::Starting;
        info!(
            with_credentials = self.credentials.is_some(),
            "chat session starting"
        );
        self.publish();
    }

    fn stop_session(&mut self, clear_cache: bool, done: oneshot::Sender<()>) {
        if let Some(stop) = self.stop.as_mut() {
            debug!(epoch = stop.epoch, "joining in-flight stop");
            stop.waiters.push(done);
            return;
        }
        if !self.session.is_started() {
            debug!("stopSession on a stopped session");
            let _ = done.send(());
            return;
        }

        self.stop_epoch += 1;
        let epoch = self.stop_epoch;
        self.stop = Some(StopInFlight {
            epoch,
            clear_cache,
            waiters: vec![done],
        });
        self.session = SessionState::Stopping;
        info!(epoch, clear_cache, "chat session stopping");
        self.publish();

        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.load_if_needed(Some(ready_tx));
        }
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let result = ready_rx.await.unwrap_or(Err(ChatError::RuntimeNotReady));
            let _ = signals.send(Signal::StopReady { epoch, result });
        });
    }

    fn on_stop_ready(&mut self, epoch: u64, result: Result<(), ChatError>) {
        let Some(clear_cache) = self
            .stop
            .as_ref()
            .filter(|stop| stop.epoch == epoch)
            .map(|stop| stop.clear_cache)
        else {
            return;
        };
        if let Err(err) = result {
            debug!(epoch, error = %err, "runtime unavailable for stop");
            self.finish_stop(epoch, StopReason::LoadFailed);
            return;
        }
        let Some(bridge) = self.bridge.as_mut() else {
            self.finish_stop(epoch, StopReason::LoadFailed);
            return;
        };

        // The load wait is bounded by the load and restore timeouts; the
        // fallback only covers a missing stopSession ack.
        let reply = bridge.request(
            OutboundAction::StopSession { clear_cache },
            WaitFor::SessionRestored,
        );
        let signals = self.signals.clone();
        let fallback = self.deps.settings.stop_fallback;
        tokio::spawn(async move {
            sleep(fallback).await;
            let _ = signals.send(Signal::StopFinished {
                epoch,
                reason: StopReason::Fallback,
            });
        });

        let signals = self.signals.clone();
        tokio::spawn(async move {
            let reason = match reply.wait().await {
                Ok(_) => StopReason::Acknowledged,
                Err(err) => {
                    debug!(epoch, error = %err, "stopSession was not acknowledged");
                    StopReason::Unacknowledged
                }
            };
            let _ = signals.send(Signal::StopFinished { epoch, reason });
        });
    }

    /// Tears the session down. Runs once per stop; later completions for the
    /// same epoch find nothing to do.
    fn finish_stop(&mut self, epoch: u64, reason: StopReason) {
        let Some(stop) = self.stop.take_if(|stop| stop.epoch == epoch) else {
            debug!(
                epoch,
                reason = reason.as_str(),
                "stop already completed; ignoring"
            );
            return;
        };

        if self.visibility.is_visible() {
            self.hide_current();
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.destroy_runtime();
        }
        self.session = SessionState::NotStarted;
        self.credentials = None;
        self.pending_bot = None;
        if self.deps.settings.flags.clear_visitor_on_stop {
            self.visitor = None;
        }
        self.present_epoch += 1;
        self.cancel_inactivity();
        info!(epoch, reason = reason.as_str(), "chat session stopped");
        self.publish();

        for waiter in stop.waiters {
            let _ = waiter.send(());
        }
    }

    fn set_visitor_data(&mut self, visitor: VisitorProfile, hash: Option<String>) {
        self.visitor = Some((visitor.clone(), hash.clone()));
        match self.bridge.as_mut() {
            Some(bridge) if bridge.readiness().is_restored() => bridge.enqueue_or_send(
                OutboundAction::SetVisitorData { visitor, hash },
                WaitFor::SessionRestored,
            ),
            Some(_) => debug!("visitor data held until the session is restored"),
            None => debug!("visitor data stored for the next session"),
        }
    }

    fn set_device_token(&mut self, token: String) {
        self.device_token = Some(token.clone());
        match self.bridge.as_mut() {
            Some(bridge) => {
                bridge.enqueue_or_send(OutboundAction::SetDeviceToken(token), WaitFor::SessionRestored)
            }
            None => debug!("device token stored for the next session"),
        }
    }

    fn start_bot(&mut self, bot_id: String) {
        if !self.accepts_operations("startBot") {
            return;
        }
        let bot = BotRequest::new(bot_id);
        info!(bot_id = %bot.bot_id, "bot start requested");
        self.pending_bot = Some(bot.clone());
        let Some(bridge) = self.bridge.as_mut() else {
            return;
        };
        if bridge.readiness().is_restored() {
            bridge.enqueue_or_send(OutboundAction::StartBot(bot), WaitFor::SessionRestored);
        } else {
            debug!("bot start held until the session is restored");
            bridge.load_if_needed(None);
        }
    }

    fn open_faq(&mut self, article: Option<String>) {
        if !self.accepts_operations("openFAQ") {
            return;
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.load_if_needed(None);
            bridge.enqueue_or_send(OutboundAction::OpenFaq { article }, WaitFor::SessionRestored);
        }
    }

    fn get_unread_message(&mut self, reply: oneshot::Sender<Result<UnreadMessageInfo, ChatError>>) {
        let Some(pending) = self.start_request(OutboundAction::GetUnreadMessage) else {
            let _ = reply.send(Err(ChatError::RuntimeNotReady));
            return;
        };
        tokio::spawn(async move {
            let result = pending
                .wait()
                .await
                .and_then(|value| decode_unread_response(value).map_err(ChatError::from));
            let _ = reply.send(result);
        });
    }

    fn can_start_bot(
        &mut self,
        bot_id: Option<String>,
        reply: oneshot::Sender<Result<bool, ChatError>>,
    ) {
        let Some(pending) = self.start_request(OutboundAction::CanStartBot { bot_id }) else {
            let _ = reply.send(Err(ChatError::RuntimeNotReady));
            return;
        };
        tokio::spawn(async move {
            let result = pending
                .wait()
                .await
                .and_then(|value| decode_can_start_bot(&value).map_err(ChatError::from));
            let _ = reply.send(result);
        });
    }

    /// Queues a request behind a completed load, starting one if needed.
    fn start_request(&mut self, action: OutboundAction) -> Option<PendingReply> {
        let name = action.name();
        if !self.accepts_operations(name) {
            return None;
        }
        let bridge = self.bridge.as_mut()?;
        bridge.load_if_needed(None);
        Some(bridge.request(action, WaitFor::SessionRestored))
    }

    fn accepts_operations(&self, operation: &'static str) -> bool {
        match self.session {
            SessionState::Starting | SessionState::Active => true,
            SessionState::Stopping => {
                warn!(operation, "ignored while the session is stopping");
                false
            }
            SessionState::NotStarted => {
                warn!(operation, "ignored: call startSession first");
                false
            }
        }
    }

    /// Like `accepts_operations`, but may start the session implicitly.
    fn ensure_started(&mut self, operation: &'static str) -> bool {
        if self.session == SessionState::NotStarted
            && self.deps.settings.flags.auto_start_on_present
            && self.config.is_some()
        {
            info!(operation, "starting session implicitly");
            self.start_session(None);
        }
        self.accepts_operations(operation)
    }

    /// Current runtime, creating and loading one if it was reclaimed.
    fn ensure_runtime(&mut self) -> Option<SharedRuntime> {
        let bridge = self.bridge.as_mut()?;
        bridge.load_if_needed(None);
        bridge.runtime()
    }

    fn present(&mut self, host: Option<Arc<dyn ModalHost>>) {
        let Some(host) = host.or_else(|| self.deps.default_host.clone()) else {
            warn!("present ignored: no modal host available");
            return;
        };
        if !self.ensure_started("present") {
            return;
        }
        self.present_epoch += 1;
        self.ensure_runtime();
        self.try_present(host, self.present_epoch, 0);
    }

    fn try_present(&mut self, host: Arc<dyn ModalHost>, epoch: u64, attempt: u32) {
        if epoch != self.present_epoch
            || !matches!(self.session, SessionState::Starting | SessionState::Active)
        {
            return;
        }
        if self.visibility == VisibilityState::Presented {
            debug!("chat already presented");
            return;
        }
        if !host.is_attached_to_window() {
            if attempt < self.deps.settings.present_retries {
                debug!(attempt, "modal host not attached to a window; retrying");
                let signals = self.signals.clone();
                let interval = self.deps.settings.present_retry_interval;
                tokio::spawn(async move {
                    sleep(interval).await;
                    let _ = signals.send(Signal::PresentRetry {
                        epoch,
                        attempt: attempt + 1,
                        host,
                    });
                });
            } else {
                debug!(attempts = attempt, "modal host never attached; giving up");
            }
            return;
        }
        let Some(runtime) = self.ensure_runtime() else {
            return;
        };

        self.leave_surface(&runtime);
        host.present(&runtime);
        self.surface = Some(Surface::Modal(host));
        self.set_visibility(VisibilityState::Presented);
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.enqueue_or_send(OutboundAction::SetClosable(true), WaitFor::SessionRestored);
        }
    }

    fn embed(&mut self, container: Arc<dyn EmbedContainer>) {
        if !self.ensure_started("embed") {
            return;
        }
        self.present_epoch += 1;
        let Some(runtime) = self.ensure_runtime() else {
            return;
        };

        self.leave_surface(&runtime);
        container.attach(&runtime);
        self.surface = Some(Surface::Embedded(container));
        self.set_visibility(VisibilityState::Embedded);
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.enqueue_or_send(OutboundAction::SetClosable(false), WaitFor::SessionRestored);
        }
    }

    fn hide(&mut self, request: HideRequest) {
        if !self.session.is_started() {
            warn!(
                operation = request.as_str(),
                "ignored: call startSession first"
            );
            return;
        }
        self.present_epoch += 1;
        let matching = matches!(
            (self.visibility, request),
            (VisibilityState::Presented, HideRequest::Dismiss)
                | (VisibilityState::Embedded, HideRequest::Remove)
        );
        if self.visibility == VisibilityState::Hidden {
            debug!(operation = request.as_str(), "chat already hidden");
        } else if matching {
            self.hide_current();
        } else {
            match self.deps.settings.flags.hide_mode {
                HideMode::CrossMode => {
                    debug!(
                        operation = request.as_str(),
                        visibility = self.visibility.as_str(),
                        "hiding chat in its current mode"
                    );
                    self.hide_current();
                }
                HideMode::Strict => warn!(
                    operation = request.as_str(),
                    visibility = self.visibility.as_str(),
                    "ignored: chat is shown in a different mode"
                ),
            }
        }
    }

    fn hide_current(&mut self) {
        match self.bridge.as_ref().and_then(RuntimeBridge::runtime) {
            Some(runtime) => self.leave_surface(&runtime),
            None => self.surface = None,
        }
        self.set_visibility(VisibilityState::Hidden);
    }

    /// Detaches the view from its current surface without touching visibility.
    fn leave_surface(&mut self, runtime: &SharedRuntime) {
        match self.surface.take() {
            Some(Surface::Modal(host)) => host.dismiss(runtime),
            Some(Surface::Embedded(container)) => container.detach(runtime),
            None => {}
        }
    }

    /// Notifications fire on hidden/visible edges only; switching between
    /// presented and embedded is silent.
    fn set_visibility(&mut self, next: VisibilityState) {
        let previous = self.visibility;
        if previous == next {
            return;
        }
        self.visibility = next;
        info!(
            from = previous.as_str(),
            to = next.as_str(),
            "chat visibility changed"
        );
        self.publish();

        match (previous.is_visible(), next.is_visible()) {
            (false, true) => {
                self.cancel_inactivity();
                self.deps.delegate.chat_did_present();
            }
            (true, false) => {
                self.deps.delegate.chat_did_dismiss();
                self.arm_inactivity();
            }
            _ => {}
        }
    }

    fn arm_inactivity(&mut self) {
        self.cancel_inactivity();
        if !self.bridge.as_ref().is_some_and(RuntimeBridge::has_runtime) {
            return;
        }
        let epoch = self.inactivity_epoch;
        let signals = self.signals.clone();
        let idle = self.deps.settings.inactivity_timeout;
        let timer = tokio::spawn(async move {
            sleep(idle).await;
            let _ = signals.send(Signal::InactivityElapsed { epoch });
        });
        self.inactivity_timer = Some(timer.abort_handle());
    }

    /// Invalidates and aborts the armed inactivity timer, if any.
    fn cancel_inactivity(&mut self) {
        self.inactivity_epoch += 1;
        if let Some(timer) = self.inactivity_timer.take() {
            timer.abort();
        }
    }

    fn on_inactivity_elapsed(&mut self, epoch: u64) {
        if epoch != self.inactivity_epoch || self.session == SessionState::Stopping {
            return;
        }
        if self.visibility.is_visible() {
            self.arm_inactivity();
            return;
        }
        if let Some(bridge) = self.bridge.as_mut() {
            if bridge.has_runtime() {
                info!("reclaiming idle chat runtime");
                counter!("chatlink_runtime_reclaims_total").increment(1);
                bridge.destroy_runtime();
                self.publish();
            }
        }
    }

    fn on_runtime_loaded(&mut self, generation: u64, result: Result<(), ChatError>) {
        let Some(bridge) = self.bridge.as_mut() else {
            return;
        };
        if !bridge.is_current(generation) {
            debug!(generation, "ignoring load result of a discarded runtime");
            return;
        }
        match result {
            Ok(()) => {
                counter!("chatlink_runtime_loads_total", "outcome" => "ok").increment(1);
                bridge.mark_view_ready(generation);
                if let Some(reply) = bridge.begin_restore(self.credentials.clone()) {
                    let signals = self.signals.clone();
                    tokio::spawn(async move {
                        let result = reply.wait().await;
                        let _ = signals.send(Signal::RestoreFinished { generation, result });
                    });
                }
                if !self.visibility.is_visible() {
                    self.arm_inactivity();
                }
            }
            Err(error) => {
                counter!("chatlink_runtime_loads_total", "outcome" => "error").increment(1);
                self.runtime_failed(generation, error);
            }
        }
    }

    fn on_restore_finished(&mut self, generation: u64, result: Result<Value, ChatError>) {
        if !self
            .bridge
            .as_ref()
            .is_some_and(|bridge| bridge.is_current(generation))
        {
            return;
        }
        if let Err(error) = result {
            self.runtime_failed(generation, error);
            return;
        }

        let mut replay = Vec::new();
        if let Some((visitor, hash)) = &self.visitor {
            replay.push(OutboundAction::SetVisitorData {
                visitor: visitor.clone(),
                hash: hash.clone(),
            });
        }
        if let Some(bot) = &self.pending_bot {
            replay.push(OutboundAction::StartBot(bot.clone()));
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.mark_restored(generation, replay);
        }
        if self.session == SessionState::Starting {
            self.session = SessionState::Active;
            info!(generation, "chat session active");
        }
        self.publish();
    }

    /// Load or restore failed: hide the chat, drop the instance, tell the host.
    /// The session stays started and the next operation reloads.
    fn runtime_failed(&mut self, generation: u64, error: ChatError) {
        if !self
            .bridge
            .as_ref()
            .is_some_and(|bridge| bridge.is_current(generation))
        {
            return;
        }
        if self.visibility.is_visible() {
            self.hide_current();
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.fail_instance(generation, &error);
        }
        self.publish();
        self.deps.delegate.chat_did_fail(&error);
    }

    fn on_inbound(&mut self, generation: u64, message: Value) {
        let routed = match self.bridge.as_mut() {
            Some(bridge) => bridge.dispatch(generation, message),
            None => None,
        };
        match routed {
            Some(Routed::Event(event)) => self.on_widget_event(event),
            Some(Routed::Failure(error)) => self.deps.delegate.chat_did_fail(&error),
            None => {}
        }
    }

    fn on_widget_event(&mut self, event: WidgetEvent) {
        match event {
            WidgetEvent::ChatStarted => {
                if let Some(bot) = self.pending_bot.take() {
                    debug!(bot_id = %bot.bot_id, "pending bot request confirmed");
                }
                info!("chat started");
                self.deps.delegate.chat_did_start();
            }
            WidgetEvent::ChatDismissed => {
                if self.visibility.is_visible() {
                    self.hide_current();
                }
            }
            WidgetEvent::ChatDenied(reason) => {
                warn!("chat session denied by the widget");
                if self.visibility.is_visible() {
                    self.hide_current();
                }
                self.deps.delegate.chat_did_fail(&ChatError::ChatDenied(reason));
            }
            WidgetEvent::UnreadChanged(info) => {
                debug!(count = info.count, "unread count changed");
                self.deps.delegate.unread_message_did_change(&info);
            }
            WidgetEvent::Other(name) => debug!(event = %name, "ignoring widget event"),
        }
    }

    fn on_view_disappeared(&mut self, generation: u64) {
        if !self
            .bridge
            .as_ref()
            .is_some_and(|bridge| bridge.is_current(generation))
        {
            return;
        }
        if self.visibility == VisibilityState::Presented {
            debug!("modal chat view disappeared");
            self.surface = None;
            self.set_visibility(VisibilityState::Hidden);
        }
    }

    fn publish(&self) {
        let restored = self
            .bridge
            .as_ref()
            .is_some_and(|bridge| bridge.readiness().is_restored());
        self.state.send_replace(SessionSnapshot {
            session: self.session,
            visibility: self.visibility,
            restored,
        });
    }

    fn shutdown(&mut self) {
        if self.visibility.is_visible() {
            self.hide_current();
        }
        self.cancel_inactivity();
        if let Some(mut bridge) = self.bridge.take() {
            bridge.destroy_runtime();
        }
        if let Some(stop) = self.stop.take() {
            for waiter in stop.waiters {
                let _ = waiter.send(());
            }
        }
        debug!("chat controller shut down");
    }
}
