use std::sync::Arc;

use chatlink_core::{
    ChatConfig, ChatDelegate, ChatError, Credentials, EmbedContainer, IdentityLookup, ModalHost,
    NoIdentity, NoopDelegate, RuntimeFactory, UnreadMessageInfo, VisitorProfile,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, warn};

use crate::{
    bridge::IdentityCache,
    controller::{Command, Controller, ControllerDeps, HideRequest, SessionSnapshot},
    settings::SessionSettings,
};

/// Collaborators handed to a new session controller.
pub struct SessionDeps {
    pub runtime_factory: Arc<dyn RuntimeFactory>,
    pub delegate: Arc<dyn ChatDelegate>,
    pub identity: Arc<dyn IdentityLookup>,
    /// Used by `present(None)`.
    pub modal_host: Option<Arc<dyn ModalHost>>,
    pub settings: SessionSettings,
}

impl SessionDeps {
    pub fn new(runtime_factory: Arc<dyn RuntimeFactory>) -> Self {
        Self {
            runtime_factory,
            delegate: Arc::new(NoopDelegate),
            identity: Arc::new(NoIdentity),
            modal_host: None,
            settings: SessionSettings::default(),
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn ChatDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityLookup>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_modal_host(mut self, host: Arc<dyn ModalHost>) -> Self {
        self.modal_host = Some(host);
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Handle to a chat session controller.
///
/// Operations are queued onto the controller task and return immediately,
/// except the `async` ones that wait for a result. Misuse (presenting before
/// starting, configuring a running session) is logged and ignored. The
/// controller shuts down and tears its runtime down once every clone of the
/// handle is dropped.
///
/// `is_chat_visible`, `is_session_started` and [`subscribe`](Self::subscribe)
/// reflect the state after the last operation the controller has processed.
#[derive(Clone)]
pub struct ChatSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionSnapshot>,
}

impl ChatSession {
    /// Spawns the controller on the current Tokio runtime, inside the
    /// caller's current span.
    pub fn spawn(deps: SessionDeps) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());

        let controller = Controller::new(
            ControllerDeps {
                factory: deps.runtime_factory,
                delegate: deps.delegate,
                identity: Arc::new(IdentityCache::new(deps.identity)),
                default_host: deps.modal_host,
                settings: deps.settings,
            },
            signals_tx,
            state_tx,
        );
        tokio::spawn(controller.run(commands_rx, signals_rx).in_current_span());

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("chat controller is no longer running");
        }
    }

    pub fn configure(&self, config: ChatConfig) {
        self.send(Command::Configure(config));
    }

    /// Overrides the widget language for the next session.
    pub fn set_language(&self, language: impl Into<String>) {
        self.send(Command::SetLanguage(language.into()));
    }

    pub fn start_session(&self, credentials: Option<Credentials>) {
        self.send(Command::StartSession(credentials));
    }

    /// Stops the session and resolves once it is torn down, at the latest
    /// after the stop fallback delay.
    pub async fn stop_session(&self, clear_cache: bool) {
        let (done, finished) = oneshot::channel();
        self.send(Command::StopSession { clear_cache, done });
        // A dropped sender means the controller is gone, which is stopped too.
        let _ = finished.await;
    }

    pub fn set_visitor_data(&self, visitor: VisitorProfile, hash: Option<String>) {
        self.send(Command::SetVisitorData { visitor, hash });
    }

    /// Presents the chat modally on `host`, or on the default host.
    pub fn present(&self, host: Option<Arc<dyn ModalHost>>) {
        self.send(Command::Present(host));
    }

    pub fn embed(&self, container: Arc<dyn EmbedContainer>) {
        self.send(Command::Embed(container));
    }

    pub fn dismiss(&self) {
        self.send(Command::Hide(HideRequest::Dismiss));
    }

    pub fn remove(&self) {
        self.send(Command::Hide(HideRequest::Remove));
    }

    pub fn set_device_token(&self, token: impl Into<String>) {
        self.send(Command::SetDeviceToken(token.into()));
    }

    pub fn start_bot(&self, bot_id: impl Into<String>) {
        self.send(Command::StartBot(bot_id.into()));
    }

    pub fn open_faq(&self) {
        self.send(Command::OpenFaq(None));
    }

    pub fn open_faq_article(&self, article_slug: impl Into<String>) {
        self.send(Command::OpenFaq(Some(article_slug.into())));
    }

    pub async fn get_unread_message(&self) -> Result<UnreadMessageInfo, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetUnreadMessage(reply));
        rx.await.unwrap_or(Err(ChatError::RuntimeNotReady))
    }

    pub async fn can_start_bot(&self, bot_id: Option<String>) -> Result<bool, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CanStartBot { bot_id, reply });
        rx.await.unwrap_or(Err(ChatError::RuntimeNotReady))
    }

    pub fn is_chat_visible(&self) -> bool {
        self.state.borrow().visibility.is_visible()
    }

    pub fn is_session_started(&self) -> bool {
        self.state.borrow().session.is_started()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }
}
