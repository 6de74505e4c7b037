//! Narrow capability traits supplied by the host application.
//!
//! The session layer only talks to the widget runtime, the presentation
//! surfaces and the identity lookup through these seams, so tests and the
//! mock widget can swap in their own implementations.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::{
    error::{ChatError, RuntimeError},
    types::{LinkAction, UnreadMessageInfo},
};

/// The embedded web runtime hosting the widget page.
#[async_trait]
pub trait WidgetRuntime: Send + Sync {
    /// Loads the widget page; resolves once the page finished loading.
    async fn load(&self, url: Url) -> Result<(), RuntimeError>;

    /// Evaluates a script inside the loaded page.
    async fn evaluate(&self, script: String) -> Result<(), RuntimeError>;

    /// Releases the runtime. Further calls fail with [`RuntimeError::Closed`].
    fn teardown(&self);
}

pub type SharedRuntime = Arc<dyn WidgetRuntime>;

/// Callbacks the runtime raises towards the session layer.
pub trait RuntimeListener: Send + Sync {
    /// A JSON object posted by the page.
    fn on_message(&self, message: Value);

    /// The runtime's view disappeared without a dismiss request (e.g. swiped away).
    fn on_view_disappeared(&self);

    /// The page attempts to navigate to `url`.
    fn on_link_clicked(&self, url: &Url) -> LinkAction;
}

pub type SharedListener = Arc<dyn RuntimeListener>;

/// Creates one runtime instance per load cycle.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, listener: SharedListener) -> SharedRuntime;
}

/// Host-facing notifications. Every method has a no-op default.
pub trait ChatDelegate: Send + Sync {
    fn chat_did_start(&self) {}

    fn chat_did_present(&self) {}

    fn chat_did_dismiss(&self) {}

    fn chat_did_fail(&self, _error: &ChatError) {}

    fn unread_message_did_change(&self, _info: &UnreadMessageInfo) {}

    fn link_did_click(&self, _url: &Url) -> LinkAction {
        LinkAction::Allow
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl ChatDelegate for NoopDelegate {}

/// Best-effort device/team identity discovery.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn team_id(&self) -> Option<String>;
}

/// Identity lookup returning a fixed value.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

#[async_trait]
impl IdentityLookup for StaticIdentity {
    async fn team_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoIdentity;

#[async_trait]
impl IdentityLookup for NoIdentity {
    async fn team_id(&self) -> Option<String> {
        None
    }
}

/// Surface able to show the runtime's view modally.
pub trait ModalHost: Send + Sync {
    /// Whether the host surface is currently attached to a window and can present.
    fn is_attached_to_window(&self) -> bool;

    fn present(&self, runtime: &SharedRuntime);

    fn dismiss(&self, runtime: &SharedRuntime);
}

/// Container the runtime's view can be embedded into inline.
pub trait EmbedContainer: Send + Sync {
    fn attach(&self, runtime: &SharedRuntime);

    fn detach(&self, runtime: &SharedRuntime);
}

/// Content for an in-app notification banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerContent {
    pub title: String,
    pub body: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerOutcome {
    Tapped,
    Dismissed,
}

/// Renders an in-app banner and reports how the user reacted.
#[async_trait]
pub trait InAppBanner: Send + Sync {
    async fn show(&self, content: BannerContent) -> BannerOutcome;
}
