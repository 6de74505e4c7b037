use std::sync::Arc;

use chatlink_core::{BannerContent, BannerOutcome, InAppBanner, ModalHost, PushNotification};
use tracing::{debug, info};

use crate::session::ChatSession;

/// What happened to a push notification handed to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDisposition {
    /// The payload has no operator; it belongs to someone else.
    NotOurs,
    SessionInactive,
    /// The chat is on screen already; nothing to surface.
    ChatVisible,
    Unparseable,
    NoBanner,
    BannerDismissed,
    Presented,
}

/// Routes widget push notifications to the chat.
///
/// Checking visibility and then presenting races with `present()` calls made
/// elsewhere; a second present on an already presented chat is a no-op in the
/// controller, so either order ends in a single presentation.
#[derive(Clone)]
pub struct PushCorrelator {
    session: ChatSession,
    banner: Option<Arc<dyn InAppBanner>>,
}

impl PushCorrelator {
    pub fn new(session: ChatSession) -> Self {
        Self {
            session,
            banner: None,
        }
    }

    pub fn with_banner(mut self, banner: Arc<dyn InAppBanner>) -> Self {
        self.banner = Some(banner);
        self
    }

    pub fn is_widget_push(&self, notification: &PushNotification) -> bool {
        notification.is_widget_push()
    }

    /// Whether the OS should show its own alert for a notification arriving
    /// in the foreground. Widget pushes are suppressed while the chat is open.
    pub fn should_display_alert(&self, notification: &PushNotification) -> bool {
        !(notification.is_widget_push() && self.session.is_chat_visible())
    }

    /// The user opened a notification from the system tray.
    pub fn on_notification_opened(
        &self,
        notification: &PushNotification,
        host: Option<Arc<dyn ModalHost>>,
    ) -> PushDisposition {
        if let Some(disposition) = self.screen(notification) {
            return disposition;
        }
        info!("opening chat from push notification");
        self.session.present(host);
        PushDisposition::Presented
    }

    /// A notification arrived while the app is in the foreground: offer an
    /// in-app banner and present the chat when it is tapped.
    pub async fn handle_foreground(
        &self,
        notification: &PushNotification,
        host: Option<Arc<dyn ModalHost>>,
    ) -> PushDisposition {
        if let Some(disposition) = self.screen(notification) {
            return disposition;
        }
        let payload = match notification.parse() {
            Ok(payload) => payload,
            Err(err) => {
                debug!(error = %err, "ignoring malformed widget push");
                return PushDisposition::Unparseable;
            }
        };
        let Some(banner) = self.banner.as_ref() else {
            debug!("no in-app banner configured");
            return PushDisposition::NoBanner;
        };

        let content = BannerContent {
            title: payload.operator.name.clone(),
            body: notification.display_message(&payload),
            image: Some(payload.operator.image.clone()).filter(|image| !image.is_empty()),
        };
        match banner.show(content).await {
            BannerOutcome::Tapped => {
                info!("opening chat from in-app banner");
                self.session.present(host);
                PushDisposition::Presented
            }
            BannerOutcome::Dismissed => PushDisposition::BannerDismissed,
        }
    }

    fn screen(&self, notification: &PushNotification) -> Option<PushDisposition> {
        if !notification.is_widget_push() {
            return Some(PushDisposition::NotOurs);
        }
        if !self.session.is_session_started() {
            debug!("widget push received without an active session");
            return Some(PushDisposition::SessionInactive);
        }
        if self.session.is_chat_visible() {
            return Some(PushDisposition::ChatVisible);
        }
        None
    }
}
