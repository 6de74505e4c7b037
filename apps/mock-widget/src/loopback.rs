//! Widget runtime that answers the bridge protocol in-process.
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chatlink_core::{
    ChatDelegate, ChatError, LinkAction, ModalHost, RuntimeError, RuntimeFactory,
    SharedListener, SharedRuntime, UnreadMessageInfo, WidgetRuntime, decode_script,
};
use serde_json::{Value, json};
use tracing::info;
use url::Url;

#[derive(Default)]
pub struct LoopbackFactory {
    unread: u64,
}

impl LoopbackFactory {
    pub fn with_unread(unread: u64) -> Self {
        Self { unread }
    }
}

impl RuntimeFactory for LoopbackFactory {
    fn create(&self, listener: SharedListener) -> SharedRuntime {
        Arc::new(LoopbackWidget {
            listener,
            unread: self.unread,
            loaded: Mutex::new(None),
        })
    }
}

/// Acks every request and plays the widget side of `startBot` and
/// `getUnreadMessage`.
pub struct LoopbackWidget {
    listener: SharedListener,
    unread: u64,
    loaded: Mutex<Option<Url>>,
}

impl LoopbackWidget {
    fn reply(&self, envelope: &Value) -> Vec<Value> {
        let action = envelope["action"].as_str().unwrap_or_default();
        let request_id = envelope["requestId"].as_str();
        let mut replies = Vec::new();

        let ack_payload = match action {
            "getUnreadMessage" => json!({ "count": self.unread, "lastMessageText": "Hi there" }),
            "canStartBot" => json!(true),
            _ => json!({}),
        };
        if let Some(request_id) = request_id {
            replies.push(json!({ "action": "ack", "requestId": request_id, "payload": ack_payload }));
        }
        if action == "startBot" {
            replies.push(json!({ "action": "emit", "payload": { "name": "chat.start" } }));
            replies.push(json!({
                "action": "emit",
                "payload": { "name": "chat.unreadChange", "data": { "count": self.unread } }
            }));
        }
        replies
    }
}

#[async_trait]
impl WidgetRuntime for LoopbackWidget {
    async fn load(&self, url: Url) -> Result<(), RuntimeError> {
        info!(%url, "loopback page loaded");
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = Some(url);
        Ok(())
    }

    async fn evaluate(&self, script: String) -> Result<(), RuntimeError> {
        if self
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return Err(RuntimeError::Closed);
        }
        let envelope =
            decode_script(&script).map_err(|err| RuntimeError::Evaluate(err.to_string()))?;
        info!(action = %envelope["action"], "widget received envelope");
        for reply in self.reply(&envelope) {
            self.listener.on_message(reply);
        }
        Ok(())
    }

    fn teardown(&self) {
        info!("loopback page closed");
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Delegate that logs every notification.
pub struct LogDelegate;

impl ChatDelegate for LogDelegate {
    fn chat_did_start(&self) {
        info!("delegate: chat started");
    }

    fn chat_did_present(&self) {
        info!("delegate: chat presented");
    }

    fn chat_did_dismiss(&self) {
        info!("delegate: chat dismissed");
    }

    fn chat_did_fail(&self, error: &ChatError) {
        tracing::warn!(kind = error.kind().as_str(), detail = %error.detail(), "delegate: chat failed");
    }

    fn unread_message_did_change(&self, info: &UnreadMessageInfo) {
        info!(count = info.count, "delegate: unread changed");
    }

    fn link_did_click(&self, url: &Url) -> LinkAction {
        info!(%url, "delegate: link clicked");
        LinkAction::Allow
    }
}

/// Modal host standing in for an attached window.
pub struct ConsoleHost;

impl ModalHost for ConsoleHost {
    fn is_attached_to_window(&self) -> bool {
        true
    }

    fn present(&self, _runtime: &SharedRuntime) {
        info!("host: chat view presented");
    }

    fn dismiss(&self, _runtime: &SharedRuntime) {
        info!("host: chat view dismissed");
    }
}
