use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Identity pair used once to restore server-side session state after the widget loads.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub id: String,
    pub token: String,
}

impl Credentials {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Visitor details forwarded to the widget.
///
/// ```
/// use chatlink_core::VisitorProfile;
///
/// let visitor = VisitorProfile::default()
///     .with_name("Bob")
///     .with_custom("plan", serde_json::json!("pro"));
/// assert_eq!(visitor.name.as_deref(), Some("Bob"));
/// assert_eq!(visitor.custom["plan"], "pro");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitorProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, Value>,
}

impl VisitorProfile {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// Outstanding "start bot" intent, replayed after a session restore until the
/// widget confirms the chat started.
#[derive(Debug, Clone, PartialEq)]
pub struct BotRequest {
    pub bot_id: String,
    /// Milliseconds since the Unix epoch at which the intent was issued.
    pub issued_at_ms: f64,
}

impl BotRequest {
    pub fn new(bot_id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            bot_id: bot_id.into(),
            issued_at_ms: (now.unix_timestamp_nanos() / 1_000_000) as f64,
        }
    }
}

/// Operator attached to unread-message notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub color_id: Option<i64>,
    #[serde(default)]
    pub is_bot: Option<bool>,
}

/// Unread message summary reported by `chat.unreadChange` and `getUnreadMessage`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadMessageInfo {
    pub count: u64,
    pub last_message_text: Option<String>,
    pub last_message_author: Option<Operator>,
    pub last_message_at: Option<OffsetDateTime>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUnread {
    count: u64,
    #[serde(default)]
    last_message_text: Option<String>,
    #[serde(default)]
    last_message_author: Option<Value>,
    #[serde(default)]
    last_message_at: Option<f64>,
}

impl UnreadMessageInfo {
    /// Decodes the widget's unread summary. `count` is mandatory; a malformed
    /// author or timestamp is dropped rather than failing the whole payload.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let raw: RawUnread = serde_json::from_value(value)?;
        let last_message_author = raw
            .last_message_author
            .filter(Value::is_object)
            .and_then(|author| serde_json::from_value(author).ok());
        let last_message_at = raw.last_message_at.and_then(|secs| {
            OffsetDateTime::from_unix_timestamp_nanos((secs * 1_000_000_000.0) as i128).ok()
        });
        Ok(Self {
            count: raw.count,
            last_message_text: raw.last_message_text,
            last_message_author,
            last_message_at,
        })
    }
}

/// Host decision for a link the widget tried to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkAction {
    #[default]
    Allow,
    Cancel,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    NotStarted,
    Starting,
    Active,
    Stopping,
}

impl SessionState {
    /// True for every state in which a runtime bridge exists.
    pub fn is_started(self) -> bool {
        !matches!(self, SessionState::NotStarted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::NotStarted => "not_started",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Where the chat view currently lives. `Presented` and `Embedded` are
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityState {
    #[default]
    Hidden,
    Presented,
    Embedded,
}

impl VisibilityState {
    pub fn is_visible(self) -> bool {
        !matches!(self, VisibilityState::Hidden)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VisibilityState::Hidden => "hidden",
            VisibilityState::Presented => "presented",
            VisibilityState::Embedded => "embedded",
        }
    }
}
