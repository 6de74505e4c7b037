//! JSON envelope exchanged with the embedded widget.
//!
//! Outbound envelopes are wrapped in a script call evaluated inside the runtime;
//! inbound messages are posted back by the page as plain JSON objects and are
//! decoded into typed [`InboundMessage`] values as soon as they arrive.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{
    error::EnvelopeError,
    types::{BotRequest, Credentials, UnreadMessageInfo, VisitorProfile},
};

/// Page-side entry point receiving SDK messages.
pub const BRIDGE_FUNCTION: &str = "window.chatlinkBridge.receiveMessageFromSDK";

/// Correlation id attached to envelopes that expect an `ack`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Typed outbound action; each variant owns the payload shape the widget expects.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    StartSession { credentials: Option<Credentials> },
    StopSession { clear_cache: bool },
    SetVisitorData { visitor: VisitorProfile, hash: Option<String> },
    SetDeviceToken(String),
    StartBot(BotRequest),
    OpenFaq { article: Option<String> },
    SetClosable(bool),
    GetUnreadMessage,
    CanStartBot { bot_id: Option<String> },
}

impl OutboundAction {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundAction::StartSession { .. } => "startSession",
            OutboundAction::StopSession { .. } => "stopSession",
            OutboundAction::SetVisitorData { .. } => "setVisitorData",
            OutboundAction::SetDeviceToken(_) => "setDeviceToken",
            OutboundAction::StartBot(_) => "startBot",
            OutboundAction::OpenFaq { .. } => "openFAQ",
            OutboundAction::SetClosable(_) => "setClosable",
            OutboundAction::GetUnreadMessage => "getUnreadMessage",
            OutboundAction::CanStartBot { .. } => "canStartBot",
        }
    }

    pub fn payload(&self) -> Result<Option<Value>, EnvelopeError> {
        let payload = match self {
            OutboundAction::StartSession { credentials } => credentials
                .as_ref()
                .map(|creds| json!({ "id": creds.id, "token": creds.token })),
            OutboundAction::StopSession { clear_cache } => Some(Value::Bool(*clear_cache)),
            OutboundAction::SetVisitorData { visitor, hash } => {
                let mut payload = Map::new();
                payload.insert("visitor".into(), serde_json::to_value(visitor)?);
                if let Some(hash) = hash {
                    payload.insert("hash".into(), Value::String(hash.clone()));
                }
                Some(Value::Object(payload))
            }
            OutboundAction::SetDeviceToken(token) => Some(Value::String(token.clone())),
            OutboundAction::StartBot(bot) => {
                Some(json!({ "id": bot.bot_id, "timestamp": bot.issued_at_ms }))
            }
            OutboundAction::OpenFaq { article } => {
                article.as_ref().map(|slug| json!({ "article": slug }))
            }
            OutboundAction::SetClosable(closable) => Some(Value::Bool(*closable)),
            OutboundAction::GetUnreadMessage => None,
            OutboundAction::CanStartBot { bot_id } => Some(json!({ "botId": bot_id })),
        };
        Ok(payload)
    }
}

/// Wire form of an outbound message.
///
/// ```
/// use chatlink_core::{OutboundAction, OutboundEnvelope, RequestId};
///
/// let envelope = OutboundEnvelope::new(&OutboundAction::SetClosable(true))
///     .unwrap()
///     .with_request_id(RequestId::from("r-1"));
/// assert_eq!(
///     envelope.to_json().unwrap(),
///     r#"{"action":"setClosable","payload":true,"requestId":"r-1"}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl OutboundEnvelope {
    pub fn new(action: &OutboundAction) -> Result<Self, EnvelopeError> {
        Ok(Self {
            action: action.name(),
            payload: action.payload()?,
            request_id: None,
        })
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Script evaluated in the runtime to deliver this envelope.
    pub fn to_script(&self) -> Result<String, EnvelopeError> {
        Ok(format!("{BRIDGE_FUNCTION}({});", self.to_json()?))
    }
}

/// Extracts the JSON argument from a script produced by [`OutboundEnvelope::to_script`].
pub fn decode_script(script: &str) -> Result<Value, EnvelopeError> {
    let body = script
        .trim()
        .strip_prefix(BRIDGE_FUNCTION)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(");"))
        .ok_or(EnvelopeError::NotABridgeCall)?;
    Ok(serde_json::from_str(body)?)
}

/// Named events emitted by the widget.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    ChatStarted,
    ChatDismissed,
    ChatDenied(BTreeMap<String, String>),
    UnreadChanged(UnreadMessageInfo),
    Other(String),
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ack {
        request_id: RequestId,
        outcome: Result<Value, BTreeMap<String, String>>,
    },
    Emit(WidgetEvent),
    Error(BTreeMap<String, String>),
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    action: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

pub fn decode_inbound(message: Value) -> Result<InboundMessage, EnvelopeError> {
    let raw: RawInbound =
        serde_json::from_value(message).map_err(|_| EnvelopeError::MissingAction)?;

    match raw.action.as_str() {
        "ack" => {
            let request_id = raw
                .request_id
                .filter(|id| !id.is_empty())
                .map(RequestId::from)
                .ok_or(EnvelopeError::MissingRequestId)?;
            let outcome = match raw.error {
                None | Some(Value::Null) => Ok(raw.payload.unwrap_or(Value::Null)),
                Some(error) => Err(string_map(&error)),
            };
            Ok(InboundMessage::Ack {
                request_id,
                outcome,
            })
        }
        "emit" => decode_event(raw.payload.unwrap_or(Value::Null)).map(InboundMessage::Emit),
        "error" => {
            let payload = raw.payload.unwrap_or(Value::Null);
            Ok(InboundMessage::Error(string_map(event_data(&payload))))
        }
        _ => Ok(InboundMessage::Unknown(raw.action)),
    }
}

fn decode_event(payload: Value) -> Result<WidgetEvent, EnvelopeError> {
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .ok_or(EnvelopeError::MissingEventName)?;
    let data = event_data(&payload);

    let event = match name {
        "chat.start" => WidgetEvent::ChatStarted,
        "chat.dismiss" => WidgetEvent::ChatDismissed,
        "chat.denied" => WidgetEvent::ChatDenied(string_map(data)),
        "chat.unreadChange" => UnreadMessageInfo::from_value(data.clone())
            .map(WidgetEvent::UnreadChanged)
            .map_err(|err| EnvelopeError::InvalidPayload {
                what: "chat.unreadChange",
                reason: err.to_string(),
            })?,
        other => WidgetEvent::Other(other.to_string()),
    };
    Ok(event)
}

/// Event payloads nest their body under `data`; older widgets send it inline.
fn event_data(payload: &Value) -> &Value {
    payload.get("data").unwrap_or(payload)
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect(),
        Value::Null => BTreeMap::new(),
        Value::String(text) => BTreeMap::from([("message".to_string(), text.clone())]),
        other => BTreeMap::from([("message".to_string(), other.to_string())]),
    }
}

/// Decodes the `getUnreadMessage` ack payload.
pub fn decode_unread_response(value: Value) -> Result<UnreadMessageInfo, EnvelopeError> {
    UnreadMessageInfo::from_value(value).map_err(|err| EnvelopeError::InvalidPayload {
        what: "getUnreadMessage",
        reason: err.to_string(),
    })
}

/// Decodes the `canStartBot` ack payload: a boolean, `1`/`0`, or an object
/// wrapping either under `canStart`.
pub fn decode_can_start_bot(value: &Value) -> Result<bool, EnvelopeError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => number
            .as_f64()
            .map(|n| n == 1.0)
            .ok_or_else(|| invalid_can_start(value)),
        Value::Object(map) => match map.get("canStart") {
            Some(inner @ (Value::Bool(_) | Value::Number(_))) => decode_can_start_bot(inner),
            _ => Err(invalid_can_start(value)),
        },
        _ => Err(invalid_can_start(value)),
    }
}

fn invalid_can_start(value: &Value) -> EnvelopeError {
    EnvelopeError::InvalidPayload {
        what: "canStartBot",
        reason: format!("unexpected value {value}"),
    }
}
