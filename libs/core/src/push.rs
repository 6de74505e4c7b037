//! Push notification payloads sent on behalf of the widget.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;

const OPERATOR_KEY: &str = "operator";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOperator {
    pub id: String,
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub operator: PushOperator,
    #[serde(default)]
    pub message: Option<String>,
}

/// A delivered notification as handed over by the host's push integration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushNotification {
    pub user_info: Map<String, Value>,
    /// Alert body shown by the OS, used when the payload has no `message`.
    pub body: Option<String>,
}

impl PushNotification {
    pub fn new(user_info: Map<String, Value>) -> Self {
        Self {
            user_info,
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Notifications from the widget backend always carry an operator.
    pub fn is_widget_push(&self) -> bool {
        self.user_info.contains_key(OPERATOR_KEY)
    }

    pub fn parse(&self) -> Result<PushPayload, EnvelopeError> {
        serde_json::from_value(Value::Object(self.user_info.clone())).map_err(|err| {
            EnvelopeError::InvalidPayload {
                what: "push",
                reason: err.to_string(),
            }
        })
    }

    /// Text for an in-app banner: the payload message, else the alert body.
    pub fn display_message(&self, payload: &PushPayload) -> Option<String> {
        payload.message.clone().or_else(|| self.body.clone())
    }
}
