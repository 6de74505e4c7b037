use std::collections::BTreeMap;

use thiserror::Error;

/// Coarse classification reported alongside `chat_did_fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatErrorKind {
    RuntimeNotReady,
    InvalidResponse,
    ChatDenied,
    ChatError,
    Unknown,
}

impl ChatErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatErrorKind::RuntimeNotReady => "runtime_not_ready",
            ChatErrorKind::InvalidResponse => "invalid_response",
            ChatErrorKind::ChatDenied => "chat_denied",
            ChatErrorKind::ChatError => "chat_error",
            ChatErrorKind::Unknown => "unknown",
        }
    }
}

/// Failure surfaced to callers and to the delegate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChatError {
    #[error("chat runtime is not ready")]
    RuntimeNotReady,
    #[error("invalid response from chat runtime: {0}")]
    InvalidResponse(String),
    #[error("chat session denied")]
    ChatDenied(BTreeMap<String, String>),
    #[error("chat runtime reported an error")]
    Reported(BTreeMap<String, String>),
    #[error("{0}")]
    Unknown(String),
}

impl ChatError {
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            ChatError::RuntimeNotReady => ChatErrorKind::RuntimeNotReady,
            ChatError::InvalidResponse(_) => ChatErrorKind::InvalidResponse,
            ChatError::ChatDenied(_) => ChatErrorKind::ChatDenied,
            ChatError::Reported(_) => ChatErrorKind::ChatError,
            ChatError::Unknown(_) => ChatErrorKind::Unknown,
        }
    }

    /// Structured detail carried by denial and runtime-reported failures.
    pub fn payload(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ChatError::ChatDenied(payload) | ChatError::Reported(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ChatError::ChatDenied(payload) | ChatError::Reported(payload) => payload
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        }
    }
}

/// Failure from the embedded runtime itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("failed to load widget page: {0}")]
    Load(String),
    #[error("script evaluation failed: {0}")]
    Evaluate(String),
    #[error("runtime was torn down")]
    Closed,
}

impl From<RuntimeError> for ChatError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Closed => ChatError::RuntimeNotReady,
            other => ChatError::Unknown(other.to_string()),
        }
    }
}

/// Failure encoding or decoding a bridge envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("script is not a bridge call")]
    NotABridgeCall,
    #[error("inbound message is not an object with an action")]
    MissingAction,
    #[error("ack is missing its requestId")]
    MissingRequestId,
    #[error("emit is missing its event name")]
    MissingEventName,
    #[error("invalid {what} payload: {reason}")]
    InvalidPayload { what: &'static str, reason: String },
}

impl From<EnvelopeError> for ChatError {
    fn from(err: EnvelopeError) -> Self {
        ChatError::InvalidResponse(err.to_string())
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("app id must not be empty")]
    MissingAppId,
    #[error("unsupported region code: {0}")]
    UnsupportedRegion(String),
    #[error("invalid widget url: {0}")]
    Url(String),
}

impl From<ConfigError> for ChatError {
    fn from(err: ConfigError) -> Self {
        ChatError::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            ChatError::RuntimeNotReady.kind(),
            ChatErrorKind::RuntimeNotReady
        );
        assert_eq!(
            ChatError::Reported(BTreeMap::new()).kind(),
            ChatErrorKind::ChatError
        );
        assert_eq!(
            ChatError::from(EnvelopeError::MissingRequestId).kind(),
            ChatErrorKind::InvalidResponse
        );
        assert_eq!(
            ChatError::from(RuntimeError::Closed),
            ChatError::RuntimeNotReady
        );
    }

    #[test]
    fn detail_flattens_payload() {
        let mut payload = BTreeMap::new();
        payload.insert("reason".to_string(), "banned".to_string());
        payload.insert("code".to_string(), "403".to_string());
        assert_eq!(
            ChatError::ChatDenied(payload).detail(),
            "code=403, reason=banned"
        );
    }
}
