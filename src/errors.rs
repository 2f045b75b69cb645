use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::types::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectorErrorKind {
    AlreadyExists,
    NotReady,
    NotFound,
    MalformedParams,
    NegotiationError,
    CannotProduce,
    TransportCreateError,
    Busy,
    Timeout,
    FactoryInitError,
    Sdk,
    Config,
}

impl ConnectorErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorErrorKind::AlreadyExists => "already_exists",
            ConnectorErrorKind::NotReady => "not_ready",
            ConnectorErrorKind::NotFound => "not_found",
            ConnectorErrorKind::MalformedParams => "malformed_params",
            ConnectorErrorKind::NegotiationError => "negotiation_error",
            ConnectorErrorKind::CannotProduce => "cannot_produce",
            ConnectorErrorKind::TransportCreateError => "transport_create_error",
            ConnectorErrorKind::Busy => "busy",
            ConnectorErrorKind::Timeout => "timeout",
            ConnectorErrorKind::FactoryInitError => "factory_init_error",
            ConnectorErrorKind::Sdk => "sdk",
            ConnectorErrorKind::Config => "config",
        }
    }
}

/// Failure of a session operation.
///
/// The message is what ends up in the session's last-error slot, so it is
/// written for the frontend, not for a developer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConnectorError {
    pub kind: ConnectorErrorKind,
    pub message: String,
}

impl ConnectorError {
    pub fn new(kind: ConnectorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn already_exists(entity: &str) -> Self {
        Self::new(
            ConnectorErrorKind::AlreadyExists,
            format!("{entity} already exists"),
        )
    }

    pub fn device_already_loaded() -> Self {
        Self::already_exists("device")
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::NotReady, message)
    }

    pub fn device_not_loaded() -> Self {
        Self::not_ready("device not loaded")
    }

    pub fn sender_not_ready() -> Self {
        Self::not_ready("send transport not created")
    }

    pub fn receiver_not_ready() -> Self {
        Self::not_ready("receive transport not created")
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(ConnectorErrorKind::NotFound, format!("{entity} not found: {id}"))
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::MalformedParams, message)
    }

    pub fn negotiation(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::NegotiationError, message)
    }

    pub fn cannot_produce(kind: MediaKind) -> Self {
        Self::new(
            ConnectorErrorKind::CannotProduce,
            format!("device cannot produce {kind}"),
        )
    }

    pub fn transport_create(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::TransportCreateError, message)
    }

    pub fn busy() -> Self {
        Self::new(
            ConnectorErrorKind::Busy,
            "another handshake operation is in progress",
        )
    }

    pub fn timeout(waited: Duration) -> Self {
        Self::new(
            ConnectorErrorKind::Timeout,
            format!("no answer after {} ms", waited.as_millis()),
        )
    }

    pub fn factory_init(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::FactoryInitError, message)
    }

    pub fn sdk(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Sdk, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Config, message)
    }

    /// Fatal errors abort the enclosing operation and leave no partial state.
    pub fn is_fatal(&self) -> bool {
        self.kind == ConnectorErrorKind::FactoryInitError
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::malformed(format!("invalid JSON: {err}"))
    }
}

impl From<crate::sdk::SdkError> for ConnectorError {
    fn from(err: crate::sdk::SdkError) -> Self {
        match err {
            crate::sdk::SdkError::Timeout => ConnectorError::new(
                ConnectorErrorKind::Timeout,
                "timed out waiting for handshake answer",
            ),
            other => ConnectorError::sdk(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::SdkError;

    #[test]
    fn test_display_is_message() {
        let err = ConnectorError::not_found("consumer", "abc");
        assert_eq!(err.to_string(), "consumer not found: abc");
        assert_eq!(err.kind, ConnectorErrorKind::NotFound);
    }

    #[test]
    fn test_json_error_maps_to_malformed() {
        let err: ConnectorError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.kind, ConnectorErrorKind::MalformedParams);
    }

    #[test]
    fn test_sdk_timeout_keeps_kind() {
        let err: ConnectorError = SdkError::Timeout.into();
        assert_eq!(err.kind, ConnectorErrorKind::Timeout);

        let err: ConnectorError = SdkError::Rejected("no".into()).into();
        assert_eq!(err.kind, ConnectorErrorKind::Sdk);
        assert_eq!(err.message, "no");
    }

    #[test]
    fn test_only_factory_init_is_fatal() {
        assert!(ConnectorError::factory_init("thread").is_fatal());
        assert!(!ConnectorError::busy().is_fatal());
        assert_eq!(ConnectorError::busy().kind.as_str(), "busy");
    }
}
