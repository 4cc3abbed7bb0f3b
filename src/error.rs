use thiserror::Error;

use crate::core::bluetooth::ConnectionState;

/// Errors raised by the Bluetooth layer.
#[derive(Error, Debug)]
pub enum BleError {
    #[error("no Bluetooth adapter found")]
    AdapterUnavailable,

    #[error("device not found with ID: {0}")]
    DeviceNotFound(String),

    #[error("device {0} is not connected")]
    NotConnected(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(String),

    #[error("characteristic {uuid} does not support {operation}")]
    Unsupported { uuid: String, operation: &'static str },

    #[error("invalid connection state transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("no writable characteristics found")]
    NoWritableCharacteristic,

    #[error("multiple writable characteristics found, choose one of: {0}")]
    AmbiguousTx(String),

    #[error("no characteristic is being listened to")]
    NotListening,

    #[error("invalid hex data: {0}")]
    InvalidHex(String),

    #[error(transparent)]
    Stack(#[from] bluest::Error),
}

/// Errors raised while asking the chat-completion API about a transcript.
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("No data in the response view to analyze.")]
    EmptyTranscript,

    #[error("API key not found in environment variable {0}")]
    MissingApiKey(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response format")]
    InvalidResponseFormat,

    #[error("Invalid JSON format: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ble_error_display() {
        let err = BleError::DeviceNotFound("AA:BB".to_string());
        assert_eq!(err.to_string(), "device not found with ID: AA:BB");

        let err = BleError::Unsupported {
            uuid: "2A19".to_string(),
            operation: "write",
        };
        assert_eq!(err.to_string(), "characteristic 2A19 does not support write");

        let err = BleError::InvalidTransition {
            id: "dev".to_string(),
            from: ConnectionState::Disconnected,
            to: ConnectionState::Connected,
        };
        assert_eq!(
            err.to_string(),
            "invalid connection state transition for dev: Disconnected -> Connected"
        );
    }

    #[test]
    fn test_assistant_error_display() {
        assert_eq!(
            AssistantError::EmptyTranscript.to_string(),
            "No data in the response view to analyze."
        );
        assert_eq!(
            AssistantError::Status {
                status: 401,
                body: "bad key".to_string()
            }
            .to_string(),
            "API returned HTTP 401: bad key"
        );
    }
}
