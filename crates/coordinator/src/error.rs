use aibrush_core::error::{Classify, ErrorClass};

/// Errors from the coordinator REST layer.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The coordinator returned a non-2xx status code.
    #[error("Coordinator API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not the JSON we expected.
    #[error("Malformed coordinator response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Classify for CoordinatorError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Request(e) if e.is_connect() || e.is_timeout() => ErrorClass::TransientNetwork,
            Self::Api { status, .. } if *status >= 500 => ErrorClass::TransientNetwork,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Errors from the notification websocket.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Could not derive a websocket URL from the API URL.
    #[error("Invalid coordinator URL: {0}")]
    InvalidUrl(String),

    /// Failed to establish the websocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
