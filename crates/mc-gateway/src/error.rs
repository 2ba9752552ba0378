use std::time::Duration;

/// Failures surfaced to callers of `connect()` and `call()`.
///
/// Cloneable so that one connection attempt's outcome can be handed to every
/// caller waiting on it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    // Connection establishment
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(Duration),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid gateway endpoint: {0}")]
    InvalidEndpoint(String),

    // Calls
    #[error("not connected to gateway")]
    NotConnected,
    #[error("request timeout: {method}")]
    RequestTimeout { method: String },
    #[error("gateway error: {0}")]
    Remote(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Errors a later attempt can plausibly get past without changing config.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout(_)
                | Self::Socket(_)
                | Self::NotConnected
                | Self::RequestTimeout { .. }
                | Self::ConnectionLost
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionTimeout(_) => "connection_timeout",
            Self::Socket(_) => "socket_error",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::NotConnected => "not_connected",
            Self::RequestTimeout { .. } => "request_timeout",
            Self::Remote(_) => "remote_error",
            Self::ConnectionLost => "connection_lost",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::Socket(e.to_string())
    }
}
