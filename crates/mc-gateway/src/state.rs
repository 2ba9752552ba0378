use std::fmt;

use serde::Serialize;

/// Lifecycle of the single gateway connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Socket opening or open, challenge not yet received.
    Connecting,
    /// Challenge answered, waiting for the `connect` response.
    Authenticating,
    Ready,
    /// Local side is closing the socket.
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Closing => "closing",
        }
    }

    /// A handshake is underway.
    pub fn is_handshaking(&self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
