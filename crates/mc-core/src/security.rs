use std::sync::OnceLock;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

/// Gateway auth token with secrecy protection (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct GatewayToken(SecretString);

impl GatewayToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// The token in cleartext. Only for the wire, never for logs.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl Default for GatewayToken {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl std::fmt::Debug for GatewayToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GatewayToken([REDACTED])")
    }
}

impl From<SecretString> for GatewayToken {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

fn token_param() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([?&]token=)[^&#]*").expect("static regex"))
}

/// Replace the value of any `token` query parameter with `***`.
pub fn redact_token(url: &str) -> String {
    token_param().replace_all(url, "${1}***").into_owned()
}

/// Environment variable names read by the gateway configuration.
pub mod env_vars {
    pub const GATEWAY_URL: &str = "OPENCLAW_GATEWAY_URL";
    pub const GATEWAY_TOKEN: &str = "OPENCLAW_GATEWAY_TOKEN";
}
