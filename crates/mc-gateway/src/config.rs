use std::time::Duration;

use mc_core::security::env_vars;
use mc_core::GatewayToken;
use serde::Serialize;
use url::Url;

use crate::error::GatewayError;

/// Local development gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";
/// Protocol version declared as both bounds in the `connect` request.
pub const PROTOCOL_VERSION: u32 = 3;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Identity this process presents during the handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            id: "mission-control".into(),
            version: "1.0.0".into(),
            platform: "web".into(),
            mode: "ui".into(),
        }
    }
}

/// Gateway connection settings.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub url: String,
    pub token: GatewayToken,
    pub client: ClientInfo,
    pub min_protocol: u32,
    pub max_protocol: u32,
    /// Budget for socket open plus authentication.
    pub connect_timeout: Duration,
    /// Deadline for each `call()`.
    pub request_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.into(),
            token: GatewayToken::default(),
            client: ClientInfo::default(),
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            auto_reconnect: true,
        }
    }
}

impl GatewayConfig {
    /// Read `OPENCLAW_GATEWAY_URL` and `OPENCLAW_GATEWAY_TOKEN`, falling back
    /// to the local endpoint and no token.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(env_vars::GATEWAY_URL).filter(|u| !u.trim().is_empty()) {
            config.url = url.trim().to_string();
        }
        if let Some(token) = lookup(env_vars::GATEWAY_TOKEN) {
            config.token = GatewayToken::new(token);
        }
        config
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into().trim_end().to_string();
        self
    }

    pub fn with_token(mut self, token: GatewayToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_client_info(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Endpoint with the token attached as a `token` query parameter.
    ///
    /// The result contains the secret; log [`Self::redacted_url`] instead.
    pub fn connect_url(&self) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| GatewayError::InvalidEndpoint(format!("{}: {e}", self.url)))?;
        if !self.token.is_empty() {
            let retained: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "token")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(retained)
                .append_pair("token", self.token.expose());
        }
        Ok(url)
    }

    /// Endpoint as it may appear in logs.
    pub fn redacted_url(&self) -> String {
        match self.connect_url() {
            Ok(url) => mc_core::redact_token(url.as_str()),
            Err(_) => mc_core::redact_token(&self.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(10));
        assert_eq!((config.min_protocol, config.max_protocol), (3, 3));
        assert!(config.auto_reconnect);
        assert_eq!(config.client.id, "mission-control");
    }

    #[test]
    fn env_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("OPENCLAW_GATEWAY_URL", "wss://gw.example/ws "),
            ("OPENCLAW_GATEWAY_TOKEN", "t1"),
        ]));
        assert_eq!(config.url, "wss://gw.example/ws");
        assert_eq!(config.token.expose(), "t1");
    }

    #[test]
    fn empty_env_url_keeps_default() {
        let config = GatewayConfig::from_lookup(lookup(&[("OPENCLAW_GATEWAY_URL", "  ")]));
        assert_eq!(config.url, DEFAULT_GATEWAY_URL);
        assert!(config.token.is_empty());
    }

    #[test]
    fn connect_url_appends_token() {
        let config = GatewayConfig::default().with_token(GatewayToken::new("s3cret"));
        let url = config.connect_url().unwrap();
        assert_eq!(url.query(), Some("token=s3cret"));
    }

    #[test]
    fn connect_url_replaces_existing_token_param() {
        let config = GatewayConfig::default()
            .with_url("ws://host:1/ws?a=1&token=old")
            .with_token(GatewayToken::new("new"));
        let url = config.connect_url().unwrap();
        assert_eq!(url.query(), Some("a=1&token=new"));
    }

    #[test]
    fn connect_url_without_token_is_untouched() {
        let config = GatewayConfig::default().with_url("ws://host:1/ws");
        let url = config.connect_url().unwrap();
        assert_eq!(url.query(), None);
    }

    #[test]
    fn redacted_url_hides_token() {
        let config = GatewayConfig::default().with_token(GatewayToken::new("s3cret"));
        let shown = config.redacted_url();
        assert!(!shown.contains("s3cret"), "token leaked: {shown}");
        assert!(shown.contains("token=***"));
    }

    #[test]
    fn invalid_url_is_reported() {
        let config = GatewayConfig::default().with_url("not a url");
        assert!(matches!(
            config.connect_url(),
            Err(GatewayError::InvalidEndpoint(_))
        ));
    }
}
