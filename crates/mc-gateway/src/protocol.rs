//! Gateway wire frames.
//!
//! Outbound frames are always requests (`{type:"req", id, method, params}`).
//! Inbound frames are classified by shape: the handshake challenge, a
//! correlated response, or an uncorrelated notification.

use mc_core::RequestId;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ClientInfo, GatewayConfig};

pub const CHALLENGE_EVENT: &str = "connect.challenge";
pub const CONNECT_METHOD: &str = "connect";

#[derive(Debug, Serialize)]
struct RequestFrame<'a, P: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a RequestId,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<P>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams<'a> {
    min_protocol: u32,
    max_protocol: u32,
    client: &'a ClientInfo,
    auth: AuthParams<'a>,
}

#[derive(Debug, Serialize)]
struct AuthParams<'a> {
    token: &'a str,
}

/// Encode a generic request. A JSON `null` params value is omitted.
pub fn encode_request(id: &RequestId, method: &str, params: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RequestFrame {
        kind: "req",
        id,
        method,
        params: (!params.is_null()).then_some(params),
    })
}

/// Encode the authentication request answering a challenge.
pub fn encode_connect(id: &RequestId, config: &GatewayConfig) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RequestFrame {
        kind: "req",
        id,
        method: CONNECT_METHOD,
        params: Some(ConnectParams {
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            client: &config.client,
            auth: AuthParams {
                token: config.token.expose(),
            },
        }),
    })
}

/// A correlated reply to one of our requests.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: RequestId,
    /// Payload on success, server error message on failure.
    pub outcome: Result<Value, String>,
}

/// A server-pushed message not tied to any request.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// `method`, or `event` when no method is present.
    pub name: String,
    pub params: Option<Value>,
    /// The frame exactly as received.
    pub raw: Value,
}

impl Notification {
    /// What named listeners receive: `params`, or the whole frame when the
    /// frame carries none.
    pub fn payload(&self) -> &Value {
        self.params.as_ref().unwrap_or(&self.raw)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Challenge,
    Response(Response),
    Notification(Notification),
    /// Valid JSON with no recognizable shape.
    Unrecognized,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(value))
    }

    pub fn classify(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str);
        let event = non_empty_str(&value, "event");

        if kind == Some("event") && event == Some(CHALLENGE_EVENT) {
            return Self::Challenge;
        }

        if kind == Some("res") {
            if let Some(id) = value.get("id").and_then(RequestId::from_wire) {
                return Self::Response(Response {
                    id,
                    outcome: response_outcome(&value),
                });
            }
        }

        let name = non_empty_str(&value, "method").or(event).map(str::to_string);
        match name {
            Some(name) => {
                let params = value.get("params").filter(|p| !p.is_null()).cloned();
                Self::Notification(Notification {
                    name,
                    params,
                    raw: value,
                })
            }
            None => Self::Unrecognized,
        }
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn response_outcome(value: &Value) -> Result<Value, String> {
    if value.get("ok").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        return Err(message.to_string());
    }
    let payload = value
        .get("payload")
        .filter(|p| !p.is_null())
        .or_else(|| value.get("result"))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(payload)
}
