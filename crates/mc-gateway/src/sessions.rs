use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::GatewayClient;
use crate::error::GatewayError;

/// An agent work session as reported by `sessions.list`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_activity_at: String,
    #[serde(default)]
    pub message_count: u64,
}

impl GatewayClient {
    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, GatewayError> {
        self.call_as("sessions.list", Value::Null).await
    }

    pub async fn send_message(&self, session_key: &str, content: &str) -> Result<(), GatewayError> {
        self.call(
            "sessions.send",
            json!({ "sessionKey": session_key, "content": content }),
        )
        .await?;
        Ok(())
    }
}
