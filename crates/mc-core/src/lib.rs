pub mod domain;
pub mod ids;
pub mod security;

pub use ids::{AgentId, RequestId};
pub use security::{redact_token, GatewayToken};
