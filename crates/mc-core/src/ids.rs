use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(RequestId);
branded_id!(AgentId);

impl RequestId {
    /// Fresh random correlation id (UUID v4, same shape the gateway echoes back).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Normalize an inbound JSON id. Strings are taken as-is, numbers by their
    /// decimal rendering; anything else has no usable id.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36, "got: {a}");
    }

    #[test]
    fn from_wire_accepts_strings_and_numbers() {
        assert_eq!(
            RequestId::from_wire(&json!("abc")),
            Some(RequestId::from_raw("abc"))
        );
        assert_eq!(RequestId::from_wire(&json!(42)), Some(RequestId::from_raw("42")));
        assert_eq!(RequestId::from_wire(&json!(null)), None);
        assert_eq!(RequestId::from_wire(&json!({"id": 1})), None);
    }

    #[test]
    fn agent_id_serializes_transparently() {
        let id = AgentId::from_raw("bulma");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""bulma""#);
        let parsed: AgentId = serde_json::from_str(r#""saraai""#).unwrap();
        assert_eq!(parsed.as_str(), "saraai");
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
