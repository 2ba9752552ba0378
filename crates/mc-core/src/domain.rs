//! Board vocabulary shared by the store and the HTTP API.
//!
//! Every enum round-trips through the same lowercase string used in the
//! database and on the wire.

use serde::{Deserialize, Serialize};

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

string_enum! {
    /// What kind of work an agent takes on.
    AgentRole {
        Developer => "developer",
        System => "system",
        Specialist => "specialist",
    }
}

string_enum! {
    /// Kanban column a task sits in.
    TaskStatus {
        Inbox => "inbox",
        Planning => "planning",
        Assigned => "assigned",
        InProgress => "in_progress",
        Testing => "testing",
        Review => "review",
        Done => "done",
    }
}

string_enum! {
    Priority {
        None => "none",
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    /// Who put the task on an agent's queue.
    AssignedBy {
        User => "user",
        System => "system",
        Escalation => "escalation",
    }
}

string_enum! {
    ActivityType {
        Created => "created",
        Assigned => "assigned",
        Started => "started",
        Progress => "progress",
        Completed => "completed",
        Escalated => "escalated",
        Comment => "comment",
        SystemEvent => "system_event",
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Inbox
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Default for AssignedBy {
    fn default() -> Self {
        Self::User
    }
}

string_enum! {
    /// Escalation review decision.
    EscalationAction {
        Accept => "accept",
        Decline => "decline",
    }
}
