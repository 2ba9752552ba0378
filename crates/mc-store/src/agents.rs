use mc_core::domain::AgentRole;
use mc_core::AgentId;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const AGENT_COLUMNS: &str = "id, name, emoji, role, color, description, can_self_assign, \
                             escalation_only, is_active, created_at";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRow {
    pub id: AgentId,
    pub name: String,
    pub emoji: Option<String>,
    pub role: AgentRole,
    pub color: Option<String>,
    pub description: Option<String>,
    pub can_self_assign: bool,
    pub escalation_only: bool,
    pub is_active: bool,
    pub created_at: String,
}

/// Input for [`AgentRepo::create`].
#[derive(Clone, Debug)]
pub struct NewAgent {
    pub id: AgentId,
    pub name: String,
    pub emoji: Option<String>,
    pub role: AgentRole,
    pub color: Option<String>,
    pub description: Option<String>,
    pub can_self_assign: bool,
    pub escalation_only: bool,
}

/// The agent that receives accepted escalations.
pub const ESCALATION_AGENT_ID: &str = "saraai";

fn default_agents() -> [NewAgent; 2] {
    [
        NewAgent {
            id: AgentId::from_raw("bulma"),
            name: "Bulma".into(),
            emoji: Some("🔧".into()),
            role: AgentRole::Developer,
            color: Some("bg-blue-500".into()),
            description: Some("Senior software engineer - builds code, APIs, web apps".into()),
            can_self_assign: true,
            escalation_only: false,
        },
        NewAgent {
            id: AgentId::from_raw(ESCALATION_AGENT_ID),
            name: "Saraai".into(),
            emoji: Some("🦷".into()),
            role: AgentRole::System,
            color: Some("bg-amber-500".into()),
            description: Some(
                "System architect - handles infrastructure, escalations, server config".into(),
            ),
            can_self_assign: false,
            escalation_only: true,
        },
    ]
}

/// Current display name and emoji per agent, applied over older seeds.
const ROSTER_UPDATES: [(&str, &str, &str); 2] = [
    ("bulma", "Bulmaai", "🔧"),
    (ESCALATION_AGENT_ID, "Saraai", "🏗️"),
];

fn map_row(row: &rusqlite::Row<'_>) -> Result<AgentRow, StoreError> {
    let role: String = row_helpers::get(row, 3, "agents", "role")?;
    Ok(AgentRow {
        id: AgentId::from_raw(row_helpers::get::<String>(row, 0, "agents", "id")?),
        name: row_helpers::get(row, 1, "agents", "name")?,
        emoji: row_helpers::get(row, 2, "agents", "emoji")?,
        role: row_helpers::parse_enum(&role, "agents", "role")?,
        color: row_helpers::get(row, 4, "agents", "color")?,
        description: row_helpers::get(row, 5, "agents", "description")?,
        can_self_assign: row_helpers::get(row, 6, "agents", "can_self_assign")?,
        escalation_only: row_helpers::get(row, 7, "agents", "escalation_only")?,
        is_active: row_helpers::get(row, 8, "agents", "is_active")?,
        created_at: row_helpers::get(row, 9, "agents", "created_at")?,
    })
}

pub struct AgentRepo {
    db: Database,
}

impl AgentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub fn create(&self, agent: &NewAgent) -> Result<AgentRow, StoreError> {
        let now = row_helpers::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (id, name, emoji, role, color, description, can_self_assign,
                                     escalation_only, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
                rusqlite::params![
                    agent.id.as_str(),
                    agent.name,
                    agent.emoji,
                    agent.role.as_str(),
                    agent.color,
                    agent.description,
                    agent.can_self_assign,
                    agent.escalation_only,
                    now,
                ],
            )?;
            Ok(())
        })?;
        self.get(&agent.id)
    }

    /// Insert the default roster when the table is empty. Returns how many
    /// agents were inserted.
    #[instrument(skip(self))]
    pub fn seed_defaults(&self) -> Result<usize, StoreError> {
        let existing: i64 = self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))?)
        })?;
        if existing > 0 {
            return Ok(0);
        }

        let defaults = default_agents();
        for agent in &defaults {
            self.create(agent)?;
        }
        info!(count = defaults.len(), "seeded default agents");
        Ok(defaults.len())
    }

    #[instrument(skip(self), fields(agent_id = %id))]
    pub fn get(&self, id: &AgentId) -> Result<AgentRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => map_row(row),
                None => Err(StoreError::NotFound(format!("agent {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(agent_id = %id))]
    pub fn update_display(&self, id: &AgentId, name: &str, emoji: Option<&str>) -> Result<AgentRow, StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE agents SET name = ?2, emoji = ?3 WHERE id = ?1",
                rusqlite::params![id.as_str(), name, emoji],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent {id}")));
        }
        self.get(id)
    }

    /// Bring the default agents' names and emojis up to date. Agents missing
    /// from the table are skipped. Returns how many were updated.
    #[instrument(skip(self))]
    pub fn apply_roster_updates(&self) -> Result<usize, StoreError> {
        let mut updated = 0;
        for (id, name, emoji) in ROSTER_UPDATES {
            match self.update_display(&AgentId::from_raw(id), name, Some(emoji)) {
                Ok(_) => updated += 1,
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(updated, "agent roster updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<AgentRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at, id"))?;
            let mut rows = stmt.query([])?;
            let mut agents = Vec::new();
            while let Some(row) = rows.next()? {
                agents.push(map_row(row)?);
            }
            Ok(agents)
        })
    }
}
