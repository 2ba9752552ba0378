use mc_core::domain::ActivityType;
use mc_core::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    pub id: i64,
    pub task_id: Option<i64>,
    pub agent_id: Option<AgentId>,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub content: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: String,
}

#[derive(Clone, Debug)]
pub struct NewActivity {
    pub task_id: Option<i64>,
    pub agent_id: Option<AgentId>,
    pub kind: ActivityType,
    pub content: String,
    pub metadata: Option<Value>,
}

impl NewActivity {
    pub fn new(kind: ActivityType, content: impl Into<String>) -> Self {
        Self {
            task_id: None,
            agent_id: None,
            kind,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn for_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn by_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }
}

/// Who an activity is attributed to, as shown on the feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<AgentId>,
    pub name: String,
    pub emoji: String,
    pub color: String,
}

impl AgentSummary {
    fn system() -> Self {
        Self {
            id: None,
            name: "System".into(),
            emoji: "⚙️".into(),
            color: "bg-gray-500".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub id: i64,
    pub task_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub content: Option<String>,
    pub created_at: String,
    pub agent: AgentSummary,
}

pub struct ActivityRepo {
    db: Database,
}

impl ActivityRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, activity), fields(kind = %activity.kind, task_id = ?activity.task_id))]
    pub fn record(&self, activity: &NewActivity) -> Result<ActivityRow, StoreError> {
        let now = row_helpers::now();
        let metadata = activity
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO activities (task_id, agent_id, type, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    activity.task_id,
                    activity.agent_id.as_ref().map(|a| a.as_str()),
                    activity.kind.as_str(),
                    activity.content,
                    metadata,
                    now,
                ],
            )?;

            Ok(ActivityRow {
                id: conn.last_insert_rowid(),
                task_id: activity.task_id,
                agent_id: activity.agent_id.clone(),
                kind: activity.kind,
                content: Some(activity.content.clone()),
                metadata: activity.metadata.clone(),
                created_at: now,
            })
        })
    }

    /// Newest first. Activities without a known agent are attributed to
    /// "System".
    #[instrument(skip(self))]
    pub fn recent(&self, limit: usize) -> Result<Vec<RecentActivity>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id, v.task_id, v.type, v.content, v.created_at,
                        a.id, a.name, a.emoji, a.color
                 FROM activities v LEFT JOIN agents a ON a.id = v.agent_id
                 ORDER BY v.created_at DESC, v.id DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit as i64])?;
            let mut feed = Vec::new();
            while let Some(row) = rows.next()? {
                let kind: String = row_helpers::get(row, 2, "activities", "type")?;
                let agent = match row_helpers::get::<Option<String>>(row, 5, "agents", "id")? {
                    Some(id) => AgentSummary {
                        id: Some(AgentId::from_raw(id)),
                        name: row_helpers::get(row, 6, "agents", "name")?,
                        emoji: row_helpers::get::<Option<String>>(row, 7, "agents", "emoji")?
                            .unwrap_or_else(|| "🤖".into()),
                        color: row_helpers::get::<Option<String>>(row, 8, "agents", "color")?
                            .unwrap_or_else(|| "bg-gray-500".into()),
                    },
                    None => AgentSummary::system(),
                };
                feed.push(RecentActivity {
                    id: row_helpers::get(row, 0, "activities", "id")?,
                    task_id: row_helpers::get(row, 1, "activities", "task_id")?,
                    kind: row_helpers::parse_enum(&kind, "activities", "type")?,
                    content: row_helpers::get(row, 3, "activities", "content")?,
                    created_at: row_helpers::get(row, 4, "activities", "created_at")?,
                    agent,
                });
            }
            Ok(feed)
        })
    }
}
