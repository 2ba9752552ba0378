use chrono::{DateTime, Utc};
use mc_core::domain::{AssignedBy, Priority, TaskStatus};
use mc_core::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TASK_COLUMNS: &str = "id, title, description, status, priority, assigned_agent_id, assigned_by, \
                            is_escalation, escalated_from_agent_id, escalation_reason, plan_json, \
                            created_at, assigned_at, started_at, completed_at";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assigned_agent_id: Option<AgentId>,
    pub assigned_by: AssignedBy,
    pub is_escalation: bool,
    pub escalated_from_agent_id: Option<AgentId>,
    pub escalation_reason: Option<String>,
    pub plan: Option<Value>,
    pub created_at: String,
    pub assigned_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// A task created from the board and assigned directly to an agent.
#[derive(Clone, Debug)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub assigned_agent_id: AgentId,
}

/// A task one agent hands to another.
#[derive(Clone, Debug)]
pub struct NewEscalation {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub from_agent_id: AgentId,
    pub to_agent_id: AgentId,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TaskUpdate {
    pub plan: Option<Value>,
    pub status: Option<TaskStatus>,
}

/// Escalation awaiting review, with the source agent's display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEscalation {
    pub id: i64,
    pub title: String,
    pub from_agent: String,
    pub reason: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<TaskRow, StoreError> {
    let status: String = row_helpers::get(row, 3, "tasks", "status")?;
    let priority: String = row_helpers::get(row, 4, "tasks", "priority")?;
    let assigned_by: String = row_helpers::get(row, 6, "tasks", "assigned_by")?;
    Ok(TaskRow {
        id: row_helpers::get(row, 0, "tasks", "id")?,
        title: row_helpers::get(row, 1, "tasks", "title")?,
        description: row_helpers::get(row, 2, "tasks", "description")?,
        status: row_helpers::parse_enum(&status, "tasks", "status")?,
        priority: row_helpers::parse_enum(&priority, "tasks", "priority")?,
        assigned_agent_id: row_helpers::get::<Option<String>>(row, 5, "tasks", "assigned_agent_id")?
            .map(AgentId::from_raw),
        assigned_by: row_helpers::parse_enum(&assigned_by, "tasks", "assigned_by")?,
        is_escalation: row_helpers::get(row, 7, "tasks", "is_escalation")?,
        escalated_from_agent_id: row_helpers::get::<Option<String>>(
            row,
            8,
            "tasks",
            "escalated_from_agent_id",
        )?
        .map(AgentId::from_raw),
        escalation_reason: row_helpers::get(row, 9, "tasks", "escalation_reason")?,
        plan: row_helpers::parse_json_opt(
            row_helpers::get(row, 10, "tasks", "plan_json")?,
            "tasks",
            "plan_json",
        )?,
        created_at: row_helpers::get(row, 11, "tasks", "created_at")?,
        assigned_at: row_helpers::get(row, 12, "tasks", "assigned_at")?,
        started_at: row_helpers::get(row, 13, "tasks", "started_at")?,
        completed_at: row_helpers::get(row, 14, "tasks", "completed_at")?,
    })
}

fn query_tasks(
    conn: &rusqlite::Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TaskRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut tasks = Vec::new();
    while let Some(row) = rows.next()? {
        tasks.push(map_row(row)?);
    }
    Ok(tasks)
}

pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a task already in `assigned`, assigned by the user.
    #[instrument(skip(self, task), fields(agent_id = %task.assigned_agent_id))]
    pub fn create_assigned(&self, task: &NewTask) -> Result<TaskRow, StoreError> {
        let now = row_helpers::now();
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (title, description, status, priority, assigned_agent_id,
                                    assigned_by, created_at, assigned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    task.title,
                    task.description,
                    TaskStatus::Assigned.as_str(),
                    task.priority.as_str(),
                    task.assigned_agent_id.as_str(),
                    AssignedBy::User.as_str(),
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.get(id)
    }

    /// Create an escalation: assigned to the receiving agent, pending review.
    #[instrument(skip(self, escalation), fields(from = %escalation.from_agent_id, to = %escalation.to_agent_id))]
    pub fn create_escalation(&self, escalation: &NewEscalation) -> Result<TaskRow, StoreError> {
        let now = row_helpers::now();
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (title, description, status, priority, assigned_agent_id,
                                    assigned_by, is_escalation, escalated_from_agent_id,
                                    escalation_reason, created_at, assigned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    escalation.title,
                    escalation.description,
                    TaskStatus::Assigned.as_str(),
                    escalation.priority.as_str(),
                    escalation.to_agent_id.as_str(),
                    AssignedBy::Escalation.as_str(),
                    escalation.from_agent_id.as_str(),
                    escalation.reason,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.get(id)
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<TaskRow, StoreError> {
        self.db
            .with_conn(|conn| {
                query_tasks(
                    conn,
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    [id],
                )
            })?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    /// Apply a plan and/or status change. Entering `assigned`, `in_progress`
    /// or `done` stamps the matching timestamp.
    #[instrument(skip(self, update), fields(status = ?update.status))]
    pub fn update(&self, id: i64, update: &TaskUpdate) -> Result<TaskRow, StoreError> {
        let plan_json = update.plan.as_ref().map(serde_json::to_string).transpose()?;
        let now = row_helpers::now();
        let changed = self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET
                    plan_json = COALESCE(?2, plan_json),
                    status = COALESCE(?3, status),
                    assigned_at = CASE WHEN ?3 = 'assigned' THEN ?4 ELSE assigned_at END,
                    started_at = CASE WHEN ?3 = 'in_progress' AND started_at IS NULL THEN ?4 ELSE started_at END,
                    completed_at = CASE WHEN ?3 = 'done' THEN ?4 ELSE completed_at END
                 WHERE id = ?1",
                rusqlite::params![id, plan_json, update.status.map(|s| s.as_str()), now],
            )?;
            Ok(changed)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        self.get(id)
    }

    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub fn list_for_agent(&self, agent_id: &AgentId) -> Result<Vec<TaskRow>, StoreError> {
        self.db.with_conn(|conn| {
            query_tasks(
                conn,
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE assigned_agent_id = ?1 ORDER BY id"),
                [agent_id.as_str()],
            )
        })
    }

    /// The agent's first task in progress, if any.
    pub fn current_for_agent(&self, agent_id: &AgentId) -> Result<Option<TaskRow>, StoreError> {
        self.db
            .with_conn(|conn| {
                query_tasks(
                    conn,
                    &format!(
                        "SELECT {TASK_COLUMNS} FROM tasks
                         WHERE assigned_agent_id = ?1 AND status = ?2 ORDER BY id LIMIT 1"
                    ),
                    rusqlite::params![agent_id.as_str(), TaskStatus::InProgress.as_str()],
                )
            })
            .map(|mut tasks| tasks.pop())
    }

    pub fn count_for_agent(&self, agent_id: &AgentId, status: TaskStatus) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE assigned_agent_id = ?1 AND status = ?2",
                rusqlite::params![agent_id.as_str(), status.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Tasks the agent finished at or after `since`.
    pub fn completed_since(&self, agent_id: &AgentId, since: DateTime<Utc>) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE assigned_agent_id = ?1 AND status = ?2 AND completed_at >= ?3",
                rusqlite::params![
                    agent_id.as_str(),
                    TaskStatus::Done.as_str(),
                    row_helpers::timestamp(since),
                ],
                |row| row.get(0),
            )?)
        })
    }

    /// Escalations still sitting in `assigned`.
    #[instrument(skip(self))]
    pub fn pending_escalations(&self) -> Result<Vec<PendingEscalation>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.title, a.name, t.escalation_reason
                 FROM tasks t LEFT JOIN agents a ON a.id = t.escalated_from_agent_id
                 WHERE t.is_escalation = 1 AND t.status = ?1
                 ORDER BY t.id",
            )?;
            let mut rows = stmt.query([TaskStatus::Assigned.as_str()])?;
            let mut escalations = Vec::new();
            while let Some(row) = rows.next()? {
                escalations.push(PendingEscalation {
                    id: row_helpers::get(row, 0, "tasks", "id")?,
                    title: row_helpers::get(row, 1, "tasks", "title")?,
                    from_agent: row_helpers::get::<Option<String>>(row, 2, "agents", "name")?
                        .unwrap_or_else(|| "Unknown".to_string()),
                    reason: row_helpers::get::<Option<String>>(row, 3, "tasks", "escalation_reason")?
                        .unwrap_or_else(|| "system_request".to_string()),
                });
            }
            Ok(escalations)
        })
    }

    /// Hand the task to `to_agent` and re-stamp its assignment.
    #[instrument(skip(self), fields(to = %to_agent))]
    pub fn accept_escalation(&self, id: i64, to_agent: &AgentId) -> Result<TaskRow, StoreError> {
        let now = row_helpers::now();
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tasks SET assigned_agent_id = ?2, status = ?3, assigned_at = ?4 WHERE id = ?1",
                rusqlite::params![id, to_agent.as_str(), TaskStatus::Assigned.as_str(), now],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        self.get(id)
    }

    /// Clear the escalation flag; the task stays with its current agent.
    #[instrument(skip(self))]
    pub fn decline_escalation(&self, id: i64) -> Result<TaskRow, StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tasks SET is_escalation = 0, status = ?2 WHERE id = ?1",
                rusqlite::params![id, TaskStatus::Assigned.as_str()],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRepo;
    use chrono::Duration;
    use serde_json::json;

    fn setup() -> TaskRepo {
        let db = Database::in_memory().unwrap();
        AgentRepo::new(db.clone()).seed_defaults().unwrap();
        TaskRepo::new(db)
    }

    fn bulma() -> AgentId {
        AgentId::from_raw("bulma")
    }

    fn saraai() -> AgentId {
        AgentId::from_raw("saraai")
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.into(),
            description: None,
            priority: Priority::default(),
            assigned_agent_id: bulma(),
        }
    }

    fn escalation(reason: Option<&str>) -> NewEscalation {
        NewEscalation {
            title: "Docker setup for Redis".into(),
            description: Some("Need Redis container for caching".into()),
            priority: Priority::Medium,
            from_agent_id: bulma(),
            to_agent_id: saraai(),
            reason: reason.map(String::from),
        }
    }

    #[test]
    fn create_assigned_stamps_assignment() {
        let repo = setup();
        let task = repo.create_assigned(&new_task("Build auth API")).unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_by, AssignedBy::User);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.assigned_agent_id, Some(bulma()));
        assert_eq!(task.assigned_at.as_deref(), Some(task.created_at.as_str()));
        assert!(!task.is_escalation);
    }

    #[test]
    fn create_for_unknown_agent_fails() {
        let repo = setup();
        let mut task = new_task("x");
        task.assigned_agent_id = AgentId::from_raw("ghost");
        assert!(matches!(repo.create_assigned(&task), Err(StoreError::Database(_))));
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = setup();
        assert!(matches!(repo.get(99), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn update_stores_plan_and_stamps_transitions() {
        let repo = setup();
        let task = repo.create_assigned(&new_task("t")).unwrap();

        let planned = repo
            .update(
                task.id,
                &TaskUpdate {
                    plan: Some(json!({"steps": ["design", "build"]})),
                    status: None,
                },
            )
            .unwrap();
        assert_eq!(planned.plan, Some(json!({"steps": ["design", "build"]})));
        assert_eq!(planned.status, TaskStatus::Assigned);

        let started = repo
            .update(
                task.id,
                &TaskUpdate {
                    plan: None,
                    status: Some(TaskStatus::InProgress),
                },
            )
            .unwrap();
        assert!(started.started_at.is_some());
        assert!(started.completed_at.is_none());
        assert_eq!(started.plan, planned.plan, "plan kept when not supplied");

        let done = repo
            .update(
                task.id,
                &TaskUpdate {
                    plan: None,
                    status: Some(TaskStatus::Done),
                },
            )
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.started_at, started.started_at);
    }

    #[test]
    fn update_missing_is_not_found() {
        let repo = setup();
        let err = repo.update(42, &TaskUpdate::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn agent_queries() {
        let repo = setup();
        let a = repo.create_assigned(&new_task("a")).unwrap();
        let b = repo.create_assigned(&new_task("b")).unwrap();
        repo.create_assigned(&new_task("c")).unwrap();

        repo.update(a.id, &TaskUpdate { plan: None, status: Some(TaskStatus::InProgress) })
            .unwrap();
        repo.update(b.id, &TaskUpdate { plan: None, status: Some(TaskStatus::Done) })
            .unwrap();

        assert_eq!(repo.list_for_agent(&bulma()).unwrap().len(), 3);
        assert!(repo.list_for_agent(&saraai()).unwrap().is_empty());
        assert_eq!(repo.current_for_agent(&bulma()).unwrap().map(|t| t.id), Some(a.id));
        assert_eq!(repo.current_for_agent(&saraai()).unwrap(), None);
        assert_eq!(repo.count_for_agent(&bulma(), TaskStatus::Assigned).unwrap(), 1);

        let hour_ago = Utc::now() - Duration::hours(1);
        let in_an_hour = Utc::now() + Duration::hours(1);
        assert_eq!(repo.completed_since(&bulma(), hour_ago).unwrap(), 1);
        assert_eq!(repo.completed_since(&bulma(), in_an_hour).unwrap(), 0);
    }

    #[test]
    fn pending_escalations_join_source_agent() {
        let repo = setup();
        repo.create_assigned(&new_task("ordinary")).unwrap();
        let esc = repo.create_escalation(&escalation(Some("infrastructure_needed"))).unwrap();
        assert!(esc.is_escalation);
        assert_eq!(esc.assigned_by, AssignedBy::Escalation);
        assert_eq!(esc.escalated_from_agent_id, Some(bulma()));

        let pending = repo.pending_escalations().unwrap();
        assert_eq!(
            pending,
            vec![PendingEscalation {
                id: esc.id,
                title: "Docker setup for Redis".into(),
                from_agent: "Bulma".into(),
                reason: "infrastructure_needed".into(),
            }]
        );
    }

    #[test]
    fn pending_escalation_reason_defaults() {
        let repo = setup();
        repo.create_escalation(&escalation(None)).unwrap();
        assert_eq!(repo.pending_escalations().unwrap()[0].reason, "system_request");
    }

    #[test]
    fn accept_reassigns() {
        let repo = setup();
        let esc = repo.create_escalation(&escalation(None)).unwrap();
        repo.update(esc.id, &TaskUpdate { plan: None, status: Some(TaskStatus::Review) })
            .unwrap();

        let accepted = repo.accept_escalation(esc.id, &saraai()).unwrap();
        assert_eq!(accepted.assigned_agent_id, Some(saraai()));
        assert_eq!(accepted.status, TaskStatus::Assigned);
        assert!(accepted.assigned_at.is_some());
    }

    #[test]
    fn decline_clears_flag() {
        let repo = setup();
        let esc = repo.create_escalation(&escalation(None)).unwrap();
        let declined = repo.decline_escalation(esc.id).unwrap();
        assert!(!declined.is_escalation);
        assert_eq!(declined.status, TaskStatus::Assigned);
        assert!(repo.pending_escalations().unwrap().is_empty());
    }

    #[test]
    fn escalation_actions_on_missing_task() {
        let repo = setup();
        assert!(matches!(repo.accept_escalation(7, &saraai()), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.decline_escalation(7), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn serializes_camel_case() {
        let repo = setup();
        let task = repo.create_assigned(&new_task("t")).unwrap();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["assignedAgentId"], "bulma");
        assert_eq!(json["status"], "assigned");
        assert_eq!(json["isEscalation"], false);
    }
}
