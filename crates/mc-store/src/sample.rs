//! Demo board contents: tasks in every column, one pending escalation and a
//! short activity feed.

use mc_core::domain::{ActivityType, Priority, TaskStatus};
use mc_core::AgentId;
use tracing::{info, instrument};

use crate::activities::{ActivityRepo, NewActivity};
use crate::agents::ESCALATION_AGENT_ID;
use crate::database::Database;
use crate::error::StoreError;
use crate::tasks::{NewEscalation, NewTask, TaskRepo, TaskUpdate};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleSummary {
    pub tasks: usize,
    pub activities: usize,
}

struct SampleTask {
    title: &'static str,
    description: &'static str,
    priority: Priority,
    agent: &'static str,
    /// Statuses walked through after creation, in order.
    moves: &'static [TaskStatus],
    activity: Option<(ActivityType, &'static str)>,
}

const SAMPLE_TASKS: &[SampleTask] = &[
    SampleTask {
        title: "Build auth API",
        description: "JWT authentication system with refresh tokens",
        priority: Priority::High,
        agent: "bulma",
        moves: &[TaskStatus::InProgress],
        activity: Some((ActivityType::Started, "Started \"Build auth API\"")),
    },
    SampleTask {
        title: "Database schema design",
        description: "Design tables for user management",
        priority: Priority::Medium,
        agent: "bulma",
        moves: &[TaskStatus::InProgress, TaskStatus::Done],
        activity: Some((ActivityType::Completed, "Completed \"Database schema design\"")),
    },
    SampleTask {
        title: "Update server packages",
        description: "Security patches for Ubuntu",
        priority: Priority::High,
        agent: ESCALATION_AGENT_ID,
        moves: &[TaskStatus::InProgress],
        activity: Some((ActivityType::Started, "Started \"Update server packages\"")),
    },
    SampleTask {
        title: "Frontend dashboard components",
        description: "Build kanban board UI",
        priority: Priority::Medium,
        agent: "bulma",
        moves: &[],
        activity: None,
    },
];

/// Fill an empty board with sample work. Does nothing when any task exists.
/// The default agents must already be seeded.
#[instrument(skip(db))]
pub fn seed_sample(db: &Database) -> Result<SampleSummary, StoreError> {
    let existing: i64 = db.with_conn(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?)
    })?;
    if existing > 0 {
        info!(existing, "board already has tasks, skipping sample data");
        return Ok(SampleSummary::default());
    }

    let tasks = TaskRepo::new(db.clone());
    let activities = ActivityRepo::new(db.clone());
    let mut summary = SampleSummary::default();

    for sample in SAMPLE_TASKS {
        let agent = AgentId::from_raw(sample.agent);
        let task = tasks.create_assigned(&NewTask {
            title: sample.title.into(),
            description: Some(sample.description.into()),
            priority: sample.priority,
            assigned_agent_id: agent.clone(),
        })?;
        for status in sample.moves {
            tasks.update(
                task.id,
                &TaskUpdate {
                    plan: None,
                    status: Some(*status),
                },
            )?;
        }
        summary.tasks += 1;

        if let Some((kind, content)) = sample.activity {
            activities.record(&NewActivity::new(kind, content).for_task(task.id).by_agent(agent))?;
            summary.activities += 1;
        }
    }

    let bulma = AgentId::from_raw("bulma");
    let escalation = tasks.create_escalation(&NewEscalation {
        title: "Docker setup for Redis".into(),
        description: Some("Need Redis container for caching".into()),
        priority: Priority::Medium,
        from_agent_id: bulma.clone(),
        to_agent_id: AgentId::from_raw(ESCALATION_AGENT_ID),
        reason: Some("infrastructure_needed".into()),
    })?;
    activities.record(
        &NewActivity::new(ActivityType::Escalated, "Escalated: Need Redis/Docker setup")
            .for_task(escalation.id)
            .by_agent(bulma),
    )?;
    summary.tasks += 1;
    summary.activities += 1;

    info!(tasks = summary.tasks, activities = summary.activities, "sample data added");
    Ok(summary)
}
