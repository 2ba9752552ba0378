//! Dashboard aggregation: per-agent workload from the store plus gateway
//! reachability.

use chrono::Utc;
use mc_core::domain::{AgentRole, Priority, TaskStatus};
use mc_core::AgentId;
use mc_gateway::GatewayClient;
use mc_store::activities::{ActivityRepo, RecentActivity};
use mc_store::agents::AgentRepo;
use mc_store::tasks::{PendingEscalation, TaskRepo};
use mc_store::{Database, StoreError};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTask {
    pub id: i64,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub id: AgentId,
    pub name: String,
    pub emoji: String,
    pub role: AgentRole,
    pub color: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<CurrentTask>,
    pub queue_count: u32,
    pub completed_today: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub gateway_connected: bool,
    pub active_sessions: usize,
    pub agents: Vec<AgentStatus>,
    pub escalations: Vec<PendingEscalation>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub connected: bool,
    pub active_sessions: usize,
}

/// Payload of `GET /api/agents` and of each SSE message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub agents: Vec<AgentStatus>,
    pub activities: Vec<RecentActivity>,
    pub escalations: Vec<PendingEscalation>,
    pub gateway_status: GatewayStatus,
}

/// Connect the gateway if needed and count its sessions. Gateway trouble is
/// reported as "not connected", never as an error.
pub async fn gateway_status(gateway: &GatewayClient) -> GatewayStatus {
    if !gateway.is_connected() {
        if let Err(e) = gateway.connect().await {
            debug!(error = %e, "gateway unavailable, serving local data only");
        }
    }

    let connected = gateway.is_connected();
    let mut active_sessions = 0;
    if connected {
        match gateway.list_sessions().await {
            Ok(sessions) => active_sessions = sessions.len(),
            Err(e) => warn!(error = %e, kind = e.error_kind(), "listing gateway sessions failed"),
        }
    }
    GatewayStatus {
        connected,
        active_sessions,
    }
}

/// Workload of every agent, in roster order.
pub fn agent_statuses(db: &Database) -> Result<Vec<AgentStatus>, StoreError> {
    let agents = AgentRepo::new(db.clone()).list()?;
    let tasks = TaskRepo::new(db.clone());
    let start_of_day = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or_else(Utc::now);

    agents
        .into_iter()
        .map(|agent| -> Result<AgentStatus, StoreError> {
            let current_task = tasks.current_for_agent(&agent.id)?.map(|t| CurrentTask {
                id: t.id,
                title: t.title,
                status: t.status,
                priority: t.priority,
            });
            Ok(AgentStatus {
                queue_count: tasks.count_for_agent(&agent.id, TaskStatus::Assigned)?,
                completed_today: tasks.completed_since(&agent.id, start_of_day)?,
                current_task,
                emoji: agent.emoji.unwrap_or_else(|| "🤖".into()),
                color: agent.color.unwrap_or_else(|| "bg-gray-500".into()),
                id: agent.id,
                name: agent.name,
                role: agent.role,
                is_active: agent.is_active,
            })
        })
        .collect()
}

pub async fn system_status(gateway: &GatewayClient, db: &Database) -> Result<SystemStatus, StoreError> {
    let gateway = gateway_status(gateway).await;
    Ok(SystemStatus {
        gateway_connected: gateway.connected,
        active_sessions: gateway.active_sessions,
        agents: agent_statuses(db)?,
        escalations: TaskRepo::new(db.clone()).pending_escalations()?,
    })
}

pub fn recent_activities(db: &Database, limit: usize) -> Result<Vec<RecentActivity>, StoreError> {
    ActivityRepo::new(db.clone()).recent(limit)
}

pub async fn snapshot(
    gateway: &GatewayClient,
    db: &Database,
    activity_limit: usize,
) -> Result<DashboardSnapshot, StoreError> {
    let status = system_status(gateway, db).await?;
    Ok(DashboardSnapshot {
        agents: status.agents,
        activities: recent_activities(db, activity_limit)?,
        escalations: status.escalations,
        gateway_status: GatewayStatus {
            connected: status.gateway_connected,
            active_sessions: status.active_sessions,
        },
    })
}
