//! Route handlers. Store access is synchronous and short; gateway calls are
//! awaited in place.

use axum::extract::{Path, State};
use axum::Json;
use mc_core::domain::{ActivityType, EscalationAction, Priority, TaskStatus};
use mc_core::AgentId;
use mc_gateway::{GatewayClient, GatewayError, SessionInfo};
use mc_store::activities::{ActivityRepo, NewActivity};
use mc_store::agents::{AgentRepo, AgentRow, ESCALATION_AGENT_ID};
use mc_store::tasks::{NewTask, TaskRepo, TaskRow, TaskUpdate};
use mc_store::StoreError;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::server::AppState;
use crate::status::{self, DashboardSnapshot};

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "gateway": state.gateway.state(),
    }))
}

pub async fn dashboard(State(state): State<AppState>) -> ApiResult<DashboardSnapshot> {
    status::snapshot(&state.gateway, &state.db, state.activity_limit)
        .await
        .map(Json)
        .map_err(ApiError::store("Failed to fetch system status"))
}

pub async fn get_agent(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<AgentRow> {
    match AgentRepo::new(state.db.clone()).get(&AgentId::from_raw(id)) {
        Ok(agent) => Ok(Json(agent)),
        Err(StoreError::NotFound(_)) => Err(ApiError::not_found("Agent not found")),
        Err(e) => Err(ApiError::store("Failed to fetch agent")(e)),
    }
}

pub async fn agent_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<TaskRow>> {
    TaskRepo::new(state.db.clone())
        .list_for_agent(&AgentId::from_raw(id))
        .map(Json)
        .map_err(ApiError::store("Failed to fetch tasks"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub assigned_agent_id: Option<String>,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<Value> {
    let title = req.title.filter(|t| !t.trim().is_empty());
    let agent_id = req.assigned_agent_id.filter(|a| !a.is_empty());
    let (Some(title), Some(agent_id)) = (title, agent_id) else {
        return Err(ApiError::bad_request("Title and assigned agent required"));
    };
    let priority = match req.priority.as_deref().filter(|p| !p.is_empty()) {
        Some(raw) => raw
            .parse::<Priority>()
            .map_err(|_| ApiError::bad_request(format!("Invalid priority: {raw}")))?,
        None => Priority::default(),
    };
    let agent_id = AgentId::from_raw(agent_id);

    match AgentRepo::new(state.db.clone()).get(&agent_id) {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => return Err(ApiError::not_found("Agent not found")),
        Err(e) => return Err(ApiError::store("Failed to create task")(e)),
    }

    let task = TaskRepo::new(state.db.clone())
        .create_assigned(&NewTask {
            title: title.clone(),
            description: req.description.filter(|d| !d.is_empty()),
            priority,
            assigned_agent_id: agent_id.clone(),
        })
        .map_err(ApiError::store("Failed to create task"))?;

    ActivityRepo::new(state.db.clone())
        .record(
            &NewActivity::new(ActivityType::Created, format!("Task \"{title}\" assigned"))
                .for_task(task.id)
                .by_agent(agent_id),
        )
        .map_err(ApiError::store("Failed to create task"))?;

    info!(task_id = task.id, "task created");
    Ok(Json(json!({ "success": true, "taskId": task.id })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub plan: Option<Value>,
    pub status: Option<String>,
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Value> {
    let status = match req.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<TaskStatus>()
                .map_err(|_| ApiError::bad_request(format!("Invalid status: {raw}")))?,
        ),
        None => None,
    };
    let update = TaskUpdate {
        plan: req.plan.filter(|p| !p.is_null()),
        status,
    };

    match TaskRepo::new(state.db.clone()).update(id, &update) {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => return Err(ApiError::not_found("Task not found")),
        Err(e) => return Err(ApiError::store("Failed to update task")(e)),
    }

    if status == Some(TaskStatus::Assigned) {
        ActivityRepo::new(state.db.clone())
            .record(
                &NewActivity::new(ActivityType::Assigned, "Plan approved, task assigned to agent")
                    .for_task(id),
            )
            .map_err(ApiError::store("Failed to update task"))?;
    }

    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRequest {
    pub escalation_id: Option<i64>,
    pub action: Option<String>,
}

pub async fn review_escalation(
    State(state): State<AppState>,
    Json(req): Json<EscalationRequest>,
) -> ApiResult<Value> {
    let (Some(id), Some(action)) = (req.escalation_id, req.action.filter(|a| !a.is_empty())) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let tasks = TaskRepo::new(state.db.clone());
    let task = match tasks.get(id) {
        Ok(task) => task,
        Err(StoreError::NotFound(_)) => return Err(ApiError::not_found("Escalation not found")),
        Err(e) => return Err(ApiError::store("Failed to process escalation")(e)),
    };

    let action = action
        .parse::<EscalationAction>()
        .map_err(|_| ApiError::bad_request("Invalid action"))?;

    match action {
        EscalationAction::Accept => {
            let to = AgentId::from_raw(ESCALATION_AGENT_ID);
            tasks
                .accept_escalation(id, &to)
                .map_err(ApiError::store("Failed to process escalation"))?;
            let from = task
                .escalated_from_agent_id
                .as_ref()
                .map_or("unknown", |a| a.as_str());
            ActivityRepo::new(state.db.clone())
                .record(
                    &NewActivity::new(ActivityType::Assigned, format!("Accepted escalation from {from}"))
                        .for_task(id)
                        .by_agent(to),
                )
                .map_err(ApiError::store("Failed to process escalation"))?;
            info!(task_id = id, "escalation accepted");
            Ok(Json(json!({ "success": true, "message": "Escalation accepted" })))
        }
        EscalationAction::Decline => {
            tasks
                .decline_escalation(id)
                .map_err(ApiError::store("Failed to process escalation"))?;
            info!(task_id = id, "escalation declined");
            Ok(Json(json!({ "success": true, "message": "Escalation declined" })))
        }
    }
}

async fn ensure_connected(gateway: &GatewayClient) -> Result<(), GatewayError> {
    if gateway.is_connected() {
        return Ok(());
    }
    gateway.connect().await
}

pub async fn gateway_sessions(State(state): State<AppState>) -> ApiResult<Vec<SessionInfo>> {
    ensure_connected(&state.gateway).await?;
    Ok(Json(state.gateway.list_sessions().await?))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: Option<String>,
}

pub async fn send_session_message(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Value> {
    let Some(content) = req.content.filter(|c| !c.is_empty()) else {
        return Err(ApiError::bad_request("Message content required"));
    };
    ensure_connected(&state.gateway).await?;
    state.gateway.send_message(&key, &content).await?;
    Ok(Json(json!({ "success": true })))
}
