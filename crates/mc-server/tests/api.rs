//! HTTP API tests against a live server, with the gateway either unreachable
//! or played by an in-process mock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mc_core::domain::Priority;
use mc_core::{AgentId, GatewayToken};
use mc_gateway::{GatewayClient, GatewayConfig};
use mc_server::{start, ServerConfig, ServerHandle};
use mc_store::agents::AgentRepo;
use mc_store::tasks::{NewEscalation, TaskRepo};
use mc_store::Database;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

struct TestServer {
    base: String,
    db: Database,
    http: reqwest::Client,
    handle: ServerHandle,
}

impl TestServer {
    async fn start(gateway: GatewayClient) -> Self {
        let db = Database::in_memory().unwrap();
        AgentRepo::new(db.clone()).seed_defaults().unwrap();
        let config = ServerConfig {
            port: 0,
            sse_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let handle = start(config, db.clone(), gateway).await.unwrap();
        Self {
            base: format!("http://127.0.0.1:{}", handle.port),
            db,
            http: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.http.get(format!("{}{path}", self.base)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn patch(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .patch(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

fn offline_gateway() -> GatewayClient {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    GatewayClient::new(
        GatewayConfig::default()
            .with_url(format!("ws://{addr}"))
            .with_connect_timeout(Duration::from_millis(300))
            .with_auto_reconnect(false),
    )
}

/// A gateway that authenticates every client, reports two sessions and
/// records every `sessions.send` params object.
async fn mock_gateway() -> (GatewayClient, Arc<Mutex<Vec<Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sent = Arc::new(Mutex::new(Vec::new()));

    let recorded = sent.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                let challenge = json!({"type": "event", "event": "connect.challenge", "payload": {}});
                if ws.send(Message::Text(challenge.to_string().into())).await.is_err() {
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let req: Value = serde_json::from_str(text.as_str()).unwrap();
                    let payload = match req["method"].as_str() {
                        Some("sessions.list") => json!([
                            {"key": "agent:bulma:main", "agentId": "bulma", "messageCount": 3},
                            {"key": "agent:saraai:main", "agentId": "saraai"}
                        ]),
                        Some("sessions.send") => {
                            recorded.lock().unwrap().push(req["params"].clone());
                            json!({"queued": true})
                        }
                        _ => json!({}),
                    };
                    let res = json!({"type": "res", "id": req["id"], "ok": true, "payload": payload});
                    if ws.send(Message::Text(res.to_string().into())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let client = GatewayClient::new(
        GatewayConfig::default()
            .with_url(format!("ws://{addr}"))
            .with_token(GatewayToken::new("t1"))
            .with_connect_timeout(Duration::from_millis(500))
            .with_request_timeout(Duration::from_millis(500))
            .with_auto_reconnect(false),
    );
    (client, sent)
}

// ── Local data, gateway unreachable ─────────────────────────────────

#[tokio::test]
async fn health_reports_gateway_state() {
    let server = TestServer::start(offline_gateway()).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"status": "healthy", "gateway": "disconnected"}));
}

#[tokio::test]
async fn dashboard_serves_local_data_without_gateway() {
    let server = TestServer::start(offline_gateway()).await;
    let (status, body) = server.get("/api/agents").await;
    assert_eq!(status, 200);
    assert_eq!(body["gatewayStatus"], json!({"connected": false, "activeSessions": 0}));
    assert_eq!(body["agents"].as_array().unwrap().len(), 2);
    assert_eq!(body["agents"][0]["name"], "Bulma");
    assert_eq!(body["activities"], json!([]));
    assert_eq!(body["escalations"], json!([]));
}

#[tokio::test]
async fn unknown_agent_is_404() {
    let server = TestServer::start(offline_gateway()).await;
    let (status, body) = server.get("/api/agents/nobody").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "Agent not found");

    let (status, body) = server.get("/api/agents/saraai").await;
    assert_eq!(status, 200);
    assert_eq!(body["escalationOnly"], true);
}

#[tokio::test]
async fn create_task_assigns_and_logs_activity() {
    let server = TestServer::start(offline_gateway()).await;
    let (status, body) = server
        .post(
            "/api/tasks",
            json!({"title": "Build auth API", "priority": "high", "assignedAgentId": "bulma"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    let task_id = body["taskId"].as_i64().unwrap();

    let (_, tasks) = server.get("/api/agents/bulma/tasks").await;
    assert_eq!(tasks[0]["id"], task_id);
    assert_eq!(tasks[0]["status"], "assigned");
    assert_eq!(tasks[0]["priority"], "high");

    let (_, snapshot) = server.get("/api/agents").await;
    assert_eq!(snapshot["agents"][0]["queueCount"], 1);
    assert_eq!(snapshot["activities"][0]["type"], "created");
    assert_eq!(snapshot["activities"][0]["content"], "Task \"Build auth API\" assigned");
    assert_eq!(snapshot["activities"][0]["agent"]["name"], "Bulma");
}

#[tokio::test]
async fn create_task_validates_input() {
    let server = TestServer::start(offline_gateway()).await;

    let (status, body) = server.post("/api/tasks", json!({"title": "x"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Title and assigned agent required");

    let (status, _) = server
        .post("/api/tasks", json!({"title": "x", "assignedAgentId": "nobody"}))
        .await;
    assert_eq!(status, 404);

    let (status, _) = server
        .post(
            "/api/tasks",
            json!({"title": "x", "assignedAgentId": "bulma", "priority": "urgent"}),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn patch_task_moves_status_and_stores_plan() {
    let server = TestServer::start(offline_gateway()).await;
    let (_, created) = server
        .post("/api/tasks", json!({"title": "Schema design", "assignedAgentId": "bulma"}))
        .await;
    let id = created["taskId"].as_i64().unwrap();

    let (status, body) = server
        .patch(
            &format!("/api/tasks/{id}"),
            json!({"plan": {"steps": ["draft", "review"]}, "status": "in_progress"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"success": true}));

    let (_, tasks) = server.get("/api/agents/bulma/tasks").await;
    assert_eq!(tasks[0]["status"], "in_progress");
    assert_eq!(tasks[0]["plan"]["steps"][1], "review");
    assert!(tasks[0]["startedAt"].is_string());

    let (_, snapshot) = server.get("/api/agents").await;
    assert_eq!(snapshot["agents"][0]["currentTask"]["title"], "Schema design");

    let (status, _) = server
        .patch(&format!("/api/tasks/{id}"), json!({"status": "exploded"}))
        .await;
    assert_eq!(status, 400);

    let (status, body) = server.patch("/api/tasks/9999", json!({"status": "done"})).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "Task not found");
}

#[tokio::test]
async fn approving_plan_logs_assignment() {
    let server = TestServer::start(offline_gateway()).await;
    let (_, created) = server
        .post("/api/tasks", json!({"title": "Dashboard", "assignedAgentId": "bulma"}))
        .await;
    let id = created["taskId"].as_i64().unwrap();

    server
        .patch(&format!("/api/tasks/{id}"), json!({"status": "assigned"}))
        .await;

    let (_, snapshot) = server.get("/api/agents").await;
    assert_eq!(snapshot["activities"][0]["type"], "assigned");
    assert_eq!(
        snapshot["activities"][0]["content"],
        "Plan approved, task assigned to agent"
    );
    assert_eq!(snapshot["activities"][0]["agent"]["name"], "System");
}

fn escalate(db: &Database, title: &str) -> i64 {
    TaskRepo::new(db.clone())
        .create_escalation(&NewEscalation {
            title: title.into(),
            description: None,
            priority: Priority::Medium,
            from_agent_id: AgentId::from_raw("bulma"),
            to_agent_id: AgentId::from_raw("saraai"),
            reason: Some("infrastructure_needed".into()),
        })
        .unwrap()
        .id
}

#[tokio::test]
async fn accepting_escalation_reassigns_to_saraai() {
    let server = TestServer::start(offline_gateway()).await;
    let id = escalate(&server.db, "Docker setup for Redis");

    let (_, snapshot) = server.get("/api/agents").await;
    assert_eq!(snapshot["escalations"][0]["fromAgent"], "Bulma");
    assert_eq!(snapshot["escalations"][0]["reason"], "infrastructure_needed");

    let (status, body) = server
        .post("/api/escalations", json!({"escalationId": id, "action": "accept"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Escalation accepted");

    let (_, tasks) = server.get("/api/agents/saraai/tasks").await;
    assert_eq!(tasks[0]["id"], id);
    assert_eq!(tasks[0]["status"], "assigned");

    let (_, snapshot) = server.get("/api/agents").await;
    assert_eq!(snapshot["activities"][0]["content"], "Accepted escalation from bulma");
    assert_eq!(snapshot["activities"][0]["agent"]["name"], "Saraai");
}

#[tokio::test]
async fn declining_escalation_clears_it() {
    let server = TestServer::start(offline_gateway()).await;
    let id = escalate(&server.db, "Nginx config");

    let (status, body) = server
        .post("/api/escalations", json!({"escalationId": id, "action": "decline"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Escalation declined");

    let (_, snapshot) = server.get("/api/agents").await;
    assert_eq!(snapshot["escalations"], json!([]));
}

#[tokio::test]
async fn escalation_review_validates_input() {
    let server = TestServer::start(offline_gateway()).await;
    let id = escalate(&server.db, "Nginx config");

    let (status, body) = server.post("/api/escalations", json!({"action": "accept"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Missing required fields");

    let (status, body) = server
        .post("/api/escalations", json!({"escalationId": 9999, "action": "accept"}))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "Escalation not found");

    let (status, body) = server
        .post("/api/escalations", json!({"escalationId": id, "action": "ignore"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Invalid action");
}

#[tokio::test]
async fn gateway_routes_report_bad_gateway_when_unreachable() {
    let server = TestServer::start(offline_gateway()).await;
    let (status, body) = server.get("/api/gateway/sessions").await;
    assert_eq!(status, 502);
    assert!(body["error"].is_string());

    let (status, _) = server
        .post("/api/gateway/sessions/agent:bulma:main/messages", json!({}))
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn stream_pushes_snapshot_immediately() {
    let server = TestServer::start(offline_gateway()).await;
    let mut resp = server
        .http
        .get(format!("{}/api/sse", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut buffer = String::new();
    while !buffer.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    let data = buffer
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let snapshot: Value = serde_json::from_str(data).unwrap();
    assert_eq!(snapshot["agents"][1]["id"], "saraai");
}

// ── Gateway reachable ───────────────────────────────────────────────

#[tokio::test]
async fn dashboard_counts_gateway_sessions() {
    let (gateway, _) = mock_gateway().await;
    let server = TestServer::start(gateway).await;

    let (status, body) = server.get("/api/agents").await;
    assert_eq!(status, 200);
    assert_eq!(body["gatewayStatus"], json!({"connected": true, "activeSessions": 2}));

    let (_, health) = server.get("/health").await;
    assert_eq!(health["gateway"], "ready");
}

#[tokio::test]
async fn sessions_are_proxied_from_gateway() {
    let (gateway, _) = mock_gateway().await;
    let server = TestServer::start(gateway).await;

    let (status, body) = server.get("/api/gateway/sessions").await;
    assert_eq!(status, 200);
    assert_eq!(body[0]["key"], "agent:bulma:main");
    assert_eq!(body[0]["messageCount"], 3);
    assert_eq!(body[1]["agentId"], "saraai");
}

#[tokio::test]
async fn messages_are_forwarded_to_session() {
    let (gateway, sent) = mock_gateway().await;
    let server = TestServer::start(gateway).await;

    let (status, body) = server
        .post(
            "/api/gateway/sessions/agent:bulma:main/messages",
            json!({"content": "ship it"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"success": true}));
    assert_eq!(
        sent.lock().unwrap().as_slice(),
        [json!({"sessionKey": "agent:bulma:main", "content": "ship it"})]
    );
}
