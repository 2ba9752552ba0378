use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, patch, post};
use axum::Router;
use futures::Stream;
use mc_gateway::GatewayClient;
use mc_store::Database;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::status;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Spacing between dashboard snapshots on `/api/sse`.
    pub sse_interval: Duration,
    /// Entries in the activity feed of each snapshot.
    pub activity_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            sse_interval: Duration::from_secs(3),
            activity_limit: 10,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gateway: GatewayClient,
    pub sse_interval: Duration,
    pub activity_limit: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig, db: Database, gateway: GatewayClient) -> Self {
        Self {
            db,
            gateway,
            sse_interval: config.sse_interval,
            activity_limit: config.activity_limit,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/agents", get(handlers::dashboard))
        .route("/api/agents/{id}", get(handlers::get_agent))
        .route("/api/agents/{id}/tasks", get(handlers::agent_tasks))
        .route("/api/tasks", post(handlers::create_task))
        .route("/api/tasks/{id}", patch(handlers::update_task))
        .route("/api/escalations", post(handlers::review_escalation))
        .route("/api/gateway/sessions", get(handlers::gateway_sessions))
        .route(
            "/api/gateway/sessions/{key}/messages",
            post(handlers::send_session_message),
        )
        .route("/api/sse", get(stream_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and serve in the background.
pub async fn start(
    config: ServerConfig,
    db: Database,
    gateway: GatewayClient,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(&config, db, gateway);
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "mission control server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Resolves when the serve loop exits.
    pub async fn wait(&mut self) -> Result<(), tokio::task::JoinError> {
        (&mut self.server).await
    }

    pub fn shutdown(&self) {
        self.server.abort();
    }
}

/// Pushes a dashboard snapshot right away, then once per interval.
async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut ticker = tokio::time::interval(state.sse_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let events = futures::stream::unfold((state, ticker), |(state, mut ticker)| async move {
        ticker.tick().await;
        let event = snapshot_event(&state).await;
        Some((Ok(event), (state, ticker)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn snapshot_event(state: &AppState) -> Event {
    match status::snapshot(&state.gateway, &state.db, state.activity_limit).await {
        Ok(snapshot) => Event::default().json_data(&snapshot).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "encoding dashboard snapshot failed");
            Event::default().comment("snapshot unavailable")
        }),
        Err(e) => {
            tracing::warn!(error = %e, "building dashboard snapshot failed");
            Event::default().comment("snapshot unavailable")
        }
    }
}
