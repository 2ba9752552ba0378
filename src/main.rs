use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mc_gateway::GatewayClient;
use mc_server::ServerConfig;
use mc_store::agents::AgentRepo;
use mc_store::Database;
use mc_telemetry::TelemetryConfig;

#[derive(Parser, Debug)]
#[command(name = "mission-control", version, about = "Agent dashboard backed by the Gateway")]
struct Cli {
    /// SQLite database file.
    #[arg(long, global = true, env = "MC_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and SSE stream.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, short, default_value_t = 3000)]
        port: u16,
        /// Seconds between dashboard snapshots on the event stream.
        #[arg(long, default_value_t = 3)]
        sse_interval: u64,
    },
    /// Create the schema and seed the default agents.
    InitDb,
    /// Add sample tasks, an escalation and activities to an empty board.
    SeedSample,
    /// Apply current display names and emojis to the default agents.
    UpdateAgents,
    /// List gateway sessions.
    Sessions,
    /// Send a message into a gateway session.
    Send { session_key: String, content: String },
    /// Print the aggregated system status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    mc_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        ..Default::default()
    })
    .context("failed to initialize logging")?;

    match cli.command {
        Command::Serve {
            host,
            port,
            sse_interval,
        } => {
            let db = open_db(cli.db_path)?;
            AgentRepo::new(db.clone())
                .seed_defaults()
                .context("failed to seed agents")?;
            serve(
                ServerConfig {
                    host,
                    port,
                    sse_interval: Duration::from_secs(sse_interval.max(1)),
                    ..Default::default()
                },
                db,
            )
            .await
        }
        Command::InitDb => {
            let db = open_db(cli.db_path)?;
            let seeded = AgentRepo::new(db.clone())
                .seed_defaults()
                .context("failed to seed agents")?;
            println!("database ready at {} ({seeded} agents seeded)", db.path().display());
            Ok(())
        }
        Command::SeedSample => {
            let db = open_db(cli.db_path)?;
            AgentRepo::new(db.clone())
                .seed_defaults()
                .context("failed to seed agents")?;
            let summary = mc_store::sample::seed_sample(&db).context("failed to add sample data")?;
            println!(
                "added {} sample tasks and {} activities",
                summary.tasks, summary.activities
            );
            Ok(())
        }
        Command::UpdateAgents => {
            let db = open_db(cli.db_path)?;
            let updated = AgentRepo::new(db)
                .apply_roster_updates()
                .context("failed to update agents")?;
            println!("updated {updated} agents");
            Ok(())
        }
        Command::Sessions => {
            let gateway = GatewayClient::from_env();
            gateway.connect().await.context("failed to reach gateway")?;
            let sessions = gateway.list_sessions().await.context("sessions.list failed")?;
            gateway.disconnect();
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            Ok(())
        }
        Command::Send {
            session_key,
            content,
        } => {
            let gateway = GatewayClient::from_env();
            gateway.connect().await.context("failed to reach gateway")?;
            gateway
                .send_message(&session_key, &content)
                .await
                .context("sessions.send failed")?;
            gateway.disconnect();
            println!("sent to {session_key}");
            Ok(())
        }
        Command::Status => {
            let db = open_db(cli.db_path)?;
            let gateway = GatewayClient::from_env();
            let status = mc_server::status::system_status(&gateway, &db)
                .await
                .context("failed to build system status")?;
            gateway.disconnect();
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig, db: Database) -> Result<()> {
    let gateway = GatewayClient::from_env();
    if let Err(e) = gateway.connect().await {
        tracing::warn!(error = %e, "gateway unavailable at startup, will retry on demand");
    }

    let mut handle = mc_server::start(config, db, gateway.clone())
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "mission control ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl+c")?;
            tracing::info!("shutting down");
            handle.shutdown();
        }
        result = handle.wait() => {
            result.context("server task failed")?;
        }
    }
    gateway.disconnect();
    Ok(())
}

fn open_db(path: Option<PathBuf>) -> Result<Database> {
    let path = match path {
        Some(path) => path,
        None => default_db_path(),
    };
    let db = Database::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    tracing::info!(path = %path.display(), "database opened");
    Ok(db)
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".mission-control")
        .join("mission-control.db")
}
