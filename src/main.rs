//! CLI entry point for nexus-sync.
//!
//! Runs the synchronization engine against in-memory backends so the full
//! command path can be exercised without a live equipment gateway:
//! optimistic apply, realtime emit, durable append, acknowledgement, and
//! reconciliation.
//!
//! # Usage
//!
//! Run the demo session:
//! ```bash
//! nexus-sync demo
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! nexus-sync check-config --config nexus-sync.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use nexus_sync::adapters::memory::{
    MemoryAuditStore, MemoryCommandLog, MemoryDocumentMirror, MemoryRealtimeChannel,
    StaticAuthenticator,
};
use nexus_sync::ports::CommandLogStore;
use nexus_sync::schema::boiler_schema;
use nexus_sync::{
    Backends, CommandValue, ControlSession, DispatchOutcome, EquipmentScope, OperatorIdentity,
    SyncConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "nexus-sync")]
#[command(about = "Equipment control command synchronization engine", long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "nexus-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted operator session against in-memory backends.
    Demo,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SyncConfig::load_from(&cli.config)?;
    nexus_sync::telemetry::init_from_config(&config)?;

    match cli.command {
        Commands::Demo => run_demo(config).await,
        Commands::CheckConfig => {
            println!("configuration ok: {}", cli.config.display());
            Ok(())
        }
    }
}

async fn run_demo(config: SyncConfig) -> Result<()> {
    let channel = Arc::new(MemoryRealtimeChannel::new());
    let log = Arc::new(MemoryCommandLog::new());
    let mirror = Arc::new(MemoryDocumentMirror::new());
    let audit = Arc::new(MemoryAuditStore::new());
    let backends = Backends {
        channel: channel.clone(),
        log: log.clone(),
        mirror,
        audit: audit.clone(),
        authenticator: Arc::new(StaticAuthenticator::new().with_account(
            "operator",
            "operator",
            OperatorIdentity::new("demo-op", "Demo Operator"),
        )),
    };

    let scope = EquipmentScope::new("loc-4", "Huntington", "boiler-1");
    let session = ControlSession::open(
        scope,
        OperatorIdentity::new("demo-op", "Demo Operator"),
        boiler_schema(),
        config,
        backends,
    );

    println!("== setpoint command ==");
    let outcome = session
        .dispatch("waterTempSetpoint", CommandValue::Number(182.0))
        .await;
    match &outcome {
        DispatchOutcome::Dispatched(cmd) => {
            println!("dispatched: {} ({})", cmd.details, cmd.command_id);
            // Play the equipment gateway: confirm execution.
            channel.complete(cmd.command_id.clone());
        }
        other => println!("unexpected outcome: {other:?}"),
    }

    println!("\n== privileged command without elevation ==");
    let outcome = session.dispatch("unitEnable", CommandValue::Bool(false)).await;
    println!("outcome: {outcome:?}");

    println!("\n== elevate and replay ==");
    let replayed = session.elevate("operator", "operator").await?;
    println!("replayed: {replayed:?}");

    // Give the spawned emit/ack tasks a moment to settle.
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n== durable log ==");
    for entry in log.read_all("loc-4", "boiler-1").await? {
        println!(
            "{} {} -> {} [{:?}]",
            entry.command_id, entry.command_key, entry.issued_value, entry.status
        );
    }

    println!("\n== current controls ==");
    for (key, local) in session.controls() {
        println!("{key} = {}", local.value);
    }

    println!("\n== audit trail ==");
    for event in audit.events().await {
        println!("{} {}: {}", event.recorded_at, event.action, event.details);
    }

    Ok(())
}
