//! Command Path Integration Test
//!
//! Verifies end-to-end command dispatch through a live session:
//! - `ControlSession::dispatch` for setpoint commands
//! - Optimistic local update visible before acknowledgement
//! - Durable append, realtime emit, and mirror patch side effects
//! - Acknowledgement events resolving durable status

use anyhow::Result;
use nexus_sync::adapters::memory::{
    MemoryAuditStore, MemoryCommandLog, MemoryDocumentMirror, MemoryRealtimeChannel,
    StaticAuthenticator,
};
use nexus_sync::ports::CommandLogStore;
use nexus_sync::schema::boiler_schema;
use nexus_sync::{
    Backends, CommandStatus, CommandValue, ControlSession, DispatchOutcome, EquipmentScope,
    OperatorIdentity, SyncConfig,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    session: ControlSession,
    channel: Arc<MemoryRealtimeChannel>,
    log: Arc<MemoryCommandLog>,
    mirror: Arc<MemoryDocumentMirror>,
    audit: Arc<MemoryAuditStore>,
}

fn harness() -> Harness {
    let channel = Arc::new(MemoryRealtimeChannel::new());
    let log = Arc::new(MemoryCommandLog::new());
    let mirror = Arc::new(MemoryDocumentMirror::new());
    let audit = Arc::new(MemoryAuditStore::new());
    let backends = Backends {
        channel: channel.clone(),
        log: log.clone(),
        mirror: mirror.clone(),
        audit: audit.clone(),
        authenticator: Arc::new(StaticAuthenticator::new().with_account(
            "pat",
            "hunter2",
            OperatorIdentity::new("u1", "Pat"),
        )),
    };
    let session = ControlSession::open(
        EquipmentScope::new("loc-4", "Huntington", "boiler-1"),
        OperatorIdentity::new("u1", "Pat"),
        boiler_schema(),
        SyncConfig::default(),
        backends,
    );
    Harness {
        session,
        channel,
        log,
        mirror,
        audit,
    }
}

#[tokio::test]
async fn setpoint_dispatch_reaches_every_backend() -> Result<()> {
    let h = harness();

    // 1. Dispatch a setpoint change.
    let outcome = h
        .session
        .dispatch("waterTempSetpoint", CommandValue::Number(182.0))
        .await;
    let DispatchOutcome::Dispatched(cmd) = outcome else {
        panic!("expected dispatch, got {outcome:?}");
    };

    // 2. Optimistic value is visible immediately.
    assert_eq!(
        h.session.controls().get("waterTempSetpoint").map(|lv| lv.value.clone()),
        Some(CommandValue::Number(182.0))
    );

    // 3. Durable log holds exactly one pending entry.
    let entries = h.log.read_all("loc-4", "boiler-1").await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, CommandStatus::Pending);
    assert_eq!(entries[0].command_key, "waterTempSetpoint");

    // 4. The realtime frame and mirror patch land (both are spawned).
    tokio::time::sleep(Duration::from_millis(50)).await;
    let emitted = h.channel.emitted().await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].command_id, cmd.command_id);
    let doc = h.mirror.document("boiler-1").await.expect("mirror doc");
    assert_eq!(
        doc.controls.get("waterTempSetpoint"),
        Some(&CommandValue::Number(182.0))
    );

    // 5. An audit event was recorded for the attempt.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = h.audit.events().await;
    assert!(events.iter().any(|e| e.action == "control_command"));
    Ok(())
}

#[tokio::test]
async fn acknowledgement_completes_the_durable_entry() -> Result<()> {
    let h = harness();
    let mut resolutions = h.session.subscribe_resolutions();

    let outcome = h
        .session
        .dispatch("waterTempSetpoint", CommandValue::Number(175.0))
        .await;
    let DispatchOutcome::Dispatched(cmd) = outcome else {
        panic!("expected dispatch");
    };
    assert_eq!(h.session.pending_commands().await, vec![cmd.command_id.clone()]);

    // Gateway confirms execution.
    h.channel.complete(cmd.command_id.clone());

    let (resolved_id, _) = tokio::time::timeout(Duration::from_secs(1), resolutions.recv())
        .await
        .expect("resolution within deadline")?;
    assert_eq!(resolved_id, cmd.command_id);
    assert!(h.session.pending_commands().await.is_empty());

    let entries = h.log.read_all("loc-4", "boiler-1").await?;
    assert_eq!(entries[0].status, CommandStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn gateway_failure_marks_the_entry_failed_but_keeps_it() -> Result<()> {
    let h = harness();
    let mut resolutions = h.session.subscribe_resolutions();

    let outcome = h
        .session
        .dispatch("waterTempSetpoint", CommandValue::Number(210.0))
        .await;
    let DispatchOutcome::Dispatched(cmd) = outcome else {
        panic!("expected dispatch");
    };

    h.channel.fail(cmd.command_id.clone(), "valve jammed");
    tokio::time::timeout(Duration::from_secs(1), resolutions.recv())
        .await
        .expect("resolution within deadline")?;

    // The failed command stays in the log as history.
    let entries = h.log.read_all("loc-4", "boiler-1").await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, CommandStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn out_of_range_value_is_rejected_before_any_side_effect() -> Result<()> {
    let h = harness();

    // Boiler schema caps waterTempSetpoint at 220.
    let outcome = h
        .session
        .dispatch("waterTempSetpoint", CommandValue::Number(400.0))
        .await;
    assert!(matches!(outcome, DispatchOutcome::Failed(_)));

    assert!(h.log.read_all("loc-4", "boiler-1").await?.is_empty());
    assert!(h.channel.emitted().await.is_empty());
    assert!(h.session.controls().get("waterTempSetpoint").is_none());
    Ok(())
}
