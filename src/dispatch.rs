//! Command dispatch: the write path of the engine.
//!
//! Turning an operator's intent into a durable, acknowledged change runs
//! through a fixed sequence: authorization, command assembly, optimistic
//! local apply, fire-and-forget realtime emit, awaited durable log append,
//! best-effort document mirror write, and audit emission. Only the log
//! append decides the success verdict; emit and mirror failures are
//! absorbed by reconciliation and logging respectively. A failed append
//! rolls the optimistic value back to the prior one.

use crate::ack::AckTracker;
use crate::audit::{AuditEmitter, AuditEvent};
use crate::auth::{AuthDecision, AuthGate};
use crate::command::{CommandValue, ControlCommand, EquipmentScope, OperatorIdentity};
use crate::error::SyncError;
use crate::ports::{CommandLogStore, DocumentMirror, OutboundCommand, RealtimeChannel};
use crate::reconcile::EditSignal;
use crate::schema::{ControlSchema, NormalizedControls};
use crate::state::LocalControls;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tri-state result of a dispatch attempt, rendered by the UI layer as
/// toasts/banners.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Durably appended; acknowledgement pending.
    Dispatched(ControlCommand),
    /// Privileged command without elevation; parked for replay after
    /// re-authentication.
    NeedsAuthorization {
        /// The blocked command key.
        command_key: String,
    },
    /// Rejected or failed; optimistic state already rolled back.
    Failed(SyncError),
}

impl DispatchOutcome {
    /// Whether the command made it into the durable log.
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched(_))
    }
}

/// Result of a bulk "apply complete state" call: per-field outcomes, never
/// all-or-nothing.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    /// Fields that differed from local state and were attempted.
    pub attempted: usize,
    /// Fields durably appended.
    pub applied: usize,
    /// Per-key outcomes in dispatch order.
    pub outcomes: Vec<(String, DispatchOutcome)>,
}

impl BulkOutcome {
    /// Whether every attempted field was applied.
    pub fn fully_applied(&self) -> bool {
        self.applied == self.attempted
    }
}

/// The dispatcher for one operator's equipment-control view.
pub struct Dispatcher {
    scope: EquipmentScope,
    operator: OperatorIdentity,
    schema: ControlSchema,
    gate: Arc<Mutex<AuthGate>>,
    controls: Arc<LocalControls>,
    tracker: AckTracker,
    channel: Arc<dyn RealtimeChannel>,
    log: Arc<dyn CommandLogStore>,
    mirror: Arc<dyn DocumentMirror>,
    audit: AuditEmitter,
    edits: EditSignal,
}

impl Dispatcher {
    /// Wire a dispatcher against its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scope: EquipmentScope,
        operator: OperatorIdentity,
        schema: ControlSchema,
        gate: Arc<Mutex<AuthGate>>,
        controls: Arc<LocalControls>,
        tracker: AckTracker,
        channel: Arc<dyn RealtimeChannel>,
        log: Arc<dyn CommandLogStore>,
        mirror: Arc<dyn DocumentMirror>,
        audit: AuditEmitter,
        edits: EditSignal,
    ) -> Self {
        Self {
            scope,
            operator,
            schema,
            gate,
            controls,
            tracker,
            channel,
            log,
            mirror,
            audit,
            edits,
        }
    }

    /// Dispatch one command.
    ///
    /// Validation here is defense-in-depth: bulk callers validate the full
    /// object first, but a single dispatch must never trust the UI layer to
    /// have done so.
    pub async fn dispatch(&self, command_key: &str, value: CommandValue) -> DispatchOutcome {
        if let Err(err) = self.schema.validate_one(command_key, &value) {
            return DispatchOutcome::Failed(err);
        }

        {
            let mut gate = self.gate.lock().await;
            if gate.authorize(command_key) == AuthDecision::Deny {
                gate.park(command_key, value.clone());
                drop(gate);
                debug!(command_key, "privileged command parked pending re-auth");
                self.audit.record(AuditEvent::for_command(
                    "control_command_denied",
                    &self.operator,
                    &self.scope,
                    format!("{command_key} blocked: elevation required"),
                    None,
                    Some(&value),
                ));
                return DispatchOutcome::NeedsAuthorization {
                    command_key: command_key.to_string(),
                };
            }
        }

        let previous = self.controls.get(command_key);
        let command = ControlCommand::new(
            &self.scope,
            &self.operator,
            command_key,
            value.clone(),
            previous.clone(),
        );

        // Read-your-writes for the issuing operator, independent of
        // network outcome.
        let prior = self
            .controls
            .apply_optimistic(command_key, value.clone(), command.issued_at_ms);
        self.edits.notify();

        // Fire-and-forget toward the gateway; reconciliation masks a lost
        // frame.
        let outbound = OutboundCommand {
            equipment_id: command.equipment_id.clone(),
            command_id: command.command_id.clone(),
            command: command.command_key.clone(),
            value: command.issued_value.clone(),
        };
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            if let Err(err) = channel.emit(outbound).await {
                warn!(error = %err, "realtime emit failed; relying on reconciliation");
            }
        });

        // The step that actually matters for correctness.
        if let Err(err) = self.log.append(&command).await {
            self.controls.rollback(command_key, prior);
            warn!(command_key, error = %err, "durable append failed; optimistic value rolled back");
            self.audit.record(AuditEvent::for_command(
                "control_command_failed",
                &self.operator,
                &self.scope,
                format!("{} (append failed: {err})", command.details),
                previous.as_ref(),
                Some(&value),
            ));
            return DispatchOutcome::Failed(SyncError::Dispatch(err.to_string()));
        }

        // Best-effort compatibility cache; never aborts the operation.
        let mirror = Arc::clone(&self.mirror);
        let equipment_id = command.equipment_id.clone();
        let mirror_key = command.command_key.clone();
        let mirror_value = command.issued_value.clone();
        let last_updated = command.issued_at_ms;
        tokio::spawn(async move {
            if let Err(err) = mirror
                .patch_control(&equipment_id, &mirror_key, &mirror_value, last_updated)
                .await
            {
                warn!(command_key = %mirror_key, error = %err, "controls mirror write failed");
            }
        });

        self.audit.record(AuditEvent::for_command(
            "control_command",
            &self.operator,
            &self.scope,
            command.details.clone(),
            previous.as_ref(),
            Some(&value),
        ));

        self.tracker
            .track(command.command_id.clone(), command_key)
            .await;
        info!(
            command_id = %command.command_id,
            command_key,
            value = %command.issued_value,
            "command dispatched"
        );
        DispatchOutcome::Dispatched(command)
    }

    /// Apply a complete proposed control state.
    ///
    /// Validates the full object, decomposes it into one command per field
    /// that differs from local state, and dispatches each independently.
    /// Partial failure is reported by count, never all-or-nothing.
    pub async fn apply_controls(
        &self,
        proposed: &BTreeMap<String, CommandValue>,
    ) -> Result<BulkOutcome, SyncError> {
        let normalized: NormalizedControls = self.schema.validate(proposed)?;

        let mut outcome = BulkOutcome::default();
        for (key, value) in normalized {
            if self.controls.get(&key).as_ref() == Some(&value) {
                continue;
            }
            outcome.attempted += 1;
            let result = self.dispatch(&key, value).await;
            if result.is_dispatched() {
                outcome.applied += 1;
            }
            outcome.outcomes.push((key, result));
        }
        Ok(outcome)
    }

    /// The equipment scope this dispatcher targets.
    pub fn scope(&self) -> &EquipmentScope {
        &self.scope
    }

    /// The schema the dispatcher validates against.
    pub fn schema(&self) -> &ControlSchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        MemoryAuditStore, MemoryCommandLog, MemoryDocumentMirror, MemoryRealtimeChannel,
    };
    use crate::auth::CapabilityToken;
    use crate::schema::boiler_schema;
    use chrono::Duration as ChronoDuration;

    struct World {
        dispatcher: Dispatcher,
        gate: Arc<Mutex<AuthGate>>,
        controls: Arc<LocalControls>,
        log: Arc<MemoryCommandLog>,
        channel: Arc<MemoryRealtimeChannel>,
        mirror: Arc<MemoryDocumentMirror>,
        audit_store: Arc<MemoryAuditStore>,
    }

    fn world() -> World {
        let gate = Arc::new(Mutex::new(AuthGate::new()));
        let controls = Arc::new(LocalControls::new());
        let log = Arc::new(MemoryCommandLog::new());
        let channel = Arc::new(MemoryRealtimeChannel::new());
        let mirror = Arc::new(MemoryDocumentMirror::new());
        let audit_store = Arc::new(MemoryAuditStore::new());
        let (audit, _task) = AuditEmitter::spawn(audit_store.clone());
        let (edits, _edits_rx) = crate::reconcile::edit_signal();
        let dispatcher = Dispatcher::new(
            EquipmentScope::new("loc-4", "Huntington", "boiler-1"),
            OperatorIdentity::new("u1", "Pat"),
            boiler_schema(),
            gate.clone(),
            controls.clone(),
            AckTracker::new(),
            channel.clone(),
            log.clone(),
            mirror.clone(),
            audit,
            edits,
        );
        World {
            dispatcher,
            gate,
            controls,
            log,
            channel,
            mirror,
            audit_store,
        }
    }

    #[tokio::test]
    async fn setpoint_dispatch_appends_exactly_one_entry() {
        let w = world();
        let outcome = w
            .dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(182.0))
            .await;
        assert!(outcome.is_dispatched());

        let entries = w.log.read_all("loc-4", "boiler-1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].command_key, "waterTempSetpoint");
        assert_eq!(
            w.controls.get("waterTempSetpoint"),
            Some(CommandValue::Number(182.0))
        );
    }

    #[tokio::test]
    async fn privileged_without_elevation_is_denied_and_log_unchanged() {
        let w = world();
        let outcome = w
            .dispatcher
            .dispatch("unitEnable", CommandValue::Bool(true))
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::NeedsAuthorization { ref command_key } if command_key == "unitEnable"
        ));
        assert!(w.log.read_all("loc-4", "boiler-1").await.unwrap().is_empty());
        assert!(w.gate.lock().await.take_parked().is_some());
    }

    #[tokio::test]
    async fn privileged_with_token_dispatches() {
        let w = world();
        w.gate.lock().await.install(CapabilityToken::mint(
            OperatorIdentity::new("u1", "Pat"),
            ChronoDuration::minutes(15),
        ));
        let outcome = w
            .dispatcher
            .dispatch("unitEnable", CommandValue::Bool(true))
            .await;
        assert!(outcome.is_dispatched());
        assert_eq!(w.log.read_all("loc-4", "boiler-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_append_rolls_back_optimistic_state() {
        let w = world();
        w.dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(180.0))
            .await;
        w.log.fail_next_appends(true);

        let outcome = w
            .dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(185.0))
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed(SyncError::Dispatch(_))));
        assert_eq!(
            w.controls.get("waterTempSetpoint"),
            Some(CommandValue::Number(180.0))
        );
        assert_eq!(w.log.read_all("loc-4", "boiler-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_writes_nothing() {
        let w = world();
        let outcome = w
            .dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(500.0))
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(SyncError::Validation { .. })
        ));
        assert!(w.log.read_all("loc-4", "boiler-1").await.unwrap().is_empty());
        assert_eq!(w.controls.get("waterTempSetpoint"), None);
    }

    #[tokio::test]
    async fn mirror_failure_never_fails_the_dispatch() {
        let w = world();
        w.mirror.fail_writes(true);
        let outcome = w
            .dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(182.0))
            .await;
        assert!(outcome.is_dispatched());
        assert_eq!(w.log.read_all("loc-4", "boiler-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn realtime_frame_carries_the_command() {
        let w = world();
        let outcome = w
            .dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(182.0))
            .await;
        let DispatchOutcome::Dispatched(cmd) = outcome else {
            panic!("expected dispatch");
        };
        // Emit runs on a spawned task.
        tokio::task::yield_now().await;
        let frames = w.channel.emitted().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command_id, cmd.command_id);
        assert_eq!(frames[0].value, CommandValue::Number(182.0));
    }

    #[tokio::test]
    async fn bulk_apply_skips_unchanged_fields_and_reports_counts() {
        let w = world();
        w.gate.lock().await.install(CapabilityToken::mint(
            OperatorIdentity::new("u1", "Pat"),
            ChronoDuration::minutes(15),
        ));
        w.dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(182.0))
            .await;

        let mut proposed = BTreeMap::new();
        proposed.insert(
            "waterTempSetpoint".to_string(),
            CommandValue::Number(182.0), // unchanged
        );
        proposed.insert("firingRate".to_string(), CommandValue::Number(45.0));
        proposed.insert("unitEnable".to_string(), CommandValue::Bool(true));

        let outcome = w.dispatcher.apply_controls(&proposed).await.unwrap();
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.applied, 2);
        assert!(outcome.fully_applied());
        // One prior entry plus the two changed fields.
        assert_eq!(w.log.read_all("loc-4", "boiler-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn bulk_apply_reports_partial_failure_by_count() {
        let w = world();
        let mut proposed = BTreeMap::new();
        proposed.insert(
            "waterTempSetpoint".to_string(),
            CommandValue::Number(182.0),
        );
        // Privileged without elevation: attempted but not applied.
        proposed.insert("firingRate".to_string(), CommandValue::Number(45.0));

        let outcome = w.dispatcher.apply_controls(&proposed).await.unwrap();
        // unitEnable default-true is also injected by the schema and is
        // privileged, so it counts as attempted too.
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.applied, 1);
        assert!(!outcome.fully_applied());
    }

    #[tokio::test]
    async fn every_attempt_is_audited() {
        let w = world();
        w.dispatcher
            .dispatch("waterTempSetpoint", CommandValue::Number(182.0))
            .await;
        w.dispatcher
            .dispatch("unitEnable", CommandValue::Bool(false))
            .await;

        // Drain the audit channel by yielding to the writer task.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let events = w.audit_store.events().await;
        let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"control_command"));
        assert!(actions.contains(&"control_command_denied"));
    }
}
