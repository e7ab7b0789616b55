//! Operator control sessions.
//!
//! A [`ControlSession`] is one operator's open control view onto one piece
//! of equipment. It owns the optimistic local state, the authorization
//! gate, the acknowledgement listener, and the reconciliation poller, and
//! it is the only surface the presentation layer talks to. Switching the
//! targeted equipment means dropping the session and opening a new one:
//! drop cancels every background task and resets the elevation scope, so
//! no pending acknowledgements, timers, or tokens bleed across targets.

use crate::ack::{can_acknowledge, can_delete, AckTracker, PendingResolution};
use crate::audit::{AuditEmitter, AuditEvent};
use crate::auth::{AuthGate, CapabilityToken};
use crate::command::{
    CommandId, CommandStatus, CommandValue, ControlCommand, EquipmentScope, OperatorIdentity,
};
use crate::config::SyncConfig;
use crate::dispatch::{BulkOutcome, DispatchOutcome, Dispatcher};
use crate::error::{SyncError, SyncResult};
use crate::ports::{
    AuditStore, Authenticator, CommandLogStore, DocumentMirror, RealtimeChannel,
};
use crate::reconcile::{edit_signal, spawn_reconciler};
use crate::schema::ControlSchema;
use crate::state::{ControlsSnapshot, LocalControls};
use chrono::Duration as ChronoDuration;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

/// External collaborators a session is wired against.
#[derive(Clone)]
pub struct Backends {
    /// Realtime event channel to the equipment gateway.
    pub channel: Arc<dyn RealtimeChannel>,
    /// Append-only command log (the source of truth).
    pub log: Arc<dyn CommandLogStore>,
    /// Best-effort document-store controls cache.
    pub mirror: Arc<dyn DocumentMirror>,
    /// Append-only audit store.
    pub audit: Arc<dyn AuditStore>,
    /// Identity collaborator for elevation.
    pub authenticator: Arc<dyn Authenticator>,
}

/// One operator's control view on one piece of equipment.
pub struct ControlSession {
    scope: EquipmentScope,
    operator: OperatorIdentity,
    config: SyncConfig,
    dispatcher: Dispatcher,
    gate: Arc<Mutex<AuthGate>>,
    controls: Arc<LocalControls>,
    tracker: AckTracker,
    log: Arc<dyn CommandLogStore>,
    authenticator: Arc<dyn Authenticator>,
    audit: AuditEmitter,
    history_rx: watch::Receiver<Vec<ControlCommand>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControlSession {
    /// Open a session: wires the dispatcher and spawns the acknowledgement
    /// listener and reconciliation poller for this equipment scope.
    pub fn open(
        scope: EquipmentScope,
        operator: OperatorIdentity,
        schema: ControlSchema,
        config: SyncConfig,
        backends: Backends,
    ) -> Self {
        let gate = Arc::new(Mutex::new(AuthGate::new()));
        let controls = Arc::new(LocalControls::new());
        let tracker = AckTracker::new();
        let (audit, audit_task) = AuditEmitter::spawn(backends.audit.clone());
        let (edits, edits_rx) = edit_signal();
        let (history_tx, history_rx) = watch::channel(Vec::new());

        let ack_task = tracker.spawn_listener(
            backends.channel.ack_events(),
            backends.log.clone(),
            scope.clone(),
            config.ack_timeout,
        );
        let poll_task = spawn_reconciler(
            config.reconcile.clone(),
            backends.log.clone(),
            scope.clone(),
            controls.clone(),
            history_tx,
            edits_rx,
        );

        let dispatcher = Dispatcher::new(
            scope.clone(),
            operator.clone(),
            schema,
            gate.clone(),
            controls.clone(),
            tracker.clone(),
            backends.channel.clone(),
            backends.log.clone(),
            backends.mirror.clone(),
            audit.clone(),
            edits,
        );

        info!(
            location = %scope.location_id,
            equipment = %scope.equipment_id,
            operator = %operator.id,
            "control session opened"
        );
        Self {
            scope,
            operator,
            config,
            dispatcher,
            gate,
            controls,
            tracker,
            log: backends.log,
            authenticator: backends.authenticator,
            audit,
            history_rx,
            tasks: vec![ack_task, poll_task, audit_task],
        }
    }

    /// Dispatch one command through the full pipeline.
    pub async fn dispatch(&self, command_key: &str, value: CommandValue) -> DispatchOutcome {
        self.dispatcher.dispatch(command_key, value).await
    }

    /// Apply a complete proposed control state (bulk edit).
    pub async fn apply_controls(
        &self,
        proposed: &BTreeMap<String, CommandValue>,
    ) -> SyncResult<BulkOutcome> {
        self.dispatcher.apply_controls(proposed).await
    }

    /// Elevate the session with operator credentials.
    ///
    /// On success a capability token is installed and the parked command,
    /// if any, is replayed exactly once; its outcome is returned. A failed
    /// login discards the parked command and surfaces the error.
    #[instrument(skip(self, password), fields(equipment = %self.scope.equipment_id))]
    pub async fn elevate(
        &self,
        username: &str,
        password: &str,
    ) -> SyncResult<Option<DispatchOutcome>> {
        let identity = match self.authenticator.login(username, password).await {
            Ok(identity) => identity,
            Err(err) => {
                let discarded = self.gate.lock().await.discard_parked();
                if let Some(parked) = discarded {
                    info!(command_key = %parked.command_key, "parked command discarded after failed elevation");
                }
                return Err(err);
            }
        };

        let ttl = ChronoDuration::from_std(self.config.token_ttl)
            .unwrap_or_else(|_| ChronoDuration::minutes(15));
        let parked = {
            let mut gate = self.gate.lock().await;
            gate.install(CapabilityToken::mint(identity, ttl));
            gate.take_parked()
        };

        match parked {
            Some(parked) => {
                let outcome = self
                    .dispatcher
                    .dispatch(&parked.command_key, parked.value)
                    .await;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    /// Operator confirms a command outcome from the history view.
    pub async fn acknowledge(&self, command_id: &CommandId) -> SyncResult<()> {
        let entry = self.find_logged(command_id).await?;
        if !can_acknowledge(entry.status) {
            return Err(SyncError::Dispatch(format!(
                "cannot acknowledge a {:?} command",
                entry.status
            )));
        }
        self.log
            .update_status(
                &self.scope.location_id,
                &self.scope.equipment_id,
                command_id,
                CommandStatus::Acknowledged,
            )
            .await?;
        self.audit.record(AuditEvent::for_command(
            "command_acknowledged",
            &self.operator,
            &self.scope,
            format!("{} acknowledged", entry.details),
            None,
            None,
        ));
        Ok(())
    }

    /// Operator purges a log entry, removing it from every derived view.
    pub async fn delete(&self, command_id: &CommandId) -> SyncResult<()> {
        let entry = self.find_logged(command_id).await?;
        if !can_delete(entry.status) {
            return Err(SyncError::Dispatch("command already deleted".into()));
        }
        self.log
            .update_status(
                &self.scope.location_id,
                &self.scope.equipment_id,
                command_id,
                CommandStatus::Deleted,
            )
            .await?;
        self.audit.record(AuditEvent::for_command(
            "command_deleted",
            &self.operator,
            &self.scope,
            format!("{} deleted from history", entry.details),
            None,
            None,
        ));
        Ok(())
    }

    async fn find_logged(&self, command_id: &CommandId) -> SyncResult<ControlCommand> {
        let entries = self
            .log
            .read_all(&self.scope.location_id, &self.scope.equipment_id)
            .await?;
        entries
            .into_iter()
            .find(|e| &e.command_id == command_id)
            .ok_or_else(|| SyncError::Dispatch(format!("no logged command {command_id}")))
    }

    /// Snapshot of the current (optimistic + reconciled) control values.
    pub fn controls(&self) -> ControlsSnapshot {
        self.controls.snapshot()
    }

    /// Subscribe to control-value changes.
    pub fn subscribe_controls(&self) -> watch::Receiver<ControlsSnapshot> {
        self.controls.subscribe()
    }

    /// The bounded recent-command view maintained by the poller.
    pub fn recent_history(&self) -> Vec<ControlCommand> {
        self.history_rx.borrow().clone()
    }

    /// Ids still awaiting acknowledgement.
    pub async fn pending_commands(&self) -> Vec<CommandId> {
        self.tracker.pending_ids().await
    }

    /// Subscribe to acknowledgement resolutions (for toasts/banners).
    pub fn subscribe_resolutions(&self) -> broadcast::Receiver<(CommandId, PendingResolution)> {
        self.tracker.resolutions()
    }

    /// Whether the session currently holds a live capability token.
    pub async fn is_elevated(&self) -> bool {
        self.gate.lock().await.is_elevated()
    }

    /// The equipment scope this session targets.
    pub fn scope(&self) -> &EquipmentScope {
        &self.scope
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        // Detach all polling timers and acknowledgement subscriptions so
        // nothing bleeds into a session opened on another equipment.
        for task in &self.tasks {
            task.abort();
        }
        info!(equipment = %self.scope.equipment_id, "control session closed");
    }
}
