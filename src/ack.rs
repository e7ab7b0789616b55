//! Acknowledgement tracking for in-flight commands.
//!
//! Every dispatched command enters the process-local pending set and leaves
//! it when the realtime channel delivers a `command_complete` or
//! `command_failed` event, or when the bounded wait elapses. Realtime
//! resolutions also update the durable `status` of the log entry; a timeout
//! only clears the ephemeral set and never rewrites durable history. The
//! pending set is a UI/operational concern, not a correctness source, and
//! it is rebuilt empty on process restart.

use crate::command::{CommandId, CommandStatus, EquipmentScope};
use crate::ports::{AckEvent, CommandLogStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a pending command left the set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingResolution {
    /// Gateway confirmed execution.
    Completed,
    /// Gateway reported an error.
    Failed(String),
    /// No event within the bounded wait. Treated as failed for UI
    /// purposes; durable status is untouched.
    TimedOut,
}

#[derive(Clone, Debug)]
struct PendingEntry {
    command_key: String,
    tracked_at: Instant,
}

/// Shared pending-command table keyed by command id.
#[derive(Clone)]
pub struct AckTracker {
    pending: Arc<RwLock<HashMap<CommandId, PendingEntry>>>,
    resolutions: broadcast::Sender<(CommandId, PendingResolution)>,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AckTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        let (resolutions, _) = broadcast::channel(64);
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            resolutions,
        }
    }

    /// Register a freshly dispatched command.
    pub async fn track(&self, command_id: CommandId, command_key: &str) {
        let mut pending = self.pending.write().await;
        pending.insert(
            command_id,
            PendingEntry {
                command_key: command_key.to_string(),
                tracked_at: Instant::now(),
            },
        );
    }

    /// Ids currently awaiting acknowledgement.
    pub async fn pending_ids(&self) -> Vec<CommandId> {
        self.pending.read().await.keys().cloned().collect()
    }

    /// Whether anything is still pending.
    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }

    /// Subscribe to resolution notifications (for banners/toasts).
    pub fn resolutions(&self) -> broadcast::Receiver<(CommandId, PendingResolution)> {
        self.resolutions.subscribe()
    }

    /// Spawn the event loop: consumes acknowledgement events, updates
    /// durable status for real resolutions, and sweeps timed-out entries
    /// out of the ephemeral set.
    pub fn spawn_listener(
        &self,
        mut ack_rx: broadcast::Receiver<AckEvent>,
        log: Arc<dyn CommandLogStore>,
        scope: EquipmentScope,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let sweep_period = timeout.checked_div(4).unwrap_or(timeout).max(Duration::from_millis(250));
            let mut sweep = tokio::time::interval(sweep_period);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    event = ack_rx.recv() => match event {
                        Ok(event) => tracker.handle_event(&event, log.as_ref(), &scope).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Missed events are exactly what reconciliation
                            // exists to absorb.
                            warn!(skipped, "acknowledgement stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => tracker.sweep_timeouts(timeout).await,
                }
            }
            debug!("acknowledgement listener stopped");
        })
    }

    async fn handle_event(
        &self,
        event: &AckEvent,
        log: &dyn CommandLogStore,
        scope: &EquipmentScope,
    ) {
        let removed = {
            let mut pending = self.pending.write().await;
            pending.remove(event.command_id())
        };
        let Some(entry) = removed else {
            // Ack for a command another session issued, or one we already
            // swept. Nothing to resolve locally.
            return;
        };

        let (status, resolution) = match event {
            AckEvent::Completed { .. } => (CommandStatus::Completed, PendingResolution::Completed),
            AckEvent::Failed { error, .. } => (
                CommandStatus::Failed,
                PendingResolution::Failed(error.clone()),
            ),
        };

        if let Err(err) = log
            .update_status(
                &scope.location_id,
                &scope.equipment_id,
                event.command_id(),
                status,
            )
            .await
        {
            warn!(
                command_id = %event.command_id(),
                command_key = %entry.command_key,
                error = %err,
                "failed to persist acknowledgement status"
            );
        }
        let _ = self
            .resolutions
            .send((event.command_id().clone(), resolution));
    }

    async fn sweep_timeouts(&self, timeout: Duration) {
        let now = Instant::now();
        let expired: Vec<CommandId> = {
            let pending = self.pending.read().await;
            pending
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.tracked_at) >= timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        let mut pending = self.pending.write().await;
        for id in expired {
            if let Some(entry) = pending.remove(&id) {
                warn!(
                    command_id = %id,
                    command_key = %entry.command_key,
                    "no acknowledgement within bounded wait; leaving durable status untouched"
                );
                let _ = self.resolutions.send((id, PendingResolution::TimedOut));
            }
        }
    }
}

/// Manual transition check: operators may acknowledge commands they have
/// seen complete, or ones still pending.
pub fn can_acknowledge(status: CommandStatus) -> bool {
    matches!(status, CommandStatus::Completed | CommandStatus::Pending)
}

/// Manual transition check: any entry may be purged from the log view.
pub fn can_delete(status: CommandStatus) -> bool {
    status != CommandStatus::Deleted
}
