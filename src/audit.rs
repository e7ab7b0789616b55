//! Fire-and-forget audit emission.
//!
//! Every attempted mutation, success or failure, is recorded for
//! compliance. The emitter never blocks or fails the originating command:
//! events go through an unbounded channel to a background writer task, and
//! a write failure is logged only. At-least-attempted is the contract;
//! exactly-once delivery is not.

use crate::command::{CommandValue, EquipmentScope, OperatorIdentity};
use crate::ports::AuditStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// One audit record. Append-only, never read back by this engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Stable event identifier.
    pub event_id: Uuid,
    /// Action name, e.g. `"control_command"` or `"command_deleted"`.
    pub action: String,
    /// Acting operator's account id.
    pub actor_id: String,
    /// Acting operator's display name.
    pub actor_name: String,
    /// Target location id.
    pub location_id: String,
    /// Target location display name.
    pub location_name: String,
    /// Human-readable description of the mutation.
    pub details: String,
    /// Portal path the mutation was issued from.
    pub path: String,
    /// Optional before/after map for value changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<BTreeMap<String, String>>,
    /// Event timestamp.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event for one command attempt.
    pub fn for_command(
        action: &str,
        operator: &OperatorIdentity,
        scope: &EquipmentScope,
        details: impl Into<String>,
        previous: Option<&CommandValue>,
        issued: Option<&CommandValue>,
    ) -> Self {
        let changes = issued.map(|new_value| {
            let mut map = BTreeMap::new();
            if let Some(prev) = previous {
                map.insert("previous".to_string(), prev.display());
            }
            map.insert("new".to_string(), new_value.display());
            map
        });
        Self {
            event_id: Uuid::new_v4(),
            action: action.to_string(),
            actor_id: operator.id.clone(),
            actor_name: operator.name.clone(),
            location_id: scope.location_id.clone(),
            location_name: scope.location_name.clone(),
            details: details.into(),
            path: format!(
                "/locations/{}/equipment/{}",
                scope.location_id, scope.equipment_id
            ),
            changes,
            recorded_at: Utc::now(),
        }
    }
}

/// Handle for recording audit events from anywhere in the pipeline.
///
/// Cloneable; all clones feed the same background writer.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditEmitter {
    /// Spawn the background writer against the given store.
    ///
    /// The returned task drains the channel until every emitter clone is
    /// dropped, so tests can await it to observe all writes.
    pub fn spawn(store: Arc<dyn AuditStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = store.append(&event).await {
                    warn!(action = %event.action, error = %err, "audit write failed");
                }
            }
            debug!("audit writer drained");
        });
        (Self { tx }, task)
    }

    /// Record one event. Never blocks, never fails the caller.
    pub fn record(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            // Writer already shut down. The mutation itself still stands.
            debug!("audit channel closed; event dropped");
        }
    }
}
