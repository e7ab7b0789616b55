//! Trait seams for the engine's external collaborators.
//!
//! The durable stores and the realtime transport are given capabilities,
//! not part of this engine. Each one is modeled as an async trait so the
//! pipeline can be wired against production backends or the in-process
//! adapters in [`crate::adapters::memory`].

use crate::audit::AuditEvent;
use crate::command::{CommandId, CommandStatus, CommandValue, ControlCommand, OperatorIdentity};
use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// =============================================================================
// Realtime channel
// =============================================================================

/// Outbound realtime frame carrying one command to the equipment gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundCommand {
    /// Target equipment.
    pub equipment_id: String,
    /// Correlation id for acknowledgement events.
    pub command_id: CommandId,
    /// Semantic control name.
    pub command: String,
    /// The value to apply.
    pub value: CommandValue,
}

/// Inbound acknowledgement event, correlated by command id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AckEvent {
    /// Gateway executed the command (`command_complete`).
    Completed {
        /// Correlated command.
        command_id: CommandId,
    },
    /// Gateway rejected or failed the command (`command_failed`).
    Failed {
        /// Correlated command.
        command_id: CommandId,
        /// Gateway-reported reason.
        error: String,
    },
}

impl AckEvent {
    /// The command this event correlates to.
    pub fn command_id(&self) -> &CommandId {
        match self {
            AckEvent::Completed { command_id } | AckEvent::Failed { command_id, .. } => command_id,
        }
    }
}

/// Bidirectional realtime event channel to the equipment gateway.
///
/// Emission is best-effort: a failed emit is a transport error that the
/// reconciliation poller eventually masks, never a dispatch failure.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Emit one command frame toward the gateway.
    async fn emit(&self, outbound: OutboundCommand) -> SyncResult<()>;

    /// Subscribe to inbound acknowledgement events.
    fn ack_events(&self) -> broadcast::Receiver<AckEvent>;
}

// =============================================================================
// Command log store
// =============================================================================

/// Append-only, timestamped command log keyed by (location, equipment).
///
/// The single source of truth for "current settings". Entries are immutable
/// except for `status`. Readers must treat the result of [`read_all`] as a
/// growing, unordered-by-delivery collection and re-sort by timestamp
/// before deriving state.
///
/// [`read_all`]: CommandLogStore::read_all
#[async_trait]
pub trait CommandLogStore: Send + Sync {
    /// Durably append one command. This is the step that decides the
    /// success verdict of a dispatch.
    async fn append(&self, command: &ControlCommand) -> SyncResult<()>;

    /// Read every entry for one equipment partition.
    async fn read_all(
        &self,
        location_id: &str,
        equipment_id: &str,
    ) -> SyncResult<Vec<ControlCommand>>;

    /// Update the status of one logged command.
    async fn update_status(
        &self,
        location_id: &str,
        equipment_id: &str,
        command_id: &CommandId,
        status: CommandStatus,
    ) -> SyncResult<()>;
}

// =============================================================================
// Document mirror
// =============================================================================

/// Best-effort document-store cache of "current controls", keyed by
/// equipment id. Never authoritative; compatibility reads only.
#[async_trait]
pub trait DocumentMirror: Send + Sync {
    /// Partial-field update of the `controls` map plus the `lastUpdated`
    /// timestamp. A failure here is logged, never surfaced.
    async fn patch_control(
        &self,
        equipment_id: &str,
        command_key: &str,
        value: &CommandValue,
        last_updated_ms: i64,
    ) -> SyncResult<()>;
}

// =============================================================================
// Audit store
// =============================================================================

/// Append-only audit store; write-only from this engine's perspective.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one audit event.
    async fn append(&self, event: &AuditEvent) -> SyncResult<()>;
}

// =============================================================================
// Authenticator
// =============================================================================

/// Identity/session collaborator, consumed only to mint capability tokens.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify credentials; the returned identity elevates the session.
    async fn login(&self, username: &str, password: &str) -> SyncResult<OperatorIdentity>;
}
