//! In-process implementations of the port traits.
//!
//! These stand in for the durable stores and the realtime transport in
//! tests and the demo binary. Each adapter records what it was asked to do
//! and exposes simple failure injection, so the pipeline's failure
//! semantics can be exercised without real backends.

use crate::audit::AuditEvent;
use crate::command::{CommandId, CommandStatus, CommandValue, ControlCommand, OperatorIdentity};
use crate::error::{SyncError, SyncResult};
use crate::ports::{
    AckEvent, AuditStore, Authenticator, CommandLogStore, DocumentMirror, OutboundCommand,
    RealtimeChannel,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, RwLock};

// =============================================================================
// Realtime channel
// =============================================================================

/// Loopback realtime channel: records outbound frames and lets tests play
/// the equipment gateway by injecting acknowledgement events.
pub struct MemoryRealtimeChannel {
    emitted: RwLock<Vec<OutboundCommand>>,
    acks: broadcast::Sender<AckEvent>,
    fail_emits: AtomicBool,
}

impl Default for MemoryRealtimeChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRealtimeChannel {
    /// New channel with no subscribers.
    pub fn new() -> Self {
        let (acks, _) = broadcast::channel(64);
        Self {
            emitted: RwLock::new(Vec::new()),
            acks,
            fail_emits: AtomicBool::new(false),
        }
    }

    /// Make subsequent emits fail (transport outage).
    pub fn fail_emits(&self, fail: bool) {
        self.fail_emits.store(fail, Ordering::SeqCst);
    }

    /// Frames emitted so far.
    pub async fn emitted(&self) -> Vec<OutboundCommand> {
        self.emitted.read().await.clone()
    }

    /// Gateway confirms execution of a command.
    pub fn complete(&self, command_id: CommandId) {
        let _ = self.acks.send(AckEvent::Completed { command_id });
    }

    /// Gateway reports a command failure.
    pub fn fail(&self, command_id: CommandId, error: &str) {
        let _ = self.acks.send(AckEvent::Failed {
            command_id,
            error: error.to_string(),
        });
    }
}

#[async_trait]
impl RealtimeChannel for MemoryRealtimeChannel {
    async fn emit(&self, outbound: OutboundCommand) -> SyncResult<()> {
        if self.fail_emits.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("emit refused".into()));
        }
        self.emitted.write().await.push(outbound);
        Ok(())
    }

    fn ack_events(&self) -> broadcast::Receiver<AckEvent> {
        self.acks.subscribe()
    }
}

// =============================================================================
// Command log store
// =============================================================================

/// Append-only in-memory command log, partitioned by (location, equipment).
pub struct MemoryCommandLog {
    entries: RwLock<Vec<ControlCommand>>,
    fail_appends: AtomicBool,
    reads: AtomicUsize,
}

impl Default for MemoryCommandLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCommandLog {
    /// Empty log.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            fail_appends: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    /// Make subsequent appends fail (store outage).
    pub fn fail_next_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of `read_all` calls served; lets tests assert on read
    /// amplification.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandLogStore for MemoryCommandLog {
    async fn append(&self, command: &ControlCommand) -> SyncResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(SyncError::Dispatch("append refused".into()));
        }
        self.entries.write().await.push(command.clone());
        Ok(())
    }

    async fn read_all(
        &self,
        location_id: &str,
        equipment_id: &str,
    ) -> SyncResult<Vec<ControlCommand>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.location_id == location_id && e.equipment_id == equipment_id)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        location_id: &str,
        equipment_id: &str,
        command_id: &CommandId,
        status: CommandStatus,
    ) -> SyncResult<()> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| {
            e.location_id == location_id
                && e.equipment_id == equipment_id
                && &e.command_id == command_id
        }) {
            Some(entry) => {
                entry.status = status;
                Ok(())
            }
            None => Err(SyncError::Dispatch(format!(
                "no logged command {command_id}"
            ))),
        }
    }
}

// =============================================================================
// Document mirror
// =============================================================================

/// Mirror document for one equipment id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MirrorDocument {
    /// Cached controls map.
    pub controls: BTreeMap<String, CommandValue>,
    /// Millisecond timestamp of the last patch.
    pub last_updated_ms: i64,
}

/// In-memory document-store cache of current controls.
pub struct MemoryDocumentMirror {
    documents: RwLock<HashMap<String, MirrorDocument>>,
    fail_writes: AtomicBool,
}

impl Default for MemoryDocumentMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentMirror {
    /// Empty mirror.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent patches fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current document for one equipment id.
    pub async fn document(&self, equipment_id: &str) -> Option<MirrorDocument> {
        self.documents.read().await.get(equipment_id).cloned()
    }
}

#[async_trait]
impl DocumentMirror for MemoryDocumentMirror {
    async fn patch_control(
        &self,
        equipment_id: &str,
        command_key: &str,
        value: &CommandValue,
        last_updated_ms: i64,
    ) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::MirrorWrite("document locked".into()));
        }
        let mut documents = self.documents.write().await;
        let doc = documents.entry(equipment_id.to_string()).or_default();
        doc.controls
            .insert(command_key.to_string(), value.clone());
        doc.last_updated_ms = doc.last_updated_ms.max(last_updated_ms);
        Ok(())
    }
}

// =============================================================================
// Audit store
// =============================================================================

/// In-memory append-only audit store.
pub struct MemoryAuditStore {
    events: RwLock<Vec<AuditEvent>>,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    /// Events appended so far, in order.
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, event: &AuditEvent) -> SyncResult<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Authenticator
// =============================================================================

/// Credential table authenticator for tests and the demo binary.
pub struct StaticAuthenticator {
    accounts: HashMap<String, (String, OperatorIdentity)>,
}

impl Default for StaticAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticAuthenticator {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    /// Register one account.
    pub fn with_account(
        mut self,
        username: &str,
        password: &str,
        identity: OperatorIdentity,
    ) -> Self {
        self.accounts
            .insert(username.to_string(), (password.to_string(), identity));
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn login(&self, username: &str, password: &str) -> SyncResult<OperatorIdentity> {
        match self.accounts.get(username) {
            Some((expected, identity)) if expected == password => Ok(identity.clone()),
            _ => Err(SyncError::Authentication("invalid credentials".into())),
        }
    }
}
