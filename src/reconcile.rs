//! Reconciliation polling: the pull half of the dual-path design.
//!
//! Realtime events can be dropped, so a periodic fetch rereads the
//! authoritative command log, derives current state, and merges it into
//! local state through the same idempotent apply function the push path
//! ends at. Rapid local edits (slider drags) are debounced behind a quiet
//! period so interactive controls do not amplify into a read storm.
//!
//! Responses are applied in completion order, not issue order. With the
//! timestamp-guarded merge in [`LocalControls::apply_authoritative`] a late
//! stale response degrades to a no-op, which is the accepted
//! eventual-consistency tradeoff here rather than strict ordering.

use crate::command::{ControlCommand, EquipmentScope};
use crate::history::{derive_state, recent_history};
use crate::ports::CommandLogStore;
use crate::state::LocalControls;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior, Sleep};
use tracing::{debug, warn};

/// Poller tunables; see [`crate::config::SyncConfig`] for the loaded form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Interval between authoritative value refreshes.
    #[serde(with = "humantime_serde")]
    pub value_refresh: Duration,
    /// Interval between recent-history refreshes.
    #[serde(with = "humantime_serde")]
    pub history_refresh: Duration,
    /// Quiet period after a local edit before an out-of-band fetch.
    #[serde(with = "humantime_serde")]
    pub edit_debounce: Duration,
    /// Bound for the recent-history view.
    pub history_limit: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            value_refresh: Duration::from_secs(10),
            history_refresh: Duration::from_secs(30),
            edit_debounce: Duration::from_millis(500),
            history_limit: 50,
        }
    }
}

/// Notifies the poller that a local edit happened (debounced fetch).
#[derive(Clone)]
pub struct EditSignal {
    tx: mpsc::UnboundedSender<()>,
}

impl EditSignal {
    /// Signal one local edit. Never blocks; a closed poller is ignored.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }
}

/// Create the edit-signal pair: the sender goes to the dispatcher, the
/// receiver to [`spawn_reconciler`].
pub fn edit_signal() -> (EditSignal, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EditSignal { tx }, rx)
}

/// Spawn the reconciliation poller for one equipment view.
///
/// Runs until the edit channel closes (session drop) or the task is
/// aborted. The first value/history fetch happens immediately, which doubles
/// as the initial load of the view.
pub fn spawn_reconciler(
    settings: ReconcileSettings,
    log: Arc<dyn CommandLogStore>,
    scope: EquipmentScope,
    controls: Arc<LocalControls>,
    history_tx: watch::Sender<Vec<ControlCommand>>,
    mut edits_rx: mpsc::UnboundedReceiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut value_tick = interval(settings.value_refresh);
        value_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut history_tick = interval(settings.history_refresh);
        history_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Resettable quiet-period timer, armed only after a local edit.
        let mut debounce: Pin<Box<Sleep>> = Box::pin(sleep(settings.edit_debounce));
        let mut debounce_armed = false;

        loop {
            tokio::select! {
                _ = value_tick.tick() => {
                    refresh_values(log.as_ref(), &scope, &controls).await;
                }
                _ = history_tick.tick() => {
                    refresh_history(log.as_ref(), &scope, &history_tx, settings.history_limit).await;
                }
                received = edits_rx.recv() => match received {
                    // Restart the quiet period; a drag burst collapses into
                    // one fetch.
                    Some(()) => {
                        debounce
                            .as_mut()
                            .reset(tokio::time::Instant::now() + settings.edit_debounce);
                        debounce_armed = true;
                    }
                    None => break,
                },
                () = &mut debounce, if debounce_armed => {
                    debounce_armed = false;
                    refresh_values(log.as_ref(), &scope, &controls).await;
                }
            }
        }
        debug!("reconciliation poller stopped");
    })
}

async fn refresh_values(log: &dyn CommandLogStore, scope: &EquipmentScope, controls: &LocalControls) {
    match log.read_all(&scope.location_id, &scope.equipment_id).await {
        Ok(entries) => {
            let derived = derive_state(&entries);
            controls.apply_authoritative(&derived);
        }
        Err(err) => warn!(error = %err, "value reconciliation fetch failed"),
    }
}

async fn refresh_history(
    log: &dyn CommandLogStore,
    scope: &EquipmentScope,
    history_tx: &watch::Sender<Vec<ControlCommand>>,
    limit: usize,
) {
    match log.read_all(&scope.location_id, &scope.equipment_id).await {
        Ok(entries) => {
            let _ = history_tx.send(recent_history(&entries, limit));
        }
        Err(err) => warn!(error = %err, "history reconciliation fetch failed"),
    }
}
