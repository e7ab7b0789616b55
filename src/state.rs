//! Optimistic local control state for one operator's equipment view.
//!
//! Two producers feed this state and nothing else mutates it directly:
//! the dispatcher applies optimistic writes (read-your-writes for the
//! issuing operator), and the reconciliation poller merges authoritative
//! derived state. The authoritative merge is idempotent, so responses
//! arriving in completion order rather than issue order degrade to no-ops
//! instead of racing the push path.
//!
//! Observers subscribe through a watch channel, the same pattern the rest
//! of the pipeline uses for value fan-out.

use crate::command::CommandValue;
use crate::history::DerivedControlState;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// One locally-held control value with the timestamp that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalValue {
    /// The value as the view currently shows it.
    pub value: CommandValue,
    /// Millisecond timestamp of the command that produced it.
    pub issued_at_ms: i64,
    /// True while the value is an optimistic local write the log has not
    /// confirmed back yet.
    pub optimistic: bool,
}

/// Snapshot of every locally-known control value.
pub type ControlsSnapshot = BTreeMap<String, LocalValue>;

/// Shared optimistic state, observable via watch channel.
#[derive(Debug)]
pub struct LocalControls {
    tx: watch::Sender<ControlsSnapshot>,
}

impl Default for LocalControls {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalControls {
    /// Empty state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControlsSnapshot::new());
        Self { tx }
    }

    /// Subscribe for change notifications (UI widgets, tests).
    pub fn subscribe(&self) -> watch::Receiver<ControlsSnapshot> {
        self.tx.subscribe()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ControlsSnapshot {
        self.tx.borrow().clone()
    }

    /// Current value for one key.
    pub fn get(&self, key: &str) -> Option<CommandValue> {
        self.tx.borrow().get(key).map(|lv| lv.value.clone())
    }

    /// Optimistic write from the dispatcher. Returns the prior entry so a
    /// failed durable append can roll it back.
    pub fn apply_optimistic(
        &self,
        key: &str,
        value: CommandValue,
        issued_at_ms: i64,
    ) -> Option<LocalValue> {
        let mut prior = None;
        self.tx.send_modify(|snapshot| {
            prior = snapshot.insert(
                key.to_string(),
                LocalValue {
                    value,
                    issued_at_ms,
                    optimistic: true,
                },
            );
        });
        prior
    }

    /// Undo an optimistic write after a dispatch failure, restoring the
    /// prior entry (or removing the key if there was none).
    pub fn rollback(&self, key: &str, prior: Option<LocalValue>) {
        self.tx.send_modify(|snapshot| {
            match prior {
                Some(value) => {
                    snapshot.insert(key.to_string(), value);
                }
                None => {
                    snapshot.remove(key);
                }
            };
        });
    }

    /// Merge authoritative derived state from the log.
    ///
    /// Reconciled entries always follow the log, including backwards
    /// (deleting the latest log entry reverts the key to the previous
    /// winner, or removes it when nothing remains). Optimistic entries are
    /// only replaced by an authoritative timestamp at least as new, so a
    /// command still in flight does not flicker back to a stale value
    /// before the log has caught up with it.
    pub fn apply_authoritative(&self, derived: &DerivedControlState) {
        self.tx.send_modify(|snapshot| {
            snapshot.retain(|key, local| local.optimistic || derived.contains_key(key));
            for (key, command) in derived {
                let replace = snapshot.get(key).is_none_or(|local| {
                    !local.optimistic || command.issued_at_ms >= local.issued_at_ms
                });
                if replace {
                    snapshot.insert(
                        key.clone(),
                        LocalValue {
                            value: command.issued_value.clone(),
                            issued_at_ms: command.issued_at_ms,
                            optimistic: false,
                        },
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandStatus, ControlCommand, EquipmentScope, OperatorIdentity};
    use crate::history::derive_state;

    fn derived_from(entries: &[(&str, f64, i64)]) -> DerivedControlState {
        let scope = EquipmentScope::new("loc-4", "Huntington", "boiler-1");
        let operator = OperatorIdentity::new("u1", "Pat");
        let log: Vec<ControlCommand> = entries
            .iter()
            .map(|(key, value, ts)| {
                let mut cmd = ControlCommand::new(
                    &scope,
                    &operator,
                    key,
                    CommandValue::Number(*value),
                    None,
                );
                cmd.issued_at_ms = *ts;
                cmd.status = CommandStatus::Completed;
                cmd
            })
            .collect();
        derive_state(&log)
    }

    #[test]
    fn optimistic_write_and_rollback_restore_previous() {
        let controls = LocalControls::new();
        controls.apply_optimistic("waterTempSetpoint", CommandValue::Number(180.0), 100);
        let prior =
            controls.apply_optimistic("waterTempSetpoint", CommandValue::Number(185.0), 200);
        assert_eq!(
            controls.get("waterTempSetpoint"),
            Some(CommandValue::Number(185.0))
        );

        controls.rollback("waterTempSetpoint", prior);
        assert_eq!(
            controls.get("waterTempSetpoint"),
            Some(CommandValue::Number(180.0))
        );
    }

    #[test]
    fn rollback_of_first_write_removes_the_key() {
        let controls = LocalControls::new();
        let prior = controls.apply_optimistic("firingRate", CommandValue::Number(40.0), 100);
        controls.rollback("firingRate", prior);
        assert_eq!(controls.get("firingRate"), None);
    }

    #[test]
    fn authoritative_merge_keeps_newer_local_values() {
        let controls = LocalControls::new();
        // In-flight local edit newer than anything the log has.
        controls.apply_optimistic("waterTempSetpoint", CommandValue::Number(190.0), 500);
        controls.apply_authoritative(&derived_from(&[("waterTempSetpoint", 182.0, 300)]));
        assert_eq!(
            controls.get("waterTempSetpoint"),
            Some(CommandValue::Number(190.0))
        );
    }

    #[test]
    fn authoritative_merge_overwrites_stale_local_values() {
        let controls = LocalControls::new();
        controls.apply_optimistic("waterTempSetpoint", CommandValue::Number(180.0), 100);
        controls.apply_authoritative(&derived_from(&[("waterTempSetpoint", 185.0, 200)]));
        assert_eq!(
            controls.get("waterTempSetpoint"),
            Some(CommandValue::Number(185.0))
        );
    }

    #[test]
    fn keys_without_authoritative_entries_are_untouched() {
        let controls = LocalControls::new();
        controls.apply_optimistic("fanEnabled", CommandValue::Bool(true), 100);
        controls.apply_authoritative(&derived_from(&[("waterTempSetpoint", 182.0, 200)]));
        assert_eq!(controls.get("fanEnabled"), Some(CommandValue::Bool(true)));
    }

    #[test]
    fn reconciled_entries_follow_the_log_backwards() {
        let controls = LocalControls::new();
        controls.apply_authoritative(&derived_from(&[("waterTempSetpoint", 185.0, 2_000)]));

        // The winning log entry was deleted; the previous one wins now.
        controls.apply_authoritative(&derived_from(&[("waterTempSetpoint", 180.0, 1_000)]));
        assert_eq!(
            controls.get("waterTempSetpoint"),
            Some(CommandValue::Number(180.0))
        );
    }

    #[test]
    fn reconciled_keys_absent_from_the_log_are_removed() {
        let controls = LocalControls::new();
        controls.apply_authoritative(&derived_from(&[("waterTempSetpoint", 185.0, 2_000)]));

        // Every entry for the key was deleted.
        controls.apply_authoritative(&DerivedControlState::new());
        assert_eq!(controls.get("waterTempSetpoint"), None);
    }

    #[test]
    fn authoritative_merge_is_idempotent() {
        let controls = LocalControls::new();
        let derived = derived_from(&[("waterTempSetpoint", 182.0, 200)]);
        controls.apply_authoritative(&derived);
        let first = controls.snapshot();
        controls.apply_authoritative(&derived);
        assert_eq!(first, controls.snapshot());
    }
}
