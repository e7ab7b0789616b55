//! History reconstruction: deriving "current settings" from the log.
//!
//! The command log is the single source of truth. Current state is never
//! stored; it is recomputed here as the highest-timestamp non-deleted entry
//! per command key. Last-write-wins is the only conflict resolution between
//! concurrent operators, since no distributed lock exists. Both functions
//! are pure and idempotent: rerunning them on an unchanged log yields an
//! identical result, which the caching layer above relies on.

use crate::command::{CommandStatus, ControlCommand};
use std::collections::BTreeMap;

/// Map from command key to the winning (latest non-deleted) command.
pub type DerivedControlState = BTreeMap<String, ControlCommand>;

/// Derive current settings from a log partition.
///
/// Groups non-deleted entries by key and keeps the maximum
/// `issued_at_ms` per group. The input may arrive in any delivery order;
/// ties on timestamp break toward the larger command id so repeated runs
/// stay deterministic.
pub fn derive_state(log: &[ControlCommand]) -> DerivedControlState {
    let mut state = DerivedControlState::new();
    for entry in log {
        if entry.status == CommandStatus::Deleted {
            continue;
        }
        match state.get(&entry.command_key) {
            Some(current) if !supersedes(entry, current) => {}
            _ => {
                state.insert(entry.command_key.clone(), entry.clone());
            }
        }
    }
    state
}

/// Whether `candidate` wins over `current` for the same key.
fn supersedes(candidate: &ControlCommand, current: &ControlCommand) -> bool {
    (candidate.issued_at_ms, &candidate.command_id) > (current.issued_at_ms, &current.command_id)
}

/// The most recent `limit` non-deleted entries across all keys, descending
/// by timestamp. Lossy and bounded: display only, never a correctness
/// source.
pub fn recent_history(log: &[ControlCommand], limit: usize) -> Vec<ControlCommand> {
    let mut entries: Vec<ControlCommand> = log
        .iter()
        .filter(|e| e.status != CommandStatus::Deleted)
        .cloned()
        .collect();
    entries.sort_by(|a, b| {
        (b.issued_at_ms, &b.command_id).cmp(&(a.issued_at_ms, &a.command_id))
    });
    entries.truncate(limit);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandId, CommandValue, EquipmentScope, OperatorIdentity};

    fn entry(key: &str, value: f64, ts: i64, status: CommandStatus) -> ControlCommand {
        let scope = EquipmentScope::new("loc-4", "Huntington", "boiler-1");
        let operator = OperatorIdentity::new("u1", "Pat");
        let mut cmd = ControlCommand::new(&scope, &operator, key, CommandValue::Number(value), None);
        cmd.command_id = CommandId::from_raw(format!("cmd-{ts}"));
        cmd.issued_at_ms = ts;
        cmd.status = status;
        cmd
    }

    #[test]
    fn latest_non_deleted_entry_wins_per_key() {
        let log = vec![
            entry("waterTempSetpoint", 180.0, 100, CommandStatus::Completed),
            entry("waterTempSetpoint", 185.0, 200, CommandStatus::Pending),
            entry("firingRate", 40.0, 150, CommandStatus::Completed),
        ];
        let state = derive_state(&log);
        assert_eq!(
            state["waterTempSetpoint"].issued_value,
            CommandValue::Number(185.0)
        );
        assert_eq!(state["firingRate"].issued_value, CommandValue::Number(40.0));
    }

    #[test]
    fn deleting_the_latest_entry_falls_back_to_the_previous_one() {
        let log = vec![
            entry("waterTempSetpoint", 180.0, 100, CommandStatus::Completed),
            entry("waterTempSetpoint", 185.0, 200, CommandStatus::Deleted),
        ];
        let state = derive_state(&log);
        assert_eq!(
            state["waterTempSetpoint"].issued_value,
            CommandValue::Number(180.0)
        );
    }

    #[test]
    fn delivery_order_does_not_matter() {
        let mut log = vec![
            entry("firingRate", 10.0, 10, CommandStatus::Completed),
            entry("firingRate", 20.0, 20, CommandStatus::Completed),
            entry("firingRate", 30.0, 30, CommandStatus::Pending),
        ];
        let forward = derive_state(&log);
        log.reverse();
        let backward = derive_state(&log);
        assert_eq!(forward, backward);
        assert_eq!(forward["firingRate"].issued_value, CommandValue::Number(30.0));
    }

    #[test]
    fn derivation_is_idempotent() {
        let log = vec![
            entry("waterTempSetpoint", 182.0, 500, CommandStatus::Completed),
            entry("unitEnable", 1.0, 400, CommandStatus::Completed),
        ];
        assert_eq!(derive_state(&log), derive_state(&log));
    }

    #[test]
    fn all_deleted_yields_empty_state() {
        let log = vec![entry("waterTempSetpoint", 182.0, 500, CommandStatus::Deleted)];
        assert!(derive_state(&log).is_empty());
    }

    #[test]
    fn recent_history_is_bounded_and_descending() {
        let log = vec![
            entry("waterTempSetpoint", 180.0, 100, CommandStatus::Completed),
            entry("firingRate", 40.0, 300, CommandStatus::Completed),
            entry("waterTempSetpoint", 185.0, 200, CommandStatus::Completed),
            entry("unitEnable", 1.0, 50, CommandStatus::Deleted),
        ];
        let recent = recent_history(&log, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].issued_at_ms, 300);
        assert_eq!(recent[1].issued_at_ms, 200);
    }

    #[test]
    fn timestamp_ties_break_deterministically() {
        let a = entry("firingRate", 10.0, 100, CommandStatus::Completed);
        let mut b = entry("firingRate", 20.0, 100, CommandStatus::Completed);
        b.command_id = CommandId::from_raw("cmd-100-zz");
        let forward = derive_state(&[a.clone(), b.clone()]);
        let backward = derive_state(&[b, a]);
        assert_eq!(forward, backward);
    }
}
