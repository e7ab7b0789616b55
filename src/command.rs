//! Core command model shared by every stage of the pipeline.
//!
//! A [`ControlCommand`] is one intended mutation of one equipment control.
//! It is assembled by the dispatcher, appended to the per-equipment command
//! log (the single source of truth for "current settings"), emitted over the
//! realtime channel for low-latency execution, and later replayed by the
//! history reconstructor.
//!
//! Log entries are immutable except for [`ControlCommand::status`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Command values
// =============================================================================

/// One control value: boolean, numeric, or enumerated string.
///
/// Serialized untagged so log/wire JSON stays shaped like the portal's
/// loosely-typed payloads (`true`, `182`, `"auto"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    /// Enable/disable flags.
    Bool(bool),
    /// Setpoints, rates, positions.
    Number(f64),
    /// Enumerated modes (e.g., `"auto"`, `"occupied"`).
    Text(String),
}

impl CommandValue {
    /// Short human-readable rendering for details strings and logs.
    pub fn display(&self) -> String {
        match self {
            CommandValue::Bool(b) => b.to_string(),
            CommandValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            CommandValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl From<bool> for CommandValue {
    fn from(value: bool) -> Self {
        CommandValue::Bool(value)
    }
}

impl From<f64> for CommandValue {
    fn from(value: f64) -> Self {
        CommandValue::Number(value)
    }
}

impl From<&str> for CommandValue {
    fn from(value: &str) -> Self {
        CommandValue::Text(value.to_string())
    }
}

// =============================================================================
// Command lifecycle status
// =============================================================================

/// Lifecycle status of a logged command.
///
/// The only mutable field of a log entry. `Pending` commands resolve to
/// `Completed`/`Failed` via realtime acknowledgement events; `Acknowledged`
/// and `Deleted` are explicit operator actions from the history view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Dispatched, no acknowledgement yet.
    Pending,
    /// Equipment gateway confirmed execution.
    Completed,
    /// Equipment gateway reported an error.
    Failed,
    /// Operator confirmed they have seen the outcome.
    Acknowledged,
    /// Operator purged the entry; excluded from all derived state.
    Deleted,
}

// =============================================================================
// Command identifiers
// =============================================================================

/// Opaque, time-derived command identifier.
///
/// Millisecond epoch timestamp plus a process-local monotonic counter
/// suffix, which keeps ids unique within an equipment partition even for
/// slider-drag bursts issuing several commands in the same millisecond.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(String);

static COMMAND_SEQ: AtomicU64 = AtomicU64::new(0);

impl CommandId {
    /// Generate a fresh id from the current wall clock.
    pub fn generate() -> Self {
        let now_ms = Utc::now().timestamp_millis();
        let seq = COMMAND_SEQ.fetch_add(1, Ordering::Relaxed) % 10_000;
        CommandId(format!("cmd-{now_ms}-{seq:04}"))
    }

    /// Wrap an existing id (log replay, tests).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CommandId(raw.into())
    }

    /// The raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Command classification
// =============================================================================

/// Provenance tag stamped on every command this engine dispatches.
pub const SOURCE_CHANNEL: &str = "operator-console";

/// Setpoint vs privileged split for the authorization gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandClass {
    /// Always operator-mutable.
    Setpoint,
    /// Requires an elevated session.
    Privileged,
}

impl CommandClass {
    /// Classify a command key: case-insensitive substring match on
    /// `"setpoint"`; everything else is privileged.
    pub fn of(command_key: &str) -> Self {
        if command_key.to_ascii_lowercase().contains("setpoint") {
            CommandClass::Setpoint
        } else {
            CommandClass::Privileged
        }
    }
}

// =============================================================================
// ControlCommand
// =============================================================================

/// The operator who issued a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorIdentity {
    /// Stable account identifier.
    pub id: String,
    /// Display name for history views and audit entries.
    pub name: String,
}

impl OperatorIdentity {
    /// Construct an identity from id and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Target scope of a command: one piece of equipment at one location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentScope {
    /// Location (building/site) identifier.
    pub location_id: String,
    /// Human-readable location name, carried into audit entries.
    pub location_name: String,
    /// Equipment identifier within the location.
    pub equipment_id: String,
}

impl EquipmentScope {
    /// Construct a scope.
    pub fn new(
        location_id: impl Into<String>,
        location_name: impl Into<String>,
        equipment_id: impl Into<String>,
    ) -> Self {
        Self {
            location_id: location_id.into(),
            location_name: location_name.into(),
            equipment_id: equipment_id.into(),
        }
    }
}

/// One intended mutation of one equipment control.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// Unique within the equipment's log partition.
    pub command_id: CommandId,
    /// Target equipment.
    pub equipment_id: String,
    /// Target location.
    pub location_id: String,
    /// Semantic name of the control being changed.
    pub command_key: String,
    /// The new value.
    pub issued_value: CommandValue,
    /// The prior value held by the issuing view, if known.
    pub previous_value: Option<CommandValue>,
    /// Millisecond epoch, dispatcher-assigned; the ordering key.
    pub issued_at_ms: i64,
    /// Issuing operator's account id.
    pub author_id: String,
    /// Issuing operator's display name.
    pub author_name: String,
    /// Lifecycle status (the only mutable field).
    pub status: CommandStatus,
    /// Fixed provenance tag.
    pub source_channel: String,
    /// Human-readable description of the change.
    pub details: String,
}

impl ControlCommand {
    /// Assemble a fresh pending command for dispatch.
    pub fn new(
        scope: &EquipmentScope,
        operator: &OperatorIdentity,
        command_key: &str,
        issued_value: CommandValue,
        previous_value: Option<CommandValue>,
    ) -> Self {
        let details = format!(
            "{} changed to {}",
            humanize_key(command_key),
            issued_value.display()
        );
        Self {
            command_id: CommandId::generate(),
            equipment_id: scope.equipment_id.clone(),
            location_id: scope.location_id.clone(),
            command_key: command_key.to_string(),
            issued_value,
            previous_value,
            issued_at_ms: Utc::now().timestamp_millis(),
            author_id: operator.id.clone(),
            author_name: operator.name.clone(),
            status: CommandStatus::Pending,
            source_channel: SOURCE_CHANNEL.to_string(),
            details,
        }
    }

    /// Setpoint/privileged classification of this command.
    pub fn class(&self) -> CommandClass {
        CommandClass::of(&self.command_key)
    }
}

/// Turn a camelCase command key into a sentence fragment for details
/// strings ("waterTempSetpoint" -> "Water temp setpoint").
pub fn humanize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if i == 0 {
            out.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            out.push(' ');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_case_insensitive_substring_match() {
        assert_eq!(CommandClass::of("waterTempSetpoint"), CommandClass::Setpoint);
        assert_eq!(CommandClass::of("SUPPLYAIRSETPOINT"), CommandClass::Setpoint);
        assert_eq!(CommandClass::of("unitEnable"), CommandClass::Privileged);
        assert_eq!(CommandClass::of("firingRate"), CommandClass::Privileged);
    }

    #[test]
    fn command_ids_are_unique_within_a_burst() {
        let ids: Vec<CommandId> = (0..100).map(|_| CommandId::generate()).collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn details_string_is_humanized() {
        let scope = EquipmentScope::new("loc-4", "Huntington", "boiler-1");
        let op = OperatorIdentity::new("u1", "Pat");
        let cmd = ControlCommand::new(
            &scope,
            &op,
            "waterTempSetpoint",
            CommandValue::Number(182.0),
            Some(CommandValue::Number(180.0)),
        );
        assert_eq!(cmd.details, "Water temp setpoint changed to 182");
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert_eq!(cmd.source_channel, SOURCE_CHANNEL);
    }

    #[test]
    fn command_value_round_trips_as_untagged_json() {
        let v: CommandValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, CommandValue::Bool(true));
        let v: CommandValue = serde_json::from_str("182.5").unwrap();
        assert_eq!(v, CommandValue::Number(182.5));
        let v: CommandValue = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(v, CommandValue::Text("auto".into()));
    }
}
