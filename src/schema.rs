//! Control schemas: per-key value specifications and validation.
//!
//! Every equipment type exposes a fixed set of command keys. A
//! [`ControlSchema`] declares, for each key, the expected value shape and
//! (where defined) its numeric range or enumerated choices. Validation is
//! defense-in-depth: the authorization gate and dispatcher depend on
//! receiving a well-typed object even if the UI layer is momentarily
//! inconsistent (mid-edit boolean/undefined states).
//!
//! Defaults are an explicit table, not inferred at validation time: a
//! boolean key may declare `default`, and a proposal that omits that key is
//! coerced to the declared value before validation. The stock schemas
//! declare `unitEnable -> true` to preserve the portal's historical
//! default-on behavior. Callers must treat that coercion as part of their
//! contract, since it silently changes intent for omitted flags.

use crate::command::CommandValue;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Value specifications
// =============================================================================

/// Expected shape of one control value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ValueSpec {
    /// Enable/disable flag. `default` is applied when the key is absent
    /// from a proposal; `None` means absence is an error.
    Bool {
        /// Explicit default-table entry for omitted flags.
        default: Option<bool>,
    },
    /// Numeric value with an inclusive range.
    Number {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Enumerated string value.
    Enum {
        /// Allowed values.
        choices: Vec<String>,
    },
}

impl ValueSpec {
    /// Validate one value against this spec.
    fn validate(&self, field: &str, value: &CommandValue) -> SyncResult<()> {
        match (self, value) {
            (ValueSpec::Bool { .. }, CommandValue::Bool(_)) => Ok(()),
            (ValueSpec::Number { min, max }, CommandValue::Number(n)) => {
                if !n.is_finite() {
                    return Err(SyncError::validation(field, "value must be finite"));
                }
                if n < min || n > max {
                    return Err(SyncError::validation(
                        field,
                        format!("value {n} outside range {min}..={max}"),
                    ));
                }
                Ok(())
            }
            (ValueSpec::Enum { choices }, CommandValue::Text(s)) => {
                if choices.iter().any(|c| c == s) {
                    Ok(())
                } else {
                    Err(SyncError::validation(
                        field,
                        format!("'{s}' is not one of {}", choices.join(", ")),
                    ))
                }
            }
            _ => Err(SyncError::validation(field, "wrong value type")),
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

/// A normalized, fully-validated control-state object, safe to diff and
/// dispatch.
pub type NormalizedControls = BTreeMap<String, CommandValue>;

/// Per-equipment-type table of command keys and their value specs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ControlSchema {
    specs: BTreeMap<String, ValueSpec>,
}

impl ControlSchema {
    /// Empty schema; add keys with the builder methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a boolean key without a default (absence is an error).
    pub fn bool_key(mut self, key: &str) -> Self {
        self.specs
            .insert(key.to_string(), ValueSpec::Bool { default: None });
        self
    }

    /// Declare a boolean key with an explicit default for omitted proposals.
    pub fn bool_key_default(mut self, key: &str, default: bool) -> Self {
        self.specs.insert(
            key.to_string(),
            ValueSpec::Bool {
                default: Some(default),
            },
        );
        self
    }

    /// Declare a numeric key with an inclusive range.
    pub fn number_key(mut self, key: &str, min: f64, max: f64) -> Self {
        self.specs
            .insert(key.to_string(), ValueSpec::Number { min, max });
        self
    }

    /// Declare an enumerated key.
    pub fn enum_key(mut self, key: &str, choices: &[&str]) -> Self {
        self.specs.insert(
            key.to_string(),
            ValueSpec::Enum {
                choices: choices.iter().map(|c| (*c).to_string()).collect(),
            },
        );
        self
    }

    /// Whether this schema knows the given key.
    pub fn contains(&self, key: &str) -> bool {
        self.specs.contains_key(key)
    }

    /// Iterate declared keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Validate a single key/value pair against this schema.
    pub fn validate_one(&self, key: &str, value: &CommandValue) -> SyncResult<()> {
        let spec = self
            .specs
            .get(key)
            .ok_or_else(|| SyncError::UnknownCommand(key.to_string()))?;
        spec.validate(key, value)
    }

    /// Validate a proposed full control-state object.
    ///
    /// Applies the default table for omitted boolean keys, rejects unknown
    /// keys and ill-typed or out-of-range values, and returns a normalized
    /// object safe to diff and dispatch. On failure nothing is mutated and
    /// the error names the offending field.
    pub fn validate(
        &self,
        proposed: &BTreeMap<String, CommandValue>,
    ) -> SyncResult<NormalizedControls> {
        for key in proposed.keys() {
            if !self.specs.contains_key(key) {
                return Err(SyncError::UnknownCommand(key.clone()));
            }
        }

        let mut normalized = NormalizedControls::new();
        for (key, spec) in &self.specs {
            match proposed.get(key) {
                Some(value) => {
                    spec.validate(key, value)?;
                    normalized.insert(key.clone(), value.clone());
                }
                None => {
                    // Only declared defaults fill gaps; other keys may be
                    // legitimately absent from a partial edit.
                    if let ValueSpec::Bool {
                        default: Some(default),
                    } = spec
                    {
                        normalized.insert(key.clone(), CommandValue::Bool(*default));
                    }
                }
            }
        }
        Ok(normalized)
    }
}

// =============================================================================
// Stock schemas for the portal's equipment types
// =============================================================================

/// Boiler controls (comfort and domestic hot water).
pub fn boiler_schema() -> ControlSchema {
    ControlSchema::new()
        .number_key("waterTempSetpoint", 80.0, 220.0)
        .number_key("firingRate", 0.0, 100.0)
        .bool_key_default("unitEnable", true)
        .enum_key("operationMode", &["auto", "manual", "standby"])
}

/// Fan coil unit controls.
pub fn fan_coil_schema() -> ControlSchema {
    ControlSchema::new()
        .number_key("temperatureSetpoint", 55.0, 90.0)
        .bool_key_default("unitEnable", true)
        .bool_key("fanEnabled")
        .bool_key("heatingEnabled")
        .bool_key("coolingEnabled")
        .number_key("heatingValvePosition", 0.0, 100.0)
        .number_key("coolingValvePosition", 0.0, 100.0)
}

/// Air handler controls.
pub fn air_handler_schema() -> ControlSchema {
    ControlSchema::new()
        .number_key("supplyAirSetpoint", 45.0, 85.0)
        .bool_key_default("unitEnable", true)
        .bool_key("fanEnabled")
        .number_key("outdoorDamperPosition", 0.0, 100.0)
        .enum_key("operationMode", &["occupied", "unoccupied", "auto"])
}

/// Pump controls (hot water, chilled water, condenser water).
pub fn pump_schema() -> ControlSchema {
    ControlSchema::new()
        .number_key("pressureSetpoint", 5.0, 60.0)
        .bool_key("pumpEnabled")
        .number_key("speedCommand", 0.0, 100.0)
}
