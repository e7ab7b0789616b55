//! Custom error types for the synchronization engine.
//!
//! This module defines the primary error type, `SyncError`, for the whole
//! engine. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify every failure a single command attempt can
//! hit, from validation rejections to durable-append failures.
//!
//! ## Error Taxonomy
//!
//! - **`Validation`**: a proposed value is malformed or out of range. The
//!   command is rejected before dispatch and nothing is written anywhere.
//! - **`AuthorizationDenied`**: a privileged command key was issued without
//!   a live capability token. The command is parked pending re-auth, never
//!   appended to the log.
//! - **`Dispatch`**: the durable log append failed. Optimistic local state
//!   is rolled back and the failure is reported to the caller.
//! - **`Transport`**: the realtime emit failed or no acknowledgement ever
//!   arrived. Non-fatal; the reconciliation poller masks it.
//! - **`MirrorWrite`**: the document-store cache update failed. Logged only,
//!   never surfaced to the operator, since the log append already succeeded.
//! - **`Config`** / **`Io`**: ambient failures from configuration loading
//!   and file I/O at the binary seam.
//!
//! Only `Validation`, `AuthorizationDenied` and `Dispatch` are user-visible;
//! the rest are recovered silently. Nothing here is fatal to the process:
//! every failure is scoped to one command attempt.

use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Engine-wide error type. See the module docs for the propagation policy.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A proposed value is malformed or out of range.
    #[error("Validation failed for '{field}': {reason}")]
    Validation {
        /// Name of the offending control field.
        field: String,
        /// Human-readable reason for the rejection.
        reason: String,
    },

    /// A privileged command key was issued without a live capability token.
    #[error("Command '{command_key}' requires an elevated session")]
    AuthorizationDenied {
        /// The privileged command key that was blocked.
        command_key: String,
    },

    /// The durable log append (or another dispatch-path store call) failed.
    #[error("Durable command append failed: {0}")]
    Dispatch(String),

    /// The realtime channel refused an emit.
    #[error("Realtime transport error: {0}")]
    Transport(String),

    /// The document-store cache update failed.
    #[error("Document mirror write failed: {0}")]
    MirrorWrite(String),

    /// Credential verification failed during elevation.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The command key is not declared by the equipment's schema.
    #[error("Unknown command '{0}' for this equipment")]
    UnknownCommand(String),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O at the binary seam.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Helper for validation rejections.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should surface to the operator.
    ///
    /// Transport and mirror failures are recovered silently (the
    /// reconciliation poller and logging respectively), so the UI layer
    /// should never render them as command failures.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SyncError::Validation { .. }
                | SyncError::AuthorizationDenied { .. }
                | SyncError::Dispatch(_)
                | SyncError::Authentication(_)
                | SyncError::UnknownCommand(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_split_matches_propagation_policy() {
        assert!(SyncError::validation("waterTempSetpoint", "out of range").is_user_visible());
        assert!(SyncError::AuthorizationDenied {
            command_key: "unitEnable".into()
        }
        .is_user_visible());
        assert!(SyncError::Dispatch("append refused".into()).is_user_visible());

        assert!(!SyncError::Transport("socket closed".into()).is_user_visible());
        assert!(!SyncError::MirrorWrite("document locked".into()).is_user_visible());
    }

    #[test]
    fn validation_error_names_the_offending_field() {
        let err = SyncError::validation("firingRate", "expected a number");
        assert!(err.to_string().contains("firingRate"));
    }
}
