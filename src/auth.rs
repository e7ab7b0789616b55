//! Authorization gate: setpoint vs privileged classification, capability
//! tokens, and parking of blocked commands.
//!
//! Setpoint commands are always permitted. Privileged commands require an
//! unexpired [`CapabilityToken`], minted by re-authenticating against the
//! identity collaborator. A privileged command issued without a token is
//! parked (one at a time, newest wins) and replayed exactly once after a
//! successful elevation; a failed elevation discards it.
//!
//! Token validity is a deliberately coarse trust window: checked at
//! authorization time only, lasting until expiry or until the equipment
//! view scope resets.

use crate::command::{CommandClass, CommandValue, OperatorIdentity};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Proof of an elevated session, scoped to one equipment-control view.
#[derive(Clone, Debug)]
pub struct CapabilityToken {
    /// The identity that elevated the session.
    pub elevated_by: OperatorIdentity,
    /// Hard expiry; checked at authorization time.
    pub expires_at: DateTime<Utc>,
}

impl CapabilityToken {
    /// Mint a token valid for `ttl` from now.
    pub fn mint(elevated_by: OperatorIdentity, ttl: Duration) -> Self {
        Self {
            elevated_by,
            expires_at: Utc::now() + ttl,
        }
    }

    /// Whether the token is still within its validity window.
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// A privileged command held back pending re-authentication.
#[derive(Clone, Debug, PartialEq)]
pub struct ParkedCommand {
    /// The blocked command key.
    pub command_key: String,
    /// The value the operator tried to issue.
    pub value: CommandValue,
}

/// Outcome of an authorization check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    /// Dispatch may proceed.
    Allow,
    /// Privileged command without a live token; caller should prompt for
    /// credentials and later replay via [`AuthGate::take_parked`].
    Deny,
}

/// Per-view authorization state: current token plus at most one parked
/// command.
#[derive(Debug, Default)]
pub struct AuthGate {
    token: Option<CapabilityToken>,
    parked: Option<ParkedCommand>,
}

impl AuthGate {
    /// Fresh gate with no elevation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a command key may be dispatched right now.
    pub fn authorize(&self, command_key: &str) -> AuthDecision {
        match CommandClass::of(command_key) {
            CommandClass::Setpoint => AuthDecision::Allow,
            CommandClass::Privileged => match &self.token {
                Some(token) if token.is_valid() => AuthDecision::Allow,
                _ => AuthDecision::Deny,
            },
        }
    }

    /// Park a denied command for replay after elevation. Only one command
    /// is held; a newer denial replaces an older one.
    pub fn park(&mut self, command_key: &str, value: CommandValue) {
        if let Some(prev) = &self.parked {
            debug!(replaced = %prev.command_key, "replacing parked command");
        }
        self.parked = Some(ParkedCommand {
            command_key: command_key.to_string(),
            value,
        });
    }

    /// Install a freshly minted token after successful re-authentication.
    pub fn install(&mut self, token: CapabilityToken) {
        self.token = Some(token);
    }

    /// Take the parked command for replay (at most once).
    pub fn take_parked(&mut self) -> Option<ParkedCommand> {
        self.parked.take()
    }

    /// Discard the parked command after a failed elevation.
    pub fn discard_parked(&mut self) -> Option<ParkedCommand> {
        self.parked.take()
    }

    /// Whether a live token is currently installed.
    pub fn is_elevated(&self) -> bool {
        self.token.as_ref().is_some_and(CapabilityToken::is_valid)
    }

    /// Reset on view close or equipment switch: drops token and any parked
    /// command so no elevation bleeds across targets.
    pub fn reset(&mut self) {
        self.token = None;
        self.parked = None;
    }
}
