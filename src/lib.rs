//! Equipment control command synchronization engine.
//!
//! This crate keeps an operator's control view of building equipment
//! (boilers, air handlers, fan coils, pumps) consistent with an
//! append-only command log while commands execute asynchronously on the
//! equipment side.
//!
//! The moving parts:
//! - [`command`] / [`schema`]: the command model and per-equipment
//!   validation schemas.
//! - [`auth`]: capability tokens and command parking for privileged keys.
//! - [`dispatch`]: the write path (optimistic apply, realtime emit,
//!   durable append, mirror patch, audit).
//! - [`ack`]: bounded tracking of realtime acknowledgements.
//! - [`history`] / [`state`]: last-write-wins state derivation and the
//!   local optimistic store both paths merge into.
//! - [`reconcile`]: the interval + debounced poller that pulls the log
//!   back into the local view.
//! - [`session`]: one operator's wired-up view on one equipment target.
//!
//! Backends plug in through the traits in [`ports`]; in-memory adapters
//! for tests and demos live in [`adapters`].

pub mod ack;
pub mod adapters;
pub mod audit;
pub mod auth;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod ports;
pub mod reconcile;
pub mod schema;
pub mod session;
pub mod state;
pub mod telemetry;

pub use command::{
    CommandId, CommandStatus, CommandValue, ControlCommand, EquipmentScope, OperatorIdentity,
};
pub use config::SyncConfig;
pub use dispatch::{BulkOutcome, DispatchOutcome};
pub use error::{SyncError, SyncResult};
pub use session::{Backends, ControlSession};
