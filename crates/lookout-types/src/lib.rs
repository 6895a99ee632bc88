//! Shared type definitions for the Lookout dashboard.
//!
//! This crate is the single source of truth for the records the
//! monitoring service serves over REST and pushes over its live feed.
//! Types flow downstream to `TypeScript` via `ts-rs` for the browser view.
//!
//! # Modules
//!
//! - [`enums`] -- Entity type tags, feed commands, check states
//! - [`keys`] -- Record identifiers and store key bindings
//! - [`records`] -- Per-entity-type record structs
//! - [`change`] -- The change-feed envelope

pub mod change;
pub mod enums;
pub mod keys;
pub mod records;

// Re-export all public types at crate root for convenience.
pub use change::ChangeRecord;
pub use enums::{CheckState, Command, EntityType};
pub use keys::{KeyField, RecordKey};
pub use records::{
    AgentDescription, ArgumentDescription, Check, CheckResult, Contact, ContactGroup, Evaluation,
    Host, NodeInfo, Record, Summary,
};
