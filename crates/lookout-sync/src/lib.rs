//! State synchronization layer for the Lookout dashboard.
//!
//! Keeps an in-process replica of the monitoring service's state current
//! by combining two update channels: an initial bulk snapshot over REST
//! and a live change feed over a persistent `WebSocket`. The replica is a
//! set of [`KeyedStore`]s; any number of consumers read them while the
//! snapshot loader and feed client write.
//!
//! # Modules
//!
//! - [`store`] -- Identifier-indexed record stores and change events
//! - [`barrier`] -- Reference-counted readiness gate
//! - [`snapshot`] -- Concurrent REST snapshot loading
//! - [`feed`] -- Live change feed with automatic reconnection
//! - [`backoff`] -- Reconnect delay policies
//! - [`endpoint`] -- REST and feed URL derivation
//! - [`context`] -- The dashboard's store set and startup sequence
//! - [`alerts`] -- Audible alert selection and gating
//! - [`prefs`] -- JSON-encoded user preferences
//! - [`config`] -- Environment-based configuration
//! - [`error`] -- Error types

pub mod alerts;
pub mod backoff;
pub mod barrier;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod feed;
pub mod prefs;
pub mod snapshot;
pub mod store;

pub use alerts::{AlertClip, AlertGate, AlertPlayer, SummaryAnnouncer, run_alerts};
pub use backoff::ReconnectPolicy;
pub use barrier::ReadinessBarrier;
pub use config::{Credentials, SyncConfig};
pub use context::{SyncContext, SyncSession};
pub use error::SyncError;
pub use feed::{ChangeFeedClient, Connector, FeedEvent, FeedState, WsConnector};
pub use prefs::{FileBackend, MemoryBackend, PreferenceBackend, Preferences};
pub use snapshot::{SnapshotLoader, SnapshotReport, SourceOutcome};
pub use store::{EntitySink, KeyedStore, OrderingPolicy, StoreEvent, WriteOutcome};
