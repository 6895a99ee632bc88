//! Error types for the sync layer.
//!
//! Uses `thiserror` for typed errors surfaced by configuration, endpoint
//! derivation, snapshot fetches, the live feed transport, and preference
//! storage. Transport and payload errors are recovered inside the layer
//! (logged, unit of work retired, connection retried); only
//! configuration errors reach the caller of `start`.

/// Errors that can occur in the sync layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// A service URL could not be derived or parsed.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    /// An HTTP request failed before a response arrived, or its body could
    /// not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with a non-2xx status.
    #[error("{url} returned {status}")]
    Status {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The live feed connection failed or broke.
    #[error("feed error: {0}")]
    Feed(String),

    /// A record had an empty identifier.
    #[error("record has an empty `{key}` key")]
    EmptyKey {
        /// Description of the store's key fields.
        key: String,
    },

    /// Preference storage could not be read or written.
    #[error("preference storage error: {0}")]
    Preferences(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
