//! Configuration for the sync layer.
//!
//! All configuration is loaded from environment variables. The sync layer
//! needs to know where the monitoring service lives, how to authenticate
//! against its API, how to pace feed reconnects, and how stores resolve
//! racing writes.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::backoff::{DEFAULT_RECONNECT_INTERVAL, DEFAULT_RECONNECT_MAX, ReconnectPolicy};
use crate::endpoint::parse_base;
use crate::error::SyncError;
use crate::store::OrderingPolicy;

/// Default timeout of one snapshot request.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Complete sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the monitoring service (e.g. `http://localhost:9000/`).
    pub base_url: Url,
    /// HTTP basic auth credentials for the API, if it requires them.
    pub credentials: Option<Credentials>,
    /// Reconnect pacing of the live feed.
    pub reconnect: ReconnectPolicy,
    /// Timeout of one snapshot request.
    pub snapshot_timeout: Duration,
    /// How stores resolve racing writes.
    pub ordering: OrderingPolicy,
    /// File backing persisted preferences, in-memory when `None`.
    pub preferences_path: Option<PathBuf>,
}

/// HTTP basic auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SyncConfig {
    /// Configuration with default settings for the given service.
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            credentials: None,
            reconnect: ReconnectPolicy::Fixed(DEFAULT_RECONNECT_INTERVAL),
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            ordering: OrderingPolicy::ArrivalOrder,
            preferences_path: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - `LOOKOUT_URL` -- base URL of the monitoring service
    ///
    /// Optional variables:
    /// - `LOOKOUT_USERNAME` / `LOOKOUT_PASSWORD` -- API basic auth
    /// - `LOOKOUT_RECONNECT_INTERVAL_MS` -- feed reconnect delay (default 2500)
    /// - `LOOKOUT_RECONNECT_BACKOFF` -- `fixed` (default) or `exponential`
    /// - `LOOKOUT_RECONNECT_MAX_MS` -- exponential backoff cap (default 30000)
    /// - `LOOKOUT_SNAPSHOT_TIMEOUT_MS` -- snapshot request timeout (default 10000)
    /// - `LOOKOUT_ORDERING` -- `arrival` (default) or `versioned`
    /// - `LOOKOUT_PREFERENCES` -- path of the preferences file
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("LOOKOUT_URL")
            .ok_or_else(|| SyncError::Config("missing required env var LOOKOUT_URL".to_owned()))?;
        let base_url = parse_base(&url)?;

        let credentials = match (lookup("LOOKOUT_USERNAME"), lookup("LOOKOUT_PASSWORD")) {
            (Some(username), Some(password)) if !username.is_empty() => Some(Credentials {
                username,
                password,
            }),
            (Some(_), None) => {
                return Err(SyncError::Config(
                    "LOOKOUT_USERNAME set without LOOKOUT_PASSWORD".to_owned(),
                ));
            }
            _ => None,
        };

        let interval_ms = parse_var(&lookup, "LOOKOUT_RECONNECT_INTERVAL_MS", 2500_u64)?;
        let max_ms = parse_var(&lookup, "LOOKOUT_RECONNECT_MAX_MS", millis(DEFAULT_RECONNECT_MAX))?;
        let reconnect = match lookup("LOOKOUT_RECONNECT_BACKOFF")
            .unwrap_or_else(|| "fixed".to_owned())
            .to_lowercase()
            .as_str()
        {
            "fixed" => ReconnectPolicy::Fixed(Duration::from_millis(interval_ms)),
            "exponential" => ReconnectPolicy::Exponential {
                initial: Duration::from_millis(interval_ms),
                max: Duration::from_millis(max_ms),
                jitter: true,
            },
            other => {
                return Err(SyncError::Config(format!(
                    "invalid LOOKOUT_RECONNECT_BACKOFF: {other}"
                )));
            }
        };

        let timeout_ms = parse_var(
            &lookup,
            "LOOKOUT_SNAPSHOT_TIMEOUT_MS",
            millis(DEFAULT_SNAPSHOT_TIMEOUT),
        )?;

        let ordering = match lookup("LOOKOUT_ORDERING")
            .unwrap_or_else(|| "arrival".to_owned())
            .to_lowercase()
            .as_str()
        {
            "arrival" => OrderingPolicy::ArrivalOrder,
            "versioned" => OrderingPolicy::Versioned,
            other => {
                return Err(SyncError::Config(format!("invalid LOOKOUT_ORDERING: {other}")));
            }
        };

        Ok(Self {
            base_url,
            credentials,
            reconnect,
            snapshot_timeout: Duration::from_millis(timeout_ms),
            ordering,
            preferences_path: lookup("LOOKOUT_PREFERENCES").map(PathBuf::from),
        })
    }
}

/// Parse an optional numeric variable, falling back to `default`.
fn parse_var<F>(lookup: &F, name: &str, default: u64) -> Result<u64, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e| SyncError::Config(format!("invalid {name}: {e}")))
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
