//! Headless dashboard for the Lookout monitoring service.
//!
//! Keeps a live in-process replica of the service's checks, evaluations,
//! hosts and cluster state, logs state transitions, and announces
//! connection and summary changes through the alert player.
//!
//! # Architecture
//!
//! ```text
//! REST /api/<resource> --> SnapshotLoader --+
//!                                           +--> KeyedStores --> view / alerts
//! WS   /api/live       --> ChangeFeedClient +
//! ```
//!
//! Alerts stay silent until every initial snapshot has settled.

mod player;
mod view;

use std::sync::Arc;

use chrono::Utc;
use lookout_sync::{
    AlertGate, FileBackend, MemoryBackend, PreferenceBackend, Preferences, SyncConfig,
    SyncContext, run_alerts,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::player::LogAlertPlayer;

/// Preference key muting audible alerts.
const MUTED_KEY: &str = "alerts.muted";

/// Preference key recording the last start time.
const LAST_STARTED_KEY: &str = "dashboard.last_started";

/// Application entry point.
///
/// Initializes logging, loads configuration from environment variables,
/// starts the sync layer, and runs until `Ctrl-C`.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the sync layer cannot
/// be started. Network failures are retried, never returned.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("lookout-dashboard starting");

    let config = SyncConfig::from_env()?;
    info!(
        url = %config.base_url,
        authenticated = config.credentials.is_some(),
        reconnect = ?config.reconnect,
        snapshot_timeout_ms = config.snapshot_timeout.as_millis(),
        ordering = ?config.ordering,
        "configuration loaded"
    );

    let muted = match &config.preferences_path {
        Some(path) => load_preferences(&Preferences::new(FileBackend::new(path))),
        None => load_preferences(&Preferences::new(MemoryBackend::new())),
    };

    let context = SyncContext::new(config);
    let gate = Arc::new(AlertGate::new(LogAlertPlayer::new()));
    gate.set_muted(muted);

    let ready_gate = Arc::clone(&gate);
    let mut session = context.start(move || ready_gate.open())?;

    let alerts = tokio::spawn(run_alerts(
        Arc::clone(&gate),
        session.take_events(),
        context.summary.subscribe(),
    ));
    let view = tokio::spawn(view::watch_evaluations(
        Arc::clone(&context.latest_evaluations),
        Arc::clone(&context.checks),
    ));

    let report = session.snapshot_report().await;
    info!(
        loaded = report.loaded(),
        failed = ?report.failed(),
        "initial snapshot complete"
    );
    view::log_overview(&context);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    session.shutdown().await;
    if let Some(clip) = gate.player().current() {
        info!(%clip, "silencing alert");
    }
    gate.set_muted(true);
    alerts.abort();
    view.abort();

    Ok(())
}

/// Read the mute preference and record this start.
fn load_preferences<B: PreferenceBackend>(prefs: &Preferences<B>) -> bool {
    let muted = prefs.get(MUTED_KEY, false);
    let last_started: Option<String> = prefs.get(LAST_STARTED_KEY, None);
    info!(muted, last_started = ?last_started, "preferences loaded");
    if let Err(e) = prefs.set(LAST_STARTED_KEY, &Utc::now().to_rfc3339()) {
        warn!(error = %e, "failed to record start time");
    }
    muted
}
