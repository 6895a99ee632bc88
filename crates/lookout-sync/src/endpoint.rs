//! Service URL derivation.
//!
//! The dashboard is served by the monitoring service itself, so every
//! endpoint is derived from the base URL the page was loaded from: REST
//! snapshots live under `/api/<resource>` and the live feed at
//! `/api/live`, upgraded to `ws`/`wss` to mirror `http`/`https`. Host
//! and non-default ports are kept.

use reqwest::Url;

use crate::error::SyncError;

/// Path of the live change feed.
pub const LIVE_PATH: &str = "/api/live";

/// Parse and validate a service base URL.
///
/// # Errors
///
/// Returns [`SyncError::Endpoint`] if the URL does not parse or is not
/// `http`/`https`.
pub fn parse_base(url: &str) -> Result<Url, SyncError> {
    let parsed =
        Url::parse(url).map_err(|e| SyncError::Endpoint(format!("invalid URL {url}: {e}")))?;
    feed_scheme(&parsed)?;
    Ok(parsed)
}

/// The live feed URL for a service base URL.
///
/// # Errors
///
/// Returns [`SyncError::Endpoint`] if the base URL is not `http`/`https`.
pub fn live_endpoint(base: &Url) -> Result<Url, SyncError> {
    let scheme = feed_scheme(base)?;
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| SyncError::Endpoint(format!("cannot upgrade {base} to {scheme}")))?;
    url.set_path(LIVE_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// The REST URL listing every record of `resource`.
///
/// # Errors
///
/// Returns [`SyncError::Endpoint`] if the base URL is not `http`/`https`.
pub fn snapshot_endpoint(base: &Url, resource: &str) -> Result<Url, SyncError> {
    feed_scheme(base)?;
    let mut url = base.clone();
    url.set_path(&format!("/api/{resource}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn feed_scheme(base: &Url) -> Result<&'static str, SyncError> {
    match base.scheme() {
        "http" => Ok("ws"),
        "https" => Ok("wss"),
        other => Err(SyncError::Endpoint(format!(
            "unsupported scheme {other}, expected http or https"
        ))),
    }
}
