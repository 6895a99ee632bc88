//! Initial REST snapshots.
//!
//! The [`SnapshotLoader`] fetches the full collection of every registered
//! resource concurrently and seeds the stores behind it. Each resource is
//! one unit of work on a [`ReadinessBarrier`]: all units are registered
//! before the first request starts, and each is retired once its response
//! has been applied or its request has failed. A failed resource leaves
//! its stores empty (until live changes arrive) but never stalls
//! readiness.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{info, warn};

use crate::barrier::ReadinessBarrier;
use crate::config::Credentials;
use crate::endpoint::snapshot_endpoint;
use crate::error::SyncError;
use crate::store::EntitySink;

/// One REST resource and the stores seeded from it.
pub struct SnapshotSource {
    resource: String,
    url: Url,
    sinks: Vec<Arc<dyn EntitySink>>,
}

impl SnapshotSource {
    /// The resource name (e.g. `checks`).
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The URL the collection is fetched from.
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Number of stores seeded from this resource.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl core::fmt::Debug for SnapshotSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sinks: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("SnapshotSource")
            .field("resource", &self.resource)
            .field("url", &self.url.as_str())
            .field("sinks", &sinks)
            .finish()
    }
}

/// Outcome of fetching one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The collection was fetched and applied.
    Loaded {
        /// Elements in the response.
        received: usize,
        /// Elements applied, summed over every store seeded.
        applied: usize,
    },
    /// The request or its decoding failed; no store was touched.
    Failed {
        /// Why.
        reason: String,
    },
}

/// Per-resource outcomes of one [`SnapshotLoader::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// `(resource, outcome)` in registration order.
    pub sources: Vec<(String, SourceOutcome)>,
}

impl SnapshotReport {
    /// Number of resources that loaded.
    pub fn loaded(&self) -> usize {
        self.sources
            .iter()
            .filter(|(_, o)| matches!(o, SourceOutcome::Loaded { .. }))
            .count()
    }

    /// Resources that failed to load.
    pub fn failed(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|(_, o)| matches!(o, SourceOutcome::Failed { .. }))
            .map(|(resource, _)| resource.as_str())
            .collect()
    }

    /// The outcome for `resource`, if it was registered.
    pub fn outcome(&self, resource: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|(r, _)| r == resource)
            .map(|(_, outcome)| outcome)
    }
}

/// Fetches the initial collections of every registered resource.
#[derive(Debug)]
pub struct SnapshotLoader {
    client: Client,
    base: Url,
    credentials: Option<Credentials>,
    sources: Vec<SnapshotSource>,
}

impl SnapshotLoader {
    /// Create a loader for the service at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base: Url,
        timeout: Duration,
        credentials: Option<Credentials>,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            credentials,
            sources: Vec::new(),
        })
    }

    /// Register `resource`, seeding every store in `sinks` from its
    /// response. Stores receive the elements in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Endpoint`] if the resource URL cannot be
    /// derived.
    pub fn add_source(
        &mut self,
        resource: &str,
        sinks: Vec<Arc<dyn EntitySink>>,
    ) -> Result<(), SyncError> {
        let url = snapshot_endpoint(&self.base, resource)?;
        self.sources.push(SnapshotSource {
            resource: resource.to_owned(),
            url,
            sinks,
        });
        Ok(())
    }

    /// Registered sources.
    pub fn sources(&self) -> &[SnapshotSource] {
        &self.sources
    }

    /// Fetch every resource concurrently and seed the stores.
    ///
    /// Registers one unit of work per resource on `barrier` before any
    /// request starts and retires it when the resource settles, success
    /// or not. With no resources registered the barrier still receives
    /// one unit, retired immediately, so its completion fires.
    ///
    /// Every seeded store is marked as loading a snapshot until its
    /// resource settles.
    pub async fn load(&self, barrier: &ReadinessBarrier) -> SnapshotReport {
        if self.sources.is_empty() {
            barrier.add(1);
            barrier.done();
            return SnapshotReport::default();
        }

        barrier.add(self.sources.len());
        for sink in self.sources.iter().flat_map(|source| &source.sinks) {
            sink.begin_snapshot();
        }
        info!(resources = self.sources.len(), "loading snapshots");

        let fetches = self.sources.iter().map(|source| async move {
            let outcome = match self.fetch(source).await {
                Ok(items) => {
                    let received = items.len();
                    let applied = source
                        .sinks
                        .iter()
                        .map(|sink| sink.seed_records(items.clone()))
                        .fold(0_usize, usize::saturating_add);
                    info!(
                        resource = %source.resource,
                        received,
                        applied,
                        "snapshot loaded"
                    );
                    SourceOutcome::Loaded { received, applied }
                }
                Err(e) => {
                    warn!(resource = %source.resource, error = %e, "snapshot failed");
                    SourceOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            for sink in &source.sinks {
                sink.end_snapshot();
            }
            barrier.done();
            (source.resource.clone(), outcome)
        });

        SnapshotReport {
            sources: join_all(fetches).await,
        }
    }

    async fn fetch(&self, source: &SnapshotSource) -> Result<Vec<Value>, SyncError> {
        let mut request = self.client.get(source.url.clone());
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Http(format!("GET {}: {e}", source.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: source.url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::Http(format!("reading {}: {e}", source.url)))?;
        // A `null` body is an empty collection.
        let items: Option<Vec<Value>> = serde_json::from_slice(&body)?;
        Ok(items.unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lookout_types::{Check, Evaluation};

    use super::*;
    use crate::endpoint::parse_base;
    use crate::store::KeyedStore;

    fn loader() -> SnapshotLoader {
        let base = parse_base("http://127.0.0.1:9/").unwrap();
        SnapshotLoader::new(base, Duration::from_millis(200), None).unwrap()
    }

    fn counting_barrier() -> (ReadinessBarrier, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let barrier = ReadinessBarrier::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (barrier, fired)
    }

    #[tokio::test]
    async fn no_sources_still_fires() {
        let (barrier, fired) = counting_barrier();
        let report = loader().load(&barrier).await;
        assert!(report.sources.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_sources_are_retired() {
        let checks = Arc::new(KeyedStore::new("checks", Check::BY_ID));
        let evaluations = Arc::new(KeyedStore::new("evaluations", Evaluation::BY_ID));
        let latest = Arc::new(KeyedStore::new("latest", Evaluation::BY_CHECK));
        let mut loader = loader();
        loader.add_source("checks", vec![checks.clone()]).unwrap();
        loader
            .add_source("evaluations", vec![evaluations.clone(), latest])
            .unwrap();
        assert_eq!(loader.sources().len(), 2);
        assert_eq!(
            loader.sources().first().map(|s| s.url().as_str()),
            Some("http://127.0.0.1:9/api/checks")
        );

        let (barrier, fired) = counting_barrier();
        let report = loader.load(&barrier).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(report.loaded(), 0);
        assert_eq!(report.failed(), vec!["checks", "evaluations"]);
        assert!(checks.is_empty());
        assert!(evaluations.is_empty());
    }
}
