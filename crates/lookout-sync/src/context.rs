//! The dashboard's store set and startup sequence.
//!
//! [`SyncContext`] owns one [`KeyedStore`] per view of the monitoring
//! service's state and wires them to both update channels: the REST
//! snapshot of each resource and the live feed. [`SyncContext::start`]
//! spawns the feed and the snapshot load side by side and fires the
//! caller's readiness callback once every snapshot has settled.

use std::collections::BTreeMap;
use std::sync::Arc;

use lookout_types::{
    AgentDescription, Check, CheckResult, Contact, ContactGroup, EntityType, Evaluation, Host,
    NodeInfo, Summary,
};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::barrier::ReadinessBarrier;
use crate::config::SyncConfig;
use crate::endpoint::live_endpoint;
use crate::error::SyncError;
use crate::feed::{ChangeFeedClient, Connector, FeedEvent, FeedState, WsConnector};
use crate::snapshot::{SnapshotLoader, SnapshotReport};
use crate::store::{EntitySink, KeyedStore};

/// Every store the dashboard renders from.
#[derive(Debug)]
pub struct SyncContext {
    config: SyncConfig,
    /// Configured checks, by `id`.
    pub checks: Arc<KeyedStore<Check>>,
    /// Latest result per check per node.
    pub check_results: Arc<KeyedStore<CheckResult>>,
    /// Evaluations, by `id`.
    pub evaluations: Arc<KeyedStore<Evaluation>>,
    /// Latest evaluation per check, fed from the same feed events as
    /// `evaluations`.
    pub latest_evaluations: Arc<KeyedStore<Evaluation>>,
    /// Monitored hosts.
    pub hosts: Arc<KeyedStore<Host>>,
    /// Notification contacts.
    pub contacts: Arc<KeyedStore<Contact>>,
    /// Contact groups.
    pub contact_groups: Arc<KeyedStore<ContactGroup>>,
    /// Cluster nodes, by `name`.
    pub nodes: Arc<KeyedStore<NodeInfo>>,
    /// Check state summary.
    pub summary: Arc<KeyedStore<Summary>>,
    /// Available check agents, by `name`.
    pub agents: Arc<KeyedStore<AgentDescription>>,
}

impl SyncContext {
    /// Create empty stores using the configured ordering policy.
    pub fn new(config: SyncConfig) -> Self {
        let ordering = config.ordering;
        Self {
            checks: Arc::new(KeyedStore::with_policy("checks", Check::BY_ID, ordering)),
            check_results: Arc::new(KeyedStore::with_policy(
                "check_results",
                CheckResult::BY_CHECK_NODE,
                ordering,
            )),
            evaluations: Arc::new(KeyedStore::with_policy(
                "evaluations",
                Evaluation::BY_ID,
                ordering,
            )),
            latest_evaluations: Arc::new(KeyedStore::with_policy(
                "latest_evaluations",
                Evaluation::BY_CHECK,
                ordering,
            )),
            hosts: Arc::new(KeyedStore::with_policy("hosts", Host::BY_ID, ordering)),
            contacts: Arc::new(KeyedStore::with_policy("contacts", Contact::BY_ID, ordering)),
            contact_groups: Arc::new(KeyedStore::with_policy(
                "contact_groups",
                ContactGroup::BY_ID,
                ordering,
            )),
            nodes: Arc::new(KeyedStore::with_policy("nodes", NodeInfo::BY_NAME, ordering)),
            summary: Arc::new(KeyedStore::with_policy("summary", Summary::BY_ID, ordering)),
            agents: Arc::new(KeyedStore::with_policy(
                "agents",
                AgentDescription::BY_NAME,
                ordering,
            )),
            config,
        }
    }

    /// The configuration the context was built from.
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Every store, in dispatch order.
    pub fn sinks(&self) -> Vec<Arc<dyn EntitySink>> {
        vec![
            self.checks.clone(),
            self.check_results.clone(),
            self.evaluations.clone(),
            self.latest_evaluations.clone(),
            self.hosts.clone(),
            self.contacts.clone(),
            self.contact_groups.clone(),
            self.nodes.clone(),
            self.summary.clone(),
            self.agents.clone(),
        ]
    }

    /// Subscribe every store to its entity type on `feed`.
    pub fn subscribe_all<C: Connector>(&self, feed: &mut ChangeFeedClient<C>) {
        for sink in self.sinks() {
            feed.subscribe(sink.entity(), sink);
        }
    }

    /// A snapshot loader with one source per REST resource, seeding every
    /// store of that resource's entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or a resource
    /// URL cannot be derived.
    pub fn snapshot_loader(&self) -> Result<SnapshotLoader, SyncError> {
        let mut loader = SnapshotLoader::new(
            self.config.base_url.clone(),
            self.config.snapshot_timeout,
            self.config.credentials.clone(),
        )?;

        let mut by_entity: BTreeMap<EntityType, Vec<Arc<dyn EntitySink>>> = BTreeMap::new();
        for sink in self.sinks() {
            by_entity.entry(sink.entity()).or_default().push(sink);
        }
        for (entity, sinks) in by_entity {
            if let Some(resource) = entity.resource() {
                loader.add_source(resource, sinks)?;
            }
        }
        Ok(loader)
    }

    /// A `WebSocket` feed client with every store subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Endpoint`] if the live URL cannot be derived.
    pub fn feed_client(&self) -> Result<ChangeFeedClient<WsConnector>, SyncError> {
        let url = live_endpoint(&self.config.base_url)?;
        let mut feed = ChangeFeedClient::new(WsConnector::new(url), self.config.reconnect);
        self.subscribe_all(&mut feed);
        Ok(feed)
    }

    /// Start syncing over the `WebSocket` feed.
    ///
    /// See [`start_with`](Self::start_with).
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint cannot be derived or the HTTP client
    /// cannot be built. Network failures are never returned.
    pub fn start<F>(&self, on_ready: F) -> Result<SyncSession, SyncError>
    where
        F: FnOnce() + Send + 'static,
    {
        let feed = self.feed_client()?;
        self.start_with(feed, on_ready)
    }

    /// Start syncing over an already subscribed feed client.
    ///
    /// Spawns the feed loop and the snapshot load as independent tasks.
    /// Feed changes are applied as soon as they arrive, before, during or
    /// after the snapshots. `on_ready` runs once every snapshot request
    /// has succeeded or failed.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot loader cannot be built.
    pub fn start_with<C, F>(
        &self,
        feed: ChangeFeedClient<C>,
        on_ready: F,
    ) -> Result<SyncSession, SyncError>
    where
        C: Connector,
        F: FnOnce() + Send + 'static,
    {
        let loader = self.snapshot_loader()?;

        let (ready_tx, ready) = watch::channel(false);
        let barrier = Arc::new(ReadinessBarrier::new(move || {
            info!("initial snapshots settled, dashboard ready");
            on_ready();
            ready_tx.send_replace(true);
        }));

        let events = feed.events();
        let state = feed.state();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let feed = tokio::spawn(feed.run_until(async move {
            // A dropped sender also stops the feed.
            let _ = shutdown_rx.await;
        }));

        let snapshot = tokio::spawn(async move { loader.load(&barrier).await });

        info!(url = %self.config.base_url, "sync started");
        Ok(SyncSession {
            feed,
            snapshot: Some(snapshot),
            report: None,
            events,
            state,
            ready,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle on a running sync started by [`SyncContext::start`].
///
/// Dropping the session stops the live feed.
#[derive(Debug)]
pub struct SyncSession {
    feed: JoinHandle<()>,
    snapshot: Option<JoinHandle<SnapshotReport>>,
    report: Option<SnapshotReport>,
    events: broadcast::Receiver<FeedEvent>,
    state: watch::Receiver<FeedState>,
    ready: watch::Receiver<bool>,
    shutdown: oneshot::Sender<()>,
}

impl SyncSession {
    /// A new receiver of feed lifecycle events sent from now on.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.resubscribe()
    }

    /// Take the receiver created before the feed started, which has seen
    /// every event.
    pub fn take_events(&mut self) -> broadcast::Receiver<FeedEvent> {
        let fresh = self.events.resubscribe();
        std::mem::replace(&mut self.events, fresh)
    }

    /// Watch the feed connection state.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Watch readiness; flips to `true` once when the snapshots settle.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    /// Whether the initial snapshots have settled.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the snapshot load to finish and return its report.
    pub async fn snapshot_report(&mut self) -> SnapshotReport {
        if let Some(handle) = self.snapshot.take() {
            let report = handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "snapshot task failed");
                SnapshotReport::default()
            });
            self.report = Some(report);
        }
        self.report.clone().unwrap_or_default()
    }

    /// Stop the live feed and wait for its task to exit.
    pub async fn shutdown(self) {
        let Self {
            feed,
            snapshot,
            shutdown,
            ..
        } = self;
        let _ = shutdown.send(());
        if let Err(e) = feed.await {
            warn!(error = %e, "feed task failed");
        }
        if let Some(snapshot) = snapshot {
            snapshot.abort();
        }
        info!("sync stopped");
    }
}
