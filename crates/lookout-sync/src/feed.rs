//! Live change-feed client.
//!
//! [`ChangeFeedClient`] keeps a persistent connection to the service's
//! live endpoint, decodes every inbound text frame as a
//! [`ChangeRecord`], and applies it to each store subscribed to the
//! record's entity type, in subscription order.
//!
//! # Lifecycle
//!
//! ```text
//! CLOSED --> CONNECTING --> OPEN --> CLOSED --> CONNECTING --> ...
//! ```
//!
//! Any termination (connect failure, transport error, server close)
//! increments the reconnect-attempt counter and schedules a new attempt
//! after the [`ReconnectPolicy`] delay. A successful open resets the
//! counter. Network errors are never fatal; the client retries until it
//! is dropped or its shutdown future resolves.
//!
//! Subscriptions are registered before the client runs. [`run`] consumes
//! the client, so no store can subscribe after dispatch has started.
//!
//! [`run`]: ChangeFeedClient::run

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{BoxStream, Stream, StreamExt};
use lookout_types::{ChangeRecord, EntityType};
use reqwest::Url;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::SyncError;
use crate::store::EntitySink;

/// Capacity of the feed event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Connection state of the feed client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// No connection; waiting to reconnect or shut down.
    Closed,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and dispatching messages.
    Open,
}

/// Lifecycle notifications published by the feed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A connection attempt started. `attempt` counts the consecutive
    /// failures before it; the first-ever attempt is 0.
    Connecting {
        /// Consecutive failures before this attempt.
        attempt: u32,
    },
    /// The connection opened.
    Opened,
    /// A reconnect attempt started after the connection was lost or could
    /// not be established.
    ConnectionLost {
        /// Consecutive failures so far (at least 1).
        attempt: u32,
    },
    /// The connection opened after at least one failure.
    ConnectionRestored {
        /// Consecutive failures before this successful attempt.
        failed_attempts: u32,
    },
    /// The connection closed or could not be established.
    Closed {
        /// Why the connection ended.
        reason: String,
    },
}

/// A transport yielding inbound text frames from the live endpoint.
///
/// The stream ends when the connection closes; an `Err` item reports a
/// broken connection.
pub trait Connector: Send + Sync + 'static {
    /// The inbound frame stream of one connection.
    type Stream: Stream<Item = Result<String, SyncError>> + Send + Unpin + 'static;

    /// Open one connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Stream, SyncError>> + Send;
}

/// `WebSocket` transport over `tokio-tungstenite`.
///
/// Only text frames are yielded; pings are answered by the transport and
/// binary frames are ignored. The client never sends on this channel.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// Create a connector for a `ws://` or `wss://` URL.
    pub const fn new(url: Url) -> Self {
        Self { url }
    }

    /// The feed URL.
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    type Stream = BoxStream<'static, Result<String, SyncError>>;

    async fn connect(&self) -> Result<Self::Stream, SyncError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::Feed(format!("failed to connect to {}: {e}", self.url)))?;

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed live feed");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::Feed(e.to_string()))),
            }
        });
        Ok(frames.boxed())
    }
}

/// Client of the live change feed.
pub struct ChangeFeedClient<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    subscriptions: BTreeMap<EntityType, Vec<Arc<dyn EntitySink>>>,
    state: watch::Sender<FeedState>,
    events: broadcast::Sender<FeedEvent>,
}

impl<C: Connector> ChangeFeedClient<C> {
    /// Create a client with no subscriptions.
    pub fn new(connector: C, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(FeedState::Closed);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector,
            policy,
            subscriptions: BTreeMap::new(),
            state,
            events,
        }
    }

    /// Register `sink` to receive every future change of `entity`.
    ///
    /// Several sinks may subscribe to the same entity type; they receive
    /// each change in subscription order.
    pub fn subscribe(&mut self, entity: EntityType, sink: Arc<dyn EntitySink>) {
        debug!(
            %entity,
            sink = sink.name(),
            key = %sink.key_description(),
            "subscribing to live feed"
        );
        self.subscriptions.entry(entity).or_default().push(sink);
    }

    /// Number of sinks subscribed to `entity`.
    pub fn subscriber_count(&self, entity: EntityType) -> usize {
        self.subscriptions.get(&entity).map_or(0, Vec::len)
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Subscribe to lifecycle notifications.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Decode one text frame and apply it to every subscribed sink.
    ///
    /// Malformed frames and unknown entity types are logged and dropped.
    /// Returns the number of sinks the change was applied to.
    pub fn dispatch(&self, frame: &str) -> usize {
        let change = match ChangeRecord::decode(frame) {
            Ok(change) => change,
            Err(e) => {
                warn!(error = %e, "dropping malformed feed message");
                return 0;
            }
        };
        let Some(entity) = change.entity_type() else {
            warn!(entity = %change.entity, "dropping feed message of unknown type");
            return 0;
        };
        let Some(sinks) = self.subscriptions.get(&entity) else {
            debug!(%entity, "no subscribers for feed message");
            return 0;
        };
        for sink in sinks {
            let outcome = sink.apply_change(&change);
            debug!(%entity, sink = sink.name(), ?outcome, "feed change applied");
        }
        sinks.len()
    }

    /// Run the connect/dispatch/reconnect loop forever.
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await;
    }

    /// Run the connect/dispatch/reconnect loop until `shutdown` resolves.
    pub async fn run_until<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut attempt: u32 = 0;

        loop {
            self.set_state(FeedState::Connecting);
            self.publish(FeedEvent::Connecting { attempt });
            if attempt > 0 {
                self.publish(FeedEvent::ConnectionLost { attempt });
            }

            let connected = tokio::select! {
                () = &mut shutdown => break,
                connected = self.connector.connect() => connected,
            };

            let reason = match connected {
                Ok(mut frames) => {
                    self.set_state(FeedState::Open);
                    self.publish(FeedEvent::Opened);
                    if attempt > 0 {
                        info!(failed_attempts = attempt, "live feed connection restored");
                        self.publish(FeedEvent::ConnectionRestored {
                            failed_attempts: attempt,
                        });
                    } else {
                        info!("live feed connected");
                    }
                    attempt = 0;

                    loop {
                        let frame = tokio::select! {
                            () = &mut shutdown => {
                                self.set_state(FeedState::Closed);
                                return;
                            }
                            frame = frames.next() => frame,
                        };
                        match frame {
                            Some(Ok(text)) => {
                                self.dispatch(&text);
                            }
                            Some(Err(e)) => break e.to_string(),
                            None => break "connection closed".to_owned(),
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            attempt = attempt.saturating_add(1);
            let delay = self.policy.delay(attempt);
            warn!(
                reason = %reason,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "live feed closed, reconnecting"
            );
            self.set_state(FeedState::Closed);
            self.publish(FeedEvent::Closed { reason });

            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(FeedState::Closed);
        info!("live feed stopped");
    }

    /// Spawn [`run`](Self::run) on a background Tokio task.
    ///
    /// The task runs until it is aborted or the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn set_state(&self, state: FeedState) {
        self.state.send_replace(state);
    }

    fn publish(&self, event: FeedEvent) {
        // send fails only when nobody is listening.
        let _ = self.events.send(event);
    }
}

impl<C: Connector> core::fmt::Debug for ChangeFeedClient<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let subscriptions: BTreeMap<&str, usize> = self
            .subscriptions
            .iter()
            .map(|(entity, sinks)| (entity.tag(), sinks.len()))
            .collect();
        f.debug_struct("ChangeFeedClient")
            .field("policy", &self.policy)
            .field("state", &*self.state.borrow())
            .field("subscriptions", &subscriptions)
            .finish_non_exhaustive()
    }
}
