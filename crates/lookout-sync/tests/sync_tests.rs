//! End-to-end tests of the sync layer against an in-process service.
//!
//! Each test starts a small Axum server on an ephemeral port that serves
//! REST collections under `/api/<resource>` and a live feed at
//! `/api/live`, then drives a [`SyncContext`] against it over real HTTP
//! and `WebSocket` connections.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use lookout_sync::endpoint::parse_base;
use lookout_sync::{
    Credentials, FeedEvent, OrderingPolicy, ReconnectPolicy, SourceOutcome, SyncConfig,
    SyncContext, SyncSession,
};
use lookout_types::RecordKey;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Notify, broadcast};

#[derive(Debug, Clone)]
enum LiveFrame {
    Text(String),
    Close,
}

struct FakeService {
    collections: Mutex<BTreeMap<String, (StatusCode, Value)>>,
    held: Mutex<BTreeMap<String, Arc<Notify>>>,
    live: broadcast::Sender<LiveFrame>,
    connections: AtomicUsize,
    authorization: Mutex<Option<String>>,
}

impl FakeService {
    fn new() -> Arc<Self> {
        let (live, _) = broadcast::channel(64);
        Arc::new(Self {
            collections: Mutex::new(BTreeMap::new()),
            held: Mutex::new(BTreeMap::new()),
            live,
            connections: AtomicUsize::new(0),
            authorization: Mutex::new(None),
        })
    }

    fn serve_collection(&self, resource: &str, body: Value) {
        self.collections
            .lock()
            .unwrap()
            .insert(resource.to_owned(), (StatusCode::OK, body));
    }

    fn fail_collection(&self, resource: &str, status: StatusCode) {
        self.collections
            .lock()
            .unwrap()
            .insert(resource.to_owned(), (status, json!({"error": "boom"})));
    }

    /// Hold responses for `resource` until the returned handle is notified.
    fn hold_collection(&self, resource: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.held
            .lock()
            .unwrap()
            .insert(resource.to_owned(), Arc::clone(&notify));
        notify
    }

    fn push(&self, change: &Value) {
        let _ = self.live.send(LiveFrame::Text(change.to_string()));
    }

    fn drop_connections(&self) {
        let _ = self.live.send(LiveFrame::Close);
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn collection(
    Path(resource): Path<String>,
    headers: HeaderMap,
    State(service): State<Arc<FakeService>>,
) -> impl IntoResponse {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        *service.authorization.lock().unwrap() = Some(auth.to_owned());
    }

    let hold = service.held.lock().unwrap().get(&resource).cloned();
    if let Some(hold) = hold {
        hold.notified().await;
    }

    let (status, body) = service
        .collections
        .lock()
        .unwrap()
        .get(&resource)
        .cloned()
        .unwrap_or((StatusCode::OK, json!([])));
    (status, axum::Json(body))
}

async fn live(
    ws: WebSocketUpgrade,
    State(service): State<Arc<FakeService>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_changes(socket, service))
}

async fn stream_changes(mut socket: WebSocket, service: Arc<FakeService>) {
    let mut rx = service.live.subscribe();
    service.connections.fetch_add(1, Ordering::SeqCst);

    while let Ok(frame) = rx.recv().await {
        match frame {
            LiveFrame::Text(text) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            LiveFrame::Close => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

async fn serve(service: Arc<FakeService>) -> SocketAddr {
    let router = Router::new()
        .route("/api/live", get(live))
        .route("/api/{resource}", get(collection))
        .with_state(service);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr) -> SyncConfig {
    let mut config = SyncConfig::new(parse_base(&format!("http://{addr}/")).unwrap());
    config.reconnect = ReconnectPolicy::Fixed(Duration::from_millis(50));
    config.snapshot_timeout = Duration::from_secs(5);
    config
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn wait_ready(session: &SyncSession) -> bool {
    let mut ready = session.ready();
    tokio::time::timeout(Duration::from_secs(5), ready.wait_for(|r| *r))
        .await
        .is_ok()
}

fn check(id: &str, agent: &str) -> Value {
    json!({"id": id, "agent": agent, "interval": 30_000_000_000_i64})
}

fn evaluation(id: i64, check_id: &str, state: &str) -> Value {
    json!({"id": id, "check_id": check_id, "state": state})
}

fn change(entity: &str, command: &str, data: Value) -> Value {
    json!({"type": entity, "command": command, "data": data})
}

#[tokio::test]
async fn snapshot_then_live_updates() {
    let service = FakeService::new();
    service.serve_collection("checks", json!([check("a", "http"), check("b", "tcp")]));
    service.serve_collection(
        "evaluations",
        json!([evaluation(1, "a", "up"), evaluation(2, "a", "down")]),
    );
    let addr = serve(Arc::clone(&service)).await;

    let context = SyncContext::new(config(addr));
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let mut session = context
        .start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(wait_ready(&session).await);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(context.checks.len(), 2);
    assert_eq!(context.evaluations.len(), 2);
    // Both evaluations share a check; the later element wins.
    assert_eq!(
        context
            .latest_evaluations
            .get(&RecordKey::new("a"))
            .map(|e| e.id),
        Some(2)
    );

    let report = session.snapshot_report().await;
    assert_eq!(report.loaded(), 6);
    assert!(report.failed().is_empty());
    assert_eq!(
        report.outcome("checks"),
        Some(&SourceOutcome::Loaded {
            received: 2,
            applied: 2
        })
    );

    assert!(eventually(|| service.connections() >= 1).await);
    service.push(&change("check", "save", check("c", "ping")));
    service.push(&change("check", "delete", json!({"id": "a"})));
    service.push(&change("evaluation", "save", evaluation(3, "b", "down")));

    assert!(
        eventually(|| {
            context.checks.contains(&RecordKey::new("c"))
                && !context.checks.contains(&RecordKey::new("a"))
                && context.latest_evaluations.contains(&RecordKey::new("b"))
        })
        .await
    );
    assert!(context.evaluations.contains(&RecordKey::new("3")));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn failed_resource_does_not_block_readiness() {
    let service = FakeService::new();
    service.serve_collection("checks", json!([check("a", "http")]));
    service.fail_collection("contacts", StatusCode::INTERNAL_SERVER_ERROR);
    service.serve_collection("hosts", json!("not a list"));
    let addr = serve(Arc::clone(&service)).await;

    let context = SyncContext::new(config(addr));
    let mut session = context.start(|| {}).unwrap();

    assert!(wait_ready(&session).await);
    let report = session.snapshot_report().await;
    // Sources are reported in registration order.
    assert_eq!(report.failed(), vec!["hosts", "contacts"]);
    assert_eq!(report.loaded(), 4);
    assert!(matches!(
        report.outcome("contacts"),
        Some(SourceOutcome::Failed { reason }) if reason.contains("500")
    ));
    assert!(context.contacts.is_empty());
    assert!(context.hosts.is_empty());
    assert_eq!(context.checks.len(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn live_changes_apply_before_ready() {
    let service = FakeService::new();
    service.serve_collection("checks", json!([check("a", "http")]));
    let release = service.hold_collection("checks");
    let addr = serve(Arc::clone(&service)).await;

    let context = SyncContext::new(config(addr));
    let ready_flag = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ready_flag);
    let session = context
        .start(move || flag.store(true, Ordering::SeqCst))
        .unwrap();

    assert!(eventually(|| service.connections() >= 1).await);
    service.push(&change("check", "save", check("a", "feed")));
    assert!(eventually(|| context.checks.contains(&RecordKey::new("a"))).await);
    assert_eq!(
        context.checks.get(&RecordKey::new("a")).map(|c| c.agent_id.clone()),
        Some("feed".to_owned())
    );
    assert!(!session.is_ready());
    assert!(!ready_flag.load(Ordering::SeqCst));

    release.notify_one();
    assert!(wait_ready(&session).await);
    assert!(ready_flag.load(Ordering::SeqCst));
    // Arrival order: the snapshot landed last, so it wins.
    assert_eq!(
        context.checks.get(&RecordKey::new("a")).map(|c| c.agent_id.clone()),
        Some("http".to_owned())
    );

    session.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_server_close() {
    let service = FakeService::new();
    let addr = serve(Arc::clone(&service)).await;

    let context = SyncContext::new(config(addr));
    let mut session = context.start(|| {}).unwrap();
    let mut events = session.take_events();
    assert!(wait_ready(&session).await);

    assert!(eventually(|| service.connections() >= 1).await);
    service.drop_connections();
    assert!(eventually(|| service.connections() >= 2).await);

    let mut seen = Vec::new();
    let restored = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = events.recv().await {
            let done = matches!(event, FeedEvent::ConnectionRestored { .. });
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(restored.is_ok());
    assert_eq!(seen.first(), Some(&FeedEvent::Connecting { attempt: 0 }));
    assert!(seen.contains(&FeedEvent::ConnectionLost { attempt: 1 }));
    assert_eq!(
        seen.last(),
        Some(&FeedEvent::ConnectionRestored { failed_attempts: 1 })
    );

    service.push(&change("host", "save", json!({"id": "db1", "address": "10.0.0.5"})));
    assert!(eventually(|| context.hosts.contains(&RecordKey::new("db1"))).await);

    session.shutdown().await;
}

#[tokio::test]
async fn snapshot_requests_carry_credentials() {
    let service = FakeService::new();
    let addr = serve(Arc::clone(&service)).await;

    let mut config = config(addr);
    config.credentials = Some(Credentials {
        username: "admin".to_owned(),
        password: "secret".to_owned(),
    });
    let context = SyncContext::new(config);
    let session = context.start(|| {}).unwrap();

    assert!(wait_ready(&session).await);
    let authorization = service.authorization.lock().unwrap().clone();
    assert!(authorization.is_some_and(|a| a.starts_with("Basic ")));

    session.shutdown().await;
}

#[tokio::test]
async fn null_collection_loads_as_empty() {
    let service = FakeService::new();
    service.serve_collection("hosts", Value::Null);
    let addr = serve(Arc::clone(&service)).await;

    let context = SyncContext::new(config(addr));
    let mut session = context.start(|| {}).unwrap();

    assert!(wait_ready(&session).await);
    let report = session.snapshot_report().await;
    assert_eq!(
        report.outcome("hosts"),
        Some(&SourceOutcome::Loaded {
            received: 0,
            applied: 0
        })
    );
    assert!(report.failed().is_empty());
    assert!(context.hosts.is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn versioned_deletes_leave_no_tombstones_after_ready() {
    let dated = json!({"id": 1, "check_id": "web", "state": "up", "end": "2017-05-28T12:00:00Z"});
    let service = FakeService::new();
    service.serve_collection("evaluations", json!([dated.clone()]));
    let addr = serve(Arc::clone(&service)).await;

    let mut config = config(addr);
    config.ordering = OrderingPolicy::Versioned;
    let context = SyncContext::new(config);
    let session = context.start(|| {}).unwrap();

    assert!(wait_ready(&session).await);
    assert!(context.evaluations.contains(&RecordKey::new("1")));

    assert!(eventually(|| service.connections() >= 1).await);
    service.push(&change("evaluation", "delete", json!({"id": 1, "check_id": "web"})));
    assert!(eventually(|| context.evaluations.is_empty()).await);
    assert_eq!(context.evaluations.tombstone_count(), 0);
    assert_eq!(context.latest_evaluations.tombstone_count(), 0);

    // Without a tombstone the same version may be written again.
    service.push(&change("evaluation", "save", dated));
    assert!(eventually(|| context.evaluations.contains(&RecordKey::new("1"))).await);

    session.shutdown().await;
}
