//! Mock backend lifecycle management
//!
//! Spawns an in-process HTTP server speaking the platform's notification
//! API, including the server-sent events stream. Each test gets an isolated
//! backend with its own seeded notifications.

use super::constants::*;
use super::fixtures::seeded_notifications;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use collab_notifications::config::{AppConfig, CliConfig};
use collab_notifications::{NotificationCenter, NotificationRecord};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Shape of the list endpoint's response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    Bare,
    DataEnvelope,
    NotificationsEnvelope,
}

/// Something sent to every open stream
#[derive(Debug, Clone)]
enum Push {
    Event {
        name: Option<String>,
        id: Option<String>,
        data: String,
    },
    Disconnect,
}

/// Backend state shared by all handlers
pub struct MockBackend {
    notifications: Mutex<Vec<NotificationRecord>>,
    list_format: Mutex<ListFormat>,
    pushes: broadcast::Sender<Push>,
    fail_mutations: AtomicBool,
    stream_available: AtomicBool,
    session_valid: AtomicBool,
    stream_connects: AtomicUsize,
    resume_ids: Mutex<Vec<Option<String>>>,
    list_requests: AtomicUsize,
}

impl MockBackend {
    fn new(notifications: Vec<NotificationRecord>) -> Self {
        let (pushes, _) = broadcast::channel(64);
        Self {
            notifications: Mutex::new(notifications),
            list_format: Mutex::new(ListFormat::DataEnvelope),
            pushes,
            fail_mutations: AtomicBool::new(false),
            stream_available: AtomicBool::new(true),
            session_valid: AtomicBool::new(true),
            stream_connects: AtomicUsize::new(0),
            resume_ids: Mutex::new(Vec::new()),
            list_requests: AtomicUsize::new(0),
        }
    }

    /// Current backend-side notifications
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn record(&self, id: &str) -> Option<NotificationRecord> {
        self.records().into_iter().find(|n| n.id == id)
    }

    /// Adds a record backend-side without pushing it
    pub fn insert(&self, record: NotificationRecord) {
        self.notifications.lock().unwrap().insert(0, record);
    }

    /// Stores the record and pushes it as a `notification` event whose
    /// event id is the record id
    pub fn push(&self, record: NotificationRecord) {
        let data = serde_json::to_string(&record).expect("Failed to serialize record");
        let id = record.id.clone();
        self.insert(record);
        self.send(Some("notification"), Some(id), &data);
    }

    /// Pushes an arbitrary event, without an event id, to every open stream
    pub fn push_raw(&self, name: Option<&str>, data: &str) {
        self.send(name, None, data);
    }

    fn send(&self, name: Option<&str>, id: Option<String>, data: &str) {
        let _ = self.pushes.send(Push::Event {
            name: name.map(str::to_string),
            id,
            data: data.to_string(),
        });
    }

    /// Ends every open stream
    pub fn disconnect_streams(&self) {
        let _ = self.pushes.send(Push::Disconnect);
    }

    pub fn set_list_format(&self, format: ListFormat) {
        *self.list_format.lock().unwrap() = format;
    }

    /// Makes every mutating endpoint answer 500
    pub fn set_fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Makes the stream endpoint answer 503
    pub fn set_stream_available(&self, available: bool) {
        self.stream_available.store(available, Ordering::SeqCst);
    }

    /// Rejects the session on every endpoint from now on
    pub fn expire_session(&self) {
        self.session_valid.store(false, Ordering::SeqCst);
    }

    /// Number of stream requests received, successful or not
    pub fn stream_connects(&self) -> usize {
        self.stream_connects.load(Ordering::SeqCst)
    }

    /// `Last-Event-ID` header of every stream request, in arrival order
    pub fn stream_resume_ids(&self) -> Vec<Option<String>> {
        self.resume_ids.lock().unwrap().clone()
    }

    pub fn list_requests(&self) -> usize {
        self.list_requests.load(Ordering::SeqCst)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if !self.session_valid.load(Ordering::SeqCst) {
            return false;
        }
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.split(';').any(|c| c.trim() == SESSION_COOKIE))
    }

    fn mutation_status(&self) -> Option<StatusCode> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        } else {
            None
        }
    }
}

type SharedBackend = Arc<MockBackend>;

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Session expired"})),
    )
        .into_response()
}

async fn list_notifications(State(backend): State<SharedBackend>, headers: HeaderMap) -> Response {
    backend.list_requests.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let records = backend.records();
    let format = *backend.list_format.lock().unwrap();
    match format {
        ListFormat::Bare => Json(records).into_response(),
        ListFormat::DataEnvelope => Json(serde_json::json!({ "data": records })).into_response(),
        ListFormat::NotificationsEnvelope => {
            Json(serde_json::json!({ "notifications": records })).into_response()
        }
    }
}

async fn unread_count(State(backend): State<SharedBackend>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let count = backend.records().iter().filter(|n| !n.is_read).count();
    Json(serde_json::json!({ "count": count })).into_response()
}

async fn mark_read(
    State(backend): State<SharedBackend>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    if let Some(status) = backend.mutation_status() {
        return status.into_response();
    }
    let mut notifications = backend.notifications.lock().unwrap();
    match notifications.iter_mut().find(|n| n.id == id) {
        Some(record) => {
            record.is_read = true;
            StatusCode::NO_CONTENT.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn mark_all_read(State(backend): State<SharedBackend>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    if let Some(status) = backend.mutation_status() {
        return status.into_response();
    }
    for record in backend.notifications.lock().unwrap().iter_mut() {
        record.is_read = true;
    }
    Json(serde_json::json!({ "success": true })).into_response()
}

async fn delete_notification(
    State(backend): State<SharedBackend>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    if let Some(status) = backend.mutation_status() {
        return status.into_response();
    }
    let mut notifications = backend.notifications.lock().unwrap();
    let before = notifications.len();
    notifications.retain(|n| n.id != id);
    if notifications.len() == before {
        StatusCode::NOT_FOUND.into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

fn push_stream(
    receiver: broadcast::Receiver<Push>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let greeting = stream::once(async { Ok::<_, Infallible>(Event::default().comment("connected")) });

    let pushes = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(Push::Event { name, id, data }) => {
                    let mut event = Event::default().data(data);
                    if let Some(name) = name {
                        event = event.event(name);
                    }
                    if let Some(id) = id {
                        event = event.id(id);
                    }
                    return Some((Ok::<_, Infallible>(event), receiver));
                }
                Ok(Push::Disconnect) | Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    });

    futures::StreamExt::chain(greeting, pushes)
}

async fn notification_stream(State(backend): State<SharedBackend>, headers: HeaderMap) -> Response {
    let resume_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    backend.resume_ids.lock().unwrap().push(resume_id);
    backend.stream_connects.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    if !backend.stream_available.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    // Subscribe before answering so no push sent after the client saw the
    // response can be missed.
    Sse::new(push_stream(backend.pushes.subscribe())).into_response()
}

async fn health() -> &'static str {
    "ok"
}

fn make_app(backend: SharedBackend) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/stream", get(notification_stream))
        .route("/api/notifications/{id}/read", patch(mark_read))
        .route("/api/notifications/{id}", delete(delete_notification))
        .with_state(backend)
}

/// Mock backend instance bound to a random port
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL of the server (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Backend state for seeding and inspection
    pub backend: Arc<MockBackend>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a backend seeded with the standard fixtures
    pub async fn spawn() -> Self {
        Self::spawn_with(seeded_notifications()).await
    }

    /// Spawns a backend seeded with `notifications`
    ///
    /// # Panics
    ///
    /// Panics if the port cannot be bound or the server does not become
    /// ready within the timeout.
    pub async fn spawn_with(notifications: Vec<NotificationRecord>) -> Self {
        let backend = Arc::new(MockBackend::new(notifications));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = make_app(backend.clone());
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            backend,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// API base URL clients should be configured with
    pub fn api_base_url(&self) -> String {
        format!("{}/api", self.base_url)
    }

    /// Client configuration pointing at this backend
    pub fn config(&self, max_attempts: u32) -> AppConfig {
        let cli = CliConfig {
            api_base_url: Some(self.api_base_url()),
            session_cookie: Some(SESSION_COOKIE.to_string()),
            request_timeout_sec: REQUEST_TIMEOUT_SECS,
            max_reconnect_attempts: max_attempts,
            retry_delay_ms: TEST_RETRY_DELAY_MS,
            ..Default::default()
        };
        AppConfig::resolve(&cli, None).expect("Failed to resolve test config")
    }

    /// Notification center wired to this backend over HTTP
    pub fn center(&self, max_attempts: u32) -> NotificationCenter {
        NotificationCenter::from_config(&self.config(max_attempts))
            .expect("Failed to create notification center")
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
