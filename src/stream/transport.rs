//! Push transport: where SSE events come from.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, COOKIE};
use reqwest::StatusCode;
use tracing::{info, warn};

use super::sse::{SseEvent, SseParser};
use super::StreamError;

/// Live event stream of one connection. Ends when the connection drops.
pub type EventStream = BoxStream<'static, Result<SseEvent, StreamError>>;

/// Opens push connections.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Connect and return the event stream once the server accepted it.
    async fn connect(&self) -> Result<EventStream, StreamError>;
}

/// Header a reconnecting client uses to ask for the events it missed.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// SSE over HTTP, with the session cookie attached.
///
/// The last event id seen on any connection is kept and sent back as
/// `Last-Event-ID` when connecting again.
pub struct HttpSseTransport {
    client: reqwest::Client,
    url: String,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl HttpSseTransport {
    /// Create a new transport.
    ///
    /// `connect_timeout` bounds connection setup only; the stream itself is
    /// long-lived and has no overall timeout.
    pub fn new(
        url: String,
        session_cookie: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, StreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(cookie) = session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| StreamError::Config(format!("invalid session cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StreamError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url,
            last_event_id: Arc::new(Mutex::new(None)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Id the next connection resumes from, if the server sent any.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    fn resume_header(&self) -> Option<HeaderValue> {
        let id = self.last_event_id().filter(|id| !id.is_empty())?;
        match HeaderValue::from_str(&id) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Not resuming from event id {:?}: not a valid header value", id);
                None
            }
        }
    }
}

fn remember_event_id(slot: &Mutex<Option<String>>, id: &str) {
    if let Ok(mut current) = slot.lock() {
        if current.as_deref() != Some(id) {
            *current = Some(id.to_string());
        }
    }
}

#[async_trait]
impl PushTransport for HttpSseTransport {
    async fn connect(&self) -> Result<EventStream, StreamError> {
        info!("Connecting to notification stream: {}", self.url);

        let mut request = self.client.get(&self.url);
        if let Some(id) = self.resume_header() {
            info!("Resuming notification stream after event {:?}", id);
            request = request.header(LAST_EVENT_ID_HEADER, id);
        }
        let response = request.send().await.map_err(StreamError::Connect)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(StreamError::Unauthorized),
            status => return Err(StreamError::Status(status)),
        }

        let mut parser = SseParser::new();
        let last_event_id = Arc::clone(&self.last_event_id);
        let events = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => {
                    let events = parser.feed(&bytes);
                    if let Some(id) = parser.last_event_id() {
                        remember_event_id(&last_event_id, id);
                    }
                    events.into_iter().map(Ok).collect::<Vec<_>>()
                }
                Err(e) => vec![Err(StreamError::Read(e))],
            })
            .flat_map(stream::iter)
            .boxed();

        Ok(events)
    }
}
