//! HTTP implementation of the notification gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{GatewayError, NotificationGateway};
use crate::notifications::NotificationRecord;

/// Gateway talking to the backend's REST API with the session cookie attached.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

/// Shapes the backend uses for the notification list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NotificationList {
    Bare(Vec<NotificationRecord>),
    Data { data: Vec<NotificationRecord> },
    Notifications { notifications: Vec<NotificationRecord> },
}

impl NotificationList {
    fn into_records(self) -> Vec<NotificationRecord> {
        match self {
            NotificationList::Bare(records)
            | NotificationList::Data { data: records }
            | NotificationList::Notifications {
                notifications: records,
            } => records,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UnreadCount {
    #[serde(alias = "unreadCount")]
    count: u64,
}

impl HttpGateway {
    /// Create a new gateway.
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.example.com/api")
    /// * `timeout_sec` - Per-request timeout in seconds
    /// * `session_cookie` - Raw `Cookie` header value identifying the session
    pub fn new(
        base_url: String,
        timeout_sec: u64,
        session_cookie: Option<&str>,
    ) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| GatewayError::Config(format!("invalid session cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .default_headers(headers)
            .build()?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Map non-2xx responses to gateway errors.
    ///
    /// `id` is the notification the request targeted, used to report 404s.
    async fn expect_success(
        response: Response,
        id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match (status, id) {
            (StatusCode::UNAUTHORIZED, _) => {
                warn!("Notification API rejected the session, login required");
                Err(GatewayError::Unauthorized)
            }
            (StatusCode::NOT_FOUND, Some(id)) => Err(GatewayError::NotFound(id.to_string())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(GatewayError::Status { status, body })
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl NotificationGateway for HttpGateway {
    async fn fetch_all(&self) -> Result<Vec<NotificationRecord>, GatewayError> {
        let url = format!("{}/notifications", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = Self::expect_success(response, None).await?;

        let records = Self::decode::<NotificationList>(response)
            .await?
            .into_records();
        debug!("Fetched {} notifications", records.len());
        Ok(records)
    }

    async fn fetch_unread_count(&self) -> Result<u64, GatewayError> {
        let url = format!("{}/notifications/unread-count", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = Self::expect_success(response, None).await?;

        Ok(Self::decode::<UnreadCount>(response).await?.count)
    }

    async fn mark_read(&self, id: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/notifications/{}/read",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self.client.patch(&url).send().await?;
        Self::expect_success(response, Some(id)).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), GatewayError> {
        let url = format!("{}/notifications/read-all", self.base_url);
        let response = self.client.post(&url).send().await?;
        Self::expect_success(response, None).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/notifications/{}", self.base_url, urlencoding::encode(id));
        let response = self.client.delete(&url).send().await?;
        Self::expect_success(response, Some(id)).await?;
        Ok(())
    }
}
