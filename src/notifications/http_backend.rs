//! HTTP client for the notification and ticket REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, warn};
use urlencoding::encode;

use super::api::{ApiError, NotificationApi, TicketApi};
use super::models::{Notification, NotificationId};
use crate::metrics;
use crate::session::Session;

#[derive(Serialize)]
struct StatusUpdate<'a> {
    status: &'a str,
}

/// Talks to the backend over HTTP, authenticating every call with the
/// session's bearer credential.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a new backend client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the backend (e.g., "http://localhost:8080")
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn user_url(&self, session: &Session) -> String {
        format!(
            "{}/v1/notifications/user/{}",
            self.base_url,
            encode(session.identity().as_str())
        )
    }

    fn notification_url(&self, id: &NotificationId) -> String {
        format!("{}/v1/notifications/{}", self.base_url, encode(id.as_str()))
    }

    async fn execute(
        &self,
        operation: &'static str,
        session: &Session,
        request: RequestBuilder,
    ) -> Result<Response, ApiError> {
        let credential = session
            .require_credential()
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;

        let result = match request.bearer_auth(credential.expose()).send().await {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => Err(ApiError::Status {
                operation,
                status: response.status().as_u16(),
            }),
            Err(e) => Err(ApiError::Request(e)),
        };

        if let Err(e) = &result {
            warn!("{} for {} failed: {}", operation, session.identity(), e);
            metrics::record_rest_failure(operation);
        }
        result
    }
}

#[async_trait]
impl NotificationApi for HttpBackend {
    async fn fetch_notifications(&self, session: &Session) -> Result<Vec<Notification>, ApiError> {
        let url = self.user_url(session);
        debug!("GET {}", url);
        let response = self
            .execute("fetch_notifications", session, self.client.get(&url))
            .await?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            metrics::record_rest_failure("fetch_notifications");
            ApiError::Decode(e.to_string())
        })
    }

    async fn mark_read(&self, session: &Session, id: &NotificationId) -> Result<(), ApiError> {
        let url = format!("{}/read", self.notification_url(id));
        debug!("PATCH {}", url);
        self.execute("mark_read", session, self.client.patch(&url))
            .await?;
        Ok(())
    }

    async fn mark_all_read(&self, session: &Session) -> Result<(), ApiError> {
        let url = format!("{}/read-all", self.user_url(session));
        debug!("PATCH {}", url);
        self.execute("mark_all_read", session, self.client.patch(&url))
            .await?;
        Ok(())
    }

    async fn delete(&self, session: &Session, id: &NotificationId) -> Result<(), ApiError> {
        let url = self.notification_url(id);
        debug!("DELETE {}", url);
        self.execute("delete", session, self.client.delete(&url))
            .await?;
        Ok(())
    }

    async fn delete_all(&self, session: &Session) -> Result<(), ApiError> {
        let url = self.user_url(session);
        debug!("DELETE {}", url);
        self.execute("delete_all", session, self.client.delete(&url))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TicketApi for HttpBackend {
    async fn update_status(
        &self,
        session: &Session,
        ticket_id: &str,
        status: &str,
    ) -> Result<(), ApiError> {
        let url = format!("{}/v1/tickets/{}/status", self.base_url, encode(ticket_id));
        debug!("PATCH {}", url);
        let request = self.client.patch(&url).json(&StatusUpdate { status });
        self.execute("update_status", session, request).await?;
        Ok(())
    }
}
