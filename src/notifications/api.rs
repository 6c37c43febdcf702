//! REST boundary of the notification backend.
//!
//! The pipeline only talks to the backend through these traits, so the store,
//! inbox and dispatcher can be exercised against in-memory fakes.

use async_trait::async_trait;
use thiserror::Error;

use super::models::{Notification, NotificationId};
use crate::session::Session;

/// Errors returned by REST calls against the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Read and mutate the notifications of an identity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// All notifications for the session's identity, in backend order.
    async fn fetch_notifications(&self, session: &Session) -> Result<Vec<Notification>, ApiError>;

    async fn mark_read(&self, session: &Session, id: &NotificationId) -> Result<(), ApiError>;

    async fn mark_all_read(&self, session: &Session) -> Result<(), ApiError>;

    async fn delete(&self, session: &Session, id: &NotificationId) -> Result<(), ApiError>;

    async fn delete_all(&self, session: &Session) -> Result<(), ApiError>;
}

/// Mutate ticket state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketApi: Send + Sync {
    async fn update_status(
        &self,
        session: &Session,
        ticket_id: &str,
        status: &str,
    ) -> Result<(), ApiError>;
}
