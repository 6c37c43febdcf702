//! Ticket status update command.
//!
//! Submitting a status change is fire-and-forget with respect to
//! notifications: the backend publishes the resulting push on the recipient's
//! topic, which may belong to a different identity than the caller's.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::NotifyError;
use crate::notifications::TicketApi;
use crate::session::Session;

pub struct StatusUpdateDispatcher {
    api: Arc<dyn TicketApi>,
}

impl StatusUpdateDispatcher {
    pub fn new(api: Arc<dyn TicketApi>) -> Self {
        Self { api }
    }

    /// Submit `new_status` for `ticket_id`.
    ///
    /// Empty arguments fail before any network call. Success does not wait
    /// for, or trigger, a notification refetch.
    pub async fn update_status(
        &self,
        session: &Session,
        ticket_id: &str,
        new_status: &str,
    ) -> Result<(), NotifyError> {
        let ticket_id = ticket_id.trim();
        let new_status = new_status.trim();
        if ticket_id.is_empty() {
            return Err(NotifyError::Validation("ticket id is required".to_string()));
        }
        if new_status.is_empty() {
            return Err(NotifyError::Validation("status is required".to_string()));
        }
        session.require_credential()?;

        match self.api.update_status(session, ticket_id, new_status).await {
            Ok(()) => {
                info!("Ticket {} status set to {}", ticket_id, new_status);
                Ok(())
            }
            Err(e) => {
                warn!("Status update for ticket {} failed: {}", ticket_id, e);
                Err(e.into())
            }
        }
    }
}
