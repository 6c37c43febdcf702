//! Read/unread/deleted transitions of the bound identity's notifications.
//!
//! Every mutation is a REST call followed by a full refetch; the cache is
//! never patched locally. A failed call leaves the cache untouched.

use std::sync::Arc;

use tracing::{debug, warn};

use super::api::NotificationApi;
use super::models::{Notification, NotificationId};
use super::store::NotificationStore;
use crate::error::NotifyError;
use crate::session::Identity;

pub struct NotificationInbox {
    api: Arc<dyn NotificationApi>,
    store: Arc<NotificationStore>,
}

impl NotificationInbox {
    pub fn new(api: Arc<dyn NotificationApi>, store: Arc<NotificationStore>) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// Mark one notification read, then refetch.
    pub async fn mark_read(&self, id: &NotificationId) -> Result<Vec<Notification>, NotifyError> {
        let session = self.store.session()?;
        debug!("Marking {} read for {}", id, session.identity());
        self.api
            .mark_read(&session, id)
            .await
            .inspect_err(|e| warn!("mark_read {} failed: {}", id, e))?;
        self.store.refetch(session.identity()).await
    }

    /// Mark every notification of `identity` read, then refetch.
    pub async fn mark_all_read(
        &self,
        identity: &Identity,
    ) -> Result<Vec<Notification>, NotifyError> {
        let session = self.store.session_for(identity)?;
        debug!("Marking all notifications read for {}", identity);
        self.api
            .mark_all_read(&session)
            .await
            .inspect_err(|e| warn!("mark_all_read for {} failed: {}", identity, e))?;
        self.store.refetch(identity).await
    }

    /// Delete one notification, then refetch.
    pub async fn delete(&self, id: &NotificationId) -> Result<Vec<Notification>, NotifyError> {
        let session = self.store.session()?;
        debug!("Deleting {} for {}", id, session.identity());
        self.api
            .delete(&session, id)
            .await
            .inspect_err(|e| warn!("delete {} failed: {}", id, e))?;
        self.store.refetch(session.identity()).await
    }

    /// Delete every notification of `identity`, then refetch.
    pub async fn delete_all(&self, identity: &Identity) -> Result<Vec<Notification>, NotifyError> {
        let session = self.store.session_for(identity)?;
        debug!("Deleting all notifications for {}", identity);
        self.api
            .delete_all(&session)
            .await
            .inspect_err(|e| warn!("delete_all for {} failed: {}", identity, e))?;
        self.store.refetch(identity).await
    }

    /// Derived from the cache as last refetched.
    pub fn has_unread(&self) -> bool {
        self.store.has_unread()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }
}
