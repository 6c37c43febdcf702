//! Client-side notification store.
//!
//! The store mirrors the backend list for the bound identity. Every refresh is
//! a full REST read that replaces the cache; push events are only a signal to
//! refresh, so duplicate, lost or reordered pushes cannot make the cache drift.
//!
//! Refetches are serialized through a gate. A push that arrives while a
//! refetch is running only sets a dirty flag, and the running refetch loops
//! once more before releasing the gate.
//!
//! Every `bind`/`clear` bumps an epoch. A refetch that completes under an
//! older epoch is discarded instead of overwriting the new identity's cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::api::NotificationApi;
use super::models::Notification;
use crate::error::NotifyError;
use crate::metrics;
use crate::session::{Identity, Session};

/// Immutable view of the cache, published after every change.
#[derive(Debug, Clone, Default)]
pub struct InboxSnapshot {
    session: Option<Session>,
    /// Incremented on every bind/clear.
    pub epoch: u64,
    /// Backend order, never re-sorted.
    pub notifications: Vec<Notification>,
    /// When the last successful refetch was applied.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl InboxSnapshot {
    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(Session::identity)
    }

    /// True iff at least one cached notification is unread.
    pub fn has_unread(&self) -> bool {
        self.notifications.iter().any(|n| !n.is_read)
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }
}

/// What a push event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchOutcome {
    /// This call ran the refetch (and any follow-ups requested meanwhile).
    Refreshed,
    /// A refetch already in flight will pick this event up.
    Coalesced,
}

pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    snapshot: watch::Sender<InboxSnapshot>,
    refetch_gate: Mutex<()>,
    dirty: AtomicBool,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        let (snapshot, _) = watch::channel(InboxSnapshot::default());
        Self {
            api,
            snapshot,
            refetch_gate: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Bind the store to `session`, dropping whatever was cached for the
    /// previous identity. Results of refetches still in flight are discarded.
    pub fn bind(&self, session: Session) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.epoch += 1;
            info!(
                "Notification store bound to {} (epoch {})",
                session.identity(),
                snapshot.epoch
            );
            snapshot.session = Some(session);
            snapshot.notifications.clear();
            snapshot.refreshed_at = None;
        });
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Unbind and empty the cache.
    pub fn clear(&self) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.epoch += 1;
            snapshot.session = None;
            snapshot.notifications.clear();
            snapshot.refreshed_at = None;
        });
        self.dirty.store(false, Ordering::SeqCst);
        debug!("Notification store cleared");
    }

    /// The bound session, or `NotBound`.
    pub fn session(&self) -> Result<Session, NotifyError> {
        self.snapshot
            .borrow()
            .session
            .clone()
            .ok_or(NotifyError::NotBound)
    }

    /// The bound session, provided it belongs to `identity`.
    pub fn session_for(&self, identity: &Identity) -> Result<Session, NotifyError> {
        let session = self.session()?;
        if session.identity() != identity {
            debug!(
                "Rejecting operation for {} while bound to {}",
                identity,
                session.identity()
            );
            return Err(NotifyError::StaleIdentity(identity.clone()));
        }
        Ok(session)
    }

    /// Epoch of the current binding, provided it belongs to `identity`.
    fn epoch_for(&self, identity: &Identity) -> Result<u64, NotifyError> {
        let snapshot = self.snapshot.borrow();
        match snapshot.identity() {
            None => Err(NotifyError::NotBound),
            Some(bound) if bound != identity => {
                Err(NotifyError::StaleIdentity(identity.clone()))
            }
            Some(_) => Ok(snapshot.epoch),
        }
    }

    fn binding(&self) -> Result<(Identity, u64), NotifyError> {
        let snapshot = self.snapshot.borrow();
        let identity = snapshot.identity().cloned().ok_or(NotifyError::NotBound)?;
        Ok((identity, snapshot.epoch))
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Observe every applied change to the cache.
    pub fn subscribe(&self) -> watch::Receiver<InboxSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.snapshot.borrow().notifications.clone()
    }

    pub fn has_unread(&self) -> bool {
        self.snapshot.borrow().has_unread()
    }

    pub fn unread_count(&self) -> usize {
        self.snapshot.borrow().unread_count()
    }

    /// Replace the cache with a full read of `identity`'s notifications.
    ///
    /// On failure the previous cache stays in place. If the store is rebound
    /// while this call waits for a running refetch, nothing is fetched and
    /// `StaleIdentity` is returned.
    pub async fn refetch(&self, identity: &Identity) -> Result<Vec<Notification>, NotifyError> {
        let epoch = self.epoch_for(identity)?;
        let result = {
            let _gate = self.refetch_gate.lock().await;
            self.fetch_and_apply(identity, epoch).await
        };
        self.serve_pending().await;
        result
    }

    /// React to a push frame for `identity` by refetching.
    ///
    /// If a refetch is already running, the event is folded into a single
    /// follow-up refetch performed by that caller.
    pub async fn on_push_event(&self, identity: &Identity) -> Result<RefetchOutcome, NotifyError> {
        self.session_for(identity)?;
        self.dirty.store(true, Ordering::SeqCst);

        match self.serve_pending().await {
            Some(Ok(_)) => Ok(RefetchOutcome::Refreshed),
            Some(Err(e)) => Err(e),
            None => {
                metrics::PUSH_EVENTS_COALESCED_TOTAL.inc();
                debug!("Refetch for {} already in flight, coalescing", identity);
                Ok(RefetchOutcome::Coalesced)
            }
        }
    }

    /// Refetch while pushes are pending, unless another caller holds the
    /// gate; that caller re-checks the flag after releasing it.
    async fn serve_pending(&self) -> Option<Result<Vec<Notification>, NotifyError>> {
        let mut last = None;
        while self.dirty.load(Ordering::SeqCst) {
            let Ok(gate) = self.refetch_gate.try_lock() else {
                break;
            };
            while self.dirty.swap(false, Ordering::SeqCst) {
                last = Some(match self.binding() {
                    Ok((identity, epoch)) => self.fetch_and_apply(&identity, epoch).await,
                    Err(e) => Err(e),
                });
            }
            drop(gate);
        }
        last
    }

    /// Fetch and apply the list of `identity`, as bound at `epoch`.
    ///
    /// Must be called with the refetch gate held.
    async fn fetch_and_apply(
        &self,
        identity: &Identity,
        epoch: u64,
    ) -> Result<Vec<Notification>, NotifyError> {
        let session = {
            let snapshot = self.snapshot.borrow();
            if snapshot.epoch == epoch {
                snapshot.session.clone()
            } else {
                None
            }
        };
        let Some(session) = session else {
            metrics::record_refetch("stale");
            info!("Skipping refetch for {}: identity changed while queued", identity);
            return Err(NotifyError::StaleIdentity(identity.clone()));
        };

        let notifications = match self.api.fetch_notifications(&session).await {
            Ok(notifications) => notifications,
            Err(e) => {
                metrics::record_refetch("failed");
                warn!(
                    "Refetch for {} failed, keeping cached list: {}",
                    session.identity(),
                    e
                );
                return Err(e.into());
            }
        };

        let applied = self.snapshot.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch {
                return false;
            }
            snapshot.notifications = notifications.clone();
            snapshot.refreshed_at = Some(Utc::now());
            true
        });

        if !applied {
            metrics::record_refetch("stale");
            info!(
                "Dropping refetch result for {}: identity changed meanwhile",
                session.identity()
            );
            return Err(NotifyError::StaleIdentity(session.identity().clone()));
        }

        metrics::record_refetch("applied");
        debug!(
            "Applied {} notifications for {}",
            notifications.len(),
            session.identity()
        );
        Ok(notifications)
    }
}
