//! Wires the broker subscription to the notification store.
//!
//! One pipeline serves one identity at a time. Push events flow from the
//! subscription worker through a bounded channel into a pump task that asks
//! the store to refetch.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{BrokerSettings, BrokerTransport, ConnectionState, PushEvent, SubscriptionManager};
use crate::error::NotifyError;
use crate::metrics;
use crate::notifications::{
    InboxSnapshot, NotificationApi, NotificationInbox, NotificationStore, RefetchOutcome,
};
use crate::session::{Identity, Session};

pub struct NotificationPipeline {
    subscriptions: SubscriptionManager,
    store: Arc<NotificationStore>,
    inbox: NotificationInbox,
    event_channel_capacity: usize,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationPipeline {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        api: Arc<dyn NotificationApi>,
        settings: BrokerSettings,
        event_channel_capacity: usize,
    ) -> Self {
        let store = Arc::new(NotificationStore::new(api.clone()));
        Self {
            subscriptions: SubscriptionManager::new(transport, settings),
            inbox: NotificationInbox::new(api, store.clone()),
            store,
            event_channel_capacity: event_channel_capacity.max(1),
            pump: Mutex::new(None),
        }
    }

    /// Start serving `session`: bind the store, subscribe to the identity's
    /// topic and load the initial list.
    ///
    /// A running session for another identity is stopped first, so nothing
    /// of it stays subscribed or cached. A failed initial load is logged and
    /// left to the next push.
    pub async fn start(&self, session: Session) -> Result<(), NotifyError> {
        session.require_credential()?;

        let mut pump = self.pump.lock().await;
        self.shutdown(&mut pump).await;

        info!("Starting notification pipeline for {}", session.identity());
        self.store.bind(session.clone());

        let (events, receiver) = mpsc::channel(self.event_channel_capacity);
        *pump = Some(tokio::spawn(run_pump(self.store.clone(), receiver)));

        if let Err(e) = self.subscriptions.subscribe(&session, events).await {
            self.shutdown(&mut pump).await;
            return Err(e);
        }
        drop(pump);

        match self.store.refetch(session.identity()).await {
            Ok(list) => debug!("Initial load: {} notifications", list.len()),
            Err(e) if e.is_recoverable() => warn!("Initial notification load failed: {}", e),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Stop serving the current identity. Calling it while stopped is a no-op.
    pub async fn stop(&self) {
        let mut pump = self.pump.lock().await;
        self.shutdown(&mut pump).await;
    }

    async fn shutdown(&self, pump: &mut Option<JoinHandle<()>>) {
        self.subscriptions.unsubscribe().await;
        self.store.clear();
        // The worker owned the only sender, so the pump ends on its own once
        // an in-flight refetch returns; its result is dropped as stale.
        if pump.take().is_some() {
            debug!("Notification pump detached");
        }
    }

    /// Identity currently served, if any.
    pub fn identity(&self) -> Option<Identity> {
        self.store.snapshot().identity().cloned()
    }

    pub fn state(&self) -> ConnectionState {
        self.subscriptions.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.subscriptions.watch_state()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<InboxSnapshot> {
        self.store.subscribe()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }

    pub fn has_unread(&self) -> bool {
        self.store.has_unread()
    }
}

async fn run_pump(store: Arc<NotificationStore>, mut events: mpsc::Receiver<PushEvent>) {
    while let Some(event) = events.recv().await {
        // One refetch covers everything queued so far.
        let mut drained = 0u32;
        while events.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            metrics::PUSH_EVENTS_COALESCED_TOTAL.inc_by(f64::from(drained));
            debug!("Coalesced {} queued push events for {}", drained, event.identity);
        }

        match store.on_push_event(&event.identity).await {
            Ok(RefetchOutcome::Refreshed) => debug!("Refetched after push for {}", event.identity),
            Ok(RefetchOutcome::Coalesced) => {}
            Err(NotifyError::StaleIdentity(identity)) => {
                debug!("Dropped push for former identity {}", identity)
            }
            Err(e) => warn!("Refetch after push for {} failed: {}", event.identity, e),
        }
    }
    debug!("Notification pump stopped");
}
