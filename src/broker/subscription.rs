//! Topic subscription manager.
//!
//! Keeps exactly one live subscription to `notifications/{identity}` and
//! re-establishes it whenever the transport drops. Every frame on the topic is
//! forwarded as a [`PushEvent`] into a bounded channel; the frame content is
//! not inspected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::InboundFrame;
use super::transport::{BrokerConnection, BrokerTransport, ConnectionState, Topic, TransportError};
use crate::config::AppConfig;
use crate::error::NotifyError;
use crate::metrics;
use crate::retry_policy::RetryPolicy;
use crate::session::{Identity, Session};

/// Change signal received on the identity's topic.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub identity: Identity,
    pub received_at: DateTime<Utc>,
}

/// Connection settings for the subscription manager.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub endpoint: String,
    pub connect_timeout: Duration,
    /// `None` disables client heartbeats.
    pub heartbeat_interval: Option<Duration>,
    pub retry: RetryPolicy,
}

impl BrokerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.broker_url.clone(),
            connect_timeout: config.connect_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            retry: RetryPolicy::new(&config.reconnect),
        }
    }

    /// How long a connection must stay up before its drop no longer counts
    /// towards the retry budget.
    pub fn stable_after(&self) -> Duration {
        self.retry.max_backoff()
    }
}

struct ActiveSubscription {
    identity: Identity,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Maintains the single broker subscription bound to the current identity.
pub struct SubscriptionManager {
    transport: Arc<dyn BrokerTransport>,
    settings: BrokerSettings,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Mutex<Option<ActiveSubscription>>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn BrokerTransport>, settings: BrokerSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            settings,
            state: Arc::new(state),
            active: Mutex::new(None),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Identity of the live subscription, if any.
    pub async fn current_identity(&self) -> Option<Identity> {
        self.active.lock().await.as_ref().map(|a| a.identity.clone())
    }

    /// Whether a subscription worker is still running (it stops after
    /// `unsubscribe` or once the retry budget is exhausted).
    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    /// Subscribe to the topic of `session`'s identity, forwarding every frame
    /// into `events`.
    ///
    /// Any previous subscription is torn down first, so a stale identity never
    /// keeps receiving frames.
    pub async fn subscribe(
        &self,
        session: &Session,
        events: mpsc::Sender<PushEvent>,
    ) -> Result<(), NotifyError> {
        session.require_credential()?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(
                "Switching subscription from {} to {}",
                previous.identity,
                session.identity()
            );
            self.teardown(previous).await;
        }

        let identity = session.identity().clone();
        let shutdown = CancellationToken::new();
        let worker = SubscriptionWorker {
            transport: self.transport.clone(),
            settings: self.settings.clone(),
            state: self.state.clone(),
            session: session.clone(),
            topic: Topic::for_identity(&identity),
            events,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(worker.run());

        *active = Some(ActiveSubscription {
            identity,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Tear down the current subscription. Calling it when nothing is
    /// subscribed is a no-op.
    pub async fn unsubscribe(&self) {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(previous) => {
                info!("Unsubscribing {}", previous.identity);
                self.teardown(previous).await;
            }
            None => debug!("Unsubscribe requested with no active subscription"),
        }
    }

    async fn teardown(&self, mut subscription: ActiveSubscription) {
        subscription.shutdown.cancel();
        if let Err(e) = (&mut subscription.task).await {
            warn!("Subscription worker for {} failed: {}", subscription.identity, e);
        }
        set_state(&self.state, ConnectionState::Disconnected);
    }
}

fn set_state(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let changed = state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
    if changed {
        debug!("Broker connection state -> {}", next);
        metrics::BROKER_CONNECTED.set(i64::from(next == ConnectionState::Connected));
    }
}

/// How a connected session ended.
enum SessionEnd {
    Shutdown,
    /// The event receiver is gone; nobody is listening any more.
    ConsumerGone,
    Dropped(String),
}

enum PumpEvent {
    Shutdown,
    Heartbeat,
    Frame(Option<Result<InboundFrame, TransportError>>),
}

struct SubscriptionWorker {
    transport: Arc<dyn BrokerTransport>,
    settings: BrokerSettings,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Session,
    topic: Topic,
    events: mpsc::Sender<PushEvent>,
    shutdown: CancellationToken,
}

impl SubscriptionWorker {
    /// Connect, subscribe and pump frames; on failure wait with backoff and
    /// start over until shut down or out of retries.
    async fn run(self) {
        let mut failures: u32 = 0;
        let mut was_connected = false;

        loop {
            if failures > 0 {
                metrics::RECONNECT_ATTEMPTS_TOTAL.inc();
            }
            set_state(&self.state, ConnectionState::Connecting);

            let connected = tokio::select! {
                result = self.connect_and_subscribe() => result,
                _ = self.shutdown.cancelled() => break,
            };

            match connected {
                Ok(mut connection) => {
                    let connected_at = Instant::now();
                    set_state(&self.state, ConnectionState::Connected);
                    info!("Subscribed to {}", self.topic);

                    // Frames published while disconnected are not replayed.
                    let resync = if was_connected {
                        info!("Resubscribed to {}, requesting resync", self.topic);
                        self.forward()
                    } else {
                        None
                    };
                    was_connected = true;

                    let end = match resync {
                        Some(end) => end,
                        None => self.pump(connection.as_mut()).await,
                    };
                    match end {
                        SessionEnd::Shutdown => {
                            self.leave(connection.as_mut()).await;
                            break;
                        }
                        SessionEnd::ConsumerGone => {
                            debug!("Push consumer for {} went away", self.topic);
                            self.leave(connection.as_mut()).await;
                            break;
                        }
                        SessionEnd::Dropped(reason) => {
                            warn!("Broker connection for {} dropped: {}", self.topic, reason);
                            if connected_at.elapsed() >= self.settings.stable_after() {
                                failures = 0;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Broker connection for {} failed: {}", self.topic, e);
                }
            }

            set_state(&self.state, ConnectionState::Disconnected);

            if !self.settings.retry.should_retry(failures) {
                error!(
                    "Giving up on broker subscription {} after {} failed attempts",
                    self.topic,
                    failures + 1
                );
                break;
            }
            let delay = self.settings.retry.backoff(failures);
            failures += 1;
            info!(
                "Reconnecting to broker in {}ms (attempt {})",
                delay.as_millis(),
                failures
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        set_state(&self.state, ConnectionState::Disconnected);
        debug!("Subscription worker for {} stopped", self.topic);
    }

    async fn connect_and_subscribe(&self) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut connection = tokio::time::timeout(
            self.settings.connect_timeout,
            self.transport.connect(&self.settings.endpoint, &self.session),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        if let Err(e) = connection.subscribe(&self.topic).await {
            connection.close().await;
            return Err(e);
        }
        Ok(connection)
    }

    async fn pump(&self, connection: &mut dyn BrokerConnection) -> SessionEnd {
        let mut heartbeat = self
            .settings
            .heartbeat_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => PumpEvent::Shutdown,
                _ = next_tick(&mut heartbeat) => PumpEvent::Heartbeat,
                frame = connection.next_frame() => PumpEvent::Frame(frame),
            };

            match event {
                PumpEvent::Shutdown => return SessionEnd::Shutdown,
                PumpEvent::Heartbeat => {
                    let ping = tokio::time::timeout(self.settings.connect_timeout, connection.ping());
                    let sent = tokio::select! {
                        _ = self.shutdown.cancelled() => return SessionEnd::Shutdown,
                        sent = ping => sent,
                    };
                    match sent {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            return SessionEnd::Dropped(format!("heartbeat failed: {}", e));
                        }
                        Err(_) => return SessionEnd::Dropped("heartbeat timed out".to_string()),
                    }
                }
                PumpEvent::Frame(None) => {
                    return SessionEnd::Dropped("closed by peer".to_string());
                }
                PumpEvent::Frame(Some(Err(e))) => return SessionEnd::Dropped(e.to_string()),
                PumpEvent::Frame(Some(Ok(frame))) => {
                    if let Some(end) = self.handle_frame(frame) {
                        return end;
                    }
                }
            }
        }
    }

    fn handle_frame(&self, frame: InboundFrame) -> Option<SessionEnd> {
        match frame {
            InboundFrame::Delivery { topic } if topic == self.topic.as_str() => {
                metrics::PUSH_EVENTS_TOTAL.inc();
                return self.forward();
            }
            InboundFrame::Delivery { topic } => {
                debug!("Ignoring frame for foreign topic {}", topic);
            }
            InboundFrame::Connected => debug!("Broker acknowledged connection"),
            InboundFrame::Pong => debug!("Broker heartbeat acknowledged"),
            InboundFrame::Error { code, message } => {
                warn!("Broker reported error {}: {}", code, message);
            }
            InboundFrame::Unknown(msg_type) => {
                debug!("Ignoring broker message of type {}", msg_type);
            }
        }
        None
    }

    /// Hand a push event to the consumer without waiting.
    fn forward(&self) -> Option<SessionEnd> {
        let event = PushEvent {
            identity: self.session.identity().clone(),
            received_at: Utc::now(),
        };
        match self.events.try_send(event) {
            Ok(()) => debug!("Push event on {}", self.topic),
            Err(TrySendError::Full(_)) => {
                // A pending event already guarantees a refetch.
                metrics::PUSH_EVENTS_COALESCED_TOTAL.inc();
                debug!("Push event on {} coalesced", self.topic);
            }
            Err(TrySendError::Closed(_)) => return Some(SessionEnd::ConsumerGone),
        }
        None
    }

    /// Unsubscribe and close, giving each send at most the connect timeout.
    async fn leave(&self, connection: &mut dyn BrokerConnection) {
        let limit = self.settings.connect_timeout;
        match tokio::time::timeout(limit, connection.unsubscribe(&self.topic)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to unsubscribe from {}: {}", self.topic, e),
            Err(_) => debug!("Unsubscribe from {} timed out", self.topic),
        }
        if tokio::time::timeout(limit, connection.close()).await.is_err() {
            debug!("Closing connection for {} timed out", self.topic);
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
