//! Real-time ticket-status notification client.
//!
//! A broker subscription per identity signals changes; the notification store
//! reconciles by refetching the authoritative list over REST.

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod notifications;
pub mod pipeline;
pub mod retry_policy;
pub mod session;

pub use broker::{BrokerSettings, ConnectionState, SubscriptionManager, WebSocketTransport};
pub use dispatcher::StatusUpdateDispatcher;
pub use error::NotifyError;
pub use notifications::{
    HttpBackend, InboxSnapshot, Notification, NotificationId, NotificationInbox,
    NotificationStore,
};
pub use pipeline::NotificationPipeline;
pub use session::{Credential, Identity, Session};
