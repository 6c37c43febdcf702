//! Notification store, state transitions and the REST backend behind them.

pub mod api;
pub mod http_backend;
pub mod inbox;
pub mod models;
pub mod store;


pub use api::{ApiError, NotificationApi, TicketApi};
pub use http_backend::HttpBackend;
pub use inbox::NotificationInbox;
pub use models::{Notification, NotificationId};
pub use store::{InboxSnapshot, NotificationStore, RefetchOutcome};
