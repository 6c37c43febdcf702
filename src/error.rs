//! Error taxonomy of the notification pipeline.

use thiserror::Error;

use crate::broker::TransportError;
use crate::notifications::ApiError;
use crate::session::Identity;

/// Errors surfaced by the notification pipeline.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Connecting or subscribing to the broker failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A REST call against the notification backend failed.
    #[error("Fetch error: {0}")]
    Fetch(#[from] ApiError),

    /// Input rejected locally, before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation targets an identity that is no longer the active one.
    #[error("Stale identity: {0} is not the active identity")]
    StaleIdentity(Identity),

    #[error("No credential present for the current session")]
    MissingCredential,

    #[error("No session is bound")]
    NotBound,
}

impl NotifyError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NotifyError::Transport(_) | NotifyError::Fetch(_))
    }
}
