//! Broker transport abstraction.
//!
//! A transport opens one bidirectional connection to the broker. It reports
//! failures but never retries; reconnect policy lives in the subscription
//! manager.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use super::messages::InboundFrame;
use crate::session::{Identity, Session};

/// Lifecycle of the broker connection.
///
/// `Disconnected` is reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a broker transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Credential cannot be sent as a header")]
    InvalidCredential,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("Connect timed out")]
    Timeout,

    #[error("Connection closed")]
    Closed,
}

/// Broker topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// The per-identity notification topic, `notifications/{identity}`.
    pub fn for_identity(identity: &Identity) -> Self {
        Self(format!("notifications/{}", identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opens connections to the broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open a session with the broker at `endpoint`, completing any upgrade
    /// handshake the transport needs. No application data is sent.
    async fn connect(
        &self,
        endpoint: &str,
        session: &Session,
    ) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// One open broker connection.
#[async_trait]
pub trait BrokerConnection: Send {
    async fn subscribe(&mut self, topic: &Topic) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, topic: &Topic) -> Result<(), TransportError>;

    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Wait for the next inbound frame.
    ///
    /// Returns `None` once the peer closed the connection.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;

    /// Close the connection. Errors are swallowed.
    async fn close(&mut self);
}
