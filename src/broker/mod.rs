//! Broker side of the pipeline: transport, wire messages and the topic
//! subscription manager.

pub mod messages;
pub mod subscription;
pub mod transport;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use subscription::{BrokerSettings, PushEvent, SubscriptionManager};
pub use transport::{BrokerConnection, BrokerTransport, ConnectionState, Topic, TransportError};
pub use websocket::WebSocketTransport;
