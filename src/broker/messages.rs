//! Broker message types.
//!
//! Defines the message envelope exchanged with the broker over the WebSocket.
//! Topic payloads are carried as JSON values and never interpreted by the
//! notification pipeline.

use serde::{Deserialize, Serialize};

/// Server -> Client message envelope.
///
/// The `msg_type` field is used for routing ("connected", "message", "pong", "error").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Client -> Server message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ClientMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Create a client message with a null payload.
    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn subscribe(topic: &str) -> Self {
        Self::new(msg_types::SUBSCRIBE, payloads::TopicRequest::new(topic))
    }

    pub fn unsubscribe(topic: &str) -> Self {
        Self::new(msg_types::UNSUBSCRIBE, payloads::TopicRequest::new(topic))
    }
}

/// Reserved message type constants.
pub mod msg_types {
    /// Sent by server once the upgraded connection is ready.
    pub const CONNECTED: &str = "connected";
    /// Client request to start receiving a topic.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Client request to stop receiving a topic.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Topic delivery (server -> client).
    pub const MESSAGE: &str = "message";
    /// Client heartbeat request.
    pub const PING: &str = "ping";
    /// Server heartbeat response.
    pub const PONG: &str = "pong";
    /// Server error response.
    pub const ERROR: &str = "error";
}

/// Payload shapes for the reserved message types.
pub mod payloads {
    use serde::{Deserialize, Serialize};

    /// Payload of `subscribe` / `unsubscribe`.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct TopicRequest {
        pub topic: String,
    }

    impl TopicRequest {
        pub fn new(topic: impl Into<String>) -> Self {
            Self {
                topic: topic.into(),
            }
        }
    }

    /// Payload of `message`. The body is opaque to the client.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Delivery {
        pub topic: String,
        #[serde(default)]
        pub body: serde_json::Value,
    }

    /// Payload of `error`.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Error {
        pub code: String,
        pub message: String,
    }
}

/// Decoded inbound frame, as seen by the subscription manager.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Connected,
    /// A frame arrived on `topic`. Its content is deliberately dropped.
    Delivery { topic: String },
    Pong,
    Error { code: String, message: String },
    /// Any message type this client does not know about.
    Unknown(String),
}

impl InboundFrame {
    /// Decode a server envelope into a frame.
    pub fn from_message(message: ServerMessage) -> Result<Self, serde_json::Error> {
        let frame = match message.msg_type.as_str() {
            msg_types::CONNECTED => InboundFrame::Connected,
            msg_types::PONG => InboundFrame::Pong,
            msg_types::MESSAGE => {
                let delivery: payloads::Delivery = serde_json::from_value(message.payload)?;
                InboundFrame::Delivery {
                    topic: delivery.topic,
                }
            }
            msg_types::ERROR => {
                let error: payloads::Error = serde_json::from_value(message.payload)?;
                InboundFrame::Error {
                    code: error.code,
                    message: error.message,
                }
            }
            _ => InboundFrame::Unknown(message.msg_type),
        };
        Ok(frame)
    }

    /// Parse a text frame straight from the wire.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let message: ServerMessage = serde_json::from_str(text)?;
        Self::from_message(message)
    }
}
