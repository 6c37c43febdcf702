//! WebSocket broker transport.
//!
//! The connection is opened with an HTTP upgrade request carrying the bearer
//! credential; after that, frames are JSON text envelopes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{msg_types, ClientMessage, InboundFrame};
use super::transport::{BrokerConnection, BrokerTransport, Topic, TransportError};
use crate::session::Session;

/// Transport that talks to the broker over a WebSocket.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerTransport for WebSocketTransport {
    async fn connect(
        &self,
        endpoint: &str,
        session: &Session,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

        if let Some(credential) = session.credential() {
            let value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
                .map_err(|_| TransportError::InvalidCredential)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!("Connecting to broker WebSocket: {}", endpoint);
        let (stream, response) = connect_async(request).await?;
        debug!("Broker upgrade completed with status {}", response.status());

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// An upgraded broker connection.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketConnection {
    async fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(&message)?;
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for WebSocketConnection {
    async fn subscribe(&mut self, topic: &Topic) -> Result<(), TransportError> {
        debug!("Subscribing to {}", topic);
        self.send(ClientMessage::subscribe(topic.as_str())).await
    }

    async fn unsubscribe(&mut self, topic: &Topic) -> Result<(), TransportError> {
        debug!("Unsubscribing from {}", topic);
        self.send(ClientMessage::unsubscribe(topic.as_str())).await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.send(ClientMessage::empty(msg_types::PING)).await
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match InboundFrame::parse(text.as_str()) {
                    Ok(frame) => return Some(Ok(frame)),
                    Err(e) => {
                        warn!("Failed to parse broker message: {} - {}", e, text.as_str());
                    }
                },
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Broker WebSocket closed by server");
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
                _ => {}
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error while closing broker WebSocket: {}", e);
        }
    }
}
