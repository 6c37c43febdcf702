//! Scriptable in-memory broker transport for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::messages::InboundFrame;
use super::transport::{BrokerConnection, BrokerTransport, Topic, TransportError};
use crate::session::Session;

enum Script {
    Frame(InboundFrame),
    Drop,
}

#[derive(Default)]
struct FakeState {
    log: Vec<String>,
    connect_count: usize,
    failing_connects: usize,
    flapping_connects: usize,
    stalled: bool,
    current: Option<mpsc::UnboundedSender<Script>>,
    last_token: Option<String>,
}

/// Records every call and lets tests inject frames into the live connection.
#[derive(Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().unwrap().failing_connects = count;
    }

    /// Accept the next `count` connections but drop each one right after it
    /// is established.
    pub fn flap_next_connects(&self, count: usize) {
        self.state.lock().unwrap().flapping_connects = count;
    }

    /// Make ping, unsubscribe and close on live connections never complete.
    pub fn stall_sends(&self, stalled: bool) {
        self.state.lock().unwrap().stalled = stalled;
    }

    /// Deliver a frame on `topic` through the current connection.
    pub fn push(&self, topic: &str) {
        self.send(Script::Frame(InboundFrame::Delivery {
            topic: topic.to_string(),
        }));
    }

    pub fn push_frame(&self, frame: InboundFrame) {
        self.send(Script::Frame(frame));
    }

    /// Simulate the peer going away.
    pub fn drop_connection(&self) {
        self.send(Script::Drop);
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_count
    }

    pub fn last_token(&self) -> Option<String> {
        self.state.lock().unwrap().last_token.clone()
    }

    fn send(&self, script: Script) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = &state.current {
            let _ = tx.send(script);
        }
    }
}

#[async_trait]
impl BrokerTransport for FakeTransport {
    async fn connect(
        &self,
        endpoint: &str,
        session: &Session,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connect_count += 1;
        state.log.push(format!("connect {}", endpoint));
        state.last_token = session.credential().map(|c| c.expose().to_string());

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Closed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if state.flapping_connects > 0 {
            state.flapping_connects -= 1;
            let _ = tx.send(Script::Drop);
        }
        state.current = Some(tx);
        Ok(Box::new(FakeConnection {
            rx,
            state: self.state.clone(),
        }))
    }
}

struct FakeConnection {
    rx: mpsc::UnboundedReceiver<Script>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnection {
    fn record(&self, entry: String) {
        self.state.lock().unwrap().log.push(entry);
    }

    async fn stall_if_requested(&self) {
        let stalled = self.state.lock().unwrap().stalled;
        if stalled {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn subscribe(&mut self, topic: &Topic) -> Result<(), TransportError> {
        self.record(format!("subscribe {}", topic));
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &Topic) -> Result<(), TransportError> {
        self.stall_if_requested().await;
        self.record(format!("unsubscribe {}", topic));
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.stall_if_requested().await;
        self.record("ping".to_string());
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        match self.rx.recv().await {
            Some(Script::Frame(frame)) => Some(Ok(frame)),
            Some(Script::Drop) | None => None,
        }
    }

    async fn close(&mut self) {
        self.stall_if_requested().await;
        self.record("close".to_string());
    }
}
