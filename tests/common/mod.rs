#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use signalr_jabbr::config::ConnectionConfig;
use signalr_jabbr::connection::{Connection, KeepAliveMonitor};
use signalr_jabbr::log::MemorySink;
use signalr_jabbr::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Responder = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Transport that records every call and never touches the network.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<&'static str>>,
    sent: Mutex<Vec<Value>>,
    keep_alive: bool,
    fail_start: bool,
    fail_abort: bool,
    gate: Option<Arc<Notify>>,
    responder: Option<Responder>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// `start` waits for the gate to be notified before reporting ready.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Answers every sent message for which `respond` returns a frame.
    pub fn responding<F>(mut self, respond: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(respond));
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn start_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == "start").count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_keep_alive(&self) -> bool {
        self.keep_alive
    }

    async fn start(&self, _connection: &Connection) -> Result<(), TransportError> {
        self.calls.lock().push("start");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_start {
            return Err(TransportError::new("mock", "refused"));
        }
        Ok(())
    }

    async fn send(&self, connection: &Connection, data: &Value) -> Result<(), TransportError> {
        self.calls.lock().push("send");
        self.sent.lock().push(data.clone());
        if let Some(reply) = self.responder.as_ref().and_then(|respond| respond(data)) {
            connection.handle_received(reply);
        }
        Ok(())
    }

    async fn stop(&self, _connection: &Connection) -> Result<(), TransportError> {
        self.calls.lock().push("stop");
        Ok(())
    }

    async fn abort(
        &self,
        _connection: &Connection,
        _asynchronous: bool,
    ) -> Result<(), TransportError> {
        self.calls.lock().push("abort");
        if self.fail_abort {
            return Err(TransportError::new("mock", "abort failed"));
        }
        Ok(())
    }
}

/// Keep-alive monitor that only records when it is driven.
#[derive(Default)]
pub struct RecordingMonitor {
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingMonitor {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl KeepAliveMonitor for RecordingMonitor {
    fn monitor(&self, _connection: &Connection) {
        self.calls.lock().push("monitor");
    }

    fn stop_monitoring(&self, _connection: &Connection) {
        self.calls.lock().push("stop_monitoring");
    }
}

pub fn negotiate_body(keep_alive: Option<f64>, protocol_version: &str) -> Value {
    json!({
        "Url": "/signalr",
        "ConnectionId": "0b6e3c2a-connection",
        "WebSocketServerUrl": null,
        "DisconnectTimeout": 40.0,
        "KeepAlive": keep_alive,
        "ProtocolVersion": protocol_version
    })
}

/// Serves `GET /signalr/negotiate` with the given body.
pub async fn negotiate_server(body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/signalr/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

pub fn config_for(server: &MockServer) -> ConnectionConfig {
    ConnectionConfig::builder(format!("{}/signalr", server.uri()))
        .logging(true)
        .build()
}

pub fn connection_for(server: &MockServer) -> (Connection, MemorySink, Arc<RecordingMonitor>) {
    let sink = MemorySink::new();
    let monitor = Arc::new(RecordingMonitor::default());
    let connection =
        Connection::with_collaborators(config_for(server), Arc::new(sink.clone()), monitor.clone())
            .unwrap();
    (connection, sink, monitor)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
