//! SignalR client connection management.
//!
//! This module handles the connection lifecycle:
//! - Negotiating connection parameters with the server,
//! - Driving the Disconnected → Connecting → Connected state machine,
//! - Delegating I/O to the configured [`Transport`],
//! - Publishing lifecycle and inbound-data events,
//! - Guaranteed cleanup on stop.

pub mod bus;
pub mod keep_alive;
pub mod state;

pub use bus::{ConnectionEvent, EventBus, EventKind, SubscriptionId};
pub use keep_alive::{IntervalKeepAlive, KeepAliveData, KeepAliveMonitor};
pub use state::{ConnectionState, StateChange};

use crate::{
    config::ConnectionConfig,
    error::SignalRError,
    log::{format_line, LogSink, TracingSink},
    negotiate::negotiate,
    transport::Transport,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Parameters established by the last successful negotiation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// URL scheme of the endpoint, e.g. `http`.
    pub protocol: String,
    /// Host and optional port of the endpoint.
    pub host: String,
    /// `<protocol>://<host>`.
    pub base_url: String,
    pub connection_id: Option<String>,
    pub app_relative_url: Option<String>,
    pub web_socket_server_url: Option<String>,
    pub disconnect_timeout: Option<Duration>,
    pub protocol_version: Option<String>,
    pub keep_alive: KeepAliveData,
}

/// Options for [`Connection::start`].
pub struct StartOptions {
    transport: Arc<dyn Transport>,
    callback: Option<Box<dyn FnOnce(&Connection) + Send>>,
}

impl StartOptions {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            callback: None,
        }
    }

    /// Runs once the connection has started, before `start` returns.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Connection) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

struct Lifecycle {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    /// Bumped on every move into Connecting; a `start` owns the lifecycle
    /// only while this still matches the value it began with.
    attempt: u64,
}

impl Lifecycle {
    fn is_attempt(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.state == ConnectionState::Connecting
    }
}

struct Inner {
    config: ConnectionConfig,
    url: Url,
    http: reqwest::Client,
    sink: Arc<dyn LogSink>,
    keep_alive: Arc<dyn KeepAliveMonitor>,
    bus: EventBus,
    lifecycle: Mutex<Lifecycle>,
    session: Mutex<Session>,
    last_message_at: Mutex<Instant>,
}

/// One logical SignalR session.
///
/// `Connection` is a cheap, cloneable handle; clones share the same session.
///
/// # Example
///
/// ```no_run
/// use signalr_jabbr::config::ConnectionConfig;
/// use signalr_jabbr::connection::{Connection, StartOptions};
/// # use signalr_jabbr::transport::Transport;
/// # use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
/// let conn = Connection::new(ConnectionConfig::builder("http://localhost:16418/signalr").build())?;
/// conn.received(|_, data| println!("received {data}"));
/// conn.start(StartOptions::new(transport)).await?;
/// conn.send(&serde_json::json!("hello")).await?;
/// conn.stop(false, true).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Non-owning reference to a [`Connection`].
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a disconnected connection that logs through `tracing` and uses
    /// the [`IntervalKeepAlive`] monitor.
    pub fn new(config: ConnectionConfig) -> Result<Self, SignalRError> {
        Self::with_collaborators(
            config,
            Arc::new(TracingSink),
            Arc::new(IntervalKeepAlive::new()),
        )
    }

    /// Creates a disconnected connection with an explicit log sink and keep-alive monitor.
    pub fn with_collaborators(
        config: ConnectionConfig,
        sink: Arc<dyn LogSink>,
        keep_alive: Arc<dyn KeepAliveMonitor>,
    ) -> Result<Self, SignalRError> {
        let url = Url::parse(&config.url)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                url,
                http: reqwest::Client::new(),
                sink,
                keep_alive,
                bus: EventBus::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    transport: None,
                    attempt: 0,
                }),
                session: Mutex::new(Session::default()),
                last_message_at: Mutex::new(Instant::now()),
            }),
        })
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    /// The bound transport; `None` while Disconnected.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.lifecycle.lock().transport.clone()
    }

    pub fn session(&self) -> Session {
        self.inner.session.lock().clone()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.inner.session.lock().connection_id.clone()
    }

    pub fn keep_alive_data(&self) -> KeepAliveData {
        self.inner.session.lock().keep_alive
    }

    pub(crate) fn set_keep_alive_data(&self, data: KeepAliveData) {
        self.inner.session.lock().keep_alive = data;
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.inner.config.reconnect_delay
    }

    /// Subscriptions to lifecycle and data events.
    ///
    /// Only the connection itself publishes:
    ///
    /// ```compile_fail
    /// # use signalr_jabbr::config::ConnectionConfig;
    /// # use signalr_jabbr::connection::{Connection, ConnectionEvent};
    /// let conn = Connection::new(ConnectionConfig::builder("http://localhost/signalr").build()).unwrap();
    /// conn.publish(&ConnectionEvent::Started);
    /// ```
    ///
    /// ```compile_fail
    /// # use signalr_jabbr::config::ConnectionConfig;
    /// # use signalr_jabbr::connection::{Connection, ConnectionEvent};
    /// let conn = Connection::new(ConnectionConfig::builder("http://localhost/signalr").build()).unwrap();
    /// conn.events().publish(&conn, &ConnectionEvent::Disconnected);
    /// ```
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub(crate) fn publish(&self, event: &ConnectionEvent) {
        self.inner.bus.publish(self, event);
    }

    /// Moves the state from `expected` to `next`.
    ///
    /// Returns `false` without touching anything when the current state is not
    /// `expected` or the move is not a legal transition. On success a
    /// [`ConnectionEvent::StateChanged`] is published.
    pub fn change_state(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        self.transition(expected, next, |_| true).is_some()
    }

    /// Returns the attempt number in effect after the move.
    fn transition<F>(
        &self,
        expected: ConnectionState,
        next: ConnectionState,
        guard: F,
    ) -> Option<u64>
    where
        F: FnOnce(&Lifecycle) -> bool,
    {
        let attempt = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let allowed = lifecycle.state == expected && expected.can_transition_to(next);
            if !allowed || !guard(&lifecycle) {
                return None;
            }
            lifecycle.state = next;
            match next {
                ConnectionState::Connecting => lifecycle.attempt += 1,
                ConnectionState::Disconnected => lifecycle.transport = None,
                ConnectionState::Connected => {}
            }
            lifecycle.attempt
        };

        debug!("Connection state {} -> {}", expected, next);
        self.publish(&ConnectionEvent::StateChanged(StateChange {
            old_state: expected,
            new_state: next,
        }));
        Some(attempt)
    }

    fn begin_attempt(&self) -> Option<u64> {
        self.transition(
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            |_| true,
        )
    }

    /// Whether the `start` that began `attempt` still owns the lifecycle.
    fn is_current(&self, attempt: u64) -> bool {
        self.inner.lifecycle.lock().is_attempt(attempt)
    }

    /// Negotiates with the server and starts the transport.
    ///
    /// Calling `start` while already Connecting or Connected returns the
    /// connection immediately without touching the transport.
    ///
    /// # Errors
    ///
    /// * [`SignalRError::Negotiation`] - the negotiate request failed.
    /// * [`SignalRError::IncompatibleProtocol`] - the server speaks another protocol version.
    /// * [`SignalRError::Transport`] - the transport failed to start.
    /// * [`SignalRError::ConnectionStopped`] - `stop` was called before the transport was ready.
    ///
    /// In every error case the connection is left Disconnected.
    pub async fn start(&self, options: StartOptions) -> Result<Connection, SignalRError> {
        let StartOptions {
            transport,
            callback,
        } = options;

        let Some(attempt) = self.begin_attempt() else {
            return Ok(self.clone());
        };

        self.record_endpoint();

        let negotiated = negotiate(
            &self.inner.http,
            &self.inner.url,
            self.inner.config.query_string.as_deref(),
        )
        .await;
        // Stopped (and possibly restarted) while the request was in flight
        if !self.is_current(attempt) {
            debug!("Discarding negotiation of a stopped start");
            return Err(SignalRError::ConnectionStopped);
        }

        let response = match negotiated {
            Ok(response) => response,
            Err(e) => {
                self.log(&format!("Failed to negotiate: {e}"), None);
                return Err(self.fail_start(e).await);
            }
        };

        {
            let config = &self.inner.config;
            let mut session = self.inner.session.lock();
            session.app_relative_url = response.url.clone();
            session.connection_id = response.connection_id.clone();
            session.web_socket_server_url = response.web_socket_server_url.clone();
            if let Some(timeout) = response.disconnect_timeout() {
                session.disconnect_timeout = Some(timeout);
            }
            session.protocol_version = response.protocol_version.clone();
            session.keep_alive = KeepAliveData::derive(
                response.keep_alive,
                config.keep_alive_timeout_count,
                config.keep_alive_warn_at,
            );
        }

        if let Err(e) = response.validate_protocol() {
            self.log("Incompatible protocol version.", None);
            self.log(
                &format!(
                    "Got {}",
                    response.protocol_version.as_deref().unwrap_or("nothing")
                ),
                None,
            );
            return Err(self.fail_start(e).await);
        }

        self.publish(&ConnectionEvent::Starting);

        let bound = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.is_attempt(attempt) && lifecycle.transport.is_none() {
                lifecycle.transport = Some(transport.clone());
                true
            } else {
                false
            }
        };
        if !bound {
            return Err(SignalRError::ConnectionStopped);
        }

        debug!("Starting {} transport", transport.name());
        if let Err(e) = transport.start(self).await {
            self.log(&format!("{} transport failed to start: {e}", transport.name()), None);
            let e = SignalRError::from(e);
            if !self.is_current(attempt) {
                return Err(SignalRError::ConnectionStopped);
            }
            self.publish(&ConnectionEvent::Error(e.to_string()));
            if let Err(stop_error) = self.stop(false, false).await {
                warn!("Cleanup after failed transport start: {}", stop_error);
            }
            return Err(e);
        }

        let started = self.transition(
            ConnectionState::Connecting,
            ConnectionState::Connected,
            |lifecycle| {
                lifecycle.attempt == attempt
                    && lifecycle
                        .transport
                        .as_ref()
                        .is_some_and(|bound| same_transport(bound, &transport))
            },
        );
        if started.is_none() {
            return Err(SignalRError::ConnectionStopped);
        }

        if transport.supports_keep_alive() && self.keep_alive_data().activated {
            self.inner.keep_alive.monitor(self);
        }

        *self.inner.last_message_at.lock() = Instant::now();
        self.publish(&ConnectionEvent::Started);
        if let Some(callback) = callback {
            callback(self);
        }
        Ok(self.clone())
    }

    fn record_endpoint(&self) {
        let url = &self.inner.url;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        let mut session = self.inner.session.lock();
        session.protocol = url.scheme().to_string();
        session.base_url = format!("{}://{}", url.scheme(), host);
        session.host = host;
    }

    async fn fail_start(&self, error: SignalRError) -> SignalRError {
        self.publish(&ConnectionEvent::Error(error.to_string()));
        if let Err(stop_error) = self.stop(false, true).await {
            warn!("Cleanup after failed start: {}", stop_error);
        }
        error
    }

    /// Stops the connection.
    ///
    /// When a transport is bound it is asked to notify the server (unless
    /// `notify_server` is `false`), keep-alive monitoring stops, and the
    /// transport is torn down. The connection ends up Disconnected even when
    /// the transport fails; the first transport error is returned afterwards.
    /// Stopping a Disconnected connection does nothing.
    pub async fn stop(&self, asynchronous: bool, notify_server: bool) -> Result<(), SignalRError> {
        let transport = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == ConnectionState::Disconnected {
                return Ok(());
            }
            lifecycle.transport.take()
        };

        let _disconnect = scopeguard::guard(self.clone(), |connection| connection.finish_stop());

        match transport {
            Some(transport) => self.teardown(transport, asynchronous, notify_server).await,
            None => Ok(()),
        }
    }

    async fn teardown(
        &self,
        transport: Arc<dyn Transport>,
        asynchronous: bool,
        notify_server: bool,
    ) -> Result<(), SignalRError> {
        let mut outcome = Ok(());

        if notify_server {
            if let Err(e) = transport.abort(self, asynchronous).await {
                warn!("Abort on {} transport failed: {}", transport.name(), e);
                outcome = Err(e.into());
            }
        }

        if transport.supports_keep_alive() && self.keep_alive_data().activated {
            self.inner.keep_alive.stop_monitoring(self);
        }

        if let Err(e) = transport.stop(self).await {
            warn!("Stopping {} transport failed: {}", transport.name(), e);
            if outcome.is_ok() {
                outcome = Err(e.into());
            }
        }

        outcome
    }

    fn finish_stop(&self) {
        let current = self.state();
        if current != ConnectionState::Disconnected
            && self.change_state(current, ConnectionState::Disconnected)
        {
            self.publish(&ConnectionEvent::Disconnected);
        }
    }

    /// Sends one message through the bound transport.
    ///
    /// # Errors
    ///
    /// Fails with [`SignalRError::IllegalState`] while Disconnected or
    /// Connecting; nothing is queued.
    pub async fn send(&self, data: &Value) -> Result<(), SignalRError> {
        let transport = {
            let lifecycle = self.inner.lifecycle.lock();
            match lifecycle.state {
                ConnectionState::Disconnected => {
                    return Err(SignalRError::IllegalState(
                        "Connection must be started before data can be sent. Call start() before send()"
                            .into(),
                    ));
                }
                ConnectionState::Connecting => {
                    return Err(SignalRError::IllegalState(
                        "Connection has not been fully initialized. Wait for start() to complete before sending"
                            .into(),
                    ));
                }
                ConnectionState::Connected => lifecycle.transport.clone(),
            }
        };

        let transport = transport
            .ok_or_else(|| SignalRError::IllegalState("Connection has no transport".into()))?;
        transport.send(self, data).await?;
        Ok(())
    }

    /// Entry point for transports: one inbound message.
    pub fn handle_received(&self, data: Value) {
        self.mark_alive();
        self.publish(&ConnectionEvent::Received(data));
    }

    /// Records inbound activity (e.g. a keep-alive ping) without publishing data.
    pub fn mark_alive(&self) {
        *self.inner.last_message_at.lock() = Instant::now();
    }

    pub fn last_message_at(&self) -> Instant {
        *self.inner.last_message_at.lock()
    }

    /// Runs `callback` every time the connection starts negotiating the transport.
    pub fn starting<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .subscribe(EventKind::Starting, move |conn, _| callback(conn));
        self
    }

    pub fn received<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Connection, &Value) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(EventKind::Received, move |conn, event| {
            if let ConnectionEvent::Received(data) = event {
                callback(conn, data);
            }
        });
        self
    }

    pub fn disconnected<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .subscribe(EventKind::Disconnected, move |conn, _| callback(conn));
        self
    }

    pub fn error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Connection, &str) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(EventKind::Error, move |conn, event| {
            if let ConnectionEvent::Error(detail) = event {
                callback(conn, detail);
            }
        });
        self
    }

    pub fn state_changed<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Connection, StateChange) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .subscribe(EventKind::StateChanged, move |conn, event| {
                if let ConnectionEvent::StateChanged(change) = event {
                    callback(conn, *change);
                }
            });
        self
    }

    /// Writes a timestamped line to the log sink.
    ///
    /// Suppressed when `logging_override` is `Some(false)` or logging is
    /// disabled for this connection.
    pub fn log(&self, message: &str, logging_override: Option<bool>) {
        if logging_override == Some(false) || !self.inner.config.logging {
            return;
        }
        self.inner.sink.write(&format_line(message));
    }
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
