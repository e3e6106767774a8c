//! Client-side proxy for one named hub.

use crate::{
    connection::Connection,
    error::SignalRError,
    hubs::pending::{Invocations, PendingInvocation},
    protocol::{Frame, HubState, JsonCodec},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

type ClientMethod = Arc<dyn Fn(&HubProxy, Vec<Value>) + Send + Sync>;

pub(crate) struct ProxyInner {
    hub_name: String,
    connection: Connection,
    invocations: Arc<Invocations>,
    state: Mutex<HubState>,
    /// Keyed by lower-cased method name.
    client: Mutex<HashMap<String, ClientMethod>>,
    /// Local name → server method name.
    server: Mutex<HashMap<String, String>>,
}

/// Proxy for one hub multiplexed over a connection.
///
/// Cloning is cheap; clones share handlers and state.
///
/// ```no_run
/// # use signalr_jabbr::hubs::HubConnection;
/// # async fn example(hubs: HubConnection) -> Result<(), signalr_jabbr::SignalRError> {
/// let chat = hubs.create_proxy("chat");
/// chat.on("addMessage", |_, args| println!("message: {args:?}"))
///     .server_method("send", "Send");
/// hubs.create_hub_proxies();
///
/// let sent: bool = chat
///     .call("send", vec![serde_json::json!("hello")])
///     .await?
///     .into_result()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HubProxy {
    inner: Arc<ProxyInner>,
}

#[derive(Clone)]
pub(crate) struct WeakHubProxy {
    inner: Weak<ProxyInner>,
}

impl WeakHubProxy {
    pub(crate) fn upgrade(&self) -> Option<HubProxy> {
        self.inner.upgrade().map(|inner| HubProxy { inner })
    }
}

impl fmt::Debug for HubProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubProxy")
            .field("hub_name", &self.inner.hub_name)
            .finish_non_exhaustive()
    }
}

impl HubProxy {
    pub(crate) fn new(
        hub_name: &str,
        connection: Connection,
        invocations: Arc<Invocations>,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                hub_name: hub_name.to_string(),
                connection,
                invocations,
                state: Mutex::new(HubState::new()),
                client: Mutex::new(HashMap::new()),
                server: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakHubProxy {
        WeakHubProxy {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn hub_name(&self) -> &str {
        &self.inner.hub_name
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Registers the handler for a server push of `method` (case-insensitive).
    pub fn on<F>(&self, method: &str, handler: F) -> &Self
    where
        F: Fn(&HubProxy, Vec<Value>) + Send + Sync + 'static,
    {
        self.inner
            .client
            .lock()
            .insert(method.to_lowercase(), Arc::new(handler));
        self
    }

    /// Removes the handler for `method`. Returns `false` if none was registered.
    pub fn off(&self, method: &str) -> bool {
        self.inner
            .client
            .lock()
            .remove(&method.to_lowercase())
            .is_some()
    }

    /// Registers a callable server method: `call(local, ..)` invokes `remote`.
    pub fn server_method(&self, local: &str, remote: &str) -> &Self {
        self.inner
            .server
            .lock()
            .insert(local.to_string(), remote.to_string());
        self
    }

    pub fn state(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().get(key).cloned()
    }

    pub fn set_state(&self, key: &str, value: Value) {
        self.inner.state.lock().insert(key.to_string(), value);
    }

    pub fn state_snapshot(&self) -> HubState {
        self.inner.state.lock().clone()
    }

    pub(crate) fn apply_state(&self, changes: &HubState) {
        let mut state = self.inner.state.lock();
        for (key, value) in changes {
            state.insert(key.clone(), value.clone());
        }
    }

    /// Sends an invocation of `method` and returns its pending result.
    ///
    /// The pending entry is registered before the frame is sent, so a reply
    /// that races the send still finds it.
    ///
    /// # Errors
    ///
    /// Fails immediately, without leaving a pending entry, when the connection
    /// refuses the send (e.g. it is not Connected).
    pub async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<PendingInvocation, SignalRError> {
        let pending = self.inner.invocations.register(&self.inner.hub_name, method);
        let frame = Frame::Invocation {
            hub: self.inner.hub_name.clone(),
            method: method.to_string(),
            arguments: args,
            invocation_id: pending.id().to_string(),
            state: Some(self.state_snapshot()),
        };

        if let Err(e) = self.inner.connection.send(&JsonCodec::encode(&frame)).await {
            self.inner.invocations.take(pending.id());
            return Err(e);
        }
        Ok(pending)
    }

    /// Invokes a server method registered with [`server_method`](Self::server_method).
    pub async fn call(
        &self,
        local: &str,
        args: Vec<Value>,
    ) -> Result<PendingInvocation, SignalRError> {
        let remote = self.inner.server.lock().get(local).cloned().ok_or_else(|| {
            SignalRError::UnknownServerMethod {
                hub: self.inner.hub_name.clone(),
                method: local.to_string(),
            }
        })?;
        self.invoke(&remote, args).await
    }

    /// Runs the client handler for a pushed call. Returns `false` when no handler exists.
    pub(crate) fn trigger(&self, method: &str, args: Vec<Value>) -> bool {
        let handler = self.inner.client.lock().get(&method.to_lowercase()).cloned();
        match handler {
            Some(handler) => {
                handler(self, args);
                true
            }
            None => {
                debug!(
                    "No client method {} on hub {}",
                    method, self.inner.hub_name
                );
                false
            }
        }
    }
}
