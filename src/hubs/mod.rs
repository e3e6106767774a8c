//! Hub connections.
//!
//! A [`HubConnection`] multiplexes any number of named [`HubProxy`]s over one
//! [`Connection`]. It turns inbound frames into:
//! - resolution of the matching [`PendingInvocation`] (reply frames),
//! - calls of registered client methods (push frames).
//!
//! Pending invocations are rejected with
//! [`SignalRError::ConnectionStopped`] whenever the connection disconnects.

mod pending;
mod proxy;

pub use pending::PendingInvocation;
pub use proxy::HubProxy;

use crate::{
    config::ConnectionConfig,
    connection::{Connection, EventKind, StartOptions, SubscriptionId},
    error::SignalRError,
    protocol::{Frame, JsonCodec},
};
use parking_lot::Mutex;
use pending::Invocations;
use proxy::WeakHubProxy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A connection carrying hub traffic.
pub struct HubConnection {
    connection: Connection,
    invocations: Arc<Invocations>,
    /// Keyed by lower-cased hub name.
    proxies: Mutex<HashMap<String, HubProxy>>,
    dispatch: Mutex<Option<SubscriptionId>>,
}

impl HubConnection {
    pub fn new(config: ConnectionConfig) -> Result<Self, SignalRError> {
        Ok(Self::from_connection(Connection::new(config)?))
    }

    /// Wraps an existing connection.
    pub fn from_connection(connection: Connection) -> Self {
        let invocations = Arc::new(Invocations::default());

        let on_disconnect = invocations.clone();
        connection
            .events()
            .subscribe(EventKind::Disconnected, move |conn, _| {
                let rejected = on_disconnect.reject_all();
                if rejected > 0 {
                    conn.log(
                        &format!("Rejected {rejected} pending invocation(s): connection stopped"),
                        None,
                    );
                }
            });

        Self {
            connection,
            invocations,
            proxies: Mutex::new(HashMap::new()),
            dispatch: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the proxy for `hub_name`, creating it on first use.
    pub fn create_proxy(&self, hub_name: &str) -> HubProxy {
        self.proxies
            .lock()
            .entry(hub_name.to_lowercase())
            .or_insert_with(|| {
                HubProxy::new(hub_name, self.connection.clone(), self.invocations.clone())
            })
            .clone()
    }

    pub fn proxy(&self, hub_name: &str) -> Option<HubProxy> {
        self.proxies.lock().get(&hub_name.to_lowercase()).cloned()
    }

    /// Wires inbound dispatch to the hubs created so far.
    ///
    /// Call it once, after every proxy has been created: hubs created later
    /// receive no pushes until it is called again. A repeated call replaces
    /// the previous wiring.
    pub fn create_hub_proxies(&self) {
        let hubs: HashMap<String, WeakHubProxy> = self
            .proxies
            .lock()
            .iter()
            .map(|(name, proxy)| (name.clone(), proxy.downgrade()))
            .collect();
        let invocations = self.invocations.clone();

        let id = self
            .connection
            .events()
            .subscribe(EventKind::Received, move |conn, event| {
                if let crate::connection::ConnectionEvent::Received(data) = event {
                    dispatch(conn, &invocations, &hubs, data);
                }
            });

        if let Some(previous) = self.dispatch.lock().replace(id) {
            self.connection.events().unsubscribe(previous);
        }
    }

    pub async fn start(&self, options: StartOptions) -> Result<Connection, SignalRError> {
        self.connection.start(options).await
    }

    pub async fn stop(&self, asynchronous: bool, notify_server: bool) -> Result<(), SignalRError> {
        self.connection.stop(asynchronous, notify_server).await
    }

    /// Number of invocations still waiting for a reply.
    pub fn pending_invocations(&self) -> usize {
        self.invocations.len()
    }
}

fn dispatch(
    connection: &Connection,
    invocations: &Invocations,
    hubs: &HashMap<String, WeakHubProxy>,
    data: &Value,
) {
    let frame = match JsonCodec::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Ignoring non-hub message ({}): {}", e, data);
            return;
        }
    };

    match frame {
        Frame::Completion {
            invocation_id,
            result,
            error,
            state,
        } => {
            let Some(call) = invocations.take(&invocation_id) else {
                debug!("Dropping reply for unknown invocation {}", invocation_id);
                connection.log(
                    &format!("Dropping reply for unknown invocation {invocation_id}"),
                    None,
                );
                return;
            };
            if let Some(state) = state {
                if let Some(proxy) = hubs
                    .get(&call.hub.to_lowercase())
                    .and_then(WeakHubProxy::upgrade)
                {
                    proxy.apply_state(&state);
                }
            }
            call.settle(result, error);
        }
        Frame::Push {
            hub,
            method,
            arguments,
            state,
        } => {
            let Some(proxy) = hubs.get(&hub.to_lowercase()).and_then(WeakHubProxy::upgrade)
            else {
                debug!("Dropping push {}.{} for unknown hub", hub, method);
                connection.log(&format!("Dropping push {hub}.{method} for unknown hub"), None);
                return;
            };
            if let Some(state) = state {
                proxy.apply_state(&state);
            }
            proxy.trigger(&method, arguments);
        }
        Frame::Invocation { hub, method, .. } => {
            debug!("Ignoring client-bound invocation frame {}.{}", hub, method);
        }
    }
}
