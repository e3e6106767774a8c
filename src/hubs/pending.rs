//! Outstanding hub invocations.
//!
//! Every invocation registers a `oneshot` pair keyed by a fresh UUID. The reply
//! frame (or a stop of the connection) removes the entry and settles it, so an
//! id can be resolved at most once.

use crate::error::SignalRError;
use futures_channel::oneshot;
use futures_util::{ready, FutureExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use uuid::Uuid;

type Outcome = Result<Value, SignalRError>;

pub(crate) struct PendingCall {
    pub(crate) hub: String,
    method: String,
    tx: oneshot::Sender<Outcome>,
}

impl PendingCall {
    /// Settles the call with the reply payload. An error payload wins over a result.
    pub(crate) fn settle(self, result: Option<Value>, error: Option<String>) {
        let outcome = match error {
            Some(message) => Err(SignalRError::Invocation {
                hub: self.hub,
                method: self.method,
                message,
            }),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        // Получатель мог быть уже удалён вызывающим кодом
        let _ = self.tx.send(outcome);
    }
}

/// Registry of invocations awaiting a reply, shared by all hubs of a connection.
#[derive(Default)]
pub(crate) struct Invocations {
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl Invocations {
    pub(crate) fn register(&self, hub: &str, method: &str) -> PendingInvocation {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id.clone(),
            PendingCall {
                hub: hub.to_string(),
                method: method.to_string(),
                tx,
            },
        );
        PendingInvocation { id, rx }
    }

    /// Removes the call with this id, if it is still pending.
    pub(crate) fn take(&self, id: &str) -> Option<PendingCall> {
        self.pending.lock().remove(id)
    }

    /// Rejects every pending call with [`SignalRError::ConnectionStopped`].
    pub(crate) fn reject_all(&self) -> usize {
        let drained: Vec<PendingCall> = self.pending.lock().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(SignalRError::ConnectionStopped));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Result handle of a hub invocation.
///
/// Resolves with the server's result, fails with [`SignalRError::Invocation`]
/// when the server reports an error, or with
/// [`SignalRError::ConnectionStopped`] when the connection stops first.
#[derive(Debug)]
pub struct PendingInvocation {
    id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingInvocation {
    /// The correlation id sent with the invocation.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the reply and deserializes the result.
    pub async fn into_result<T: DeserializeOwned>(self) -> Result<T, SignalRError> {
        let value = self.await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Future for PendingInvocation {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.rx.poll_unpin(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(oneshot::Canceled) => Poll::Ready(Err(SignalRError::ConnectionStopped)),
        }
    }
}
