//! Keep-alive timing and monitoring.
//!
//! The server announces a keep-alive interval during negotiation. From it the
//! connection derives a timeout, a warning threshold and a check interval
//! ([`KeepAliveData`]); a [`KeepAliveMonitor`] then watches the time since the
//! last inbound message while the transport is live.

use crate::connection::{bus::ConnectionEvent, Connection};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

/// Keep-alive parameters derived from the negotiated interval.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeepAliveData {
    /// `false` when the server reported no keep-alive interval; the
    /// remaining fields are then zero.
    pub activated: bool,
    pub timeout: Duration,
    pub timeout_warning: Duration,
    pub check_interval: Duration,
}

impl KeepAliveData {
    /// Derives the timings from the negotiated `KeepAlive` value (seconds).
    ///
    /// `timeout = keep_alive * timeout_count`, `timeout_warning = timeout * warn_at`,
    /// `check_interval = (timeout - timeout_warning) / 3`.
    pub fn derive(keep_alive_secs: Option<f64>, timeout_count: f64, warn_at: f64) -> Self {
        let Some(secs) = keep_alive_secs.filter(|secs| secs.is_finite() && *secs > 0.0) else {
            return Self::default();
        };

        let timeout_ms = secs * 1000.0 * timeout_count;
        let warning_ms = timeout_ms * warn_at;
        let check_ms = (timeout_ms - warning_ms) / 3.0;
        match (millis(timeout_ms), millis(warning_ms), millis(check_ms)) {
            (Some(timeout), Some(timeout_warning), Some(check_interval)) => Self {
                activated: true,
                timeout,
                timeout_warning,
                check_interval,
            },
            _ => {
                warn!("Ignoring keep-alive interval of {} seconds", secs);
                Self::default()
            }
        }
    }
}

/// `None` when the value does not fit a [`Duration`] or a deadline computed from it.
fn millis(ms: f64) -> Option<Duration> {
    let duration = Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).ok()?;
    Instant::now().checked_add(duration)?;
    Some(duration)
}

/// Watches a live connection for missing keep-alives.
///
/// The connection calls [`monitor`](Self::monitor) once the transport is ready
/// (when both the transport and the server support keep-alive) and
/// [`stop_monitoring`](Self::stop_monitoring) from `stop`.
pub trait KeepAliveMonitor: Send + Sync {
    fn monitor(&self, connection: &Connection);
    fn stop_monitoring(&self, connection: &Connection);
}

/// Default monitor: a tokio task ticking every `check_interval`.
///
/// Crossing `timeout_warning` logs and publishes
/// [`ConnectionEvent::KeepAliveWarning`] once until traffic resumes; crossing
/// `timeout` logs and stops the connection without notifying the server.
#[derive(Debug, Default)]
pub struct IntervalKeepAlive {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalKeepAlive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeepAliveMonitor for IntervalKeepAlive {
    fn monitor(&self, connection: &Connection) {
        let data = connection.keep_alive_data();
        if !data.activated || data.check_interval.is_zero() {
            return;
        }

        connection.mark_alive();
        connection.log("Now monitoring keep alive", None);

        let weak = connection.downgrade();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(data.check_interval);
            // Первый тик срабатывает сразу
            ticker.tick().await;
            let mut warned = false;

            loop {
                ticker.tick().await;
                let Some(connection) = weak.upgrade() else {
                    break;
                };

                let elapsed = connection.last_message_at().elapsed();
                if elapsed >= data.timeout {
                    connection.log(
                        "Keep alive timed out. Notifying transport that connection has been lost.",
                        None,
                    );
                    tokio::spawn(async move {
                        if let Err(e) = connection.stop(false, false).await {
                            warn!("Stopping after keep-alive timeout failed: {}", e);
                        }
                    });
                    break;
                } else if elapsed >= data.timeout_warning {
                    if !warned {
                        warned = true;
                        connection.log(
                            "Keep alive has been missed, connection may be dead/slow.",
                            None,
                        );
                        connection.publish(&ConnectionEvent::KeepAliveWarning);
                    }
                } else {
                    warned = false;
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_monitoring(&self, connection: &Connection) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            connection.log("Stopping the monitoring of the keep alive", None);
        }
    }
}
