//! Diagnostic sinks for [`Connection::log`](crate::connection::Connection::log).

use chrono::Local;
use parking_lot::Mutex;
use std::sync::Arc;

/// Destination for connection log lines.
pub trait LogSink: Send + Sync {
    fn write(&self, line: &str);
}

/// Forwards log lines to `tracing` under the `signalr` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, line: &str) {
        tracing::info!(target: "signalr", "{}", line);
    }
}

/// Keeps log lines in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every line written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn write(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Formats a line as `[HH:MM:SS] SignalR: <message>`.
pub(crate) fn format_line(message: &str) -> String {
    format!("[{}] SignalR: {}", Local::now().format("%H:%M:%S"), message)
}
