//! Reporting sinks for finished operations
//!
//! A sink receives every collated operation exactly once, either when its
//! terminal sub-event arrives or when the sweeper expires it. Sinks are
//! best-effort: they swallow their own failures and never return errors.
//!
//! | Token     | Sink                 | Output                                 |
//! |-----------|----------------------|----------------------------------------|
//! | `firebug` | [`ConsoleGroupSink`] | collapsed group per operation          |
//! | `yui`     | [`LogServiceSink`]   | one structured `tracing` event as JSON |
//! | other     | [`NoopSink`]         | nothing                                |

use crate::event::CollatedEvent;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Mutex;

/// Consumer of finished operations
pub trait ReportSink: Send {
    fn log(&self, event: &CollatedEvent);
}

/// Sink selected by the logger-type token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerKind {
    /// Human-readable grouped console dump
    Firebug,
    /// External log service adapter
    Yui,
    /// Discard everything
    Noop,
}

impl LoggerKind {
    /// Case-insensitive token lookup; unknown tokens select `Noop`
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "firebug" => LoggerKind::Firebug,
            "yui" => LoggerKind::Yui,
            _ => LoggerKind::Noop,
        }
    }

    /// Build the sink, console output going to stdout
    pub fn build(self) -> Box<dyn ReportSink> {
        match self {
            LoggerKind::Firebug => Box::new(ConsoleGroupSink::stdout()),
            LoggerKind::Yui => Box::new(LogServiceSink),
            LoggerKind::Noop => Box::new(NoopSink),
        }
    }
}

impl FromStr for LoggerKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_token(s))
    }
}

/// Group header for an operation: RPC operations read `group. method total`
pub fn group_name(event: &CollatedEvent) -> String {
    let total = match event.total_time() {
        Some(ms) => format!("{}ms", ms),
        None => "TIMED OUT".to_string(),
    };

    if event.subsystem == "rpc" {
        let name = format!(
            "{}. {} {}",
            event.event_group,
            event.method.as_deref().unwrap_or_default(),
            total
        );
        name.replacen("_Proxy", "", 1)
    } else {
        format!("{} {}", event.key, total)
    }
}

/// Render the grouped dump; empty operations render nothing
pub fn render_group(event: &CollatedEvent) -> Option<String> {
    if event.sub_events.is_empty() {
        return None;
    }

    let mut out = group_name(event);
    out.push('\n');
    for sub in &event.sub_events {
        out.push_str(&format!("    {} at {}ms\n", sub.name, sub.time));
    }
    Some(out)
}

/// Console sink: a collapsed group per operation, one line per sub-event
pub struct ConsoleGroupSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleGroupSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl ReportSink for ConsoleGroupSink {
    fn log(&self, event: &CollatedEvent) {
        let Some(text) = render_group(event) else {
            return;
        };

        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writer.write_all(text.as_bytes()).and_then(|_| writer.flush()) {
            tracing::warn!(key = %event.key, error = %e, "console sink write failed");
        }
    }
}

/// Log-service sink: hands each operation to the `tracing` pipeline as JSON
pub struct LogServiceSink;

impl ReportSink for LogServiceSink {
    fn log(&self, event: &CollatedEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(
                target: "gwtmetrics::report",
                key = %event.key,
                timed_out = event.timed_out,
                event = %json,
                "collated event"
            ),
            Err(e) => tracing::warn!(key = %event.key, error = %e, "log service sink encode failed"),
        }
    }
}

/// Sink that drops everything
pub struct NoopSink;

impl ReportSink for NoopSink {
    fn log(&self, _event: &CollatedEvent) {}
}
