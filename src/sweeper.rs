//! Background expiry of stale operations
//!
//! ```text
//! ┌──────────────────────────────┐         ┌──────────────────────────────┐
//! │ HOST HOOKS                   │         │ SWEEPER THREAD               │
//! │   $stats(event)              │         │   loop {                     │
//! │     → shared.ingest(event)   │ ─lock─▶ │     sleep(interval);         │
//! └──────────────────────────────┘         │     shared.sweep_now();      │
//!                                          │   }                          │
//!                                          └──────────────────────────────┘
//! ```
//!
//! The next sweep is scheduled only after the previous one returns, so sweeps
//! never overlap. The loop has no stop signal: once spawned it runs for the
//! lifetime of the process.

use crate::collator::SharedCollator;
use anyhow::{Context, Result};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to the running sweep loop
pub struct Sweeper {
    handle: JoinHandle<()>,
    interval: Duration,
}

impl Sweeper {
    /// Start sweeping `collator` every `interval`
    pub fn spawn(collator: SharedCollator, interval: Duration) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("gwtmetrics-sweeper".to_string())
            .spawn(move || Self::sweep_loop(collator, interval))
            .context("Failed to spawn sweeper thread")?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "sweeper started");
        Ok(Self { handle, interval })
    }

    fn sweep_loop(collator: SharedCollator, interval: Duration) {
        loop {
            thread::sleep(interval);
            let expired = collator.sweep_now();
            if expired > 0 {
                tracing::debug!(expired, live = collator.live_count(), "sweep expired operations");
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True while the loop thread is alive
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collator::{CollationEngine, ManualClock};
    use crate::config::CollatorConfig;
    use crate::event::{CollatedEvent, RawEvent};
    use crate::sink::ReportSink;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<CollatedEvent>>>);

    impl ReportSink for Recorder {
        fn log(&self, event: &CollatedEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_sweeper_expires_in_background() {
        let rec = Recorder::default();
        let config = CollatorConfig::default();
        let clock = Arc::new(ManualClock::new(1_000));
        let shared = SharedCollator::new(
            CollationEngine::new(&config, Box::new(rec.clone())),
            clock.clone(),
        );

        shared.ingest(&RawEvent::new("rpc", "G", Some("greet"), 1_000, "begin"));
        let sweeper = Sweeper::spawn(shared.clone(), Duration::from_millis(5)).unwrap();
        assert!(sweeper.is_running());
        assert_eq!(sweeper.interval(), Duration::from_millis(5));

        clock.set(1_000 + 20_001);
        let deadline = Instant::now() + Duration::from_secs(5);
        while shared.live_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let logged = rec.0.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].timed_out);
        assert_eq!(logged[0].sub_events.len(), 1);
    }
}
