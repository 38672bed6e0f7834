//! Event collation engine
//!
//! Groups an interleaved stream of [`RawEvent`]s into one [`CollatedEvent`]
//! per [`GroupKey`] and reports each operation exactly once.
//!
//! # State machine
//!
//! ```text
//!            first event                 terminal sub-event
//!  ABSENT ───────────────▶ OPEN ─────────────────────────────▶ CLOSED (timed_out = false)
//!                          │  ▲
//!              next event  └──┘
//!                          │
//!                          └── sweep: now - start > timeout ─▶ CLOSED (timed_out = true)
//! ```
//!
//! CLOSED entries are removed from the live table before the sink sees them,
//! so a later event with the same key opens a fresh operation.
//!
//! # Concurrency
//!
//! The engine itself is single-writer. [`SharedCollator`] wraps it in a mutex
//! so host hooks and the background sweeper never mutate the table at the
//! same time.

use crate::config::CollatorConfig;
use crate::event::{CollatedEvent, GroupKey, RawEvent};
use crate::sink::ReportSink;
use fnv::FnvHashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" for expiry sweeps, in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_millis: i64) {
        self.now.fetch_add(delta_millis, Ordering::SeqCst);
    }

    /// Move forward to `millis` if it is later than the current time.
    ///
    /// Lets a replayed stream drive expiry by its own timestamps.
    pub fn observe(&self, millis: i64) {
        self.now.fetch_max(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// What a single `ingest` call did to the live table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new operation was opened
    Opened(GroupKey),
    /// A sub-event was appended to an open operation
    Appended(GroupKey),
    /// The terminal sub-event arrived; the operation was reported and removed
    Completed(GroupKey),
}

impl IngestOutcome {
    pub fn key(&self) -> &GroupKey {
        match self {
            IngestOutcome::Opened(k) | IngestOutcome::Appended(k) | IngestOutcome::Completed(k) => k,
        }
    }
}

/// Running counters, mostly for the CLI summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollationStats {
    pub ingested: u64,
    pub completed: u64,
    pub timed_out: u64,
}

/// Owns the live-operation table and the active sink
pub struct CollationEngine {
    live: FnvHashMap<GroupKey, CollatedEvent>,
    sink: Box<dyn ReportSink>,
    terminal_marker: String,
    timeout_ms: i64,
    stats: CollationStats,
}

impl CollationEngine {
    pub fn new(config: &CollatorConfig, sink: Box<dyn ReportSink>) -> Self {
        Self {
            live: FnvHashMap::default(),
            sink,
            terminal_marker: config.terminal_marker.clone(),
            timeout_ms: i64::try_from(config.timeout_ms).unwrap_or(i64::MAX),
            stats: CollationStats::default(),
        }
    }

    /// Fold one event into the live table.
    ///
    /// There is no de-duplication: delivering the same event twice records
    /// two sub-events.
    pub fn ingest(&mut self, event: &RawEvent) -> IngestOutcome {
        self.stats.ingested += 1;
        let key = GroupKey::for_event(event);

        let opened = match self.live.get_mut(&key) {
            Some(op) => {
                op.append(event);
                false
            }
            None => {
                self.live.insert(key.clone(), CollatedEvent::open(event));
                true
            }
        };

        let terminated = self
            .live
            .get(&key)
            .is_some_and(|op| op.is_terminated_by(&self.terminal_marker));

        if terminated {
            if let Some(op) = self.live.remove(&key) {
                self.stats.completed += 1;
                tracing::debug!(key = %key, sub_events = op.sub_events.len(), "operation completed");
                self.dispatch(&op);
            }
            return IngestOutcome::Completed(key);
        }

        if opened {
            tracing::trace!(key = %key, start = event.millis, "operation opened");
            IngestOutcome::Opened(key)
        } else {
            IngestOutcome::Appended(key)
        }
    }

    /// Expire every open operation older than the timeout at `now_millis`.
    ///
    /// Expired operations are reported oldest first. Returns how many were expired.
    pub fn sweep(&mut self, now_millis: i64) -> usize {
        let timeout = self.timeout_ms;
        self.expire_where(|op| now_millis.saturating_sub(op.start_millis) > timeout)
    }

    /// Expire every open operation regardless of age, oldest first.
    ///
    /// Used when the event source is exhausted and nothing can complete them.
    pub fn expire_all(&mut self) -> usize {
        self.expire_where(|_| true)
    }

    fn expire_where<P>(&mut self, mut stale: P) -> usize
    where
        P: FnMut(&CollatedEvent) -> bool,
    {
        let mut expired: Vec<(i64, GroupKey)> = self
            .live
            .iter()
            .filter(|(_, op)| stale(*op))
            .map(|(k, op)| (op.start_millis, k.clone()))
            .collect();
        expired.sort();

        let count = expired.len();
        for (_, key) in expired {
            if let Some(mut op) = self.live.remove(&key) {
                op.timed_out = true;
                self.stats.timed_out += 1;
                tracing::debug!(key = %key, start = op.start_millis, "operation timed out");
                self.dispatch(&op);
            }
        }
        count
    }

    /// Hand a closed operation to the sink; a panicking sink is contained
    fn dispatch(&self, op: &CollatedEvent) {
        let sink = &self.sink;
        if panic::catch_unwind(AssertUnwindSafe(|| sink.log(op))).is_err() {
            tracing::warn!(key = %op.key, "report sink panicked; event dropped");
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, key: &GroupKey) -> bool {
        self.live.contains_key(key)
    }

    /// Snapshot of an open operation
    pub fn live_event(&self, key: &GroupKey) -> Option<&CollatedEvent> {
        self.live.get(key)
    }

    pub fn stats(&self) -> CollationStats {
        self.stats
    }
}

/// Cloneable handle serializing every access to one engine
#[derive(Clone)]
pub struct SharedCollator {
    engine: Arc<Mutex<CollationEngine>>,
    clock: Arc<dyn Clock>,
}

impl SharedCollator {
    pub fn new(engine: CollationEngine, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            clock,
        }
    }

    /// Engine on the wall clock
    pub fn with_system_clock(engine: CollationEngine) -> Self {
        Self::new(engine, Arc::new(SystemClock))
    }

    fn lock(&self) -> MutexGuard<'_, CollationEngine> {
        self.engine
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn ingest(&self, event: &RawEvent) -> IngestOutcome {
        self.lock().ingest(event)
    }

    /// Sweep against the handle's clock
    pub fn sweep_now(&self) -> usize {
        let now = self.clock.now_millis();
        self.lock().sweep(now)
    }

    /// Report everything still open as timed out
    pub fn expire_all(&self) -> usize {
        self.lock().expire_all()
    }

    pub fn live_count(&self) -> usize {
        self.lock().live_count()
    }

    pub fn is_live(&self, key: &GroupKey) -> bool {
        self.lock().is_live(key)
    }

    pub fn stats(&self) -> CollationStats {
        self.lock().stats()
    }

    /// Whether two handles share one engine
    pub fn same_engine(&self, other: &SharedCollator) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<CollatedEvent>>>);

    impl ReportSink for Recorder {
        fn log(&self, event: &CollatedEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct PanickingSink;

    impl ReportSink for PanickingSink {
        fn log(&self, _event: &CollatedEvent) {
            panic!("sink exploded");
        }
    }

    fn engine() -> (CollationEngine, Recorder) {
        let rec = Recorder::default();
        (
            CollationEngine::new(&CollatorConfig::default(), Box::new(rec.clone())),
            rec,
        )
    }

    fn rpc(millis: i64, sub: &str) -> RawEvent {
        RawEvent::new("rpc", "G", Some("greet"), millis, sub)
    }

    #[test]
    fn test_begin_end_reports_once() {
        let (mut engine, rec) = engine();
        assert!(matches!(engine.ingest(&rpc(1000, "begin")), IngestOutcome::Opened(_)));
        assert!(matches!(engine.ingest(&rpc(1050, "end")), IngestOutcome::Completed(_)));

        let logged = rec.0.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert!(!logged[0].timed_out);
        assert_eq!(logged[0].sub_events[1].time, 50);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_interleaved_groups_collate_independently() {
        let (mut engine, rec) = engine();
        engine.ingest(&RawEvent::new("rpc", "1", Some("a"), 0, "begin"));
        engine.ingest(&RawEvent::new("rpc", "2", Some("b"), 5, "begin"));
        engine.ingest(&RawEvent::new("rpc", "1", Some("a"), 10, "requestSerialized"));
        engine.ingest(&RawEvent::new("rpc", "2", Some("b"), 20, "end"));
        assert_eq!(engine.live_count(), 1);
        engine.ingest(&RawEvent::new("rpc", "1", Some("a"), 30, "end"));

        let logged = rec.0.lock().unwrap();
        assert_eq!(logged[0].key.as_str(), "rpc-2-b");
        assert_eq!(logged[0].sub_events.len(), 2);
        assert_eq!(logged[1].key.as_str(), "rpc-1-a");
        assert_eq!(logged[1].sub_events.len(), 3);
        assert_eq!(logged[1].sub_events[2].time, 30);
    }

    #[test]
    fn test_first_event_terminal_closes_immediately() {
        let (mut engine, rec) = engine();
        assert!(matches!(engine.ingest(&rpc(7, "end")), IngestOutcome::Completed(_)));
        assert_eq!(rec.0.lock().unwrap()[0].sub_events.len(), 1);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_duplicate_delivery_is_not_deduplicated() {
        let (mut engine, _rec) = engine();
        let ev = rpc(1000, "begin");
        engine.ingest(&ev);
        engine.ingest(&ev);
        let key = GroupKey::for_event(&ev);
        assert_eq!(engine.live_event(&key).unwrap().sub_events.len(), 2);
    }

    #[test]
    fn test_sweep_expires_only_stale_entries() {
        let (mut engine, rec) = engine();
        engine.ingest(&RawEvent::new("rpc", "old", None, 1_000, "begin"));
        engine.ingest(&RawEvent::new("rpc", "new", None, 15_000, "begin"));

        // exactly at the threshold is not yet stale
        assert_eq!(engine.sweep(21_000), 0);
        assert_eq!(engine.sweep(21_001), 1);

        let logged = rec.0.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].timed_out);
        assert_eq!(logged[0].key.as_str(), "rpc-old");
        assert_eq!(engine.live_count(), 1);
    }

    #[test]
    fn test_same_key_after_timeout_starts_fresh() {
        let (mut engine, rec) = engine();
        engine.ingest(&rpc(1_000, "begin"));
        engine.sweep(30_000);
        assert!(matches!(engine.ingest(&rpc(40_000, "begin")), IngestOutcome::Opened(_)));
        engine.ingest(&rpc(40_025, "end"));

        let logged = rec.0.lock().unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[1].start_millis, 40_000);
        assert_eq!(logged[1].sub_events[1].time, 25);
    }

    #[test]
    fn test_custom_terminal_marker() {
        let rec = Recorder::default();
        let config = CollatorConfig {
            terminal_marker: "done".to_string(),
            ..Default::default()
        };
        let mut engine = CollationEngine::new(&config, Box::new(rec.clone()));
        assert!(matches!(engine.ingest(&rpc(0, "end")), IngestOutcome::Opened(_)));
        assert!(matches!(engine.ingest(&rpc(3, "done")), IngestOutcome::Completed(_)));
        assert_eq!(rec.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panicking_sink_does_not_corrupt_state() {
        let mut engine = CollationEngine::new(&CollatorConfig::default(), Box::new(PanickingSink));
        engine.ingest(&rpc(0, "begin"));
        engine.ingest(&rpc(1, "end"));
        assert_eq!(engine.live_count(), 0);
        assert_eq!(engine.stats().completed, 1);
    }

    #[test]
    fn test_shared_collator_uses_clock() {
        let (engine, rec) = engine();
        let clock = Arc::new(ManualClock::new(0));
        let shared = SharedCollator::new(engine, clock.clone());
        shared.ingest(&rpc(0, "begin"));

        clock.set(20_000);
        assert_eq!(shared.sweep_now(), 0);
        clock.advance(1);
        assert_eq!(shared.sweep_now(), 1);
        assert_eq!(rec.0.lock().unwrap().len(), 1);
        assert_eq!(shared.stats().timed_out, 1);
    }

    #[test]
    fn test_expire_all_reports_every_open_operation_once() {
        let (mut engine, rec) = engine();
        engine.ingest(&RawEvent::new("rpc", "late", None, i64::MAX - 5, "begin"));
        engine.ingest(&RawEvent::new("rpc", "early", None, 100, "begin"));
        engine.ingest(&RawEvent::new("rpc", "done", None, 100, "end"));

        assert_eq!(engine.expire_all(), 2);
        assert_eq!(engine.expire_all(), 0);
        assert_eq!(engine.live_count(), 0);

        let logged = rec.0.lock().unwrap();
        let keys: Vec<&str> = logged.iter().map(|op| op.key.as_str()).collect();
        assert_eq!(keys, vec!["rpc-done", "rpc-early", "rpc-late"]);
        assert!(logged[1].timed_out && logged[2].timed_out);
        assert_eq!(engine.stats().timed_out, 2);
    }

    #[test]
    fn test_observing_clock_only_moves_forward() {
        let clock = ManualClock::new(0);
        clock.observe(1_000);
        clock.observe(400);
        assert_eq!(clock.now_millis(), 1_000);
    }

    #[test]
    fn test_ingest_outcome_key() {
        let (mut engine, _rec) = engine();
        let outcome = engine.ingest(&rpc(0, "begin"));
        assert_eq!(outcome.key().as_str(), "rpc-G-greet");
        assert_eq!(engine.ingest(&rpc(5, "end")).key(), outcome.key());
    }

    #[test]
    fn test_system_clock_keeps_fresh_operations() {
        let (engine, rec) = engine();
        let shared = SharedCollator::with_system_clock(engine);
        let now = SystemClock.now_millis();
        shared.ingest(&rpc(now, "begin"));
        assert_eq!(shared.sweep_now(), 0);
        assert_eq!(shared.live_count(), 1);

        assert_eq!(shared.expire_all(), 1);
        assert_eq!(rec.0.lock().unwrap().len(), 1);
    }
}
