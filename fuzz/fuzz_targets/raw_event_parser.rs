#![no_main]

use gwtmetrics::collator::CollationEngine;
use gwtmetrics::config::CollatorConfig;
use gwtmetrics::event::RawEvent;
use gwtmetrics::sink::NoopSink;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let mut engine = CollationEngine::new(&CollatorConfig::default(), Box::new(NoopSink));
        // Parsing and ingesting arbitrary lines must never panic
        for line in input.lines() {
            if let Ok(event) = RawEvent::from_json_line(line) {
                engine.ingest(&event);
            }
        }
        engine.sweep(i64::MAX);
    }
});
