//! gwtmetrics - lightweight-metrics collation and name recovery for GWT modules
//!
//! This library groups the timestamped stats events a GWT application emits
//! into per-operation records, reports completed and timed-out operations to
//! a pluggable sink, and recovers readable RPC method and class names from
//! a snapshot of a compiled module's global scope.

pub mod cli;
pub mod collator;
pub mod config;
pub mod event;
pub mod heuristics;
pub mod inspector;
pub mod kv;
pub mod locator;
pub mod sink;
pub mod sweeper;
pub mod target;
