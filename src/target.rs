//! Snapshot model of a target execution context
//!
//! A target context is the global scope of one compiled GWT module, captured
//! as JSON. Values mirror what a script can observe at runtime:
//!
//! ```json
//! {
//!   "$gwt_version": "2.0.3",
//!   "$moduleName": "hello",
//!   "Xb": "GreetingService_Proxy.greetServer",
//!   "Bc": { "$fn": "function Bc(a,b,c){ ... }", "prototype": { "eQ": { "$fn": "..." } } }
//! }
//! ```
//!
//! Functions are objects carrying a `$fn` source text, an optional
//! `prototype` and an optional `returns` (the recorded result of calling the
//! function with no arguments).

use crate::collator::{IngestOutcome, SharedCollator};
use crate::event::RawEvent;
use crate::kv::EntryMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Global that marks a context as GWT output
pub const GWT_VERSION_MARKER: &str = "$gwt_version";

/// Global holding the module name
pub const MODULE_NAME_GLOBAL: &str = "$moduleName";

/// Errors loading a snapshot
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot file not found: {0}")]
    NotFound(String),

    #[error("Failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// An observable value in a target context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Function(JsFunction),
    Object(EntryMap<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&JsFunction> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Host truthiness: null, false, 0, NaN and "" are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Function(_) | Value::Object(_) => true,
        }
    }

    /// Integral numeric value, as used for type ids
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }
}

/// A callable captured with its source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsFunction {
    #[serde(rename = "$fn")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype: Option<EntryMap<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Box<Value>>,
}

impl JsFunction {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            prototype: None,
            returns: None,
        }
    }

    pub fn with_prototype(mut self, prototype: EntryMap<Value>) -> Self {
        self.prototype = Some(prototype);
        self
    }

    pub fn returning(mut self, value: Value) -> Self {
        self.returns = Some(Box::new(value));
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn prototype_member(&self, name: &str) -> Option<&Value> {
        self.prototype.as_ref().and_then(|p| p.get(name))
    }

    /// Prototype exposes a callable under `name`
    pub fn has_prototype_method(&self, name: &str) -> bool {
        self.prototype_member(name).is_some_and(Value::is_function)
    }

    /// Result of a zero-argument call, if recorded
    pub fn call(&self) -> Option<&Value> {
        self.returns.as_deref()
    }
}

/// The `$stats` slot of a context, bound to a shared collator
#[derive(Clone)]
pub struct StatsHook(SharedCollator);

impl StatsHook {
    pub fn new(collator: SharedCollator) -> Self {
        Self(collator)
    }

    pub fn deliver(&self, event: &RawEvent) -> IngestOutcome {
        self.0.ingest(event)
    }

    pub fn collator(&self) -> &SharedCollator {
        &self.0
    }
}

impl fmt::Debug for StatsHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatsHook")
    }
}

/// One execution context's global scope
#[derive(Debug, Clone)]
pub struct TargetContext {
    label: String,
    globals: EntryMap<Value>,
    hook: Option<StatsHook>,
}

impl TargetContext {
    pub fn new(label: impl Into<String>, globals: EntryMap<Value>) -> Self {
        Self {
            label: label.into(),
            globals,
            hook: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn globals(&self) -> &EntryMap<Value> {
        &self.globals
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Context exposes the GWT marker global
    pub fn is_target(&self) -> bool {
        self.globals
            .get(GWT_VERSION_MARKER)
            .is_some_and(Value::is_truthy)
    }

    pub fn gwt_version(&self) -> Option<&str> {
        self.get(GWT_VERSION_MARKER).and_then(Value::as_str)
    }

    pub fn module_name(&self) -> Option<&str> {
        self.get(MODULE_NAME_GLOBAL).and_then(Value::as_str)
    }

    pub fn install_stats_hook(&mut self, hook: StatsHook) {
        self.hook = Some(hook);
    }

    pub fn stats_hook(&self) -> Option<&StatsHook> {
        self.hook.as_ref()
    }

    /// The host calling `$stats(event)`; dropped when nothing is installed
    pub fn emit(&self, event: &RawEvent) -> Option<IngestOutcome> {
        self.hook.as_ref().map(|h| h.deliver(event))
    }
}
