//! Raw metrics events and the collated operations built from them
//!
//! A host emits one [`RawEvent`] per lifecycle point (`begin`, `requestSerialized`,
//! `end`, ...). Events that share a [`GroupKey`] belong to one logical operation
//! and are folded into a [`CollatedEvent`] by the collation engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One lifecycle point as delivered to the stats hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Emitting subsystem (e.g., "rpc", "startup")
    #[serde(rename = "subSystem")]
    pub subsystem: String,
    /// Event group within the subsystem (an RPC request id, a bootstrap phase)
    #[serde(rename = "evtGroup")]
    pub event_group: String,
    /// Method name for RPC events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Epoch timestamp in milliseconds
    pub millis: i64,
    /// Sub-event name
    #[serde(rename = "type")]
    pub sub_event: String,
    #[serde(rename = "moduleName", default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RawEvent {
    /// Build an event without module/session metadata
    pub fn new(
        subsystem: impl Into<String>,
        event_group: impl Into<String>,
        method: Option<&str>,
        millis: i64,
        sub_event: impl Into<String>,
    ) -> Self {
        Self {
            subsystem: subsystem.into(),
            event_group: event_group.into(),
            method: method.map(String::from),
            millis,
            sub_event: sub_event.into(),
            module_name: None,
            session_id: None,
        }
    }

    /// Parse one newline-delimited JSON payload
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// Identity of one in-flight operation: `subSystem-evtGroup[-method]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn for_event(event: &RawEvent) -> Self {
        let mut key = format!("{}-{}", event.subsystem, event.event_group);
        if let Some(method) = event.method.as_deref().filter(|m| !m.is_empty()) {
            key.push('-');
            key.push_str(method);
        }
        GroupKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named point within an operation, relative to the operation start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEvent {
    pub name: String,
    /// Milliseconds since the first sub-event; not clamped, skew may make it negative
    pub time: i64,
}

/// An in-progress or finished logical operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollatedEvent {
    #[serde(rename = "uniqueKey")]
    pub key: GroupKey,
    #[serde(rename = "subSystem")]
    pub subsystem: String,
    #[serde(rename = "evtGroup")]
    pub event_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Timestamp of the first sub-event
    #[serde(rename = "millis")]
    pub start_millis: i64,
    #[serde(rename = "subEvents")]
    pub sub_events: Vec<SubEvent>,
    #[serde(rename = "timedOut", default)]
    pub timed_out: bool,
}

impl CollatedEvent {
    /// Start an operation from its first event; that event sits at relative time 0
    pub fn open(event: &RawEvent) -> Self {
        Self {
            key: GroupKey::for_event(event),
            subsystem: event.subsystem.clone(),
            event_group: event.event_group.clone(),
            method: event.method.clone().filter(|m| !m.is_empty()),
            start_millis: event.millis,
            sub_events: vec![SubEvent {
                name: event.sub_event.clone(),
                time: 0,
            }],
            timed_out: false,
        }
    }

    /// Append a follow-up event in arrival order
    pub fn append(&mut self, event: &RawEvent) {
        self.sub_events.push(SubEvent {
            name: event.sub_event.clone(),
            time: event.millis.saturating_sub(self.start_millis),
        });
    }

    pub fn last_sub_event(&self) -> Option<&SubEvent> {
        self.sub_events.last()
    }

    /// True once the most recent sub-event carries the terminal marker
    pub fn is_terminated_by(&self, marker: &str) -> bool {
        self.last_sub_event().is_some_and(|s| s.name == marker)
    }

    /// Time of the last sub-event, or None when the operation timed out
    pub fn total_time(&self) -> Option<i64> {
        if self.timed_out {
            None
        } else {
            self.last_sub_event().map(|s| s.time)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_with_method() {
        let ev = RawEvent::new("rpc", "7", Some("greet"), 1, "begin");
        assert_eq!(GroupKey::for_event(&ev).as_str(), "rpc-7-greet");
    }

    #[test]
    fn test_group_key_without_method() {
        let ev = RawEvent::new("startup", "bootstrap", None, 1, "begin");
        assert_eq!(GroupKey::for_event(&ev).to_string(), "startup-bootstrap");
    }

    #[test]
    fn test_group_key_empty_method_ignored() {
        let ev = RawEvent::new("startup", "bootstrap", Some(""), 1, "begin");
        assert_eq!(GroupKey::for_event(&ev).as_str(), "startup-bootstrap");
    }

    #[test]
    fn test_parse_host_payload() {
        let line = r#"{"moduleName":"hello","sessionId":"s1","subSystem":"rpc","evtGroup":"3","method":"GreetingService_Proxy.greetServer","millis":1000,"type":"begin"}"#;
        let ev = RawEvent::from_json_line(line).unwrap();
        assert_eq!(ev.subsystem, "rpc");
        assert_eq!(ev.event_group, "3");
        assert_eq!(ev.method.as_deref(), Some("GreetingService_Proxy.greetServer"));
        assert_eq!(ev.millis, 1000);
        assert_eq!(ev.sub_event, "begin");
        assert_eq!(ev.module_name.as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        let line = r#"{"subSystem":"rpc","evtGroup":"3","millis":1000}"#;
        assert!(RawEvent::from_json_line(line).is_err());
    }

    #[test]
    fn test_relative_times_and_negative_skew() {
        let mut op = CollatedEvent::open(&RawEvent::new("rpc", "1", None, 1000, "begin"));
        op.append(&RawEvent::new("rpc", "1", None, 1050, "requestSent"));
        op.append(&RawEvent::new("rpc", "1", None, 990, "end"));
        let times: Vec<i64> = op.sub_events.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0, 50, -10]);
        assert!(op.is_terminated_by("end"));
        assert_eq!(op.total_time(), Some(-10));
    }

    #[test]
    fn test_total_time_when_timed_out() {
        let mut op = CollatedEvent::open(&RawEvent::new("rpc", "1", None, 1000, "begin"));
        op.timed_out = true;
        assert_eq!(op.total_time(), None);
    }

    #[test]
    fn test_collated_event_serializes_host_field_names() {
        let op = CollatedEvent::open(&RawEvent::new("rpc", "G", Some("greet"), 5, "begin"));
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["uniqueKey"], "rpc-G-greet");
        assert_eq!(json["subEvents"][0]["time"], 0);
        assert_eq!(json["timedOut"], false);
    }
}
