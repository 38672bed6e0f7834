//! Summary of recovered names for display
//!
//! Produces the two lists a viewer shows: RPC method names and class names.
//! Transform-helper names never appear, and JRE/GWT library classes (names
//! containing `java` or `google`) are left out of the class list.

use crate::heuristics::{recovery_for, CompileMode, NameRecovery};
use crate::kv::is_helper_name;
use crate::locator::Host;
use crate::target::TargetContext;
use serde::Serialize;
use std::fmt::Write as _;

const LIBRARY_CLASS_MARKERS: [&str; 2] = ["java", "google"];

/// Message shown when the host has no GWT module
pub const NO_TARGET_MESSAGE: &str = "Website doesn't seem to use GWT";

/// Whether a class name belongs in the class list
pub fn is_listed_class(name: &str) -> bool {
    !is_helper_name(name) && !LIBRARY_CLASS_MARKERS.iter().any(|m| name.contains(m))
}

/// Recovered names for the first GWT context of a host
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub has_target: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gwt_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<CompileMode>,
    pub rpc_methods: Vec<String>,
    pub classes: Vec<String>,
}

impl InspectionReport {
    pub fn render_text(&self) -> String {
        if !self.has_target {
            return format!("{}\n", NO_TARGET_MESSAGE);
        }

        let mut out = String::new();
        let _ = writeln!(out, "=== Deobfuscated GWT Code ===");
        if let Some(ctx) = &self.context {
            let _ = writeln!(
                out,
                "Context: {} (module {}, GWT {}, {} mode)",
                ctx,
                self.module_name.as_deref().unwrap_or("?"),
                self.gwt_version.as_deref().unwrap_or("?"),
                self.mode.map(|m| m.to_string()).unwrap_or_default(),
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "RPC Methods ({}):", self.rpc_methods.len());
        for name in &self.rpc_methods {
            let _ = writeln!(out, "  {}", name);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Classes ({}):", self.classes.len());
        for name in &self.classes {
            let _ = writeln!(out, "  {}", name);
        }
        out
    }
}

/// Query surface over the first located GWT context
pub struct Inspector<'a> {
    target: Option<&'a TargetContext>,
    recovery: Option<Box<dyn NameRecovery + 'a>>,
}

impl<'a> Inspector<'a> {
    pub fn new(host: &'a Host) -> Self {
        let target = host.first_target();
        Self {
            target,
            recovery: target.map(recovery_for),
        }
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    /// Heuristics for the inspected context
    pub fn recovery(&self) -> Option<&(dyn NameRecovery + 'a)> {
        self.recovery.as_deref()
    }

    pub fn rpc_method_names(&self) -> Vec<String> {
        let Some(recovery) = self.recovery() else {
            return Vec::new();
        };
        recovery
            .get_all_rpc_methods()
            .keys()
            .filter(|name| !is_helper_name(name))
            .map(String::from)
            .collect()
    }

    pub fn class_names(&self) -> Vec<String> {
        let Some(recovery) = self.recovery() else {
            return Vec::new();
        };
        recovery
            .get_all_classes()
            .keys()
            .filter(|name| is_listed_class(name))
            .map(String::from)
            .collect()
    }

    pub fn report(&self) -> InspectionReport {
        InspectionReport {
            has_target: self.has_target(),
            context: self.target.map(|t| t.label().to_string()),
            module_name: self.target.and_then(|t| t.module_name()).map(String::from),
            gwt_version: self.target.and_then(|t| t.gwt_version()).map(String::from),
            mode: self.recovery().map(|r| r.mode()),
            rpc_methods: self.rpc_method_names(),
            classes: self.class_names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::HostSnapshot;

    const HOST: &str = r#"{
        "frames": [{"globals": {
            "$gwt_version": "2.0.3",
            "$moduleName": "hello",
            "Wg": "check the network connection",
            "Hv": {"$fn": "function Hv(a){throw Wg}"},
            "Ux": {"$fn": "function Ux(a){Hv(a)}"},
            "Ao": {"$fn": "function Ao(){}", "prototype": {
                "eQ": {"$fn": "function(){}"},
                "gC": {"$fn": "function(){}", "returns": "java.lang.Object"}
            }},
            "Bo": {"$fn": "function Bo(){}", "prototype": {
                "eQ": {"$fn": "function(){}"},
                "gC": {"$fn": "function(){}", "returns": "com.google.gwt.user.client.ui.Button"}
            }},
            "Do": {"$fn": "function Do(){}", "prototype": {
                "eQ": {"$fn": "function(){}"},
                "gC": {"$fn": "function(){}", "returns": "com.example.client.Hello"}
            }}
        }}]
    }"#;

    #[test]
    fn test_class_listing_rules() {
        assert!(is_listed_class("com.example.client.Hello"));
        assert!(!is_listed_class("java.util.ArrayList"));
        assert!(!is_listed_class("com.google.gwt.core.client.JavaScriptObject"));
        assert!(!is_listed_class("getFirstKey"));
    }

    #[test]
    fn test_report_lists_recovered_names() {
        let host = crate::locator::Host::from(HostSnapshot::from_json(HOST).unwrap());
        let inspector = Inspector::new(&host);
        assert!(inspector.has_target());

        let report = inspector.report();
        assert_eq!(report.context.as_deref(), Some("frame[0]"));
        assert_eq!(report.mode, Some(CompileMode::Obfuscated));
        assert_eq!(report.rpc_methods, vec!["Ux"]);
        assert_eq!(report.classes, vec!["com.example.client.Hello"]);

        let text = report.render_text();
        assert!(text.contains("RPC Methods (1):"));
        assert!(text.contains("  com.example.client.Hello"));
    }

    #[test]
    fn test_report_without_target() {
        let host = crate::locator::Host::from(HostSnapshot::default());
        let inspector = Inspector::new(&host);
        assert!(!inspector.has_target());
        let report = inspector.report();
        assert!(report.rpc_methods.is_empty());
        assert_eq!(report.render_text(), format!("{}\n", NO_TARGET_MESSAGE));
    }
}
