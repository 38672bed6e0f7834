// Name recovery for compiled GWT modules
//
// The GWT compiler renames every Java method and class. Two compile styles
// matter here:
// - pretty: identifiers stay legible (`$doInvoke`, `nullMethod` is present)
// - obfuscated: identifiers are two or three characters (`eQ`, `gC`, `tI`)
//
// Both variants implement `NameRecovery` with identical operations; they only
// differ in how the RPC dispatch method is found and whether class names need
// resolving. Every heuristic is best-effort: name lookups degrade to the raw
// identifier, parameter and append-helper lookups fail with `HeuristicError`.

mod matchers;
mod obfuscated;
mod pretty;

pub use matchers::{MatcherSet, APPEND_CALL_TEMPLATE, FORMAL_PARAMETERS_PATTERN, RPC_CONSTANT_PATTERN};
pub use obfuscated::ObfuscatedRecovery;
pub use pretty::PrettyRecovery;

use crate::kv::EntryMap;
use crate::target::{JsFunction, TargetContext, Value};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Suffix the compiler appends to RPC proxy class names
pub const PROXY_SUFFIX: &str = "_Proxy";

/// Global only present in pretty-mode output
pub const PRETTY_MODE_PROBE: &str = "nullMethod";

/// The heuristics no longer match the target's generated code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {message}")]
pub struct HeuristicError {
    pub operation: &'static str,
    pub message: String,
}

impl HeuristicError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// How the target was compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    Pretty,
    /// Also covers detailed mode, which has no reliable probe
    Obfuscated,
}

impl CompileMode {
    pub fn detect(ctx: &TargetContext) -> Self {
        if ctx.get(PRETTY_MODE_PROBE).is_some() {
            CompileMode::Pretty
        } else {
            CompileMode::Obfuscated
        }
    }
}

impl fmt::Display for CompileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileMode::Pretty => f.write_str("pretty"),
            CompileMode::Obfuscated => f.write_str("obfuscated"),
        }
    }
}

/// Identifiers the compiler uses for well-known members in each mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeMarkers {
    /// `equals()` on a translated class prototype
    pub equality_method: &'static str,
    /// `getClass()` on a translated class prototype
    pub class_getter: &'static str,
    /// Runtime type id stored on a prototype
    pub type_id_field: &'static str,
}

impl ModeMarkers {
    pub const OBFUSCATED: ModeMarkers = ModeMarkers {
        equality_method: "eQ",
        class_getter: "gC",
        type_id_field: "tI",
    };

    pub const PRETTY: ModeMarkers = ModeMarkers {
        equality_method: "equals$",
        class_getter: "getClass$",
        type_id_field: "typeId$",
    };
}

/// What could be recovered about one RPC method
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RpcMethodDescriptor {
    pub raw_name: String,
    pub pretty_name: String,
    pub parameter_count: usize,
    /// Function that appends the method's parameters to the RPC stream
    pub append_helper: String,
}

impl RpcMethodDescriptor {
    /// True for the descriptor returned when the identifier does not exist
    pub fn is_empty(&self) -> bool {
        self.raw_name.is_empty()
    }
}

/// Name recovery operations over one target context
pub trait NameRecovery {
    fn mode(&self) -> CompileMode;

    /// RPC methods keyed by recovered name (raw name when unresolved)
    fn get_all_rpc_methods(&self) -> EntryMap<JsFunction>;

    /// Translated classes keyed by recovered name (raw name when unresolved)
    fn get_all_classes(&self) -> EntryMap<JsFunction>;

    /// Name of the class whose prototype carries `type_id`
    fn get_class_from_type_id(&self, type_id: i64) -> Option<String>;

    /// Describe one RPC method by its raw identifier
    fn deobfuscate_rpc_method(&self, name: &str) -> Result<RpcMethodDescriptor, HeuristicError>;
}

/// Pick the variant matching how `ctx` was compiled
pub fn recovery_for(ctx: &TargetContext) -> Box<dyn NameRecovery + '_> {
    let mode = CompileMode::detect(ctx);
    tracing::debug!(context = ctx.label(), %mode, "compile mode detected");
    match mode {
        CompileMode::Pretty => Box::new(PrettyRecovery::new(ctx)),
        CompileMode::Obfuscated => Box::new(ObfuscatedRecovery::new(ctx)),
    }
}

/// Functions, other than the dispatcher itself, whose source calls `dispatch(`
fn rpc_methods_calling(ctx: &TargetContext, dispatch: &str) -> EntryMap<JsFunction> {
    let call = format!("{}(", dispatch);
    ctx.globals().reduce(EntryMap::new(), |mut methods, key, value| {
        if let Some(f) = value.as_function() {
            if !key.contains(dispatch) && f.source().contains(&call) {
                methods.insert(key, f.clone());
            }
        }
        methods
    })
}

/// Constructors whose prototype has the equality method
fn translated_classes(ctx: &TargetContext, markers: &ModeMarkers) -> EntryMap<JsFunction> {
    ctx.globals().reduce(EntryMap::new(), |mut classes, key, value| {
        if let Some(f) = value.as_function() {
            if f.has_prototype_method(markers.equality_method) {
                classes.insert(key, f.clone());
            }
        }
        classes
    })
}

/// Pretty name of an RPC method from the constant its stats call logs.
///
/// `GreetingService_Proxy.greetServer` becomes `GreetingService.greetServer`;
/// any miss falls back to `raw_name`.
pub fn rpc_method_pretty_name(
    ctx: &TargetContext,
    matchers: &MatcherSet,
    raw_name: &str,
    method: &JsFunction,
) -> String {
    matchers
        .rpc_constant(method.source())
        .and_then(|constant| ctx.get(constant))
        .and_then(Value::as_str)
        .map(|value| value.replacen(PROXY_SUFFIX, "", 1))
        .unwrap_or_else(|| raw_name.to_string())
}

fn class_from_type_id(
    classes: &EntryMap<JsFunction>,
    markers: &ModeMarkers,
    type_id: i64,
) -> Option<String> {
    classes
        .filter(|_, class| {
            class
                .prototype_member(markers.type_id_field)
                .and_then(Value::as_integer)
                == Some(type_id)
        })
        .first_key()
        .map(String::from)
}

/// Shared by both variants: pretty name, parameter count and append helper
fn describe_rpc_method(
    ctx: &TargetContext,
    matchers: &MatcherSet,
    name: &str,
) -> Result<RpcMethodDescriptor, HeuristicError> {
    let Some(method) = ctx.get(name).and_then(Value::as_function) else {
        return Ok(RpcMethodDescriptor::default());
    };

    let pretty_name = rpc_method_pretty_name(ctx, matchers, name, method);

    let parameter_count = matchers.parameter_count(method.source()).ok_or_else(|| {
        HeuristicError::new(
            "parameter_count",
            format!("no formal parameter list in source of {}", name),
        )
    })?;

    let append_helper = resolve_append_helper(ctx, matchers, name, method, parameter_count)?;

    Ok(RpcMethodDescriptor {
        raw_name: name.to_string(),
        pretty_name,
        parameter_count,
        append_helper,
    })
}

/// The proxy writes `parameter_count - 2` through a string constant; the
/// function called with that constant is the append helper.
fn resolve_append_helper(
    ctx: &TargetContext,
    matchers: &MatcherSet,
    name: &str,
    method: &JsFunction,
    parameter_count: usize,
) -> Result<String, HeuristicError> {
    let written = (parameter_count as i64 - 2).to_string();

    let constants = ctx
        .globals()
        .filter(|_, value| value.as_str() == Some(written.as_str()));
    let constant = constants.first_key().ok_or_else(|| {
        HeuristicError::new(
            "append_helper",
            format!("no string constant equal to \"{}\"", written),
        )
    })?;

    matchers
        .append_helper(method.source(), constant)
        .map(String::from)
        .ok_or_else(|| {
            HeuristicError::new(
                "append_helper",
                format!("{} never passes {} to a helper", name, constant),
            )
        })
}
