// Name recovery for obfuscated output
//
// RPC methods are found in three hops:
// 1. the global holding the "check the network connection" failure message
// 2. the function referencing that global (the dispatch method, `$doInvoke`
//    in pretty mode)
// 3. every other function calling the dispatch method

use super::{
    class_from_type_id, describe_rpc_method, rpc_method_pretty_name, rpc_methods_calling,
    translated_classes, CompileMode, HeuristicError, MatcherSet, ModeMarkers, NameRecovery,
    RpcMethodDescriptor,
};
use crate::kv::EntryMap;
use crate::target::{JsFunction, TargetContext, Value};

/// Text of the failure message the RPC dispatcher references
pub const RPC_DISPATCH_LITERAL: &str = "check the network connection";

pub struct ObfuscatedRecovery<'a> {
    ctx: &'a TargetContext,
    matchers: MatcherSet,
    markers: ModeMarkers,
}

impl<'a> ObfuscatedRecovery<'a> {
    pub fn new(ctx: &'a TargetContext) -> Self {
        Self::with_matchers(ctx, MatcherSet::default())
    }

    pub fn with_matchers(ctx: &'a TargetContext, matchers: MatcherSet) -> Self {
        Self {
            ctx,
            matchers,
            markers: ModeMarkers::OBFUSCATED,
        }
    }

    /// Identifier of the RPC dispatch method, found through the literal anchor
    pub fn dispatch_method_name(&self) -> Option<String> {
        let holders = self.ctx.globals().filter(|_, value| {
            value
                .as_str()
                .is_some_and(|s| s.contains(RPC_DISPATCH_LITERAL))
        });
        let variable = holders.first_key()?;

        let referencing = self.ctx.globals().filter(|_, value| {
            value
                .as_function()
                .is_some_and(|f| f.source().contains(variable))
        });
        referencing.first_key().map(String::from)
    }

    /// `getClass()` result on the prototype, else the raw identifier
    fn class_pretty_name(&self, raw_name: &str, class: &JsFunction) -> String {
        class
            .prototype_member(self.markers.class_getter)
            .and_then(Value::as_function)
            .and_then(JsFunction::call)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .unwrap_or_else(|| raw_name.to_string())
    }
}

impl NameRecovery for ObfuscatedRecovery<'_> {
    fn mode(&self) -> CompileMode {
        CompileMode::Obfuscated
    }

    fn get_all_rpc_methods(&self) -> EntryMap<JsFunction> {
        let Some(dispatch) = self.dispatch_method_name() else {
            tracing::warn!(context = self.ctx.label(), "RPC dispatch method not found");
            return EntryMap::new();
        };
        tracing::debug!(dispatch = %dispatch, "RPC dispatch method located");

        rpc_methods_calling(self.ctx, &dispatch).map(|raw_name, method| {
            (
                rpc_method_pretty_name(self.ctx, &self.matchers, raw_name, method),
                method.clone(),
            )
        })
    }

    fn get_all_classes(&self) -> EntryMap<JsFunction> {
        translated_classes(self.ctx, &self.markers)
            .map(|raw_name, class| (self.class_pretty_name(raw_name, class), class.clone()))
    }

    fn get_class_from_type_id(&self, type_id: i64) -> Option<String> {
        class_from_type_id(&self.get_all_classes(), &self.markers, type_id)
    }

    fn deobfuscate_rpc_method(&self, name: &str) -> Result<RpcMethodDescriptor, HeuristicError> {
        describe_rpc_method(self.ctx, &self.matchers, name)
    }
}
