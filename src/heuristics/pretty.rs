// Name recovery for pretty output
//
// Identifiers are already legible, so the dispatch method is known by name
// and class names need no resolving.

use super::{
    class_from_type_id, describe_rpc_method, rpc_method_pretty_name, rpc_methods_calling,
    translated_classes, CompileMode, HeuristicError, MatcherSet, ModeMarkers, NameRecovery,
    RpcMethodDescriptor,
};
use crate::kv::EntryMap;
use crate::target::{JsFunction, TargetContext};

/// RPC dispatch method in pretty output
pub const DISPATCH_METHOD: &str = "$doInvoke";

pub struct PrettyRecovery<'a> {
    ctx: &'a TargetContext,
    matchers: MatcherSet,
    markers: ModeMarkers,
}

impl<'a> PrettyRecovery<'a> {
    pub fn new(ctx: &'a TargetContext) -> Self {
        Self::with_matchers(ctx, MatcherSet::default())
    }

    pub fn with_matchers(ctx: &'a TargetContext, matchers: MatcherSet) -> Self {
        Self {
            ctx,
            matchers,
            markers: ModeMarkers::PRETTY,
        }
    }
}

impl NameRecovery for PrettyRecovery<'_> {
    fn mode(&self) -> CompileMode {
        CompileMode::Pretty
    }

    fn get_all_rpc_methods(&self) -> EntryMap<JsFunction> {
        rpc_methods_calling(self.ctx, DISPATCH_METHOD).map(|raw_name, method| {
            (
                rpc_method_pretty_name(self.ctx, &self.matchers, raw_name, method),
                method.clone(),
            )
        })
    }

    fn get_all_classes(&self) -> EntryMap<JsFunction> {
        translated_classes(self.ctx, &self.markers)
    }

    fn get_class_from_type_id(&self, type_id: i64) -> Option<String> {
        class_from_type_id(&self.get_all_classes(), &self.markers, type_id)
    }

    fn deobfuscate_rpc_method(&self, name: &str) -> Result<RpcMethodDescriptor, HeuristicError> {
        describe_rpc_method(self.ctx, &self.matchers, name)
    }
}
