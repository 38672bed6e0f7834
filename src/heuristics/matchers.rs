// Source-text matchers for name recovery
//
// Each matcher encodes one assumption about what the GWT compiler emits.
// When the compiler output changes, swap the pattern here; the heuristics
// and the collation engine stay untouched.

use regex::Regex;

/// `$stats({..., method:$H, ...})` inside an RPC proxy method
pub const RPC_CONSTANT_PATTERN: &str = r"stats\(.*,\s*method\s*:\s*([a-zA-Z0-9$_]*)\s*,";

/// `function name(a,b,c)` at the start of a function's source
pub const FORMAL_PARAMETERS_PATTERN: &str = r"^\s*function\s*[\w$]*\s*\(([^)]*)\)";

/// `helper(writer, ID)` where ID is the constant holding the parameter count;
/// `{id}` is replaced by the escaped identifier
pub const APPEND_CALL_TEMPLATE: &str = r"([A-Za-z_$][\w$]*)\(\s*[A-Za-z_$][\w$]*\s*,\s*{id}\s*\)";

/// The regex strategies used by the heuristics
#[derive(Debug, Clone)]
pub struct MatcherSet {
    rpc_constant: Regex,
    formal_parameters: Regex,
    append_call_template: String,
}

impl Default for MatcherSet {
    fn default() -> Self {
        Self {
            rpc_constant: Regex::new(RPC_CONSTANT_PATTERN).expect("valid rpc constant regex"),
            formal_parameters: Regex::new(FORMAL_PARAMETERS_PATTERN)
                .expect("valid formal parameter regex"),
            append_call_template: APPEND_CALL_TEMPLATE.to_string(),
        }
    }
}

impl MatcherSet {
    /// Build a custom set. The first capture group of each pattern is the
    /// extracted token; the template must contain `{id}`.
    pub fn new(
        rpc_constant: &str,
        formal_parameters: &str,
        append_call_template: &str,
    ) -> Result<Self, regex::Error> {
        // validate the template once with a placeholder identifier
        Regex::new(&append_call_template.replace("{id}", "x"))?;
        Ok(Self {
            rpc_constant: Regex::new(rpc_constant)?,
            formal_parameters: Regex::new(formal_parameters)?,
            append_call_template: append_call_template.to_string(),
        })
    }

    /// Name of the constant an RPC method logs as its `method`
    pub fn rpc_constant<'s>(&self, source: &'s str) -> Option<&'s str> {
        self.rpc_constant
            .captures(source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Number of formal parameters in a function's source
    pub fn parameter_count(&self, source: &str) -> Option<usize> {
        let params = self.formal_parameters.captures(source)?.get(1)?.as_str();
        Some(
            params
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .count(),
        )
    }

    /// Function invoked with `constant` as its second argument
    pub fn append_helper<'s>(&self, source: &'s str, constant: &str) -> Option<&'s str> {
        let pattern = self
            .append_call_template
            .replace("{id}", &regex::escape(constant));
        let re = Regex::new(&pattern).ok()?;
        re.captures(source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}
