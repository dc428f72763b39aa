//! Engine parameters.

use std::collections::BTreeMap;

/// Key of the loop/recursion limit parameter.
pub const LOOP_LIMIT_PARAM: &str = "LoopLimit";
/// Key of the base time zone parameter.
pub const TIME_ZONE_PARAM: &str = "TimeZone";
/// Key prefix of macro definitions.
pub const MACRO_DEF_PREFIX: &str = "MacroDef.";

/// Default iteration and recursion cap.
pub const DEFAULT_LOOP_LIMIT: usize = 10_000;

/// Flat key→value engine parameters.
#[derive(Debug, Clone, Default)]
pub struct Params {
    map: BTreeMap<String, String>,
}

impl Params {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one parameter.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    /// Get one parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Define a macro: `decl` is `NAME` or `NAME(FORMAL, ...)`.
    pub fn define_macro(&mut self, decl: &str, body: &str) {
        self.set(format!("{MACRO_DEF_PREFIX}{decl}"), body);
    }

    /// The configured loop limit, or the default.
    pub fn loop_limit(&self) -> usize {
        self.get(LOOP_LIMIT_PARAM)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LOOP_LIMIT)
    }

    /// The configured base time zone name, if any.
    pub fn time_zone(&self) -> Option<&str> {
        self.get(TIME_ZONE_PARAM)
    }

    /// All macro definitions, as `(declaration, body)` pairs.
    pub fn macro_defs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().filter_map(|(key, value)| {
            key.strip_prefix(MACRO_DEF_PREFIX)
                .map(|decl| (decl, value.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let params = Params::new();
        assert_eq!(params.loop_limit(), DEFAULT_LOOP_LIMIT);
        assert_eq!(params.time_zone(), None);
    }

    #[test]
    fn macro_defs_are_prefixed() {
        let mut params = Params::new();
        params.define_macro("AVG(A,B)", "A B + 2 /");
        params.set("LoopLimit", "5");
        let defs: Vec<_> = params.macro_defs().collect();
        assert_eq!(defs, vec![("AVG(A,B)", "A B + 2 /")]);
        assert_eq!(params.loop_limit(), 5);
    }
}
