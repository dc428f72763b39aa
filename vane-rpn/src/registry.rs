//! Operation registry with overload chains.
//!
//! Each name (case-insensitive) maps to an ordered chain of operations.
//! Registering a second operation under a taken name overloads it: the
//! newcomer becomes the head and the predecessor stays behind it, so the
//! chain is scanned newest first. The scan order is stable and part of the
//! engine contract.

use std::collections::HashMap;
use std::sync::Arc;

use crate::filter::Filter;
use crate::operations::Op;

/// One overload: an operation and its acceptance filter.
#[derive(Debug, Clone)]
pub struct OpEntry {
    /// Acceptance filter; absent means the overload always accepts.
    pub filter: Option<Filter>,
    /// The operation itself.
    pub op: Op,
}

/// A chain of overloads, scanned head first.
pub type OverloadChain = Arc<Vec<OpEntry>>;

/// Name → overload chain map.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    map: HashMap<String, OverloadChain>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in operations module registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::operations::register_all(&mut registry);
        registry
    }

    /// Register an operation, overloading any previous holder of the name.
    pub fn register(&mut self, name: &str, filter: Option<Filter>, op: Op) {
        let key = name.to_uppercase();
        let entry = OpEntry { filter, op };
        let chain = self.map.entry(key).or_default();
        let mut ops = chain.as_ref().clone();
        ops.insert(0, entry);
        *chain = Arc::new(ops);
    }

    /// Look up the overload chain for a name.
    pub fn lookup(&self, name: &str) -> Option<OverloadChain> {
        self.map.get(&name.to_uppercase()).cloned()
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Return `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{basic, Op};

    #[test]
    fn names_are_case_insensitive() {
        let mut registry = Registry::new();
        registry.register("Nop", None, Op::Basic(basic::Opcode::Nop));
        assert!(registry.lookup("NOP").is_some());
        assert!(registry.lookup("nop").is_some());
    }

    #[test]
    fn overloads_scan_newest_first() {
        let mut registry = Registry::new();
        registry.register("X", None, Op::Basic(basic::Opcode::Nop));
        registry.register("X", None, Op::Basic(basic::Opcode::Fail));
        let chain = registry.lookup("x").unwrap();
        assert_eq!(chain.len(), 2);
        assert!(matches!(chain[0].op, Op::Basic(basic::Opcode::Fail)));
        assert!(matches!(chain[1].op, Op::Basic(basic::Opcode::Nop)));
    }
}
