//! Per-execution arena of capability-tagged values.
//!
//! Dependency edges are stored as arena indices, never owning references: a
//! dependency's lifetime is the execution, not the value that points at it,
//! and indices cannot form ownership cycles across executions. The arena is
//! created at the start of one `execute` call and dropped at its end.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::runtime::capability::Capability;
use crate::runtime::values::Value;

/// Index of a [`TaggedValue`] in its execution's [`ValueArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueId(usize);

/// A raw value plus its capability and its non-owning dependency edges.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedValue {
    pub raw: Value,
    pub capability: Capability,
    pub deps: Vec<ValueId>,
}

#[derive(Debug, Default)]
pub struct ValueArena {
    values: Vec<TaggedValue>,
}

impl ValueArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn insert(&mut self, value: TaggedValue) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(value);
        id
    }

    /// A literal appearing directly in program text: trusted by construction.
    pub fn user_literal(&mut self, raw: Value) -> ValueId {
        self.insert(TaggedValue {
            raw,
            capability: Capability::user_literal(),
            deps: Vec::new(),
        })
    }

    /// The result of an operation over `deps`.
    pub fn derived(&mut self, raw: Value, deps: Vec<ValueId>) -> ValueId {
        self.insert(TaggedValue {
            raw,
            capability: Capability::derived(),
            deps,
        })
    }

    /// A value carved out of another (loop items, destructured elements): no
    /// own sources, provenance flows entirely through the dependency.
    pub fn inherited(&mut self, raw: Value, deps: Vec<ValueId>) -> ValueId {
        self.insert(TaggedValue {
            raw,
            capability: Capability::default(),
            deps,
        })
    }

    pub fn get(&self, id: ValueId) -> &TaggedValue {
        &self.values[id.0]
    }

    pub fn get_mut(&mut self, id: ValueId) -> &mut TaggedValue {
        &mut self.values[id.0]
    }

    pub fn raw(&self, id: ValueId) -> &Value {
        &self.values[id.0].raw
    }

    /// Adds a dependency edge, ignoring self-edges and duplicates.
    pub fn add_dependency(&mut self, id: ValueId, dep: ValueId) {
        if id == dep {
            return;
        }
        let value = &mut self.values[id.0];
        if !value.deps.contains(&dep) {
            value.deps.push(dep);
        }
    }

    /// Transitive dependency closure of `id`, excluding `id` itself.
    /// Cycle-safe: every node is visited at most once.
    pub fn dependency_closure(&self, id: ValueId) -> BTreeSet<ValueId> {
        let mut visited: BTreeSet<ValueId> = BTreeSet::new();
        let mut to_visit: Vec<ValueId> = self.values[id.0].deps.clone();

        while let Some(current) = to_visit.pop() {
            if visited.insert(current) {
                to_visit.extend(self.values[current.0].deps.iter().copied());
            }
        }

        visited.remove(&id);
        visited
    }

    /// The value's own capability merged with every transitively reachable
    /// dependency's capability. Sources can only widen and readers can only
    /// narrow as dependencies accumulate.
    pub fn merged_capability(&self, id: ValueId) -> Capability {
        let mut result = self.values[id.0].capability.clone();
        for dep in self.dependency_closure(id) {
            result = result.merge(&self.values[dep.0].capability);
        }
        result
    }

    /// True iff nothing untrusted appears anywhere in the merged capability.
    pub fn is_trusted(&self, id: ValueId) -> bool {
        self.merged_capability(id).is_trusted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::capability::{Capability, ReaderSet};

    #[test]
    fn closure_is_transitive_and_excludes_start() {
        let mut arena = ValueArena::new();
        let a = arena.user_literal(Value::Int(1));
        let b = arena.user_literal(Value::Int(2));
        let c = arena.derived(Value::Int(3), vec![a, b]);
        let d = arena.derived(Value::Int(4), vec![c]);

        let closure = arena.dependency_closure(d);
        assert!(closure.contains(&a));
        assert!(closure.contains(&b));
        assert!(closure.contains(&c));
        assert!(!closure.contains(&d));
    }

    #[test]
    fn closure_survives_cycles() {
        let mut arena = ValueArena::new();
        let a = arena.user_literal(Value::Int(1));
        let b = arena.derived(Value::Int(2), vec![a]);
        arena.add_dependency(a, b);

        let closure = arena.dependency_closure(b);
        assert!(closure.contains(&a));
        assert!(!closure.contains(&b));
    }

    #[test]
    fn merged_capability_narrows_readers() {
        let mut arena = ValueArena::new();
        let restricted = arena.insert(TaggedValue {
            raw: Value::Str("secret".into()),
            capability: Capability {
                sources: [crate::runtime::capability::DataSource::tool("get_file")]
                    .into_iter()
                    .collect(),
                readers: ReaderSet::principals(["alice"]),
            },
            deps: Vec::new(),
        });
        let open = arena.user_literal(Value::Str("note".into()));
        let combined = arena.derived(Value::Str("secret note".into()), vec![restricted, open]);

        let merged = arena.merged_capability(combined);
        assert_eq!(merged.readers, ReaderSet::principals(["alice"]));
        assert!(!arena.is_trusted(combined));
        assert!(arena.is_trusted(open));
    }
}
