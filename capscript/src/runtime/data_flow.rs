//! Named-variable data-flow graph for one execution.
//!
//! Tracks which value each name is bound to, name-level dependency edges, and
//! (in strict mode) the stack of control-flow contexts whose condition
//! variables taint every assignment made inside them.

use std::collections::{BTreeSet, HashMap};

use crate::runtime::arena::{ValueArena, ValueId};
use crate::runtime::capability::Capability;

#[derive(Debug, Default)]
pub struct DataFlowGraph {
    nodes: HashMap<String, ValueId>,
    edges: HashMap<String, BTreeSet<String>>,
    control_flow_stack: Vec<BTreeSet<String>>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or rebinds) a variable.
    pub fn add_variable(&mut self, name: &str, value: ValueId) {
        self.nodes.insert(name.to_string(), value);
        self.edges.entry(name.to_string()).or_default();
    }

    /// Adds a name-level dependency edge.
    pub fn add_dependency(&mut self, name: &str, depends_on: &str) {
        self.edges
            .entry(name.to_string())
            .or_default()
            .insert(depends_on.to_string());
    }

    pub fn value_of(&self, name: &str) -> Option<ValueId> {
        self.nodes.get(name).copied()
    }

    /// Enters an `if`/`for` body whose condition references `condition_vars`.
    pub fn push_control_flow(&mut self, condition_vars: BTreeSet<String>) {
        self.control_flow_stack.push(condition_vars);
    }

    pub fn pop_control_flow(&mut self) -> BTreeSet<String> {
        self.control_flow_stack.pop().unwrap_or_default()
    }

    /// Union of all condition variables on the current control-flow stack.
    pub fn control_flow_dependencies(&self) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        for vars in &self.control_flow_stack {
            result.extend(vars.iter().cloned());
        }
        result
    }

    pub fn in_control_flow(&self) -> bool {
        !self.control_flow_stack.is_empty()
    }

    /// All names `name` transitively depends on, excluding itself.
    pub fn all_dependencies(&self, name: &str) -> BTreeSet<String> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut to_visit = vec![name.to_string()];

        while let Some(current) = to_visit.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(deps) = self.edges.get(&current) {
                to_visit.extend(deps.iter().cloned());
            }
        }

        visited.remove(name);
        visited
    }

    /// Merged capability of a name: its value's merged capability folded with
    /// every name-level dependency's.
    pub fn merged_capability(&self, name: &str, arena: &ValueArena) -> Option<Capability> {
        let id = self.value_of(name)?;
        let mut result = arena.merged_capability(id);
        for dep_name in self.all_dependencies(name) {
            if let Some(dep_id) = self.nodes.get(&dep_name) {
                result = result.merge(&arena.merged_capability(*dep_id));
            }
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::values::Value;

    #[test]
    fn transitive_name_dependencies() {
        let mut arena = ValueArena::new();
        let mut graph = DataFlowGraph::new();
        for name in ["a", "b", "c"] {
            let id = arena.user_literal(Value::Int(0));
            graph.add_variable(name, id);
        }
        graph.add_dependency("c", "b");
        graph.add_dependency("b", "a");

        let deps = graph.all_dependencies("c");
        assert!(deps.contains("a"));
        assert!(deps.contains("b"));
        assert!(!deps.contains("c"));
    }

    #[test]
    fn control_flow_stack_unions() {
        let mut graph = DataFlowGraph::new();
        graph.push_control_flow(["x".to_string()].into_iter().collect());
        graph.push_control_flow(["y".to_string()].into_iter().collect());
        let deps = graph.control_flow_dependencies();
        assert!(deps.contains("x") && deps.contains("y"));
        graph.pop_control_flow();
        assert!(!graph.control_flow_dependencies().contains("y"));
    }
}
