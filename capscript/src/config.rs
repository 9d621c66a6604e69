//! Interpreter configuration.
//!
//! Configuration is plain data fixed at interpreter construction time; there
//! is no file loading here. The orchestrator that owns configuration files
//! builds an [`InterpreterConfig`] and hands it over.

use serde::{Deserialize, Serialize};

/// Dependency-tracking modes for an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Dependency edges come only from data operands.
    Normal,
    /// Entering an `if`/`for` body additionally taints every assignment in
    /// the body with the condition/iterable's referenced variables.
    Strict,
}

/// Configuration for one [`crate::runtime::evaluator::Interpreter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Dependency-tracking mode, fixed for the whole execution.
    pub mode: RunMode,
    /// Maximum combined `for`-loop and comprehension iterations per
    /// execution. Iteration `max_iterations + 1` fails with a resource-limit
    /// error.
    pub max_iterations: usize,
    /// Upper bound on the length of any collection a builtin may materialize
    /// (`range`, sequence repetition). Guards allocation amplification that
    /// the iteration bound alone cannot catch.
    pub max_collection_size: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Normal,
            max_iterations: 100,
            max_collection_size: 100_000,
        }
    }
}

impl InterpreterConfig {
    /// Configuration with strict control-flow tainting enabled.
    pub fn strict() -> Self {
        Self {
            mode: RunMode::Strict,
            ..Self::default()
        }
    }
}
