//! Result of one program execution: final raw value plus the tool-call trace.

use serde::Serialize;

use crate::runtime::values::Value;

/// One recorded tool invocation: name, raw arguments, raw result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub tool: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
}

/// Append-only record of every tool call an execution made, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionTrace {
    entries: Vec<TraceEntry>,
}

impl ExecutionTrace {
    pub fn record(&mut self, tool: &str, args: serde_json::Value, result: serde_json::Value) {
        self.entries.push(TraceEntry {
            tool: tool.to_string(),
            args,
            result,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What `execute` hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Raw value of the last evaluated statement (`None` for an empty
    /// program).
    pub result: Value,
    pub trace: ExecutionTrace,
}
