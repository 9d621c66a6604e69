//! Runtime: capability-tagged values, the data-flow graph, the policy
//! engine, and the evaluator that ties them together.

pub mod arena;
pub mod capability;
pub mod data_flow;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod execution_outcome;
pub mod quarantine;
pub mod security;
pub mod stdlib;
pub mod tools;
pub mod values;

pub use arena::{TaggedValue, ValueArena, ValueId};
pub use capability::{Capability, DataSource, ReaderSet, SourceKind};
pub use data_flow::DataFlowGraph;
pub use environment::{Environment, FieldSchema, RecordSchema};
pub use error::{CapscriptError, RuntimeResult};
pub use evaluator::Interpreter;
pub use execution_outcome::{ExecutionOutcome, ExecutionTrace, TraceEntry};
pub use quarantine::{ExtractionError, QuarantinedExtractor, StaticExtractor, EXTRACT_FN};
pub use security::{
    Policy, PolicyBuilder, PolicyContext, PolicyDecision, PolicyRegistry, PolicyResult,
};
pub use tools::{ParamSpec, ToolArgs, ToolDefinition, ToolError, ToolRegistry};
pub use values::{DictKey, ErrorValue, Value};
