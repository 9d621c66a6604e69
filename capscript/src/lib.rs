//! CapScript: a capability-tracking restricted-language runtime for agentic
//! LLM pipelines.
//!
//! A trusted planner emits a CapScript program; this crate parses it,
//! validates it against a closed grammar, and evaluates it while tagging
//! every runtime value with provenance (where it came from) and reader
//! (who may see it) metadata. Every side-effecting tool call is gated by
//! pluggable security policies that inspect the accumulated capability of
//! its arguments, so untrusted data picked up along the way — web pages,
//! emails, tool output — can never silently redirect an action.
//!
//! ```
//! use std::sync::Arc;
//!
//! use capscript::runtime::{Interpreter, PolicyRegistry, StaticExtractor, ToolRegistry};
//!
//! let interpreter = Interpreter::new(
//!     ToolRegistry::new(),
//!     PolicyRegistry::new(),
//!     Arc::new(StaticExtractor::new()),
//! );
//! let outcome = interpreter.execute("x = 10 + 5\ny = x - 3\ny").unwrap();
//! assert_eq!(outcome.result, capscript::runtime::Value::Int(12));
//! ```

pub mod ast;
pub mod config;
pub mod parser;
pub mod runtime;
pub mod validator;

pub use config::{InterpreterConfig, RunMode};
pub use runtime::{
    CapscriptError, ExecutionOutcome, Interpreter, PolicyRegistry, RuntimeResult, ToolRegistry,
    Value,
};
