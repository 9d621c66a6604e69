//! Error taxonomy for CapScript execution.
//!
//! Every failure mode is an explicit variant so callers can tell a defense
//! firing (`PolicyViolation`) apart from a broken generated program
//! (`LanguageRestriction`, `UndefinedVariable`, ...) without string matching.
//! Nothing in this crate retries anything: errors propagate whole, with line
//! numbers and trust flags where they exist, and the orchestrator outside
//! this crate decides what to do next.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, CapscriptError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapscriptError {
    /// The program text did not parse.
    #[error("syntax error at line {line}: {message}")]
    Syntax { message: String, line: u32 },

    /// Grammar validation failed: the program uses a banned construct.
    /// Always fatal to the current execution; never retried without a new
    /// program.
    #[error("language restriction at line {line}: {message}")]
    LanguageRestriction { message: String, line: u32 },

    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    #[error("type mismatch in {operation}: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: String,
        actual: String,
        operation: String,
    },

    #[error("arity mismatch in {function}: expected {expected}, got {actual}")]
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("method not allowed on {type_name}: {method}")]
    MethodNotAllowed { type_name: String, method: String },

    /// The execution exceeded a configured resource bound. Signals the
    /// planner that its program is unbounded.
    #[error("resource limit exceeded: {what} (limit {limit})")]
    ResourceLimit { what: String, limit: usize },

    /// A security policy stopped a tool call. This is the defense working as
    /// intended, not a bug in the interpreter.
    #[error("policy violation for tool '{tool}': {reason} (requires confirmation: {requires_confirmation})")]
    PolicyViolation {
        tool: String,
        reason: String,
        requires_confirmation: bool,
        details: Option<serde_json::Value>,
    },

    /// The underlying tool raised. `trusted` says whether the message text is
    /// safe to relay verbatim or must be redacted first (tool error text can
    /// itself be attacker-controlled).
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution {
        tool: String,
        message: String,
        trusted: bool,
    },

    /// The quarantined extractor could not fill its output schema. Always
    /// treated as untrusted-origin text.
    #[error("not enough information: {message}")]
    InsufficientInformation { message: String },

    /// A `raise` statement in the program. `trusted` follows the raised
    /// value's merged capability.
    #[error("raised: {message}")]
    Raised { message: String, trusted: bool },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CapscriptError {
    /// Source line the error is anchored to, where one exists.
    pub fn line(&self) -> Option<u32> {
        match self {
            CapscriptError::Syntax { line, .. }
            | CapscriptError::LanguageRestriction { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Whether the error message is safe to show verbatim. Untrusted
    /// messages must be redacted before ever reaching the planner.
    pub fn is_trusted_message(&self) -> bool {
        match self {
            CapscriptError::ToolExecution { trusted, .. }
            | CapscriptError::Raised { trusted, .. } => *trusted,
            CapscriptError::InsufficientInformation { .. } => false,
            _ => true,
        }
    }

    /// True when this error is the policy engine doing its job rather than a
    /// defect in the generated program.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, CapscriptError::PolicyViolation { .. })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CapscriptError::Internal {
            message: message.into(),
        }
    }
}
