//! Quarantined data-extraction gate.
//!
//! The single sanctioned way untrusted free text becomes structured program
//! data. The extractor behind the trait has no access to tools or
//! capabilities — it receives query text and a schema, and returns JSON that
//! is validated against the schema before it is let into the program. The
//! gate taints the result with the entire dependency closure of the query,
//! and tags it with a distinguished non-`User` source, so nothing extracted
//! here can ever count as trusted on its own.

use std::collections::HashMap;
use std::fmt;

use crate::runtime::environment::{Environment, RecordSchema};
use crate::runtime::error::{CapscriptError, RuntimeResult};
use crate::runtime::values::Value;

/// Reserved call name for the extraction gate.
pub const EXTRACT_FN: &str = "extract_data";

/// Failure modes of an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The source text did not contain enough information to fill the
    /// schema.
    InsufficientInformation { message: String },
    /// The extractor itself failed (transport, model error). The message is
    /// untrusted: it may embed attacker-controlled content.
    Failed { message: String },
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::InsufficientInformation { message } => {
                write!(f, "not enough information: {}", message)
            }
            ExtractionError::Failed { message } => write!(f, "extraction failed: {}", message),
        }
    }
}

impl std::error::Error for ExtractionError {}

/// The quarantined structured-data extractor.
///
/// Implementations parse free text into a JSON object matching the given
/// schema and nothing else: they cannot call tools, and their output is
/// validated before use.
pub trait QuarantinedExtractor: Send + Sync {
    fn extract(
        &self,
        query: &str,
        schema: &RecordSchema,
    ) -> Result<serde_json::Value, ExtractionError>;
}

/// Validates extractor output against the schema and decodes it into a
/// record value. Any mismatch is treated as the extractor failing to fill
/// the schema.
pub fn decode_extracted(
    schema: &RecordSchema,
    env: &Environment,
    json: &serde_json::Value,
) -> RuntimeResult<Value> {
    let json_schema = schema.to_json_schema(env);
    if !jsonschema::is_valid(&json_schema, json) {
        return Err(CapscriptError::InsufficientInformation {
            message: format!("extractor output does not match schema {}", schema.name),
        });
    }
    schema
        .from_json(json, env)
        .map_err(|message| CapscriptError::InsufficientInformation { message })
}

/// Canned extractor for tests and offline runs: one JSON response per schema
/// name. Queries it has no answer for fail with `InsufficientInformation`.
#[derive(Debug, Default, Clone)]
pub struct StaticExtractor {
    responses: HashMap<String, serde_json::Value>,
}

impl StaticExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, schema_name: &str, response: serde_json::Value) -> Self {
        self.responses.insert(schema_name.to_string(), response);
        self
    }
}

impl QuarantinedExtractor for StaticExtractor {
    fn extract(
        &self,
        _query: &str,
        schema: &RecordSchema,
    ) -> Result<serde_json::Value, ExtractionError> {
        self.responses
            .get(&schema.name)
            .cloned()
            .ok_or_else(|| ExtractionError::InsufficientInformation {
                message: format!("no data available for schema {}", schema.name),
            })
    }
}
