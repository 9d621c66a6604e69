//! Tool registry: the callable side-effecting surface exposed to programs.
//!
//! The registry is an explicit value passed to the interpreter at
//! construction time — there is no process-wide registry. Transport, auth and
//! timeouts for the underlying calls live outside this crate; a registered
//! function is just an in-process callable over raw values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::runtime::capability::{Capability, DataSource, ReaderSet};
use crate::runtime::values::Value;

/// Error raised by a tool implementation. `trusted` controls whether the
/// message text may be shown verbatim: error text derived from untrusted
/// content (remote service responses, document contents) must be flagged
/// untrusted so the caller redacts it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub message: String,
    pub trusted: bool,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trusted: true,
        }
    }

    pub fn untrusted(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trusted: false,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolError {}

/// Named arguments a tool receives, positionals already bound to their
/// declared parameter names.
pub type ToolArgs = BTreeMap<String, Value>;

pub type ToolFn = Arc<dyn Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync>;

/// Derives the capability of a tool result from the raw result and the raw
/// arguments, overriding the default structural derivation.
pub type CapabilityAnnotator = Arc<dyn Fn(&Value, &ToolArgs) -> Capability + Send + Sync>;

/// A declared tool parameter, used to bind positional arguments and to
/// render signatures for the planner prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            required: false,
        }
    }
}

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub function: ToolFn,
    pub annotator: Option<CapabilityAnnotator>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("has_annotator", &self.annotator.is_some())
            .finish()
    }
}

/// Registry of callable tools, immutable once handed to an interpreter.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) {
        self.tools.insert(definition.name.clone(), definition);
    }

    /// Convenience registration without an annotator.
    pub fn register_fn<F>(
        &mut self,
        name: &str,
        description: &str,
        params: Vec<ParamSpec>,
        function: F,
    ) where
        F: Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.register(ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            params,
            function: Arc::new(function),
            annotator: None,
        });
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Formatted signatures for the planner's system prompt.
    pub fn signature_text(&self) -> String {
        let mut lines = vec!["Available Tools:".to_string(), String::new()];
        for tool in self.tools.values() {
            lines.push(format!("## {}", tool.name));
            lines.push(format!("Description: {}", tool.description));
            lines.push("Parameters:".to_string());
            for param in &tool.params {
                let marker = if param.required {
                    "(required)"
                } else {
                    "(optional)"
                };
                lines.push(format!("  - {}: {} {}", param.name, param.ty, marker));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

/// Default reader derivation for tool results without a registered
/// annotator: recipients/sender/cc/bcc, participants, or owner/shared_with
/// fields become the reader set; anything else is Public.
pub fn derive_readers(result: &Value) -> ReaderSet {
    let fields: Vec<(&str, &Value)> = match result {
        Value::Record { fields, .. } => fields.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        Value::Dict(map) => map
            .iter()
            .filter_map(|(k, v)| match k {
                crate::runtime::values::DictKey::Str(s) => Some((s.as_str(), v)),
                _ => None,
            })
            .collect(),
        _ => return ReaderSet::Public,
    };

    let get = |name: &str| fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
    let mut readers: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    if let Some(recipients) = get("recipients") {
        collect_principals(recipients, &mut readers);
        if let Some(sender) = get("sender") {
            collect_principals(sender, &mut readers);
        }
        for extra in ["cc", "bcc"] {
            if let Some(value) = get(extra) {
                collect_principals(value, &mut readers);
            }
        }
    } else if let Some(participants) = get("participants") {
        collect_principals(participants, &mut readers);
    } else if let Some(shared_with) = get("shared_with") {
        if let Value::Dict(map) = shared_with {
            for key in map.keys() {
                readers.insert(key.to_string());
            }
        } else {
            collect_principals(shared_with, &mut readers);
        }
        if let Some(owner) = get("owner") {
            collect_principals(owner, &mut readers);
        }
    }

    if readers.is_empty() {
        ReaderSet::Public
    } else {
        ReaderSet::Principals(readers)
    }
}

fn collect_principals(value: &Value, out: &mut std::collections::BTreeSet<String>) {
    match value {
        Value::Str(s) => {
            out.insert(s.clone());
        }
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
            for item in items {
                if let Value::Str(s) = item {
                    out.insert(s.clone());
                }
            }
        }
        _ => {}
    }
}

/// Annotator for email-like results: readers are the message participants.
pub fn email_annotator(tool: &str) -> CapabilityAnnotator {
    let tool = tool.to_string();
    Arc::new(move |result: &Value, _args: &ToolArgs| Capability {
        sources: [DataSource::tool_with_inner(tool.clone(), "email_participants")]
            .into_iter()
            .collect(),
        readers: derive_readers(result),
    })
}

/// Annotator for file-like results: readers are the owner plus everyone the
/// file is shared with.
pub fn file_annotator(tool: &str) -> CapabilityAnnotator {
    let tool = tool.to_string();
    Arc::new(move |result: &Value, _args: &ToolArgs| Capability {
        sources: [DataSource::tool_with_inner(tool.clone(), "file_editors")]
            .into_iter()
            .collect(),
        readers: derive_readers(result),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn record(fields: Vec<(&str, Value)>) -> Value {
        Value::Record {
            schema: "T".to_string(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<IndexMap<_, _>>(),
        }
    }

    #[test]
    fn derives_email_readers() {
        let email = record(vec![
            (
                "recipients",
                Value::List(vec![Value::Str("bob@x.com".into())]),
            ),
            ("sender", Value::Str("alice@x.com".into())),
            ("body", Value::Str("hi".into())),
        ]);
        assert_eq!(
            derive_readers(&email),
            ReaderSet::principals(["alice@x.com", "bob@x.com"])
        );
    }

    #[test]
    fn derives_file_readers_from_sharing() {
        let mut shared = IndexMap::new();
        shared.insert(
            crate::runtime::values::DictKey::Str("carol@x.com".into()),
            Value::Str("read".into()),
        );
        let file = record(vec![
            ("owner", Value::Str("alice@x.com".into())),
            ("shared_with", Value::Dict(shared)),
        ]);
        assert_eq!(
            derive_readers(&file),
            ReaderSet::principals(["alice@x.com", "carol@x.com"])
        );
    }

    #[test]
    fn plain_results_are_public() {
        assert_eq!(derive_readers(&Value::Str("x".into())), ReaderSet::Public);
        assert_eq!(
            derive_readers(&record(vec![("body", Value::Str("x".into()))])),
            ReaderSet::Public
        );
    }
}
