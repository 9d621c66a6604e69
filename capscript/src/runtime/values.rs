//! Runtime value system for CapScript.
//!
//! `Value` is the raw payload only; the capability metadata lives on the
//! arena wrapper ([`crate::runtime::arena::TaggedValue`]), so raw values can
//! be cloned and handed to tools without dragging provenance along.

use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Hashable dict key. Other value kinds are rejected at dict construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DictKey {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictKey::Str(s) => write!(f, "{}", s),
            DictKey::Int(i) => write!(f, "{}", i),
            DictKey::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
        }
    }
}

impl DictKey {
    pub fn repr(&self) -> String {
        match self {
            DictKey::Str(s) => format!("'{}'", s),
            DictKey::Int(i) => i.to_string(),
            DictKey::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Str(s) => Value::Str(s.clone()),
            DictKey::Int(i) => Value::Int(*i),
            DictKey::Bool(b) => Value::Bool(*b),
        }
    }
}

/// A program-visible error value, producible with the `error(message)`
/// builtin and consumable by `raise`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    Dict(IndexMap<DictKey, Value>),
    Record {
        schema: String,
        fields: IndexMap<String, Value>,
    },
    /// A declared record type, usable as the schema argument of the
    /// quarantined-extraction call and as a constructor.
    Schema(String),
    Error(ErrorValue),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => !items.is_empty(),
            Value::Dict(map) => !map.is_empty(),
            Value::Record { .. } | Value::Schema(_) | Value::Error(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Dict(_) => "dict",
            Value::Record { .. } => "record",
            Value::Schema(_) => "schema",
            Value::Error(_) => "error",
        }
    }

    /// Key form of this value, if it is usable as a dict key.
    pub fn dict_key(&self) -> Option<DictKey> {
        match self {
            Value::Str(s) => Some(DictKey::Str(s.clone())),
            Value::Int(i) => Some(DictKey::Int(*i)),
            Value::Bool(b) => Some(DictKey::Bool(*b)),
            _ => None,
        }
    }

    /// The `str()` rendering: strings bare, everything else as `repr`.
    pub fn display_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr_string(),
        }
    }

    /// The `repr()` rendering.
    pub fn repr_string(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => format!("[{}]", join_reprs(items)),
            Value::Tuple(items) => {
                if items.len() == 1 {
                    format!("({},)", items[0].repr_string())
                } else {
                    format!("({})", join_reprs(items))
                }
            }
            Value::Set(items) => {
                if items.is_empty() {
                    "set()".to_string()
                } else {
                    format!("{{{}}}", join_reprs(items))
                }
            }
            Value::Dict(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr_string()))
                    .join(", ");
                format!("{{{}}}", entries)
            }
            Value::Record { schema, fields } => {
                let rendered = fields
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value.repr_string()))
                    .join(", ");
                format!("{}({})", schema, rendered)
            }
            Value::Schema(name) => format!("<schema {}>", name),
            Value::Error(e) => format!("<error: {}>", e.message),
        }
    }

    /// Lossy JSON rendering used by the execution trace.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Dict(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Record { fields, .. } => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Schema(name) => serde_json::Value::String(format!("<schema {}>", name)),
            Value::Error(e) => serde_json::Value::String(format!("<error: {}>", e.message)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

fn join_reprs(items: &[Value]) -> String {
    items.iter().map(Value::repr_string).join(", ")
}

/// Renders whole floats with a trailing `.0` so they stay recognizable as
/// floats.
fn float_repr(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reprs_match_surface_syntax() {
        assert_eq!(Value::None.repr_string(), "None");
        assert_eq!(Value::Bool(true).repr_string(), "True");
        assert_eq!(Value::Float(3.0).repr_string(), "3.0");
        assert_eq!(Value::Str("hi".into()).repr_string(), "'hi'");
        assert_eq!(
            Value::Tuple(vec![Value::Int(1)]).repr_string(),
            "(1,)"
        );
        assert_eq!(Value::Set(vec![]).repr_string(), "set()");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
    }
}
