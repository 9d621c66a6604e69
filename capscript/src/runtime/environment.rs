//! Per-execution variable bindings and declared record schemas.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::ast::TypeRef;
use crate::runtime::arena::ValueId;
use crate::runtime::error::{CapscriptError, RuntimeResult};
use crate::runtime::values::{DictKey, Value};

/// A field of a declared record type. Defaults are evaluated once, at
/// declaration time.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Value>,
}

/// A record type declared in program text with `record Name { ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// JSON Schema rendering handed to the quarantined extractor and used to
    /// validate what it returns.
    pub fn to_json_schema(&self, env: &Environment) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), type_to_json_schema(&field.ty, env));
            if field.default.is_none() {
                required.push(serde_json::Value::String(field.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "title": self.name,
            "properties": properties,
            "required": required,
        })
    }

    /// Builds an instance from named field values: fills defaults, rejects
    /// unknown and missing fields, checks declared types (ints coerce to
    /// float).
    pub fn build_instance(
        &self,
        mut given: IndexMap<String, Value>,
        env: &Environment,
    ) -> RuntimeResult<Value> {
        let mut fields: IndexMap<String, Value> = IndexMap::new();
        for field in &self.fields {
            let value = match given.shift_remove(&field.name) {
                Some(value) => coerce_field(&field.ty, value, env).map_err(|actual| {
                    CapscriptError::TypeMismatch {
                        expected: type_display(&field.ty),
                        actual,
                        operation: format!("{}.{}", self.name, field.name),
                    }
                })?,
                None => match &field.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(CapscriptError::ArityMismatch {
                            function: self.name.clone(),
                            expected: format!("field '{}'", field.name),
                            actual: 0,
                        })
                    }
                },
            };
            fields.insert(field.name.clone(), value);
        }
        if let Some(unknown) = given.keys().next() {
            return Err(CapscriptError::UnsupportedOperation {
                message: format!("{} has no field '{}'", self.name, unknown),
            });
        }
        Ok(Value::Record {
            schema: self.name.clone(),
            fields,
        })
    }

    /// Decodes an extractor's JSON object into a record instance. Failures
    /// mean the extractor could not fill the schema.
    pub fn from_json(&self, json: &serde_json::Value, env: &Environment) -> Result<Value, String> {
        let object = json
            .as_object()
            .ok_or_else(|| format!("expected an object for {}", self.name))?;
        let mut fields: IndexMap<String, Value> = IndexMap::new();
        for field in &self.fields {
            let value = match object.get(&field.name) {
                Some(raw) => json_to_value(&field.ty, raw, env)
                    .map_err(|e| format!("field '{}': {}", field.name, e))?,
                None => match &field.default {
                    Some(default) => default.clone(),
                    None => return Err(format!("missing field '{}'", field.name)),
                },
            };
            fields.insert(field.name.clone(), value);
        }
        Ok(Value::Record {
            schema: self.name.clone(),
            fields,
        })
    }
}

fn type_to_json_schema(ty: &TypeRef, env: &Environment) -> serde_json::Value {
    match ty {
        TypeRef::Str => serde_json::json!({"type": "string"}),
        TypeRef::Int => serde_json::json!({"type": "integer"}),
        TypeRef::Float => serde_json::json!({"type": "number"}),
        TypeRef::Bool => serde_json::json!({"type": "boolean"}),
        TypeRef::List(None) => serde_json::json!({"type": "array"}),
        TypeRef::List(Some(inner)) => serde_json::json!({
            "type": "array",
            "items": type_to_json_schema(inner, env),
        }),
        TypeRef::Dict => serde_json::json!({"type": "object"}),
        TypeRef::Named(name) => match env.schema(name) {
            Some(schema) => schema.to_json_schema(env),
            None => serde_json::json!({"type": "object"}),
        },
    }
}

pub(crate) fn type_display(ty: &TypeRef) -> String {
    match ty {
        TypeRef::Str => "str".to_string(),
        TypeRef::Int => "int".to_string(),
        TypeRef::Float => "float".to_string(),
        TypeRef::Bool => "bool".to_string(),
        TypeRef::List(None) => "list".to_string(),
        TypeRef::List(Some(inner)) => format!("list[{}]", type_display(inner)),
        TypeRef::Dict => "dict".to_string(),
        TypeRef::Named(name) => name.clone(),
    }
}

/// Checks a value against a declared type, coercing int to float. Returns
/// the actual type name on mismatch.
fn coerce_field(ty: &TypeRef, value: Value, env: &Environment) -> Result<Value, String> {
    let ok = match (ty, &value) {
        (TypeRef::Str, Value::Str(_)) => true,
        (TypeRef::Int, Value::Int(_)) => true,
        (TypeRef::Float, Value::Float(_)) => true,
        (TypeRef::Float, Value::Int(i)) => return Ok(Value::Float(*i as f64)),
        (TypeRef::Bool, Value::Bool(_)) => true,
        (TypeRef::List(None), Value::List(_)) => true,
        (TypeRef::List(Some(inner)), Value::List(items)) => {
            let mut coerced = Vec::with_capacity(items.len());
            for item in items {
                coerced.push(coerce_field(inner, item.clone(), env)?);
            }
            return Ok(Value::List(coerced));
        }
        (TypeRef::Dict, Value::Dict(_)) => true,
        (TypeRef::Named(name), Value::Record { schema, .. }) => name == schema,
        _ => false,
    };
    if ok {
        Ok(value)
    } else {
        Err(value.type_name().to_string())
    }
}

fn json_to_value(ty: &TypeRef, json: &serde_json::Value, env: &Environment) -> Result<Value, String> {
    match ty {
        TypeRef::Str => json
            .as_str()
            .map(|s| Value::Str(s.to_string()))
            .ok_or_else(|| "expected a string".to_string()),
        TypeRef::Int => json
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| "expected an integer".to_string()),
        TypeRef::Float => json
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| "expected a number".to_string()),
        TypeRef::Bool => json
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| "expected a boolean".to_string()),
        TypeRef::List(inner) => {
            let array = json.as_array().ok_or_else(|| "expected an array".to_string())?;
            let mut items = Vec::with_capacity(array.len());
            for entry in array {
                let value = match inner {
                    Some(inner_ty) => json_to_value(inner_ty, entry, env)?,
                    None => json_value_untyped(entry)?,
                };
                items.push(value);
            }
            Ok(Value::List(items))
        }
        TypeRef::Dict => {
            let object = json.as_object().ok_or_else(|| "expected an object".to_string())?;
            let mut map = IndexMap::new();
            for (key, entry) in object {
                map.insert(DictKey::Str(key.clone()), json_value_untyped(entry)?);
            }
            Ok(Value::Dict(map))
        }
        TypeRef::Named(name) => {
            let schema = env
                .schema(name)
                .ok_or_else(|| format!("unknown record type '{}'", name))?;
            schema.from_json(json, env)
        }
    }
}

fn json_value_untyped(json: &serde_json::Value) -> Result<Value, String> {
    match json {
        serde_json::Value::Null => Ok(Value::None),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err("unrepresentable number".to_string())
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(json_value_untyped)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        serde_json::Value::Object(object) => {
            let mut map = IndexMap::new();
            for (key, entry) in object {
                map.insert(DictKey::Str(key.clone()), json_value_untyped(entry)?);
            }
            Ok(Value::Dict(map))
        }
    }
}

/// Variable bindings and record declarations of one execution. CapScript has
/// a single flat scope per execution, so no parent chain exists.
#[derive(Debug, Default)]
pub struct Environment {
    vars: HashMap<String, ValueId>,
    schemas: HashMap<String, RecordSchema>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, value: ValueId) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<ValueId> {
        self.vars.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn define_schema(&mut self, schema: RecordSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn schema(&self, name: &str) -> Option<&RecordSchema> {
        self.schemas.get(name)
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }
}
