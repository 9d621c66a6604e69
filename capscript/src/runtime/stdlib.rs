//! Builtin functions, method allowlists, and operator semantics.
//!
//! The builtin set and the per-type method tables are deliberately curated
//! allowlists: anything not listed fails with a restriction error rather
//! than falling through to some reflective lookup. Introspection helpers and
//! runtime format-string evaluation are intentionally absent.

use std::cmp::Ordering;
use std::collections::HashSet;

use lazy_static::lazy_static;

use crate::ast::{BinOp, CmpOp, UnaryOp};
use crate::runtime::error::{CapscriptError, RuntimeResult};
use crate::runtime::values::{DictKey, ErrorValue, Value};

lazy_static! {
    /// Callable builtins. `error` constructs a raisable error value.
    pub static ref ALLOWED_BUILTINS: HashSet<&'static str> = [
        "abs", "all", "any", "bool", "divmod", "enumerate", "error", "float",
        "int", "len", "list", "max", "min", "print", "range", "repr",
        "reversed", "round", "set", "sorted", "str", "sum", "tuple", "zip",
    ]
    .into_iter()
    .collect();

    pub static ref STR_METHODS: HashSet<&'static str> = [
        "capitalize", "count", "endswith", "find", "index", "isalnum",
        "isalpha", "isdigit", "islower", "isspace", "istitle", "isupper",
        "join", "lower", "lstrip", "partition", "removeprefix",
        "removesuffix", "replace", "rfind", "rindex", "rpartition", "rsplit",
        "rstrip", "split", "splitlines", "startswith", "strip", "title",
        "upper",
    ]
    .into_iter()
    .collect();

    pub static ref LIST_METHODS: HashSet<&'static str> =
        ["index", "count"].into_iter().collect();

    pub static ref DICT_METHODS: HashSet<&'static str> =
        ["get", "items", "keys", "values"].into_iter().collect();
}

pub fn is_builtin(name: &str) -> bool {
    ALLOWED_BUILTINS.contains(name)
}

// ---------------------------------------------------------------------------
// Equality and ordering
// ---------------------------------------------------------------------------

/// Structural equality with int/float cross-comparison.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Set(x), Value::Set(y)) => {
            x.len() == y.len()
                && x.iter().all(|a| y.iter().any(|b| values_equal(a, b)))
        }
        _ => a == b,
    }
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Total-order comparison where one exists; errors on mixed or unordered
/// types.
pub fn compare_values(a: &Value, b: &Value) -> RuntimeResult<Ordering> {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x.partial_cmp(&y).ok_or(CapscriptError::UnsupportedOperation {
            message: "comparison involving nan".to_string(),
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (ea, eb) in x.iter().zip(y.iter()) {
                match compare_values(ea, eb)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(CapscriptError::TypeMismatch {
            expected: a.type_name().to_string(),
            actual: b.type_name().to_string(),
            operation: "comparison".to_string(),
        }),
    }
}

fn membership(item: &Value, container: &Value) -> RuntimeResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(CapscriptError::TypeMismatch {
                expected: "str".to_string(),
                actual: other.type_name().to_string(),
                operation: "in".to_string(),
            }),
        },
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
            Ok(items.iter().any(|v| values_equal(v, item)))
        }
        Value::Dict(map) => Ok(item
            .dict_key()
            .map(|key| map.contains_key(&key))
            .unwrap_or(false)),
        other => Err(CapscriptError::TypeMismatch {
            expected: "iterable".to_string(),
            actual: other.type_name().to_string(),
            operation: "in".to_string(),
        }),
    }
}

pub fn compare_op(op: CmpOp, a: &Value, b: &Value) -> RuntimeResult<bool> {
    match op {
        // Values have no identity distinct from equality here, so `is`
        // aliases `==`.
        CmpOp::Eq | CmpOp::Is => Ok(values_equal(a, b)),
        CmpOp::NotEq | CmpOp::IsNot => Ok(!values_equal(a, b)),
        CmpOp::Lt => Ok(compare_values(a, b)? == Ordering::Less),
        CmpOp::LtE => Ok(compare_values(a, b)? != Ordering::Greater),
        CmpOp::Gt => Ok(compare_values(a, b)? == Ordering::Greater),
        CmpOp::GtE => Ok(compare_values(a, b)? != Ordering::Less),
        CmpOp::In => membership(a, b),
        CmpOp::NotIn => Ok(!membership(a, b)?),
    }
}

// ---------------------------------------------------------------------------
// Binary and unary operators
// ---------------------------------------------------------------------------

fn type_error(op: BinOp, a: &Value, b: &Value) -> CapscriptError {
    CapscriptError::TypeMismatch {
        expected: a.type_name().to_string(),
        actual: b.type_name().to_string(),
        operation: op.symbol().to_string(),
    }
}

fn overflow(op: BinOp) -> CapscriptError {
    CapscriptError::UnsupportedOperation {
        message: format!("integer overflow in {}", op.symbol()),
    }
}

/// Floor division with Python sign semantics (rounds toward negative
/// infinity).
fn floor_div_int(a: i64, b: i64) -> RuntimeResult<i64> {
    if b == 0 {
        return Err(CapscriptError::DivisionByZero);
    }
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn mod_int(a: i64, b: i64) -> RuntimeResult<i64> {
    if b == 0 {
        return Err(CapscriptError::DivisionByZero);
    }
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn repeat_seq(items: &[Value], n: i64, max_collection: usize) -> RuntimeResult<Vec<Value>> {
    let times = n.max(0) as usize;
    let total = items.len().saturating_mul(times);
    if total > max_collection {
        return Err(CapscriptError::ResourceLimit {
            what: "sequence repetition".to_string(),
            limit: max_collection,
        });
    }
    let mut out = Vec::with_capacity(total);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

pub fn binary_op(op: BinOp, a: &Value, b: &Value, max_collection: usize) -> RuntimeResult<Value> {
    match op {
        BinOp::Add => match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                x.checked_add(*y).map(Value::Int).ok_or_else(|| overflow(op))
            }
            (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{}{}", x, y))),
            (Value::List(x), Value::List(y)) => {
                let mut out = x.clone();
                out.extend(y.iter().cloned());
                Ok(Value::List(out))
            }
            (Value::Tuple(x), Value::Tuple(y)) => {
                let mut out = x.clone();
                out.extend(y.iter().cloned());
                Ok(Value::Tuple(out))
            }
            _ => match (numeric(a), numeric(b)) {
                (Some(x), Some(y)) => Ok(Value::Float(x + y)),
                _ => Err(type_error(op, a, b)),
            },
        },
        BinOp::Sub => match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                x.checked_sub(*y).map(Value::Int).ok_or_else(|| overflow(op))
            }
            (Value::Set(x), Value::Set(y)) => Ok(Value::Set(
                x.iter()
                    .filter(|v| !y.iter().any(|w| values_equal(v, w)))
                    .cloned()
                    .collect(),
            )),
            _ => match (numeric(a), numeric(b)) {
                (Some(x), Some(y)) => Ok(Value::Float(x - y)),
                _ => Err(type_error(op, a, b)),
            },
        },
        BinOp::Mul => match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                x.checked_mul(*y).map(Value::Int).ok_or_else(|| overflow(op))
            }
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                let times = (*n).max(0) as usize;
                if s.len().saturating_mul(times) > max_collection {
                    return Err(CapscriptError::ResourceLimit {
                        what: "string repetition".to_string(),
                        limit: max_collection,
                    });
                }
                Ok(Value::Str(s.repeat(times)))
            }
            (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
                Ok(Value::List(repeat_seq(items, *n, max_collection)?))
            }
            (Value::Tuple(items), Value::Int(n)) | (Value::Int(n), Value::Tuple(items)) => {
                Ok(Value::Tuple(repeat_seq(items, *n, max_collection)?))
            }
            _ => match (numeric(a), numeric(b)) {
                (Some(x), Some(y)) => Ok(Value::Float(x * y)),
                _ => Err(type_error(op, a, b)),
            },
        },
        BinOp::Div => match (numeric(a), numeric(b)) {
            (Some(_), Some(y)) if y == 0.0 => Err(CapscriptError::DivisionByZero),
            (Some(x), Some(y)) => Ok(Value::Float(x / y)),
            _ => Err(type_error(op, a, b)),
        },
        BinOp::FloorDiv => match (a, b) {
            (Value::Int(x), Value::Int(y)) => floor_div_int(*x, *y).map(Value::Int),
            _ => match (numeric(a), numeric(b)) {
                (Some(_), Some(y)) if y == 0.0 => Err(CapscriptError::DivisionByZero),
                (Some(x), Some(y)) => Ok(Value::Float((x / y).floor())),
                _ => Err(type_error(op, a, b)),
            },
        },
        BinOp::Mod => match (a, b) {
            (Value::Int(x), Value::Int(y)) => mod_int(*x, *y).map(Value::Int),
            _ => match (numeric(a), numeric(b)) {
                (Some(_), Some(y)) if y == 0.0 => Err(CapscriptError::DivisionByZero),
                (Some(x), Some(y)) => Ok(Value::Float(x - y * (x / y).floor())),
                _ => Err(type_error(op, a, b)),
            },
        },
        BinOp::Pow => match (a, b) {
            (Value::Int(x), Value::Int(y)) if *y >= 0 => {
                let exp = u32::try_from(*y).map_err(|_| overflow(op))?;
                x.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow(op))
            }
            _ => match (numeric(a), numeric(b)) {
                (Some(x), Some(y)) => Ok(Value::Float(x.powf(y))),
                _ => Err(type_error(op, a, b)),
            },
        },
        BinOp::LShift | BinOp::RShift => match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                if !(0..64).contains(y) {
                    return Err(CapscriptError::UnsupportedOperation {
                        message: format!("shift count out of range: {}", y),
                    });
                }
                let shifted = if op == BinOp::LShift {
                    x.checked_shl(*y as u32).ok_or_else(|| overflow(op))?
                } else {
                    x >> *y as u32
                };
                Ok(Value::Int(shifted))
            }
            _ => Err(type_error(op, a, b)),
        },
        BinOp::BitAnd => match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x & y)),
            (Value::Set(x), Value::Set(y)) => Ok(Value::Set(
                x.iter()
                    .filter(|v| y.iter().any(|w| values_equal(v, w)))
                    .cloned()
                    .collect(),
            )),
            _ => Err(type_error(op, a, b)),
        },
        BinOp::BitOr => match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x | y)),
            (Value::Set(x), Value::Set(y)) => {
                let mut out = x.clone();
                for item in y {
                    if !out.iter().any(|v| values_equal(v, item)) {
                        out.push(item.clone());
                    }
                }
                Ok(Value::Set(out))
            }
            _ => Err(type_error(op, a, b)),
        },
        BinOp::BitXor => match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x ^ y)),
            (Value::Set(x), Value::Set(y)) => {
                let mut out: Vec<Value> = x
                    .iter()
                    .filter(|v| !y.iter().any(|w| values_equal(v, w)))
                    .cloned()
                    .collect();
                out.extend(
                    y.iter()
                        .filter(|v| !x.iter().any(|w| values_equal(v, w)))
                        .cloned(),
                );
                Ok(Value::Set(out))
            }
            _ => Err(type_error(op, a, b)),
        },
    }
}

pub fn unary_op(op: UnaryOp, v: &Value) -> RuntimeResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnaryOp::Pos => match v {
            Value::Int(_) | Value::Float(_) => Ok(v.clone()),
            other => Err(CapscriptError::TypeMismatch {
                expected: "number".to_string(),
                actual: other.type_name().to_string(),
                operation: "unary +".to_string(),
            }),
        },
        UnaryOp::Neg => match v {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or(CapscriptError::UnsupportedOperation {
                    message: "integer overflow in unary -".to_string(),
                }),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(CapscriptError::TypeMismatch {
                expected: "number".to_string(),
                actual: other.type_name().to_string(),
                operation: "unary -".to_string(),
            }),
        },
        UnaryOp::Invert => match v {
            Value::Int(i) => Ok(Value::Int(!i)),
            other => Err(CapscriptError::TypeMismatch {
                expected: "int".to_string(),
                actual: other.type_name().to_string(),
                operation: "~".to_string(),
            }),
        },
    }
}

// ---------------------------------------------------------------------------
// Builtin functions
// ---------------------------------------------------------------------------

fn arity(function: &str, expected: &str, actual: usize) -> CapscriptError {
    CapscriptError::ArityMismatch {
        function: function.to_string(),
        expected: expected.to_string(),
        actual,
    }
}

/// Elements of an iterable value, or a type error naming `function`.
pub(crate) fn iter_elements(function: &str, v: &Value) -> RuntimeResult<Vec<Value>> {
    match v {
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Dict(map) => Ok(map.keys().map(DictKey::to_value).collect()),
        other => Err(CapscriptError::TypeMismatch {
            expected: "iterable".to_string(),
            actual: other.type_name().to_string(),
            operation: function.to_string(),
        }),
    }
}

pub(crate) fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.iter().any(|v| values_equal(v, &item)) {
            out.push(item);
        }
    }
    out
}

fn sort_values(mut items: Vec<Value>) -> RuntimeResult<Vec<Value>> {
    // Validate comparability up front; sort_by itself cannot fail.
    for window in items.windows(2) {
        compare_values(&window[0], &window[1])?;
    }
    items.sort_by(|a, b| compare_values(a, b).unwrap_or(Ordering::Equal));
    Ok(items)
}

pub fn call_builtin(name: &str, args: &[Value], max_collection: usize) -> RuntimeResult<Value> {
    match name {
        "abs" => match args {
            [Value::Int(i)] => Ok(Value::Int(i.abs())),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            [other] => Err(CapscriptError::TypeMismatch {
                expected: "number".to_string(),
                actual: other.type_name().to_string(),
                operation: "abs".to_string(),
            }),
            _ => Err(arity("abs", "1", args.len())),
        },
        "all" => match args {
            [v] => Ok(Value::Bool(
                iter_elements("all", v)?.iter().all(Value::is_truthy),
            )),
            _ => Err(arity("all", "1", args.len())),
        },
        "any" => match args {
            [v] => Ok(Value::Bool(
                iter_elements("any", v)?.iter().any(Value::is_truthy),
            )),
            _ => Err(arity("any", "1", args.len())),
        },
        "bool" => match args {
            [] => Ok(Value::Bool(false)),
            [v] => Ok(Value::Bool(v.is_truthy())),
            _ => Err(arity("bool", "0 or 1", args.len())),
        },
        "divmod" => match args {
            [Value::Int(x), Value::Int(y)] => Ok(Value::Tuple(vec![
                Value::Int(floor_div_int(*x, *y)?),
                Value::Int(mod_int(*x, *y)?),
            ])),
            [a, b] => match (numeric(a), numeric(b)) {
                (Some(_), Some(y)) if y == 0.0 => Err(CapscriptError::DivisionByZero),
                (Some(x), Some(y)) => Ok(Value::Tuple(vec![
                    Value::Float((x / y).floor()),
                    Value::Float(x - y * (x / y).floor()),
                ])),
                _ => Err(CapscriptError::TypeMismatch {
                    expected: "number".to_string(),
                    actual: format!("{}, {}", a.type_name(), b.type_name()),
                    operation: "divmod".to_string(),
                }),
            },
            _ => Err(arity("divmod", "2", args.len())),
        },
        "enumerate" => {
            let (v, start) = match args {
                [v] => (v, 0i64),
                [v, Value::Int(start)] => (v, *start),
                [_, other] => {
                    return Err(CapscriptError::TypeMismatch {
                        expected: "int".to_string(),
                        actual: other.type_name().to_string(),
                        operation: "enumerate".to_string(),
                    })
                }
                _ => return Err(arity("enumerate", "1 or 2", args.len())),
            };
            Ok(Value::List(
                iter_elements("enumerate", v)?
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| Value::Tuple(vec![Value::Int(start + i as i64), item]))
                    .collect(),
            ))
        }
        "error" => match args {
            [Value::Str(message)] => Ok(Value::Error(ErrorValue {
                message: message.clone(),
            })),
            [other] => Err(CapscriptError::TypeMismatch {
                expected: "str".to_string(),
                actual: other.type_name().to_string(),
                operation: "error".to_string(),
            }),
            _ => Err(arity("error", "1", args.len())),
        },
        "float" => match args {
            [] => Ok(Value::Float(0.0)),
            [Value::Int(i)] => Ok(Value::Float(*i as f64)),
            [Value::Float(f)] => Ok(Value::Float(*f)),
            [Value::Bool(b)] => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            [Value::Str(s)] => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                CapscriptError::UnsupportedOperation {
                    message: "invalid literal for float()".to_string(),
                }
            }),
            [other] => Err(CapscriptError::TypeMismatch {
                expected: "number or str".to_string(),
                actual: other.type_name().to_string(),
                operation: "float".to_string(),
            }),
            _ => Err(arity("float", "0 or 1", args.len())),
        },
        "int" => match args {
            [] => Ok(Value::Int(0)),
            [Value::Int(i)] => Ok(Value::Int(*i)),
            [Value::Float(f)] => Ok(Value::Int(f.trunc() as i64)),
            [Value::Bool(b)] => Ok(Value::Int(if *b { 1 } else { 0 })),
            [Value::Str(s)] => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                CapscriptError::UnsupportedOperation {
                    message: "invalid literal for int()".to_string(),
                }
            }),
            [other] => Err(CapscriptError::TypeMismatch {
                expected: "number or str".to_string(),
                actual: other.type_name().to_string(),
                operation: "int".to_string(),
            }),
            _ => Err(arity("int", "0 or 1", args.len())),
        },
        "len" => match args {
            [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
            [Value::List(items)] | [Value::Tuple(items)] | [Value::Set(items)] => {
                Ok(Value::Int(items.len() as i64))
            }
            [Value::Dict(map)] => Ok(Value::Int(map.len() as i64)),
            [other] => Err(CapscriptError::TypeMismatch {
                expected: "sized value".to_string(),
                actual: other.type_name().to_string(),
                operation: "len".to_string(),
            }),
            _ => Err(arity("len", "1", args.len())),
        },
        "list" => match args {
            [] => Ok(Value::List(Vec::new())),
            [v] => Ok(Value::List(iter_elements("list", v)?)),
            _ => Err(arity("list", "0 or 1", args.len())),
        },
        "max" | "min" => {
            let items = match args {
                [] => return Err(arity(name, "at least 1", 0)),
                [v] => iter_elements(name, v)?,
                many => many.to_vec(),
            };
            if items.is_empty() {
                return Err(CapscriptError::UnsupportedOperation {
                    message: format!("{}() arg is an empty sequence", name),
                });
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let ord = compare_values(item, &best)?;
                let better = if name == "max" {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                };
                if better {
                    best = item.clone();
                }
            }
            Ok(best)
        }
        "print" => {
            let rendered: Vec<String> = args.iter().map(Value::display_string).collect();
            log::info!(target: "capscript::program", "{}", rendered.join(" "));
            Ok(Value::None)
        }
        "range" => {
            let (start, stop, step) = match args {
                [] => return Err(arity("range", "1 to 3", 0)),
                [Value::Int(stop)] => (0, *stop, 1),
                [Value::Int(start), Value::Int(stop)] => (*start, *stop, 1),
                [Value::Int(start), Value::Int(stop), Value::Int(step)] => (*start, *stop, *step),
                _ if args.len() <= 3 => {
                    return Err(CapscriptError::TypeMismatch {
                        expected: "int".to_string(),
                        actual: args
                            .iter()
                            .map(Value::type_name)
                            .collect::<Vec<_>>()
                            .join(", "),
                        operation: "range".to_string(),
                    })
                }
                _ => return Err(arity("range", "1 to 3", args.len())),
            };
            if step == 0 {
                return Err(CapscriptError::UnsupportedOperation {
                    message: "range() step must not be zero".to_string(),
                });
            }
            let span = if step > 0 {
                (stop - start).max(0)
            } else {
                (start - stop).max(0)
            };
            let count = (span as u64).div_ceil(step.unsigned_abs()) as usize;
            if count > max_collection {
                return Err(CapscriptError::ResourceLimit {
                    what: "range".to_string(),
                    limit: max_collection,
                });
            }
            let mut out = Vec::with_capacity(count);
            let mut current = start;
            for _ in 0..count {
                out.push(Value::Int(current));
                current += step;
            }
            Ok(Value::List(out))
        }
        "repr" => match args {
            [v] => Ok(Value::Str(v.repr_string())),
            _ => Err(arity("repr", "1", args.len())),
        },
        "reversed" => match args {
            [v] => {
                let mut items = iter_elements("reversed", v)?;
                items.reverse();
                Ok(Value::List(items))
            }
            _ => Err(arity("reversed", "1", args.len())),
        },
        "round" => match args {
            [Value::Int(i)] => Ok(Value::Int(*i)),
            [Value::Float(f)] => Ok(Value::Int(f.round() as i64)),
            [Value::Float(f), Value::Int(digits)] => {
                let factor = 10f64.powi(*digits as i32);
                Ok(Value::Float((f * factor).round() / factor))
            }
            [Value::Int(i), Value::Int(_)] => Ok(Value::Int(*i)),
            _ => Err(arity("round", "1 or 2", args.len())),
        },
        "set" => match args {
            [] => Ok(Value::Set(Vec::new())),
            [v] => Ok(Value::Set(dedup(iter_elements("set", v)?))),
            _ => Err(arity("set", "0 or 1", args.len())),
        },
        "sorted" => match args {
            [v] => Ok(Value::List(sort_values(iter_elements("sorted", v)?)?)),
            _ => Err(arity("sorted", "1", args.len())),
        },
        "str" => match args {
            [] => Ok(Value::Str(String::new())),
            [v] => Ok(Value::Str(v.display_string())),
            _ => Err(arity("str", "0 or 1", args.len())),
        },
        "sum" => {
            let (v, mut acc) = match args {
                [v] => (v, Value::Int(0)),
                [v, start] => (v, start.clone()),
                _ => return Err(arity("sum", "1 or 2", args.len())),
            };
            for item in iter_elements("sum", v)? {
                acc = binary_op(BinOp::Add, &acc, &item, max_collection)?;
            }
            Ok(acc)
        }
        "tuple" => match args {
            [] => Ok(Value::Tuple(Vec::new())),
            [v] => Ok(Value::Tuple(iter_elements("tuple", v)?)),
            _ => Err(arity("tuple", "0 or 1", args.len())),
        },
        "zip" => {
            let mut columns = Vec::with_capacity(args.len());
            for v in args {
                columns.push(iter_elements("zip", v)?);
            }
            let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(shortest);
            for i in 0..shortest {
                out.push(Value::Tuple(
                    columns.iter().map(|col| col[i].clone()).collect(),
                ));
            }
            Ok(Value::List(out))
        }
        other => Err(CapscriptError::UnknownFunction {
            name: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

pub fn call_method(obj: &Value, method: &str, args: &[Value]) -> RuntimeResult<Value> {
    match obj {
        Value::Str(s) => {
            if !STR_METHODS.contains(method) {
                return Err(CapscriptError::MethodNotAllowed {
                    type_name: "str".to_string(),
                    method: method.to_string(),
                });
            }
            str_method(s, method, args)
        }
        Value::List(items) => {
            if !LIST_METHODS.contains(method) {
                return Err(CapscriptError::MethodNotAllowed {
                    type_name: "list".to_string(),
                    method: method.to_string(),
                });
            }
            seq_method("list", items, method, args)
        }
        Value::Dict(map) => {
            if !DICT_METHODS.contains(method) {
                return Err(CapscriptError::MethodNotAllowed {
                    type_name: "dict".to_string(),
                    method: method.to_string(),
                });
            }
            dict_method(map, method, args)
        }
        other => Err(CapscriptError::MethodNotAllowed {
            type_name: other.type_name().to_string(),
            method: method.to_string(),
        }),
    }
}

fn one_str_arg<'a>(method: &str, args: &'a [Value]) -> RuntimeResult<&'a str> {
    match args {
        [Value::Str(s)] => Ok(s.as_str()),
        [other] => Err(CapscriptError::TypeMismatch {
            expected: "str".to_string(),
            actual: other.type_name().to_string(),
            operation: method.to_string(),
        }),
        _ => Err(arity(method, "1", args.len())),
    }
}

fn char_index_of(s: &str, sub: &str) -> Option<i64> {
    s.find(sub)
        .map(|byte_pos| s[..byte_pos].chars().count() as i64)
}

fn char_rindex_of(s: &str, sub: &str) -> Option<i64> {
    s.rfind(sub)
        .map(|byte_pos| s[..byte_pos].chars().count() as i64)
}

fn strip_chars<'a>(method: &str, s: &'a str, args: &[Value]) -> RuntimeResult<&'a str> {
    let matches: Box<dyn Fn(char) -> bool> = match args {
        [] => Box::new(|c: char| c.is_whitespace()),
        [Value::Str(chars)] => {
            let set: Vec<char> = chars.chars().collect();
            Box::new(move |c: char| set.contains(&c))
        }
        [other] => {
            return Err(CapscriptError::TypeMismatch {
                expected: "str".to_string(),
                actual: other.type_name().to_string(),
                operation: method.to_string(),
            })
        }
        _ => return Err(arity(method, "0 or 1", args.len())),
    };
    Ok(match method {
        "strip" => s.trim_matches(|c| matches(c)),
        "lstrip" => s.trim_start_matches(|c| matches(c)),
        _ => s.trim_end_matches(|c| matches(c)),
    })
}

fn str_method(s: &str, method: &str, args: &[Value]) -> RuntimeResult<Value> {
    match method {
        "capitalize" => {
            let mut chars = s.chars();
            let result = match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            };
            Ok(Value::Str(result))
        }
        "count" => {
            let sub = one_str_arg(method, args)?;
            if sub.is_empty() {
                return Ok(Value::Int(s.chars().count() as i64 + 1));
            }
            Ok(Value::Int(s.matches(sub).count() as i64))
        }
        "endswith" => Ok(Value::Bool(s.ends_with(one_str_arg(method, args)?))),
        "startswith" => Ok(Value::Bool(s.starts_with(one_str_arg(method, args)?))),
        "find" => Ok(Value::Int(
            char_index_of(s, one_str_arg(method, args)?).unwrap_or(-1),
        )),
        "rfind" => Ok(Value::Int(
            char_rindex_of(s, one_str_arg(method, args)?).unwrap_or(-1),
        )),
        "index" => char_index_of(s, one_str_arg(method, args)?)
            .map(Value::Int)
            .ok_or(CapscriptError::UnsupportedOperation {
                message: "substring not found".to_string(),
            }),
        "rindex" => char_rindex_of(s, one_str_arg(method, args)?)
            .map(Value::Int)
            .ok_or(CapscriptError::UnsupportedOperation {
                message: "substring not found".to_string(),
            }),
        "isalnum" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(char::is_alphanumeric),
        )),
        "isalpha" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(char::is_alphabetic),
        )),
        "isdigit" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        )),
        "islower" => Ok(Value::Bool(
            s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase),
        )),
        "isupper" => Ok(Value::Bool(
            s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase),
        )),
        "isspace" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(char::is_whitespace),
        )),
        "istitle" => {
            let mut has_cased = false;
            let mut expect_upper = true;
            let mut ok = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    has_cased = true;
                    if expect_upper && !c.is_uppercase() {
                        ok = false;
                        break;
                    }
                    if !expect_upper && c.is_uppercase() {
                        ok = false;
                        break;
                    }
                    expect_upper = false;
                } else {
                    expect_upper = true;
                }
            }
            Ok(Value::Bool(has_cased && ok))
        }
        "join" => match args {
            [v] => {
                let items = iter_elements("join", v)?;
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    match item {
                        Value::Str(part) => parts.push(part.clone()),
                        other => {
                            return Err(CapscriptError::TypeMismatch {
                                expected: "str".to_string(),
                                actual: other.type_name().to_string(),
                                operation: "join".to_string(),
                            })
                        }
                    }
                }
                Ok(Value::Str(parts.join(s)))
            }
            _ => Err(arity("join", "1", args.len())),
        },
        "lower" => Ok(Value::Str(s.to_lowercase())),
        "upper" => Ok(Value::Str(s.to_uppercase())),
        "strip" | "lstrip" | "rstrip" => {
            Ok(Value::Str(strip_chars(method, s, args)?.to_string()))
        }
        "partition" | "rpartition" => {
            let sep = one_str_arg(method, args)?;
            let found = if method == "partition" {
                s.find(sep)
            } else {
                s.rfind(sep)
            };
            let (before, middle, after) = match found {
                Some(pos) => (&s[..pos], sep, &s[pos + sep.len()..]),
                None if method == "partition" => (s, "", ""),
                None => ("", "", s),
            };
            Ok(Value::Tuple(vec![
                Value::Str(before.to_string()),
                Value::Str(middle.to_string()),
                Value::Str(after.to_string()),
            ]))
        }
        "removeprefix" => {
            let prefix = one_str_arg(method, args)?;
            Ok(Value::Str(
                s.strip_prefix(prefix).unwrap_or(s).to_string(),
            ))
        }
        "removesuffix" => {
            let suffix = one_str_arg(method, args)?;
            Ok(Value::Str(
                s.strip_suffix(suffix).unwrap_or(s).to_string(),
            ))
        }
        "replace" => match args {
            [Value::Str(old), Value::Str(new)] => Ok(Value::Str(s.replace(old.as_str(), new))),
            _ => Err(arity("replace", "2", args.len())),
        },
        "split" | "rsplit" => {
            let parts: Vec<Value> = match args {
                [] => s
                    .split_whitespace()
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                [Value::Str(sep)] if !sep.is_empty() => s
                    .split(sep.as_str())
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                [_] => {
                    return Err(CapscriptError::UnsupportedOperation {
                        message: "empty separator".to_string(),
                    })
                }
                _ => return Err(arity(method, "0 or 1", args.len())),
            };
            Ok(Value::List(parts))
        }
        "splitlines" => Ok(Value::List(
            s.lines().map(|l| Value::Str(l.to_string())).collect(),
        )),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut at_word_start = true;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if at_word_start {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    at_word_start = false;
                } else {
                    out.push(c);
                    at_word_start = true;
                }
            }
            Ok(Value::Str(out))
        }
        _ => Err(CapscriptError::MethodNotAllowed {
            type_name: "str".to_string(),
            method: method.to_string(),
        }),
    }
}

fn seq_method(type_name: &str, items: &[Value], method: &str, args: &[Value]) -> RuntimeResult<Value> {
    match (method, args) {
        ("index", [needle]) => items
            .iter()
            .position(|v| values_equal(v, needle))
            .map(|i| Value::Int(i as i64))
            .ok_or(CapscriptError::UnsupportedOperation {
                message: format!("value not in {}", type_name),
            }),
        ("count", [needle]) => Ok(Value::Int(
            items.iter().filter(|v| values_equal(v, needle)).count() as i64,
        )),
        _ => Err(arity(method, "1", args.len())),
    }
}

fn dict_method(
    map: &indexmap::IndexMap<DictKey, Value>,
    method: &str,
    args: &[Value],
) -> RuntimeResult<Value> {
    match method {
        "get" => {
            let (key, default) = match args {
                [key] => (key, Value::None),
                [key, default] => (key, default.clone()),
                _ => return Err(arity("get", "1 or 2", args.len())),
            };
            let value = key
                .dict_key()
                .and_then(|k| map.get(&k).cloned())
                .unwrap_or(default);
            Ok(value)
        }
        "keys" => Ok(Value::List(map.keys().map(DictKey::to_value).collect())),
        "values" => Ok(Value::List(map.values().cloned().collect())),
        "items" => Ok(Value::List(
            map.iter()
                .map(|(k, v)| Value::Tuple(vec![k.to_value(), v.clone()]))
                .collect(),
        )),
        _ => Err(arity(method, "0", args.len())),
    }
}

// ---------------------------------------------------------------------------
// Format specs (f-string `{value:spec}`)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: Option<char>,
    zero_pad: bool,
    width: Option<usize>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_format_spec(spec: &str) -> Option<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec {
        fill: ' ',
        ..FormatSpec::default()
    };
    let mut i = 0;

    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        out.fill = chars[0];
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && matches!(chars[0], '<' | '>' | '^') {
        out.align = Some(chars[0]);
        i = 1;
    }

    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        out.sign = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' && out.align.is_none() {
        out.zero_pad = true;
        out.fill = '0';
        i += 1;
    }

    let width_start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > width_start {
        out.width = chars[width_start..i].iter().collect::<String>().parse().ok();
    }

    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let prec_start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == prec_start {
            return None;
        }
        out.precision = chars[prec_start..i].iter().collect::<String>().parse().ok();
    }

    if i < chars.len() {
        if i + 1 != chars.len() || !matches!(chars[i], 'd' | 'f' | 's') {
            return None;
        }
        out.kind = Some(chars[i]);
    }
    Some(out)
}

fn apply_sign(rendered: String, negative: bool, sign: Option<char>) -> String {
    if negative {
        format!("-{}", rendered)
    } else {
        match sign {
            Some('+') => format!("+{}", rendered),
            Some(' ') => format!(" {}", rendered),
            _ => rendered,
        }
    }
}

/// Applies a format spec to a value. Supports the `[[fill]align][sign][0]
/// [width][.precision][d|f|s]` subset of the usual mini-language.
pub fn format_value(value: &Value, spec: &str) -> RuntimeResult<String> {
    if spec.is_empty() {
        return Ok(value.display_string());
    }
    let parsed = parse_format_spec(spec).ok_or_else(|| CapscriptError::UnsupportedOperation {
        message: format!("invalid format spec '{}'", spec),
    })?;

    let is_numeric = matches!(value, Value::Int(_) | Value::Float(_));
    let body = match (parsed.kind, value) {
        (Some('d'), Value::Int(i)) => apply_sign(i.abs().to_string(), *i < 0, parsed.sign),
        (Some('d'), other) => {
            return Err(CapscriptError::TypeMismatch {
                expected: "int".to_string(),
                actual: other.type_name().to_string(),
                operation: "format 'd'".to_string(),
            })
        }
        (Some('f'), v) => {
            let x = numeric(v).ok_or_else(|| CapscriptError::TypeMismatch {
                expected: "number".to_string(),
                actual: v.type_name().to_string(),
                operation: "format 'f'".to_string(),
            })?;
            let precision = parsed.precision.unwrap_or(6);
            apply_sign(format!("{:.*}", precision, x.abs()), x < 0.0, parsed.sign)
        }
        (Some('s') | None, v) => {
            let mut rendered = match (v, parsed.precision) {
                (Value::Float(f), Some(precision)) => {
                    apply_sign(format!("{:.*}", precision, f.abs()), *f < 0.0, parsed.sign)
                }
                (Value::Int(i), _) if parsed.sign.is_some() => {
                    apply_sign(i.abs().to_string(), *i < 0, parsed.sign)
                }
                _ => v.display_string(),
            };
            if let (Value::Str(_), Some(precision)) = (v, parsed.precision) {
                rendered = rendered.chars().take(precision).collect();
            }
            rendered
        }
        _ => value.display_string(),
    };

    let width = parsed.width.unwrap_or(0);
    let current = body.chars().count();
    if current >= width {
        return Ok(body);
    }
    let pad = width - current;
    let fill: String = std::iter::repeat(parsed.fill).take(pad).collect();
    let align = parsed.align.unwrap_or(if is_numeric { '>' } else { '<' });
    let padded = match align {
        '<' => format!("{}{}", body, fill),
        '>' => format!("{}{}", fill, body),
        _ => {
            let left = pad / 2;
            let right = pad - left;
            format!(
                "{}{}{}",
                std::iter::repeat(parsed.fill).take(left).collect::<String>(),
                body,
                std::iter::repeat(parsed.fill).take(right).collect::<String>()
            )
        }
    };
    Ok(padded)
}

/// The `!a` conversion: repr with non-ASCII characters escaped.
pub fn ascii_string(value: &Value) -> String {
    value
        .repr_string()
        .chars()
        .flat_map(|c| {
            if c.is_ascii() {
                vec![c]
            } else if (c as u32) <= 0xFFFF {
                format!("\\u{:04x}", c as u32).chars().collect()
            } else {
                format!("\\U{:08x}", c as u32).chars().collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn python_division_semantics() {
        assert_eq!(
            binary_op(BinOp::Div, &Value::Int(7), &Value::Int(2), 1000).unwrap(),
            Value::Float(3.5)
        );
        assert_eq!(
            binary_op(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2), 1000).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            binary_op(BinOp::Mod, &Value::Int(-7), &Value::Int(3), 1000).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0), 1000),
            Err(CapscriptError::DivisionByZero)
        );
    }

    #[test]
    fn string_and_sequence_operators() {
        assert_eq!(
            binary_op(
                BinOp::Add,
                &Value::Str("ab".into()),
                &Value::Str("cd".into()),
                1000
            )
            .unwrap(),
            Value::Str("abcd".into())
        );
        assert_eq!(
            binary_op(BinOp::Mul, &Value::Str("ab".into()), &Value::Int(3), 1000).unwrap(),
            Value::Str("ababab".into())
        );
        let repeated = binary_op(
            BinOp::Mul,
            &Value::List(vec![Value::Int(1)]),
            &Value::Int(3),
            1000,
        )
        .unwrap();
        assert_eq!(
            repeated,
            Value::List(vec![Value::Int(1), Value::Int(1), Value::Int(1)])
        );
    }

    #[test]
    fn repetition_respects_collection_bound() {
        let result = binary_op(
            BinOp::Mul,
            &Value::List(vec![Value::Int(1)]),
            &Value::Int(100),
            10,
        );
        assert!(matches!(
            result,
            Err(CapscriptError::ResourceLimit { .. })
        ));
    }

    #[test]
    fn membership_and_chained_comparison_ops() {
        assert_eq!(
            compare_op(
                CmpOp::In,
                &Value::Int(2),
                &Value::List(vec![Value::Int(1), Value::Int(2)])
            )
            .unwrap(),
            true
        );
        assert_eq!(
            compare_op(
                CmpOp::In,
                &Value::Str("ell".into()),
                &Value::Str("hello".into())
            )
            .unwrap(),
            true
        );
        assert_eq!(
            compare_op(CmpOp::Eq, &Value::Int(1), &Value::Float(1.0)).unwrap(),
            true
        );
    }

    #[test]
    fn range_is_bounded() {
        assert_eq!(
            call_builtin("range", &[Value::Int(3)], 1000).unwrap(),
            Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(2)])
        );
        assert!(matches!(
            call_builtin("range", &[Value::Int(2000)], 1000),
            Err(CapscriptError::ResourceLimit { .. })
        ));
    }

    #[test]
    fn method_allowlist_is_enforced() {
        let err = call_method(&Value::Str("x".into()), "encode", &[]).unwrap_err();
        assert!(matches!(err, CapscriptError::MethodNotAllowed { .. }));
        let err = call_method(&Value::List(vec![]), "append", &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, CapscriptError::MethodNotAllowed { .. }));
    }

    #[test]
    fn string_methods() {
        assert_eq!(
            call_method(
                &Value::Str("a,b,c".into()),
                "split",
                &[Value::Str(",".into())]
            )
            .unwrap(),
            Value::List(vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ])
        );
        assert_eq!(
            call_method(
                &Value::Str("-".into()),
                "join",
                &[Value::List(vec![
                    Value::Str("x".into()),
                    Value::Str("y".into())
                ])]
            )
            .unwrap(),
            Value::Str("x-y".into())
        );
        assert_eq!(
            call_method(&Value::Str("  pad  ".into()), "strip", &[]).unwrap(),
            Value::Str("pad".into())
        );
    }

    #[test]
    fn format_specs() {
        assert_eq!(
            format_value(&Value::Float(3.14159), ".2f").unwrap(),
            "3.14"
        );
        assert_eq!(format_value(&Value::Int(42), "5d").unwrap(), "   42");
        assert_eq!(format_value(&Value::Str("hi".into()), "<4").unwrap(), "hi  ");
        assert_eq!(format_value(&Value::Str("hi".into()), "*^4").unwrap(), "*hi*");
        assert!(format_value(&Value::Int(1), "??").is_err());
    }
}
