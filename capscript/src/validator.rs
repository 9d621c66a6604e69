//! Whole-program grammar validation.
//!
//! Runs after parsing and before any statement executes, so a banned
//! construct anywhere in the program means nothing has had side effects.
//! The walk is an exhaustive match over the closed AST: a construct this
//! pass does not explicitly admit cannot slip through, and adding a new AST
//! variant without deciding its fate here is a compile error.

use crate::ast::{Expr, FStringPart, Program, RecordDecl, SpecPart, Stmt};
use crate::runtime::error::{CapscriptError, RuntimeResult};

/// Call names that amount to dynamic evaluation.
const DYNAMIC_EVAL_NAMES: [&str; 3] = ["eval", "exec", "compile"];

fn restriction(message: impl Into<String>, line: u32) -> CapscriptError {
    CapscriptError::LanguageRestriction {
        message: message.into(),
        line,
    }
}

/// Validates a parsed program against the language restrictions, reporting
/// the first offense with its line number.
pub fn validate(program: &Program) -> RuntimeResult<()> {
    for stmt in program {
        validate_stmt(stmt)?;
    }
    Ok(())
}

fn validate_stmt(stmt: &Stmt) -> RuntimeResult<()> {
    match stmt {
        Stmt::While { line, .. } => Err(restriction("indefinite loops are not allowed", *line)),
        Stmt::Return { line } => Err(restriction(
            "return is only meaningful in function definitions, which are not allowed",
            *line,
        )),
        Stmt::Break { line } => Err(restriction("break is not allowed", *line)),
        Stmt::Continue { line } => Err(restriction("continue is not allowed", *line)),
        Stmt::Import { line } => Err(restriction("imports are not allowed", *line)),
        Stmt::FuncDef { name, line } => Err(restriction(
            format!("function definitions are not allowed ('{}')", name),
            *line,
        )),
        Stmt::Assign { target, value, .. } => {
            if let crate::ast::AssignTarget::Subscript { index, .. } = target {
                validate_expr(index)?;
            }
            validate_expr(value)
        }
        Stmt::AugAssign { value, .. } => validate_expr(value),
        Stmt::AnnAssign { value, .. } => match value {
            Some(value) => validate_expr(value),
            None => Ok(()),
        },
        Stmt::Expr { value, .. } => validate_expr(value),
        Stmt::If {
            test, body, orelse, ..
        } => {
            validate_expr(test)?;
            for stmt in body.iter().chain(orelse) {
                validate_stmt(stmt)?;
            }
            Ok(())
        }
        Stmt::For { iter, body, .. } => {
            validate_expr(iter)?;
            for stmt in body {
                validate_stmt(stmt)?;
            }
            Ok(())
        }
        Stmt::Record(decl) => validate_record(decl),
        Stmt::Raise { value, .. } => match value {
            Some(value) => validate_expr(value),
            None => Ok(()),
        },
        Stmt::Pass { .. } => Ok(()),
    }
}

fn validate_record(decl: &RecordDecl) -> RuntimeResult<()> {
    for field in &decl.fields {
        if let Some(default) = &field.default {
            validate_expr(default)?;
        }
    }
    Ok(())
}

fn validate_expr(expr: &Expr) -> RuntimeResult<()> {
    match expr {
        Expr::Lambda { line } => Err(restriction("anonymous functions are not allowed", *line)),
        Expr::Comprehension {
            kind,
            element,
            value,
            clauses,
            line,
        } => {
            if *kind == crate::ast::ComprehensionKind::Generator {
                return Err(restriction("generator expressions are not allowed", *line));
            }
            if clauses.len() != 1 {
                return Err(restriction(
                    "comprehensions support a single generator clause",
                    *line,
                ));
            }
            validate_expr(element)?;
            if let Some(value) = value {
                validate_expr(value)?;
            }
            for clause in clauses {
                validate_expr(&clause.iter)?;
                for condition in &clause.ifs {
                    validate_expr(condition)?;
                }
            }
            Ok(())
        }
        Expr::Call {
            func,
            args,
            kwargs,
            line,
        } => {
            if DYNAMIC_EVAL_NAMES.contains(&func.as_str()) {
                return Err(restriction(
                    format!("dynamic evaluation is not allowed ('{}')", func),
                    *line,
                ));
            }
            for arg in args {
                validate_expr(arg)?;
            }
            for (_, value) in kwargs {
                validate_expr(value)?;
            }
            Ok(())
        }
        Expr::MethodCall {
            object,
            args,
            kwargs,
            ..
        } => {
            validate_expr(object)?;
            for arg in args {
                validate_expr(arg)?;
            }
            for (_, value) in kwargs {
                validate_expr(value)?;
            }
            Ok(())
        }
        Expr::Literal(_) | Expr::Name { .. } => Ok(()),
        Expr::Binary { left, right, .. } => {
            validate_expr(left)?;
            validate_expr(right)
        }
        Expr::Unary { operand, .. } => validate_expr(operand),
        Expr::Bool { values, .. } => {
            for value in values {
                validate_expr(value)?;
            }
            Ok(())
        }
        Expr::Compare {
            left, comparators, ..
        } => {
            validate_expr(left)?;
            for comparator in comparators {
                validate_expr(comparator)?;
            }
            Ok(())
        }
        Expr::Attribute { object, .. } => validate_expr(object),
        Expr::Subscript { object, index, .. } => {
            validate_expr(object)?;
            validate_expr(index)
        }
        Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
            for item in items {
                validate_expr(item)?;
            }
            Ok(())
        }
        Expr::Dict { keys, values } => {
            for expr in keys.iter().chain(values) {
                validate_expr(expr)?;
            }
            Ok(())
        }
        Expr::Ternary { test, body, orelse } => {
            validate_expr(test)?;
            validate_expr(body)?;
            validate_expr(orelse)
        }
        Expr::FString { parts, .. } => {
            for part in parts {
                if let FStringPart::Interp { value, spec, .. } = part {
                    validate_expr(value)?;
                    if let Some(spec_parts) = spec {
                        for spec_part in spec_parts {
                            if let SpecPart::Expr(expr) = spec_part {
                                validate_expr(expr)?;
                            }
                        }
                    }
                }
            }
            Ok(())
        }
    }
}
