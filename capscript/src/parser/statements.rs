//! Statement builders: pest pairs to [`Stmt`] nodes.

use pest::iterators::Pair;

use super::errors::ParseError;
use super::expressions::{build_expression, build_type_expr};
use super::Rule;
use crate::ast::{AssignTarget, BinOp, Expr, FieldDecl, RecordDecl, Stmt};

fn line_of(pair: &Pair<'_, Rule>) -> u32 {
    pair.line_col().0 as u32
}

pub(super) fn build_statement(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::new("empty statement", 1))?;
    let line = line_of(&inner);
    match inner.as_rule() {
        Rule::record_decl => build_record_decl(inner),
        Rule::if_stmt => build_if(inner),
        Rule::for_stmt => build_for(inner),
        Rule::while_stmt => build_while(inner),
        Rule::func_def => build_func_def(inner),
        Rule::import_stmt => Ok(Stmt::Import { line }),
        Rule::raise_stmt => {
            let value = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::expression)
                .map(build_expression)
                .transpose()?;
            Ok(Stmt::Raise { value, line })
        }
        Rule::pass_stmt => Ok(Stmt::Pass { line }),
        Rule::return_stmt => Ok(Stmt::Return { line }),
        Rule::break_stmt => Ok(Stmt::Break { line }),
        Rule::continue_stmt => Ok(Stmt::Continue { line }),
        Rule::ann_assign_stmt => build_ann_assign(inner),
        Rule::aug_assign_stmt => build_aug_assign(inner),
        Rule::assign_stmt => build_assign(inner),
        Rule::expr_stmt => {
            let expr_pair = inner
                .into_inner()
                .next()
                .ok_or_else(|| ParseError::new("empty expression statement", line))?;
            Ok(Stmt::Expr {
                value: build_expression(expr_pair)?,
                line,
            })
        }
        other => Err(ParseError::new(
            format!("unexpected statement rule {:?}", other),
            line,
        )),
    }
}

pub(super) fn build_block(pair: Pair<'_, Rule>) -> Result<Vec<Stmt>, ParseError> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::statement)
        .map(build_statement)
        .collect()
}

fn build_if(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    let mut test = None;
    let mut body = None;
    let mut elifs: Vec<(Expr, Vec<Stmt>, u32)> = Vec::new();
    let mut else_body: Option<Vec<Stmt>> = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => test = Some(build_expression(inner)?),
            Rule::block => body = Some(build_block(inner)?),
            Rule::elif_clause => {
                let clause_line = line_of(&inner);
                let mut clause_test = None;
                let mut clause_body = None;
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::expression => clause_test = Some(build_expression(part)?),
                        Rule::block => clause_body = Some(build_block(part)?),
                        _ => {}
                    }
                }
                elifs.push((
                    clause_test
                        .ok_or_else(|| ParseError::new("elif without condition", clause_line))?,
                    clause_body.unwrap_or_default(),
                    clause_line,
                ));
            }
            Rule::else_clause => {
                for part in inner.into_inner() {
                    if part.as_rule() == Rule::block {
                        else_body = Some(build_block(part)?);
                    }
                }
            }
            _ => {}
        }
    }

    // Desugar elif chains into nested ifs.
    let mut orelse = else_body.unwrap_or_default();
    for (clause_test, clause_body, clause_line) in elifs.into_iter().rev() {
        orelse = vec![Stmt::If {
            test: clause_test,
            body: clause_body,
            orelse,
            line: clause_line,
        }];
    }

    Ok(Stmt::If {
        test: test.ok_or_else(|| ParseError::new("if without condition", line))?,
        body: body.unwrap_or_default(),
        orelse,
        line,
    })
}

fn build_for(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    let mut target = None;
    let mut iter = None;
    let mut body = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => target = Some(inner.as_str().to_string()),
            Rule::expression => iter = Some(build_expression(inner)?),
            Rule::block => body = Some(build_block(inner)?),
            _ => {}
        }
    }
    Ok(Stmt::For {
        target: target.ok_or_else(|| ParseError::new("for without loop variable", line))?,
        iter: iter.ok_or_else(|| ParseError::new("for without iterable", line))?,
        body: body.unwrap_or_default(),
        line,
    })
}

fn build_while(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    let mut test = None;
    let mut body = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => test = Some(build_expression(inner)?),
            Rule::block => body = Some(build_block(inner)?),
            _ => {}
        }
    }
    Ok(Stmt::While {
        test: test.ok_or_else(|| ParseError::new("while without condition", line))?,
        body: body.unwrap_or_default(),
        line,
    })
}

fn build_func_def(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    // The body is deliberately not built: validation rejects the definition
    // itself before anything inside it could matter.
    let name = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::identifier)
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| ParseError::new("function definition without a name", line))?;
    Ok(Stmt::FuncDef { name, line })
}

fn build_record_decl(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    let mut name = None;
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => name = Some(inner.as_str().to_string()),
            Rule::record_field => {
                let field_line = line_of(&inner);
                let mut field_name = None;
                let mut ty = None;
                let mut default = None;
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::identifier => field_name = Some(part.as_str().to_string()),
                        Rule::type_expr => ty = Some(build_type_expr(part)?),
                        Rule::expression => default = Some(build_expression(part)?),
                        _ => {}
                    }
                }
                fields.push(FieldDecl {
                    name: field_name
                        .ok_or_else(|| ParseError::new("record field without a name", field_line))?,
                    ty: ty.ok_or_else(|| ParseError::new("record field without a type", field_line))?,
                    default,
                });
            }
            _ => {}
        }
    }
    Ok(Stmt::Record(RecordDecl {
        name: name.ok_or_else(|| ParseError::new("record declaration without a name", line))?,
        fields,
        line,
    }))
}

fn build_ann_assign(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    let mut name = None;
    let mut annotation = None;
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => name = Some(inner.as_str().to_string()),
            Rule::type_expr => annotation = Some(build_type_expr(inner)?),
            Rule::expression => value = Some(build_expression(inner)?),
            _ => {}
        }
    }
    Ok(Stmt::AnnAssign {
        name: name.ok_or_else(|| ParseError::new("annotated assignment without a name", line))?,
        annotation: annotation
            .ok_or_else(|| ParseError::new("annotated assignment without a type", line))?,
        value,
        line,
    })
}

fn build_aug_assign(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    let mut name = None;
    let mut op = None;
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => name = Some(inner.as_str().to_string()),
            Rule::aug_op => op = Some(aug_op_from(inner.as_str(), line)?),
            Rule::expression => value = Some(build_expression(inner)?),
            _ => {}
        }
    }
    Ok(Stmt::AugAssign {
        name: name.ok_or_else(|| ParseError::new("augmented assignment without a name", line))?,
        op: op.ok_or_else(|| ParseError::new("augmented assignment without an operator", line))?,
        value: value
            .ok_or_else(|| ParseError::new("augmented assignment without a value", line))?,
        line,
    })
}

fn aug_op_from(symbol: &str, line: u32) -> Result<BinOp, ParseError> {
    match symbol {
        "+=" => Ok(BinOp::Add),
        "-=" => Ok(BinOp::Sub),
        "*=" => Ok(BinOp::Mul),
        "/=" => Ok(BinOp::Div),
        "//=" => Ok(BinOp::FloorDiv),
        "%=" => Ok(BinOp::Mod),
        "**=" => Ok(BinOp::Pow),
        "<<=" => Ok(BinOp::LShift),
        ">>=" => Ok(BinOp::RShift),
        "&=" => Ok(BinOp::BitAnd),
        "|=" => Ok(BinOp::BitOr),
        "^=" => Ok(BinOp::BitXor),
        other => Err(ParseError::new(
            format!("unknown augmented operator '{}'", other),
            line,
        )),
    }
}

fn build_assign(pair: Pair<'_, Rule>) -> Result<Stmt, ParseError> {
    let line = line_of(&pair);
    let mut target = None;
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::assign_target => target = Some(build_assign_target(inner)?),
            Rule::expr_list => value = Some(build_expr_list(inner)?),
            _ => {}
        }
    }
    Ok(Stmt::Assign {
        target: target.ok_or_else(|| ParseError::new("assignment without a target", line))?,
        value: value.ok_or_else(|| ParseError::new("assignment without a value", line))?,
        line,
    })
}

fn build_assign_target(pair: Pair<'_, Rule>) -> Result<AssignTarget, ParseError> {
    let line = line_of(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::new("empty assignment target", line))?;
    match inner.as_rule() {
        Rule::identifier => Ok(AssignTarget::Name(inner.as_str().to_string())),
        Rule::target_tuple | Rule::target_group => {
            let names: Vec<String> = inner
                .into_inner()
                .filter(|p| p.as_rule() == Rule::identifier)
                .map(|p| p.as_str().to_string())
                .collect();
            // A single parenthesized name is plain grouping, not unpacking.
            if names.len() == 1 {
                Ok(AssignTarget::Name(names.into_iter().next().expect("one name")))
            } else {
                Ok(AssignTarget::Tuple(names))
            }
        }
        Rule::target_subscript => {
            let mut name = None;
            let mut index = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::identifier => name = Some(part.as_str().to_string()),
                    Rule::expression => index = Some(build_expression(part)?),
                    _ => {}
                }
            }
            Ok(AssignTarget::Subscript {
                name: name
                    .ok_or_else(|| ParseError::new("subscript target without a name", line))?,
                index: index
                    .ok_or_else(|| ParseError::new("subscript target without an index", line))?,
            })
        }
        other => Err(ParseError::new(
            format!("unsupported assignment target {:?}", other),
            line,
        )),
    }
}

/// The right-hand side of an assignment: a single expression, or a bare
/// tuple (`a, b = b, a`).
fn build_expr_list(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let mut exprs = Vec::new();
    let mut trailing_comma = false;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => exprs.push(build_expression(inner)?),
            Rule::trailing_comma => trailing_comma = true,
            _ => {}
        }
    }
    if exprs.len() == 1 && !trailing_comma {
        Ok(exprs.into_iter().next().expect("one expression"))
    } else {
        Ok(Expr::Tuple(exprs))
    }
}
