//! Expression builders: pest pairs to [`Expr`] nodes.

use pest::iterators::Pair;

use super::errors::ParseError;
use super::Rule;
use crate::ast::{
    BinOp, BoolOp, CmpOp, CompClause, ComprehensionKind, Conversion, Expr, FStringPart, Literal,
    SpecPart, TypeRef, UnaryOp,
};

fn line_of(pair: &Pair<'_, Rule>) -> u32 {
    pair.line_col().0 as u32
}

pub(super) fn build_expression(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::expression => build_ternary(pair),
        Rule::or_expr => build_bool_chain(pair, BoolOp::Or, Rule::kw_or),
        Rule::and_expr => build_bool_chain(pair, BoolOp::And, Rule::kw_and),
        Rule::not_expr => build_not(pair),
        Rule::comparison => build_comparison(pair),
        Rule::bitor_expr => fold_fixed(pair, BinOp::BitOr),
        Rule::bitxor_expr => fold_fixed(pair, BinOp::BitXor),
        Rule::bitand_expr => fold_fixed(pair, BinOp::BitAnd),
        Rule::shift_expr | Rule::add_expr | Rule::mul_expr => fold_tokened(pair),
        Rule::unary_expr => build_unary(pair),
        Rule::power_expr => build_power(pair),
        Rule::postfix_expr => build_postfix(pair),
        Rule::atom => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| ParseError::new("empty atom", line))?;
            build_atom(inner)
        }
        _ => build_atom(pair),
    }
}

fn build_ternary(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let operands: Vec<Pair<'_, Rule>> = pair
        .into_inner()
        .filter(|p| !matches!(p.as_rule(), Rule::kw_if | Rule::kw_else))
        .collect();
    match operands.len() {
        1 => build_expression(operands.into_iter().next().expect("one operand")),
        3 => {
            let mut iter = operands.into_iter();
            let body = build_expression(iter.next().expect("body"))?;
            let test = build_expression(iter.next().expect("test"))?;
            let orelse = build_expression(iter.next().expect("orelse"))?;
            Ok(Expr::Ternary {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            })
        }
        n => Err(ParseError::new(
            format!("malformed conditional expression ({} operands)", n),
            1,
        )),
    }
}

fn build_bool_chain(pair: Pair<'_, Rule>, op: BoolOp, kw: Rule) -> Result<Expr, ParseError> {
    let operands: Vec<Pair<'_, Rule>> =
        pair.into_inner().filter(|p| p.as_rule() != kw).collect();
    if operands.len() == 1 {
        return build_expression(operands.into_iter().next().expect("one operand"));
    }
    let values = operands
        .into_iter()
        .map(build_expression)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expr::Bool { op, values })
}

fn build_not(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| ParseError::new("empty expression", line))?;
    if first.as_rule() == Rule::kw_not {
        let operand = inner
            .next()
            .ok_or_else(|| ParseError::new("'not' without operand", line))?;
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(build_expression(operand)?),
        })
    } else {
        build_expression(first)
    }
}

fn cmp_op_from(text: &str, line: u32) -> Result<CmpOp, ParseError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.as_slice() {
        ["=="] => Ok(CmpOp::Eq),
        ["!="] => Ok(CmpOp::NotEq),
        ["<="] => Ok(CmpOp::LtE),
        [">="] => Ok(CmpOp::GtE),
        ["<"] => Ok(CmpOp::Lt),
        [">"] => Ok(CmpOp::Gt),
        ["in"] => Ok(CmpOp::In),
        ["not", "in"] => Ok(CmpOp::NotIn),
        ["is"] => Ok(CmpOp::Is),
        ["is", "not"] => Ok(CmpOp::IsNot),
        _ => Err(ParseError::new(
            format!("unknown comparison operator '{}'", text),
            line,
        )),
    }
}

fn build_comparison(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut operands = Vec::new();
    let mut ops = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::comp_op => ops.push(cmp_op_from(inner.as_str(), line_of(&inner))?),
            _ => operands.push(build_expression(inner)?),
        }
    }
    if ops.is_empty() {
        return operands
            .into_iter()
            .next()
            .ok_or_else(|| ParseError::new("empty comparison", line));
    }
    let mut iter = operands.into_iter();
    let left = iter
        .next()
        .ok_or_else(|| ParseError::new("comparison without left operand", line))?;
    Ok(Expr::Compare {
        left: Box::new(left),
        ops,
        comparators: iter.collect(),
    })
}

fn fold_fixed(pair: Pair<'_, Rule>, op: BinOp) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut result: Option<Expr> = None;
    for inner in pair.into_inner() {
        let operand = build_expression(inner)?;
        result = Some(match result {
            None => operand,
            Some(left) => Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(operand),
            },
        });
    }
    result.ok_or_else(|| ParseError::new("empty expression", line))
}

fn bin_op_from(text: &str, line: u32) -> Result<BinOp, ParseError> {
    match text {
        "+" => Ok(BinOp::Add),
        "-" => Ok(BinOp::Sub),
        "*" => Ok(BinOp::Mul),
        "/" => Ok(BinOp::Div),
        "//" => Ok(BinOp::FloorDiv),
        "%" => Ok(BinOp::Mod),
        "<<" => Ok(BinOp::LShift),
        ">>" => Ok(BinOp::RShift),
        other => Err(ParseError::new(
            format!("unknown binary operator '{}'", other),
            line,
        )),
    }
}

fn fold_tokened(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut result: Option<Expr> = None;
    let mut pending: Option<BinOp> = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::add_op | Rule::mul_op | Rule::shift_op => {
                pending = Some(bin_op_from(inner.as_str(), line_of(&inner))?);
            }
            _ => {
                let operand = build_expression(inner)?;
                result = Some(match (result, pending.take()) {
                    (None, _) => operand,
                    (Some(left), Some(op)) => Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(operand),
                    },
                    (Some(_), None) => {
                        return Err(ParseError::new("operand without operator", line))
                    }
                });
            }
        }
    }
    result.ok_or_else(|| ParseError::new("empty expression", line))
}

fn build_unary(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| ParseError::new("empty expression", line))?;
    if first.as_rule() == Rule::unary_op {
        let op = match first.as_str() {
            "+" => UnaryOp::Pos,
            "-" => UnaryOp::Neg,
            "~" => UnaryOp::Invert,
            other => {
                return Err(ParseError::new(
                    format!("unknown unary operator '{}'", other),
                    line,
                ))
            }
        };
        let operand = inner
            .next()
            .ok_or_else(|| ParseError::new("unary operator without operand", line))?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(build_expression(operand)?),
        })
    } else {
        build_expression(first)
    }
}

fn build_power(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut base = None;
    let mut exponent = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::op_pow => {}
            _ if base.is_none() => base = Some(build_expression(inner)?),
            _ => exponent = Some(build_expression(inner)?),
        }
    }
    let base = base.ok_or_else(|| ParseError::new("empty expression", line))?;
    match exponent {
        Some(exponent) => Ok(Expr::Binary {
            op: BinOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent),
        }),
        None => Ok(base),
    }
}

fn build_postfix(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();
    let atom = inner
        .next()
        .ok_or_else(|| ParseError::new("empty expression", line))?;
    let mut result = build_expression(atom)?;

    for suffix in inner {
        let suffix_line = line_of(&suffix);
        let suffix = suffix
            .into_inner()
            .next()
            .ok_or_else(|| ParseError::new("empty postfix", suffix_line))?;
        match suffix.as_rule() {
            Rule::attr_suffix => {
                let name = suffix
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::identifier)
                    .map(|p| p.as_str().to_string())
                    .ok_or_else(|| ParseError::new("attribute access without a name", suffix_line))?;
                result = Expr::Attribute {
                    object: Box::new(result),
                    name,
                    line: suffix_line,
                };
            }
            Rule::index_suffix => {
                let index = suffix
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::expression)
                    .map(build_expression)
                    .transpose()?
                    .ok_or_else(|| ParseError::new("subscript without an index", suffix_line))?;
                result = Expr::Subscript {
                    object: Box::new(result),
                    index: Box::new(index),
                    line: suffix_line,
                };
            }
            Rule::call_suffix => {
                let mut args = Vec::new();
                let mut kwargs = Vec::new();
                for arg in suffix.into_inner() {
                    if arg.as_rule() != Rule::call_arg {
                        continue;
                    }
                    let arg_line = line_of(&arg);
                    let inner_arg = arg
                        .into_inner()
                        .next()
                        .ok_or_else(|| ParseError::new("empty call argument", arg_line))?;
                    match inner_arg.as_rule() {
                        Rule::kwarg => {
                            let mut name = None;
                            let mut value = None;
                            for part in inner_arg.into_inner() {
                                match part.as_rule() {
                                    Rule::identifier => name = Some(part.as_str().to_string()),
                                    Rule::expression => value = Some(build_expression(part)?),
                                    _ => {}
                                }
                            }
                            kwargs.push((
                                name.ok_or_else(|| {
                                    ParseError::new("keyword argument without a name", arg_line)
                                })?,
                                value.ok_or_else(|| {
                                    ParseError::new("keyword argument without a value", arg_line)
                                })?,
                            ));
                        }
                        _ => {
                            if !kwargs.is_empty() {
                                return Err(ParseError::new(
                                    "positional argument after keyword argument",
                                    arg_line,
                                ));
                            }
                            args.push(build_expression(inner_arg)?);
                        }
                    }
                }
                result = apply_call(result, args, kwargs, suffix_line)?;
            }
            other => {
                return Err(ParseError::new(
                    format!("unexpected postfix rule {:?}", other),
                    suffix_line,
                ))
            }
        }
    }
    Ok(result)
}

/// Calls are supported on plain names (functions, tools, constructors) and
/// attribute accesses (method calls); anything else is rejected outright.
fn apply_call(
    base: Expr,
    args: Vec<Expr>,
    kwargs: Vec<(String, Expr)>,
    line: u32,
) -> Result<Expr, ParseError> {
    match base {
        Expr::Name { name, .. } => Ok(Expr::Call {
            func: name,
            args,
            kwargs,
            line,
        }),
        Expr::Attribute { object, name, .. } => Ok(Expr::MethodCall {
            object,
            method: name,
            args,
            kwargs,
            line,
        }),
        _ => Err(ParseError::new(
            "calls are only supported on named functions and methods",
            line,
        )),
    }
}

fn build_atom(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::number => build_number(pair),
        Rule::string => Ok(Expr::Literal(Literal::Str(unquote(pair.as_str(), line)?))),
        Rule::fstring => build_fstring(pair),
        Rule::bool_lit => Ok(Expr::Literal(Literal::Bool(pair.as_str() == "True"))),
        Rule::none_lit => Ok(Expr::Literal(Literal::None)),
        Rule::identifier => Ok(Expr::Name {
            name: pair.as_str().to_string(),
            line,
        }),
        Rule::lambda_expr => Ok(Expr::Lambda { line }),
        Rule::empty_tuple => Ok(Expr::Tuple(Vec::new())),
        Rule::paren_or_tuple => {
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
        Rule::list_lit => Ok(Expr::List(build_expr_seq(pair)?)),
        Rule::set_lit => Ok(Expr::Set(build_expr_seq(pair)?)),
        Rule::dict_lit => {
            let mut keys = Vec::new();
            let mut values = Vec::new();
            for entry in pair.into_inner() {
                if entry.as_rule() != Rule::dict_entry {
                    continue;
                }
                let entry_line = line_of(&entry);
                let mut parts = entry.into_inner().filter(|p| p.as_rule() == Rule::expression);
                let key = parts
                    .next()
                    .ok_or_else(|| ParseError::new("dict entry without a key", entry_line))?;
                let value = parts
                    .next()
                    .ok_or_else(|| ParseError::new("dict entry without a value", entry_line))?;
                keys.push(build_expression(key)?);
                values.push(build_expression(value)?);
            }
            Ok(Expr::Dict { keys, values })
        }
        Rule::list_comp => build_comprehension(pair, ComprehensionKind::List),
        Rule::set_comp => build_comprehension(pair, ComprehensionKind::Set),
        Rule::generator_expr => build_comprehension(pair, ComprehensionKind::Generator),
        Rule::dict_comp => {
            let mut exprs = Vec::new();
            let mut clauses = Vec::new();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::expression => exprs.push(build_expression(inner)?),
                    Rule::comp_clause => clauses.push(build_comp_clause(inner)?),
                    _ => {}
                }
            }
            if exprs.len() != 2 {
                return Err(ParseError::new("malformed dict comprehension", line));
            }
            let mut iter = exprs.into_iter();
            Ok(Expr::Comprehension {
                kind: ComprehensionKind::Dict,
                element: Box::new(iter.next().expect("key")),
                value: iter.next().map(Box::new),
                clauses,
                line,
            })
        }
        other => Err(ParseError::new(
            format!("unexpected expression rule {:?}", other),
            line,
        )),
    }
}

fn build_expr_seq(pair: Pair<'_, Rule>) -> Result<Vec<Expr>, ParseError> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::expression)
        .map(build_expression)
        .collect()
}

fn build_comprehension(pair: Pair<'_, Rule>, kind: ComprehensionKind) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut element = None;
    let mut clauses = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => element = Some(build_expression(inner)?),
            Rule::comp_clause => clauses.push(build_comp_clause(inner)?),
            _ => {}
        }
    }
    Ok(Expr::Comprehension {
        kind,
        element: Box::new(
            element.ok_or_else(|| ParseError::new("comprehension without an element", line))?,
        ),
        value: None,
        clauses,
        line,
    })
}

fn build_comp_clause(pair: Pair<'_, Rule>) -> Result<CompClause, ParseError> {
    let line = line_of(&pair);
    let mut target = None;
    let mut iter = None;
    let mut ifs = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => target = Some(inner.as_str().to_string()),
            Rule::or_expr => iter = Some(build_expression(inner)?),
            Rule::comp_if => {
                if let Some(cond) = inner
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::or_expr)
                {
                    ifs.push(build_expression(cond)?);
                }
            }
            _ => {}
        }
    }
    Ok(CompClause {
        target: target
            .ok_or_else(|| ParseError::new("comprehension clause without a target", line))?,
        iter: iter
            .ok_or_else(|| ParseError::new("comprehension clause without an iterable", line))?,
        ifs,
    })
}

fn build_number(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let text = pair.as_str();
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(|f| Expr::Literal(Literal::Float(f)))
            .map_err(|_| ParseError::new(format!("invalid float literal '{}'", text), line))
    } else {
        text.parse::<i64>()
            .map(|i| Expr::Literal(Literal::Int(i)))
            .map_err(|_| ParseError::new(format!("integer literal out of range '{}'", text), line))
    }
}

// --- Strings ---

fn unquote(raw: &str, line: u32) -> Result<String, ParseError> {
    if raw.len() < 2 {
        return Err(ParseError::new("malformed string literal", line));
    }
    Ok(unescape(&raw[1..raw.len() - 1]))
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn unescape_fstring_text(text: &str) -> String {
    let doubled = text.replace("{{", "{").replace("}}", "}");
    unescape(&doubled)
}

fn build_fstring(pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let line = line_of(&pair);
    let mut parts = Vec::new();
    for part in pair.into_inner() {
        if part.as_rule() != Rule::fstring_part {
            continue;
        }
        let part_line = line_of(&part);
        let inner = part
            .into_inner()
            .next()
            .ok_or_else(|| ParseError::new("empty f-string part", part_line))?;
        match inner.as_rule() {
            Rule::fstring_text => {
                parts.push(FStringPart::Text(unescape_fstring_text(inner.as_str())));
            }
            Rule::fstring_interp => parts.push(build_fstring_interp(inner)?),
            other => {
                return Err(ParseError::new(
                    format!("unexpected f-string rule {:?}", other),
                    part_line,
                ))
            }
        }
    }
    Ok(Expr::FString { parts, line })
}

fn build_fstring_interp(pair: Pair<'_, Rule>) -> Result<FStringPart, ParseError> {
    let line = line_of(&pair);
    let mut value = None;
    let mut conversion = None;
    let mut spec = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => value = Some(build_expression(inner)?),
            Rule::fconversion => {
                conversion = Some(match inner.as_str() {
                    "!s" => Conversion::Str,
                    "!r" => Conversion::Repr,
                    "!a" => Conversion::Ascii,
                    other => {
                        return Err(ParseError::new(
                            format!("unknown conversion '{}'", other),
                            line,
                        ))
                    }
                });
            }
            Rule::format_spec => {
                let mut spec_parts = Vec::new();
                for item in inner.into_inner() {
                    if item.as_rule() != Rule::spec_item {
                        continue;
                    }
                    let item_line = line_of(&item);
                    let spec_inner = item
                        .into_inner()
                        .next()
                        .ok_or_else(|| ParseError::new("empty format spec item", item_line))?;
                    match spec_inner.as_rule() {
                        Rule::spec_text => {
                            spec_parts.push(SpecPart::Text(spec_inner.as_str().to_string()));
                        }
                        Rule::spec_interp => {
                            let expr = spec_inner
                                .into_inner()
                                .find(|p| p.as_rule() == Rule::expression)
                                .map(build_expression)
                                .transpose()?
                                .ok_or_else(|| {
                                    ParseError::new("empty format spec expression", item_line)
                                })?;
                            spec_parts.push(SpecPart::Expr(expr));
                        }
                        other => {
                            return Err(ParseError::new(
                                format!("unexpected format spec rule {:?}", other),
                                item_line,
                            ))
                        }
                    }
                }
                spec = Some(spec_parts);
            }
            _ => {}
        }
    }
    Ok(FStringPart::Interp {
        value: value.ok_or_else(|| ParseError::new("empty f-string expression", line))?,
        conversion,
        spec,
    })
}

// --- Types ---

pub(super) fn build_type_expr(pair: Pair<'_, Rule>) -> Result<TypeRef, ParseError> {
    let line = line_of(&pair);
    let mut name = None;
    let mut param = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => name = Some(inner.as_str().to_string()),
            Rule::type_expr => param = Some(build_type_expr(inner)?),
            _ => {}
        }
    }
    let name = name.ok_or_else(|| ParseError::new("type annotation without a name", line))?;
    match (name.as_str(), param) {
        ("str", None) => Ok(TypeRef::Str),
        ("int", None) => Ok(TypeRef::Int),
        ("float", None) => Ok(TypeRef::Float),
        ("bool", None) => Ok(TypeRef::Bool),
        ("list", param) => Ok(TypeRef::List(param.map(Box::new))),
        ("dict", None) => Ok(TypeRef::Dict),
        (_, None) => Ok(TypeRef::Named(name)),
        (other, Some(_)) => Err(ParseError::new(
            format!("type '{}' does not take a parameter", other),
            line,
        )),
    }
}
