//! CapScript parser: pest grammar plus pair-to-AST builders.

use pest::Parser;

use crate::ast::Program;

pub mod errors;
mod expressions;
mod statements;

pub use errors::ParseError;

#[derive(pest_derive::Parser)]
#[grammar = "capscript.pest"]
pub struct CapscriptParser;

/// Parses a full program into a statement list.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let mut pairs = CapscriptParser::parse(Rule::program, source)?;
    let program = pairs
        .next()
        .ok_or_else(|| ParseError::new("empty parse result", 1))?;

    let mut statements = Vec::new();
    for pair in program.into_inner() {
        match pair.as_rule() {
            Rule::statement => statements.push(statements::build_statement(pair)?),
            Rule::EOI => {}
            other => {
                return Err(ParseError::new(
                    format!("unexpected rule {:?} at top level", other),
                    1,
                ))
            }
        }
    }
    Ok(statements)
}

/// Parses a single expression (handy for tests and tooling).
pub fn parse_expression(source: &str) -> Result<crate::ast::Expr, ParseError> {
    let mut pairs = CapscriptParser::parse(Rule::expression, source)?;
    let pair = pairs
        .next()
        .ok_or_else(|| ParseError::new("no expression found", 1))?;
    expressions::build_expression(pair)
}
