//! Parse-error type carrying a line anchor.

use pest::error::{Error as PestError, LineColLocation};
use pest::iterators::Pair;

use super::Rule;
use crate::runtime::error::CapscriptError;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }

    pub fn from_pair(message: impl Into<String>, pair: &Pair<'_, Rule>) -> Self {
        let (line, _) = pair.line_col();
        Self::new(message, line as u32)
    }
}

impl From<PestError<Rule>> for ParseError {
    fn from(error: PestError<Rule>) -> Self {
        let line = match error.line_col {
            LineColLocation::Pos((line, _)) => line,
            LineColLocation::Span((line, _), _) => line,
        };
        Self {
            message: error.variant.message().into_owned(),
            line: line as u32,
        }
    }
}

impl From<ParseError> for CapscriptError {
    fn from(error: ParseError) -> Self {
        CapscriptError::Syntax {
            message: error.message,
            line: error.line,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}
