//! Grammar validation: banned constructs fail closed, with line numbers,
//! before anything executes.

mod common;

use std::sync::atomic::Ordering;

use common::guarded_interpreter;

use capscript::CapscriptError;

fn restriction_line(source: &str) -> (String, u32) {
    let (interpreter, _) = guarded_interpreter();
    match interpreter.execute(source).unwrap_err() {
        CapscriptError::LanguageRestriction { message, line } => (message, line),
        other => panic!("expected LanguageRestriction, got {:?}", other),
    }
}

#[test]
fn while_loops_are_rejected() {
    let (message, line) = restriction_line("x = 1\nwhile True { pass }");
    assert!(message.contains("indefinite loops"));
    assert_eq!(line, 2);
}

#[test]
fn imports_are_rejected() {
    let (message, line) = restriction_line("import os");
    assert!(message.contains("imports"));
    assert_eq!(line, 1);

    let (message, _) = restriction_line("from os import path");
    assert!(message.contains("imports"));
}

#[test]
fn dynamic_evaluation_is_rejected() {
    let (message, line) = restriction_line("x = 1\ny = 2\neval(\"x + y\")");
    assert!(message.contains("dynamic evaluation"));
    assert_eq!(line, 3);

    let (message, _) = restriction_line("exec(\"x = 1\")");
    assert!(message.contains("dynamic evaluation"));
}

#[test]
fn break_and_continue_are_rejected() {
    let (message, line) = restriction_line("for i in [1, 2] {\nbreak\n}");
    assert!(message.contains("break"));
    assert_eq!(line, 2);

    let (message, _) = restriction_line("for i in [1, 2] { continue }");
    assert!(message.contains("continue"));
}

#[test]
fn lambdas_are_rejected() {
    let (message, line) = restriction_line("f = lambda x: x + 1");
    assert!(message.contains("anonymous functions"));
    assert_eq!(line, 1);
}

#[test]
fn function_definitions_are_rejected() {
    let (message, line) = restriction_line("def helper(x) { x + 1 }");
    assert!(message.contains("function definitions"));
    assert_eq!(line, 1);
}

#[test]
fn generator_expressions_are_rejected() {
    let (message, _) = restriction_line("g = (x for x in [1, 2])");
    assert!(message.contains("generator expressions"));
}

#[test]
fn multiple_comprehension_generators_are_rejected() {
    let (message, _) = restriction_line("[x + y for x in [1] for y in [2]]");
    assert!(message.contains("single generator clause"));
}

#[test]
fn no_side_effects_before_the_offending_statement() {
    // Validation is a whole-program pre-pass: the tool call on line 1 must
    // never run when line 2 is banned.
    let (interpreter, side_effects) = guarded_interpreter();
    let err = interpreter
        .execute("log_action()\nwhile True { pass }")
        .unwrap_err();
    assert!(matches!(err, CapscriptError::LanguageRestriction { .. }));
    assert_eq!(side_effects.load(Ordering::SeqCst), 0);
}

#[test]
fn syntax_errors_carry_a_line() {
    let (interpreter, _) = guarded_interpreter();
    let err = interpreter.execute("x = 1\ny = = 2").unwrap_err();
    match err {
        CapscriptError::Syntax { line, .. } => assert_eq!(line, 2),
        other => panic!("expected Syntax, got {:?}", other),
    }
}
