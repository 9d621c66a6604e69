//! Strict-mode control-flow tainting: a branch taken because of untrusted
//! data taints everything assigned inside it.

mod common;

use common::guarded_interpreter_with;

use capscript::runtime::StaticExtractor;
use capscript::{CapscriptError, InterpreterConfig};

const BRANCH_PROGRAM: &str = r#"
budget = get_budget()
label = ""
if budget > 100.0 {
    label = "bob@example.com"
} else {
    label = "carol@example.com"
}
send_money(recipient=label, amount=5.0)
"#;

#[test]
fn normal_mode_misses_control_flow_leaks() {
    // In normal mode the assigned literal carries no link to the untrusted
    // condition, so the transfer goes through.
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::default(), StaticExtractor::new());
    interpreter
        .execute(BRANCH_PROGRAM)
        .expect("normal mode tracks data operands only");
}

#[test]
fn strict_mode_taints_branch_assignments() {
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::strict(), StaticExtractor::new());
    let err = interpreter.execute(BRANCH_PROGRAM).unwrap_err();
    assert!(matches!(err, CapscriptError::PolicyViolation { .. }));
}

#[test]
fn strict_mode_taints_loop_body_assignments() {
    let program = r#"
contacts = get_contacts()
chosen = "unset@example.com"
for c in contacts {
    chosen = "bob@example.com"
}
send_money(recipient=chosen, amount=5.0)
"#;
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::strict(), StaticExtractor::new());
    let err = interpreter.execute(program).unwrap_err();
    assert!(matches!(err, CapscriptError::PolicyViolation { .. }));
}

#[test]
fn strict_mode_leaves_unrelated_assignments_alone() {
    let program = r#"
limit = 10.0
if limit > 5.0 {
    amount = 7.0
}
send_money(recipient="bob@example.com", amount=amount)
"#;
    // The condition only references trusted literals, so assignments in the
    // branch stay trusted.
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::strict(), StaticExtractor::new());
    interpreter
        .execute(program)
        .expect("trusted condition does not poison the branch");
}

#[test]
fn taint_clears_after_leaving_the_branch() {
    let program = r#"
budget = get_budget()
if budget > 100.0 {
    ignored = 1
}
amount = 9.0
send_money(recipient="bob@example.com", amount=amount)
"#;
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::strict(), StaticExtractor::new());
    interpreter
        .execute(program)
        .expect("assignments after the branch are untainted");
}
