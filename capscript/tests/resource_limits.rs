//! Iteration and allocation bounds.

mod common;

use std::sync::atomic::Ordering;

use common::guarded_interpreter_with;

use capscript::runtime::{StaticExtractor, Value};
use capscript::{CapscriptError, InterpreterConfig};

fn small_config() -> InterpreterConfig {
    InterpreterConfig {
        max_iterations: 5,
        ..InterpreterConfig::default()
    }
}

#[test]
fn loops_within_the_bound_complete() {
    let (interpreter, _) = guarded_interpreter_with(small_config(), StaticExtractor::new());
    let outcome = interpreter
        .execute("total = 0\nfor i in [1, 2, 3, 4, 5] { total += i }\ntotal")
        .expect("five iterations fit a bound of five");
    assert_eq!(outcome.result, Value::Int(15));
}

#[test]
fn loop_over_longer_iterable_hits_the_bound() {
    let (interpreter, side_effects) =
        guarded_interpreter_with(small_config(), StaticExtractor::new());
    let err = interpreter
        .execute("total = 0\nfor i in [1, 2, 3, 4, 5, 6] { total += i }\nlog_action()")
        .unwrap_err();
    match err {
        CapscriptError::ResourceLimit { what, limit } => {
            assert_eq!(limit, 5);
            assert!(what.contains("iterations"));
        }
        other => panic!("expected ResourceLimit, got {:?}", other),
    }
    assert_eq!(side_effects.load(Ordering::SeqCst), 0);
}

#[test]
fn comprehensions_share_the_iteration_budget() {
    let (interpreter, _) = guarded_interpreter_with(small_config(), StaticExtractor::new());
    let err = interpreter
        .execute("[x * x for x in [1, 2, 3, 4, 5, 6]]")
        .unwrap_err();
    assert!(matches!(err, CapscriptError::ResourceLimit { .. }));
}

#[test]
fn nested_loops_count_against_one_budget() {
    let (interpreter, _) = guarded_interpreter_with(small_config(), StaticExtractor::new());
    let err = interpreter
        .execute("for a in [1, 2, 3] { for b in [1, 2, 3] { pass } }")
        .unwrap_err();
    assert!(matches!(err, CapscriptError::ResourceLimit { .. }));
}

#[test]
fn range_materialization_is_bounded() {
    let config = InterpreterConfig {
        max_collection_size: 100,
        ..InterpreterConfig::default()
    };
    let (interpreter, _) = guarded_interpreter_with(config, StaticExtractor::new());
    let err = interpreter.execute("range(1000)").unwrap_err();
    assert!(matches!(err, CapscriptError::ResourceLimit { .. }));
}
