//! The quarantined-extraction gate: structured data out of untrusted text,
//! tainted by the query's whole dependency closure.

mod common;

use common::guarded_interpreter_with;

use capscript::runtime::StaticExtractor;
use capscript::{CapscriptError, InterpreterConfig};
use capscript::runtime::Value;

fn invoice_extractor() -> StaticExtractor {
    StaticExtractor::new().with_response(
        "Invoice",
        serde_json::json!({"vendor": "attacker-corp", "amount": 125.5}),
    )
}

const EXTRACT_PROGRAM: &str = r#"
record Invoice {
    vendor: str
    amount: float
}
body = get_inbox_body()
inv = extract_data(f"extract the invoice from: {body}", Invoice)
"#;

#[test]
fn extraction_returns_schema_shaped_data() {
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::default(), invoice_extractor());
    let outcome = interpreter
        .execute(&format!("{}\ninv.vendor", EXTRACT_PROGRAM))
        .expect("extraction should succeed");
    assert_eq!(outcome.result, Value::Str("attacker-corp".to_string()));
}

#[test]
fn extracted_values_can_never_authorize_a_transfer() {
    let program = format!(
        "{}\nsend_money(recipient=inv.vendor, amount=inv.amount)",
        EXTRACT_PROGRAM
    );
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::default(), invoice_extractor());
    let err = interpreter.execute(&program).unwrap_err();
    assert!(matches!(err, CapscriptError::PolicyViolation { .. }));
}

#[test]
fn extraction_is_untrusted_even_for_literal_queries() {
    // The gate's own source tag is never `User`, no matter what fed the
    // query.
    let program = r#"
record Invoice {
    vendor: str
    amount: float
}
inv = extract_data("pay the invoice in my notes", Invoice)
send_money(recipient=inv.vendor, amount=inv.amount)
"#;
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::default(), invoice_extractor());
    let err = interpreter.execute(program).unwrap_err();
    assert!(matches!(err, CapscriptError::PolicyViolation { .. }));
}

#[test]
fn missing_information_propagates_as_untrusted() {
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::default(), StaticExtractor::new());
    let err = interpreter.execute(EXTRACT_PROGRAM).unwrap_err();
    match &err {
        CapscriptError::InsufficientInformation { message } => {
            assert!(message.contains("Invoice"));
        }
        other => panic!("expected InsufficientInformation, got {:?}", other),
    }
    assert!(!err.is_trusted_message());
}

#[test]
fn schema_mismatch_counts_as_missing_information() {
    let extractor = StaticExtractor::new().with_response(
        "Invoice",
        serde_json::json!({"vendor": 42, "amount": "not a number"}),
    );
    let (interpreter, _) = guarded_interpreter_with(InterpreterConfig::default(), extractor);
    let err = interpreter.execute(EXTRACT_PROGRAM).unwrap_err();
    assert!(matches!(
        err,
        CapscriptError::InsufficientInformation { .. }
    ));
}

#[test]
fn extract_requires_a_declared_schema() {
    let (interpreter, _) =
        guarded_interpreter_with(InterpreterConfig::default(), invoice_extractor());
    let err = interpreter
        .execute("extract_data(\"text\", 42)")
        .unwrap_err();
    assert!(matches!(err, CapscriptError::TypeMismatch { .. }));
}
