//! Core language semantics: expressions, statements, containers, records.

mod common;

use common::unguarded_interpreter;
use pretty_assertions::assert_eq;

use capscript::runtime::Value;

fn run(source: &str) -> Value {
    unguarded_interpreter()
        .execute(source)
        .expect("program should execute")
        .result
}

#[test]
fn arithmetic_and_variables() {
    assert_eq!(run("x = 10 + 5\ny = x - 3\ny"), Value::Int(12));
    assert_eq!(run("2 ** 10"), Value::Int(1024));
    assert_eq!(run("7 // 2"), Value::Int(3));
    assert_eq!(run("7 / 2"), Value::Float(3.5));
    assert_eq!(run("-7 % 3"), Value::Int(2));
    assert_eq!(run("1 + 2 * 3"), Value::Int(7));
    assert_eq!(run("(1 + 2) * 3"), Value::Int(9));
}

#[test]
fn augmented_assignment() {
    assert_eq!(run("x = 1\nx += 4\nx *= 2\nx"), Value::Int(10));
    assert_eq!(
        run("s = \"ab\"\ns += \"cd\"\ns"),
        Value::Str("abcd".to_string())
    );
}

#[test]
fn string_literals_and_methods() {
    assert_eq!(
        run("\"Hello World\".lower()"),
        Value::Str("hello world".to_string())
    );
    assert_eq!(
        run("\", \".join([\"a\", \"b\", \"c\"])"),
        Value::Str("a, b, c".to_string())
    );
    assert_eq!(
        run("\"a,b,c\".split(\",\")"),
        Value::List(vec![
            Value::Str("a".to_string()),
            Value::Str("b".to_string()),
            Value::Str("c".to_string()),
        ])
    );
    assert_eq!(run("\"hello\".startswith(\"he\")"), Value::Bool(true));
    assert_eq!(run("'single quotes'"), Value::Str("single quotes".to_string()));
}

#[test]
fn fstrings() {
    assert_eq!(
        run("name = \"world\"\nf\"hello {name}!\""),
        Value::Str("hello world!".to_string())
    );
    assert_eq!(
        run("x = 3.14159\nf\"pi is {x:.2f}\""),
        Value::Str("pi is 3.14".to_string())
    );
    assert_eq!(
        run("s = \"hi\"\nf\"{s!r}\""),
        Value::Str("'hi'".to_string())
    );
    assert_eq!(
        run("w = 6\nx = 42\nf\"[{x:{w}d}]\""),
        Value::Str("[    42]".to_string())
    );
    assert_eq!(run("f\"{{literal}}\""), Value::Str("{literal}".to_string()));
}

#[test]
fn containers_and_subscripts() {
    assert_eq!(
        run("xs = [1, 2, 3]\nxs[0] + xs[-1]"),
        Value::Int(4)
    );
    assert_eq!(
        run("d = {\"a\": 1, \"b\": 2}\nd[\"b\"]"),
        Value::Int(2)
    );
    assert_eq!(run("t = (1, 2)\nt[1]"), Value::Int(2));
    assert_eq!(run("s = {1, 2, 2, 3}\nlen(s)"), Value::Int(3));
    assert_eq!(run("\"hello\"[1]"), Value::Str("e".to_string()));
    assert_eq!(run("d = {\"k\": 1}\nd.get(\"missing\", 0)"), Value::Int(0));
}

#[test]
fn subscript_assignment_mutates_container() {
    assert_eq!(
        run("xs = [1, 2, 3]\nxs[1] = 20\nxs"),
        Value::List(vec![Value::Int(1), Value::Int(20), Value::Int(3)])
    );
    assert_eq!(
        run("d = {\"a\": 1}\nd[\"b\"] = 2\nd[\"b\"]"),
        Value::Int(2)
    );
}

#[test]
fn destructuring_assignment() {
    assert_eq!(run("a, b = [1, 2]\na + b"), Value::Int(3));
    assert_eq!(run("[x, y] = (10, 20)\nx - y"), Value::Int(-10));
}

#[test]
fn tuple_swap() {
    assert_eq!(run("a = 1\nb = 2\na, b = b, a\na * 10 + b"), Value::Int(21));
}

#[test]
fn conditionals() {
    assert_eq!(
        run("x = 5\nif x > 3 { y = \"big\" } else { y = \"small\" }\ny"),
        Value::Str("big".to_string())
    );
    assert_eq!(
        run("x = 2\nif x > 3 { y = 1 } elif x > 1 { y = 2 } else { y = 3 }\ny"),
        Value::Int(2)
    );
    assert_eq!(run("x = 1\n\"a\" if x else \"b\""), Value::Str("a".to_string()));
}

#[test]
fn boolean_short_circuit_skips_evaluation() {
    // `undefined` is never looked up because the left operand decides.
    assert_eq!(run("False and undefined"), Value::Bool(false));
    assert_eq!(run("True or undefined"), Value::Bool(true));
    // The deciding operand's value is returned.
    assert_eq!(run("0 or 42"), Value::Int(42));
    assert_eq!(run("1 and 2"), Value::Int(2));
    assert_eq!(run("not 0"), Value::Bool(true));
}

#[test]
fn chained_comparisons() {
    assert_eq!(run("1 < 2 < 3"), Value::Bool(true));
    assert_eq!(run("1 < 2 > 5"), Value::Bool(false));
    assert_eq!(run("2 in [1, 2, 3]"), Value::Bool(true));
    assert_eq!(run("4 not in [1, 2, 3]"), Value::Bool(true));
    assert_eq!(run("x = None\nx is None"), Value::Bool(true));
}

#[test]
fn for_loops() {
    assert_eq!(
        run("total = 0\nfor i in range(5) { total += i }\ntotal"),
        Value::Int(10)
    );
    assert_eq!(
        run("words = []\nfor w in [\"a\", \"b\"] { words = words + [w.upper()] }\nwords"),
        Value::List(vec![Value::Str("A".to_string()), Value::Str("B".to_string())])
    );
}

#[test]
fn comprehensions() {
    assert_eq!(
        run("[x * 2 for x in [1, 2, 3]]"),
        Value::List(vec![Value::Int(2), Value::Int(4), Value::Int(6)])
    );
    assert_eq!(
        run("[x for x in range(10) if x % 2 == 0 if x > 2]"),
        Value::List(vec![Value::Int(4), Value::Int(6), Value::Int(8)])
    );
    assert_eq!(
        run("{k: k * k for k in [1, 2]}"),
        run("{1: 1, 2: 4}")
    );
    assert_eq!(run("len({c for c in \"aabbcc\"})"), Value::Int(3));
}

#[test]
fn builtins() {
    assert_eq!(run("sum([1, 2, 3])"), Value::Int(6));
    assert_eq!(run("max([3, 1, 2])"), Value::Int(3));
    assert_eq!(run("min(5, 2, 8)"), Value::Int(2));
    assert_eq!(
        run("sorted([3, 1, 2])"),
        Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
    assert_eq!(run("len(\"hello\")"), Value::Int(5));
    assert_eq!(run("int(\"42\")"), Value::Int(42));
    assert_eq!(run("str(42)"), Value::Str("42".to_string()));
    assert_eq!(run("abs(-3)"), Value::Int(3));
    assert_eq!(
        run("list(zip([1, 2], [\"a\", \"b\"]))[1]"),
        Value::Tuple(vec![Value::Int(2), Value::Str("b".to_string())])
    );
    assert_eq!(
        run("enumerate([\"x\", \"y\"])[1]"),
        Value::Tuple(vec![Value::Int(1), Value::Str("y".to_string())])
    );
}

#[test]
fn records() {
    let source = r#"
record Invoice {
    vendor: str
    amount: float = 0.0
    tags: list[str] = []
}
inv = Invoice(vendor="acme", amount=12.5)
inv.amount
"#;
    assert_eq!(run(source), Value::Float(12.5));

    let defaulted = r#"
record Invoice {
    vendor: str
    amount: float = 0.0
}
Invoice(vendor="acme").amount
"#;
    assert_eq!(run(defaulted), Value::Float(0.0));

    let positional = r#"
record Point {
    x: int
    y: int
}
p = Point(3, 4)
p.x * 10 + p.y
"#;
    assert_eq!(run(positional), Value::Int(34));
}

#[test]
fn record_missing_required_field_fails() {
    let source = r#"
record Invoice {
    vendor: str
}
Invoice()
"#;
    let err = unguarded_interpreter().execute(source).unwrap_err();
    assert!(matches!(
        err,
        capscript::CapscriptError::ArityMismatch { .. }
    ));
}

#[test]
fn raise_of_error_value() {
    let err = unguarded_interpreter()
        .execute("e = error(\"nothing found\")\nraise e")
        .unwrap_err();
    match err {
        capscript::CapscriptError::Raised { message, trusted } => {
            assert_eq!(message, "nothing found");
            assert!(trusted);
        }
        other => panic!("expected Raised, got {:?}", other),
    }
}

#[test]
fn undefined_variable_and_unknown_function() {
    let err = unguarded_interpreter().execute("missing + 1").unwrap_err();
    assert!(matches!(
        err,
        capscript::CapscriptError::UndefinedVariable { .. }
    ));

    let err = unguarded_interpreter().execute("mystery()").unwrap_err();
    assert!(matches!(
        err,
        capscript::CapscriptError::UnknownFunction { .. }
    ));
}

#[test]
fn method_allowlist_is_enforced_at_runtime() {
    let err = unguarded_interpreter()
        .execute("\"abc\".encode()")
        .unwrap_err();
    assert!(matches!(
        err,
        capscript::CapscriptError::MethodNotAllowed { .. }
    ));
}

#[test]
fn empty_program_returns_none() {
    assert_eq!(run(""), Value::None);
    assert_eq!(run("# just a comment\n"), Value::None);
}

#[test]
fn semicolons_and_comments() {
    assert_eq!(run("x = 1; y = 2  # sum them\nx + y"), Value::Int(3));
}
