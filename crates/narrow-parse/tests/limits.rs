//! Parser nesting limit.

use narrow_parse::{parse_str, MAX_NESTING_DEPTH};

#[test]
fn moderate_nesting_works() {
    let mut src = String::from("let x = ");
    for _ in 0..50 {
        src.push('(');
    }
    src.push('1');
    for _ in 0..50 {
        src.push(')');
    }
    src.push(';');
    assert!(parse_str("<test>", &src).is_ok(), "50 nested parens should work");
}

#[test]
fn nested_blocks_in_statements() {
    let mut src = String::from("fn f() -> Int ");
    for _ in 0..20 {
        src.push_str("{ if true ");
    }
    src.push_str("{ return 1; }");
    for _ in 0..20 {
        src.push_str(" }");
    }
    assert!(parse_str("<test>", &src).is_ok());
}

#[test]
fn excessive_nesting_is_rejected() {
    // Run on a thread with a generous stack so the limit, not the stack, trips.
    let handle = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let depth = MAX_NESTING_DEPTH + 10;
            let src = format!("let x = {}1;", "!".repeat(depth));
            parse_str("<test>", &src).unwrap_err().to_string()
        })
        .expect("spawn");
    let err = handle.join().expect("join");
    assert!(err.contains("nesting depth limit exceeded"), "{err}");
}

fn parse_on_big_stack(src: String) -> Result<(), String> {
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(move || parse_str("<test>", &src).map(|_| ()).map_err(|e| e.to_string()))
        .expect("spawn")
        .join()
        .expect("join")
}

#[test]
fn short_operator_chain_parses() {
    let src = format!("let x = 1{};", " + 1".repeat(100));
    assert!(parse_str("<test>", &src).is_ok());
}

#[test]
fn long_operator_chain_is_rejected() {
    let src = format!("fn f() -> Int {{ return 1{}; }}", " + 1".repeat(200_000));
    let err = parse_on_big_stack(src).unwrap_err();
    assert!(err.contains("nesting depth limit exceeded"), "{err}");
}

#[test]
fn long_postfix_chains_are_rejected() {
    let calls = format!("let x = f{};", "()".repeat(MAX_NESTING_DEPTH + 10));
    let err = parse_on_big_stack(calls).unwrap_err();
    assert!(err.contains("nesting depth limit exceeded"), "{err}");

    let fields = format!("let x = y{};", ".a".repeat(MAX_NESTING_DEPTH + 10));
    let err = parse_on_big_stack(fields).unwrap_err();
    assert!(err.contains("nesting depth limit exceeded"), "{err}");
}

#[test]
fn long_else_if_chain_is_rejected() {
    let src = format!(
        "fn f() {{ if true {{ }}{} }}",
        " else if true { }".repeat(MAX_NESTING_DEPTH + 10)
    );
    let err = parse_on_big_stack(src).unwrap_err();
    assert!(err.contains("nesting depth limit exceeded"), "{err}");
}
