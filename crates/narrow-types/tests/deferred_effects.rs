//! Integration tests for the Unit-result gap and the deferred-effect fix.
//!
//! A switch that only performs side effects has nothing to prove: falling
//! off the end yields Unit, which the Unit result accepts. Returning the
//! effect as a zero-argument function instead gives the body a result
//! (`fn() -> Unit`) that Unit cannot satisfy.

use narrow_parse::parse_str;
use narrow_types::{LintKind, Ty, TypeChecker, TypeError};

fn check(src: &str) -> Result<TypeChecker, TypeError> {
    let module = parse_str("<test>", src).expect("parse failed");
    let mut checker = TypeChecker::new();
    checker.check_module(&module)?;
    Ok(checker)
}

const CALC: &str = r#"
union Calc {
    add { a: Int, b: Int },
    multiply { a: Int, b: Int },
    divide { a: Int, b: Int },
}
"#;

/// Three cases, dropping any whose tag is in `skip`.
fn cases(skip: &[&str], body: impl Fn(&str, &str) -> String) -> String {
    [("add", "+"), ("multiply", "*"), ("divide", "/")]
        .iter()
        .filter(|(tag, _)| !skip.contains(tag))
        .map(|&(tag, op)| format!("case {tag} {{ {} }}\n", body(tag, op)))
        .collect()
}

fn immediate(skip: &[&str]) -> String {
    format!(
        "{CALC}\nfn log(op: Calc) {{ switch op {{ {} }} }}",
        cases(skip, |_, op| format!("print(op.a {op} op.b);"))
    )
}

fn deferred(skip: &[&str]) -> String {
    format!(
        "{CALC}\nfn log(op: Calc) -> fn() -> Unit {{ switch op {{ {} }} }}",
        cases(skip, |_, op| format!("return fn() {{ print(op.a {op} op.b); }};"))
    )
}

#[test]
fn immediate_effects_hide_a_missing_case() {
    for tag in ["add", "multiply", "divide"] {
        assert!(
            check(&immediate(&[tag])).is_ok(),
            "dropping `{tag}` should go unnoticed with a Unit result"
        );
    }
}

#[test]
fn deferred_effects_catch_each_missing_case() {
    assert!(check(&deferred(&[])).is_ok());
    for tag in ["add", "multiply", "divide"] {
        let err = check(&deferred(&[tag])).expect_err("missing case accepted");
        match err {
            TypeError::MissingReturn {
                expected,
                uncovered,
                ..
            } => {
                assert_eq!(expected, Ty::thunk(Ty::unit()));
                assert_eq!(uncovered, Some(format!("Calc::{tag}")));
            }
            other => panic!("expected MissingReturn, got {other}"),
        }
    }
}

#[test]
fn deferred_effect_may_not_return_unit_directly() {
    let err = check(&format!(
        "{CALC}
        fn log(op: Calc) -> fn() -> Unit {{
            switch op {{
                case add {{ return (); }}
                default {{ return fn() {{ }}; }}
            }}
        }}"
    ))
    .expect_err("Unit accepted as an effect");
    assert!(matches!(err, TypeError::Mismatch { .. }));
}

#[test]
fn invoking_the_effect_produces_unit() {
    let checker = check(&format!(
        "{}\nlet run = log(Calc::divide {{ a: 6, b: 3 }})();",
        deferred(&[])
    ))
    .expect("type check failed");
    assert_eq!(checker.global_ty("run"), Some(&Ty::unit()));
    assert!(checker.lints().is_empty());
}

#[test]
fn effect_stored_in_a_let_is_not_linted() {
    let checker = check(&format!(
        "{}\nfn main() {{ let e = log(Calc::add {{ a: 1, b: 2 }}); e(); }}",
        deferred(&[])
    ))
    .expect("type check failed");
    assert!(checker.lints().is_empty());
}

#[test]
fn discarded_effect_is_linted_with_its_type() {
    let checker = check(&format!(
        "{}\nfn main() {{ log(Calc::add {{ a: 1, b: 2 }}); }}",
        deferred(&[])
    ))
    .expect("type check failed");
    let [lint] = checker.lints() else {
        panic!("expected one lint, got {:?}", checker.lints());
    };
    assert_eq!(lint.kind, LintKind::UnusedEffect);
    assert!(lint.message.contains("fn() -> Unit"), "{}", lint.message);
}

#[test]
fn closure_captures_narrowed_binding() {
    // `s.r` inside the closure only type-checks where `s` is narrowed
    let err = check(
        r#"
        union Shape { circle { r: Int }, square { side: Int } }
        fn later(s: Shape) -> fn() -> Int {
            return fn() -> Int { return s.r; };
        }
    "#,
    )
    .expect_err("field of one variant read from the full union");
    assert!(matches!(err, TypeError::UnknownField { .. }));

    assert!(check(
        r#"
        union Shape { circle { r: Int }, square { side: Int } }
        fn later(s: Shape) -> fn() -> Int {
            switch s {
                case circle { return fn() -> Int { return s.r; }; }
                case square { return fn() -> Int { return s.side; }; }
            }
        }
    "#,
    )
    .is_ok());
}
