//! End-to-end scenarios: check a program, run it, inspect what it printed.

use narrow_cli::eval::{run_checked, EvalError, Output, RunConfig, RunOutcome, Value};
use narrow_cli::trace::{TraceRecord, TraceValue};
use narrow_types::flatten::{flatten, render};

/// Check and run; returns the outcome and the captured `print` lines.
fn run(src: &str) -> (RunOutcome, Vec<String>) {
    let checked = narrow_cli::check_source("<test>", src).expect("check failed");
    let output = Output::captured();
    let outcome = run_checked(
        &checked,
        RunConfig {
            output: output.clone(),
            ..RunConfig::default()
        },
    )
    .expect("run failed");
    (outcome, output.lines())
}

fn run_err(src: &str) -> EvalError {
    let checked = narrow_cli::check_source("<test>", src).expect("check failed");
    let err = run_checked(
        &checked,
        RunConfig {
            output: Output::captured(),
            ..RunConfig::default()
        },
    )
    .expect_err("expected a runtime error");
    err.downcast::<EvalError>().expect("not an EvalError")
}

fn main_int(outcome: &RunOutcome) -> i64 {
    match outcome.main {
        Some(Value::Int(n)) => n,
        ref other => panic!("expected main() to return Int, got {:?}", other),
    }
}

const CALC: &str = r#"
union Calc {
    add { a: Int, b: Int },
    multiply { a: Int, b: Int },
    divide { a: Int, b: Int },
}

fn eval(op: Calc) -> Int {
    switch op {
        case add { return op.a + op.b; }
        case multiply { return op.a * op.b; }
        case divide { return op.a / op.b; }
        default { assert_never(op); }
    }
}
"#;

// ============================================================================
// Calculator
// ============================================================================

#[test]
fn calculator_results() {
    for (tag, a, b, want) in [
        ("add", 2, 3, 5),
        ("multiply", 2, 3, 6),
        ("divide", 6, 3, 2),
    ] {
        let src = format!(
            "{CALC}\nfn main() -> Int {{ return eval(Calc::{tag} {{ a: {a}, b: {b} }}); }}"
        );
        let (outcome, _) = run(&src);
        assert_eq!(main_int(&outcome), want, "{tag}({a}, {b})");
    }
}

#[test]
fn forged_discriminant_is_unreachable() {
    let err = run_err(&format!(
        "{CALC}\nfn main() -> Int {{ return eval(\"subtract\" as! Calc); }}"
    ));
    match err {
        EvalError::Unreachable { value, .. } => assert_eq!(value, "\"subtract\""),
        other => panic!("expected Unreachable, got {other}"),
    }
}

#[test]
fn forged_variant_of_another_union_is_unreachable() {
    let err = run_err(&format!(
        "{CALC}
        union Other {{ subtract {{ a: Int, b: Int }} }}
        fn main() -> Int {{ return eval(Other::subtract {{ a: 1, b: 2 }} as! Calc); }}"
    ));
    assert!(matches!(err, EvalError::Unreachable { ref value, .. } if value.starts_with("Other::subtract")));
}

#[test]
fn forged_variant_sharing_a_tag_is_unreachable() {
    let err = run_err(&format!(
        "{CALC}
        union Other {{ add {{ a: Int, b: Int }} }}
        fn main() -> Int {{ return eval(Other::add {{ a: 1, b: 2 }} as! Calc); }}"
    ));
    assert!(matches!(err, EvalError::Unreachable { ref value, .. } if value.starts_with("Other::add")));
}

#[test]
fn tag_tests_compare_the_union_too() {
    let (outcome, lines) = run(
        r#"
        union Light { red, green }
        union Paint { red, blue }
        fn is_red(l: Light) -> Bool {
            if l is red { return true; }
            return false;
        }
        fn pair(l: Light, p: Paint) -> Int {
            switch (l, p) {
                case (red, _) { return 1; }
                case (green, _) { return 2; }
                default { print("fallback"); return 0; }
            }
        }
        fn main() -> Int {
            let forged = Paint::red as! Light;
            print(is_red(forged));
            print(is_red(Light::red));
            return pair(forged, Paint::blue);
        }
    "#,
    );
    assert_eq!(main_int(&outcome), 0);
    assert_eq!(lines, ["false", "true", "fallback"]);
}

#[test]
fn visitor_rejects_a_variant_of_another_union() {
    let err = run_err(
        r#"
        union Light { red, green }
        union Paint { red, blue }
        visitor Name for Light -> String {
            red(x) { return "red"; }
            green(x) { return "green"; }
        }
        fn main() -> String { return (Paint::red as! Light).accept(Name); }
    "#,
    );
    assert!(matches!(err, EvalError::Unreachable { ref value, .. } if value == "Paint::red"));
}

#[test]
fn forged_value_without_default_misses_the_return() {
    let err = run_err(
        r#"
        union U { a, b }
        fn pick(u: U) -> Int {
            switch u {
                case a { return 1; }
                case b { return 2; }
            }
        }
        fn main() -> Int { return pick(7 as! U); }
    "#,
    );
    assert!(matches!(err, EvalError::MissingReturn { ref func, .. } if func == "pick"));
}

// ============================================================================
// Dispatch
// ============================================================================

const SHAPE: &str = r#"
union Shape { circle { r: Int }, square { side: Int }, rect { w: Int, h: Int } }
"#;

#[test]
fn switch_runs_exactly_the_matching_case() {
    let (_, lines) = run(&format!(
        "{SHAPE}
        fn describe(s: Shape) {{
            switch s {{
                case circle {{ print(\"circle\"); print(s.r); }}
                case square {{ print(\"square\"); print(s.side); }}
                case rect {{ print(\"rect\"); print(s.w * s.h); }}
            }}
        }}
        fn main() {{
            describe(Shape::square {{ side: 4 }});
            describe(Shape::rect {{ w: 2, h: 5 }});
        }}"
    ));
    assert_eq!(lines, ["square", "4", "rect", "10"]);
}

#[test]
fn visitor_dispatch_reads_narrowed_fields() {
    let (outcome, _) = run(&format!(
        "{SHAPE}
        visitor Area for Shape -> Int {{
            circle(c) {{ return 3 * c.r * c.r; }}
            square(s) {{ return s.side * s.side; }}
            rect(r) {{ return r.w * r.h; }}
        }}
        fn main() -> Int {{
            return Shape::circle {{ r: 2 }}.accept(Area)
                + Shape::square {{ side: 3 }}.accept(Area) * 100
                + Shape::rect {{ w: 1, h: 7 }}.accept(Area) * 10000;
        }}"
    ));
    assert_eq!(main_int(&outcome), 12 + 900 + 70000);
}

#[test]
fn if_is_narrows_for_the_rest_of_the_body() {
    let (outcome, _) = run(&format!(
        "{SHAPE}
        fn size(s: Shape) -> Int {{
            if s is circle {{ return s.r; }}
            if s is square {{ return s.side; }}
            return s.w + s.h;
        }}
        fn main() -> Int {{ return size(Shape::rect {{ w: 3, h: 4 }}); }}"
    ));
    assert_eq!(main_int(&outcome), 7);
}

// ============================================================================
// Several discriminants
// ============================================================================

const NOTIFY: &str = r#"
union Channel { email { to: String }, sms { number: String } }
union Format { html, plain }
"#;

#[test]
fn tuple_switch_hits_one_leaf_per_input() {
    let (_, lines) = run(&format!(
        "{NOTIFY}
        fn send(c: Channel, f: Format) -> Int {{
            switch (c, f) {{
                case (email, html) {{ print(\"email/html \" + c.to); return 1; }}
                case (email, plain) {{ print(\"email/plain \" + c.to); return 2; }}
                case (sms, _) {{ print(\"sms \" + c.number); return 3; }}
            }}
        }}
        fn main() {{
            send(Channel::email {{ to: \"a@x\" }}, Format::html);
            send(Channel::email {{ to: \"b@x\" }}, Format::plain);
            send(Channel::sms {{ number: \"555\" }}, Format::html);
            send(Channel::sms {{ number: \"556\" }}, Format::plain);
        }}"
    ));
    assert_eq!(
        lines,
        ["email/html a@x", "email/plain b@x", "sms 555", "sms 556"]
    );
}

const NOTIFICATION: &str = r#"
union Format { html, plain }
union Notification { email { format: Format, to: String }, sms { number: String } }
"#;

#[test]
fn flattened_union_never_reaches_the_catch_all() {
    let checked = narrow_cli::check_source("<decls>", NOTIFICATION).expect("check failed");
    let flat = flatten(checked.checker.registry(), &["Notification"], "Delivery")
        .expect("flatten failed");
    assert_eq!(flat.tags().collect::<Vec<_>>(), ["email_html", "email_plain", "sms"]);

    let (outcome, lines) = run(&format!(
        "{}
        fn send(d: Delivery) -> Int {{
            switch d {{
                case email_html {{ print(\"<p>\" + d.to + \"</p>\"); return 1; }}
                case email_plain {{ print(d.to); return 2; }}
                case sms {{ print(\"sms \" + d.number); return 3; }}
                default {{ print(\"catch-all\"); assert_never(d); }}
            }}
        }}
        fn main() -> Int {{
            return send(Delivery::email_html {{ to: \"a@x\" }}) * 100
                + send(Delivery::email_plain {{ to: \"b@x\" }}) * 10
                + send(Delivery::sms {{ number: \"555\" }});
        }}",
        render(&flat)
    ));
    // One leaf per input, in order, and the default never ran
    assert_eq!(main_int(&outcome), 123);
    assert_eq!(lines, ["<p>a@x</p>", "b@x", "sms 555"]);
}

#[test]
fn independent_unions_flatten_to_their_product() {
    let checked = narrow_cli::check_source("<decls>", NOTIFY).expect("check failed");
    let flat = flatten(checked.checker.registry(), &["Channel", "Format"], "Delivery")
        .expect("flatten failed");

    let (_, lines) = run(&format!(
        "{}
        fn send(d: Delivery) {{
            switch d {{
                case email_html {{ print(\"<p>\" + d.to + \"</p>\"); }}
                case email_plain {{ print(d.to); }}
                case sms_html {{ print(\"sms \" + d.number); }}
                case sms_plain {{ print(\"sms \" + d.number); }}
                default {{ assert_never(d); }}
            }}
        }}
        fn main() {{
            send(Delivery::email_html {{ to: \"a@x\" }});
            send(Delivery::sms_plain {{ number: \"555\" }});
        }}",
        render(&flat)
    ));
    assert_eq!(lines, ["<p>a@x</p>", "sms 555"]);
}

// ============================================================================
// Deferred effects
// ============================================================================

#[test]
fn effect_runs_only_when_invoked() {
    let (outcome, lines) = run(&format!(
        "{CALC}
        fn log(op: Calc) -> fn() -> Unit {{
            switch op {{
                case add {{ return fn() {{ print(op.a + op.b); }}; }}
                case multiply {{ return fn() {{ print(op.a * op.b); }}; }}
                case divide {{ return fn() {{ print(op.a / op.b); }}; }}
            }}
        }}
        fn main() {{
            let e = log(Calc::multiply {{ a: 6, b: 7 }});
            print(\"before\");
            e();
        }}"
    ));
    assert!(matches!(outcome.main, Some(Value::Unit)));
    assert_eq!(lines, ["before", "42"]);
}

#[test]
fn runner_invokes_the_effect_from_main() {
    let checked = narrow_cli::check_source(
        "<test>",
        r#"
        fn main() -> fn() -> Unit {
            let greeting = "hello";
            return fn() { print(greeting); };
        }
    "#,
    )
    .expect("check failed");
    let output = Output::captured();
    let outcome = run_checked(
        &checked,
        RunConfig {
            output: output.clone(),
            invoke: 2,
            ..RunConfig::default()
        },
    )
    .expect("run failed");
    assert_eq!(outcome.effects_invoked, 2);
    assert_eq!(output.lines(), ["hello", "hello"]);
}

#[test]
fn trace_records_prints_and_invocations() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("trace.jsonl");
    let checked = narrow_cli::check_source(
        "<test>",
        r#"
        fn main() -> fn() -> Unit {
            print("setup");
            return fn() { print(1); };
        }
    "#,
    )
    .expect("check failed");
    let file = std::fs::File::create(&path).expect("create trace");
    run_checked(
        &checked,
        RunConfig {
            output: Output::captured(),
            trace: Some(Box::new(file)),
            program: "effects.nw".to_string(),
            invoke: 1,
        },
    )
    .expect("run failed");

    let content = std::fs::read_to_string(&path).expect("read trace");
    let records: Vec<TraceRecord> = content
        .lines()
        .map(|l| serde_json::from_str(l).expect("bad record"))
        .collect();
    assert!(matches!(records.first(), Some(TraceRecord::Header(h)) if h.program == "effects.nw"));
    let ops: Vec<(&str, &str)> = records
        .iter()
        .filter_map(|r| match r {
            TraceRecord::Effect(e) => Some((e.effect.as_str(), e.operation.as_str())),
            _ => None,
        })
        .collect();
    // The print inside the effect happens before its invocation is recorded
    assert_eq!(
        ops,
        [("io", "print"), ("io", "print"), ("deferred", "invoke")]
    );
    match records.last() {
        Some(TraceRecord::Footer(f)) => {
            assert_eq!(f.effect_count, 3);
            assert_eq!(f.program_status, "success");
        }
        other => panic!("expected footer, got {:?}", other),
    }
    let first_print = records.iter().find_map(|r| match r {
        TraceRecord::Effect(e) => e.inputs.get("value"),
        _ => None,
    });
    assert_eq!(first_print, Some(&TraceValue::Str("setup".to_string())));
}
