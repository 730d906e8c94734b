//! Property tests over generated unions.
//!
//! 1. A switch with one case per variant and `assert_never` in the default
//!    type-checks; dropping any one case makes it fail, naming that variant.
//! 2. The same holds for a declared non-Unit result with no default.
//! 3. With a Unit result, dropping cases is never noticed.
//! 4. Case order does not matter.

use proptest::prelude::*;

use narrow_parse::parse_str;
use narrow_types::{TypeChecker, TypeError};

fn check(src: &str) -> Result<(), TypeError> {
    let module = parse_str("<prop>", src).expect("parse failed");
    TypeChecker::new().check_module(&module)
}

fn union_decl(n: usize) -> String {
    let variants: Vec<String> = (0..n).map(|i| format!("v{i} {{ x{i}: Int }}")).collect();
    format!("union U {{ {} }}", variants.join(", "))
}

/// Cases for the variants at `order`, each returning its field.
fn cases(order: &[usize]) -> String {
    order
        .iter()
        .map(|i| format!("case v{i} {{ return u.x{i}; }}\n"))
        .collect()
}

fn arb_order() -> impl Strategy<Value = Vec<usize>> {
    (1usize..8).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
}

proptest! {
    #[test]
    fn assert_never_tracks_every_variant(order in arb_order(), pick in any::<prop::sample::Index>()) {
        let n = order.len();
        let full = format!(
            "{}\nfn f(u: U) -> Int {{ switch u {{ {} default {{ assert_never(u); }} }} }}",
            union_decl(n),
            cases(&order)
        );
        prop_assert!(check(&full).is_ok());

        let removed = pick.index(n);
        let mut partial_order = order.clone();
        let tag = partial_order.remove(removed);
        let partial = format!(
            "{}\nfn f(u: U) -> Int {{ switch u {{ {} default {{ assert_never(u); }} }} }}",
            union_decl(n),
            cases(&partial_order)
        );
        match check(&partial) {
            Err(TypeError::NonExhaustive { missing, .. }) => {
                prop_assert_eq!(missing, vec![format!("U::v{tag}")]);
            }
            other => prop_assert!(false, "expected NonExhaustive, got {:?}", other),
        }
    }

    #[test]
    fn declared_result_tracks_every_variant(order in arb_order(), pick in any::<prop::sample::Index>()) {
        let n = order.len();
        let full = format!("{}\nfn f(u: U) -> Int {{ switch u {{ {} }} }}", union_decl(n), cases(&order));
        prop_assert!(check(&full).is_ok());

        let mut partial_order = order.clone();
        let tag = partial_order.remove(pick.index(n));
        let partial = format!(
            "{}\nfn f(u: U) -> Int {{ switch u {{ {} }} }}",
            union_decl(n),
            cases(&partial_order)
        );
        match check(&partial) {
            Err(TypeError::MissingReturn { uncovered, .. }) => {
                prop_assert_eq!(uncovered, Some(format!("U::v{tag}")));
            }
            other => prop_assert!(false, "expected MissingReturn, got {:?}", other),
        }
    }

    #[test]
    fn unit_result_never_notices(n in 1usize..8, keep in prop::collection::vec(any::<bool>(), 8)) {
        let order: Vec<usize> = (0..n).filter(|&i| keep[i]).collect();
        let body: String = order
            .iter()
            .map(|i| format!("case v{i} {{ print(u.x{i}); }}\n"))
            .collect();
        let src = format!("{}\nfn f(u: U) {{ switch u {{ {} }} }}", union_decl(n), body);
        prop_assert!(check(&src).is_ok());
    }

    #[test]
    fn duplicated_case_is_redundant(order in arb_order(), dup in any::<prop::sample::Index>()) {
        let n = order.len();
        let mut with_dup = order.clone();
        with_dup.push(order[dup.index(n)]);
        let src = format!("{}\nfn f(u: U) -> Int {{ switch u {{ {} }} }}", union_decl(n), cases(&with_dup));
        let is_redundant = matches!(check(&src), Err(TypeError::RedundantCase { .. }));
        prop_assert!(is_redundant);
    }
}
