// Property tests for the inference laws, fuel accounting, and monadic error
// identity.

mod common;

use proptest::prelude::*;
use serde_json::{json, Value};
use tjs::compiler::infer::{check_type, infer_type};
use tjs::compiler::transpile;
use tjs::vm::{AgentVM, RunOptions};
use tjs::{is_error, monadic_error};

/// Example-like values: scalars, homogeneous arrays, and objects of those.
/// (Example arrays are homogeneous by construction; the inferencer types an
/// array from its first element.)
fn arb_example() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(|b| json!(b)),
        any::<i32>().prop_map(|n| json!(n)),
        (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
        "[a-z]{0,8}".prop_map(|s| json!(s)),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            // Arrays repeat one element so the item type is uniform.
            (inner.clone(), 0usize..4).prop_map(|(v, n)| Value::Array(vec![v; n])),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k, v)).collect())),
        ]
    })
}

proptest! {
    /// ∀ example value v: check_type(v, infer_type(v)).
    #[test]
    fn inferred_types_accept_their_examples(v in arb_example()) {
        let t = infer_type(&v);
        prop_assert!(check_type(&v, &t), "value {} rejected by its own type", v);
    }

    /// Type kinds line up with the runtime kind names.
    #[test]
    fn inferred_kind_matches_value_kind(v in arb_example()) {
        let t = infer_type(&v);
        let kind = serde_json::to_value(&t.kind).unwrap();
        let kind = kind.as_str().unwrap().to_string();
        let expected = match tjs::type_of(&v) {
            "number" => vec!["number", "integer"],
            other => vec![other],
        };
        prop_assert!(expected.contains(&kind.as_str()), "kind {} for {}", kind, v);
    }

    /// Runs never consume more fuel than the budget.
    #[test]
    fn fuel_consumption_is_bounded(budget in 1.0f64..50.0, n in 0i64..100) {
        let compiled = transpile(
            "function spin(n: 5) { let i = 0; while (i < n) { i++ } return i }",
        ).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let vm = AgentVM::new();
        let opts = RunOptions { fuel: Some(budget), timeout_ms: Some(10_000), ..Default::default() };
        let result = runtime.block_on(vm.run(compiled.ast, json!({"n": n}), opts));
        prop_assert!(result.fuel_used <= budget + 1e-9,
            "used {} of {}", result.fuel_used, budget);
        // Either it finished or it failed monadically; no other outcomes.
        if result.error.is_none() {
            prop_assert!(result.result.is_number());
        } else {
            prop_assert!(is_error(result.error.as_ref().unwrap()));
        }
    }

    /// Monadic left identity: a wrapped call on an error input returns that
    /// error unchanged, and the body never runs.
    #[test]
    fn error_inputs_pass_through_unchanged(message in "[a-z]{1,12}") {
        let compiled = transpile(
            "function double(x: 5) -> 10 { return x * 2 }",
        ).unwrap();
        let err = monadic_error(message.clone(), Some("upstream"));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let vm = AgentVM::new();
        let result = runtime.block_on(vm.run(
            compiled.ast,
            json!({ "x": err.clone() }),
            RunOptions::default(),
        ));
        prop_assert_eq!(result.error.as_ref(), Some(&err));
    }
}

#[test]
fn empty_arrays_infer_any_items() {
    let t = infer_type(&json!([]));
    for v in [json!([1, 2]), json!(["a"]), json!([{"k": true}]), json!([])] {
        assert!(check_type(&v, &t));
    }
}
