// Fuel exhaustion, wall-clock timeout, and their boundaries.

mod common;

use async_trait::async_trait;
use common::{ast_of, error_message};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tjs::vm::atoms::Atom;
use tjs::vm::context::{CancelSignal, RuntimeContext};
use tjs::vm::fuel::CostOverride;
use tjs::vm::node::Node;
use tjs::vm::{AgentVM, RunOptions};

#[tokio::test]
async fn compute_loop_exhausts_fuel() {
    common::tracing::init_tracing_from_env();
    let ast = ast_of("function spin(n: 1000000) { let i = 0; while (i < n) { i++ } return i }");
    let vm = AgentVM::new();
    let opts = RunOptions {
        fuel: Some(1000.0),
        // Generous wall clock so fuel is what stops the loop.
        timeout_ms: Some(60_000),
        ..Default::default()
    };
    let result = vm.run(ast, json!({"n": 1_000_000}), opts).await;
    assert!(error_message(&result).contains("Fuel"));
    assert_eq!(result.fuel_used, 1000.0);
}

/// Sleeps 20ms per call; IO-bound enough that the timeout fires first.
struct Delay;

#[async_trait]
impl Atom for Delay {
    fn op(&self) -> &str {
        "delay"
    }

    async fn exec(&self, _node: &Node, _ctx: &mut RuntimeContext) -> Result<(), Value> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(())
    }
}

#[tokio::test]
async fn io_wait_hits_the_timeout() {
    common::tracing::init_tracing_from_env();
    let vm = AgentVM::with_atoms(vec![Arc::new(Delay)]);
    let children: Vec<Value> = (0..100).map(|_| json!({"op": "delay"})).collect();
    let ast = json!({"op": "seq", "children": children});
    let opts = RunOptions {
        fuel: Some(100_000.0),
        timeout_ms: Some(50),
        ..Default::default()
    };
    let started = Instant::now();
    let result = vm.run(ast, json!({}), opts).await;
    assert!(error_message(&result).contains("timeout"));
    assert!(result.fuel_used >= 0.0);
    // 100 delays would take 2s; the race cut it off near the deadline.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn fuel_equal_to_cost_executes_and_drains() {
    let mut overrides = HashMap::new();
    overrides.insert("seq".to_string(), CostOverride::Fixed(0.5));
    overrides.insert("varSet".to_string(), CostOverride::Fixed(0.5));
    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "varSet", "name": "x", "value": {"$expr": "literal", "value": 1}},
    ]});
    let opts = RunOptions {
        fuel: Some(1.0),
        cost_overrides: overrides,
        ..Default::default()
    };
    let result = vm.run(ast, json!({}), opts).await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.fuel_used, 1.0);
}

#[tokio::test]
async fn zero_fuel_before_an_atom_is_an_error() {
    let mut overrides = HashMap::new();
    overrides.insert("seq".to_string(), CostOverride::Fixed(0.5));
    overrides.insert("varSet".to_string(), CostOverride::Fixed(0.5));
    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "varSet", "name": "x", "value": {"$expr": "literal", "value": 1}},
        {"op": "varSet", "name": "y", "value": {"$expr": "literal", "value": 2}},
    ]});
    let opts = RunOptions {
        fuel: Some(1.0),
        cost_overrides: overrides,
        ..Default::default()
    };
    let result = vm.run(ast, json!({}), opts).await;
    assert!(error_message(&result).contains("Fuel"));
    assert_eq!(result.fuel_used, 1.0);
}

#[tokio::test]
async fn cost_override_function_scales_with_input() {
    let mut overrides = HashMap::new();
    overrides.insert(
        "template".to_string(),
        CostOverride::Fn(Arc::new(|node: &Node| {
            node.get("parts")
                .and_then(Value::as_array)
                .map(|p| p.len() as f64)
                .unwrap_or(1.0)
        })),
    );
    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "template", "parts": [{"text": "a"}, {"text": "b"}, {"text": "c"}], "result": "s"},
        {"op": "return", "value": {"$expr": "ident", "name": "s"}},
    ]});
    let opts = RunOptions {
        fuel: Some(100.0),
        cost_overrides: overrides,
        ..Default::default()
    };
    let result = vm.run(ast, json!({}), opts).await;
    assert_eq!(result.result, json!("abc"));
    // seq (0.1) + template (3.0 by override) + return (0.1)
    assert!((result.fuel_used - 3.2).abs() < 1e-9);
}

#[tokio::test]
async fn external_signal_aborts_the_run() {
    let signal = CancelSignal::new();
    signal.abort();
    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "varSet", "name": "x", "value": {"$expr": "literal", "value": 1}},
    ]});
    let opts = RunOptions {
        signal: Some(signal),
        ..Default::default()
    };
    let result = vm.run(ast, json!({}), opts).await;
    assert!(error_message(&result).contains("timeout"));
    assert_eq!(result.fuel_used, 0.0);
}

#[tokio::test]
async fn timeout_defaults_to_fuel_budget() {
    // fuel * 10ms per unit: tiny fuel means a tiny wall-clock allowance.
    let vm = AgentVM::with_atoms(vec![Arc::new(Delay)]);
    let children: Vec<Value> = (0..50).map(|_| json!({"op": "delay"})).collect();
    let ast = json!({"op": "seq", "children": children});
    let opts = RunOptions {
        fuel: Some(10.0),
        ..Default::default()
    };
    let started = Instant::now();
    let result = vm.run(ast, json!({}), opts).await;
    assert!(result.error.is_some());
    assert!(started.elapsed() < Duration::from_secs(2));
}
