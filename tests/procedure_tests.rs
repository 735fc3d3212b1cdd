// The procedure store: tokens, TTL expiry, release, and agentRun.

mod common;

use common::error_message;
use serde_json::json;
use std::time::Duration;
use tjs::compiler::transpile;
use tjs::vm::procedures;
use tjs::vm::{AgentVM, RunOptions};

fn add_ast() -> serde_json::Value {
    transpile("function add(a: 2, b: 3) { return {sum: a + b} }")
        .unwrap()
        .ast
}

#[tokio::test]
async fn stored_procedure_runs_by_token() {
    let token = procedures::store_procedure(add_ast(), Some(5_000), None).unwrap();
    assert!(token.starts_with("proc_"));

    let vm = AgentVM::new();
    let result = vm
        .run(json!(token), json!({"a": 2, "b": 3}), RunOptions::default())
        .await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.result, json!({"sum": 5}));
}

#[tokio::test]
async fn expired_token_is_a_monadic_error() {
    let token = procedures::store_procedure(add_ast(), Some(200), None).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let vm = AgentVM::new();
    let result = vm
        .run(json!(token), json!({"a": 2, "b": 3}), RunOptions::default())
        .await;
    assert!(error_message(&result).contains("expired"));
}

#[tokio::test]
async fn released_token_is_not_found() {
    let token = procedures::store_procedure(add_ast(), Some(5_000), None).unwrap();
    assert!(procedures::release_procedure(&token));

    let vm = AgentVM::new();
    let result = vm
        .run(json!(token), json!({"a": 1, "b": 1}), RunOptions::default())
        .await;
    assert!(error_message(&result).contains("not found"));
}

#[tokio::test]
async fn procedure_atoms_roundtrip_inside_a_program() {
    // A program that stores a procedure, runs it through agentRun, then
    // releases it.
    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "storeProcedure", "ast": add_ast(), "ttl": {"$expr": "literal", "value": 5000},
         "result": "token"},
        {"op": "agentRun", "agent": {"$expr": "ident", "name": "token"},
         "input": {"$expr": "object", "fields": [
            {"key": "a", "value": {"$expr": "literal", "value": 20}},
            {"key": "b", "value": {"$expr": "literal", "value": 22}}
         ]},
         "result": "out"},
        {"op": "releaseProcedure", "token": {"$expr": "ident", "name": "token"}, "result": "released"},
        {"op": "return", "schema": {"out": true, "released": true}},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.result, json!({"out": {"sum": 42}, "released": true}));
}

#[tokio::test]
async fn agent_run_accepts_inline_asts() {
    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "agentRun", "agent": add_ast(),
         "input": {"$expr": "object", "fields": [
            {"key": "a", "value": {"$expr": "literal", "value": 1}},
            {"key": "b", "value": {"$expr": "literal", "value": 2}}
         ]},
         "result": "out"},
        {"op": "return", "value": {"$expr": "ident", "name": "out"}},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;
    assert_eq!(result.result, json!({"sum": 3}));
}

#[tokio::test]
async fn sub_agents_share_the_fuel_budget() {
    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "agentRun", "agent": add_ast(),
         "input": {"$expr": "object", "fields": [
            {"key": "a", "value": {"$expr": "literal", "value": 1}},
            {"key": "b", "value": {"$expr": "literal", "value": 2}}
         ]},
         "result": "out"},
        {"op": "return", "value": {"$expr": "ident", "name": "out"}},
    ]});
    let opts = RunOptions {
        fuel: Some(5.2),
        ..Default::default()
    };
    // agentRun alone costs 5; the sub-program needs more than what is left.
    let result = vm.run(ast, json!({}), opts).await;
    assert!(error_message(&result).contains("Fuel"));
}

#[tokio::test]
async fn clear_expired_procedures_atom_reports_count() {
    let _short = procedures::store_procedure(add_ast(), Some(1), None).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let vm = AgentVM::new();
    let ast = json!({"op": "seq", "children": [
        {"op": "clearExpiredProcedures", "result": "count"},
        {"op": "return", "value": {"$expr": "ident", "name": "count"}},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;
    assert!(result.result.as_i64().unwrap() >= 1);
}

#[test]
fn oversized_procedures_are_rejected() {
    let big = json!({"op": "seq", "children": [{"op": "varSet", "name": "x",
        "value": {"$expr": "literal", "value": "y".repeat(4096)}}]});
    let err = procedures::store_procedure(big, None, Some(1024)).unwrap_err();
    assert!(err["message"].as_str().unwrap().contains("too large"));
}
