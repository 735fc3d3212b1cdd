// VM semantics: sequencing, monadic short-circuit, scopes, collections,
// consts, try/catch.

mod common;

use async_trait::async_trait;
use common::{compile_and_run, error_message};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tjs::compiler::transpile;
use tjs::vm::atoms::Atom;
use tjs::vm::capabilities::{Capabilities, FetchCapability};
use tjs::vm::context::RuntimeContext;
use tjs::vm::node::Node;
use tjs::vm::{AgentVM, RunOptions};

/// Records which probes ran; used by the short-circuit scenario.
struct Probe {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail_with: Option<&'static str>,
}

#[async_trait]
impl Atom for Probe {
    fn op(&self) -> &str {
        self.name
    }

    async fn exec(&self, _node: &Node, _ctx: &mut RuntimeContext) -> Result<(), Value> {
        self.log.lock().unwrap().push(self.name);
        match self.fail_with {
            Some(message) => Err(tjs::monadic_error(message, Some(self.name))),
            None => Ok(()),
        }
    }
}

#[tokio::test]
async fn monadic_error_short_circuits_sequence() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let vm = AgentVM::with_atoms(vec![
        Arc::new(Probe { name: "probeA", log: Arc::clone(&log), fail_with: None }),
        Arc::new(Probe { name: "probeB", log: Arc::clone(&log), fail_with: Some("b exploded") }),
        Arc::new(Probe { name: "probeC", log: Arc::clone(&log), fail_with: None }),
    ]);
    let ast = json!({ "op": "seq", "children": [
        {"op": "probeA"}, {"op": "probeB"}, {"op": "probeC"},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;

    assert_eq!(*log.lock().unwrap(), vec!["probeA", "probeB"]);
    let err = result.error.unwrap();
    assert_eq!(err["message"], "b exploded");
    assert_eq!(err["op"], "probeB");
}

/// Records every requested URL; lets the short-circuit tests observe which
/// side of a logical/ternary expression actually performed its call.
struct CountingFetch {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FetchCapability for CountingFetch {
    async fn fetch(&self, url: &str, _options: Value) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(json!({ "status": 200, "ok": true, "body": url, "json": null }))
    }
}

async fn run_with_counting_fetch(src: &str, args: Value) -> (tjs::vm::RunResult, Vec<String>) {
    let compiled = transpile(src).unwrap_or_else(|e| panic!("compile failed: {}", e));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let opts = RunOptions {
        capabilities: Capabilities::default().with_fetch(Arc::new(CountingFetch {
            calls: Arc::clone(&calls),
        })),
        ..Default::default()
    };
    let result = AgentVM::new().run(compiled.ast, args, opts).await;
    let seen = calls.lock().unwrap().clone();
    (result, seen)
}

#[tokio::test]
async fn logical_or_short_circuits_side_effects() {
    common::tracing::init_tracing_from_env();
    let src = "function f(ok: true, url: 'http://x') { const r = ok || fetch(url); return r }";

    // Truthy left side: the fetch on the right must never run.
    let (result, calls) = run_with_counting_fetch(src, json!({"ok": true, "url": "http://u"})).await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.result, json!(true));
    assert!(calls.is_empty(), "untaken side ran: {:?}", calls);

    // Falsy left side: the right side runs exactly once.
    let (result, calls) = run_with_counting_fetch(src, json!({"ok": false, "url": "http://u"})).await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(calls, vec!["http://u"]);
    assert_eq!(result.result["body"], json!("http://u"));
}

#[tokio::test]
async fn logical_and_short_circuits_side_effects() {
    let src = "function f(ok: true, url: 'http://x') { const r = ok && fetch(url); return r }";
    let (result, calls) = run_with_counting_fetch(src, json!({"ok": false, "url": "http://u"})).await;
    assert!(result.error.is_none());
    assert_eq!(result.result, json!(false));
    assert!(calls.is_empty(), "untaken side ran: {:?}", calls);

    let (_, calls) = run_with_counting_fetch(src, json!({"ok": true, "url": "http://u"})).await;
    assert_eq!(calls, vec!["http://u"]);
}

#[tokio::test]
async fn ternary_runs_only_the_taken_branch() {
    let src = "function pick(flag: true, a: 'u1', b: 'u2') { const r = flag ? fetch(a) : fetch(b); return r.body }";
    let (result, calls) =
        run_with_counting_fetch(src, json!({"flag": true, "a": "u1", "b": "u2"})).await;
    assert_eq!(result.result, json!("u1"));
    assert_eq!(calls, vec!["u1"]);

    let (result, calls) =
        run_with_counting_fetch(src, json!({"flag": false, "a": "u1", "b": "u2"})).await;
    assert_eq!(result.result, json!("u2"));
    assert_eq!(calls, vec!["u2"]);
}

#[tokio::test]
async fn nullish_fallback_fetches_only_on_null() {
    let src = "function f(v: 'x' || null, url: 'http://x') { const r = v ?? fetch(url); return r }";
    let (result, calls) =
        run_with_counting_fetch(src, json!({"v": "kept", "url": "http://u"})).await;
    assert_eq!(result.result, json!("kept"));
    assert!(calls.is_empty(), "untaken side ran: {:?}", calls);

    let (result, calls) = run_with_counting_fetch(src, json!({"v": null, "url": "http://u"})).await;
    assert_eq!(result.result["body"], json!("http://u"));
    assert_eq!(calls, vec!["http://u"]);
}

#[tokio::test]
async fn const_reassignment_is_fatal() {
    let vm = AgentVM::new();
    let ast = json!({ "op": "seq", "children": [
        {"op": "constSet", "name": "x", "value": {"$expr": "literal", "value": 5}},
        {"op": "varSet", "name": "x", "value": {"$expr": "literal", "value": 10}},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;
    assert_eq!(
        result.error.unwrap()["message"],
        "Cannot reassign const variable 'x'"
    );
}

#[tokio::test]
async fn const_reassignment_from_source() {
    let src = "function f() { const a = 1; a = 2; return a }";
    let result = compile_and_run(src, json!({})).await;
    assert!(error_message(&result).contains("Cannot reassign const variable 'a'"));
}

#[tokio::test]
async fn if_else_branches() {
    let src = "function sign(n: 1) { if (n > 0) { return 'pos' } else if (n < 0) { return 'neg' } return 'zero' }";
    assert_eq!(compile_and_run(src, json!({"n": 5})).await.result, json!("pos"));
    assert_eq!(compile_and_run(src, json!({"n": -5})).await.result, json!("neg"));
    assert_eq!(compile_and_run(src, json!({"n": 0})).await.result, json!("zero"));
}

#[tokio::test]
async fn while_loops_compute() {
    let src = "function sum(n: 5) { let total = 0; let i = 1; while (i <= n) { total += i; i++ } return total }";
    let result = compile_and_run(src, json!({"n": 10})).await;
    assert_eq!(result.result, json!(55));
}

#[tokio::test]
async fn map_transforms_and_keeps_parent_state() {
    let src = "function doubles(xs: [1, 2]) { return xs.map(x => x * 2) }";
    let result = compile_and_run(src, json!({"xs": [1, 2, 3]})).await;
    assert_eq!(result.result, json!([2, 4, 6]));
}

#[tokio::test]
async fn filter_and_find() {
    let src = "function evens(xs: [1]) { return xs.filter(x => x % 2 == 0) }";
    let result = compile_and_run(src, json!({"xs": [1, 2, 3, 4]})).await;
    assert_eq!(result.result, json!([2, 4]));

    let src = "function firstBig(xs: [1]) { return xs.find(x => x > 10) }";
    let result = compile_and_run(src, json!({"xs": [3, 30, 40]})).await;
    assert_eq!(result.result, json!(30));
    let result = compile_and_run(src, json!({"xs": [1, 2]})).await;
    assert_eq!(result.result, json!(null));
}

#[tokio::test]
async fn reduce_folds() {
    let src = "function total(xs: [1]) { return xs.reduce((acc, x) => acc + x, 0) }";
    let result = compile_and_run(src, json!({"xs": [1, 2, 3, 4]})).await;
    assert_eq!(result.result, json!(10));
}

#[tokio::test]
async fn lambda_scope_writes_do_not_leak() {
    // The lambda rebinds a name that also exists outside; the outer value
    // must survive.
    let src = "function f(xs: [1]) { let y = 1; const out = xs.map(x => { y = x * 10; return y }); return y }";
    let result = compile_and_run(src, json!({"xs": [5]})).await;
    assert_eq!(result.result, json!(1));
}

#[tokio::test]
async fn for_of_iterates_in_order() {
    let src = "function firstNegative(xs: [1]) { for (const x of xs) { if (x < 0) { return x } } return 0 }";
    let result = compile_and_run(src, json!({"xs": [3, -7, -9]})).await;
    assert_eq!(result.result, json!(-7));
}

#[tokio::test]
async fn try_catch_clears_error_and_binds_it() {
    let src = "function f() { try { const x = helper(); return x } catch (err) { return err.message } }";
    let result = compile_and_run(src, json!({})).await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.result, json!("Unknown function 'helper'"));
}

#[tokio::test]
async fn error_already_in_flight_is_caught_by_later_try() {
    let vm = AgentVM::new();
    let ast = json!({ "op": "seq", "children": [
        {"op": "call", "name": "nope", "args": [], "result": "r"},
        {"op": "varSet", "name": "skipped", "value": {"$expr": "literal", "value": true}},
        {"op": "try", "try": [], "catch": [
            {"op": "return", "value": {"$expr": "literal", "value": "recovered"}}
        ], "as": "e"},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;
    assert!(result.error.is_none());
    assert_eq!(result.result, json!("recovered"));
}

#[tokio::test]
async fn template_strings_interpolate() {
    let src = "function hello(name: 'x', n: 2) { return `hi ${name}, count ${n + 1}` }";
    let result = compile_and_run(src, json!({"name": "ada", "n": 4})).await;
    assert_eq!(result.result, json!("hi ada, count 5"));
}

#[tokio::test]
async fn optional_chaining_returns_null() {
    let src = "function f(o: {a: 1} || null) { return o?.a }";
    let result = compile_and_run(src, json!({"o": null})).await;
    assert!(result.error.is_none());
    assert_eq!(result.result, json!(null));
    let result = compile_and_run(src, json!({"o": {"a": 9}})).await;
    assert_eq!(result.result, json!(9));
}

#[tokio::test]
async fn division_by_zero_flows_as_value() {
    let src = "function f(n: 1) { return n / 0 > 100 }";
    let result = compile_and_run(src, json!({"n": 5})).await;
    assert!(result.error.is_none());
    assert_eq!(result.result, json!(true));
}

#[tokio::test]
async fn array_mutation_via_method_atoms() {
    let src = "function build(n: 3) { let xs = []; let i = 0; while (i < n) { xs.push(i); i++ } return xs }";
    let result = compile_and_run(src, json!({"n": 4})).await;
    assert_eq!(result.result, json!([0, 1, 2, 3]));
}

#[tokio::test]
async fn object_property_assignment() {
    let src = "function f() { let o = {a: 1, b: {c: 2}}; o.a = 10; o.b.c = 20; return o }";
    let result = compile_and_run(src, json!({})).await;
    assert_eq!(result.result, json!({"a": 10, "b": {"c": 20}}));
}

#[tokio::test]
async fn schema_return_projects_state() {
    let vm = AgentVM::new();
    let ast = json!({ "op": "seq", "children": [
        {"op": "varSet", "name": "sum", "value": {"$expr": "literal", "value": 5}},
        {"op": "varSet", "name": "noise", "value": {"$expr": "literal", "value": 1}},
        {"op": "return", "schema": {"sum": true}},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;
    assert_eq!(result.result, json!({"sum": 5}));
}

#[tokio::test]
async fn bare_string_fields_resolve_from_state() {
    // Hand-written ASTs may reference state by bare identifier strings.
    let vm = AgentVM::new();
    let ast = json!({ "op": "seq", "children": [
        {"op": "varSet", "name": "greeting", "value": {"$expr": "literal", "value": "hello"}},
        {"op": "storeSet", "key": {"$expr": "literal", "value": "k"}, "value": "greeting"},
        {"op": "storeGet", "key": {"$expr": "literal", "value": "k"}, "result": "out"},
        {"op": "return", "value": {"$expr": "ident", "name": "out"}},
    ]});
    let result = vm.run(ast, json!({}), RunOptions::default()).await;
    assert_eq!(result.result, json!("hello"));
}

#[tokio::test]
async fn capability_missing_is_monadic() {
    let src = "function f(url: 'http://x') { const r = fetch(url); return r }";
    // Default RunOptions install a store but no fetch capability.
    let result = compile_and_run(src, json!({"url": "http://localhost"})).await;
    assert!(error_message(&result).contains("Capability 'fetch'"));
}

#[tokio::test]
async fn set_and_date_wrappers() {
    let src = "function uniq(xs: [1]) { const s = new Set(xs); return s.size }";
    let result = compile_and_run(src, json!({"xs": [1, 1, 2, 3, 3]})).await;
    assert_eq!(result.result, json!(3));
}
