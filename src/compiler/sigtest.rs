//! Compile-time test execution.
//!
//! Signature tests invoke a function with its declared example inputs and
//! type-check the result against the declared return example. They run
//! through the agent VM with an empty capability set and a small fuel
//! budget — compile-time execution gets the same sandbox as runtime.
//! Explicit `test { … }` blocks run afterwards: mocks first into a shared
//! scope, then each test body in a fresh child scope with module functions
//! callable by name.

use crate::compiler::ast::Function;
use crate::compiler::infer::{check_type, infer_type, type_to_string, Type};
use crate::compiler::preprocess::{Preprocessed, ReturnPolicy};
use crate::compiler::signature::FunctionSignature;
use crate::vm::atoms::AtomRegistry;
use crate::vm::capabilities::Capabilities;
use crate::vm::context::{CancelSignal, RuntimeContext};
use crate::vm::execute_node;
use crate::vm::fuel::{CostTable, FuelMeter};
use crate::vm::node::Node;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Fuel budget for one compile-time invocation.
const SIGTEST_FUEL: f64 = 10_000.0;
const SIGTEST_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub description: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<TestResult>,
}

impl TestReport {
    pub fn push(&mut self, result: TestResult) {
        if result.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    pub fn merge(&mut self, other: TestReport) {
        for r in other.results {
            self.push(r);
        }
    }
}

/// Run a future to completion on a dedicated single-thread runtime. Keeps
/// the compile API synchronous and safe to call from inside another runtime.
fn block_on_isolated<F, T>(fut: F) -> T
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    std::thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("test runtime")
            .block_on(fut)
    })
    .join()
    .expect("test thread")
}

/// Does the AST call any function outside `known`? Such tests are skipped
/// rather than failed — the reference cannot be resolved at compile time.
fn has_unresolved_calls(ast: &Value, known: &HashSet<String>) -> bool {
    match ast {
        Value::Object(map) => {
            if map.get("op").and_then(Value::as_str) == Some("call") {
                let name = map.get("name").and_then(Value::as_str).unwrap_or("");
                if !known.contains(name) {
                    return true;
                }
            }
            map.values().any(|v| has_unresolved_calls(v, known))
        }
        Value::Array(items) => items.iter().any(|v| has_unresolved_calls(v, known)),
        _ => false,
    }
}

/// Execute one compiled function AST with named args in a sandboxed scope.
/// `callables` binds module functions for cross-function calls.
async fn invoke(
    ast: Value,
    args: Value,
    callables: Vec<(String, Value)>,
) -> Result<Value, Value> {
    let root = Node::try_from(ast)?;
    let mut ctx = RuntimeContext::new(
        FuelMeter::new(SIGTEST_FUEL),
        Arc::new(CostTable::default()),
        args,
        Capabilities::default(),
        Arc::new(AtomRegistry::with_defaults()),
        CancelSignal::new(),
        None,
    );
    for (name, value) in callables {
        ctx.state.insert(name, value);
    }
    let run = async {
        execute_node(&root, &mut ctx).await;
        match ctx.error.take() {
            Some(err) => Err(err),
            None => Ok(ctx.output.take().unwrap_or(Value::Null)),
        }
    };
    match tokio::time::timeout(std::time::Duration::from_millis(SIGTEST_TIMEOUT_MS), run).await
    {
        Ok(result) => result,
        Err(_) => Err(crate::vm::error::timeout_error()),
    }
}

/// A `{ "$proc": …, "params": […] }` callable value for a compiled function.
pub fn callable_value(ast: &Value, f: &Function) -> Value {
    let params: Vec<Value> = f.params.iter().map(|p| json!(p.name)).collect();
    json!({ "$proc": ast, "params": params })
}

/// Run the signature test for one function. Returns `None` when the policy
/// skips it entirely.
pub fn run_signature_test(
    f: &Function,
    pre: &Preprocessed,
    signature: &FunctionSignature,
    ast: &Value,
) -> Option<TestResult> {
    let description = format!("{} signature", f.name);
    if pre.return_policy == ReturnPolicy::Skip {
        return None;
    }
    let Some(returns) = signature.returns.clone() else {
        return None;
    };
    // Async functions never run at compile time.
    if f.is_async {
        return Some(TestResult {
            description,
            passed: true,
            error: None,
            line: Some(f.span.line),
        });
    }
    let known: HashSet<String> = HashSet::new();
    if has_unresolved_calls(ast, &known) {
        return Some(TestResult {
            description,
            passed: true,
            error: None,
            line: Some(f.span.line),
        });
    }

    let mut args = serde_json::Map::new();
    for (name, spec) in &signature.parameters {
        if let Some(v) = spec.example.clone().or_else(|| spec.default.clone()) {
            args.insert(name.clone(), v);
        }
    }
    let ast = ast.clone();
    let outcome =
        block_on_isolated(async move { invoke(ast, Value::Object(args), Vec::new()).await });

    let result = match outcome {
        Ok(v) => v,
        Err(e) => {
            return Some(TestResult {
                description,
                passed: false,
                error: Some(
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("signature test failed")
                        .to_string(),
                ),
                line: Some(f.span.line),
            })
        }
    };
    Some(check_against(&description, &result, &returns, f.span.line))
}

fn check_against(description: &str, result: &Value, returns: &Type, line: usize) -> TestResult {
    if check_type(result, returns) {
        TestResult {
            description: description.to_string(),
            passed: true,
            error: None,
            line: Some(line),
        }
    } else {
        TestResult {
            description: description.to_string(),
            passed: false,
            error: Some(format!(
                "Expected {}, got {}",
                type_to_string(returns),
                type_to_string(&infer_type(result))
            )),
            line: Some(line),
        }
    }
}

/// Run explicit test blocks: mocks execute first into a shared scope, then
/// each test body runs in a fresh child scope.
pub fn run_test_blocks(
    pre: &Preprocessed,
    callables: Vec<(String, Value)>,
) -> TestReport {
    let mut report = TestReport::default();
    for err in &pre.test_errors {
        report.push(TestResult {
            description: "test extraction".to_string(),
            passed: false,
            error: Some(err.message.clone()),
            line: Some(err.line),
        });
    }
    if pre.tests.is_empty() {
        return report;
    }

    // Lower every block up front so compile problems report cleanly.
    let mut lowered_mocks = Vec::new();
    for mock in &pre.mocks {
        match lower_block(&mock.body) {
            Ok(ast) => lowered_mocks.push(ast),
            Err(e) => report.push(TestResult {
                description: "mock block".to_string(),
                passed: false,
                error: Some(e),
                line: Some(mock.line),
            }),
        }
    }
    struct Pending {
        description: String,
        line: usize,
        ast: Result<Value, String>,
    }
    let pending: Vec<Pending> = pre
        .tests
        .iter()
        .map(|t| Pending {
            description: t.description.clone(),
            line: t.line,
            ast: lower_block(&t.body),
        })
        .collect();

    let results = block_on_isolated(async move {
        let mut base = RuntimeContext::new(
            FuelMeter::new(SIGTEST_FUEL),
            Arc::new(CostTable::default()),
            json!({}),
            Capabilities::default(),
            Arc::new(AtomRegistry::with_defaults()),
            CancelSignal::new(),
            None,
        );
        for (name, value) in callables {
            base.state.insert(name, value);
        }
        for mock in &lowered_mocks {
            if let Ok(node) = Node::try_from(mock.clone()) {
                execute_node(&node, &mut base).await;
                base.error = None;
                base.returned = false;
            }
        }

        let mut results = Vec::new();
        for test in pending {
            let ast = match test.ast {
                Ok(ast) => ast,
                Err(e) => {
                    results.push(TestResult {
                        description: test.description,
                        passed: false,
                        error: Some(e),
                        line: Some(test.line),
                    });
                    continue;
                }
            };
            let node = match Node::try_from(ast) {
                Ok(n) => n,
                Err(e) => {
                    results.push(TestResult {
                        description: test.description,
                        passed: false,
                        error: e.get("message").and_then(Value::as_str).map(str::to_string),
                        line: Some(test.line),
                    });
                    continue;
                }
            };
            let mut scope = base.child_scope();
            execute_node(&node, &mut scope).await;
            match scope.error.take() {
                Some(err) => results.push(TestResult {
                    description: test.description,
                    passed: false,
                    error: err
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    line: Some(test.line),
                }),
                None => results.push(TestResult {
                    description: test.description,
                    passed: true,
                    error: None,
                    line: Some(test.line),
                }),
            }
        }
        results
    });
    for r in results {
        report.push(r);
    }
    report
}

/// Preprocess + parse + lower one test/mock body to an atom AST.
fn lower_block(body: &str) -> Result<Value, String> {
    let pre = crate::compiler::preprocess::preprocess(body).map_err(|e| e.message.clone())?;
    let program =
        crate::compiler::parser::parse_module(&pre.source).map_err(|e| e.message.clone())?;
    crate::compiler::emit_atoms::lower_statements(&program.body).map_err(|e| e.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::emit_atoms::lower_function;
    use crate::compiler::parser::parse_module;
    use crate::compiler::preprocess::preprocess;
    use crate::compiler::signature::build_signature;

    fn compile(src: &str) -> (Preprocessed, Value, FunctionSignature, Function) {
        let pre = preprocess(src).unwrap();
        let program = parse_module(&pre.source).unwrap();
        let f = program.functions()[0].clone();
        let sig = build_signature(&f, &pre, true).unwrap();
        let ast = lower_function(&f, &pre, &sig).unwrap();
        (pre, ast, sig, f)
    }

    #[test]
    fn passing_signature_test() {
        let (pre, ast, sig, f) = compile("function double(x: 5) -> 10 { return x * 2 }");
        let result = run_signature_test(&f, &pre, &sig, &ast).unwrap();
        assert!(result.passed, "error: {:?}", result.error);
    }

    #[test]
    fn failing_signature_test_reports_kinds() {
        let (pre, ast, sig, f) =
            compile("function bad(x: 5) -> 'ten' { return x * 2 }");
        let result = run_signature_test(&f, &pre, &sig, &ast).unwrap();
        assert!(!result.passed);
        let message = result.error.unwrap();
        assert!(message.contains("Expected string"), "got: {}", message);
    }

    #[test]
    fn skip_policy_returns_none() {
        let (pre, ast, sig, f) = compile("function f(x: 1) -! 2 { return 'wrong' }");
        assert!(run_signature_test(&f, &pre, &sig, &ast).is_none());
    }

    #[test]
    fn async_functions_are_skipped_as_passed() {
        let (pre, ast, sig, f) =
            compile("async function f(x: 1) -> 2 { return x }");
        let result = run_signature_test(&f, &pre, &sig, &ast).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn unresolved_references_skip() {
        let (pre, ast, sig, f) =
            compile("function f(x: 1) -> 2 { return helper(x) }");
        let result = run_signature_test(&f, &pre, &sig, &ast).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn test_blocks_run_against_module_functions() {
        let src = "function double(x: 5) -> 10 { return x * 2 }\ntest 'doubles' {\n  expect(double(4)).toBe(8)\n}\ntest 'fails' {\n  expect(double(4)).toBe(9)\n}\n";
        let pre = preprocess(src).unwrap();
        let program = parse_module(&pre.source).unwrap();
        let f = program.functions()[0].clone();
        let sig = build_signature(&f, &pre, true).unwrap();
        let ast = lower_function(&f, &pre, &sig).unwrap();
        let callables = vec![("double".to_string(), callable_value(&ast, &f))];
        let report = run_test_blocks(&pre, callables);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.results[0].description, "doubles");
        assert!(report.results[1].error.as_ref().unwrap().contains("toBe"));
    }

    #[test]
    fn mocks_seed_test_scope() {
        let src = "function f(x: 1) -> 1 { return x }\nmock { let base = 41 }\ntest 'uses mock' {\n  expect(base + 1).toBe(42)\n}\n";
        let pre = preprocess(src).unwrap();
        let report = run_test_blocks(&pre, Vec::new());
        assert_eq!(report.passed, 1, "results: {:?}", report.results);
    }
}
