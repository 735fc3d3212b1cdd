#![allow(dead_code)]

pub mod tracing;

use serde_json::Value;
use tjs::compiler::transpile;
use tjs::vm::{AgentVM, RunOptions, RunResult};

/// Compile a single-function TJS source and run it in a fresh VM.
pub async fn compile_and_run(source: &str, args: Value) -> RunResult {
    compile_and_run_with(source, args, RunOptions::default()).await
}

pub async fn compile_and_run_with(source: &str, args: Value, opts: RunOptions) -> RunResult {
    let compiled = transpile(source).unwrap_or_else(|e| panic!("compile failed: {}", e));
    AgentVM::new().run(compiled.ast, args, opts).await
}

/// The compiled atom AST for a single-function source.
pub fn ast_of(source: &str) -> Value {
    transpile(source)
        .unwrap_or_else(|e| panic!("compile failed: {}", e))
        .ast
}

pub fn error_message(result: &RunResult) -> String {
    result
        .error
        .as_ref()
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
