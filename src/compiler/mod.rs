//! The TJS compiler.
//!
//! Pipeline: source → preprocess → parse → { JS emission, atom lowering },
//! with type inference by example and compile-time signature tests shared by
//! both paths.

pub mod ast;
pub mod diagnostics;
pub mod emit_atoms;
pub mod emit_js;
pub mod from_ts;
pub mod infer;
pub mod lexer;
pub mod parser;
pub mod preprocess;
pub mod signature;
pub mod sigtest;

use crate::compiler::diagnostics::SyntaxError;
use crate::compiler::emit_js::EmitOptions;
use crate::compiler::preprocess::{MockBlock, Preprocessed, TestBlock};
use crate::compiler::signature::{build_signature, FunctionSignature};
use crate::compiler::sigtest::{callable_value, run_signature_test, run_test_blocks, TestReport};
use indexmap::IndexMap;
use serde_json::Value;

/// How `tjs` treats signature-test and test-block outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunTestsMode {
    /// Run tests; failures fail the transpile.
    #[default]
    Run,
    /// Do not run tests at all.
    Skip,
    /// Run tests but only report results; failures do not fail the build.
    Report,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub filename: Option<String>,
    /// Adds `source: "file:line:col"` to emitted metadata.
    pub debug: bool,
    pub run_tests: RunTestsMode,
    pub dangerously_skip_tests: bool,
}

/// `transpile` output: the atom AST for the VM plus the function signature.
#[derive(Debug, Clone)]
pub struct TranspileOutput {
    pub ast: Value,
    pub signature: FunctionSignature,
}

/// `transpile_to_js` / `tjs` output.
#[derive(Debug, Clone)]
pub struct TjsOutput {
    pub code: String,
    /// Signatures keyed by function name, in source order.
    pub types: IndexMap<String, FunctionSignature>,
    pub test_results: Option<TestReport>,
}

/// Compile a single-function module to an atom AST for the VM.
pub fn transpile(source: &str) -> Result<TranspileOutput, SyntaxError> {
    let pre = preprocess::preprocess(source)?;
    let program = parser::parse_single_function(&pre.source)?;
    let f = program.functions()[0];
    let signature = build_signature(f, &pre, true)?;
    let ast = emit_atoms::lower_function(f, &pre, &signature)?;
    tracing::debug!(function = %f.name, "transpiled to atom AST");
    Ok(TranspileOutput { ast, signature })
}

/// Compile a module to JavaScript with metadata and validation. Does not run
/// tests; `tjs` layers those on top.
pub fn transpile_to_js(
    source: &str,
    opts: &CompileOptions,
) -> Result<TjsOutput, SyntaxError> {
    let pre = preprocess::preprocess(source)?;
    let program = parser::parse_module(&pre.source)?;
    let signatures = collect_signatures(&program, &pre)?;
    let emit_opts = EmitOptions {
        debug: opts.debug,
        filename: opts.filename.clone(),
        no_prelude: false,
    };
    let code = emit_js::emit_module(&program, &pre, &signatures, &emit_opts)?;
    Ok(TjsOutput {
        code,
        types: signatures,
        test_results: None,
    })
}

/// The full pipeline: signature tests, explicit test blocks, JS emission.
pub fn tjs(source: &str, opts: &CompileOptions) -> Result<TjsOutput, SyntaxError> {
    let pre = preprocess::preprocess(source)?;
    let program = parser::parse_module(&pre.source)?;
    let signatures = collect_signatures(&program, &pre)?;

    let mut report = TestReport::default();
    let skip_tests =
        opts.dangerously_skip_tests || opts.run_tests == RunTestsMode::Skip;
    if !skip_tests {
        // Lower each function once; callables feed the test blocks.
        let mut callables = Vec::new();
        let primary = program.functions().first().map(|f| f.name.clone());
        for f in program.functions() {
            let Some(sig) = signatures.get(&f.name) else {
                continue;
            };
            match emit_atoms::lower_function(f, &pre, sig) {
                Ok(ast) => {
                    if primary.as_deref() == Some(f.name.as_str()) {
                        if let Some(result) = run_signature_test(f, &pre, sig, &ast) {
                            report.push(result);
                        }
                    }
                    callables.push((f.name.clone(), callable_value(&ast, f)));
                }
                Err(e) => {
                    tracing::debug!(function = %f.name, error = %e.message,
                        "function not lowerable; signature test skipped");
                }
            }
        }
        report.merge(run_test_blocks(&pre, callables));

        if report.failed > 0 && opts.run_tests != RunTestsMode::Report {
            let first = report
                .results
                .iter()
                .find(|r| !r.passed)
                .expect("failed count > 0");
            return Err(SyntaxError::new(
                format!(
                    "Test '{}' failed: {}",
                    first.description,
                    first.error.as_deref().unwrap_or("assertion failed")
                ),
                first.line.unwrap_or(1),
                1,
            ));
        }
    }

    let emit_opts = EmitOptions {
        debug: opts.debug,
        filename: opts.filename.clone(),
        no_prelude: false,
    };
    let code = emit_js::emit_module(&program, &pre, &signatures, &emit_opts)?;
    Ok(TjsOutput {
        code,
        types: signatures,
        test_results: (!skip_tests).then_some(report),
    })
}

fn collect_signatures(
    program: &ast::Program,
    pre: &Preprocessed,
) -> Result<IndexMap<String, FunctionSignature>, SyntaxError> {
    let mut signatures = IndexMap::new();
    let primary = program.functions().first().map(|f| f.name.clone());
    for f in program.functions() {
        let is_primary = primary.as_deref() == Some(f.name.as_str());
        signatures.insert(f.name.clone(), build_signature(f, pre, is_primary)?);
    }
    Ok(signatures)
}

// === Test extraction for JS hosts ===

/// `expect()` matchers for the stringified JS test runner.
pub const TEST_UTILS_JS: &str = r#"function expect(actual) {
  function fail(message) { throw new Error(message); }
  function show(v) { try { return JSON.stringify(v); } catch (e) { return String(v); } }
  return {
    toBe(expected) { if (actual !== expected) fail('Expected ' + show(actual) + ' toBe ' + show(expected)); },
    toEqual(expected) { if (JSON.stringify(actual) !== JSON.stringify(expected)) fail('Expected ' + show(actual) + ' toEqual ' + show(expected)); },
    toContain(expected) {
      const ok = Array.isArray(actual) ? actual.some(function (i) { return JSON.stringify(i) === JSON.stringify(expected); })
        : typeof actual === 'string' && actual.includes(String(expected));
      if (!ok) fail('Expected ' + show(actual) + ' toContain ' + show(expected));
    },
    toBeTruthy() { if (!actual) fail('Expected ' + show(actual) + ' toBeTruthy'); },
    toBeFalsy() { if (actual) fail('Expected ' + show(actual) + ' toBeFalsy'); },
    toBeNull() { if (actual !== null) fail('Expected ' + show(actual) + ' toBeNull'); },
    toBeUndefined() { if (actual !== undefined) fail('Expected ' + show(actual) + ' toBeUndefined'); },
    toThrow() {
      if (typeof actual === 'function') {
        try { actual(); } catch (e) { return; }
        fail('Expected function toThrow');
      }
      if (!(actual && actual.$error === true)) fail('Expected ' + show(actual) + ' toThrow');
    },
    toBeGreaterThan(expected) { if (!(actual > expected)) fail('Expected ' + show(actual) + ' toBeGreaterThan ' + show(expected)); },
    toBeLessThan(expected) { if (!(actual < expected)) fail('Expected ' + show(actual) + ' toBeLessThan ' + show(expected)); }
  };
}
"#;

/// Stringified runner: concatenate emitted code + `TEST_UTILS_JS` + this,
/// then call `__tjsRunTests(tests)` with `[{description, body}]` entries
/// (bodies are evaluated test functions).
pub const TEST_RUNNER_JS: &str = r#"function __tjsRunTests(tests) {
  const results = [];
  let passed = 0, failed = 0;
  for (const test of tests) {
    try {
      test.body();
      passed += 1;
      results.push({ description: test.description, passed: true });
    } catch (e) {
      failed += 1;
      results.push({ description: test.description, passed: false, error: (e && e.message) || String(e) });
    }
  }
  return { passed: passed, failed: failed, results: results };
}
"#;

/// Output of `extract_tests`.
#[derive(Debug, Clone)]
pub struct ExtractedTests {
    /// Source with test/mock blocks removed.
    pub code: String,
    pub tests: Vec<TestBlock>,
    pub mocks: Vec<MockBlock>,
    pub test_runner: &'static str,
    pub test_utils: &'static str,
}

/// Pull `test` / `mock` blocks out of TJS source for a JS-side runner.
pub fn extract_tests(source: &str) -> Result<ExtractedTests, SyntaxError> {
    let pre = preprocess::preprocess(source)?;
    Ok(ExtractedTests {
        code: pre.source,
        tests: pre.tests,
        mocks: pre.mocks,
        test_runner: TEST_RUNNER_JS,
        test_utils: TEST_UTILS_JS,
    })
}
