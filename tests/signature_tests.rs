// Signature-test policies and explicit test/mock blocks through the public
// compile surface.

mod common;

use tjs::compiler::{tjs, CompileOptions, RunTestsMode};

fn options(mode: RunTestsMode) -> CompileOptions {
    CompileOptions {
        run_tests: mode,
        ..Default::default()
    }
}

#[test]
fn arrow_policy_fails_the_transpile_on_mismatch() {
    let err = tjs(
        "function bad(x: 5) -> 'ten' { return x * 2 }",
        &options(RunTestsMode::Run),
    )
    .unwrap_err();
    assert!(err.message.contains("Expected string"), "got: {}", err.message);
}

#[test]
fn report_mode_downgrades_to_a_result_entry() {
    let out = tjs(
        "function bad(x: 5) -> 'ten' { return x * 2 }",
        &options(RunTestsMode::Report),
    )
    .unwrap();
    let report = out.test_results.unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.results[0].error.as_ref().unwrap().contains("Expected"));
}

#[test]
fn check_runtime_policy_emits_return_validation() {
    let out = tjs(
        "function f(x: 1) -? 2 { return x }",
        &options(RunTestsMode::Run),
    )
    .unwrap();
    assert!(out.code.contains("validateReturn"));
    let report = out.test_results.unwrap();
    assert_eq!(report.failed, 0);
    assert!(report.passed >= 1);
}

#[test]
fn skip_policy_runs_no_signature_test() {
    let out = tjs(
        "function f(x: 1) -! 'mismatch' { return x }",
        &options(RunTestsMode::Run),
    )
    .unwrap();
    // No failure despite the wrong return example, and no wrapper either.
    assert!(!out.code.contains("validateReturn"));
    assert_eq!(out.test_results.unwrap().failed, 0);
}

#[test]
fn async_functions_are_never_invoked() {
    let out = tjs(
        "async function f(x: 1) -> 2 { return await helper(x) }",
        &options(RunTestsMode::Run),
    )
    .unwrap();
    let report = out.test_results.unwrap();
    assert_eq!(report.failed, 0);
    let entry = report
        .results
        .iter()
        .find(|r| r.description.contains("signature"))
        .unwrap();
    assert!(entry.passed);
    assert!(entry.error.is_none());
}

#[test]
fn unresolved_references_skip_the_test() {
    let out = tjs(
        "function f(x: 1) -> 2 { return missingHelper(x) }",
        &options(RunTestsMode::Run),
    )
    .unwrap();
    assert_eq!(out.test_results.unwrap().failed, 0);
}

#[test]
fn test_blocks_call_module_functions() {
    let src = "function double(x: 5) -> 10 { return x * 2 }\n\
               test 'doubles four' {\n  expect(double(4)).toBe(8)\n}\n\
               test 'result is even' {\n  expect(double(3) % 2).toBe(0)\n}\n";
    let out = tjs(src, &options(RunTestsMode::Run)).unwrap();
    let report = out.test_results.unwrap();
    assert_eq!(report.failed, 0, "results: {:?}", report.results);
    // Signature test + two blocks.
    assert_eq!(report.passed, 3);
}

#[test]
fn failing_test_block_fails_the_build() {
    let src = "function double(x: 5) -> 10 { return x * 2 }\n\
               test 'wrong' {\n  expect(double(2)).toBe(5)\n}\n";
    let err = tjs(src, &options(RunTestsMode::Run)).unwrap_err();
    assert!(err.message.contains("wrong"));
}

#[test]
fn mocks_run_before_tests() {
    let src = "function f(x: 1) -> 1 { return x }\n\
               mock { let expected = 7 }\n\
               test 'uses the mock' {\n  expect(3 + 4).toBe(expected)\n}\n";
    let out = tjs(src, &options(RunTestsMode::Run)).unwrap();
    assert_eq!(out.test_results.unwrap().failed, 0);
}

#[test]
fn anonymous_and_embedded_tests_are_described() {
    let src = "function f(x: 1) -> 1 { return x }\n\
               test { expect(1).toBe(1) }\n\
               /*test 'embedded ok' { expect(2).toBe(2) }*/\n";
    let out = tjs(src, &options(RunTestsMode::Report)).unwrap();
    let report = out.test_results.unwrap();
    let descriptions: Vec<&str> = report
        .results
        .iter()
        .map(|r| r.description.as_str())
        .collect();
    assert!(descriptions.contains(&"test 1"));
    assert!(descriptions.contains(&"embedded ok"));
}

#[test]
fn matchers_cover_the_expect_surface() {
    let src = "function f(x: 1) -> 1 { return x }\n\
               test 'matchers' {\n\
                 expect([1, 2, 3]).toContain(2)\n\
                 expect('hello world').toContain('world')\n\
                 expect(1 < 2).toBeTruthy()\n\
                 expect(0).toBeFalsy()\n\
                 expect(null).toBeNull()\n\
                 expect(5).toBeGreaterThan(4)\n\
                 expect(3).toBeLessThan(4)\n\
               }\n";
    let out = tjs(src, &options(RunTestsMode::Run)).unwrap();
    assert_eq!(out.test_results.unwrap().failed, 0);
}

#[test]
fn to_throw_matches_monadic_errors() {
    // A bad argument makes the wrapped call return a monadic error value,
    // which is exactly what toThrow asserts.
    let src = "function double(x: 5) -> 10 { return x * 2 }\n\
               test 'bad input throws' {\n\
                 expect(double('a')).toThrow()\n\
               }\n";
    let out = tjs(src, &options(RunTestsMode::Run)).unwrap();
    let report = out.test_results.unwrap();
    assert_eq!(report.failed, 0, "results: {:?}", report.results);
}
