//! The `testAssert` atom — the lowering target for `expect(x).matcher(y)`
//! statements inside `test` blocks. A failed assertion is a monadic error
//! that the test runner reports against the block's description.

use crate::vm::atoms::flow::truthy;
use crate::vm::atoms::{Atom, AtomRegistry, UNIT_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::{is_error, monadic_error_with};
use crate::vm::expr::{deep_equals, js_string};
use crate::vm::node::{resolve_field, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(TestAssert));
}

struct TestAssert;

#[async_trait]
impl Atom for TestAssert {
    fn op(&self) -> &str {
        "testAssert"
    }

    fn docs(&self) -> &str {
        "Assert a value against an expect() matcher"
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let matcher = node.str_field("matcher").unwrap_or("toBe");
        let actual = resolve_field(node, "actual", ctx);
        // toThrow is the one matcher where an error value is the expectation.
        if matcher != "toThrow" && is_error(&actual) {
            return Err(actual);
        }
        let expected = resolve_field(node, "expected", ctx);
        if is_error(&expected) {
            return Err(expected);
        }

        let passed = match matcher {
            "toBe" | "toEqual" => deep_equals(&actual, &expected),
            "toContain" => match &actual {
                Value::Array(items) => items.iter().any(|i| deep_equals(i, &expected)),
                Value::String(s) => s.contains(&js_string(&expected)),
                _ => false,
            },
            "toBeTruthy" => truthy(&actual),
            "toBeFalsy" => !truthy(&actual),
            "toBeNull" | "toBeUndefined" => actual.is_null(),
            "toThrow" => is_error(&actual),
            "toBeGreaterThan" => matches!(
                (actual.as_f64(), expected.as_f64()),
                (Some(a), Some(b)) if a > b
            ),
            "toBeLessThan" => matches!(
                (actual.as_f64(), expected.as_f64()),
                (Some(a), Some(b)) if a < b
            ),
            other => {
                return Err(monadic_error_with(
                    format!("Unknown matcher '{}'", other),
                    json!({ "op": "testAssert" }),
                ))
            }
        };
        if !passed {
            return Err(monadic_error_with(
                format!(
                    "Expected {} {} {}",
                    serde_json::to_string(&actual).unwrap_or_else(|_| js_string(&actual)),
                    matcher,
                    serde_json::to_string(&expected).unwrap_or_default()
                ),
                json!({ "op": "testAssert", "matcher": matcher }),
            ));
        }
        Ok(())
    }
}
