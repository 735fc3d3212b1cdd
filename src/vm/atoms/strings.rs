//! String atoms. `template` concatenates literal text with evaluated
//! expression parts, binding the result; `stringConcat` is the n-ary
//! fallback for hosts building ASTs by hand.

use crate::vm::atoms::flow::atom_error;
use crate::vm::atoms::{bind_result, Atom, AtomRegistry, UNIT_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::is_error;
use crate::vm::expr::js_string;
use crate::vm::node::{resolve_value, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(Template));
    registry.register(Arc::new(StringConcat));
}

struct Template;

#[async_trait]
impl Atom for Template {
    fn op(&self) -> &str {
        "template"
    }

    fn docs(&self) -> &str {
        "Build a string from literal and expression parts"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "parts": { "type": "array" },
                "result": { "type": "string" }
            },
            "required": ["parts"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let parts = node
            .get("parts")
            .and_then(Value::as_array)
            .ok_or_else(|| atom_error("template", "template requires 'parts'"))?;
        let mut out = String::new();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            } else if let Some(expr) = part.get("expr") {
                let v = resolve_value(expr, ctx);
                if is_error(&v) {
                    return Err(v);
                }
                out.push_str(&js_string(&v));
            }
        }
        bind_result(node, ctx, Value::String(out))
    }
}

struct StringConcat;

#[async_trait]
impl Atom for StringConcat {
    fn op(&self) -> &str {
        "stringConcat"
    }

    fn docs(&self) -> &str {
        "Concatenate resolved values into one string"
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let values = node
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = String::new();
        for v in &values {
            let resolved = resolve_value(v, ctx);
            if is_error(&resolved) {
                return Err(resolved);
            }
            out.push_str(&js_string(&resolved));
        }
        bind_result(node, ctx, Value::String(out))
    }
}
