//! Collection atoms: `map`, `filter`, `find`, `reduce`.
//!
//! Each takes an iterable, a bound name, and a child body executed in a
//! fresh scope per element; bodies end in a `return` whose output is the
//! lambda's value. Iteration is strictly sequential.

use crate::vm::atoms::flow::{atom_error, truthy};
use crate::vm::atoms::{bind_result, Atom, AtomRegistry, UNIT_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::is_error;
use crate::vm::execute_node;
use crate::vm::node::{resolve_field, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(Map));
    registry.register(Arc::new(Filter));
    registry.register(Arc::new(Find));
    registry.register(Arc::new(Reduce));
}

/// Resolve the `items` field to a concrete array.
fn items_of(node: &Node, ctx: &RuntimeContext, op: &str) -> Result<Vec<Value>, Value> {
    let items = resolve_field(node, "items", ctx);
    if is_error(&items) {
        return Err(items);
    }
    match items {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(atom_error(
            op,
            format!(
                "{} expects an array, got {}",
                op,
                crate::vm::error::type_of(&other)
            ),
        )),
    }
}

/// What one body execution did in its child scope.
struct BodyOutcome {
    output: Option<Value>,
    returned: bool,
    broke: bool,
}

/// Run a lambda body over one element in a child scope. Returns the scope's
/// outcome (or an error). Loop-control flags propagate out for for-of bodies.
async fn run_body(
    node: &Node,
    ctx: &mut RuntimeContext,
    bindings: &[(&str, Value)],
    index: usize,
) -> Result<BodyOutcome, Value> {
    let mut child = ctx.child_scope();
    for (name, value) in bindings {
        child.state.insert(name.to_string(), value.clone());
    }
    child
        .state
        .insert("__index".to_string(), json!(index));
    for stmt in node.children("body") {
        execute_node(&stmt, &mut child).await;
        if child.flow_interrupted() {
            break;
        }
    }
    if let Some(err) = child.error.take() {
        return Err(err);
    }
    Ok(BodyOutcome {
        output: child.output,
        returned: child.returned,
        broke: child.broke,
    })
}

struct Map;

#[async_trait]
impl Atom for Map {
    fn op(&self) -> &str {
        "map"
    }

    fn docs(&self) -> &str {
        "Transform each element through a lambda body in its own scope"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {},
                "as": { "type": "string" },
                "body": { "type": "array" }
            },
            "required": ["items", "as", "body"]
        })
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let items = items_of(node, ctx, "map")?;
        let bound = node.str_field("as").unwrap_or("item").to_string();
        // for-of bodies run in loop mode: a return returns from the function.
        let loop_mode = node.get("loop").and_then(Value::as_bool) == Some(true);
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let outcome = run_body(node, ctx, &[(bound.as_str(), item)], i).await?;
            if loop_mode {
                if outcome.returned {
                    ctx.returned = true;
                    ctx.output = outcome.output;
                    return Ok(());
                }
                if outcome.broke {
                    break;
                }
                continue;
            }
            out.push(outcome.output.unwrap_or(Value::Null));
            if outcome.broke {
                break;
            }
        }
        if loop_mode {
            return Ok(());
        }
        bind_result(node, ctx, Value::Array(out))
    }
}

struct Filter;

#[async_trait]
impl Atom for Filter {
    fn op(&self) -> &str {
        "filter"
    }

    fn docs(&self) -> &str {
        "Keep elements whose lambda body yields a truthy value"
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let items = items_of(node, ctx, "filter")?;
        let bound = node.str_field("as").unwrap_or("item").to_string();
        let mut out = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let outcome = run_body(node, ctx, &[(bound.as_str(), item.clone())], i).await?;
            if outcome.output.map(|v| truthy(&v)).unwrap_or(false) {
                out.push(item);
            }
            if outcome.broke {
                break;
            }
        }
        bind_result(node, ctx, Value::Array(out))
    }
}

struct Find;

#[async_trait]
impl Atom for Find {
    fn op(&self) -> &str {
        "find"
    }

    fn docs(&self) -> &str {
        "First element whose lambda body yields a truthy value, else null"
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let items = items_of(node, ctx, "find")?;
        let bound = node.str_field("as").unwrap_or("item").to_string();
        let mut found = Value::Null;
        for (i, item) in items.into_iter().enumerate() {
            let outcome = run_body(node, ctx, &[(bound.as_str(), item.clone())], i).await?;
            if outcome.output.map(|v| truthy(&v)).unwrap_or(false) {
                found = item;
                break;
            }
            if outcome.broke {
                break;
            }
        }
        bind_result(node, ctx, found)
    }
}

struct Reduce;

#[async_trait]
impl Atom for Reduce {
    fn op(&self) -> &str {
        "reduce"
    }

    fn docs(&self) -> &str {
        "Fold elements through a lambda body carrying an accumulator"
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let items = items_of(node, ctx, "reduce")?;
        let bound = node.str_field("as").unwrap_or("item").to_string();
        let acc_name = node.str_field("accumulator").unwrap_or("acc").to_string();
        let mut acc = resolve_field(node, "initial", ctx);
        if is_error(&acc) {
            return Err(acc);
        }
        for (i, item) in items.into_iter().enumerate() {
            let outcome = run_body(
                node,
                ctx,
                &[(acc_name.as_str(), acc.clone()), (bound.as_str(), item)],
                i,
            )
            .await?;
            acc = outcome.output.unwrap_or(acc);
            if outcome.broke {
                break;
            }
        }
        bind_result(node, ctx, acc)
    }
}
