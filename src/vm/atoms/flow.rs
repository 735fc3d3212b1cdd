//! Flow-control atoms: `seq`, `if`, `while`, `return`, `try`, `break`,
//! `continue`, and the fallback `call` atom for unresolved functions.

use crate::vm::atoms::{Atom, AtomRegistry, FLOW_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::{monadic_error, monadic_error_with, timeout_error};
use crate::vm::execute_node;
use crate::vm::node::{resolve_field, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(Seq));
    registry.register(Arc::new(If));
    registry.register(Arc::new(While));
    registry.register(Arc::new(Return));
    registry.register(Arc::new(Try));
    registry.register(Arc::new(Break));
    registry.register(Arc::new(Continue));
    registry.register(Arc::new(Call));
}

struct Seq;

#[async_trait]
impl Atom for Seq {
    fn op(&self) -> &str {
        "seq"
    }

    fn docs(&self) -> &str {
        "Execute child nodes in order, honoring monadic short-circuit"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        for child in node.children("children") {
            execute_node(&child, ctx).await;
            if ctx.flow_interrupted() {
                break;
            }
        }
        Ok(())
    }
}

struct If;

#[async_trait]
impl Atom for If {
    fn op(&self) -> &str {
        "if"
    }

    fn docs(&self) -> &str {
        "Evaluate a condition expression and run the then/else branch"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "cond": { "type": "object" },
                "then": { "type": "array" },
                "else": { "type": "array" }
            },
            "required": ["cond", "then"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let cond = resolve_field(node, "cond", ctx);
        if crate::vm::error::is_error(&cond) {
            return Err(cond);
        }
        let branch = if truthy(&cond) { "then" } else { "else" };
        for child in node.children(branch) {
            execute_node(&child, ctx).await;
            if ctx.flow_interrupted() {
                break;
            }
        }
        Ok(())
    }
}

struct While;

#[async_trait]
impl Atom for While {
    fn op(&self) -> &str {
        "while"
    }

    fn docs(&self) -> &str {
        "Re-evaluate a condition each iteration, charging fuel per iteration"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let body = node.children("body");
        loop {
            if ctx.signal.is_aborted() {
                return Err(timeout_error());
            }
            // Per-iteration charge, on top of the entry charge.
            ctx.fuel.charge(FLOW_COST)?;
            let cond = resolve_field(node, "cond", ctx);
            if crate::vm::error::is_error(&cond) {
                return Err(cond);
            }
            if !truthy(&cond) {
                return Ok(());
            }
            for child in &body {
                execute_node(child, ctx).await;
                if ctx.flow_interrupted() {
                    break;
                }
            }
            if ctx.continued {
                ctx.continued = false;
                continue;
            }
            if ctx.broke {
                ctx.broke = false;
                return Ok(());
            }
            if ctx.returned || ctx.error.is_some() {
                return Ok(());
            }
        }
    }
}

struct Return;

#[async_trait]
impl Atom for Return {
    fn op(&self) -> &str {
        "return"
    }

    fn docs(&self) -> &str {
        "Set the run output and stop the enclosing sequence"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        ctx.returned = true;
        // A pending error wins over the return value.
        if ctx.error.is_some() {
            return Ok(());
        }
        let output = if node.get("value").is_some() {
            resolve_field(node, "value", ctx)
        } else if let Some(schema) = node.get("schema").and_then(Value::as_object) {
            // Schema-shaped projection of state.
            let mut out = serde_json::Map::new();
            for key in schema.keys() {
                out.insert(
                    key.clone(),
                    ctx.lookup(key).cloned().unwrap_or(Value::Null),
                );
            }
            Value::Object(out)
        } else {
            Value::Null
        };
        if crate::vm::error::is_error(&output) {
            ctx.error = Some(output);
            return Ok(());
        }
        ctx.output = Some(output);
        Ok(())
    }
}

struct Try;

#[async_trait]
impl Atom for Try {
    fn op(&self) -> &str {
        "try"
    }

    fn docs(&self) -> &str {
        "Run a body in a child scope; on error, run the catch body with the error bound"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        // An error already in flight is captured here too; the try body is
        // skipped in that case.
        let mut caught = ctx.error.take();

        if caught.is_none() {
            let mut try_ctx = ctx.child_scope();
            for child in node.children("try") {
                execute_node(&child, &mut try_ctx).await;
                if try_ctx.flow_interrupted() {
                    break;
                }
            }
            if let Some(err) = try_ctx.error.take() {
                caught = Some(err);
            } else {
                promote_result(node, &try_ctx, ctx)?;
                if try_ctx.returned {
                    ctx.returned = true;
                    ctx.output = try_ctx.output;
                }
                return Ok(());
            }
        }

        let Some(err) = caught else {
            return Ok(());
        };
        let mut catch_ctx = ctx.child_scope();
        let bound = node.str_field("as").unwrap_or("error");
        catch_ctx.state.insert(bound.to_string(), err);
        for child in node.children("catch") {
            execute_node(&child, &mut catch_ctx).await;
            if catch_ctx.flow_interrupted() {
                break;
            }
        }
        if let Some(err) = catch_ctx.error.take() {
            ctx.error = Some(err);
            return Ok(());
        }
        promote_result(node, &catch_ctx, ctx)?;
        if catch_ctx.returned {
            ctx.returned = true;
            ctx.output = catch_ctx.output;
        }
        Ok(())
    }
}

/// Copy the designated result variable from a finished child scope.
fn promote_result(
    node: &Node,
    child: &RuntimeContext,
    parent: &mut RuntimeContext,
) -> Result<(), Value> {
    if let Some(name) = node.result_name() {
        let value = child.lookup(name).cloned().unwrap_or(Value::Null);
        parent.set_var(name, value)?;
    }
    Ok(())
}

struct Break;

#[async_trait]
impl Atom for Break {
    fn op(&self) -> &str {
        "break"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, _node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        ctx.broke = true;
        Ok(())
    }
}

struct Continue;

#[async_trait]
impl Atom for Continue {
    fn op(&self) -> &str {
        "continue"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, _node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        ctx.continued = true;
        Ok(())
    }
}

/// Function calls by name. When the scope binds the name to a compiled
/// function value (`{ "$proc": ast, "params": [...] }`, as the test runner
/// installs for module functions), the call runs it as a sub-program with
/// positional arguments mapped onto parameter names. Anything else is a
/// monadic unknown-function error — which is also how the signature-test
/// runner detects unresolved references and skips the test.
struct Call;

#[async_trait]
impl Atom for Call {
    fn op(&self) -> &str {
        "call"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let name = node.str_field("name").unwrap_or("?").to_string();
        let Some(bound) = ctx.lookup(&name).cloned() else {
            return Err(monadic_error_with(
                format!("Unknown function '{}'", name),
                json!({ "op": "call" }),
            ));
        };
        let Some(ast) = bound.get("$proc").cloned() else {
            return Err(monadic_error_with(
                format!("'{}' is not callable", name),
                json!({ "op": "call" }),
            ));
        };
        let params: Vec<String> = bound
            .get("params")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut positional = Vec::new();
        if let Some(args) = node.get("args").and_then(Value::as_array) {
            for a in args {
                let v = crate::vm::node::resolve_value(a, ctx);
                // Error arguments flow into the callee, whose validation
                // returns them unchanged (monadic left identity).
                positional.push(v);
            }
        }
        let mut named = serde_json::Map::new();
        for (i, param) in params.iter().enumerate() {
            if let Some(v) = positional.get(i) {
                named.insert(param.clone(), v.clone());
            }
        }

        let root = crate::vm::node::Node::try_from(ast)?;
        let mut sub = RuntimeContext::new(
            ctx.fuel.clone(),
            Arc::clone(&ctx.costs),
            Value::Object(named),
            ctx.capabilities.clone(),
            Arc::clone(&ctx.atoms),
            ctx.signal.clone(),
            ctx.trace.clone(),
        );
        // Callables stay visible inside the callee for recursion and
        // cross-function calls.
        for (key, value) in &ctx.state {
            if value.get("$proc").is_some() {
                sub.state.insert(key.clone(), value.clone());
            }
        }
        execute_node(&root, &mut sub).await;
        if let Some(err) = sub.error.take() {
            // Resource faults propagate; the callee's own monadic errors are
            // the call's value, observable by the caller.
            if matches!(err.get("op").and_then(Value::as_str), Some("fuel") | Some("vm.run")) {
                return Err(err);
            }
            crate::vm::atoms::bind_result(node, ctx, err)?;
            return Ok(());
        }
        crate::vm::atoms::bind_result(node, ctx, sub.output.unwrap_or(Value::Null))
    }
}

pub(crate) fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Convenience used by atoms that need a plain monadic error.
pub(crate) fn atom_error(op: &str, message: impl Into<String>) -> Value {
    monadic_error(message, Some(op))
}
