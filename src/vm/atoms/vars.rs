//! Variable atoms: `varSet`, `constSet`, `varsImport`, `propSet`,
//! `validateArgs`, and the mutating `methodCall` statement form.

use crate::vm::atoms::{bind_result, Atom, AtomRegistry, FLOW_COST, UNIT_COST};
use crate::vm::atoms::flow::atom_error;
use crate::vm::context::RuntimeContext;
use crate::vm::error::is_error;
use crate::vm::expr::{deep_equals, js_string};
use crate::vm::node::{resolve_field, resolve_value, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(VarSet));
    registry.register(Arc::new(ConstSet));
    registry.register(Arc::new(VarsImport));
    registry.register(Arc::new(PropSet));
    registry.register(Arc::new(ValidateArgs));
    registry.register(Arc::new(MethodCall));
}

struct VarSet;

#[async_trait]
impl Atom for VarSet {
    fn op(&self) -> &str {
        "varSet"
    }

    fn docs(&self) -> &str {
        "Write a value into scope state"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "value": {}
            },
            "required": ["name", "value"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let name = node
            .str_field("name")
            .ok_or_else(|| atom_error("varSet", "varSet requires a 'name'"))?;
        let value = resolve_field(node, "value", ctx);
        if is_error(&value) {
            return Err(value);
        }
        ctx.set_var(name, value)
    }
}

struct ConstSet;

#[async_trait]
impl Atom for ConstSet {
    fn op(&self) -> &str {
        "constSet"
    }

    fn docs(&self) -> &str {
        "Bind a write-once value into scope state"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let name = node
            .str_field("name")
            .ok_or_else(|| atom_error("constSet", "constSet requires a 'name'"))?;
        let value = resolve_field(node, "value", ctx);
        if is_error(&value) {
            return Err(value);
        }
        ctx.set_const(name, value)
    }
}

struct VarsImport;

#[async_trait]
impl Atom for VarsImport {
    fn op(&self) -> &str {
        "varsImport"
    }

    fn docs(&self) -> &str {
        "Copy named arguments into state, applying defaults for absent ones"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let names: Vec<String> = node
            .get("names")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        for name in &names {
            if let Some(v) = ctx.args.get(name) {
                ctx.state.insert(name.clone(), v.clone());
            }
        }
        if let Some(defaults) = node.get("defaults").and_then(Value::as_object).cloned() {
            for (name, default) in defaults {
                if !ctx.state.contains_key(&name) {
                    let v = resolve_value(&default, ctx);
                    if is_error(&v) {
                        return Err(v);
                    }
                    ctx.state.insert(name, v);
                }
            }
        }
        Ok(())
    }
}

/// Write through a property path on a state variable (`o.a.b = v`,
/// `xs[0] = v`). Mutating through a const binding is allowed, as in JS.
struct PropSet;

#[async_trait]
impl Atom for PropSet {
    fn op(&self) -> &str {
        "propSet"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let target = node
            .str_field("target")
            .ok_or_else(|| atom_error("propSet", "propSet requires a 'target'"))?
            .to_string();
        let value = resolve_field(node, "value", ctx);
        if is_error(&value) {
            return Err(value);
        }
        let path: Vec<Value> = node
            .get("path")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let keys: Vec<Value> = path.iter().map(|p| resolve_value(p, ctx)).collect();

        let Some(root) = ctx.state.get_mut(&target) else {
            return Err(atom_error(
                "propSet",
                format!("Unknown variable '{}'", target),
            ));
        };
        let mut cursor = root;
        for (i, key) in keys.iter().enumerate() {
            let last = i == keys.len() - 1;
            match cursor {
                Value::Object(map) => {
                    let k = js_string(key);
                    if last {
                        map.insert(k, value);
                        return Ok(());
                    }
                    cursor = map.entry(k).or_insert(Value::Null);
                }
                Value::Array(items) => {
                    let idx = key.as_f64().unwrap_or(-1.0);
                    if idx < 0.0 || idx as usize >= items.len() {
                        return Err(atom_error("propSet", "Array index out of range"));
                    }
                    if last {
                        items[idx as usize] = value;
                        return Ok(());
                    }
                    cursor = &mut items[idx as usize];
                }
                _ => {
                    return Err(atom_error(
                        "propSet",
                        format!("Cannot set property on {}", crate::vm::error::type_of(cursor)),
                    ))
                }
            }
        }
        Err(atom_error("propSet", "propSet requires a non-empty path"))
    }
}

/// Check `ctx.args` against the function signature carried on the node.
struct ValidateArgs;

#[async_trait]
impl Atom for ValidateArgs {
    fn op(&self) -> &str {
        "validateArgs"
    }

    fn docs(&self) -> &str {
        "Validate run arguments against the compiled signature"
    }

    fn cost(&self, _node: &Node) -> f64 {
        FLOW_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let Some(meta) = node.get("meta") else {
            return Ok(());
        };
        let sig: crate::compiler::signature::FunctionSignature =
            serde_json::from_value(meta.clone())
                .map_err(|e| atom_error("validateArgs", format!("Bad signature: {}", e)))?;
        if let Some(err) = crate::vm::error::validate_args(&ctx.args, &sig) {
            return Err(err);
        }
        Ok(())
    }
}

/// Statement-form method call that mutates a state variable in place
/// (`xs.push(1)`, `xs.pop()`, …). Pure method calls live in the expression
/// evaluator instead.
struct MethodCall;

#[async_trait]
impl Atom for MethodCall {
    fn op(&self) -> &str {
        "methodCall"
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let target = node
            .str_field("target")
            .ok_or_else(|| atom_error("methodCall", "methodCall requires a 'target'"))?
            .to_string();
        let method = node
            .str_field("method")
            .ok_or_else(|| atom_error("methodCall", "methodCall requires a 'method'"))?
            .to_string();
        let args: Vec<Value> = node
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().map(|v| resolve_value(v, ctx)).collect())
            .unwrap_or_default();
        for a in &args {
            if is_error(a) {
                return Err(a.clone());
            }
        }

        let Some(Value::Array(items)) = ctx.state.get_mut(&target) else {
            return Err(atom_error(
                "methodCall",
                format!("'{}' is not an array variable", target),
            ));
        };
        let result = match method.as_str() {
            "push" => {
                items.extend(args);
                json!(items.len())
            }
            "pop" => items.pop().unwrap_or(Value::Null),
            "shift" => {
                if items.is_empty() {
                    Value::Null
                } else {
                    items.remove(0)
                }
            }
            "unshift" => {
                for (i, a) in args.into_iter().enumerate() {
                    items.insert(i, a);
                }
                json!(items.len())
            }
            "splice" => {
                let start = args
                    .first()
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
                    .clamp(0.0, items.len() as f64) as usize;
                let count = args
                    .get(1)
                    .and_then(Value::as_f64)
                    .unwrap_or((items.len() - start) as f64)
                    .clamp(0.0, (items.len() - start) as f64) as usize;
                let removed: Vec<Value> = items.drain(start..start + count).collect();
                for (i, a) in args.into_iter().skip(2).enumerate() {
                    items.insert(start + i, a);
                }
                Value::Array(removed)
            }
            "sort" => {
                items.sort_by(|a, b| {
                    js_string(a)
                        .partial_cmp(&js_string(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                Value::Array(items.clone())
            }
            "reverse" => {
                items.reverse();
                Value::Array(items.clone())
            }
            "includes" => json!(args
                .first()
                .map(|a| items.iter().any(|i| deep_equals(i, a)))
                .unwrap_or(false)),
            other => {
                return Err(atom_error(
                    "methodCall",
                    format!("Unsupported mutating method '{}'", other),
                ))
            }
        };
        bind_result(node, ctx, result)
    }
}
