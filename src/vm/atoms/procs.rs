//! Procedure atoms: store/release/sweep ASTs in the process-wide procedure
//! store, and `agentRun` to execute a stored (or inline) AST as a
//! sub-program sharing the caller's fuel, signal and capabilities.

use crate::vm::atoms::flow::atom_error;
use crate::vm::atoms::{bind_result, Atom, AtomRegistry, IO_COST, UNIT_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::is_error;
use crate::vm::execute_node;
use crate::vm::node::{resolve_field, Node};
use crate::vm::procedures;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(StoreProcedure));
    registry.register(Arc::new(ReleaseProcedure));
    registry.register(Arc::new(ClearExpiredProcedures));
    registry.register(Arc::new(AgentRun));
}

struct StoreProcedure;

#[async_trait]
impl Atom for StoreProcedure {
    fn op(&self) -> &str {
        "storeProcedure"
    }

    fn docs(&self) -> &str {
        "Store an atom AST, returning a TTL-bounded proc_ token"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ast": { "type": "object" },
                "ttl": { "type": "number" },
                "maxSize": { "type": "number" }
            },
            "required": ["ast"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let ast = node
            .get("ast")
            .cloned()
            .ok_or_else(|| atom_error("storeProcedure", "storeProcedure requires an 'ast'"))?;
        let ttl = resolve_field(node, "ttl", ctx).as_f64().map(|f| f as u64);
        let max_size = resolve_field(node, "maxSize", ctx)
            .as_f64()
            .map(|f| f as usize);
        let token = procedures::store_procedure(ast, ttl, max_size)?;
        bind_result(node, ctx, Value::String(token))
    }
}

struct ReleaseProcedure;

#[async_trait]
impl Atom for ReleaseProcedure {
    fn op(&self) -> &str {
        "releaseProcedure"
    }

    fn docs(&self) -> &str {
        "Drop a stored procedure; true when it existed"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "token": { "type": "string" } },
            "required": ["token"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let token = resolve_field(node, "token", ctx);
        if is_error(&token) {
            return Err(token);
        }
        let released = token
            .as_str()
            .map(procedures::release_procedure)
            .unwrap_or(false);
        bind_result(node, ctx, Value::Bool(released))
    }
}

struct ClearExpiredProcedures;

#[async_trait]
impl Atom for ClearExpiredProcedures {
    fn op(&self) -> &str {
        "clearExpiredProcedures"
    }

    fn docs(&self) -> &str {
        "Eagerly sweep expired procedures, returning the count removed"
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let count = procedures::clear_expired();
        bind_result(node, ctx, json!(count))
    }
}

struct AgentRun;

#[async_trait]
impl Atom for AgentRun {
    fn op(&self) -> &str {
        "agentRun"
    }

    fn docs(&self) -> &str {
        "Run a sub-agent from an inline AST or a proc_ token"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": { "description": "Inline atom AST or proc_ token" },
                "input": { "type": "object" }
            },
            "required": ["agent"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        IO_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let agent = node
            .get("agent")
            .or_else(|| node.get("agentId"))
            .cloned()
            .ok_or_else(|| atom_error("agentRun", "agentRun requires an 'agent'"))?;
        let ast = match &agent {
            Value::String(s) if procedures::is_token(s) => procedures::get_procedure(s)?,
            Value::String(s) => {
                // A state variable may hold the token or the AST.
                match ctx.lookup(s).cloned() {
                    Some(Value::String(token)) if procedures::is_token(&token) => {
                        procedures::get_procedure(&token)?
                    }
                    Some(v @ Value::Object(_)) => v,
                    _ => {
                        return Err(atom_error(
                            "agentRun",
                            format!("No procedure or AST named '{}'", s),
                        ))
                    }
                }
            }
            v @ Value::Object(_) => {
                if v.get("$expr").is_some() {
                    let resolved = resolve_field(node, "agent", ctx);
                    if is_error(&resolved) {
                        return Err(resolved);
                    }
                    match resolved {
                        Value::String(token) if procedures::is_token(&token) => {
                            procedures::get_procedure(&token)?
                        }
                        v @ Value::Object(_) => v,
                        other => {
                            return Err(atom_error(
                                "agentRun",
                                format!(
                                    "agentRun expects an AST or token, got {}",
                                    crate::vm::error::type_of(&other)
                                ),
                            ))
                        }
                    }
                } else {
                    v.clone()
                }
            }
            other => {
                return Err(atom_error(
                    "agentRun",
                    format!(
                        "agentRun expects an AST or token, got {}",
                        crate::vm::error::type_of(other)
                    ),
                ))
            }
        };

        let input = resolve_field(node, "input", ctx);
        if is_error(&input) {
            return Err(input);
        }

        // Sub-agents share fuel, signal, capabilities and the atom table,
        // but start from a clean scope with their own arguments.
        let root = Node::try_from(ast)?;
        let mut sub = RuntimeContext::new(
            ctx.fuel.clone(),
            Arc::clone(&ctx.costs),
            input,
            ctx.capabilities.clone(),
            Arc::clone(&ctx.atoms),
            ctx.signal.clone(),
            ctx.trace.clone(),
        );
        execute_node(&root, &mut sub).await;
        if let Some(err) = sub.error.take() {
            return Err(err);
        }
        bind_result(node, ctx, sub.output.unwrap_or(Value::Null))
    }
}
