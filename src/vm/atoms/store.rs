//! Key-value store atoms. The store capability is pluggable; a per-run
//! in-memory map is installed when the host provides none.

use crate::vm::atoms::flow::atom_error;
use crate::vm::atoms::{bind_result, Atom, AtomRegistry, UNIT_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::{capability_error, capability_missing, is_error};
use crate::vm::node::{resolve_field, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(StoreGet));
    registry.register(Arc::new(StoreSet));
}

fn string_key(node: &Node, ctx: &RuntimeContext, op: &str) -> Result<String, Value> {
    let key = resolve_field(node, "key", ctx);
    if is_error(&key) {
        return Err(key);
    }
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| atom_error(op, format!("{} requires a string 'key'", op)))
}

struct StoreGet;

#[async_trait]
impl Atom for StoreGet {
    fn op(&self) -> &str {
        "storeGet"
    }

    fn docs(&self) -> &str {
        "Read a value from the key-value store (null when absent)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "key": { "type": "string" } },
            "required": ["key"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let key = string_key(node, ctx, "storeGet")?;
        let Some(store) = ctx.capabilities.store.clone() else {
            return Err(capability_missing("storeGet", "store"));
        };
        let value = store
            .get(&key)
            .await
            .map_err(|e| capability_error("storeGet", e))?;
        bind_result(node, ctx, value)
    }
}

struct StoreSet;

#[async_trait]
impl Atom for StoreSet {
    fn op(&self) -> &str {
        "storeSet"
    }

    fn docs(&self) -> &str {
        "Write a value into the key-value store"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "key": { "type": "string" }, "value": {} },
            "required": ["key", "value"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let key = string_key(node, ctx, "storeSet")?;
        let value = resolve_field(node, "value", ctx);
        if is_error(&value) {
            return Err(value);
        }
        let Some(store) = ctx.capabilities.store.clone() else {
            return Err(capability_missing("storeSet", "store"));
        };
        store
            .set(&key, value.clone())
            .await
            .map_err(|e| capability_error("storeSet", e))?;
        bind_result(node, ctx, value)
    }
}
