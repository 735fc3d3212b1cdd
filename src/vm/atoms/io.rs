//! IO atoms: `httpFetch` and `sleep`. Both are suspension points; fetch
//! dispatches through the injected capability.

use crate::vm::atoms::flow::atom_error;
use crate::vm::atoms::{bind_result, Atom, AtomRegistry, IO_COST, UNIT_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::{capability_error, capability_missing, is_error};
use crate::vm::node::{resolve_field, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(HttpFetch));
    registry.register(Arc::new(Sleep));
}

struct HttpFetch;

#[async_trait]
impl Atom for HttpFetch {
    fn op(&self) -> &str {
        "httpFetch"
    }

    fn docs(&self) -> &str {
        "Perform an HTTP request through the fetch capability"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "options": {
                    "type": "object",
                    "properties": {
                        "method": { "type": "string" },
                        "headers": { "type": "object" },
                        "body": {}
                    }
                }
            },
            "required": ["url"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        IO_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let url = resolve_field(node, "url", ctx);
        if is_error(&url) {
            return Err(url);
        }
        let Some(url) = url.as_str().map(str::to_string) else {
            return Err(atom_error("httpFetch", "httpFetch requires a string 'url'"));
        };
        let options = resolve_field(node, "options", ctx);
        if is_error(&options) {
            return Err(options);
        }
        let Some(fetch) = ctx.capabilities.fetch.clone() else {
            return Err(capability_missing("httpFetch", "fetch"));
        };
        tracing::debug!(url = %url, "httpFetch");
        let response = fetch
            .fetch(&url, options)
            .await
            .map_err(|e| capability_error("httpFetch", e))?;
        bind_result(node, ctx, response)
    }
}

struct Sleep;

#[async_trait]
impl Atom for Sleep {
    fn op(&self) -> &str {
        "sleep"
    }

    fn docs(&self) -> &str {
        "Suspend the run for a number of milliseconds"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "ms": { "type": "number" } },
            "required": ["ms"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        UNIT_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let ms = resolve_field(node, "ms", ctx);
        if is_error(&ms) {
            return Err(ms);
        }
        let ms = ms.as_f64().unwrap_or(0.0).max(0.0);
        tokio::time::sleep(std::time::Duration::from_millis(ms as u64)).await;
        bind_result(node, ctx, Value::Null)
    }
}
