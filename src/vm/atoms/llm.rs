//! LLM and vector atoms, dispatching through the injected capabilities.

use crate::vm::atoms::flow::atom_error;
use crate::vm::atoms::{bind_result, Atom, AtomRegistry, IO_COST};
use crate::vm::context::RuntimeContext;
use crate::vm::error::{capability_error, capability_missing, is_error};
use crate::vm::node::{resolve_field, Node};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn register(registry: &mut AtomRegistry) {
    registry.register(Arc::new(LlmPredict));
    registry.register(Arc::new(VectorSearch));
    registry.register(Arc::new(VectorEmbed));
}

struct LlmPredict;

#[async_trait]
impl Atom for LlmPredict {
    fn op(&self) -> &str {
        "llmPredict"
    }

    fn docs(&self) -> &str {
        "Run a model completion through the llm capability"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "options": { "type": "object" }
            },
            "required": ["prompt"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        IO_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let prompt = resolve_field(node, "prompt", ctx);
        if is_error(&prompt) {
            return Err(prompt);
        }
        let Some(prompt) = prompt.as_str().map(str::to_string) else {
            return Err(atom_error(
                "llmPredict",
                "llmPredict requires a string 'prompt'",
            ));
        };
        let options = resolve_field(node, "options", ctx);
        if is_error(&options) {
            return Err(options);
        }
        let Some(llm) = ctx.capabilities.llm.clone() else {
            return Err(capability_missing("llmPredict", "llm"));
        };
        tracing::debug!(prompt_len = prompt.len(), "llmPredict");
        let value = llm
            .predict(&prompt, options)
            .await
            .map_err(|e| capability_error("llmPredict", e))?;
        bind_result(node, ctx, value)
    }
}

struct VectorSearch;

#[async_trait]
impl Atom for VectorSearch {
    fn op(&self) -> &str {
        "vectorSearch"
    }

    fn docs(&self) -> &str {
        "Similarity search through the vector capability"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {},
                "options": { "type": "object" }
            },
            "required": ["query"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        IO_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let query = resolve_field(node, "query", ctx);
        if is_error(&query) {
            return Err(query);
        }
        let options = resolve_field(node, "options", ctx);
        if is_error(&options) {
            return Err(options);
        }
        let Some(vector) = ctx.capabilities.vector.clone() else {
            return Err(capability_missing("vectorSearch", "vector"));
        };
        let value = vector
            .search(&query, options)
            .await
            .map_err(|e| capability_error("vectorSearch", e))?;
        bind_result(node, ctx, value)
    }
}

struct VectorEmbed;

#[async_trait]
impl Atom for VectorEmbed {
    fn op(&self) -> &str {
        "vectorEmbed"
    }

    fn docs(&self) -> &str {
        "Embed text through the vector capability"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    fn cost(&self, _node: &Node) -> f64 {
        IO_COST
    }

    async fn exec(&self, node: &Node, ctx: &mut RuntimeContext) -> Result<(), Value> {
        let text = resolve_field(node, "text", ctx);
        if is_error(&text) {
            return Err(text);
        }
        let Some(text) = text.as_str().map(str::to_string) else {
            return Err(atom_error(
                "vectorEmbed",
                "vectorEmbed requires a string 'text'",
            ));
        };
        let Some(vector) = ctx.capabilities.vector.clone() else {
            return Err(capability_missing("vectorEmbed", "vector"));
        };
        let value = vector
            .embed(&text)
            .await
            .map_err(|e| capability_error("vectorEmbed", e))?;
        bind_result(node, ctx, value)
    }
}
