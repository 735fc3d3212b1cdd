//! Tool-definition export.
//!
//! Renders the atom table as OpenAI-style function descriptors so hosts can
//! hand the instruction set to a model. This is the boundary where the
//! `integer` kind collapses to `"number"`.

use crate::vm::atoms::AtomRegistry;
use serde_json::{json, Value};

/// Descriptors for every atom (or the named subset).
pub fn tool_descriptors(registry: &AtomRegistry, filter: Option<&[&str]>) -> Vec<Value> {
    let mut ops = registry.ops();
    if let Some(names) = filter {
        ops.retain(|op| names.contains(&op.as_str()));
    }
    ops.iter()
        .filter_map(|op| registry.get(op))
        .map(|atom| {
            let mut parameters = atom.input_schema();
            collapse_integer(&mut parameters);
            json!({
                "type": "function",
                "function": {
                    "name": atom.op(),
                    "description": atom.docs(),
                    "parameters": parameters,
                }
            })
        })
        .collect()
}

fn collapse_integer(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("integer") {
                map.insert("type".to_string(), json!("number"));
            }
            for v in map.values_mut() {
                collapse_integer(v);
            }
        }
        Value::Array(items) => {
            for v in items {
                collapse_integer(v);
            }
        }
        _ => {}
    }
}
