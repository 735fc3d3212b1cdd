//! Atom AST nodes.
//!
//! A node is a JSON object carrying an `"op"` plus atom-specific fields.
//! Keeping nodes as data (rather than a closed enum) is what makes the atom
//! table overridable: user atoms read whatever fields they define, and whole
//! programs round-trip through the procedure store unchanged.

use crate::vm::context::RuntimeContext;
use crate::vm::expr::eval_expr;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Node(Value);

impl TryFrom<Value> for Node {
    type Error = Value;

    fn try_from(v: Value) -> Result<Self, Value> {
        match v.get("op").and_then(Value::as_str) {
            Some(_) => Ok(Node(v)),
            None => Err(crate::vm::error::monadic_error(
                "Atom nodes must be objects with an 'op' field",
                Some("vm.run"),
            )),
        }
    }
}

impl Node {
    pub fn op(&self) -> &str {
        self.0.get("op").and_then(Value::as_str).unwrap_or("")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Child node list under `key` (e.g. `children`, `then`, `body`).
    pub fn children(&self, key: &str) -> Vec<Node> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().cloned().filter_map(|v| Node::try_from(v).ok()).collect())
            .unwrap_or_default()
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Name the atom's produced value binds to in the parent scope.
    pub fn result_name(&self) -> Option<&str> {
        self.str_field("result")
    }

    pub fn result_const(&self) -> bool {
        self.0.get("resultConst").and_then(Value::as_bool) == Some(true)
    }
}

/// Resolve a node field before use.
///
/// Atoms MUST route every field through here: `$expr` objects evaluate
/// against the scope, bare strings naming state variables read the variable,
/// and anything else passes through as a literal.
pub fn resolve_value(v: &Value, ctx: &RuntimeContext) -> Value {
    match v {
        Value::Object(map) if map.contains_key("$expr") => eval_expr(v, ctx),
        Value::String(name) => match ctx.lookup(name) {
            Some(value) => value.clone(),
            None => v.clone(),
        },
        other => other.clone(),
    }
}

/// Resolve an optional field, with `null` for absence.
pub fn resolve_field(node: &Node, key: &str, ctx: &RuntimeContext) -> Value {
    node.get(key)
        .map(|v| resolve_value(v, ctx))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::context::RuntimeContext;
    use serde_json::json;

    #[test]
    fn node_requires_op() {
        assert!(Node::try_from(json!({"op": "seq", "children": []})).is_ok());
        assert!(Node::try_from(json!({"children": []})).is_err());
        assert!(Node::try_from(json!(42)).is_err());
    }

    #[test]
    fn resolve_string_looks_up_state() {
        let mut ctx = RuntimeContext::for_testing();
        ctx.state.insert("x".into(), json!(42));
        assert_eq!(resolve_value(&json!("x"), &ctx), json!(42));
        assert_eq!(resolve_value(&json!("missing"), &ctx), json!("missing"));
    }

    #[test]
    fn resolve_expr_evaluates() {
        let mut ctx = RuntimeContext::for_testing();
        ctx.state.insert("n".into(), json!(4));
        let expr = json!({"$expr": "binary", "op": "*",
            "left": {"$expr": "ident", "name": "n"},
            "right": {"$expr": "literal", "value": 2}});
        assert_eq!(resolve_value(&expr, &ctx), json!(8));
    }

    #[test]
    fn resolve_literal_passthrough() {
        let ctx = RuntimeContext::for_testing();
        assert_eq!(resolve_value(&json!(7), &ctx), json!(7));
        assert_eq!(
            resolve_value(&json!({"plain": "object"}), &ctx),
            json!({"plain": "object"})
        );
    }
}
