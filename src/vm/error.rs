//! Monadic error values.
//!
//! Runtime failures inside the VM are data, not exceptions: any value of
//! shape `{ $error: true, message, op?, path?, cause?, stack? }` flowing
//! through state or atom inputs short-circuits execution until a `try`
//! boundary. These helpers are also the embedding surface for Rust hosts.

use crate::compiler::infer::{check_type, type_to_string};
use crate::compiler::signature::FunctionSignature;
use serde_json::{json, Value};

/// True when `v` is a monadic error value.
pub fn is_error(v: &Value) -> bool {
    v.get("$error").and_then(Value::as_bool) == Some(true)
}

/// Build a monadic error.
pub fn monadic_error(message: impl Into<String>, op: Option<&str>) -> Value {
    let mut e = json!({ "$error": true, "message": message.into() });
    if let Some(op) = op {
        e["op"] = json!(op);
    }
    e
}

/// Build a monadic error with extra detail fields merged in.
pub fn monadic_error_with(message: impl Into<String>, details: Value) -> Value {
    let mut e = json!({ "$error": true, "message": message.into() });
    if let Some(map) = details.as_object() {
        for (k, v) in map {
            e[k.as_str()] = v.clone();
        }
    }
    e
}

/// The JS-style kind name of a value, as seen in diagnostics.
pub fn type_of(v: &Value) -> &'static str {
    crate::compiler::infer::value_kind(v)
}

/// Convert a capability failure into a monadic error tagged with the atom op.
pub fn capability_error(op: &str, err: anyhow::Error) -> Value {
    tracing::warn!(op, error = %err, "capability call failed");
    monadic_error_with(err.to_string(), json!({ "op": op, "capability": true }))
}

pub fn capability_missing(op: &str, domain: &str) -> Value {
    monadic_error_with(
        format!("Capability '{}' is not installed", domain),
        json!({ "op": op }),
    )
}

pub fn fuel_error() -> Value {
    monadic_error("Fuel budget exhausted", Some("fuel"))
}

pub fn timeout_error() -> Value {
    monadic_error(
        "Execution timeout: fuel budget exceeded",
        Some("vm.run"),
    )
}

pub fn unknown_atom_error(op: &str) -> Value {
    monadic_error_with(format!("Unknown atom '{}'", op), json!({ "op": op }))
}

/// Validate named arguments against a signature. Returns the offending
/// monadic error, or `None` when everything checks out. Upstream errors in
/// arguments propagate unchanged.
pub fn validate_args(args: &Value, meta: &FunctionSignature) -> Option<Value> {
    for (name, spec) in &meta.parameters {
        let v = args.get(name);
        if let Some(v) = v {
            if is_error(v) {
                return Some(v.clone());
            }
        }
        match v {
            None | Some(Value::Null) if spec.required => {
                // Null is a legal value for nullable types; absence is not.
                if v.is_none() {
                    return Some(monadic_error(
                        format!("Missing required parameter '{}'", name),
                        None,
                    ));
                }
                if !check_type(v.unwrap(), &spec.ty) {
                    return Some(param_type_error(name, spec_expected(meta, name), v.unwrap()));
                }
            }
            None => {}
            Some(v) => {
                if !check_type(v, &spec.ty) {
                    return Some(param_type_error(name, spec_expected(meta, name), v));
                }
            }
        }
    }
    None
}

fn spec_expected(meta: &FunctionSignature, name: &str) -> String {
    meta.parameters
        .get(name)
        .map(|s| {
            // Diagnostics use the collapsed number kind, matching emitted JS.
            let mut t = s.ty.clone();
            if t.kind == crate::compiler::infer::TypeKind::Integer {
                t.kind = crate::compiler::infer::TypeKind::Number;
            }
            type_to_string(&t)
        })
        .unwrap_or_else(|| "any".to_string())
}

fn param_type_error(name: &str, expected: String, actual: &Value) -> Value {
    monadic_error_with(
        format!(
            "Expected {} for {}, got {}",
            expected,
            name,
            type_of(actual)
        ),
        json!({ "path": name, "op": "type-error" }),
    )
}
