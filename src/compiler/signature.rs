//! Function signatures and `fn.__tjs` metadata.
//!
//! The serialized shape is stable and consumed by JS hosts and by the tool
//! descriptor layer: `{ params: { name: { type, required, default?, example?,
//! description? } }, returns?, safe?, unsafe?, safeReturn?, unsafeReturn?,
//! description? }`.

use crate::compiler::ast::Function;
use crate::compiler::diagnostics::{CompileResult, SyntaxError};
use crate::compiler::infer::{infer_type_from_example, literal_value, Type};
use crate::compiler::parser::parse_expression_source;
use crate::compiler::preprocess::{Preprocessed, ReturnPolicy};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub ty: Type,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FunctionSignature {
    #[serde(skip)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "params")]
    pub parameters: IndexMap<String, ParamSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<Type>,
    #[serde(rename = "safe", skip_serializing_if = "Option::is_none")]
    pub is_safe: Option<bool>,
    #[serde(rename = "unsafe", skip_serializing_if = "Option::is_none")]
    pub is_unsafe: Option<bool>,
    #[serde(rename = "safeReturn", skip_serializing_if = "Option::is_none")]
    pub safe_return: Option<bool>,
    #[serde(rename = "unsafeReturn", skip_serializing_if = "Option::is_none")]
    pub unsafe_return: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl FunctionSignature {
    /// Positional example values for the signature test, in parameter order.
    pub fn example_args(&self) -> Vec<Value> {
        self.parameters
            .values()
            .map(|p| {
                p.example
                    .clone()
                    .or_else(|| p.default.clone())
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

/// Build the signature for one function out of its AST and the preprocessor
/// findings. `primary` selects whether the module's captured return type
/// applies to this function.
pub fn build_signature(
    f: &Function,
    pre: &Preprocessed,
    primary: bool,
) -> CompileResult<FunctionSignature> {
    let required = pre.required_params.get(&f.name);
    let mut parameters = IndexMap::new();
    for param in &f.params {
        let is_required = required.is_some_and(|set| set.contains(&param.name));
        let (ty, value) = match &param.default {
            Some(expr) => {
                let ty = infer_type_from_example(expr).ok_or_else(|| {
                    SyntaxError::new(
                        format!(
                            "Parameter '{}' needs a literal example value",
                            param.name
                        ),
                        param.span.line,
                        param.span.column,
                    )
                })?;
                (ty, literal_value(expr))
            }
            None => (Type::any(), None),
        };
        parameters.insert(
            param.name.clone(),
            ParamSpec {
                ty,
                required: is_required,
                default: if is_required { None } else { value.clone() },
                example: value,
                description: f.param_docs.get(&param.name).cloned(),
            },
        );
    }

    let returns = if primary {
        match &pre.return_type {
            Some(text) => {
                let expr = parse_expression_source(text).map_err(|e| {
                    SyntaxError::new(
                        format!("Invalid return type example: {}", e.message),
                        f.span.line,
                        f.span.column,
                    )
                })?;
                infer_type_from_example(&expr)
            }
            None => None,
        }
    } else {
        None
    };

    let is_unsafe = pre.unsafe_functions.contains(&f.name);
    let is_safe = pre.safe_functions.contains(&f.name);
    Ok(FunctionSignature {
        name: f.name.clone(),
        description: f.description.clone(),
        parameters,
        returns,
        is_safe: is_safe.then_some(true),
        is_unsafe: is_unsafe.then_some(true),
        safe_return: (primary && pre.return_policy == ReturnPolicy::CheckRuntime)
            .then_some(true),
        unsafe_return: (primary && pre.return_policy == ReturnPolicy::Skip).then_some(true),
        source: None,
    })
}

/// The literal return example value for the primary function, when it is a
/// plain literal (union examples have no single value).
pub fn return_example(pre: &Preprocessed) -> Option<Value> {
    let text = pre.return_type.as_ref()?;
    let expr = parse_expression_source(text).ok()?;
    literal_value(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_module;
    use crate::compiler::preprocess::preprocess;
    use serde_json::json;

    fn signature_of(src: &str) -> FunctionSignature {
        let pre = preprocess(src).unwrap();
        let program = parse_module(&pre.source).unwrap();
        let f = program.functions()[0];
        build_signature(f, &pre, true).unwrap()
    }

    #[test]
    fn required_and_optional_params() {
        let sig = signature_of("function add(a: 1, b = 2) -> 3 { return a + b }");
        assert!(sig.parameters["a"].required);
        assert!(!sig.parameters["b"].required);
        assert_eq!(sig.parameters["a"].example, Some(json!(1)));
        assert_eq!(sig.parameters["b"].default, Some(json!(2)));
        assert!(sig.returns.is_some());
    }

    #[test]
    fn metadata_shape() {
        let sig = signature_of("function double(x: 5) -> 10 { return x * 2 }");
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["params"]["x"]["type"]["kind"], "integer");
        assert_eq!(json["params"]["x"]["required"], true);
        assert_eq!(json["returns"]["kind"], "integer");
        assert!(json.get("unsafe").is_none());
    }

    #[test]
    fn unsafe_marker_flows_into_signature() {
        let sig = signature_of("function fast(! x = 1) { return x }");
        assert_eq!(sig.is_unsafe, Some(true));
    }

    #[test]
    fn return_policy_flags() {
        let sig = signature_of("function f(x: 1) -? 1 { return x }");
        assert_eq!(sig.safe_return, Some(true));
        let sig = signature_of("function f(x: 1) -! 1 { return x }");
        assert_eq!(sig.unsafe_return, Some(true));
    }

    #[test]
    fn example_args_in_order() {
        let sig = signature_of("function f(a: 1, b: 's', c = true) { return a }");
        assert_eq!(sig.example_args(), vec![json!(1), json!("s"), json!(true)]);
    }

    #[test]
    fn param_docs_attach() {
        let sig = signature_of(
            "/**\n * Doubles.\n * @param x - input value\n */\nfunction double(x: 5) -> 10 { return x * 2 }",
        );
        assert_eq!(sig.description.as_deref(), Some("Doubles."));
        assert_eq!(
            sig.parameters["x"].description.as_deref(),
            Some("input value")
        );
    }
}
