//! Type inference from example values.
//!
//! TJS types are derived solely from literal example values: `42` is an
//! integer, `'s'` a string, `[1, 2]` an array of integers, `{a: 1}` an object
//! with a shape. Unions come from `A || B` in example position. There are no
//! parametric types at this level.

use crate::compiler::ast::{ArrowBody, Expr, PropKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Array,
    Object,
    Union,
    Any,
}

/// A structural type record derived from an example value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Type>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<IndexMap<String, Type>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Type>>,
    /// Marks a type inferred from `undefined` rather than `null`.
    #[serde(
        rename = "x-tjs-undefined",
        default,
        skip_serializing_if = "is_false"
    )]
    pub undefined: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Type {
    pub fn of(kind: TypeKind) -> Self {
        Type {
            kind,
            nullable: false,
            items: None,
            shape: None,
            members: None,
            undefined: false,
        }
    }

    pub fn any() -> Self {
        Type::of(TypeKind::Any)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Build a type from union members. A `null` member does not survive as a
    /// member; it marks the remaining type nullable instead.
    pub fn union(members: Vec<Type>) -> Self {
        let had_null = members.iter().any(|m| m.kind == TypeKind::Null);
        let mut others: Vec<Type> = members
            .into_iter()
            .filter(|m| m.kind != TypeKind::Null)
            .collect();
        match others.len() {
            0 => Type::of(TypeKind::Null),
            1 => {
                let mut t = others.pop().unwrap();
                t.nullable = t.nullable || had_null;
                t
            }
            _ => {
                let mut t = Type::of(TypeKind::Union);
                t.members = Some(others);
                t.nullable = had_null;
                t
            }
        }
    }
}

/// Derive a semantic type from an example value.
pub fn infer_type(v: &Value) -> Type {
    match v {
        Value::Null => Type::of(TypeKind::Null),
        Value::Bool(_) => Type::of(TypeKind::Boolean),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0) {
                Type::of(TypeKind::Integer)
            } else {
                Type::of(TypeKind::Number)
            }
        }
        Value::String(_) => Type::of(TypeKind::String),
        Value::Array(items) => {
            let mut t = Type::of(TypeKind::Array);
            t.items = Some(Box::new(match items.first() {
                Some(first) => infer_type(first),
                None => Type::any(),
            }));
            t
        }
        Value::Object(map) => {
            let mut t = Type::of(TypeKind::Object);
            t.shape = Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), infer_type(v)))
                    .collect(),
            );
            t
        }
    }
}

/// Recursive membership test: does `v` inhabit `t`?
///
/// Extra object keys are allowed; missing keys only match nullable fields.
pub fn check_type(v: &Value, t: &Type) -> bool {
    if t.kind == TypeKind::Any {
        return true;
    }
    if v.is_null() {
        return t.kind == TypeKind::Null || t.nullable;
    }
    match t.kind {
        TypeKind::String => v.is_string(),
        TypeKind::Number => v.is_number(),
        TypeKind::Integer => {
            v.is_i64() || v.is_u64() || v.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        TypeKind::Boolean => v.is_boolean(),
        TypeKind::Null => false, // non-null value handled above
        TypeKind::Array => match v.as_array() {
            Some(items) => match &t.items {
                Some(item_t) if item_t.kind != TypeKind::Any => {
                    items.iter().all(|i| check_type(i, item_t))
                }
                _ => true,
            },
            None => false,
        },
        TypeKind::Object => match v.as_object() {
            Some(map) => match &t.shape {
                Some(shape) => shape.iter().all(|(key, field_t)| match map.get(key) {
                    Some(field_v) => check_type(field_v, field_t),
                    None => field_t.nullable || field_t.kind == TypeKind::Null,
                }),
                None => true,
            },
            None => false,
        },
        TypeKind::Union => t
            .members
            .as_ref()
            .is_some_and(|ms| ms.iter().any(|m| check_type(v, m))),
        TypeKind::Any => true,
    }
}

/// Human-readable rendering used in diagnostics ("Expected X, got Y").
pub fn type_to_string(t: &Type) -> String {
    let base = match t.kind {
        TypeKind::String => "string".to_string(),
        TypeKind::Number => "number".to_string(),
        TypeKind::Integer => "integer".to_string(),
        TypeKind::Boolean => "boolean".to_string(),
        TypeKind::Null => "null".to_string(),
        TypeKind::Any => "any".to_string(),
        TypeKind::Array => match &t.items {
            Some(items) => format!("array of {}", type_to_string(items)),
            None => "array".to_string(),
        },
        TypeKind::Object => match &t.shape {
            Some(shape) => {
                let fields: Vec<String> = shape
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, type_to_string(v)))
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            None => "object".to_string(),
        },
        TypeKind::Union => match &t.members {
            Some(ms) => ms
                .iter()
                .map(type_to_string)
                .collect::<Vec<_>>()
                .join(" | "),
            None => "union".to_string(),
        },
    };
    if t.nullable && t.kind != TypeKind::Null {
        format!("{} | null", base)
    } else {
        base
    }
}

/// The JSON-ish kind name of a runtime value (`typeOf` for JS embedders).
pub fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// === Example expressions ===

/// Evaluate a literal example expression to a JSON value. Returns `None` for
/// anything that is not a literal (identifiers, calls, arrows).
pub fn literal_value(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Number { value, raw, .. } => {
            if !raw.contains('.') && !raw.contains('e') && !raw.contains('E')
                && value.fract() == 0.0
                && value.abs() < 9e15
            {
                Some(Value::Number((*value as i64).into()))
            } else {
                serde_json::Number::from_f64(*value).map(Value::Number)
            }
        }
        Expr::Str { value, .. } => Some(Value::String(value.clone())),
        Expr::Bool { value, .. } => Some(Value::Bool(*value)),
        Expr::Null { .. } | Expr::Undefined { .. } => Some(Value::Null),
        Expr::Unary { op, expr, .. } if op == "-" => match literal_value(expr)? {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Number((-i).into()))
                } else {
                    serde_json::Number::from_f64(-n.as_f64()?).map(Value::Number)
                }
            }
            _ => None,
        },
        Expr::Array { elements, .. } => {
            let mut out = Vec::with_capacity(elements.len());
            for e in elements {
                out.push(literal_value(e)?);
            }
            Some(Value::Array(out))
        }
        Expr::Object { props, .. } => {
            let mut map = serde_json::Map::new();
            for (key, value) in props {
                let key = match key {
                    PropKey::Ident(s) | PropKey::Str(s) => s.clone(),
                };
                map.insert(key, literal_value(value)?);
            }
            Some(Value::Object(map))
        }
        Expr::Template { parts, .. } if parts.len() <= 1 => match parts.first() {
            Some(crate::compiler::ast::TemplatePart::Text(t)) => {
                Some(Value::String(t.clone()))
            }
            None => Some(Value::String(String::new())),
            _ => None,
        },
        _ => None,
    }
}

/// Infer a type from an example expression, honoring `A || B` union syntax.
pub fn infer_type_from_example(expr: &Expr) -> Option<Type> {
    match expr {
        Expr::Logical { op, left, right, .. } if op == "||" => {
            let mut members = Vec::new();
            collect_union_members(left, &mut members)?;
            collect_union_members(right, &mut members)?;
            Some(Type::union(members))
        }
        Expr::Arrow { body, .. } => {
            // A lambda example types as `any` (callable values are opaque).
            let _ = body;
            Some(Type::any())
        }
        _ => literal_value(expr).map(|v| infer_type(&v)),
    }
}

fn collect_union_members(expr: &Expr, out: &mut Vec<Type>) -> Option<()> {
    match expr {
        Expr::Logical { op, left, right, .. } if op == "||" => {
            collect_union_members(left, out)?;
            collect_union_members(right, out)?;
            Some(())
        }
        _ => {
            out.push(infer_type_from_example(expr)?);
            Some(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_expression_source;
    use serde_json::json;

    fn example(src: &str) -> Type {
        infer_type_from_example(&parse_expression_source(src).unwrap()).unwrap()
    }

    #[test]
    fn scalars() {
        assert_eq!(infer_type(&json!(42)).kind, TypeKind::Integer);
        assert_eq!(infer_type(&json!(4.5)).kind, TypeKind::Number);
        assert_eq!(infer_type(&json!("s")).kind, TypeKind::String);
        assert_eq!(infer_type(&json!(true)).kind, TypeKind::Boolean);
        assert_eq!(infer_type(&json!(null)).kind, TypeKind::Null);
    }

    #[test]
    fn arrays_infer_items() {
        let t = infer_type(&json!([1, 2]));
        assert_eq!(t.kind, TypeKind::Array);
        assert_eq!(t.items.unwrap().kind, TypeKind::Integer);
    }

    #[test]
    fn empty_array_items_any() {
        let t = infer_type(&json!([]));
        assert_eq!(t.items.unwrap().kind, TypeKind::Any);
    }

    #[test]
    fn objects_keep_insertion_order() {
        let t = infer_type(&json!({"z": 1, "a": "x"}));
        let shape = t.shape.unwrap();
        let keys: Vec<&String> = shape.keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn union_with_null_becomes_nullable() {
        let t = example("'s' || null");
        assert_eq!(t.kind, TypeKind::String);
        assert!(t.nullable);
    }

    #[test]
    fn union_of_two_kinds() {
        let t = example("1 || 's'");
        assert_eq!(t.kind, TypeKind::Union);
        assert_eq!(t.members.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn roundtrip_law_check_type_of_inferred() {
        for v in [
            json!(1),
            json!(1.5),
            json!("x"),
            json!(true),
            json!(null),
            json!([1, 2, 3]),
            json!({"a": 1, "b": [true]}),
            json!([]),
        ] {
            assert!(check_type(&v, &infer_type(&v)), "failed for {}", v);
        }
    }

    #[test]
    fn check_type_rejects_mismatches() {
        assert!(!check_type(&json!("a"), &Type::of(TypeKind::Number)));
        assert!(!check_type(&json!([1, "a"]), &infer_type(&json!([1]))));
        assert!(!check_type(&json!({"a": "x"}), &infer_type(&json!({"a": 1}))));
    }

    #[test]
    fn extra_keys_are_allowed() {
        let t = infer_type(&json!({"a": 1}));
        assert!(check_type(&json!({"a": 2, "b": "extra"}), &t));
    }

    #[test]
    fn nullable_accepts_null() {
        let t = Type::of(TypeKind::String).nullable();
        assert!(check_type(&json!(null), &t));
        assert!(check_type(&json!("s"), &t));
        assert!(!check_type(&json!(1), &t));
    }

    #[test]
    fn integer_accepts_whole_floats() {
        assert!(check_type(&json!(3.0), &Type::of(TypeKind::Integer)));
        assert!(!check_type(&json!(3.5), &Type::of(TypeKind::Integer)));
    }

    #[test]
    fn type_strings() {
        assert_eq!(type_to_string(&example("[1]")), "array of integer");
        assert_eq!(type_to_string(&example("'s' || null")), "string | null");
        assert_eq!(type_to_string(&example("{a: 1}")), "{a: integer}");
    }

    #[test]
    fn literal_values() {
        let v = literal_value(&parse_expression_source("{a: [1, 'x'], b: -2}").unwrap()).unwrap();
        assert_eq!(v, json!({"a": [1, "x"], "b": -2}));
        assert!(literal_value(&parse_expression_source("a + b").unwrap()).is_none());
    }

    #[test]
    fn serialized_shape_is_stable() {
        let t = example("{a: 1, b: 's' || null}");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["kind"], "object");
        assert_eq!(json["shape"]["a"]["kind"], "integer");
        assert_eq!(json["shape"]["b"]["kind"], "string");
        assert_eq!(json["shape"]["b"]["nullable"], true);
        assert!(json.get("nullable").is_none());
    }
}
