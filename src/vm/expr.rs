//! Expression evaluation.
//!
//! Expressions are data (`{"$expr": …}` nodes), evaluated deterministically
//! against a scope's state. Numeric intermediates are carried as f64 so
//! `Infinity` and `NaN` behave like JavaScript inside one expression tree;
//! they collapse to JSON `null` only when the final value leaves the
//! evaluator (the state is plain JSON, like `JSON.stringify`).
//!
//! Monadic error operands short-circuit: an expression over an error value
//! is that error.

use crate::vm::context::RuntimeContext;
use crate::vm::error::{is_error, monadic_error, type_of};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectField {
    pub key: String,
    pub value: ExprNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$expr", rename_all = "camelCase")]
pub enum ExprNode {
    Literal {
        value: Value,
    },
    Ident {
        name: String,
    },
    Array {
        items: Vec<ExprNode>,
    },
    Object {
        fields: Vec<ObjectField>,
    },
    Unary {
        op: String,
        expr: Box<ExprNode>,
    },
    Binary {
        op: String,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Logical {
        op: String,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Cond {
        test: Box<ExprNode>,
        cons: Box<ExprNode>,
        alt: Box<ExprNode>,
    },
    Member {
        object: Box<ExprNode>,
        property: String,
        #[serde(default)]
        optional: bool,
    },
    Index {
        object: Box<ExprNode>,
        index: Box<ExprNode>,
        #[serde(default)]
        optional: bool,
    },
    MethodCall {
        object: Box<ExprNode>,
        method: String,
        #[serde(default)]
        args: Vec<ExprNode>,
        #[serde(default)]
        optional: bool,
    },
}

/// Evaluate an `$expr` value against the scope. Malformed expression data
/// yields a monadic error rather than a panic.
pub fn eval_expr(v: &Value, ctx: &RuntimeContext) -> Value {
    match serde_json::from_value::<ExprNode>(v.clone()) {
        Ok(node) => eval(&node, ctx).into_value(),
        Err(e) => monadic_error(format!("Malformed expression: {}", e), Some("expr")),
    }
}

/// Evaluate a typed expression node to a JSON value.
pub fn eval_node(node: &ExprNode, ctx: &RuntimeContext) -> Value {
    eval(node, ctx).into_value()
}

/// Intermediate result: numbers stay f64 so non-finite values survive
/// within a tree.
#[derive(Debug, Clone)]
enum Evaluated {
    Num(f64),
    Json(Value),
}

impl Evaluated {
    fn from_value(v: Value) -> Evaluated {
        match v.as_f64() {
            Some(f) if v.is_number() => Evaluated::Num(f),
            _ => Evaluated::Json(v),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Evaluated::Num(f) => number_to_value(f),
            Evaluated::Json(v) => v,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Evaluated::Num(f) => Some(*f),
            Evaluated::Json(v) => v.as_f64(),
        }
    }

    fn is_nullish(&self) -> bool {
        matches!(self, Evaluated::Json(Value::Null))
    }

    fn truthy(&self) -> bool {
        match self {
            Evaluated::Num(f) => *f != 0.0 && !f.is_nan(),
            Evaluated::Json(v) => match v {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Value::String(s) => !s.is_empty(),
                _ => true,
            },
        }
    }

    fn is_monadic_error(&self) -> bool {
        matches!(self, Evaluated::Json(v) if is_error(v))
    }
}

/// JSON has no Infinity/NaN; they collapse to null at the boundary, and
/// whole floats normalize to integers.
pub fn number_to_value(f: f64) -> Value {
    if !f.is_finite() {
        return Value::Null;
    }
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        json!(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn eval(node: &ExprNode, ctx: &RuntimeContext) -> Evaluated {
    match node {
        ExprNode::Literal { value } => Evaluated::from_value(value.clone()),
        ExprNode::Ident { name } => match ctx.lookup(name) {
            Some(v) => Evaluated::from_value(v.clone()),
            None => Evaluated::Json(Value::Null),
        },
        ExprNode::Array { items } => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let v = eval(item, ctx);
                if v.is_monadic_error() {
                    return v;
                }
                out.push(v.into_value());
            }
            Evaluated::Json(Value::Array(out))
        }
        ExprNode::Object { fields } => {
            let mut map = serde_json::Map::new();
            for field in fields {
                let v = eval(&field.value, ctx);
                if v.is_monadic_error() {
                    return v;
                }
                map.insert(field.key.clone(), v.into_value());
            }
            Evaluated::Json(Value::Object(map))
        }
        ExprNode::Unary { op, expr } => {
            let v = eval(expr, ctx);
            if v.is_monadic_error() {
                return v;
            }
            match op.as_str() {
                "!" => Evaluated::Json(Value::Bool(!v.truthy())),
                "-" => match v.as_f64() {
                    Some(f) => Evaluated::Num(-f),
                    None => Evaluated::Num(f64::NAN),
                },
                "+" => match v.as_f64() {
                    Some(f) => Evaluated::Num(f),
                    None => Evaluated::Num(f64::NAN),
                },
                "typeof" => Evaluated::Json(json!(js_typeof(&v))),
                other => Evaluated::Json(monadic_error(
                    format!("Unknown unary operator '{}'", other),
                    Some("expr"),
                )),
            }
        }
        ExprNode::Binary { op, left, right } => {
            let l = eval(left, ctx);
            if l.is_monadic_error() {
                return l;
            }
            let r = eval(right, ctx);
            if r.is_monadic_error() {
                return r;
            }
            eval_binary(op, l, r)
        }
        ExprNode::Logical { op, left, right } => {
            let l = eval(left, ctx);
            if l.is_monadic_error() {
                return l;
            }
            match op.as_str() {
                "&&" => {
                    if l.truthy() {
                        eval(right, ctx)
                    } else {
                        l
                    }
                }
                "||" => {
                    if l.truthy() {
                        l
                    } else {
                        eval(right, ctx)
                    }
                }
                "??" => {
                    if l.is_nullish() {
                        eval(right, ctx)
                    } else {
                        l
                    }
                }
                other => Evaluated::Json(monadic_error(
                    format!("Unknown logical operator '{}'", other),
                    Some("expr"),
                )),
            }
        }
        ExprNode::Cond { test, cons, alt } => {
            let t = eval(test, ctx);
            if t.is_monadic_error() {
                return t;
            }
            if t.truthy() {
                eval(cons, ctx)
            } else {
                eval(alt, ctx)
            }
        }
        ExprNode::Member {
            object,
            property,
            optional,
        } => {
            let obj = eval(object, ctx);
            if obj.is_monadic_error() {
                return obj;
            }
            member_access(obj, property, *optional)
        }
        ExprNode::Index {
            object,
            index,
            optional,
        } => {
            let obj = eval(object, ctx);
            if obj.is_monadic_error() {
                return obj;
            }
            let idx = eval(index, ctx);
            if idx.is_monadic_error() {
                return idx;
            }
            index_access(obj, idx, *optional)
        }
        ExprNode::MethodCall {
            object,
            method,
            args,
            optional,
        } => {
            // Builtin namespaces dispatch on the bare identifier name when
            // the name is not shadowed by a state variable.
            if let ExprNode::Ident { name } = object.as_ref() {
                if ctx.lookup(name).is_none()
                    && matches!(name.as_str(), "Math" | "JSON" | "Object" | "Date" | "Set")
                {
                    return namespace_call(name, method, args, ctx);
                }
            }
            let obj = eval(object, ctx);
            if obj.is_monadic_error() {
                return obj;
            }
            if obj.is_nullish() {
                if *optional {
                    return Evaluated::Json(Value::Null);
                }
                return Evaluated::Json(monadic_error(
                    format!("Cannot call '{}' on null", method),
                    Some("expr"),
                ));
            }
            let mut evaluated_args = Vec::with_capacity(args.len());
            for a in args {
                let v = eval(a, ctx);
                if v.is_monadic_error() {
                    return v;
                }
                evaluated_args.push(v.into_value());
            }
            method_call(obj.into_value(), method, evaluated_args)
        }
    }
}

fn js_typeof(v: &Evaluated) -> &'static str {
    match v {
        Evaluated::Num(_) => "number",
        Evaluated::Json(v) => match v {
            Value::Null => "object", // typeof null
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            _ => "object",
        },
    }
}

fn eval_binary(op: &str, l: Evaluated, r: Evaluated) -> Evaluated {
    match op {
        "+" => {
            // String concatenation wins when either side is a string.
            let l_str = matches!(&l, Evaluated::Json(Value::String(_)));
            let r_str = matches!(&r, Evaluated::Json(Value::String(_)));
            if l_str || r_str {
                return Evaluated::Json(Value::String(format!(
                    "{}{}",
                    js_string(&l.into_value()),
                    js_string(&r.into_value())
                )));
            }
            numeric(l, r, |a, b| a + b)
        }
        "-" => numeric(l, r, |a, b| a - b),
        "*" => numeric(l, r, |a, b| a * b),
        "/" => numeric(l, r, |a, b| a / b),
        "%" => numeric(l, r, |a, b| a % b),
        "==" | "===" => Evaluated::Json(Value::Bool(loose_equals(&l, &r))),
        "!=" | "!==" => Evaluated::Json(Value::Bool(!loose_equals(&l, &r))),
        "<" => compare(l, r, |o| o == std::cmp::Ordering::Less),
        "<=" => compare(l, r, |o| o != std::cmp::Ordering::Greater),
        ">" => compare(l, r, |o| o == std::cmp::Ordering::Greater),
        ">=" => compare(l, r, |o| o != std::cmp::Ordering::Less),
        "Is" => Evaluated::Json(Value::Bool(deep_equals(&l.into_value(), &r.into_value()))),
        "IsNot" => Evaluated::Json(Value::Bool(!deep_equals(
            &l.into_value(),
            &r.into_value(),
        ))),
        other => Evaluated::Json(monadic_error(
            format!("Unknown binary operator '{}'", other),
            Some("expr"),
        )),
    }
}

fn numeric(l: Evaluated, r: Evaluated, f: impl Fn(f64, f64) -> f64) -> Evaluated {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Evaluated::Num(f(a, b)),
        _ => Evaluated::Num(f64::NAN),
    }
}

fn compare(l: Evaluated, r: Evaluated, f: impl Fn(std::cmp::Ordering) -> bool) -> Evaluated {
    // Strings compare lexicographically; everything else numerically.
    if let (Evaluated::Json(Value::String(a)), Evaluated::Json(Value::String(b))) = (&l, &r) {
        return Evaluated::Json(Value::Bool(f(a.cmp(b))));
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => match a.partial_cmp(&b) {
            Some(ord) => Evaluated::Json(Value::Bool(f(ord))),
            None => Evaluated::Json(Value::Bool(false)), // NaN comparisons
        },
        _ => Evaluated::Json(Value::Bool(false)),
    }
}

fn loose_equals(l: &Evaluated, r: &Evaluated) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => return a == b,
        (None, None) => {}
        _ => {
            // One numeric, one not: only null == null style matches remain.
            return false;
        }
    }
    match (l, r) {
        (Evaluated::Json(a), Evaluated::Json(b)) => deep_equals(a, b),
        _ => false,
    }
}

/// Structural equality over JSON values.
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
        }
        _ => a == b,
    }
}

/// Render a value the way template interpolation does.
pub fn js_string(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(js_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn member_access(obj: Evaluated, property: &str, optional: bool) -> Evaluated {
    let value = match obj {
        Evaluated::Num(_) => {
            return Evaluated::Json(Value::Null);
        }
        Evaluated::Json(v) => v,
    };
    match &value {
        Value::Null => {
            if optional {
                Evaluated::Json(Value::Null)
            } else {
                Evaluated::Json(monadic_error(
                    format!("Cannot read property '{}' of null", property),
                    Some("expr"),
                ))
            }
        }
        Value::String(s) => match property {
            "length" => Evaluated::Num(s.chars().count() as f64),
            _ => Evaluated::Json(Value::Null),
        },
        Value::Array(items) => match property {
            "length" => Evaluated::Num(items.len() as f64),
            _ => Evaluated::Json(Value::Null),
        },
        Value::Object(map) => {
            if property == "size" {
                if let Some(set) = map.get("$set").and_then(Value::as_array) {
                    return Evaluated::Num(set.len() as f64);
                }
            }
            Evaluated::Json(map.get(property).cloned().unwrap_or(Value::Null))
        }
        _ => Evaluated::Json(Value::Null),
    }
}

fn index_access(obj: Evaluated, idx: Evaluated, optional: bool) -> Evaluated {
    let value = match obj {
        Evaluated::Num(_) => return Evaluated::Json(Value::Null),
        Evaluated::Json(v) => v,
    };
    match &value {
        Value::Null => {
            if optional {
                Evaluated::Json(Value::Null)
            } else {
                Evaluated::Json(monadic_error(
                    "Cannot index null",
                    Some("expr"),
                ))
            }
        }
        Value::Array(items) => match idx.as_f64() {
            Some(i) if i >= 0.0 && (i as usize) < items.len() => {
                Evaluated::from_value(items[i as usize].clone())
            }
            _ => Evaluated::Json(Value::Null),
        },
        Value::String(s) => match idx.as_f64() {
            Some(i) if i >= 0.0 => Evaluated::Json(
                s.chars()
                    .nth(i as usize)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null),
            ),
            _ => Evaluated::Json(Value::Null),
        },
        Value::Object(map) => {
            let key = js_string(&idx.into_value());
            Evaluated::Json(map.get(&key).cloned().unwrap_or(Value::Null))
        }
        _ => Evaluated::Json(Value::Null),
    }
}

fn namespace_call(
    namespace: &str,
    method: &str,
    args: &[ExprNode],
    ctx: &RuntimeContext,
) -> Evaluated {
    let mut vals = Vec::with_capacity(args.len());
    for a in args {
        let v = eval(a, ctx);
        if v.is_monadic_error() {
            return v;
        }
        vals.push(v);
    }
    match (namespace, method) {
        ("Math", m) => {
            let nums: Vec<f64> = vals.iter().filter_map(|v| v.as_f64()).collect();
            let first = nums.first().copied().unwrap_or(f64::NAN);
            match m {
                "floor" => Evaluated::Num(first.floor()),
                "ceil" => Evaluated::Num(first.ceil()),
                "round" => Evaluated::Num(first.round()),
                "abs" => Evaluated::Num(first.abs()),
                "sqrt" => Evaluated::Num(first.sqrt()),
                "pow" => Evaluated::Num(first.powf(nums.get(1).copied().unwrap_or(f64::NAN))),
                "min" => Evaluated::Num(nums.iter().copied().fold(f64::INFINITY, f64::min)),
                "max" => Evaluated::Num(nums.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                _ => Evaluated::Json(monadic_error(
                    format!("Math.{} is not supported", m),
                    Some("expr"),
                )),
            }
        }
        ("JSON", "stringify") => Evaluated::Json(Value::String(
            serde_json::to_string(&vals.first().map(|v| v.clone().into_value()).unwrap_or(Value::Null))
                .unwrap_or_else(|_| "null".to_string()),
        )),
        ("JSON", "parse") => match vals.first().map(|v| v.clone().into_value()) {
            Some(Value::String(s)) => match serde_json::from_str(&s) {
                Ok(v) => Evaluated::Json(v),
                Err(e) => Evaluated::Json(monadic_error(
                    format!("JSON.parse: {}", e),
                    Some("expr"),
                )),
            },
            _ => Evaluated::Json(Value::Null),
        },
        ("Object", m) => {
            let obj = vals.first().map(|v| v.clone().into_value());
            match (m, obj) {
                ("keys", Some(Value::Object(map))) => Evaluated::Json(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                ("values", Some(Value::Object(map))) => {
                    Evaluated::Json(Value::Array(map.values().cloned().collect()))
                }
                ("entries", Some(Value::Object(map))) => Evaluated::Json(Value::Array(
                    map.iter()
                        .map(|(k, v)| json!([k, v]))
                        .collect(),
                )),
                _ => Evaluated::Json(Value::Array(Vec::new())),
            }
        }
        ("Date", "now") => match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Evaluated::Num(d.as_millis() as f64),
            Err(_) => Evaluated::Num(0.0),
        },
        ("Set", "from") => {
            let items = match vals.first().map(|v| v.clone().into_value()) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let mut unique: Vec<Value> = Vec::new();
            for item in items {
                if !unique.iter().any(|u| deep_equals(u, &item)) {
                    unique.push(item);
                }
            }
            Evaluated::Json(json!({ "$set": unique }))
        }
        (ns, m) => Evaluated::Json(monadic_error(
            format!("{}.{} is not supported", ns, m),
            Some("expr"),
        )),
    }
}

fn method_call(obj: Value, method: &str, args: Vec<Value>) -> Evaluated {
    // toString works on every value, like JS String().
    if method == "toString" {
        return Evaluated::Json(Value::String(js_string(&obj)));
    }
    match &obj {
        Value::String(s) => string_method(s, method, &args),
        Value::Array(items) => array_method(items, method, &args),
        Value::Number(n) => number_method(n.as_f64().unwrap_or(f64::NAN), method, &args),
        Value::Object(map) if map.contains_key("$set") => set_method(map, method, &args),
        Value::Object(_) | Value::Bool(_) | Value::Null => Evaluated::Json(monadic_error(
            format!("Method '{}' is not supported on {}", method, type_of(&obj)),
            Some("expr"),
        )),
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Evaluated {
    let arg_str = |i: usize| args.get(i).map(js_string).unwrap_or_default();
    let arg_num = |i: usize| args.get(i).and_then(Value::as_f64);
    let out = match method {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "trimStart" => Value::String(s.trim_start().to_string()),
        "trimEnd" => Value::String(s.trim_end().to_string()),
        "includes" => Value::Bool(s.contains(&arg_str(0))),
        "startsWith" => Value::Bool(s.starts_with(&arg_str(0))),
        "endsWith" => Value::Bool(s.ends_with(&arg_str(0))),
        "indexOf" => {
            let needle = arg_str(0);
            match s.find(&needle) {
                Some(byte_idx) => json!(s[..byte_idx].chars().count() as i64),
                None => json!(-1),
            }
        }
        "charAt" => {
            let i = arg_num(0).unwrap_or(0.0).max(0.0) as usize;
            Value::String(s.chars().nth(i).map(|c| c.to_string()).unwrap_or_default())
        }
        "repeat" => {
            let n = arg_num(0).unwrap_or(0.0).max(0.0) as usize;
            Value::String(s.repeat(n))
        }
        "split" => {
            let sep = arg_str(0);
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(&sep as &str)
                    .map(|p| Value::String(p.to_string()))
                    .collect()
            };
            Value::Array(parts)
        }
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as f64;
            let norm = |v: f64| -> usize {
                let v = if v < 0.0 && method == "slice" { len + v } else { v };
                v.clamp(0.0, len) as usize
            };
            let start = norm(arg_num(0).unwrap_or(0.0));
            let end = norm(arg_num(1).unwrap_or(len));
            Value::String(chars[start.min(end)..end.max(start)].iter().collect())
        }
        "replace" => {
            let from = arg_str(0);
            let to = arg_str(1);
            Value::String(s.replacen(&from as &str, &to, 1))
        }
        "replaceAll" => Value::String(s.replace(&arg_str(0) as &str, &arg_str(1))),
        "padStart" => pad(s, args, true),
        "padEnd" => pad(s, args, false),
        "concat" => {
            let mut out = s.to_string();
            for a in args {
                out.push_str(&js_string(a));
            }
            Value::String(out)
        }
        other => {
            return Evaluated::Json(monadic_error(
                format!("String method '{}' is not supported", other),
                Some("expr"),
            ))
        }
    };
    Evaluated::Json(out)
}

fn pad(s: &str, args: &[Value], start: bool) -> Value {
    let target = args
        .first()
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .max(0.0) as usize;
    let fill = args
        .get(1)
        .map(js_string)
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| " ".to_string());
    let len = s.chars().count();
    if len >= target {
        return Value::String(s.to_string());
    }
    let mut padding = String::new();
    while padding.chars().count() < target - len {
        padding.push_str(&fill);
    }
    let padding: String = padding.chars().take(target - len).collect();
    Value::String(if start {
        format!("{}{}", padding, s)
    } else {
        format!("{}{}", s, padding)
    })
}

fn array_method(items: &[Value], method: &str, args: &[Value]) -> Evaluated {
    let out = match method {
        "includes" => Value::Bool(
            args.first()
                .map(|a| items.iter().any(|i| deep_equals(i, a)))
                .unwrap_or(false),
        ),
        "indexOf" => args
            .first()
            .and_then(|a| items.iter().position(|i| deep_equals(i, a)))
            .map(|i| json!(i as i64))
            .unwrap_or(json!(-1)),
        "join" => {
            let sep = args.first().map(js_string).unwrap_or_else(|| ",".into());
            Value::String(
                items
                    .iter()
                    .map(js_string)
                    .collect::<Vec<_>>()
                    .join(&sep),
            )
        }
        "slice" => {
            let len = items.len() as f64;
            let norm = |v: f64| -> usize {
                let v = if v < 0.0 { len + v } else { v };
                v.clamp(0.0, len) as usize
            };
            let start = norm(args.first().and_then(Value::as_f64).unwrap_or(0.0));
            let end = norm(args.get(1).and_then(Value::as_f64).unwrap_or(len));
            Value::Array(items[start.min(end)..end.max(start)].to_vec())
        }
        "concat" => {
            let mut out = items.to_vec();
            for a in args {
                match a {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        "flat" => {
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::Array(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        "reverse" | "toReversed" => {
            Value::Array(items.iter().rev().cloned().collect())
        }
        "keys" => Value::Array((0..items.len()).map(|i| json!(i)).collect()),
        other => {
            return Evaluated::Json(monadic_error(
                format!("Array method '{}' is not supported", other),
                Some("expr"),
            ))
        }
    };
    Evaluated::Json(out)
}

fn number_method(n: f64, method: &str, args: &[Value]) -> Evaluated {
    match method {
        "toFixed" => {
            let digits = args
                .first()
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .clamp(0.0, 20.0) as usize;
            Evaluated::Json(Value::String(format!("{:.*}", digits, n)))
        }
        other => Evaluated::Json(monadic_error(
            format!("Number method '{}' is not supported", other),
            Some("expr"),
        )),
    }
}

fn set_method(map: &serde_json::Map<String, Value>, method: &str, args: &[Value]) -> Evaluated {
    let items = map
        .get("$set")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    match method {
        "has" => Evaluated::Json(Value::Bool(
            args.first()
                .map(|a| items.iter().any(|i| deep_equals(i, a)))
                .unwrap_or(false),
        )),
        "add" => {
            let mut out = items;
            if let Some(a) = args.first() {
                if !out.iter().any(|i| deep_equals(i, a)) {
                    out.push(a.clone());
                }
            }
            Evaluated::Json(json!({ "$set": out }))
        }
        "delete" => {
            let out: Vec<Value> = items
                .into_iter()
                .filter(|i| args.first().map(|a| !deep_equals(i, a)).unwrap_or(true))
                .collect();
            Evaluated::Json(json!({ "$set": out }))
        }
        "values" => Evaluated::Json(Value::Array(items)),
        other => Evaluated::Json(monadic_error(
            format!("Set method '{}' is not supported", other),
            Some("expr"),
        )),
    }
}
