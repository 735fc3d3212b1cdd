//! JavaScript emission.
//!
//! Re-prints the parsed AST as plain JavaScript and augments it with:
//!
//! - a self-contained `__tjs` runtime prelude (monadic helpers plus the
//!   `Type`/`Generic`/`Union`/`Enum`/`Is`/`IsNot` globals the declaration
//!   rewrites reference),
//! - an inline validation prologue at the top of each function body,
//! - a `fn.__tjs = { … }` metadata suffix immediately after each function.
//!
//! Emitted metadata collapses `integer` to `number`; the Rust-side `Type`
//! records keep the distinction.

use crate::compiler::ast::*;
use crate::compiler::diagnostics::CompileResult;
use crate::compiler::infer::{Type, TypeKind};
use crate::compiler::preprocess::{Preprocessed, ReturnPolicy, SafetyMode};
use crate::compiler::signature::FunctionSignature;
use indexmap::IndexMap;

/// Runtime support included at the top of every emitted module. Defines the
/// monadic helpers and the declaration globals so the output runs in any JS
/// host with no imports.
pub const RUNTIME_PRELUDE: &str = r#"// Runtime support for compiled TJS modules.
const __tjs = {
  isError(v) { return v !== null && typeof v === 'object' && v.$error === true; },
  typeOf(v) { return v === null ? 'null' : Array.isArray(v) ? 'array' : typeof v; },
  error(message, details) { return Object.assign({ $error: true, message: message }, details || {}); },
  typeError(path, expected, actual) {
    return { $error: true, message: 'Expected ' + expected + ' for ' + path + ', got ' + __tjs.typeOf(actual), path: path };
  },
  typeName(t) {
    if (!t) return 'any';
    if (t.kind === 'array') return 'array of ' + __tjs.typeName(t.items);
    if (t.kind === 'union') return (t.members || []).map(__tjs.typeName).join(' | ');
    return t.nullable && t.kind !== 'null' ? t.kind + ' | null' : t.kind;
  },
  checkType(v, t) {
    if (!t || t.kind === 'any') return true;
    if (v === null || v === undefined) return t.kind === 'null' || t.nullable === true;
    switch (t.kind) {
      case 'string': return typeof v === 'string';
      case 'number': case 'integer': return typeof v === 'number';
      case 'boolean': return typeof v === 'boolean';
      case 'null': return false;
      case 'array':
        return Array.isArray(v) && (!t.items || t.items.kind === 'any' ||
          v.every(function (i) { return __tjs.checkType(i, t.items); }));
      case 'object':
        if (typeof v !== 'object' || Array.isArray(v)) return false;
        if (!t.shape) return true;
        return Object.keys(t.shape).every(function (k) {
          return k in v ? __tjs.checkType(v[k], t.shape[k])
            : (t.shape[k].nullable === true || t.shape[k].kind === 'null');
        });
      case 'union':
        return (t.members || []).some(function (m) { return __tjs.checkType(v, m); });
      default: return false;
    }
  },
  validateReturn(v, t, name) {
    if (__tjs.isError(v)) return v;
    return __tjs.checkType(v, t) ? v : __tjs.typeError(name + ' return', __tjs.typeName(t), v);
  },
  wrap(fn, meta) {
    return function () {
      for (var i = 0; i < arguments.length; i++) {
        if (__tjs.isError(arguments[i])) return arguments[i];
      }
      if (meta && meta.params) {
        var names = Object.keys(meta.params);
        var byName = {};
        for (var j = 0; j < names.length; j++) byName[names[j]] = arguments[j];
        var invalid = __tjs.validateArgs(byName, meta);
        if (invalid) return invalid;
      }
      try { return fn.apply(this, arguments); }
      catch (e) { return { $error: true, message: (e && e.message) || String(e), cause: e }; }
    };
  },
  validateArgs(args, meta) {
    var names = Object.keys((meta && meta.params) || {});
    for (var i = 0; i < names.length; i++) {
      var name = names[i], spec = meta.params[name], v = args[name];
      if (__tjs.isError(v)) return v;
      if (v === undefined) {
        if (spec.required) return __tjs.error("Missing required parameter '" + name + "'");
        continue;
      }
      if (!__tjs.checkType(v, spec.type)) return __tjs.typeError(name, __tjs.typeName(spec.type), v);
    }
    return null;
  }
};
function Type(name, a, b) {
  if (typeof a === 'function') return { name: name, predicate: a, example: b };
  return { name: name, example: a };
}
function Generic(typeParams, predicate) { return { typeParams: typeParams, predicate: predicate }; }
function Union(name, members) { return { name: name, members: members }; }
function Enum(name, values) { return Object.freeze(Object.assign({ __enum: name }, values)); }
function Is(a, b) { return JSON.stringify(a) === JSON.stringify(b); }
function IsNot(a, b) { return !Is(a, b); }
"#;

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Include `source: "file:line:col"` inside metadata records.
    pub debug: bool,
    pub filename: Option<String>,
    /// Skip the runtime prelude (for hosts that provide their own).
    pub no_prelude: bool,
}

/// Recursively collapse `integer` to `number` for emitted metadata.
fn downgrade_integers(t: &Type) -> Type {
    let mut out = t.clone();
    if out.kind == TypeKind::Integer {
        out.kind = TypeKind::Number;
    }
    out.items = t.items.as_ref().map(|i| Box::new(downgrade_integers(i)));
    out.shape = t.shape.as_ref().map(|s| {
        s.iter()
            .map(|(k, v)| (k.clone(), downgrade_integers(v)))
            .collect()
    });
    out.members = t
        .members
        .as_ref()
        .map(|ms| ms.iter().map(downgrade_integers).collect());
    out
}

fn metadata_json(sig: &FunctionSignature, opts: &EmitOptions, span: Span) -> String {
    let mut sig = sig.clone();
    for spec in sig.parameters.values_mut() {
        spec.ty = downgrade_integers(&spec.ty);
    }
    sig.returns = sig.returns.as_ref().map(downgrade_integers);
    if opts.debug {
        let file = opts.filename.as_deref().unwrap_or("source");
        sig.source = Some(format!("{}:{}:{}", file, span.line, span.column));
    }
    serde_json::to_string(&sig).unwrap_or_else(|_| "{}".to_string())
}

/// Emit a whole module: prelude, statements in source order, validation
/// prologues, and metadata suffixes keyed by function name.
pub fn emit_module(
    program: &Program,
    pre: &Preprocessed,
    signatures: &IndexMap<String, FunctionSignature>,
    opts: &EmitOptions,
) -> CompileResult<String> {
    let mut out = String::new();
    if !opts.no_prelude {
        out.push_str(RUNTIME_PRELUDE);
        out.push('\n');
    }
    let primary = program.functions().first().map(|f| f.name.clone());
    let mut printer = Printer::new();
    for stmt in &program.body {
        match stmt {
            Stmt::FunctionDecl(f) => {
                let sig = signatures.get(&f.name);
                let is_primary = primary.as_deref() == Some(f.name.as_str());
                printer.print_function_decl(f, sig, pre, is_primary, opts);
                if let Some(sig) = sig {
                    printer.line(&format!(
                        "{}.__tjs = {};",
                        f.name,
                        metadata_json(sig, opts, f.span)
                    ));
                }
            }
            other => printer.print_stmt(other),
        }
    }
    out.push_str(&printer.out);
    Ok(out)
}

// === Printer ===

struct Printer {
    out: String,
    indent: usize,
    /// `Some((type_json, fn_name))` while printing a body whose returns are
    /// runtime-validated. Cleared inside nested lambdas.
    return_check: Option<(String, String)>,
}

impl Printer {
    fn new() -> Self {
        Printer {
            out: String::new(),
            indent: 0,
            return_check: None,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn print_function_decl(
        &mut self,
        f: &Function,
        sig: Option<&FunctionSignature>,
        pre: &Preprocessed,
        is_primary: bool,
        opts: &EmitOptions,
    ) {
        let _ = opts;
        let params: Vec<String> = f
            .params
            .iter()
            .map(|p| {
                let required = sig
                    .map(|s| {
                        s.parameters
                            .get(&p.name)
                            .map(|spec| spec.required)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                match (&p.default, required) {
                    // Required parameters stay bare so a missing argument is
                    // observable as undefined.
                    (_, true) | (None, _) => p.name.clone(),
                    (Some(d), false) => format!("{} = {}", p.name, print_expr_string(d)),
                }
            })
            .collect();
        let prefix = if f.is_async { "async " } else { "" };
        self.line(&format!(
            "{}function {}({}) {{",
            prefix,
            f.name,
            params.join(", ")
        ));
        self.indent += 1;

        let validate_inputs = pre.module_safety != SafetyMode::None
            && !pre.unsafe_functions.contains(&f.name);
        if let (true, Some(sig)) = (validate_inputs, sig) {
            for (name, _) in &sig.parameters {
                self.line(&format!("if (__tjs.isError({0})) return {0};", name));
            }
            for (name, spec) in &sig.parameters {
                if spec.required {
                    self.line(&format!(
                        "if ({} === undefined) return __tjs.error(\"Missing required parameter '{}'\");",
                        name, name
                    ));
                }
                if spec.ty.kind != TypeKind::Any {
                    let emitted = downgrade_integers(&spec.ty);
                    let cond = type_check_condition(name, &emitted);
                    let expected = crate::compiler::infer::type_to_string(&emitted);
                    self.line(&format!(
                        "if (!({})) return __tjs.typeError('{}', '{}', {});",
                        cond, name, expected, name
                    ));
                }
            }
        }

        let validate_return = is_primary
            && sig.and_then(|s| s.returns.as_ref()).is_some()
            && (pre.return_policy == ReturnPolicy::CheckRuntime
                || (pre.module_safety == SafetyMode::All
                    && pre.return_policy != ReturnPolicy::Skip));
        let saved = self.return_check.take();
        if validate_return {
            let returns = sig.and_then(|s| s.returns.as_ref()).unwrap();
            let json = serde_json::to_string(&downgrade_integers(returns))
                .unwrap_or_else(|_| "{}".into());
            self.return_check = Some((json, f.name.clone()));
        }
        for stmt in &f.body {
            self.print_stmt(stmt);
        }
        self.return_check = saved;
        self.indent -= 1;
        self.line("}");
    }

    fn print_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Empty => {}
            Stmt::VarDecl {
                kind, name, init, ..
            } => match init {
                Some(e) => self.line(&format!(
                    "{} {} = {};",
                    kind.keyword(),
                    name,
                    print_expr_with(e, self)
                )),
                None => self.line(&format!("{} {};", kind.keyword(), name)),
            },
            Stmt::FunctionDecl(f) => {
                // Nested function declarations print without validation.
                let params: Vec<String> = f
                    .params
                    .iter()
                    .map(|p| match &p.default {
                        Some(d) => format!("{} = {}", p.name, print_expr_string(d)),
                        None => p.name.clone(),
                    })
                    .collect();
                let prefix = if f.is_async { "async " } else { "" };
                self.line(&format!(
                    "{}function {}({}) {{",
                    prefix,
                    f.name,
                    params.join(", ")
                ));
                self.indent += 1;
                let saved = self.return_check.take();
                for s in &f.body {
                    self.print_stmt(s);
                }
                self.return_check = saved;
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Expr { expr, .. } => {
                let text = print_expr_with(expr, self);
                self.line(&format!("{};", text));
            }
            Stmt::Assign {
                target, op, value, ..
            } => {
                let t = print_expr_string(target);
                let v = print_expr_with(value, self);
                self.line(&format!("{} {} {};", t, op, v));
            }
            Stmt::Update { target, op, .. } => {
                self.line(&format!("{}{};", print_expr_string(target), op));
            }
            Stmt::If {
                cond, then, alt, ..
            } => {
                self.line(&format!("if ({}) {{", print_expr_with(cond, self)));
                self.indent += 1;
                for s in then {
                    self.print_stmt(s);
                }
                self.indent -= 1;
                match alt {
                    Some(body) if body.len() == 1 && matches!(body[0], Stmt::If { .. }) => {
                        // else-if chain
                        self.line("} else");
                        // Reprint the nested if on its own; simplest correct
                        // form is a braced else.
                        self.line("{");
                        self.indent += 1;
                        for s in body {
                            self.print_stmt(s);
                        }
                        self.indent -= 1;
                        self.line("}");
                    }
                    Some(body) => {
                        self.line("} else {");
                        self.indent += 1;
                        for s in body {
                            self.print_stmt(s);
                        }
                        self.indent -= 1;
                        self.line("}");
                    }
                    None => self.line("}"),
                }
            }
            Stmt::While { cond, body, .. } => {
                self.line(&format!("while ({}) {{", print_expr_with(cond, self)));
                self.indent += 1;
                for s in body {
                    self.print_stmt(s);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::ForOf {
                decl,
                name,
                iter,
                body,
                ..
            } => {
                let kw = decl.map(|d| d.keyword()).unwrap_or("const");
                self.line(&format!(
                    "for ({} {} of {}) {{",
                    kw,
                    name,
                    print_expr_with(iter, self)
                ));
                self.indent += 1;
                for s in body {
                    self.print_stmt(s);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Return { value, .. } => {
                let check = self.return_check.clone();
                match (value, check) {
                    (Some(e), Some((ty, name))) => {
                        let text = print_expr_with(e, self);
                        self.line(&format!(
                            "return __tjs.validateReturn({}, {}, '{}');",
                            text, ty, name
                        ));
                    }
                    (Some(e), None) => {
                        let text = print_expr_with(e, self);
                        self.line(&format!("return {};", text));
                    }
                    (None, _) => self.line("return;"),
                }
            }
            Stmt::Try {
                body,
                catch_param,
                catch,
                finally,
                ..
            } => {
                self.line("try {");
                self.indent += 1;
                for s in body {
                    self.print_stmt(s);
                }
                self.indent -= 1;
                if let Some(catch_body) = catch {
                    match catch_param {
                        Some(p) => self.line(&format!("}} catch ({}) {{", p)),
                        None => self.line("} catch {"),
                    }
                    self.indent += 1;
                    for s in catch_body {
                        self.print_stmt(s);
                    }
                    self.indent -= 1;
                }
                if let Some(finally_body) = finally {
                    self.line("} finally {");
                    self.indent += 1;
                    for s in finally_body {
                        self.print_stmt(s);
                    }
                    self.indent -= 1;
                }
                self.line("}");
            }
            Stmt::Block { body, .. } => {
                self.line("{");
                self.indent += 1;
                for s in body {
                    self.print_stmt(s);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Break { .. } => self.line("break;"),
            Stmt::Continue { .. } => self.line("continue;"),
        }
    }
}

/// Print an expression, using the printer only for nested lambda bodies (so
/// return validation stays scoped to the enclosing function).
fn print_expr_with(expr: &Expr, _printer: &Printer) -> String {
    print_expr(expr, 0)
}

pub fn print_expr_string(expr: &Expr) -> String {
    print_expr(expr, 0)
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Cond { .. } => 4,
        Expr::Logical { op, .. } => match op.as_str() {
            "??" => 5,
            "||" => 6,
            _ => 7,
        },
        Expr::Binary { op, .. } => match op.as_str() {
            "==" | "!=" | "===" | "!==" => 10,
            "<" | "<=" | ">" | ">=" => 11,
            "+" | "-" => 12,
            _ => 13,
        },
        Expr::Unary { .. } | Expr::Await { .. } => 15,
        Expr::Arrow { .. } => 3,
        Expr::Spread { .. } => 2,
        _ => 20,
    }
}

fn print_expr(expr: &Expr, parent: u8) -> String {
    let own = precedence(expr);
    let text = match expr {
        Expr::Number { raw, .. } => raw.clone(),
        Expr::Str { value, .. } => quote_js(value),
        Expr::Bool { value, .. } => value.to_string(),
        Expr::Null { .. } => "null".to_string(),
        Expr::Undefined { .. } => "undefined".to_string(),
        Expr::Ident { name, .. } => name.clone(),
        Expr::Template { parts, .. } => {
            let mut s = String::from("`");
            for part in parts {
                match part {
                    TemplatePart::Text(t) => {
                        for c in t.chars() {
                            match c {
                                '`' => s.push_str("\\`"),
                                '$' => s.push_str("\\$"),
                                '\\' => s.push_str("\\\\"),
                                '\n' => s.push('\n'),
                                c => s.push(c),
                            }
                        }
                    }
                    TemplatePart::Expr(e) => {
                        s.push_str("${");
                        s.push_str(&print_expr(e, 0));
                        s.push('}');
                    }
                }
            }
            s.push('`');
            s
        }
        Expr::Array { elements, .. } => {
            let items: Vec<String> = elements.iter().map(|e| print_expr(e, 1)).collect();
            format!("[{}]", items.join(", "))
        }
        Expr::Object { props, .. } => {
            let fields: Vec<String> = props
                .iter()
                .map(|(key, value)| {
                    let k = match key {
                        PropKey::Ident(s) => s.clone(),
                        PropKey::Str(s) => quote_js(s),
                    };
                    format!("{}: {}", k, print_expr(value, 1))
                })
                .collect();
            format!("{{ {} }}", fields.join(", "))
        }
        Expr::Unary { op, expr, .. } => {
            let space = if op == "typeof" { " " } else { "" };
            format!("{}{}{}", op, space, print_expr(expr, 15))
        }
        Expr::Binary {
            op, left, right, ..
        } => format!(
            "{} {} {}",
            print_expr(left, own),
            op,
            print_expr(right, own + 1)
        ),
        Expr::Logical {
            op, left, right, ..
        } => format!(
            "{} {} {}",
            print_expr(left, own),
            op,
            print_expr(right, own + 1)
        ),
        Expr::Cond {
            test, cons, alt, ..
        } => format!(
            "{} ? {} : {}",
            print_expr(test, 5),
            print_expr(cons, 4),
            print_expr(alt, 4)
        ),
        Expr::Member {
            object,
            property,
            optional,
            ..
        } => {
            let obj = print_expr(object, 17);
            match property {
                MemberProp::Ident(name) => {
                    if *optional {
                        format!("{}?.{}", obj, name)
                    } else {
                        format!("{}.{}", obj, name)
                    }
                }
                MemberProp::Computed(idx) => {
                    if *optional {
                        format!("{}?.[{}]", obj, print_expr(idx, 0))
                    } else {
                        format!("{}[{}]", obj, print_expr(idx, 0))
                    }
                }
            }
        }
        Expr::Call {
            callee,
            args,
            optional,
            ..
        } => {
            let c = print_expr(callee, 17);
            let a: Vec<String> = args.iter().map(|e| print_expr(e, 1)).collect();
            if *optional {
                format!("{}?.({})", c, a.join(", "))
            } else {
                format!("{}({})", c, a.join(", "))
            }
        }
        Expr::New { callee, args, .. } => {
            let a: Vec<String> = args.iter().map(|e| print_expr(e, 1)).collect();
            format!("new {}({})", callee, a.join(", "))
        }
        Expr::Arrow {
            params,
            body,
            is_async,
            ..
        } => {
            let ps: Vec<String> = params
                .iter()
                .map(|p| match &p.default {
                    Some(d) => format!("{} = {}", p.name, print_expr(d, 1)),
                    None => p.name.clone(),
                })
                .collect();
            let prefix = if *is_async { "async " } else { "" };
            match body {
                ArrowBody::Expr(e) => {
                    let needs_parens = matches!(**e, Expr::Object { .. });
                    let body_text = if needs_parens {
                        format!("({})", print_expr(e, 0))
                    } else {
                        print_expr(e, 3)
                    };
                    format!("{}({}) => {}", prefix, ps.join(", "), body_text)
                }
                ArrowBody::Block(stmts) => {
                    let mut inner = Printer::new();
                    inner.indent = 1;
                    for s in stmts {
                        inner.print_stmt(s);
                    }
                    format!("{}({}) => {{\n{}}}", prefix, ps.join(", "), inner.out)
                }
            }
        }
        Expr::Await { expr, .. } => format!("await {}", print_expr(expr, 15)),
        Expr::Spread { expr, .. } => format!("...{}", print_expr(expr, 2)),
    };
    if own < parent {
        format!("({})", text)
    } else {
        text
    }
}

fn quote_js(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// A `typeof`-style check for simple kinds; complex kinds go through
/// `__tjs.checkType` with an inline type record.
fn type_check_condition(name: &str, t: &Type) -> String {
    let base = match t.kind {
        TypeKind::String => format!("typeof {} === 'string'", name),
        TypeKind::Number | TypeKind::Integer => format!("typeof {} === 'number'", name),
        TypeKind::Boolean => format!("typeof {} === 'boolean'", name),
        TypeKind::Null => format!("{} === null", name),
        TypeKind::Array if t.items.as_ref().map_or(true, |i| i.kind == TypeKind::Any) => {
            format!("Array.isArray({})", name)
        }
        _ => {
            let json = serde_json::to_string(t).unwrap_or_else(|_| "{}".into());
            format!("__tjs.checkType({}, {})", name, json)
        }
    };
    if t.nullable && t.kind != TypeKind::Null && !base.starts_with("__tjs.checkType") {
        format!("{} === null || {}", name, base)
    } else {
        base
    }
}
