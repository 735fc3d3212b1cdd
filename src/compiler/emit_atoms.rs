//! Lowering to the atom AST.
//!
//! The same parsed tree the JS emitter prints is lowered here into the data
//! tree the agent VM interprets: a `seq` root owning atom nodes
//! (`varSet`, `if`, `while`, `map`, `try`, `template`, capability calls, …).
//! Expressions become `$expr` data nodes evaluated by the VM; impure
//! subexpressions (capability calls, templates) are hoisted into atoms that
//! bind temporaries.

use crate::compiler::ast::*;
use crate::compiler::diagnostics::{CompileResult, SyntaxError};
use crate::compiler::preprocess::{Preprocessed, SafetyMode};
use crate::compiler::signature::FunctionSignature;
use serde_json::{json, Value};

/// Surface names that compile straight to capability-backed atoms. Each maps
/// positional call arguments onto the atom's named fields.
const CAPABILITY_CALLS: &[(&str, &str, &[&str])] = &[
    ("fetch", "httpFetch", &["url", "options"]),
    ("httpFetch", "httpFetch", &["url", "options"]),
    ("storeGet", "storeGet", &["key"]),
    ("storeSet", "storeSet", &["key", "value"]),
    ("llm", "llmPredict", &["prompt", "options"]),
    ("llmPredict", "llmPredict", &["prompt", "options"]),
    ("vectorSearch", "vectorSearch", &["query", "options"]),
    ("vectorEmbed", "vectorEmbed", &["text"]),
    ("embed", "vectorEmbed", &["text"]),
    ("sleep", "sleep", &["ms"]),
    ("agentRun", "agentRun", &["agent", "input"]),
    ("storeProcedure", "storeProcedure", &["ast", "ttl", "maxSize"]),
    ("releaseProcedure", "releaseProcedure", &["token"]),
    (
        "clearExpiredProcedures",
        "clearExpiredProcedures",
        &[],
    ),
];

/// Methods that mutate their receiver; they lower to statement-level
/// `methodCall` atoms that write back to the named state variable.
const MUTATING_METHODS: &[&str] = &["push", "pop", "shift", "unshift", "splice", "sort", "reverse"];

const EXPECT_MATCHERS: &[&str] = &[
    "toBe",
    "toEqual",
    "toContain",
    "toBeTruthy",
    "toBeFalsy",
    "toBeNull",
    "toBeUndefined",
    "toThrow",
    "toBeGreaterThan",
    "toBeLessThan",
];

/// Lower one function into an atom AST rooted at a `seq` node.
///
/// The sequence starts with a `varsImport` that copies arguments into state
/// (applying optional-parameter defaults) and, when input validation is on,
/// a `validateArgs` atom carrying the signature.
pub fn lower_function(
    f: &Function,
    pre: &Preprocessed,
    signature: &FunctionSignature,
) -> CompileResult<Value> {
    let mut lowerer = Lowerer { temps: 0 };
    let mut children: Vec<Value> = Vec::new();

    let names: Vec<Value> = f.params.iter().map(|p| json!(p.name)).collect();
    let mut defaults = serde_json::Map::new();
    for p in &f.params {
        let required = signature
            .parameters
            .get(&p.name)
            .map(|s| s.required)
            .unwrap_or(false);
        if let (Some(d), false) = (&p.default, required) {
            defaults.insert(p.name.clone(), lowerer.pure_expr(d)?);
        }
    }
    children.push(json!({
        "op": "varsImport",
        "names": names,
        "defaults": Value::Object(defaults),
    }));

    let validate = pre.module_safety != SafetyMode::None
        && !pre.unsafe_functions.contains(&f.name);
    if validate {
        children.push(json!({
            "op": "validateArgs",
            "meta": serde_json::to_value(signature).unwrap_or(Value::Null),
        }));
    }

    lowerer.lower_stmts(&f.body, &mut children)?;
    Ok(json!({ "op": "seq", "children": children }))
}

/// Lower a bare statement list (used for test blocks).
pub fn lower_statements(stmts: &[Stmt]) -> CompileResult<Value> {
    let mut lowerer = Lowerer { temps: 0 };
    let mut children = Vec::new();
    lowerer.lower_stmts(stmts, &mut children)?;
    Ok(json!({ "op": "seq", "children": children }))
}

struct Lowerer {
    temps: usize,
}

impl Lowerer {
    fn temp(&mut self) -> String {
        let name = format!("__t{}", self.temps);
        self.temps += 1;
        name
    }

    fn err(&self, message: impl Into<String>, span: Span) -> SyntaxError {
        SyntaxError::new(message, span.line, span.column)
    }

    fn lower_stmts(&mut self, stmts: &[Stmt], out: &mut Vec<Value>) -> CompileResult<()> {
        for stmt in stmts {
            self.lower_stmt(stmt, out)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt, out: &mut Vec<Value>) -> CompileResult<()> {
        match stmt {
            Stmt::Empty => Ok(()),
            Stmt::VarDecl {
                kind, name, init, ..
            } => {
                let value = match init {
                    Some(e) => self.lower_expr(e, out)?,
                    None => json!({ "$expr": "literal", "value": null }),
                };
                let op = if *kind == DeclKind::Const {
                    "constSet"
                } else {
                    "varSet"
                };
                out.push(json!({ "op": op, "name": name, "value": value }));
                Ok(())
            }
            Stmt::Assign {
                target, op, value, ..
            } => self.lower_assign(target, op, value, out),
            Stmt::Update { target, op, .. } => {
                let name = target
                    .as_ident()
                    .ok_or_else(|| self.err("Update target must be a variable", target.span()))?;
                let delta = if op == "++" { "+" } else { "-" };
                out.push(json!({
                    "op": "varSet",
                    "name": name,
                    "value": {
                        "$expr": "binary",
                        "op": delta,
                        "left": { "$expr": "ident", "name": name },
                        "right": { "$expr": "literal", "value": 1 },
                    },
                }));
                Ok(())
            }
            Stmt::If {
                cond, then, alt, ..
            } => {
                let cond = self.lower_expr(cond, out)?;
                let mut then_children = Vec::new();
                self.lower_stmts(then, &mut then_children)?;
                let mut node = json!({ "op": "if", "cond": cond, "then": then_children });
                if let Some(alt) = alt {
                    let mut else_children = Vec::new();
                    self.lower_stmts(alt, &mut else_children)?;
                    node["else"] = Value::Array(else_children);
                }
                out.push(node);
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                // The condition re-evaluates per iteration, so impure
                // subexpressions cannot be hoisted out of it.
                let mut hoisted = Vec::new();
                let cond = self.lower_expr(cond, &mut hoisted)?;
                if !hoisted.is_empty() {
                    return Err(self.err(
                        "while conditions must be pure expressions; bind the value first",
                        stmt.span(),
                    ));
                }
                let mut body_children = Vec::new();
                self.lower_stmts(body, &mut body_children)?;
                out.push(json!({ "op": "while", "cond": cond, "body": body_children }));
                Ok(())
            }
            Stmt::ForOf {
                name, iter, body, ..
            } => {
                let items = self.lower_expr(iter, out)?;
                let mut body_children = Vec::new();
                self.lower_stmts(body, &mut body_children)?;
                // The loop marker keeps for-of semantics: a return in the
                // body returns from the function, not from the iteration.
                out.push(json!({
                    "op": "map",
                    "items": items,
                    "as": name,
                    "body": body_children,
                    "loop": true,
                }));
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let mut node = json!({ "op": "return" });
                if let Some(e) = value {
                    node["value"] = self.lower_expr(e, out)?;
                }
                out.push(node);
                Ok(())
            }
            Stmt::Try {
                body,
                catch_param,
                catch,
                finally,
                ..
            } => {
                let mut try_children = Vec::new();
                self.lower_stmts(body, &mut try_children)?;
                let mut catch_children = Vec::new();
                if let Some(c) = catch {
                    self.lower_stmts(c, &mut catch_children)?;
                }
                let mut node = json!({
                    "op": "try",
                    "try": try_children,
                    "catch": catch_children,
                });
                if let Some(p) = catch_param {
                    node["as"] = json!(p);
                }
                out.push(node);
                if let Some(fin) = finally {
                    self.lower_stmts(fin, out)?;
                }
                Ok(())
            }
            Stmt::Block { body, .. } => {
                let mut children = Vec::new();
                self.lower_stmts(body, &mut children)?;
                out.push(json!({ "op": "seq", "children": children }));
                Ok(())
            }
            Stmt::Break { .. } => {
                out.push(json!({ "op": "break" }));
                Ok(())
            }
            Stmt::Continue { .. } => {
                out.push(json!({ "op": "continue" }));
                Ok(())
            }
            Stmt::Expr { expr, .. } => self.lower_expr_stmt(expr, out),
            Stmt::FunctionDecl(f) => Err(self.err(
                "Nested function declarations are not supported in agent programs",
                f.span,
            )),
        }
    }

    fn lower_assign(
        &mut self,
        target: &Expr,
        op: &str,
        value: &Expr,
        out: &mut Vec<Value>,
    ) -> CompileResult<()> {
        let rhs = self.lower_expr(value, out)?;
        let rhs = if op == "=" {
            rhs
        } else {
            let bin_op = &op[..op.len() - 1];
            let current = self.pure_expr(target)?;
            json!({ "$expr": "binary", "op": bin_op, "left": current, "right": rhs })
        };
        match target {
            Expr::Ident { name, .. } => {
                out.push(json!({ "op": "varSet", "name": name, "value": rhs }));
                Ok(())
            }
            Expr::Member {
                object, property, ..
            } => {
                // Resolve the base variable and the property path.
                let mut path = Vec::new();
                let base = collect_member_path(object, property, &mut path, self)?;
                out.push(json!({
                    "op": "propSet",
                    "target": base,
                    "path": path,
                    "value": rhs,
                }));
                Ok(())
            }
            other => Err(self.err("Invalid assignment target", other.span())),
        }
    }

    fn lower_expr_stmt(&mut self, expr: &Expr, out: &mut Vec<Value>) -> CompileResult<()> {
        // expect(x).matcher(y) assertions.
        if let Some(node) = self.lower_expect(expr, out)? {
            out.push(node);
            return Ok(());
        }
        // Mutating method calls on a state variable.
        if let Expr::Call { callee, args, .. } = expr {
            if let Expr::Member {
                object,
                property: MemberProp::Ident(method),
                ..
            } = callee.as_ref()
            {
                if MUTATING_METHODS.contains(&method.as_str()) {
                    if let Some(target) = object.as_ident() {
                        let mut lowered_args = Vec::new();
                        for a in args {
                            lowered_args.push(self.lower_expr(a, out)?);
                        }
                        out.push(json!({
                            "op": "methodCall",
                            "target": target,
                            "method": method,
                            "args": lowered_args,
                        }));
                        return Ok(());
                    }
                }
            }
        }
        // Anything else: lower for its effects; a leftover pure expression
        // has no observable behavior and is dropped.
        let _ = self.lower_expr(expr, out)?;
        Ok(())
    }

    /// Recognize `expect(actual).matcher(expected?)`.
    fn lower_expect(
        &mut self,
        expr: &Expr,
        out: &mut Vec<Value>,
    ) -> CompileResult<Option<Value>> {
        let Expr::Call { callee, args, .. } = expr else {
            return Ok(None);
        };
        let Expr::Member {
            object,
            property: MemberProp::Ident(matcher),
            ..
        } = callee.as_ref()
        else {
            return Ok(None);
        };
        if !EXPECT_MATCHERS.contains(&matcher.as_str()) {
            return Ok(None);
        }
        let Expr::Call {
            callee: expect_callee,
            args: expect_args,
            ..
        } = object.as_ref()
        else {
            return Ok(None);
        };
        if expect_callee.as_ident() != Some("expect") || expect_args.len() != 1 {
            return Ok(None);
        }
        let actual = self.lower_expr(&expect_args[0], out)?;
        let mut node = json!({
            "op": "testAssert",
            "matcher": matcher,
            "actual": actual,
        });
        if let Some(first) = args.first() {
            node["expected"] = self.lower_expr(first, out)?;
        }
        Ok(Some(node))
    }

    /// Lower an expression. Impure parts (capability calls, templates) are
    /// appended to `out` as atoms binding temporaries; the returned value is
    /// always a pure `$expr` node.
    fn lower_expr(&mut self, expr: &Expr, out: &mut Vec<Value>) -> CompileResult<Value> {
        match expr {
            Expr::Number { value, raw, .. } => {
                Ok(json!({ "$expr": "literal", "value": number_value(*value, raw) }))
            }
            Expr::Str { value, .. } => Ok(json!({ "$expr": "literal", "value": value })),
            Expr::Bool { value, .. } => Ok(json!({ "$expr": "literal", "value": value })),
            Expr::Null { .. } | Expr::Undefined { .. } => {
                Ok(json!({ "$expr": "literal", "value": null }))
            }
            Expr::Ident { name, .. } => Ok(json!({ "$expr": "ident", "name": name })),
            Expr::Template { parts, .. } => {
                let mut lowered_parts = Vec::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => lowered_parts.push(json!({ "text": t })),
                        TemplatePart::Expr(e) => {
                            let node = self.lower_expr(e, out)?;
                            lowered_parts.push(json!({ "expr": node }));
                        }
                    }
                }
                let result = self.temp();
                out.push(json!({
                    "op": "template",
                    "parts": lowered_parts,
                    "result": result,
                }));
                Ok(json!({ "$expr": "ident", "name": result }))
            }
            Expr::Array { elements, .. } => {
                let mut items = Vec::new();
                for e in elements {
                    if let Expr::Spread { span, .. } = e {
                        return Err(self.err(
                            "Spread is not supported in agent programs",
                            *span,
                        ));
                    }
                    items.push(self.lower_expr(e, out)?);
                }
                Ok(json!({ "$expr": "array", "items": items }))
            }
            Expr::Object { props, .. } => {
                let mut fields = Vec::new();
                for (key, value) in props {
                    let v = self.lower_expr(value, out)?;
                    fields.push(json!({ "key": key.name(), "value": v }));
                }
                Ok(json!({ "$expr": "object", "fields": fields }))
            }
            Expr::Unary { op, expr, .. } => {
                let inner = self.lower_expr(expr, out)?;
                Ok(json!({ "$expr": "unary", "op": op, "expr": inner }))
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let l = self.lower_expr(left, out)?;
                let r = self.lower_expr(right, out)?;
                Ok(json!({ "$expr": "binary", "op": op, "left": l, "right": r }))
            }
            Expr::Logical {
                op, left, right, ..
            } => {
                // The left side always evaluates; its effects hoist normally.
                let l = self.lower_expr(left, out)?;
                let mut right_hoist = Vec::new();
                let r = self.lower_expr(right, &mut right_hoist)?;
                if right_hoist.is_empty() {
                    // Pure right side: the expression evaluator already
                    // short-circuits.
                    return Ok(json!({ "$expr": "logical", "op": op, "left": l, "right": r }));
                }
                // Impure right side: guard its atoms so they only run when
                // the operator actually needs the right value.
                let tmp = self.temp();
                out.push(json!({ "op": "varSet", "name": tmp.as_str(), "value": l }));
                let current = json!({ "$expr": "ident", "name": tmp.as_str() });
                let guard = match op.as_str() {
                    "&&" => current,
                    "||" => json!({ "$expr": "unary", "op": "!", "expr": current }),
                    _ => json!({
                        "$expr": "binary",
                        "op": "==",
                        "left": current,
                        "right": { "$expr": "literal", "value": null },
                    }),
                };
                let mut branch = right_hoist;
                branch.push(json!({ "op": "varSet", "name": tmp.as_str(), "value": r }));
                out.push(json!({ "op": "if", "cond": guard, "then": branch }));
                Ok(json!({ "$expr": "ident", "name": tmp.as_str() }))
            }
            Expr::Cond {
                test, cons, alt, ..
            } => {
                let t = self.lower_expr(test, out)?;
                let mut cons_hoist = Vec::new();
                let c = self.lower_expr(cons, &mut cons_hoist)?;
                let mut alt_hoist = Vec::new();
                let a = self.lower_expr(alt, &mut alt_hoist)?;
                if cons_hoist.is_empty() && alt_hoist.is_empty() {
                    return Ok(json!({ "$expr": "cond", "test": t, "cons": c, "alt": a }));
                }
                // A branch performs calls: lower to an if atom so only the
                // taken branch's atoms execute.
                let tmp = self.temp();
                let mut then_branch = cons_hoist;
                then_branch.push(json!({ "op": "varSet", "name": tmp.as_str(), "value": c }));
                let mut else_branch = alt_hoist;
                else_branch.push(json!({ "op": "varSet", "name": tmp.as_str(), "value": a }));
                out.push(json!({
                    "op": "if",
                    "cond": t,
                    "then": then_branch,
                    "else": else_branch,
                }));
                Ok(json!({ "$expr": "ident", "name": tmp.as_str() }))
            }
            Expr::Member {
                object,
                property,
                optional,
                ..
            } => {
                let obj = self.lower_expr(object, out)?;
                match property {
                    MemberProp::Ident(name) => Ok(json!({
                        "$expr": "member",
                        "object": obj,
                        "property": name,
                        "optional": optional,
                    })),
                    MemberProp::Computed(idx) => {
                        let i = self.lower_expr(idx, out)?;
                        Ok(json!({
                            "$expr": "index",
                            "object": obj,
                            "index": i,
                            "optional": optional,
                        }))
                    }
                }
            }
            Expr::Await { expr, .. } => self.lower_expr(expr, out),
            Expr::Call { .. } => self.lower_call(expr, out),
            Expr::New { callee, args, .. } => {
                // Runtime wrapper types: Set and Date.
                match callee.as_str() {
                    "Set" => {
                        let arg = match args.first() {
                            Some(a) => self.lower_expr(a, out)?,
                            None => json!({ "$expr": "array", "items": [] }),
                        };
                        Ok(json!({
                            "$expr": "methodCall",
                            "object": { "$expr": "ident", "name": "Set" },
                            "method": "from",
                            "args": [arg],
                            "optional": false,
                        }))
                    }
                    "Date" => Ok(json!({
                        "$expr": "methodCall",
                        "object": { "$expr": "ident", "name": "Date" },
                        "method": "now",
                        "args": [],
                        "optional": false,
                    })),
                    other => Err(self.err(
                        format!("'new {}' is not supported in agent programs", other),
                        expr.span(),
                    )),
                }
            }
            Expr::Arrow { span, .. } => Err(self.err(
                "Lambdas are only supported as collection callbacks",
                *span,
            )),
            Expr::Spread { span, .. } => Err(self.err(
                "Spread is not supported in agent programs",
                *span,
            )),
        }
    }

    fn lower_call(&mut self, expr: &Expr, out: &mut Vec<Value>) -> CompileResult<Value> {
        let Expr::Call { callee, args, .. } = expr else {
            unreachable!()
        };

        // Collection methods with lambda callbacks become scope atoms.
        if let Expr::Member {
            object,
            property: MemberProp::Ident(method),
            ..
        } = callee.as_ref()
        {
            match method.as_str() {
                "map" | "filter" | "find" | "forEach" => {
                    if let Some(Expr::Arrow { params, body, .. }) = args.first() {
                        return self.lower_collection(
                            method, object, params, body, None, out, expr.span(),
                        );
                    }
                }
                "reduce" => {
                    if let Some(Expr::Arrow { params, body, .. }) = args.first() {
                        let initial = args.get(1);
                        return self.lower_collection(
                            method, object, params, body, initial, out, expr.span(),
                        );
                    }
                }
                _ => {}
            }
            // Pure method call on a value.
            let obj = self.lower_expr(object, out)?;
            let mut lowered_args = Vec::new();
            for a in args {
                if let Expr::Arrow { span, .. } = a {
                    return Err(self.err(
                        format!("'{}' does not take a lambda in agent programs", method),
                        *span,
                    ));
                }
                lowered_args.push(self.lower_expr(a, out)?);
            }
            return Ok(json!({
                "$expr": "methodCall",
                "object": obj,
                "method": method,
                "args": lowered_args,
                "optional": false,
            }));
        }

        let Some(name) = callee.as_ident() else {
            return Err(self.err("Unsupported call form in agent programs", expr.span()));
        };

        // Primitive conversions stay pure expressions (the try-without-catch
        // rewrite relies on `String(e)` never hoisting).
        if matches!(name, "String" | "Number" | "Boolean") && args.len() == 1 {
            let arg = self.lower_expr(&args[0], out)?;
            return Ok(match name {
                "String" => json!({
                    "$expr": "methodCall",
                    "object": arg,
                    "method": "toString",
                    "args": [],
                    "optional": false,
                }),
                "Number" => json!({ "$expr": "unary", "op": "+", "expr": arg }),
                _ => json!({
                    "$expr": "unary",
                    "op": "!",
                    "expr": { "$expr": "unary", "op": "!", "expr": arg },
                }),
            });
        }

        // Identity helpers evaluate as deep equality.
        if name == "Is" || name == "IsNot" {
            if args.len() != 2 {
                return Err(self.err(format!("{} takes two arguments", name), expr.span()));
            }
            let l = self.lower_expr(&args[0], out)?;
            let r = self.lower_expr(&args[1], out)?;
            return Ok(json!({ "$expr": "binary", "op": name, "left": l, "right": r }));
        }

        // Capability surface.
        if let Some((_, op, fields)) = CAPABILITY_CALLS.iter().find(|(n, _, _)| *n == name) {
            let mut node = serde_json::Map::new();
            node.insert("op".into(), json!(op));
            for (i, field) in fields.iter().enumerate() {
                if let Some(arg) = args.get(i) {
                    node.insert(field.to_string(), self.lower_expr(arg, out)?);
                }
            }
            let result = self.temp();
            node.insert("result".into(), json!(result));
            out.push(Value::Object(node));
            return Ok(json!({ "$expr": "ident", "name": result }));
        }

        // Unknown function: surfaces as a runtime monadic error, and lets the
        // signature-test runner detect unresolved references.
        let mut lowered_args = Vec::new();
        for a in args {
            lowered_args.push(self.lower_expr(a, out)?);
        }
        let result = self.temp();
        out.push(json!({
            "op": "call",
            "name": name,
            "args": lowered_args,
            "result": result,
        }));
        Ok(json!({ "$expr": "ident", "name": result }))
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_collection(
        &mut self,
        method: &str,
        object: &Expr,
        params: &[Param],
        body: &ArrowBody,
        initial: Option<&Expr>,
        out: &mut Vec<Value>,
        span: Span,
    ) -> CompileResult<Value> {
        let items = self.lower_expr(object, out)?;
        let (op, as_name, accumulator) = match method {
            "reduce" => {
                if params.len() < 2 {
                    return Err(self.err("reduce callback takes (acc, item)", span));
                }
                ("reduce", params[1].name.clone(), Some(params[0].name.clone()))
            }
            "forEach" => (
                "map",
                params
                    .first()
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "_".into()),
                None,
            ),
            other => (
                other,
                params
                    .first()
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "_".into()),
                None,
            ),
        };

        // Lambda bodies end in a return so the child scope yields a value.
        let mut body_children = Vec::new();
        match body {
            ArrowBody::Expr(e) => {
                let mut inner = Vec::new();
                let value = self.lower_expr(e, &mut inner)?;
                body_children.extend(inner);
                body_children.push(json!({ "op": "return", "value": value }));
            }
            ArrowBody::Block(stmts) => {
                self.lower_stmts(stmts, &mut body_children)?;
            }
        }

        let mut node = serde_json::Map::new();
        node.insert("op".into(), json!(op));
        node.insert("items".into(), items);
        node.insert("as".into(), json!(as_name));
        if let Some(acc) = accumulator {
            node.insert("accumulator".into(), json!(acc));
        }
        if let Some(init) = initial {
            let v = self.lower_expr(init, out)?;
            node.insert("initial".into(), v);
        }
        node.insert("body".into(), Value::Array(body_children));
        let is_for_each = method == "forEach";
        if !is_for_each {
            let result = self.temp();
            node.insert("result".into(), json!(result.clone()));
            out.push(Value::Object(node));
            return Ok(json!({ "$expr": "ident", "name": result }));
        }
        out.push(Value::Object(node));
        Ok(json!({ "$expr": "literal", "value": null }))
    }

    /// Lower an expression that must be pure (no hoisted atoms).
    fn pure_expr(&mut self, expr: &Expr) -> CompileResult<Value> {
        let mut hoisted = Vec::new();
        let value = self.lower_expr(expr, &mut hoisted)?;
        if !hoisted.is_empty() {
            return Err(self.err(
                "Expression must not perform calls here",
                expr.span(),
            ));
        }
        Ok(value)
    }
}

fn collect_member_path(
    object: &Expr,
    property: &MemberProp,
    path: &mut Vec<Value>,
    lowerer: &mut Lowerer,
) -> CompileResult<String> {
    let base = match object {
        Expr::Ident { name, .. } => name.clone(),
        Expr::Member {
            object: inner,
            property: inner_prop,
            ..
        } => collect_member_path(inner, inner_prop, path, lowerer)?,
        other => {
            return Err(lowerer.err("Assignment target must start at a variable", other.span()))
        }
    };
    match property {
        MemberProp::Ident(name) => path.push(json!(name)),
        MemberProp::Computed(idx) => path.push(lowerer.pure_expr(idx)?),
    }
    Ok(base)
}

fn number_value(value: f64, raw: &str) -> Value {
    if !raw.contains('.') && !raw.contains('e') && !raw.contains('E') && value.fract() == 0.0 {
        json!(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_module;
    use crate::compiler::preprocess::preprocess;
    use crate::compiler::signature::build_signature;

    fn lower(src: &str) -> Value {
        let pre = preprocess(src).unwrap();
        let program = parse_module(&pre.source).unwrap();
        let f = program.functions()[0];
        let sig = build_signature(f, &pre, true).unwrap();
        lower_function(f, &pre, &sig).unwrap()
    }

    #[test]
    fn root_is_a_seq() {
        let ast = lower("function f(x: 1) { return x }");
        assert_eq!(ast["op"], "seq");
        assert_eq!(ast["children"][0]["op"], "varsImport");
    }

    #[test]
    fn const_lowers_to_const_set() {
        let ast = lower("function f() { const a = 1; let b = 2; return a + b }");
        let children = ast["children"].as_array().unwrap();
        assert_eq!(children[1]["op"], "constSet");
        assert_eq!(children[2]["op"], "varSet");
    }

    #[test]
    fn while_and_update() {
        let ast = lower("function f(n: 3) { let i = 0; while (i < n) { i++ } return i }");
        let children = ast["children"].as_array().unwrap();
        let w = children
            .iter()
            .find(|c| c["op"] == "while")
            .expect("while atom");
        assert_eq!(w["cond"]["$expr"], "binary");
        assert_eq!(w["body"][0]["op"], "varSet");
    }

    #[test]
    fn for_of_lowers_to_map() {
        let ast = lower("function f(xs: [1]) { for (const x of xs) { x } return 0 }");
        let children = ast["children"].as_array().unwrap();
        let m = children.iter().find(|c| c["op"] == "map").unwrap();
        assert_eq!(m["as"], "x");
        assert!(m.get("result").is_none());
    }

    #[test]
    fn map_with_lambda() {
        let ast = lower("function f(xs: [1]) { return xs.map(x => x * 2) }");
        let children = ast["children"].as_array().unwrap();
        let m = children.iter().find(|c| c["op"] == "map").unwrap();
        assert_eq!(m["as"], "x");
        let body = m["body"].as_array().unwrap();
        assert_eq!(body.last().unwrap()["op"], "return");
        // The return consumes the promoted temp.
        let ret = children.iter().find(|c| c["op"] == "return").unwrap();
        assert_eq!(ret["value"]["$expr"], "ident");
    }

    #[test]
    fn reduce_carries_accumulator_and_initial() {
        let ast = lower("function f(xs: [1]) { return xs.reduce((acc, x) => acc + x, 0) }");
        let children = ast["children"].as_array().unwrap();
        let r = children.iter().find(|c| c["op"] == "reduce").unwrap();
        assert_eq!(r["accumulator"], "acc");
        assert_eq!(r["as"], "x");
        assert_eq!(r["initial"]["value"], 0);
    }

    #[test]
    fn fetch_hoists_to_http_atom() {
        let ast =
            lower("function f(url: 'http://x') { const r = fetch(url); return r }");
        let children = ast["children"].as_array().unwrap();
        let h = children.iter().find(|c| c["op"] == "httpFetch").unwrap();
        assert_eq!(h["url"]["$expr"], "ident");
        assert!(h["result"].as_str().unwrap().starts_with("__t"));
    }

    #[test]
    fn template_becomes_atom() {
        let ast = lower("function f(name: 'x') { return `hi ${name}` }");
        let children = ast["children"].as_array().unwrap();
        let t = children.iter().find(|c| c["op"] == "template").unwrap();
        assert_eq!(t["parts"][0]["text"], "hi ");
        assert_eq!(t["parts"][1]["expr"]["$expr"], "ident");
    }

    #[test]
    fn try_catch_with_binding() {
        let ast = lower(
            "function f() { try { storeGet('k') } catch (err) { return err } return 1 }",
        );
        let children = ast["children"].as_array().unwrap();
        let t = children.iter().find(|c| c["op"] == "try").unwrap();
        assert_eq!(t["as"], "err");
        assert!(t["try"].as_array().is_some());
        assert!(t["catch"].as_array().is_some());
    }

    #[test]
    fn expect_lowers_to_test_assert() {
        let ast = lower_statements(
            parse_module("expect(1 + 1).toBe(2)").unwrap().body.as_slice(),
        )
        .unwrap();
        let node = &ast["children"][0];
        assert_eq!(node["op"], "testAssert");
        assert_eq!(node["matcher"], "toBe");
        assert_eq!(node["expected"]["value"], 2);
    }

    #[test]
    fn mutating_method_is_statement_atom() {
        let ast = lower("function f() { let xs = []; xs.push(1); return xs }");
        let children = ast["children"].as_array().unwrap();
        let m = children.iter().find(|c| c["op"] == "methodCall").unwrap();
        assert_eq!(m["target"], "xs");
        assert_eq!(m["method"], "push");
    }

    #[test]
    fn member_assignment_lowers_to_prop_set() {
        let ast = lower("function f() { let o = {a: 1}; o.a = 2; return o }");
        let children = ast["children"].as_array().unwrap();
        let p = children.iter().find(|c| c["op"] == "propSet").unwrap();
        assert_eq!(p["target"], "o");
        assert_eq!(p["path"][0], "a");
    }

    #[test]
    fn impure_logical_right_side_is_guarded() {
        let ast = lower("function f(ok: true, url: 'http://x') { const r = ok || fetch(url); return r }");
        let children = ast["children"].as_array().unwrap();
        // The fetch atom must not sit in the top-level sequence; it lives
        // inside the guard's then-branch.
        assert!(!children.iter().any(|c| c["op"] == "httpFetch"));
        let guard = children.iter().find(|c| c["op"] == "if").unwrap();
        assert_eq!(guard["cond"]["$expr"], "unary");
        let branch = guard["then"].as_array().unwrap();
        assert!(branch.iter().any(|c| c["op"] == "httpFetch"));
    }

    #[test]
    fn pure_logical_stays_an_expression() {
        let ast = lower("function f(a: 1, b: 2) { return a > 0 && b > 0 }");
        let children = ast["children"].as_array().unwrap();
        assert!(!children.iter().any(|c| c["op"] == "if"));
        let ret = children.iter().find(|c| c["op"] == "return").unwrap();
        assert_eq!(ret["value"]["$expr"], "logical");
    }

    #[test]
    fn ternary_with_calls_lowers_to_if_branches() {
        let ast = lower(
            "function pick(flag: true, a: 'u1', b: 'u2') { const r = flag ? fetch(a) : fetch(b); return r }",
        );
        let children = ast["children"].as_array().unwrap();
        assert!(!children.iter().any(|c| c["op"] == "httpFetch"));
        let guard = children.iter().find(|c| c["op"] == "if").unwrap();
        let then_branch = guard["then"].as_array().unwrap();
        let else_branch = guard["else"].as_array().unwrap();
        assert!(then_branch.iter().any(|c| c["op"] == "httpFetch"));
        assert!(else_branch.iter().any(|c| c["op"] == "httpFetch"));
    }

    #[test]
    fn unknown_call_becomes_call_atom() {
        let ast = lower("function f() { return helper(1) }");
        let children = ast["children"].as_array().unwrap();
        let c = children.iter().find(|c| c["op"] == "call").unwrap();
        assert_eq!(c["name"], "helper");
    }

    #[test]
    fn optional_params_get_defaults() {
        let ast = lower("function f(a: 1, b = 5) { return a + b }");
        let imp = &ast["children"][0];
        assert!(imp["defaults"].get("a").is_none());
        assert_eq!(imp["defaults"]["b"]["value"], 5);
    }
}
