//! Recursive-descent parser for the ECMAScript-2022 subset.
//!
//! The parser consumes preprocessed source (see `preprocess`), so the input
//! is plain JavaScript. Validation happens here too: modules, classes,
//! `throw`, `switch` and C-style `for` are rejected with located errors
//! rather than parsed.

use crate::compiler::ast::*;
use crate::compiler::diagnostics::{CompileResult, SyntaxError};
use crate::compiler::lexer::{Comment, CommentKind, Lexer, Token, TokenKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Parse a full module.
pub fn parse_module(source: &str) -> CompileResult<Program> {
    let (tokens, comments) = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        comments,
        pos: 0,
    };
    parser.parse_program()
}

/// Parse a module and require exactly one top-level function declaration.
pub fn parse_single_function(source: &str) -> CompileResult<Program> {
    let program = parse_module(source)?;
    let count = program.functions().len();
    if count != 1 {
        return Err(SyntaxError::new(
            format!(
                "Expected exactly one top-level function declaration, found {}",
                count
            ),
            1,
            1,
        ));
    }
    Ok(program)
}

/// Parse a standalone expression (used for template parts and example text).
pub fn parse_expression_source(source: &str) -> CompileResult<Expr> {
    let (tokens, comments) = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        comments,
        pos: 0,
    };
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    comments: Vec<Comment>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> CompileResult<Token> {
        if self.peek().is_punct(p) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&format!("'{}'", p)))
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.peek().is_ident(name) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> CompileResult<(String, Span)> {
        let t = self.peek().clone();
        match &t.kind {
            TokenKind::Ident(name) => {
                self.bump();
                Ok((name.clone(), t.span))
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let t = self.peek();
        let found = match &t.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Ident(s) => format!("'{}'", s),
            TokenKind::Punct(p) => format!("'{}'", p),
            TokenKind::Number { raw, .. } => format!("number '{}'", raw),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Template(_) => "template literal".to_string(),
        };
        SyntaxError::new(
            format!("Expected {}, found {}", expected, found),
            t.span.line,
            t.span.column,
        )
    }

    fn expect_eof(&mut self) -> CompileResult<()> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    // === Statements ===

    fn parse_program(&mut self) -> CompileResult<Program> {
        let mut body = Vec::new();
        while !self.at_eof() {
            self.parse_statement(&mut body)?;
        }
        Ok(Program { body })
    }

    fn parse_block(&mut self) -> CompileResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.peek().is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected("'}'"));
            }
            self.parse_statement(&mut body)?;
        }
        self.bump();
        Ok(body)
    }

    fn parse_statement(&mut self, out: &mut Vec<Stmt>) -> CompileResult<()> {
        let t = self.peek().clone();
        match &t.kind {
            TokenKind::Punct(";") => {
                self.bump();
                out.push(Stmt::Empty);
                Ok(())
            }
            TokenKind::Punct("{") => {
                let body = self.parse_block()?;
                out.push(Stmt::Block { body, span: t.span });
                Ok(())
            }
            TokenKind::Ident(name) => match name.as_str() {
                "const" | "let" | "var" => self.parse_var_decl(out),
                "function" => {
                    let f = self.parse_function_decl(false)?;
                    out.push(Stmt::FunctionDecl(f));
                    Ok(())
                }
                "async" if self.peek_at(1).is_ident("function") => {
                    self.bump();
                    let f = self.parse_function_decl(true)?;
                    out.push(Stmt::FunctionDecl(f));
                    Ok(())
                }
                "if" => {
                    out.push(self.parse_if()?);
                    Ok(())
                }
                "while" => {
                    out.push(self.parse_while()?);
                    Ok(())
                }
                "for" => {
                    out.push(self.parse_for()?);
                    Ok(())
                }
                "return" => {
                    out.push(self.parse_return()?);
                    Ok(())
                }
                "try" => {
                    out.push(self.parse_try()?);
                    Ok(())
                }
                "break" => {
                    self.bump();
                    self.eat_punct(";");
                    out.push(Stmt::Break { span: t.span });
                    Ok(())
                }
                "continue" => {
                    self.bump();
                    self.eat_punct(";");
                    out.push(Stmt::Continue { span: t.span });
                    Ok(())
                }
                "import" | "export" => Err(SyntaxError::new(
                    format!("'{}' is not allowed; modules are closed", name),
                    t.span.line,
                    t.span.column,
                )),
                "class" => Err(SyntaxError::new(
                    "'class' is not allowed; use plain objects and functions",
                    t.span.line,
                    t.span.column,
                )),
                "throw" => Err(SyntaxError::new(
                    "'throw' is not allowed; return a monadic error instead",
                    t.span.line,
                    t.span.column,
                )),
                "switch" => Err(SyntaxError::new(
                    "'switch' is not allowed; use if/else chains",
                    t.span.line,
                    t.span.column,
                )),
                "do" | "with" => Err(SyntaxError::new(
                    format!("'{}' statements are not supported", name),
                    t.span.line,
                    t.span.column,
                )),
                _ => self.parse_expr_statement(out),
            },
            _ => self.parse_expr_statement(out),
        }
    }

    fn parse_var_decl(&mut self, out: &mut Vec<Stmt>) -> CompileResult<()> {
        let kw = self.bump();
        let kind = match kw.ident() {
            Some("const") => DeclKind::Const,
            Some("let") => DeclKind::Let,
            _ => DeclKind::Var,
        };
        loop {
            let (name, span) = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(SyntaxError::new(
                    format!("Missing initializer in const declaration '{}'", name),
                    span.line,
                    span.column,
                ));
            }
            out.push(Stmt::VarDecl {
                kind,
                name,
                init,
                span,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.eat_punct(";");
        Ok(())
    }

    fn parse_function_decl(&mut self, is_async: bool) -> CompileResult<Function> {
        let kw = self.bump(); // 'function'
        let (name, _) = self.expect_ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        let (description, param_docs) = self.attached_docs(kw.span.line);
        Ok(Function {
            name,
            params,
            body,
            is_async,
            span: kw.span,
            description,
            param_docs,
        })
    }

    fn parse_params(&mut self) -> CompileResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.peek().is_punct(")") {
            if self.at_eof() {
                return Err(self.unexpected("')'"));
            }
            let (name, span) = self.expect_ident()?;
            let default = if self.eat_punct("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                name,
                default,
                span,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn parse_if(&mut self) -> CompileResult<Stmt> {
        let kw = self.bump();
        self.expect_punct("(")?;
        let cond = self.parse_expr()?;
        self.expect_punct(")")?;
        let then = self.parse_branch_body()?;
        let alt = if self.eat_ident("else") {
            if self.peek().is_ident("if") {
                let mut nested = Vec::new();
                let stmt = self.parse_if()?;
                nested.push(stmt);
                Some(nested)
            } else {
                Some(self.parse_branch_body()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            alt,
            span: kw.span,
        })
    }

    /// A braced block or a single statement.
    fn parse_branch_body(&mut self) -> CompileResult<Vec<Stmt>> {
        if self.peek().is_punct("{") {
            self.parse_block()
        } else {
            let mut body = Vec::new();
            self.parse_statement(&mut body)?;
            Ok(body)
        }
    }

    fn parse_while(&mut self) -> CompileResult<Stmt> {
        let kw = self.bump();
        self.expect_punct("(")?;
        let cond = self.parse_expr()?;
        self.expect_punct(")")?;
        let body = self.parse_branch_body()?;
        Ok(Stmt::While {
            cond,
            body,
            span: kw.span,
        })
    }

    fn parse_for(&mut self) -> CompileResult<Stmt> {
        let kw = self.bump();
        self.expect_punct("(")?;
        let decl = match self.peek().ident() {
            Some("const") => {
                self.bump();
                Some(DeclKind::Const)
            }
            Some("let") => {
                self.bump();
                Some(DeclKind::Let)
            }
            Some("var") => {
                self.bump();
                Some(DeclKind::Var)
            }
            _ => None,
        };
        let (name, name_span) = match self.peek().kind.clone() {
            TokenKind::Ident(n) => {
                let span = self.peek().span;
                self.bump();
                (n, span)
            }
            _ => {
                return Err(SyntaxError::new(
                    "Traditional for loops are not allowed; use while or for…of",
                    kw.span.line,
                    kw.span.column,
                ))
            }
        };
        if self.eat_ident("of") {
            let iter = self.parse_expr()?;
            self.expect_punct(")")?;
            let body = self.parse_branch_body()?;
            return Ok(Stmt::ForOf {
                decl,
                name,
                iter,
                body,
                span: kw.span,
            });
        }
        if self.peek().is_ident("in") {
            return Err(SyntaxError::new(
                "'for…in' is not allowed; iterate Object.keys with for…of",
                name_span.line,
                name_span.column,
            ));
        }
        Err(SyntaxError::new(
            "Traditional for loops are not allowed; use while or for…of",
            kw.span.line,
            kw.span.column,
        ))
    }

    fn parse_return(&mut self) -> CompileResult<Stmt> {
        let kw = self.bump();
        let value = if self.peek().is_punct(";")
            || self.peek().is_punct("}")
            || self.at_eof()
            || self.peek().span.line > kw.span.line
        {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.eat_punct(";");
        Ok(Stmt::Return {
            value,
            span: kw.span,
        })
    }

    fn parse_try(&mut self) -> CompileResult<Stmt> {
        let kw = self.bump();
        let body = self.parse_block()?;
        let mut catch_param = None;
        let mut catch = None;
        if self.eat_ident("catch") {
            if self.eat_punct("(") {
                let (name, _) = self.expect_ident()?;
                catch_param = Some(name);
                self.expect_punct(")")?;
            }
            catch = Some(self.parse_block()?);
        }
        let finally = if self.eat_ident("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(SyntaxError::new(
                "'try' requires a catch or finally clause",
                kw.span.line,
                kw.span.column,
            ));
        }
        Ok(Stmt::Try {
            body,
            catch_param,
            catch,
            finally,
            span: kw.span,
        })
    }

    fn parse_expr_statement(&mut self, out: &mut Vec<Stmt>) -> CompileResult<()> {
        let span = self.peek().span;
        let expr = self.parse_expr()?;
        // Assignment and update forms are statements, not expressions.
        let next = self.peek().clone();
        if let TokenKind::Punct(op) = next.kind {
            if matches!(op, "=" | "+=" | "-=" | "*=" | "/=" | "%=") {
                if !is_assign_target(&expr) {
                    return Err(SyntaxError::new(
                        "Invalid assignment target",
                        span.line,
                        span.column,
                    ));
                }
                self.bump();
                let value = self.parse_expr()?;
                self.eat_punct(";");
                out.push(Stmt::Assign {
                    target: expr,
                    op: op.to_string(),
                    value,
                    span,
                });
                return Ok(());
            }
            if matches!(op, "++" | "--") {
                if !is_assign_target(&expr) {
                    return Err(SyntaxError::new(
                        "Invalid update target",
                        span.line,
                        span.column,
                    ));
                }
                self.bump();
                self.eat_punct(";");
                out.push(Stmt::Update {
                    target: expr,
                    op: op.to_string(),
                    span,
                });
                return Ok(());
            }
        }
        self.eat_punct(";");
        out.push(Stmt::Expr { expr, span });
        Ok(())
    }

    // === Expressions ===

    fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> CompileResult<Expr> {
        let test = self.parse_nullish()?;
        if self.peek().is_punct("?") && !self.peek().is_punct("?.") {
            let span = self.bump().span;
            let cons = self.parse_conditional()?;
            self.expect_punct(":")?;
            let alt = self.parse_conditional()?;
            return Ok(Expr::Cond {
                test: Box::new(test),
                cons: Box::new(cons),
                alt: Box::new(alt),
                span,
            });
        }
        Ok(test)
    }

    fn parse_nullish(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_or()?;
        while self.peek().is_punct("??") {
            let span = self.bump().span;
            let right = self.parse_or()?;
            left = Expr::Logical {
                op: "??".into(),
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_and()?;
        while self.peek().is_punct("||") {
            let span = self.bump().span;
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: "||".into(),
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.peek().is_punct("&&") {
            let span = self.bump().span;
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: "&&".into(),
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(p @ ("==" | "!=" | "===" | "!==")) => p.to_string(),
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_relational()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(p @ ("<" | "<=" | ">" | ">=")) => p.to_string(),
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(p @ ("+" | "-")) => p.to_string(),
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(p @ ("*" | "/" | "%")) => p.to_string(),
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let t = self.peek().clone();
        match &t.kind {
            TokenKind::Punct(p @ ("!" | "-" | "+")) => {
                let op = p.to_string();
                self.bump();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op,
                    expr: Box::new(expr),
                    span: t.span,
                })
            }
            TokenKind::Ident(name) if name == "typeof" => {
                self.bump();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: "typeof".into(),
                    expr: Box::new(expr),
                    span: t.span,
                })
            }
            TokenKind::Ident(name) if name == "await" => {
                self.bump();
                let expr = self.parse_unary()?;
                Ok(Expr::Await {
                    expr: Box::new(expr),
                    span: t.span,
                })
            }
            TokenKind::Ident(name) if name == "new" => {
                self.bump();
                let (callee, _) = self.expect_ident()?;
                let args = if self.peek().is_punct("(") {
                    self.parse_args()?
                } else {
                    Vec::new()
                };
                Ok(Expr::New {
                    callee,
                    args,
                    span: t.span,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let t = self.peek().clone();
            match &t.kind {
                TokenKind::Punct(".") => {
                    self.bump();
                    let (name, _) = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Ident(name),
                        optional: false,
                        span: t.span,
                    };
                }
                TokenKind::Punct("?.") => {
                    self.bump();
                    if self.peek().is_punct("(") {
                        let args = self.parse_args()?;
                        expr = Expr::Call {
                            callee: Box::new(expr),
                            args,
                            optional: true,
                            span: t.span,
                        };
                    } else if self.peek().is_punct("[") {
                        self.bump();
                        let idx = self.parse_expr()?;
                        self.expect_punct("]")?;
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Computed(Box::new(idx)),
                            optional: true,
                            span: t.span,
                        };
                    } else {
                        let (name, _) = self.expect_ident()?;
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Ident(name),
                            optional: true,
                            span: t.span,
                        };
                    }
                }
                TokenKind::Punct("[") => {
                    self.bump();
                    let idx = self.parse_expr()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(idx)),
                        optional: false,
                        span: t.span,
                    };
                }
                TokenKind::Punct("(") => {
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: false,
                        span: t.span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> CompileResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.peek().is_punct(")") {
            if self.at_eof() {
                return Err(self.unexpected("')'"));
            }
            if self.peek().is_punct("...") {
                let span = self.bump().span;
                let expr = self.parse_expr()?;
                args.push(Expr::Spread {
                    expr: Box::new(expr),
                    span,
                });
            } else {
                args.push(self.parse_expr()?);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> CompileResult<Expr> {
        let t = self.peek().clone();
        match &t.kind {
            TokenKind::Number { raw, value } => {
                self.bump();
                Ok(Expr::Number {
                    raw: raw.clone(),
                    value: *value,
                    span: t.span,
                })
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::Str {
                    value: s.clone(),
                    span: t.span,
                })
            }
            TokenKind::Template(raw) => {
                self.bump();
                self.parse_template(raw, t.span)
            }
            TokenKind::Punct("(") => {
                // Either a parenthesized expression or arrow parameters.
                if self.is_arrow_ahead() {
                    return self.parse_arrow(false);
                }
                self.bump();
                let expr = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => self.parse_array(t.span),
            TokenKind::Punct("{") => self.parse_object(t.span),
            TokenKind::Ident(name) => match name.as_str() {
                "true" | "false" => {
                    self.bump();
                    Ok(Expr::Bool {
                        value: name == "true",
                        span: t.span,
                    })
                }
                "null" => {
                    self.bump();
                    Ok(Expr::Null { span: t.span })
                }
                "undefined" => {
                    self.bump();
                    Ok(Expr::Undefined { span: t.span })
                }
                "function" => self.parse_function_expr(false),
                "async" => {
                    if self.peek_at(1).is_ident("function") {
                        self.bump();
                        self.parse_function_expr(true)
                    } else if self.peek_at(1).is_punct("(")
                        || (matches!(self.peek_at(1).kind, TokenKind::Ident(_))
                            && self.peek_at(2).is_punct("=>"))
                    {
                        self.bump();
                        self.parse_arrow(true)
                    } else {
                        self.bump();
                        Ok(Expr::Ident {
                            name: "async".into(),
                            span: t.span,
                        })
                    }
                }
                _ => {
                    if self.peek_at(1).is_punct("=>") {
                        return self.parse_arrow(false);
                    }
                    self.bump();
                    Ok(Expr::Ident {
                        name: name.clone(),
                        span: t.span,
                    })
                }
            },
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Look ahead from a `(` to decide whether this is an arrow parameter
    /// list. Scans to the matching `)` and checks for `=>`.
    fn is_arrow_ahead(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match &self.tokens[i].kind {
                TokenKind::Punct("(") | TokenKind::Punct("[") | TokenKind::Punct("{") => depth += 1,
                TokenKind::Punct(")") | TokenKind::Punct("]") | TokenKind::Punct("}") => {
                    depth -= 1;
                    if depth == 0 {
                        return self
                            .tokens
                            .get(i + 1)
                            .map(|t| t.is_punct("=>"))
                            .unwrap_or(false);
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_arrow(&mut self, is_async: bool) -> CompileResult<Expr> {
        let span = self.peek().span;
        let params = if self.peek().is_punct("(") {
            self.parse_params()?
        } else {
            let (name, pspan) = self.expect_ident()?;
            vec![Param {
                name,
                default: None,
                span: pspan,
            }]
        };
        self.expect_punct("=>")?;
        let body = if self.peek().is_punct("{") {
            ArrowBody::Block(self.parse_block()?)
        } else {
            ArrowBody::Expr(Box::new(self.parse_expr()?))
        };
        Ok(Expr::Arrow {
            params,
            body,
            is_async,
            span,
        })
    }

    /// Anonymous function expressions parse into arrow nodes; the distinction
    /// does not matter for this subset (no `this`).
    fn parse_function_expr(&mut self, is_async: bool) -> CompileResult<Expr> {
        let span = self.bump().span; // 'function'
        if matches!(self.peek().kind, TokenKind::Ident(_)) && !self.peek().is_punct("(") {
            self.bump(); // discard optional name
        }
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Expr::Arrow {
            params,
            body: ArrowBody::Block(body),
            is_async,
            span,
        })
    }

    fn parse_array(&mut self, span: Span) -> CompileResult<Expr> {
        self.bump(); // '['
        let mut elements = Vec::new();
        while !self.peek().is_punct("]") {
            if self.at_eof() {
                return Err(self.unexpected("']'"));
            }
            if self.peek().is_punct("...") {
                let sspan = self.bump().span;
                let expr = self.parse_expr()?;
                elements.push(Expr::Spread {
                    expr: Box::new(expr),
                    span: sspan,
                });
            } else {
                elements.push(self.parse_expr()?);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("]")?;
        Ok(Expr::Array { elements, span })
    }

    fn parse_object(&mut self, span: Span) -> CompileResult<Expr> {
        self.bump(); // '{'
        let mut props = Vec::new();
        while !self.peek().is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected("'}'"));
            }
            let t = self.peek().clone();
            let key = match &t.kind {
                TokenKind::Ident(name) => {
                    self.bump();
                    PropKey::Ident(name.clone())
                }
                TokenKind::Str(s) => {
                    self.bump();
                    PropKey::Str(s.clone())
                }
                TokenKind::Number { raw, .. } => {
                    self.bump();
                    PropKey::Str(raw.clone())
                }
                _ => return Err(self.unexpected("a property name")),
            };
            let value = if self.eat_punct(":") {
                self.parse_expr()?
            } else {
                // Shorthand property.
                Expr::Ident {
                    name: key.name().to_string(),
                    span: t.span,
                }
            };
            props.push((key, value));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object { props, span })
    }

    /// Split a raw template body into text and expression parts.
    fn parse_template(&mut self, raw: &str, span: Span) -> CompileResult<Expr> {
        let chars: Vec<char> = raw.chars().collect();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\\' if i + 1 < chars.len() => {
                    let next = chars[i + 1];
                    match next {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        '`' => text.push('`'),
                        '$' => text.push('$'),
                        '\\' => text.push('\\'),
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                    i += 2;
                }
                '$' if chars.get(i + 1) == Some(&'{') => {
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let mut depth = 1usize;
                    let mut j = i + 2;
                    while j < chars.len() && depth > 0 {
                        match chars[j] {
                            '{' => depth += 1,
                            '}' => depth -= 1,
                            q @ ('\'' | '"') => {
                                j += 1;
                                while j < chars.len() && chars[j] != q {
                                    if chars[j] == '\\' {
                                        j += 1;
                                    }
                                    j += 1;
                                }
                            }
                            _ => {}
                        }
                        if depth > 0 {
                            j += 1;
                        }
                    }
                    let inner: String = chars[i + 2..j].iter().collect();
                    let expr = parse_expression_source(&inner).map_err(|e| {
                        SyntaxError::new(
                            format!("In template expression: {}", e.message),
                            span.line,
                            span.column,
                        )
                    })?;
                    parts.push(TemplatePart::Expr(expr));
                    i = j + 1;
                }
                c => {
                    text.push(c);
                    i += 1;
                }
            }
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(Expr::Template { parts, span })
    }

    // === Doc comments ===

    /// Doc comment attached to a function starting on `fn_line`: the block
    /// comment must end on the immediately preceding line (or the same line).
    /// `/*# markdown */` wins over `/** jsdoc */` when both are present.
    fn attached_docs(&self, fn_line: usize) -> (Option<String>, HashMap<String, String>) {
        let mut jsdoc: Option<&Comment> = None;
        let mut markdown: Option<&Comment> = None;
        for c in &self.comments {
            if c.kind != CommentKind::Block {
                continue;
            }
            if c.end_line + 1 != fn_line && c.end_line != fn_line {
                continue;
            }
            if c.text.starts_with('#') {
                markdown = Some(c);
            } else if c.text.starts_with('*') {
                jsdoc = Some(c);
            }
        }
        if let Some(md) = markdown {
            return (Some(dedent_markdown(&md.text[1..])), HashMap::new());
        }
        if let Some(doc) = jsdoc {
            return parse_jsdoc(&doc.text);
        }
        (None, HashMap::new())
    }
}

fn is_assign_target(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident { .. } | Expr::Member { .. })
}

static PARAM_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@param\s+(?:\{[^}]*\}\s+)?([A-Za-z_$][\w$]*)\s*-?\s*(.*)").unwrap());

/// Extract description and `@param` docs from a `/** … */` body (leading `*`
/// already consumed by the caller convention: text starts with `*`).
fn parse_jsdoc(text: &str) -> (Option<String>, HashMap<String, String>) {
    let mut description_lines: Vec<String> = Vec::new();
    let mut params = HashMap::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches('*').trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = PARAM_TAG_RE.captures(line) {
            params.insert(caps[1].to_string(), caps[2].trim().to_string());
        } else if !line.starts_with('@') {
            description_lines.push(line.to_string());
        }
    }
    let description = if description_lines.is_empty() {
        None
    } else {
        Some(description_lines.join(" "))
    };
    (description, params)
}

/// Strip the common leading indentation from a markdown doc block.
fn dedent_markdown(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| {
            if l.len() >= indent {
                &l[indent..]
            } else {
                l.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_function() {
        let program = parse_module("function double(x = 5) { return x * 2 }").unwrap();
        let fns = program.functions();
        assert_eq!(fns.len(), 1);
        assert_eq!(fns[0].name, "double");
        assert_eq!(fns[0].params.len(), 1);
        assert!(fns[0].params[0].default.is_some());
    }

    #[test]
    fn rejects_imports_and_exports() {
        assert!(parse_module("import x from 'y'").is_err());
        assert!(parse_module("export const a = 1").is_err());
    }

    #[test]
    fn rejects_class_throw_switch() {
        assert!(parse_module("class A {}").unwrap_err().message.contains("class"));
        assert!(parse_module("function f() { throw new Error('x') }")
            .unwrap_err()
            .message
            .contains("throw"));
        assert!(parse_module("function f(x = 1) { switch (x) {} }")
            .unwrap_err()
            .message
            .contains("switch"));
    }

    #[test]
    fn rejects_c_style_for() {
        let err = parse_module("function f() { for (let i = 0; i < 3; i++) {} }").unwrap_err();
        assert!(err.message.contains("for"));
    }

    #[test]
    fn accepts_for_of() {
        let program = parse_module("function f(xs = [1]) { for (const x of xs) { x } }").unwrap();
        let f = &program.functions()[0];
        assert!(matches!(f.body[0], Stmt::ForOf { .. }));
    }

    #[test]
    fn single_function_mode() {
        assert!(parse_single_function("function a() {}\nfunction b() {}").is_err());
        assert!(parse_single_function("function a() { return 1 }").is_ok());
    }

    #[test]
    fn parses_optional_chaining() {
        let expr = parse_expression_source("a?.b?.[0]").unwrap();
        match expr {
            Expr::Member { optional, .. } => assert!(optional),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_ternary_and_logical() {
        let expr = parse_expression_source("a ?? b ? c && d : e || f").unwrap();
        assert!(matches!(expr, Expr::Cond { .. }));
    }

    #[test]
    fn parses_template_parts() {
        let expr = parse_expression_source("`sum: ${a + b}!`").unwrap();
        match expr {
            Expr::Template { parts, .. } => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[0], TemplatePart::Text(t) if t == "sum: "));
                assert!(matches!(&parts[1], TemplatePart::Expr(_)));
                assert!(matches!(&parts[2], TemplatePart::Text(t) if t == "!"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_arrow_functions() {
        let expr = parse_expression_source("(a, b) => a + b").unwrap();
        assert!(matches!(expr, Expr::Arrow { ref params, .. } if params.len() == 2));
        let expr = parse_expression_source("x => x * 2").unwrap();
        assert!(matches!(expr, Expr::Arrow { ref params, .. } if params.len() == 1));
    }

    #[test]
    fn parses_object_and_array_literals() {
        let expr = parse_expression_source("{a: 1, 'b': [2, 3], c}").unwrap();
        match expr {
            Expr::Object { props, .. } => assert_eq!(props.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn assignment_is_a_statement() {
        let program = parse_module("function f(a = 1) { a = 2; a += 3; a++ }").unwrap();
        let f = &program.functions()[0];
        assert!(matches!(f.body[0], Stmt::Assign { .. }));
        assert!(matches!(&f.body[1], Stmt::Assign { op, .. } if op == "+="));
        assert!(matches!(f.body[2], Stmt::Update { .. }));
    }

    #[test]
    fn jsdoc_attaches_to_function() {
        let src = "/**\n * Adds numbers.\n * @param a - the first\n * @param b - the second\n */\nfunction add(a = 1, b = 2) { return a + b }";
        let program = parse_module(src).unwrap();
        let f = &program.functions()[0];
        assert_eq!(f.description.as_deref(), Some("Adds numbers."));
        assert_eq!(f.param_docs["a"], "the first");
    }

    #[test]
    fn markdown_doc_preferred() {
        let src = "/*# # Adder\nAdds things. */\nfunction add(a = 1) { return a }";
        let program = parse_module(src).unwrap();
        let f = &program.functions()[0];
        assert!(f.description.as_deref().unwrap().contains("Adder"));
    }

    #[test]
    fn distant_doc_does_not_attach() {
        let src = "/** doc */\nconst x = 1\nfunction f() { return x }";
        let program = parse_module(src).unwrap();
        let f = &program.functions()[0];
        assert!(f.description.is_none());
    }

    #[test]
    fn async_functions() {
        let program = parse_module("async function f(x = 1) { return await g(x) }").unwrap();
        assert!(program.functions()[0].is_async);
    }

    #[test]
    fn const_requires_initializer() {
        assert!(parse_module("const a").is_err());
        assert!(parse_module("let a").is_ok());
    }

    #[test]
    fn multiple_declarators() {
        let program = parse_module("const a = 1, b = 2").unwrap();
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn spread_in_calls_and_arrays() {
        assert!(parse_expression_source("f(...xs)").is_ok());
        assert!(parse_expression_source("[1, ...xs]").is_ok());
    }

    #[test]
    fn new_expressions() {
        let expr = parse_expression_source("new Set([1, 2])").unwrap();
        assert!(matches!(expr, Expr::New { ref callee, .. } if callee == "Set"));
    }
}
