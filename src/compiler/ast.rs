//! The ECMAScript-subset AST.
//!
//! Nodes carry 1-based source locations from the original file. The tree is
//! deliberately small: the constructs the parser rejects (`class`, `switch`,
//! C-style `for`, `throw`, modules) have no representation here.

use serde::Serialize;
use std::collections::HashMap;

/// 1-based source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Span { line, column }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    /// Top-level function declarations, in source order.
    pub fn functions(&self) -> Vec<&Function> {
        self.body
            .iter()
            .filter_map(|s| match s {
                Stmt::FunctionDecl(f) => Some(f),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeclKind {
    Const,
    Let,
    Var,
}

impl DeclKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            DeclKind::Const => "const",
            DeclKind::Let => "let",
            DeclKind::Var => "var",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Param {
    pub name: String,
    /// Example/default value; `None` for a bare untyped parameter.
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub span: Span,
    /// Description from an immediately preceding doc comment.
    pub description: Option<String>,
    /// `@param name - text` entries from a JSDoc comment.
    pub param_docs: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub enum Stmt {
    VarDecl {
        kind: DeclKind,
        name: String,
        init: Option<Expr>,
        span: Span,
    },
    FunctionDecl(Function),
    Expr {
        expr: Expr,
        span: Span,
    },
    Assign {
        target: Expr,
        /// `=`, `+=`, `-=`, `*=`, `/=`, `%=`.
        op: String,
        value: Expr,
        span: Span,
    },
    /// `a++` / `a--` statements.
    Update {
        target: Expr,
        op: String,
        span: Span,
    },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        alt: Option<Vec<Stmt>>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    ForOf {
        decl: Option<DeclKind>,
        name: String,
        iter: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Try {
        body: Vec<Stmt>,
        catch_param: Option<String>,
        catch: Option<Vec<Stmt>>,
        finally: Option<Vec<Stmt>>,
        span: Span,
    },
    Block {
        body: Vec<Stmt>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Empty,
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Update { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::ForOf { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span } => *span,
            Stmt::FunctionDecl(f) => f.span,
            Stmt::Empty => Span::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum PropKey {
    Ident(String),
    Str(String),
}

impl PropKey {
    pub fn name(&self) -> &str {
        match self {
            PropKey::Ident(s) | PropKey::Str(s) => s,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum MemberProp {
    Ident(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, Serialize)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Serialize)]
pub enum ArrowBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Serialize)]
pub enum Expr {
    Number {
        raw: String,
        value: f64,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },
    Undefined {
        span: Span,
    },
    Ident {
        name: String,
        span: Span,
    },
    Template {
        parts: Vec<TemplatePart>,
        span: Span,
    },
    Array {
        elements: Vec<Expr>,
        span: Span,
    },
    Object {
        props: Vec<(PropKey, Expr)>,
        span: Span,
    },
    Unary {
        op: String,
        expr: Box<Expr>,
        span: Span,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Logical {
        /// `&&`, `||`, `??`.
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Cond {
        test: Box<Expr>,
        cons: Box<Expr>,
        alt: Box<Expr>,
        span: Span,
    },
    Member {
        object: Box<Expr>,
        property: MemberProp,
        optional: bool,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
        span: Span,
    },
    New {
        callee: String,
        args: Vec<Expr>,
        span: Span,
    },
    Arrow {
        params: Vec<Param>,
        body: ArrowBody,
        is_async: bool,
        span: Span,
    },
    Await {
        expr: Box<Expr>,
        span: Span,
    },
    Spread {
        expr: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number { span, .. }
            | Expr::Str { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Null { span }
            | Expr::Undefined { span }
            | Expr::Ident { span, .. }
            | Expr::Template { span, .. }
            | Expr::Array { span, .. }
            | Expr::Object { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Cond { span, .. }
            | Expr::Member { span, .. }
            | Expr::Call { span, .. }
            | Expr::New { span, .. }
            | Expr::Arrow { span, .. }
            | Expr::Await { span, .. }
            | Expr::Spread { span, .. } => *span,
        }
    }

    /// The identifier name when this expression is a bare identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident { name, .. } => Some(name),
            _ => None,
        }
    }
}
