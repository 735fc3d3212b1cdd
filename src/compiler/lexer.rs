//! Hand-written lexer for the ECMAScript subset the parser accepts.
//!
//! Comments are not discarded: they are collected to the side so the parser
//! can attach doc comments to the function that immediately follows them.
//! Template literals are captured raw (with `${}` nesting respected) and
//! split into parts by the parser.

use crate::compiler::ast::Span;
use crate::compiler::diagnostics::{CompileResult, SyntaxError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number { raw: String, value: f64 },
    Str(String),
    /// Raw template body between the backticks.
    Template(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(s) if *s == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(s) if s == name)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    Line,
    Block,
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub kind: CommentKind,
    /// Text between the comment delimiters.
    pub text: String,
    pub span: Span,
    /// Line the comment ends on.
    pub end_line: usize,
}

/// Multi-character punctuators, longest first so greedy matching works.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "...", "**=", "&&=", "||=", "??=", "=>", "==", "!=", "<=", ">=", "&&", "||",
    "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "**", "{", "}", "(", ")", "[", "]",
    ";", ",", ".", "<", ">", "+", "-", "*", "/", "%", "=", "!", "?", ":", "&", "|",
];

pub struct Lexer<'a> {
    chars: Vec<char>,
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    pub comments: Vec<Comment>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            chars: src.chars().collect(),
            src,
            pos: 0,
            line: 1,
            column: 1,
            comments: Vec::new(),
        }
    }

    /// Tokenize the whole input. The final token is always `Eof`.
    pub fn tokenize(mut self) -> CompileResult<(Vec<Token>, Vec<Comment>)> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let span = Span::new(self.line, self.column);
            let Some(&c) = self.chars.get(self.pos) else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span,
                });
                break;
            };
            let kind = if c.is_ascii_digit() || (c == '.' && self.peek_is_digit(1)) {
                self.lex_number(span)?
            } else if c == '\'' || c == '"' {
                self.lex_string(span)?
            } else if c == '`' {
                self.lex_template(span)?
            } else if is_ident_start(c) {
                self.lex_ident()
            } else {
                self.lex_punct(span)?
            };
            tokens.push(Token { kind, span });
        }
        Ok((tokens, self.comments))
    }

    fn peek_is_digit(&self, ahead: usize) -> bool {
        self.chars
            .get(self.pos + ahead)
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.get(self.pos) {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.chars.get(self.pos + 1) == Some(&'/') => {
                    let span = Span::new(self.line, self.column);
                    self.advance();
                    self.advance();
                    let mut text = String::new();
                    while let Some(&c) = self.chars.get(self.pos) {
                        if c == '\n' {
                            break;
                        }
                        text.push(c);
                        self.advance();
                    }
                    self.comments.push(Comment {
                        kind: CommentKind::Line,
                        text,
                        span,
                        end_line: span.line,
                    });
                }
                Some('/') if self.chars.get(self.pos + 1) == Some(&'*') => {
                    let span = Span::new(self.line, self.column);
                    self.advance();
                    self.advance();
                    let mut text = String::new();
                    loop {
                        match self.chars.get(self.pos) {
                            Some('*') if self.chars.get(self.pos + 1) == Some(&'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(&c) => {
                                text.push(c);
                                self.advance();
                            }
                            None => break,
                        }
                    }
                    self.comments.push(Comment {
                        kind: CommentKind::Block,
                        text,
                        span,
                        end_line: self.line,
                    });
                }
                _ => return,
            }
        }
    }

    fn lex_number(&mut self, span: Span) -> CompileResult<TokenKind> {
        let start = self.pos;
        // Hex / binary / octal prefixes.
        if self.chars[self.pos] == '0'
            && matches!(
                self.chars.get(self.pos + 1),
                Some('x') | Some('X') | Some('b') | Some('B') | Some('o') | Some('O')
            )
        {
            let radix_char = self.chars[self.pos + 1];
            self.advance();
            self.advance();
            let digits_start = self.pos;
            while self
                .chars
                .get(self.pos)
                .is_some_and(|c| c.is_ascii_alphanumeric())
            {
                self.advance();
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let radix = match radix_char.to_ascii_lowercase() {
                'x' => 16,
                'b' => 2,
                _ => 8,
            };
            let value = i64::from_str_radix(&digits, radix).map_err(|_| {
                SyntaxError::new("Invalid number literal", span.line, span.column)
            })? as f64;
            let raw: String = self.chars[start..self.pos].iter().collect();
            return Ok(TokenKind::Number { raw, value });
        }
        while self.chars.get(self.pos).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.chars.get(self.pos) == Some(&'.') && self.peek_is_digit(1) {
            self.advance();
            while self.chars.get(self.pos).is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.chars.get(self.pos), Some('e') | Some('E')) {
            let mut ahead = self.pos + 1;
            if matches!(self.chars.get(ahead), Some('+') | Some('-')) {
                ahead += 1;
            }
            if self.chars.get(ahead).is_some_and(|c| c.is_ascii_digit()) {
                while self.pos < ahead {
                    self.advance();
                }
                while self.chars.get(self.pos).is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let value: f64 = raw
            .parse()
            .map_err(|_| SyntaxError::new("Invalid number literal", span.line, span.column))?;
        Ok(TokenKind::Number { raw, value })
    }

    fn lex_string(&mut self, span: Span) -> CompileResult<TokenKind> {
        let quote = self.advance().unwrap();
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(SyntaxError::new(
                        "Unterminated string literal",
                        span.line,
                        span.column,
                    ))
                }
                Some('\\') => {
                    let escaped = self.advance().ok_or_else(|| {
                        SyntaxError::new("Unterminated string literal", span.line, span.column)
                    })?;
                    value.push_str(&decode_escape(escaped, self));
                }
                Some(c) if c == quote => break,
                Some('\n') => {
                    return Err(SyntaxError::new(
                        "Unterminated string literal",
                        span.line,
                        span.column,
                    ))
                }
                Some(c) => value.push(c),
            }
        }
        Ok(TokenKind::Str(value))
    }

    /// Capture the raw template body, honoring `${ … }` nesting so embedded
    /// braces and strings do not end the literal early.
    fn lex_template(&mut self, span: Span) -> CompileResult<TokenKind> {
        self.advance(); // opening backtick
        let start = self.pos;
        loop {
            match self.chars.get(self.pos) {
                None => {
                    return Err(SyntaxError::new(
                        "Unterminated template literal",
                        span.line,
                        span.column,
                    ))
                }
                Some('\\') => {
                    self.advance();
                    self.advance();
                }
                Some('`') => {
                    let raw: String = self.chars[start..self.pos].iter().collect();
                    self.advance();
                    return Ok(TokenKind::Template(raw));
                }
                Some('$') if self.chars.get(self.pos + 1) == Some(&'{') => {
                    self.advance();
                    self.advance();
                    let mut depth = 1usize;
                    while depth > 0 {
                        match self.chars.get(self.pos) {
                            None => {
                                return Err(SyntaxError::new(
                                    "Unterminated template literal",
                                    span.line,
                                    span.column,
                                ))
                            }
                            Some('{') => {
                                depth += 1;
                                self.advance();
                            }
                            Some('}') => {
                                depth -= 1;
                                self.advance();
                            }
                            Some('\'') | Some('"') => {
                                let q = self.advance().unwrap();
                                loop {
                                    match self.advance() {
                                        None => break,
                                        Some('\\') => {
                                            self.advance();
                                        }
                                        Some(c) if c == q => break,
                                        _ => {}
                                    }
                                }
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|&c| is_ident_char(c))
        {
            self.advance();
        }
        TokenKind::Ident(self.chars[start..self.pos].iter().collect())
    }

    fn lex_punct(&mut self, span: Span) -> CompileResult<TokenKind> {
        for p in PUNCTUATORS {
            if self.remaining_starts_with(p) {
                for _ in 0..p.chars().count() {
                    self.advance();
                }
                return Ok(TokenKind::Punct(p));
            }
        }
        Err(SyntaxError::new(
            format!("Unexpected character '{}'", self.chars[self.pos]),
            span.line,
            span.column,
        ))
    }

    fn remaining_starts_with(&self, s: &str) -> bool {
        let mut i = self.pos;
        for c in s.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }
}

impl std::fmt::Debug for Lexer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lexer")
            .field("pos", &self.pos)
            .field("src_len", &self.src.len())
            .finish()
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn decode_escape(c: char, lexer: &mut Lexer) -> String {
    match c {
        'n' => "\n".to_string(),
        't' => "\t".to_string(),
        'r' => "\r".to_string(),
        '0' => "\0".to_string(),
        'b' => "\u{8}".to_string(),
        'u' => {
            // \uXXXX or \u{XXXX}
            let mut hex = String::new();
            if lexer.chars.get(lexer.pos) == Some(&'{') {
                lexer.advance();
                while let Some(&ch) = lexer.chars.get(lexer.pos) {
                    if ch == '}' {
                        lexer.advance();
                        break;
                    }
                    hex.push(ch);
                    lexer.advance();
                }
            } else {
                for _ in 0..4 {
                    if let Some(&ch) = lexer.chars.get(lexer.pos) {
                        hex.push(ch);
                        lexer.advance();
                    }
                }
            }
            u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_default()
        }
        other => other.to_string(),
    }
}
