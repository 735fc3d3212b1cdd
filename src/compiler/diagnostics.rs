//! Compile-time diagnostics.
//!
//! Parser and preprocessor problems are reported as [`SyntaxError`] records
//! carrying a 1-based source location. The record can render itself against
//! the original source with a `>` marker on the offending line and a `^`
//! caret under the offending column.

use serde::Serialize;
use thiserror::Error;

/// A compile-time error with a source location.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message} ({line}:{column})")]
pub struct SyntaxError {
    /// Always `"SyntaxError"`; kept in the serialized shape for JS hosts.
    pub name: &'static str,
    pub message: String,
    /// 1-based line in the original (pre-preprocessing) source.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        SyntaxError {
            name: "SyntaxError",
            message: message.into(),
            line,
            column,
            file: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Render the error against `source` with surrounding context.
    ///
    /// The offending line is prefixed with `>` and the column is pointed at
    /// with `^` on the following line:
    ///
    /// ```text
    ///    2 | function f(a: 1, a: 2) {
    /// >  3 |   return a
    ///      |   ^
    /// ```
    pub fn annotate(&self, source: &str) -> String {
        let lines: Vec<&str> = source.lines().collect();
        let mut out = String::new();
        if let Some(file) = &self.file {
            out.push_str(&format!("{}:{}:{}: ", file, self.line, self.column));
        }
        out.push_str(&format!("{}\n", self.message));

        if self.line == 0 || self.line > lines.len() {
            return out;
        }
        let idx = self.line - 1;
        let first = idx.saturating_sub(2);
        let width = (self.line + 1).to_string().len().max(3);

        for (i, text) in lines.iter().enumerate().take(idx + 1).skip(first) {
            let marker = if i == idx { ">" } else { " " };
            out.push_str(&format!("{} {:>width$} | {}\n", marker, i + 1, text));
        }
        // Caret under the column, 1-based; clamp into the line.
        let caret_col = self.column.max(1).min(lines[idx].chars().count() + 1);
        out.push_str(&format!(
            "  {:>width$} | {}^\n",
            "",
            " ".repeat(caret_col - 1)
        ));
        if idx + 1 < lines.len() {
            out.push_str(&format!("  {:>width$} | {}\n", idx + 2, lines[idx + 1]));
        }
        out
    }
}

/// Result alias for compile passes.
pub type CompileResult<T> = Result<T, SyntaxError>;
