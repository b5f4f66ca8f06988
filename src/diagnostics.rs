//! Diagnostics
//!
//! A `CompileError` carries a message plus enough source position to
//! print a one-line-plus-caret diagnostic, the way the reference
//! compiler's `error_at` does. Every fallible stage of the pipeline
//! returns `Result<_, CompileError>` and propagates with `?`; only the
//! binary's `main` renders the error and exits non-zero.

use std::fmt;

/// A fatal error anywhere in the pipeline: lexing, parsing, semantic
/// analysis, or code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub message: String,
    /// 1-indexed line number, when known.
    pub line: Option<usize>,
    /// 0-indexed column within that line, when known.
    pub column: Option<usize>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        CompileError { message: message.into(), line: None, column: None }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        CompileError { message: message.into(), line: Some(line), column: Some(column) }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", line, self.column.unwrap_or(0), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

pub type CResult<T> = Result<T, CompileError>;

/// Render a `CompileError` as the offending source line followed by a
/// caret under the column, matching the reference compiler's format:
/// the whole input line, then spaces up to the column, then `^ message`.
pub fn render(source: &str, err: &CompileError) -> String {
    let Some(line_no) = err.line else {
        return err.message.clone();
    };
    let line_text = source.lines().nth(line_no.saturating_sub(1)).unwrap_or("");
    let column = err.column.unwrap_or(0);
    let mut out = String::new();
    out.push_str(line_text);
    out.push('\n');
    out.push_str(&" ".repeat(column));
    out.push_str("^ ");
    out.push_str(&err.message);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_places_caret_under_column() {
        let source = "int main() {\n  retur 1;\n}\n";
        let err = CompileError::at("unexpected token", 2, 2);
        let rendered = render(source, &err);
        assert!(rendered.starts_with("  retur 1;\n"));
        assert!(rendered.contains("^ unexpected token"));
        // Two leading spaces in the caret line match the column.
        let caret_line = rendered.lines().nth(1).unwrap();
        assert_eq!(&caret_line[..2], "  ");
    }

    #[test]
    fn display_without_position_is_just_the_message() {
        let err = CompileError::new("no main function");
        assert_eq!(err.to_string(), "no main function");
    }

    #[test]
    fn display_with_position_includes_line_and_column() {
        let err = CompileError::at("bad token", 5, 3);
        assert_eq!(err.to_string(), "5:3: bad token");
    }
}
