//! A compiler for a small C-like subset, targeting Intel-syntax x86-64
//! assembly for the System V AMD64 ABI.
//!
//! The pipeline is the usual three stages, each returning
//! `Result<_, CompileError>` and propagated with `?`: [`token::tokenize`]
//! produces a token stream, [`parser::parse_program`] builds a typed AST
//! plus symbol table while folding in semantic analysis as it goes, and
//! [`codegen::generate`] lowers that AST to assembly text. [`compile_source`]
//! wires the three together; only a caller's `main` should turn an `Err`
//! into a printed diagnostic and a non-zero exit.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod parser;
pub mod scope;
pub mod token;
pub mod typecheck;
pub mod types;

pub use diagnostics::{CResult, CompileError};

/// Compile one translation unit's source text to Intel-syntax assembly.
///
/// A trailing newline is appended if `source` doesn't already end in
/// one, matching the tokenizer's expectation that every line is
/// newline-terminated.
pub fn compile_source(source: &str) -> CResult<String> {
    let mut source = source.to_string();
    if !source.ends_with('\n') {
        source.push('\n');
    }

    let mut program = parser::parse_program(&source)?;
    codegen::generate(&mut program).map_err(|e| CompileError::new(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_program() {
        let asm = compile_source("int main() { return 42; }").unwrap();
        assert!(asm.contains(".intel_syntax noprefix"));
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("mov rax, 42"));
    }

    #[test]
    fn propagates_a_lexer_error() {
        let err = compile_source("int main() { return \"unterminated; }").unwrap_err();
        assert!(err.to_string().len() > 0);
    }

    #[test]
    fn propagates_a_semantic_error() {
        let err = compile_source("int main() { return undeclared_ident; }").unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
