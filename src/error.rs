//! Error types shared across the compiler.

use std::io;

use thiserror::Error;

/// Result alias used throughout the compiler.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Failures reported by the compilation pipeline.
///
/// Front-end errors (`Lex`, `Parse`, `Semantic`) carry the source location
/// they were detected at. Core errors (`Invariant`, `Internal`) carry the
/// function and block they were detected in, since no source position
/// reliably survives into the IR once passes start rewriting it.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CompileError {
    /// The lexer encountered a byte sequence that is not part of any token.
    #[error("lexical error: {message} at line {line}, column {col}")]
    Lex { message: String, line: u32, col: u32 },

    /// The parser encountered a token sequence outside the grammar.
    #[error("syntax error: {message} at line {line}, column {col}")]
    Parse { message: String, line: u32, col: u32 },

    /// The semantic analyzer rejected the program (type, scope, or shape).
    #[error("semantic error: {message} at line {line}, column {col}")]
    Semantic { message: String, line: u32, col: u32 },

    /// A pass produced malformed IR. Fatal.
    #[error("ir invariant violated in '{func}', block b{block}: {message}")]
    Invariant {
        func: String,
        block: u32,
        message: String,
    },

    /// A "should not happen" condition was reached. Fatal.
    #[error("internal error: {0}")]
    Internal(String),

    /// An input or output file could not be accessed.
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl CompileError {
    /// Process exit code for this failure: `1` for front-end and I/O
    /// failures, `2` for internal ones.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Lex { .. }
            | CompileError::Parse { .. }
            | CompileError::Semantic { .. }
            | CompileError::Io(_) => 1,
            CompileError::Invariant { .. } | CompileError::Internal(_) => 2,
        }
    }
}
