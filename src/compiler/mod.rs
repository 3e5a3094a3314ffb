//! Compilation pipeline: lexing, parsing, semantic analysis, CFG and SSA
//! construction, optimization, and IR emission.

pub mod cfg;
pub mod dominance;
pub mod dot;
pub mod driver;
pub mod ir;
pub mod lexer;
pub mod opt;
pub mod parser;
pub mod ssa;
