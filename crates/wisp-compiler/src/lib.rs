//! Scanner + single-pass Pratt-parsing compiler: turns Wisp source text into
//! a `wisp_core::ObjFunction` ready to be wrapped in a closure and run.
//!
//! This crate never executes anything and never does file I/O: resolving
//! and running an imported module's source is `wisp-runtime`'s job at
//! `OP_MODULE`/`OP_MODULE_BUILTIN` dispatch time. `compile` only ever turns
//! one already-loaded source string into bytecode.

mod compiler;
mod scanner;

pub use compiler::{compile, CompileError, STDLIB_MODULES};
pub use scanner::{Scanner, Token, TokenKind};
