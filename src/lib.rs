//! Strandc: the bytecode compiler backend for the Strand scripting language.
//!
//! This is the library root that exports all modules.
//!
//! # Pipeline
//!
//! The parser (an external collaborator) hands over an AST (`ast`). The
//! compiler resolves every name to a stack slot, upvalue or global, checks
//! static types (`types`), and emits function units (`bytecode`) that are
//! serialized to a flat integer stream for the runtime.

// Allow some clippy lints that are stylistic and not critical
#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::new_without_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::type_complexity)]
#![allow(clippy::len_zero)]

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod error;
pub mod span;
pub mod types;

use error::StrandError;

pub use compiler::compile;

/// Compile a program given as AST JSON into the serialized integer stream.
pub fn compile_json(ast_json: &str, options: &config::CompilerOptions) -> Result<Vec<i64>, StrandError> {
    let program: ast::Program = serde_json::from_str(ast_json)?;
    let module = compile(&program, options)?;
    Ok(bytecode::encode_module(&module))
}
