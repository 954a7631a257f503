//! Strand bytecode compiler.
//!
//! # Architecture
//!
//! - `compiler`: compiler state, emission helpers and the module driver
//! - `scope`: function scopes, locals, upvalues and name resolution
//! - `compiler_exprs`: the node dispatcher, operators, calls and attributes
//! - `compiler_control`: conditionals, blocks, switch and control transfer
//! - `compiler_loops`: while, do-while, range and for-each loops
//! - `compiler_patterns`: match expressions
//! - `compiler_classes`: class and enum declarations
//! - `compiler_decls`: variables, functions, decorators, typedefs, directives

pub mod compiler;
mod compiler_classes;
mod compiler_control;
mod compiler_decls;
mod compiler_exprs;
mod compiler_loops;
mod compiler_patterns;
pub mod scope;

pub use compiler::{compile, Compiler};
pub use scope::{FunctionKind, ScopeId};
