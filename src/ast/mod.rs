//! Abstract Syntax Tree consumed by the compiler.
//!
//! The parser is an external collaborator; these types are the contract it
//! fills in (directly, or as JSON through serde).

pub mod decl;
pub mod expr;
pub mod pattern;
pub mod types;

pub use decl::{
    ClassDecl, ClassMember, EnumDecl, EnumVariantDecl, FieldDecl, FunctionDecl, MethodDecl,
    Parameter, Program, UseDirective, VariantField,
};
pub use expr::{
    Argument, BinaryOp, Expr, ExprKind, IfBranch, InterpolatedPart, LogicalOp, SwitchCase,
    UnaryOp,
};
pub use pattern::{MatchArm, MatchPattern};
pub use types::TypeToken;
