//! Match arms and patterns.

use serde::{Deserialize, Serialize};

use crate::ast::expr::Expr;
use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: MatchPattern,
    #[serde(default)]
    pub guard: Option<Expr>,
    pub body: Vec<Expr>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchPattern {
    /// Structural equality against a value. A bare name that resolves to
    /// nothing binds the subject instead.
    Value(Expr),
    /// `Target(a, b)`: instance-of test, then binds the named attributes
    /// (classes) or positional fields (enum variants) as fresh locals.
    Destructure { target: Expr, binders: Vec<String> },
    /// `_`
    Wildcard,
}
