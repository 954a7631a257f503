//! Type annotation tokens.
//!
//! The parser hands annotations over as a flat token run with balanced
//! brackets; `types::grammar` turns them into descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeToken {
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    Comma,
    /// Varargs marker after the last parameter of a function type.
    Star,
    /// Optional/defaulted marker after a parameter of a function type.
    Question,
}

impl TypeToken {
    pub fn name(name: impl Into<String>) -> Self {
        TypeToken::Name(name.into())
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeToken::Name(name) => write!(f, "{}", name),
            TypeToken::LParen => write!(f, "("),
            TypeToken::RParen => write!(f, ")"),
            TypeToken::LBracket => write!(f, "["),
            TypeToken::RBracket => write!(f, "]"),
            TypeToken::LAngle => write!(f, "<"),
            TypeToken::RAngle => write!(f, ">"),
            TypeToken::Comma => write!(f, ", "),
            TypeToken::Star => write!(f, "*"),
            TypeToken::Question => write!(f, "?"),
        }
    }
}

/// Renders a token run back to source form for diagnostics.
pub fn render_tokens(tokens: &[TypeToken]) -> String {
    tokens.iter().map(|t| t.to_string()).collect()
}
