//! Expression AST nodes.
//!
//! Strand is expression-oriented: declarations and control flow are node kinds
//! like any other, and every node compiles to exactly one value when it sits in
//! value position.

use serde::{Deserialize, Serialize};

use crate::ast::decl::{ClassDecl, EnumDecl, FunctionDecl, UseDirective};
use crate::ast::pattern::MatchArm;
use crate::ast::types::TypeToken;
use crate::span::Span;

/// A node in the AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(default)]
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Control never falls through to whatever follows this node.
    pub fn diverges(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Break | ExprKind::Continue | ExprKind::Return(_) | ExprKind::Throw(_)
        )
    }
}

/// An argument in a call: positional or `name: value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    Positional(Expr),
    Keyword { name: String, value: Expr },
}

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterpolatedPart {
    Literal(String),
    Expr(Expr),
}

/// One `if`/`elseIf` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBranch {
    pub condition: Expr,
    pub body: Vec<Expr>,
}

/// One `case v1, v2: body` of a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Vec<Expr>,
}

/// All node variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    // --- Literals ---
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    /// `"Hello {name}!"`, segments already parsed.
    Interpolated(Vec<InterpolatedPart>),
    Array(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Tuple(Vec<Expr>),

    // --- Variables and attributes ---
    Variable(String),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// Weak assignment: value evaluated before the target, no static type check.
    WeakAssign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    This,
    /// Explicit drop of a variable or attribute.
    Drop(Box<Expr>),

    // --- Operators ---
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Reference(Box<Expr>),
    Deref(Box<Expr>),

    // --- Calls ---
    Call {
        callee: Box<Expr>,
        args: Vec<Argument>,
    },
    Lambda(Box<FunctionDecl>),

    // --- Control flow ---
    If {
        branches: Vec<IfBranch>,
        else_branch: Option<Vec<Expr>>,
    },
    /// `cond ? a : b`
    Ternary {
        condition: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    While {
        condition: Box<Expr>,
        body: Vec<Expr>,
    },
    DoWhile {
        body: Vec<Expr>,
        condition: Box<Expr>,
    },
    /// `for (i -> start : end [: step]) { body }`
    RangeFor {
        variable: String,
        var_type: Option<Vec<TypeToken>>,
        start: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Vec<Expr>,
    },
    /// `for (x : iterable) { body }`
    ForEach {
        variable: String,
        iterable: Box<Expr>,
        body: Vec<Expr>,
    },
    Break,
    Continue,
    Return(Option<Box<Expr>>),
    Switch {
        subject: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Expr>>,
    },
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
        default: Option<Vec<Expr>>,
    },
    /// Scope literal: `{ ... }` in value position.
    Scope(Vec<Expr>),

    // --- Declarations ---
    Let {
        name: String,
        type_annotation: Option<Vec<TypeToken>>,
        value: Option<Box<Expr>>,
        is_const: bool,
    },
    /// Compile-time macro: later uses of `name` inline `value`.
    Macro {
        name: String,
        value: Box<Expr>,
    },
    Function(Box<FunctionDecl>),
    Decorated {
        decorator: Box<Expr>,
        target: Box<Expr>,
    },
    Class(Box<ClassDecl>),
    Enum(Box<EnumDecl>),
    Typedef {
        name: String,
        tokens: Vec<TypeToken>,
    },
    Use(UseDirective),

    // --- Errors ---
    Throw(Box<Expr>),
    Assert {
        condition: Box<Expr>,
        message: Option<Box<Expr>>,
    },
}

/// Binary operators that map one-to-one onto opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    /// Source symbol, also the name of an operator method overloading it.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}
