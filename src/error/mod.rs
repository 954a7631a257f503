//! Error types for compilation and bytecode decoding.

use thiserror::Error;
use tracing::{trace, warn};

use crate::span::Span;

/// Diagnostic categories. Every [`CompileError`] belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Undefined or misused names.
    Scope,
    /// Operator, assignment, return and argument type mismatches.
    Type,
    /// Missing or inaccessible attributes.
    Attribute,
    /// Arity, non-callable targets, generic arity.
    Call,
    Decorator,
    Pattern,
    Typedef,
    /// `use` headers.
    Directive,
    /// `break`/`continue` placement.
    ControlFlow,
    /// Structural limits of the bytecode format or the compiler itself.
    Limit,
}

/// Bytecode compilation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Undefined variable '{name}' at {span}")]
    UndefinedVariable { name: String, span: Span },

    #[error("Variable '{name}' already declared in this scope at {span}")]
    Redeclaration { name: String, span: Span },

    #[error("Cannot assign to constant '{name}' at {span}")]
    AssignToConstant { name: String, span: Span },

    #[error("Invalid assignment target at {span}")]
    InvalidAssignmentTarget { span: Span },

    #[error("Cannot use 'this' outside of a method at {span}")]
    ThisOutsideMethod { span: Span },

    #[error("Type mismatch: expected {expected}, found {found} at {span}")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Operator '{op}' cannot be applied to {left} and {right} at {span}")]
    IncompatibleOperands {
        op: String,
        left: String,
        right: String,
        span: Span,
    },

    #[error("Unknown type '{name}' at {span}")]
    UnknownType { name: String, span: Span },

    #[error("Invalid type annotation '{annotation}': {reason} at {span}")]
    InvalidTypeSyntax {
        annotation: String,
        reason: String,
        span: Span,
    },

    #[error("Type '{name}' expects {expected} generic argument(s), found {found} at {span}")]
    GenericArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("Type '{type_name}' has no attribute '{name}' at {span}")]
    NoSuchAttribute {
        type_name: String,
        name: String,
        span: Span,
    },

    #[error("Attribute '{name}' of '{type_name}' is private at {span}")]
    PrivateAttribute {
        type_name: String,
        name: String,
        span: Span,
    },

    #[error("Wrong number of arguments: expected {expected}, got {got} at {span}")]
    WrongArity {
        expected: String,
        got: usize,
        span: Span,
    },

    #[error("Cannot call a value of type '{type_name}' at {span}")]
    NotCallable { type_name: String, span: Span },

    #[error("Required parameter '{name}' follows a parameter with a default at {span}")]
    RequiredAfterDefault { name: String, span: Span },

    #[error("Decorator must be a function, found '{type_name}' at {span}")]
    DecoratorNotCallable { type_name: String, span: Span },

    #[error("Only inline function declarations can be decorated at {span}")]
    DecoratorTarget { span: Span },

    #[error("Decorator returns '{found}' but '{name}' has type '{expected}' at {span}")]
    DecoratorReturnMismatch {
        name: String,
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Match target '{type_name}' is not a class or enum variant at {span}")]
    PatternTarget { type_name: String, span: Span },

    #[error("'{type_name}' has no attribute '{name}' to destructure at {span}")]
    PatternAttribute {
        type_name: String,
        name: String,
        span: Span,
    },

    #[error("Variant '{variant}' has {expected} field(s), pattern binds {found} at {span}")]
    PatternArity {
        variant: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("Typedef '{name}' refers to an unknown type ({reason}) at {span}")]
    UnknownTypedef {
        name: String,
        reason: String,
        span: Span,
    },

    #[error("Unknown directive 'use {name}' at {span}")]
    UnknownDirective { name: String, span: Span },

    #[error("Directive 'use {name}' expects {expected} argument(s), got {got} at {span}")]
    DirectiveArity {
        name: String,
        expected: String,
        got: usize,
        span: Span,
    },

    #[error("Directive 'use {name}' is only allowed at module top level at {span}")]
    MisplacedDirective { name: String, span: Span },

    #[error("'break' outside of a loop at {span}")]
    BreakOutsideLoop { span: Span },

    #[error("'continue' outside of a loop at {span}")]
    ContinueOutsideLoop { span: Span },

    #[error("Nesting deeper than {limit} levels at {span}")]
    NestingTooDeep { limit: usize, span: Span },

    #[error("Too many constants in one function unit at {span}")]
    TooManyConstants { span: Span },

    #[error("Too many local variables in one function unit at {span}")]
    TooManyLocals { span: Span },

    #[error("Jump distance too large at {span}")]
    JumpTooLarge { span: Span },
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UndefinedVariable { .. }
            | Self::Redeclaration { .. }
            | Self::AssignToConstant { .. }
            | Self::InvalidAssignmentTarget { .. }
            | Self::ThisOutsideMethod { .. } => ErrorKind::Scope,
            Self::TypeMismatch { .. }
            | Self::IncompatibleOperands { .. }
            | Self::UnknownType { .. }
            | Self::InvalidTypeSyntax { .. } => ErrorKind::Type,
            Self::NoSuchAttribute { .. } | Self::PrivateAttribute { .. } => ErrorKind::Attribute,
            Self::GenericArityMismatch { .. }
            | Self::WrongArity { .. }
            | Self::NotCallable { .. }
            | Self::RequiredAfterDefault { .. } => ErrorKind::Call,
            Self::DecoratorNotCallable { .. }
            | Self::DecoratorTarget { .. }
            | Self::DecoratorReturnMismatch { .. } => ErrorKind::Decorator,
            Self::PatternTarget { .. }
            | Self::PatternAttribute { .. }
            | Self::PatternArity { .. } => ErrorKind::Pattern,
            Self::UnknownTypedef { .. } => ErrorKind::Typedef,
            Self::UnknownDirective { .. }
            | Self::DirectiveArity { .. }
            | Self::MisplacedDirective { .. } => ErrorKind::Directive,
            Self::BreakOutsideLoop { .. } | Self::ContinueOutsideLoop { .. } => {
                ErrorKind::ControlFlow
            }
            Self::NestingTooDeep { .. }
            | Self::TooManyConstants { .. }
            | Self::TooManyLocals { .. }
            | Self::JumpTooLarge { .. } => ErrorKind::Limit,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UndefinedVariable { span, .. }
            | Self::Redeclaration { span, .. }
            | Self::AssignToConstant { span, .. }
            | Self::InvalidAssignmentTarget { span }
            | Self::ThisOutsideMethod { span }
            | Self::TypeMismatch { span, .. }
            | Self::IncompatibleOperands { span, .. }
            | Self::UnknownType { span, .. }
            | Self::InvalidTypeSyntax { span, .. }
            | Self::GenericArityMismatch { span, .. }
            | Self::NoSuchAttribute { span, .. }
            | Self::PrivateAttribute { span, .. }
            | Self::WrongArity { span, .. }
            | Self::NotCallable { span, .. }
            | Self::RequiredAfterDefault { span, .. }
            | Self::DecoratorNotCallable { span, .. }
            | Self::DecoratorTarget { span }
            | Self::DecoratorReturnMismatch { span, .. }
            | Self::PatternTarget { span, .. }
            | Self::PatternAttribute { span, .. }
            | Self::PatternArity { span, .. }
            | Self::UnknownTypedef { span, .. }
            | Self::UnknownDirective { span, .. }
            | Self::DirectiveArity { span, .. }
            | Self::MisplacedDirective { span, .. }
            | Self::BreakOutsideLoop { span }
            | Self::ContinueOutsideLoop { span }
            | Self::NestingTooDeep { span, .. }
            | Self::TooManyConstants { span }
            | Self::TooManyLocals { span }
            | Self::JumpTooLarge { span } => *span,
        }
    }

    pub fn type_mismatch(expected: impl ToString, found: impl ToString, span: Span) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
            span,
        }
    }
}

/// The central diagnostic sink. Code generation keeps going after a report;
/// the driver refuses to hand out bytecode if anything was collected.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
    suppress_type_errors: bool,
}

impl Diagnostics {
    pub fn new(type_check: bool) -> Self {
        Self {
            errors: Vec::new(),
            suppress_type_errors: !type_check,
        }
    }

    pub fn report(&mut self, error: CompileError) {
        if self.suppress_type_errors && error.kind() == ErrorKind::Type {
            trace!(%error, "type diagnostic suppressed");
            return;
        }
        warn!(kind = ?error.kind(), %error, "compile error");
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn into_vec(self) -> Vec<CompileError> {
        self.errors
    }
}

/// Returned by `compile` when any diagnostic was recorded.
#[derive(Debug, Error)]
#[error("compilation failed with {} error(s); first: {}", .0.len(), first_message(.0))]
pub struct CompileFailure(pub Vec<CompileError>);

fn first_message(errors: &[CompileError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl CompileFailure {
    pub fn errors(&self) -> &[CompileError] {
        &self.0
    }

    /// True if any collected error has the given kind.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.0.iter().any(|e| e.kind() == kind)
    }
}

/// Errors reading a serialized integer stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Bad magic number {0:#x}")]
    BadMagic(i64),

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(i64),

    #[error("Unexpected end of stream at position {0}")]
    UnexpectedEnd(usize),

    #[error("Invalid {what} tag {tag} at position {position}")]
    InvalidTag {
        what: &'static str,
        tag: i64,
        position: usize,
    },

    #[error("Value {value} out of range for {what} at position {position}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        position: usize,
    },
}

/// A unified error type for the command line front end.
#[derive(Debug, Error)]
pub enum StrandError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileFailure),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid AST input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
