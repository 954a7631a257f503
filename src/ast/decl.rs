//! Declaration AST nodes: functions, classes, enums and `use` headers.

use serde::{Deserialize, Serialize};

use crate::ast::expr::Expr;
use crate::ast::types::TypeToken;
use crate::span::Span;

/// A complete program: the module body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Expr>,
}

impl Program {
    pub fn new(body: Vec<Expr>) -> Self {
        Self { body }
    }
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub type_annotation: Option<Vec<TypeToken>>,
    #[serde(default)]
    pub default: Option<Expr>,
    #[serde(default)]
    pub span: Span,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_annotation: None,
            default: None,
            span: Span::default(),
        }
    }

    pub fn typed(name: impl Into<String>, type_annotation: Vec<TypeToken>) -> Self {
        Self {
            type_annotation: Some(type_annotation),
            ..Self::new(name)
        }
    }
}

/// A function, method, constructor or lambda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub generics: Vec<String>,
    #[serde(default)]
    pub params: Vec<Parameter>,
    /// Trailing `*rest` parameter.
    #[serde(default)]
    pub varargs: Option<Parameter>,
    /// Trailing `**opts` parameter.
    #[serde(default)]
    pub kwargs: Option<String>,
    #[serde(default)]
    pub return_type: Option<Vec<TypeToken>>,
    pub body: Vec<Expr>,
    #[serde(default)]
    pub is_async: bool,
    /// Calls may return an error-carrying result instead of raising.
    #[serde(default)]
    pub catches_result: bool,
    #[serde(default)]
    pub span: Span,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, params: Vec<Parameter>, body: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            generics: Vec::new(),
            params,
            varargs: None,
            kwargs: None,
            return_type: None,
            body,
            is_async: false,
            catches_result: false,
            span: Span::default(),
        }
    }
}

/// A class attribute with an optional initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(default)]
    pub type_annotation: Option<Vec<TypeToken>>,
    #[serde(default)]
    pub initializer: Option<Expr>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub span: Span,
}

/// A method. Operator methods are named by their symbol (`"+"`, `"=="`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub function: FunctionDecl,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_operator: bool,
}

/// Class members in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassMember {
    Field(FieldDecl),
    Method(MethodDecl),
}

impl ClassMember {
    pub fn name(&self) -> &str {
        match self {
            ClassMember::Field(field) => &field.name,
            ClassMember::Method(method) => &method.function.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub generics: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub members: Vec<ClassMember>,
    #[serde(default)]
    pub constructor: Option<FunctionDecl>,
    #[serde(default)]
    pub span: Span,
}

/// A typed, named payload field of an enum variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantField {
    pub name: String,
    pub type_annotation: Vec<TypeToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumVariantDecl {
    pub name: String,
    #[serde(default)]
    pub generics: Vec<String>,
    #[serde(default)]
    pub fields: Vec<VariantField>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<EnumVariantDecl>,
    /// Public enums export their variant names into the enclosing globals.
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub span: Span,
}

/// A top-level `use name(args...)` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseDirective {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub span: Span,
}
