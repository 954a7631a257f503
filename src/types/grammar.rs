//! Type annotation grammar.
//!
//! ```text
//! type     := primary ('<' params? '>')*
//! primary  := Name ('(' type (',' type)* ')')?
//!           | '(' (type (',' type)* ','?)? ')'
//!           | '[' type ']'
//! params   := param (',' param)*
//! param    := type ('*' | '?')?
//! ```
//!
//! `(T)` is plain grouping, `(T, U)` and `(T,)` are tuples, `[T]` is a
//! reference, `Name(T, U)` instantiates a generic class, and `R<A, B?>` or
//! `R<A*>` is a function returning `R`.

use std::rc::Rc;

use crate::ast::types::render_tokens;
use crate::ast::TypeToken;
use crate::error::CompileError;
use crate::span::Span;
use crate::types::type_repr::{FunctionType, Type};

/// Name resolution seam for the annotation parser.
pub trait TypeLookup {
    fn lookup_type(&self, name: &str) -> Option<Type>;
}

/// Parse a complete annotation into a type descriptor.
pub fn parse_type(
    tokens: &[TypeToken],
    lookup: &dyn TypeLookup,
    span: Span,
) -> Result<Type, CompileError> {
    let mut parser = TypeParser {
        tokens,
        pos: 0,
        lookup,
        span,
    };
    if tokens.is_empty() {
        return Err(parser.syntax("empty annotation"));
    }
    let ty = parser.parse_type()?;
    if parser.pos != tokens.len() {
        return Err(parser.syntax(&format!("unexpected '{}'", tokens[parser.pos])));
    }
    Ok(ty)
}

struct TypeParser<'a> {
    tokens: &'a [TypeToken],
    pos: usize,
    lookup: &'a dyn TypeLookup,
    span: Span,
}

impl TypeParser<'_> {
    fn peek(&self) -> Option<&TypeToken> {
        self.tokens.get(self.pos)
    }

    fn check(&self, token: &TypeToken) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<&TypeToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: TypeToken) -> Result<(), CompileError> {
        if self.check(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax(&format!("expected '{}'", token)))
        }
    }

    fn syntax(&self, reason: &str) -> CompileError {
        CompileError::InvalidTypeSyntax {
            annotation: render_tokens(self.tokens),
            reason: reason.to_string(),
            span: self.span,
        }
    }

    fn parse_type(&mut self) -> Result<Type, CompileError> {
        let mut ty = self.parse_primary()?;
        while self.check(&TypeToken::LAngle) {
            ty = self.parse_function(ty)?;
        }
        Ok(ty)
    }

    fn parse_primary(&mut self) -> Result<Type, CompileError> {
        match self.advance().cloned() {
            Some(TypeToken::Name(name)) => self.parse_named(&name),
            Some(TypeToken::LParen) => {
                let mut items = Vec::new();
                let mut trailing_comma = false;
                while !self.check(&TypeToken::RParen) {
                    items.push(self.parse_type()?);
                    trailing_comma = false;
                    if self.check(&TypeToken::Comma) {
                        self.pos += 1;
                        trailing_comma = true;
                    } else {
                        break;
                    }
                }
                self.expect(TypeToken::RParen)?;
                if items.len() == 1 && !trailing_comma {
                    return Ok(items.remove(0));
                }
                Ok(Type::Tuple(items))
            }
            Some(TypeToken::LBracket) => {
                let inner = self.parse_type()?;
                self.expect(TypeToken::RBracket)?;
                Ok(Type::Reference(Box::new(inner)))
            }
            Some(other) => Err(self.syntax(&format!("unexpected '{}'", other))),
            None => Err(self.syntax("unexpected end of annotation")),
        }
    }

    fn parse_named(&mut self, name: &str) -> Result<Type, CompileError> {
        let Some(ty) = self.lookup.lookup_type(name) else {
            return Err(CompileError::UnknownType {
                name: name.to_string(),
                span: self.span,
            });
        };

        if !self.check(&TypeToken::LParen) {
            // A bare class name in an annotation means an instance of it.
            return Ok(match ty {
                Type::Class(class) => {
                    let args = class.generics.iter().map(|_| Type::any()).collect();
                    Type::Instance(class, args)
                }
                other => other,
            });
        }

        let Type::Class(class) = ty else {
            return Err(self.syntax(&format!("'{}' takes no type arguments", name)));
        };
        self.pos += 1;
        let mut args = Vec::new();
        while !self.check(&TypeToken::RParen) {
            args.push(self.parse_type()?);
            if self.check(&TypeToken::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.expect(TypeToken::RParen)?;
        if args.len() != class.generics.len() {
            return Err(CompileError::GenericArityMismatch {
                name: name.to_string(),
                expected: class.generics.len(),
                found: args.len(),
                span: self.span,
            });
        }
        Ok(Type::Instance(class, args))
    }

    fn parse_function(&mut self, return_type: Type) -> Result<Type, CompileError> {
        self.expect(TypeToken::LAngle)?;
        let mut signature = FunctionType::new(Vec::new(), return_type);
        if self.check(&TypeToken::RAngle) {
            self.pos += 1;
            return Ok(Type::function(signature));
        }
        loop {
            let param = self.parse_type()?;
            signature.params.push(param);
            if self.check(&TypeToken::Star) {
                self.pos += 1;
                signature.has_varargs = true;
                if !self.check(&TypeToken::RAngle) {
                    return Err(self.syntax("varargs parameter must be last"));
                }
            } else if self.check(&TypeToken::Question) {
                self.pos += 1;
                signature.default_count += 1;
            } else if signature.default_count > 0 {
                return Err(self.syntax("required parameter after an optional one"));
            }
            if self.check(&TypeToken::Comma) {
                self.pos += 1;
                continue;
            }
            self.expect(TypeToken::RAngle)?;
            break;
        }
        if signature.has_varargs && signature.default_count > 0 {
            return Err(self.syntax("varargs and optional parameters cannot be combined"));
        }
        Ok(Type::Function(Rc::new(signature)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::environment::TypeEnvironment;
    use crate::types::type_repr::{ClassType, Primitive};
    use pretty_assertions::assert_eq;

    fn n(name: &str) -> TypeToken {
        TypeToken::name(name)
    }

    fn env() -> TypeEnvironment {
        let mut env = TypeEnvironment::with_builtins();
        env.define(
            "Box",
            Type::Class(Rc::new(ClassType::new("Box", None, vec!["T".to_string()]))),
        );
        env.define("Unit", Type::Class(Rc::new(ClassType::new("Unit", None, vec![]))));
        env
    }

    fn parse(tokens: &[TypeToken]) -> Result<Type, CompileError> {
        parse_type(tokens, &env(), Span::default())
    }

    #[test]
    fn test_primitive() {
        assert_eq!(parse(&[n("i64")]).unwrap(), Type::int());
    }

    #[test]
    fn test_grouping_is_not_a_tuple() {
        use TypeToken::*;
        assert_eq!(parse(&[LParen, n("str"), RParen]).unwrap(), Type::str());
        assert_eq!(
            parse(&[LParen, n("str"), Comma, RParen]).unwrap(),
            Type::Tuple(vec![Type::str()])
        );
    }

    #[test]
    fn test_tuple_and_reference() {
        use TypeToken::*;
        let ty = parse(&[LParen, n("i64"), Comma, LBracket, n("str"), RBracket, RParen]).unwrap();
        assert_eq!(
            ty,
            Type::Tuple(vec![Type::int(), Type::Reference(Box::new(Type::str()))])
        );
        assert_eq!(ty.to_string(), "(i64, [str])");
    }

    #[test]
    fn test_generic_instance() {
        use TypeToken::*;
        let ty = parse(&[n("Box"), LParen, n("f64"), RParen]).unwrap();
        assert_eq!(ty.to_string(), "Box(f64)");
    }

    #[test]
    fn test_generic_arity_mismatch() {
        use TypeToken::*;
        let err = parse(&[n("Box"), LParen, n("i64"), Comma, n("str"), RParen]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::GenericArityMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ));
        let err = parse(&[n("Unit"), LParen, n("i64"), RParen]).unwrap_err();
        assert!(matches!(err, CompileError::GenericArityMismatch { .. }));
    }

    #[test]
    fn test_function_with_optional_tail() {
        use TypeToken::*;
        let ty = parse(&[n("i64"), LAngle, n("str"), Comma, n("bool"), Question, RAngle]).unwrap();
        let Type::Function(sig) = &ty else {
            panic!("expected function type, got {:?}", ty);
        };
        assert_eq!(sig.params, vec![Type::str(), Type::bool()]);
        assert_eq!(sig.default_count, 1);
        assert!(!sig.has_varargs);
        assert_eq!(ty.to_string(), "i64<str, bool?>");
    }

    #[test]
    fn test_function_with_varargs() {
        use TypeToken::*;
        let ty = parse(&[n("void"), LAngle, n("i64"), Star, RAngle]).unwrap();
        let Type::Function(sig) = ty else {
            panic!("expected function type");
        };
        assert!(sig.has_varargs);
        assert_eq!(sig.return_type, Type::Primitive(Primitive::Void));
    }

    #[test]
    fn test_varargs_must_be_last() {
        use TypeToken::*;
        let err = parse(&[n("void"), LAngle, n("i64"), Star, Comma, n("str"), RAngle]).unwrap_err();
        assert!(matches!(err, CompileError::InvalidTypeSyntax { .. }));
    }

    #[test]
    fn test_optional_then_required_rejected() {
        use TypeToken::*;
        let err = parse(&[n("void"), LAngle, n("i64"), Question, Comma, n("str"), RAngle])
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidTypeSyntax { .. }));
    }

    #[test]
    fn test_curried_function() {
        use TypeToken::*;
        let ty = parse(&[n("i64"), LAngle, RAngle, LAngle, n("str"), RAngle]).unwrap();
        assert_eq!(ty.to_string(), "i64<><str>");
    }

    #[test]
    fn test_unknown_name() {
        let err = parse(&[n("Nope")]).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownType {
                name: "Nope".to_string(),
                span: Span::default()
            }
        );
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        use TypeToken::*;
        let err = parse(&[n("i64"), RParen]).unwrap_err();
        assert!(matches!(err, CompileError::InvalidTypeSyntax { .. }));
    }
}
