//! Variable, function and header declarations.

use std::rc::Rc;

use crate::ast::{Expr, ExprKind, FunctionDecl, TypeToken, UseDirective};
use crate::bytecode::{Constant, Directive, Op};
use crate::error::CompileError;
use crate::span::Span;
use crate::types::{parse_type, ClassType, FunctionType, Type};

use super::compiler::Compiler;
use super::scope::{ClassContext, FunctionKind};

impl Compiler {
    pub(crate) fn compile_let(
        &mut self,
        name: &str,
        annotation: Option<&Vec<TypeToken>>,
        value: Option<&Expr>,
        is_const: bool,
        span: Span,
    ) {
        let declared = self.optional_annotation(annotation, span);
        let value_ty = match value {
            Some(value) => {
                let ty = self.compile_expr(value);
                if let Some(declared) = &declared {
                    self.check_assignable(&ty, declared, value.span);
                }
                ty
            }
            None => {
                self.emit(Op::Null, span.line);
                Type::any()
            }
        };
        let ty = declared.unwrap_or(value_ty);

        if self.is_global_scope() {
            let idx = self.name_constant(name, span);
            self.emit(Op::DefineGlobal(idx), span.line);
            self.define_global(name, ty, is_const);
        } else {
            self.declare_local(name, ty, is_const, span);
        }
    }

    // --- Functions ---

    /// Static signature of a function declaration. Unannotated parameters
    /// and return types are `any`.
    pub(crate) fn function_signature(&mut self, decl: &FunctionDecl) -> FunctionType {
        let mut params = Vec::with_capacity(decl.params.len() + 1);
        for param in &decl.params {
            let ty = self
                .optional_annotation(param.type_annotation.as_ref(), param.span)
                .unwrap_or_else(Type::any);
            params.push(ty);
        }
        if let Some(varargs) = &decl.varargs {
            let ty = self
                .optional_annotation(varargs.type_annotation.as_ref(), varargs.span)
                .unwrap_or_else(Type::any);
            params.push(ty);
        }
        let return_type = self
            .optional_annotation(decl.return_type.as_ref(), decl.span)
            .unwrap_or_else(Type::any);

        FunctionType {
            return_type,
            params,
            generics: decl.generics.clone(),
            has_varargs: decl.varargs.is_some(),
            default_count: decl.params.iter().filter(|p| p.default.is_some()).count(),
        }
    }

    pub(crate) fn compile_function_decl(&mut self, decl: &FunctionDecl) {
        let span = decl.span;
        self.with_generics(&decl.generics, |c| {
            let signature = Rc::new(c.function_signature(decl));
            let binding = c.reserve_binding(&decl.name, Type::Function(signature.clone()), true, span);
            c.emit_function(decl, FunctionKind::Function, &signature, None);
            c.complete_binding(binding, span.line);
        });
    }

    pub(crate) fn compile_lambda(&mut self, decl: &FunctionDecl) -> Type {
        self.with_generics(&decl.generics, |c| {
            let signature = Rc::new(c.function_signature(decl));
            c.emit_function(decl, FunctionKind::Lambda, &signature, None);
            Type::Function(signature)
        })
    }

    /// Compile a function body into its own unit and push a closure over it.
    /// Default values are evaluated here, at the definition site. `owner`
    /// sets the class context for methods and constructors.
    pub(crate) fn emit_function(
        &mut self,
        decl: &FunctionDecl,
        kind: FunctionKind,
        signature: &FunctionType,
        owner: Option<&Rc<ClassType>>,
    ) {
        let span = decl.span;

        // Defaults fill the trailing parameters, so none may be required after one.
        if let Some(first) = decl.params.iter().position(|p| p.default.is_some()) {
            for param in decl.params[first..].iter().filter(|p| p.default.is_none()) {
                self.report(CompileError::RequiredAfterDefault {
                    name: param.name.clone(),
                    span: param.span,
                });
            }
        }

        let mut defaults = 0u8;
        for (param, ty) in decl.params.iter().zip(&signature.params) {
            if let Some(default) = &param.default {
                let default_ty = self.compile_expr(default);
                self.check_assignable(&default_ty, ty, default.span);
                defaults = defaults.saturating_add(1);
            }
        }

        let this_type = match (kind, owner) {
            (FunctionKind::Method | FunctionKind::Constructor, Some(class)) => class.self_instance(),
            _ => Type::any(),
        };
        self.begin_unit(&decl.name, kind, this_type);
        if let Some(class) = owner {
            self.scope.class = Some(ClassContext { class: class.clone() });
        }

        let declared = decl.params.len();
        let required = decl.params.iter().filter(|p| p.default.is_none()).count();
        let total = declared + usize::from(decl.varargs.is_some()) + usize::from(decl.kwargs.is_some());
        let unit = &mut self.scope.unit;
        unit.arity = u8::try_from(required).unwrap_or(u8::MAX);
        unit.total_arity = u8::try_from(total).unwrap_or(u8::MAX);
        unit.default_count = defaults;
        unit.has_varargs = decl.varargs.is_some();
        unit.has_kwargs = decl.kwargs.is_some();
        unit.is_async = decl.is_async;
        unit.catches_result = decl.catches_result;
        unit.param_names = decl.params.iter().map(|p| p.name.clone()).collect();
        if let Some(varargs) = &decl.varargs {
            unit.param_names.push(varargs.name.clone());
        }
        if let Some(kwargs) = &decl.kwargs {
            unit.param_names.push(kwargs.clone());
        }

        // Arguments already occupy the slots after slot 0.
        for (param, ty) in decl.params.iter().zip(&signature.params) {
            self.scope.stack_height += 1;
            self.declare_local(&param.name, ty.clone(), false, param.span);
        }
        if let Some(varargs) = &decl.varargs {
            self.scope.stack_height += 1;
            self.declare_local(&varargs.name, Type::list(), false, varargs.span);
        }
        if let Some(kwargs) = &decl.kwargs {
            self.scope.stack_height += 1;
            self.declare_local(kwargs, Type::map(), false, span);
        }

        if decl.return_type.is_some() && kind != FunctionKind::Constructor {
            self.scope.return_type = Some(signature.return_type.clone());
        }
        self.compile_function_body(&decl.body, kind, span);

        let unit = self.end_unit();
        self.emit_closure(unit, defaults, span);
    }

    fn compile_function_body(&mut self, body: &[Expr], kind: FunctionKind, span: Span) {
        let line = body.last().map(|e| e.span.line).unwrap_or(span.line);

        if kind == FunctionKind::Constructor {
            for expr in body {
                self.compile_effect(expr);
            }
            self.emit(Op::GetLocal(0), line);
            self.emit(Op::Return, line);
            return;
        }

        match self.scope.return_type.clone() {
            Some(declared) if declared.is_void() => {
                for expr in body {
                    self.compile_effect(expr);
                }
                self.emit(Op::Null, line);
            }
            declared => {
                let ty = self.compile_sequence(body, line);
                let diverges = body.last().map(|e| e.diverges()).unwrap_or(false);
                if let (Some(declared), false) = (declared, diverges) {
                    let at = body.last().map(|e| e.span).unwrap_or(span);
                    self.check_assignable(&ty, &declared, at);
                }
            }
        }
        self.emit(Op::Return, line);
    }

    /// `@decorator fn name(...)`: the binding receives whatever the
    /// decorator returns when called with the function.
    pub(crate) fn compile_decorated(&mut self, decorator: &Expr, target: &Expr, span: Span) {
        let ExprKind::Function(decl) = &target.kind else {
            self.report(CompileError::DecoratorTarget { span: target.span });
            self.compile_effect(target);
            return;
        };
        let line = span.line;

        self.with_generics(&decl.generics, |c| {
            let signature = Rc::new(c.function_signature(decl));
            let function_ty = Type::Function(signature.clone());
            let binding = c.reserve_binding(&decl.name, function_ty.clone(), true, span);

            let decorator_ty = c.compile_expr(decorator);
            c.emit_function(decl, FunctionKind::Function, &signature, None);
            c.emit(Op::Call(1, 0), line);

            match &decorator_ty {
                ty if ty.is_dynamic() => {}
                Type::Function(decorator_sig) => {
                    if !decorator_sig.accepts(1) {
                        c.report(CompileError::WrongArity {
                            expected: decorator_sig.expected_arity(),
                            got: 1,
                            span: decorator.span,
                        });
                    }
                    if !decorator_sig.return_type.is_assignable_to(&function_ty) {
                        c.report(CompileError::DecoratorReturnMismatch {
                            name: decl.name.clone(),
                            expected: function_ty.to_string(),
                            found: decorator_sig.return_type.to_string(),
                            span: decorator.span,
                        });
                    }
                }
                other => c.report(CompileError::DecoratorNotCallable {
                    type_name: other.to_string(),
                    span: decorator.span,
                }),
            }

            c.complete_binding(binding, line);
        });
    }

    // --- Types and headers ---

    pub(crate) fn compile_typedef(&mut self, name: &str, tokens: &[TypeToken], span: Span) {
        match parse_type(tokens, &*self, span) {
            Ok(ty) => {
                self.scope.types.define(name, ty);
            }
            Err(error) => {
                let reason = match &error {
                    CompileError::UnknownType { name, .. } => format!("unknown type '{}'", name),
                    other => other.to_string(),
                };
                self.report(CompileError::UnknownTypedef {
                    name: name.to_string(),
                    reason,
                    span,
                });
            }
        }
    }

    /// Module header directives. They record metadata on the module chunk
    /// and emit a directive instruction for the runtime.
    pub(crate) fn compile_use(&mut self, directive: &UseDirective) {
        let span = directive.span;
        let name = directive.name.as_str();
        let args = &directive.args;

        if !self.is_global_scope() {
            self.report(CompileError::MisplacedDirective {
                name: name.to_string(),
                span,
            });
            return;
        }

        let arity = |expected: &str| CompileError::DirectiveArity {
            name: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
            span,
        };

        match name {
            "optimize" => {
                if !args.is_empty() {
                    self.report(arity("0"));
                    return;
                }
                self.scope.unit.chunk.optimize = true;
                self.emit(Op::Directive(Directive::Optimize, 0), span.line);
            }
            "func" | "main" => {
                let [entry] = args.as_slice() else {
                    self.report(arity("1"));
                    return;
                };
                let idx = self.add_constant(Constant::Str(entry.clone()), span);
                self.scope.unit.chunk.entry_point = Some(entry.clone());
                self.emit(Op::Directive(Directive::Entry, idx), span.line);
            }
            "export" => {
                if args.is_empty() {
                    self.report(arity("at least 1"));
                    return;
                }
                let idx = self.add_constant(Constant::Names(args.clone()), span);
                self.scope.unit.chunk.exports.extend(args.iter().cloned());
                self.emit(Op::Directive(Directive::Export, idx), span.line);
            }
            "package" => {
                if args.is_empty() {
                    self.report(arity("at least 1"));
                    return;
                }
                let package = args.join(".");
                let idx = self.add_constant(Constant::Str(package.clone()), span);
                self.scope.unit.chunk.package = Some(package);
                self.emit(Op::Directive(Directive::Package, idx), span.line);
            }
            "exportTo" => {
                let [target] = args.as_slice() else {
                    self.report(arity("1"));
                    return;
                };
                let idx = self.add_constant(Constant::Str(target.clone()), span);
                self.scope.unit.chunk.export_target = Some(target.clone());
                self.emit(Op::Directive(Directive::ExportTo, idx), span.line);
            }
            _ => self.report(CompileError::UnknownDirective {
                name: name.to_string(),
                span,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Expr, ExprKind, FunctionDecl, Parameter, Program, TypeToken, UseDirective};
    use crate::bytecode::{Directive, Op};
    use crate::compiler::compile;
    use crate::config::CompilerOptions;
    use crate::error::{CompileError, ErrorKind};
    use crate::span::Span;
    use pretty_assertions::assert_eq;

    fn e(kind: ExprKind) -> Expr {
        Expr::new(kind, Span::new(0, 0, 1, 1))
    }

    fn use_(name: &str, args: &[&str]) -> Expr {
        e(ExprKind::Use(UseDirective {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            span: Span::default(),
        }))
    }

    #[test]
    fn test_directives_record_module_metadata() {
        let module = compile(
            &Program::new(vec![
                use_("package", &["app", "core"]),
                use_("export", &["run", "stop"]),
                use_("main", &["run"]),
                use_("optimize", &[]),
            ]),
            &CompilerOptions::default(),
        )
        .unwrap();
        let chunk = &module.main.chunk;
        assert_eq!(chunk.package.as_deref(), Some("app.core"));
        assert_eq!(chunk.exports, vec!["run".to_string(), "stop".to_string()]);
        assert_eq!(chunk.entry_point.as_deref(), Some("run"));
        assert!(chunk.optimize);
        assert!(chunk.code.contains(&Op::Directive(Directive::Optimize, 0)));
    }

    #[test]
    fn test_directive_errors() {
        let failure = compile(
            &Program::new(vec![use_("main", &[]), use_("frobnicate", &[])]),
            &CompilerOptions::default(),
        )
        .expect_err("bad directives");
        assert!(matches!(failure.errors()[0], CompileError::DirectiveArity { .. }));
        assert!(matches!(failure.errors()[1], CompileError::UnknownDirective { .. }));
        assert!(failure.has_kind(ErrorKind::Directive));
    }

    #[test]
    fn test_directive_inside_function_is_misplaced() {
        let f = FunctionDecl::new("f", vec![], vec![use_("optimize", &[])]);
        let failure = compile(
            &Program::new(vec![e(ExprKind::Function(Box::new(f)))]),
            &CompilerOptions::default(),
        )
        .expect_err("misplaced");
        assert!(matches!(failure.errors()[0], CompileError::MisplacedDirective { .. }));
    }

    #[test]
    fn test_defaults_counted_on_closure() {
        let mut param = Parameter::new("b");
        param.default = Some(e(ExprKind::Int(2)));
        let f = FunctionDecl::new("f", vec![Parameter::new("a"), param], vec![e(ExprKind::Null)]);
        let module = compile(
            &Program::new(vec![e(ExprKind::Function(Box::new(f)))]),
            &CompilerOptions::default(),
        )
        .unwrap();
        assert!(module.main.chunk.code.iter().any(|op| matches!(op, Op::Closure(_, 1))));
        let unit = module.main.nested_units().next().unwrap().clone();
        assert_eq!((unit.arity, unit.total_arity, unit.default_count), (1, 2, 1));
    }

    #[test]
    fn test_required_parameter_after_default_is_rejected() {
        let mut a = Parameter::new("a");
        a.default = Some(e(ExprKind::Int(1)));
        let f = FunctionDecl::new(
            "f",
            vec![a, Parameter::new("b")],
            vec![e(ExprKind::Array(vec![
                e(ExprKind::Variable("a".into())),
                e(ExprKind::Variable("b".into())),
            ]))],
        );
        let failure = compile(
            &Program::new(vec![e(ExprKind::Function(Box::new(f)))]),
            &CompilerOptions::default(),
        )
        .expect_err("required after default");
        assert_eq!(failure.errors().len(), 1);
        assert!(matches!(
            &failure.errors()[0],
            CompileError::RequiredAfterDefault { name, .. } if name == "b"
        ));
        assert!(failure.has_kind(ErrorKind::Call));
    }

    #[test]
    fn test_declared_return_type_checked() {
        let mut f = FunctionDecl::new("f", vec![], vec![e(ExprKind::Str("no".into()))]);
        f.return_type = Some(vec![TypeToken::name("i64")]);
        let failure = compile(
            &Program::new(vec![e(ExprKind::Function(Box::new(f)))]),
            &CompilerOptions::default(),
        )
        .expect_err("return mismatch");
        assert!(matches!(failure.errors()[0], CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn test_typedef_with_unknown_type() {
        let failure = compile(
            &Program::new(vec![e(ExprKind::Typedef {
                name: "Alias".into(),
                tokens: vec![TypeToken::name("Missing")],
            })]),
            &CompilerOptions::default(),
        )
        .expect_err("unknown typedef");
        assert!(failure.has_kind(ErrorKind::Typedef));
    }
}
