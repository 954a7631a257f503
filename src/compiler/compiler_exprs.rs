//! Expression compilation and the node dispatcher.

use crate::ast::{Argument, BinaryOp, Expr, ExprKind, InterpolatedPart, LogicalOp, UnaryOp};
use crate::bytecode::{Constant, Op, UNPATCHED};
use crate::error::CompileError;
use crate::span::Span;
use crate::types::{FunctionType, Primitive, Type};

use super::compiler::Compiler;
use super::scope::{ResolutionContext, Resolved};

/// Whether the surrounding code consumes the node's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Value,
    Effect,
}

/// What a node left on the stack.
enum Emitted {
    /// Exactly one value.
    Value(Type),
    /// Nothing; the type says whether control can fall through.
    Nothing(Type),
    /// The node already honoured the requested position.
    Positioned(Type),
}

impl Compiler {
    /// Compile a node whose value is used.
    pub(crate) fn compile_expr(&mut self, expr: &Expr) -> Type {
        self.compile_node(expr, Position::Value)
    }

    /// Compile a node for its side effects only.
    pub(crate) fn compile_effect(&mut self, expr: &Expr) {
        self.compile_node(expr, Position::Effect);
    }

    fn compile_node(&mut self, expr: &Expr, position: Position) -> Type {
        let span = expr.span;
        let line = span.line;
        if !self.enter_nesting(span) {
            if position == Position::Value {
                self.emit(Op::Null, line);
            }
            return Type::any();
        }

        let emitted = match &expr.kind {
            ExprKind::Int(n) => {
                self.emit_constant(Constant::Int(*n), span);
                Emitted::Value(Type::int())
            }
            ExprKind::Float(n) => {
                self.emit_constant(Constant::Float(*n), span);
                Emitted::Value(Type::float())
            }
            ExprKind::Str(s) => {
                self.emit_constant(Constant::Str(s.clone()), span);
                Emitted::Value(Type::str())
            }
            ExprKind::Bool(b) => {
                self.emit(if *b { Op::True } else { Op::False }, line);
                Emitted::Value(Type::bool())
            }
            ExprKind::Null => {
                self.emit(Op::Null, line);
                Emitted::Value(Type::any())
            }
            ExprKind::Interpolated(parts) => Emitted::Value(self.compile_interpolated(parts, span)),
            ExprKind::Array(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                let count = self.count_operand(items.len(), span);
                self.emit(Op::Array(count), line);
                Emitted::Value(Type::list())
            }
            ExprKind::Map(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key);
                    self.compile_expr(value);
                }
                let count = self.count_operand(pairs.len(), span);
                self.emit(Op::Map(count), line);
                Emitted::Value(Type::map())
            }
            ExprKind::Tuple(items) => {
                let types = items.iter().map(|item| self.compile_expr(item)).collect();
                let count = self.count_operand(items.len(), span);
                self.emit(Op::Tuple(count), line);
                Emitted::Value(Type::Tuple(types))
            }

            ExprKind::Variable(name) => Emitted::Value(self.compile_variable(name, span)),
            ExprKind::Assign { target, value } => {
                Emitted::Value(self.compile_assign(target, value, false, span))
            }
            ExprKind::WeakAssign { target, value } => {
                Emitted::Value(self.compile_assign(target, value, true, span))
            }
            ExprKind::Member { object, name } => Emitted::Value(self.compile_member(object, name, span)),
            ExprKind::Index { object, index } => Emitted::Value(self.compile_index(object, index)),
            ExprKind::This => Emitted::Value(self.compile_this(span)),
            ExprKind::Drop(target) => {
                self.compile_drop(target, span);
                Emitted::Nothing(Type::void())
            }

            ExprKind::Binary { left, op, right } => Emitted::Value(self.compile_binary(left, *op, right)),
            ExprKind::Logical { left, op, right } => {
                Emitted::Value(self.compile_logical(left, *op, right, span))
            }
            ExprKind::Unary { op, operand } => Emitted::Value(self.compile_unary(*op, operand, span)),
            ExprKind::Reference(inner) => {
                let ty = self.compile_expr(inner);
                self.emit(Op::Ref, line);
                Emitted::Value(Type::Reference(Box::new(ty)))
            }
            ExprKind::Deref(inner) => Emitted::Value(self.compile_deref(inner, span)),

            ExprKind::Call { callee, args } => Emitted::Value(self.compile_call(callee, args, span)),
            ExprKind::Lambda(decl) => Emitted::Value(self.compile_lambda(decl)),

            ExprKind::If {
                branches,
                else_branch,
            } => Emitted::Value(self.compile_if(branches, else_branch.as_deref(), span)),
            ExprKind::Ternary {
                condition,
                then_value,
                else_value,
            } => Emitted::Value(self.compile_ternary(condition, then_value, else_value, span)),
            ExprKind::While { condition, body } => {
                Emitted::Positioned(self.compile_while(condition, body, position, span))
            }
            ExprKind::DoWhile { body, condition } => {
                Emitted::Positioned(self.compile_do_while(body, condition, position, span))
            }
            ExprKind::RangeFor {
                variable,
                var_type,
                start,
                end,
                step,
                body,
            } => Emitted::Positioned(self.compile_range_for(
                variable,
                var_type.as_ref(),
                start,
                end,
                step.as_deref(),
                body,
                position,
                span,
            )),
            ExprKind::ForEach {
                variable,
                iterable,
                body,
            } => Emitted::Positioned(self.compile_for_each(variable, iterable, body, position, span)),
            ExprKind::Break => Emitted::Nothing(self.compile_break(span)),
            ExprKind::Continue => Emitted::Nothing(self.compile_continue(span)),
            ExprKind::Return(value) => Emitted::Nothing(self.compile_return(value.as_deref(), span)),
            ExprKind::Switch {
                subject,
                cases,
                default,
            } => Emitted::Value(self.compile_switch(subject, cases, default.as_deref(), span)),
            ExprKind::Match {
                subject,
                arms,
                default,
            } => Emitted::Value(self.compile_match(subject, arms, default.as_deref(), span)),
            ExprKind::Scope(body) => Emitted::Value(self.compile_scope_literal(body, span)),

            ExprKind::Let {
                name,
                type_annotation,
                value,
                is_const,
            } => {
                self.compile_let(name, type_annotation.as_ref(), value.as_deref(), *is_const, span);
                Emitted::Nothing(Type::void())
            }
            ExprKind::Macro { name, value } => {
                self.define_macro(name, (**value).clone());
                Emitted::Nothing(Type::void())
            }
            ExprKind::Function(decl) => {
                self.compile_function_decl(decl);
                Emitted::Nothing(Type::void())
            }
            ExprKind::Decorated { decorator, target } => {
                self.compile_decorated(decorator, target, span);
                Emitted::Nothing(Type::void())
            }
            ExprKind::Class(decl) => {
                self.compile_class(decl);
                Emitted::Nothing(Type::void())
            }
            ExprKind::Enum(decl) => {
                self.compile_enum(decl);
                Emitted::Nothing(Type::void())
            }
            ExprKind::Typedef { name, tokens } => {
                self.compile_typedef(name, tokens, span);
                Emitted::Nothing(Type::void())
            }
            ExprKind::Use(directive) => {
                self.compile_use(directive);
                Emitted::Nothing(Type::void())
            }

            ExprKind::Throw(value) => Emitted::Nothing(self.compile_throw(value, span)),
            ExprKind::Assert { condition, message } => {
                self.compile_assert(condition, message.as_deref(), span);
                Emitted::Nothing(Type::void())
            }
        };

        self.leave_nesting();

        match (emitted, position) {
            (Emitted::Value(ty), Position::Value) => ty,
            (Emitted::Value(ty), Position::Effect) => {
                self.emit(Op::Pop, line);
                ty
            }
            (Emitted::Nothing(ty), Position::Value) => {
                self.emit(Op::Null, line);
                ty
            }
            (Emitted::Nothing(ty), Position::Effect) => ty,
            (Emitted::Positioned(ty), _) => ty,
        }
    }

    fn compile_interpolated(&mut self, parts: &[InterpolatedPart], span: Span) -> Type {
        for part in parts {
            match part {
                InterpolatedPart::Literal(text) => self.emit_constant(Constant::Str(text.clone()), span),
                InterpolatedPart::Expr(expr) => {
                    self.compile_expr(expr);
                }
            }
        }
        let count = self.count_operand(parts.len(), span);
        self.emit(Op::BuildString(count), span.line);
        Type::str()
    }

    // --- Variables ---

    pub(crate) fn compile_variable(&mut self, name: &str, span: Span) -> Type {
        let line = span.line;
        match self.resolve_name(name, ResolutionContext::Expression) {
            Some(Resolved::Macro(expr)) => self.compile_expr(&expr),
            Some(Resolved::Local { slot, ty, .. }) => {
                self.emit(Op::GetLocal(slot), line);
                ty
            }
            Some(Resolved::Upvalue { index, ty, .. }) => {
                self.emit(Op::GetUpvalue(index), line);
                ty
            }
            Some(Resolved::Global { ty, .. }) => {
                let idx = self.name_constant(name, span);
                self.emit(Op::GetGlobal(idx), line);
                ty
            }
            Some(Resolved::ThisAttribute { ty }) => {
                self.emit_this(line);
                let idx = self.name_constant(name, span);
                self.emit(Op::GetAttr(idx), line);
                ty
            }
            Some(Resolved::PatternBinder) | None => {
                self.report(CompileError::UndefinedVariable {
                    name: name.to_string(),
                    span,
                });
                self.emit(Op::Null, line);
                Type::any()
            }
        }
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr, weak: bool, span: Span) -> Type {
        let line = span.line;
        match &target.kind {
            ExprKind::Variable(name) => {
                let resolved = self.resolve_name(name, ResolutionContext::Expression);
                let (declared, is_const) = match &resolved {
                    Some(Resolved::Local { ty, is_const, .. })
                    | Some(Resolved::Upvalue { ty, is_const, .. })
                    | Some(Resolved::Global { ty, is_const }) => (ty.clone(), *is_const),
                    Some(Resolved::ThisAttribute { ty }) => (ty.clone(), false),
                    Some(Resolved::Macro(_)) => {
                        self.report(CompileError::InvalidAssignmentTarget { span: target.span });
                        return self.compile_expr(value);
                    }
                    Some(Resolved::PatternBinder) | None => {
                        self.report(CompileError::UndefinedVariable {
                            name: name.clone(),
                            span: target.span,
                        });
                        return self.compile_expr(value);
                    }
                };
                if is_const {
                    self.report(CompileError::AssignToConstant {
                        name: name.clone(),
                        span: target.span,
                    });
                }

                if let Some(Resolved::ThisAttribute { .. }) = resolved {
                    let idx = self.name_constant(name, span);
                    let ty = if weak {
                        let ty = self.compile_expr(value);
                        self.emit_this(line);
                        self.emit(Op::Swap, line);
                        ty
                    } else {
                        self.emit_this(line);
                        let ty = self.compile_expr(value);
                        self.check_assignable(&ty, &declared, value.span);
                        ty
                    };
                    self.emit(Op::SetAttr(idx), line);
                    return ty;
                }

                let ty = self.compile_expr(value);
                if !weak {
                    self.check_assignable(&ty, &declared, value.span);
                }
                match resolved {
                    Some(Resolved::Local { slot, .. }) => {
                        self.emit(Op::SetLocal(slot), line);
                    }
                    Some(Resolved::Upvalue { index, .. }) => {
                        self.emit(Op::SetUpvalue(index), line);
                    }
                    _ => {
                        let idx = self.name_constant(name, span);
                        self.emit(Op::SetGlobal(idx), line);
                    }
                }
                ty
            }
            ExprKind::Member { object, name } => {
                let idx = self.name_constant(name, span);
                let ty = if weak {
                    let ty = self.compile_expr(value);
                    self.compile_expr(object);
                    self.emit(Op::Swap, line);
                    ty
                } else {
                    let object_ty = self.compile_expr(object);
                    let declared = self.attribute_type(&object_ty, name, target.span);
                    let ty = self.compile_expr(value);
                    self.check_assignable(&ty, &declared, value.span);
                    ty
                };
                self.emit(Op::SetAttr(idx), line);
                ty
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                let ty = self.compile_expr(value);
                self.emit(Op::SetIndex, line);
                ty
            }
            _ => {
                self.report(CompileError::InvalidAssignmentTarget { span: target.span });
                self.compile_expr(value)
            }
        }
    }

    // --- Attributes ---

    fn compile_member(&mut self, object: &Expr, name: &str, span: Span) -> Type {
        let object_ty = self.compile_expr(object);
        let ty = self.attribute_type(&object_ty, name, span);
        let idx = self.name_constant(name, span);
        self.emit(Op::GetAttr(idx), span.line);
        ty
    }

    /// Static type of `object.name`, reporting unknown and private members.
    pub(crate) fn attribute_type(&mut self, object: &Type, name: &str, span: Span) -> Type {
        let no_such = |type_name: String| CompileError::NoSuchAttribute {
            type_name,
            name: name.to_string(),
            span,
        };
        match object {
            Type::Instance(class, args) => {
                let Some(ty) = class.field(name).or_else(|| class.static_field(name)) else {
                    self.report(no_such(object.to_string()));
                    return Type::any();
                };
                self.check_private(&class.name, class.private_owner(name), name, span);
                ty.substitute(&class.bind_generics(args))
            }
            Type::Class(class) => {
                let Some(ty) = class.static_field(name) else {
                    self.report(no_such(class.name.clone()));
                    return Type::any();
                };
                self.check_private(&class.name, class.private_owner(name), name, span);
                ty
            }
            Type::Enum(enum_ty) => match enum_ty.variant(name) {
                Some(variant) => Type::EnumVariant(variant),
                None => {
                    self.report(no_such(enum_ty.name.clone()));
                    Type::any()
                }
            },
            Type::EnumVariant(variant) => match variant.field(name) {
                Some(ty) => ty.clone(),
                None => {
                    self.report(no_such(object.to_string()));
                    Type::any()
                }
            },
            _ => Type::any(),
        }
    }

    fn check_private(&mut self, type_name: &str, owner: Option<&str>, name: &str, span: Span) {
        if let Some(owner) = owner {
            if !self.inside_class(owner) {
                self.report(CompileError::PrivateAttribute {
                    type_name: type_name.to_string(),
                    name: name.to_string(),
                    span,
                });
            }
        }
    }

    fn compile_index(&mut self, object: &Expr, index: &Expr) -> Type {
        let object_ty = self.compile_expr(object);
        self.compile_expr(index);
        self.emit(Op::GetIndex, index.span.line);
        match (&object_ty, &index.kind) {
            (Type::Primitive(Primitive::Str), _) => Type::str(),
            (Type::Primitive(Primitive::Bytes), _) => Type::Primitive(Primitive::U8),
            (Type::Tuple(items), ExprKind::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_else(Type::any),
            _ => Type::any(),
        }
    }

    fn compile_this(&mut self, span: Span) -> Type {
        match self.emit_this(span.line) {
            Some(ty) => ty,
            None => {
                self.report(CompileError::ThisOutsideMethod { span });
                self.emit(Op::Null, span.line);
                Type::any()
            }
        }
    }

    fn compile_drop(&mut self, target: &Expr, span: Span) {
        let line = span.line;
        match &target.kind {
            ExprKind::Variable(name) => match self.resolve_name(name, ResolutionContext::Expression) {
                Some(Resolved::Local { slot, .. }) => {
                    self.emit(Op::DropLocal(slot), line);
                    self.mark_dropped(slot);
                }
                Some(Resolved::Upvalue { index, .. }) => {
                    self.emit(Op::DropUpvalue(index), line);
                }
                Some(Resolved::Global { .. }) => {
                    let idx = self.name_constant(name, span);
                    self.emit(Op::DropGlobal(idx), line);
                    self.scope.globals.shift_remove(name);
                }
                Some(Resolved::ThisAttribute { .. }) => {
                    self.emit_this(line);
                    let idx = self.name_constant(name, span);
                    self.emit(Op::DropAttr(idx), line);
                }
                Some(Resolved::Macro(_)) => {
                    self.remove_macro(name);
                }
                Some(Resolved::PatternBinder) | None => {
                    self.report(CompileError::UndefinedVariable {
                        name: name.clone(),
                        span: target.span,
                    });
                }
            },
            ExprKind::Member { object, name } => {
                self.compile_expr(object);
                let idx = self.name_constant(name, span);
                self.emit(Op::DropAttr(idx), line);
            }
            _ => self.report(CompileError::InvalidAssignmentTarget { span: target.span }),
        }
    }

    // --- Operators ---

    fn compile_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Type {
        let left_ty = self.compile_expr(left);
        let right_ty = self.compile_expr(right);
        let instruction = match op {
            BinaryOp::Add => Op::Add,
            BinaryOp::Subtract => Op::Subtract,
            BinaryOp::Multiply => Op::Multiply,
            BinaryOp::Divide => Op::Divide,
            BinaryOp::Modulo => Op::Modulo,
            BinaryOp::Power => Op::Power,
            BinaryOp::Equal => Op::Equal,
            BinaryOp::NotEqual => Op::NotEqual,
            BinaryOp::Less => Op::Less,
            BinaryOp::LessEqual => Op::LessEqual,
            BinaryOp::Greater => Op::Greater,
            BinaryOp::GreaterEqual => Op::GreaterEqual,
            BinaryOp::BitAnd => Op::BitAnd,
            BinaryOp::BitOr => Op::BitOr,
            BinaryOp::BitXor => Op::BitXor,
            BinaryOp::ShiftLeft => Op::ShiftLeft,
            BinaryOp::ShiftRight => Op::ShiftRight,
        };
        self.emit(instruction, right.span.line);

        match left_ty.binary_result(op, &right_ty) {
            Some(ty) => ty,
            None => {
                self.report(CompileError::IncompatibleOperands {
                    op: op.symbol().to_string(),
                    left: left_ty.to_string(),
                    right: right_ty.to_string(),
                    span: left.span.merge(right.span),
                });
                Type::any()
            }
        }
    }

    /// Short-circuit: the left value stays on the stack when it decides
    /// the result.
    fn compile_logical(&mut self, left: &Expr, op: LogicalOp, right: &Expr, span: Span) -> Type {
        let line = span.line;
        let left_ty = self.compile_expr(left);
        let jump = match op {
            LogicalOp::And => Op::JumpIfFalse(UNPATCHED),
            LogicalOp::Or => Op::JumpIfTrue(UNPATCHED),
        };
        let end = self.emit_jump(jump, line);
        self.emit(Op::Pop, line);
        let right_ty = self.compile_expr(right);
        self.patch_jump(end, span);
        left_ty.unify(&right_ty)
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Type {
        let ty = self.compile_expr(operand);
        let instruction = match op {
            UnaryOp::Negate => Op::Negate,
            UnaryOp::Not => Op::Not,
            UnaryOp::BitNot => Op::BitNot,
        };
        self.emit(instruction, span.line);
        match ty.unary_result(op) {
            Some(result) => result,
            None => {
                self.report(CompileError::type_mismatch(
                    format!("operand of '{}'", op.symbol()),
                    &ty,
                    span,
                ));
                Type::any()
            }
        }
    }

    fn compile_deref(&mut self, inner: &Expr, span: Span) -> Type {
        let ty = self.compile_expr(inner);
        self.emit(Op::Deref, span.line);
        match ty {
            Type::Reference(target) => *target,
            ty if ty.is_dynamic() => Type::any(),
            other => {
                self.report(CompileError::type_mismatch("reference", &other, inner.span));
                Type::any()
            }
        }
    }

    // --- Calls ---

    /// Positional arguments are pushed in order, then one `(name, value)`
    /// pair per keyword argument.
    fn compile_call(&mut self, callee: &Expr, args: &[Argument], span: Span) -> Type {
        let callee_ty = self.compile_expr(callee);

        let mut positional = Vec::new();
        for arg in args {
            if let Argument::Positional(expr) = arg {
                let ty = self.compile_expr(expr);
                positional.push((ty, expr.span));
            }
        }
        let mut keyword = 0usize;
        for arg in args {
            if let Argument::Keyword { name, value } = arg {
                self.emit_constant(Constant::Str(name.clone()), value.span);
                self.compile_expr(value);
                keyword += 1;
            }
        }

        let (Ok(p), Ok(k)) = (u8::try_from(positional.len()), u8::try_from(keyword)) else {
            self.report(CompileError::WrongArity {
                expected: "at most 255".to_string(),
                got: positional.len().max(keyword),
                span,
            });
            self.emit(Op::Call(u8::MAX, 0), span.line);
            return Type::any();
        };
        self.emit(Op::Call(p, k), span.line);

        self.call_result(&callee_ty, &positional, keyword, span)
    }

    fn call_result(&mut self, callee: &Type, positional: &[(Type, Span)], keyword: usize, span: Span) -> Type {
        match callee {
            ty if ty.is_dynamic() => Type::any(),
            Type::Function(signature) => {
                let bindings = self.check_call(signature, positional, keyword, span);
                signature.return_type.substitute(&bindings)
            }
            Type::Class(class) => {
                let bindings = match class.constructor() {
                    Some(signature) => self.check_call(&signature, positional, keyword, span),
                    None => {
                        let got = positional.len() + keyword;
                        if got != 0 {
                            self.report(CompileError::WrongArity {
                                expected: "0".to_string(),
                                got,
                                span,
                            });
                        }
                        Vec::new()
                    }
                };
                let args = class
                    .generics
                    .iter()
                    .map(|g| {
                        bindings
                            .iter()
                            .find(|(name, _)| name == g)
                            .map(|(_, ty)| ty.clone())
                            .unwrap_or_else(Type::any)
                    })
                    .collect();
                Type::Instance(class.clone(), args)
            }
            Type::EnumVariant(variant) => {
                let got = positional.len() + keyword;
                if got != variant.field_types.len() {
                    self.report(CompileError::WrongArity {
                        expected: variant.field_types.len().to_string(),
                        got,
                        span,
                    });
                }
                for ((ty, arg_span), field) in positional.iter().zip(&variant.field_types) {
                    self.check_assignable(ty, field, *arg_span);
                }
                Type::EnumVariant(variant.clone())
            }
            other => {
                self.report(CompileError::NotCallable {
                    type_name: other.to_string(),
                    span,
                });
                Type::any()
            }
        }
    }

    /// Check arity and argument types, returning inferred generic bindings.
    pub(crate) fn check_call(
        &mut self,
        signature: &FunctionType,
        positional: &[(Type, Span)],
        keyword: usize,
        span: Span,
    ) -> Vec<(String, Type)> {
        let got = positional.len() + keyword;
        if !signature.accepts(got) {
            self.report(CompileError::WrongArity {
                expected: signature.expected_arity(),
                got,
                span,
            });
        }

        let mut bindings = Vec::new();
        for (i, (ty, _)) in positional.iter().enumerate() {
            if let Some(param) = signature.param_for(i) {
                param.infer_bindings(ty, &mut bindings);
            }
        }
        for (i, (ty, arg_span)) in positional.iter().enumerate() {
            if let Some(param) = signature.param_for(i) {
                let expected = param.substitute(&bindings);
                self.check_assignable(ty, &expected, *arg_span);
            }
        }
        bindings
    }
}
