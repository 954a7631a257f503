//! Conditionals, blocks, switch and non-loop control transfer.

use crate::ast::{Expr, IfBranch, SwitchCase};
use crate::bytecode::{Op, UNPATCHED};
use crate::span::Span;
use crate::types::Type;

use super::compiler::Compiler;
use super::scope::FunctionKind;

fn merge(acc: Option<Type>, ty: Type) -> Option<Type> {
    Some(match acc {
        Some(acc) => acc.unify(&ty),
        None => ty,
    })
}

impl Compiler {
    // --- Blocks ---

    /// Compile a body for its value: every node but the last as an effect,
    /// the last as the value. An empty body yields null.
    pub(crate) fn compile_sequence(&mut self, body: &[Expr], line: usize) -> Type {
        let Some((last, rest)) = body.split_last() else {
            self.emit(Op::Null, line);
            return Type::any();
        };
        for expr in rest {
            self.compile_effect(expr);
        }
        self.compile_expr(last)
    }

    /// A scoped body leaving its value on the stack.
    pub(crate) fn compile_block(&mut self, body: &[Expr], line: usize) -> Type {
        self.begin_scope();
        let ty = self.compile_sequence(body, line);
        self.end_scope(true, line);
        ty
    }

    /// A scoped body compiled purely for effect.
    pub(crate) fn compile_block_effect(&mut self, body: &[Expr], line: usize) {
        self.begin_scope();
        for expr in body {
            self.compile_effect(expr);
        }
        self.end_scope(false, line);
    }

    /// Compile `body` as a zero-argument closure and call it on the spot.
    pub(crate) fn compile_synthetic_block(
        &mut self,
        name: &str,
        span: Span,
        body: impl FnOnce(&mut Self) -> Type,
    ) -> Type {
        let line = span.line;
        self.begin_unit(name, FunctionKind::Block, Type::any());
        self.begin_scope();
        let ty = body(self);
        self.emit(Op::Return, line);
        let unit = self.end_unit();
        self.emit_closure(unit, 0, span);
        self.emit(Op::Call(0, 0), line);
        ty
    }

    pub(crate) fn compile_scope_literal(&mut self, body: &[Expr], span: Span) -> Type {
        self.compile_synthetic_block("<scope>", span, |c| c.compile_sequence(body, span.line))
    }

    // --- Conditionals ---

    /// `if`/`elseIf`/`else` as an expression. Without an `else` the
    /// fallthrough value is null.
    pub(crate) fn compile_if(&mut self, branches: &[IfBranch], else_branch: Option<&[Expr]>, span: Span) -> Type {
        let line = span.line;
        let base = self.scope.stack_height;
        let mut end_jumps = Vec::new();
        let mut result = None;

        for branch in branches {
            self.compile_expr(&branch.condition);
            let skip = self.emit_jump(Op::JumpIfFalse(UNPATCHED), line);
            self.emit(Op::Pop, line);
            let ty = self.compile_block(&branch.body, line);
            result = merge(result, ty);
            end_jumps.push(self.emit_jump(Op::Jump(UNPATCHED), line));

            self.patch_jump(skip, span);
            self.scope.stack_height = base + 1;
            self.emit(Op::Pop, line);
        }

        match else_branch {
            Some(body) => {
                let ty = self.compile_block(body, line);
                result = merge(result, ty);
            }
            None => {
                self.emit(Op::Null, line);
                result = merge(result, Type::any());
            }
        }

        for jump in end_jumps {
            self.patch_jump(jump, span);
        }
        self.scope.stack_height = base + 1;
        result.unwrap_or_else(Type::any)
    }

    pub(crate) fn compile_ternary(&mut self, condition: &Expr, then_value: &Expr, else_value: &Expr, span: Span) -> Type {
        let line = span.line;
        let base = self.scope.stack_height;
        self.compile_expr(condition);
        let skip = self.emit_jump(Op::JumpIfFalse(UNPATCHED), line);
        self.emit(Op::Pop, line);
        let then_ty = self.compile_expr(then_value);
        let end = self.emit_jump(Op::Jump(UNPATCHED), line);

        self.patch_jump(skip, span);
        self.scope.stack_height = base + 1;
        self.emit(Op::Pop, line);
        let else_ty = self.compile_expr(else_value);

        self.patch_jump(end, span);
        self.scope.stack_height = base + 1;
        then_ty.unify(&else_ty)
    }

    /// `switch` runs as its own block: the subject is evaluated once and
    /// compared against each case value in order. Yields null.
    pub(crate) fn compile_switch(&mut self, subject: &Expr, cases: &[SwitchCase], default: Option<&[Expr]>, span: Span) -> Type {
        self.compile_synthetic_block("<switch>", span, |c| {
            c.compile_switch_body(subject, cases, default, span);
            Type::any()
        });
        Type::void()
    }

    fn compile_switch_body(&mut self, subject: &Expr, cases: &[SwitchCase], default: Option<&[Expr]>, span: Span) {
        let line = span.line;
        let subject_ty = self.compile_expr(subject);
        let slot = self.declare_local("$switch", subject_ty, true, subject.span);
        let base = self.scope.stack_height;

        let mut case_jumps = Vec::with_capacity(cases.len());
        for case in cases {
            let mut jumps = Vec::with_capacity(case.values.len());
            for value in &case.values {
                self.emit(Op::GetLocal(slot), value.span.line);
                self.compile_expr(value);
                self.emit(Op::Equal, value.span.line);
                jumps.push(self.emit_jump(Op::JumpIfTrue(UNPATCHED), value.span.line));
                self.emit(Op::Pop, value.span.line);
            }
            case_jumps.push(jumps);
        }
        let to_default = self.emit_jump(Op::Jump(UNPATCHED), line);

        let mut end_jumps = Vec::with_capacity(cases.len());
        for (case, jumps) in cases.iter().zip(case_jumps) {
            for jump in jumps {
                self.patch_jump(jump, span);
            }
            self.scope.stack_height = base + 1;
            self.emit(Op::Pop, line);
            self.compile_block_effect(&case.body, line);
            end_jumps.push(self.emit_jump(Op::Jump(UNPATCHED), line));
        }

        self.patch_jump(to_default, span);
        self.scope.stack_height = base;
        if let Some(body) = default {
            self.compile_block_effect(body, line);
        }
        for jump in end_jumps {
            self.patch_jump(jump, span);
        }
        self.scope.stack_height = base;
        self.emit(Op::Null, line);
    }

    // --- Control transfer ---

    pub(crate) fn compile_return(&mut self, value: Option<&Expr>, span: Span) -> Type {
        let line = span.line;
        let height = self.scope.stack_height;

        if self.scope.kind == FunctionKind::Constructor {
            if let Some(value) = value {
                self.compile_effect(value);
            }
            self.emit(Op::GetLocal(0), line);
        } else {
            let ty = match value {
                Some(value) => self.compile_expr(value),
                None => {
                    self.emit(Op::Null, line);
                    Type::void()
                }
            };
            if let Some(expected) = self.scope.return_type.clone() {
                let at = value.map(|v| v.span).unwrap_or(span);
                self.check_assignable(&ty, &expected, at);
            }
        }
        self.emit(Op::Return, line);

        self.scope.stack_height = height;
        Type::any()
    }

    pub(crate) fn compile_throw(&mut self, value: &Expr, span: Span) -> Type {
        let height = self.scope.stack_height;
        self.compile_expr(value);
        self.emit(Op::Throw, span.line);
        self.scope.stack_height = height;
        Type::any()
    }

    pub(crate) fn compile_assert(&mut self, condition: &Expr, message: Option<&Expr>, span: Span) {
        self.compile_expr(condition);
        match message {
            Some(message) => {
                self.compile_expr(message);
            }
            None => {
                self.emit(Op::Null, span.line);
            }
        }
        self.emit(Op::Assert, span.line);
    }
}
