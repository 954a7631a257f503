//! Loop compilation.
//!
//! Loops compile inline. In value position a loop is wrapped in an
//! accumulator: every iteration's body value is collected and the loop
//! yields the list of non-null values.

use crate::ast::{Expr, TypeToken};
use crate::bytecode::{Op, UNPATCHED};
use crate::error::CompileError;
use crate::span::Span;
use crate::types::{Primitive, Type};

use super::compiler::Compiler;
use super::compiler_exprs::Position;
use super::scope::LoopContext;

impl Compiler {
    fn begin_loop(&mut self, start: usize, continue_target: Option<usize>) {
        let base_height = self.scope.stack_height;
        self.scope.loops.push(LoopContext {
            start,
            base_height,
            continue_target,
            continue_patches: Vec::new(),
            break_patches: Vec::new(),
        });
    }

    /// Land pending forward `continue` jumps here.
    fn patch_continues(&mut self, span: Span) {
        let patches = match self.scope.loops.last_mut() {
            Some(ctx) => std::mem::take(&mut ctx.continue_patches),
            None => return,
        };
        for jump in patches {
            self.patch_jump(jump, span);
        }
    }

    /// Close the innermost loop; `break` jumps land here.
    fn end_loop(&mut self, span: Span) {
        let Some(ctx) = self.scope.loops.pop() else {
            return;
        };
        for jump in ctx.continue_patches.into_iter().chain(ctx.break_patches) {
            self.patch_jump(jump, span);
        }
        self.scope.stack_height = ctx.base_height;
    }

    fn open_accumulator(&mut self, position: Position, line: usize) -> bool {
        let collect = position == Position::Value;
        if collect {
            self.emit(Op::AccStart, line);
        }
        collect
    }

    fn close_accumulator(&mut self, collect: bool, line: usize) -> Type {
        if collect {
            self.emit(Op::AccFlush, line);
            Type::list()
        } else {
            Type::void()
        }
    }

    /// Dispose of the body value left by one iteration.
    fn finish_iteration(&mut self, collect: bool, line: usize) {
        self.emit(if collect { Op::AccCollect } else { Op::Pop }, line);
    }

    pub(crate) fn compile_while(&mut self, condition: &Expr, body: &[Expr], position: Position, span: Span) -> Type {
        let line = span.line;
        let collect = self.open_accumulator(position, line);
        self.begin_scope();

        let start = self.current_offset();
        let base = self.scope.stack_height;
        self.begin_loop(start, Some(start));

        self.compile_expr(condition);
        let exit = self.emit_jump(Op::JumpIfFalse(UNPATCHED), line);
        self.emit(Op::Pop, line);
        self.compile_block(body, line);
        self.finish_iteration(collect, line);
        self.emit_loop(start, span);

        self.patch_jump(exit, span);
        self.scope.stack_height = base + 1;
        self.emit(Op::Pop, line);
        self.end_loop(span);

        self.end_scope(false, line);
        self.close_accumulator(collect, line)
    }

    pub(crate) fn compile_do_while(&mut self, body: &[Expr], condition: &Expr, position: Position, span: Span) -> Type {
        let line = span.line;
        let collect = self.open_accumulator(position, line);
        self.begin_scope();

        let start = self.current_offset();
        let base = self.scope.stack_height;
        self.begin_loop(start, None);

        self.compile_block(body, line);
        self.finish_iteration(collect, line);
        self.patch_continues(span);

        self.compile_expr(condition);
        let exit = self.emit_jump(Op::JumpIfFalse(UNPATCHED), line);
        self.emit(Op::Pop, line);
        self.emit_loop(start, span);

        self.patch_jump(exit, span);
        self.scope.stack_height = base + 1;
        self.emit(Op::Pop, line);
        self.end_loop(span);

        self.end_scope(false, line);
        self.close_accumulator(collect, line)
    }

    /// `for (i -> start : end : step)`. Counter, end and step live in three
    /// consecutive hidden slots; without a step the direction is inferred
    /// from the bounds at runtime.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compile_range_for(
        &mut self,
        variable: &str,
        var_type: Option<&Vec<TypeToken>>,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &[Expr],
        position: Position,
        span: Span,
    ) -> Type {
        let line = span.line;
        let collect = self.open_accumulator(position, line);
        self.begin_scope();

        let start_ty = self.compile_expr(start);
        let counter = self.declare_local("$counter", start_ty.clone(), false, start.span);
        let end_ty = self.compile_expr(end);
        let end_slot = self.declare_local("$end", end_ty.clone(), true, end.span);
        let step_ty = match step {
            Some(step) => self.compile_expr(step),
            None => {
                self.emit(Op::GetLocal(counter), line);
                self.emit(Op::GetLocal(end_slot), line);
                self.emit(Op::InferStep, line);
                Type::int()
            }
        };
        let step_slot = self.declare_local("$step", step_ty.clone(), true, span);

        if start_ty.binary_result(crate::ast::BinaryOp::Less, &end_ty).is_none() {
            self.report(CompileError::IncompatibleOperands {
                op: ":".to_string(),
                left: start_ty.to_string(),
                right: end_ty.to_string(),
                span: start.span.merge(end.span),
            });
        }
        let var_ty = match var_type {
            Some(tokens) => {
                let declared = self.resolve_annotation(tokens, span);
                self.check_assignable(&start_ty, &declared, start.span);
                declared
            }
            None => match start_ty.binary_result(crate::ast::BinaryOp::Add, &step_ty) {
                Some(ty) => ty,
                None => {
                    self.report(CompileError::IncompatibleOperands {
                        op: "+".to_string(),
                        left: start_ty.to_string(),
                        right: step_ty.to_string(),
                        span,
                    });
                    Type::any()
                }
            },
        };

        let loop_start = self.current_offset();
        let base = self.scope.stack_height;
        self.begin_loop(loop_start, None);

        self.emit(Op::RangeCheck(counter), line);
        let exit = self.emit_jump(Op::JumpIfFalse(UNPATCHED), line);
        self.emit(Op::Pop, line);

        // The loop variable is a copy; assigning it leaves the counter alone.
        self.begin_scope();
        self.emit(Op::GetLocal(counter), line);
        self.emit(Op::Copy, line);
        self.declare_local(variable, var_ty, false, span);
        self.compile_sequence(body, line);
        self.end_scope(true, line);
        self.finish_iteration(collect, line);

        self.patch_continues(span);
        self.emit(Op::GetLocal(counter), line);
        self.emit(Op::GetLocal(step_slot), line);
        self.emit(Op::Add, line);
        self.emit(Op::SetLocal(counter), line);
        self.emit(Op::Pop, line);
        self.emit_loop(loop_start, span);

        self.patch_jump(exit, span);
        self.scope.stack_height = base + 1;
        self.emit(Op::Pop, line);
        self.end_loop(span);

        self.end_scope(false, line);
        self.close_accumulator(collect, line)
    }

    pub(crate) fn compile_for_each(&mut self, variable: &str, iterable: &Expr, body: &[Expr], position: Position, span: Span) -> Type {
        let line = span.line;
        let collect = self.open_accumulator(position, line);
        self.begin_scope();

        let iterable_ty = self.compile_expr(iterable);
        self.emit(Op::GetIter, line);
        self.declare_local("$iter", Type::any(), true, iterable.span);

        let start = self.current_offset();
        let base = self.scope.stack_height;
        self.begin_loop(start, Some(start));

        let exit = self.emit_jump(Op::ForIter(UNPATCHED), line);
        self.begin_scope();
        self.declare_local(variable, element_type(&iterable_ty), false, span);
        self.compile_sequence(body, line);
        self.end_scope(true, line);
        self.finish_iteration(collect, line);
        self.emit_loop(start, span);

        self.patch_jump(exit, span);
        self.scope.stack_height = base;
        self.end_loop(span);

        self.end_scope(false, line);
        self.close_accumulator(collect, line)
    }

    pub(crate) fn compile_break(&mut self, span: Span) -> Type {
        let Some(base) = self.scope.loops.last().map(|ctx| ctx.base_height) else {
            self.report(CompileError::BreakOutsideLoop { span });
            return Type::any();
        };
        let height = self.scope.stack_height;
        for _ in base..height {
            self.emit(Op::Pop, span.line);
        }
        let jump = self.emit_jump(Op::Jump(UNPATCHED), span.line);
        if let Some(ctx) = self.scope.loops.last_mut() {
            ctx.break_patches.push(jump);
        }
        self.scope.stack_height = height;
        Type::any()
    }

    pub(crate) fn compile_continue(&mut self, span: Span) -> Type {
        let Some((base, target)) = self
            .scope
            .loops
            .last()
            .map(|ctx| (ctx.base_height, ctx.continue_target))
        else {
            self.report(CompileError::ContinueOutsideLoop { span });
            return Type::any();
        };
        let height = self.scope.stack_height;
        for _ in base..height {
            self.emit(Op::Pop, span.line);
        }
        match target {
            Some(start) => self.emit_loop(start, span),
            None => {
                let jump = self.emit_jump(Op::Jump(UNPATCHED), span.line);
                if let Some(ctx) = self.scope.loops.last_mut() {
                    ctx.continue_patches.push(jump);
                }
            }
        }
        self.scope.stack_height = height;
        Type::any()
    }
}

/// Static type of the items produced by iterating a value.
fn element_type(iterable: &Type) -> Type {
    match iterable {
        Type::Primitive(Primitive::Str) => Type::str(),
        Type::Primitive(Primitive::Bytes) => Type::Primitive(Primitive::U8),
        Type::Tuple(items) => match items.split_first() {
            Some((first, rest)) if rest.iter().all(|t| t == first) => first.clone(),
            _ => Type::any(),
        },
        _ => Type::any(),
    }
}
