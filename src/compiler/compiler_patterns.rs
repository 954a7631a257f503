//! Pattern matching compilation.
//!
//! A match runs as its own block. The subject is stored in a hidden local,
//! then each arm tests, binds, checks its guard and runs its body in turn.

use crate::ast::{Expr, ExprKind, MatchArm, MatchPattern};
use crate::bytecode::{Op, UNPATCHED};
use crate::error::CompileError;
use crate::span::Span;
use crate::types::Type;

use super::compiler::Compiler;
use super::scope::{ResolutionContext, Resolved};

/// A fresh local introduced by a pattern: name, attribute read from the
/// subject (`None` binds the subject itself) and static type.
struct Binder {
    name: String,
    attribute: Option<String>,
    ty: Type,
}

impl Compiler {
    pub(crate) fn compile_match(&mut self, subject: &Expr, arms: &[MatchArm], default: Option<&[Expr]>, span: Span) -> Type {
        self.compile_synthetic_block("<match>", span, |c| c.compile_match_body(subject, arms, default, span))
    }

    fn compile_match_body(&mut self, subject: &Expr, arms: &[MatchArm], default: Option<&[Expr]>, span: Span) -> Type {
        let subject_ty = self.compile_expr(subject);
        let slot = self.declare_local("$match", subject_ty.clone(), true, subject.span);
        let base = self.scope.stack_height;

        let mut end_jumps = Vec::with_capacity(arms.len());
        let mut result: Option<Type> = None;

        for arm in arms {
            let line = arm.span.line;
            self.begin_scope();

            let (pattern_fail, binders) = self.compile_pattern_test(&arm.pattern, slot, &subject_ty, arm.span);
            for binder in &binders {
                self.emit(Op::GetLocal(slot), line);
                if let Some(attribute) = &binder.attribute {
                    let idx = self.name_constant(attribute, arm.span);
                    self.emit(Op::GetAttr(idx), line);
                }
                self.declare_local(&binder.name, binder.ty.clone(), false, arm.span);
            }

            let guard_fail = arm.guard.as_ref().map(|guard| {
                self.compile_expr(guard);
                let jump = self.emit_jump(Op::JumpIfFalse(UNPATCHED), guard.span.line);
                self.emit(Op::Pop, guard.span.line);
                jump
            });

            let ty = self.compile_sequence(&arm.body, line);
            self.end_scope(true, line);
            end_jumps.push(self.emit_jump(Op::Jump(UNPATCHED), line));
            result = Some(match result {
                Some(acc) => acc.unify(&ty),
                None => ty,
            });

            // A failed guard discards the binders and the guard value.
            let mut to_next = None;
            if let Some(jump) = guard_fail {
                self.patch_jump(jump, arm.span);
                self.scope.stack_height = base + binders.len() + 1;
                for _ in 0..=binders.len() {
                    self.emit(Op::Pop, line);
                }
                if pattern_fail.is_some() {
                    to_next = Some(self.emit_jump(Op::Jump(UNPATCHED), line));
                }
            }
            if let Some(jump) = pattern_fail {
                self.patch_jump(jump, arm.span);
                self.scope.stack_height = base + 1;
                self.emit(Op::Pop, line);
            }
            if let Some(jump) = to_next {
                self.patch_jump(jump, arm.span);
            }
            self.scope.stack_height = base;
        }

        let fallback = match default {
            Some(body) => self.compile_block(body, span.line),
            None => {
                self.emit(Op::Null, span.line);
                Type::any()
            }
        };
        for jump in end_jumps {
            self.patch_jump(jump, span);
        }
        self.scope.stack_height = base + 1;

        match result {
            Some(acc) => acc.unify(&fallback),
            None => fallback,
        }
    }

    /// Emit the test for one pattern, leaving a jump taken on mismatch (with
    /// the test result still on the stack). Returns the binders to declare.
    fn compile_pattern_test(
        &mut self,
        pattern: &MatchPattern,
        slot: u16,
        subject_ty: &Type,
        span: Span,
    ) -> (Option<usize>, Vec<Binder>) {
        let line = span.line;
        match pattern {
            MatchPattern::Wildcard => (None, Vec::new()),
            MatchPattern::Value(expr) => {
                if let Some(name) = self.pattern_binder(expr) {
                    let binder = Binder {
                        name,
                        attribute: None,
                        ty: subject_ty.clone(),
                    };
                    return (None, vec![binder]);
                }
                self.emit(Op::GetLocal(slot), line);
                self.compile_expr(expr);
                self.emit(Op::Equal, line);
                let fail = self.emit_jump(Op::JumpIfFalse(UNPATCHED), line);
                self.emit(Op::Pop, line);
                (Some(fail), Vec::new())
            }
            MatchPattern::Destructure { target, binders } => {
                self.emit(Op::GetLocal(slot), line);
                let target_ty = self.compile_expr(target);
                self.emit(Op::MatchType, line);
                let fail = self.emit_jump(Op::JumpIfFalse(UNPATCHED), line);
                self.emit(Op::Pop, line);
                let binders = self.destructure_binders(&target_ty, binders, target.span);
                (Some(fail), binders)
            }
        }
    }

    /// A bare name that resolves to nothing binds the subject.
    fn pattern_binder(&mut self, expr: &Expr) -> Option<String> {
        let ExprKind::Variable(name) = &expr.kind else {
            return None;
        };
        match self.resolve_name(name, ResolutionContext::Pattern) {
            Some(Resolved::PatternBinder) => Some(name.clone()),
            _ => None,
        }
    }

    fn destructure_binders(&mut self, target: &Type, names: &[String], span: Span) -> Vec<Binder> {
        match target {
            Type::Class(class) => names
                .iter()
                .map(|name| {
                    let ty = match class.field(name) {
                        Some(ty) => ty,
                        None => {
                            self.report(CompileError::PatternAttribute {
                                type_name: class.name.clone(),
                                name: name.clone(),
                                span,
                            });
                            Type::any()
                        }
                    };
                    Binder {
                        name: name.clone(),
                        attribute: Some(name.clone()),
                        ty,
                    }
                })
                .collect(),
            Type::EnumVariant(variant) => {
                if names.len() != variant.field_names.len() {
                    self.report(CompileError::PatternArity {
                        variant: format!("{}.{}", variant.enum_name, variant.name),
                        expected: variant.field_names.len(),
                        found: names.len(),
                        span,
                    });
                }
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Binder {
                        name: name.clone(),
                        attribute: Some(variant.field_names.get(i).unwrap_or(name).clone()),
                        ty: variant.field_types.get(i).cloned().unwrap_or_else(Type::any),
                    })
                    .collect()
            }
            other => {
                if !other.is_dynamic() {
                    self.report(CompileError::PatternTarget {
                        type_name: other.to_string(),
                        span,
                    });
                }
                names
                    .iter()
                    .map(|name| Binder {
                        name: name.clone(),
                        attribute: Some(name.clone()),
                        ty: Type::any(),
                    })
                    .collect()
            }
        }
    }
}
