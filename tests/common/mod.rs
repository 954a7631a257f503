//! Shared helpers for the integration tests: AST builders, a static stack
//! checker and a small evaluator for compiled units.

#![allow(dead_code)]

pub mod machine;

use strandc::ast::{
    Argument, BinaryOp, Expr, ExprKind, FunctionDecl, IfBranch, Parameter, Program, TypeToken,
};
use strandc::bytecode::{CompiledModule, FunctionUnit, Op};
use strandc::config::CompilerOptions;
use strandc::error::CompileFailure;
use strandc::span::Span;

pub fn e(kind: ExprKind) -> Expr {
    Expr::new(kind, Span::new(0, 0, 1, 1))
}

pub fn int(value: i64) -> Expr {
    e(ExprKind::Int(value))
}

pub fn string(value: &str) -> Expr {
    e(ExprKind::Str(value.to_string()))
}

pub fn boolean(value: bool) -> Expr {
    e(ExprKind::Bool(value))
}

pub fn var(name: &str) -> Expr {
    e(ExprKind::Variable(name.to_string()))
}

pub fn ty(name: &str) -> Vec<TypeToken> {
    vec![TypeToken::name(name)]
}

pub fn let_(name: &str, value: Expr) -> Expr {
    e(ExprKind::Let {
        name: name.to_string(),
        type_annotation: None,
        value: Some(Box::new(value)),
        is_const: false,
    })
}

pub fn let_typed(name: &str, annotation: Vec<TypeToken>, value: Expr) -> Expr {
    e(ExprKind::Let {
        name: name.to_string(),
        type_annotation: Some(annotation),
        value: Some(Box::new(value)),
        is_const: false,
    })
}

pub fn const_(name: &str, value: Expr) -> Expr {
    e(ExprKind::Let {
        name: name.to_string(),
        type_annotation: None,
        value: Some(Box::new(value)),
        is_const: true,
    })
}

pub fn assign(name: &str, value: Expr) -> Expr {
    e(ExprKind::Assign {
        target: Box::new(var(name)),
        value: Box::new(value),
    })
}

pub fn bin(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    e(ExprKind::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    e(ExprKind::Call {
        callee: Box::new(callee),
        args: args.into_iter().map(Argument::Positional).collect(),
    })
}

pub fn print(args: Vec<Expr>) -> Expr {
    call(var("print"), args)
}

pub fn if_else(condition: Expr, then: Vec<Expr>, otherwise: Option<Vec<Expr>>) -> Expr {
    e(ExprKind::If {
        branches: vec![IfBranch {
            condition,
            body: then,
        }],
        else_branch: otherwise,
    })
}

pub fn while_(condition: Expr, body: Vec<Expr>) -> Expr {
    e(ExprKind::While {
        condition: Box::new(condition),
        body,
    })
}

pub fn range_for(variable: &str, start: Expr, end: Expr, body: Vec<Expr>) -> Expr {
    e(ExprKind::RangeFor {
        variable: variable.to_string(),
        var_type: None,
        start: Box::new(start),
        end: Box::new(end),
        step: None,
        body,
    })
}

pub fn function_decl(name: &str, params: &[&str], body: Vec<Expr>) -> FunctionDecl {
    FunctionDecl::new(
        name,
        params.iter().map(|p| Parameter::new(*p)).collect(),
        body,
    )
}

pub fn func(name: &str, params: &[&str], body: Vec<Expr>) -> Expr {
    e(ExprKind::Function(Box::new(function_decl(name, params, body))))
}

pub fn compile_ok(body: Vec<Expr>) -> CompiledModule {
    compile_with(body, &CompilerOptions::new("test.strand")).expect("program should compile")
}

pub fn compile_err(body: Vec<Expr>) -> CompileFailure {
    compile_with(body, &CompilerOptions::new("test.strand")).expect_err("program should be rejected")
}

pub fn compile_with(body: Vec<Expr>, options: &CompilerOptions) -> Result<CompiledModule, CompileFailure> {
    strandc::compile(&Program::new(body), options)
}

/// Walk every reachable path through `unit` and check that the operand
/// stack height agrees wherever paths join, never underflows, and that
/// every slot operand addresses a live stack entry. A unit starts with its
/// callee slot and one slot per declared parameter.
pub fn check_stack_discipline(unit: &FunctionUnit) {
    let code = &unit.chunk.code;
    let mut heights: Vec<Option<i64>> = vec![None; code.len()];
    let mut work = vec![(0usize, 1 + i64::from(unit.total_arity))];

    while let Some((offset, height)) = work.pop() {
        assert!(offset < code.len(), "{}: control falls off the end", unit.name);
        match heights[offset] {
            Some(seen) => {
                assert_eq!(
                    seen, height,
                    "{}: stack height disagrees at offset {}",
                    unit.name, offset
                );
                continue;
            }
            None => heights[offset] = Some(height),
        }

        let op = code[offset];
        match op {
            Op::GetLocal(slot) | Op::SetLocal(slot) | Op::DropLocal(slot) => {
                assert!(
                    i64::from(slot) < height,
                    "{}: slot {} above stack height {} at offset {}",
                    unit.name,
                    slot,
                    height,
                    offset
                );
            }
            Op::RangeCheck(slot) => assert!(i64::from(slot) + 2 < height),
            Op::Return => assert!(height >= 2, "{}: return without a value", unit.name),
            _ => {}
        }

        let after = height + i64::from(op.stack_effect());
        assert!(after >= 0, "{}: stack underflow at offset {}", unit.name, offset);
        let target = unit.chunk.jump_target(offset);
        match op {
            Op::Return | Op::Throw => {}
            Op::Jump(_) | Op::Loop(_) => work.push((target.expect("jump target"), after)),
            Op::ForIter(_) => {
                work.push((offset + 1, after));
                work.push((target.expect("jump target"), height));
            }
            Op::JumpIfFalse(_) | Op::JumpIfTrue(_) => {
                work.push((offset + 1, after));
                work.push((target.expect("jump target"), after));
            }
            _ => work.push((offset + 1, after)),
        }
    }
}

/// Check every unit of a module.
pub fn check_module(module: &CompiledModule) {
    for unit in module.units() {
        assert!(unit.chunk.unpatched_jumps().is_empty(), "{}: unpatched jump", unit.name);
        for offset in 0..unit.chunk.code.len() {
            if let Some(target) = unit.chunk.jump_target(offset) {
                assert!(
                    target <= unit.chunk.code.len(),
                    "{}: jump at {} lands outside the unit",
                    unit.name,
                    offset
                );
            }
        }
        check_stack_discipline(&unit);
    }
}
