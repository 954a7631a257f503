//! Diagnostics: collection, classification, type checking policy and limits.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use strandc::ast::{Argument, BinaryOp, ClassDecl, Expr, ExprKind, TypeToken, UnaryOp};
use strandc::config::CompilerOptions;
use strandc::error::{CompileError, ErrorKind};

fn negate(operand: Expr) -> Expr {
    e(ExprKind::Unary {
        op: UnaryOp::Negate,
        operand: Box::new(operand),
    })
}

fn nested(depth: usize) -> Expr {
    (0..depth).fold(int(1), |inner, _| negate(inner))
}

#[test]
fn test_all_errors_are_collected() {
    let failure = compile_err(vec![
        print(vec![var("a")]),
        let_typed("s", ty("str"), int(1)),
        e(ExprKind::Break),
    ]);
    let kinds: Vec<ErrorKind> = failure.errors().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec![ErrorKind::Scope, ErrorKind::Type, ErrorKind::ControlFlow]);
}

#[test]
fn test_type_check_off_drops_only_type_errors() {
    let options = CompilerOptions::new("test.strand").with_type_check(false);
    let program = vec![
        let_typed("s", ty("str"), int(1)),
        bin(int(1), BinaryOp::Add, string("a")),
    ];
    assert!(compile_with(program.clone(), &options).is_ok());
    assert!(compile_with(program, &CompilerOptions::new("test.strand")).is_err());

    let failure = compile_with(
        vec![let_typed("s", ty("str"), int(1)), e(ExprKind::Continue)],
        &options,
    )
    .unwrap_err();
    assert_eq!(failure.errors().len(), 1);
    assert!(failure.has_kind(ErrorKind::ControlFlow));
}

#[test]
fn test_numeric_widening() {
    let widen = strandc::ast::FunctionDecl::new(
        "widen",
        vec![strandc::ast::Parameter::typed("small", ty("i32"))],
        vec![
            let_typed("wide", ty("i64"), var("small")),
            let_typed("real", ty("f64"), var("small")),
            var("wide"),
        ],
    );
    compile_ok(vec![e(ExprKind::Function(Box::new(widen)))]);
    let failure = compile_err(vec![
        let_typed("wide", ty("i64"), int(1)),
        let_typed("small", ty("i32"), var("wide")),
    ]);
    assert!(matches!(
        &failure.errors()[0],
        CompileError::TypeMismatch { expected, found, .. } if expected == "i32" && found == "i64"
    ));
}

#[test]
fn test_incompatible_operands() {
    let failure = compile_err(vec![bin(boolean(true), BinaryOp::Subtract, int(1))]);
    assert!(matches!(
        &failure.errors()[0],
        CompileError::IncompatibleOperands { op, .. } if op == "-"
    ));
    compile_ok(vec![bin(string("a"), BinaryOp::Add, string("b"))]);
    compile_ok(vec![bin(string("a"), BinaryOp::Equal, int(1))]);
}

#[test]
fn test_call_checks_arity_and_argument_types() {
    let decl = strandc::ast::FunctionDecl::new(
        "scale",
        vec![strandc::ast::Parameter::typed("by", ty("i64"))],
        vec![var("by")],
    );
    let declare = e(ExprKind::Function(Box::new(decl)));

    let failure = compile_err(vec![declare.clone(), call(var("scale"), vec![int(1), int(2)])]);
    assert!(matches!(failure.errors()[0], CompileError::WrongArity { got: 2, .. }));
    assert!(failure.has_kind(ErrorKind::Call));

    let failure = compile_err(vec![declare.clone(), call(var("scale"), vec![string("x")])]);
    assert!(matches!(failure.errors()[0], CompileError::TypeMismatch { .. }));

    let failure = compile_err(vec![call(int(3), vec![])]);
    assert!(matches!(failure.errors()[0], CompileError::NotCallable { .. }));

    let keyword = e(ExprKind::Call {
        callee: Box::new(var("scale")),
        args: vec![Argument::Keyword {
            name: "by".to_string(),
            value: int(2),
        }],
    });
    compile_ok(vec![declare, keyword]);
}

#[test]
fn test_declared_return_type_is_enforced() {
    let decl = strandc::ast::FunctionDecl {
        return_type: Some(ty("str")),
        ..function_decl("f", &[], vec![int(1)])
    };
    let failure = compile_err(vec![e(ExprKind::Function(Box::new(decl)))]);
    assert!(matches!(failure.errors()[0], CompileError::TypeMismatch { .. }));
}

#[test]
fn test_unknown_type_and_generic_arity() {
    let failure = compile_err(vec![let_typed("x", ty("Widget"), int(1))]);
    assert!(matches!(
        &failure.errors()[0],
        CompileError::UnknownType { name, .. } if name == "Widget"
    ));

    let plain = e(ExprKind::Class(Box::new(ClassDecl {
        name: "Plain".to_string(),
        generics: Vec::new(),
        parent: None,
        members: Vec::new(),
        constructor: None,
        span: Default::default(),
    })));
    let annotation = vec![
        TypeToken::name("Plain"),
        TypeToken::LParen,
        TypeToken::name("i64"),
        TypeToken::RParen,
    ];
    let failure = compile_err(vec![plain, let_typed("p", annotation, e(ExprKind::Null))]);
    assert!(matches!(
        failure.errors()[0],
        CompileError::GenericArityMismatch { expected: 0, found: 1, .. }
    ));
}

#[test]
fn test_typedef_aliases_and_failures() {
    let module = compile_ok(vec![
        e(ExprKind::Typedef {
            name: "Count".to_string(),
            tokens: ty("i64"),
        }),
        let_typed("n", ty("Count"), int(3)),
    ]);
    assert_eq!(module.main.chunk.globals["n"].type_name, "i64");

    let failure = compile_err(vec![e(ExprKind::Typedef {
        name: "Broken".to_string(),
        tokens: ty("Nope"),
    })]);
    assert!(failure.has_kind(ErrorKind::Typedef));
}

#[test]
fn test_decorators() {
    let wrap = func(
        "twice",
        &["f"],
        vec![
            func(
                "wrapped",
                &["x"],
                vec![call(var("f"), vec![call(var("f"), vec![var("x")])])],
            ),
            var("wrapped"),
        ],
    );
    let decorated = e(ExprKind::Decorated {
        decorator: Box::new(var("twice")),
        target: Box::new(func("inc", &["x"], vec![bin(var("x"), BinaryOp::Add, int(1))])),
    });
    let module = compile_ok(vec![wrap, decorated, let_("r", call(var("inc"), vec![int(5)]))]);
    check_module(&module);
    let mut machine = common::machine::Machine::new();
    machine.run(&module).unwrap();
    assert_eq!(machine.global("r"), common::machine::Value::Int(7));

    let failure = compile_err(vec![e(ExprKind::Decorated {
        decorator: Box::new(int(1)),
        target: Box::new(func("g", &[], vec![])),
    })]);
    assert!(matches!(failure.errors()[0], CompileError::DecoratorNotCallable { .. }));

    let failure = compile_err(vec![e(ExprKind::Decorated {
        decorator: Box::new(var("print")),
        target: Box::new(int(1)),
    })]);
    assert!(matches!(failure.errors()[0], CompileError::DecoratorTarget { .. }));
    assert!(failure.has_kind(ErrorKind::Decorator));
}

#[test]
fn test_directive_errors() {
    let directive = |name: &str, args: &[&str]| {
        e(ExprKind::Use(strandc::ast::UseDirective {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            span: Default::default(),
        }))
    };
    let failure = compile_err(vec![
        directive("frobnicate", &[]),
        directive("main", &["a", "b"]),
        func("f", &[], vec![directive("optimize", &[])]),
    ]);
    assert!(matches!(failure.errors()[0], CompileError::UnknownDirective { .. }));
    assert!(matches!(failure.errors()[1], CompileError::DirectiveArity { got: 2, .. }));
    assert!(matches!(failure.errors()[2], CompileError::MisplacedDirective { .. }));
}

#[test]
fn test_nesting_limit_reports_once() {
    let failure = compile_err(vec![nested(300)]);
    assert_eq!(failure.errors().len(), 1);
    assert!(matches!(
        failure.errors()[0],
        CompileError::NestingTooDeep { limit: 200, .. }
    ));
    assert!(failure.has_kind(ErrorKind::Limit));

    let options = CompilerOptions::new("deep").with_max_nesting_depth(400);
    let module = compile_with(vec![let_("x", nested(300))], &options).unwrap();
    check_module(&module);
}

#[test]
fn test_macro_is_inlined_and_not_assignable() {
    let define = e(ExprKind::Macro {
        name: "TWO".to_string(),
        value: Box::new(bin(int(1), BinaryOp::Add, int(1))),
    });
    let module = compile_ok(vec![define.clone(), let_("x", var("TWO"))]);
    assert!(!module.main.chunk.globals.contains_key("TWO"));
    assert_eq!(module.main.chunk.globals["x"].type_name, "i64");

    let failure = compile_err(vec![define, assign("TWO", int(3))]);
    assert!(matches!(failure.errors()[0], CompileError::InvalidAssignmentTarget { .. }));
}

#[test]
fn test_macro_ends_with_its_block() {
    let define = e(ExprKind::Macro {
        name: "M".to_string(),
        value: Box::new(int(1)),
    });
    let module = compile_ok(vec![let_(
        "inside",
        if_else(boolean(true), vec![define.clone(), var("M")], None),
    )]);
    check_module(&module);

    let failure = compile_err(vec![
        if_else(boolean(true), vec![define], None),
        let_("r", var("M")),
    ]);
    assert_eq!(failure.errors().len(), 1);
    assert!(matches!(
        &failure.errors()[0],
        CompileError::UndefinedVariable { name, .. } if name == "M"
    ));
}
