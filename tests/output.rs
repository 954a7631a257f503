//! Module output: header directives, the integer stream and the JSON entry point.

mod common;

use common::machine::{Machine, Value};
use common::*;
use pretty_assertions::assert_eq;
use strandc::ast::{BinaryOp, ExprKind, Program, UseDirective};
use strandc::bytecode::serialize::MAGIC;
use strandc::bytecode::{decode_module, encode_module, Directive, Op};
use strandc::config::CompilerOptions;
use strandc::error::{DecodeError, StrandError};

fn directive(name: &str, args: &[&str]) -> strandc::ast::Expr {
    e(ExprKind::Use(UseDirective {
        name: name.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        span: Default::default(),
    }))
}

fn sample_program() -> Vec<strandc::ast::Expr> {
    vec![
        directive("package", &["com", "acme"]),
        directive("export", &["total", "double"]),
        directive("exportTo", &["lib"]),
        directive("main", &["start"]),
        directive("optimize", &[]),
        let_("total", int(0)),
        func("double", &["x"], vec![bin(var("x"), BinaryOp::Multiply, int(2))]),
        e(ExprKind::ForEach {
            variable: "x".to_string(),
            iterable: Box::new(e(ExprKind::Array(vec![int(1), e(ExprKind::Float(2.5))]))),
            body: vec![assign("total", bin(var("total"), BinaryOp::Add, call(var("double"), vec![var("x")])))],
        }),
        let_("label", string("naïve ✓")),
    ]
}

#[test]
fn test_directives_fill_module_header() {
    let module = compile_ok(sample_program());
    let chunk = &module.main.chunk;
    assert_eq!(chunk.package.as_deref(), Some("com.acme"));
    assert_eq!(chunk.exports, vec!["total".to_string(), "double".to_string()]);
    assert_eq!(chunk.export_target.as_deref(), Some("lib"));
    assert_eq!(chunk.entry_point.as_deref(), Some("start"));
    assert!(chunk.optimize);
    assert!(chunk.code.contains(&Op::Directive(Directive::Optimize, 0)));
    assert_eq!(module.source_name, "test.strand");
}

#[test]
fn test_globals_table_records_types() {
    let module = compile_ok(sample_program());
    let globals = &module.main.chunk.globals;
    let names: Vec<&str> = globals.keys().map(|k| k.as_str()).collect();
    assert_eq!(names, vec!["double", "total", "label"]);
    assert_eq!(globals["label"].type_name, "str");
    assert!(globals["double"].is_const);
    assert!(!globals["total"].is_const);
    assert!(!globals.contains_key("print"));
}

#[test]
fn test_stream_round_trip() {
    let module = compile_ok(sample_program());
    let stream = encode_module(&module);
    assert_eq!(stream[0], MAGIC);
    let decoded = decode_module(&stream).expect("stream should decode");
    assert_eq!(decoded, module);

    let mut machine = Machine::new();
    machine.run(&decoded).expect("decoded module should run");
    assert_eq!(machine.global("total"), Value::Float(7.0));
    assert_eq!(machine.global("label"), Value::Str("naïve ✓".to_string()));
}

#[test]
fn test_truncated_stream_is_rejected() {
    let stream = encode_module(&compile_ok(sample_program()));
    let err = decode_module(&stream[..stream.len() / 2]).unwrap_err();
    assert!(matches!(err, DecodeError::UnexpectedEnd(_)));
}

#[test]
fn test_compile_json_matches_direct_compile() {
    let program = Program::new(sample_program());
    let json = serde_json::to_string(&program).unwrap();
    let options = CompilerOptions::new("test.strand");
    let stream = strandc::compile_json(&json, &options).unwrap();
    let direct = encode_module(&strandc::compile(&program, &options).unwrap());
    assert_eq!(stream, direct);
}

#[test]
fn test_compile_json_reports_bad_input() {
    let options = CompilerOptions::default();
    let err = strandc::compile_json("{\"body\": 3}", &options).unwrap_err();
    assert!(matches!(err, StrandError::Json(_)));

    let program = Program::new(vec![var("missing")]);
    let json = serde_json::to_string(&program).unwrap();
    let err = strandc::compile_json(&json, &options).unwrap_err();
    match err {
        StrandError::Compile(failure) => assert_eq!(failure.errors().len(), 1),
        other => panic!("expected a compile failure, got {}", other),
    }
}

#[test]
fn test_every_unit_keeps_jumps_in_range() {
    let module = compile_ok(vec![
        let_("xs", range_for("i", int(0), int(3), vec![if_else(
            bin(var("i"), BinaryOp::Equal, int(1)),
            vec![e(ExprKind::Continue)],
            Some(vec![var("i")]),
        )])),
        func(
            "loop_in_function",
            &["n"],
            vec![while_(
                bin(var("n"), BinaryOp::Greater, int(0)),
                vec![assign("n", bin(var("n"), BinaryOp::Subtract, int(1)))],
            )],
        ),
    ]);
    check_module(&module);
    let mut machine = Machine::new();
    machine.run(&module).unwrap();
    assert_eq!(machine.global("xs"), Value::ints(&[0, 2]));
}
