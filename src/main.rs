//! Strandc CLI: compile an AST (JSON) into the bytecode integer stream.

use std::env;
use std::fs;
use std::process;

use strandc::bytecode::{decode_module, disassemble, encode_module};
use strandc::config::CompilerOptions;
use strandc::error::StrandError;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
enum Command {
    /// Compile an AST file
    Compile { input: String },
    /// Decode and disassemble a serialized stream
    Disasm { input: String },
}

/// CLI options parsed from arguments.
struct Options {
    command: Command,
    options_file: Option<String>,
    output: Option<String>,
    disassemble: bool,
    no_type_check: bool,
    max_depth: Option<usize>,
    trace: bool,
}

fn print_usage() {
    eprintln!("Strandc {} - Strand bytecode compiler", VERSION);
    eprintln!();
    eprintln!("Usage: strandc [options] <ast.json>");
    eprintln!("       strandc disasm <stream.json>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  disasm <file>       Decode an integer stream and print its disassembly");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --options FILE      Read compiler options from a JSON file");
    eprintln!("  -o FILE             Write the integer stream to FILE (default: stdout)");
    eprintln!("  --disassemble       Print the disassembly to stderr after compiling");
    eprintln!("  --no-type-check     Do not fail on type errors");
    eprintln!("  --max-depth N       Maximum expression nesting depth (default: 200)");
    eprintln!("  --trace             Log compiler activity (filter with RUST_LOG)");
    eprintln!("  --help, -h          Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  strandc main.ast.json                 Print the stream as a JSON array");
    eprintln!("  strandc main.ast.json -o main.strn    Write the stream to a file");
    eprintln!("  strandc disasm main.strn              Inspect a compiled stream");
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        command: Command::Compile {
            input: String::new(),
        },
        options_file: None,
        output: None,
        disassemble: false,
        no_type_check: false,
        max_depth: None,
        trace: false,
    };
    let mut input: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "disasm" if input.is_none() => {
                i += 1;
                if i >= args.len() {
                    eprintln!("disasm command requires a stream file");
                    print_usage();
                    process::exit(64);
                }
                options.command = Command::Disasm {
                    input: args[i].clone(),
                };
                return options;
            }
            "--options" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--options requires a file path");
                    print_usage();
                    process::exit(64);
                }
                options.options_file = Some(args[i].clone());
            }
            "-o" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("-o requires a file path");
                    print_usage();
                    process::exit(64);
                }
                options.output = Some(args[i].clone());
            }
            "--max-depth" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--max-depth requires a number");
                    print_usage();
                    process::exit(64);
                }
                options.max_depth = Some(args[i].parse().unwrap_or_else(|_| {
                    eprintln!("Invalid depth: {}", args[i]);
                    process::exit(64);
                }));
            }
            "--disassemble" => options.disassemble = true,
            "--no-type-check" => options.no_type_check = true,
            "--trace" => options.trace = true,
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            _ if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                print_usage();
                process::exit(64);
            }
            _ => {
                if input.is_some() {
                    eprintln!("Unexpected argument: {}", arg);
                    print_usage();
                    process::exit(64);
                }
                input = Some(arg.clone());
            }
        }
        i += 1;
    }

    match input {
        Some(input) => options.command = Command::Compile { input },
        None => {
            print_usage();
            process::exit(64);
        }
    }
    options
}

fn main() {
    let options = parse_args();

    if options.trace {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strandc=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match &options.command {
        Command::Compile { input } => run_compile(input, &options),
        Command::Disasm { input } => run_disasm(input),
    };

    if let Err(e) = result {
        match &e {
            StrandError::Compile(failure) => {
                for error in failure.errors() {
                    eprintln!("Error: {}", error);
                }
            }
            other => eprintln!("Error: {}", other),
        }
        process::exit(match e {
            StrandError::Io(_) => 74,
            StrandError::Json(_) | StrandError::Decode(_) => 65,
            StrandError::Compile(_) => 70,
        });
    }
}

fn load_options(options: &Options, input: &str) -> Result<CompilerOptions, StrandError> {
    let mut compiler_options = match &options.options_file {
        Some(path) => CompilerOptions::from_json(&fs::read_to_string(path)?)?,
        None => CompilerOptions::new(input),
    };
    if options.no_type_check {
        compiler_options.type_check = false;
    }
    if let Some(depth) = options.max_depth {
        compiler_options.max_nesting_depth = depth;
    }
    Ok(compiler_options)
}

fn run_compile(input: &str, options: &Options) -> Result<(), StrandError> {
    let compiler_options = load_options(options, input)?;
    let source = fs::read_to_string(input)?;
    let program: strandc::ast::Program = serde_json::from_str(&source)?;
    let module = strandc::compile(&program, &compiler_options)?;

    if options.disassemble {
        eprint!("{}", disassemble(&module.main));
    }

    let stream = serde_json::to_string(&encode_module(&module))?;
    match &options.output {
        Some(path) => fs::write(path, stream)?,
        None => println!("{}", stream),
    }
    Ok(())
}

fn run_disasm(input: &str) -> Result<(), StrandError> {
    let source = fs::read_to_string(input)?;
    let stream: Vec<i64> = serde_json::from_str(&source)?;
    let module = decode_module(&stream)?;
    print!("{}", disassemble(&module.main));
    Ok(())
}
