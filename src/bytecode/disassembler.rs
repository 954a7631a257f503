//! Bytecode disassembler for debug output.

use super::chunk::{Chunk, Constant, FunctionUnit};
use super::opcode::Op;

/// Disassemble a function unit and every unit nested in it.
pub fn disassemble(unit: &FunctionUnit) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "== {} (arity={}/{}, upvalues={}) ==\n",
        unit.name,
        unit.arity,
        unit.total_arity,
        unit.upvalues.len()
    ));
    for (i, upvalue) in unit.upvalues.iter().enumerate() {
        out.push_str(&format!("  upvalue {} <- {}\n", i, upvalue));
    }
    disassemble_chunk(&unit.chunk, &mut out);

    for nested in unit.nested_units() {
        out.push('\n');
        out.push_str(&disassemble(nested));
    }
    out
}

fn disassemble_chunk(chunk: &Chunk, out: &mut String) {
    for (offset, op) in chunk.code.iter().enumerate() {
        let line = chunk.lines.get(offset).copied().unwrap_or(0);
        let line_str = if offset > 0 && chunk.lines.get(offset - 1).copied() == Some(line) {
            "   |".to_string()
        } else {
            format!("{:4}", line)
        };
        out.push_str(&format!("{:04} {} ", offset, line_str));
        disassemble_op(offset, op, chunk, out);
        out.push('\n');
    }
}

fn disassemble_op(offset: usize, op: &Op, chunk: &Chunk, out: &mut String) {
    let named = |label: &str, idx: u16| {
        format!("{:<13}{:>5} ({})", label, idx, constant_string(chunk, idx))
    };
    let jump = |label: &str| {
        let target = chunk
            .jump_target(offset)
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!("{:<13}-> {}", label, target)
    };
    let text = match *op {
        Op::Constant(idx) => format!(
            "{:<13}{:>5} ({})",
            "CONSTANT",
            idx,
            format_constant(chunk.constants.get(idx as usize))
        ),
        Op::GetLocal(slot) => format!("{:<13}{:>5}", "GET_LOCAL", slot),
        Op::SetLocal(slot) => format!("{:<13}{:>5}", "SET_LOCAL", slot),
        Op::DropLocal(slot) => format!("{:<13}{:>5}", "DROP_LOCAL", slot),
        Op::GetUpvalue(idx) => format!("{:<13}{:>5}", "GET_UPVALUE", idx),
        Op::SetUpvalue(idx) => format!("{:<13}{:>5}", "SET_UPVALUE", idx),
        Op::DropUpvalue(idx) => format!("{:<13}{:>5}", "DROP_UPVALUE", idx),
        Op::GetGlobal(idx) => named("GET_GLOBAL", idx),
        Op::SetGlobal(idx) => named("SET_GLOBAL", idx),
        Op::DefineGlobal(idx) => named("DEF_GLOBAL", idx),
        Op::DropGlobal(idx) => named("DROP_GLOBAL", idx),
        Op::GetAttr(idx) => named("GET_ATTR", idx),
        Op::SetAttr(idx) => named("SET_ATTR", idx),
        Op::DropAttr(idx) => named("DROP_ATTR", idx),
        Op::Jump(_) => jump("JUMP"),
        Op::JumpIfFalse(_) => jump("JUMP_IF_FALSE"),
        Op::JumpIfTrue(_) => jump("JUMP_IF_TRUE"),
        Op::Loop(_) => jump("LOOP"),
        Op::ForIter(_) => jump("FOR_ITER"),
        Op::Closure(idx, defaults) => format!(
            "{:<13}{:>5} ({}) defaults={}",
            "CLOSURE",
            idx,
            format_constant(chunk.constants.get(idx as usize)),
            defaults
        ),
        Op::Call(positional, keyword) => format!("{:<13}{:>5} kw={}", "CALL", positional, keyword),
        Op::Array(n) => format!("{:<13}{:>5}", "ARRAY", n),
        Op::Map(n) => format!("{:<13}{:>5}", "MAP", n),
        Op::Tuple(n) => format!("{:<13}{:>5}", "TUPLE", n),
        Op::BuildString(n) => format!("{:<13}{:>5}", "BUILD_STRING", n),
        Op::Class(idx, consumed) => format!(
            "{:<13}{:>5} ({}) consumes={}",
            "CLASS",
            idx,
            format_constant(chunk.constants.get(idx as usize)),
            consumed
        ),
        Op::Enum(idx) => format!(
            "{:<13}{:>5} ({})",
            "ENUM",
            idx,
            format_constant(chunk.constants.get(idx as usize))
        ),
        Op::RangeCheck(slot) => format!("{:<13}{:>5}", "RANGE_CHECK", slot),
        Op::Directive(kind, idx) => format!(
            "{:<13}{:?} ({})",
            "DIRECTIVE",
            kind,
            format_constant(chunk.constants.get(idx as usize))
        ),
        simple => format!("{:?}", simple).to_uppercase(),
    };
    out.push_str(&text);
}

fn constant_string(chunk: &Chunk, idx: u16) -> String {
    match chunk.constants.get(idx as usize) {
        Some(Constant::Str(s)) => s.clone(),
        _ => format!("?{}", idx),
    }
}

fn format_constant(val: Option<&Constant>) -> String {
    match val {
        Some(Constant::Int(n)) => format!("{}", n),
        Some(Constant::Float(n)) => format!("{}", n),
        Some(Constant::Str(s)) => format!("\"{}\"", s),
        Some(Constant::Names(names)) => format!("[{}]", names.join(", ")),
        Some(Constant::Function(f)) => format!("<fn {}>", f.name),
        Some(Constant::Class(c)) => format!("<class {}>", c.name),
        Some(Constant::Enum(e)) => format!("<enum {}>", e.name),
        None => "???".to_string(),
    }
}
