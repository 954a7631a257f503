//! Bytecode chunk and function unit types.

use std::rc::Rc;

use indexmap::IndexMap;

use super::opcode::Op;
use super::upvalue::UpvalueDescriptor;

/// Placeholder operand of a jump that has not been patched yet.
pub const UNPATCHED: u32 = u32::MAX;

/// A constant value stored in a chunk's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
    /// A list of names (export lists).
    Names(Vec<String>),
    /// A compiled function unit.
    Function(Rc<FunctionUnit>),
    Class(Rc<ClassDescriptor>),
    Enum(Rc<EnumDescriptor>),
}

/// A compiled function, method, block or the module body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionUnit {
    /// Function name (`<main>` for the module body).
    pub name: String,
    /// Number of required positional parameters.
    pub arity: u8,
    /// Declared parameters plus one slot each for varargs and kwargs.
    pub total_arity: u8,
    /// Number of trailing parameters with default values.
    pub default_count: u8,
    pub has_varargs: bool,
    pub has_kwargs: bool,
    pub is_async: bool,
    pub catches_result: bool,
    /// Whether slot 0 holds `this`.
    pub is_method: bool,
    /// Parameter names (for keyword argument resolution).
    pub param_names: Vec<String>,
    pub upvalues: Vec<UpvalueDescriptor>,
    pub chunk: Chunk,
}

impl FunctionUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: 0,
            total_arity: 0,
            default_count: 0,
            has_varargs: false,
            has_kwargs: false,
            is_async: false,
            catches_result: false,
            is_method: false,
            param_names: Vec::new(),
            upvalues: Vec::new(),
            chunk: Chunk::new(),
        }
    }

    /// Nested function units referenced from this unit's constant pool.
    pub fn nested_units(&self) -> impl Iterator<Item = &Rc<FunctionUnit>> {
        self.chunk.constants.iter().filter_map(|c| match c {
            Constant::Function(unit) => Some(unit),
            _ => None,
        })
    }
}

/// Static type and mutability recorded for each module global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    pub type_name: String,
    pub is_const: bool,
}

/// A chunk of bytecode: instructions + constant pool + line info.
///
/// Only the module body's chunk carries header metadata and globals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub code: Vec<Op>,
    /// Source line numbers, parallel to `code`.
    pub lines: Vec<usize>,
    pub constants: Vec<Constant>,
    pub package: Option<String>,
    pub export_target: Option<String>,
    pub entry_point: Option<String>,
    pub exports: Vec<String>,
    pub optimize: bool,
    pub globals: IndexMap<String, GlobalInfo>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an instruction and record its source line.
    pub fn emit(&mut self, op: Op, line: usize) -> usize {
        let offset = self.code.len();
        self.code.push(op);
        self.lines.push(line);
        offset
    }

    /// Add a constant to the pool and return its index, or `None` when the
    /// pool is full. Strings are deduplicated.
    pub fn add_constant(&mut self, constant: Constant) -> Option<u16> {
        if let Constant::Str(ref s) = constant {
            let existing = self
                .constants
                .iter()
                .position(|c| matches!(c, Constant::Str(other) if other == s));
            if let Some(index) = existing {
                return u16::try_from(index).ok();
            }
        }
        let index = u16::try_from(self.constants.len()).ok()?;
        self.constants.push(constant);
        Some(index)
    }

    /// Next instruction index.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Point the forward jump at `offset` to the next instruction.
    /// Returns `false` if the distance does not fit the operand.
    pub fn patch_jump(&mut self, offset: usize) -> bool {
        let distance = self.code.len() - offset - 1;
        let Ok(distance) = u32::try_from(distance) else {
            return false;
        };
        if distance == UNPATCHED {
            return false;
        }
        match &mut self.code[offset] {
            Op::Jump(target)
            | Op::JumpIfFalse(target)
            | Op::JumpIfTrue(target)
            | Op::ForIter(target) => {
                *target = distance;
            }
            other => panic!("Tried to patch non-jump instruction {:?} at offset {}", other, offset),
        }
        true
    }

    /// Absolute destination of the jump at `offset`, if it is a jump.
    pub fn jump_target(&self, offset: usize) -> Option<usize> {
        match self.code.get(offset)? {
            Op::Jump(n) | Op::JumpIfFalse(n) | Op::JumpIfTrue(n) | Op::ForIter(n) => {
                Some(offset + 1 + *n as usize)
            }
            Op::Loop(n) => (offset + 1).checked_sub(*n as usize),
            _ => None,
        }
    }

    /// Offsets of jumps still carrying the placeholder operand.
    pub fn unpatched_jumps(&self) -> Vec<usize> {
        self.code
            .iter()
            .enumerate()
            .filter(|(_, op)| {
                matches!(
                    op,
                    Op::Jump(UNPATCHED)
                        | Op::JumpIfFalse(UNPATCHED)
                        | Op::JumpIfTrue(UNPATCHED)
                        | Op::ForIter(UNPATCHED)
                )
            })
            .map(|(offset, _)| offset)
            .collect()
    }
}

/// What kind of class member a descriptor entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: MemberKind,
    pub is_static: bool,
    pub is_private: bool,
    pub is_operator: bool,
}

/// Layout of the values an `Op::Class` consumes, bottom to top:
/// parent (if any), member values in reverse declaration order, the
/// constructor (or null), then one name constant per generic parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub name: String,
    pub has_parent: bool,
    pub has_constructor: bool,
    /// Members in declaration order.
    pub members: Vec<MemberDescriptor>,
    pub generics: Vec<String>,
}

impl ClassDescriptor {
    /// Number of stack values the class instruction consumes.
    pub fn stack_inputs(&self) -> usize {
        usize::from(self.has_parent) + self.members.len() + 1 + self.generics.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDescriptor {
    pub name: String,
    /// Payload field names; the variant's ordinal is its index.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    pub name: String,
    pub variants: Vec<VariantDescriptor>,
}

impl EnumDescriptor {
    pub fn ordinal(&self, variant: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == variant)
    }
}

/// A compiled module: the top-level function unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModule {
    pub source_name: String,
    pub main: Rc<FunctionUnit>,
}

impl CompiledModule {
    /// Every unit in the module, depth first starting at `main`.
    pub fn units(&self) -> Vec<Rc<FunctionUnit>> {
        let mut out = Vec::new();
        let mut stack = vec![self.main.clone()];
        while let Some(unit) = stack.pop() {
            stack.extend(unit.nested_units().cloned());
            out.push(unit);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_string_constants_deduplicated() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Constant::Str("x".into()));
        let b = chunk.add_constant(Constant::Int(1));
        let c = chunk.add_constant(Constant::Str("x".into()));
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(1));
        assert_eq!(c, Some(0));
    }

    #[test]
    fn test_patch_and_resolve_jumps() {
        let mut chunk = Chunk::new();
        let jump = chunk.emit(Op::JumpIfFalse(UNPATCHED), 1);
        chunk.emit(Op::Pop, 1);
        chunk.emit(Op::Null, 1);
        assert_eq!(chunk.unpatched_jumps(), vec![jump]);
        assert!(chunk.patch_jump(jump));
        assert_eq!(chunk.jump_target(jump), Some(3));
        assert!(chunk.unpatched_jumps().is_empty());

        let back = chunk.emit(Op::Loop(4), 2);
        assert_eq!(chunk.jump_target(back), Some(0));
    }

    #[test]
    #[should_panic(expected = "non-jump")]
    fn test_patching_non_jump_panics() {
        let mut chunk = Chunk::new();
        chunk.emit(Op::Pop, 1);
        chunk.patch_jump(0);
    }

    #[test]
    fn test_class_descriptor_inputs() {
        let desc = ClassDescriptor {
            name: "Point".into(),
            has_parent: true,
            has_constructor: false,
            members: vec![
                MemberDescriptor {
                    name: "x".into(),
                    kind: MemberKind::Field,
                    is_static: false,
                    is_private: false,
                    is_operator: false,
                },
                MemberDescriptor {
                    name: "norm".into(),
                    kind: MemberKind::Method,
                    is_static: false,
                    is_private: false,
                    is_operator: false,
                },
            ],
            generics: vec!["T".into()],
        };
        assert_eq!(desc.stack_inputs(), 5);
    }
}
