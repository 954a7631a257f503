//! Bytecode opcodes for the Strand VM.

use crate::error::DecodeError;

/// Module header directives emitted for `use` declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    /// `use optimize`
    Optimize,
    /// `use func(name)` / `use main(name)`: the entry point.
    Entry,
    /// `use export(a, b, ...)`
    Export,
    /// `use package(a, b)`: dot-joined package path.
    Package,
    /// `use exportTo(name)`
    ExportTo,
}

impl Directive {
    pub fn tag(self) -> u8 {
        match self {
            Directive::Optimize => 0,
            Directive::Entry => 1,
            Directive::Export => 2,
            Directive::Package => 3,
            Directive::ExportTo => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Directive::Optimize),
            1 => Some(Directive::Entry),
            2 => Some(Directive::Export),
            3 => Some(Directive::Package),
            4 => Some(Directive::ExportTo),
            _ => None,
        }
    }
}

/// A single bytecode instruction.
///
/// Jump operands are relative: forward jumps land at `offset + 1 + n`,
/// `Loop(n)` lands at `offset + 1 - n`. Conditional jumps leave the tested
/// value on the stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // --- Constants & Literals ---
    /// Push a constant from the constant pool.
    Constant(u16),
    Null,
    True,
    False,

    // --- Stack manipulation ---
    Pop,
    /// Pop the value under the top of the stack, keeping the top.
    PopUnder,
    Dup,
    Swap,
    /// Replace the top value with a shallow copy.
    Copy,

    // --- Variables ---
    /// Get a local variable by stack slot.
    GetLocal(u16),
    SetLocal(u16),
    DropLocal(u16),
    GetUpvalue(u16),
    SetUpvalue(u16),
    DropUpvalue(u16),
    /// Get a global variable by name constant index.
    GetGlobal(u16),
    SetGlobal(u16),
    /// Pop the top value into a new global.
    DefineGlobal(u16),
    DropGlobal(u16),

    // --- Attributes & indexing ---
    /// `[obj] -> [obj.name]`, name from constant index.
    GetAttr(u16),
    /// `[obj, value] -> [value]`
    SetAttr(u16),
    /// `[obj] -> []`
    DropAttr(u16),
    /// `[obj, index] -> [value]`
    GetIndex,
    /// `[obj, index, value] -> [value]`
    SetIndex,

    // --- Arithmetic ---
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Negate,

    // --- Comparison & logic ---
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Not,

    // --- Bitwise ---
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    BitNot,

    // --- Control flow ---
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    Loop(u32),

    // --- Functions ---
    /// Create a closure from a function constant, consuming N default values.
    Closure(u16, u8),
    /// Call with N positional arguments and M keyword `(name, value)` pairs.
    Call(u8, u8),
    Return,

    // --- Collections ---
    Array(u16),
    /// Build a map from N key/value pairs (2*N values).
    Map(u16),
    Tuple(u16),
    /// Concatenate N parts (string interpolation).
    BuildString(u16),

    // --- Classes & enums ---
    /// Assemble a class from a descriptor constant, consuming N stack values.
    Class(u16, u16),
    /// Build an enum object from a descriptor constant.
    Enum(u16),

    // --- Loops ---
    /// Open a value accumulator for a loop in value position.
    AccStart,
    /// Pop a body value into the innermost accumulator; nulls are skipped.
    AccCollect,
    /// Close the innermost accumulator and push the collected list.
    AccFlush,
    /// Replace an iterable with an iterator.
    GetIter,
    /// Push the next item of the iterator on top, or jump when exhausted.
    ForIter(u32),
    /// `[start, end] -> [1 | -1]`
    InferStep,
    /// Push whether the counter in the slot (with `end`/`step` in the next
    /// two slots) is still inside the range.
    RangeCheck(u16),

    // --- Patterns ---
    /// `[value, type] -> [bool]`: instance-of / variant-of test.
    MatchType,

    // --- References ---
    Ref,
    Deref,

    // --- Errors ---
    Throw,
    /// `[condition, message] -> []`
    Assert,

    // --- Headers ---
    /// Module directive with its argument constant (unused for `optimize`).
    Directive(Directive, u16),
}

impl Op {
    /// Net change in operand stack height after executing this instruction.
    pub fn stack_effect(&self) -> i32 {
        match *self {
            Op::Constant(_)
            | Op::Null
            | Op::True
            | Op::False
            | Op::Dup
            | Op::GetLocal(_)
            | Op::GetUpvalue(_)
            | Op::GetGlobal(_)
            | Op::Enum(_)
            | Op::AccFlush
            | Op::ForIter(_)
            | Op::RangeCheck(_) => 1,

            Op::Swap
            | Op::Copy
            | Op::SetLocal(_)
            | Op::SetUpvalue(_)
            | Op::SetGlobal(_)
            | Op::DropLocal(_)
            | Op::DropUpvalue(_)
            | Op::DropGlobal(_)
            | Op::GetAttr(_)
            | Op::Negate
            | Op::Not
            | Op::BitNot
            | Op::Jump(_)
            | Op::JumpIfFalse(_)
            | Op::JumpIfTrue(_)
            | Op::Loop(_)
            | Op::AccStart
            | Op::GetIter
            | Op::Ref
            | Op::Deref
            | Op::Directive(..) => 0,

            Op::Pop
            | Op::PopUnder
            | Op::DefineGlobal(_)
            | Op::SetAttr(_)
            | Op::DropAttr(_)
            | Op::GetIndex
            | Op::Add
            | Op::Subtract
            | Op::Multiply
            | Op::Divide
            | Op::Modulo
            | Op::Power
            | Op::Equal
            | Op::NotEqual
            | Op::Less
            | Op::LessEqual
            | Op::Greater
            | Op::GreaterEqual
            | Op::BitAnd
            | Op::BitOr
            | Op::BitXor
            | Op::ShiftLeft
            | Op::ShiftRight
            | Op::Return
            | Op::AccCollect
            | Op::InferStep
            | Op::MatchType
            | Op::Throw => -1,

            Op::SetIndex | Op::Assert => -2,

            Op::Closure(_, defaults) => 1 - i32::from(defaults),
            Op::Call(positional, keyword) => -(i32::from(positional) + 2 * i32::from(keyword)),
            Op::Array(n) | Op::Tuple(n) | Op::BuildString(n) => 1 - i32::from(n),
            Op::Map(n) => 1 - 2 * i32::from(n),
            Op::Class(_, consumed) => 1 - i32::from(consumed),
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Op::Jump(_) | Op::JumpIfFalse(_) | Op::JumpIfTrue(_) | Op::ForIter(_) | Op::Loop(_)
        )
    }

    /// Numeric tag used by the serialized format.
    pub fn tag(&self) -> u8 {
        match self {
            Op::Constant(_) => 0,
            Op::Null => 1,
            Op::True => 2,
            Op::False => 3,
            Op::Pop => 4,
            Op::PopUnder => 5,
            Op::Dup => 6,
            Op::Swap => 7,
            Op::Copy => 8,
            Op::GetLocal(_) => 9,
            Op::SetLocal(_) => 10,
            Op::DropLocal(_) => 11,
            Op::GetUpvalue(_) => 12,
            Op::SetUpvalue(_) => 13,
            Op::DropUpvalue(_) => 14,
            Op::GetGlobal(_) => 15,
            Op::SetGlobal(_) => 16,
            Op::DefineGlobal(_) => 17,
            Op::DropGlobal(_) => 18,
            Op::GetAttr(_) => 19,
            Op::SetAttr(_) => 20,
            Op::DropAttr(_) => 21,
            Op::GetIndex => 22,
            Op::SetIndex => 23,
            Op::Add => 24,
            Op::Subtract => 25,
            Op::Multiply => 26,
            Op::Divide => 27,
            Op::Modulo => 28,
            Op::Power => 29,
            Op::Negate => 30,
            Op::Equal => 31,
            Op::NotEqual => 32,
            Op::Less => 33,
            Op::LessEqual => 34,
            Op::Greater => 35,
            Op::GreaterEqual => 36,
            Op::Not => 37,
            Op::BitAnd => 38,
            Op::BitOr => 39,
            Op::BitXor => 40,
            Op::ShiftLeft => 41,
            Op::ShiftRight => 42,
            Op::BitNot => 43,
            Op::Jump(_) => 44,
            Op::JumpIfFalse(_) => 45,
            Op::JumpIfTrue(_) => 46,
            Op::Loop(_) => 47,
            Op::Closure(..) => 48,
            Op::Call(..) => 49,
            Op::Return => 50,
            Op::Array(_) => 51,
            Op::Map(_) => 52,
            Op::Tuple(_) => 53,
            Op::BuildString(_) => 54,
            Op::Class(..) => 55,
            Op::Enum(_) => 56,
            Op::AccStart => 57,
            Op::AccCollect => 58,
            Op::AccFlush => 59,
            Op::GetIter => 60,
            Op::ForIter(_) => 61,
            Op::InferStep => 62,
            Op::RangeCheck(_) => 63,
            Op::MatchType => 64,
            Op::Ref => 65,
            Op::Deref => 66,
            Op::Throw => 67,
            Op::Assert => 68,
            Op::Directive(..) => 69,
        }
    }

    /// Append the tag and operands to an integer stream.
    pub fn encode(&self, out: &mut Vec<i64>) {
        out.push(i64::from(self.tag()));
        match *self {
            Op::Constant(n)
            | Op::GetLocal(n)
            | Op::SetLocal(n)
            | Op::DropLocal(n)
            | Op::GetUpvalue(n)
            | Op::SetUpvalue(n)
            | Op::DropUpvalue(n)
            | Op::GetGlobal(n)
            | Op::SetGlobal(n)
            | Op::DefineGlobal(n)
            | Op::DropGlobal(n)
            | Op::GetAttr(n)
            | Op::SetAttr(n)
            | Op::DropAttr(n)
            | Op::Array(n)
            | Op::Map(n)
            | Op::Tuple(n)
            | Op::BuildString(n)
            | Op::Enum(n)
            | Op::RangeCheck(n) => out.push(i64::from(n)),
            Op::Jump(n) | Op::JumpIfFalse(n) | Op::JumpIfTrue(n) | Op::Loop(n) | Op::ForIter(n) => {
                out.push(i64::from(n))
            }
            Op::Closure(index, defaults) => {
                out.push(i64::from(index));
                out.push(i64::from(defaults));
            }
            Op::Call(positional, keyword) => {
                out.push(i64::from(positional));
                out.push(i64::from(keyword));
            }
            Op::Class(index, consumed) => {
                out.push(i64::from(index));
                out.push(i64::from(consumed));
            }
            Op::Directive(kind, index) => {
                out.push(i64::from(kind.tag()));
                out.push(i64::from(index));
            }
            _ => {}
        }
    }

    /// Rebuild an instruction from its tag, pulling operands from `next`.
    pub fn decode(
        tag: i64,
        position: usize,
        mut next: impl FnMut() -> Result<i64, DecodeError>,
    ) -> Result<Op, DecodeError> {
        let u16_operand = |next: &mut dyn FnMut() -> Result<i64, DecodeError>| -> Result<u16, DecodeError> {
            let value = next()?;
            u16::try_from(value).map_err(|_| DecodeError::OutOfRange {
                what: "u16 operand",
                value,
                position,
            })
        };
        let u8_operand = |value: i64| {
            u8::try_from(value).map_err(|_| DecodeError::OutOfRange {
                what: "u8 operand",
                value,
                position,
            })
        };
        let u32_operand = |value: i64| {
            u32::try_from(value).map_err(|_| DecodeError::OutOfRange {
                what: "jump offset",
                value,
                position,
            })
        };

        let op = match tag {
            0 => Op::Constant(u16_operand(&mut next)?),
            1 => Op::Null,
            2 => Op::True,
            3 => Op::False,
            4 => Op::Pop,
            5 => Op::PopUnder,
            6 => Op::Dup,
            7 => Op::Swap,
            8 => Op::Copy,
            9 => Op::GetLocal(u16_operand(&mut next)?),
            10 => Op::SetLocal(u16_operand(&mut next)?),
            11 => Op::DropLocal(u16_operand(&mut next)?),
            12 => Op::GetUpvalue(u16_operand(&mut next)?),
            13 => Op::SetUpvalue(u16_operand(&mut next)?),
            14 => Op::DropUpvalue(u16_operand(&mut next)?),
            15 => Op::GetGlobal(u16_operand(&mut next)?),
            16 => Op::SetGlobal(u16_operand(&mut next)?),
            17 => Op::DefineGlobal(u16_operand(&mut next)?),
            18 => Op::DropGlobal(u16_operand(&mut next)?),
            19 => Op::GetAttr(u16_operand(&mut next)?),
            20 => Op::SetAttr(u16_operand(&mut next)?),
            21 => Op::DropAttr(u16_operand(&mut next)?),
            22 => Op::GetIndex,
            23 => Op::SetIndex,
            24 => Op::Add,
            25 => Op::Subtract,
            26 => Op::Multiply,
            27 => Op::Divide,
            28 => Op::Modulo,
            29 => Op::Power,
            30 => Op::Negate,
            31 => Op::Equal,
            32 => Op::NotEqual,
            33 => Op::Less,
            34 => Op::LessEqual,
            35 => Op::Greater,
            36 => Op::GreaterEqual,
            37 => Op::Not,
            38 => Op::BitAnd,
            39 => Op::BitOr,
            40 => Op::BitXor,
            41 => Op::ShiftLeft,
            42 => Op::ShiftRight,
            43 => Op::BitNot,
            44 => Op::Jump(u32_operand(next()?)?),
            45 => Op::JumpIfFalse(u32_operand(next()?)?),
            46 => Op::JumpIfTrue(u32_operand(next()?)?),
            47 => Op::Loop(u32_operand(next()?)?),
            48 => {
                let index = u16_operand(&mut next)?;
                Op::Closure(index, u8_operand(next()?)?)
            }
            49 => {
                let positional = u8_operand(next()?)?;
                Op::Call(positional, u8_operand(next()?)?)
            }
            50 => Op::Return,
            51 => Op::Array(u16_operand(&mut next)?),
            52 => Op::Map(u16_operand(&mut next)?),
            53 => Op::Tuple(u16_operand(&mut next)?),
            54 => Op::BuildString(u16_operand(&mut next)?),
            55 => {
                let index = u16_operand(&mut next)?;
                Op::Class(index, u16_operand(&mut next)?)
            }
            56 => Op::Enum(u16_operand(&mut next)?),
            57 => Op::AccStart,
            58 => Op::AccCollect,
            59 => Op::AccFlush,
            60 => Op::GetIter,
            61 => Op::ForIter(u32_operand(next()?)?),
            62 => Op::InferStep,
            63 => Op::RangeCheck(u16_operand(&mut next)?),
            64 => Op::MatchType,
            65 => Op::Ref,
            66 => Op::Deref,
            67 => Op::Throw,
            68 => Op::Assert,
            69 => {
                let kind_tag = next()?;
                let kind = u8::try_from(kind_tag)
                    .ok()
                    .and_then(Directive::from_tag)
                    .ok_or(DecodeError::InvalidTag {
                        what: "directive",
                        tag: kind_tag,
                        position,
                    })?;
                Op::Directive(kind, u16_operand(&mut next)?)
            }
            _ => {
                return Err(DecodeError::InvalidTag {
                    what: "opcode",
                    tag,
                    position,
                })
            }
        };
        Ok(op)
    }
}
