//! Bytecode output of the Strand compiler.
//!
//! # Architecture
//!
//! - `opcode`: instruction set with per-instruction stack effects
//! - `chunk`: function units, constant pools and class/enum descriptors
//! - `upvalue`: closure capture descriptors
//! - `serialize`: flat integer-stream encoding for the runtime loader
//! - `disassembler`: debug output for bytecode inspection

pub mod chunk;
pub mod disassembler;
pub mod opcode;
pub mod serialize;
pub mod upvalue;

pub use chunk::{
    Chunk, ClassDescriptor, CompiledModule, Constant, EnumDescriptor, FunctionUnit, GlobalInfo,
    MemberDescriptor, MemberKind, VariantDescriptor, UNPATCHED,
};
pub use disassembler::disassemble;
pub use opcode::{Directive, Op};
pub use serialize::{decode_module, encode_module};
pub use upvalue::UpvalueDescriptor;
