//! Flat integer-stream encoding of compiled modules.
//!
//! ```text
//! module   := MAGIC VERSION KIND_MODULE str(source_name) unit(main)
//! unit     := str(name) arity total_arity default_count flags names(params)
//!             count upvalue* chunk
//! chunk    := opt_str(package) opt_str(export_target) opt_str(entry_point)
//!             names(exports) optimize
//!             count constant* count global* count op* count line*
//! str      := len code_point*
//! opt_str  := -1 | str
//! ```
//!
//! Floats are stored as their IEEE-754 bit pattern.

use std::rc::Rc;

use indexmap::IndexMap;

use super::chunk::{
    Chunk, ClassDescriptor, CompiledModule, Constant, EnumDescriptor, FunctionUnit, GlobalInfo,
    MemberDescriptor, MemberKind, VariantDescriptor,
};
use super::opcode::Op;
use super::upvalue::UpvalueDescriptor;
use crate::error::DecodeError;

/// "STRN"
pub const MAGIC: i64 = 0x5354_524E;
pub const FORMAT_VERSION: i64 = 1;
const KIND_MODULE: i64 = 1;

const FLAG_VARARGS: i64 = 1;
const FLAG_KWARGS: i64 = 2;
const FLAG_ASYNC: i64 = 4;
const FLAG_CATCHES: i64 = 8;
const FLAG_METHOD: i64 = 16;

const MEMBER_STATIC: i64 = 1;
const MEMBER_PRIVATE: i64 = 2;
const MEMBER_OPERATOR: i64 = 4;

/// Encode a module as a self-describing integer stream.
pub fn encode_module(module: &CompiledModule) -> Vec<i64> {
    let mut enc = Encoder::default();
    enc.out.extend([MAGIC, FORMAT_VERSION, KIND_MODULE]);
    enc.string(&module.source_name);
    enc.unit(&module.main);
    enc.out
}

/// Decode a stream produced by [`encode_module`].
pub fn decode_module(data: &[i64]) -> Result<CompiledModule, DecodeError> {
    let mut dec = Decoder { data, pos: 0 };
    let magic = dec.next()?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version = dec.next()?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let kind = dec.next()?;
    if kind != KIND_MODULE {
        return Err(DecodeError::InvalidTag {
            what: "stream kind",
            tag: kind,
            position: 2,
        });
    }
    let source_name = dec.string()?;
    let main = Rc::new(dec.unit()?);
    Ok(CompiledModule { source_name, main })
}

#[derive(Default)]
struct Encoder {
    out: Vec<i64>,
}

impl Encoder {
    fn int(&mut self, value: impl Into<i64>) {
        self.out.push(value.into());
    }

    fn count(&mut self, n: usize) {
        self.out.push(n as i64);
    }

    fn flag(&mut self, value: bool) {
        self.out.push(i64::from(value));
    }

    fn string(&mut self, s: &str) {
        self.count(s.chars().count());
        self.out.extend(s.chars().map(|c| i64::from(u32::from(c))));
    }

    fn opt_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => self.string(s),
            None => self.out.push(-1),
        }
    }

    fn names(&mut self, names: &[String]) {
        self.count(names.len());
        for name in names {
            self.string(name);
        }
    }

    fn unit(&mut self, unit: &FunctionUnit) {
        self.string(&unit.name);
        self.int(unit.arity);
        self.int(unit.total_arity);
        self.int(unit.default_count);
        let mut flags = 0;
        for (set, bit) in [
            (unit.has_varargs, FLAG_VARARGS),
            (unit.has_kwargs, FLAG_KWARGS),
            (unit.is_async, FLAG_ASYNC),
            (unit.catches_result, FLAG_CATCHES),
            (unit.is_method, FLAG_METHOD),
        ] {
            if set {
                flags |= bit;
            }
        }
        self.int(flags);
        self.names(&unit.param_names);
        self.count(unit.upvalues.len());
        for upvalue in &unit.upvalues {
            match upvalue {
                UpvalueDescriptor::Local(slot) => {
                    self.int(0);
                    self.int(*slot);
                }
                UpvalueDescriptor::Upvalue(index) => {
                    self.int(1);
                    self.int(*index);
                }
                UpvalueDescriptor::Global(name) => {
                    self.int(2);
                    self.string(name);
                }
            }
        }
        self.chunk(&unit.chunk);
    }

    fn chunk(&mut self, chunk: &Chunk) {
        self.opt_string(chunk.package.as_deref());
        self.opt_string(chunk.export_target.as_deref());
        self.opt_string(chunk.entry_point.as_deref());
        self.names(&chunk.exports);
        self.flag(chunk.optimize);

        self.count(chunk.constants.len());
        for constant in &chunk.constants {
            self.constant(constant);
        }

        self.count(chunk.globals.len());
        for (name, info) in &chunk.globals {
            self.string(name);
            self.string(&info.type_name);
            self.flag(info.is_const);
        }

        self.count(chunk.code.len());
        for op in &chunk.code {
            op.encode(&mut self.out);
        }

        self.count(chunk.lines.len());
        for line in &chunk.lines {
            self.count(*line);
        }
    }

    fn constant(&mut self, constant: &Constant) {
        match constant {
            Constant::Int(n) => {
                self.int(0);
                self.int(*n);
            }
            Constant::Float(f) => {
                self.int(1);
                self.int(f.to_bits() as i64);
            }
            Constant::Str(s) => {
                self.int(2);
                self.string(s);
            }
            Constant::Names(names) => {
                self.int(3);
                self.names(names);
            }
            Constant::Function(unit) => {
                self.int(4);
                self.unit(unit);
            }
            Constant::Class(desc) => {
                self.int(5);
                self.string(&desc.name);
                self.flag(desc.has_parent);
                self.flag(desc.has_constructor);
                self.count(desc.members.len());
                for member in &desc.members {
                    self.string(&member.name);
                    self.int(match member.kind {
                        MemberKind::Field => 0,
                        MemberKind::Method => 1,
                    });
                    let mut flags = 0;
                    if member.is_static {
                        flags |= MEMBER_STATIC;
                    }
                    if member.is_private {
                        flags |= MEMBER_PRIVATE;
                    }
                    if member.is_operator {
                        flags |= MEMBER_OPERATOR;
                    }
                    self.int(flags);
                }
                self.names(&desc.generics);
            }
            Constant::Enum(desc) => {
                self.int(6);
                self.string(&desc.name);
                self.count(desc.variants.len());
                for variant in &desc.variants {
                    self.string(&variant.name);
                    self.names(&variant.params);
                }
            }
        }
    }
}

struct Decoder<'a> {
    data: &'a [i64],
    pos: usize,
}

impl Decoder<'_> {
    fn next(&mut self) -> Result<i64, DecodeError> {
        let value = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEnd(self.pos))?;
        self.pos += 1;
        Ok(value)
    }

    fn ranged<T: TryFrom<i64>>(&mut self, what: &'static str) -> Result<T, DecodeError> {
        let position = self.pos;
        let value = self.next()?;
        T::try_from(value).map_err(|_| DecodeError::OutOfRange {
            what,
            value,
            position,
        })
    }

    fn count(&mut self) -> Result<usize, DecodeError> {
        let n: usize = self.ranged("count")?;
        // Every counted item takes at least one slot.
        if n > self.data.len() - self.pos {
            return Err(DecodeError::UnexpectedEnd(self.data.len()));
        }
        Ok(n)
    }

    fn flag(&mut self) -> Result<bool, DecodeError> {
        let position = self.pos;
        match self.next()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::OutOfRange {
                what: "flag",
                value: other,
                position,
            }),
        }
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.count()?;
        let mut s = String::with_capacity(len);
        for _ in 0..len {
            let position = self.pos;
            let value = self.next()?;
            let c = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or(DecodeError::OutOfRange {
                    what: "code point",
                    value,
                    position,
                })?;
            s.push(c);
        }
        Ok(s)
    }

    fn opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        if self.data.get(self.pos) == Some(&-1) {
            self.pos += 1;
            return Ok(None);
        }
        self.string().map(Some)
    }

    fn names(&mut self) -> Result<Vec<String>, DecodeError> {
        let n = self.count()?;
        (0..n).map(|_| self.string()).collect()
    }

    fn unit(&mut self) -> Result<FunctionUnit, DecodeError> {
        let mut unit = FunctionUnit::new(self.string()?);
        unit.arity = self.ranged("arity")?;
        unit.total_arity = self.ranged("arity")?;
        unit.default_count = self.ranged("default count")?;
        let flags = self.next()?;
        unit.has_varargs = flags & FLAG_VARARGS != 0;
        unit.has_kwargs = flags & FLAG_KWARGS != 0;
        unit.is_async = flags & FLAG_ASYNC != 0;
        unit.catches_result = flags & FLAG_CATCHES != 0;
        unit.is_method = flags & FLAG_METHOD != 0;
        unit.param_names = self.names()?;

        let upvalue_count = self.count()?;
        for _ in 0..upvalue_count {
            let position = self.pos;
            let descriptor = match self.next()? {
                0 => UpvalueDescriptor::Local(self.ranged("upvalue slot")?),
                1 => UpvalueDescriptor::Upvalue(self.ranged("upvalue index")?),
                2 => UpvalueDescriptor::Global(self.string()?),
                tag => {
                    return Err(DecodeError::InvalidTag {
                        what: "upvalue",
                        tag,
                        position,
                    })
                }
            };
            unit.upvalues.push(descriptor);
        }
        unit.chunk = self.chunk()?;
        Ok(unit)
    }

    fn chunk(&mut self) -> Result<Chunk, DecodeError> {
        let mut chunk = Chunk::new();
        chunk.package = self.opt_string()?;
        chunk.export_target = self.opt_string()?;
        chunk.entry_point = self.opt_string()?;
        chunk.exports = self.names()?;
        chunk.optimize = self.flag()?;

        let constant_count = self.count()?;
        for _ in 0..constant_count {
            let constant = self.constant()?;
            chunk.constants.push(constant);
        }

        let global_count = self.count()?;
        let mut globals = IndexMap::with_capacity(global_count);
        for _ in 0..global_count {
            let name = self.string()?;
            let type_name = self.string()?;
            let is_const = self.flag()?;
            globals.insert(name, GlobalInfo { type_name, is_const });
        }
        chunk.globals = globals;

        let op_count = self.count()?;
        for _ in 0..op_count {
            let position = self.pos;
            let tag = self.next()?;
            let op = Op::decode(tag, position, || self.next())?;
            chunk.code.push(op);
        }

        let line_count = self.count()?;
        for _ in 0..line_count {
            let line = self.ranged("line")?;
            chunk.lines.push(line);
        }
        Ok(chunk)
    }

    fn constant(&mut self) -> Result<Constant, DecodeError> {
        let position = self.pos;
        let constant = match self.next()? {
            0 => Constant::Int(self.next()?),
            1 => Constant::Float(f64::from_bits(self.next()? as u64)),
            2 => Constant::Str(self.string()?),
            3 => Constant::Names(self.names()?),
            4 => Constant::Function(Rc::new(self.unit()?)),
            5 => {
                let name = self.string()?;
                let has_parent = self.flag()?;
                let has_constructor = self.flag()?;
                let member_count = self.count()?;
                let mut members = Vec::with_capacity(member_count);
                for _ in 0..member_count {
                    let name = self.string()?;
                    let kind_position = self.pos;
                    let kind = match self.next()? {
                        0 => MemberKind::Field,
                        1 => MemberKind::Method,
                        tag => {
                            return Err(DecodeError::InvalidTag {
                                what: "member kind",
                                tag,
                                position: kind_position,
                            })
                        }
                    };
                    let flags = self.next()?;
                    members.push(MemberDescriptor {
                        name,
                        kind,
                        is_static: flags & MEMBER_STATIC != 0,
                        is_private: flags & MEMBER_PRIVATE != 0,
                        is_operator: flags & MEMBER_OPERATOR != 0,
                    });
                }
                let generics = self.names()?;
                Constant::Class(Rc::new(ClassDescriptor {
                    name,
                    has_parent,
                    has_constructor,
                    members,
                    generics,
                }))
            }
            6 => {
                let name = self.string()?;
                let variant_count = self.count()?;
                let mut variants = Vec::with_capacity(variant_count);
                for _ in 0..variant_count {
                    let name = self.string()?;
                    let params = self.names()?;
                    variants.push(VariantDescriptor { name, params });
                }
                Constant::Enum(Rc::new(EnumDescriptor { name, variants }))
            }
            tag => {
                return Err(DecodeError::InvalidTag {
                    what: "constant",
                    tag,
                    position,
                })
            }
        };
        Ok(constant)
    }
}
