//! Capture descriptors for closures.

use std::fmt;

/// Descriptor emitted by the compiler for each upvalue a closure captures.
/// Used at runtime when creating the closure to wire up the captured cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpvalueDescriptor {
    /// A stack slot of the immediately enclosing function.
    Local(u16),
    /// An upvalue of the immediately enclosing function.
    Upvalue(u16),
    /// A global, captured by name.
    Global(String),
}

impl fmt::Display for UpvalueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpvalueDescriptor::Local(slot) => write!(f, "local {}", slot),
            UpvalueDescriptor::Upvalue(index) => write!(f, "upvalue {}", index),
            UpvalueDescriptor::Global(name) => write!(f, "global {}", name),
        }
    }
}
