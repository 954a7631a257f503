//! Type system module for Strand.

pub mod environment;
pub mod grammar;
pub mod type_repr;

pub use environment::TypeEnvironment;
pub use grammar::{parse_type, TypeLookup};
pub use type_repr::{
    ClassType, EnumType, EnumVariantType, FunctionType, Primitive, Type, IMPLICIT_WIDENINGS,
};
