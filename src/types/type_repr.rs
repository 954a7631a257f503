//! Type descriptors used by the compiler's static checks.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::ast::{BinaryOp, UnaryOp};

/// Built-in primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    List,
    Map,
    Void,
    Any,
    Bytes,
    /// The result object of a function declared to catch its own errors.
    Catcher,
}

impl Primitive {
    pub const ALL: [Primitive; 18] = [
        Primitive::I8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::U8,
        Primitive::U16,
        Primitive::U32,
        Primitive::U64,
        Primitive::F32,
        Primitive::F64,
        Primitive::Bool,
        Primitive::Str,
        Primitive::List,
        Primitive::Map,
        Primitive::Void,
        Primitive::Any,
        Primitive::Bytes,
        Primitive::Catcher,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Bool => "bool",
            Primitive::Str => "str",
            Primitive::List => "list",
            Primitive::Map => "map",
            Primitive::Void => "void",
            Primitive::Any => "any",
            Primitive::Bytes => "bytes",
            Primitive::Catcher => "catcher",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Primitive::I8 | Primitive::I16 | Primitive::I32 | Primitive::I64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Primitive::U8 | Primitive::U16 | Primitive::U32 | Primitive::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

/// Implicit primitive conversions `(from, to)`. Identity is always allowed
/// and not listed. Nothing narrows, and no float converts to an integer.
pub const IMPLICIT_WIDENINGS: &[(Primitive, Primitive)] = &[
    // signed to wider signed
    (Primitive::I8, Primitive::I16),
    (Primitive::I8, Primitive::I32),
    (Primitive::I8, Primitive::I64),
    (Primitive::I16, Primitive::I32),
    (Primitive::I16, Primitive::I64),
    (Primitive::I32, Primitive::I64),
    // unsigned to wider unsigned
    (Primitive::U8, Primitive::U16),
    (Primitive::U8, Primitive::U32),
    (Primitive::U8, Primitive::U64),
    (Primitive::U16, Primitive::U32),
    (Primitive::U16, Primitive::U64),
    (Primitive::U32, Primitive::U64),
    // unsigned to strictly wider signed
    (Primitive::U8, Primitive::I16),
    (Primitive::U8, Primitive::I32),
    (Primitive::U8, Primitive::I64),
    (Primitive::U16, Primitive::I32),
    (Primitive::U16, Primitive::I64),
    (Primitive::U32, Primitive::I64),
    // integers to floats
    (Primitive::I8, Primitive::F32),
    (Primitive::I16, Primitive::F32),
    (Primitive::I32, Primitive::F32),
    (Primitive::I64, Primitive::F32),
    (Primitive::U8, Primitive::F32),
    (Primitive::U16, Primitive::F32),
    (Primitive::U32, Primitive::F32),
    (Primitive::U64, Primitive::F32),
    (Primitive::I8, Primitive::F64),
    (Primitive::I16, Primitive::F64),
    (Primitive::I32, Primitive::F64),
    (Primitive::I64, Primitive::F64),
    (Primitive::U8, Primitive::F64),
    (Primitive::U16, Primitive::F64),
    (Primitive::U32, Primitive::F64),
    (Primitive::U64, Primitive::F64),
    (Primitive::F32, Primitive::F64),
];

pub fn widens_to(from: Primitive, to: Primitive) -> bool {
    from == to || IMPLICIT_WIDENINGS.contains(&(from, to))
}

/// Internal representation of types.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Primitive(Primitive),
    Tuple(Vec<Type>),
    /// `[T]`: a mutable reference cell.
    Reference(Box<Type>),
    /// An unbound generic placeholder.
    Generic(String),
    /// The class object itself (what a class name evaluates to).
    Class(Rc<ClassType>),
    /// An instance of a class with its generic arguments.
    Instance(Rc<ClassType>, Vec<Type>),
    Function(Rc<FunctionType>),
    Enum(Rc<EnumType>),
    EnumVariant(Rc<EnumVariantType>),
}

impl Type {
    pub fn any() -> Self {
        Type::Primitive(Primitive::Any)
    }

    pub fn void() -> Self {
        Type::Primitive(Primitive::Void)
    }

    pub fn bool() -> Self {
        Type::Primitive(Primitive::Bool)
    }

    pub fn int() -> Self {
        Type::Primitive(Primitive::I64)
    }

    pub fn float() -> Self {
        Type::Primitive(Primitive::F64)
    }

    pub fn str() -> Self {
        Type::Primitive(Primitive::Str)
    }

    pub fn list() -> Self {
        Type::Primitive(Primitive::List)
    }

    pub fn map() -> Self {
        Type::Primitive(Primitive::Map)
    }

    pub fn function(function: FunctionType) -> Self {
        Type::Function(Rc::new(function))
    }

    /// `any` and unbound generics are compatible with everything.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Any) | Type::Generic(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Void))
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    /// Check if a value of this type can be stored where `target` is expected.
    pub fn is_assignable_to(&self, target: &Type) -> bool {
        if self.is_dynamic() || target.is_dynamic() {
            return true;
        }
        match (self, target) {
            (Type::Primitive(from), Type::Primitive(to)) => widens_to(*from, *to),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_assignable_to(y))
            }
            // Tuples and lists interconvert freely at runtime.
            (Type::Tuple(_), Type::Primitive(Primitive::List)) => true,
            // References are invariant.
            (Type::Reference(a), Type::Reference(b)) => {
                a.is_assignable_to(b) && b.is_assignable_to(a)
            }
            (Type::Class(a), Type::Class(b)) => a.is_subclass_of(b),
            (Type::Instance(a, args_a), Type::Instance(b, args_b)) => {
                if !a.is_subclass_of(b) {
                    return false;
                }
                if a.name != b.name {
                    return true;
                }
                args_a.len() == args_b.len()
                    && args_a.iter().zip(args_b).all(|(x, y)| x.is_assignable_to(y))
            }
            (Type::Function(f), Type::Function(g)) => f.is_assignable_to(g),
            (Type::Enum(a), Type::Enum(b)) => a.name == b.name,
            (Type::EnumVariant(v), Type::Enum(e)) => v.enum_name == e.name,
            (Type::EnumVariant(a), Type::EnumVariant(b)) => {
                a.enum_name == b.enum_name && a.name == b.name
            }
            _ => false,
        }
    }

    /// Result type of `self <op> rhs`, or `None` if the operands don't mix.
    pub fn binary_result(&self, op: BinaryOp, rhs: &Type) -> Option<Type> {
        if let Type::Instance(class, args) = self {
            if let Some(method) = class.operator(op.symbol()) {
                if let Some(param) = method.params.first() {
                    let param = param.substitute(&class.bind_generics(args));
                    if !rhs.is_assignable_to(&param) {
                        return None;
                    }
                }
                return Some(method.return_type.substitute(&class.bind_generics(args)));
            }
        }
        if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual) {
            return Some(Type::bool());
        }
        if self.is_dynamic() || rhs.is_dynamic() {
            return Some(if op.is_comparison() {
                Type::bool()
            } else {
                Type::any()
            });
        }
        let (a, b) = (self.primitive()?, rhs.primitive()?);
        let wider = wider_numeric(a, b);
        if op.is_comparison() {
            return match (a, b) {
                _ if wider.is_some() => Some(Type::bool()),
                (Primitive::Str, Primitive::Str) => Some(Type::bool()),
                _ => None,
            };
        }
        if op.is_bitwise() {
            return match wider {
                Some(w) if w.is_integer() => Some(Type::Primitive(w)),
                _ => None,
            };
        }
        match (op, a, b) {
            (_, _, _) if wider.is_some() => wider.map(Type::Primitive),
            (BinaryOp::Add, Primitive::Str, Primitive::Str) => Some(Type::str()),
            (BinaryOp::Add, Primitive::List, Primitive::List) => Some(Type::list()),
            (BinaryOp::Add, Primitive::Bytes, Primitive::Bytes) => {
                Some(Type::Primitive(Primitive::Bytes))
            }
            (BinaryOp::Multiply, Primitive::Str, p) if p.is_integer() => Some(Type::str()),
            _ => None,
        }
    }

    /// Result type of `<op> self`.
    pub fn unary_result(&self, op: UnaryOp) -> Option<Type> {
        match op {
            UnaryOp::Not => Some(Type::bool()),
            _ if self.is_dynamic() => Some(Type::any()),
            UnaryOp::Negate => match self.primitive() {
                Some(p) if p.is_numeric() => Some(self.clone()),
                _ => None,
            },
            UnaryOp::BitNot => match self.primitive() {
                Some(p) if p.is_integer() => Some(self.clone()),
                _ => None,
            },
        }
    }

    /// The common type of two branches that produce a value.
    pub fn unify(&self, other: &Type) -> Type {
        if self == other {
            return self.clone();
        }
        if self.is_dynamic() || other.is_dynamic() {
            return Type::any();
        }
        if other.is_assignable_to(self) {
            return self.clone();
        }
        if self.is_assignable_to(other) {
            return other.clone();
        }
        Type::any()
    }

    /// Replace generic placeholders with their bound types.
    pub fn substitute(&self, bindings: &[(String, Type)]) -> Type {
        if bindings.is_empty() {
            return self.clone();
        }
        match self {
            Type::Generic(name) => bindings
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, ty)| ty.clone())
                .unwrap_or_else(|| self.clone()),
            Type::Tuple(items) => Type::Tuple(items.iter().map(|t| t.substitute(bindings)).collect()),
            Type::Reference(inner) => Type::Reference(Box::new(inner.substitute(bindings))),
            Type::Instance(class, args) => Type::Instance(
                class.clone(),
                args.iter().map(|t| t.substitute(bindings)).collect(),
            ),
            Type::Function(f) => Type::Function(Rc::new(f.substitute(bindings))),
            _ => self.clone(),
        }
    }

    /// Collect generic bindings by matching `self` (a parameter type) against
    /// the type of an actual argument. First binding wins.
    pub fn infer_bindings(&self, actual: &Type, bindings: &mut Vec<(String, Type)>) {
        match (self, actual) {
            (Type::Generic(name), _) => {
                if !actual.is_dynamic() && !bindings.iter().any(|(n, _)| n == name) {
                    bindings.push((name.clone(), actual.clone()));
                }
            }
            (Type::Tuple(a), Type::Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    x.infer_bindings(y, bindings);
                }
            }
            (Type::Reference(a), Type::Reference(b)) => a.infer_bindings(b, bindings),
            (Type::Instance(_, a), Type::Instance(_, b)) => {
                for (x, y) in a.iter().zip(b) {
                    x.infer_bindings(y, bindings);
                }
            }
            _ => {}
        }
    }
}

fn wider_numeric(a: Primitive, b: Primitive) -> Option<Primitive> {
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }
    if widens_to(a, b) {
        Some(b)
    } else if widens_to(b, a) {
        Some(a)
    } else {
        None
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{}", p.name()),
            Type::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Type::Reference(inner) => write!(f, "[{}]", inner),
            Type::Generic(name) => write!(f, "{}", name),
            Type::Class(class) => write!(f, "{}", class.name),
            Type::Instance(class, args) => {
                write!(f, "{}", class.name)?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    write_list(f, args)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            Type::Function(function) => write!(f, "{}", function),
            Type::Enum(e) => write!(f, "{}", e.name),
            Type::EnumVariant(v) => write!(f, "{}.{}", v.enum_name, v.name),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Type]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Signature of a callable.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub return_type: Type,
    pub params: Vec<Type>,
    pub generics: Vec<String>,
    /// The last entry of `params` is the element type of a `*rest` parameter.
    pub has_varargs: bool,
    /// The trailing `default_count` entries of `params` may be omitted.
    pub default_count: usize,
}

impl FunctionType {
    pub fn new(params: Vec<Type>, return_type: Type) -> Self {
        Self {
            return_type,
            params,
            generics: Vec::new(),
            has_varargs: false,
            default_count: 0,
        }
    }

    pub fn required_arity(&self) -> usize {
        let fixed = self.params.len() - usize::from(self.has_varargs);
        fixed - self.default_count.min(fixed)
    }

    pub fn accepts(&self, count: usize) -> bool {
        if count < self.required_arity() {
            return false;
        }
        self.has_varargs || count <= self.params.len()
    }

    /// Declared type of the parameter receiving the `index`-th argument.
    pub fn param_for(&self, index: usize) -> Option<&Type> {
        if self.has_varargs && index + 1 >= self.params.len() {
            return self.params.last();
        }
        self.params.get(index)
    }

    pub fn expected_arity(&self) -> String {
        let required = self.required_arity();
        if self.has_varargs {
            format!("at least {}", required)
        } else if required == self.params.len() {
            required.to_string()
        } else {
            format!("{} to {}", required, self.params.len())
        }
    }

    fn is_assignable_to(&self, target: &FunctionType) -> bool {
        if self.params.len() != target.params.len() || self.has_varargs != target.has_varargs {
            return false;
        }
        target
            .params
            .iter()
            .zip(&self.params)
            .all(|(t, s)| t.is_assignable_to(s))
            && self.return_type.is_assignable_to(&target.return_type)
    }

    fn substitute(&self, bindings: &[(String, Type)]) -> FunctionType {
        FunctionType {
            return_type: self.return_type.substitute(bindings),
            params: self.params.iter().map(|t| t.substitute(bindings)).collect(),
            generics: self.generics.clone(),
            has_varargs: self.has_varargs,
            default_count: self.default_count,
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<", self.return_type)?;
        let optional_from = self.params.len() - self.default_count.min(self.params.len());
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
            if self.has_varargs && i + 1 == self.params.len() {
                write!(f, "*")?;
            } else if i >= optional_from {
                write!(f, "?")?;
            }
        }
        write!(f, ">")
    }
}

/// A class's static shape.
///
/// Members are filled in after the class is registered so that method
/// signatures and bodies can mention the class itself.
pub struct ClassType {
    pub name: String,
    pub parent: Option<Rc<ClassType>>,
    pub generics: Vec<String>,
    fields: RefCell<IndexMap<String, Type>>,
    static_fields: RefCell<IndexMap<String, Type>>,
    operators: RefCell<IndexMap<String, Rc<FunctionType>>>,
    private: RefCell<AHashSet<String>>,
    constructor: RefCell<Option<Rc<FunctionType>>>,
}

impl ClassType {
    pub fn new(name: impl Into<String>, parent: Option<Rc<ClassType>>, generics: Vec<String>) -> Self {
        Self {
            name: name.into(),
            parent,
            generics,
            fields: RefCell::new(IndexMap::new()),
            static_fields: RefCell::new(IndexMap::new()),
            operators: RefCell::new(IndexMap::new()),
            private: RefCell::new(AHashSet::new()),
            constructor: RefCell::new(None),
        }
    }

    pub fn add_field(&self, name: &str, ty: Type, is_static: bool, is_private: bool) {
        if is_static {
            self.static_fields.borrow_mut().insert(name.to_string(), ty);
        } else {
            self.fields.borrow_mut().insert(name.to_string(), ty);
        }
        if is_private {
            self.private.borrow_mut().insert(name.to_string());
        }
    }

    pub fn add_operator(&self, symbol: &str, signature: Rc<FunctionType>) {
        self.operators
            .borrow_mut()
            .insert(symbol.to_string(), signature);
    }

    pub fn set_constructor(&self, signature: Rc<FunctionType>) {
        *self.constructor.borrow_mut() = Some(signature);
    }

    /// Instance attribute type, walking the parent chain.
    pub fn field(&self, name: &str) -> Option<Type> {
        if let Some(ty) = self.fields.borrow().get(name) {
            return Some(ty.clone());
        }
        self.parent.as_ref().and_then(|p| p.field(name))
    }

    pub fn static_field(&self, name: &str) -> Option<Type> {
        if let Some(ty) = self.static_fields.borrow().get(name) {
            return Some(ty.clone());
        }
        self.parent.as_ref().and_then(|p| p.static_field(name))
    }

    pub fn operator(&self, symbol: &str) -> Option<Rc<FunctionType>> {
        if let Some(sig) = self.operators.borrow().get(symbol) {
            return Some(sig.clone());
        }
        self.parent.as_ref().and_then(|p| p.operator(symbol))
    }

    /// Constructor signature; inherited when the class declares none.
    pub fn constructor(&self) -> Option<Rc<FunctionType>> {
        if let Some(sig) = self.constructor.borrow().as_ref() {
            return Some(sig.clone());
        }
        self.parent.as_ref().and_then(|p| p.constructor())
    }

    /// Name of the class in the chain that declares `name` as private.
    pub fn private_owner(&self, name: &str) -> Option<&str> {
        let declared_here =
            self.fields.borrow().contains_key(name) || self.static_fields.borrow().contains_key(name);
        if declared_here {
            return self
                .private
                .borrow()
                .contains(name)
                .then_some(self.name.as_str());
        }
        self.parent.as_ref().and_then(|p| p.private_owner(name))
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.borrow().keys().cloned().collect()
    }

    pub fn is_subclass_of(&self, other: &ClassType) -> bool {
        if self.name == other.name {
            return true;
        }
        self.parent
            .as_ref()
            .map(|p| p.is_subclass_of(other))
            .unwrap_or(false)
    }

    /// Pair each generic parameter with the matching instance argument.
    pub fn bind_generics(&self, args: &[Type]) -> Vec<(String, Type)> {
        self.generics
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect()
    }

    /// Instance type with every generic parameter left as a placeholder.
    pub fn self_instance(self: &Rc<Self>) -> Type {
        Type::Instance(
            self.clone(),
            self.generics.iter().map(|g| Type::Generic(g.clone())).collect(),
        )
    }
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassType")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .field("generics", &self.generics)
            .field("fields", &self.field_names())
            .finish()
    }
}

impl PartialEq for ClassType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// An enum and its variants.
pub struct EnumType {
    pub name: String,
    variants: RefCell<IndexMap<String, Rc<EnumVariantType>>>,
}

impl EnumType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: RefCell::new(IndexMap::new()),
        }
    }

    pub fn add_variant(&self, variant: Rc<EnumVariantType>) {
        self.variants
            .borrow_mut()
            .insert(variant.name.clone(), variant);
    }

    pub fn variant(&self, name: &str) -> Option<Rc<EnumVariantType>> {
        self.variants.borrow().get(name).cloned()
    }

    fn variant_names(&self) -> Vec<String> {
        self.variants.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for EnumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumType")
            .field("name", &self.name)
            .field("variants", &self.variant_names())
            .finish()
    }
}

impl PartialEq for EnumType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// One variant: its ordinal, generics and typed payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariantType {
    pub enum_name: String,
    pub name: String,
    pub ordinal: usize,
    pub generics: Vec<String>,
    pub field_names: Vec<String>,
    pub field_types: Vec<Type>,
}

impl EnumVariantType {
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.field_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.field_types[i])
    }
}
