//! Named type tables.

use ahash::AHashMap;

use crate::types::grammar::TypeLookup;
use crate::types::type_repr::{Primitive, Type};

/// Maps type names to descriptors for one function scope.
#[derive(Debug, Clone, Default)]
pub struct TypeEnvironment {
    names: AHashMap<String, Type>,
}

impl TypeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment pre-populated with every primitive by name.
    pub fn with_builtins() -> Self {
        let mut env = Self::new();
        for primitive in Primitive::ALL {
            env.define(primitive.name(), Type::Primitive(primitive));
        }
        env
    }

    /// Bind `name`, returning whatever it shadowed in this table.
    pub fn define(&mut self, name: impl Into<String>, ty: Type) -> Option<Type> {
        self.names.insert(name.into(), ty)
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.names.get(name)
    }
}

impl TypeLookup for TypeEnvironment {
    fn lookup_type(&self, name: &str) -> Option<Type> {
        self.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtins_cover_every_primitive() {
        let env = TypeEnvironment::with_builtins();
        for primitive in Primitive::ALL {
            assert_eq!(env.get(primitive.name()), Some(&Type::Primitive(primitive)));
        }
        assert_eq!(env.get("catcher"), Some(&Type::Primitive(Primitive::Catcher)));
        assert_eq!(env.get("int"), None);
    }

    #[test]
    fn test_define_shadows_previous_entry() {
        let mut env = TypeEnvironment::new();
        assert_eq!(env.get("Id"), None);
        assert_eq!(env.define("Id", Type::int()), None);
        assert_eq!(env.define("Id", Type::str()), Some(Type::int()));
        assert_eq!(env.lookup_type("Id"), Some(Type::str()));
        assert_eq!(env.get("Other"), None);
    }
}
