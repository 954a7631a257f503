//! Class and enum declarations.

use std::rc::Rc;

use tracing::debug;

use crate::ast::{ClassDecl, ClassMember, EnumDecl};
use crate::bytecode::{
    ClassDescriptor, Constant, EnumDescriptor, MemberDescriptor, MemberKind, Op, VariantDescriptor,
};
use crate::error::CompileError;
use crate::span::Span;
use crate::types::{ClassType, EnumType, EnumVariantType, FunctionType, Type};

use super::compiler::Compiler;
use super::scope::FunctionKind;

impl Compiler {
    /// Compile a class declaration.
    ///
    /// Member types are registered on the class before any code is emitted,
    /// so method bodies see the complete class. The class instruction then
    /// consumes the parent, the member values in reverse declaration order,
    /// the constructor and the generic parameter names.
    pub(crate) fn compile_class(&mut self, decl: &ClassDecl) {
        let span = decl.span;
        let line = span.line;
        let binding = self.reserve_binding(&decl.name, Type::any(), true, span);

        let parent = decl
            .parent
            .as_ref()
            .and_then(|name| self.resolve_parent_class(name, span));
        let class = Rc::new(ClassType::new(&decl.name, parent, decl.generics.clone()));
        self.scope.types.define(decl.name.clone(), Type::Class(class.clone()));
        self.retype_binding(binding, &decl.name, Type::Class(class.clone()));

        self.with_generics(&decl.generics, |c| {
            let signatures = c.declare_members(decl, &class);

            let mut consumed = 0usize;
            if let Some(parent) = &decl.parent {
                c.compile_variable(parent, span);
                consumed += 1;
            }

            for (member, signature) in decl.members.iter().zip(&signatures).rev() {
                match (member, signature) {
                    (ClassMember::Method(method), Some(signature)) => {
                        let kind = if method.is_static {
                            FunctionKind::Function
                        } else {
                            FunctionKind::Method
                        };
                        c.with_generics(&method.function.generics, |c| {
                            c.emit_function(&method.function, kind, signature, Some(&class));
                        });
                    }
                    (ClassMember::Field(field), _) => match &field.initializer {
                        Some(init) => {
                            let ty = c.compile_expr(init);
                            match &field.type_annotation {
                                Some(_) => {
                                    let declared = class_member_type(&class, &field.name, field.is_static);
                                    c.check_assignable(&ty, &declared, init.span);
                                }
                                None => class.add_field(&field.name, ty, field.is_static, field.is_private),
                            }
                        }
                        None => {
                            c.emit(Op::Null, field.span.line);
                        }
                    },
                    (ClassMember::Method(_), None) => {
                        c.emit(Op::Null, line);
                    }
                }
                consumed += 1;
            }

            match (&decl.constructor, class.constructor()) {
                (Some(ctor), Some(signature)) => {
                    c.emit_function(ctor, FunctionKind::Constructor, &signature, Some(&class));
                }
                _ => {
                    c.emit(Op::Null, line);
                }
            }
            consumed += 1;

            for generic in &decl.generics {
                c.emit_constant(Constant::Str(generic.clone()), span);
                consumed += 1;
            }

            let descriptor = ClassDescriptor {
                name: decl.name.clone(),
                has_parent: decl.parent.is_some(),
                has_constructor: decl.constructor.is_some(),
                members: decl.members.iter().map(member_descriptor).collect(),
                generics: decl.generics.clone(),
            };
            debug_assert_eq!(descriptor.stack_inputs(), consumed);
            let idx = c.add_constant(Constant::Class(Rc::new(descriptor)), span);
            let consumed = c.count_operand(consumed, span);
            c.emit(Op::Class(idx, consumed), line);
        });

        self.complete_binding(binding, line);
        debug!(class = %decl.name, members = decl.members.len(), "compiled class");
    }

    /// Register every member's static type on the class. Returns the
    /// method signatures, aligned with `decl.members`.
    fn declare_members(&mut self, decl: &ClassDecl, class: &Rc<ClassType>) -> Vec<Option<Rc<FunctionType>>> {
        let mut signatures = Vec::with_capacity(decl.members.len());
        for member in &decl.members {
            match member {
                ClassMember::Field(field) => {
                    let ty = self
                        .optional_annotation(field.type_annotation.as_ref(), field.span)
                        .unwrap_or_else(Type::any);
                    class.add_field(&field.name, ty, field.is_static, field.is_private);
                    signatures.push(None);
                }
                ClassMember::Method(method) => {
                    let function = &method.function;
                    let signature =
                        Rc::new(self.with_generics(&function.generics, |c| c.function_signature(function)));
                    class.add_field(
                        &function.name,
                        Type::Function(signature.clone()),
                        method.is_static,
                        method.is_private,
                    );
                    if method.is_operator {
                        class.add_operator(&function.name, signature.clone());
                    }
                    signatures.push(Some(signature));
                }
            }
        }

        if let Some(ctor) = &decl.constructor {
            let mut signature = self.with_generics(&ctor.generics, |c| c.function_signature(ctor));
            signature.return_type = class.self_instance();
            class.set_constructor(Rc::new(signature));
        }
        signatures
    }

    fn resolve_parent_class(&mut self, name: &str, span: Span) -> Option<Rc<ClassType>> {
        use crate::types::TypeLookup;

        match self.lookup_type(name) {
            Some(Type::Class(class)) => Some(class),
            Some(other) => {
                self.report(CompileError::type_mismatch("class", &other, span));
                None
            }
            None => {
                self.report(CompileError::UnknownType {
                    name: name.to_string(),
                    span,
                });
                None
            }
        }
    }

    /// Compile an enum declaration into an enum object.
    pub(crate) fn compile_enum(&mut self, decl: &EnumDecl) {
        let span = decl.span;
        let line = span.line;
        let binding = self.reserve_binding(&decl.name, Type::any(), true, span);

        let enum_ty = Rc::new(EnumType::new(&decl.name));
        self.scope.types.define(decl.name.clone(), Type::Enum(enum_ty.clone()));
        self.retype_binding(binding, &decl.name, Type::Enum(enum_ty.clone()));

        let mut variants = Vec::with_capacity(decl.variants.len());
        for (ordinal, variant) in decl.variants.iter().enumerate() {
            let field_types = self.with_generics(&variant.generics, |c| {
                variant
                    .fields
                    .iter()
                    .map(|field| c.resolve_annotation(&field.type_annotation, variant.span))
                    .collect()
            });
            let field_names: Vec<String> = variant.fields.iter().map(|f| f.name.clone()).collect();
            enum_ty.add_variant(Rc::new(EnumVariantType {
                enum_name: decl.name.clone(),
                name: variant.name.clone(),
                ordinal,
                generics: variant.generics.clone(),
                field_names: field_names.clone(),
                field_types,
            }));
            variants.push(VariantDescriptor {
                name: variant.name.clone(),
                params: field_names,
            });
        }

        let descriptor = EnumDescriptor {
            name: decl.name.clone(),
            variants,
        };
        let idx = self.add_constant(Constant::Enum(Rc::new(descriptor)), span);
        self.emit(Op::Enum(idx), line);
        self.complete_binding(binding, line);

        if decl.is_public {
            for variant in &decl.variants {
                self.load_binding(binding, line);
                let idx = self.name_constant(&variant.name, variant.span);
                self.emit(Op::GetAttr(idx), line);
                self.emit(Op::DefineGlobal(idx), line);
                let ty = enum_ty
                    .variant(&variant.name)
                    .map(Type::EnumVariant)
                    .unwrap_or_else(Type::any);
                self.define_global(&variant.name, ty, true);
            }
        }
        debug!(name = %decl.name, variants = decl.variants.len(), "compiled enum");
    }
}

fn class_member_type(class: &ClassType, name: &str, is_static: bool) -> Type {
    let ty = if is_static {
        class.static_field(name)
    } else {
        class.field(name)
    };
    ty.unwrap_or_else(Type::any)
}

fn member_descriptor(member: &ClassMember) -> MemberDescriptor {
    match member {
        ClassMember::Field(field) => MemberDescriptor {
            name: field.name.clone(),
            kind: MemberKind::Field,
            is_static: field.is_static,
            is_private: field.is_private,
            is_operator: false,
        },
        ClassMember::Method(method) => MemberDescriptor {
            name: method.function.name.clone(),
            kind: MemberKind::Method,
            is_static: method.is_static,
            is_private: method.is_private,
            is_operator: method.is_operator,
        },
    }
}
