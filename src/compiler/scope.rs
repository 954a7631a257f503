//! Function scopes, locals, captures and name resolution.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::ast::Expr;
use crate::bytecode::{FunctionUnit, Op, UpvalueDescriptor};
use crate::error::CompileError;
use crate::span::Span;
use crate::types::{ClassType, Type, TypeEnvironment};

use super::compiler::Compiler;

/// Handle to a function scope in the compiler's scope arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(pub usize);

/// Tracks what kind of function unit is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Module,
    Function,
    Method,
    Constructor,
    Lambda,
    /// Zero-argument closure wrapping a switch, match or scope literal.
    Block,
}

/// A local variable tracked during compilation.
#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub ty: Type,
    pub depth: u32,
    /// Stack slot, relative to the frame base.
    pub slot: u16,
    pub is_const: bool,
    /// Explicitly dropped: keeps its slot but no longer resolves.
    pub dropped: bool,
}

/// A `macro` definition, visible until its block closes.
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub value: Expr,
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub struct CapturedUpvalue {
    pub descriptor: UpvalueDescriptor,
    pub ty: Type,
    pub is_const: bool,
}

#[derive(Debug, Clone)]
pub struct GlobalBinding {
    pub ty: Type,
    pub is_const: bool,
    /// Supplied by the host; not part of the module's globals table.
    pub is_host: bool,
}

#[derive(Debug, Clone)]
pub struct LoopContext {
    pub start: usize,
    /// Stack height at the top of each iteration.
    pub base_height: usize,
    /// Backward target for `continue`, when known up front.
    pub continue_target: Option<usize>,
    pub continue_patches: Vec<usize>,
    pub break_patches: Vec<usize>,
}

/// The class whose body encloses the code being compiled.
#[derive(Debug, Clone)]
pub struct ClassContext {
    pub class: Rc<ClassType>,
}

/// Everything the compiler knows about one function unit under construction.
#[derive(Debug)]
pub struct FunctionScope {
    pub unit: FunctionUnit,
    pub kind: FunctionKind,
    pub enclosing: Option<ScopeId>,
    pub locals: Vec<Local>,
    /// Generic placeholders currently in scope, innermost last.
    pub generic_bindings: Vec<(String, Type)>,
    pub upvalues: Vec<CapturedUpvalue>,
    pub globals: IndexMap<String, GlobalBinding>,
    pub types: TypeEnvironment,
    pub macros: Vec<MacroDef>,
    pub scope_depth: u32,
    /// Exact operand stack height at the current emission point.
    pub stack_height: usize,
    pub loops: Vec<LoopContext>,
    pub class: Option<ClassContext>,
    /// Declared return type, checked by `return` and the body's tail value.
    pub return_type: Option<Type>,
}

impl FunctionScope {
    pub fn new(
        name: &str,
        kind: FunctionKind,
        enclosing: Option<ScopeId>,
        class: Option<ClassContext>,
        this_type: Type,
    ) -> Self {
        let mut unit = FunctionUnit::new(name);
        let has_this = matches!(kind, FunctionKind::Method | FunctionKind::Constructor);
        unit.is_method = has_this;

        // Slot 0 holds the callee, or `this` in methods and constructors.
        let slot_zero = Local {
            name: if has_this { "this".to_string() } else { String::new() },
            ty: this_type,
            depth: 0,
            slot: 0,
            is_const: true,
            dropped: false,
        };

        Self {
            unit,
            kind,
            enclosing,
            locals: vec![slot_zero],
            generic_bindings: Vec::new(),
            upvalues: Vec::new(),
            globals: IndexMap::new(),
            types: TypeEnvironment::new(),
            macros: Vec::new(),
            scope_depth: 0,
            stack_height: 1,
            loops: Vec::new(),
            class,
            return_type: None,
        }
    }

    pub fn find_local(&self, name: &str) -> Option<&Local> {
        if name.is_empty() {
            return None;
        }
        self.locals
            .iter()
            .rev()
            .find(|local| !local.dropped && local.name == name)
    }
}

/// Selects whether an unresolvable bare name may bind a fresh pattern variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionContext {
    Expression,
    Pattern,
}

/// Where a name lives, as decided at compile time.
#[derive(Debug, Clone)]
pub enum Resolved {
    Macro(Expr),
    Local { slot: u16, ty: Type, is_const: bool },
    Upvalue { index: u16, ty: Type, is_const: bool },
    Global { ty: Type, is_const: bool },
    /// A field of `this`, referenced without the receiver.
    ThisAttribute { ty: Type },
    /// Nothing matched; in a pattern this binds the subject.
    PatternBinder,
}

impl Compiler {
    pub(crate) fn current_id(&self) -> ScopeId {
        ScopeId(self.enclosing.len())
    }

    pub(crate) fn scope_at(&self, id: ScopeId) -> &FunctionScope {
        self.enclosing.get(id.0).unwrap_or(&self.scope)
    }

    pub(crate) fn scope_at_mut(&mut self, id: ScopeId) -> &mut FunctionScope {
        if id.0 < self.enclosing.len() {
            &mut self.enclosing[id.0]
        } else {
            &mut self.scope
        }
    }

    /// Scope ids from the current scope outwards.
    pub(crate) fn scope_chain(&self) -> Vec<ScopeId> {
        let mut chain = Vec::new();
        let mut next = Some(self.current_id());
        while let Some(id) = next {
            chain.push(id);
            next = self.scope_at(id).enclosing;
        }
        chain
    }

    // --- Block scopes ---

    pub(crate) fn begin_scope(&mut self) {
        self.scope.scope_depth += 1;
        trace!(depth = self.scope.scope_depth, "begin scope");
    }

    /// Close the innermost block scope, popping one stack value per local
    /// declared in it. With `carry`, the block's value on top survives.
    pub(crate) fn end_scope(&mut self, carry: bool, line: usize) {
        self.scope.scope_depth = self.scope.scope_depth.saturating_sub(1);
        let depth = self.scope.scope_depth;
        let mut popped = 0;
        while let Some(local) = self.scope.locals.last() {
            if local.depth <= depth {
                break;
            }
            self.emit(if carry { Op::PopUnder } else { Op::Pop }, line);
            self.scope.locals.pop();
            popped += 1;
        }
        self.scope.macros.retain(|m| m.depth <= depth);
        trace!(depth, popped, "end scope");
    }

    // --- Locals ---

    /// Declare a local for the value currently on top of the stack.
    pub(crate) fn declare_local(&mut self, name: &str, ty: Type, is_const: bool, span: Span) -> u16 {
        let depth = self.scope.scope_depth;
        let redeclared = self
            .scope
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth == depth)
            .any(|local| !local.dropped && local.name == name);
        if redeclared {
            self.report(CompileError::Redeclaration {
                name: name.to_string(),
                span,
            });
        }

        let height = self.scope.stack_height.saturating_sub(1);
        let slot = match u16::try_from(height) {
            Ok(slot) => slot,
            Err(_) => {
                self.report(CompileError::TooManyLocals { span });
                u16::MAX
            }
        };
        trace!(name, slot, depth, "declare local");
        self.scope.locals.push(Local {
            name: name.to_string(),
            ty,
            depth,
            slot,
            is_const,
            dropped: false,
        });
        slot
    }

    /// Hide a local from later lookups, keeping its slot occupied.
    pub(crate) fn mark_dropped(&mut self, slot: u16) {
        if let Some(local) = self
            .scope
            .locals
            .iter_mut()
            .rev()
            .find(|local| local.slot == slot && !local.dropped)
        {
            local.dropped = true;
        }
    }

    pub(crate) fn set_local_type(&mut self, slot: u16, ty: Type) {
        if let Some(local) = self.scope.locals.iter_mut().rev().find(|l| l.slot == slot) {
            local.ty = ty;
        }
    }

    // --- Globals ---

    pub(crate) fn is_global_scope(&self) -> bool {
        self.scope.kind == FunctionKind::Module && self.scope.scope_depth == 0
    }

    pub(crate) fn define_global(&mut self, name: &str, ty: Type, is_const: bool) {
        self.scope.globals.insert(
            name.to_string(),
            GlobalBinding {
                ty,
                is_const,
                is_host: false,
            },
        );
    }

    fn find_global_from(&self, id: ScopeId, name: &str) -> Option<GlobalBinding> {
        let mut next = Some(id);
        while let Some(current) = next {
            let scope = self.scope_at(current);
            if let Some(binding) = scope.globals.get(name) {
                return Some(binding.clone());
            }
            next = scope.enclosing;
        }
        None
    }

    // --- Resolution ---

    /// Resolve a name: macro, local, upvalue, global, implicit `this`
    /// attribute, then (patterns only) a fresh binder.
    pub(crate) fn resolve_name(&mut self, name: &str, context: ResolutionContext) -> Option<Resolved> {
        if let Some(expr) = self.find_macro(name) {
            return Some(Resolved::Macro(expr));
        }
        if let Some(local) = self.scope.find_local(name) {
            return Some(Resolved::Local {
                slot: local.slot,
                ty: local.ty.clone(),
                is_const: local.is_const,
            });
        }
        let id = self.current_id();
        if let Some((index, ty, is_const)) = self.resolve_upvalue(id, name) {
            return Some(Resolved::Upvalue {
                index,
                ty,
                is_const,
            });
        }
        if let Some(binding) = self.scope.globals.get(name) {
            return Some(Resolved::Global {
                ty: binding.ty.clone(),
                is_const: binding.is_const,
            });
        }
        if let Some(ty) = self.this_attribute(name) {
            return Some(Resolved::ThisAttribute { ty });
        }
        match context {
            ResolutionContext::Pattern => Some(Resolved::PatternBinder),
            ResolutionContext::Expression => None,
        }
    }

    fn find_macro(&self, name: &str) -> Option<Expr> {
        self.scope_chain()
            .into_iter()
            .find_map(|id| {
                self.scope_at(id)
                    .macros
                    .iter()
                    .rev()
                    .find(|m| m.name == name)
                    .map(|m| m.value.clone())
            })
    }

    pub(crate) fn define_macro(&mut self, name: &str, value: Expr) {
        let depth = self.scope.scope_depth;
        self.scope.macros.push(MacroDef {
            name: name.to_string(),
            value,
            depth,
        });
    }

    pub(crate) fn remove_macro(&mut self, name: &str) -> bool {
        for id in self.scope_chain() {
            let macros = &mut self.scope_at_mut(id).macros;
            if let Some(pos) = macros.iter().rposition(|m| m.name == name) {
                macros.remove(pos);
                return true;
            }
        }
        false
    }

    /// Resolve `name` as a capture for the scope `id`, chaining through
    /// intermediate scopes.
    pub(crate) fn resolve_upvalue(&mut self, id: ScopeId, name: &str) -> Option<(u16, Type, bool)> {
        let parent = self.scope_at(id).enclosing?;

        let local = self
            .scope_at(parent)
            .find_local(name)
            .map(|local| (local.slot, local.ty.clone(), local.is_const));
        if let Some((slot, ty, is_const)) = local {
            let index = self.add_upvalue(id, UpvalueDescriptor::Local(slot), ty.clone(), is_const);
            return Some((index, ty, is_const));
        }

        if let Some((outer, ty, is_const)) = self.resolve_upvalue(parent, name) {
            let index = self.add_upvalue(id, UpvalueDescriptor::Upvalue(outer), ty.clone(), is_const);
            return Some((index, ty, is_const));
        }

        if let Some(binding) = self.find_global_from(parent, name) {
            let descriptor = UpvalueDescriptor::Global(name.to_string());
            let index = self.add_upvalue(id, descriptor, binding.ty.clone(), binding.is_const);
            return Some((index, binding.ty, binding.is_const));
        }
        None
    }

    fn add_upvalue(&mut self, id: ScopeId, descriptor: UpvalueDescriptor, ty: Type, is_const: bool) -> u16 {
        let scope = self.scope_at_mut(id);
        if let Some(existing) = scope.upvalues.iter().position(|u| u.descriptor == descriptor) {
            return existing as u16;
        }
        let index = scope.upvalues.len();
        trace!(unit = %scope.unit.name, index, %descriptor, "capture upvalue");
        scope.upvalues.push(CapturedUpvalue {
            descriptor,
            ty,
            is_const,
        });
        u16::try_from(index).unwrap_or(u16::MAX)
    }

    // --- `this` ---

    /// Whether `this` is reachable from the current unit.
    pub(crate) fn has_this(&self) -> bool {
        for id in self.scope_chain() {
            let scope = self.scope_at(id);
            match scope.kind {
                FunctionKind::Method | FunctionKind::Constructor => return true,
                FunctionKind::Lambda | FunctionKind::Block if scope.class.is_some() => continue,
                _ => return false,
            }
        }
        false
    }

    fn this_attribute(&self, name: &str) -> Option<Type> {
        let class = self.scope.class.as_ref()?.class.clone();
        let ty = class.field(name)?;
        self.has_this().then_some(ty)
    }

    /// Push `this`, returning its type, or `None` outside a method.
    pub(crate) fn emit_this(&mut self, line: usize) -> Option<Type> {
        if let Some(local) = self.scope.find_local("this") {
            let (slot, ty) = (local.slot, local.ty.clone());
            self.emit(Op::GetLocal(slot), line);
            return Some(ty);
        }
        if !self.has_this() {
            return None;
        }
        let id = self.current_id();
        let (index, ty, _) = self.resolve_upvalue(id, "this")?;
        self.emit(Op::GetUpvalue(index), line);
        Some(ty)
    }

    /// Whether code here may touch private members declared by `owner`.
    pub(crate) fn inside_class(&self, owner: &str) -> bool {
        self.scope
            .class
            .as_ref()
            .map(|ctx| ctx.class.name == owner)
            .unwrap_or(false)
    }
}
