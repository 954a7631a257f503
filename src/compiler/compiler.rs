//! Bytecode compiler: AST to function units.
//!
//! Compilation is a single pass over the tree. Every node is compiled in
//! either value position (leaves exactly one value on the stack) or effect
//! position (leaves nothing). The compiler tracks the exact stack height at
//! every emission point, which is what makes local slots addressable.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::ast::{Expr, ExprKind, Program, TypeToken};
use crate::bytecode::{CompiledModule, Constant, FunctionUnit, GlobalInfo, Op};
use crate::config::CompilerOptions;
use crate::error::{CompileError, CompileFailure, Diagnostics};
use crate::span::Span;
use crate::types::{parse_type, Type, TypeEnvironment, TypeLookup};

use super::scope::{FunctionKind, FunctionScope, GlobalBinding};

/// Where a declaration's value ends up once it is built.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Binding {
    /// Name constant of a module global.
    Global(u16),
    /// Slot of a local reserved before the value was built.
    Local(u16),
}

/// The bytecode compiler.
pub struct Compiler {
    /// The function unit currently being compiled.
    pub(crate) scope: FunctionScope,
    /// Suspended enclosing units, outermost first. A `ScopeId` equal to
    /// `enclosing.len()` names `scope`.
    pub(crate) enclosing: Vec<FunctionScope>,
    pub(crate) options: CompilerOptions,
    diagnostics: Diagnostics,
    nesting: usize,
    nesting_reported: bool,
}

/// Compile a program with the given options.
pub fn compile(program: &Program, options: &CompilerOptions) -> Result<CompiledModule, CompileFailure> {
    Compiler::new(options.clone()).compile_program(program)
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        let mut scope = FunctionScope::new("<main>", FunctionKind::Module, None, None, Type::any());
        scope.types = TypeEnvironment::with_builtins();
        for name in &options.host_globals {
            scope.globals.insert(
                name.clone(),
                GlobalBinding {
                    ty: Type::any(),
                    is_const: false,
                    is_host: true,
                },
            );
        }

        Self {
            scope,
            enclosing: Vec::new(),
            diagnostics: Diagnostics::new(options.type_check),
            options,
            nesting: 0,
            nesting_reported: false,
        }
    }

    /// Compile a whole program into a module.
    pub fn compile_program(mut self, program: &Program) -> Result<CompiledModule, CompileFailure> {
        debug!(
            source = %self.options.source_name,
            nodes = program.body.len(),
            "compiling module"
        );

        self.hoist_declarations(&program.body);
        for expr in &program.body {
            self.compile_effect(expr);
        }
        let line = program.body.last().map(|e| e.span.line).unwrap_or(0);
        self.emit(Op::Null, line);
        self.emit(Op::Return, line);

        let globals: IndexMap<String, GlobalInfo> = self
            .scope
            .globals
            .iter()
            .filter(|(_, binding)| !binding.is_host)
            .map(|(name, binding)| {
                (
                    name.clone(),
                    GlobalInfo {
                        type_name: binding.ty.to_string(),
                        is_const: binding.is_const,
                    },
                )
            })
            .collect();

        let mut main = self.end_unit();
        main.chunk.globals = globals;

        if !self.diagnostics.is_empty() {
            debug!(errors = self.diagnostics.len(), "module failed to compile");
            return Err(CompileFailure(self.diagnostics.into_vec()));
        }

        debug!(
            source = %self.options.source_name,
            instructions = main.chunk.len(),
            "module compiled"
        );
        Ok(CompiledModule {
            source_name: self.options.source_name.clone(),
            main: Rc::new(main),
        })
    }

    /// Pre-declare module-level functions, classes and enums so bodies can
    /// refer to declarations that appear later in the file.
    fn hoist_declarations(&mut self, body: &[Expr]) {
        for expr in body {
            let name = match &expr.kind {
                ExprKind::Function(decl) => &decl.name,
                ExprKind::Class(decl) => &decl.name,
                ExprKind::Enum(decl) => &decl.name,
                ExprKind::Decorated { target, .. } => match &target.kind {
                    ExprKind::Function(decl) => &decl.name,
                    _ => continue,
                },
                _ => continue,
            };
            if !self.scope.globals.contains_key(name) {
                trace!(name = %name, "hoisted declaration");
                self.define_global(name, Type::any(), true);
            }
        }
    }

    // --- Diagnostics ---

    pub(crate) fn report(&mut self, error: CompileError) {
        self.diagnostics.report(error);
    }

    /// Report a mismatch unless `found` fits `expected`.
    pub(crate) fn check_assignable(&mut self, found: &Type, expected: &Type, span: Span) {
        if !found.is_assignable_to(expected) {
            self.report(CompileError::type_mismatch(expected, found, span));
        }
    }

    /// Enter one level of nesting. Returns `false` (after reporting once)
    /// when the configured limit is exceeded.
    pub(crate) fn enter_nesting(&mut self, span: Span) -> bool {
        if self.nesting >= self.options.max_nesting_depth {
            if !self.nesting_reported {
                self.nesting_reported = true;
                self.report(CompileError::NestingTooDeep {
                    limit: self.options.max_nesting_depth,
                    span,
                });
            }
            return false;
        }
        self.nesting += 1;
        true
    }

    pub(crate) fn leave_nesting(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    // --- Emission ---

    /// Emit an instruction, tracking its effect on the stack height.
    pub(crate) fn emit(&mut self, op: Op, line: usize) -> usize {
        let height = self.scope.stack_height as i64 + i64::from(op.stack_effect());
        self.scope.stack_height = height.max(0) as usize;
        self.scope.unit.chunk.emit(op, line)
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.scope.unit.chunk.len()
    }

    /// Emit a forward jump with a placeholder operand, returning its offset.
    pub(crate) fn emit_jump(&mut self, op: Op, line: usize) -> usize {
        debug_assert!(op.is_jump());
        self.emit(op, line)
    }

    /// Point the jump at `offset` to the next instruction.
    pub(crate) fn patch_jump(&mut self, offset: usize, span: Span) {
        if !self.scope.unit.chunk.patch_jump(offset) {
            self.report(CompileError::JumpTooLarge { span });
        }
    }

    /// Emit a backward jump to `start`.
    pub(crate) fn emit_loop(&mut self, start: usize, span: Span) {
        let distance = self.current_offset() + 1 - start;
        let operand = match u32::try_from(distance) {
            Ok(operand) => operand,
            Err(_) => {
                self.report(CompileError::JumpTooLarge { span });
                0
            }
        };
        self.emit(Op::Loop(operand), span.line);
    }

    pub(crate) fn add_constant(&mut self, constant: Constant, span: Span) -> u16 {
        match self.scope.unit.chunk.add_constant(constant) {
            Some(idx) => idx,
            None => {
                self.report(CompileError::TooManyConstants { span });
                0
            }
        }
    }

    pub(crate) fn name_constant(&mut self, name: &str, span: Span) -> u16 {
        self.add_constant(Constant::Str(name.to_string()), span)
    }

    pub(crate) fn emit_constant(&mut self, constant: Constant, span: Span) {
        let idx = self.add_constant(constant, span);
        self.emit(Op::Constant(idx), span.line);
    }

    /// Operand for an instruction that consumes `count` stack values.
    pub(crate) fn count_operand(&mut self, count: usize, span: Span) -> u16 {
        match u16::try_from(count) {
            Ok(count) => count,
            Err(_) => {
                self.report(CompileError::TooManyLocals { span });
                u16::MAX
            }
        }
    }

    // --- Function units ---

    /// Suspend the current unit and start compiling a nested one.
    pub(crate) fn begin_unit(&mut self, name: &str, kind: FunctionKind, this_type: Type) {
        let parent = self.current_id();
        let class = self.scope.class.clone();
        let scope = FunctionScope::new(name, kind, Some(parent), class, this_type);
        let suspended = std::mem::replace(&mut self.scope, scope);
        self.enclosing.push(suspended);
        trace!(unit = name, ?kind, depth = self.enclosing.len(), "begin unit");
    }

    /// Finish the current unit and resume its parent. The caller emits the
    /// unit's final `Return`.
    pub(crate) fn end_unit(&mut self) -> FunctionUnit {
        let mut unit = std::mem::replace(&mut self.scope.unit, FunctionUnit::new(""));
        unit.upvalues = self
            .scope
            .upvalues
            .iter()
            .map(|upvalue| upvalue.descriptor.clone())
            .collect();
        debug_assert!(
            unit.chunk.unpatched_jumps().is_empty(),
            "unit '{}' has unpatched jumps",
            unit.name
        );

        if let Some(parent) = self.enclosing.pop() {
            self.scope = parent;
        }

        debug!(
            unit = %unit.name,
            instructions = unit.chunk.len(),
            constants = unit.chunk.constants.len(),
            upvalues = unit.upvalues.len(),
            "compiled function unit"
        );
        unit
    }

    /// Store a finished unit and push a closure over it.
    pub(crate) fn emit_closure(&mut self, unit: FunctionUnit, defaults: u8, span: Span) {
        let idx = self.add_constant(Constant::Function(Rc::new(unit)), span);
        self.emit(Op::Closure(idx, defaults), span.line);
    }

    // --- Types ---

    /// Run `f` with the named generic placeholders in scope.
    pub(crate) fn with_generics<R>(&mut self, names: &[String], f: impl FnOnce(&mut Self) -> R) -> R {
        let mark = self.scope.generic_bindings.len();
        for name in names {
            self.scope
                .generic_bindings
                .push((name.clone(), Type::Generic(name.clone())));
        }
        let result = f(self);
        self.scope.generic_bindings.truncate(mark);
        result
    }

    /// Resolve an annotation, reporting and falling back to `any` on error.
    pub(crate) fn resolve_annotation(&mut self, tokens: &[TypeToken], span: Span) -> Type {
        match parse_type(tokens, &*self, span) {
            Ok(ty) => ty,
            Err(error) => {
                self.report(error);
                Type::any()
            }
        }
    }

    pub(crate) fn optional_annotation(&mut self, tokens: Option<&Vec<TypeToken>>, span: Span) -> Option<Type> {
        tokens.map(|tokens| self.resolve_annotation(tokens, span))
    }

    // --- Declaration bindings ---

    /// Claim the name of a declaration before its value is built, so the
    /// value can refer to itself.
    pub(crate) fn reserve_binding(&mut self, name: &str, ty: Type, is_const: bool, span: Span) -> Binding {
        if self.is_global_scope() {
            self.define_global(name, ty, is_const);
            Binding::Global(self.name_constant(name, span))
        } else {
            self.emit(Op::Null, span.line);
            Binding::Local(self.declare_local(name, ty, is_const, span))
        }
    }

    /// Store the value on top of the stack into a reserved binding.
    pub(crate) fn complete_binding(&mut self, binding: Binding, line: usize) {
        match binding {
            Binding::Global(idx) => {
                self.emit(Op::DefineGlobal(idx), line);
            }
            Binding::Local(slot) => {
                self.emit(Op::SetLocal(slot), line);
                self.emit(Op::Pop, line);
            }
        }
    }

    pub(crate) fn retype_binding(&mut self, binding: Binding, name: &str, ty: Type) {
        match binding {
            Binding::Global(_) => {
                if let Some(global) = self.scope.globals.get_mut(name) {
                    global.ty = ty;
                }
            }
            Binding::Local(slot) => self.set_local_type(slot, ty),
        }
    }

    /// Push the value held by a binding.
    pub(crate) fn load_binding(&mut self, binding: Binding, line: usize) {
        match binding {
            Binding::Global(idx) => self.emit(Op::GetGlobal(idx), line),
            Binding::Local(slot) => self.emit(Op::GetLocal(slot), line),
        };
    }
}

impl TypeLookup for Compiler {
    /// Generic placeholders shadow named types; the innermost unit wins.
    fn lookup_type(&self, name: &str) -> Option<Type> {
        for id in self.scope_chain() {
            let scope = self.scope_at(id);
            if let Some((_, ty)) = scope.generic_bindings.iter().rev().find(|(n, _)| n == name) {
                return Some(ty.clone());
            }
            if let Some(ty) = scope.types.get(name) {
                return Some(ty.clone());
            }
            if let Some(ctx) = &scope.class {
                if ctx.class.generics.iter().any(|g| g == name) {
                    return Some(Type::Generic(name.to_string()));
                }
            }
        }
        None
    }
}
