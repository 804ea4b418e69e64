//! Reference compiler.
//!
//! Compiles a parsed module into a tree of [`CodeObject`]s laid out the way
//! the host runtime lays them out: one unit per module, class body,
//! function, lambda and comprehension, with per-instruction line numbers
//! and runtime-version-specific instruction selection.
//!
//! [`Compiler::compile_module_marked`] compiles the same tree with one node
//! marked: its value is immediately followed by `LOAD_CONST <marker>` and a
//! power operation, as if the source said `(node) ** MARKER`. Code emitted
//! before the marked node's last instruction is unchanged, so the
//! instruction just before the marker sits at the node's real offset.
//!
//! [`Compiler::compile_fragment`] compiles a single top-level statement of
//! one unit, or one lambda or comprehension unit, against a prebuilt
//! [`SymbolTable`]. Nothing else in the module is compiled, so a marked compilation
//! costs work proportional to the statement rather than to the file.

mod expressions;
mod fold;
mod patterns;
mod statements;
mod symtable;

use std::borrow::Cow;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;
use whence_python::{Arguments, Ast, NodeId, NodeKind};

use crate::builder::{CodeBuilder, CodeMeta, JumpLabel};
use crate::code::{flags, CodeObject, Const};
use crate::opcode::{Opcode, NB_POWER};
use crate::version::RuntimeVersion;

pub use fold::fold_constant;
pub use symtable::{NameScope, Scope, ScopeKind, SymbolTable};

/// A construct the compiler rejects, such as `return` outside a function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line})")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        CompileError {
            message: message.into(),
            line,
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Compiles modules for one runtime version.
#[derive(Debug, Clone, Copy)]
pub struct Compiler {
    version: RuntimeVersion,
}

impl Compiler {
    pub fn new(version: RuntimeVersion) -> Self {
        Compiler { version }
    }

    pub fn version(&self) -> RuntimeVersion {
        self.version
    }

    /// Compile a module. `filename` becomes every unit's origin key.
    ///
    /// ```
    /// use whence_bytecode::{Compiler, RuntimeVersion};
    /// use whence_python::parse_module;
    ///
    /// let ast = parse_module("x = a + b\n").unwrap();
    /// let code = Compiler::new(RuntimeVersion::V3_8)
    ///     .compile_module(&ast, "example.py")
    ///     .unwrap();
    /// let names: Vec<_> = code.instructions.iter().map(|i| i.opname()).collect();
    /// assert_eq!(
    ///     names,
    ///     ["LOAD_NAME", "LOAD_NAME", "BINARY_ADD", "STORE_NAME", "LOAD_CONST", "RETURN_VALUE"]
    /// );
    /// ```
    pub fn compile_module(&self, ast: &Ast, filename: &str) -> Result<Arc<CodeObject>> {
        CodeGen::new(ast, self.version, filename, None)?.compile_module()
    }

    /// Compile a module with `marked` followed by the marker.
    pub fn compile_module_marked(
        &self,
        ast: &Ast,
        filename: &str,
        marked: NodeId,
    ) -> Result<Arc<CodeObject>> {
        CodeGen::new(ast, self.version, filename, Some(marked))?.compile_module()
    }

    /// Compile `fragment` on its own, optionally marking one node.
    ///
    /// The result has the unit's name, scope and first line. For a
    /// statement fragment its instructions are exactly the ones the
    /// statement contributes to the full unit, jump arguments and
    /// `EXTENDED_ARG` prefixes aside; a whole-unit fragment matches the
    /// unit.
    pub fn compile_fragment(
        &self,
        ast: &Ast,
        symbols: &SymbolTable,
        filename: &str,
        fragment: Fragment<'_>,
        marked: Option<NodeId>,
    ) -> Result<Arc<CodeObject>> {
        CodeGen {
            ast,
            version: self.version,
            filename,
            marked,
            symbols: Cow::Borrowed(symbols),
            units: Vec::new(),
        }
        .compile_fragment(fragment)
    }
}

/// Part of one compiled unit that can be compiled by itself.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    /// The node opening the unit: the module root, a definition, a lambda
    /// or a comprehension.
    pub unit: NodeId,
    /// Qualified name of that unit.
    pub qualname: &'a str,
    /// A statement directly in the unit's body, or `None` for the whole of
    /// a lambda or comprehension unit.
    pub statement: Option<NodeId>,
}

/// A control-flow block that `break`, `continue` and `return` must unwind.
#[derive(Debug, Clone, Copy)]
enum Block {
    Loop {
        is_for: bool,
        start: JumpLabel,
        exit: JumpLabel,
    },
    /// Protected body of a `try` with handlers.
    Try,
    /// Protected body of a `try` with a `finally` clause.
    Finally,
    /// Body of an `except` clause.
    Handler,
    /// Body of an `except*` clause.
    StarHandler,
    With {
        is_async: bool,
    },
}

/// One code object under construction.
struct Unit {
    scope: Scope,
    qualname: String,
    builder: CodeBuilder,
    blocks: Vec<Block>,
}

pub(crate) struct CodeGen<'a> {
    ast: &'a Ast,
    version: RuntimeVersion,
    filename: &'a str,
    marked: Option<NodeId>,
    symbols: Cow<'a, SymbolTable>,
    units: Vec<Unit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameOp {
    Load,
    Store,
    Delete,
}

impl<'a> CodeGen<'a> {
    fn new(
        ast: &'a Ast,
        version: RuntimeVersion,
        filename: &'a str,
        marked: Option<NodeId>,
    ) -> Result<Self> {
        Ok(CodeGen {
            ast,
            version,
            filename,
            marked,
            symbols: Cow::Owned(SymbolTable::build(ast)?),
            units: Vec::new(),
        })
    }

    // ------------------------------------------------------------------
    // Unit stack
    // ------------------------------------------------------------------

    fn unit(&self) -> &Unit {
        // The module unit is pushed first and popped last.
        &self.units[self.units.len() - 1]
    }

    fn unit_mut(&mut self) -> &mut Unit {
        let last = self.units.len() - 1;
        &mut self.units[last]
    }

    fn builder(&mut self) -> &mut CodeBuilder {
        &mut self.unit_mut().builder
    }

    fn scope(&self) -> &Scope {
        &self.unit().scope
    }

    fn enter_unit(&mut self, id: NodeId, qualname: String, first_line: u32) -> Result<()> {
        self.push_unit(id, qualname, first_line)?;
        self.emit_prologue();
        Ok(())
    }

    fn push_unit(&mut self, id: NodeId, qualname: String, first_line: u32) -> Result<()> {
        let scope = self
            .symbols
            .scope(id)
            .cloned()
            .ok_or_else(|| CompileError::new("no symbol table for scope", first_line))?;
        self.units.push(Unit {
            scope,
            qualname,
            builder: CodeBuilder::new(self.version, first_line),
            blocks: Vec::new(),
        });
        Ok(())
    }

    /// Instructions every unit starts with on runtimes that create cells and
    /// generators inside the unit itself.
    fn emit_prologue(&mut self) {
        if !self.version.has_exception_tables() {
            return;
        }
        let cells = self.scope().cellvars.len() as u32;
        let frees = self.scope().freevars.len() as u32;
        let generator = self.scope().is_generator || self.scope().is_coroutine;
        for index in 0..cells {
            self.emit_arg(Opcode::MakeCell, index);
        }
        if frees > 0 {
            self.emit_arg(Opcode::CopyFreeVars, frees);
        }
        if generator {
            self.emit(Opcode::ReturnGenerator);
            self.emit(Opcode::PopTop);
        }
        self.emit_arg(Opcode::Resume, 0);
    }

    fn leave_unit(
        &mut self,
        name: &str,
        first_line: u32,
        args: Option<&Arguments>,
    ) -> Result<Arc<CodeObject>> {
        let unit = self
            .units
            .pop()
            .ok_or_else(|| CompileError::new("no open unit", first_line))?;
        let scope = &unit.scope;
        let parent_is_function = self
            .units
            .last()
            .is_some_and(|parent| parent.scope.kind.is_function_like());
        let mut code_flags = 0;
        if scope.kind.is_function_like() {
            code_flags |= flags::OPTIMIZED | flags::NEWLOCALS;
        }
        if parent_is_function {
            code_flags |= flags::NESTED;
        }
        match (scope.is_generator, scope.is_coroutine) {
            (true, true) => code_flags |= flags::ASYNC_GENERATOR,
            (true, false) => code_flags |= flags::GENERATOR,
            (false, true) => code_flags |= flags::COROUTINE,
            (false, false) => {}
        }
        if scope.cellvars.is_empty() && scope.freevars.is_empty() {
            code_flags |= flags::NOFREE;
        }
        let mut meta = CodeMeta {
            name: name.to_string(),
            qualname: self
                .version
                .has_code_qualname()
                .then(|| match scope.kind {
                    ScopeKind::Module => name.to_string(),
                    _ => unit.qualname.clone(),
                }),
            filename: self.filename.to_string(),
            first_line,
            flags: code_flags,
            varnames: scope.varnames.clone(),
            cellvars: scope.cellvars.clone(),
            freevars: scope.freevars.clone(),
            ..CodeMeta::default()
        };
        if let Some(args) = args {
            meta.argcount = args.positional_count() as u32;
            meta.posonlyargcount = args.posonlyargs.len() as u32;
            meta.kwonlyargcount = args.kwonlyargs.len() as u32;
            if args.vararg.is_some() {
                meta.flags |= flags::VARARGS;
            }
            if args.kwarg.is_some() {
                meta.flags |= flags::VARKEYWORDS;
            }
        }
        trace!(name, first_line, "compiled unit");
        Ok(Arc::new(unit.builder.finish(meta)))
    }

    /// Qualified name of a scope named `name` opened inside the current unit.
    fn child_qualname(&self, name: &str, is_def: bool) -> String {
        let unit = self.unit();
        if unit.scope.kind == ScopeKind::Module
            || (is_def && unit.scope.is_declared_global(name))
        {
            return name.to_string();
        }
        match unit.scope.kind {
            ScopeKind::Function | ScopeKind::Lambda => {
                format!("{}.<locals>.{}", unit.qualname, name)
            }
            _ => format!("{}.{}", unit.qualname, name),
        }
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn emit(&mut self, opcode: Opcode) {
        self.builder().emit(opcode);
    }

    fn emit_arg(&mut self, opcode: Opcode, arg: u32) {
        self.builder().emit_arg(opcode, arg);
    }

    fn emit_const(&mut self, value: Const) {
        self.builder().emit_const(value);
    }

    fn emit_jump(&mut self, opcode: Opcode) -> JumpLabel {
        self.builder().emit_jump(opcode)
    }

    fn emit_jump_to(&mut self, opcode: Opcode, label: JumpLabel) {
        self.builder().emit_jump_to(opcode, label);
    }

    fn new_label(&mut self) -> JumpLabel {
        self.builder().new_label()
    }

    fn label_here(&mut self) -> JumpLabel {
        self.builder().label_here()
    }

    fn patch(&mut self, label: JumpLabel) {
        self.builder().patch_jump(label);
    }

    fn set_line(&mut self, line: u32) -> u32 {
        self.builder().set_line(line)
    }

    fn line_of(&self, id: NodeId) -> u32 {
        self.ast.node(id).lineno
    }

    fn is_marked(&self, id: NodeId) -> bool {
        self.marked == Some(id)
    }

    /// The constant `id` folds to, unless it is being marked.
    fn folded(&self, id: NodeId) -> Option<Const> {
        if self.is_marked(id) {
            return None;
        }
        fold_constant(self.ast, id)
    }

    fn emit_marker(&mut self) {
        self.emit_const(Const::Marker);
        if self.version.has_unified_binary_op() {
            self.emit_arg(Opcode::BinaryOp, NB_POWER);
        } else {
            self.emit(Opcode::BinaryPower);
        }
    }

    fn emit_rot_two(&mut self) {
        if self.version.has_exception_tables() {
            self.emit_arg(Opcode::Swap, 2);
        } else {
            self.emit(Opcode::RotTwo);
        }
    }

    fn emit_rot_three(&mut self) {
        if self.version.has_exception_tables() {
            self.emit_arg(Opcode::Swap, 3);
            self.emit_arg(Opcode::Swap, 2);
        } else {
            self.emit(Opcode::RotThree);
        }
    }

    fn emit_dup_top(&mut self) {
        if self.version.has_exception_tables() {
            self.emit_arg(Opcode::Copy, 1);
        } else {
            self.emit(Opcode::DupTop);
        }
    }

    fn emit_dup_top_two(&mut self) {
        if self.version.has_exception_tables() {
            self.emit_arg(Opcode::Copy, 2);
            self.emit_arg(Opcode::Copy, 2);
        } else {
            self.emit(Opcode::DupTopTwo);
        }
    }

    fn emit_return_none(&mut self) {
        self.emit_const(Const::None);
        self.emit(Opcode::ReturnValue);
    }

    /// `return None` unless the unit already ends in a return no jump skips.
    fn emit_implicit_return(&mut self) {
        let ends_in_return = self.unit().builder.last_opcode() == Some(Opcode::ReturnValue)
            && !self.unit().builder.has_label_at_end();
        if !ends_in_return {
            self.emit_return_none();
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn compile_name(&mut self, name: &str, op: NameOp) -> Result<()> {
        use Opcode::*;
        let scope = self.scope();
        let kind = scope.kind;
        let name_scope = scope.lookup(name);
        let deref = scope.deref_index(name);
        let fast = scope.varname_index(name);

        let pick = |load, store, delete| match op {
            NameOp::Load => load,
            NameOp::Store => store,
            NameOp::Delete => delete,
        };
        match (kind, name_scope) {
            (ScopeKind::Class, NameScope::Free) => {
                let index = deref.ok_or_else(|| self.missing(name))?;
                self.emit_arg(pick(LoadClassderef, StoreDeref, DeleteDeref), index);
            }
            (k, NameScope::Free | NameScope::Cell) if k.is_function_like() => {
                let index = deref.ok_or_else(|| self.missing(name))?;
                self.emit_arg(pick(LoadDeref, StoreDeref, DeleteDeref), index);
            }
            (_, NameScope::GlobalExplicit) => {
                self.builder()
                    .emit_name(pick(LoadGlobal, StoreGlobal, DeleteGlobal), name);
            }
            (k, NameScope::GlobalImplicit) if k.is_function_like() => {
                self.builder()
                    .emit_name(pick(LoadGlobal, StoreGlobal, DeleteGlobal), name);
            }
            (k, NameScope::Local) if k.is_function_like() => match fast {
                Some(index) => self.emit_arg(pick(LoadFast, StoreFast, DeleteFast), index),
                None => self
                    .builder()
                    .emit_name(pick(LoadGlobal, StoreGlobal, DeleteGlobal), name),
            },
            _ => {
                self.builder()
                    .emit_name(pick(LoadName, StoreName, DeleteName), name);
            }
        }
        Ok(())
    }

    fn missing(&self, name: &str) -> CompileError {
        CompileError::new(
            format!("name '{}' has no closure slot", name),
            self.unit().builder.line(),
        )
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    fn compile_module(mut self) -> Result<Arc<CodeObject>> {
        let ast = self.ast;
        let root = ast.root();
        self.enter_unit(root, String::new(), 1)?;
        let body: &[NodeId] = match ast.kind(root) {
            NodeKind::Module { body } => body,
            _ => &[],
        };
        if self.scope().has_annotations {
            self.emit(Opcode::SetupAnnotations);
        }
        let body = self.compile_docstring_store(body)?;
        self.compile_body(body)?;
        self.emit_implicit_return();
        self.leave_unit("<module>", 1, None)
    }

    fn compile_fragment(mut self, fragment: Fragment<'_>) -> Result<Arc<CodeObject>> {
        let ast = self.ast;
        let unit = fragment.unit;
        let (name, first_line) = if unit == ast.root() {
            ("<module>", 1)
        } else {
            (
                ast.scope_name(unit).unwrap_or_default(),
                ast.definition_first_line(unit),
            )
        };
        let args = match ast.kind(unit) {
            NodeKind::FunctionDef { args, .. } | NodeKind::Lambda { args, .. } => Some(args.as_ref()),
            _ => None,
        };
        let qualname = fragment.qualname.to_string();
        match fragment.statement {
            Some(statement) => {
                self.push_unit(unit, qualname, first_line)?;
                self.compile_stmt(statement)?;
            }
            None => {
                self.enter_unit(unit, qualname, first_line)?;
                let line = self.line_of(unit);
                self.set_line(line);
                match ast.kind(unit) {
                    NodeKind::Lambda { body, .. } => self.compile_lambda_body(*body)?,
                    _ => self.compile_comprehension_body(unit)?,
                }
            }
        }
        self.leave_unit(name, first_line, args)
    }

    /// The docstring of a body, if its first statement is a string literal.
    fn docstring(&self, body: &[NodeId]) -> Option<String> {
        let first = body.first()?;
        let NodeKind::Expr { value } = self.ast.kind(*first) else {
            return None;
        };
        match self.ast.kind(*value) {
            NodeKind::Constant {
                value: whence_python::ConstantValue::Str(s),
            } => Some(s.clone()),
            _ => None,
        }
    }

    /// Store a module or class docstring in `__doc__`; returns the rest of
    /// the body.
    fn compile_docstring_store<'b>(&mut self, body: &'b [NodeId]) -> Result<&'b [NodeId]> {
        match self.docstring(body) {
            Some(doc) => {
                self.set_line(self.line_of(body[0]));
                self.emit_const(Const::Str(doc));
                self.compile_name("__doc__", NameOp::Store)?;
                Ok(&body[1..])
            }
            None => Ok(body),
        }
    }

    /// Defaults, keyword-only defaults and annotations of a signature.
    /// Returns the `MAKE_FUNCTION` flags they contribute.
    fn compile_signature(&mut self, args: &Arguments, returns: Option<NodeId>) -> Result<u32> {
        let mut make_flags = 0;
        if !args.defaults.is_empty() {
            for default in &args.defaults {
                self.compile_expr(*default)?;
            }
            self.emit_arg(Opcode::BuildTuple, args.defaults.len() as u32);
            make_flags |= 0x01;
        }
        let kw_defaults: Vec<(String, NodeId)> = args
            .kwonlyargs
            .iter()
            .zip(&args.kw_defaults)
            .filter_map(|(arg, default)| default.map(|d| (arg.name.clone(), d)))
            .collect();
        if !kw_defaults.is_empty() {
            for (_, default) in &kw_defaults {
                self.compile_expr(*default)?;
            }
            let keys = kw_defaults
                .iter()
                .map(|(name, _)| Const::Str(name.clone()))
                .collect();
            self.emit_const(Const::Tuple(keys));
            self.emit_arg(Opcode::BuildConstKeyMap, kw_defaults.len() as u32);
            make_flags |= 0x02;
        }

        let mut annotated: Vec<(String, NodeId)> = Vec::new();
        for arg in args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.vararg)
            .chain(&args.kwonlyargs)
            .chain(&args.kwarg)
        {
            if let Some(annotation) = arg.annotation {
                annotated.push((arg.name.clone(), annotation));
            }
        }
        if let Some(returns) = returns {
            annotated.push(("return".to_string(), returns));
        }
        if !annotated.is_empty() {
            if self.version.counts_jumps_in_instructions() {
                for (name, annotation) in &annotated {
                    self.emit_const(Const::Str(name.clone()));
                    self.compile_expr(*annotation)?;
                }
                self.emit_arg(Opcode::BuildTuple, annotated.len() as u32 * 2);
            } else {
                for (_, annotation) in &annotated {
                    self.compile_expr(*annotation)?;
                }
                let keys = annotated
                    .iter()
                    .map(|(name, _)| Const::Str(name.clone()))
                    .collect();
                self.emit_const(Const::Tuple(keys));
                self.emit_arg(Opcode::BuildConstKeyMap, annotated.len() as u32);
            }
            make_flags |= 0x04;
        }
        Ok(make_flags)
    }

    /// Build a function object from `code`, capturing its free variables.
    fn make_closure(&mut self, code: Arc<CodeObject>, mut make_flags: u32, qualname: &str) -> Result<()> {
        if !code.freevars.is_empty() {
            for name in &code.freevars {
                let index = self
                    .scope()
                    .deref_index(name)
                    .ok_or_else(|| self.missing(name))?;
                self.emit_arg(Opcode::LoadClosure, index);
            }
            self.emit_arg(Opcode::BuildTuple, code.freevars.len() as u32);
            make_flags |= 0x08;
        }
        self.emit_const(Const::Code(code));
        if self.version.pushes_function_qualname() {
            self.emit_const(Const::Str(qualname.to_string()));
        }
        self.emit_arg(Opcode::MakeFunction, make_flags);
        Ok(())
    }

    fn compile_decorators(&mut self, decorators: &[NodeId]) -> Result<()> {
        for decorator in decorators {
            if self.version.has_precall() {
                self.emit(Opcode::PushNull);
            }
            self.compile_expr(*decorator)?;
        }
        Ok(())
    }

    fn apply_decorators(&mut self, count: usize) {
        for _ in 0..count {
            if self.version.has_precall() {
                self.emit_arg(Opcode::Precall, 0);
                self.emit_arg(Opcode::Call, 0);
            } else {
                self.emit_arg(Opcode::CallFunction, 1);
            }
        }
    }

    fn compile_function_def(&mut self, id: NodeId) -> Result<()> {
        let ast = self.ast;
        let NodeKind::FunctionDef {
            name,
            args,
            body,
            decorators,
            returns,
            ..
        } = ast.kind(id)
        else {
            return Ok(());
        };
        let def_line = self.line_of(id);
        self.compile_decorators(decorators)?;
        self.set_line(def_line);
        let make_flags = self.compile_signature(args, *returns)?;

        let first_line = ast.definition_first_line(id);
        let qualname = self.child_qualname(name, true);
        self.enter_unit(id, qualname.clone(), first_line)?;
        self.set_line(def_line);
        let body = match self.docstring(body) {
            Some(doc) => {
                self.builder().add_const(Const::Str(doc));
                &body[1..]
            }
            None => {
                self.builder().add_const(Const::None);
                &body[..]
            }
        };
        self.compile_body(body)?;
        self.emit_implicit_return();
        let code = self.leave_unit(name, first_line, Some(args))?;

        self.set_line(def_line);
        self.make_closure(code, make_flags, &qualname)?;
        self.apply_decorators(decorators.len());
        self.compile_name(name, NameOp::Store)
    }

    fn compile_class_def(&mut self, id: NodeId) -> Result<()> {
        let ast = self.ast;
        let NodeKind::ClassDef {
            name,
            bases,
            keywords,
            body,
            decorators,
        } = ast.kind(id)
        else {
            return Ok(());
        };
        let class_line = self.line_of(id);
        self.compile_decorators(decorators)?;

        let first_line = ast.definition_first_line(id);
        let qualname = self.child_qualname(name, true);
        self.enter_unit(id, qualname.clone(), first_line)?;
        self.set_line(class_line);
        self.compile_name("__name__", NameOp::Load)?;
        self.compile_name("__module__", NameOp::Store)?;
        self.emit_const(Const::Str(qualname.clone()));
        self.compile_name("__qualname__", NameOp::Store)?;
        if self.scope().has_annotations {
            self.emit(Opcode::SetupAnnotations);
        }
        let body = self.compile_docstring_store(body)?;
        self.compile_body(body)?;
        self.emit_return_none();
        let code = self.leave_unit(name, first_line, None)?;

        self.set_line(class_line);
        if self.version.has_precall() {
            self.emit(Opcode::PushNull);
        }
        self.emit(Opcode::LoadBuildClass);
        self.make_closure(code, 0, &qualname)?;
        self.emit_const(Const::Str(name.clone()));
        self.compile_call_helper(2, bases, keywords)?;
        self.apply_decorators(decorators.len());
        self.compile_name(name, NameOp::Store)
    }

    fn compile_lambda(&mut self, id: NodeId) -> Result<()> {
        let ast = self.ast;
        let NodeKind::Lambda { args, body } = ast.kind(id) else {
            return Ok(());
        };
        let line = self.line_of(id);
        let make_flags = self.compile_signature(args, None)?;
        let qualname = self.child_qualname("<lambda>", false);
        self.enter_unit(id, qualname.clone(), line)?;
        self.set_line(line);
        self.compile_lambda_body(*body)?;
        let code = self.leave_unit("<lambda>", line, Some(args))?;
        self.make_closure(code, make_flags, &qualname)
    }

    fn compile_lambda_body(&mut self, body: NodeId) -> Result<()> {
        self.builder().add_const(Const::None);
        self.compile_expr(body)?;
        if self.scope().is_generator {
            self.emit(Opcode::PopTop);
            self.emit_return_none();
        } else {
            self.emit(Opcode::ReturnValue);
        }
        Ok(())
    }

    /// A comprehension: a nested unit iterating its implicit `.0` argument,
    /// called with the first iterable.
    fn compile_comprehension(&mut self, id: NodeId) -> Result<()> {
        let ast = self.ast;
        let kind = ast.kind(id);
        let (Some(name), Some(generators)) = (kind.comprehension_name(), kind.generators()) else {
            return Ok(());
        };
        let Some(first) = generators.first() else {
            return Err(CompileError::new("comprehension without a clause", self.line_of(id)));
        };
        let line = self.line_of(id);
        let qualname = self.child_qualname(name, false);
        self.enter_unit(id, qualname.clone(), line)?;
        self.set_line(line);
        self.compile_comprehension_body(id)?;
        let code = self.leave_unit(name, line, None)?;

        self.make_closure(code, 0, &qualname)?;
        self.compile_iter(first.iter)?;
        self.emit(if first.is_async {
            Opcode::GetAiter
        } else {
            Opcode::GetIter
        });
        self.emit_simple_call_one();
        Ok(())
    }

    /// Inside of a comprehension unit: build the result, run the clauses,
    /// return.
    fn compile_comprehension_body(&mut self, id: NodeId) -> Result<()> {
        let kind = self.ast.kind(id);
        let Some(generators) = kind.generators() else {
            return Ok(());
        };
        match kind {
            NodeKind::ListComp { .. } => self.emit_arg(Opcode::BuildList, 0),
            NodeKind::SetComp { .. } => self.emit_arg(Opcode::BuildSet, 0),
            NodeKind::DictComp { .. } => self.emit_arg(Opcode::BuildMap, 0),
            _ => {}
        }
        self.compile_comprehension_clause(id, generators, 0)?;
        if matches!(kind, NodeKind::GeneratorExp { .. }) {
            self.emit_return_none();
        } else {
            self.emit(Opcode::ReturnValue);
        }
        Ok(())
    }

    /// Call the function below the top of stack with that one argument.
    fn emit_simple_call_one(&mut self) {
        if self.version.has_precall() {
            self.emit_arg(Opcode::Precall, 0);
            self.emit_arg(Opcode::Call, 0);
        } else {
            self.emit_arg(Opcode::CallFunction, 1);
        }
    }

    fn compile_comprehension_clause(
        &mut self,
        id: NodeId,
        generators: &[whence_python::Comprehension],
        index: usize,
    ) -> Result<()> {
        let generator = &generators[index];
        if index == 0 {
            self.emit_arg(Opcode::LoadFast, 0);
        } else {
            self.compile_iter(generator.iter)?;
            self.emit(if generator.is_async {
                Opcode::GetAiter
            } else {
                Opcode::GetIter
            });
        }
        let start = self.label_here();
        let anchor = self.emit_jump(Opcode::ForIter);
        self.compile_store(generator.target)?;
        let cleanup = self.new_label();
        for condition in &generator.ifs {
            self.compile_jump_if(*condition, false, cleanup)?;
        }
        if index + 1 < generators.len() {
            self.compile_comprehension_clause(id, generators, index + 1)?;
        } else {
            let depth = generators.len() as u32 + 1;
            let ast = self.ast;
            match ast.kind(id) {
                NodeKind::ListComp { elt, .. } => {
                    self.compile_expr(*elt)?;
                    self.emit_arg(Opcode::ListAppend, depth);
                }
                NodeKind::SetComp { elt, .. } => {
                    self.compile_expr(*elt)?;
                    self.emit_arg(Opcode::SetAdd, depth);
                }
                NodeKind::DictComp { key, value, .. } => {
                    self.compile_expr(*key)?;
                    self.compile_expr(*value)?;
                    self.emit_arg(Opcode::MapAdd, depth);
                }
                NodeKind::GeneratorExp { elt, .. } => {
                    self.compile_expr(*elt)?;
                    self.emit_yield_value();
                    self.emit(Opcode::PopTop);
                }
                _ => {}
            }
        }
        self.patch(cleanup);
        self.emit_jump_to(Opcode::JumpAbsolute, start);
        self.patch(anchor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whence_python::parse_module;

    fn compile(source: &str, version: RuntimeVersion) -> Arc<CodeObject> {
        let ast = parse_module(source).unwrap();
        Compiler::new(version).compile_module(&ast, "test.py").unwrap()
    }

    fn opnames(code: &CodeObject) -> Vec<&'static str> {
        code.instructions.iter().map(|i| i.opname()).collect()
    }

    #[test]
    fn empty_module_returns_none() {
        let code = compile("", RuntimeVersion::V3_8);
        assert_eq!(opnames(&code), ["LOAD_CONST", "RETURN_VALUE"]);
        assert_eq!(code.name, "<module>");
        assert_eq!(code.consts, [Const::None]);
    }

    #[test]
    fn function_units_are_nested() {
        let code = compile("def f(a, b=1):\n    return a\n", RuntimeVersion::V3_8);
        let f = code.nested_codes().next().unwrap();
        assert_eq!(f.name, "f");
        assert_eq!(f.argcount, 2);
        assert_eq!(f.varnames, ["a", "b"]);
        assert_eq!(opnames(f), ["LOAD_FAST", "RETURN_VALUE"]);
        assert_eq!(f.consts[0], Const::None);
        assert!(f.flags & flags::OPTIMIZED != 0);
        assert_eq!(
            opnames(&code),
            [
                "LOAD_CONST",
                "BUILD_TUPLE",
                "LOAD_CONST",
                "LOAD_CONST",
                "MAKE_FUNCTION",
                "STORE_NAME",
                "LOAD_CONST",
                "RETURN_VALUE"
            ]
        );
    }

    #[test]
    fn docstrings() {
        let code = compile("'''mod'''\ndef f():\n    'doc'\n", RuntimeVersion::V3_8);
        assert_eq!(opnames(&code)[..2], ["LOAD_CONST", "STORE_NAME"]);
        assert_eq!(code.names[0], "__doc__");
        let f = code.nested_codes().next().unwrap();
        assert_eq!(f.consts[0], Const::Str("doc".into()));
        assert_eq!(opnames(f), ["LOAD_CONST", "RETURN_VALUE"]);
    }

    #[test]
    fn qualnames_of_nested_scopes() {
        let source = "class A:\n    def m(self):\n        def g():\n            return lambda: 1\n";
        let code = compile(source, RuntimeVersion::V3_11);
        let all = crate::code::all_codes(&code);
        let qualnames: Vec<_> = all.iter().filter_map(|c| c.qualname.clone()).collect();
        assert_eq!(
            qualnames,
            ["<module>", "A", "A.m", "A.m.<locals>.g", "A.m.<locals>.g.<locals>.<lambda>"]
        );
    }

    #[test]
    fn global_def_has_plain_qualname() {
        let source = "def f():\n    global g\n    def g():\n        pass\n";
        let code = compile(source, RuntimeVersion::V3_8);
        let f = code.nested_codes().next().unwrap();
        let qualname = f
            .instructions
            .iter()
            .filter_map(|i| i.loaded_const())
            .find_map(|c| match c {
                Const::Str(s) => Some(s.clone()),
                _ => None,
            });
        assert_eq!(qualname.as_deref(), Some("g"));
        assert!(f.instructions.iter().any(|i| i.opname() == "STORE_GLOBAL"));
    }

    #[test]
    fn decorated_definition_starts_at_decorator() {
        let code = compile("@dec\n\ndef f():\n    pass\n", RuntimeVersion::V3_8);
        let f = code.nested_codes().next().unwrap();
        assert_eq!(f.first_line, 1);
        assert!(opnames(&code).contains(&"CALL_FUNCTION"));
    }

    #[test]
    fn closures_load_cells() {
        let source = "def f(x):\n    def g():\n        return x\n    return g\n";
        let code = compile(source, RuntimeVersion::V3_8);
        let f = code.nested_codes().next().unwrap();
        assert_eq!(f.cellvars, ["x"]);
        assert!(opnames(f).starts_with(&["LOAD_CLOSURE", "BUILD_TUPLE", "LOAD_CONST"]));
        let g = f.nested_codes().next().unwrap();
        assert_eq!(opnames(g), ["LOAD_DEREF", "RETURN_VALUE"]);
    }

    #[test]
    fn prologue_on_exception_table_runtimes() {
        let source = "def f(x):\n    def g():\n        yield x\n    return g\n";
        let code = compile(source, RuntimeVersion::V3_11);
        assert_eq!(opnames(&code)[0], "RESUME");
        let f = code.nested_codes().next().unwrap();
        assert_eq!(opnames(f)[..2], ["MAKE_CELL", "RESUME"]);
        let g = f.nested_codes().next().unwrap();
        assert_eq!(
            opnames(g)[..4],
            ["COPY_FREE_VARS", "RETURN_GENERATOR", "POP_TOP", "RESUME"]
        );
    }

    #[test]
    fn comprehension_units() {
        let code = compile("[x for x in y if x]\n", RuntimeVersion::V3_8);
        let comp = code.nested_codes().next().unwrap();
        assert_eq!(comp.name, "<listcomp>");
        assert_eq!(comp.varnames, [".0", "x"]);
        assert_eq!(
            opnames(comp),
            [
                "BUILD_LIST",
                "LOAD_FAST",
                "FOR_ITER",
                "STORE_FAST",
                "LOAD_FAST",
                "POP_JUMP_IF_FALSE",
                "LOAD_FAST",
                "LIST_APPEND",
                "JUMP_ABSOLUTE",
                "RETURN_VALUE"
            ]
        );
        assert!(opnames(&code).contains(&"GET_ITER"));
    }

    #[test]
    fn compile_errors() {
        for source in ["return 1\n", "break\n", "continue\n", "yield 1\n", "await x\n"] {
            let ast = parse_module(source).unwrap();
            let error = Compiler::new(RuntimeVersion::V3_8)
                .compile_module(&ast, "bad.py")
                .unwrap_err();
            assert_eq!(error.line, 1, "{}", source);
        }
    }

    #[test]
    fn star_handlers_split_exception_groups() {
        let source = "try:\n    f()\nexcept* ValueError as e:\n    g(e)\nexcept* TypeError:\n    pass\n";
        let code = compile(source, RuntimeVersion::V3_11);
        let names = opnames(&code);
        assert_eq!(names.iter().filter(|n| **n == "CHECK_EG_MATCH").count(), 2);
        assert_eq!(names.iter().filter(|n| **n == "PREP_RERAISE_STAR").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "POP_EXCEPT").count(), 2);
        let push = names.iter().position(|n| *n == "PUSH_EXC_INFO").unwrap();
        assert_eq!(names[push + 1..push + 4], ["COPY", "BUILD_LIST", "SWAP"]);
        assert!(code.names.iter().any(|n| n == "e"));
    }

    #[test]
    fn star_handlers_need_exception_groups() {
        let ast = parse_module("try:\n    pass\nexcept* E:\n    pass\n").unwrap();
        for version in [RuntimeVersion::V3_8, RuntimeVersion::V3_10] {
            let error = Compiler::new(version).compile_module(&ast, "bad.py").unwrap_err();
            assert!(error.message.contains("3.11 or later"), "{}", error.message);
            assert_eq!(error.line, 1);
        }
    }

    #[test]
    fn star_handlers_cannot_jump_out() {
        let source = "for x in y:\n    try:\n        pass\n    except* E:\n        break\n";
        let ast = parse_module(source).unwrap();
        let error = Compiler::new(RuntimeVersion::V3_11)
            .compile_module(&ast, "bad.py")
            .unwrap_err();
        assert_eq!(error.line, 5);
        assert!(error.message.contains("except* block"));

        let nested = "try:\n    pass\nexcept* E:\n    for x in y:\n        continue\n";
        compile(nested, RuntimeVersion::V3_11);
    }

    fn logical_opnames(code: &CodeObject) -> Vec<&'static str> {
        code.instructions
            .iter()
            .filter(|i| i.opcode != Opcode::ExtendedArg)
            .map(|i| i.opname())
            .collect()
    }

    fn module_body(ast: &Ast) -> Vec<NodeId> {
        match ast.kind(ast.root()) {
            NodeKind::Module { body } => body.clone(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn statement_fragments_are_slices_of_their_unit() {
        let source = "def f(a):\n    x = a + 1\n    for i in a:\n        x += g(i)\n    return x\n";
        let ast = parse_module(source).unwrap();
        let symbols = SymbolTable::build(&ast).unwrap();
        let def = module_body(&ast)[0];
        let NodeKind::FunctionDef { body, .. } = ast.kind(def) else {
            panic!("not a def");
        };
        for version in RuntimeVersion::ALL {
            let compiler = Compiler::new(version);
            let module = compiler.compile_module(&ast, "t.py").unwrap();
            let whole = logical_opnames(module.nested_codes().next().unwrap());
            let fragment = Fragment {
                unit: def,
                qualname: "f",
                statement: Some(body[1]),
            };
            let code = compiler
                .compile_fragment(&ast, &symbols, "t.py", fragment, None)
                .unwrap();
            assert_eq!(code.name, "f");
            let part = logical_opnames(&code);
            assert_eq!(part[..2], ["LOAD_FAST", "GET_ITER"], "{}", version);
            assert!(whole.windows(part.len()).any(|w| w == part.as_slice()), "{}", version);
        }
    }

    #[test]
    fn fragment_size_does_not_grow_with_the_module() {
        let mut source = String::new();
        for n in 0..500 {
            source.push_str(&format!("v{} = f(a{}) + g(b{})\n", n, n, n));
        }
        let ast = parse_module(&source).unwrap();
        let symbols = SymbolTable::build(&ast).unwrap();
        let body = module_body(&ast);
        let compiler = Compiler::new(RuntimeVersion::V3_10);
        let sizes: Vec<usize> = [0, 250, 499]
            .into_iter()
            .map(|n| {
                let fragment = Fragment {
                    unit: ast.root(),
                    qualname: "<module>",
                    statement: Some(body[n]),
                };
                compiler
                    .compile_fragment(&ast, &symbols, "big.py", fragment, None)
                    .unwrap()
                    .instructions
                    .len()
            })
            .collect();
        // LOAD_NAME, LOAD_NAME, CALL_FUNCTION, twice, then BINARY_ADD, STORE_NAME
        assert_eq!(sizes, [8, 8, 8]);
    }

    #[test]
    fn whole_unit_fragments_match_lambdas() {
        let source = "h = lambda x, y=2: x * y\n";
        let ast = parse_module(source).unwrap();
        let symbols = SymbolTable::build(&ast).unwrap();
        let lambda = ast
            .ids()
            .find(|id| matches!(ast.kind(*id), NodeKind::Lambda { .. }))
            .unwrap();
        for version in RuntimeVersion::ALL {
            let compiler = Compiler::new(version);
            let module = compiler.compile_module(&ast, "t.py").unwrap();
            let fragment = Fragment {
                unit: lambda,
                qualname: "<lambda>",
                statement: None,
            };
            let code = compiler
                .compile_fragment(&ast, &symbols, "t.py", fragment, None)
                .unwrap();
            let real = module.nested_codes().next().unwrap();
            assert_eq!(logical_opnames(&code), logical_opnames(real), "{}", version);
            assert_eq!(code.argcount, 2);
        }
    }
}
