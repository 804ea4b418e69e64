//! Statement compilation.

use whence_python::{Alias, NodeId, NodeKind, Operator, WithItem};

use super::{Block, CodeGen, CompileError, NameOp, Result, ScopeKind};
use crate::builder::JumpLabel;
use crate::code::Const;
use crate::opcode::{nb_op_arg, Opcode, COMPARE_EXCEPTION_MATCH};

const STAR_HANDLER_EXIT: &str = "'break', 'continue' and 'return' cannot appear in an except* block";

impl CodeGen<'_> {
    pub(super) fn compile_body(&mut self, body: &[NodeId]) -> Result<()> {
        for stmt in body {
            self.compile_stmt(*stmt)?;
        }
        Ok(())
    }

    pub(super) fn compile_stmt(&mut self, id: NodeId) -> Result<()> {
        let ast = self.ast;
        let line = self.line_of(id);
        self.set_line(line);
        match ast.kind(id) {
            NodeKind::FunctionDef { .. } => self.compile_function_def(id),
            NodeKind::ClassDef { .. } => self.compile_class_def(id),
            NodeKind::Return { value } => self.compile_return(*value, line),
            NodeKind::Delete { targets } => {
                for target in targets {
                    self.compile_delete(*target)?;
                }
                Ok(())
            }
            NodeKind::Assign { targets, value } => {
                self.compile_expr(*value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit_dup_top();
                    }
                    self.compile_store(*target)?;
                }
                Ok(())
            }
            NodeKind::AugAssign { target, op, value } => {
                self.compile_aug_assign(*target, *op, *value)
            }
            NodeKind::AnnAssign {
                target,
                annotation,
                value,
                simple,
            } => self.compile_ann_assign(*target, *annotation, *value, *simple),
            NodeKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async {
                    self.compile_async_for(*target, *iter, body, orelse)
                } else {
                    self.compile_for(*target, *iter, body, orelse)
                }
            }
            NodeKind::While { test, body, orelse } => self.compile_while(*test, body, orelse),
            NodeKind::If { test, body, orelse } => {
                let end = self.new_label();
                if orelse.is_empty() {
                    self.compile_jump_if(*test, false, end)?;
                    self.compile_body(body)?;
                } else {
                    let next = self.new_label();
                    self.compile_jump_if(*test, false, next)?;
                    self.compile_body(body)?;
                    self.emit_jump_to(Opcode::JumpForward, end);
                    self.patch(next);
                    self.compile_body(orelse)?;
                }
                self.patch(end);
                Ok(())
            }
            NodeKind::With {
                items,
                body,
                is_async,
            } => self.compile_with(items, 0, body, *is_async),
            NodeKind::Raise { exc, cause } => {
                let mut argc = 0;
                if let Some(exc) = exc {
                    self.compile_expr(*exc)?;
                    argc = 1;
                    if let Some(cause) = cause {
                        self.compile_expr(*cause)?;
                        argc = 2;
                    }
                }
                self.emit_arg(Opcode::RaiseVarargs, argc);
                Ok(())
            }
            NodeKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                if finalbody.is_empty() {
                    self.compile_try_except(body, handlers, orelse)
                } else {
                    self.compile_try_finally(body, handlers, orelse, finalbody, false)
                }
            }
            NodeKind::TryStar {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                if !self.version.has_exception_groups() {
                    return Err(CompileError::new(
                        format!("except* needs runtime 3.11 or later, not {}", self.version),
                        line,
                    ));
                }
                if finalbody.is_empty() {
                    self.compile_try_star(body, handlers, orelse)
                } else {
                    self.compile_try_finally(body, handlers, orelse, finalbody, true)
                }
            }
            NodeKind::Match { subject, cases } => self.compile_match(*subject, cases, line),
            NodeKind::Assert { test, msg } => self.compile_assert(*test, *msg),
            NodeKind::Import { names } => {
                for alias in names {
                    self.compile_import(alias)?;
                }
                Ok(())
            }
            NodeKind::ImportFrom {
                module,
                names,
                level,
            } => self.compile_import_from(module.as_deref(), names, *level, line),
            NodeKind::Global { .. } | NodeKind::Nonlocal { .. } | NodeKind::Pass => Ok(()),
            NodeKind::Expr { value } => {
                if self.folded(*value).is_some() {
                    // Constant statements compile to nothing; later runtimes
                    // keep a NOP to carry the line.
                    if self.version.counts_jumps_in_instructions() {
                        self.emit(Opcode::Nop);
                    }
                    return Ok(());
                }
                self.compile_expr(*value)?;
                self.emit(Opcode::PopTop);
                Ok(())
            }
            NodeKind::Break => self.compile_break(line),
            NodeKind::Continue => self.compile_continue(line),
            kind => Err(CompileError::new(
                format!("{} is not a statement", kind.type_name()),
                line,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    /// Store the value on top of the stack into `target`.
    pub(super) fn compile_store(&mut self, target: NodeId) -> Result<()> {
        let ast = self.ast;
        let line = self.line_of(target);
        let previous = self.set_line(line);
        match ast.kind(target) {
            NodeKind::Name { id, .. } => self.compile_name(id, NameOp::Store)?,
            NodeKind::Attribute { value, attr, .. } => {
                self.compile_expr(*value)?;
                self.builder().emit_name(Opcode::StoreAttr, attr);
            }
            NodeKind::Subscript { value, slice, .. } => {
                self.compile_expr(*value)?;
                self.compile_expr(*slice)?;
                self.emit(Opcode::StoreSubscr);
            }
            NodeKind::Tuple { elts, .. } | NodeKind::List { elts, .. } => {
                self.compile_unpack(elts, line)?;
            }
            NodeKind::Starred { .. } => {
                return Err(CompileError::new(
                    "starred assignment target must be in a list or tuple",
                    line,
                ));
            }
            kind => {
                return Err(CompileError::new(
                    format!("cannot assign to {}", kind.type_name()),
                    line,
                ));
            }
        }
        self.set_line(previous);
        Ok(())
    }

    fn compile_unpack(&mut self, elts: &[NodeId], line: u32) -> Result<()> {
        let ast = self.ast;
        let starred: Vec<usize> = elts
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(ast.kind(**e), NodeKind::Starred { .. }))
            .map(|(i, _)| i)
            .collect();
        match starred.as_slice() {
            [] => self.emit_arg(Opcode::UnpackSequence, elts.len() as u32),
            [index] => {
                let before = *index as u32;
                let after = (elts.len() - index - 1) as u32;
                if before > 0xff || after > 0xff_ffff {
                    return Err(CompileError::new(
                        "too many expressions in star-unpacking assignment",
                        line,
                    ));
                }
                self.emit_arg(Opcode::UnpackEx, before | after << 8);
            }
            _ => {
                return Err(CompileError::new(
                    "multiple starred expressions in assignment",
                    line,
                ))
            }
        }
        for elt in elts {
            match ast.kind(*elt) {
                NodeKind::Starred { value, .. } => self.compile_store(*value)?,
                _ => self.compile_store(*elt)?,
            }
        }
        Ok(())
    }

    fn compile_delete(&mut self, target: NodeId) -> Result<()> {
        let ast = self.ast;
        let previous = self.set_line(self.line_of(target));
        match ast.kind(target) {
            NodeKind::Name { id, .. } => self.compile_name(id, NameOp::Delete)?,
            NodeKind::Attribute { value, attr, .. } => {
                self.compile_expr(*value)?;
                self.builder().emit_name(Opcode::DeleteAttr, attr);
            }
            NodeKind::Subscript { value, slice, .. } => {
                self.compile_expr(*value)?;
                self.compile_expr(*slice)?;
                self.emit(Opcode::DeleteSubscr);
            }
            NodeKind::Tuple { elts, .. } | NodeKind::List { elts, .. } => {
                for elt in elts {
                    self.compile_delete(*elt)?;
                }
            }
            kind => {
                return Err(CompileError::new(
                    format!("cannot delete {}", kind.type_name()),
                    self.line_of(target),
                ));
            }
        }
        self.set_line(previous);
        Ok(())
    }

    fn emit_inplace(&mut self, op: Operator) {
        if self.version.has_unified_binary_op() {
            self.emit_arg(Opcode::BinaryOp, nb_op_arg(op, true));
        } else {
            self.emit(Opcode::for_binary(op, true));
        }
    }

    fn compile_aug_assign(
        &mut self,
        target: NodeId,
        op: Operator,
        value: NodeId,
    ) -> Result<()> {
        let ast = self.ast;
        match ast.kind(target) {
            NodeKind::Name { id, .. } => {
                self.compile_name(id, NameOp::Load)?;
                self.compile_expr(value)?;
                self.emit_inplace(op);
                self.compile_name(id, NameOp::Store)
            }
            NodeKind::Attribute {
                value: object,
                attr,
                ..
            } => {
                self.compile_expr(*object)?;
                self.emit_dup_top();
                self.builder().emit_name(Opcode::LoadAttr, attr);
                self.compile_expr(value)?;
                self.emit_inplace(op);
                self.emit_rot_two();
                self.builder().emit_name(Opcode::StoreAttr, attr);
                Ok(())
            }
            NodeKind::Subscript {
                value: object,
                slice,
                ..
            } => {
                self.compile_expr(*object)?;
                self.compile_expr(*slice)?;
                self.emit_dup_top_two();
                self.emit(Opcode::BinarySubscr);
                self.compile_expr(value)?;
                self.emit_inplace(op);
                self.emit_rot_three();
                self.emit(Opcode::StoreSubscr);
                Ok(())
            }
            kind => Err(CompileError::new(
                format!("illegal expression for augmented assignment: {}", kind.type_name()),
                self.line_of(target),
            )),
        }
    }

    fn compile_ann_assign(
        &mut self,
        target: NodeId,
        annotation: NodeId,
        value: Option<NodeId>,
        simple: bool,
    ) -> Result<()> {
        let ast = self.ast;
        let evaluates_annotations =
            matches!(self.scope().kind, ScopeKind::Module | ScopeKind::Class);
        if let Some(value) = value {
            self.compile_expr(value)?;
            self.compile_store(target)?;
        }
        match ast.kind(target) {
            NodeKind::Name { id, .. } => {
                if simple && evaluates_annotations {
                    self.compile_expr(annotation)?;
                    self.compile_name("__annotations__", NameOp::Load)?;
                    self.emit_const(Const::Str(id.clone()));
                    self.emit(Opcode::StoreSubscr);
                    return Ok(());
                }
            }
            NodeKind::Attribute { value: object, .. } if value.is_none() => {
                self.compile_expr(*object)?;
                self.emit(Opcode::PopTop);
            }
            NodeKind::Subscript {
                value: object,
                slice,
                ..
            } if value.is_none() => {
                self.compile_expr(*object)?;
                self.emit(Opcode::PopTop);
                self.compile_annotated_slice(*slice)?;
            }
            _ => {}
        }
        if !simple && evaluates_annotations {
            self.compile_expr(annotation)?;
            self.emit(Opcode::PopTop);
        }
        Ok(())
    }

    /// Evaluate and discard the parts of an annotated subscript target.
    fn compile_annotated_slice(&mut self, slice: NodeId) -> Result<()> {
        let ast = self.ast;
        match ast.kind(slice) {
            NodeKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.compile_expr(*part)?;
                    self.emit(Opcode::PopTop);
                }
            }
            NodeKind::Tuple { elts, .. } => {
                for elt in elts {
                    self.compile_annotated_slice(*elt)?;
                }
            }
            _ => {
                self.compile_expr(slice)?;
                self.emit(Opcode::PopTop);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loops and unwinding
    // ------------------------------------------------------------------

    fn compile_for(
        &mut self,
        target: NodeId,
        iter: NodeId,
        body: &[NodeId],
        orelse: &[NodeId],
    ) -> Result<()> {
        let end = self.new_label();
        self.compile_iter(iter)?;
        self.emit(Opcode::GetIter);
        let start = self.label_here();
        let cleanup = self.emit_jump(Opcode::ForIter);
        self.compile_store(target)?;
        self.unit_mut().blocks.push(Block::Loop {
            is_for: true,
            start,
            exit: end,
        });
        self.compile_body(body)?;
        self.unit_mut().blocks.pop();
        self.emit_jump_to(Opcode::JumpAbsolute, start);
        self.patch(cleanup);
        self.compile_body(orelse)?;
        self.patch(end);
        Ok(())
    }

    fn compile_async_for(
        &mut self,
        target: NodeId,
        iter: NodeId,
        body: &[NodeId],
        orelse: &[NodeId],
    ) -> Result<()> {
        let line = self.unit().builder.line();
        if !self.scope().is_coroutine {
            return Err(CompileError::new("'async for' outside async function", line));
        }
        let end = self.new_label();
        let except = self.new_label();
        self.compile_expr(iter)?;
        self.emit(Opcode::GetAiter);
        let start = self.label_here();
        if !self.version.has_exception_tables() {
            self.emit_jump_to(Opcode::SetupFinally, except);
        }
        self.emit(Opcode::GetAnext);
        self.emit_const(Const::None);
        self.emit_await_tail();
        if !self.version.has_exception_tables() {
            self.emit(Opcode::PopBlock);
        }
        self.compile_store(target)?;
        self.unit_mut().blocks.push(Block::Loop {
            is_for: true,
            start,
            exit: end,
        });
        self.compile_body(body)?;
        self.unit_mut().blocks.pop();
        self.emit_jump_to(Opcode::JumpAbsolute, start);
        self.patch(except);
        self.emit(Opcode::EndAsyncFor);
        self.compile_body(orelse)?;
        self.patch(end);
        Ok(())
    }

    fn compile_while(&mut self, test: NodeId, body: &[NodeId], orelse: &[NodeId]) -> Result<()> {
        let start = self.label_here();
        let exit = self.new_label();
        let end = self.new_label();
        self.compile_jump_if(test, false, exit)?;
        self.unit_mut().blocks.push(Block::Loop {
            is_for: false,
            start,
            exit: end,
        });
        self.compile_body(body)?;
        self.unit_mut().blocks.pop();
        self.emit_jump_to(Opcode::JumpAbsolute, start);
        self.patch(exit);
        self.compile_body(orelse)?;
        self.patch(end);
        Ok(())
    }

    /// Leave `block` on the way out of it. `preserve_top` keeps a return
    /// value on top of the stack.
    fn emit_unwind(&mut self, block: Block, preserve_top: bool) {
        let tables = self.version.has_exception_tables();
        match block {
            Block::Loop { is_for: true, .. } => {
                if preserve_top {
                    self.emit_rot_two();
                }
                self.emit(Opcode::PopTop);
            }
            Block::Loop { is_for: false, .. } => {}
            Block::Try | Block::Finally => {
                if !tables {
                    self.emit(Opcode::PopBlock);
                }
            }
            Block::Handler | Block::StarHandler => {
                if preserve_top {
                    self.emit_rot_two();
                    self.emit(Opcode::PopTop);
                }
                self.emit(Opcode::PopExcept);
            }
            Block::With { is_async } => {
                if preserve_top {
                    self.emit_rot_two();
                }
                if !tables {
                    self.emit(Opcode::PopBlock);
                }
                if self.version.has_exception_match_jump() {
                    self.emit_with_exit_call();
                    if is_async {
                        self.emit(Opcode::GetAwaitable);
                        self.emit_const(Const::None);
                        self.emit_await_tail();
                    }
                    self.emit(Opcode::PopTop);
                } else {
                    self.emit(Opcode::BeginFinally);
                    self.emit(Opcode::WithCleanupStart);
                    if is_async {
                        self.emit(Opcode::GetAwaitable);
                        self.emit_const(Const::None);
                        self.emit_await_tail();
                    }
                    self.emit(Opcode::WithCleanupFinish);
                    self.emit_arg(Opcode::PopFinally, 0);
                }
            }
        }
    }

    fn compile_return(&mut self, value: Option<NodeId>, line: u32) -> Result<()> {
        if !self.scope().kind.is_function_like() {
            return Err(CompileError::new("'return' outside function", line));
        }
        let blocks: Vec<Block> = self.unit().blocks.iter().rev().copied().collect();
        if blocks.iter().any(|b| matches!(b, Block::StarHandler)) {
            return Err(CompileError::new(STAR_HANDLER_EXIT, line));
        }
        match value {
            Some(value) => {
                self.compile_expr(value)?;
                for block in blocks {
                    self.emit_unwind(block, true);
                }
            }
            None => {
                for block in blocks {
                    self.emit_unwind(block, false);
                }
                self.emit_const(Const::None);
            }
        }
        self.emit(Opcode::ReturnValue);
        Ok(())
    }

    /// Blocks inside the innermost loop, innermost first, and that loop.
    fn innermost_loop(&self) -> Option<(Vec<Block>, Block)> {
        let blocks = &self.unit().blocks;
        let position = blocks
            .iter()
            .rposition(|b| matches!(b, Block::Loop { .. }))?;
        let inner = blocks[position + 1..].iter().rev().copied().collect();
        Some((inner, blocks[position]))
    }

    fn compile_break(&mut self, line: u32) -> Result<()> {
        let Some((inner, Block::Loop { is_for, exit, .. })) = self.innermost_loop() else {
            return Err(CompileError::new("'break' outside loop", line));
        };
        if inner.iter().any(|b| matches!(b, Block::StarHandler)) {
            return Err(CompileError::new(STAR_HANDLER_EXIT, line));
        }
        for block in inner {
            self.emit_unwind(block, false);
        }
        if is_for {
            self.emit(Opcode::PopTop);
        }
        self.emit_jump_to(Opcode::JumpAbsolute, exit);
        Ok(())
    }

    fn compile_continue(&mut self, line: u32) -> Result<()> {
        let Some((inner, Block::Loop { start, .. })) = self.innermost_loop() else {
            return Err(CompileError::new("'continue' not properly in loop", line));
        };
        if inner.iter().any(|b| matches!(b, Block::StarHandler)) {
            return Err(CompileError::new(STAR_HANDLER_EXIT, line));
        }
        for block in inner {
            self.emit_unwind(block, false);
        }
        self.emit_jump_to(Opcode::JumpAbsolute, start);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    fn compile_try_except(
        &mut self,
        body: &[NodeId],
        handlers: &[NodeId],
        orelse: &[NodeId],
    ) -> Result<()> {
        let tables = self.version.has_exception_tables();
        let except = self.new_label();
        let orelse_label = self.new_label();
        let end = self.new_label();
        if tables {
            self.emit(Opcode::Nop);
        } else {
            self.emit_jump_to(Opcode::SetupFinally, except);
        }
        self.unit_mut().blocks.push(Block::Try);
        self.compile_body(body)?;
        self.unit_mut().blocks.pop();
        if !tables {
            self.emit(Opcode::PopBlock);
        }
        self.emit_jump_to(Opcode::JumpForward, orelse_label);

        self.patch(except);
        if tables {
            self.emit(Opcode::PushExcInfo);
        }
        for (i, handler) in handlers.iter().enumerate() {
            self.compile_handler(*handler, i + 1 == handlers.len(), end)?;
        }
        if tables {
            self.emit_arg(Opcode::Reraise, 0);
            self.emit_arg(Opcode::Copy, 3);
            self.emit(Opcode::PopExcept);
            self.emit_arg(Opcode::Reraise, 1);
        } else if self.version.has_exception_match_jump() {
            self.emit_arg(Opcode::Reraise, 0);
        } else {
            self.emit(Opcode::EndFinally);
        }
        self.patch(orelse_label);
        self.compile_body(orelse)?;
        self.patch(end);
        Ok(())
    }

    fn compile_handler(&mut self, id: NodeId, is_last: bool, end: JumpLabel) -> Result<()> {
        let ast = self.ast;
        let NodeKind::ExceptHandler { type_, name, body } = ast.kind(id) else {
            return Ok(());
        };
        let line = self.line_of(id);
        self.set_line(line);
        let tables = self.version.has_exception_tables();
        let next = self.new_label();
        match type_ {
            Some(type_) => {
                if !tables {
                    self.emit_dup_top();
                }
                self.compile_expr(*type_)?;
                if tables {
                    self.emit(Opcode::CheckExcMatch);
                    self.emit_jump_to(Opcode::PopJumpIfFalse, next);
                } else if self.version.has_exception_match_jump() {
                    self.emit_jump_to(Opcode::JumpIfNotExcMatch, next);
                } else {
                    self.emit_arg(Opcode::CompareOp, COMPARE_EXCEPTION_MATCH);
                    self.emit_jump_to(Opcode::PopJumpIfFalse, next);
                }
            }
            None if !is_last => {
                return Err(CompileError::new("default 'except:' must be last", line));
            }
            None => {}
        }
        if !tables {
            self.emit(Opcode::PopTop);
        }
        match name {
            Some(name) => self.compile_name(name, NameOp::Store)?,
            None => self.emit(Opcode::PopTop),
        }
        if !tables {
            self.emit(Opcode::PopTop);
        }
        self.unit_mut().blocks.push(Block::Handler);
        self.compile_body(body)?;
        self.unit_mut().blocks.pop();
        self.emit(Opcode::PopExcept);
        if let Some(name) = name {
            self.emit_const(Const::None);
            self.compile_name(name, NameOp::Store)?;
            self.compile_name(name, NameOp::Delete)?;
        }
        self.emit_jump_to(Opcode::JumpForward, end);
        self.patch(next);
        Ok(())
    }

    /// `try` with `except*` handlers. Each handler takes the part of the
    /// exception group its type matches and hands the rest to the next;
    /// whatever is left, together with anything the handlers raised, is
    /// re-raised at the end.
    fn compile_try_star(
        &mut self,
        body: &[NodeId],
        handlers: &[NodeId],
        orelse: &[NodeId],
    ) -> Result<()> {
        let except = self.new_label();
        let orelse_label = self.new_label();
        let reraise = self.new_label();
        let end = self.new_label();
        self.emit(Opcode::Nop);
        self.unit_mut().blocks.push(Block::Try);
        self.compile_body(body)?;
        self.unit_mut().blocks.pop();
        self.emit_jump_to(Opcode::JumpForward, orelse_label);

        self.patch(except);
        self.emit(Opcode::PushExcInfo);
        // [exc, raised, group]
        self.emit_arg(Opcode::Copy, 1);
        self.emit_arg(Opcode::BuildList, 0);
        self.emit_arg(Opcode::Swap, 2);
        for handler in handlers {
            self.compile_star_handler(*handler)?;
        }
        self.emit_arg(Opcode::ListAppend, 1);
        self.emit(Opcode::PrepReraiseStar);
        self.emit_arg(Opcode::Copy, 1);
        self.emit_const(Const::None);
        self.emit_arg(Opcode::IsOp, 1);
        self.emit_jump_to(Opcode::PopJumpIfTrue, reraise);
        self.emit(Opcode::PopTop);
        self.emit(Opcode::PopExcept);
        self.emit_jump_to(Opcode::JumpForward, end);
        self.patch(reraise);
        self.emit_arg(Opcode::Swap, 2);
        self.emit(Opcode::PopExcept);
        self.emit_arg(Opcode::Reraise, 0);

        self.patch(orelse_label);
        self.compile_body(orelse)?;
        self.patch(end);
        Ok(())
    }

    fn compile_star_handler(&mut self, id: NodeId) -> Result<()> {
        let ast = self.ast;
        let NodeKind::ExceptHandler { type_, name, body } = ast.kind(id) else {
            return Ok(());
        };
        let line = self.line_of(id);
        self.set_line(line);
        let Some(type_) = type_ else {
            return Err(CompileError::new("expected one or more exception types", line));
        };
        let next = self.new_label();
        let no_match = self.new_label();
        self.compile_expr(*type_)?;
        self.emit(Opcode::CheckEgMatch);
        self.emit_arg(Opcode::Copy, 1);
        self.emit_const(Const::None);
        self.emit_arg(Opcode::IsOp, 0);
        self.emit_jump_to(Opcode::PopJumpIfTrue, no_match);
        match name {
            Some(name) => self.compile_name(name, NameOp::Store)?,
            None => self.emit(Opcode::PopTop),
        }
        self.unit_mut().blocks.push(Block::StarHandler);
        self.compile_body(body)?;
        self.unit_mut().blocks.pop();
        if let Some(name) = name {
            self.emit_const(Const::None);
            self.compile_name(name, NameOp::Store)?;
            self.compile_name(name, NameOp::Delete)?;
        }
        self.emit_jump_to(Opcode::JumpForward, next);
        self.patch(no_match);
        self.emit(Opcode::PopTop);
        self.patch(next);
        Ok(())
    }

    /// `try` with a `finally` clause. The clause is compiled once; normal
    /// completion and unwinding both reach that single copy.
    fn compile_try_finally(
        &mut self,
        body: &[NodeId],
        handlers: &[NodeId],
        orelse: &[NodeId],
        finalbody: &[NodeId],
        star: bool,
    ) -> Result<()> {
        let tables = self.version.has_exception_tables();
        let finally = self.new_label();
        if tables {
            self.emit(Opcode::Nop);
        } else {
            self.emit_jump_to(Opcode::SetupFinally, finally);
        }
        self.unit_mut().blocks.push(Block::Finally);
        if handlers.is_empty() {
            self.compile_body(body)?;
        } else if star {
            self.compile_try_star(body, handlers, orelse)?;
        } else {
            self.compile_try_except(body, handlers, orelse)?;
        }
        self.unit_mut().blocks.pop();
        if !tables {
            self.emit(Opcode::PopBlock);
        }
        let three_eight = !self.version.has_exception_match_jump();
        if three_eight {
            self.emit(Opcode::BeginFinally);
        }
        self.patch(finally);
        self.compile_body(finalbody)?;
        if three_eight {
            self.emit(Opcode::EndFinally);
        }
        Ok(())
    }

    fn compile_assert(&mut self, test: NodeId, msg: Option<NodeId>) -> Result<()> {
        let end = self.new_label();
        self.compile_jump_if(test, true, end)?;
        if self.version.has_exception_match_jump() {
            self.emit(Opcode::LoadAssertionError);
        } else {
            self.builder().emit_name(Opcode::LoadGlobal, "AssertionError");
        }
        if let Some(msg) = msg {
            self.compile_expr(msg)?;
            if self.version.has_precall() {
                self.emit_arg(Opcode::Precall, 0);
                self.emit_arg(Opcode::Call, 0);
            } else {
                self.emit_arg(Opcode::CallFunction, 1);
            }
        }
        self.emit_arg(Opcode::RaiseVarargs, 1);
        self.patch(end);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Context managers
    // ------------------------------------------------------------------

    /// Call `__exit__(None, None, None)` on normal exit from a `with` body.
    fn emit_with_exit_call(&mut self) {
        self.emit_const(Const::None);
        if self.version.has_precall() {
            self.emit_const(Const::None);
            self.emit_const(Const::None);
            self.emit_arg(Opcode::Precall, 2);
            self.emit_arg(Opcode::Call, 2);
        } else {
            self.emit_dup_top();
            self.emit_dup_top();
            self.emit_arg(Opcode::CallFunction, 3);
        }
    }

    fn compile_with(
        &mut self,
        items: &[WithItem],
        index: usize,
        body: &[NodeId],
        is_async: bool,
    ) -> Result<()> {
        let Some(item) = items.get(index) else {
            return self.compile_body(body);
        };
        let line = self.unit().builder.line();
        if is_async && !self.scope().is_coroutine {
            return Err(CompileError::new("'async with' outside async function", line));
        }
        let tables = self.version.has_exception_tables();
        let three_eight = !self.version.has_exception_match_jump();
        let cleanup = self.new_label();
        let exit = self.new_label();

        self.compile_expr(item.context_expr)?;
        self.set_line(line);
        if is_async {
            self.emit(Opcode::BeforeAsyncWith);
            self.emit(Opcode::GetAwaitable);
            self.emit_const(Const::None);
            self.emit_await_tail();
            if !tables {
                self.emit_jump_to(Opcode::SetupAsyncWith, cleanup);
            }
        } else if tables {
            self.emit(Opcode::BeforeWith);
        } else {
            self.emit_jump_to(Opcode::SetupWith, cleanup);
        }
        match item.optional_vars {
            Some(target) => self.compile_store(target)?,
            None => self.emit(Opcode::PopTop),
        }

        self.unit_mut().blocks.push(Block::With { is_async });
        self.compile_with(items, index + 1, body, is_async)?;
        self.unit_mut().blocks.pop();
        self.set_line(line);
        if !tables {
            self.emit(Opcode::PopBlock);
        }

        if three_eight {
            self.emit(Opcode::BeginFinally);
            self.patch(cleanup);
            self.emit(Opcode::WithCleanupStart);
            if is_async {
                self.emit(Opcode::GetAwaitable);
                self.emit_const(Const::None);
                self.emit_await_tail();
            }
            self.emit(Opcode::WithCleanupFinish);
            self.emit(Opcode::EndFinally);
            self.patch(exit);
            return Ok(());
        }

        self.emit_with_exit_call();
        if is_async {
            self.emit(Opcode::GetAwaitable);
            self.emit_const(Const::None);
            self.emit_await_tail();
        }
        self.emit(Opcode::PopTop);
        self.emit_jump_to(Opcode::JumpForward, exit);

        self.patch(cleanup);
        if tables {
            self.emit(Opcode::PushExcInfo);
        }
        self.emit(Opcode::WithExceptStart);
        if is_async {
            self.emit(Opcode::GetAwaitable);
            self.emit_const(Const::None);
            self.emit_await_tail();
        }
        let suppressed = self.emit_jump(Opcode::PopJumpIfTrue);
        self.emit_arg(Opcode::Reraise, if tables { 2 } else { 1 });
        self.patch(suppressed);
        self.emit(Opcode::PopTop);
        if tables {
            self.emit(Opcode::PopExcept);
            self.emit(Opcode::PopTop);
            self.emit(Opcode::PopTop);
        } else {
            self.emit(Opcode::PopTop);
            self.emit(Opcode::PopTop);
            self.emit(Opcode::PopExcept);
            self.emit(Opcode::PopTop);
        }
        self.patch(exit);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    fn compile_import(&mut self, alias: &Alias) -> Result<()> {
        self.emit_const(Const::Int(0));
        self.emit_const(Const::None);
        self.builder().emit_name(Opcode::ImportName, &alias.name);
        match &alias.asname {
            Some(asname) if alias.name.contains('.') => {
                let parts: Vec<&str> = alias.name.split('.').skip(1).collect();
                for (i, part) in parts.iter().enumerate() {
                    self.builder().emit_name(Opcode::ImportFrom, part);
                    if i + 1 < parts.len() {
                        self.emit_rot_two();
                        self.emit(Opcode::PopTop);
                    }
                }
                self.compile_name(asname, NameOp::Store)?;
                self.emit(Opcode::PopTop);
            }
            _ => self.compile_name(alias.bound_name(), NameOp::Store)?,
        }
        Ok(())
    }

    fn compile_import_from(
        &mut self,
        module: Option<&str>,
        names: &[Alias],
        level: u32,
        line: u32,
    ) -> Result<()> {
        self.emit_const(Const::Int(i128::from(level)));
        let fromlist = names.iter().map(|a| Const::Str(a.name.clone())).collect();
        self.emit_const(Const::Tuple(fromlist));
        self.builder()
            .emit_name(Opcode::ImportName, module.unwrap_or(""));
        if names.len() == 1 && names[0].name == "*" {
            if self.scope().kind != ScopeKind::Module {
                return Err(CompileError::new(
                    "import * only allowed at module level",
                    line,
                ));
            }
            self.emit(Opcode::ImportStar);
            return Ok(());
        }
        for alias in names {
            self.builder().emit_name(Opcode::ImportFrom, &alias.name);
            self.compile_name(alias.bound_name(), NameOp::Store)?;
        }
        self.emit(Opcode::PopTop);
        Ok(())
    }
}
