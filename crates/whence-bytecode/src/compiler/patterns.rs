//! `match` statement compilation.
//!
//! A pattern consumes the value on top of the stack whether it matches or
//! not. A failed test jumps to a label that pops whatever the pattern has
//! pushed so far: `fail_pop[n]` pops `n` items and falls into
//! `fail_pop[n - 1]`. Captures are stored as soon as their subpattern
//! matches.

use std::collections::{BTreeSet, HashSet};

use whence_python::{CmpOperator, MatchCase, NodeId, NodeKind};

use super::{CodeGen, CompileError, NameOp, Result};
use crate::builder::JumpLabel;
use crate::code::Const;
use crate::opcode::{compare_instruction, Opcode};
use crate::version::RuntimeVersion;

/// State of the pattern being compiled.
#[derive(Debug, Default)]
struct PatternContext {
    fail_pop: Vec<JumpLabel>,
    /// Items a failure must pop, not counting the value under test.
    on_top: usize,
    /// Names captured so far, in order.
    stores: Vec<String>,
    /// Whether a bare capture or wildcard may appear here.
    allow_irrefutable: bool,
}

impl CodeGen<'_> {
    pub(super) fn compile_match(
        &mut self,
        subject: NodeId,
        cases: &[MatchCase],
        line: u32,
    ) -> Result<()> {
        if !self.version.has_pattern_matching() {
            return Err(CompileError::new(
                format!("match statements need runtime 3.10 or later, not {}", self.version),
                line,
            ));
        }
        self.compile_expr(subject)?;
        let end = self.new_label();
        let has_default = cases.len() > 1
            && cases
                .last()
                .is_some_and(|case| case.guard.is_none() && self.is_wildcard(case.pattern));
        let tested = if has_default { cases.len() - 1 } else { cases.len() };
        for (i, case) in cases[..tested].iter().enumerate() {
            let last = i + 1 == tested;
            self.set_line(self.line_of(case.pattern));
            if !last {
                self.emit_dup_top();
            }
            let mut pc = PatternContext {
                allow_irrefutable: case.guard.is_some() || i + 1 == cases.len(),
                ..PatternContext::default()
            };
            self.compile_pattern(case.pattern, &mut pc)?;
            if let Some(guard) = case.guard {
                let fail = self.fail_label(&mut pc, 0);
                self.compile_jump_if(guard, false, fail)?;
            }
            if !last {
                self.emit(Opcode::PopTop);
            }
            self.compile_body(&case.body)?;
            self.emit_jump_to(Opcode::JumpForward, end);
            self.emit_fail_pops(pc);
        }
        if has_default {
            if let Some(case) = cases.last() {
                self.set_line(self.line_of(case.pattern));
                self.emit(Opcode::Nop);
                self.compile_body(&case.body)?;
            }
        }
        self.patch(end);
        Ok(())
    }

    fn is_wildcard(&self, pattern: NodeId) -> bool {
        matches!(
            self.ast.kind(pattern),
            NodeKind::MatchAs {
                pattern: None,
                name: None
            }
        )
    }

    fn fail_label(&mut self, pc: &mut PatternContext, pops: usize) -> JumpLabel {
        while pc.fail_pop.len() <= pops {
            let label = self.new_label();
            pc.fail_pop.push(label);
        }
        pc.fail_pop[pops]
    }

    fn jump_to_fail_pop(&mut self, pc: &mut PatternContext, opcode: Opcode) {
        let pops = pc.on_top;
        let label = self.fail_label(pc, pops);
        self.emit_jump_to(opcode, label);
    }

    fn emit_fail_pops(&mut self, pc: PatternContext) {
        let Some((first, rest)) = pc.fail_pop.split_first() else {
            return;
        };
        for label in rest.iter().rev() {
            self.patch(*label);
            self.emit(Opcode::PopTop);
        }
        self.patch(*first);
    }

    /// Jump to failure unless `MATCH_KEYS` or `MATCH_CLASS` extracted its
    /// values. 3.10 pushes a flag above them; later runtimes push `None`
    /// in their place.
    fn jump_unless_extracted(&mut self, pc: &mut PatternContext) {
        if self.version > RuntimeVersion::V3_10 {
            self.emit_arg(Opcode::Copy, 1);
            self.emit_const(Const::None);
            self.emit_arg(Opcode::IsOp, 1);
        }
        self.jump_to_fail_pop(pc, Opcode::PopJumpIfFalse);
    }

    fn emit_length_check(&mut self, pc: &mut PatternContext, op: CmpOperator, size: usize) {
        self.emit(Opcode::GetLen);
        self.emit_const(Const::Int(size as i128));
        let (opcode, arg) = compare_instruction(op, self.version);
        self.emit_arg(opcode, arg);
        self.jump_to_fail_pop(pc, Opcode::PopJumpIfFalse);
    }

    fn record_capture(&self, name: &str, pc: &mut PatternContext) -> Result<()> {
        if pc.stores.iter().any(|stored| stored == name) {
            return Err(CompileError::new(
                format!("multiple assignments to name '{}' in pattern", name),
                self.unit().builder.line(),
            ));
        }
        pc.stores.push(name.to_string());
        Ok(())
    }

    fn store_capture(&mut self, name: Option<&str>, pc: &mut PatternContext) -> Result<()> {
        match name {
            Some(name) => {
                self.record_capture(name, pc)?;
                self.compile_name(name, NameOp::Store)
            }
            None => {
                self.emit(Opcode::PopTop);
                Ok(())
            }
        }
    }

    fn compile_pattern(&mut self, id: NodeId, pc: &mut PatternContext) -> Result<()> {
        let ast = self.ast;
        let line = self.line_of(id);
        let previous = self.set_line(line);
        match ast.kind(id) {
            NodeKind::MatchValue { value } => {
                self.compile_expr(*value)?;
                let (opcode, arg) = compare_instruction(CmpOperator::Eq, self.version);
                self.emit_arg(opcode, arg);
                self.jump_to_fail_pop(pc, Opcode::PopJumpIfFalse);
            }
            NodeKind::MatchSingleton { value } => {
                self.emit_const(Const::from(value));
                self.emit_arg(Opcode::IsOp, 0);
                self.jump_to_fail_pop(pc, Opcode::PopJumpIfFalse);
            }
            NodeKind::MatchAs {
                pattern: None,
                name,
            } => {
                if !pc.allow_irrefutable {
                    let message = match name {
                        Some(name) => {
                            format!("name capture '{}' makes remaining patterns unreachable", name)
                        }
                        None => "wildcard makes remaining patterns unreachable".to_string(),
                    };
                    return Err(CompileError::new(message, line));
                }
                self.store_capture(name.as_deref(), pc)?;
            }
            NodeKind::MatchAs {
                pattern: Some(pattern),
                name,
            } => {
                self.emit_dup_top();
                pc.on_top += 1;
                self.compile_pattern(*pattern, pc)?;
                pc.on_top -= 1;
                self.store_capture(name.as_deref(), pc)?;
            }
            NodeKind::MatchOr { patterns } => self.compile_or_pattern(patterns, pc)?,
            NodeKind::MatchSequence { patterns } => self.compile_sequence_pattern(patterns, pc)?,
            NodeKind::MatchMapping {
                keys,
                patterns,
                rest,
            } => self.compile_mapping_pattern(keys, patterns, rest.as_deref(), pc)?,
            NodeKind::MatchClass {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            } => self.compile_class_pattern(*cls, patterns, kwd_attrs, kwd_patterns, pc)?,
            NodeKind::MatchStar { .. } => {
                return Err(CompileError::new("can't use starred name here", line));
            }
            kind => {
                return Err(CompileError::new(
                    format!("{} is not a pattern", kind.type_name()),
                    line,
                ));
            }
        }
        self.set_line(previous);
        Ok(())
    }

    /// Subpatterns of an unpacked sequence, mapping or class, first on top.
    fn compile_subpatterns(&mut self, patterns: &[NodeId], pc: &mut PatternContext) -> Result<()> {
        let allow = std::mem::replace(&mut pc.allow_irrefutable, true);
        pc.on_top += patterns.len();
        for pattern in patterns {
            pc.on_top -= 1;
            match self.ast.kind(*pattern) {
                NodeKind::MatchStar { name } => self.store_capture(name.as_deref(), pc)?,
                _ => self.compile_pattern(*pattern, pc)?,
            }
        }
        pc.allow_irrefutable = allow;
        Ok(())
    }

    fn compile_or_pattern(&mut self, patterns: &[NodeId], pc: &mut PatternContext) -> Result<()> {
        let end = self.new_label();
        let mut control: Option<(Vec<String>, BTreeSet<String>)> = None;
        for (i, pattern) in patterns.iter().enumerate() {
            let last = i + 1 == patterns.len();
            let mut alternative = if last {
                PatternContext {
                    fail_pop: std::mem::take(&mut pc.fail_pop),
                    on_top: pc.on_top,
                    stores: Vec::new(),
                    allow_irrefutable: pc.allow_irrefutable,
                }
            } else {
                self.emit_dup_top();
                PatternContext::default()
            };
            self.compile_pattern(*pattern, &mut alternative)?;
            let names: BTreeSet<String> = alternative.stores.iter().cloned().collect();
            match &control {
                None => control = Some((alternative.stores.clone(), names)),
                Some((_, expected)) if *expected != names => {
                    return Err(CompileError::new(
                        "alternative patterns bind different names",
                        self.line_of(*pattern),
                    ));
                }
                Some(_) => {}
            }
            if last {
                pc.fail_pop = alternative.fail_pop;
            } else {
                self.emit(Opcode::PopTop);
                self.emit_jump_to(Opcode::JumpForward, end);
                self.emit_fail_pops(alternative);
            }
        }
        self.patch(end);
        for name in control.map(|(order, _)| order).unwrap_or_default() {
            self.record_capture(&name, pc)?;
        }
        Ok(())
    }

    fn compile_sequence_pattern(
        &mut self,
        patterns: &[NodeId],
        pc: &mut PatternContext,
    ) -> Result<()> {
        let ast = self.ast;
        let line = self.unit().builder.line();
        let stars: Vec<usize> = patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(ast.kind(**p), NodeKind::MatchStar { .. }))
            .map(|(i, _)| i)
            .collect();
        let size = patterns.len();
        pc.on_top += 1;
        self.emit(Opcode::MatchSequence);
        self.jump_to_fail_pop(pc, Opcode::PopJumpIfFalse);
        match stars.as_slice() {
            [] => self.emit_length_check(pc, CmpOperator::Eq, size),
            [_] if size == 1 => {}
            [_] => self.emit_length_check(pc, CmpOperator::GtE, size - 1),
            _ => {
                return Err(CompileError::new(
                    "multiple starred names in sequence pattern",
                    line,
                ))
            }
        }
        pc.on_top -= 1;
        match stars.first() {
            None => self.emit_arg(Opcode::UnpackSequence, size as u32),
            Some(&index) => {
                let after = size - index - 1;
                if index > 0xff || after > 0xff_ffff {
                    return Err(CompileError::new(
                        "too many expressions in star-unpacking sequence pattern",
                        line,
                    ));
                }
                self.emit_arg(Opcode::UnpackEx, index as u32 | (after as u32) << 8);
            }
        }
        self.compile_subpatterns(patterns, pc)
    }

    fn compile_mapping_pattern(
        &mut self,
        keys: &[NodeId],
        patterns: &[NodeId],
        rest: Option<&str>,
        pc: &mut PatternContext,
    ) -> Result<()> {
        pc.on_top += 1;
        self.emit(Opcode::MatchMapping);
        self.jump_to_fail_pop(pc, Opcode::PopJumpIfFalse);
        if keys.is_empty() && rest.is_none() {
            pc.on_top -= 1;
            self.emit(Opcode::PopTop);
            return Ok(());
        }
        if !keys.is_empty() {
            self.emit_length_check(pc, CmpOperator::GtE, keys.len());
        }
        let mut seen = HashSet::new();
        for key in keys {
            if let Some(value) = self.folded(*key) {
                if !seen.insert(value.clone()) {
                    return Err(CompileError::new(
                        format!("mapping pattern checks duplicate key ({})", value),
                        self.line_of(*key),
                    ));
                }
            }
            self.compile_expr(*key)?;
        }
        self.emit_arg(Opcode::BuildTuple, keys.len() as u32);
        self.emit(Opcode::MatchKeys);
        pc.on_top += 2;
        self.jump_unless_extracted(pc);
        pc.on_top -= 1;
        self.emit_arg(Opcode::UnpackSequence, patterns.len() as u32);
        self.compile_subpatterns(patterns, pc)?;
        match rest {
            Some(name) => {
                self.emit(Opcode::CopyDictWithoutKeys);
                self.store_capture(Some(name), pc)?;
            }
            None => self.emit(Opcode::PopTop),
        }
        self.emit(Opcode::PopTop);
        pc.on_top -= 2;
        Ok(())
    }

    fn compile_class_pattern(
        &mut self,
        cls: NodeId,
        patterns: &[NodeId],
        kwd_attrs: &[String],
        kwd_patterns: &[NodeId],
        pc: &mut PatternContext,
    ) -> Result<()> {
        self.compile_expr(cls)?;
        let names = kwd_attrs.iter().map(|name| Const::Str(name.clone())).collect();
        self.emit_const(Const::Tuple(names));
        self.emit_arg(Opcode::MatchClass, patterns.len() as u32);
        pc.on_top += 1;
        self.jump_unless_extracted(pc);
        pc.on_top -= 1;
        let subpatterns: Vec<NodeId> = patterns.iter().chain(kwd_patterns).copied().collect();
        if subpatterns.is_empty() {
            self.emit(Opcode::PopTop);
            return Ok(());
        }
        self.emit_arg(Opcode::UnpackSequence, subpatterns.len() as u32);
        self.compile_subpatterns(&subpatterns, pc)
    }
}
