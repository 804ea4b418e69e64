//! Bytecode builder and assembler.
//!
//! The compiler emits instructions with symbolic jump targets
//! ([`JumpLabel`]); [`CodeBuilder::finish`] lays them out as wordcode. Jump
//! arguments depend on offsets and offsets depend on how many
//! `EXTENDED_ARG` prefixes each argument needs, so layout repeats until no
//! instruction grows.

use std::collections::{BTreeSet, HashMap};

use crate::code::{ArgValue, CodeObject, Const, Instruction};
use crate::opcode::{JumpKind, Opcode, COMPARE_OPS, NB_OPS};
use crate::version::RuntimeVersion;

/// A jump target. Created unbound by [`CodeBuilder::emit_jump`] or
/// [`CodeBuilder::new_label`], bound by [`CodeBuilder::patch_jump`]; or
/// created already bound by [`CodeBuilder::label_here`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpLabel(usize);

#[derive(Debug, Clone, Copy)]
enum PendingArg {
    None,
    Value(u32),
    Label(JumpLabel),
}

#[derive(Debug, Clone)]
struct Pending {
    opcode: Opcode,
    arg: PendingArg,
    line: u32,
}

/// Everything about a code object besides its instructions and pools.
#[derive(Debug, Clone, Default)]
pub struct CodeMeta {
    pub name: String,
    pub qualname: Option<String>,
    pub filename: String,
    pub first_line: u32,
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub flags: u32,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
}

/// Accumulates the instructions, constants and names of one code object.
#[derive(Debug)]
pub struct CodeBuilder {
    version: RuntimeVersion,
    instrs: Vec<Pending>,
    /// Instruction index each label is bound to.
    labels: Vec<Option<usize>>,
    line: u32,
    consts: Vec<Const>,
    const_index: HashMap<Const, u32>,
    names: Vec<String>,
    name_index: HashMap<String, u32>,
}

impl CodeBuilder {
    pub fn new(version: RuntimeVersion, first_line: u32) -> Self {
        CodeBuilder {
            version,
            instrs: Vec::new(),
            labels: Vec::new(),
            line: first_line,
            consts: Vec::new(),
            const_index: HashMap::new(),
            names: Vec::new(),
            name_index: HashMap::new(),
        }
    }

    pub fn version(&self) -> RuntimeVersion {
        self.version
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Set the line of subsequent instructions, returning the previous one.
    pub fn set_line(&mut self, line: u32) -> u32 {
        std::mem::replace(&mut self.line, line)
    }

    pub fn emit(&mut self, opcode: Opcode) {
        self.push(opcode, PendingArg::None);
    }

    pub fn emit_arg(&mut self, opcode: Opcode, arg: u32) {
        self.push(opcode, PendingArg::Value(arg));
    }

    /// Emit a jump to a fresh label; bind it later with [`Self::patch_jump`].
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpLabel {
        let label = self.new_label();
        self.emit_jump_to(opcode, label);
        label
    }

    /// Emit a jump to `label`, bound or not.
    pub fn emit_jump_to(&mut self, opcode: Opcode, label: JumpLabel) {
        self.push(opcode, PendingArg::Label(label));
    }

    pub fn new_label(&mut self) -> JumpLabel {
        self.labels.push(None);
        JumpLabel(self.labels.len() - 1)
    }

    /// A label bound to the next instruction.
    pub fn label_here(&mut self) -> JumpLabel {
        let label = self.new_label();
        self.patch_jump(label);
        label
    }

    /// Bind `label` to the next instruction emitted.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        self.labels[label.0] = Some(self.instrs.len());
    }

    /// Index into the constant pool, adding `value` if it is new.
    pub fn add_const(&mut self, value: Const) -> u32 {
        if let Some(index) = self.const_index.get(&value) {
            return *index;
        }
        let index = self.consts.len() as u32;
        self.const_index.insert(value.clone(), index);
        self.consts.push(value);
        index
    }

    pub fn emit_const(&mut self, value: Const) {
        let index = self.add_const(value);
        self.emit_arg(Opcode::LoadConst, index);
    }

    /// Index into the names table, adding `name` if it is new.
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(index) = self.name_index.get(name) {
            return *index;
        }
        let index = self.names.len() as u32;
        self.name_index.insert(name.to_string(), index);
        self.names.push(name.to_string());
        index
    }

    pub fn emit_name(&mut self, opcode: Opcode, name: &str) {
        let index = self.add_name(name);
        self.emit_arg(opcode, index);
    }

    pub fn last_opcode(&self) -> Option<Opcode> {
        self.instrs.last().map(|p| p.opcode)
    }

    /// True when some label is bound past the last instruction, i.e. code
    /// still falls through to the end.
    pub fn has_label_at_end(&self) -> bool {
        self.labels.iter().any(|l| *l == Some(self.instrs.len()))
    }

    fn push(&mut self, opcode: Opcode, arg: PendingArg) {
        self.instrs.push(Pending {
            opcode,
            arg,
            line: self.line,
        });
    }

    fn label_index(&self, label: JumpLabel) -> usize {
        self.labels[label.0].unwrap_or(self.instrs.len())
    }

    /// The opcode actually written for the jump at `index`, once its
    /// direction is known.
    fn jump_opcode(&self, index: usize, opcode: Opcode, target: usize) -> Opcode {
        let forward = target > index;
        if self.version.has_exception_tables() {
            match (opcode, forward) {
                (Opcode::JumpAbsolute | Opcode::JumpForward, true) => Opcode::JumpForward,
                (Opcode::JumpAbsolute | Opcode::JumpForward, false) => Opcode::JumpBackward,
                (Opcode::PopJumpIfFalse, true) => Opcode::PopJumpForwardIfFalse,
                (Opcode::PopJumpIfFalse, false) => Opcode::PopJumpBackwardIfFalse,
                (Opcode::PopJumpIfTrue, true) => Opcode::PopJumpForwardIfTrue,
                (Opcode::PopJumpIfTrue, false) => Opcode::PopJumpBackwardIfTrue,
                _ => opcode,
            }
        } else if opcode == Opcode::JumpForward && !forward {
            Opcode::JumpAbsolute
        } else {
            opcode
        }
    }

    /// Final opcode and argument of every instruction given word offsets.
    fn resolve(&self, starts: &[u32], sizes: &[u32], total: u32) -> Vec<(Opcode, Option<u32>)> {
        let unit = if self.version.counts_jumps_in_instructions() {
            1
        } else {
            2
        };
        let word_of = |index: usize| starts.get(index).copied().unwrap_or(total);
        self.instrs
            .iter()
            .enumerate()
            .map(|(i, pending)| match pending.arg {
                PendingArg::None => (pending.opcode, None),
                PendingArg::Value(v) => (pending.opcode, Some(v)),
                PendingArg::Label(label) => {
                    let target_index = self.label_index(label);
                    let opcode = self.jump_opcode(i, pending.opcode, target_index);
                    let target = word_of(target_index);
                    let next = starts[i] + sizes[i];
                    let arg = match opcode.jump_kind(self.version) {
                        Some(JumpKind::Forward) => target.saturating_sub(next) * unit,
                        Some(JumpKind::Backward) => next.saturating_sub(target) * unit,
                        Some(JumpKind::Absolute) | None => target * unit,
                    };
                    (opcode, Some(arg))
                }
            })
            .collect()
    }

    /// Lay out the instructions and build the code object.
    pub fn finish(self, meta: CodeMeta) -> CodeObject {
        let n = self.instrs.len();
        let mut sizes = vec![1u32; n];
        let (starts, total, resolved) = loop {
            let mut starts = Vec::with_capacity(n);
            let mut total = 0u32;
            for size in &sizes {
                starts.push(total);
                total += size;
            }
            let resolved = self.resolve(&starts, &sizes, total);
            let mut grew = false;
            for (size, (_, arg)) in sizes.iter_mut().zip(&resolved) {
                let needed = 1 + extended_arg_count(arg.unwrap_or(0));
                if needed > *size {
                    *size = needed;
                    grew = true;
                }
            }
            if !grew {
                break (starts, total, resolved);
            }
        };

        let jump_targets: BTreeSet<u32> = self
            .instrs
            .iter()
            .filter_map(|p| match p.arg {
                PendingArg::Label(label) => {
                    Some(starts.get(self.label_index(label)).copied().unwrap_or(total) * 2)
                }
                _ => None,
            })
            .collect();
        let cell_and_free: Vec<&String> = meta.cellvars.iter().chain(&meta.freevars).collect();

        let mut code = Vec::with_capacity(total as usize * 2);
        let mut instructions = Vec::with_capacity(total as usize);
        let mut line_starts: Vec<(u32, u32)> = Vec::new();
        for (i, pending) in self.instrs.iter().enumerate() {
            let (opcode, arg) = resolved[i];
            let mut word = starts[i];
            for k in (1..sizes[i]).rev() {
                let part = arg.unwrap_or(0) >> (8 * k) & 0xff;
                let offset = word * 2;
                code.extend([Opcode::ExtendedArg.number(), part as u8]);
                instructions.push(Instruction {
                    offset,
                    opcode: Opcode::ExtendedArg,
                    arg: Some(arg.unwrap_or(0) >> (8 * k)),
                    argval: ArgValue::None,
                    line: pending.line,
                    is_jump_target: jump_targets.contains(&offset),
                });
                if line_starts.last().map(|(_, l)| *l) != Some(pending.line) {
                    line_starts.push((offset, pending.line));
                }
                word += 1;
            }
            let offset = word * 2;
            code.extend([opcode.number(), (arg.unwrap_or(0) & 0xff) as u8]);
            if line_starts.last().map(|(_, l)| *l) != Some(pending.line) {
                line_starts.push((offset, pending.line));
            }
            let argval = match (opcode, arg) {
                (_, None) => ArgValue::None,
                (op, Some(a)) if op.jump_kind(self.version).is_some() => {
                    let target = self.label_for(i).map(|t| starts.get(t).copied().unwrap_or(total));
                    ArgValue::Jump(target.unwrap_or(a) * 2)
                }
                (op, Some(a)) => self.argval(op, a, &meta, &cell_and_free),
            };
            instructions.push(Instruction {
                offset,
                opcode,
                arg,
                argval,
                line: pending.line,
                is_jump_target: sizes[i] == 1 && jump_targets.contains(&offset),
            });
        }

        CodeObject {
            name: meta.name,
            qualname: meta.qualname,
            filename: meta.filename,
            first_line: meta.first_line,
            argcount: meta.argcount,
            posonlyargcount: meta.posonlyargcount,
            kwonlyargcount: meta.kwonlyargcount,
            flags: meta.flags,
            names: self.names,
            varnames: meta.varnames,
            cellvars: meta.cellvars,
            freevars: meta.freevars,
            consts: self.consts,
            instructions,
            code,
            line_starts,
            version: self.version,
        }
    }

    fn label_for(&self, index: usize) -> Option<usize> {
        match self.instrs[index].arg {
            PendingArg::Label(label) => Some(self.label_index(label)),
            _ => None,
        }
    }

    fn argval(&self, opcode: Opcode, arg: u32, meta: &CodeMeta, cell_and_free: &[&String]) -> ArgValue {
        use Opcode::*;
        let lookup = |table: &[String]| {
            table
                .get(arg as usize)
                .map(|name| ArgValue::Name(name.clone()))
                .unwrap_or(ArgValue::Number(arg))
        };
        match opcode {
            LoadConst | KwNames => self
                .consts
                .get(arg as usize)
                .map(|c| ArgValue::Const(c.clone()))
                .unwrap_or(ArgValue::Number(arg)),
            LoadName | StoreName | DeleteName | LoadGlobal | StoreGlobal | DeleteGlobal
            | LoadAttr | StoreAttr | DeleteAttr | LoadMethod | ImportName | ImportFrom => {
                lookup(&self.names)
            }
            LoadFast | StoreFast | DeleteFast => lookup(&meta.varnames),
            LoadDeref | StoreDeref | DeleteDeref | LoadClosure | LoadClassderef | MakeCell => {
                cell_and_free
                    .get(arg as usize)
                    .map(|name| ArgValue::Name((*name).clone()))
                    .unwrap_or(ArgValue::Number(arg))
            }
            CompareOp => COMPARE_OPS
                .get(arg as usize)
                .map(|op| ArgValue::Operator(*op))
                .unwrap_or(ArgValue::Number(arg)),
            IsOp => ArgValue::Operator(if arg == 1 { "is not" } else { "is" }),
            ContainsOp => ArgValue::Operator(if arg == 1 { "not in" } else { "in" }),
            BinaryOp => NB_OPS
                .get(arg as usize)
                .map(|op| ArgValue::Operator(*op))
                .unwrap_or(ArgValue::Number(arg)),
            _ => ArgValue::Number(arg),
        }
    }
}

/// Number of `EXTENDED_ARG` prefixes `arg` needs.
fn extended_arg_count(arg: u32) -> u32 {
    match arg {
        0..=0xff => 0,
        0x100..=0xffff => 1,
        0x1_0000..=0xff_ffff => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> CodeMeta {
        CodeMeta {
            name: "<module>".into(),
            filename: "<test>".into(),
            first_line: 1,
            ..CodeMeta::default()
        }
    }

    fn opnames(code: &CodeObject) -> Vec<&'static str> {
        code.instructions.iter().map(|i| i.opname()).collect()
    }

    #[test]
    fn forward_jump_in_bytes_and_words() {
        for (version, expected) in [(RuntimeVersion::V3_8, 4), (RuntimeVersion::V3_10, 2)] {
            let mut builder = CodeBuilder::new(version, 1);
            let label = builder.emit_jump(Opcode::JumpForward);
            builder.emit(Opcode::Nop);
            builder.emit(Opcode::Nop);
            builder.patch_jump(label);
            builder.emit(Opcode::ReturnValue);
            let code = builder.finish(meta());
            assert_eq!(code.instructions[0].arg, Some(expected));
            assert_eq!(code.instructions[0].argval, ArgValue::Jump(6));
            assert!(code.instructions[3].is_jump_target);
        }
    }

    #[test]
    fn backward_jump_direction_on_newest_runtime() {
        let mut builder = CodeBuilder::new(RuntimeVersion::V3_11, 1);
        let start = builder.label_here();
        builder.emit(Opcode::Nop);
        let exit = builder.emit_jump(Opcode::PopJumpIfFalse);
        builder.emit_jump_to(Opcode::JumpAbsolute, start);
        builder.patch_jump(exit);
        builder.emit(Opcode::ReturnValue);
        let code = builder.finish(meta());
        assert_eq!(
            opnames(&code),
            ["NOP", "POP_JUMP_FORWARD_IF_FALSE", "JUMP_BACKWARD", "RETURN_VALUE"]
        );
        assert_eq!(code.instructions[1].arg, Some(1));
        assert_eq!(code.instructions[2].arg, Some(3));
        assert_eq!(code.instructions[2].argval, ArgValue::Jump(0));
    }

    #[test]
    fn large_arguments_get_prefixes() {
        let mut builder = CodeBuilder::new(RuntimeVersion::V3_8, 1);
        for i in 0..300 {
            builder.add_const(Const::Int(i));
        }
        builder.emit_arg(Opcode::LoadConst, 299);
        builder.emit(Opcode::ReturnValue);
        let code = builder.finish(meta());
        assert_eq!(opnames(&code), ["EXTENDED_ARG", "LOAD_CONST", "RETURN_VALUE"]);
        assert_eq!(code.instructions[0].arg, Some(1));
        assert_eq!(code.instructions[1].offset, 2);
        assert_eq!(code.instructions[1].arg, Some(299));
        assert_eq!(code.instructions[1].argval, ArgValue::Const(Const::Int(299)));
        assert_eq!(code.code.len(), 6);
    }

    #[test]
    fn jumps_over_prefixed_instructions_account_for_them() {
        let mut builder = CodeBuilder::new(RuntimeVersion::V3_8, 1);
        let label = builder.emit_jump(Opcode::JumpAbsolute);
        builder.emit_arg(Opcode::LoadConst, 0x1_0000);
        builder.patch_jump(label);
        builder.emit(Opcode::ReturnValue);
        let code = builder.finish(meta());
        // jump, two prefixes, LOAD_CONST, RETURN_VALUE
        assert_eq!(code.instructions.len(), 5);
        assert_eq!(code.instructions[0].arg, Some(8));
        assert_eq!(code.instructions[4].offset, 8);
    }

    #[test]
    fn line_table_and_names() {
        let mut builder = CodeBuilder::new(RuntimeVersion::V3_9, 1);
        builder.emit_name(Opcode::LoadName, "x");
        builder.set_line(3);
        builder.emit_name(Opcode::LoadAttr, "y");
        builder.emit_name(Opcode::LoadAttr, "x");
        builder.emit(Opcode::ReturnValue);
        let code = builder.finish(meta());
        assert_eq!(code.names, ["x", "y"]);
        assert_eq!(code.line_starts, [(0, 1), (2, 3)]);
        assert_eq!(code.line_for_offset(4), Some(3));
        assert_eq!(code.line_for_offset(0), Some(1));
        assert_eq!(code.line_for_offset(8), None);
        assert_eq!(code.instructions[2].argval, ArgValue::Name("x".into()));
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut builder = CodeBuilder::new(RuntimeVersion::V3_8, 1);
        assert_eq!(builder.add_const(Const::Int(1)), 0);
        assert_eq!(builder.add_const(Const::Bool(true)), 1);
        assert_eq!(builder.add_const(Const::Int(1)), 0);
        assert_eq!(builder.add_const(Const::Marker), 2);
    }
}
