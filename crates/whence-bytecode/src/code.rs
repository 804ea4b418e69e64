//! Compiled units: constants, decoded instructions and code objects.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use whence_python::ConstantValue;

use crate::opcode::{Opcode, HAVE_ARGUMENT};
use crate::version::RuntimeVersion;

/// An entry of a code object's constant pool.
#[derive(Debug, Clone, Serialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Complex(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<Const>),
    FrozenSet(Vec<Const>),
    /// A nested compiled unit.
    #[serde(serialize_with = "serialize_code_name")]
    Code(Arc<CodeObject>),
    /// The sentinel a marked compilation loads right after the marked node.
    Marker,
}

fn serialize_code_name<S: serde::Serializer>(code: &Arc<CodeObject>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&code.name)
}

impl Const {
    pub fn is_marker(&self) -> bool {
        matches!(self, Const::Marker)
    }

    pub fn as_code(&self) -> Option<&Arc<CodeObject>> {
        match self {
            Const::Code(code) => Some(code),
            _ => None,
        }
    }
}

impl From<&ConstantValue> for Const {
    fn from(value: &ConstantValue) -> Self {
        match value {
            ConstantValue::None => Const::None,
            ConstantValue::Bool(b) => Const::Bool(*b),
            ConstantValue::Int(i) => Const::Int(*i),
            ConstantValue::Float(x) => Const::Float(*x),
            ConstantValue::Complex(x) => Const::Complex(*x),
            ConstantValue::Str(s) => Const::Str(s.clone()),
            ConstantValue::Bytes(b) => Const::Bytes(b.clone()),
            ConstantValue::Ellipsis => Const::Ellipsis,
        }
    }
}

// Pool entries are deduplicated by type and value, so `1`, `1.0` and `True`
// stay distinct and floats compare by bit pattern. Code objects compare by
// identity.
impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        use Const::*;
        match (self, other) {
            (None, None) | (Ellipsis, Ellipsis) | (Marker, Marker) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) | (Complex(a), Complex(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Tuple(a), Tuple(b)) | (FrozenSet(a), FrozenSet(b)) => a == b,
            (Code(a), Code(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Const {}

impl Hash for Const {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Const::Bool(b) => b.hash(state),
            Const::Int(i) => i.hash(state),
            Const::Float(x) | Const::Complex(x) => x.to_bits().hash(state),
            Const::Str(s) => s.hash(state),
            Const::Bytes(b) => b.hash(state),
            Const::Tuple(items) | Const::FrozenSet(items) => items.hash(state),
            Const::Code(code) => std::ptr::hash(Arc::as_ptr(code), state),
            Const::None | Const::Ellipsis | Const::Marker => {}
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        f.write_str("nan")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{:?}", x)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, chars: impl Iterator<Item = char> + Clone) -> fmt::Result {
    let quote = if chars.clone().any(|c| c == '\'') && !chars.clone().any(|c| c == '"') {
        '"'
    } else {
        '\''
    };
    write!(f, "{}", quote)?;
    for c in chars {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{}", c)?,
            c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\x{:02x}", c as u32)?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "{}", quote)
}

/// Renders constants the way the runtime's `repr` does.
impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::None => f.write_str("None"),
            Const::Bool(true) => f.write_str("True"),
            Const::Bool(false) => f.write_str("False"),
            Const::Int(i) => write!(f, "{}", i),
            Const::Float(x) => write_float(f, *x),
            Const::Complex(x) => {
                write_float(f, *x)?;
                f.write_str("j")
            }
            Const::Str(s) => write_quoted(f, s.chars()),
            Const::Bytes(bytes) => {
                f.write_str("b'")?;
                for byte in bytes {
                    match byte {
                        b'\\' => f.write_str("\\\\")?,
                        b'\'' => f.write_str("\\'")?,
                        b'\n' => f.write_str("\\n")?,
                        b'\r' => f.write_str("\\r")?,
                        b'\t' => f.write_str("\\t")?,
                        0x20..=0x7e => write!(f, "{}", *byte as char)?,
                        _ => write!(f, "\\x{:02x}", byte)?,
                    }
                }
                f.write_str("'")
            }
            Const::Ellipsis => f.write_str("Ellipsis"),
            Const::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Const::FrozenSet(items) => {
                f.write_str("frozenset({")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("})")
            }
            Const::Code(code) => write!(
                f,
                "<code object {} file \"{}\", line {}>",
                code.name, code.filename, code.first_line
            ),
            Const::Marker => f.write_str("<marker>"),
        }
    }
}

/// An instruction argument resolved against the code's tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ArgValue {
    /// No argument, or one that is only a count or flag set.
    None,
    Number(u32),
    Const(Const),
    /// Entry of `names`, `varnames` or the cell and free variables.
    Name(String),
    /// Absolute byte offset of a jump target.
    Jump(u32),
    /// Spelling of a comparison or binary operator.
    Operator(&'static str),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::None => Ok(()),
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::Const(c) => write!(f, "{}", c),
            ArgValue::Name(name) => f.write_str(name),
            ArgValue::Jump(target) => write!(f, "to {}", target),
            ArgValue::Operator(op) => f.write_str(op),
        }
    }
}

/// One decoded instruction.
///
/// `EXTENDED_ARG` prefixes are kept as instructions of their own; the
/// instruction they extend carries the full argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    /// Byte offset of this instruction (not of its prefixes).
    pub offset: u32,
    pub opcode: Opcode,
    pub arg: Option<u32>,
    pub argval: ArgValue,
    pub line: u32,
    pub is_jump_target: bool,
}

impl Instruction {
    pub fn opname(&self) -> &'static str {
        self.opcode.name()
    }

    /// Constant loaded by a `LOAD_CONST`.
    pub fn loaded_const(&self) -> Option<&Const> {
        match (&self.opcode, &self.argval) {
            (Opcode::LoadConst, ArgValue::Const(c)) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.is_jump_target { ">>" } else { "  " };
        write!(f, "{} {:>6} {:<28}", marker, self.offset, self.opname())?;
        if let Some(arg) = self.arg {
            write!(f, " {:>5}", arg)?;
            match &self.argval {
                ArgValue::None | ArgValue::Number(_) => {}
                other => write!(f, " ({})", other)?,
            }
        }
        Ok(())
    }
}

/// `co_flags` bits.
pub mod flags {
    pub const OPTIMIZED: u32 = 0x0001;
    pub const NEWLOCALS: u32 = 0x0002;
    pub const VARARGS: u32 = 0x0004;
    pub const VARKEYWORDS: u32 = 0x0008;
    pub const NESTED: u32 = 0x0010;
    pub const GENERATOR: u32 = 0x0020;
    pub const NOFREE: u32 = 0x0040;
    pub const COROUTINE: u32 = 0x0080;
    pub const ASYNC_GENERATOR: u32 = 0x0200;
}

/// A compiled unit: one module, class body, function, lambda or
/// comprehension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeObject {
    pub name: String,
    /// Recorded by runtimes that keep `co_qualname`.
    pub qualname: Option<String>,
    /// Origin key of the source this unit was compiled from.
    pub filename: String,
    /// First line; the first decorator's line for decorated definitions.
    pub first_line: u32,
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub flags: u32,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub consts: Vec<Const>,
    pub instructions: Vec<Instruction>,
    /// Raw wordcode.
    pub code: Vec<u8>,
    /// `(offset, line)` for every instruction that starts a new line.
    pub line_starts: Vec<(u32, u32)>,
    pub version: RuntimeVersion,
}

impl CodeObject {
    /// Index into `instructions` of the instruction at byte `offset`.
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |instr| instr.offset)
            .ok()
    }

    pub fn instruction_at(&self, offset: u32) -> Option<&Instruction> {
        self.index_of(offset).map(|i| &self.instructions[i])
    }

    /// Line of the instruction at `offset`, from the line-start table.
    pub fn line_for_offset(&self, offset: u32) -> Option<u32> {
        if offset as usize >= self.code.len() {
            return None;
        }
        let after = self.line_starts.partition_point(|(start, _)| *start <= offset);
        after.checked_sub(1).map(|i| self.line_starts[i].1)
    }

    /// Compiled units in the constant pool, in pool order.
    pub fn nested_codes(&self) -> impl Iterator<Item = &Arc<CodeObject>> {
        self.consts.iter().filter_map(Const::as_code)
    }

    /// The set of global and attribute names the unit refers to.
    pub fn code_names(&self) -> BTreeSet<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    pub fn is_generator(&self) -> bool {
        self.flags & (flags::GENERATOR | flags::COROUTINE | flags::ASYNC_GENERATOR) != 0
    }

    /// Disassembly listing in the runtime's `dis` layout.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut starts = self.line_starts.iter().peekable();
        for instr in &self.instructions {
            let line = match starts.peek() {
                Some((offset, line)) if *offset == instr.offset => {
                    starts.next();
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    format!("{:>4}", line)
                }
                _ => "    ".to_string(),
            };
            out.push_str(&format!("{} {}\n", line, instr));
        }
        out
    }
}

/// `root` followed by every unit nested in it, depth first.
pub fn all_codes(root: &Arc<CodeObject>) -> Vec<Arc<CodeObject>> {
    let mut out = vec![Arc::clone(root)];
    let mut i = 0;
    while i < out.len() {
        let nested: Vec<_> = out[i].nested_codes().cloned().collect();
        out.extend(nested);
        i += 1;
    }
    out
}

/// Failure decoding a raw wordcode stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WordcodeError {
    #[error("odd wordcode length {0}")]
    OddLength(usize),
    #[error("unknown opcode {number} at offset {offset}")]
    UnknownOpcode { number: u8, offset: u32 },
}

/// A raw `(offset, opcode, arg)` triple decoded from wordcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInstruction {
    pub offset: u32,
    pub opcode: Opcode,
    pub arg: Option<u32>,
}

/// Decode wordcode, folding `EXTENDED_ARG` prefixes into the argument of the
/// instruction that follows them. Prefixes are reported as well.
pub fn decode_wordcode(code: &[u8]) -> Result<Vec<RawInstruction>, WordcodeError> {
    if code.len() % 2 != 0 {
        return Err(WordcodeError::OddLength(code.len()));
    }
    let mut out = Vec::with_capacity(code.len() / 2);
    let mut extended: u32 = 0;
    for (i, word) in code.chunks_exact(2).enumerate() {
        let offset = (i * 2) as u32;
        let opcode = Opcode::from_number(word[0]).ok_or(WordcodeError::UnknownOpcode {
            number: word[0],
            offset,
        })?;
        let arg = if word[0] >= HAVE_ARGUMENT {
            Some(extended << 8 | u32::from(word[1]))
        } else {
            None
        };
        extended = match (opcode, arg) {
            (Opcode::ExtendedArg, Some(arg)) => arg,
            _ => 0,
        };
        out.push(RawInstruction { offset, opcode, arg });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_identity_rules() {
        assert_ne!(Const::Int(1), Const::Bool(true));
        assert_ne!(Const::Float(0.0), Const::Float(-0.0));
        assert_eq!(Const::Float(f64::NAN), Const::Float(f64::NAN));
        assert_eq!(
            Const::Tuple(vec![Const::Int(1), Const::Str("a".into())]),
            Const::Tuple(vec![Const::Int(1), Const::Str("a".into())])
        );
        assert!(Const::Marker.is_marker());
    }

    #[test]
    fn const_repr() {
        assert_eq!(Const::Str("it's".into()).to_string(), "\"it's\"");
        assert_eq!(Const::Str("a\nb".into()).to_string(), "'a\\nb'");
        assert_eq!(Const::Tuple(vec![Const::Int(1)]).to_string(), "(1,)");
        assert_eq!(Const::Float(2.5).to_string(), "2.5");
        assert_eq!(Const::Complex(1.0).to_string(), "1.0j");
        assert_eq!(Const::Bytes(b"x\xff".to_vec()).to_string(), "b'x\\xff'");
        assert_eq!(
            Const::FrozenSet(vec![Const::Int(1), Const::Int(2)]).to_string(),
            "frozenset({1, 2})"
        );
    }

    #[test]
    fn decode_folds_extended_args() {
        let load = Opcode::LoadConst.number();
        let ext = Opcode::ExtendedArg.number();
        let ret = Opcode::ReturnValue.number();
        let code = [ext, 1, load, 2, ret, 0];
        let decoded = decode_wordcode(&code).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].arg, Some(0x102));
        assert_eq!(decoded[1].offset, 2);
        assert_eq!(decoded[2].arg, None);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_wordcode(&[1]), Err(WordcodeError::OddLength(1)));
        assert!(matches!(
            decode_wordcode(&[0, 0]),
            Err(WordcodeError::UnknownOpcode { number: 0, offset: 0 })
        ));
    }
}
