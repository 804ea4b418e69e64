//! Instruction classifiers, one per instruction-set generation.
//!
//! A classifier decides which instructions have a source expression of
//! their own and which node shape that expression has. Everything else
//! (stack shuffles, jumps, block setup, in-place operators) is not
//! resolvable. The engine picks one classifier per runtime version and never
//! looks at version numbers itself.

use std::fmt;

use serde::Serialize;
use whence_bytecode::{Instruction, Opcode, RuntimeVersion};
use whence_python::{Ast, ExprContext, NodeId, NodeKind};

/// `COMPARE_OP` argument of the implicit exception match in `except` clauses.
const EXCEPTION_MATCH: u32 = 10;

/// First in-place `BINARY_OP` argument.
const INPLACE_BASE: u32 = 13;

/// The node shape an instruction evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BinOp,
    UnaryOp,
    Attribute,
    Subscript,
    Compare,
    Call,
}

impl Category {
    /// Whether `id` has this category's shape and produces a value.
    pub fn matches(self, ast: &Ast, id: NodeId) -> bool {
        match (self, ast.kind(id)) {
            (Category::BinOp, NodeKind::BinOp { .. })
            | (Category::UnaryOp, NodeKind::UnaryOp { .. })
            | (Category::Compare, NodeKind::Compare { .. })
            | (Category::Call, NodeKind::Call { .. }) => true,
            (Category::Attribute, NodeKind::Attribute { ctx, .. })
            | (Category::Subscript, NodeKind::Subscript { ctx, .. }) => *ctx == ExprContext::Load,
            _ => false,
        }
    }

    /// Whether the compiler also emits this category for constructs that
    /// are not nodes of this shape: class creation, decorator application,
    /// comprehension calls, `with` exits and exception matching.
    pub fn has_implicit_instructions(self) -> bool {
        matches!(self, Category::Compare | Category::Call)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::BinOp => "BinOp",
            Category::UnaryOp => "UnaryOp",
            Category::Attribute => "Attribute",
            Category::Subscript => "Subscript",
            Category::Compare => "Compare",
            Category::Call => "Call",
        })
    }
}

/// Maps instructions of one runtime generation to [`Category`]s.
pub trait InstructionClassifier: fmt::Debug + Send + Sync {
    /// The generation this classifier understands.
    fn version(&self) -> RuntimeVersion;

    /// The node shape `instruction` evaluates, or `None` when it has no
    /// expression of its own.
    fn classify(&self, instruction: &Instruction) -> Option<Category>;
}

/// The classifier for `version`.
pub fn classifier_for(version: RuntimeVersion) -> Box<dyn InstructionClassifier> {
    match version {
        RuntimeVersion::V3_8 => Box::new(CompareOpClassifier),
        RuntimeVersion::V3_9 | RuntimeVersion::V3_10 => Box::new(SplitCompareClassifier { version }),
        RuntimeVersion::V3_11 => Box::new(UnifiedBinaryClassifier),
    }
}

/// Shapes shared by every generation: unary operators, subscripts,
/// attribute loads.
fn common(opcode: Opcode) -> Option<Category> {
    use Opcode::*;
    match opcode {
        UnaryPositive | UnaryNegative | UnaryNot | UnaryInvert => Some(Category::UnaryOp),
        BinarySubscr => Some(Category::Subscript),
        LoadAttr | LoadMethod => Some(Category::Attribute),
        CallFunctionEx => Some(Category::Call),
        _ => None,
    }
}

/// Per-operator `BINARY_*` instructions.
fn legacy_binary(opcode: Opcode) -> Option<Category> {
    use Opcode::*;
    match opcode {
        BinaryPower | BinaryMultiply | BinaryMatrixMultiply | BinaryFloorDivide
        | BinaryTrueDivide | BinaryModulo | BinaryAdd | BinarySubtract | BinaryLshift
        | BinaryRshift | BinaryAnd | BinaryXor | BinaryOr => Some(Category::BinOp),
        _ => None,
    }
}

/// `CALL_FUNCTION`, `CALL_FUNCTION_KW`, `CALL_METHOD`.
fn legacy_call(opcode: Opcode) -> Option<Category> {
    match opcode {
        Opcode::CallFunction | Opcode::CallFunctionKw | Opcode::CallMethod => {
            Some(Category::Call)
        }
        _ => None,
    }
}

/// 3.8: every comparison is a `COMPARE_OP`, including the exception match
/// of `except` clauses.
#[derive(Debug, Clone, Copy)]
pub struct CompareOpClassifier;

impl InstructionClassifier for CompareOpClassifier {
    fn version(&self) -> RuntimeVersion {
        RuntimeVersion::V3_8
    }

    fn classify(&self, instruction: &Instruction) -> Option<Category> {
        match instruction.opcode {
            Opcode::CompareOp if instruction.arg == Some(EXCEPTION_MATCH) => None,
            Opcode::CompareOp => Some(Category::Compare),
            opcode => common(opcode)
                .or_else(|| legacy_binary(opcode))
                .or_else(|| legacy_call(opcode)),
        }
    }
}

/// 3.9 and 3.10: identity and membership tests have instructions of their
/// own and exception matching jumps directly.
#[derive(Debug, Clone, Copy)]
pub struct SplitCompareClassifier {
    version: RuntimeVersion,
}

impl InstructionClassifier for SplitCompareClassifier {
    fn version(&self) -> RuntimeVersion {
        self.version
    }

    fn classify(&self, instruction: &Instruction) -> Option<Category> {
        match instruction.opcode {
            Opcode::CompareOp | Opcode::IsOp | Opcode::ContainsOp => Some(Category::Compare),
            opcode => common(opcode)
                .or_else(|| legacy_binary(opcode))
                .or_else(|| legacy_call(opcode)),
        }
    }
}

/// 3.11: one `BINARY_OP` for every operator and `PRECALL` / `CALL` pairs,
/// where `CALL` is the instruction a frame stops at.
#[derive(Debug, Clone, Copy)]
pub struct UnifiedBinaryClassifier;

impl InstructionClassifier for UnifiedBinaryClassifier {
    fn version(&self) -> RuntimeVersion {
        RuntimeVersion::V3_11
    }

    fn classify(&self, instruction: &Instruction) -> Option<Category> {
        match instruction.opcode {
            Opcode::BinaryOp => match instruction.arg {
                Some(arg) if arg < INPLACE_BASE => Some(Category::BinOp),
                _ => None,
            },
            Opcode::CompareOp | Opcode::IsOp | Opcode::ContainsOp => Some(Category::Compare),
            Opcode::Call => Some(Category::Call),
            opcode => common(opcode),
        }
    }
}
