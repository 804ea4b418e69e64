//! The instruction set.
//!
//! One [`Opcode`] enum covers every supported runtime; the compiler only
//! emits the members a given [`RuntimeVersion`] has. Numbers follow the
//! runtime's convention that opcodes at or above [`HAVE_ARGUMENT`] take an
//! argument byte, so a raw wordcode stream can be decoded without knowing
//! which version produced it.

use serde::Serialize;
use whence_python::{CmpOperator, Operator, UnaryOperator};

use crate::version::RuntimeVersion;

/// First opcode number that takes an argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// `COMPARE_OP` argument names. Index 10 is the `except T:` test that 3.8
/// still routes through `COMPARE_OP`.
pub const COMPARE_OPS: [&str; 12] = [
    "<",
    "<=",
    "==",
    "!=",
    ">",
    ">=",
    "in",
    "not in",
    "is",
    "is not",
    "exception match",
    "BAD",
];

/// `COMPARE_OP` argument of the exception-match test.
pub const COMPARE_EXCEPTION_MATCH: u32 = 10;

/// `BINARY_OP` argument names; arguments from [`NB_INPLACE_BASE`] up are the
/// augmented-assignment forms of the same operators.
pub const NB_OPS: [&str; 26] = [
    "+", "&", "//", "<<", "@", "*", "%", "|", "**", ">>", "-", "/", "^", "+=", "&=", "//=", "<<=",
    "@=", "*=", "%=", "|=", "**=", ">>=", "-=", "/=", "^=",
];

/// First in-place `BINARY_OP` argument.
pub const NB_INPLACE_BASE: u32 = 13;

/// `BINARY_OP` argument of `**`.
pub const NB_POWER: u32 = 8;

macro_rules! opcodes {
    ($($variant:ident = $number:literal => $name:literal,)*) => {
        /// A runtime instruction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            /// Every opcode in numeric order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// The runtime's spelling, e.g. `"BINARY_ADD"`.
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            /// Byte value in the wordcode stream.
            pub fn number(self) -> u8 {
                match self {
                    $(Opcode::$variant => $number,)*
                }
            }

            pub fn from_number(number: u8) -> Option<Self> {
                match number {
                    $($number => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    PopTop = 1 => "POP_TOP",
    RotTwo = 2 => "ROT_TWO",
    RotThree = 3 => "ROT_THREE",
    DupTop = 4 => "DUP_TOP",
    DupTopTwo = 5 => "DUP_TOP_TWO",
    RotFour = 6 => "ROT_FOUR",
    Nop = 9 => "NOP",
    UnaryPositive = 10 => "UNARY_POSITIVE",
    UnaryNegative = 11 => "UNARY_NEGATIVE",
    UnaryNot = 12 => "UNARY_NOT",
    UnaryInvert = 15 => "UNARY_INVERT",
    BinaryMatrixMultiply = 16 => "BINARY_MATRIX_MULTIPLY",
    InplaceMatrixMultiply = 17 => "INPLACE_MATRIX_MULTIPLY",
    BinaryPower = 19 => "BINARY_POWER",
    BinaryMultiply = 20 => "BINARY_MULTIPLY",
    BinaryModulo = 22 => "BINARY_MODULO",
    BinaryAdd = 23 => "BINARY_ADD",
    BinarySubtract = 24 => "BINARY_SUBTRACT",
    BinarySubscr = 25 => "BINARY_SUBSCR",
    BinaryFloorDivide = 26 => "BINARY_FLOOR_DIVIDE",
    BinaryTrueDivide = 27 => "BINARY_TRUE_DIVIDE",
    InplaceFloorDivide = 28 => "INPLACE_FLOOR_DIVIDE",
    InplaceTrueDivide = 29 => "INPLACE_TRUE_DIVIDE",
    BeforeWith = 30 => "BEFORE_WITH",
    ReturnGenerator = 31 => "RETURN_GENERATOR",
    PushNull = 32 => "PUSH_NULL",
    GetLen = 33 => "GET_LEN",
    MatchMapping = 34 => "MATCH_MAPPING",
    PushExcInfo = 35 => "PUSH_EXC_INFO",
    CheckExcMatch = 36 => "CHECK_EXC_MATCH",
    MatchSequence = 37 => "MATCH_SEQUENCE",
    MatchKeys = 38 => "MATCH_KEYS",
    CopyDictWithoutKeys = 39 => "COPY_DICT_WITHOUT_KEYS",
    CheckEgMatch = 40 => "CHECK_EG_MATCH",
    PrepReraiseStar = 41 => "PREP_RERAISE_STAR",
    ListToTuple = 48 => "LIST_TO_TUPLE",
    WithExceptStart = 49 => "WITH_EXCEPT_START",
    GetAiter = 50 => "GET_AITER",
    GetAnext = 51 => "GET_ANEXT",
    BeforeAsyncWith = 52 => "BEFORE_ASYNC_WITH",
    BeginFinally = 53 => "BEGIN_FINALLY",
    EndAsyncFor = 54 => "END_ASYNC_FOR",
    InplaceAdd = 55 => "INPLACE_ADD",
    InplaceSubtract = 56 => "INPLACE_SUBTRACT",
    InplaceMultiply = 57 => "INPLACE_MULTIPLY",
    InplaceModulo = 59 => "INPLACE_MODULO",
    StoreSubscr = 60 => "STORE_SUBSCR",
    DeleteSubscr = 61 => "DELETE_SUBSCR",
    BinaryLshift = 62 => "BINARY_LSHIFT",
    BinaryRshift = 63 => "BINARY_RSHIFT",
    BinaryAnd = 64 => "BINARY_AND",
    BinaryXor = 65 => "BINARY_XOR",
    BinaryOr = 66 => "BINARY_OR",
    InplacePower = 67 => "INPLACE_POWER",
    GetIter = 68 => "GET_ITER",
    GetYieldFromIter = 69 => "GET_YIELD_FROM_ITER",
    LoadBuildClass = 71 => "LOAD_BUILD_CLASS",
    YieldFrom = 72 => "YIELD_FROM",
    GetAwaitable = 73 => "GET_AWAITABLE",
    LoadAssertionError = 74 => "LOAD_ASSERTION_ERROR",
    InplaceLshift = 75 => "INPLACE_LSHIFT",
    InplaceRshift = 76 => "INPLACE_RSHIFT",
    InplaceAnd = 77 => "INPLACE_AND",
    InplaceXor = 78 => "INPLACE_XOR",
    InplaceOr = 79 => "INPLACE_OR",
    WithCleanupStart = 81 => "WITH_CLEANUP_START",
    WithCleanupFinish = 82 => "WITH_CLEANUP_FINISH",
    ReturnValue = 83 => "RETURN_VALUE",
    ImportStar = 84 => "IMPORT_STAR",
    SetupAnnotations = 85 => "SETUP_ANNOTATIONS",
    YieldValue = 86 => "YIELD_VALUE",
    PopBlock = 87 => "POP_BLOCK",
    EndFinally = 88 => "END_FINALLY",
    PopExcept = 89 => "POP_EXCEPT",
    StoreName = 90 => "STORE_NAME",
    DeleteName = 91 => "DELETE_NAME",
    UnpackSequence = 92 => "UNPACK_SEQUENCE",
    ForIter = 93 => "FOR_ITER",
    UnpackEx = 94 => "UNPACK_EX",
    StoreAttr = 95 => "STORE_ATTR",
    DeleteAttr = 96 => "DELETE_ATTR",
    StoreGlobal = 97 => "STORE_GLOBAL",
    DeleteGlobal = 98 => "DELETE_GLOBAL",
    LoadConst = 100 => "LOAD_CONST",
    LoadName = 101 => "LOAD_NAME",
    BuildTuple = 102 => "BUILD_TUPLE",
    BuildList = 103 => "BUILD_LIST",
    BuildSet = 104 => "BUILD_SET",
    BuildMap = 105 => "BUILD_MAP",
    LoadAttr = 106 => "LOAD_ATTR",
    CompareOp = 107 => "COMPARE_OP",
    ImportName = 108 => "IMPORT_NAME",
    ImportFrom = 109 => "IMPORT_FROM",
    JumpForward = 110 => "JUMP_FORWARD",
    JumpIfFalseOrPop = 111 => "JUMP_IF_FALSE_OR_POP",
    JumpIfTrueOrPop = 112 => "JUMP_IF_TRUE_OR_POP",
    JumpAbsolute = 113 => "JUMP_ABSOLUTE",
    PopJumpIfFalse = 114 => "POP_JUMP_IF_FALSE",
    PopJumpIfTrue = 115 => "POP_JUMP_IF_TRUE",
    LoadGlobal = 116 => "LOAD_GLOBAL",
    IsOp = 117 => "IS_OP",
    ContainsOp = 118 => "CONTAINS_OP",
    Reraise = 119 => "RERAISE",
    JumpIfNotExcMatch = 121 => "JUMP_IF_NOT_EXC_MATCH",
    SetupFinally = 122 => "SETUP_FINALLY",
    LoadFast = 124 => "LOAD_FAST",
    StoreFast = 125 => "STORE_FAST",
    DeleteFast = 126 => "DELETE_FAST",
    RaiseVarargs = 130 => "RAISE_VARARGS",
    CallFunction = 131 => "CALL_FUNCTION",
    MakeFunction = 132 => "MAKE_FUNCTION",
    BuildSlice = 133 => "BUILD_SLICE",
    LoadClosure = 135 => "LOAD_CLOSURE",
    LoadDeref = 136 => "LOAD_DEREF",
    StoreDeref = 137 => "STORE_DEREF",
    DeleteDeref = 138 => "DELETE_DEREF",
    CallFunctionKw = 141 => "CALL_FUNCTION_KW",
    CallFunctionEx = 142 => "CALL_FUNCTION_EX",
    SetupWith = 143 => "SETUP_WITH",
    ExtendedArg = 144 => "EXTENDED_ARG",
    ListAppend = 145 => "LIST_APPEND",
    SetAdd = 146 => "SET_ADD",
    MapAdd = 147 => "MAP_ADD",
    LoadClassderef = 148 => "LOAD_CLASSDEREF",
    BuildListUnpack = 149 => "BUILD_LIST_UNPACK",
    BuildMapUnpack = 150 => "BUILD_MAP_UNPACK",
    BuildMapUnpackWithCall = 151 => "BUILD_MAP_UNPACK_WITH_CALL",
    BuildTupleUnpack = 152 => "BUILD_TUPLE_UNPACK",
    BuildSetUnpack = 153 => "BUILD_SET_UNPACK",
    SetupAsyncWith = 154 => "SETUP_ASYNC_WITH",
    FormatValue = 155 => "FORMAT_VALUE",
    BuildConstKeyMap = 156 => "BUILD_CONST_KEY_MAP",
    BuildString = 157 => "BUILD_STRING",
    BuildTupleUnpackWithCall = 158 => "BUILD_TUPLE_UNPACK_WITH_CALL",
    LoadMethod = 160 => "LOAD_METHOD",
    CallMethod = 161 => "CALL_METHOD",
    CallFinally = 162 => "CALL_FINALLY",
    PopFinally = 163 => "POP_FINALLY",
    ListExtend = 164 => "LIST_EXTEND",
    SetUpdate = 165 => "SET_UPDATE",
    DictMerge = 166 => "DICT_MERGE",
    DictUpdate = 167 => "DICT_UPDATE",
    Resume = 168 => "RESUME",
    BinaryOp = 169 => "BINARY_OP",
    Send = 170 => "SEND",
    Swap = 171 => "SWAP",
    Copy = 172 => "COPY",
    Precall = 173 => "PRECALL",
    Call = 174 => "CALL",
    KwNames = 175 => "KW_NAMES",
    JumpBackward = 176 => "JUMP_BACKWARD",
    JumpBackwardNoInterrupt = 177 => "JUMP_BACKWARD_NO_INTERRUPT",
    PopJumpForwardIfFalse = 178 => "POP_JUMP_FORWARD_IF_FALSE",
    PopJumpForwardIfTrue = 179 => "POP_JUMP_FORWARD_IF_TRUE",
    PopJumpBackwardIfFalse = 180 => "POP_JUMP_BACKWARD_IF_FALSE",
    PopJumpBackwardIfTrue = 181 => "POP_JUMP_BACKWARD_IF_TRUE",
    CopyFreeVars = 182 => "COPY_FREE_VARS",
    MakeCell = 183 => "MAKE_CELL",
    MatchClass = 184 => "MATCH_CLASS",
}

/// How a jump instruction's argument encodes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Offset from the start of the code.
    Absolute,
    /// Distance forward from the next instruction.
    Forward,
    /// Distance backward from the next instruction.
    Backward,
}

impl Opcode {
    pub fn has_arg(self) -> bool {
        self.number() >= HAVE_ARGUMENT
    }

    /// Target encoding of a jump instruction under `version`; `None` for
    /// everything else.
    pub fn jump_kind(self, version: RuntimeVersion) -> Option<JumpKind> {
        use Opcode::*;
        match self {
            JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue | JumpIfNotExcMatch => {
                Some(JumpKind::Absolute)
            }
            JumpIfFalseOrPop | JumpIfTrueOrPop if version.has_exception_tables() => {
                Some(JumpKind::Forward)
            }
            JumpIfFalseOrPop | JumpIfTrueOrPop => Some(JumpKind::Absolute),
            JumpForward | ForIter | SetupFinally | SetupWith | SetupAsyncWith | Send
            | PopJumpForwardIfFalse | PopJumpForwardIfTrue => Some(JumpKind::Forward),
            JumpBackward | JumpBackwardNoInterrupt | PopJumpBackwardIfFalse
            | PopJumpBackwardIfTrue => Some(JumpKind::Backward),
            _ => None,
        }
    }

    /// True for the `INPLACE_*` family.
    pub fn is_inplace(self) -> bool {
        self.name().starts_with("INPLACE_")
    }

    /// Instruction for a binary operator on runtimes without `BINARY_OP`.
    pub fn for_binary(op: Operator, inplace: bool) -> Opcode {
        use Opcode::*;
        match (op, inplace) {
            (Operator::Add, false) => BinaryAdd,
            (Operator::Sub, false) => BinarySubtract,
            (Operator::Mult, false) => BinaryMultiply,
            (Operator::MatMult, false) => BinaryMatrixMultiply,
            (Operator::Div, false) => BinaryTrueDivide,
            (Operator::Mod, false) => BinaryModulo,
            (Operator::Pow, false) => BinaryPower,
            (Operator::LShift, false) => BinaryLshift,
            (Operator::RShift, false) => BinaryRshift,
            (Operator::BitOr, false) => BinaryOr,
            (Operator::BitXor, false) => BinaryXor,
            (Operator::BitAnd, false) => BinaryAnd,
            (Operator::FloorDiv, false) => BinaryFloorDivide,
            (Operator::Add, true) => InplaceAdd,
            (Operator::Sub, true) => InplaceSubtract,
            (Operator::Mult, true) => InplaceMultiply,
            (Operator::MatMult, true) => InplaceMatrixMultiply,
            (Operator::Div, true) => InplaceTrueDivide,
            (Operator::Mod, true) => InplaceModulo,
            (Operator::Pow, true) => InplacePower,
            (Operator::LShift, true) => InplaceLshift,
            (Operator::RShift, true) => InplaceRshift,
            (Operator::BitOr, true) => InplaceOr,
            (Operator::BitXor, true) => InplaceXor,
            (Operator::BitAnd, true) => InplaceAnd,
            (Operator::FloorDiv, true) => InplaceFloorDivide,
        }
    }

    pub fn for_unary(op: UnaryOperator) -> Opcode {
        match op {
            UnaryOperator::Invert => Opcode::UnaryInvert,
            UnaryOperator::Not => Opcode::UnaryNot,
            UnaryOperator::UAdd => Opcode::UnaryPositive,
            UnaryOperator::USub => Opcode::UnaryNegative,
        }
    }
}

/// `BINARY_OP` argument for `op`.
pub fn nb_op_arg(op: Operator, inplace: bool) -> u32 {
    let base = match op {
        Operator::Add => 0,
        Operator::BitAnd => 1,
        Operator::FloorDiv => 2,
        Operator::LShift => 3,
        Operator::MatMult => 4,
        Operator::Mult => 5,
        Operator::Mod => 6,
        Operator::BitOr => 7,
        Operator::Pow => NB_POWER,
        Operator::RShift => 9,
        Operator::Sub => 10,
        Operator::Div => 11,
        Operator::BitXor => 12,
    };
    if inplace {
        base + NB_INPLACE_BASE
    } else {
        base
    }
}

/// Instruction and argument for a single comparison under `version`.
pub fn compare_instruction(op: CmpOperator, version: RuntimeVersion) -> (Opcode, u32) {
    let index = |symbol: &str| COMPARE_OPS.iter().position(|s| *s == symbol).unwrap_or(0) as u32;
    if version.has_is_contains_ops() {
        match op {
            CmpOperator::Is => return (Opcode::IsOp, 0),
            CmpOperator::IsNot => return (Opcode::IsOp, 1),
            CmpOperator::In => return (Opcode::ContainsOp, 0),
            CmpOperator::NotIn => return (Opcode::ContainsOp, 1),
            _ => {}
        }
    }
    (Opcode::CompareOp, index(op.symbol()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_unique_and_round_trip() {
        let mut seen = std::collections::HashSet::new();
        for op in Opcode::ALL {
            assert!(seen.insert(op.number()), "duplicate number for {}", op.name());
            assert_eq!(Opcode::from_number(op.number()), Some(*op));
            assert_eq!(Opcode::from_name(op.name()), Some(*op));
        }
    }

    #[test]
    fn argument_threshold() {
        assert!(!Opcode::BinaryAdd.has_arg());
        assert!(!Opcode::ReturnValue.has_arg());
        assert!(Opcode::LoadConst.has_arg());
        assert!(Opcode::ExtendedArg.has_arg());
        assert!(Opcode::BinaryOp.has_arg());
    }

    #[test]
    fn jump_kinds_follow_version() {
        let v38 = RuntimeVersion::V3_8;
        let v311 = RuntimeVersion::V3_11;
        assert_eq!(Opcode::JumpIfFalseOrPop.jump_kind(v38), Some(JumpKind::Absolute));
        assert_eq!(Opcode::JumpIfFalseOrPop.jump_kind(v311), Some(JumpKind::Forward));
        assert_eq!(Opcode::ForIter.jump_kind(v38), Some(JumpKind::Forward));
        assert_eq!(Opcode::JumpBackward.jump_kind(v311), Some(JumpKind::Backward));
        assert_eq!(Opcode::LoadConst.jump_kind(v38), None);
    }

    #[test]
    fn comparisons_per_version() {
        assert_eq!(
            compare_instruction(CmpOperator::NotIn, RuntimeVersion::V3_8),
            (Opcode::CompareOp, 7)
        );
        assert_eq!(
            compare_instruction(CmpOperator::NotIn, RuntimeVersion::V3_9),
            (Opcode::ContainsOp, 1)
        );
        assert_eq!(
            compare_instruction(CmpOperator::IsNot, RuntimeVersion::V3_11),
            (Opcode::IsOp, 1)
        );
        assert_eq!(
            compare_instruction(CmpOperator::GtE, RuntimeVersion::V3_11),
            (Opcode::CompareOp, 5)
        );
    }

    #[test]
    fn binary_op_arguments() {
        assert_eq!(nb_op_arg(Operator::Pow, false), NB_POWER);
        assert_eq!(NB_OPS[nb_op_arg(Operator::Sub, true) as usize], "-=");
        assert_eq!(Opcode::for_binary(Operator::Div, false), Opcode::BinaryTrueDivide);
        assert!(Opcode::for_binary(Operator::Div, true).is_inplace());
    }
}
