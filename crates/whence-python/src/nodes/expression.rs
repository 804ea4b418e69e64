// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Expression-level building blocks: operators, contexts, constants and the
//! small non-node records (keywords, comprehension clauses) that hang off
//! expression nodes.

use serde::Serialize;
use std::fmt;

use super::{NodeId, Span};

/// Whether a name-like expression is read, written or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExprContext {
    Load,
    Store,
    Del,
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl Operator {
    /// Source spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mult => "*",
            Operator::MatMult => "@",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Pow => "**",
            Operator::LShift => "<<",
            Operator::RShift => ">>",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::BitAnd => "&",
            Operator::FloorDiv => "//",
        }
    }

    /// Operator for an augmented assignment token such as `+=`.
    pub fn from_augassign(token: &str) -> Option<Self> {
        let op = token.strip_suffix('=')?;
        Self::from_symbol(op)
    }

    /// Operator for a binary operator token.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mult,
            "@" => Operator::MatMult,
            "/" => Operator::Div,
            "%" => Operator::Mod,
            "**" => Operator::Pow,
            "<<" => Operator::LShift,
            ">>" => Operator::RShift,
            "|" => Operator::BitOr,
            "^" => Operator::BitXor,
            "&" => Operator::BitAnd,
            "//" => Operator::FloorDiv,
            _ => return None,
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOperator {
    Invert,
    Not,
    UAdd,
    USub,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Invert => "~",
            UnaryOperator::Not => "not",
            UnaryOperator::UAdd => "+",
            UnaryOperator::USub => "-",
        }
    }
}

/// Short-circuiting boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BoolOperator {
    And,
    Or,
}

/// Comparison operators, including membership and identity tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOperator::Eq => "==",
            CmpOperator::NotEq => "!=",
            CmpOperator::Lt => "<",
            CmpOperator::LtE => "<=",
            CmpOperator::Gt => ">",
            CmpOperator::GtE => ">=",
            CmpOperator::Is => "is",
            CmpOperator::IsNot => "is not",
            CmpOperator::In => "in",
            CmpOperator::NotIn => "not in",
        }
    }

    /// True for `in`, `not in`, `is` and `is not`.
    pub fn is_membership_or_identity(self) -> bool {
        matches!(
            self,
            CmpOperator::Is | CmpOperator::IsNot | CmpOperator::In | CmpOperator::NotIn
        )
    }

    /// The operator whose result is the boolean negation of this one, for
    /// operators where `not (a op b)` can be rewritten as `a op' b` without
    /// changing semantics.
    pub fn negated(self) -> Option<Self> {
        match self {
            CmpOperator::Is => Some(CmpOperator::IsNot),
            CmpOperator::IsNot => Some(CmpOperator::Is),
            CmpOperator::In => Some(CmpOperator::NotIn),
            CmpOperator::NotIn => Some(CmpOperator::In),
            _ => None,
        }
    }
}

impl fmt::Display for CmpOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A literal value appearing in source.
#[derive(Debug, Clone, Serialize)]
pub enum ConstantValue {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    /// Imaginary literal; the payload is the imaginary part.
    Complex(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
}

impl PartialEq for ConstantValue {
    fn eq(&self, other: &Self) -> bool {
        use ConstantValue::*;
        match (self, other) {
            (None, None) | (Ellipsis, Ellipsis) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) | (Complex(a), Complex(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstantValue {}

impl std::hash::Hash for ConstantValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ConstantValue::Bool(b) => b.hash(state),
            ConstantValue::Int(i) => i.hash(state),
            ConstantValue::Float(f) | ConstantValue::Complex(f) => f.to_bits().hash(state),
            ConstantValue::Str(s) => s.hash(state),
            ConstantValue::Bytes(b) => b.hash(state),
            ConstantValue::None | ConstantValue::Ellipsis => {}
        }
    }
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::None => f.write_str("None"),
            ConstantValue::Bool(true) => f.write_str("True"),
            ConstantValue::Bool(false) => f.write_str("False"),
            ConstantValue::Int(i) => write!(f, "{}", i),
            ConstantValue::Float(x) => write!(f, "{:?}", x),
            ConstantValue::Complex(x) => write!(f, "{:?}j", x),
            ConstantValue::Str(s) => write!(f, "{:?}", s),
            ConstantValue::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            ConstantValue::Ellipsis => f.write_str("Ellipsis"),
        }
    }
}

/// A `name=value` or `**value` argument in a call or class definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyword {
    /// `None` for `**mapping` unpacking.
    pub arg: Option<String>,
    pub value: NodeId,
    pub span: Span,
}

/// One `for target in iter if cond...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comprehension {
    pub target: NodeId,
    pub iter: NodeId,
    pub ifs: Vec<NodeId>,
    pub is_async: bool,
}
