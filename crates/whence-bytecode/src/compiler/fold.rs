//! Compile-time evaluation of literal expressions.
//!
//! Mirrors what the runtime's tree optimizer folds: arithmetic and bitwise
//! operators on numeric literals, string / bytes / tuple concatenation and
//! repetition, unary operators, and tuples whose elements all fold. An
//! operation that would raise or produce an oversized result is left alone.

use whence_python::{Ast, ExprContext, NodeId, NodeKind, Operator, UnaryOperator};

use crate::code::Const;

/// Longest string or bytes value produced by folding repetition.
const MAX_STR_SIZE: usize = 4096;
/// Largest tuple produced by folding repetition.
const MAX_COLLECTION_SIZE: usize = 256;

/// The constant `id` folds to, if it is a literal expression.
///
/// ```
/// use whence_bytecode::{fold_constant, Const};
/// use whence_python::parse_expression;
///
/// let ast = parse_expression("(1 + 2, -3)").unwrap();
/// assert_eq!(
///     fold_constant(&ast, ast.root()),
///     Some(Const::Tuple(vec![Const::Int(3), Const::Int(-3)]))
/// );
/// ```
pub fn fold_constant(ast: &Ast, id: NodeId) -> Option<Const> {
    match ast.kind(id) {
        NodeKind::Constant { value } => Some(Const::from(value)),
        NodeKind::UnaryOp { op, operand } => fold_unary(*op, fold_constant(ast, *operand)?),
        NodeKind::BinOp { left, op, right } => {
            fold_binary(fold_constant(ast, *left)?, *op, fold_constant(ast, *right)?)
        }
        NodeKind::Tuple {
            elts,
            ctx: ExprContext::Load,
        } => elts
            .iter()
            .map(|elt| fold_constant(ast, *elt))
            .collect::<Option<Vec<_>>>()
            .map(Const::Tuple),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i128),
    Float(f64),
}

impl Num {
    fn of(value: &Const) -> Option<Num> {
        match value {
            Const::Int(i) => Some(Num::Int(*i)),
            Const::Bool(b) => Some(Num::Int(i128::from(*b))),
            Const::Float(x) => Some(Num::Float(*x)),
            _ => None,
        }
    }

    fn as_float(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(x) => x,
        }
    }
}

fn truthy(value: &Const) -> Option<bool> {
    Some(match value {
        Const::None => false,
        Const::Bool(b) => *b,
        Const::Int(i) => *i != 0,
        Const::Float(x) | Const::Complex(x) => *x != 0.0,
        Const::Str(s) => !s.is_empty(),
        Const::Bytes(b) => !b.is_empty(),
        Const::Tuple(items) | Const::FrozenSet(items) => !items.is_empty(),
        Const::Ellipsis => true,
        Const::Code(_) | Const::Marker => return None,
    })
}

fn fold_unary(op: UnaryOperator, value: Const) -> Option<Const> {
    match (op, &value) {
        (UnaryOperator::Not, _) => truthy(&value).map(|b| Const::Bool(!b)),
        (UnaryOperator::USub, _) => match Num::of(&value)? {
            Num::Int(i) => i.checked_neg().map(Const::Int),
            Num::Float(x) => Some(Const::Float(-x)),
        },
        (UnaryOperator::UAdd, _) => match Num::of(&value)? {
            Num::Int(i) => Some(Const::Int(i)),
            Num::Float(x) => Some(Const::Float(x)),
        },
        (UnaryOperator::Invert, Const::Int(_) | Const::Bool(_)) => match Num::of(&value)? {
            Num::Int(i) => Some(Const::Int(!i)),
            Num::Float(_) => None,
        },
        (UnaryOperator::Invert, _) => None,
    }
}

fn fold_binary(left: Const, op: Operator, right: Const) -> Option<Const> {
    if let (Const::Bool(a), Const::Bool(b)) = (&left, &right) {
        match op {
            Operator::BitAnd => return Some(Const::Bool(*a & *b)),
            Operator::BitOr => return Some(Const::Bool(*a | *b)),
            Operator::BitXor => return Some(Const::Bool(*a ^ *b)),
            _ => {}
        }
    }
    if let (Some(a), Some(b)) = (Num::of(&left), Num::of(&right)) {
        return match (a, b) {
            (Num::Int(a), Num::Int(b)) => fold_int(a, op, b),
            _ => fold_float(a.as_float(), op, b.as_float()).map(Const::Float),
        };
    }
    fold_sequence(left, op, right)
}

fn fold_int(a: i128, op: Operator, b: i128) -> Option<Const> {
    let int = |v: Option<i128>| v.map(Const::Int);
    match op {
        Operator::Add => int(a.checked_add(b)),
        Operator::Sub => int(a.checked_sub(b)),
        Operator::Mult => int(a.checked_mul(b)),
        Operator::Div if b != 0 => Some(Const::Float(a as f64 / b as f64)),
        Operator::FloorDiv if b != 0 => int(a.checked_div_euclid(b).map(|q| {
            // Euclidean quotients round toward negative infinity only for
            // positive divisors.
            if b < 0 && a.rem_euclid(b) != 0 {
                q - 1
            } else {
                q
            }
        })),
        Operator::Mod if b != 0 => {
            let r = a.checked_rem(b)?;
            Some(Const::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
        Operator::Pow if b >= 0 => int(u32::try_from(b).ok().and_then(|e| a.checked_pow(e))),
        Operator::Pow if a != 0 => Some(Const::Float((a as f64).powf(b as f64))),
        Operator::LShift if (0..127).contains(&b) => {
            int(2i128.checked_pow(b as u32).and_then(|f| a.checked_mul(f)))
        }
        Operator::RShift if b >= 0 => Some(Const::Int(if b >= 127 {
            if a < 0 {
                -1
            } else {
                0
            }
        } else {
            a >> b
        })),
        Operator::BitAnd => Some(Const::Int(a & b)),
        Operator::BitOr => Some(Const::Int(a | b)),
        Operator::BitXor => Some(Const::Int(a ^ b)),
        _ => None,
    }
}

fn fold_float(a: f64, op: Operator, b: f64) -> Option<f64> {
    match op {
        Operator::Add => Some(a + b),
        Operator::Sub => Some(a - b),
        Operator::Mult => Some(a * b),
        Operator::Div if b != 0.0 => Some(a / b),
        Operator::FloorDiv if b != 0.0 => Some((a / b).floor()),
        Operator::Mod if b != 0.0 => {
            let r = a % b;
            Some(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r })
        }
        Operator::Pow if a == 0.0 && b < 0.0 => None,
        Operator::Pow if a < 0.0 && b.fract() != 0.0 => None,
        Operator::Pow => Some(a.powf(b)),
        _ => None,
    }
}

fn repeat_count(value: &Const) -> Option<usize> {
    match value {
        Const::Int(i) => Some(usize::try_from(*i).unwrap_or(0)),
        Const::Bool(b) => Some(usize::from(*b)),
        _ => None,
    }
}

fn fold_sequence(left: Const, op: Operator, right: Const) -> Option<Const> {
    match (op, left, right) {
        (Operator::Add, Const::Str(a), Const::Str(b)) => Some(Const::Str(a + &b)),
        (Operator::Add, Const::Bytes(mut a), Const::Bytes(b)) => {
            a.extend(b);
            Some(Const::Bytes(a))
        }
        (Operator::Add, Const::Tuple(mut a), Const::Tuple(b)) => {
            a.extend(b);
            Some(Const::Tuple(a))
        }
        (Operator::Mult, left, right) => {
            let (seq, n) = match (repeat_count(&left), repeat_count(&right)) {
                (None, Some(n)) => (left, n),
                (Some(n), None) => (right, n),
                _ => return None,
            };
            match seq {
                Const::Str(s) if s.len().saturating_mul(n) <= MAX_STR_SIZE => {
                    Some(Const::Str(s.repeat(n)))
                }
                Const::Bytes(b) if b.len().saturating_mul(n) <= MAX_STR_SIZE => {
                    Some(Const::Bytes(b.repeat(n)))
                }
                Const::Tuple(items) if items.len().saturating_mul(n) <= MAX_COLLECTION_SIZE => {
                    Some(Const::Tuple(
                        std::iter::repeat(items).take(n).flatten().collect(),
                    ))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whence_python::parse_module;

    fn fold(source: &str) -> Option<Const> {
        let ast = parse_module(source).unwrap();
        let NodeKind::Module { body } = ast.kind(ast.root()) else {
            unreachable!()
        };
        let NodeKind::Expr { value } = ast.kind(body[0]) else {
            panic!("not an expression")
        };
        fold_constant(&ast, *value)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(fold("1 + 2 * 3\n"), Some(Const::Int(7)));
        assert_eq!(fold("7 // -2\n"), Some(Const::Int(-4)));
        assert_eq!(fold("-7 // 2\n"), Some(Const::Int(-4)));
        assert_eq!(fold("-7 % 3\n"), Some(Const::Int(2)));
        assert_eq!(fold("7 % -3\n"), Some(Const::Int(-2)));
        assert_eq!(fold("1 / 2\n"), Some(Const::Float(0.5)));
        assert_eq!(fold("2 ** 10\n"), Some(Const::Int(1024)));
        assert_eq!(fold("1 << 4\n"), Some(Const::Int(16)));
        assert_eq!(fold("-9 >> 1\n"), Some(Const::Int(-5)));
        assert_eq!(fold("True + True\n"), Some(Const::Int(2)));
        assert_eq!(fold("True & False\n"), Some(Const::Bool(false)));
        assert_eq!(fold("1.5 * 2\n"), Some(Const::Float(3.0)));
    }

    #[test]
    fn errors_are_not_folded() {
        assert_eq!(fold("1 / 0\n"), None);
        assert_eq!(fold("134895 / 0\n"), None);
        assert_eq!(fold("1 % 0\n"), None);
        assert_eq!(fold("2 ** 200\n"), None);
        assert_eq!(fold("1 << -1\n"), None);
        assert_eq!(fold("'a' + 1\n"), None);
        assert_eq!(fold("~1.5\n"), None);
    }

    #[test]
    fn unary_and_tuples() {
        assert_eq!(fold("-5\n"), Some(Const::Int(-5)));
        assert_eq!(fold("~0\n"), Some(Const::Int(-1)));
        assert_eq!(fold("not 0\n"), Some(Const::Bool(true)));
        assert_eq!(
            fold("(1, 'a', (None,))\n"),
            Some(Const::Tuple(vec![
                Const::Int(1),
                Const::Str("a".into()),
                Const::Tuple(vec![Const::None]),
            ]))
        );
        assert_eq!(fold("(1, x)\n"), None);
        assert_eq!(fold("[1, 2]\n"), None);
    }

    #[test]
    fn sequences() {
        assert_eq!(fold("'ab' * 2\n"), Some(Const::Str("abab".into())));
        assert_eq!(fold("3 * b'x'\n"), Some(Const::Bytes(b"xxx".to_vec())));
        assert_eq!(fold("'a' + 'b'\n"), Some(Const::Str("ab".into())));
        assert_eq!(
            fold("(1,) * 2\n"),
            Some(Const::Tuple(vec![Const::Int(1), Const::Int(1)]))
        );
        assert_eq!(fold("'x' * 5000\n"), None);
    }

    #[test]
    fn names_never_fold() {
        assert_eq!(fold("x + 1\n"), None);
        assert_eq!(fold("f()\n"), None);
    }
}
