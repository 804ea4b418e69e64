// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Depth-first walk driving a [`Visitor`].

use super::traits::{VisitResult, Visitor};
use crate::nodes::{Ast, NodeId, NodeKind};

macro_rules! dispatch_table {
    ($($variant:ident => $base_name:ident),* $(,)?) => {
        paste::paste! {
            fn dispatch_visit<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) -> VisitResult {
                match ast.kind(id) {
                    $(NodeKind::$variant { .. } => visitor.[<visit_ $base_name>](ast, id),)*
                }
            }

            fn dispatch_leave<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
                match ast.kind(id) {
                    $(NodeKind::$variant { .. } => visitor.[<leave_ $base_name>](ast, id),)*
                }
            }
        }
    };
}

dispatch_table! {
    Module => module,
    FunctionDef => function_def,
    ClassDef => class_def,
    Return => return_stmt,
    Delete => delete,
    Assign => assign,
    AugAssign => aug_assign,
    AnnAssign => ann_assign,
    For => for_stmt,
    While => while_stmt,
    If => if_stmt,
    With => with_stmt,
    Raise => raise,
    Try => try_stmt,
    TryStar => try_star,
    Assert => assert,
    Match => match_stmt,
    Import => import,
    ImportFrom => import_from,
    Global => global,
    Nonlocal => nonlocal,
    Expr => expr,
    Pass => pass,
    Break => break_stmt,
    Continue => continue_stmt,
    ExceptHandler => except_handler,
    BoolOp => bool_op,
    NamedExpr => named_expr,
    BinOp => bin_op,
    UnaryOp => unary_op,
    Lambda => lambda,
    IfExp => if_exp,
    Dict => dict,
    Set => set,
    ListComp => list_comp,
    SetComp => set_comp,
    DictComp => dict_comp,
    GeneratorExp => generator_exp,
    Await => await_expr,
    Yield => yield_expr,
    YieldFrom => yield_from,
    Compare => compare,
    Call => call,
    FormattedValue => formatted_value,
    JoinedStr => joined_str,
    Constant => constant,
    Attribute => attribute,
    Subscript => subscript,
    Starred => starred,
    Name => name,
    List => list,
    Tuple => tuple,
    Slice => slice,
    MatchValue => match_value,
    MatchSingleton => match_singleton,
    MatchSequence => match_sequence,
    MatchMapping => match_mapping,
    MatchClass => match_class,
    MatchStar => match_star,
    MatchAs => match_as,
    MatchOr => match_or,
}

/// Walk the whole tree from its root.
pub fn walk<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast) -> VisitResult {
    walk_node(visitor, ast, ast.root())
}

/// Walk the subtree rooted at `id`, `id` included.
///
/// Returns [`VisitResult::Stop`] when the visitor stopped the traversal.
pub fn walk_node<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) -> VisitResult {
    let mut result = visitor.visit_node(ast, id);
    if result == VisitResult::Continue {
        result = dispatch_visit(visitor, ast, id);
    }
    match result {
        VisitResult::Stop => return VisitResult::Stop,
        VisitResult::Continue => {
            for child in ast.children(id) {
                if walk_node(visitor, ast, child) == VisitResult::Stop {
                    return VisitResult::Stop;
                }
            }
        }
        VisitResult::SkipChildren => {}
    }
    dispatch_leave(visitor, ast, id);
    visitor.leave_node(ast, id);
    VisitResult::Continue
}
