// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Visitor trait definitions for syntax tree traversal.

use crate::nodes::{Ast, NodeId};

/// Result of visiting a node - controls traversal behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VisitResult {
    /// Continue traversal into children.
    ///
    /// After visiting children, `leave_*` will be called for this node.
    #[default]
    Continue,

    /// Skip children, continue with siblings.
    ///
    /// `leave_*` is still called for this node.
    SkipChildren,

    /// Stop traversal entirely.
    ///
    /// No further `visit_*` or `leave_*` methods will be called.
    Stop,
}

/// Generates `visit_*` / `leave_*` pairs, one per node kind.
macro_rules! visitor_methods {
    (
        $(
            $base_name:ident : $variant:ident
        ),* $(,)?
    ) => {
        paste::paste! {
            $(
                #[doc = concat!("Visit a `", stringify!($variant), "` node.")]
                #[doc = ""]
                #[doc = "Called after [`visit_node`](Self::visit_node) returned `Continue`."]
                #[allow(unused_variables)]
                fn [<visit_ $base_name>](&mut self, ast: &Ast, id: NodeId) -> VisitResult {
                    VisitResult::Continue
                }

                #[doc = concat!("Leave a `", stringify!($variant), "` node.")]
                #[allow(unused_variables)]
                fn [<leave_ $base_name>](&mut self, ast: &Ast, id: NodeId) {}
            )*
        }
    };
}

/// Immutable visitor over an [`Ast`].
///
/// # Traversal Order
///
/// - `visit_node` then `visit_<kind>` in **pre-order**
/// - `leave_<kind>` then `leave_node` in **post-order**
/// - Children in source field order
///
/// # Example
///
/// ```
/// use whence_python::{parse_module, walk, Ast, NodeId, VisitResult, Visitor};
///
/// struct CallCounter(usize);
///
/// impl Visitor for CallCounter {
///     fn visit_call(&mut self, _ast: &Ast, _id: NodeId) -> VisitResult {
///         self.0 += 1;
///         VisitResult::Continue
///     }
/// }
///
/// let ast = parse_module("f(g(x))\n").unwrap();
/// let mut counter = CallCounter(0);
/// walk(&mut counter, &ast);
/// assert_eq!(counter.0, 2);
/// ```
pub trait Visitor {
    /// Called for every node before its kind-specific hook.
    #[allow(unused_variables)]
    fn visit_node(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        VisitResult::Continue
    }

    /// Called for every node after its kind-specific hook.
    #[allow(unused_variables)]
    fn leave_node(&mut self, ast: &Ast, id: NodeId) {}

    visitor_methods! {
        module: Module,
        function_def: FunctionDef,
        class_def: ClassDef,
        return_stmt: Return,
        delete: Delete,
        assign: Assign,
        aug_assign: AugAssign,
        ann_assign: AnnAssign,
        for_stmt: For,
        while_stmt: While,
        if_stmt: If,
        with_stmt: With,
        raise: Raise,
        try_stmt: Try,
        try_star: TryStar,
        assert: Assert,
        match_stmt: Match,
        import: Import,
        import_from: ImportFrom,
        global: Global,
        nonlocal: Nonlocal,
        expr: Expr,
        pass: Pass,
        break_stmt: Break,
        continue_stmt: Continue,
        except_handler: ExceptHandler,
        bool_op: BoolOp,
        named_expr: NamedExpr,
        bin_op: BinOp,
        unary_op: UnaryOp,
        lambda: Lambda,
        if_exp: IfExp,
        dict: Dict,
        set: Set,
        list_comp: ListComp,
        set_comp: SetComp,
        dict_comp: DictComp,
        generator_exp: GeneratorExp,
        await_expr: Await,
        yield_expr: Yield,
        yield_from: YieldFrom,
        compare: Compare,
        call: Call,
        formatted_value: FormattedValue,
        joined_str: JoinedStr,
        constant: Constant,
        attribute: Attribute,
        subscript: Subscript,
        starred: Starred,
        name: Name,
        list: List,
        tuple: Tuple,
        slice: Slice,
        match_value: MatchValue,
        match_singleton: MatchSingleton,
        match_sequence: MatchSequence,
        match_mapping: MatchMapping,
        match_class: MatchClass,
        match_star: MatchStar,
        match_as: MatchAs,
        match_or: MatchOr,
    }
}
