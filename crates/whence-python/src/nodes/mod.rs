// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Arena syntax tree.
//!
//! Every node of a parsed module lives in one [`Ast`] and is addressed by a
//! [`NodeId`]. Nodes never point at each other through references: children
//! are ids stored in the [`NodeKind`] payload, and structural back-links
//! (parents, enclosing statements) are separate indexes built once by the
//! [`Annotations`](crate::visitor::Annotations) pass.
//!
//! Node kinds mirror the abstract grammar of the runtime's own `ast` module,
//! including field order, because the compiler walks children in that order
//! and the node text reported to callers is keyed off these positions.
//! Positions follow the same conventions: 1-indexed lines, 0-indexed byte
//! columns, and a byte [`Span`] into the decoded source text.

pub mod expression;
pub mod statement;

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

pub use expression::{
    BoolOperator, CmpOperator, Comprehension, ConstantValue, ExprContext, Keyword, Operator,
    UnaryOperator,
};
pub use statement::{Alias, Arg, Arguments, MatchCase, WithItem};

/// Index of a node inside its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Half-open byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn range(self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// A node with its position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub lineno: u32,
    pub col_offset: u32,
    pub end_lineno: u32,
    pub end_col_offset: u32,
}

/// Payload of every node kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    Module {
        body: Vec<NodeId>,
    },

    // Statements
    FunctionDef {
        name: String,
        args: Box<Arguments>,
        body: Vec<NodeId>,
        decorators: Vec<NodeId>,
        returns: Option<NodeId>,
        is_async: bool,
    },
    ClassDef {
        name: String,
        bases: Vec<NodeId>,
        keywords: Vec<Keyword>,
        body: Vec<NodeId>,
        decorators: Vec<NodeId>,
    },
    Return {
        value: Option<NodeId>,
    },
    Delete {
        targets: Vec<NodeId>,
    },
    Assign {
        targets: Vec<NodeId>,
        value: NodeId,
    },
    AugAssign {
        target: NodeId,
        op: Operator,
        value: NodeId,
    },
    AnnAssign {
        target: NodeId,
        annotation: NodeId,
        value: Option<NodeId>,
        simple: bool,
    },
    For {
        target: NodeId,
        iter: NodeId,
        body: Vec<NodeId>,
        orelse: Vec<NodeId>,
        is_async: bool,
    },
    While {
        test: NodeId,
        body: Vec<NodeId>,
        orelse: Vec<NodeId>,
    },
    If {
        test: NodeId,
        body: Vec<NodeId>,
        orelse: Vec<NodeId>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<NodeId>,
        is_async: bool,
    },
    Raise {
        exc: Option<NodeId>,
        cause: Option<NodeId>,
    },
    Try {
        body: Vec<NodeId>,
        handlers: Vec<NodeId>,
        orelse: Vec<NodeId>,
        finalbody: Vec<NodeId>,
    },
    /// `try` with `except*` handlers.
    TryStar {
        body: Vec<NodeId>,
        handlers: Vec<NodeId>,
        orelse: Vec<NodeId>,
        finalbody: Vec<NodeId>,
    },
    Assert {
        test: NodeId,
        msg: Option<NodeId>,
    },
    Match {
        subject: NodeId,
        cases: Vec<MatchCase>,
    },
    Import {
        names: Vec<Alias>,
    },
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
        level: u32,
    },
    Global {
        names: Vec<String>,
    },
    Nonlocal {
        names: Vec<String>,
    },
    Expr {
        value: NodeId,
    },
    Pass,
    Break,
    Continue,

    /// `except` clause; a node of its own but not a statement.
    ExceptHandler {
        type_: Option<NodeId>,
        name: Option<String>,
        body: Vec<NodeId>,
    },

    // Expressions
    BoolOp {
        op: BoolOperator,
        values: Vec<NodeId>,
    },
    NamedExpr {
        target: NodeId,
        value: NodeId,
    },
    BinOp {
        left: NodeId,
        op: Operator,
        right: NodeId,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: NodeId,
    },
    Lambda {
        args: Box<Arguments>,
        body: NodeId,
    },
    IfExp {
        test: NodeId,
        body: NodeId,
        orelse: NodeId,
    },
    Dict {
        /// `None` marks a `**mapping` entry.
        keys: Vec<Option<NodeId>>,
        values: Vec<NodeId>,
    },
    Set {
        elts: Vec<NodeId>,
    },
    ListComp {
        elt: NodeId,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: NodeId,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: NodeId,
        value: NodeId,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: NodeId,
        generators: Vec<Comprehension>,
    },
    Await {
        value: NodeId,
    },
    Yield {
        value: Option<NodeId>,
    },
    YieldFrom {
        value: NodeId,
    },
    Compare {
        left: NodeId,
        ops: Vec<CmpOperator>,
        comparators: Vec<NodeId>,
    },
    Call {
        func: NodeId,
        args: Vec<NodeId>,
        keywords: Vec<Keyword>,
    },
    FormattedValue {
        value: NodeId,
        conversion: Option<char>,
        format_spec: Option<NodeId>,
    },
    JoinedStr {
        values: Vec<NodeId>,
    },
    Constant {
        value: ConstantValue,
    },
    Attribute {
        value: NodeId,
        attr: String,
        ctx: ExprContext,
    },
    Subscript {
        value: NodeId,
        slice: NodeId,
        ctx: ExprContext,
    },
    Starred {
        value: NodeId,
        ctx: ExprContext,
    },
    Name {
        id: String,
        ctx: ExprContext,
    },
    List {
        elts: Vec<NodeId>,
        ctx: ExprContext,
    },
    Tuple {
        elts: Vec<NodeId>,
        ctx: ExprContext,
    },
    Slice {
        lower: Option<NodeId>,
        upper: Option<NodeId>,
        step: Option<NodeId>,
    },

    // Patterns
    MatchValue {
        value: NodeId,
    },
    MatchSingleton {
        value: ConstantValue,
    },
    MatchSequence {
        patterns: Vec<NodeId>,
    },
    MatchMapping {
        keys: Vec<NodeId>,
        patterns: Vec<NodeId>,
        rest: Option<String>,
    },
    MatchClass {
        cls: NodeId,
        patterns: Vec<NodeId>,
        kwd_attrs: Vec<String>,
        kwd_patterns: Vec<NodeId>,
    },
    /// `*name` inside a sequence pattern; `None` for `*_`.
    MatchStar {
        name: Option<String>,
    },
    /// Capture, wildcard (both fields `None`) or `pattern as name`.
    MatchAs {
        pattern: Option<NodeId>,
        name: Option<String>,
    },
    MatchOr {
        patterns: Vec<NodeId>,
    },
}

impl NodeKind {
    /// The runtime's class name for this node kind (`"BinOp"`, `"Call"`...).
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Module { .. } => "Module",
            NodeKind::FunctionDef { is_async: true, .. } => "AsyncFunctionDef",
            NodeKind::FunctionDef { .. } => "FunctionDef",
            NodeKind::ClassDef { .. } => "ClassDef",
            NodeKind::Return { .. } => "Return",
            NodeKind::Delete { .. } => "Delete",
            NodeKind::Assign { .. } => "Assign",
            NodeKind::AugAssign { .. } => "AugAssign",
            NodeKind::AnnAssign { .. } => "AnnAssign",
            NodeKind::For { is_async: true, .. } => "AsyncFor",
            NodeKind::For { .. } => "For",
            NodeKind::While { .. } => "While",
            NodeKind::If { .. } => "If",
            NodeKind::With { is_async: true, .. } => "AsyncWith",
            NodeKind::With { .. } => "With",
            NodeKind::Raise { .. } => "Raise",
            NodeKind::Try { .. } => "Try",
            NodeKind::TryStar { .. } => "TryStar",
            NodeKind::Match { .. } => "Match",
            NodeKind::Assert { .. } => "Assert",
            NodeKind::Import { .. } => "Import",
            NodeKind::ImportFrom { .. } => "ImportFrom",
            NodeKind::Global { .. } => "Global",
            NodeKind::Nonlocal { .. } => "Nonlocal",
            NodeKind::Expr { .. } => "Expr",
            NodeKind::Pass => "Pass",
            NodeKind::Break => "Break",
            NodeKind::Continue => "Continue",
            NodeKind::ExceptHandler { .. } => "ExceptHandler",
            NodeKind::BoolOp { .. } => "BoolOp",
            NodeKind::NamedExpr { .. } => "NamedExpr",
            NodeKind::BinOp { .. } => "BinOp",
            NodeKind::UnaryOp { .. } => "UnaryOp",
            NodeKind::Lambda { .. } => "Lambda",
            NodeKind::IfExp { .. } => "IfExp",
            NodeKind::Dict { .. } => "Dict",
            NodeKind::Set { .. } => "Set",
            NodeKind::ListComp { .. } => "ListComp",
            NodeKind::SetComp { .. } => "SetComp",
            NodeKind::DictComp { .. } => "DictComp",
            NodeKind::GeneratorExp { .. } => "GeneratorExp",
            NodeKind::Await { .. } => "Await",
            NodeKind::Yield { .. } => "Yield",
            NodeKind::YieldFrom { .. } => "YieldFrom",
            NodeKind::Compare { .. } => "Compare",
            NodeKind::Call { .. } => "Call",
            NodeKind::FormattedValue { .. } => "FormattedValue",
            NodeKind::JoinedStr { .. } => "JoinedStr",
            NodeKind::Constant { .. } => "Constant",
            NodeKind::Attribute { .. } => "Attribute",
            NodeKind::Subscript { .. } => "Subscript",
            NodeKind::Starred { .. } => "Starred",
            NodeKind::Name { .. } => "Name",
            NodeKind::List { .. } => "List",
            NodeKind::Tuple { .. } => "Tuple",
            NodeKind::Slice { .. } => "Slice",
            NodeKind::MatchValue { .. } => "MatchValue",
            NodeKind::MatchSingleton { .. } => "MatchSingleton",
            NodeKind::MatchSequence { .. } => "MatchSequence",
            NodeKind::MatchMapping { .. } => "MatchMapping",
            NodeKind::MatchClass { .. } => "MatchClass",
            NodeKind::MatchStar { .. } => "MatchStar",
            NodeKind::MatchAs { .. } => "MatchAs",
            NodeKind::MatchOr { .. } => "MatchOr",
        }
    }

    /// True for statement kinds (the `stmt` family of the abstract grammar).
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            NodeKind::FunctionDef { .. }
                | NodeKind::ClassDef { .. }
                | NodeKind::Return { .. }
                | NodeKind::Delete { .. }
                | NodeKind::Assign { .. }
                | NodeKind::AugAssign { .. }
                | NodeKind::AnnAssign { .. }
                | NodeKind::For { .. }
                | NodeKind::While { .. }
                | NodeKind::If { .. }
                | NodeKind::With { .. }
                | NodeKind::Raise { .. }
                | NodeKind::Try { .. }
                | NodeKind::TryStar { .. }
                | NodeKind::Assert { .. }
                | NodeKind::Match { .. }
                | NodeKind::Import { .. }
                | NodeKind::ImportFrom { .. }
                | NodeKind::Global { .. }
                | NodeKind::Nonlocal { .. }
                | NodeKind::Expr { .. }
                | NodeKind::Pass
                | NodeKind::Break
                | NodeKind::Continue
        )
    }

    /// True for expression kinds (the `expr` family of the abstract grammar).
    pub fn is_expression(&self) -> bool {
        !self.is_statement()
            && !self.is_pattern()
            && !matches!(
                self,
                NodeKind::Module { .. } | NodeKind::ExceptHandler { .. }
            )
    }

    /// True for the `pattern` family used by `match` cases.
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            NodeKind::MatchValue { .. }
                | NodeKind::MatchSingleton { .. }
                | NodeKind::MatchSequence { .. }
                | NodeKind::MatchMapping { .. }
                | NodeKind::MatchClass { .. }
                | NodeKind::MatchStar { .. }
                | NodeKind::MatchAs { .. }
                | NodeKind::MatchOr { .. }
        )
    }

    /// True for kinds that open a new scope and get their own compiled unit.
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            NodeKind::FunctionDef { .. }
                | NodeKind::ClassDef { .. }
                | NodeKind::Lambda { .. }
                | NodeKind::ListComp { .. }
                | NodeKind::SetComp { .. }
                | NodeKind::DictComp { .. }
                | NodeKind::GeneratorExp { .. }
        )
    }

    /// Store/load/delete context of name-like expressions.
    pub fn ctx(&self) -> Option<ExprContext> {
        match self {
            NodeKind::Attribute { ctx, .. }
            | NodeKind::Subscript { ctx, .. }
            | NodeKind::Starred { ctx, .. }
            | NodeKind::Name { ctx, .. }
            | NodeKind::List { ctx, .. }
            | NodeKind::Tuple { ctx, .. } => Some(*ctx),
            _ => None,
        }
    }

    /// Comprehension clauses of a comprehension kind.
    pub fn generators(&self) -> Option<&[Comprehension]> {
        match self {
            NodeKind::ListComp { generators, .. }
            | NodeKind::SetComp { generators, .. }
            | NodeKind::DictComp { generators, .. }
            | NodeKind::GeneratorExp { generators, .. } => Some(generators),
            _ => None,
        }
    }

    /// Name the runtime gives the compiled unit of a comprehension kind.
    pub fn comprehension_name(&self) -> Option<&'static str> {
        match self {
            NodeKind::ListComp { .. } => Some("<listcomp>"),
            NodeKind::SetComp { .. } => Some("<setcomp>"),
            NodeKind::DictComp { .. } => Some("<dictcomp>"),
            NodeKind::GeneratorExp { .. } => Some("<genexpr>"),
            _ => None,
        }
    }
}

/// A parsed module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    /// Empty tree; the parser pushes nodes and then sets the root.
    pub fn new() -> Self {
        Ast {
            nodes: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    /// All ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn is_statement(&self, id: NodeId) -> bool {
        self.kind(id).is_statement()
    }

    pub fn is_expression(&self, id: NodeId) -> bool {
        self.kind(id).is_expression()
    }

    pub fn ctx(&self, id: NodeId) -> Option<ExprContext> {
        self.kind(id).ctx()
    }

    /// Source text of a node.
    pub fn text<'s>(&self, id: NodeId, source: &'s str) -> &'s str {
        source.get(self.node(id).span.range()).unwrap_or("")
    }

    /// First line of the compiled unit a scope node produces.
    ///
    /// Decorated definitions start at their first decorator.
    pub fn definition_first_line(&self, id: NodeId) -> u32 {
        match self.kind(id) {
            NodeKind::FunctionDef { decorators, .. } | NodeKind::ClassDef { decorators, .. } => {
                decorators
                    .first()
                    .map(|d| self.node(*d).lineno)
                    .unwrap_or(self.node(id).lineno)
            }
            _ => self.node(id).lineno,
        }
    }

    /// Name of the compiled unit a scope node produces.
    pub fn scope_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::FunctionDef { name, .. } | NodeKind::ClassDef { name, .. } => Some(name),
            NodeKind::Lambda { .. } => Some("<lambda>"),
            kind => kind.comprehension_name(),
        }
    }

    /// Direct children in field order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let push_comprehensions = |out: &mut Vec<NodeId>, generators: &[Comprehension]| {
            for generator in generators {
                out.push(generator.target);
                out.push(generator.iter);
                out.extend(generator.ifs.iter().copied());
            }
        };
        let push_arguments = |out: &mut Vec<NodeId>, args: &Arguments| {
            out.extend(args.annotations());
            out.extend(args.kw_defaults.iter().flatten().copied());
            out.extend(args.defaults.iter().copied());
        };

        match self.kind(id) {
            NodeKind::Module { body } => out.extend(body),
            NodeKind::FunctionDef {
                args,
                body,
                decorators,
                returns,
                ..
            } => {
                push_arguments(&mut out, args.as_ref());
                out.extend(body);
                out.extend(decorators);
                out.extend(returns);
            }
            NodeKind::ClassDef {
                bases,
                keywords,
                body,
                decorators,
                ..
            } => {
                out.extend(bases);
                out.extend(keywords.iter().map(|k| k.value));
                out.extend(body);
                out.extend(decorators);
            }
            NodeKind::Return { value } => out.extend(value),
            NodeKind::Delete { targets } => out.extend(targets),
            NodeKind::Assign { targets, value } => {
                out.extend(targets);
                out.push(*value);
            }
            NodeKind::AugAssign { target, value, .. } => out.extend([*target, *value]),
            NodeKind::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                out.extend([*target, *annotation]);
                out.extend(value);
            }
            NodeKind::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                out.extend([*target, *iter]);
                out.extend(body);
                out.extend(orelse);
            }
            NodeKind::While { test, body, orelse } | NodeKind::If { test, body, orelse } => {
                out.push(*test);
                out.extend(body);
                out.extend(orelse);
            }
            NodeKind::With { items, body, .. } => {
                for item in items {
                    out.push(item.context_expr);
                    out.extend(item.optional_vars);
                }
                out.extend(body);
            }
            NodeKind::Raise { exc, cause } => {
                out.extend(exc);
                out.extend(cause);
            }
            NodeKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            }
            | NodeKind::TryStar {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                out.extend(body);
                out.extend(handlers);
                out.extend(orelse);
                out.extend(finalbody);
            }
            NodeKind::Match { subject, cases } => {
                out.push(*subject);
                for case in cases {
                    out.push(case.pattern);
                    out.extend(case.guard);
                    out.extend(&case.body);
                }
            }
            NodeKind::ExceptHandler { type_, body, .. } => {
                out.extend(type_);
                out.extend(body);
            }
            NodeKind::Assert { test, msg } => {
                out.push(*test);
                out.extend(msg);
            }
            NodeKind::Import { .. }
            | NodeKind::ImportFrom { .. }
            | NodeKind::Global { .. }
            | NodeKind::Nonlocal { .. }
            | NodeKind::Pass
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Constant { .. }
            | NodeKind::Name { .. }
            | NodeKind::MatchSingleton { .. }
            | NodeKind::MatchStar { .. } => {}
            NodeKind::Expr { value }
            | NodeKind::Await { value }
            | NodeKind::YieldFrom { value }
            | NodeKind::Attribute { value, .. }
            | NodeKind::Starred { value, .. } => out.push(*value),
            NodeKind::Yield { value } => out.extend(value),
            NodeKind::BoolOp { values, .. } => out.extend(values),
            NodeKind::NamedExpr { target, value } => out.extend([*target, *value]),
            NodeKind::BinOp { left, right, .. } => out.extend([*left, *right]),
            NodeKind::UnaryOp { operand, .. } => out.push(*operand),
            NodeKind::Lambda { args, body } => {
                push_arguments(&mut out, args.as_ref());
                out.push(*body);
            }
            NodeKind::IfExp { test, body, orelse } => out.extend([*test, *body, *orelse]),
            NodeKind::Dict { keys, values } => {
                out.extend(keys.iter().flatten());
                out.extend(values);
            }
            NodeKind::Set { elts } | NodeKind::List { elts, .. } | NodeKind::Tuple { elts, .. } => {
                out.extend(elts)
            }
            NodeKind::ListComp { elt, generators }
            | NodeKind::SetComp { elt, generators }
            | NodeKind::GeneratorExp { elt, generators } => {
                out.push(*elt);
                push_comprehensions(&mut out, generators);
            }
            NodeKind::DictComp {
                key,
                value,
                generators,
            } => {
                out.extend([*key, *value]);
                push_comprehensions(&mut out, generators);
            }
            NodeKind::Compare {
                left, comparators, ..
            } => {
                out.push(*left);
                out.extend(comparators);
            }
            NodeKind::Call {
                func,
                args,
                keywords,
            } => {
                out.push(*func);
                out.extend(args);
                out.extend(keywords.iter().map(|k| k.value));
            }
            NodeKind::FormattedValue {
                value, format_spec, ..
            } => {
                out.push(*value);
                out.extend(format_spec);
            }
            NodeKind::JoinedStr { values } => out.extend(values),
            NodeKind::Subscript { value, slice, .. } => out.extend([*value, *slice]),
            NodeKind::Slice { lower, upper, step } => {
                out.extend(lower);
                out.extend(upper);
                out.extend(step);
            }
            NodeKind::MatchValue { value } => out.push(*value),
            NodeKind::MatchSequence { patterns } | NodeKind::MatchOr { patterns } => {
                out.extend(patterns)
            }
            NodeKind::MatchMapping { keys, patterns, .. } => {
                out.extend(keys);
                out.extend(patterns);
            }
            NodeKind::MatchClass {
                cls,
                patterns,
                kwd_patterns,
                ..
            } => {
                out.push(*cls);
                out.extend(patterns);
                out.extend(kwd_patterns);
            }
            NodeKind::MatchAs { pattern, .. } => out.extend(pattern),
        }
        out
    }

    /// Breadth-first walk of the whole tree, root first.
    pub fn walk(&self) -> Vec<NodeId> {
        self.walk_from(self.root)
    }

    /// Breadth-first walk of the subtree rooted at `id`, `id` included.
    pub fn walk_from(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            order.push(next);
            queue.extend(self.children(next));
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_module;

    #[test]
    fn children_follow_field_order() {
        let ast = parse_module("f(a, b=c)\n").unwrap();
        let NodeKind::Module { body } = ast.kind(ast.root()) else {
            panic!("root is not a module");
        };
        let NodeKind::Expr { value } = ast.kind(body[0]) else {
            panic!("not an expression statement");
        };
        let names: Vec<_> = ast
            .children(*value)
            .into_iter()
            .map(|id| match ast.kind(id) {
                NodeKind::Name { id, .. } => id.clone(),
                other => other.type_name().to_string(),
            })
            .collect();
        assert_eq!(names, ["f", "a", "c"]);
    }

    #[test]
    fn walk_visits_every_node_once() {
        let ast = parse_module("x = [i * 2 for i in range(3)]\n").unwrap();
        let mut walked = ast.walk();
        walked.sort();
        walked.dedup();
        assert_eq!(walked.len(), ast.len());
    }

    #[test]
    fn decorated_definition_starts_at_decorator() {
        let ast = parse_module("@dec\n\ndef f():\n    pass\n").unwrap();
        let def = ast
            .walk()
            .into_iter()
            .find(|id| matches!(ast.kind(*id), NodeKind::FunctionDef { .. }))
            .unwrap();
        assert_eq!(ast.node(def).lineno, 3);
        assert_eq!(ast.definition_first_line(def), 1);
        assert_eq!(ast.scope_name(def), Some("f"));
    }

    #[test]
    fn type_names() {
        let ast = parse_module("async def f():\n    await g()\n").unwrap();
        let kinds: Vec<_> = ast.walk().iter().map(|id| ast.kind(*id).type_name()).collect();
        assert_eq!(
            kinds,
            ["Module", "AsyncFunctionDef", "Expr", "Await", "Call", "Name"]
        );
    }
}
