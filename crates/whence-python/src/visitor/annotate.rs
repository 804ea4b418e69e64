// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Parent links and the line -> statement index.
//!
//! The tree itself stays immutable; [`Annotations`] holds the back-links as
//! side tables indexed by [`NodeId`], built in a single walk.
//!
//! # Line Index
//!
//! A statement is listed under every line on which one of its instructions
//! can be attributed:
//! - the first line of the statement and of every non-expression node in it
//! - every line spanned by an expression inside it
//!
//! So a multi-line call is found from any of its lines, while a compound
//! statement is found from its header line but not from its body lines,
//! which belong to the body statements.

use std::collections::BTreeMap;

use super::dispatch::walk;
use super::traits::{VisitResult, Visitor};
use crate::nodes::{Ast, NodeId, NodeKind, UnaryOperator};

/// Structural back-links for one [`Ast`].
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    parents: Vec<Option<NodeId>>,
    statements: Vec<Option<NodeId>>,
    by_line: BTreeMap<u32, Vec<NodeId>>,
}

impl Annotations {
    /// Annotate `ast`. Runs one depth-first walk.
    pub fn build(ast: &Ast) -> Self {
        let mut builder = AnnotationBuilder {
            annotations: Annotations {
                parents: vec![None; ast.len()],
                statements: vec![None; ast.len()],
                by_line: BTreeMap::new(),
            },
            stack: Vec::new(),
        };
        walk(&mut builder, ast);
        let mut annotations = builder.annotations;
        for statements in annotations.by_line.values_mut() {
            statements.sort_by_key(|id| ast.node(*id).span.start);
            statements.dedup();
        }
        annotations
    }

    /// The parent of `id`; `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id.index()).copied().flatten()
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |current| self.parent(*current))
    }

    /// The innermost statement containing `id` (`id` itself for statements).
    pub fn statement(&self, id: NodeId) -> Option<NodeId> {
        self.statements.get(id.index()).copied().flatten()
    }

    /// The node whose compiled unit evaluates `id`, paired with the child of
    /// that node on the path down to `id` (`id` itself when it is that
    /// child). For definitions the child is a body statement. `None` for
    /// the root.
    ///
    /// Decorators, defaults, annotations, class bases and the first
    /// iterable of a comprehension belong to the unit around the
    /// definition.
    pub fn enclosing_unit(&self, ast: &Ast, id: NodeId) -> Option<(NodeId, NodeId)> {
        let mut child = id;
        for parent in self.ancestors(id) {
            if runs_inside(ast, parent, child) {
                return Some((parent, child));
            }
            child = parent;
        }
        None
    }

    /// Statements attributed to 1-indexed `line`, in source order.
    pub fn statements_at_line(&self, line: u32) -> &[NodeId] {
        self.by_line.get(&line).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every line that has at least one statement.
    pub fn lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_line.keys().copied()
    }

    /// True when `id` is the operand of a boolean `not`.
    pub fn is_not_operand(&self, ast: &Ast, id: NodeId) -> bool {
        self.parent(id).is_some_and(|parent| {
            matches!(
                ast.kind(parent),
                NodeKind::UnaryOp {
                    op: UnaryOperator::Not,
                    ..
                }
            )
        })
    }
}

/// Whether `child` of `unit` is evaluated by `unit`'s own compiled code.
fn runs_inside(ast: &Ast, unit: NodeId, child: NodeId) -> bool {
    match ast.kind(unit) {
        NodeKind::Module { .. } => true,
        NodeKind::FunctionDef { body, .. } | NodeKind::ClassDef { body, .. } => body.contains(&child),
        NodeKind::Lambda { body, .. } => *body == child,
        kind => kind
            .generators()
            .is_some_and(|generators| generators.first().map(|g| g.iter) != Some(child)),
    }
}

struct AnnotationBuilder {
    annotations: Annotations,
    /// Open nodes paired with their innermost enclosing statement.
    stack: Vec<(NodeId, Option<NodeId>)>,
}

impl Visitor for AnnotationBuilder {
    fn visit_node(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let (parent, enclosing) = match self.stack.last() {
            Some((parent, enclosing)) => (Some(*parent), *enclosing),
            None => (None, None),
        };
        let statement = if ast.is_statement(id) {
            Some(id)
        } else {
            enclosing
        };
        self.annotations.parents[id.index()] = parent;
        self.annotations.statements[id.index()] = statement;

        if let Some(statement) = statement {
            let node = ast.node(id);
            let lines = if ast.is_expression(id) {
                node.lineno..=node.end_lineno
            } else {
                node.lineno..=node.lineno
            };
            for line in lines {
                self.annotations
                    .by_line
                    .entry(line)
                    .or_default()
                    .push(statement);
            }
        }
        self.stack.push((id, statement));
        VisitResult::Continue
    }

    fn leave_node(&mut self, _ast: &Ast, _id: NodeId) {
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_module;

    fn statement_texts<'s>(ast: &Ast, annotations: &Annotations, source: &'s str, line: u32) -> Vec<&'s str> {
        annotations
            .statements_at_line(line)
            .iter()
            .map(|id| ast.text(*id, source))
            .collect()
    }

    #[test]
    fn parents_and_statements() {
        let source = "x = f(a.b)\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        let attr = ast
            .ids()
            .find(|id| matches!(ast.kind(*id), NodeKind::Attribute { .. }))
            .unwrap();
        let call = annotations.parent(attr).unwrap();
        assert_eq!(ast.text(call, source), "f(a.b)");
        let statement = annotations.statement(attr).unwrap();
        assert_eq!(ast.text(statement, source), "x = f(a.b)");
        assert_eq!(annotations.ancestors(attr).count(), 3);
        assert_eq!(annotations.parent(ast.root()), None);
    }

    #[test]
    fn enclosing_units() {
        let source = "@d(p)\ndef f(a=q):\n    if a:\n        return g(r)\nz = [s for s in t]\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        let name = |text: &str| {
            ast.ids()
                .find(|id| matches!(ast.kind(*id), NodeKind::Name { id: n, .. } if n == text))
                .unwrap()
        };
        let texts = |text: &str| {
            let (unit, top) = annotations.enclosing_unit(&ast, name(text)).unwrap();
            (ast.kind(unit).type_name(), ast.text(top, source))
        };
        let def = "def f(a=q):\n    if a:\n        return g(r)";
        assert_eq!(texts("p"), ("Module", def));
        assert_eq!(texts("q"), ("Module", def));
        assert_eq!(texts("r"), ("FunctionDef", "if a:\n        return g(r)"));
        assert_eq!(texts("t"), ("Module", "z = [s for s in t]"));
        let (unit, top) = annotations.enclosing_unit(&ast, name("s")).unwrap();
        assert_eq!(ast.kind(unit).type_name(), "ListComp");
        assert_eq!(ast.text(top, source), "s");
        assert_eq!(annotations.enclosing_unit(&ast, ast.root()), None);
    }

    #[test]
    fn semicolon_statements_share_a_line() {
        let source = "a = 1; b = 2\nc = 3\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        assert_eq!(statement_texts(&ast, &annotations, source, 1), ["a = 1", "b = 2"]);
        assert_eq!(statement_texts(&ast, &annotations, source, 2), ["c = 3"]);
        assert!(annotations.statements_at_line(3).is_empty());
    }

    #[test]
    fn multi_line_expression_indexes_every_line() {
        let source = "x = f(\n    a,\n    b)\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        for line in 1..=3 {
            assert_eq!(statement_texts(&ast, &annotations, source, line).len(), 1);
        }
    }

    #[test]
    fn compound_header_but_not_body() {
        let source = "if x:\n    y = 1\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        assert_eq!(statement_texts(&ast, &annotations, source, 1).len(), 1);
        assert_eq!(statement_texts(&ast, &annotations, source, 2), ["y = 1"]);
    }

    #[test]
    fn one_line_compound_statement() {
        let source = "if x: y()\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        let texts = statement_texts(&ast, &annotations, source, 1);
        assert_eq!(texts, ["if x: y()", "y()"]);
    }

    #[test]
    fn decorator_line_belongs_to_definition() {
        let source = "@deco(1)\ndef f():\n    pass\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        let texts = statement_texts(&ast, &annotations, source, 1);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("def f"));
    }

    #[test]
    fn not_operand() {
        let source = "not a\n";
        let ast = parse_module(source).unwrap();
        let annotations = Annotations::build(&ast);
        let name = ast
            .ids()
            .find(|id| matches!(ast.kind(*id), NodeKind::Name { .. }))
            .unwrap();
        assert!(annotations.is_not_operand(&ast, name));
    }
}
