// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Qualified names of compiled scopes.
//!
//! The runtime names a nested scope by joining the names of its enclosing
//! scopes with dots. A function or lambda parent contributes an extra
//! `<locals>` segment; class and comprehension parents do not:
//!
//! ```text
//! class A:
//!     def m(self):            # A.m
//!         def inner():        # A.m.<locals>.inner
//!             return [lambda: 0 for _ in x]   # A.m.<locals>.inner.<locals>.<listcomp>.<lambda>
//! ```
//!
//! A `def` or `class` whose name is declared `global` in the enclosing
//! function or class is named as if it were defined at module level.
//!
//! Parts of a definition that run in the enclosing scope (decorators,
//! defaults, annotations, class bases, the first comprehension iterable) are
//! named in that enclosing scope.
//!
//! Compiled units are identified by `(name, first line)`. When two scopes
//! share that key the first one in source order wins.

use std::collections::{HashMap, HashSet};

use super::dispatch::walk_node;
use super::traits::{VisitResult, Visitor};
use crate::nodes::{Arguments, Ast, NodeId, NodeKind};

/// Qualified names keyed by `(scope name, first line)`.
#[derive(Debug, Clone, Default)]
pub struct Qualnames {
    names: HashMap<(String, u32), String>,
}

impl Qualnames {
    /// Derive the qualified name of every scope in `ast`.
    pub fn build(ast: &Ast) -> Self {
        let mut collector = QualnameCollector {
            names: HashMap::new(),
            prefixes: vec![String::new()],
            globals: vec![HashSet::new()],
        };
        walk_node(&mut collector, ast, ast.root());
        Qualnames {
            names: collector.names,
        }
    }

    /// Qualified name of the scope named `name` whose compiled unit starts
    /// at `first_line`.
    pub fn get(&self, name: &str, first_line: u32) -> Option<&str> {
        self.names
            .get(&(name.to_string(), first_line))
            .map(String::as_str)
    }

    /// Qualified name, or `name` itself when the scope is unknown
    /// (module-level code included).
    pub fn get_or_name(&self, name: &str, first_line: u32) -> String {
        self.get(name, first_line).unwrap_or(name).to_string()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

struct QualnameCollector {
    names: HashMap<(String, u32), String>,
    /// Prefix for names defined in the current scope, e.g. `"f.<locals>."`.
    prefixes: Vec<String>,
    /// Names declared `global` in the current scope.
    globals: Vec<HashSet<String>>,
}

/// Names declared `global` by `id` and the statements nested in it,
/// stopping at nested scopes.
fn collect_globals(ast: &Ast, id: NodeId, out: &mut HashSet<String>) {
    match ast.kind(id) {
        NodeKind::Global { names } => out.extend(names.iter().cloned()),
        NodeKind::FunctionDef { .. } | NodeKind::ClassDef { .. } | NodeKind::Lambda { .. } => {}
        kind if kind.generators().is_some() => {}
        _ => {
            for child in ast.children(id) {
                collect_globals(ast, child, out);
            }
        }
    }
}

impl QualnameCollector {
    fn prefix(&self) -> &str {
        self.prefixes.last().map(String::as_str).unwrap_or("")
    }

    fn walk_all(&mut self, ast: &Ast, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            walk_node(self, ast, id);
        }
    }

    /// Defaults and annotations, evaluated where the definition runs.
    fn walk_signature(&mut self, ast: &Ast, args: &Arguments) {
        self.walk_all(ast, args.defaults.iter().copied());
        self.walk_all(ast, args.kw_defaults.iter().flatten().copied());
        self.walk_all(ast, args.annotations());
    }

    /// Record the scope `id` and return the prefix for names inside it.
    /// Only definitions (`is_def`) can be hoisted by a `global` statement.
    fn enter(&mut self, ast: &Ast, id: NodeId, locals: bool, is_def: bool) -> String {
        let name = ast.scope_name(id).unwrap_or_default().to_string();
        let hoisted = is_def && self.globals.last().is_some_and(|g| g.contains(&name));
        let qualname = if hoisted {
            name.clone()
        } else {
            format!("{}{}", self.prefix(), name)
        };
        let first_line = ast.definition_first_line(id);
        self.names
            .entry((name, first_line))
            .or_insert_with(|| qualname.clone());
        if locals {
            format!("{}.<locals>.", qualname)
        } else {
            format!("{}.", qualname)
        }
    }

    fn walk_scope_body(&mut self, ast: &Ast, prefix: String, ids: impl IntoIterator<Item = NodeId>) {
        let ids: Vec<NodeId> = ids.into_iter().collect();
        let mut globals = HashSet::new();
        for id in &ids {
            collect_globals(ast, *id, &mut globals);
        }
        self.prefixes.push(prefix);
        self.globals.push(globals);
        self.walk_all(ast, ids);
        self.globals.pop();
        self.prefixes.pop();
    }
}

impl Visitor for QualnameCollector {
    fn visit_function_def(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let NodeKind::FunctionDef {
            args,
            body,
            decorators,
            returns,
            ..
        } = ast.kind(id)
        else {
            return VisitResult::Continue;
        };
        self.walk_all(ast, decorators.iter().copied());
        self.walk_signature(ast, args);
        self.walk_all(ast, returns.iter().copied());
        let prefix = self.enter(ast, id, true, true);
        self.walk_scope_body(ast, prefix, body.iter().copied());
        VisitResult::SkipChildren
    }

    fn visit_class_def(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let NodeKind::ClassDef {
            bases,
            keywords,
            body,
            decorators,
            ..
        } = ast.kind(id)
        else {
            return VisitResult::Continue;
        };
        self.walk_all(ast, decorators.iter().copied());
        self.walk_all(ast, bases.iter().copied());
        self.walk_all(ast, keywords.iter().map(|k| k.value));
        let prefix = self.enter(ast, id, false, true);
        self.walk_scope_body(ast, prefix, body.iter().copied());
        VisitResult::SkipChildren
    }

    fn visit_lambda(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let NodeKind::Lambda { args, body } = ast.kind(id) else {
            return VisitResult::Continue;
        };
        self.walk_signature(ast, args);
        let prefix = self.enter(ast, id, true, false);
        self.walk_scope_body(ast, prefix, [*body]);
        VisitResult::SkipChildren
    }

    fn visit_node(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let Some(generators) = ast.kind(id).generators() else {
            return VisitResult::Continue;
        };
        // The outermost iterable is evaluated before the comprehension's
        // own unit is entered.
        if let Some(first) = generators.first() {
            walk_node(self, ast, first.iter);
        }
        let prefix = self.enter(ast, id, false, false);
        let inner: Vec<NodeId> = ast
            .children(id)
            .into_iter()
            .filter(|child| generators.first().map(|g| g.iter) != Some(*child))
            .collect();
        self.walk_scope_body(ast, prefix, inner);
        VisitResult::SkipChildren
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_module;

    fn qualnames(source: &str) -> Qualnames {
        Qualnames::build(&parse_module(source).unwrap())
    }

    #[test]
    fn nested_function_in_method() {
        let names = qualnames(
            "class A:\n    def m(self):\n        def inner():\n            def deepest():\n                pass\n",
        );
        assert_eq!(names.get("A", 1), Some("A"));
        assert_eq!(names.get("m", 2), Some("A.m"));
        assert_eq!(names.get("inner", 3), Some("A.m.<locals>.inner"));
        assert_eq!(
            names.get("deepest", 4),
            Some("A.m.<locals>.inner.<locals>.deepest")
        );
    }

    #[test]
    fn comprehensions_and_lambdas() {
        let names = qualnames("def f():\n    return [lambda: i for i in x]\n");
        assert_eq!(names.get("<listcomp>", 2), Some("f.<locals>.<listcomp>"));
        assert_eq!(names.get("<lambda>", 2), Some("f.<locals>.<listcomp>.<lambda>"));
    }

    #[test]
    fn outer_scope_parts() {
        let source = "\
@deco(lambda: 1)
def f(a=lambda: 2):
    pass
class C(base(lambda: 3)):
    pass
";
        let names = qualnames(source);
        assert_eq!(names.get("<lambda>", 1), Some("<lambda>"));
        assert_eq!(names.get("<lambda>", 2), Some("<lambda>"));
        assert_eq!(names.get("<lambda>", 4), Some("<lambda>"));
        assert_eq!(names.get("f", 1), Some("f"));
    }

    #[test]
    fn first_iterable_runs_outside() {
        let names = qualnames("def f():\n    return [x for x in (y for y in z)]\n");
        assert_eq!(names.get("<genexpr>", 2), Some("f.<locals>.<genexpr>"));
    }

    #[test]
    fn global_declarations_hoist_definitions() {
        let source = "\
def outer():
    global g, lam
    def g():
        def h():
            pass
    lam = lambda: 0
class K:
    global G
    class G:
        pass
    def m(self):
        pass
";
        let names = qualnames(source);
        assert_eq!(names.get("g", 3), Some("g"));
        assert_eq!(names.get("h", 4), Some("g.<locals>.h"));
        assert_eq!(names.get("<lambda>", 6), Some("outer.<locals>.<lambda>"));
        assert_eq!(names.get("G", 9), Some("G"));
        assert_eq!(names.get("m", 11), Some("K.m"));
    }

    #[test]
    fn global_in_a_nested_function_stays_there() {
        let source = "\
def outer():
    def inner():
        global f
    def f():
        pass
";
        let names = qualnames(source);
        assert_eq!(names.get("f", 4), Some("outer.<locals>.f"));
    }

    #[test]
    fn first_definition_wins() {
        let names = qualnames("def g(): pass\nclass K:\n    pass\nif x:\n    def g(): pass\n");
        assert_eq!(names.get("g", 1), Some("g"));
        assert_eq!(names.get("g", 5), Some("g"));
        assert_eq!(names.get_or_name("missing", 9), "missing");
    }
}
