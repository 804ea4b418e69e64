//! Symbol table: which scope every name lives in.
//!
//! Two passes. The first walks the tree recording, per scope, every name
//! that is bound, used, declared `global` or `nonlocal`. The second resolves
//! each name top-down: locals that an inner function reads become cells,
//! and the inner function sees them as free variables. Class bodies do not
//! bind names for the functions nested in them.

use std::collections::{BTreeSet, HashMap, HashSet};

use whence_python::{walk_node, Arguments, Ast, ExprContext, NodeId, NodeKind, VisitResult, Visitor};

use super::CompileError;

const DEF_LOCAL: u8 = 1;
const USE: u8 = 2;
const PARAM: u8 = 4;
const GLOBAL: u8 = 8;
const NONLOCAL: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Class,
    Function,
    Lambda,
    Comprehension,
}

impl ScopeKind {
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension
        )
    }
}

/// Where a name resolves inside one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScope {
    Local,
    /// Local, and captured by an inner scope.
    Cell,
    /// Captured from an enclosing function.
    Free,
    GlobalExplicit,
    GlobalImplicit,
}

/// One scope with its resolved names.
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub params: Vec<String>,
    pub children: Vec<NodeId>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub is_generator: bool,
    pub is_coroutine: bool,
    /// A module or class body with simple annotated assignments.
    pub has_annotations: bool,
    order: Vec<String>,
    flags: HashMap<String, u8>,
    resolved: HashMap<String, NameScope>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Scope {
            kind,
            params: Vec::new(),
            children: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            is_generator: false,
            is_coroutine: false,
            has_annotations: false,
            order: Vec::new(),
            flags: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    fn mark(&mut self, name: &str, flag: u8) {
        match self.flags.get_mut(name) {
            Some(flags) => *flags |= flag,
            None => {
                self.order.push(name.to_string());
                self.flags.insert(name.to_string(), flag);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> NameScope {
        self.resolved
            .get(name)
            .copied()
            .unwrap_or(NameScope::GlobalImplicit)
    }

    /// Index among `cellvars` followed by `freevars`.
    pub fn deref_index(&self, name: &str) -> Option<u32> {
        self.cellvars
            .iter()
            .chain(&self.freevars)
            .position(|n| n == name)
            .map(|i| i as u32)
    }

    pub fn varname_index(&self, name: &str) -> Option<u32> {
        self.varnames.iter().position(|n| n == name).map(|i| i as u32)
    }

    /// True when `name` is declared `global` in this scope.
    pub fn is_declared_global(&self, name: &str) -> bool {
        self.lookup(name) == NameScope::GlobalExplicit
    }
}

/// Scopes of one module, keyed by the node that opens them.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: HashMap<NodeId, Scope>,
}

impl SymbolTable {
    pub fn build(ast: &Ast) -> Result<Self, CompileError> {
        let mut collector = Collector {
            scopes: HashMap::new(),
            stack: Vec::new(),
            errors: Vec::new(),
        };
        collector.scopes.insert(ast.root(), Scope::new(ScopeKind::Module));
        collector.stack.push(ast.root());
        if let NodeKind::Module { body } = ast.kind(ast.root()) {
            for stmt in body {
                walk_node(&mut collector, ast, *stmt);
            }
        }
        if let Some(error) = collector.errors.into_iter().next() {
            return Err(error);
        }
        let mut table = SymbolTable {
            scopes: collector.scopes,
        };
        table.analyze(ast, ast.root(), &HashSet::new())?;
        Ok(table)
    }

    pub fn scope(&self, id: NodeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    fn analyze(
        &mut self,
        ast: &Ast,
        id: NodeId,
        enclosing: &HashSet<String>,
    ) -> Result<BTreeSet<String>, CompileError> {
        let Some(scope) = self.scopes.get(&id) else {
            return Ok(BTreeSet::new());
        };
        let kind = scope.kind;
        let order = scope.order.clone();
        let flags = scope.flags.clone();
        let children = scope.children.clone();

        let mut resolved = HashMap::new();
        for name in &order {
            let flag = flags.get(name).copied().unwrap_or(0);
            let name_scope = if flag & GLOBAL != 0 {
                NameScope::GlobalExplicit
            } else if flag & NONLOCAL != 0 {
                if !enclosing.contains(name) {
                    return Err(CompileError::new(
                        format!("no binding for nonlocal '{}' found", name),
                        ast.node(id).lineno,
                    ));
                }
                NameScope::Free
            } else if flag & (DEF_LOCAL | PARAM) != 0 {
                NameScope::Local
            } else if kind != ScopeKind::Module && enclosing.contains(name) {
                NameScope::Free
            } else {
                NameScope::GlobalImplicit
            };
            resolved.insert(name.clone(), name_scope);
        }

        let inner: HashSet<String> = match kind {
            ScopeKind::Module => HashSet::new(),
            ScopeKind::Class => enclosing.clone(),
            _ => {
                let mut inner = enclosing.clone();
                for (name, name_scope) in &resolved {
                    match name_scope {
                        NameScope::Local | NameScope::Free => {
                            inner.insert(name.clone());
                        }
                        NameScope::GlobalExplicit => {
                            inner.remove(name);
                        }
                        _ => {}
                    }
                }
                inner
            }
        };

        let mut child_free = BTreeSet::new();
        for child in children {
            child_free.extend(self.analyze(ast, child, &inner)?);
        }

        // A class that binds a name its methods capture keeps its own binding
        // and passes the enclosing variable through.
        let mut passthrough = BTreeSet::new();
        for name in child_free {
            match resolved.get(&name) {
                Some(NameScope::Local) if kind.is_function_like() => {
                    resolved.insert(name, NameScope::Cell);
                }
                Some(NameScope::Cell | NameScope::Free) => {}
                Some(NameScope::Local) => {
                    passthrough.insert(name);
                }
                _ => {
                    resolved.insert(name, NameScope::Free);
                }
            }
        }

        let Some(scope) = self.scopes.get_mut(&id) else {
            return Ok(BTreeSet::new());
        };
        if kind.is_function_like() {
            let mut varnames = scope.params.clone();
            for name in &order {
                if resolved.get(name) == Some(&NameScope::Local) && !varnames.contains(name) {
                    varnames.push(name.clone());
                }
            }
            scope.varnames = varnames;
        }
        let mut cellvars: Vec<String> = resolved
            .iter()
            .filter(|(_, s)| **s == NameScope::Cell)
            .map(|(n, _)| n.clone())
            .collect();
        cellvars.sort();
        let mut freevars: BTreeSet<String> = resolved
            .iter()
            .filter(|(_, s)| **s == NameScope::Free)
            .map(|(n, _)| n.clone())
            .collect();
        freevars.extend(passthrough);
        scope.cellvars = cellvars;
        scope.freevars = freevars.iter().cloned().collect();
        scope.resolved = resolved;
        Ok(freevars)
    }
}

struct Collector {
    scopes: HashMap<NodeId, Scope>,
    stack: Vec<NodeId>,
    errors: Vec<CompileError>,
}

impl Collector {
    fn current(&mut self) -> &mut Scope {
        let id = self.stack.last().copied().unwrap_or(NodeId(0));
        self.scopes
            .entry(id)
            .or_insert_with(|| Scope::new(ScopeKind::Module))
    }

    fn walk_all(&mut self, ast: &Ast, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            walk_node(self, ast, id);
        }
    }

    fn walk_signature(&mut self, ast: &Ast, args: &Arguments) {
        self.walk_all(ast, args.defaults.iter().copied());
        self.walk_all(ast, args.kw_defaults.iter().flatten().copied());
        self.walk_all(ast, args.annotations());
    }

    fn open(&mut self, id: NodeId, mut scope: Scope) {
        self.current().children.push(id);
        for param in scope.params.clone() {
            scope.mark(&param, PARAM);
        }
        self.scopes.insert(id, scope);
        self.stack.push(id);
    }

    fn close(&mut self) {
        self.stack.pop();
    }

    fn params(args: &Arguments) -> Vec<String> {
        args.all_args().map(|arg| arg.name.clone()).collect()
    }

    /// Bind a walrus target inside comprehensions to the nearest enclosing
    /// non-comprehension scope.
    fn bind_named_target(&mut self, name: &str, line: u32) {
        let Some(position) = self.stack.iter().rposition(|id| {
            self.scopes
                .get(id)
                .is_some_and(|s| s.kind != ScopeKind::Comprehension)
        }) else {
            return;
        };
        let owner = self.stack[position];
        let owner_kind = self.scopes.get(&owner).map(|s| s.kind);
        if position + 1 == self.stack.len() {
            self.current().mark(name, DEF_LOCAL);
            return;
        }
        let flag = match owner_kind {
            Some(ScopeKind::Module) => GLOBAL,
            Some(ScopeKind::Class) => {
                self.errors.push(CompileError::new(
                    "assignment expression within a comprehension cannot be used in a class body",
                    line,
                ));
                return;
            }
            _ => NONLOCAL,
        };
        if let Some(scope) = self.scopes.get_mut(&owner) {
            scope.mark(name, DEF_LOCAL);
        }
        for id in self.stack[position + 1..].to_vec() {
            if let Some(scope) = self.scopes.get_mut(&id) {
                scope.mark(name, flag);
            }
        }
    }
}

impl Visitor for Collector {
    fn visit_node(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let Some(generators) = ast.kind(id).generators() else {
            return VisitResult::Continue;
        };
        let first_iter = generators.first().map(|g| g.iter);
        self.walk_all(ast, first_iter);
        let mut scope = Scope::new(ScopeKind::Comprehension);
        scope.params.push(".0".to_string());
        scope.is_generator = matches!(ast.kind(id), NodeKind::GeneratorExp { .. });
        self.open(id, scope);
        let inner: Vec<NodeId> = ast
            .children(id)
            .into_iter()
            .filter(|child| Some(*child) != first_iter)
            .collect();
        self.walk_all(ast, inner);
        self.close();
        VisitResult::SkipChildren
    }

    fn visit_function_def(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let NodeKind::FunctionDef {
            name,
            args,
            body,
            decorators,
            returns,
            is_async,
        } = ast.kind(id)
        else {
            return VisitResult::Continue;
        };
        self.current().mark(name, DEF_LOCAL);
        self.walk_all(ast, decorators.iter().copied());
        self.walk_signature(ast, args);
        self.walk_all(ast, returns.iter().copied());
        let mut scope = Scope::new(ScopeKind::Function);
        scope.params = Self::params(args);
        scope.is_coroutine = *is_async;
        self.open(id, scope);
        self.walk_all(ast, body.iter().copied());
        self.close();
        VisitResult::SkipChildren
    }

    fn visit_class_def(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let NodeKind::ClassDef {
            name,
            bases,
            keywords,
            body,
            decorators,
        } = ast.kind(id)
        else {
            return VisitResult::Continue;
        };
        self.current().mark(name, DEF_LOCAL);
        self.walk_all(ast, decorators.iter().copied());
        self.walk_all(ast, bases.iter().copied());
        self.walk_all(ast, keywords.iter().map(|k| k.value));
        self.open(id, Scope::new(ScopeKind::Class));
        self.walk_all(ast, body.iter().copied());
        self.close();
        VisitResult::SkipChildren
    }

    fn visit_lambda(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let NodeKind::Lambda { args, body } = ast.kind(id) else {
            return VisitResult::Continue;
        };
        self.walk_signature(ast, args);
        let mut scope = Scope::new(ScopeKind::Lambda);
        scope.params = Self::params(args);
        self.open(id, scope);
        walk_node(self, ast, *body);
        self.close();
        VisitResult::SkipChildren
    }

    fn visit_name(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::Name { id: name, ctx } = ast.kind(id) {
            let flag = match ctx {
                ExprContext::Load => USE,
                ExprContext::Store | ExprContext::Del => DEF_LOCAL,
            };
            self.current().mark(name, flag);
        }
        VisitResult::Continue
    }

    fn visit_named_expr(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        let NodeKind::NamedExpr { target, value } = ast.kind(id) else {
            return VisitResult::Continue;
        };
        walk_node(self, ast, *value);
        if let NodeKind::Name { id: name, .. } = ast.kind(*target) {
            self.bind_named_target(name, ast.node(id).lineno);
        }
        VisitResult::SkipChildren
    }

    fn visit_global(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::Global { names } = ast.kind(id) {
            for name in names {
                self.current().mark(name, GLOBAL);
            }
        }
        VisitResult::Continue
    }

    fn visit_nonlocal(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::Nonlocal { names } = ast.kind(id) {
            if self.current().kind == ScopeKind::Module {
                self.errors.push(CompileError::new(
                    "nonlocal declaration not allowed at module level",
                    ast.node(id).lineno,
                ));
            }
            for name in names {
                self.current().mark(name, NONLOCAL);
            }
        }
        VisitResult::Continue
    }

    fn visit_import(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::Import { names } = ast.kind(id) {
            for alias in names {
                self.current().mark(alias.bound_name(), DEF_LOCAL);
            }
        }
        VisitResult::Continue
    }

    fn visit_import_from(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::ImportFrom { names, .. } = ast.kind(id) {
            for alias in names.iter().filter(|a| a.name != "*") {
                self.current().mark(alias.bound_name(), DEF_LOCAL);
            }
        }
        VisitResult::Continue
    }

    fn visit_except_handler(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::ExceptHandler { name: Some(name), .. } = ast.kind(id) {
            self.current().mark(name, DEF_LOCAL);
        }
        VisitResult::Continue
    }

    // Captures bind after their subpatterns, so these mark on the way out.
    fn leave_match_as(&mut self, ast: &Ast, id: NodeId) {
        if let NodeKind::MatchAs { name: Some(name), .. } = ast.kind(id) {
            self.current().mark(name, DEF_LOCAL);
        }
    }

    fn leave_match_mapping(&mut self, ast: &Ast, id: NodeId) {
        if let NodeKind::MatchMapping { rest: Some(rest), .. } = ast.kind(id) {
            self.current().mark(rest, DEF_LOCAL);
        }
    }

    fn visit_match_star(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::MatchStar { name: Some(name) } = ast.kind(id) {
            self.current().mark(name, DEF_LOCAL);
        }
        VisitResult::Continue
    }

    fn visit_ann_assign(&mut self, ast: &Ast, id: NodeId) -> VisitResult {
        if let NodeKind::AnnAssign { simple: true, .. } = ast.kind(id) {
            let scope = self.current();
            if matches!(scope.kind, ScopeKind::Module | ScopeKind::Class) {
                scope.has_annotations = true;
            }
        }
        VisitResult::Continue
    }

    fn visit_yield_expr(&mut self, _ast: &Ast, _id: NodeId) -> VisitResult {
        self.current().is_generator = true;
        VisitResult::Continue
    }

    fn visit_yield_from(&mut self, _ast: &Ast, _id: NodeId) -> VisitResult {
        self.current().is_generator = true;
        VisitResult::Continue
    }
}
