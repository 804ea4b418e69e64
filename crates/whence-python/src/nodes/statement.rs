// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Non-node records owned by statements and definitions.

use serde::Serialize;

use super::{NodeId, Span};

/// A single parameter of a function or lambda.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Arg {
    pub name: String,
    pub annotation: Option<NodeId>,
    pub span: Span,
}

/// The full parameter list of a function or lambda.
///
/// `defaults` align with the tail of `posonlyargs + args`; `kw_defaults` is
/// parallel to `kwonlyargs` with `None` where no default was given.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Arguments {
    pub posonlyargs: Vec<Arg>,
    pub args: Vec<Arg>,
    pub vararg: Option<Arg>,
    pub kwonlyargs: Vec<Arg>,
    pub kw_defaults: Vec<Option<NodeId>>,
    pub kwarg: Option<Arg>,
    pub defaults: Vec<NodeId>,
}

impl Arguments {
    /// Every parameter in declaration order, as the runtime lays out locals:
    /// positional, keyword-only, then `*args` and `**kwargs`.
    pub fn all_args(&self) -> impl Iterator<Item = &Arg> {
        self.posonlyargs
            .iter()
            .chain(self.args.iter())
            .chain(self.kwonlyargs.iter())
            .chain(self.vararg.iter())
            .chain(self.kwarg.iter())
    }

    /// Count of positional parameters (positional-only included).
    pub fn positional_count(&self) -> usize {
        self.posonlyargs.len() + self.args.len()
    }

    /// Annotation expressions in field order.
    pub fn annotations(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.posonlyargs
            .iter()
            .chain(self.args.iter())
            .chain(self.vararg.iter())
            .chain(self.kwonlyargs.iter())
            .chain(self.kwarg.iter())
            .filter_map(|arg| arg.annotation)
    }
}

/// One `expr as target` clause of a `with` statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithItem {
    pub context_expr: NodeId,
    pub optional_vars: Option<NodeId>,
}

/// One `name as asname` entry of an import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alias {
    /// Dotted module path, or `*` for star imports.
    pub name: String,
    pub asname: Option<String>,
    pub span: Span,
}

impl Alias {
    /// Name bound in the importing scope.
    ///
    /// `import a.b.c` binds `a`; `import a.b as c` binds `c`.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

/// One `case pattern if guard: body` arm of a `match` statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCase {
    pub pattern: NodeId,
    pub guard: Option<NodeId>,
    pub body: Vec<NodeId>,
}
