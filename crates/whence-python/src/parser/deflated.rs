// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Owned syntax produced by the grammar.
//!
//! The grammar backtracks, so it builds plain owned values rather than
//! arena nodes; [`inflate`](super::inflate) lowers a finished tree into an
//! [`Ast`](crate::nodes::Ast). Names borrow from the source text. Literals
//! stay as tokens until lowering, where decoding errors get positions.

use crate::nodes::{BoolOperator, CmpOperator, ConstantValue, Operator, Span, UnaryOperator};
use crate::tokenizer::Token;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expr<'a> {
    pub kind: ExprKind<'a>,
    pub span: Span,
    /// Written inside its own parentheses; the span excludes them.
    pub parenthesized: bool,
}

impl<'a> Expr<'a> {
    pub fn new(kind: ExprKind<'a>, span: Span) -> Self {
        Expr {
            kind,
            span,
            parenthesized: false,
        }
    }

    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    pub fn in_parens(mut self) -> Self {
        self.parenthesized = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExprKind<'a> {
    Name(&'a str),
    Constant(ConstantValue),
    Number(Token<'a>),
    /// Adjacent string tokens, concatenated when lowered.
    Strings(Vec<Token<'a>>),
    BoolOp {
        op: BoolOperator,
        values: Vec<Expr<'a>>,
    },
    NamedExpr {
        target: Box<Expr<'a>>,
        value: Box<Expr<'a>>,
    },
    BinOp {
        left: Box<Expr<'a>>,
        op: Operator,
        right: Box<Expr<'a>>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr<'a>>,
    },
    Lambda {
        params: Vec<ParamItem<'a>>,
        body: Box<Expr<'a>>,
    },
    IfExp {
        body: Box<Expr<'a>>,
        test: Box<Expr<'a>>,
        orelse: Box<Expr<'a>>,
    },
    Dict(Vec<DictItem<'a>>),
    Set(Vec<Expr<'a>>),
    ListComp {
        elt: Box<Expr<'a>>,
        generators: Vec<CompFor<'a>>,
    },
    SetComp {
        elt: Box<Expr<'a>>,
        generators: Vec<CompFor<'a>>,
    },
    DictComp {
        key: Box<Expr<'a>>,
        value: Box<Expr<'a>>,
        generators: Vec<CompFor<'a>>,
    },
    GeneratorExp {
        elt: Box<Expr<'a>>,
        generators: Vec<CompFor<'a>>,
    },
    Await(Box<Expr<'a>>),
    Yield(Option<Box<Expr<'a>>>),
    YieldFrom(Box<Expr<'a>>),
    Compare {
        left: Box<Expr<'a>>,
        rest: Vec<(CmpOperator, Expr<'a>)>,
    },
    Call {
        func: Box<Expr<'a>>,
        args: CallArgs<'a>,
    },
    Attribute {
        value: Box<Expr<'a>>,
        attr: &'a str,
    },
    Subscript {
        value: Box<Expr<'a>>,
        slice: Box<Expr<'a>>,
    },
    Starred(Box<Expr<'a>>),
    List(Vec<Expr<'a>>),
    Tuple(Vec<Expr<'a>>),
    Slice {
        lower: Option<Box<Expr<'a>>>,
        upper: Option<Box<Expr<'a>>>,
        step: Option<Box<Expr<'a>>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DictItem<'a> {
    Pair(Expr<'a>, Expr<'a>),
    Unpack(Expr<'a>),
}

/// One `for ... in ... if ...` clause.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompFor<'a> {
    pub target: Expr<'a>,
    pub iter: Expr<'a>,
    pub ifs: Vec<Expr<'a>>,
    pub is_async: bool,
}

/// The parenthesized argument list of a call or class definition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallArgs<'a> {
    /// From the opening to the closing parenthesis.
    pub span: Span,
    pub items: Vec<CallArg<'a>>,
    pub trailing_comma: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallArg<'a> {
    Positional(Expr<'a>),
    /// An unparenthesized generator expression.
    Generator(Expr<'a>),
    Star(Expr<'a>, Span),
    Keyword(&'a str, Expr<'a>, Span),
    DoubleStar(Expr<'a>, Span),
}

impl CallArg<'_> {
    pub fn start(&self) -> usize {
        match self {
            CallArg::Positional(expr) | CallArg::Generator(expr) => expr.span.start,
            CallArg::Star(_, span) | CallArg::Keyword(_, _, span) | CallArg::DoubleStar(_, span) => {
                span.start
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Param<'a> {
    pub name: &'a str,
    pub annotation: Option<Expr<'a>>,
    pub span: Span,
}

/// One comma-separated entry of a parameter list, before the list is
/// checked and sorted into positional, keyword-only and star parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParamItem<'a> {
    Plain(Param<'a>, Option<Expr<'a>>),
    /// `/`, at the given offset.
    Slash(usize),
    /// `*` or `*args`, at the given offset.
    Star(usize, Option<Param<'a>>),
    DoubleStar(Param<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stmt<'a> {
    pub kind: StmtKind<'a>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StmtKind<'a> {
    FunctionDef {
        decorators: Vec<Expr<'a>>,
        name: &'a str,
        params: Vec<ParamItem<'a>>,
        returns: Option<Expr<'a>>,
        body: Vec<Stmt<'a>>,
        is_async: bool,
    },
    ClassDef {
        decorators: Vec<Expr<'a>>,
        name: &'a str,
        args: Option<CallArgs<'a>>,
        body: Vec<Stmt<'a>>,
    },
    Return(Option<Expr<'a>>),
    Delete(Vec<Expr<'a>>),
    Assign {
        targets: Vec<Expr<'a>>,
        value: Expr<'a>,
    },
    AugAssign {
        target: Expr<'a>,
        op: Operator,
        value: Expr<'a>,
    },
    AnnAssign {
        target: Expr<'a>,
        annotation: Expr<'a>,
        value: Option<Expr<'a>>,
    },
    For {
        target: Expr<'a>,
        iter: Expr<'a>,
        body: Vec<Stmt<'a>>,
        orelse: Vec<Stmt<'a>>,
        is_async: bool,
    },
    While {
        test: Expr<'a>,
        body: Vec<Stmt<'a>>,
        orelse: Vec<Stmt<'a>>,
    },
    If {
        test: Expr<'a>,
        body: Vec<Stmt<'a>>,
        orelse: Vec<Stmt<'a>>,
    },
    With {
        items: Vec<(Expr<'a>, Option<Expr<'a>>)>,
        body: Vec<Stmt<'a>>,
        is_async: bool,
    },
    Raise {
        exc: Option<Expr<'a>>,
        cause: Option<Expr<'a>>,
    },
    Try {
        body: Vec<Stmt<'a>>,
        handlers: Vec<Handler<'a>>,
        orelse: Vec<Stmt<'a>>,
        finalbody: Vec<Stmt<'a>>,
        star: bool,
    },
    Assert {
        test: Expr<'a>,
        msg: Option<Expr<'a>>,
    },
    Match {
        subject: Expr<'a>,
        cases: Vec<Case<'a>>,
    },
    Import(Vec<ImportAlias<'a>>),
    ImportFrom {
        module: Option<String>,
        names: Vec<ImportAlias<'a>>,
        level: u32,
    },
    Global(Vec<&'a str>),
    Nonlocal(Vec<&'a str>),
    Expr(Expr<'a>),
    Pass,
    Break,
    Continue,
}

impl<'a> Stmt<'a> {
    /// Attach decorators to a function or class definition.
    pub fn decorated(mut self, with: Vec<Expr<'a>>) -> Self {
        if let StmtKind::FunctionDef { decorators, .. } | StmtKind::ClassDef { decorators, .. } =
            &mut self.kind
        {
            *decorators = with;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Handler<'a> {
    pub type_: Option<Expr<'a>>,
    pub name: Option<&'a str>,
    pub body: Vec<Stmt<'a>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImportAlias<'a> {
    pub name: String,
    pub asname: Option<&'a str>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Case<'a> {
    pub pattern: Pattern<'a>,
    pub guard: Option<Expr<'a>>,
    pub body: Vec<Stmt<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pattern<'a> {
    pub kind: PatternKind<'a>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PatternKind<'a> {
    Value(Expr<'a>),
    Singleton(ConstantValue),
    Sequence(Vec<Pattern<'a>>),
    Mapping {
        items: Vec<(Expr<'a>, Pattern<'a>)>,
        rest: Option<&'a str>,
    },
    Class {
        cls: Expr<'a>,
        args: Vec<ClassPatternArg<'a>>,
    },
    Star(Option<&'a str>),
    As {
        pattern: Option<Box<Pattern<'a>>>,
        name: Option<&'a str>,
    },
    Or(Vec<Pattern<'a>>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ClassPatternArg<'a> {
    Positional(Pattern<'a>),
    Keyword(&'a str, Pattern<'a>),
}
