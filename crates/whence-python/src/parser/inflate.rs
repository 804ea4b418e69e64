// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Lowering grammar output into the arena.
//!
//! Nodes are pushed children first, in source order, so a parent's id is
//! always larger than its children's. Checks the grammar cannot express
//! locally happen here: assignment target contexts, call argument order,
//! parameter list shape, literal decoding and class pattern arguments.

use std::collections::HashSet;
use std::ops::Range;

use whence_core::LineIndex;

use super::deflated::{
    CallArg, CallArgs, ClassPatternArg, CompFor, DictItem, Expr, ExprKind, Handler, ImportAlias,
    Param, ParamItem, Pattern, PatternKind, Stmt, StmtKind,
};
use super::errors::{ParserError, Result};
use super::strings::{decode_bytes, decode_str, split_fstring, FStringPart, StringLiteral};
use super::{parse_expression_tokens, tokenize_range};
use crate::nodes::{
    Alias, Arg, Arguments, Ast, Comprehension, ConstantValue, ExprContext, Keyword, MatchCase,
    Node, NodeId, NodeKind, Span, WithItem,
};
use crate::tokenizer::{TokConfig, Token};

pub(crate) struct Inflater<'t> {
    text: &'t str,
    index: &'t LineIndex,
    ast: Ast,
}

impl<'t> Inflater<'t> {
    pub fn new(text: &'t str, index: &'t LineIndex) -> Self {
        Inflater {
            text,
            index,
            ast: Ast::new(),
        }
    }

    pub fn finish(mut self, root: NodeId) -> Ast {
        self.ast.set_root(root);
        self.ast
    }

    pub fn module(&mut self, body: &[Stmt<'_>]) -> Result<NodeId> {
        let body = self.stmts(body)?;
        Ok(self.make(NodeKind::Module { body }, Span::new(0, self.text.len())))
    }

    fn make(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let (lineno, col_offset) = self.index.position(span.start);
        let (end_lineno, end_col_offset) = self.index.position(span.end);
        self.ast.push(Node {
            kind,
            span,
            lineno,
            col_offset,
            end_lineno,
            end_col_offset,
        })
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> ParserError {
        let (line, column) = self.index.position(offset);
        ParserError::SyntaxError {
            message: message.into(),
            offset,
            line,
            column,
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn stmts(&mut self, body: &[Stmt<'_>]) -> Result<Vec<NodeId>> {
        body.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn stmt(&mut self, stmt: &Stmt<'_>) -> Result<NodeId> {
        let kind = match &stmt.kind {
            StmtKind::FunctionDef {
                decorators,
                name,
                params,
                returns,
                body,
                is_async,
            } => {
                let decorators = self.exprs(decorators)?;
                let args = Box::new(self.arguments(params)?);
                let returns = self.opt_expr(returns.as_ref())?;
                let body = self.stmts(body)?;
                NodeKind::FunctionDef {
                    name: name.to_string(),
                    args,
                    body,
                    decorators,
                    returns,
                    is_async: *is_async,
                }
            }
            StmtKind::ClassDef {
                decorators,
                name,
                args,
                body,
            } => {
                let decorators = self.exprs(decorators)?;
                let (bases, keywords) = match args {
                    Some(args) => self.call_args(args)?,
                    None => (Vec::new(), Vec::new()),
                };
                let body = self.stmts(body)?;
                NodeKind::ClassDef {
                    name: name.to_string(),
                    bases,
                    keywords,
                    body,
                    decorators,
                }
            }
            StmtKind::Return(value) => NodeKind::Return {
                value: self.opt_expr(value.as_ref())?,
            },
            StmtKind::Delete(targets) => NodeKind::Delete {
                targets: self.targets(targets, ExprContext::Del)?,
            },
            StmtKind::Assign { targets, value } => {
                let targets = self.targets(targets, ExprContext::Store)?;
                let value = self.expr(value)?;
                NodeKind::Assign { targets, value }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.single_target(target, "augmented")?;
                let target = self.target(target, ExprContext::Store)?;
                let value = self.expr(value)?;
                NodeKind::AugAssign {
                    target,
                    op: *op,
                    value,
                }
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.single_target(target, "annotated")?;
                let simple = !target.parenthesized && matches!(target.kind, ExprKind::Name(_));
                let target = self.target(target, ExprContext::Store)?;
                let annotation = self.expr(annotation)?;
                let value = self.opt_expr(value.as_ref())?;
                NodeKind::AnnAssign {
                    target,
                    annotation,
                    value,
                    simple,
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                let target = self.target(target, ExprContext::Store)?;
                let iter = self.expr(iter)?;
                let body = self.stmts(body)?;
                let orelse = self.stmts(orelse)?;
                NodeKind::For {
                    target,
                    iter,
                    body,
                    orelse,
                    is_async: *is_async,
                }
            }
            StmtKind::While { test, body, orelse } => {
                let test = self.expr(test)?;
                let body = self.stmts(body)?;
                let orelse = self.stmts(orelse)?;
                NodeKind::While { test, body, orelse }
            }
            StmtKind::If { test, body, orelse } => {
                let test = self.expr(test)?;
                let body = self.stmts(body)?;
                let orelse = self.stmts(orelse)?;
                NodeKind::If { test, body, orelse }
            }
            StmtKind::With {
                items,
                body,
                is_async,
            } => {
                let mut lowered = Vec::with_capacity(items.len());
                for (context, vars) in items {
                    let context_expr = self.expr(context)?;
                    let optional_vars = match vars {
                        Some(vars) => Some(self.target(vars, ExprContext::Store)?),
                        None => None,
                    };
                    lowered.push(WithItem {
                        context_expr,
                        optional_vars,
                    });
                }
                let body = self.stmts(body)?;
                NodeKind::With {
                    items: lowered,
                    body,
                    is_async: *is_async,
                }
            }
            StmtKind::Raise { exc, cause } => {
                let exc = self.opt_expr(exc.as_ref())?;
                let cause = self.opt_expr(cause.as_ref())?;
                NodeKind::Raise { exc, cause }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
                star,
            } => {
                let body = self.stmts(body)?;
                let handlers = handlers
                    .iter()
                    .map(|handler| self.handler(handler))
                    .collect::<Result<Vec<_>>>()?;
                let orelse = self.stmts(orelse)?;
                let finalbody = self.stmts(finalbody)?;
                if *star {
                    NodeKind::TryStar {
                        body,
                        handlers,
                        orelse,
                        finalbody,
                    }
                } else {
                    NodeKind::Try {
                        body,
                        handlers,
                        orelse,
                        finalbody,
                    }
                }
            }
            StmtKind::Assert { test, msg } => {
                let test = self.expr(test)?;
                let msg = self.opt_expr(msg.as_ref())?;
                NodeKind::Assert { test, msg }
            }
            StmtKind::Match { subject, cases } => {
                let subject = self.expr(subject)?;
                let mut lowered = Vec::with_capacity(cases.len());
                for case in cases {
                    let pattern = self.pattern(&case.pattern)?;
                    let guard = self.opt_expr(case.guard.as_ref())?;
                    let body = self.stmts(&case.body)?;
                    lowered.push(MatchCase {
                        pattern,
                        guard,
                        body,
                    });
                }
                NodeKind::Match {
                    subject,
                    cases: lowered,
                }
            }
            StmtKind::Import(names) => NodeKind::Import {
                names: names.iter().map(alias).collect(),
            },
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => NodeKind::ImportFrom {
                module: module.clone(),
                names: names.iter().map(alias).collect(),
                level: *level,
            },
            StmtKind::Global(names) => NodeKind::Global {
                names: names.iter().map(|name| name.to_string()).collect(),
            },
            StmtKind::Nonlocal(names) => NodeKind::Nonlocal {
                names: names.iter().map(|name| name.to_string()).collect(),
            },
            StmtKind::Expr(value) => NodeKind::Expr {
                value: self.expr(value)?,
            },
            StmtKind::Pass => NodeKind::Pass,
            StmtKind::Break => NodeKind::Break,
            StmtKind::Continue => NodeKind::Continue,
        };
        Ok(self.make(kind, stmt.span))
    }

    fn handler(&mut self, handler: &Handler<'_>) -> Result<NodeId> {
        let type_ = self.opt_expr(handler.type_.as_ref())?;
        let body = self.stmts(&handler.body)?;
        let kind = NodeKind::ExceptHandler {
            type_,
            name: handler.name.map(str::to_string),
            body,
        };
        Ok(self.make(kind, handler.span))
    }

    /// Augmented and annotated assignments take exactly one simple target.
    fn single_target(&self, target: &Expr<'_>, form: &str) -> Result<()> {
        match target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            _ => Err(self.error(
                format!("illegal target for {} assignment", form),
                target.span.start,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Parameters and arguments
    // ------------------------------------------------------------------

    fn arguments(&mut self, items: &[ParamItem<'_>]) -> Result<Arguments> {
        let mut args = Arguments::default();
        let mut seen = HashSet::new();
        let mut keyword_only = false;
        // A bare `*` waiting for its first keyword-only parameter.
        let mut bare_star = None;

        for (i, item) in items.iter().enumerate() {
            match item {
                ParamItem::Slash(offset) => {
                    if keyword_only || !args.posonlyargs.is_empty() || args.args.is_empty() {
                        return Err(self.error("invalid '/' in parameter list", *offset));
                    }
                    args.posonlyargs.append(&mut args.args);
                }
                ParamItem::Star(offset, param) => {
                    if keyword_only {
                        return Err(self.error("'*' argument may appear only once", *offset));
                    }
                    keyword_only = true;
                    match param {
                        Some(param) => args.vararg = Some(self.param(param, &mut seen)?),
                        None => bare_star = Some(*offset),
                    }
                }
                ParamItem::DoubleStar(param) => {
                    if i + 1 != items.len() {
                        return Err(self.error(
                            "arguments cannot follow var-keyword argument",
                            param.span.end,
                        ));
                    }
                    args.kwarg = Some(self.param(param, &mut seen)?);
                }
                ParamItem::Plain(param, default) => {
                    let arg = self.param(param, &mut seen)?;
                    let default = self.opt_expr(default.as_ref())?;
                    if keyword_only {
                        bare_star = None;
                        args.kwonlyargs.push(arg);
                        args.kw_defaults.push(default);
                        continue;
                    }
                    match default {
                        Some(default) => args.defaults.push(default),
                        None if !args.defaults.is_empty() => {
                            return Err(self.error(
                                "non-default argument follows default argument",
                                param.span.start,
                            ));
                        }
                        None => {}
                    }
                    args.args.push(arg);
                }
            }
        }
        if let Some(offset) = bare_star {
            return Err(self.error("named arguments must follow bare *", offset));
        }
        Ok(args)
    }

    fn param<'a>(&mut self, param: &Param<'a>, seen: &mut HashSet<&'a str>) -> Result<Arg> {
        if !seen.insert(param.name) {
            return Err(self.error(
                format!(
                    "duplicate argument '{}' in function definition",
                    param.name
                ),
                param.span.start,
            ));
        }
        let annotation = self.opt_expr(param.annotation.as_ref())?;
        Ok(Arg {
            name: param.name.to_string(),
            annotation,
            span: param.span,
        })
    }

    /// Lower call or class arguments, enforcing the order the runtime
    /// requires: positional and `*` arguments before `**`, positional
    /// arguments before keywords.
    fn call_args(&mut self, call: &CallArgs<'_>) -> Result<(Vec<NodeId>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        let mut names = HashSet::new();
        let mut after_keyword = false;
        let mut after_unpacking = false;
        let sole = call.items.len() == 1 && !call.trailing_comma;

        for item in &call.items {
            match item {
                CallArg::Positional(_) | CallArg::Generator(_) if after_unpacking => {
                    return Err(self.error(
                        "positional argument follows keyword argument unpacking",
                        item.start(),
                    ));
                }
                CallArg::Positional(_) | CallArg::Generator(_) if after_keyword => {
                    return Err(self.error(
                        "positional argument follows keyword argument",
                        item.start(),
                    ));
                }
                CallArg::Positional(expr) => args.push(self.expr(expr)?),
                CallArg::Generator(expr) => {
                    if !sole {
                        return Err(self.error(
                            "generator expression must be parenthesized",
                            item.start(),
                        ));
                    }
                    args.push(self.expr_at(&expr.kind, call.span)?);
                }
                CallArg::Star(expr, span) => {
                    if after_unpacking {
                        return Err(self.error(
                            "iterable argument unpacking follows keyword argument unpacking",
                            span.start,
                        ));
                    }
                    let value = self.expr(expr)?;
                    let ctx = ExprContext::Load;
                    args.push(self.make(NodeKind::Starred { value, ctx }, *span));
                }
                CallArg::Keyword(name, expr, span) => {
                    if !names.insert(*name) {
                        return Err(self.error(
                            format!("keyword argument repeated: {}", name),
                            span.start,
                        ));
                    }
                    after_keyword = true;
                    keywords.push(Keyword {
                        arg: Some(name.to_string()),
                        value: self.expr(expr)?,
                        span: *span,
                    });
                }
                CallArg::DoubleStar(expr, span) => {
                    after_unpacking = true;
                    keywords.push(Keyword {
                        arg: None,
                        value: self.expr(expr)?,
                        span: *span,
                    });
                }
            }
        }
        Ok((args, keywords))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn expr(&mut self, expr: &Expr<'_>) -> Result<NodeId> {
        self.expr_at(&expr.kind, expr.span)
    }

    fn exprs(&mut self, exprs: &[Expr<'_>]) -> Result<Vec<NodeId>> {
        exprs.iter().map(|expr| self.expr(expr)).collect()
    }

    fn opt_expr(&mut self, expr: Option<&Expr<'_>>) -> Result<Option<NodeId>> {
        expr.map(|expr| self.expr(expr)).transpose()
    }

    fn opt_boxed(&mut self, expr: &Option<Box<Expr<'_>>>) -> Result<Option<NodeId>> {
        self.opt_expr(expr.as_deref())
    }

    fn expr_at(&mut self, kind: &ExprKind<'_>, span: Span) -> Result<NodeId> {
        let load = ExprContext::Load;
        let kind = match kind {
            ExprKind::Name(id) => NodeKind::Name {
                id: id.to_string(),
                ctx: load,
            },
            ExprKind::Constant(value) => NodeKind::Constant {
                value: value.clone(),
            },
            ExprKind::Number(tok) => NodeKind::Constant {
                value: number_value(tok.text).map_err(|message| self.error(message, tok.start))?,
            },
            ExprKind::Strings(tokens) => return self.strings(tokens, span),
            ExprKind::BoolOp { op, values } => NodeKind::BoolOp {
                op: *op,
                values: self.exprs(values)?,
            },
            ExprKind::NamedExpr { target, value } => {
                let target = self.target(target, ExprContext::Store)?;
                let value = self.expr(value)?;
                NodeKind::NamedExpr { target, value }
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                NodeKind::BinOp {
                    left,
                    op: *op,
                    right,
                }
            }
            ExprKind::UnaryOp { op, operand } => NodeKind::UnaryOp {
                op: *op,
                operand: self.expr(operand)?,
            },
            ExprKind::Lambda { params, body } => {
                let args = Box::new(self.arguments(params)?);
                let body = self.expr(body)?;
                NodeKind::Lambda { args, body }
            }
            ExprKind::IfExp { body, test, orelse } => {
                let body = self.expr(body)?;
                let test = self.expr(test)?;
                let orelse = self.expr(orelse)?;
                NodeKind::IfExp { test, body, orelse }
            }
            ExprKind::Dict(items) => {
                let mut keys = Vec::with_capacity(items.len());
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            keys.push(Some(self.expr(key)?));
                            values.push(self.expr(value)?);
                        }
                        DictItem::Unpack(value) => {
                            keys.push(None);
                            values.push(self.expr(value)?);
                        }
                    }
                }
                NodeKind::Dict { keys, values }
            }
            ExprKind::Set(elts) => NodeKind::Set {
                elts: self.exprs(elts)?,
            },
            ExprKind::ListComp { elt, generators } => {
                let elt = self.expr(elt)?;
                let generators = self.comprehension(generators)?;
                NodeKind::ListComp { elt, generators }
            }
            ExprKind::SetComp { elt, generators } => {
                let elt = self.expr(elt)?;
                let generators = self.comprehension(generators)?;
                NodeKind::SetComp { elt, generators }
            }
            ExprKind::GeneratorExp { elt, generators } => {
                let elt = self.expr(elt)?;
                let generators = self.comprehension(generators)?;
                NodeKind::GeneratorExp { elt, generators }
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let key = self.expr(key)?;
                let value = self.expr(value)?;
                let generators = self.comprehension(generators)?;
                NodeKind::DictComp {
                    key,
                    value,
                    generators,
                }
            }
            ExprKind::Await(value) => NodeKind::Await {
                value: self.expr(value)?,
            },
            ExprKind::Yield(value) => NodeKind::Yield {
                value: self.opt_boxed(value)?,
            },
            ExprKind::YieldFrom(value) => NodeKind::YieldFrom {
                value: self.expr(value)?,
            },
            ExprKind::Compare { left, rest } => {
                let left = self.expr(left)?;
                let ops = rest.iter().map(|(op, _)| *op).collect();
                let comparators = rest
                    .iter()
                    .map(|(_, comparator)| self.expr(comparator))
                    .collect::<Result<Vec<_>>>()?;
                NodeKind::Compare {
                    left,
                    ops,
                    comparators,
                }
            }
            ExprKind::Call { func, args } => {
                let func = self.expr(func)?;
                let (args, keywords) = self.call_args(args)?;
                NodeKind::Call {
                    func,
                    args,
                    keywords,
                }
            }
            ExprKind::Attribute { value, attr } => NodeKind::Attribute {
                value: self.expr(value)?,
                attr: attr.to_string(),
                ctx: load,
            },
            ExprKind::Subscript { value, slice } => {
                let value = self.expr(value)?;
                let slice = self.expr(slice)?;
                NodeKind::Subscript {
                    value,
                    slice,
                    ctx: load,
                }
            }
            ExprKind::Starred(value) => NodeKind::Starred {
                value: self.expr(value)?,
                ctx: load,
            },
            ExprKind::List(elts) => NodeKind::List {
                elts: self.exprs(elts)?,
                ctx: load,
            },
            ExprKind::Tuple(elts) => NodeKind::Tuple {
                elts: self.exprs(elts)?,
                ctx: load,
            },
            ExprKind::Slice { lower, upper, step } => {
                let lower = self.opt_boxed(lower)?;
                let upper = self.opt_boxed(upper)?;
                let step = self.opt_boxed(step)?;
                NodeKind::Slice { lower, upper, step }
            }
        };
        Ok(self.make(kind, span))
    }

    fn comprehension(&mut self, generators: &[CompFor<'_>]) -> Result<Vec<Comprehension>> {
        generators
            .iter()
            .map(|clause| {
                let target = self.target(&clause.target, ExprContext::Store)?;
                let iter = self.expr(&clause.iter)?;
                let ifs = self.exprs(&clause.ifs)?;
                Ok(Comprehension {
                    target,
                    iter,
                    ifs,
                    is_async: clause.is_async,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    fn targets(&mut self, exprs: &[Expr<'_>], ctx: ExprContext) -> Result<Vec<NodeId>> {
        exprs.iter().map(|expr| self.target(expr, ctx)).collect()
    }

    /// Lower an assignment or deletion target in `ctx`, recursing into
    /// starred, tuple and list targets.
    fn target(&mut self, expr: &Expr<'_>, ctx: ExprContext) -> Result<NodeId> {
        let kind = match &expr.kind {
            ExprKind::Name(id) => NodeKind::Name {
                id: id.to_string(),
                ctx,
            },
            ExprKind::Attribute { value, attr } => NodeKind::Attribute {
                value: self.expr(value)?,
                attr: attr.to_string(),
                ctx,
            },
            ExprKind::Subscript { value, slice } => {
                let value = self.expr(value)?;
                let slice = self.expr(slice)?;
                NodeKind::Subscript { value, slice, ctx }
            }
            ExprKind::Starred(value) => NodeKind::Starred {
                value: self.target(value, ctx)?,
                ctx,
            },
            ExprKind::List(elts) => NodeKind::List {
                elts: self.targets(elts, ctx)?,
                ctx,
            },
            ExprKind::Tuple(elts) => NodeKind::Tuple {
                elts: self.targets(elts, ctx)?,
                ctx,
            },
            other => {
                let verb = match ctx {
                    ExprContext::Del => "delete",
                    _ => "assign to",
                };
                return Err(self.error(
                    format!("cannot {} {}", verb, describe_target(other)),
                    expr.span.start,
                ));
            }
        };
        Ok(self.make(kind, expr.span))
    }

    // ------------------------------------------------------------------
    // String literals
    // ------------------------------------------------------------------

    /// One or more adjacent string tokens, concatenated.
    fn strings(&mut self, tokens: &[Token<'_>], span: Span) -> Result<NodeId> {
        let pieces = tokens
            .iter()
            .map(|tok| StringLiteral::split(tok.text, tok.start))
            .collect::<Vec<_>>();

        let bytes_count = pieces.iter().filter(|piece| piece.bytes).count();
        if bytes_count != 0 && bytes_count != pieces.len() {
            return Err(self.error("cannot mix bytes and nonbytes literals", span.start));
        }
        if bytes_count > 0 {
            let mut value = Vec::new();
            for piece in &pieces {
                let body = &self.text[piece.body.clone()];
                value.extend(
                    decode_bytes(body, piece.raw)
                        .map_err(|message| self.error(message, piece.body.start))?,
                );
            }
            let value = ConstantValue::Bytes(value);
            return Ok(self.make(NodeKind::Constant { value }, span));
        }

        if !pieces.iter().any(|piece| piece.fstring) {
            let mut value = String::new();
            for piece in &pieces {
                value.push_str(&self.decode(piece)?);
            }
            let value = ConstantValue::Str(value);
            return Ok(self.make(NodeKind::Constant { value }, span));
        }

        let mut values = Vec::new();
        let mut literal = String::new();
        for piece in &pieces {
            if piece.fstring {
                self.fstring_values(piece.body.clone(), piece.raw, span, &mut literal, &mut values)?;
            } else {
                literal.push_str(&self.decode(piece)?);
            }
        }
        self.flush_literal(&mut literal, &mut values, span);
        Ok(self.make(NodeKind::JoinedStr { values }, span))
    }

    fn decode(&self, piece: &StringLiteral) -> Result<String> {
        let body = &self.text[piece.body.clone()];
        decode_str(body, piece.raw).map_err(|message| self.error(message, piece.body.start))
    }

    /// Append the parts of one f-string body to `values`. Literal text is
    /// accumulated in `literal` so adjacent pieces merge into one constant.
    fn fstring_values(
        &mut self,
        body: Range<usize>,
        raw: bool,
        span: Span,
        literal: &mut String,
        values: &mut Vec<NodeId>,
    ) -> Result<()> {
        let parts = split_fstring(self.text, body, raw)
            .map_err(|(message, offset)| self.error(message, offset))?;
        for part in parts {
            match part {
                FStringPart::Literal(text) => literal.push_str(&text),
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    self.flush_literal(literal, values, span);
                    let value = self.sub_expression(expr)?;
                    let format_spec = match spec {
                        Some(spec) => {
                            let mut spec_literal = String::new();
                            let mut spec_values = Vec::new();
                            self.fstring_values(
                                spec,
                                raw,
                                span,
                                &mut spec_literal,
                                &mut spec_values,
                            )?;
                            self.flush_literal(&mut spec_literal, &mut spec_values, span);
                            let kind = NodeKind::JoinedStr {
                                values: spec_values,
                            };
                            Some(self.make(kind, span))
                        }
                        None => None,
                    };
                    let kind = NodeKind::FormattedValue {
                        value,
                        conversion,
                        format_spec,
                    };
                    values.push(self.make(kind, span));
                }
            }
        }
        Ok(())
    }

    fn flush_literal(&mut self, literal: &mut String, values: &mut Vec<NodeId>, span: Span) {
        if literal.is_empty() {
            return;
        }
        let value = ConstantValue::Str(std::mem::take(literal));
        values.push(self.make(NodeKind::Constant { value }, span));
    }

    /// Parse a replacement-field expression in place, into this tree, so
    /// node ids and positions stay absolute.
    fn sub_expression(&mut self, range: Range<usize>) -> Result<NodeId> {
        let tokens = tokenize_range(self.text, self.index, range, &TokConfig { nested: true })?;
        let expr = parse_expression_tokens(self.index, tokens)?;
        self.expr(&expr)
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    fn patterns(&mut self, patterns: &[Pattern<'_>]) -> Result<Vec<NodeId>> {
        patterns.iter().map(|pattern| self.pattern(pattern)).collect()
    }

    fn pattern(&mut self, pattern: &Pattern<'_>) -> Result<NodeId> {
        let kind = match &pattern.kind {
            PatternKind::Value(value) => NodeKind::MatchValue {
                value: self.expr(value)?,
            },
            PatternKind::Singleton(value) => NodeKind::MatchSingleton {
                value: value.clone(),
            },
            PatternKind::Sequence(items) => {
                let stars = items
                    .iter()
                    .filter(|item| matches!(item.kind, PatternKind::Star(_)))
                    .count();
                if stars > 1 {
                    return Err(self.error(
                        "multiple starred names in sequence pattern",
                        pattern.span.start,
                    ));
                }
                NodeKind::MatchSequence {
                    patterns: self.patterns(items)?,
                }
            }
            PatternKind::Mapping { items, rest } => {
                let mut keys = Vec::with_capacity(items.len());
                let mut patterns = Vec::with_capacity(items.len());
                for (key, value) in items {
                    keys.push(self.expr(key)?);
                    patterns.push(self.pattern(value)?);
                }
                NodeKind::MatchMapping {
                    keys,
                    patterns,
                    rest: rest.map(str::to_string),
                }
            }
            PatternKind::Class { cls, args } => {
                let cls = self.expr(cls)?;
                let mut patterns = Vec::new();
                let mut kwd_attrs: Vec<String> = Vec::new();
                let mut kwd_patterns = Vec::new();
                for arg in args {
                    match arg {
                        ClassPatternArg::Positional(value) => {
                            if !kwd_attrs.is_empty() {
                                return Err(self.error(
                                    "positional patterns follow keyword patterns",
                                    value.span.start,
                                ));
                            }
                            patterns.push(self.pattern(value)?);
                        }
                        ClassPatternArg::Keyword(name, value) => {
                            if kwd_attrs.iter().any(|attr| attr == name) {
                                return Err(self.error(
                                    format!("attribute name repeated in class pattern: {}", name),
                                    value.span.start,
                                ));
                            }
                            kwd_attrs.push(name.to_string());
                            kwd_patterns.push(self.pattern(value)?);
                        }
                    }
                }
                NodeKind::MatchClass {
                    cls,
                    patterns,
                    kwd_attrs,
                    kwd_patterns,
                }
            }
            PatternKind::Star(name) => NodeKind::MatchStar {
                name: name.map(str::to_string),
            },
            PatternKind::As { pattern: inner, name } => NodeKind::MatchAs {
                pattern: match inner {
                    Some(inner) => Some(self.pattern(inner)?),
                    None => None,
                },
                name: name.map(str::to_string),
            },
            PatternKind::Or(items) => NodeKind::MatchOr {
                patterns: self.patterns(items)?,
            },
        };
        Ok(self.make(kind, pattern.span))
    }
}

fn alias(import: &ImportAlias<'_>) -> Alias {
    Alias {
        name: import.name.clone(),
        asname: import.asname.map(str::to_string),
        span: import.span,
    }
}

fn describe_target(kind: &ExprKind<'_>) -> &'static str {
    match kind {
        ExprKind::Call { .. } => "function call",
        ExprKind::Constant(_) | ExprKind::Number(_) | ExprKind::Strings(_) => "literal",
        ExprKind::Lambda { .. } => "lambda",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::Await(_) => "await expression",
        ExprKind::Yield(_) | ExprKind::YieldFrom(_) => "yield expression",
        ExprKind::ListComp { .. } => "list comprehension",
        ExprKind::SetComp { .. } => "set comprehension",
        ExprKind::DictComp { .. } => "dict comprehension",
        ExprKind::GeneratorExp { .. } => "generator expression",
        ExprKind::Dict(_) => "dict display",
        ExprKind::Set(_) => "set display",
        ExprKind::IfExp { .. } => "conditional expression",
        ExprKind::NamedExpr { .. } => "named expression",
        _ => "expression",
    }
}

/// Value of a numeric literal.
fn number_value(text: &str) -> std::result::Result<ConstantValue, String> {
    let clean: String = text.chars().filter(|c| *c != '_').collect();
    let lower = clean.to_ascii_lowercase();
    let invalid = || format!("invalid numeric literal '{}'", text);

    if let Some(imag) = lower.strip_suffix('j') {
        return imag
            .parse::<f64>()
            .map(ConstantValue::Complex)
            .map_err(|_| invalid());
    }
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(digits) = lower.strip_prefix(prefix) {
            return i128::from_str_radix(digits, radix)
                .map(ConstantValue::Int)
                .map_err(|_| invalid());
        }
    }
    if lower.contains(['.', 'e']) {
        return lower
            .parse::<f64>()
            .map(ConstantValue::Float)
            .map_err(|_| invalid());
    }
    if lower.len() > 1 && lower.starts_with('0') && lower.bytes().any(|b| b != b'0') {
        return Err("leading zeros in decimal integer literals are not permitted".to_string());
    }
    match lower.parse::<i128>() {
        Ok(value) => Ok(ConstantValue::Int(value)),
        Err(_) => lower
            .parse::<f64>()
            .map(ConstantValue::Float)
            .map_err(|_| invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::number_value;
    use crate::nodes::ConstantValue;

    #[test]
    fn numbers() {
        assert_eq!(number_value("1_000"), Ok(ConstantValue::Int(1000)));
        assert_eq!(number_value("0xff"), Ok(ConstantValue::Int(255)));
        assert_eq!(number_value("0o17"), Ok(ConstantValue::Int(15)));
        assert_eq!(number_value("1.5e3"), Ok(ConstantValue::Float(1500.0)));
        assert_eq!(number_value("2j"), Ok(ConstantValue::Complex(2.0)));
        assert!(number_value("012").is_err());
        assert_eq!(number_value("00"), Ok(ConstantValue::Int(0)));
    }

    #[test]
    fn oversized_integers_become_floats() {
        let huge = "1".repeat(45);
        assert!(matches!(number_value(&huge), Ok(ConstantValue::Float(_))));
    }
}
