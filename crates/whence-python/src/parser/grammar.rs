// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! PEG grammar over the token stream.
//!
//! Rules mirror the runtime's own grammar (3.8 through 3.11, `match` and
//! `except*` included) and build [`deflated`](super::deflated) values.
//! Checks that need more than one token of context (target contexts, call
//! argument order, parameter lists) run afterwards, when the tree is
//! lowered.

use std::fmt;

use peg::{Parse, ParseElem, ParseLiteral, ParseSlice, RuleResult};

use super::deflated::{
    CallArg, CallArgs, Case, ClassPatternArg, CompFor, DictItem, Expr, ExprKind, Handler,
    ImportAlias, Param, ParamItem, Pattern, PatternKind, Stmt, StmtKind,
};
use super::is_keyword;
use crate::nodes::{BoolOperator, CmpOperator, ConstantValue, Operator, Span, UnaryOperator};
use crate::tokenizer::{TokType, Token};

/// Token stream input for the grammar. Always ends with an end marker.
pub struct TokVec<'a> {
    tokens: Vec<Token<'a>>,
}

impl<'a> TokVec<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokType::EndMarker) {
            let end = tokens.last().map_or(0, |t| t.end);
            tokens.push(Token {
                kind: TokType::EndMarker,
                text: "",
                start: end,
                end,
            });
        }
        TokVec { tokens }
    }

    pub fn offsets(&self) -> Offsets {
        let starts = self.tokens.iter().map(|t| t.start).collect::<Vec<_>>();
        let mut ends = Vec::with_capacity(self.tokens.len() + 1);
        ends.push(starts.first().copied().unwrap_or(0));
        for tok in &self.tokens {
            let last = ends.last().copied().unwrap_or(0);
            ends.push(if is_layout(tok.kind) { last } else { tok.end });
        }
        Offsets { starts, ends }
    }
}

fn is_layout(kind: TokType) -> bool {
    matches!(
        kind,
        TokType::Newline | TokType::Indent | TokType::Dedent | TokType::EndMarker
    )
}

/// Byte offsets of token boundaries, indexed by grammar position.
pub struct Offsets {
    starts: Vec<usize>,
    /// `ends[i]` is where the last token before position `i` ends, not
    /// counting NEWLINE, INDENT and DEDENT.
    ends: Vec<usize>,
}

impl Offsets {
    fn start(&self, pos: usize) -> usize {
        match self.starts.get(pos) {
            Some(start) => *start,
            None => self.starts.last().copied().unwrap_or(0),
        }
    }

    /// Span from the token at `start` to the end of the last significant
    /// token before `end`.
    fn span(&self, start: usize, end: usize) -> Span {
        let from = self.start(start);
        let to = self.ends.get(end).copied().unwrap_or(from);
        Span::new(from, to.max(from))
    }
}

/// Where the grammar gave up: the furthest token it reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokPosition {
    pub offset: usize,
    pub kind: TokType,
    pub found: String,
}

impl fmt::Display for TokPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.found, self.offset)
    }
}

fn describe(tok: &Token<'_>) -> String {
    match tok.kind {
        TokType::Newline => "newline".to_string(),
        TokType::Indent => "indent".to_string(),
        TokType::Dedent => "dedent".to_string(),
        TokType::EndMarker => "end of input".to_string(),
        _ => format!("'{}'", tok.text),
    }
}

impl Parse for TokVec<'_> {
    type PositionRepr = TokPosition;

    fn start(&self) -> usize {
        0
    }

    fn is_eof(&self, pos: usize) -> bool {
        pos >= self.tokens.len()
    }

    fn position_repr(&self, pos: usize) -> TokPosition {
        match self.tokens.get(pos).or_else(|| self.tokens.last()) {
            Some(tok) => TokPosition {
                offset: tok.start,
                kind: tok.kind,
                found: describe(tok),
            },
            None => TokPosition {
                offset: 0,
                kind: TokType::EndMarker,
                found: "end of input".to_string(),
            },
        }
    }
}

impl<'input, 'a> ParseElem<'input> for TokVec<'a> {
    type Element = Token<'a>;

    fn parse_elem(&'input self, pos: usize) -> RuleResult<Token<'a>> {
        match self.tokens.get(pos) {
            Some(tok) => RuleResult::Matched(pos + 1, *tok),
            None => RuleResult::Failed,
        }
    }
}

impl ParseLiteral for TokVec<'_> {
    /// Literals in the grammar match operators and words by their text;
    /// string tokens never match.
    fn parse_string_literal(&self, pos: usize, literal: &str) -> RuleResult<()> {
        match self.tokens.get(pos) {
            Some(tok) if tok.is_op(literal) || tok.is_word(literal) => {
                RuleResult::Matched(pos + 1, ())
            }
            _ => RuleResult::Failed,
        }
    }
}

impl<'input, 'a: 'input> ParseSlice<'input> for TokVec<'a> {
    type Slice = &'input [Token<'a>];

    fn parse_slice(&'input self, p1: usize, p2: usize) -> Self::Slice {
        &self.tokens[p1..p2]
    }
}

// ----------------------------------------------------------------------
// Builders used by rule actions
// ----------------------------------------------------------------------

fn tok_span(tok: Token<'_>) -> Span {
    Span::new(tok.start, tok.end)
}

fn name_expr(tok: Token<'_>) -> Expr<'_> {
    Expr::new(ExprKind::Name(tok.text), tok_span(tok))
}

fn number_expr(tok: Token<'_>) -> Expr<'_> {
    Expr::new(ExprKind::Number(tok), tok_span(tok))
}

fn constant<'a>(value: ConstantValue, span: Span) -> Expr<'a> {
    Expr::new(ExprKind::Constant(value), span)
}

fn stmt(kind: StmtKind<'_>, span: Span) -> Stmt<'_> {
    Stmt { kind, span }
}

fn pattern(kind: PatternKind<'_>, span: Span) -> Pattern<'_> {
    Pattern { kind, span }
}

/// `first, rest...` as a tuple, or `first` alone when there was no comma.
fn sequence<'a>(first: Expr<'a>, rest: Vec<Expr<'a>>, comma: bool, span: Span) -> Expr<'a> {
    if rest.is_empty() && !comma {
        return first;
    }
    let mut elts = vec![first];
    elts.extend(rest);
    Expr::new(ExprKind::Tuple(elts), span)
}

/// Fold a left-associative chain; each step ends at its recorded position.
fn binary<'a>(
    at: &Offsets,
    start: usize,
    first: Expr<'a>,
    rest: Vec<(Operator, Expr<'a>, usize)>,
) -> Expr<'a> {
    rest.into_iter().fold(first, |left, (op, right, end)| {
        Expr::new(
            ExprKind::BinOp {
                left: left.boxed(),
                op,
                right: right.boxed(),
            },
            at.span(start, end),
        )
    })
}

fn bool_op<'a>(op: BoolOperator, first: Expr<'a>, rest: Vec<Expr<'a>>, span: Span) -> Expr<'a> {
    if rest.is_empty() {
        return first;
    }
    let mut values = vec![first];
    values.extend(rest);
    Expr::new(ExprKind::BoolOp { op, values }, span)
}

fn unary<'a>(op: UnaryOperator, operand: Expr<'a>, span: Span) -> Expr<'a> {
    Expr::new(
        ExprKind::UnaryOp {
            op,
            operand: operand.boxed(),
        },
        span,
    )
}

fn starred<'a>(value: Expr<'a>, span: Span) -> Expr<'a> {
    Expr::new(ExprKind::Starred(value.boxed()), span)
}

enum Trailer<'a> {
    Attribute(&'a str),
    Call(CallArgs<'a>),
    Subscript(Expr<'a>),
}

impl<'a> Trailer<'a> {
    fn apply(self, value: Expr<'a>, span: Span) -> Expr<'a> {
        let value = value.boxed();
        let kind = match self {
            Trailer::Attribute(attr) => ExprKind::Attribute { value, attr },
            Trailer::Call(args) => ExprKind::Call { func: value, args },
            Trailer::Subscript(slice) => ExprKind::Subscript {
                value,
                slice: slice.boxed(),
            },
        };
        Expr::new(kind, span)
    }
}

/// What follows the first element of a parenthesized, list or set display.
enum SeqTail<'a> {
    Comprehension(Vec<CompFor<'a>>),
    Items(Vec<Expr<'a>>, bool),
}

enum DictTail<'a> {
    Comprehension(Vec<CompFor<'a>>),
    Items(Vec<DictItem<'a>>),
}

enum AssignTail<'a> {
    Annotated(Expr<'a>, Option<Expr<'a>>),
    Augmented(Operator, Expr<'a>),
    Chained(Vec<Expr<'a>>),
}

fn assignment<'a>(first: Expr<'a>, tail: Option<AssignTail<'a>>, span: Span) -> Stmt<'a> {
    let kind = match tail {
        None => StmtKind::Expr(first),
        Some(AssignTail::Annotated(annotation, value)) => StmtKind::AnnAssign {
            target: first,
            annotation,
            value,
        },
        Some(AssignTail::Augmented(op, value)) => StmtKind::AugAssign {
            target: first,
            op,
            value,
        },
        Some(AssignTail::Chained(mut values)) => match values.pop() {
            Some(value) => {
                let mut targets = vec![first];
                targets.extend(values);
                StmtKind::Assign { targets, value }
            }
            None => StmtKind::Expr(first),
        },
    };
    stmt(kind, span)
}

struct TryTail<'a> {
    handlers: Vec<Handler<'a>>,
    orelse: Vec<Stmt<'a>>,
    finalbody: Vec<Stmt<'a>>,
    star: bool,
}

/// `None`, `True` and `False` match by identity; other literals by value.
fn literal_pattern(value: Expr<'_>, span: Span) -> Pattern<'_> {
    match value.kind {
        ExprKind::Constant(
            constant @ (ConstantValue::None | ConstantValue::Bool(_)),
        ) => pattern(PatternKind::Singleton(constant), span),
        _ => pattern(PatternKind::Value(value), span),
    }
}

peg::parser! {
    pub grammar python<'a>(at: &Offsets) for TokVec<'a> {

        // --------------------------------------------------------------
        // Entry points

        pub rule file() -> Vec<Stmt<'a>>
            = newline()* stmts:(s:statement() newline()* { s })* end() { stmts.concat() }

        pub rule expression_input() -> Expr<'a>
            = e:yield_or_star_expressions() end() { e }

        // --------------------------------------------------------------
        // Tokens

        rule p() -> usize = position!()

        rule newline() = quiet!{ [Token { kind: TokType::Newline, .. }] } / expected!("newline")
        rule indent() = quiet!{ [Token { kind: TokType::Indent, .. }] } / expected!("indent")
        rule dedent() = quiet!{ [Token { kind: TokType::Dedent, .. }] } / expected!("dedent")
        rule end() = quiet!{ [Token { kind: TokType::EndMarker, .. }] } / expected!("end of input")

        rule name() -> Token<'a>
            = quiet!{ t:[Token { kind: TokType::Name, .. }] {?
                if is_keyword(t.text) { Err("name") } else { Ok(t) }
            } }
            / expected!("name")

        rule number() -> Token<'a>
            = quiet!{ t:[Token { kind: TokType::Number, .. }] { t } } / expected!("number")

        rule string() -> Token<'a>
            = quiet!{ t:[Token { kind: TokType::String, .. }] { t } } / expected!("string")

        // --------------------------------------------------------------
        // Statements

        rule statement() -> Vec<Stmt<'a>>
            = s:compound_stmt() { vec![s] }
            / simple_stmts()

        rule simple_stmts() -> Vec<Stmt<'a>>
            = stmts:(simple_stmt() ++ ";") ";"? newline() { stmts }

        rule block() -> Vec<Stmt<'a>>
            = ":" newline() indent() b:statement()+ dedent() { b.concat() }
            / ":" b:simple_stmts() { b }

        rule compound_stmt() -> Stmt<'a>
            = function_def()
            / if_stmt()
            / class_def()
            / with_stmt()
            / for_stmt()
            / try_stmt()
            / while_stmt()
            / match_stmt()
            / ds:decorator()+ d:(function_def() / class_def()) { d.decorated(ds) }

        rule decorator() -> Expr<'a>
            = "@" x:named_expression() newline() { x }

        rule function_def() -> Stmt<'a>
            = s:p() is_async:"async"? "def" n:name() "(" params:def_params() ")"
              returns:("->" r:expression() { r })? body:block() e:p()
            {
                stmt(StmtKind::FunctionDef {
                    decorators: Vec::new(),
                    name: n.text,
                    params,
                    returns,
                    body,
                    is_async: is_async.is_some(),
                }, at.span(s, e))
            }

        rule class_def() -> Stmt<'a>
            = s:p() "class" n:name() args:call_args()? body:block() e:p()
            {
                stmt(StmtKind::ClassDef {
                    decorators: Vec::new(),
                    name: n.text,
                    args,
                    body,
                }, at.span(s, e))
            }

        rule if_stmt() -> Stmt<'a>
            = s:p() "if" test:named_expression() body:block() orelse:elif_tail()? e:p()
            {
                stmt(StmtKind::If { test, body, orelse: orelse.unwrap_or_default() }, at.span(s, e))
            }

        rule elif_tail() -> Vec<Stmt<'a>>
            = s:p() "elif" test:named_expression() body:block() orelse:elif_tail()? e:p()
            {
                vec![stmt(StmtKind::If { test, body, orelse: orelse.unwrap_or_default() }, at.span(s, e))]
            }
            / else_block()

        rule else_block() -> Vec<Stmt<'a>> = "else" b:block() { b }

        rule while_stmt() -> Stmt<'a>
            = s:p() "while" test:named_expression() body:block() orelse:else_block()? e:p()
            {
                stmt(StmtKind::While { test, body, orelse: orelse.unwrap_or_default() }, at.span(s, e))
            }

        rule for_stmt() -> Stmt<'a>
            = s:p() is_async:"async"? "for" target:star_targets() "in" iter:star_expressions()
              body:block() orelse:else_block()? e:p()
            {
                stmt(StmtKind::For {
                    target,
                    iter,
                    body,
                    orelse: orelse.unwrap_or_default(),
                    is_async: is_async.is_some(),
                }, at.span(s, e))
            }

        rule with_stmt() -> Stmt<'a>
            = s:p() is_async:"async"? "with" items:with_items() body:block() e:p()
            {
                stmt(StmtKind::With { items, body, is_async: is_async.is_some() }, at.span(s, e))
            }

        rule with_items() -> Vec<(Expr<'a>, Option<Expr<'a>>)>
            = "(" items:(with_item() ++ ",") ","? ")" &":" { items }
            / with_item() ++ ","

        rule with_item() -> (Expr<'a>, Option<Expr<'a>>)
            = ctx:expression() vars:("as" t:star_target() &("," / ")" / ":") { t })? { (ctx, vars) }

        rule try_stmt() -> Stmt<'a>
            = s:p() "try" body:block() tail:try_tail() e:p()
            {
                stmt(StmtKind::Try {
                    body,
                    handlers: tail.handlers,
                    orelse: tail.orelse,
                    finalbody: tail.finalbody,
                    star: tail.star,
                }, at.span(s, e))
            }

        rule try_tail() -> TryTail<'a>
            = finalbody:finally_block()
              { TryTail { handlers: Vec::new(), orelse: Vec::new(), finalbody, star: false } }
            / handlers:except_block()+ orelse:else_block()? finalbody:finally_block()?
              {
                  TryTail {
                      handlers,
                      orelse: orelse.unwrap_or_default(),
                      finalbody: finalbody.unwrap_or_default(),
                      star: false,
                  }
              }
            / handlers:except_star_block()+ orelse:else_block()? finalbody:finally_block()?
              {
                  TryTail {
                      handlers,
                      orelse: orelse.unwrap_or_default(),
                      finalbody: finalbody.unwrap_or_default(),
                      star: true,
                  }
              }

        rule except_block() -> Handler<'a>
            = s:p() "except" !"*" clause:(x:expression() n:("as" n:name() { n.text })? { (x, n) })?
              body:block() e:p()
            {
                let (type_, name) = match clause {
                    Some((x, n)) => (Some(x), n),
                    None => (None, None),
                };
                Handler { type_, name, body, span: at.span(s, e) }
            }

        rule except_star_block() -> Handler<'a>
            = s:p() "except" "*" t:expression() n:("as" n:name() { n.text })? body:block() e:p()
            {
                Handler { type_: Some(t), name: n, body, span: at.span(s, e) }
            }

        rule finally_block() -> Vec<Stmt<'a>> = "finally" b:block() { b }

        rule match_stmt() -> Stmt<'a>
            = s:p() "match" subject:subject_expr() ":" newline() indent() cases:case_block()+ dedent() e:p()
            {
                stmt(StmtKind::Match { subject, cases }, at.span(s, e))
            }

        rule subject_expr() -> Expr<'a>
            = s:p() first:star_named_expression() "," rest:(star_named_expression() ** ",") ","? e:p()
              { sequence(first, rest, true, at.span(s, e)) }
            / named_expression()

        rule case_block() -> Case<'a>
            = "case" pattern:patterns() guard:("if" g:named_expression() { g })? body:block()
            {
                Case { pattern, guard, body }
            }

        rule simple_stmt() -> Stmt<'a>
            = s:p() "pass" e:p() { stmt(StmtKind::Pass, at.span(s, e)) }
            / s:p() "break" e:p() { stmt(StmtKind::Break, at.span(s, e)) }
            / s:p() "continue" e:p() { stmt(StmtKind::Continue, at.span(s, e)) }
            / s:p() "return" v:star_expressions()? e:p() { stmt(StmtKind::Return(v), at.span(s, e)) }
            / s:p() "raise" r:(x:expression() c:("from" c:expression() { c })? { (x, c) })? e:p()
            {
                let (exc, cause) = match r {
                    Some((x, c)) => (Some(x), c),
                    None => (None, None),
                };
                stmt(StmtKind::Raise { exc, cause }, at.span(s, e))
            }
            / s:p() "global" ns:(name() ++ ",") e:p()
              { stmt(StmtKind::Global(ns.iter().map(|t| t.text).collect()), at.span(s, e)) }
            / s:p() "nonlocal" ns:(name() ++ ",") e:p()
              { stmt(StmtKind::Nonlocal(ns.iter().map(|t| t.text).collect()), at.span(s, e)) }
            / s:p() "del" ts:(bitwise_or() ++ ",") ","? e:p() { stmt(StmtKind::Delete(ts), at.span(s, e)) }
            / s:p() "assert" test:expression() msg:("," m:expression() { m })? e:p()
              { stmt(StmtKind::Assert { test, msg }, at.span(s, e)) }
            / import_name()
            / import_from()
            / s:p() first:yield_or_star_expressions() tail:assign_tail()? e:p()
              { assignment(first, tail, at.span(s, e)) }

        rule assign_tail() -> AssignTail<'a>
            = ":" annotation:expression() value:("=" v:yield_or_star_expressions() { v })?
              { AssignTail::Annotated(annotation, value) }
            / op:augassign() value:yield_or_star_expressions() { AssignTail::Augmented(op, value) }
            / values:("=" v:yield_or_star_expressions() { v })+ { AssignTail::Chained(values) }

        rule augassign() -> Operator
            = quiet!{ t:[Token { kind: TokType::Op, .. }] {?
                Operator::from_augassign(t.text).ok_or("augmented assignment")
            } }
            / expected!("augmented assignment")

        rule import_name() -> Stmt<'a>
            = s:p() "import" names:(dotted_as_name() ++ ",") e:p()
              { stmt(StmtKind::Import(names), at.span(s, e)) }

        rule dotted_as_name() -> ImportAlias<'a>
            = s:p() name:dotted_name() asname:("as" n:name() { n.text })? e:p()
              { ImportAlias { name, asname, span: at.span(s, e) } }

        rule dotted_name() -> String
            = ts:$(name() ++ ".") { ts.iter().map(|t| t.text).collect() }

        rule import_from() -> Stmt<'a>
            = s:p() "from" dots:import_dots()* module:dotted_name()? "import" names:import_targets() e:p()
            {?
                let level = dots.iter().sum::<u32>();
                if module.is_none() && level == 0 {
                    Err("module name")
                } else {
                    Ok(stmt(StmtKind::ImportFrom { module, names, level }, at.span(s, e)))
                }
            }

        rule import_dots() -> u32 = "." { 1 } / "..." { 3 }

        rule import_targets() -> Vec<ImportAlias<'a>>
            = s:p() "*" e:p() { vec![ImportAlias { name: "*".to_string(), asname: None, span: at.span(s, e) }] }
            / "(" names:(import_as_name() ++ ",") ","? ")" { names }
            / names:(import_as_name() ++ ",") !"," { names }

        rule import_as_name() -> ImportAlias<'a>
            = s:p() n:name() asname:("as" a:name() { a.text })? e:p()
              { ImportAlias { name: n.text.to_string(), asname, span: at.span(s, e) } }

        // --------------------------------------------------------------
        // Parameters

        rule def_params() -> Vec<ParamItem<'a>>
            = items:(def_param_item() ** ",") comma:","?
            {?
                if items.is_empty() && comma.is_some() { Err("parameter") } else { Ok(items) }
            }

        rule def_param_item() -> ParamItem<'a>
            = s:p() "/" { ParamItem::Slash(at.start(s)) }
            / "**" a:def_param() { ParamItem::DoubleStar(a) }
            / s:p() "*" a:def_param()? { ParamItem::Star(at.start(s), a) }
            / a:def_param() d:("=" d:expression() { d })? { ParamItem::Plain(a, d) }

        rule def_param() -> Param<'a>
            = s:p() n:name() annotation:(":" x:expression() { x })? e:p()
              { Param { name: n.text, annotation, span: at.span(s, e) } }

        rule lambda_params() -> Vec<ParamItem<'a>>
            = items:(lambda_param_item() ** ",") comma:","?
            {?
                if items.is_empty() && comma.is_some() { Err("parameter") } else { Ok(items) }
            }

        rule lambda_param_item() -> ParamItem<'a>
            = s:p() "/" { ParamItem::Slash(at.start(s)) }
            / "**" a:lambda_param() { ParamItem::DoubleStar(a) }
            / s:p() "*" a:lambda_param()? { ParamItem::Star(at.start(s), a) }
            / a:lambda_param() d:("=" d:expression() { d })? { ParamItem::Plain(a, d) }

        rule lambda_param() -> Param<'a>
            = t:name() { Param { name: t.text, annotation: None, span: tok_span(t) } }

        // --------------------------------------------------------------
        // Expressions

        rule yield_or_star_expressions() -> Expr<'a>
            = yield_expr()
            / star_expressions()

        rule yield_expr() -> Expr<'a>
            = s:p() "yield" "from" v:expression() e:p()
              { Expr::new(ExprKind::YieldFrom(v.boxed()), at.span(s, e)) }
            / s:p() "yield" v:star_expressions()? e:p()
              { Expr::new(ExprKind::Yield(v.map(Expr::boxed)), at.span(s, e)) }

        rule star_expressions() -> Expr<'a>
            = s:p() first:star_expression() rest:("," x:star_expression() { x })* comma:","? e:p()
              { sequence(first, rest, comma.is_some(), at.span(s, e)) }

        rule star_expression() -> Expr<'a>
            = s:p() "*" v:bitwise_or() e:p() { starred(v, at.span(s, e)) }
            / expression()

        rule star_named_expression() -> Expr<'a>
            = s:p() "*" v:bitwise_or() e:p() { starred(v, at.span(s, e)) }
            / named_expression()

        rule named_expression() -> Expr<'a>
            = s:p() n:name() ":=" v:expression() e:p()
            {
                Expr::new(ExprKind::NamedExpr {
                    target: name_expr(n).boxed(),
                    value: v.boxed(),
                }, at.span(s, e))
            }
            / x:expression() !":=" { x }

        #[cache]
        rule expression() -> Expr<'a>
            = lambdef()
            / s:p() body:disjunction() c:("if" t:disjunction() "else" o:expression() { (t, o) })? e:p()
            {
                match c {
                    Some((test, orelse)) => Expr::new(ExprKind::IfExp {
                        body: body.boxed(),
                        test: test.boxed(),
                        orelse: orelse.boxed(),
                    }, at.span(s, e)),
                    None => body,
                }
            }

        rule lambdef() -> Expr<'a>
            = s:p() "lambda" params:lambda_params() ":" body:expression() e:p()
              { Expr::new(ExprKind::Lambda { params, body: body.boxed() }, at.span(s, e)) }

        rule disjunction() -> Expr<'a>
            = s:p() first:conjunction() rest:("or" c:conjunction() { c })* e:p()
              { bool_op(BoolOperator::Or, first, rest, at.span(s, e)) }

        rule conjunction() -> Expr<'a>
            = s:p() first:inversion() rest:("and" c:inversion() { c })* e:p()
              { bool_op(BoolOperator::And, first, rest, at.span(s, e)) }

        rule inversion() -> Expr<'a>
            = s:p() "not" operand:inversion() e:p() { unary(UnaryOperator::Not, operand, at.span(s, e)) }
            / comparison()

        rule comparison() -> Expr<'a>
            = s:p() left:bitwise_or() rest:(op:comp_op() r:bitwise_or() { (op, r) })* e:p()
            {
                if rest.is_empty() {
                    left
                } else {
                    Expr::new(ExprKind::Compare { left: left.boxed(), rest }, at.span(s, e))
                }
            }

        rule comp_op() -> CmpOperator
            = "==" { CmpOperator::Eq }
            / "!=" { CmpOperator::NotEq }
            / "<=" { CmpOperator::LtE }
            / "<" { CmpOperator::Lt }
            / ">=" { CmpOperator::GtE }
            / ">" { CmpOperator::Gt }
            / "not" "in" { CmpOperator::NotIn }
            / "in" { CmpOperator::In }
            / "is" "not" { CmpOperator::IsNot }
            / "is" { CmpOperator::Is }

        rule bitwise_or() -> Expr<'a>
            = s:p() first:bitwise_xor() rest:("|" r:bitwise_xor() e:p() { (Operator::BitOr, r, e) })*
              { binary(at, s, first, rest) }

        rule bitwise_xor() -> Expr<'a>
            = s:p() first:bitwise_and() rest:("^" r:bitwise_and() e:p() { (Operator::BitXor, r, e) })*
              { binary(at, s, first, rest) }

        rule bitwise_and() -> Expr<'a>
            = s:p() first:shift_expr() rest:("&" r:shift_expr() e:p() { (Operator::BitAnd, r, e) })*
              { binary(at, s, first, rest) }

        rule shift_expr() -> Expr<'a>
            = s:p() first:sum() rest:(op:shift_op() r:sum() e:p() { (op, r, e) })*
              { binary(at, s, first, rest) }

        rule shift_op() -> Operator
            = "<<" { Operator::LShift }
            / ">>" { Operator::RShift }

        rule sum() -> Expr<'a>
            = s:p() first:term() rest:(op:sum_op() r:term() e:p() { (op, r, e) })*
              { binary(at, s, first, rest) }

        rule sum_op() -> Operator
            = "+" { Operator::Add }
            / "-" { Operator::Sub }

        rule term() -> Expr<'a>
            = s:p() first:factor() rest:(op:term_op() r:factor() e:p() { (op, r, e) })*
              { binary(at, s, first, rest) }

        rule term_op() -> Operator
            = "*" { Operator::Mult }
            / "/" { Operator::Div }
            / "//" { Operator::FloorDiv }
            / "%" { Operator::Mod }
            / "@" { Operator::MatMult }

        rule factor() -> Expr<'a>
            = s:p() op:unary_op() operand:factor() e:p() { unary(op, operand, at.span(s, e)) }
            / power()

        rule unary_op() -> UnaryOperator
            = "+" { UnaryOperator::UAdd }
            / "-" { UnaryOperator::USub }
            / "~" { UnaryOperator::Invert }

        rule power() -> Expr<'a>
            = s:p() left:await_primary() right:("**" r:factor() { r })? e:p()
            {
                match right {
                    Some(right) => Expr::new(ExprKind::BinOp {
                        left: left.boxed(),
                        op: Operator::Pow,
                        right: right.boxed(),
                    }, at.span(s, e)),
                    None => left,
                }
            }

        rule await_primary() -> Expr<'a>
            = s:p() "await" v:primary() e:p() { Expr::new(ExprKind::Await(v.boxed()), at.span(s, e)) }
            / primary()

        rule primary() -> Expr<'a>
            = s:p() first:atom() trailers:(t:trailer() e:p() { (t, e) })*
            {
                trailers
                    .into_iter()
                    .fold(first, |value, (trailer, e)| trailer.apply(value, at.span(s, e)))
            }

        rule trailer() -> Trailer<'a>
            = "." n:name() { Trailer::Attribute(n.text) }
            / args:call_args() { Trailer::Call(args) }
            / "[" slice:slices() "]" { Trailer::Subscript(slice) }

        rule call_args() -> CallArgs<'a>
            = s:p() "(" items:(call_arg() ** ",") comma:","? ")" e:p()
            {?
                if items.is_empty() && comma.is_some() {
                    Err("argument")
                } else {
                    Ok(CallArgs { span: at.span(s, e), items, trailing_comma: comma.is_some() })
                }
            }

        rule call_arg() -> CallArg<'a>
            = s:p() "*" v:expression() e:p() { CallArg::Star(v, at.span(s, e)) }
            / s:p() "**" v:expression() e:p() { CallArg::DoubleStar(v, at.span(s, e)) }
            / s:p() n:name() "=" v:expression() e:p() { CallArg::Keyword(n.text, v, at.span(s, e)) }
            / s:p() elt:named_expression() gens:for_if_clauses()? e:p()
            {
                match gens {
                    Some(generators) => CallArg::Generator(Expr::new(ExprKind::GeneratorExp {
                        elt: elt.boxed(),
                        generators,
                    }, at.span(s, e))),
                    None => CallArg::Positional(elt),
                }
            }

        rule slices() -> Expr<'a>
            = s:p() first:slice() rest:("," x:slice() { x })* comma:","? e:p()
              { sequence(first, rest, comma.is_some(), at.span(s, e)) }

        rule slice() -> Expr<'a>
            = s:p() lower:expression()? ":" upper:expression()? step:(":" x:expression()? { x })? e:p()
            {
                Expr::new(ExprKind::Slice {
                    lower: lower.map(Expr::boxed),
                    upper: upper.map(Expr::boxed),
                    step: step.flatten().map(Expr::boxed),
                }, at.span(s, e))
            }
            / named_expression()

        rule atom() -> Expr<'a>
            = t:name() { name_expr(t) }
            / s:p() "True" e:p() { constant(ConstantValue::Bool(true), at.span(s, e)) }
            / s:p() "False" e:p() { constant(ConstantValue::Bool(false), at.span(s, e)) }
            / s:p() "None" e:p() { constant(ConstantValue::None, at.span(s, e)) }
            / t:number() { number_expr(t) }
            / s:p() ts:string()+ e:p() { Expr::new(ExprKind::Strings(ts), at.span(s, e)) }
            / paren_atom()
            / list_atom()
            / brace_atom()
            / s:p() "..." e:p() { constant(ConstantValue::Ellipsis, at.span(s, e)) }

        rule paren_atom() -> Expr<'a>
            = s:p() "(" ")" e:p() { Expr::new(ExprKind::Tuple(Vec::new()), at.span(s, e)) }
            / "(" y:yield_expr() ")" { y.in_parens() }
            / s:p() "(" first:star_named_expression() tail:seq_tail() ")" e:p()
            {
                match tail {
                    SeqTail::Comprehension(generators) => Expr::new(ExprKind::GeneratorExp {
                        elt: first.boxed(),
                        generators,
                    }, at.span(s, e)),
                    SeqTail::Items(rest, comma) if rest.is_empty() && !comma => first.in_parens(),
                    SeqTail::Items(rest, _) => sequence(first, rest, true, at.span(s, e)),
                }
            }

        rule list_atom() -> Expr<'a>
            = s:p() "[" "]" e:p() { Expr::new(ExprKind::List(Vec::new()), at.span(s, e)) }
            / s:p() "[" first:star_named_expression() tail:seq_tail() "]" e:p()
            {
                match tail {
                    SeqTail::Comprehension(generators) => Expr::new(ExprKind::ListComp {
                        elt: first.boxed(),
                        generators,
                    }, at.span(s, e)),
                    SeqTail::Items(rest, _) => {
                        let mut elts = vec![first];
                        elts.extend(rest);
                        Expr::new(ExprKind::List(elts), at.span(s, e))
                    }
                }
            }

        rule brace_atom() -> Expr<'a>
            = s:p() "{" "}" e:p() { Expr::new(ExprKind::Dict(Vec::new()), at.span(s, e)) }
            / s:p() "{" first:dict_item() tail:dict_tail() "}" e:p()
            {?
                match (first, tail) {
                    (DictItem::Pair(key, value), DictTail::Comprehension(generators)) => {
                        Ok(Expr::new(ExprKind::DictComp {
                            key: key.boxed(),
                            value: value.boxed(),
                            generators,
                        }, at.span(s, e)))
                    }
                    (DictItem::Unpack(_), DictTail::Comprehension(_)) => Err("dict item"),
                    (first, DictTail::Items(rest)) => {
                        let mut items = vec![first];
                        items.extend(rest);
                        Ok(Expr::new(ExprKind::Dict(items), at.span(s, e)))
                    }
                }
            }
            / s:p() "{" first:star_named_expression() tail:seq_tail() "}" e:p()
            {
                match tail {
                    SeqTail::Comprehension(generators) => Expr::new(ExprKind::SetComp {
                        elt: first.boxed(),
                        generators,
                    }, at.span(s, e)),
                    SeqTail::Items(rest, _) => {
                        let mut elts = vec![first];
                        elts.extend(rest);
                        Expr::new(ExprKind::Set(elts), at.span(s, e))
                    }
                }
            }

        rule seq_tail() -> SeqTail<'a>
            = generators:for_if_clauses() { SeqTail::Comprehension(generators) }
            / rest:("," x:star_named_expression() { x })* comma:","? { SeqTail::Items(rest, comma.is_some()) }

        rule dict_item() -> DictItem<'a>
            = "**" v:bitwise_or() { DictItem::Unpack(v) }
            / k:expression() ":" v:expression() { DictItem::Pair(k, v) }

        rule dict_tail() -> DictTail<'a>
            = generators:for_if_clauses() { DictTail::Comprehension(generators) }
            / rest:("," x:dict_item() { x })* ","? { DictTail::Items(rest) }

        rule for_if_clauses() -> Vec<CompFor<'a>> = for_if_clause()+

        rule for_if_clause() -> CompFor<'a>
            = is_async:"async"? "for" target:star_targets() "in" iter:disjunction()
              ifs:("if" c:disjunction() { c })*
            {
                CompFor { target, iter, ifs, is_async: is_async.is_some() }
            }

        rule star_targets() -> Expr<'a>
            = s:p() first:star_target() rest:("," x:star_target() { x })* comma:","? e:p()
              { sequence(first, rest, comma.is_some(), at.span(s, e)) }

        rule star_target() -> Expr<'a>
            = s:p() "*" v:bitwise_or() e:p() { starred(v, at.span(s, e)) }
            / bitwise_or()

        // --------------------------------------------------------------
        // Patterns

        rule patterns() -> Pattern<'a>
            = s:p() first:maybe_star_pattern() "," rest:(maybe_star_pattern() ** ",") ","? e:p()
            {
                let mut items = vec![first];
                items.extend(rest);
                pattern(PatternKind::Sequence(items), at.span(s, e))
            }
            / as_pattern()

        rule as_pattern() -> Pattern<'a>
            = s:p() inner:or_pattern() name:("as" n:capture_name() { n })? e:p()
            {
                match name {
                    Some(name) => pattern(PatternKind::As {
                        pattern: Some(Box::new(inner)),
                        name: Some(name),
                    }, at.span(s, e)),
                    None => inner,
                }
            }

        rule or_pattern() -> Pattern<'a>
            = s:p() first:closed_pattern() rest:("|" x:closed_pattern() { x })* e:p()
            {
                if rest.is_empty() {
                    first
                } else {
                    let mut items = vec![first];
                    items.extend(rest);
                    pattern(PatternKind::Or(items), at.span(s, e))
                }
            }

        rule closed_pattern() -> Pattern<'a>
            = s:p() x:literal_expr() e:p() { literal_pattern(x, at.span(s, e)) }
            / name_or_attr_pattern()
            / group_pattern()
            / s:p() "[" items:(maybe_star_pattern() ** ",") ","? "]" e:p()
              { pattern(PatternKind::Sequence(items), at.span(s, e)) }
            / mapping_pattern()

        rule literal_expr() -> Expr<'a>
            = complex_number()
            / x:signed_number() !("+" / "-") { x }
            / s:p() ts:string()+ e:p() { Expr::new(ExprKind::Strings(ts), at.span(s, e)) }
            / s:p() "None" e:p() { constant(ConstantValue::None, at.span(s, e)) }
            / s:p() "True" e:p() { constant(ConstantValue::Bool(true), at.span(s, e)) }
            / s:p() "False" e:p() { constant(ConstantValue::Bool(false), at.span(s, e)) }

        rule complex_number() -> Expr<'a>
            = s:p() real:signed_number() op:sum_op() imag:imaginary() e:p()
            {
                Expr::new(ExprKind::BinOp {
                    left: real.boxed(),
                    op,
                    right: imag.boxed(),
                }, at.span(s, e))
            }

        rule signed_number() -> Expr<'a>
            = s:p() "-" t:number() e:p() { unary(UnaryOperator::USub, number_expr(t), at.span(s, e)) }
            / t:number() { number_expr(t) }

        rule imaginary() -> Expr<'a>
            = t:number() {?
                if t.text.ends_with(['j', 'J']) { Ok(number_expr(t)) } else { Err("imaginary number") }
            }

        rule name_or_attr() -> Expr<'a>
            = s:p() first:name() rest:("." n:name() e:p() { (n, e) })*
            {
                rest.into_iter().fold(name_expr(first), |value, (attr, e)| {
                    Expr::new(ExprKind::Attribute { value: value.boxed(), attr: attr.text }, at.span(s, e))
                })
            }

        rule name_or_attr_pattern() -> Pattern<'a>
            = s:p() cls:name_or_attr() "(" args:(class_pattern_arg() ** ",") ","? ")" e:p()
              { pattern(PatternKind::Class { cls, args }, at.span(s, e)) }
            / s:p() value:name_or_attr() !("." / "(" / "=") e:p()
            {?
                match value.kind {
                    ExprKind::Attribute { .. } => Ok(pattern(PatternKind::Value(value), at.span(s, e))),
                    _ => Err("dotted name"),
                }
            }
            / s:p() "_" !("." / "(" / "=") e:p()
              { pattern(PatternKind::As { pattern: None, name: None }, at.span(s, e)) }
            / s:p() n:capture_name() e:p()
              { pattern(PatternKind::As { pattern: None, name: Some(n) }, at.span(s, e)) }

        rule capture_name() -> &'a str
            = !"_" t:name() !("." / "(" / "=") { t.text }

        rule class_pattern_arg() -> ClassPatternArg<'a>
            = t:name() "=" v:as_pattern() { ClassPatternArg::Keyword(t.text, v) }
            / v:as_pattern() { ClassPatternArg::Positional(v) }

        rule maybe_star_pattern() -> Pattern<'a>
            = s:p() "*" n:("_" { None } / t:name() { Some(t.text) }) e:p()
              { pattern(PatternKind::Star(n), at.span(s, e)) }
            / as_pattern()

        rule group_pattern() -> Pattern<'a>
            = s:p() "(" ")" e:p() { pattern(PatternKind::Sequence(Vec::new()), at.span(s, e)) }
            / s:p() "(" first:maybe_star_pattern() rest:("," x:maybe_star_pattern() { x })* comma:","? ")" e:p()
            {
                if rest.is_empty() && comma.is_none() && !matches!(first.kind, PatternKind::Star(_)) {
                    first
                } else {
                    let mut items = vec![first];
                    items.extend(rest);
                    pattern(PatternKind::Sequence(items), at.span(s, e))
                }
            }

        rule mapping_pattern() -> Pattern<'a>
            = s:p() "{" "}" e:p() { pattern(PatternKind::Mapping { items: Vec::new(), rest: None }, at.span(s, e)) }
            / s:p() "{" "**" r:capture_name() ","? "}" e:p()
              { pattern(PatternKind::Mapping { items: Vec::new(), rest: Some(r) }, at.span(s, e)) }
            / s:p() "{" items:(key_value_pattern() ++ ",") rest:("," "**" r:capture_name() { r })? ","? "}" e:p()
              { pattern(PatternKind::Mapping { items, rest }, at.span(s, e)) }

        rule key_value_pattern() -> (Expr<'a>, Pattern<'a>)
            = k:mapping_key() ":" v:as_pattern() { (k, v) }

        rule mapping_key() -> Expr<'a>
            = literal_expr()
            / x:name_or_attr() {?
                match x.kind {
                    ExprKind::Attribute { .. } => Ok(x),
                    _ => Err("dotted name"),
                }
            }
    }
}
