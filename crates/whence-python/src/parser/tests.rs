// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use super::{parse_expression_text, parse_module_text, ParserError};
use crate::nodes::{Ast, CmpOperator, ConstantValue, ExprContext, NodeKind};
use crate::tokenizer::TokError;

fn parse_err(text: &str) -> ParserError {
    parse_module_text(text).unwrap_err()
}

fn expr(text: &str) -> Ast {
    parse_expression_text(text).unwrap()
}

fn root_kind(ast: &Ast) -> &NodeKind {
    ast.kind(ast.root())
}

fn body(ast: &Ast) -> Vec<&NodeKind> {
    let NodeKind::Module { body } = ast.kind(ast.root()) else {
        panic!("not a module");
    };
    body.iter().map(|id| ast.kind(*id)).collect()
}

fn type_names(ast: &Ast) -> Vec<&'static str> {
    ast.walk().iter().map(|id| ast.kind(*id).type_name()).collect()
}

// ----------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------

#[test]
fn syntax_error_position() {
    let err = parse_err("x = 1\ny = (2,\n");
    assert_eq!(err.line(), 3);

    let err = parse_err("def f(:\n    pass\n");
    match err {
        ParserError::SyntaxError { line, column, .. } => assert_eq!((line, column), (1, 6)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn syntax_error_names_found_token() {
    let err = parse_err("x = = 1\n");
    assert!(err.message().starts_with("invalid syntax: expected"));
    assert!(err.message().ends_with("found '='"));
    assert_eq!(err.offset(), 4);

    let err = parse_err("if x:\npass\n");
    assert!(err.message().starts_with("expected an indented block"));

    let err = parse_err("x = 1\n    y = 2\n");
    assert_eq!(err.message(), "unexpected indent");
}

#[test]
fn invalid_targets() {
    let err = parse_err("f() = 1\n");
    assert!(err.message().contains("cannot assign to function call"));
    let err = parse_err("del 1\n");
    assert!(err.message().contains("cannot delete literal"));
    let err = parse_err("for x + 1 in y:\n    pass\n");
    assert!(err.message().contains("cannot assign to expression"));
    let err = parse_err("(a, b) += 1\n");
    assert!(err.message().contains("illegal target for augmented assignment"));
}

#[test]
fn tokenizer_errors_are_wrapped() {
    let err = parse_err("x = 'abc\n");
    assert!(matches!(
        err,
        ParserError::TokenizerError {
            error: TokError::UnterminatedString { .. },
            line: 1,
            column: 4,
        }
    ));
}

#[test]
fn bad_number_endings_are_rejected() {
    let err = parse_err("x = 1_000_\n");
    assert_eq!(err.message(), "invalid decimal literal");
    assert_eq!((err.line(), err.offset()), (1, 4));
}

#[test]
fn positional_argument_after_keyword_is_rejected() {
    let err = parse_err("f(a=1, b)\n");
    assert_eq!(err.message(), "positional argument follows keyword argument");
    assert_eq!(err.offset(), 7);

    let err = parse_err("f(**a, b)\n");
    assert_eq!(
        err.message(),
        "positional argument follows keyword argument unpacking"
    );
}

#[test]
fn star_argument_after_double_star_is_rejected() {
    let err = parse_err("f(**a, *b)\n");
    assert_eq!(
        err.message(),
        "iterable argument unpacking follows keyword argument unpacking"
    );
    assert_eq!(err.offset(), 7);
    assert!(parse_module_text("f(*a, k=1, *b, **c)\n").is_ok());
}

#[test]
fn repeated_keyword_argument_is_rejected() {
    let err = parse_err("f(a=1, a=2)\n");
    assert_eq!(err.message(), "keyword argument repeated: a");
}

#[test]
fn duplicate_parameter_is_rejected() {
    let err = parse_err("def f(a, a):\n    pass\n");
    assert_eq!(
        err.message(),
        "duplicate argument 'a' in function definition"
    );
    assert_eq!(err.offset(), 9);
    assert!(parse_module_text("lambda a, *, a: 0\n").is_err());
}

#[test]
fn parameter_list_shape_is_checked() {
    assert!(parse_err("def f(a=1, b):\n    pass\n")
        .message()
        .contains("non-default argument follows default argument"));
    assert!(parse_err("def f(/, a):\n    pass\n")
        .message()
        .contains("invalid '/' in parameter list"));
    assert!(parse_err("def f(*a, *b):\n    pass\n")
        .message()
        .contains("'*' argument may appear only once"));
    assert!(parse_err("def f(a, *):\n    pass\n")
        .message()
        .contains("named arguments must follow bare *"));
}

#[test]
fn generator_argument_must_be_alone() {
    let err = parse_err("f(x for x in y, 1)\n");
    assert_eq!(err.message(), "generator expression must be parenthesized");
}

#[test]
fn bom_is_skipped() {
    let ast = parse_module_text("\u{feff}x = 1\n").unwrap();
    assert!(matches!(ast.kind(ast.root()), NodeKind::Module { body } if body.len() == 1));
}

#[test]
fn keywords_are_not_names() {
    assert!(parse_module_text("class = 1\n").is_err());
    assert!(parse_module_text("match = 1\n").is_ok());
    assert!(parse_module_text("case = match(x)\n").is_ok());
}

#[test]
fn every_node_is_reachable_from_the_root() {
    let text = "\
@dec
def f(a: int = 1, *args, k=2, **kw) -> str:
    with open(p) as fh, ctx():
        return f'{a!r:>{k}}' + fh.read()
class C(Base, metaclass=M):
    x: int = [i for i in range(3) if i]
match command.split():
    case [\"go\", *rest] | (\"run\", *rest) if rest:
        pass
    case {\"k\": 1, **others}:
        pass
    case Point(x=0, y=_) as p:
        pass
";
    let ast = parse_module_text(text).unwrap();
    assert_eq!(ast.walk().len(), ast.len());
}

// ----------------------------------------------------------------------
// Expressions
// ----------------------------------------------------------------------

#[test]
fn precedence() {
    let ast = expr("a + b * c ** -d");
    let NodeKind::BinOp { right, .. } = root_kind(&ast) else {
        panic!("expected BinOp");
    };
    assert!(matches!(ast.kind(*right), NodeKind::BinOp { .. }));
    assert_eq!(ast.text(*right, "a + b * c ** -d"), "b * c ** -d");
}

#[test]
fn binary_chains_are_left_associative() {
    let text = "a - b - c";
    let ast = expr(text);
    let NodeKind::BinOp { left, .. } = root_kind(&ast) else {
        panic!("expected BinOp");
    };
    assert_eq!(ast.text(*left, text), "a - b");
}

#[test]
fn parenthesized_operand_keeps_own_span() {
    let text = "(a + b) * c";
    let ast = expr(text);
    let NodeKind::BinOp { left, .. } = root_kind(&ast) else {
        panic!("expected BinOp");
    };
    assert_eq!(ast.text(*left, text), "a + b");
    assert_eq!(ast.text(ast.root(), text), text);
}

#[test]
fn comparisons() {
    let ast = expr("a < b not in c is not d");
    let NodeKind::Compare { ops, .. } = root_kind(&ast) else {
        panic!("expected Compare");
    };
    assert_eq!(ops, &[CmpOperator::Lt, CmpOperator::NotIn, CmpOperator::IsNot]);
}

#[test]
fn boolean_and_not() {
    let ast = expr("not a or b and c");
    let NodeKind::BoolOp { values, .. } = root_kind(&ast) else {
        panic!("expected BoolOp");
    };
    assert!(matches!(ast.kind(values[0]), NodeKind::UnaryOp { .. }));
    assert!(matches!(ast.kind(values[1]), NodeKind::BoolOp { .. }));
}

#[test]
fn calls_and_keywords() {
    let text = "f(a, *b, c=1, **d)";
    let ast = expr(text);
    let NodeKind::Call { args, keywords, .. } = root_kind(&ast) else {
        panic!("expected Call");
    };
    assert_eq!(args.len(), 2);
    assert_eq!(ast.text(args[1], text), "*b");
    assert_eq!(keywords.len(), 2);
    assert_eq!(keywords[0].arg.as_deref(), Some("c"));
    assert_eq!(keywords[1].arg, None);
}

#[test]
fn sole_generator_argument_spans_call_parens() {
    let text = "sum(x for x in y)";
    let ast = expr(text);
    let NodeKind::Call { args, .. } = root_kind(&ast) else {
        panic!("expected Call");
    };
    assert_eq!(ast.text(args[0], text), "(x for x in y)");
}

#[test]
fn subscripts_and_slices() {
    let text = "a[1:2, ::3][b]";
    let ast = expr(text);
    let NodeKind::Subscript { value, slice, .. } = root_kind(&ast) else {
        panic!("expected Subscript");
    };
    assert_eq!(ast.text(*slice, text), "b");
    let NodeKind::Subscript { slice: inner, .. } = ast.kind(*value) else {
        panic!("expected Subscript");
    };
    let NodeKind::Tuple { elts, .. } = ast.kind(*inner) else {
        panic!("expected Tuple");
    };
    assert_eq!(ast.text(elts[0], text), "1:2");
    assert_eq!(ast.text(elts[1], text), "::3");
}

#[test]
fn comprehensions() {
    let ast = expr("{k: v for k, v in items if k}");
    let NodeKind::DictComp { generators, .. } = root_kind(&ast) else {
        panic!("expected DictComp");
    };
    assert_eq!(generators[0].ifs.len(), 1);
    assert_eq!(ast.ctx(generators[0].target), Some(ExprContext::Store));
    assert!(matches!(root_kind(&expr("{x for x in y}")), NodeKind::SetComp { .. }));
    assert!(matches!(root_kind(&expr("[*a, b]")), NodeKind::List { .. }));
    assert!(matches!(root_kind(&expr("(x for x in y)")), NodeKind::GeneratorExp { .. }));
}

#[test]
fn displays() {
    assert!(matches!(root_kind(&expr("()")), NodeKind::Tuple { elts, .. } if elts.is_empty()));
    assert!(matches!(root_kind(&expr("(1,)")), NodeKind::Tuple { elts, .. } if elts.len() == 1));
    assert!(matches!(root_kind(&expr("{}")), NodeKind::Dict { .. }));
    assert!(matches!(
        root_kind(&expr("{**a, 'b': 1}")),
        NodeKind::Dict { keys, .. } if keys[0].is_none() && keys[1].is_some()
    ));
    assert!(matches!(root_kind(&expr("{1, 2}")), NodeKind::Set { .. }));
}

#[test]
fn string_concatenation() {
    let ast = expr("'a' \"b\" '''c'''");
    assert!(matches!(
        root_kind(&ast),
        NodeKind::Constant { value: ConstantValue::Str(s) } if s == "abc"
    ));
    assert!(parse_expression_text("b'a' 'b'").is_err());
}

#[test]
fn fstring_expressions_have_real_positions() {
    let text = "f'x{a.b!r:>{w}}y' 'z'";
    let ast = expr(text);
    let NodeKind::JoinedStr { values } = root_kind(&ast) else {
        panic!("expected JoinedStr");
    };
    assert_eq!(values.len(), 3);
    let NodeKind::FormattedValue {
        value,
        conversion,
        format_spec,
    } = ast.kind(values[1])
    else {
        panic!("expected FormattedValue");
    };
    assert_eq!(ast.text(*value, text), "a.b");
    assert_eq!(*conversion, Some('r'));
    assert!(format_spec.is_some());
    assert!(matches!(
        ast.kind(values[2]),
        NodeKind::Constant { value: ConstantValue::Str(s) } if s == "yz"
    ));
}

#[test]
fn lambda_and_conditional() {
    let ast = expr("lambda x, *a, k=1: x if k else a");
    let NodeKind::Lambda { args, body } = root_kind(&ast) else {
        panic!("expected Lambda");
    };
    assert_eq!(args.args.len(), 1);
    assert_eq!(args.kwonlyargs.len(), 1);
    assert!(matches!(ast.kind(*body), NodeKind::IfExp { .. }));
}

#[test]
fn walrus_and_await() {
    let ast =
        parse_module_text("async def f():\n    if (n := await g()) > 1:\n        pass\n").unwrap();
    let kinds = type_names(&ast);
    assert!(kinds.contains(&"NamedExpr"));
    assert!(kinds.contains(&"Await"));
}

#[test]
fn multi_target_for_and_starred_assignment() {
    let ast = parse_module_text("for a, (b, *c) in d:\n    pass\nx, *y = z\n").unwrap();
    let stores = ast
        .ids()
        .filter(|id| {
            matches!(ast.kind(*id), NodeKind::Name { .. })
                && ast.ctx(*id) == Some(ExprContext::Store)
        })
        .count();
    assert_eq!(stores, 5);
}

// ----------------------------------------------------------------------
// Statements
// ----------------------------------------------------------------------

#[test]
fn semicolons_make_separate_statements() {
    let ast = parse_module_text("a = 1; b = 2;\nc\n").unwrap();
    assert_eq!(body(&ast).len(), 3);
}

#[test]
fn statement_spans_exclude_newline() {
    let text = "x = f(1,\n      2)\n";
    let ast = parse_module_text(text).unwrap();
    let NodeKind::Module { body } = ast.kind(ast.root()) else {
        unreachable!()
    };
    let stmt = ast.node(body[0]);
    assert_eq!(ast.text(body[0], text), "x = f(1,\n      2)");
    assert_eq!((stmt.lineno, stmt.end_lineno), (1, 2));
}

#[test]
fn compound_statement_spans_cover_body() {
    let text = "if a:\n    b\nelif c:\n    d\nelse:\n    e\n";
    let ast = parse_module_text(text).unwrap();
    let NodeKind::Module { body } = ast.kind(ast.root()) else {
        unreachable!()
    };
    assert_eq!(ast.node(body[0]).end_lineno, 6);
    let NodeKind::If { orelse, .. } = ast.kind(body[0]) else {
        panic!("not an if");
    };
    let elif = ast.node(orelse[0]);
    assert_eq!((elif.lineno, elif.col_offset), (3, 0));
    assert!(ast.text(orelse[0], text).starts_with("elif c:"));
}

#[test]
fn assignment_forms() {
    let ast = parse_module_text("a = b = 1\nx += 2\ny: int = 3\n(z): int\n").unwrap();
    let kinds = body(&ast);
    assert!(matches!(kinds[0], NodeKind::Assign { targets, .. } if targets.len() == 2));
    assert!(matches!(kinds[1], NodeKind::AugAssign { .. }));
    assert!(matches!(kinds[2], NodeKind::AnnAssign { simple: true, .. }));
    assert!(matches!(kinds[3], NodeKind::AnnAssign { simple: false, value: None, .. }));
}

#[test]
fn imports() {
    let ast = parse_module_text(
        "import os.path as p, sys\nfrom ..pkg import (a as b, c,)\nfrom . import *\n",
    )
    .unwrap();
    let kinds = body(&ast);
    let NodeKind::Import { names } = kinds[0] else {
        panic!("not an import");
    };
    assert_eq!(names[0].name, "os.path");
    assert_eq!(names[0].bound_name(), "p");
    assert_eq!(names[1].bound_name(), "sys");
    assert!(matches!(
        kinds[1],
        NodeKind::ImportFrom { level: 2, names, module: Some(m) } if names.len() == 2 && m == "pkg"
    ));
    assert!(matches!(kinds[2], NodeKind::ImportFrom { level: 1, module: None, .. }));
    assert!(parse_module_text("from a import b,\n").is_err());
}

#[test]
fn function_parameters() {
    let ast =
        parse_module_text("def f(a, /, b=1, *args, c, d=2, **kw) -> int:\n    pass\n").unwrap();
    let NodeKind::FunctionDef { args, returns, .. } = body(&ast)[0] else {
        panic!("not a def");
    };
    assert_eq!(args.posonlyargs.len(), 1);
    assert_eq!(args.args.len(), 1);
    assert_eq!(args.defaults.len(), 1);
    assert_eq!(args.vararg.as_ref().map(|a| a.name.as_str()), Some("args"));
    assert_eq!(args.kwonlyargs.len(), 2);
    assert_eq!(args.kw_defaults[0], None);
    assert!(args.kw_defaults[1].is_some());
    assert_eq!(args.kwarg.as_ref().map(|a| a.name.as_str()), Some("kw"));
    assert!(returns.is_some());
}

#[test]
fn try_with_and_async() {
    let text = "\
async def f():
    try:
        async with a as (b, c), d:
            pass
    except E as e:
        pass
    else:
        pass
    finally:
        async for x in y:
            pass
";
    let ast = parse_module_text(text).unwrap();
    let kinds = type_names(&ast);
    for expected in ["AsyncFunctionDef", "Try", "AsyncWith", "ExceptHandler", "AsyncFor"] {
        assert!(kinds.contains(&expected), "missing {}", expected);
    }
}

#[test]
fn parenthesized_with_items() {
    let ast = parse_module_text("with (open(a) as f, open(b) as g):\n    pass\n").unwrap();
    let NodeKind::With { items, .. } = body(&ast)[0] else {
        panic!("not a with");
    };
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.optional_vars.is_some()));
}

#[test]
fn one_line_compound_statements() {
    let ast = parse_module_text("if x: a(); b()\nwhile y: pass\n").unwrap();
    let NodeKind::If { body: if_body, .. } = body(&ast)[0] else {
        panic!("not an if");
    };
    assert_eq!(if_body.len(), 2);
}

#[test]
fn decorators_are_recorded() {
    let text = "@a.b(1)\n@c\nclass K(Base, metaclass=M):\n    x = 1\n";
    let ast = parse_module_text(text).unwrap();
    let NodeKind::Module { body: stmts } = ast.kind(ast.root()) else {
        unreachable!()
    };
    let NodeKind::ClassDef {
        decorators,
        bases,
        keywords,
        ..
    } = ast.kind(stmts[0])
    else {
        panic!("not a class");
    };
    assert_eq!(decorators.len(), 2);
    assert_eq!(bases.len(), 1);
    assert_eq!(keywords[0].arg.as_deref(), Some("metaclass"));
    assert_eq!(ast.node(stmts[0]).lineno, 3);
}

#[test]
fn try_star_handlers() {
    let text = "try:\n    f()\nexcept* ValueError as e:\n    pass\nexcept* (KeyError, OSError):\n    pass\n";
    let ast = parse_module_text(text).unwrap();
    let NodeKind::TryStar { handlers, .. } = body(&ast)[0] else {
        panic!("not a try-star");
    };
    assert_eq!(handlers.len(), 2);
    assert!(matches!(
        ast.kind(handlers[0]),
        NodeKind::ExceptHandler { name: Some(n), .. } if n == "e"
    ));
    assert!(parse_module_text("try:\n    pass\nexcept* ValueError:\n    pass\nexcept E:\n    pass\n").is_err());
}

// ----------------------------------------------------------------------
// Match statements
// ----------------------------------------------------------------------

#[test]
fn match_statement_cases() {
    let text = "\
match command.split():
    case [\"go\", direction]:
        pass
    case [\"drop\", *objects]:
        pass
    case Point(x=0, y=0) | None:
        pass
    case {\"k\": 1, **rest} if rest:
        pass
    case _:
        pass
";
    let ast = parse_module_text(text).unwrap();
    let NodeKind::Match { subject, cases } = body(&ast)[0] else {
        panic!("not a match");
    };
    assert_eq!(ast.text(*subject, text), "command.split()");
    assert_eq!(cases.len(), 5);

    let NodeKind::MatchSequence { patterns } = ast.kind(cases[0].pattern) else {
        panic!("expected a sequence pattern");
    };
    assert!(matches!(ast.kind(patterns[0]), NodeKind::MatchValue { .. }));
    assert!(matches!(
        ast.kind(patterns[1]),
        NodeKind::MatchAs { pattern: None, name: Some(n) } if n == "direction"
    ));

    let NodeKind::MatchSequence { patterns } = ast.kind(cases[1].pattern) else {
        panic!("expected a sequence pattern");
    };
    assert!(matches!(ast.kind(patterns[1]), NodeKind::MatchStar { name: Some(n) } if n == "objects"));

    let NodeKind::MatchOr { patterns } = ast.kind(cases[2].pattern) else {
        panic!("expected an or pattern");
    };
    assert!(matches!(
        ast.kind(patterns[0]),
        NodeKind::MatchClass { kwd_attrs, .. } if kwd_attrs == &["x", "y"]
    ));
    assert!(matches!(
        ast.kind(patterns[1]),
        NodeKind::MatchSingleton { value: ConstantValue::None }
    ));

    assert!(matches!(
        ast.kind(cases[3].pattern),
        NodeKind::MatchMapping { keys, rest: Some(r), .. } if keys.len() == 1 && r == "rest"
    ));
    assert!(cases[3].guard.is_some());
    assert!(matches!(
        ast.kind(cases[4].pattern),
        NodeKind::MatchAs { pattern: None, name: None }
    ));
}

#[test]
fn match_literal_and_value_patterns() {
    let text = "match x:\n    case -1 | 2+3j | 'a' 'b':\n        pass\n    case Color.RED as c:\n        pass\n    case (a, b):\n        pass\n";
    let ast = parse_module_text(text).unwrap();
    let NodeKind::Match { cases, .. } = body(&ast)[0] else {
        panic!("not a match");
    };
    let NodeKind::MatchOr { patterns } = ast.kind(cases[0].pattern) else {
        panic!("expected an or pattern");
    };
    assert!(patterns
        .iter()
        .all(|p| matches!(ast.kind(*p), NodeKind::MatchValue { .. })));

    let NodeKind::MatchAs { pattern: Some(inner), name: Some(name) } = ast.kind(cases[1].pattern)
    else {
        panic!("expected an as pattern");
    };
    assert_eq!(name, "c");
    assert!(matches!(ast.kind(*inner), NodeKind::MatchValue { .. }));
    assert_eq!(ast.text(cases[1].pattern, text), "Color.RED as c");

    assert!(matches!(
        ast.kind(cases[2].pattern),
        NodeKind::MatchSequence { patterns } if patterns.len() == 2
    ));
}

#[test]
fn match_subject_may_be_a_tuple() {
    let ast = parse_module_text("match a, b:\n    case x, y:\n        pass\n").unwrap();
    let NodeKind::Match { subject, cases } = body(&ast)[0] else {
        panic!("not a match");
    };
    assert!(matches!(ast.kind(*subject), NodeKind::Tuple { .. }));
    assert!(matches!(ast.kind(cases[0].pattern), NodeKind::MatchSequence { .. }));
}

#[test]
fn invalid_class_patterns_are_rejected() {
    let err = parse_err("match x:\n    case P(a=1, b):\n        pass\n");
    assert_eq!(err.message(), "positional patterns follow keyword patterns");
    let err = parse_err("match x:\n    case P(a=1, a=2):\n        pass\n");
    assert_eq!(err.message(), "attribute name repeated in class pattern: a");
    let err = parse_err("match x:\n    case [*a, *b]:\n        pass\n");
    assert_eq!(err.message(), "multiple starred names in sequence pattern");
}
