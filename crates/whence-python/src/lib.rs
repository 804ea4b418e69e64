// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! A Python parser producing an arena syntax tree.
//!
//! # Overview
//!
//! - **Parsing**: [`parse_module`] turns decoded source text into an [`Ast`]
//!   whose nodes carry runtime-compatible positions (1-indexed lines,
//!   0-indexed byte columns, exact byte spans).
//! - **Annotation**: [`Annotations::build`] links every node to its parent
//!   and indexes statements by the lines they occupy.
//! - **Qualified names**: [`Qualnames::build`] derives the dotted nesting
//!   path the runtime gives every function, class, lambda and comprehension.
//! - **Traversal**: the [`Visitor`] trait and [`walk`] drive depth-first
//!   walks in source order.
//!
//! # Quick Start
//!
//! ```
//! use whence_python::{parse_module, Annotations};
//!
//! let source = "x = 1; y = f(x)\n";
//! let ast = parse_module(source).expect("parse error");
//! let annotations = Annotations::build(&ast);
//! assert_eq!(annotations.statements_at_line(1).len(), 2);
//! ```

use std::cmp::min;

pub mod nodes;
pub use nodes::*;

pub mod tokenizer;
use tokenizer::{TokConfig, TokState, Token};

mod parser;
pub use parser::{is_keyword, ParserError, Result, KEYWORDS};

pub mod visitor;
pub use visitor::{walk, walk_node, Annotations, Qualnames, VisitResult, Visitor};

/// Tokenizes Python source code.
///
/// This is a low-level function. Most users should use [`parse_module`].
pub fn tokenize(text: &str) -> Result<Vec<Token<'_>>> {
    let index = whence_core::LineIndex::new(text);
    TokState::new(text, &TokConfig::default())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|error| parser::tokenizer_error(&index, error))
}

/// Parses a Python module. A leading byte order mark is skipped; node
/// positions still count it.
///
/// ```
/// use whence_python::parse_module;
///
/// let ast = parse_module("def f():\n    return 1\n").expect("parse error");
/// assert_eq!(ast.kind(ast.root()).type_name(), "Module");
/// ```
pub fn parse_module(text: &str) -> Result<Ast> {
    parser::parse_module_text(text)
}

/// Parses a single expression. The tree's root is the expression itself.
///
/// ```
/// use whence_python::parse_expression;
///
/// let ast = parse_expression("a.b(c)").expect("parse error");
/// assert_eq!(ast.kind(ast.root()).type_name(), "Call");
/// ```
pub fn parse_expression(text: &str) -> Result<Ast> {
    parser::parse_expression_text(text)
}

// ============================================================================
// Error formatting
// ============================================================================

/// Returns the byte offset of the beginning of line `n` (1-indexed).
fn bol_offset(source: &str, n: i64) -> usize {
    if n <= 1 {
        return 0;
    }
    source
        .match_indices('\n')
        .nth((n - 2) as usize)
        .map(|(index, _)| index + 1)
        .unwrap_or_else(|| source.len())
}

/// Formats a parser error with the offending source line and one line of
/// context on each side.
///
/// ```
/// use whence_python::{parse_module, prettify_error};
///
/// let source = "x = (1,\n";
/// if let Err(e) = parse_module(source) {
///     let formatted = prettify_error(&e, source, "example.py");
///     assert!(formatted.contains("example.py"));
/// }
/// ```
pub fn prettify_error(err: &ParserError, source: &str, label: &str) -> String {
    use annotate_snippets::{Level, Renderer, Snippet};

    let context = 1;
    let line = err.line() as i64;
    let line_start = (line - context).max(1);
    let start_offset = bol_offset(source, line - context);
    let end_offset = bol_offset(source, line + context + 1);
    let snippet = &source[start_offset..end_offset];
    let start = err.offset().clamp(start_offset, end_offset) - start_offset;
    let end = min(start + 1, snippet.len().max(start));
    let message = err.message();
    let rendered = Renderer::plain()
        .render(
            Level::Error.title(label).snippet(
                Snippet::source(snippet)
                    .line_start(line_start as usize)
                    .fold(false)
                    .annotations(vec![Level::Error.span(start..end).label(&message)]),
            ),
        )
        .to_string();
    rendered
}
