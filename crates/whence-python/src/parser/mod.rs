// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Parser producing an arena [`Ast`].
//!
//! A PEG grammar (`grammar.rs`, built with `peg`) covers the runtime's
//! syntax from 3.8 through 3.11 and produces owned syntax (`deflated.rs`);
//! `inflate.rs` lowers that into the arena and runs the checks that need
//! context. Literal decoding lives in `strings.rs`. Node spans follow the
//! runtime's positions: a node starts at the first token of its rule and ends
//! at the last one, so a parenthesized operand keeps its own span while an
//! enclosing operation includes the parentheses.

mod deflated;
pub mod errors;
mod grammar;
mod inflate;
pub(crate) mod strings;

use std::ops::Range;

use whence_core::LineIndex;

use crate::nodes::Ast;
use crate::tokenizer::{TokConfig, TokError, TokState, TokType, Token};
use deflated::Expr;
use grammar::{python, TokPosition, TokVec};
use inflate::Inflater;

pub use errors::{ParserError, Result};

/// Reserved words; never valid as identifiers.
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Tokenize `range` of `text`, converting errors to [`ParserError`].
pub(crate) fn tokenize_range<'a>(
    text: &'a str,
    index: &LineIndex,
    range: Range<usize>,
    config: &TokConfig,
) -> Result<Vec<Token<'a>>> {
    TokState::with_range(text, range, config)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|error| tokenizer_error(index, error))
}

pub(crate) fn tokenizer_error(index: &LineIndex, error: TokError) -> ParserError {
    let (line, column) = index.position(error.offset());
    ParserError::TokenizerError {
        error,
        line,
        column,
    }
}

/// Turn the grammar's furthest failure into a syntax error at that token.
fn grammar_error(index: &LineIndex, err: peg::error::ParseError<TokPosition>) -> ParserError {
    let TokPosition {
        offset,
        kind,
        found,
    } = err.location;
    let message = if kind == TokType::Indent {
        "unexpected indent".to_string()
    } else if err.expected.tokens().eq(["indent"]) {
        format!("expected an indented block, found {}", found)
    } else {
        format!("invalid syntax: expected {}, found {}", err.expected, found)
    };
    let (line, column) = index.position(offset);
    ParserError::SyntaxError {
        message,
        offset,
        line,
        column,
    }
}

/// Parse a whole module.
pub fn parse_module_text(text: &str) -> Result<Ast> {
    let index = LineIndex::new(text);
    let start = if text.starts_with('\u{feff}') { 3 } else { 0 };
    let tokens = tokenize_range(text, &index, start..text.len(), &TokConfig::default())?;
    let input = TokVec::new(tokens);
    let body = python::file(&input, &input.offsets()).map_err(|err| grammar_error(&index, err))?;
    let mut inflater = Inflater::new(text, &index);
    let root = inflater.module(&body)?;
    Ok(inflater.finish(root))
}

/// Parse a single expression; the tree's root is the expression node.
pub fn parse_expression_text(text: &str) -> Result<Ast> {
    let index = LineIndex::new(text);
    let tokens = tokenize_range(text, &index, 0..text.len(), &TokConfig { nested: true })?;
    let expr = parse_expression_tokens(&index, tokens)?;
    let mut inflater = Inflater::new(text, &index);
    let root = inflater.expr(&expr)?;
    Ok(inflater.finish(root))
}

/// Run the expression grammar over already tokenized input. Used for whole
/// expressions and for f-string replacement fields.
pub(crate) fn parse_expression_tokens<'a>(
    index: &LineIndex,
    tokens: Vec<Token<'a>>,
) -> Result<Expr<'a>> {
    let input = TokVec::new(tokens);
    python::expression_input(&input, &input.offsets()).map_err(|err| grammar_error(index, err))
}

#[cfg(test)]
mod tests;
