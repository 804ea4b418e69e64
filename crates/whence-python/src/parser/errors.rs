// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::tokenizer::TokError;
use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParserError {
    #[error("tokenizer error: {error} (line {line}, column {column})")]
    TokenizerError {
        error: TokError,
        line: u32,
        column: u32,
    },
    #[error("syntax error: {message} (line {line}, column {column})")]
    SyntaxError {
        message: String,
        offset: usize,
        line: u32,
        column: u32,
    },
}

impl ParserError {
    /// Byte offset into the source the error points at.
    pub fn offset(&self) -> usize {
        match self {
            ParserError::TokenizerError { error, .. } => error.offset(),
            ParserError::SyntaxError { offset, .. } => *offset,
        }
    }

    /// 1-indexed line of the error.
    pub fn line(&self) -> u32 {
        match self {
            ParserError::TokenizerError { line, .. } | ParserError::SyntaxError { line, .. } => {
                *line
            }
        }
    }

    /// Human-readable description without the position suffix.
    pub fn message(&self) -> String {
        match self {
            ParserError::TokenizerError { error, .. } => error.to_string(),
            ParserError::SyntaxError { message, .. } => message.clone(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParserError>;
