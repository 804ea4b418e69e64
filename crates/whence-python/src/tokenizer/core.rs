// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Line-oriented Python tokenizer.
//!
//! Produces the logical token stream the parser consumes: `NEWLINE` only at
//! the end of logical lines, `INDENT`/`DEDENT` from the indentation stack,
//! and nothing for comments, blank lines, explicit line joins or newlines
//! inside brackets. Token positions are byte offsets into the full source
//! text, even when only a sub-range is being tokenized (f-string
//! replacement fields are tokenized in place this way).
//!
//! Names, numbers and operators are recognized with anchored regular
//! expressions; string bodies and comments are scanned with `memchr`.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::LazyLock;

use memchr::{memchr, memchr2, memchr3};
use regex::Regex;
use thiserror::Error;

/// Token categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokType {
    /// Identifiers and keywords.
    Name,
    Number,
    /// A complete string literal, prefix and quotes included.
    String,
    Op,
    Newline,
    Indent,
    Dedent,
    EndMarker,
}

/// A token and its byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokType,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl Token<'_> {
    /// True for an operator or delimiter spelled `op`.
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokType::Op && self.text == op
    }

    /// True for a name token spelled `word`, keyword or not.
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokType::Name && self.text == word
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokConfig {
    /// Tokenize as if already inside brackets: newlines are insignificant
    /// and no indentation tokens are produced.
    pub nested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokError {
    #[error("unterminated string literal")]
    UnterminatedString { offset: usize },
    #[error("unterminated triple-quoted string literal")]
    UnterminatedTripleQuotedString { offset: usize },
    #[error("invalid character {ch:?}")]
    BadCharacter { ch: char, offset: usize },
    #[error("unindent does not match any outer indentation level")]
    InconsistentDedent { offset: usize },
    /// A numeric literal running straight into a name or a stray `_`.
    #[error("invalid {kind} literal")]
    InvalidNumber { kind: &'static str, offset: usize },
}

impl TokError {
    /// Byte offset the error points at.
    pub fn offset(&self) -> usize {
        match self {
            TokError::UnterminatedString { offset }
            | TokError::UnterminatedTripleQuotedString { offset }
            | TokError::BadCharacter { offset, .. }
            | TokError::InconsistentDedent { offset }
            | TokError::InvalidNumber { offset, .. } => *offset,
        }
    }
}

const TAB_SIZE: usize = 8;

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

/// Keywords allowed to follow a number without whitespace (`1if x else 2`).
const NUMBER_FOLLOWERS: &[&str] = &["and", "else", "for", "if", "in", "is", "not", "or"];

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A[\p{XID_Start}_]\p{XID_Continue}*").unwrap());

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    let digits = r"[0-9](?:_?[0-9])*";
    let exponent = format!(r"[eE][-+]?{digits}");
    Regex::new(&format!(
        r"\A(?:(?:{digits}\.(?:{digits})?|\.{digits})(?:{exponent})?[jJ]?|{digits}{exponent}[jJ]?|0[xX](?:_?[0-9a-fA-F])+|0[oO](?:_?[0-7])+|0[bB](?:_?[01])+|{digits}[jJ]?)"
    ))
    .unwrap()
});

static OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\A(?:\*\*=|//=|>>=|<<=|\.\.\.|!=|%=|&=|\*\*|\*=|\+=|-=|->|//|/=|:=|<<|<=|==|>=|>>|@=|\^=|\|=|[%&()*+,\-./:;<=>@\[\]^{|}~])",
    )
    .unwrap()
});

/// Tokenizer state. Iterate it to get tokens; the stream always ends with
/// [`TokType::EndMarker`] unless an error is returned first.
pub struct TokState<'a> {
    text: &'a str,
    pos: usize,
    end: usize,
    nested: bool,
    paren_depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    last_was_newline: bool,
    pending: VecDeque<Token<'a>>,
    done: bool,
}

impl<'a> TokState<'a> {
    pub fn new(text: &'a str, config: &TokConfig) -> Self {
        Self::with_range(text, 0..text.len(), config)
    }

    /// Tokenize only `range` of `text`, reporting absolute offsets.
    pub fn with_range(text: &'a str, range: Range<usize>, config: &TokConfig) -> Self {
        TokState {
            text,
            pos: range.start,
            end: range.end.min(text.len()),
            nested: config.nested,
            paren_depth: 0,
            indents: vec![0],
            at_line_start: !config.nested,
            last_was_newline: true,
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..self.end]
    }

    fn bytes(&self) -> &'a [u8] {
        &self.text.as_bytes()[..self.end]
    }

    fn token(&self, kind: TokType, start: usize, end: usize) -> Token<'a> {
        Token {
            kind,
            text: &self.text[start..end],
            start,
            end,
        }
    }

    fn significant_newlines(&self) -> bool {
        !self.nested && self.paren_depth == 0
    }

    /// Measure the indentation of the line starting at `pos`, skipping blank
    /// and comment-only lines. Queues INDENT/DEDENT tokens as needed.
    fn handle_line_start(&mut self) -> Result<(), TokError> {
        loop {
            let line_start = self.pos;
            let mut col = 0usize;
            while let Some(&b) = self.bytes().get(self.pos) {
                match b {
                    b' ' => col += 1,
                    b'\t' => col = (col / TAB_SIZE + 1) * TAB_SIZE,
                    b'\x0c' => col = 0,
                    _ => break,
                }
                self.pos += 1;
            }
            match self.bytes().get(self.pos) {
                None => {
                    self.pos = self.end;
                    self.at_line_start = false;
                    return Ok(());
                }
                Some(b'#') | Some(b'\n') | Some(b'\r') => {
                    self.skip_to_line_end();
                    self.skip_newline();
                    continue;
                }
                Some(b'\\') if self.continuation_at(self.pos) => {
                    // Indentation comes from the joined line.
                    self.pos = line_start;
                    self.at_line_start = false;
                    return Ok(());
                }
                Some(_) => {}
            }

            let current = *self.indents.last().unwrap_or(&0);
            if col > current {
                self.indents.push(col);
                self.pending
                    .push_back(self.token(TokType::Indent, self.pos, self.pos));
            } else if col < current {
                while col < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    self.pending
                        .push_back(self.token(TokType::Dedent, self.pos, self.pos));
                }
                if col != *self.indents.last().unwrap_or(&0) {
                    return Err(TokError::InconsistentDedent { offset: self.pos });
                }
            }
            self.at_line_start = false;
            return Ok(());
        }
    }

    fn skip_to_line_end(&mut self) {
        self.pos = match memchr2(b'\n', b'\r', &self.bytes()[self.pos..]) {
            Some(rel) => self.pos + rel,
            None => self.end,
        };
    }

    fn skip_newline(&mut self) {
        let rest = &self.bytes()[self.pos..];
        if rest.starts_with(b"\r\n") {
            self.pos += 2;
        } else if rest.starts_with(b"\n") || rest.starts_with(b"\r") {
            self.pos += 1;
        }
    }

    fn continuation_at(&self, offset: usize) -> bool {
        let rest = &self.bytes()[offset..];
        rest.starts_with(b"\\\n") || rest.starts_with(b"\\\r")
    }

    fn next_token(&mut self) -> Result<Token<'a>, TokError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            if self.at_line_start {
                self.handle_line_start()?;
                continue;
            }

            let Some(ch) = self.peek_char() else {
                return Ok(self.finish());
            };
            let start = self.pos;
            match ch {
                ' ' | '\t' | '\x0c' => {
                    self.pos += 1;
                }
                '\\' if self.continuation_at(start) => {
                    self.pos += 1;
                    self.skip_newline();
                }
                '#' => self.skip_to_line_end(),
                '\n' | '\r' => {
                    self.skip_newline();
                    if self.significant_newlines() {
                        self.at_line_start = true;
                        return Ok(self.token(TokType::Newline, start, start));
                    }
                }
                '"' | '\'' => return self.string(start, start),
                _ => {
                    if let Some(len) = NUMBER.find(self.rest()).map(|m| m.end()) {
                        return self.number(start, len);
                    }
                    if let Some(len) = NAME.find(self.rest()).map(|m| m.end()) {
                        return self.name_or_string(start, len);
                    }
                    return self.operator(start, ch);
                }
            }
        }
    }

    fn finish(&mut self) -> Token<'a> {
        let at = self.end;
        if !self.nested && !self.last_was_newline {
            self.last_was_newline = true;
            self.pending.push_back(self.token(TokType::Newline, at, at));
        }
        if !self.nested {
            while self.indents.len() > 1 {
                self.indents.pop();
                self.pending.push_back(self.token(TokType::Dedent, at, at));
            }
        }
        self.pending.push_back(self.token(TokType::EndMarker, at, at));
        self.at_line_start = false;
        self.pending
            .pop_front()
            .unwrap_or_else(|| self.token(TokType::EndMarker, at, at))
    }

    fn name_or_string(&mut self, start: usize, len: usize) -> Result<Token<'a>, TokError> {
        self.pos += len;
        let word = &self.text[start..self.pos];
        if matches!(self.bytes().get(self.pos), Some(b'"') | Some(b'\''))
            && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
        {
            return self.string(start, self.pos);
        }
        Ok(self.token(TokType::Name, start, self.pos))
    }

    /// A numeric literal of `len` bytes. Anything identifier-like directly
    /// after it, other than a keyword, makes the literal invalid.
    fn number(&mut self, start: usize, len: usize) -> Result<Token<'a>, TokError> {
        self.pos += len;
        let rest = self.rest();
        let runs_on = rest
            .chars()
            .next()
            .is_some_and(|c| c == '_' || c.is_alphanumeric());
        if runs_on && !NUMBER_FOLLOWERS.iter().any(|kw| rest.starts_with(kw)) {
            let literal = &self.text[start..];
            let kind = match literal.as_bytes().get(..2) {
                Some(b"0x") | Some(b"0X") => "hexadecimal",
                Some(b"0o") | Some(b"0O") => "octal",
                Some(b"0b") | Some(b"0B") => "binary",
                _ => "decimal",
            };
            return Err(TokError::InvalidNumber {
                kind,
                offset: start,
            });
        }
        Ok(self.token(TokType::Number, start, self.pos))
    }

    /// Scan a string literal whose quote starts at `quote_start`; `start` is
    /// where its prefix began.
    fn string(&mut self, start: usize, quote_start: usize) -> Result<Token<'a>, TokError> {
        let bytes = self.bytes();
        let quote = bytes[quote_start];
        let triple =
            bytes.get(quote_start + 1) == Some(&quote) && bytes.get(quote_start + 2) == Some(&quote);
        let unterminated = if triple {
            TokError::UnterminatedTripleQuotedString { offset: start }
        } else {
            TokError::UnterminatedString { offset: start }
        };
        let mut i = quote_start + if triple { 3 } else { 1 };
        loop {
            if i >= bytes.len() {
                return Err(unterminated);
            }
            let window = &bytes[i..];
            let found = if triple {
                memchr2(quote, b'\\', window)
            } else {
                memchr3(quote, b'\\', b'\n', window)
            };
            let Some(rel) = found else {
                return Err(unterminated);
            };
            if !triple && memchr(b'\r', &window[..rel]).is_some() {
                return Err(unterminated);
            }
            let at = i + rel;
            match bytes[at] {
                b'\\' if bytes.get(at + 1) == Some(&b'\r') && bytes.get(at + 2) == Some(&b'\n') => {
                    i = at + 3
                }
                b'\\' => i = at + 2,
                b'\n' => return Err(unterminated),
                _ if !triple => {
                    i = at + 1;
                    break;
                }
                _ if bytes.get(at + 1) == Some(&quote) && bytes.get(at + 2) == Some(&quote) => {
                    i = at + 3;
                    break;
                }
                _ => i = at + 1,
            }
        }
        self.pos = i;
        Ok(self.token(TokType::String, start, self.pos))
    }

    fn operator(&mut self, start: usize, ch: char) -> Result<Token<'a>, TokError> {
        let Some(len) = OPERATOR.find(self.rest()).map(|m| m.end()) else {
            return Err(TokError::BadCharacter { ch, offset: start });
        };
        match ch {
            '(' | '[' | '{' => self.paren_depth += 1,
            ')' | ']' | '}' => self.paren_depth = self.paren_depth.saturating_sub(1),
            _ => {}
        }
        self.pos += len;
        Ok(self.token(TokType::Op, start, self.pos))
    }
}

impl<'a> Iterator for TokState<'a> {
    type Item = Result<Token<'a>, TokError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) => match token.kind {
                TokType::EndMarker => self.done = true,
                TokType::Newline => self.last_was_newline = true,
                TokType::Indent | TokType::Dedent => {}
                _ => self.last_was_newline = false,
            },
            Err(_) => self.done = true,
        }
        Some(result)
    }
}
