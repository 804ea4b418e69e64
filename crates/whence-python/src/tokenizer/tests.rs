// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::tokenizer::core::{TokConfig, TokError, TokState, TokType};

fn tokenize_with_end_marker<'a>(
    text: &'a str,
    config: &TokConfig,
) -> Result<Vec<(TokType, &'a str)>, TokError> {
    TokState::new(text, config)
        .map(|tok| tok.map(|tok| (tok.kind, tok.text)))
        .collect()
}

fn tokenize_all(text: &str) -> Result<Vec<(TokType, &str)>, TokError> {
    let mut result = tokenize_with_end_marker(text, &TokConfig::default())?;
    assert_eq!(result.pop().expect("EndMarker").0, TokType::EndMarker);
    if let Some((TokType::Newline, "")) = result.last() {
        result.pop();
    }
    Ok(result)
}

#[test]
fn test_identifier() {
    assert_eq!(
        tokenize_all("test input"),
        Ok(vec![(TokType::Name, "test"), (TokType::Name, "input")])
    );
    assert_eq!(
        tokenize_all("__with_underscores"),
        Ok(vec![(TokType::Name, "__with_underscores")])
    );
    assert_eq!(tokenize_all("ñandú"), Ok(vec![(TokType::Name, "ñandú")]));
}

#[test]
fn test_operators_longest_match() {
    assert_eq!(
        tokenize_all("a **= b // c ... d != e"),
        Ok(vec![
            (TokType::Name, "a"),
            (TokType::Op, "**="),
            (TokType::Name, "b"),
            (TokType::Op, "//"),
            (TokType::Name, "c"),
            (TokType::Op, "..."),
            (TokType::Name, "d"),
            (TokType::Op, "!="),
            (TokType::Name, "e"),
        ])
    );
}

#[test]
fn test_numbers() {
    let tokens = tokenize_all("1 0x_ff 1_000.5e-3 .5 3j 1.").unwrap();
    let numbers: Vec<_> = tokens.iter().map(|(_, text)| *text).collect();
    assert_eq!(numbers, ["1", "0x_ff", "1_000.5e-3", ".5", "3j", "1."]);
    assert!(tokens.iter().all(|(kind, _)| *kind == TokType::Number));
}

#[test]
fn test_strings_and_prefixes() {
    assert_eq!(
        tokenize_all(r#"rb'\x' f"{a}" '''x\ny''' u'z'"#),
        Ok(vec![
            (TokType::String, r"rb'\x'"),
            (TokType::String, r#"f"{a}""#),
            (TokType::String, r"'''x\ny'''"),
            (TokType::String, "u'z'"),
        ])
    );
}

#[test]
fn test_escaped_quote() {
    assert_eq!(
        tokenize_all(r#"'it\'s'"#),
        Ok(vec![(TokType::String, r#"'it\'s'"#)])
    );
}

#[test]
fn test_unterminated_strings() {
    assert_eq!(
        tokenize_all("x = 'abc\n"),
        Err(TokError::UnterminatedString { offset: 4 })
    );
    assert_eq!(
        tokenize_all("x = '''abc\n"),
        Err(TokError::UnterminatedTripleQuotedString { offset: 4 })
    );
}

#[test]
fn test_bad_character() {
    assert_eq!(
        tokenize_all("a $ b"),
        Err(TokError::BadCharacter { ch: '$', offset: 2 })
    );
}

#[test]
fn test_indentation() {
    let tokens = tokenize_all("if x:\n    y\n\n    # comment\n    z\nw\n").unwrap();
    let kinds: Vec<_> = tokens.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(
        kinds,
        [
            TokType::Name,
            TokType::Name,
            TokType::Op,
            TokType::Newline,
            TokType::Indent,
            TokType::Name,
            TokType::Newline,
            TokType::Name,
            TokType::Newline,
            TokType::Dedent,
            TokType::Name,
        ]
    );
}

#[test]
fn test_dedent_at_eof() {
    let tokens = tokenize_with_end_marker("def f():\n    pass", &TokConfig::default()).unwrap();
    let tail: Vec<_> = tokens[tokens.len() - 3..].iter().map(|(kind, _)| *kind).collect();
    assert_eq!(tail, [TokType::Newline, TokType::Dedent, TokType::EndMarker]);
}

#[test]
fn test_inconsistent_dedent() {
    assert_eq!(
        tokenize_all("if x:\n    y\n  z\n"),
        Err(TokError::InconsistentDedent { offset: 14 })
    );
}

#[test]
fn test_newlines_inside_brackets_ignored() {
    let tokens = tokenize_all("f(a,\n  b)\n").unwrap();
    assert!(!tokens[..tokens.len() - 1]
        .iter()
        .any(|(kind, _)| *kind == TokType::Newline));
}

#[test]
fn test_line_continuation() {
    assert_eq!(
        tokenize_all("a = \\\n    b"),
        Ok(vec![
            (TokType::Name, "a"),
            (TokType::Op, "="),
            (TokType::Name, "b"),
        ])
    );
}

#[test]
fn test_range_reports_absolute_offsets() {
    let text = "f'{a + b}'";
    let tokens: Vec<_> = TokState::with_range(text, 3..8, &TokConfig { nested: true })
        .collect::<Result<_, _>>()
        .unwrap();
    let spans: Vec<_> = tokens.iter().map(|t| (t.text, t.start)).collect();
    assert_eq!(spans, [("a", 3), ("+", 5), ("b", 7), ("", 8)]);
}

#[test]
fn test_invalid_number_endings() {
    assert_eq!(
        tokenize_all("x = 1_000_\n"),
        Err(TokError::InvalidNumber {
            kind: "decimal",
            offset: 4
        })
    );
    assert_eq!(
        tokenize_all("1abc"),
        Err(TokError::InvalidNumber {
            kind: "decimal",
            offset: 0
        })
    );
    assert_eq!(
        tokenize_all("0x"),
        Err(TokError::InvalidNumber {
            kind: "hexadecimal",
            offset: 0
        })
    );
    assert_eq!(
        TokError::InvalidNumber {
            kind: "decimal",
            offset: 0
        }
        .to_string(),
        "invalid decimal literal"
    );
}

#[test]
fn test_keyword_may_follow_number() {
    assert_eq!(
        tokenize_all("1if x else 2"),
        Ok(vec![
            (TokType::Number, "1"),
            (TokType::Name, "if"),
            (TokType::Name, "x"),
            (TokType::Name, "else"),
            (TokType::Number, "2"),
        ])
    );
}

#[test]
fn test_comment_runs_to_line_end() {
    assert_eq!(
        tokenize_all("a # b 'c\nd"),
        Ok(vec![
            (TokType::Name, "a"),
            (TokType::Newline, ""),
            (TokType::Name, "d"),
        ])
    );
}
