// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! String literal decoding and f-string splitting.

use std::ops::Range;

/// A string token split into its prefix flags and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StringLiteral {
    pub raw: bool,
    pub bytes: bool,
    pub fstring: bool,
    /// Absolute byte range of the text between the quotes.
    pub body: Range<usize>,
}

impl StringLiteral {
    /// Split a complete string token starting at absolute offset `start`.
    pub fn split(token: &str, start: usize) -> Self {
        let prefix_len = token
            .find(|c| c == '\'' || c == '"')
            .unwrap_or(token.len());
        let prefix = token[..prefix_len].to_ascii_lowercase();
        let rest = &token[prefix_len..];
        let quote_len = if rest.len() >= 6 && (rest.starts_with("'''") || rest.starts_with("\"\"\""))
        {
            3
        } else {
            1
        };
        let body_start = start + prefix_len + quote_len;
        let body_end = (start + token.len()).saturating_sub(quote_len).max(body_start);
        StringLiteral {
            raw: prefix.contains('r'),
            bytes: prefix.contains('b'),
            fstring: prefix.contains('f'),
            body: body_start..body_end,
        }
    }
}

/// Decode the escapes of a `str` literal body.
pub(crate) fn decode_str(body: &str, raw: bool) -> Result<String, String> {
    if raw || !body.contains('\\') {
        return Ok(body.to_string());
    }
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = esc.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let width = match esc {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                let value = (digits.len() == width)
                    .then(|| u32::from_str_radix(&digits, 16).ok())
                    .flatten()
                    .ok_or_else(|| format!("truncated \\{}{} escape", esc, "X".repeat(width)))?;
                let ch = char::from_u32(value)
                    .ok_or_else(|| format!("illegal Unicode character \\{}{}", esc, digits))?;
                out.push(ch);
            }
            // Named escapes are kept verbatim; no name table is bundled.
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Decode the escapes of a `bytes` literal body.
pub(crate) fn decode_bytes(body: &str, raw: bool) -> Result<Vec<u8>, String> {
    if !body.is_ascii() {
        return Err("bytes can only contain ASCII literal characters".to_string());
    }
    if raw {
        return Ok(body.as_bytes().to_vec());
    }
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let Some(&esc) = bytes.get(i) else {
            out.push(b'\\');
            break;
        };
        i += 1;
        match esc {
            b'\n' => {}
            b'\r' => {
                if bytes.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(esc - b'0');
                let mut taken = 0;
                while taken < 2 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    taken += 1;
                }
                out.push((value & 0xff) as u8);
            }
            b'x' => {
                let hex = body
                    .get(i..i + 2)
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| "invalid \\x escape".to_string())?;
                out.push(hex);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// One piece of an f-string body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FStringPart {
    Literal(String),
    Field {
        /// Absolute range of the replacement expression.
        expr: Range<usize>,
        conversion: Option<char>,
        /// Absolute range of the format spec, itself an f-string body.
        spec: Option<Range<usize>>,
    },
}

/// Split an f-string body (absolute `range` of `text`) into literal and
/// replacement-field parts. Errors carry a message and absolute offset.
pub(crate) fn split_fstring(
    text: &str,
    range: Range<usize>,
    raw: bool,
) -> Result<Vec<FStringPart>, (String, usize)> {
    let bytes = text.as_bytes();
    let end = range.end;
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut segment_start = range.start;
    let mut i = range.start;

    let flush = |literal: &mut String, from: usize, to: usize| -> Result<(), (String, usize)> {
        if from < to {
            let decoded = decode_str(&text[from..to], raw).map_err(|msg| (msg, from))?;
            literal.push_str(&decoded);
        }
        Ok(())
    };

    while i < end {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') && i + 1 < end => {
                flush(&mut literal, segment_start, i)?;
                literal.push('{');
                i += 2;
                segment_start = i;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') && i + 1 < end => {
                flush(&mut literal, segment_start, i)?;
                literal.push('}');
                i += 2;
                segment_start = i;
            }
            b'}' => {
                return Err(("f-string: single '}' is not allowed".to_string(), i));
            }
            b'{' => {
                flush(&mut literal, segment_start, i)?;
                let field = scan_field(text, i + 1, end)?;
                if let Some(debug_text) = &field.debug_text {
                    literal.push_str(debug_text);
                }
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let conversion = match (field.conversion, &field.spec, &field.debug_text) {
                    (None, None, Some(_)) => Some('r'),
                    (conversion, _, _) => conversion,
                };
                parts.push(FStringPart::Field {
                    expr: field.expr,
                    conversion,
                    spec: field.spec,
                });
                i = field.close + 1;
                segment_start = i;
            }
            b'\\' if !raw => i += 2,
            _ => i += 1,
        }
    }
    flush(&mut literal, segment_start, end.min(i))?;
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

struct Field {
    expr: Range<usize>,
    conversion: Option<char>,
    spec: Option<Range<usize>>,
    debug_text: Option<String>,
    close: usize,
}

/// Scan a replacement field whose expression begins at `start`.
fn scan_field(text: &str, start: usize, end: usize) -> Result<Field, (String, usize)> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    let mut debug_text = None;
    let expr_end;
    loop {
        if i >= end {
            return Err(("f-string: expecting '}'".to_string(), start));
        }
        let b = bytes[i];
        match b {
            b'\'' | b'"' => {
                i = skip_nested_string(bytes, i, end)
                    .ok_or_else(|| ("f-string: unterminated string".to_string(), i))?;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' if depth > 0 => depth -= 1,
            b'}' if depth > 0 => depth -= 1,
            b'}' => {
                expr_end = i;
                break;
            }
            b'!' if depth == 0 && bytes.get(i + 1) != Some(&b'=') => {
                expr_end = i;
                break;
            }
            b':' if depth == 0 => {
                expr_end = i;
                break;
            }
            b'=' if depth == 0
                && bytes.get(i + 1) != Some(&b'=')
                && !matches!(bytes.get(i.wrapping_sub(1)), Some(b'=' | b'!' | b'<' | b'>')) =>
            {
                expr_end = i;
                i += 1;
                while i < end && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                // The echoed text keeps the whitespace around `=`.
                debug_text = Some(text[start..i].to_string());
                break;
            }
            _ => {}
        }
        i += 1;
    }
    if debug_text.is_none() {
        i = expr_end;
    }
    if text[start..expr_end].trim().is_empty() {
        return Err(("f-string: empty expression not allowed".to_string(), start));
    }

    let mut conversion = None;
    if bytes.get(i) == Some(&b'!') {
        match bytes.get(i + 1) {
            Some(c @ (b's' | b'r' | b'a')) if i + 1 < end => conversion = Some(*c as char),
            _ => {
                return Err((
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'".to_string(),
                    i,
                ))
            }
        }
        i += 2;
    }

    let mut spec = None;
    if bytes.get(i) == Some(&b':') && i < end {
        let spec_start = i + 1;
        let mut depth = 0usize;
        let mut j = spec_start;
        loop {
            if j >= end {
                return Err(("f-string: expecting '}'".to_string(), start));
            }
            match bytes[j] {
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                b'}' => break,
                _ => {}
            }
            j += 1;
        }
        spec = Some(spec_start..j);
        i = j;
    }

    if i >= end || bytes[i] != b'}' {
        return Err(("f-string: expecting '}'".to_string(), i.min(end)));
    }
    Ok(Field {
        expr: start..expr_end,
        conversion,
        spec,
        debug_text,
        close: i,
    })
}

/// Skip a string literal inside a replacement field; returns the offset
/// just past its closing quote.
fn skip_nested_string(bytes: &[u8], start: usize, end: usize) -> Option<usize> {
    let quote = bytes[start];
    let triple = start + 2 < end && bytes[start + 1] == quote && bytes[start + 2] == quote;
    let mut i = start + if triple { 3 } else { 1 };
    while i < end {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if !triple {
                return Some(i + 1);
            }
            if i + 2 < end && bytes[i + 1] == quote && bytes[i + 2] == quote {
                return Some(i + 3);
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_prefix_and_quotes() {
        let lit = StringLiteral::split("rb'''abc'''", 10);
        assert!(lit.raw && lit.bytes && !lit.fstring);
        assert_eq!(lit.body, 15..18);
        let lit = StringLiteral::split("''", 0);
        assert_eq!(lit.body, 1..1);
        let lit = StringLiteral::split("F'x'", 0);
        assert!(lit.fstring);
    }

    #[test]
    fn str_escapes() {
        assert_eq!(decode_str(r"a\tb\n\x41é\101", false).unwrap(), "a\tb\nAéA");
        assert_eq!(decode_str(r"a\tb", true).unwrap(), r"a\tb");
        assert_eq!(decode_str(r"\d", false).unwrap(), r"\d");
        assert!(decode_str(r"\x4", false).is_err());
    }

    #[test]
    fn bytes_escapes() {
        assert_eq!(decode_bytes(r"\x00\xff\n", false).unwrap(), vec![0, 255, b'\n']);
        assert!(decode_bytes("é", false).is_err());
    }

    #[test]
    fn fstring_parts() {
        let text = "f'a{{b}} {x!r:>{width}} c'";
        let parts = split_fstring(text, 2..text.len() - 1, false).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], FStringPart::Literal("a{b} ".to_string()));
        let FStringPart::Field {
            expr,
            conversion,
            spec,
        } = &parts[1]
        else {
            panic!("expected a field");
        };
        assert_eq!(&text[expr.clone()], "x");
        assert_eq!(*conversion, Some('r'));
        assert_eq!(&text[spec.clone().unwrap()], ">{width}");
        assert_eq!(parts[2], FStringPart::Literal(" c".to_string()));
    }

    #[test]
    fn fstring_debug_specifier() {
        let text = "f'{x = }'";
        let parts = split_fstring(text, 2..text.len() - 1, false).unwrap();
        assert_eq!(parts[0], FStringPart::Literal("x = ".to_string()));
        assert!(matches!(
            parts[1],
            FStringPart::Field {
                conversion: Some('r'),
                ..
            }
        ));
    }

    #[test]
    fn fstring_nested_brackets_and_strings() {
        let text = "f'{d[\"}\"]} {a != b}'";
        let parts = split_fstring(text, 2..text.len() - 1, false).unwrap();
        let exprs: Vec<_> = parts
            .iter()
            .filter_map(|p| match p {
                FStringPart::Field { expr, .. } => Some(&text[expr.clone()]),
                _ => None,
            })
            .collect();
        assert_eq!(exprs, ["d[\"}\"]", "a != b"]);
    }

    #[test]
    fn fstring_errors() {
        let text = "f'a}b'";
        assert!(split_fstring(text, 2..5, false).is_err());
        let text = "f'{}'";
        assert!(split_fstring(text, 2..4, false).is_err());
    }
}
