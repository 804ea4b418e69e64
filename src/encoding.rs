//! Source decoding with PEP 263 encoding declarations.
//!
//! A declaration is a comment matching `coding[:=]\s*([-\w.]+)` on the first
//! line, or on the second line when the first is blank or a comment. A UTF-8
//! byte order mark is stripped and only agrees with a UTF-8 declaration.
//! Without either, the bytes must be UTF-8.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::error::SourceError;

static COOKIE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)^[ \t\x0c]*#.*?coding[:=][ \t]*([-\w.]+)").expect("static regex")
});

static BLANK_OR_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^[ \t\x0c]*(?:[#\r\n]|$)").expect("static regex"));

const BOM: &[u8] = b"\xef\xbb\xbf";

/// Decoded source text and how it was decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// Normalized encoding name, e.g. `"utf-8"` or `"iso-8859-1"`.
    pub encoding: String,
    /// Whether the bytes began with a UTF-8 byte order mark.
    pub bom: bool,
}

/// Canonical spelling of an encoding name, so that `UTF8`, `utf_8` and
/// `utf-8-sig` all compare equal to `utf-8`.
pub fn normalize_encoding(name: &str) -> String {
    let head: String = name
        .chars()
        .take(12)
        .map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() })
        .collect();
    if head == "utf-8" || head == "utf8" || head.starts_with("utf-8-") {
        return "utf-8".to_string();
    }
    for latin in ["latin-1", "latin1", "iso-8859-1", "iso-latin-1"] {
        if head == latin || head.starts_with(&format!("{}-", latin)) {
            return "iso-8859-1".to_string();
        }
    }
    name.to_string()
}

/// The declared encoding, if the first two lines carry a declaration.
pub fn find_cookie(bytes: &[u8]) -> Option<String> {
    let mut lines = bytes.split_inclusive(|b| *b == b'\n');
    let first = lines.next()?;
    let first = first.strip_prefix(BOM).unwrap_or(first);
    if let Some(name) = cookie_name(first) {
        return Some(name);
    }
    if !BLANK_OR_COMMENT.is_match(first) {
        return None;
    }
    lines.next().and_then(cookie_name)
}

fn cookie_name(line: &[u8]) -> Option<String> {
    let captures = COOKIE.captures(line)?;
    let name = std::str::from_utf8(captures.get(1)?.as_bytes()).ok()?;
    Some(normalize_encoding(name))
}

/// Decode the bytes of `filename`.
///
/// # Errors
///
/// - [`SourceError::Decode`] when the bytes are invalid under a declared
///   encoding.
/// - [`SourceError::Syntax`] for undeclared non-UTF-8 bytes, an unknown
///   declared encoding, or a byte order mark contradicting the declaration.
pub fn decode_source(filename: &str, bytes: &[u8]) -> Result<Decoded, SourceError> {
    let bom = bytes.starts_with(BOM);
    let cookie = find_cookie(bytes);
    let body = if bom { &bytes[BOM.len()..] } else { bytes };
    let syntax = |message: String| SourceError::Syntax {
        filename: filename.to_string(),
        line: 1,
        message,
    };

    let Some(encoding) = cookie else {
        let text = decode_with(encoding_rs::UTF_8, body).ok_or_else(|| {
            syntax("non-UTF-8 bytes and no encoding declared".to_string())
        })?;
        return Ok(Decoded {
            text: text.into_owned(),
            encoding: "utf-8".to_string(),
            bom,
        });
    };

    if bom && encoding != "utf-8" {
        return Err(syntax(format!("encoding problem: {} with BOM", encoding)));
    }
    let decode_error = || SourceError::Decode {
        filename: filename.to_string(),
        encoding: encoding.clone(),
    };
    let text: String = match encoding.as_str() {
        "iso-8859-1" => body.iter().map(|b| char::from(*b)).collect(),
        "ascii" | "us-ascii" => {
            if !body.is_ascii() {
                return Err(decode_error());
            }
            body.iter().map(|b| char::from(*b)).collect()
        }
        label => {
            let codec = encoding_rs::Encoding::for_label(label.as_bytes())
                .ok_or_else(|| syntax(format!("unknown encoding: {}", label)))?;
            decode_with(codec, body).ok_or_else(decode_error)?.into_owned()
        }
    };
    Ok(Decoded {
        text,
        encoding,
        bom,
    })
}

fn decode_with<'a>(codec: &'static encoding_rs::Encoding, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
    codec.decode_without_bom_handling_and_without_replacement(bytes)
}
