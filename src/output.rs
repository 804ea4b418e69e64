//! JSON output types for the CLI.
//!
//! Every response is a single JSON document on stdout with `status` first
//! and a schema version, so callers can parse output without looking at the
//! exit code first.

use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use whence_bytecode::RuntimeVersion;

use crate::error::{OutputErrorCode, WhenceError};
use crate::harness::{FileReport, Report};

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn from_error(err: &WhenceError) -> Self {
        let details = match err {
            WhenceError::CheckFailed { failures } => {
                Some(serde_json::json!({ "failures": failures }))
            }
            _ => None,
        };
        ErrorInfo {
            code: OutputErrorCode::from(err).code(),
            message: err.to_string(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    pub fn from_error(err: &WhenceError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Command responses
// ============================================================================

/// `whence check`: per-file harness results.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub status: String,
    pub schema_version: String,
    pub version: RuntimeVersion,
    pub files_checked: usize,
    pub failure_count: usize,
    pub files: Vec<FileReport>,
}

impl CheckResponse {
    pub fn new(report: Report) -> Self {
        let failure_count = report.failure_count();
        CheckResponse {
            status: if failure_count == 0 { "ok" } else { "failed" }.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            version: report.version,
            files_checked: report.files.len(),
            failure_count,
            files: report.files,
        }
    }
}

/// One instruction of a `whence dis` listing.
#[derive(Debug, Clone, Serialize)]
pub struct DisInstruction {
    pub offset: u32,
    pub line: u32,
    pub opname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<u32>,
    /// Text of the node the instruction evaluates, for resolvable ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Why a resolvable instruction has no node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisCode {
    pub qualname: String,
    pub first_line: u32,
    pub instructions: Vec<DisInstruction>,
}

/// `whence dis`: every code object of one file with resolved nodes.
#[derive(Debug, Clone, Serialize)]
pub struct DisResponse {
    pub status: String,
    pub schema_version: String,
    pub version: RuntimeVersion,
    pub filename: String,
    pub codes: Vec<DisCode>,
}

impl DisResponse {
    pub fn new(version: RuntimeVersion, filename: impl Into<String>, codes: Vec<DisCode>) -> Self {
        DisResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            version,
            filename: filename.into(),
            codes,
        }
    }
}

/// `whence record`: where a baseline was written.
#[derive(Debug, Clone, Serialize)]
pub struct RecordResponse {
    pub status: String,
    pub schema_version: String,
    pub version: RuntimeVersion,
    pub out: String,
    pub files_recorded: usize,
    pub entries: usize,
}

impl RecordResponse {
    pub fn new(report: &Report, out: &Path) -> Self {
        RecordResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            version: report.version,
            out: out.display().to_string(),
            files_recorded: report.files.len(),
            entries: report.files.iter().map(|f| f.entries.len()).sum(),
        }
    }
}

// ============================================================================
// Emission
// ============================================================================

/// Write `response` as pretty-printed JSON followed by a newline.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}
