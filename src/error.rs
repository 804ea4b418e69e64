//! Error types and exit codes for whence.
//!
//! Each layer reports its own `thiserror` enum; `WhenceError` is the single
//! type the CLI renders. Bridges from the workspace crates live in
//! `error_bridges`.
//!
//! ## Exit Codes
//!
//! - `1`: the harness ran and reported failures
//! - `2`: invalid arguments
//! - `3`: source unavailable (unreadable or undecodable)
//! - `4`: resolution contract violated
//! - `10`: internal errors
//!
//! An unresolved node is not an error. See [`crate::Unresolved`].

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use whence_bytecode::RuntimeVersion;

// ============================================================================
// Exit Codes
// ============================================================================

/// Stable process exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// The harness found mismatches.
    CheckFailed = 1,
    InvalidArguments = 2,
    SourceUnavailable = 3,
    ResolutionError = 4,
    InternalError = 10,
}

impl OutputErrorCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Source Errors
// ============================================================================

/// Failure turning a file or text into a [`crate::Source`].
///
/// Only `Io` and `Decode` reach callers of the registry. A `Syntax` failure
/// is absorbed into a source without a tree.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bytes do not decode under the declared encoding.
    #[error("{filename}: cannot decode as {encoding}")]
    Decode { filename: String, encoding: String },

    /// Undecodable without a declaration, an unknown declared encoding, or
    /// text that does not parse.
    #[error("{filename}:{line}: {message}")]
    Syntax {
        filename: String,
        line: u32,
        message: String,
    },
}

// ============================================================================
// Resolution Errors
// ============================================================================

/// An execution point that breaks the engine's input contract.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The offset is not an instruction boundary of the code object.
    #[error("offset {offset} is not an instruction of `{code}` ({len} bytes)")]
    OffsetOutOfRange { code: String, offset: u32, len: usize },

    /// The code object was compiled for a different runtime than the
    /// resolver's.
    #[error("`{code}` was compiled for {found}, resolver expects {expected}")]
    VersionMismatch {
        code: String,
        expected: RuntimeVersion,
        found: RuntimeVersion,
    },

    /// The source parsed but the reference compiler rejected it.
    #[error("cannot recompile {filename}: {message}")]
    Compile { filename: String, message: String },
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for the CLI and for library callers that want one.
#[derive(Debug, Error)]
pub enum WhenceError {
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error(transparent)]
    Source(SourceError),

    #[error(transparent)]
    Resolution(ResolutionError),

    /// The harness ran to completion and found mismatches.
    #[error("{failures} check failure(s)")]
    CheckFailed { failures: usize },

    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl WhenceError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        WhenceError::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        WhenceError::InternalError {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&WhenceError> for OutputErrorCode {
    fn from(err: &WhenceError) -> Self {
        match err {
            WhenceError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            WhenceError::Source(_) => OutputErrorCode::SourceUnavailable,
            WhenceError::Resolution(ResolutionError::Source(_)) => {
                OutputErrorCode::SourceUnavailable
            }
            WhenceError::Resolution(_) => OutputErrorCode::ResolutionError,
            WhenceError::CheckFailed { .. } => OutputErrorCode::CheckFailed,
            WhenceError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<WhenceError> for OutputErrorCode {
    fn from(err: WhenceError) -> Self {
        OutputErrorCode::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(OutputErrorCode::CheckFailed.code(), 1);
        assert_eq!(OutputErrorCode::InvalidArguments.code(), 2);
        assert_eq!(OutputErrorCode::SourceUnavailable.code(), 3);
        assert_eq!(OutputErrorCode::ResolutionError.code(), 4);
        assert_eq!(OutputErrorCode::InternalError.code(), 10);
        assert_eq!(OutputErrorCode::InternalError.to_string(), "10");
    }

    #[test]
    fn nested_source_errors_map_to_source_code() {
        let err = WhenceError::Resolution(ResolutionError::Source(SourceError::Decode {
            filename: "a.py".into(),
            encoding: "ascii".into(),
        }));
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::SourceUnavailable);

        let err = WhenceError::Resolution(ResolutionError::OffsetOutOfRange {
            code: "<module>".into(),
            offset: 3,
            len: 2,
        });
        assert_eq!(OutputErrorCode::from(err), OutputErrorCode::ResolutionError);
    }

    #[test]
    fn messages_name_the_problem() {
        let err = ResolutionError::VersionMismatch {
            code: "f".into(),
            expected: RuntimeVersion::V3_9,
            found: RuntimeVersion::V3_11,
        };
        assert_eq!(err.to_string(), "`f` was compiled for 3.11, resolver expects 3.9");
    }
}
