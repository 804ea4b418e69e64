//! Error bridge implementations.
//!
//! `impl From<X> for WhenceError` conversions from the errors of the
//! workspace crates, so `?` works across layer boundaries in the CLI and
//! the harness.

use whence_bytecode::{CompileError, UnsupportedVersion};
use whence_core::NotOneValueFound;
use whence_python::ParserError;

use crate::error::{ResolutionError, SourceError, WhenceError};

// ============================================================================
// Bridge: SourceError -> WhenceError
// ============================================================================

impl From<SourceError> for WhenceError {
    fn from(err: SourceError) -> Self {
        WhenceError::Source(err)
    }
}

// ============================================================================
// Bridge: ResolutionError -> WhenceError
// ============================================================================

impl From<ResolutionError> for WhenceError {
    fn from(err: ResolutionError) -> Self {
        match err {
            ResolutionError::Source(source) => WhenceError::Source(source),
            other => WhenceError::Resolution(other),
        }
    }
}

// ============================================================================
// Bridge: ParserError -> SourceError
// ============================================================================

impl SourceError {
    /// A parse failure of `filename`.
    pub fn from_parser(filename: &str, err: &ParserError) -> Self {
        SourceError::Syntax {
            filename: filename.to_string(),
            line: err.line(),
            message: err.message(),
        }
    }
}

// ============================================================================
// Bridge: CompileError -> ResolutionError
// ============================================================================

impl ResolutionError {
    /// The reference compiler rejected `filename`.
    pub fn from_compile(filename: &str, err: CompileError) -> Self {
        ResolutionError::Compile {
            filename: filename.to_string(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Bridge: UnsupportedVersion -> WhenceError
// ============================================================================

impl From<UnsupportedVersion> for WhenceError {
    fn from(err: UnsupportedVersion) -> Self {
        WhenceError::InvalidArguments {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Bridge: NotOneValueFound -> WhenceError
// ============================================================================

impl From<NotOneValueFound> for WhenceError {
    fn from(err: NotOneValueFound) -> Self {
        WhenceError::InternalError {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Bridge: serde_json / io -> WhenceError
// ============================================================================

impl From<serde_json::Error> for WhenceError {
    fn from(err: serde_json::Error) -> Self {
        WhenceError::InternalError {
            message: format!("JSON error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutputErrorCode;

    #[test]
    fn resolution_source_errors_flatten() {
        let err: WhenceError = ResolutionError::Source(SourceError::Decode {
            filename: "x.py".into(),
            encoding: "utf-8".into(),
        })
        .into();
        assert!(matches!(err, WhenceError::Source(SourceError::Decode { .. })));
    }

    #[test]
    fn parser_errors_keep_line() {
        let err = whence_python::parse_module("x = (\n").unwrap_err();
        let bridged = SourceError::from_parser("x.py", &err);
        let SourceError::Syntax { filename, line, .. } = &bridged else {
            panic!("expected a syntax error");
        };
        assert_eq!(filename, "x.py");
        assert_eq!(*line, err.line());
    }

    #[test]
    fn unsupported_versions_are_argument_errors() {
        let err: WhenceError = "2.7".parse::<whence_bytecode::RuntimeVersion>().unwrap_err().into();
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::InvalidArguments);
    }
}
