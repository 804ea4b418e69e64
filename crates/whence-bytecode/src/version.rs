//! Host runtime versions and the instruction-set features they select.
//!
//! The compiler and the instruction classifiers never compare version numbers
//! directly; they ask one of the feature predicates below. Adding a runtime
//! means adding a variant and answering each predicate for it.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable consulted by [`RuntimeVersion::detect`].
pub const RUNTIME_VERSION_ENV: &str = "WHENCE_RUNTIME_VERSION";

/// A supported host runtime version.
///
/// # Example
///
/// ```
/// use whence_bytecode::RuntimeVersion;
///
/// let version: RuntimeVersion = "3.11".parse().unwrap();
/// assert!(version.has_unified_binary_op());
/// assert!(!RuntimeVersion::V3_8.has_is_contains_ops());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub enum RuntimeVersion {
    /// Baseline: `COMPARE_OP` carries every comparison, `BEGIN_FINALLY` /
    /// `END_FINALLY` blocks.
    #[default]
    V3_8,
    /// `IS_OP`, `CONTAINS_OP`, `JUMP_IF_NOT_EXC_MATCH`, `LIST_EXTEND`.
    V3_9,
    /// Jump arguments count instructions instead of bytes.
    V3_10,
    /// `BINARY_OP`, `PRECALL` / `CALL`, relative jumps only, exception tables.
    V3_11,
}

/// A version string that names no supported runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported runtime version `{0}` (expected one of 3.8, 3.9, 3.10, 3.11)")]
pub struct UnsupportedVersion(pub String);

impl RuntimeVersion {
    /// Every supported version, oldest first.
    pub const ALL: [RuntimeVersion; 4] = [
        RuntimeVersion::V3_8,
        RuntimeVersion::V3_9,
        RuntimeVersion::V3_10,
        RuntimeVersion::V3_11,
    ];

    /// Version selected by `WHENCE_RUNTIME_VERSION`, 3.8 when unset.
    pub fn detect() -> Result<Self, UnsupportedVersion> {
        match std::env::var(RUNTIME_VERSION_ENV) {
            Ok(value) if !value.trim().is_empty() => value.trim().parse(),
            _ => Ok(RuntimeVersion::default()),
        }
    }

    #[must_use]
    pub fn minor(self) -> u8 {
        match self {
            RuntimeVersion::V3_8 => 8,
            RuntimeVersion::V3_9 => 9,
            RuntimeVersion::V3_10 => 10,
            RuntimeVersion::V3_11 => 11,
        }
    }

    /// Identity and membership tests have their own instructions
    /// (`IS_OP`, `CONTAINS_OP`) instead of `COMPARE_OP` arguments.
    #[must_use]
    pub fn has_is_contains_ops(self) -> bool {
        self >= RuntimeVersion::V3_9
    }

    /// One `BINARY_OP n` instruction replaces the `BINARY_*` / `INPLACE_*`
    /// families.
    #[must_use]
    pub fn has_unified_binary_op(self) -> bool {
        self >= RuntimeVersion::V3_11
    }

    /// Calls are `PRECALL n` followed by `CALL n`, with `PUSH_NULL` and
    /// `KW_NAMES` preparing the stack.
    #[must_use]
    pub fn has_precall(self) -> bool {
        self >= RuntimeVersion::V3_11
    }

    /// `except T:` tests with a dedicated jump instead of
    /// `COMPARE_OP 'exception match'`.
    #[must_use]
    pub fn has_exception_match_jump(self) -> bool {
        self >= RuntimeVersion::V3_9
    }

    /// Displays of three or more constants are built from one constant
    /// tuple with `LIST_EXTEND` / `SET_UPDATE`, and unpacking uses
    /// `LIST_EXTEND` / `DICT_MERGE` instead of the `BUILD_*_UNPACK` family.
    #[must_use]
    pub fn extends_constant_lists(self) -> bool {
        self >= RuntimeVersion::V3_9
    }

    /// Jump arguments are measured in instructions rather than bytes.
    #[must_use]
    pub fn counts_jumps_in_instructions(self) -> bool {
        self >= RuntimeVersion::V3_10
    }

    /// Exception handling is table driven: no `SETUP_*` / `POP_BLOCK`
    /// instructions, and every jump is relative.
    #[must_use]
    pub fn has_exception_tables(self) -> bool {
        self >= RuntimeVersion::V3_11
    }

    /// `MAKE_FUNCTION` pops a qualified-name constant pushed after the code.
    #[must_use]
    pub fn pushes_function_qualname(self) -> bool {
        self <= RuntimeVersion::V3_10
    }

    /// Code objects record their own qualified name.
    #[must_use]
    pub fn has_code_qualname(self) -> bool {
        self >= RuntimeVersion::V3_11
    }

    /// `match` statements compile to the `MATCH_*` instructions.
    #[must_use]
    pub fn has_pattern_matching(self) -> bool {
        self >= RuntimeVersion::V3_10
    }

    /// `except*` handlers split exception groups.
    #[must_use]
    pub fn has_exception_groups(self) -> bool {
        self >= RuntimeVersion::V3_11
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "3.{}", self.minor())
    }
}

impl FromStr for RuntimeVersion {
    type Err = UnsupportedVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3.8" => Ok(RuntimeVersion::V3_8),
            "3.9" => Ok(RuntimeVersion::V3_9),
            "3.10" => Ok(RuntimeVersion::V3_10),
            "3.11" => Ok(RuntimeVersion::V3_11),
            other => Err(UnsupportedVersion(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for version in RuntimeVersion::ALL {
            assert_eq!(version.to_string().parse::<RuntimeVersion>(), Ok(version));
        }
        assert!("3.12".parse::<RuntimeVersion>().is_err());
        assert!("python".parse::<RuntimeVersion>().is_err());
    }

    #[test]
    fn feature_matrix() {
        use RuntimeVersion::*;
        assert!(!V3_8.has_is_contains_ops());
        assert!(V3_9.has_is_contains_ops() && V3_9.has_exception_match_jump());
        assert!(!V3_9.counts_jumps_in_instructions());
        assert!(V3_10.counts_jumps_in_instructions() && !V3_10.has_precall());
        assert!(V3_11.has_precall() && V3_11.has_unified_binary_op());
        assert!(V3_10.pushes_function_qualname() && !V3_11.pushes_function_qualname());
    }

    #[test]
    fn default_is_oldest() {
        assert_eq!(RuntimeVersion::default(), RuntimeVersion::V3_8);
        assert_eq!(RuntimeVersion::ALL[0], RuntimeVersion::default());
    }
}
