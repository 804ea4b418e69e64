//! Whence: find the syntax node behind a bytecode instruction.
//!
//! Given a code object and the offset of the instruction a frame or
//! traceback stopped at, whence names the expression being evaluated: the
//! call, attribute load, subscript, comparison, unary or binary operation.
//! It never guesses; an instruction it cannot pin to exactly one node is
//! reported as [`Unresolved`].
//!
//! ```
//! use std::sync::Arc;
//! use whence::{ExecutionPoint, Resolver, RuntimeVersion, SourceRegistry};
//!
//! let registry = Arc::new(SourceRegistry::new());
//! let filename = registry.register_text("demo", "x = a + b * c\n");
//! let source = registry.for_filename(&filename).unwrap();
//! let resolver = Resolver::new(Arc::clone(&registry), RuntimeVersion::V3_8);
//!
//! let module = source.module_code(RuntimeVersion::V3_8).unwrap();
//! let add = module
//!     .instructions
//!     .iter()
//!     .find(|i| i.opname() == "BINARY_ADD")
//!     .unwrap();
//! let point = ExecutionPoint::at_offset(Arc::clone(&module), add.offset).unwrap();
//! let executing = resolver.executing(point).unwrap();
//! assert_eq!(executing.text(), Some("a + b * c"));
//! ```

pub mod classifier;
pub mod encoding;
pub mod error;
pub mod executing;
pub mod frame;
pub mod harness;
pub mod output;
pub mod source;

// Error bridges - From impls between layer errors and WhenceError
mod error_bridges;

pub use classifier::{classifier_for, Category, InstructionClassifier};
pub use error::{OutputErrorCode, ResolutionError, SourceError, WhenceError};
pub use executing::{Executing, Outcome, Resolver, Unresolved};
pub use frame::{ExecutionPoint, Frame, TracebackEntry};
pub use harness::{check_paths, check_source, Baseline, Entry, Failure, FileReport, Report};
pub use source::{Source, SourceRegistry};

pub use whence_bytecode::{all_codes, CodeObject, Instruction, Opcode, RuntimeVersion, UnsupportedVersion};
pub use whence_core::{only, NotOneValueFound, Only};
pub use whence_python::{Ast, NodeId, NodeKind};
