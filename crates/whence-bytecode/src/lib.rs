//! Compiled units and the reference compiler for whence.
//!
//! # Overview
//!
//! - [`RuntimeVersion`]: the supported host runtime versions and the
//!   instruction-set differences between them.
//! - [`Opcode`], [`Instruction`], [`CodeObject`]: a compiled unit the way the
//!   runtime exposes it, with decoded instructions, a line table and a
//!   constant pool that nests further units.
//! - [`Compiler`]: compiles a parsed module into a tree of code objects for
//!   one runtime version, optionally with one node marked (followed by
//!   [`Const::Marker`]) so its instruction offset can be found.
//!
//! ```
//! use whence_bytecode::{all_codes, Compiler, RuntimeVersion};
//! use whence_python::parse_module;
//!
//! let ast = parse_module("def f(x):\n    return [y for y in x]\n").unwrap();
//! let module = Compiler::new(RuntimeVersion::V3_9)
//!     .compile_module(&ast, "demo.py")
//!     .unwrap();
//! let names: Vec<_> = all_codes(&module).iter().map(|c| c.name.clone()).collect();
//! assert_eq!(names, ["<module>", "f", "<listcomp>"]);
//! ```

pub mod builder;
pub mod code;
pub mod compiler;
pub mod opcode;
pub mod version;

pub use builder::{CodeBuilder, CodeMeta, JumpLabel};
pub use code::{
    all_codes, decode_wordcode, flags, ArgValue, CodeObject, Const, Instruction, RawInstruction,
    WordcodeError,
};
pub use compiler::{
    fold_constant, CompileError, Compiler, Fragment, NameScope, Scope, ScopeKind, SymbolTable,
};
pub use opcode::{compare_instruction, nb_op_arg, JumpKind, Opcode};
pub use version::{RuntimeVersion, UnsupportedVersion};
