//! Core infrastructure for whence.
//!
//! This crate provides the language-agnostic pieces the rest of the workspace
//! leans on:
//! - [`only`] / [`Only`]: extract the single element of a sequence
//! - [`ContentHash`]: SHA-256 fingerprints for in-memory sources
//! - [`LineIndex`]: byte offset <-> line/column conversions

pub mod fingerprint;
pub mod only;
pub mod text;

pub use fingerprint::ContentHash;
pub use only::{only, NotOneValueFound, Only};
pub use text::LineIndex;
