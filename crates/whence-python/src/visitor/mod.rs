// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Visitor infrastructure and the tree passes built on it.
//!
//! # Traversal Order
//!
//! - **Depth-first, pre-order** for `visit_*` methods
//! - **Post-order** for `leave_*` methods
//! - Children are visited in field order, which is source order
//!
//! # Passes
//!
//! - [`Annotations`]: parent links, enclosing statements, statements by line
//! - [`Qualnames`]: qualified names of every compiled scope

mod annotate;
mod dispatch;
mod qualname;
mod traits;

pub use annotate::Annotations;
pub use dispatch::{walk, walk_node};
pub use qualname::Qualnames;
pub use traits::{VisitResult, Visitor};
