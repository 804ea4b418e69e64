// Copyright (c) Ken Kocienda and other contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

pub mod core;

#[cfg(test)]
mod tests;

pub use self::core::{TokConfig, TokError, TokState, TokType, Token};
