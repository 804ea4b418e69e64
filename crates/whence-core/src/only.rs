//! Single-value extraction.
//!
//! [`only`] consumes an iterator and returns its one and only element. It is
//! used wherever "exactly one" is a correctness requirement: picking the
//! statement at a line, the compiled unit that matches a frame, or the node
//! that matches an instruction. Anything else is reported as a
//! [`NotOneValueFound`] so callers can tell "nothing" and "too many" apart from
//! real failures.
//!
//! The iterator is never advanced past the second element, so lazily produced
//! sequences (including infinite ones) are safe to pass in.

use thiserror::Error;

/// The sequence handed to [`only`] did not contain exactly one element.
///
/// `found` is the number of elements observed before giving up: `0` for an
/// empty sequence, `2` when a second element was seen. Longer sequences are
/// not drained, so `2` means "two or more".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected exactly one value, found {}", describe(.found))]
pub struct NotOneValueFound {
    /// Elements observed (0, or 2 for "two or more").
    pub found: usize,
}

fn describe(found: &usize) -> &'static str {
    match *found {
        0 => "none",
        _ => "more than one",
    }
}

impl NotOneValueFound {
    /// True when the sequence was empty.
    pub fn is_empty(&self) -> bool {
        self.found == 0
    }

    /// True when the sequence held more than one element.
    pub fn is_ambiguous(&self) -> bool {
        self.found > 1
    }
}

/// Return the only element of `iterable`.
///
/// # Errors
///
/// Returns [`NotOneValueFound`] with `found == 0` when the iterator is empty
/// and `found == 2` as soon as a second element is produced.
///
/// # Example
///
/// ```
/// use whence_core::only;
///
/// assert_eq!(only([7]), Ok(7));
/// assert_eq!(only(Vec::<u8>::new()).unwrap_err().found, 0);
/// assert_eq!(only(0..).unwrap_err().found, 2);
/// ```
pub fn only<I: IntoIterator>(iterable: I) -> Result<I::Item, NotOneValueFound> {
    let mut iter = iterable.into_iter();
    let first = iter.next().ok_or(NotOneValueFound { found: 0 })?;
    match iter.next() {
        None => Ok(first),
        Some(_) => Err(NotOneValueFound { found: 2 }),
    }
}

/// Method form of [`only`] for iterator chains.
pub trait Only: Iterator + Sized {
    /// See [`only`].
    fn only(self) -> Result<Self::Item, NotOneValueFound> {
        only(self)
    }
}

impl<I: Iterator> Only for I {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn only_counts() {
        for n in 0..5 {
            let result = only(0..n);
            if n == 1 {
                assert_eq!(result, Ok(0));
            } else {
                let err = result.unwrap_err();
                assert_eq!(err.found, if n == 0 { 0 } else { 2 });
            }
        }
    }

    #[test]
    fn only_reads_at_most_two() {
        let pulled = Cell::new(0);
        let iter = (0..100).inspect(|_| pulled.set(pulled.get() + 1));
        assert!(only(iter).is_err());
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn only_on_infinite_iterator() {
        let err = std::iter::repeat(1).only().unwrap_err();
        assert!(err.is_ambiguous());
        assert!(!err.is_empty());
    }

    #[test]
    fn error_message() {
        assert_eq!(
            NotOneValueFound { found: 0 }.to_string(),
            "expected exactly one value, found none"
        );
        assert_eq!(
            NotOneValueFound { found: 2 }.to_string(),
            "expected exactly one value, found more than one"
        );
    }
}
