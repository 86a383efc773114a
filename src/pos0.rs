//! Forensic positions: a recursion path plus a byte offset.
//!
//! A [`Pos0`] names the first byte of a buffer view. The `path` component
//! records how the bytes were reached: a dash-separated sequence of numeric
//! offsets and alphabetic stage tokens, e.g. `1000-HIBER-33423-ZIP` means
//! "offset 1000 of the input, decoded by HIBER, offset 33423 of that output,
//! decoded by ZIP". The `offset` component is the byte offset within the
//! innermost decoded stream.
//!
//! # Invariants
//! - `Pos0` is immutable; shifting and stage-pushing return new values.
//! - `depth()` equals the number of alphabetic stage tokens in `path`.

use std::fmt;
use std::ops::Add;

/// Position of byte 0 of a buffer view: forensic path + offset.
///
/// The empty path with offset `n` stringifies as `n`; a non-empty path
/// stringifies as `path-n`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos0 {
    path: String,
    offset: u64,
}

impl Pos0 {
    /// Creates a position with an explicit path and offset.
    pub fn new(path: impl Into<String>, offset: u64) -> Self {
        Self { path: path.into(), offset }
    }

    /// Creates a path-less position at `offset` in the root input.
    pub fn at(offset: u64) -> Self {
        Self { path: String::new(), offset }
    }

    /// The forensic path (empty for a root-input position).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The byte offset within the innermost decoded stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of decode stages in the path.
    ///
    /// A stage is any dash-separated token that starts with an ASCII
    /// alphabetic character; numeric tokens are offsets, not stages.
    pub fn depth(&self) -> u32 {
        self.path
            .split('-')
            .filter(|tok| tok.bytes().next().is_some_and(|b| b.is_ascii_alphabetic()))
            .count() as u32
    }

    /// The innermost alphabetic stage token, or `""` if the path has none.
    ///
    /// Used by carvers to recognize content that is "merely" wrapped in the
    /// encoding they themselves decode.
    pub fn alpha_part(&self) -> &str {
        self.path
            .split('-')
            .rev()
            .find(|tok| tok.bytes().next().is_some_and(|b| b.is_ascii_alphabetic()))
            .unwrap_or("")
    }

    /// Derives the position of a decoded child stream.
    ///
    /// The current position (path and offset) is stringified and the stage
    /// `prefix` appended; the child starts at offset 0 of the decoded bytes.
    /// `Pos0::at(1000).push_stage("ZIP")` is `1000-ZIP` at offset 0.
    pub fn push_stage(&self, prefix: &str) -> Pos0 {
        Pos0 { path: format!("{self}-{prefix}"), offset: 0 }
    }

    /// Shifts the offset by `n` without changing the path.
    pub fn shifted(&self, n: u64) -> Pos0 {
        Pos0 { path: self.path.clone(), offset: self.offset + n }
    }
}

impl Add<u64> for &Pos0 {
    type Output = Pos0;

    fn add(self, n: u64) -> Pos0 {
        self.shifted(n)
    }
}

impl fmt::Display for Pos0 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.offset)
        } else {
            write!(f, "{}-{}", self.path, self.offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Pos0::at(0).to_string(), "0");
        assert_eq!(Pos0::at(4096).to_string(), "4096");
        assert_eq!(Pos0::new("1000-HIBER", 33423).to_string(), "1000-HIBER-33423");
    }

    #[test]
    fn depth_counts_alpha_stages() {
        assert_eq!(Pos0::at(512).depth(), 0);
        assert_eq!(Pos0::new("1000-HIBER", 0).depth(), 1);
        assert_eq!(Pos0::new("1000-HIBER-33423-ZIP", 9).depth(), 2);
    }

    #[test]
    fn alpha_part_is_innermost_stage() {
        assert_eq!(Pos0::at(3).alpha_part(), "");
        assert_eq!(Pos0::new("1000-HIBER", 0).alpha_part(), "HIBER");
        assert_eq!(Pos0::new("1000-HIBER-33423-ZIP", 9).alpha_part(), "ZIP");
    }

    #[test]
    fn push_stage_extends_path() {
        let p = Pos0::at(1000).push_stage("ZIP");
        assert_eq!(p.to_string(), "1000-ZIP-0");
        assert_eq!(p.depth(), 1);

        let q = p.shifted(7).push_stage("GZIP");
        assert_eq!(q.path(), "1000-ZIP-7-GZIP");
        assert_eq!(q.depth(), 2);
    }

    #[test]
    fn shift_adds_offset() {
        let p = Pos0::new("64-GZIP", 10);
        assert_eq!((&p + 6).to_string(), "64-GZIP-16");
        assert_eq!(p.offset(), 10);
    }
}
