//! Small, self-contained data structures used across the project.
//!
//! # Scope
//! `stdx` hosts narrow utilities with no forensic-domain knowledge. They are
//! tuned for the dispatch hot path: single-lock operations, no iteration
//! surprises.
//!
//! # Module map
//! - `atomic_set`: concurrent string set with atomic test-and-insert, backing
//!   the seen-sbuf dedup set and the per-recorder carve cache.

pub mod atomic_set;

pub use atomic_set::AtomicSet;
