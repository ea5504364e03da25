//! Diff parsing, per-rule filtering, and glob scoping.
//!
//! Splits unified diffs into per-file sections, restricts a diff to a file
//! subset, matches paths against rule patterns, and joins introduction/fix
//! diff pairs for display.

pub mod combine;
pub mod parser;
pub mod pattern;
