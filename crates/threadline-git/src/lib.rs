//! Git plumbing: diff-target resolution and diff extraction.
//!
//! [`target`] decides which references to compare from CI environment
//! signals; [`fetch`] uses git2 to produce the unified diff for them.

pub mod fetch;
pub mod target;
