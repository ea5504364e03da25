//! Core types, configuration, and error handling for the Threadline engine.
//!
//! This crate provides the shared foundation used by all other Threadline crates:
//! - [`ThreadlineError`]: unified error type using `thiserror`
//! - [`ThreadlineConfig`]: configuration loaded from `.threadline.toml`
//! - Shared types: [`ReviewTarget`], [`RuleDocument`], [`Verdict`],
//!   [`CheckReport`], [`Fix`]
//! - [`rules`]: rule document parsing and loading

mod config;
mod error;
pub mod rules;
mod types;

pub use config::{CheckConfig, LlmConfig, ThreadlineConfig};
pub use error::ThreadlineError;
pub use types::{
    rule_identity_hash, CheckMetadata, CheckReport, ContextFile, Fix, FixType, Outcome,
    ReviewTarget, RuleDocument, TargetKind, Verdict, VerdictStatus,
};

/// A convenience `Result` type for Threadline operations.
pub type Result<T> = std::result::Result<T, ThreadlineError>;
