use std::path::PathBuf;

/// Errors that can occur across the Threadline engine.
///
/// Library crates use this type directly; the binary crate converts to a
/// `miette` diagnostic at the boundary. Rule evaluation never surfaces one of
/// these to the orchestrator: evaluation failures are folded into a verdict.
///
/// # Examples
///
/// ```
/// use threadline_core::ThreadlineError;
///
/// let err = ThreadlineError::Validation("missing field `diff`".into());
/// assert!(err.to_string().contains("missing field `diff`"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ThreadlineError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Git operation failure while resolving or fetching a diff.
    #[error("git error: {0}")]
    Git(String),

    /// Diff or rule document parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Generation service transport or response error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// A check request was rejected before dispatch.
    #[error("invalid check request: {0}")]
    Validation(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}
