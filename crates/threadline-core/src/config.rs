use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ThreadlineError;

/// Top-level configuration loaded from `.threadline.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
/// File values come from [`ThreadlineConfig::from_file`], environment
/// overrides from [`ThreadlineConfig::apply_env`]; the binary applies flags last.
///
/// # Examples
///
/// ```
/// use threadline_core::ThreadlineConfig;
///
/// let config = ThreadlineConfig::default();
/// assert_eq!(config.check.timeout_secs, 40);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadlineConfig {
    /// Generation service settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Check orchestration settings.
    #[serde(default)]
    pub check: CheckConfig,
}

impl ThreadlineConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Io`] if the file cannot be read, or
    /// [`ThreadlineError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use threadline_core::ThreadlineConfig;
    /// use std::path::Path;
    ///
    /// let config = ThreadlineConfig::from_file(Path::new(".threadline.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, ThreadlineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline_core::ThreadlineConfig;
    ///
    /// let toml = r#"
    /// [check]
    /// timeout_secs = 15
    /// "#;
    /// let config = ThreadlineConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.check.timeout_secs, 15);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, ThreadlineError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer environment overrides on top of file values.
    ///
    /// `lookup` is consulted for `THREADLINE_MODEL`, `THREADLINE_BASE_URL`,
    /// `THREADLINE_API_KEY`, `THREADLINE_TIMEOUT_SECS`, `THREADLINE_RULES_DIR`
    /// and `THREADLINE_DEFAULT_BRANCH`. `OPENAI_API_KEY` only fills a missing
    /// key. Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Config`] if `THREADLINE_TIMEOUT_SECS` is not
    /// a positive integer.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline_core::ThreadlineConfig;
    ///
    /// let mut config = ThreadlineConfig::default();
    /// config
    ///     .apply_env(|key| (key == "THREADLINE_MODEL").then(|| "gpt-4.1".to_string()))
    ///     .unwrap();
    /// assert_eq!(config.llm.model, "gpt-4.1");
    /// ```
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ThreadlineError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("THREADLINE_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = get("THREADLINE_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(key) = get("THREADLINE_API_KEY") {
            self.llm.api_key = Some(key);
        } else if self.llm.api_key.is_none() {
            self.llm.api_key = get("OPENAI_API_KEY");
        }
        if let Some(secs) = get("THREADLINE_TIMEOUT_SECS") {
            self.check.timeout_secs = secs.trim().parse().map_err(|_| {
                ThreadlineError::Config(format!(
                    "THREADLINE_TIMEOUT_SECS must be a whole number of seconds, got {secs:?}"
                ))
            })?;
        }
        if let Some(dir) = get("THREADLINE_RULES_DIR") {
            self.check.rules_dir = PathBuf::from(dir);
        }
        if let Some(branch) = get("THREADLINE_DEFAULT_BRANCH") {
            self.check.default_branch = branch;
        }
        self.validate()
    }

    /// Reject values no check can run with.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadlineError::Config`] when `check.timeout_secs` is zero.
    pub fn validate(&self) -> Result<(), ThreadlineError> {
        if self.check.timeout_secs == 0 {
            return Err(ThreadlineError::Config(
                "check.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Generation service configuration.
///
/// # Examples
///
/// ```
/// use threadline_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name, informational only (e.g. `"openai"`, `"ollama"`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// HTTP client timeout in seconds (default: 120).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Check orchestration configuration.
///
/// # Examples
///
/// ```
/// use threadline_core::CheckConfig;
/// use std::time::Duration;
///
/// let config = CheckConfig::default();
/// assert_eq!(config.timeout(), Duration::from_secs(40));
/// assert_eq!(config.default_branch, "main");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Directory holding rule documents (default: `.threadlines`).
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,
    /// Per-rule wall-clock budget in seconds (default: 40).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment name recorded on saved checks (default: `"local"`).
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Directory where check reports are persisted (default: `.threadline`).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Branch diffed against in branch mode (default: `"main"`).
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

impl CheckConfig {
    /// The per-rule timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from(".threadlines")
}

fn default_timeout_secs() -> u64 {
    40
}

fn default_environment() -> String {
    "local".into()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".threadline")
}

fn default_branch() -> String {
    "main".into()
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            rules_dir: default_rules_dir(),
            timeout_secs: default_timeout_secs(),
            environment: default_environment(),
            state_dir: default_state_dir(),
            default_branch: default_branch(),
        }
    }
}
