//! Configuration management for text2sql.
//!
//! Configuration can be set via environment variables:
//! - `API_KEY` - Required. Key for the completion API.
//! - `BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. Model used for generation and verification. Defaults to `deepseek-v3-250324`.
//! - `LANGUAGE` - Optional. Prompt language, `en` or `zh` (`cn` accepted). Defaults to `en`.
//! - `MAX_ATTEMPTS` - Optional. Verification attempts per task. Defaults to `3`.
//! - `MAX_TOOL_ROUNDS` - Optional. Tool-call rounds per verification. Defaults to `16`.
//! - `SESSION_SCOPE` - Optional. `per_task` or `per_batch`. Defaults to `per_task`.
//! - `MCP_COMMAND` - Optional. Tool provider executable. Defaults to `uvx`.
//! - `MCP_ARGS` - Optional. Whitespace-separated provider arguments. Defaults to the mcp-alchemy launch.
//! - `DB_URL` - Optional. Database URL handed to the provider's environment.
//! - `QUESTION` - Optional. When set, the question is decomposed into a fresh batch written to `TASK_FILE`.
//! - `TASK_FILE` - Optional. Input batch and snapshot path. Defaults to `task.json`.
//! - `CONTEXT_FILE` - Optional. Retrieved context text for the batch.
//! - `REQUEST_TIMEOUT_SECS` - Optional. Completion request timeout, at least 1. Defaults to `120`.
//! - `TOOL_CALL_TIMEOUT_SECS` - Optional. Tool provider request timeout, at least 1. Defaults to `60`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::agents::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_TOOL_ROUNDS};
use crate::mcp::LaunchSpec;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-v3-250324";
pub const DEFAULT_MCP_COMMAND: &str = "uvx";
pub const DEFAULT_MCP_ARGS: &[&str] = &[
    "--from",
    "mcp-alchemy==2025.04.16.110003",
    "--with",
    "pymysql",
    "--refresh-package",
    "mcp-alchemy",
    "mcp-alchemy",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Prompt language for the generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "zh" | "cn" => Ok(Language::Zh),
            other => Err(format!("expected 'en' or 'zh', got '{}'", other)),
        }
    }
}

/// How long a tool session lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionScope {
    /// Connect and release around every task.
    #[default]
    PerTask,
    /// One session for the whole batch, reconnected after a task fault.
    PerBatch,
}

impl FromStr for SessionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_task" => Ok(SessionScope::PerTask),
            "per_batch" => Ok(SessionScope::PerBatch),
            other => Err(format!("expected 'per_task' or 'per_batch', got '{}'", other)),
        }
    }
}

/// Tool provider launch settings.
#[derive(Debug, Clone)]
pub struct McpConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Passed to the provider as `DB_URL`
    pub db_url: Option<String>,
    /// Upper bound on every JSON-RPC request, handshake included
    pub tool_call_timeout: Duration,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_MCP_COMMAND.to_string(),
            args: DEFAULT_MCP_ARGS.iter().map(|s| s.to_string()).collect(),
            db_url: None,
            tool_call_timeout: Duration::from_secs(60),
        }
    }
}

impl McpConfig {
    pub fn launch_spec(&self) -> LaunchSpec {
        let spec = LaunchSpec::new(self.command.clone(), self.args.clone());
        match &self.db_url {
            Some(db_url) => spec.with_env("DB_URL", db_url.clone()),
            None => spec,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion API key
    pub api_key: String,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Model used by both generator and verifier
    pub default_model: String,

    pub language: Language,

    /// Verification attempts per task
    pub max_attempts: usize,

    /// Tool-call rounds per verification
    pub max_tool_rounds: usize,

    pub session_scope: SessionScope,

    /// Tool provider configuration
    pub mcp: McpConfig,

    /// Question to decompose instead of loading `task_file`
    pub question: Option<String>,

    /// Input batch, rewritten in place as tasks finish
    pub task_file: PathBuf,

    /// Optional retrieved context for the whole batch
    pub context_file: Option<PathBuf>,

    /// Per-request timeout for the completion API
    pub request_timeout: Duration,
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        _ => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn at_least_one(name: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be at least 1".to_string(),
        ));
    }
    Ok(value)
}

/// A timeout of zero seconds would fail every request before it is sent.
fn positive_secs(name: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "timeout must be at least 1 second".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `API_KEY` is not set, and
    /// `ConfigError::InvalidValue` for unparseable or out-of-range values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key =
            env_opt("API_KEY").ok_or_else(|| ConfigError::MissingEnvVar("API_KEY".to_string()))?;

        let base_url = env_opt("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let default_model = env_opt("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let language = env_or("LANGUAGE", Language::default())?;

        let max_attempts = at_least_one("MAX_ATTEMPTS", env_or("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?)?;
        let max_tool_rounds = at_least_one(
            "MAX_TOOL_ROUNDS",
            env_or("MAX_TOOL_ROUNDS", DEFAULT_MAX_TOOL_ROUNDS)?,
        )?;
        let session_scope = env_or("SESSION_SCOPE", SessionScope::default())?;

        let mut mcp = McpConfig::default();
        if let Some(command) = env_opt("MCP_COMMAND") {
            mcp.command = command;
        }
        if let Some(args) = env_opt("MCP_ARGS") {
            mcp.args = args.split_whitespace().map(str::to_string).collect();
        }
        mcp.db_url = env_opt("DB_URL");
        mcp.tool_call_timeout = positive_secs(
            "TOOL_CALL_TIMEOUT_SECS",
            env_or("TOOL_CALL_TIMEOUT_SECS", 60u64)?,
        )?;

        let question = env_opt("QUESTION");
        let task_file = env_opt("TASK_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("task.json"));
        let context_file = env_opt("CONTEXT_FILE").map(PathBuf::from);
        let request_timeout = positive_secs(
            "REQUEST_TIMEOUT_SECS",
            env_or("REQUEST_TIMEOUT_SECS", 120u64)?,
        )?;

        Ok(Self {
            api_key,
            base_url,
            default_model,
            language,
            max_attempts,
            max_tool_rounds,
            session_scope,
            mcp,
            question,
            task_file,
            context_file,
            request_timeout,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String, task_file: PathBuf) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model,
            language: Language::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            session_scope: SessionScope::default(),
            mcp: McpConfig::default(),
            question: None,
            task_file,
            context_file: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}
