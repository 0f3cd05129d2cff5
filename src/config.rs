//! Configuration for the conductor orchestrator.
//!
//! Read from a TOML file with serde-derived structs and defaulting
//! functions, e.g.:
//!
//! ```toml
//! [repo]
//! path = "/srv/projects/shop"
//! remote = "origin"
//! main_branch = "main"
//!
//! [agents.claude-code]
//! enabled = true
//!
//! [agents.codex]
//! enabled = false
//!
//! [review]
//! use_llm = false
//! max_retries = 2
//! linters = ["eslint", "ruff"]
//! test_command = "npm test"
//!
//! [concurrency]
//! max_tasks = 3
//! task_timeout_secs = 1800
//!
//! [storage]
//! path = ".conductor/features.json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Plain values first so TOML serialization emits them before tables.
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default)]
    pub default_tech_stack: String,
    pub repo: RepoConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Path to the managed git repository.
    pub path: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "AgentConfig::enabled", rename = "claude-code")]
    pub claude_code: AgentConfig,
    #[serde(default)]
    pub codex: AgentConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            claude_code: AgentConfig::enabled(),
            codex: AgentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl AgentConfig {
    fn enabled() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Synthesize the verdict with an LLM reviewer instead of the
    /// deterministic tool-based decision.
    #[serde(default)]
    pub use_llm: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub linters: Vec<String>,
    /// Test command split on whitespace at run time; empty disables tests.
    #[serde(default)]
    pub test_command: String,
    /// Static-analysis CLI to invoke, if installed.
    #[serde(default = "default_analyzer")]
    pub analyzer: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            use_llm: false,
            max_retries: default_max_retries(),
            linters: Vec::new(),
            test_command: String::new(),
            analyzer: default_analyzer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum task bodies executing concurrently, system-wide.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the feature snapshot file.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_tasks() -> usize {
    3
}

fn default_task_timeout_secs() -> u64 {
    30 * 60
}

fn default_agent() -> String {
    "claude-code".to_string()
}

fn default_analyzer() -> String {
    "coderabbit".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".conductor/features.json")
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(cfg)
    }

    /// A starter configuration for `conductor config init`.
    pub fn template() -> &'static str {
        r#"default_agent = "claude-code"
default_tech_stack = ""

[repo]
path = "."
remote = "origin"
main_branch = "main"

[agents.claude-code]
enabled = true

[agents.codex]
enabled = false

[review]
use_llm = false
max_retries = 2
linters = []
test_command = ""

[concurrency]
max_tasks = 3
task_timeout_secs = 1800

[storage]
path = ".conductor/features.json"
"#
    }
}
