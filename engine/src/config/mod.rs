//! Configuration management
//!
//! This module handles loading, validation, and management of the Keel configuration.
//! Configuration is stored in TOML format at ~/.keel/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory, project id
//! - **llm**: OpenRouter endpoint, backend models and the routing table
//! - **retry**: Attempt count and base backoff delay
//! - **collaborators**: Per-role endpoints for the build pipeline
//! - **memory**: Store backend, similarity threshold, retention and relevance weights
//!
//! # Path Expansion
//!
//! `~` in `core.data_dir` is expanded to the user's home directory and the
//! directory is created if it doesn't exist.
//!
//! # Examples
//!
//! ```no_run
//! use keel_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Code primary: {}", config.llm.routing["code"].primary);
//! # Ok(())
//! # }
//! ```

use crate::llm::TaskCategory;
use crate::retry::RetryPolicy;
use sdk::errors::EngineError;
use sdk::types::CollaboratorRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
///
/// Only `[core]` is required in a hand-written file. Every other section
/// falls back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Model backends and routing
    #[serde(default)]
    pub llm: LLMConfig,

    /// Retry/backoff policy shared by backends and collaborators
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pipeline collaborator endpoints
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Experience memory settings
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Project id stamped on experiences recorded by the pipeline
    #[serde(default = "default_project_id")]
    pub project_id: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            project_id: default_project_id(),
        }
    }
}

/// Model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout (seconds)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Token budget for compacted context (4 chars per token)
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Named backends
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<String, BackendConfig>,

    /// Routing table keyed by task category
    #[serde(default = "default_routing")]
    pub routing: BTreeMap<String, RouteConfig>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
            max_context_tokens: default_max_context_tokens(),
            backends: default_backends(),
            routing: default_routing(),
        }
    }
}

impl LLMConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A single model backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Model identifier sent to the API
    pub model: String,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default completion budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Ask the API for reasoning output
    #[serde(default)]
    pub reasoning: bool,
}

/// Primary and fallback backends for one category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per backend or collaborator call (at least 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Build a policy whose attempts are bounded by `attempt_timeout`
    pub fn policy(&self, attempt_timeout: Duration) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_attempt_timeout(attempt_timeout)
    }
}

/// Collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default = "default_architect_url")]
    pub architect: String,

    #[serde(default = "default_stack_research_url", rename = "stack-research")]
    pub stack_research: String,

    #[serde(default = "default_designer_url")]
    pub designer: String,

    #[serde(default = "default_coder_url")]
    pub coder: String,

    #[serde(default = "default_auditor_url")]
    pub auditor: String,

    /// Per-attempt timeout (seconds)
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            architect: default_architect_url(),
            stack_research: default_stack_research_url(),
            designer: default_designer_url(),
            coder: default_coder_url(),
            auditor: default_auditor_url(),
            timeout_secs: default_collaborator_timeout(),
        }
    }
}

impl CollaboratorsConfig {
    pub fn endpoint(&self, role: CollaboratorRole) -> &str {
        match role {
            CollaboratorRole::Architect => &self.architect,
            CollaboratorRole::StackResearch => &self.stack_research,
            CollaboratorRole::Designer => &self.designer,
            CollaboratorRole::Coder => &self.coder,
            CollaboratorRole::Auditor => &self.auditor,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where experiences are kept
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite database under `core.data_dir`
    #[default]
    Sqlite,
    /// Process-local, lost on exit
    Memory,
}

/// Experience memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Jaccard similarity above which two summaries are duplicates
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Age after which medium/low experiences are pruned
    #[serde(default = "default_prune_cutoff_days")]
    pub prune_cutoff_days: u32,

    /// How long computed stats are reused (seconds)
    #[serde(default = "default_stats_ttl")]
    pub stats_ttl_secs: u64,

    /// Lessons requested by the pipeline per build
    #[serde(default = "default_lessons_limit")]
    pub lessons_limit: usize,

    /// Relevance weights used when ranking lesson candidates
    #[serde(default)]
    pub relevance: RelevanceWeights,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            similarity_threshold: default_similarity_threshold(),
            prune_cutoff_days: default_prune_cutoff_days(),
            stats_ttl_secs: default_stats_ttl(),
            lessons_limit: default_lessons_limit(),
            relevance: RelevanceWeights::default(),
        }
    }
}

/// Score contributions for lesson candidates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RelevanceWeights {
    /// The query stack appears in the experience text
    #[serde(default = "default_stack_weight")]
    pub stack_match: u32,

    /// A spec word longer than 3 chars appears in the experience text
    #[serde(default = "default_unit_weight")]
    pub spec_token_match: u32,

    /// The experience is critical or high
    #[serde(default = "default_unit_weight")]
    pub severe: u32,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            stack_match: default_stack_weight(),
            spec_token_match: default_unit_weight(),
            severe: default_unit_weight(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.keel")
}

fn default_project_id() -> String {
    "keel".to_string()
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_llm_timeout() -> u64 {
    90
}

fn default_max_context_tokens() -> usize {
    8000
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_backends() -> BTreeMap<String, BackendConfig> {
    let mut backends = BTreeMap::new();
    backends.insert(
        "glm_air".to_string(),
        BackendConfig {
            model: "z-ai/glm-4.5-air:free".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            reasoning: true,
        },
    );
    backends.insert(
        "qwen3_235b".to_string(),
        BackendConfig {
            model: "qwen/qwen3-235b-a22b-2507".to_string(),
            temperature: 0.15,
            max_tokens: 8192,
            reasoning: false,
        },
    );
    backends.insert(
        "deepseek_v3".to_string(),
        BackendConfig {
            model: "deepseek/deepseek-chat-v3.1:free".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            reasoning: false,
        },
    );
    backends
}

fn default_routing() -> BTreeMap<String, RouteConfig> {
    let route = |primary: &str, fallbacks: &[&str]| RouteConfig {
        primary: primary.to_string(),
        fallbacks: fallbacks.iter().map(|s| s.to_string()).collect(),
    };

    let mut routing = BTreeMap::new();
    routing.insert(
        TaskCategory::Orchestration.to_string(),
        route("glm_air", &["qwen3_235b"]),
    );
    routing.insert(
        TaskCategory::Code.to_string(),
        route("qwen3_235b", &["deepseek_v3"]),
    );
    routing.insert(
        TaskCategory::Critique.to_string(),
        route("deepseek_v3", &["qwen3_235b"]),
    );
    routing.insert(
        TaskCategory::Memory.to_string(),
        route("qwen3_235b", &["glm_air"]),
    );
    routing
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_architect_url() -> String {
    "http://localhost:8081/mcp".to_string()
}

fn default_stack_research_url() -> String {
    "http://localhost:8082/mcp".to_string()
}

fn default_designer_url() -> String {
    "http://localhost:8083/mcp".to_string()
}

fn default_coder_url() -> String {
    "http://localhost:8084/mcp".to_string()
}

fn default_auditor_url() -> String {
    "http://localhost:8085/mcp".to_string()
}

fn default_collaborator_timeout() -> u64 {
    120
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_prune_cutoff_days() -> u32 {
    90
}

fn default_stats_ttl() -> u64 {
    300
}

fn default_lessons_limit() -> usize {
    10
}

fn default_stack_weight() -> u32 {
    2
}

fn default_unit_weight() -> u32 {
    1
}

impl Config {
    /// Load configuration from the default location (~/.keel/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable `~` form
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.keel/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".keel").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            retry: RetryConfig::default(),
            collaborators: CollaboratorsConfig::default(),
            memory: MemoryConfig::default(),
        }
    }

    /// Path of the SQLite memory database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("memory.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and numeric ranges
    /// - Checks every routing entry names a known category and defined backends
    /// - Expands ~ in the data directory and creates it
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Check values without touching the file system
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.project_id.trim().is_empty() {
            return Err(EngineError::Config(
                "core.project_id must not be empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.memory.similarity_threshold) {
            return Err(EngineError::Config(
                "similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.llm.max_context_tokens == 0 {
            return Err(EngineError::Config(
                "llm.max_context_tokens must be at least 1".to_string(),
            ));
        }

        for (category, route) in &self.llm.routing {
            category
                .parse::<TaskCategory>()
                .map_err(|e| EngineError::Config(format!("llm.routing: {}", e)))?;

            for name in std::iter::once(&route.primary).chain(route.fallbacks.iter()) {
                if !self.llm.backends.contains_key(name) {
                    return Err(EngineError::UnknownBackend(format!(
                        "'{}' (routing for {})",
                        name, category
                    )));
                }
            }
        }

        if let Some(role) = CollaboratorRole::ALL
            .iter()
            .find(|role| self.collaborators.endpoint(**role).trim().is_empty())
        {
            return Err(EngineError::Config(format!(
                "collaborators.{} endpoint must not be empty",
                role
            )));
        }

        for category in TaskCategory::ALL {
            if !self.llm.routing.contains_key(category.as_str()) {
                return Err(EngineError::Config(format!(
                    "llm.routing has no entry for category '{}'",
                    category
                )));
            }
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
///
/// # Examples
///
/// ```ignore
/// let path = PathBuf::from("~/.keel");
/// let expanded = expand_path(&path)?;
/// // expanded is now /home/user/.keel (on Unix)
/// ```
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
