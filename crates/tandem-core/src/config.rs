use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tandem_common::protocol::PrimitiveKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TandemConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

impl TandemConfig {
    /// Load from default locations:
    /// 1. ./tandem.yaml
    /// 2. ~/.tandem/config.yaml
    /// 3. Built-in defaults
    pub async fn load_default() -> Result<TandemConfig, ConfigError> {
        let local = PathBuf::from("./tandem.yaml");
        if local.exists() {
            return Self::load_from(&local).await;
        }
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".tandem").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }
        Ok(TandemConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<TandemConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: TandemConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

/// Timeout granularities: per primitive action (short), per step including
/// fallback and recovery (medium), per whole run (long).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default = "default_reasoner_timeout_ms")]
    pub reasoner_timeout_ms: u64,
    /// Stop remaining steps after a step fails with no fallback.
    #[serde(default)]
    pub halt_on_failure: bool,
    #[serde(default = "default_screenshot_on_failure")]
    pub screenshot_on_failure: bool,
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            step_timeout_ms: default_step_timeout_ms(),
            run_timeout_ms: default_run_timeout_ms(),
            reasoner_timeout_ms: default_reasoner_timeout_ms(),
            halt_on_failure: false,
            screenshot_on_failure: default_screenshot_on_failure(),
            screenshot_dir: default_screenshot_dir(),
        }
    }
}

fn default_action_timeout_ms() -> u64 {
    2000
}

fn default_step_timeout_ms() -> u64 {
    30000
}

fn default_run_timeout_ms() -> u64 {
    300000
}

fn default_reasoner_timeout_ms() -> u64 {
    15000
}

fn default_screenshot_on_failure() -> bool {
    true
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("./screenshots")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_builtin_attempts")]
    pub max_builtin_attempts: usize,
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_builtin_attempts: default_max_builtin_attempts(),
            retry_ceiling: default_retry_ceiling(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

fn default_max_builtin_attempts() -> usize {
    3
}

fn default_retry_ceiling() -> u32 {
    3
}

fn default_escalation_threshold() -> f64 {
    0.6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_library_path")]
    pub path: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            min_score: default_min_score(),
            path: default_library_path(),
        }
    }
}

fn default_capacity() -> usize {
    200
}

fn default_min_score() -> f64 {
    0.45
}

fn default_library_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tandem")
        .join("solutions.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_enabled")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    /// Primitive kinds synthesized solutions may use. Navigation is excluded
    /// by default: a synthesized fix should not leave the page.
    #[serde(default = "default_allowed_primitives")]
    pub allowed_primitives: Vec<PrimitiveKind>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: default_synthesis_enabled(),
            requests_per_minute: default_requests_per_minute(),
            allowed_primitives: default_allowed_primitives(),
        }
    }
}

fn default_synthesis_enabled() -> bool {
    true
}

fn default_requests_per_minute() -> usize {
    6
}

fn default_allowed_primitives() -> Vec<PrimitiveKind> {
    vec![
        PrimitiveKind::Click,
        PrimitiveKind::Fill,
        PrimitiveKind::Select,
        PrimitiveKind::WaitFor,
        PrimitiveKind::Press,
        PrimitiveKind::Screenshot,
    ]
}
