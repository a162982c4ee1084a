//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATECHART_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which candidate wins when transitions for the same event are declared
/// on a state and on one of its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Innermost source first.
    #[default]
    Child,
    /// Outermost source first.
    Parent,
}

/// What happens to a running do-activity when its state exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoActivityPolicy {
    /// Let it run to completion.
    #[default]
    None,
    /// Cancel on exit.
    ImmediateCancel,
    /// Cancel after a grace period if still running.
    TimeoutCancel,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "child" => Ok(ConflictPolicy::Child),
            "parent" => Ok(ConflictPolicy::Parent),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

impl std::str::FromStr for DoActivityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(DoActivityPolicy::None),
            "immediate_cancel" => Ok(DoActivityPolicy::ImmediateCancel),
            "timeout_cancel" => Ok(DoActivityPolicy::TimeoutCancel),
            other => Err(format!("unknown do-activity policy '{}'", other)),
        }
    }
}

/// State machine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    pub machine: MachineConfig,
    pub activity: ActivityConfig,
    pub executor: ExecutorConfig,
}

impl StateMachineConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("STATECHART_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: StateMachineConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.machine.apply_env_overrides();
        self.activity.apply_env_overrides();
        self.executor.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine.max_cascade_steps == 0 {
            return Err(ConfigError::ValidationError(
                "machine.max_cascade_steps must be greater than 0".to_string(),
            ));
        }
        if self.executor.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "executor.worker_threads must be greater than 0".to_string(),
            ));
        }
        if self.executor.max_blocking_threads == 0 {
            return Err(ConfigError::ValidationError(
                "executor.max_blocking_threads must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Machine behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Machine id, recorded in snapshots.
    pub id: Option<String>,
    pub conflict_policy: ConflictPolicy,
    /// Upper bound on triggerless transitions fired after one event.
    pub max_cascade_steps: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            id: None,
            conflict_policy: ConflictPolicy::Child,
            max_cascade_steps: 1000,
        }
    }
}

impl MachineConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("STATECHART_MACHINE_ID") {
            self.id = Some(id);
        }

        if let Ok(policy) = std::env::var("STATECHART_CONFLICT_POLICY") {
            if let Ok(parsed) = policy.parse() {
                self.conflict_policy = parsed;
            }
        }

        if let Ok(steps) = std::env::var("STATECHART_MAX_CASCADE_STEPS") {
            if let Ok(n) = steps.parse() {
                self.max_cascade_steps = n;
            }
        }
    }
}

/// Do-activity handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub policy: DoActivityPolicy,
    /// Grace period for TIMEOUT_CANCEL in milliseconds.
    pub timeout_ms: u64,
    /// Start do-activities of restored states.
    pub resume_on_restore: bool,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            policy: DoActivityPolicy::None,
            timeout_ms: 1000,
            resume_on_restore: true,
        }
    }
}

impl ActivityConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(policy) = std::env::var("STATECHART_DO_ACTION_POLICY") {
            if let Ok(parsed) = policy.parse() {
                self.policy = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("STATECHART_DO_ACTION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.timeout_ms = ms;
            }
        }

        if let Ok(resume) = std::env::var("STATECHART_RESUME_ON_RESTORE") {
            self.resume_on_restore = resume == "1" || resume.to_lowercase() == "true";
        }
    }

    /// Returns the grace period as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Owned task runtime sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Async worker threads (timers, grace periods).
    pub worker_threads: usize,
    /// Upper bound of concurrently running do-activities.
    pub max_blocking_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 16,
        }
    }
}

impl ExecutorConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(threads) = std::env::var("STATECHART_WORKER_THREADS") {
            if let Ok(n) = threads.parse() {
                self.worker_threads = n;
            }
        }

        if let Ok(threads) = std::env::var("STATECHART_MAX_BLOCKING_THREADS") {
            if let Ok(n) = threads.parse() {
                self.max_blocking_threads = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
