use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::checker::Checker;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 50;
pub const DEFAULT_CHAR_LIMIT: usize = 2_000_000;

/// General options for building and running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildAndRunOptions {
    /// Maximum program execution time in milliseconds
    pub timeout: u64,

    /// How often memory and time are sampled while a program runs, in milliseconds
    pub mem_sample: u64,

    /// Displays of stdout and stderr are truncated to this many characters
    pub char_limit: usize,

    /// How outputs are compared with expected answers
    pub default_checker: Checker,
}

impl Default for BuildAndRunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            mem_sample: DEFAULT_SAMPLE_INTERVAL_MS,
            char_limit: DEFAULT_CHAR_LIMIT,
            default_checker: Checker::default(),
        }
    }
}

/// The configuration store of case-runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub build_and_run: BuildAndRunOptions,

    /// Compiler (or interpreter) arguments keyed by language tag, space separated
    pub compiler_args: HashMap<String, String>,

    /// Compiler or interpreter executable keyed by language tag
    pub toolchains: HashMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            build_and_run: BuildAndRunOptions::default(),
            compiler_args: default_compiler_args(),
            toolchains: default_toolchains(),
        }
    }
}

fn default_compiler_args() -> HashMap<String, String> {
    HashMap::from([
        ("cpp".to_string(), "-Wall -O0 -DLOCAL".to_string()),
        ("py".to_string(), String::new()),
    ])
}

fn default_toolchains() -> HashMap<String, String> {
    HashMap::from([
        ("cpp".to_string(), "g++".to_string()),
        ("py".to_string(), "python3".to_string()),
    ])
}

/// A single option value as returned by [`RunnerConfig::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Number(u64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Number(n) => write!(f, "{}", n),
            OptionValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a file, falling back to defaults if it does not exist
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let config_str = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))
    }

    /// Parse a TOML document. Options it leaves out keep their default values.
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let mut config: RunnerConfig = toml::from_str(config_str)?;
        config.fill_missing_defaults();
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let config_str = toml::to_string(self).context("Failed to serialize config to TOML")?;

        fs::write(config_path, config_str)
            .with_context(|| format!("Failed to write config to file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the default config path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("case-runner").join("config.toml")
        } else {
            PathBuf::from("./case-runner.toml")
        }
    }

    fn fill_missing_defaults(&mut self) {
        for (tag, args) in default_compiler_args() {
            self.compiler_args.entry(tag).or_insert(args);
        }
        for (tag, toolchain) in default_toolchains() {
            self.toolchains.entry(tag).or_insert(toolchain);
        }
    }

    /// Look up one option by category and key
    pub fn get(&self, category: &str, key: &str) -> Option<OptionValue> {
        match category {
            "build_and_run" => match key {
                "timeout" => Some(OptionValue::Number(self.build_and_run.timeout)),
                "mem_sample" => Some(OptionValue::Number(self.build_and_run.mem_sample)),
                "char_limit" => Some(OptionValue::Number(self.build_and_run.char_limit as u64)),
                "default_checker" => Some(OptionValue::Text(self.build_and_run.default_checker.to_string())),
                _ => None,
            },
            "compiler_args" => self.compiler_args.get(key).cloned().map(OptionValue::Text),
            "toolchains" => self.toolchains.get(key).cloned().map(OptionValue::Text),
            _ => None,
        }
    }

    /// Build the immutable settings handed to an executor for `language`
    pub fn executor_config(&self, language: &str) -> ExecutorConfig {
        let config = ExecutorConfig {
            timeout: Duration::from_millis(self.build_and_run.timeout),
            sample_interval: Duration::from_millis(self.build_and_run.mem_sample.max(1)),
            compiler_args: self
                .compiler_args
                .get(language)
                .map(|args| split_args(args))
                .unwrap_or_default(),
            toolchain: self.toolchains.get(language).map(PathBuf::from),
        };
        debug!("Executor config for {}: {:?}", language, config);
        config
    }
}

fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

/// Settings an executor is constructed with. Nothing else is consulted at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Wall-clock deadline for one run, measured from spawn
    pub timeout: Duration,

    /// Interval between resource samples
    pub sample_interval: Duration,

    /// Extra arguments passed to the compiler or interpreter
    pub compiler_args: Vec<String>,

    /// Compiler or interpreter override; each language has its own default
    pub toolchain: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            compiler_args: Vec::new(),
            toolchain: None,
        }
    }
}

impl ExecutorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_compiler_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compiler_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_toolchain(mut self, toolchain: impl Into<PathBuf>) -> Self {
        self.toolchain = Some(toolchain.into());
        self
    }
}
