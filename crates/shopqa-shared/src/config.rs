//! Configuration management for ShopQA.
//!
//! Loads settings from `$XDG_CONFIG_HOME/shopqa/config.toml` (or an explicit
//! path) and falls back to defaults. Environment variables override the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::QaError;
use crate::llm_client::LlmConfig;

/// Tool-selection loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on model round-trips while selecting and running a tool
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    15
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// Chart rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Tables with more rows than this (and more columns than
    /// `aggregate_min_columns`) are aggregated before plotting
    #[serde(default = "default_aggregate_min_rows")]
    pub aggregate_min_rows: usize,

    #[serde(default = "default_aggregate_min_columns")]
    pub aggregate_min_columns: usize,
}

fn default_width() -> u32 {
    1000
}

fn default_height() -> u32 {
    600
}

fn default_aggregate_min_rows() -> usize {
    50
}

fn default_aggregate_min_columns() -> usize {
    3
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            aggregate_min_rows: default_aggregate_min_rows(),
            aggregate_min_columns: default_aggregate_min_columns(),
        }
    }
}

/// Where the five CSV relations live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

/// Presentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_max_rows() -> usize {
    50
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
        }
    }
}

/// Complete ShopQA configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub chart: ChartConfig,

    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

impl QaConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("shopqa").join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply env overrides.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, QaError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let content = fs::read_to_string(p)
                    .map_err(|e| QaError::Config(format!("{}: {}", p.display(), e)))?;
                let parsed = Self::from_toml(&content)?;
                info!("Loaded config from {}", p.display());
                parsed
            }
            Some(ref p) => {
                info!("No config at {}, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, QaError> {
        toml::from_str(content).map_err(|e| QaError::Config(e.to_string()))
    }

    /// Apply `SHOPQA_*` overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("SHOPQA_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = lookup("SHOPQA_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = lookup("SHOPQA_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(provider) = lookup("SHOPQA_LLM_PROVIDER") {
            match provider.parse() {
                Ok(p) => self.llm.provider = p,
                Err(e) => warn!("Ignoring SHOPQA_LLM_PROVIDER: {}", e),
            }
        }
        if let Some(dir) = lookup("SHOPQA_DATA_DIR") {
            self.data.dir = PathBuf::from(dir);
        }
    }
}
