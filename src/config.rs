//! Run Configuration
//!
//! Loaded once at the start of a run and passed by value into the pipeline.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file {path} unreadable: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config file {path} invalid: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderConfig {
    pub templates_dir: PathBuf,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Prefix -> font mapping (`fonts.json`).
    pub fonts_config: PathBuf,
    pub fonts_dir: PathBuf,
    /// Fallback font, relative to `fonts_dir` unless absolute.
    pub default_font: PathBuf,
    pub jpeg_quality: u8,
    /// Put each group's output under `{timestamp}_{prefix}`.
    pub timestamped_output: bool,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "forgebatch_core=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("export"),
            fonts_config: PathBuf::from("fonts.json"),
            fonts_dir: PathBuf::from("assets/fonts"),
            default_font: PathBuf::from("AlibabaPuHuiTi-2-85-Bold.ttf"),
            jpeg_quality: 95,
            timestamped_output: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RenderConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
