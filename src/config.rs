use crate::pipeline::{PipelineOptions, default_threads};
use crate::queue::DEFAULT_HIGH_WATER_MARK;
use crate::render::DEFAULT_FORMAT;
use crate::segment::DEFAULT_MAX_RECORD_BYTES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SieveConfig {
    pub pipeline: PipelineSection,
    pub output: OutputSection,
    /// Plugin specs loaded on every run, e.g. `"netcount|prefixlen=16"`
    pub plugins: Vec<String>,
}

/// Worker pool tuning. Zero threads means one per CPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub threads: usize,
    pub high_water_mark: usize,
    pub push_batch: usize,
    pub pop_batch: usize,
    pub output_per_worker: usize,
    pub idle_sleep_ms: u64,
    pub max_record_bytes: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            threads: 0,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            push_batch: 1024,
            pop_batch: 128,
            output_per_worker: 250,
            idle_sleep_ms: 10,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl PipelineSection {
    pub fn to_options(&self) -> Result<PipelineOptions, ConfigError> {
        let positive = [
            ("pipeline.high_water_mark", self.high_water_mark),
            ("pipeline.push_batch", self.push_batch),
            ("pipeline.pop_batch", self.pop_batch),
            ("pipeline.output_per_worker", self.output_per_worker),
            ("pipeline.max_record_bytes", self.max_record_bytes),
        ];
        if let Some(&(key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                key,
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(PipelineOptions {
            threads: if self.threads == 0 {
                default_threads()
            } else {
                self.threads
            },
            high_water_mark: self.high_water_mark,
            push_batch: self.push_batch,
            pop_batch: self.pop_batch,
            output_per_worker: self.output_per_worker,
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
            max_record_bytes: self.max_record_bytes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub format: String,
    pub buffered: bool,
    pub json: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            buffered: true,
            json: false,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<SieveConfig, ConfigError> {
    match path {
        Some(path) => load_config_from_path(path),
        None => Ok(SieveConfig::default()),
    }
}

pub fn load_config_from_path(path: &Path) -> Result<SieveConfig, ConfigError> {
    let path_display = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path_display.clone(),
        source,
    })?;

    toml::from_str::<SieveConfig>(&raw).map_err(|source| ConfigError::Parse {
        path: path_display,
        source,
    })
}
