use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ripple_connector::ConnectorConfig;
use ripple_core::{Config, RecordErrorPolicy};
use ripple_manager::PipelineConfig;
use serde::Deserialize;
use tracing::debug;

/// A pipeline file as written on disk.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPipelineFile {
    name: String,
    #[serde(default)]
    sql: Option<String>,
    /// Relative paths resolve against the pipeline file's directory.
    #[serde(default)]
    sql_file: Option<PathBuf>,
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    record_error_policy: Option<RecordErrorPolicy>,
    #[serde(default)]
    connectors: Vec<ConnectorConfig>,
}

/// A pipeline to run: program, settings and connector bindings.
///
/// ```toml
/// name = "fraud"
/// sql_file = "fraud.sql"
/// workers = 6
///
/// [[connectors]]
/// table = "DEMOGRAPHICS"
/// direction = "input"
/// transport = { kind = "kafka", params = { "bootstrap.servers" = "localhost", topics = "demographics" } }
/// format = { kind = "csv" }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFile {
    pub name: String,
    pub sql: String,
    pub workers: Option<usize>,
    pub record_error_policy: Option<RecordErrorPolicy>,
    pub connectors: Vec<ConnectorConfig>,
}

impl PipelineFile {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading pipeline file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline file: {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base).with_context(|| format!("invalid pipeline file: {}", path.display()))
    }

    /// Parse a pipeline file, reading `sql_file` relative to `base`.
    pub fn parse(content: &str, base: &Path) -> Result<Self> {
        let raw: RawPipelineFile = toml::from_str(content)?;
        let sql = match (raw.sql, raw.sql_file) {
            (Some(sql), None) => sql,
            (None, Some(file)) => {
                let file = base.join(file);
                std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read program: {}", file.display()))?
            }
            (Some(_), Some(_)) => bail!("set either `sql` or `sql_file`, not both"),
            (None, None) => bail!("one of `sql` or `sql_file` is required"),
        };
        Ok(Self {
            name: raw.name,
            sql,
            workers: raw.workers,
            record_error_policy: raw.record_error_policy,
            connectors: raw.connectors,
        })
    }

    /// Settings for this pipeline, falling back to the runtime defaults.
    pub fn pipeline_config(&self, config: &Config) -> PipelineConfig {
        let defaults = PipelineConfig::from_runtime(&config.runtime);
        PipelineConfig {
            workers: self.workers.unwrap_or(defaults.workers),
            record_error_policy: self.record_error_policy.unwrap_or(defaults.record_error_policy),
        }
    }
}
