use std::fmt;

use ripple_catalog::{CompileError, CompiledProgram};
use ripple_compute::{JobMetrics, JobRuntime};
use ripple_connector::{ConnectorRegistry, Direction};
use ripple_core::{RecordErrorPolicy, RuntimeConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::StatusSnapshot;

/// Stable identifier of a pipeline (project and its job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineHandle(pub Uuid);

impl PipelineHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PipelineHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Execution settings of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Parallelism degree.
    pub workers: usize,
    #[serde(default)]
    pub record_error_policy: RecordErrorPolicy,
}

impl PipelineConfig {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            workers: runtime.default_workers.max(1),
            record_error_policy: runtime.record_error_policy,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_runtime(&RuntimeConfig::default())
    }
}

/// Row of [`crate::PipelineManager::list`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub handle: PipelineHandle,
    pub name: String,
    #[serde(flatten)]
    pub status: StatusSnapshot,
    pub connectors: usize,
}

/// Mutable state of one pipeline, guarded by its entry's mutex.
pub(crate) struct Pipeline {
    pub(crate) sql: String,
    pub(crate) revision: u64,
    pub(crate) config: PipelineConfig,
    pub(crate) connectors: ConnectorRegistry,
    pub(crate) program: Option<CompiledProgram>,
    /// The current or last job. Kept after stop or failure for inspection.
    pub(crate) runtime: Option<JobRuntime>,
    /// Final metrics of the last job once it has stopped.
    pub(crate) last_metrics: Option<JobMetrics>,
    /// Incremented on every start, so late failures of an older job are ignored.
    pub(crate) run: u64,
}

impl Pipeline {
    pub(crate) fn new(sql: String, config: PipelineConfig) -> Self {
        Self {
            sql,
            revision: 1,
            config,
            connectors: ConnectorRegistry::new(),
            program: None,
            runtime: None,
            last_metrics: None,
            run: 0,
        }
    }

    /// Every binding must name a relation of the program; inputs must name
    /// tables.
    pub(crate) fn check_bindings(&self, program: &CompiledProgram) -> Result<(), CompileError> {
        for (_, config) in self.connectors.iter() {
            check_binding(program, &config.table, config.direction)?;
        }
        Ok(())
    }
}

pub(crate) fn check_binding(program: &CompiledProgram, relation: &str, direction: Direction) -> Result<(), CompileError> {
    let schema = &program.schema;
    if !schema.contains(relation) {
        return Err(CompileError::UnknownTable(relation.to_string()));
    }
    if direction == Direction::Input && schema.table(relation).is_none() {
        return Err(CompileError::Unsupported(format!(
            "input connector on view '{relation}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_connector::{ConnectorCatalog, ConnectorConfig, FormatConfig, TransportConfig};

    fn program() -> CompiledProgram {
        ripple_catalog::compile("CREATE TABLE t (a INT); CREATE VIEW v AS SELECT a FROM t;").unwrap()
    }

    fn file(direction: Direction, relation: &str) -> ConnectorConfig {
        let transport = TransportConfig::new("file").param("path", "/tmp/x");
        match direction {
            Direction::Input => ConnectorConfig::input(relation, transport, FormatConfig::new("csv")),
            Direction::Output => ConnectorConfig::output(relation, transport, FormatConfig::new("csv")),
        }
    }

    #[test]
    fn bindings_are_checked_against_the_schema() {
        let program = program();
        let catalog = ConnectorCatalog::builtin();
        let mut pipeline = Pipeline::new(String::new(), PipelineConfig::default());
        pipeline.connectors.register(&catalog, file(Direction::Input, "T")).unwrap();
        pipeline.connectors.register(&catalog, file(Direction::Output, "v")).unwrap();
        assert!(pipeline.check_bindings(&program).is_ok());

        pipeline.connectors.register(&catalog, file(Direction::Input, "v")).unwrap();
        assert!(matches!(pipeline.check_bindings(&program), Err(CompileError::Unsupported(_))));
    }

    #[test]
    fn unknown_relations_are_reported() {
        assert_eq!(
            check_binding(&program(), "nope", Direction::Output),
            Err(CompileError::UnknownTable("nope".into()))
        );
    }

    #[test]
    fn config_defaults_follow_the_runtime() {
        let runtime = RuntimeConfig {
            default_workers: 6,
            record_error_policy: RecordErrorPolicy::Fail,
            ..RuntimeConfig::default()
        };
        let config = PipelineConfig::from_runtime(&runtime);
        assert_eq!(config.workers, 6);
        assert_eq!(config.record_error_policy, RecordErrorPolicy::Fail);
    }
}
