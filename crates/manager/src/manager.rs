//! The pipeline manager: named pipelines and their lifecycle.
//!
//! Each pipeline lives in an [`Entry`] holding a `tokio` mutex over its
//! mutable state and a `watch` channel carrying its [`StatusSnapshot`].
//! Every lifecycle operation runs with the entry locked, so requests on one
//! pipeline are serialized and a second request sees the result of the
//! first. Status reads go through the watch channel and never wait on the
//! lock.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use indexmap::IndexMap;
use ripple_catalog::{CompileError, Schema};
use ripple_compute::{JobMetrics, JobRuntime, JobSpec, RuntimeError};
use ripple_connector::{ConfigError, ConnectorCatalog, ConnectorConfig, ConnectorHandle, Direction};
use ripple_core::{Config, Row};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, warn};

use crate::error::ManagerError;
use crate::pipeline::{check_binding, Pipeline, PipelineConfig, PipelineHandle, PipelineSummary};
use crate::status::{Action, PipelineStatus, StatusSnapshot, Transition};

struct Entry {
    handle: PipelineHandle,
    name: String,
    status: watch::Sender<StatusSnapshot>,
    state: Mutex<Pipeline>,
}

impl Entry {
    fn current(&self) -> PipelineStatus {
        self.status.borrow().status
    }

    fn publish(&self, status: PipelineStatus, error: Option<String>, revision: u64) -> StatusSnapshot {
        let snapshot = StatusSnapshot::new(status, error, revision);
        self.status.send_replace(snapshot.clone());
        info!(pipeline = %self.name, %status, revision, "status changed");
        snapshot
    }

    fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Check `action` against the current status.
    fn admit(&self, action: Action) -> Result<Transition, ManagerError> {
        let status = self.current();
        match action.check(status) {
            Transition::Invalid => Err(ManagerError::InvalidTransition {
                pipeline: self.name.clone(),
                action,
                status,
            }),
            transition => Ok(transition),
        }
    }
}

struct Inner {
    config: Config,
    catalog: ConnectorCatalog,
    pipelines: RwLock<IndexMap<PipelineHandle, Arc<Entry>>>,
}

/// Owns every pipeline, keyed by handle, with globally unique names.
///
/// Cheap to clone; clones share the same pipelines.
#[derive(Clone)]
pub struct PipelineManager {
    inner: Arc<Inner>,
}

impl PipelineManager {
    pub fn new(config: Config) -> Self {
        Self::with_catalog(config, ConnectorCatalog::builtin())
    }

    /// Use a custom set of transports and formats.
    pub fn with_catalog(config: Config, catalog: ConnectorCatalog) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                catalog,
                pipelines: RwLock::new(IndexMap::new()),
            }),
        }
    }

    pub fn catalog(&self) -> &ConnectorCatalog {
        &self.inner.catalog
    }

    fn entry(&self, handle: PipelineHandle) -> Result<Arc<Entry>, ManagerError> {
        self.inner
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(handle.to_string()))
    }

    // ── Projects ──────────────────────────────────────────────

    /// Register a new pipeline holding `sql`. Nothing is compiled yet.
    pub fn create_project(&self, name: &str, sql: &str) -> Result<PipelineHandle, ManagerError> {
        let mut pipelines = self
            .inner
            .pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if pipelines.values().any(|e| e.name == name) {
            return Err(ManagerError::DuplicateName(name.to_string()));
        }
        let handle = PipelineHandle::new();
        let config = PipelineConfig::from_runtime(&self.inner.config.runtime);
        let (status, _) = watch::channel(StatusSnapshot::new(PipelineStatus::Created, None, 1));
        pipelines.insert(
            handle,
            Arc::new(Entry {
                handle,
                name: name.to_string(),
                status,
                state: Mutex::new(Pipeline::new(sql.to_string(), config)),
            }),
        );
        info!(pipeline = name, %handle, "project created");
        Ok(handle)
    }

    /// Replace the program with a new revision. Any plan and stopped job are
    /// discarded and the pipeline returns to `created`.
    pub async fn update_program(&self, handle: PipelineHandle, sql: &str) -> Result<StatusSnapshot, ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        entry.admit(Action::Configure)?;
        pipeline.sql = sql.to_string();
        pipeline.revision += 1;
        pipeline.program = None;
        pipeline.runtime = None;
        pipeline.last_metrics = None;
        Ok(entry.publish(PipelineStatus::Created, None, pipeline.revision))
    }

    pub async fn configure_pipeline(&self, handle: PipelineHandle, config: PipelineConfig) -> Result<(), ManagerError> {
        if config.workers == 0 {
            return Err(ManagerError::InvalidConfig("workers must be at least 1".into()));
        }
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        entry.admit(Action::Configure)?;
        info!(pipeline = %entry.name, workers = config.workers, policy = %config.record_error_policy, "pipeline configured");
        pipeline.config = config;
        Ok(())
    }

    pub async fn pipeline_config(&self, handle: PipelineHandle) -> Result<PipelineConfig, ManagerError> {
        let entry = self.entry(handle)?;
        let pipeline = entry.state.lock().await;
        Ok(pipeline.config.clone())
    }

    pub async fn program(&self, handle: PipelineHandle) -> Result<String, ManagerError> {
        let entry = self.entry(handle)?;
        let pipeline = entry.state.lock().await;
        Ok(pipeline.sql.clone())
    }

    // ── Connectors ────────────────────────────────────────────

    /// Bind a connector. Kinds and parameters are validated now; nothing is
    /// opened until the job starts. Once compiled, the relation is also
    /// checked against the schema.
    pub async fn configure_connector(
        &self,
        handle: PipelineHandle,
        config: ConnectorConfig,
    ) -> Result<ConnectorHandle, ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        entry.admit(Action::Configure)?;
        self.inner.catalog.validate(&config)?;
        if let Some(program) = &pipeline.program {
            check_binding(program, &config.table_name(), config.direction)?;
        }
        let connector = pipeline.connectors.register(&self.inner.catalog, config)?;
        Ok(connector)
    }

    pub async fn remove_connector(&self, handle: PipelineHandle, connector: ConnectorHandle) -> Result<(), ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        entry.admit(Action::Configure)?;
        pipeline
            .connectors
            .remove(connector)
            .ok_or_else(|| ManagerError::UnknownConnector {
                pipeline: entry.name.clone(),
                connector: connector.to_string(),
            })?;
        self.inner.catalog.http_hub().remove(connector);
        Ok(())
    }

    pub async fn connectors(&self, handle: PipelineHandle) -> Result<Vec<(ConnectorHandle, ConnectorConfig)>, ManagerError> {
        let entry = self.entry(handle)?;
        let pipeline = entry.state.lock().await;
        Ok(pipeline
            .connectors
            .iter()
            .map(|(h, c)| (h, c.clone()))
            .collect())
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Compile the current revision on a blocking worker.
    ///
    /// On failure observers see `compiling` then `failed` with the detail,
    /// after which the pipeline returns to `created`, keeping the detail,
    /// and the error is returned.
    pub async fn compile(&self, handle: PipelineHandle) -> Result<StatusSnapshot, ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        entry.admit(Action::Compile)?;
        let revision = pipeline.revision;
        entry.publish(PipelineStatus::Compiling, None, revision);

        let sql = pipeline.sql.clone();
        let compiled = tokio::task::spawn_blocking(move || ripple_catalog::compile(&sql))
            .await
            .unwrap_or_else(|join| Err(CompileError::Unsupported(format!("compiler task failed: {join}"))));
        let result = compiled.and_then(|program| {
            pipeline.check_bindings(&program)?;
            Ok(program)
        });

        match result {
            Ok(program) => {
                info!(
                    pipeline = %entry.name,
                    revision,
                    tables = program.schema.tables.len(),
                    views = program.schema.views.len(),
                    nodes = program.plan.nodes.len(),
                    "program compiled"
                );
                pipeline.program = Some(program);
                Ok(entry.publish(PipelineStatus::Compiled, None, revision))
            }
            Err(err) => {
                warn!(pipeline = %entry.name, revision, error = %err, "compilation failed");
                let detail = err.to_string();
                pipeline.program = None;
                entry.publish(PipelineStatus::Failed, Some(detail.clone()), revision);
                entry.publish(PipelineStatus::Created, Some(detail), revision);
                Err(err.into())
            }
        }
    }

    /// Start a compiled pipeline, or resume a paused one.
    ///
    /// Connectors are opened with bounded retries; if any cannot be opened
    /// the pipeline fails with the connection error.
    pub async fn start(&self, handle: PipelineHandle) -> Result<StatusSnapshot, ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        if entry.admit(Action::Start)? == Transition::Noop {
            return Ok(entry.snapshot());
        }
        let revision = pipeline.revision;

        if entry.current() == PipelineStatus::Paused {
            if let Some(runtime) = &pipeline.runtime {
                runtime.resume();
            }
            return Ok(entry.publish(PipelineStatus::Running, None, revision));
        }

        let program = pipeline
            .program
            .as_ref()
            .ok_or_else(|| ManagerError::NotCompiled(entry.name.clone()))?;
        let spec = JobSpec {
            pipeline: entry.name.clone(),
            plan: program.plan.clone(),
            connectors: pipeline
                .connectors
                .iter()
                .map(|(h, c)| (h, c.clone()))
                .collect(),
            workers: pipeline.config.workers,
            record_error_policy: pipeline.config.record_error_policy,
            runtime: self.inner.config.runtime.clone(),
            retry: self.inner.config.retry.clone(),
        };

        match JobRuntime::start(spec, &self.inner.catalog).await {
            Ok(mut runtime) => {
                pipeline.run += 1;
                if let Some(failures) = runtime.take_failures() {
                    self.watch_failures(Arc::clone(&entry), pipeline.run, failures);
                }
                pipeline.runtime = Some(runtime);
                pipeline.last_metrics = None;
                Ok(entry.publish(PipelineStatus::Running, None, revision))
            }
            Err(err) => {
                error!(pipeline = %entry.name, error = %err, "job failed to start");
                entry.publish(PipelineStatus::Failed, Some(err.to_string()), revision);
                Err(err.into())
            }
        }
    }

    /// Fail the job on the first fatal worker error of run `run`.
    fn watch_failures(
        &self,
        entry: Arc<Entry>,
        run: u64,
        mut failures: tokio::sync::mpsc::UnboundedReceiver<RuntimeError>,
    ) {
        tokio::spawn(async move {
            let Some(err) = failures.recv().await else {
                return;
            };
            let mut pipeline = entry.state.lock().await;
            if pipeline.run != run || !entry.current().is_active() {
                return;
            }
            error!(pipeline = %entry.name, error = %err, "job failed");
            if let Some(runtime) = pipeline.runtime.as_mut() {
                runtime.stop().await;
            }
            pipeline.last_metrics = pipeline.runtime.as_ref().map(JobRuntime::metrics);
            entry.publish(PipelineStatus::Failed, Some(err.to_string()), pipeline.revision);
        });
    }

    /// Halt connector reads; connections and operator state are kept.
    pub async fn pause(&self, handle: PipelineHandle) -> Result<StatusSnapshot, ManagerError> {
        let entry = self.entry(handle)?;
        let pipeline = entry.state.lock().await;
        if entry.admit(Action::Pause)? == Transition::Noop {
            return Ok(entry.snapshot());
        }
        if let Some(runtime) = &pipeline.runtime {
            runtime.pause();
        }
        Ok(entry.publish(PipelineStatus::Paused, None, pipeline.revision))
    }

    /// Stop the job and release its connections. Stopping a stopped
    /// pipeline succeeds without change.
    pub async fn stop(&self, handle: PipelineHandle) -> Result<StatusSnapshot, ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        if entry.admit(Action::Stop)? == Transition::Noop {
            return Ok(entry.snapshot());
        }
        if let Some(runtime) = pipeline.runtime.as_mut() {
            runtime.stop().await;
        }
        pipeline.last_metrics = pipeline.runtime.as_ref().map(JobRuntime::metrics);
        Ok(entry.publish(PipelineStatus::Stopped, None, pipeline.revision))
    }

    /// Clear a stopped or failed job. Returns to `compiled` when a plan
    /// exists, else `created`.
    pub async fn reset(&self, handle: PipelineHandle) -> Result<StatusSnapshot, ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        entry.admit(Action::Reset)?;
        pipeline.runtime = None;
        pipeline.last_metrics = None;
        let status = if pipeline.program.is_some() {
            PipelineStatus::Compiled
        } else {
            PipelineStatus::Created
        };
        Ok(entry.publish(status, None, pipeline.revision))
    }

    /// Remove a pipeline in any state, stopping its job first.
    pub async fn delete(&self, handle: PipelineHandle) -> Result<(), ManagerError> {
        let entry = self.entry(handle)?;
        let mut pipeline = entry.state.lock().await;
        if let Some(runtime) = pipeline.runtime.as_mut() {
            runtime.stop().await;
        }
        pipeline.runtime = None;
        for (connector, _) in pipeline.connectors.iter() {
            self.inner.catalog.http_hub().remove(connector);
        }
        self.inner
            .pipelines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&handle);
        entry.publish(PipelineStatus::Stopped, None, pipeline.revision);
        info!(pipeline = %entry.name, "pipeline deleted");
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self, handle: PipelineHandle) -> Result<StatusSnapshot, ManagerError> {
        Ok(self.entry(handle)?.snapshot())
    }

    /// Receive every status change from now on, starting with the current one.
    pub fn subscribe(&self, handle: PipelineHandle) -> Result<watch::Receiver<StatusSnapshot>, ManagerError> {
        Ok(self.entry(handle)?.status.subscribe())
    }

    pub fn handle(&self, name: &str) -> Option<PipelineHandle> {
        self.inner
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|e| e.name == name)
            .map(|e| e.handle)
    }

    /// Pipelines in creation order.
    pub async fn list(&self) -> Vec<PipelineSummary> {
        let entries: Vec<Arc<Entry>> = self
            .inner
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let connectors = entry.state.lock().await.connectors.len();
            summaries.push(PipelineSummary {
                handle: entry.handle,
                name: entry.name.clone(),
                status: entry.snapshot(),
                connectors,
            });
        }
        summaries
    }

    pub fn len(&self) -> usize {
        self.inner
            .pipelines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn schema(&self, handle: PipelineHandle) -> Result<Schema, ManagerError> {
        let entry = self.entry(handle)?;
        let pipeline = entry.state.lock().await;
        pipeline
            .program
            .as_ref()
            .map(|p| p.schema.clone())
            .ok_or_else(|| ManagerError::NotCompiled(entry.name.clone()))
    }

    pub async fn metrics(&self, handle: PipelineHandle) -> Result<JobMetrics, ManagerError> {
        let entry = self.entry(handle)?;
        let pipeline = entry.state.lock().await;
        if let Some(metrics) = &pipeline.last_metrics {
            return Ok(metrics.clone());
        }
        match &pipeline.runtime {
            Some(runtime) => Ok(runtime.metrics()),
            None => Ok(JobMetrics::idle()),
        }
    }

    /// Current contents of a view of the running (or last) job.
    pub async fn view_snapshot(&self, handle: PipelineHandle, view: &str) -> Result<Vec<(Row, i64)>, ManagerError> {
        let entry = self.entry(handle)?;
        let views = {
            let pipeline = entry.state.lock().await;
            pipeline
                .runtime
                .as_ref()
                .map(JobRuntime::views)
                .ok_or_else(|| ManagerError::NotStarted(entry.name.clone()))?
        };
        Ok(views.snapshot(view).await?)
    }

    /// Binding of `connector`, checked to be an http connector in `direction`.
    async fn http_binding(
        &self,
        handle: PipelineHandle,
        connector: ConnectorHandle,
        direction: Direction,
    ) -> Result<(), ManagerError> {
        let entry = self.entry(handle)?;
        let pipeline = entry.state.lock().await;
        let config = pipeline
            .connectors
            .get(connector)
            .filter(|c| c.direction == direction)
            .ok_or_else(|| ManagerError::UnknownConnector {
                pipeline: entry.name.clone(),
                connector: connector.to_string(),
            })?;
        if !config.transport.kind.eq_ignore_ascii_case("http") {
            return Err(ConfigError::Unsupported(format!(
                "connector {connector} uses the {} transport, not http",
                config.transport.kind
            ))
            .into());
        }
        Ok(())
    }

    /// Push raw records into an http input connector of a running pipeline.
    /// Waits while the connector's queue is full.
    pub async fn push_input(
        &self,
        handle: PipelineHandle,
        connector: ConnectorHandle,
        records: Vec<Bytes>,
    ) -> Result<usize, ManagerError> {
        self.http_binding(handle, connector, Direction::Input).await?;
        Ok(self.inner.catalog.http_hub().push(connector, records).await?)
    }

    /// Receive the encoded records of an http output connector.
    pub async fn subscribe_output(
        &self,
        handle: PipelineHandle,
        connector: ConnectorHandle,
    ) -> Result<broadcast::Receiver<Bytes>, ManagerError> {
        self.http_binding(handle, connector, Direction::Output).await?;
        Ok(self.inner.catalog.http_hub().subscribe(connector))
    }
}
