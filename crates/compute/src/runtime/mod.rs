//! Running jobs: connector workers around a shared circuit.
//!
//! A started job owns one task per input connector and one per output
//! connector. Input workers poll their transport, decode a batch outside
//! any lock, then take the circuit mutex to apply it as a single step and
//! hand the resulting deltas to the output workers. Transport I/O never
//! happens under the circuit lock: each output worker has its own unbounded
//! queue, so a sink that cannot write only grows its own backlog. Metrics
//! are read from atomics and never wait for the circuit.
//!
//! Lifecycle commands travel over a `watch` channel. Pausing stops new
//! reads but keeps connections open; stopping lets in-flight batches finish,
//! then output workers drain their queues and flush.

mod input;
mod output;
mod retry;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use ripple_catalog::Plan;
use ripple_connector::{ConnectorCatalog, ConnectorConfig, ConnectorHandle, Direction, EndpointContext};
use ripple_core::{RecordErrorPolicy, RetryConfig, Row, RuntimeConfig};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::circuit::Circuit;
use crate::error::RuntimeError;
use crate::metrics::{CircuitStats, ConnectorMetrics, JobMetrics};

use self::input::InputWorker;
use self::output::{OutputWorker, SinkQueue, Sinks};

/// Desired state of a job's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Everything needed to start a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub pipeline: String,
    pub plan: Plan,
    pub connectors: Vec<(ConnectorHandle, ConnectorConfig)>,
    /// Upper bound on batches decoded and applied concurrently.
    pub workers: usize,
    pub record_error_policy: RecordErrorPolicy,
    pub runtime: RuntimeConfig,
    pub retry: RetryConfig,
}

/// State shared by the input workers of a job.
pub(crate) struct Shared {
    pub(crate) circuit: Arc<Mutex<Circuit>>,
    pub(crate) permits: Semaphore,
    pub(crate) sinks: Sinks,
    pub(crate) stats: Arc<CircuitStats>,
}

/// A started job.
pub struct JobRuntime {
    pipeline: String,
    circuit: Arc<Mutex<Circuit>>,
    stats: Arc<CircuitStats>,
    metrics: Vec<Arc<ConnectorMetrics>>,
    control: watch::Sender<RunState>,
    inputs: Vec<JoinHandle<()>>,
    outputs: Vec<JoinHandle<()>>,
    failures: Option<mpsc::UnboundedReceiver<RuntimeError>>,
    started_at: DateTime<Utc>,
}

fn connector_label(handle: ConnectorHandle, config: &ConnectorConfig) -> String {
    config.name.clone().unwrap_or_else(|| handle.to_string())
}

impl JobRuntime {
    /// Open every endpoint and spawn the workers.
    ///
    /// Outputs are connected before inputs so no delta is produced without a
    /// sink to receive it. Each connection is retried per `spec.retry`; if
    /// any connector cannot be opened the endpoints opened so far are
    /// dropped and the error is returned.
    pub async fn start(spec: JobSpec, catalog: &ConnectorCatalog) -> Result<Self, RuntimeError> {
        let JobSpec {
            pipeline,
            plan,
            connectors,
            workers,
            record_error_policy,
            runtime,
            retry: retry_config,
        } = spec;

        let (control, _) = watch::channel(RunState::Running);
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let mut sinks = Sinks::default();
        let mut metrics = Vec::with_capacity(connectors.len());
        let mut input_workers = Vec::new();
        let mut output_workers = Vec::new();

        let mut ordered: Vec<&(ConnectorHandle, ConnectorConfig)> = connectors.iter().collect();
        ordered.sort_by_key(|(_, config)| config.direction == Direction::Input);

        for (handle, config) in ordered {
            let handle = *handle;
            let table = config.table_name();
            let label = connector_label(handle, config);
            let node = match config.direction {
                Direction::Input => plan.table_node(&table),
                Direction::Output => plan.view_node(&table).or_else(|| plan.table_node(&table)),
            };
            let columns = node
                .map(|n| n.schema.clone())
                .ok_or_else(|| RuntimeError::UnknownTable(table.clone()))?;
            let transport = catalog.transport(&config.transport.kind)?;
            let format = catalog.format(&config.format.kind)?;
            let ctx = EndpointContext {
                pipeline: pipeline.clone(),
                table: table.clone(),
                connector: handle,
            };
            let connector_metrics = Arc::new(ConnectorMetrics::new(
                handle,
                config.name.clone(),
                table.clone(),
                config.direction,
            ));
            metrics.push(Arc::clone(&connector_metrics));
            let params = config.transport.params.clone();

            match config.direction {
                Direction::Input => {
                    let decoder = format.decoder(&columns, &config.format.params)?;
                    let endpoint = {
                        let transport = &*transport;
                        let (ctx, params) = (&ctx, &params);
                        retry::connect(&retry_config, &label, move || transport.open_input(ctx, params)).await?
                    };
                    info!(pipeline = %pipeline, connector = %label, table = %table, transport = transport.name(), "input connected");
                    input_workers.push(InputWorker {
                        ctx,
                        label,
                        transport,
                        params,
                        endpoint,
                        decoder,
                        metrics: connector_metrics,
                        policy: record_error_policy,
                        batch_size: runtime.max_batch_size.max(1),
                        retry: retry_config.clone(),
                        control: control.subscribe(),
                        failures: failures_tx.clone(),
                    });
                }
                Direction::Output => {
                    let encoder = format.encoder(&columns, &config.format.params)?;
                    let endpoint = {
                        let transport = &*transport;
                        let (ctx, params) = (&ctx, &params);
                        retry::connect(&retry_config, &label, move || transport.open_output(ctx, params)).await?
                    };
                    info!(pipeline = %pipeline, connector = %label, relation = %table, transport = transport.name(), "output connected");
                    let (sender, deltas) = mpsc::unbounded_channel();
                    let queue = SinkQueue::new(
                        sender,
                        Arc::clone(&connector_metrics),
                        label.clone(),
                        runtime.output_backlog_warn,
                    );
                    sinks.add(table, queue);
                    output_workers.push(OutputWorker {
                        ctx,
                        label,
                        transport,
                        params,
                        endpoint,
                        encoder,
                        metrics: connector_metrics,
                        retry: retry_config.clone(),
                        control: control.subscribe(),
                        deltas,
                    });
                }
            }
        }

        let circuit = Arc::new(Mutex::new(Circuit::new(plan)));
        let stats = Arc::new(CircuitStats::default());
        let shared = Arc::new(Shared {
            circuit: Arc::clone(&circuit),
            permits: Semaphore::new(workers.max(1)),
            sinks,
            stats: Arc::clone(&stats),
        });
        let outputs = output_workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run()))
            .collect();
        let inputs = input_workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(Arc::clone(&shared))))
            .collect::<Vec<_>>();
        info!(pipeline = %pipeline, inputs = inputs.len(), workers, "job started");

        Ok(Self {
            pipeline,
            circuit,
            stats,
            metrics,
            control,
            inputs,
            outputs,
            failures: Some(failures_rx),
            started_at: Utc::now(),
        })
    }

    pub fn state(&self) -> RunState {
        *self.control.borrow()
    }

    /// Fatal errors raised by workers. The channel closes once every input
    /// worker has exited. Can be taken once.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<RuntimeError>> {
        self.failures.take()
    }

    /// Halt connector reads without dropping connections.
    pub fn pause(&self) {
        if self.state() == RunState::Running {
            self.control.send_replace(RunState::Paused);
            info!(pipeline = %self.pipeline, "job paused");
        }
    }

    pub fn resume(&self) {
        if self.state() == RunState::Paused {
            self.control.send_replace(RunState::Running);
            info!(pipeline = %self.pipeline, "job resumed");
        }
    }

    /// Stop admitting records, let in-flight batches finish, drain sinks and
    /// release every connection. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.control.send_replace(RunState::Stopped);
        let inputs = join_all(self.inputs.drain(..)).await;
        let outputs = join_all(self.outputs.drain(..)).await;
        for err in inputs.into_iter().chain(outputs).filter_map(Result::err) {
            warn!(pipeline = %self.pipeline, error = %err, "connector worker panicked");
        }
        info!(pipeline = %self.pipeline, "job stopped");
    }

    pub async fn view_snapshot(&self, view: &str) -> Result<Vec<(Row, i64)>, RuntimeError> {
        self.views().snapshot(view).await
    }

    /// A handle for reading view contents that outlives borrows of the job.
    pub fn views(&self) -> ViewReader {
        ViewReader {
            circuit: Arc::clone(&self.circuit),
        }
    }

    pub fn metrics(&self) -> JobMetrics {
        JobMetrics::new(
            Some(self.started_at),
            self.stats.steps(),
            self.stats.state_size(),
            self.metrics.iter().map(|m| m.snapshot()).collect(),
        )
    }
}

/// Reads view contents of a running job. Waits at most for the step in
/// progress.
#[derive(Clone)]
pub struct ViewReader {
    circuit: Arc<Mutex<Circuit>>,
}

impl ViewReader {
    pub async fn snapshot(&self, view: &str) -> Result<Vec<(Row, i64)>, RuntimeError> {
        self.circuit.lock().await.view_snapshot(view)
    }
}

impl Drop for JobRuntime {
    fn drop(&mut self) {
        self.control.send_replace(RunState::Stopped);
    }
}
