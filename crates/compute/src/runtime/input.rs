use std::sync::Arc;

use bytes::Bytes;
use ripple_connector::{ConnectorError, Decoder, EndpointContext, InputEndpoint, Params, Transport};
use ripple_core::{RecordErrorPolicy, RetryConfig};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{retry, RunState, Shared};
use crate::error::RuntimeError;
use crate::metrics::ConnectorMetrics;
use crate::zset::ZSet;

/// Feeds one input connector into the circuit, batch by batch, in the
/// order the transport delivers records.
pub(crate) struct InputWorker {
    pub(crate) ctx: EndpointContext,
    pub(crate) label: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) params: Params,
    pub(crate) endpoint: Box<dyn InputEndpoint>,
    pub(crate) decoder: Box<dyn Decoder>,
    pub(crate) metrics: Arc<ConnectorMetrics>,
    pub(crate) policy: RecordErrorPolicy,
    pub(crate) batch_size: usize,
    pub(crate) retry: RetryConfig,
    pub(crate) control: watch::Receiver<RunState>,
    pub(crate) failures: mpsc::UnboundedSender<RuntimeError>,
}

impl InputWorker {
    pub(crate) async fn run(mut self, shared: Arc<Shared>) {
        debug!(connector = %self.label, table = %self.ctx.table, "input worker started");
        loop {
            if !self.wait_until_running().await {
                break;
            }
            let polled = tokio::select! {
                changed = self.control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                polled = self.endpoint.poll_batch(self.batch_size) => polled,
            };
            match polled {
                Ok(None) => {
                    info!(connector = %self.label, table = %self.ctx.table, "input exhausted");
                    break;
                }
                Ok(Some(batch)) if batch.is_empty() => {}
                Ok(Some(batch)) => {
                    if let Err(err) = self.process(&shared, batch).await {
                        let _ = self.failures.send(err);
                        break;
                    }
                }
                Err(err) => {
                    warn!(connector = %self.label, error = %err, "input disconnected");
                    self.metrics.set_error(&err);
                    if !self.reconnect().await {
                        break;
                    }
                }
            }
        }
        debug!(connector = %self.label, "input worker finished");
    }

    /// Block while paused. False once the job stops.
    async fn wait_until_running(&mut self) -> bool {
        match self.control.wait_for(|state| *state != RunState::Paused).await {
            Ok(state) => *state == RunState::Running,
            Err(_) => false,
        }
    }

    async fn reconnect(&mut self) -> bool {
        let transport = &*self.transport;
        let ctx = &self.ctx;
        let params = &self.params;
        let reopened = retry::reconnect(&self.retry, &self.label, &mut self.control, move || {
            transport.open_input(ctx, params)
        })
        .await;
        match reopened {
            Some(endpoint) => {
                self.endpoint = endpoint;
                self.metrics.record_reconnect();
                info!(connector = %self.label, "input reconnected");
                true
            }
            None => false,
        }
    }

    /// Decode a batch and apply it as one circuit step.
    async fn process(&mut self, shared: &Shared, batch: Vec<Bytes>) -> Result<(), RuntimeError> {
        let bytes: usize = batch.iter().map(Bytes::len).sum();
        self.metrics.record_received(batch.len() as u64, bytes as u64);

        let _permit = shared
            .permits
            .acquire()
            .await
            .map_err(|_| ConnectorError::Closed)?;

        let mut delta = ZSet::new();
        let mut parsed = 0;
        for record in &batch {
            match self.decoder.decode(record) {
                Ok(rows) => {
                    parsed += 1;
                    delta.extend(rows);
                }
                Err(error) => {
                    self.metrics.record_dropped(&error);
                    match self.policy {
                        RecordErrorPolicy::Drop => {
                            warn!(connector = %self.label, table = %self.ctx.table, %error, "dropped record");
                        }
                        RecordErrorPolicy::Fail => {
                            return Err(RuntimeError::Record {
                                connector: self.label.clone(),
                                table: self.ctx.table.clone(),
                                error,
                            });
                        }
                    }
                }
            }
        }
        self.metrics.record_parsed(parsed);
        if delta.is_empty() {
            return Ok(());
        }

        let mut circuit = shared.circuit.lock().await;
        let changed = circuit.step([(self.ctx.table.clone(), delta)])?;
        shared.stats.record(circuit.steps(), circuit.state_size());
        shared.sinks.publish(changed);
        Ok(())
    }
}
