use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use ripple_connector::{EndpointContext, Encoder, OutputEndpoint, Params, Transport};
use ripple_core::RetryConfig;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{retry, RunState};
use crate::metrics::ConnectorMetrics;
use crate::zset::ZSet;

/// Queue feeding one output worker.
pub(crate) struct SinkQueue {
    sender: mpsc::UnboundedSender<Arc<ZSet>>,
    metrics: Arc<ConnectorMetrics>,
    label: String,
    /// Backlog at which a lagging sink is reported.
    warn_at: u64,
}

impl SinkQueue {
    pub(crate) fn new(
        sender: mpsc::UnboundedSender<Arc<ZSet>>,
        metrics: Arc<ConnectorMetrics>,
        label: String,
        warn_at: usize,
    ) -> Self {
        Self {
            sender,
            metrics,
            label,
            warn_at: warn_at.max(1) as u64,
        }
    }
}

/// Delta queues of every output connector, keyed by relation.
#[derive(Default)]
pub(crate) struct Sinks {
    by_relation: HashMap<String, Vec<SinkQueue>>,
}

impl Sinks {
    pub(crate) fn add(&mut self, relation: String, queue: SinkQueue) {
        self.by_relation.entry(relation).or_default().push(queue);
    }

    /// Hand step results to the sinks. Called with the circuit locked so
    /// every sink sees deltas in step order; never waits on a sink, so a
    /// stalled writer only grows its own backlog.
    pub(crate) fn publish(&self, changed: IndexMap<String, ZSet>) {
        for (relation, delta) in changed {
            let Some(queues) = self.by_relation.get(&relation) else {
                continue;
            };
            let delta = Arc::new(delta);
            for queue in queues {
                let pending = queue.metrics.record_queued();
                // A closed channel means the sink gave up during shutdown.
                if queue.sender.send(Arc::clone(&delta)).is_err() {
                    queue.metrics.record_dequeued();
                    continue;
                }
                if pending == queue.warn_at {
                    warn!(connector = %queue.label, relation = %relation, pending, "output is falling behind");
                }
            }
        }
    }
}

/// Encodes the deltas of one relation and writes them to its endpoint.
pub(crate) struct OutputWorker {
    pub(crate) ctx: EndpointContext,
    pub(crate) label: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) params: Params,
    pub(crate) endpoint: Box<dyn OutputEndpoint>,
    pub(crate) encoder: Box<dyn Encoder>,
    pub(crate) metrics: Arc<ConnectorMetrics>,
    pub(crate) retry: RetryConfig,
    pub(crate) control: watch::Receiver<RunState>,
    pub(crate) deltas: mpsc::UnboundedReceiver<Arc<ZSet>>,
}

impl OutputWorker {
    /// Runs until every input worker has finished and the queue is drained.
    pub(crate) async fn run(mut self) {
        debug!(connector = %self.label, relation = %self.ctx.table, "output worker started");
        while let Some(delta) = self.deltas.recv().await {
            self.metrics.record_dequeued();
            let batch = match self.encoder.encode(&delta.to_vec()) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(connector = %self.label, error = %err, "failed to encode delta");
                    self.metrics.set_error(&err);
                    continue;
                }
            };
            let count = batch.records.len() as u64;
            if count > 0 && !self.write(batch.records).await {
                break;
            }
            self.metrics.record_emitted(count, batch.retractions_dropped);
        }
        if let Err(err) = self.endpoint.flush().await {
            warn!(connector = %self.label, error = %err, "flush failed");
            self.metrics.set_error(&err);
        }
        debug!(connector = %self.label, "output worker finished");
    }

    /// Write a batch, reconnecting until it lands. False if the job stopped
    /// first.
    async fn write(&mut self, records: Vec<Bytes>) -> bool {
        let mut failures: u32 = 0;
        loop {
            let err = match self.endpoint.write_batch(records.clone()).await {
                Ok(()) => return true,
                Err(err) => err,
            };
            failures += 1;
            warn!(connector = %self.label, error = %err, failures, "output disconnected");
            self.metrics.set_error(&err);
            if failures > 1 && !retry::pause(&self.retry, failures, &mut self.control).await {
                return false;
            }

            let transport = &*self.transport;
            let ctx = &self.ctx;
            let params = &self.params;
            let reopened = retry::reconnect(&self.retry, &self.label, &mut self.control, move || {
                transport.open_output(ctx, params)
            })
            .await;
            let Some(endpoint) = reopened else {
                return false;
            };
            self.endpoint = endpoint;
            self.metrics.record_reconnect();
            info!(connector = %self.label, "output reconnected");
        }
    }
}
