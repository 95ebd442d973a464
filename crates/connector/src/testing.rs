//! In-memory stand-ins for external systems, for tests.
//!
//! [`MemoryBroker`] speaks the kafka transport's parameters but keeps topics
//! in process, so pipelines can be exercised end to end without a broker.
//! Register it over the built-in with
//! `catalog.register_transport(Arc::new(broker.clone()))`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::config::{required_param, split_list, ParamSpec, Params};
use crate::error::ConnectorError;
use crate::transport::kafka::{INPUT_PARAMS, OUTPUT_PARAMS};
use crate::transport::{EndpointContext, InputEndpoint, OutputEndpoint, Transport};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Bytes>>,
    /// Consumer group offsets, keyed by (group, topic).
    committed: HashMap<(String, String), usize>,
    /// Connection attempts to refuse before accepting.
    refuse_connects: u32,
    /// Reads to fail (simulated disconnects) across all consumers.
    fail_reads: u32,
    connects: u64,
}

/// Topic log shared by every endpoint opened through clones of one broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append records to a topic.
    pub fn produce<I, B>(&self, topic: &str, records: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .extend(records.into_iter().map(Into::into));
        self.notify.notify_waiters();
    }

    /// Everything written to a topic so far.
    pub fn messages(&self, topic: &str) -> Vec<Bytes> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connects(&self, n: u32) {
        self.lock().refuse_connects = n;
    }

    /// Fail the next `n` consumer reads, as if the connection dropped.
    pub fn fail_reads(&self, n: u32) {
        self.lock().fail_reads = n;
        self.notify.notify_waiters();
    }

    /// Successful connections so far.
    pub fn connects(&self) -> u64 {
        self.lock().connects
    }

    fn connect(&self) -> Result<(), ConnectorError> {
        let mut state = self.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(ConnectorError::Connect("broker unavailable".to_string()));
        }
        state.connects += 1;
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn input_params(&self) -> &'static [ParamSpec] {
        INPUT_PARAMS
    }

    fn output_params(&self) -> &'static [ParamSpec] {
        OUTPUT_PARAMS
    }

    async fn open_input(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn InputEndpoint>, ConnectorError> {
        let topics = split_list(required_param("kafka", params, "topics")?);
        self.connect()?;
        let group = params
            .get("group.id")
            .cloned()
            .unwrap_or_else(|| format!("ripple-{}-{}", ctx.pipeline, ctx.table));
        let latest = params.get("auto.offset.reset").map(String::as_str) == Some("latest");
        let offsets = {
            let state = self.lock();
            topics
                .iter()
                .map(|t| {
                    if let Some(&offset) = state.committed.get(&(group.clone(), t.clone())) {
                        return offset;
                    }
                    let end = state.topics.get(t).map_or(0, Vec::len);
                    if latest {
                        end
                    } else {
                        0
                    }
                })
                .collect()
        };
        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            group,
            topics,
            offsets,
        }))
    }

    async fn open_output(
        &self,
        _ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn OutputEndpoint>, ConnectorError> {
        let topic = required_param("kafka", params, "topic")?.to_string();
        self.connect()?;
        Ok(Box::new(MemoryProducer {
            broker: self.clone(),
            topic,
        }))
    }
}

struct MemoryConsumer {
    broker: MemoryBroker,
    group: String,
    topics: Vec<String>,
    offsets: Vec<usize>,
}

impl MemoryConsumer {
    fn fetch(&mut self, max: usize) -> Result<Vec<Bytes>, ConnectorError> {
        let mut state = self.broker.lock();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(ConnectorError::Read("connection reset by broker".to_string()));
        }
        let mut batch = Vec::new();
        for (topic, offset) in self.topics.iter().zip(self.offsets.iter_mut()) {
            let Some(log) = state.topics.get(topic) else {
                continue;
            };
            let take = (log.len() - *offset).min(max - batch.len());
            batch.extend_from_slice(&log[*offset..*offset + take]);
            *offset += take;
            state
                .committed
                .insert((self.group.clone(), topic.clone()), *offset);
            if batch.len() == max {
                break;
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl InputEndpoint for MemoryConsumer {
    async fn poll_batch(&mut self, max: usize) -> Result<Option<Vec<Bytes>>, ConnectorError> {
        let max = max.max(1);
        let notify = self.broker.notify.clone();
        let notified = notify.notified();
        let batch = self.fetch(max)?;
        if !batch.is_empty() {
            return Ok(Some(batch));
        }
        let _ = tokio::time::timeout(POLL_INTERVAL, notified).await;
        self.fetch(max).map(Some)
    }
}

struct MemoryProducer {
    broker: MemoryBroker,
    topic: String,
}

#[async_trait]
impl OutputEndpoint for MemoryProducer {
    async fn write_batch(&mut self, records: Vec<Bytes>) -> Result<(), ConnectorError> {
        self.broker.produce(&self.topic, records);
        Ok(())
    }
}
