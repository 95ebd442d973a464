//! In-process push/subscribe transport.
//!
//! Input records are pushed by the embedding application (the pipeline
//! manager forwards them from its API); output records are broadcast to any
//! number of subscribers. Endpoints find each other through an [`HttpHub`]
//! keyed by connector handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{EndpointContext, InputEndpoint, OutputEndpoint, Transport};
use crate::config::{u64_param, ParamKind, ParamSpec, Params};
use crate::error::ConnectorError;
use crate::registry::ConnectorHandle;

const OUTPUT_PARAMS: &[ParamSpec] = &[ParamSpec::optional(
    "buffer",
    ParamKind::U64,
    "records kept for slow subscribers",
)];

const INPUT_QUEUE: usize = 1024;
const DEFAULT_BUFFER: u64 = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct HubInner {
    /// Queue of the current input endpoint, tagged with its attach generation.
    inputs: HashMap<ConnectorHandle, (u64, mpsc::Sender<Bytes>)>,
    generation: u64,
    outputs: HashMap<ConnectorHandle, broadcast::Sender<Bytes>>,
}

/// Rendezvous point between pushed records and open http endpoints.
#[derive(Clone, Default)]
pub struct HttpHub {
    inner: Arc<Mutex<HubInner>>,
}

impl std::fmt::Debug for HttpHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("HttpHub")
            .field("inputs", &inner.inputs.len())
            .field("outputs", &inner.outputs.len())
            .finish()
    }
}

impl HttpHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver records to the running input endpoint of `connector`.
    ///
    /// Waits while the endpoint's queue is full.
    pub async fn push(
        &self,
        connector: ConnectorHandle,
        records: Vec<Bytes>,
    ) -> Result<usize, ConnectorError> {
        let sender = self
            .lock()
            .inputs
            .get(&connector)
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| ConnectorError::NotAttached(connector.to_string()))?;
        let count = records.len();
        for record in records {
            sender.send(record).await.map_err(|_| ConnectorError::Closed)?;
        }
        Ok(count)
    }

    /// Receive every record emitted by output connector `connector` from now on.
    pub fn subscribe(&self, connector: ConnectorHandle) -> broadcast::Receiver<Bytes> {
        self.output_sender(connector, DEFAULT_BUFFER as usize).subscribe()
    }

    #[cfg(test)]
    fn is_attached(&self, connector: ConnectorHandle) -> bool {
        self.lock().inputs.contains_key(&connector)
    }

    /// Forget every endpoint of `connector`.
    pub fn remove(&self, connector: ConnectorHandle) {
        let mut inner = self.lock();
        inner.inputs.remove(&connector);
        inner.outputs.remove(&connector);
    }

    fn attach_input(&self, connector: ConnectorHandle) -> (u64, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(INPUT_QUEUE);
        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;
        inner.inputs.insert(connector, (generation, tx));
        (generation, rx)
    }

    fn detach_input(&self, connector: ConnectorHandle, generation: u64) {
        let mut inner = self.lock();
        // A reconnect may already have replaced this endpoint's queue.
        if inner.inputs.get(&connector).map(|(g, _)| *g) == Some(generation) {
            inner.inputs.remove(&connector);
        }
    }

    fn output_sender(&self, connector: ConnectorHandle, buffer: usize) -> broadcast::Sender<Bytes> {
        self.lock()
            .outputs
            .entry(connector)
            .or_insert_with(|| broadcast::channel(buffer.max(1)).0)
            .clone()
    }
}

#[derive(Debug, Default)]
pub struct HttpTransport {
    hub: HttpHub,
}

impl HttpTransport {
    pub fn new(hub: HttpHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn input_params(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn output_params(&self) -> &'static [ParamSpec] {
        OUTPUT_PARAMS
    }

    async fn open_input(
        &self,
        ctx: &EndpointContext,
        _params: &Params,
    ) -> Result<Box<dyn InputEndpoint>, ConnectorError> {
        let (generation, receiver) = self.hub.attach_input(ctx.connector);
        debug!(table = %ctx.table, connector = %ctx.connector, "http input attached");
        Ok(Box::new(HttpInput {
            hub: self.hub.clone(),
            connector: ctx.connector,
            generation,
            receiver,
        }))
    }

    async fn open_output(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn OutputEndpoint>, ConnectorError> {
        let buffer = u64_param(params, "buffer", DEFAULT_BUFFER) as usize;
        let sender = self.hub.output_sender(ctx.connector, buffer);
        debug!(view = %ctx.table, connector = %ctx.connector, "http output attached");
        Ok(Box::new(HttpOutput { sender }))
    }
}

struct HttpInput {
    hub: HttpHub,
    connector: ConnectorHandle,
    generation: u64,
    receiver: mpsc::Receiver<Bytes>,
}

impl Drop for HttpInput {
    fn drop(&mut self) {
        self.hub.detach_input(self.connector, self.generation);
    }
}

#[async_trait]
impl InputEndpoint for HttpInput {
    async fn poll_batch(&mut self, max: usize) -> Result<Option<Vec<Bytes>>, ConnectorError> {
        let first = match tokio::time::timeout(POLL_INTERVAL, self.receiver.recv()).await {
            Err(_) => return Ok(Some(Vec::new())),
            Ok(None) => return Ok(None),
            Ok(Some(record)) => record,
        };
        let mut batch = vec![first];
        while batch.len() < max {
            match self.receiver.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }
        Ok(Some(batch))
    }
}

struct HttpOutput {
    sender: broadcast::Sender<Bytes>,
}

#[async_trait]
impl OutputEndpoint for HttpOutput {
    async fn write_batch(&mut self, records: Vec<Bytes>) -> Result<(), ConnectorError> {
        for record in records {
            // No subscribers is not an error; the record is simply unobserved.
            let _ = self.sender.send(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(connector: ConnectorHandle) -> EndpointContext {
        EndpointContext {
            pipeline: "p".into(),
            table: "t".into(),
            connector,
        }
    }

    #[tokio::test]
    async fn pushed_records_reach_the_input_in_order() {
        let hub = HttpHub::new();
        let transport = HttpTransport::new(hub.clone());
        let handle = ConnectorHandle::new();
        let mut input = transport
            .open_input(&ctx(handle), &Params::new())
            .await
            .unwrap();

        let pushed = hub
            .push(handle, vec![Bytes::from("r1"), Bytes::from("r2"), Bytes::from("r3")])
            .await
            .unwrap();
        assert_eq!(pushed, 3);
        let batch = input.poll_batch(2).await.unwrap().unwrap();
        assert_eq!(batch, vec![Bytes::from("r1"), Bytes::from("r2")]);
        let batch = input.poll_batch(2).await.unwrap().unwrap();
        assert_eq!(batch, vec![Bytes::from("r3")]);
        assert_eq!(input.poll_batch(2).await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn push_without_endpoint_is_rejected() {
        let hub = HttpHub::new();
        let handle = ConnectorHandle::new();
        let err = hub.push(handle, vec![Bytes::from("x")]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotAttached(_)));
    }

    #[tokio::test]
    async fn dropping_a_replaced_endpoint_keeps_the_new_one() {
        let hub = HttpHub::new();
        let transport = HttpTransport::new(hub.clone());
        let handle = ConnectorHandle::new();
        let old = transport.open_input(&ctx(handle), &Params::new()).await.unwrap();
        let replacement = transport.open_input(&ctx(handle), &Params::new()).await.unwrap();
        drop(old);
        assert!(hub.is_attached(handle));
        drop(replacement);
        assert!(!hub.is_attached(handle));
    }

    #[tokio::test]
    async fn subscribers_see_output_records() {
        let hub = HttpHub::new();
        let transport = HttpTransport::new(hub.clone());
        let handle = ConnectorHandle::new();
        let mut rx = hub.subscribe(handle);
        let mut output = transport
            .open_output(&ctx(handle), &Params::new())
            .await
            .unwrap();
        output.write_batch(vec![Bytes::from("v")]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("v"));
    }

    #[tokio::test]
    async fn output_without_subscribers_is_fine() {
        let transport = HttpTransport::default();
        let mut output = transport
            .open_output(&ctx(ConnectorHandle::new()), &Params::new())
            .await
            .unwrap();
        assert!(output.write_batch(vec![Bytes::from("v")]).await.is_ok());
    }
}
