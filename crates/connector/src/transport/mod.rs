//! Transports move raw records between a pipeline and the outside world.

pub mod file;
pub mod http;
pub mod kafka;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{validate_params, Direction, ParamSpec, Params};
use crate::error::{ConfigError, ConnectorError};
use crate::registry::ConnectorHandle;

pub use file::FileTransport;
pub use http::{HttpHub, HttpTransport};
pub use kafka::KafkaTransport;

/// Identifies the binding an endpoint serves, for logs and client ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointContext {
    pub pipeline: String,
    pub table: String,
    pub connector: ConnectorHandle,
}

/// A transport kind (`kafka`, `file`, `http`, ...).
///
/// Opening an endpoint is where connections are made; registering a
/// connector never touches the network.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn input_params(&self) -> &'static [ParamSpec];

    fn output_params(&self) -> &'static [ParamSpec];

    /// Whether records may contain arbitrary bytes (including newlines).
    fn supports_binary(&self) -> bool {
        true
    }

    fn validate(&self, direction: Direction, params: &Params) -> Result<(), ConfigError> {
        let specs = match direction {
            Direction::Input => self.input_params(),
            Direction::Output => self.output_params(),
        };
        validate_params(self.name(), specs, params)
    }

    async fn open_input(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn InputEndpoint>, ConnectorError>;

    async fn open_output(
        &self,
        ctx: &EndpointContext,
        params: &Params,
    ) -> Result<Box<dyn OutputEndpoint>, ConnectorError>;
}

/// Source side of a connector: a FIFO stream of raw records.
#[async_trait]
pub trait InputEndpoint: Send {
    /// Next batch of at most `max` records.
    ///
    /// `Ok(None)` means the input is exhausted. An empty batch means nothing
    /// arrived within the endpoint's poll interval, so callers can check for
    /// pause or stop between polls.
    async fn poll_batch(&mut self, max: usize) -> Result<Option<Vec<Bytes>>, ConnectorError>;
}

/// Sink side of a connector.
#[async_trait]
pub trait OutputEndpoint: Send {
    async fn write_batch(&mut self, records: Vec<Bytes>) -> Result<(), ConnectorError>;

    async fn flush(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}
