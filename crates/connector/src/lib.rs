//! Connectors bind tables and views to external transports and formats.
//!
//! - [`ConnectorCatalog`]: known transport and format kinds
//! - [`ConnectorRegistry`]: the bindings of one pipeline
//! - [`transport`]: kafka, file and http endpoints
//! - [`format`]: csv, json and avro codecs

pub mod catalog;
pub mod config;
pub mod error;
pub mod format;
pub mod registry;
pub mod testing;
pub mod transport;

pub use catalog::ConnectorCatalog;
pub use config::{ConnectorConfig, Direction, FormatConfig, ParamKind, ParamSpec, Params, TransportConfig};
pub use error::{ConfigError, ConnectorError, RecordError};
pub use format::{Decoder, EncodedBatch, Encoder, Format};
pub use registry::{ConnectorHandle, ConnectorRegistry};
pub use transport::{EndpointContext, HttpHub, InputEndpoint, OutputEndpoint, Transport};
