//! Known transport and format kinds.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConnectorConfig;
use crate::error::ConfigError;
use crate::format::{AvroFormat, CsvFormat, Format, JsonFormat};
use crate::transport::{FileTransport, HttpHub, HttpTransport, KafkaTransport, Transport};

/// Name → implementation maps for transports and formats.
///
/// Built-in kinds can be replaced by registering another implementation
/// under the same name.
#[derive(Clone)]
pub struct ConnectorCatalog {
    transports: HashMap<String, Arc<dyn Transport>>,
    formats: HashMap<String, Arc<dyn Format>>,
    http: HttpHub,
}

impl std::fmt::Debug for ConnectorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorCatalog")
            .field("transports", &self.transport_names())
            .field("formats", &self.format_names())
            .finish()
    }
}

impl Default for ConnectorCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConnectorCatalog {
    /// Catalog with no kinds registered.
    pub fn empty() -> Self {
        Self {
            transports: HashMap::new(),
            formats: HashMap::new(),
            http: HttpHub::new(),
        }
    }

    /// kafka, file and http transports; csv, json and avro formats.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        let http = HttpTransport::new(catalog.http.clone());
        catalog.register_transport(Arc::new(KafkaTransport));
        catalog.register_transport(Arc::new(FileTransport));
        catalog.register_transport(Arc::new(http));
        catalog.register_format(Arc::new(CsvFormat));
        catalog.register_format(Arc::new(JsonFormat));
        catalog.register_format(Arc::new(AvroFormat));
        catalog
    }

    pub fn register_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transports.insert(transport.name().to_string(), transport);
    }

    pub fn register_format(&mut self, format: Arc<dyn Format>) {
        self.formats.insert(format.name().to_string(), format);
    }

    pub fn transport(&self, kind: &str) -> Result<Arc<dyn Transport>, ConfigError> {
        self.transports
            .get(&kind.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTransport(kind.to_string()))
    }

    pub fn format(&self, kind: &str) -> Result<Arc<dyn Format>, ConfigError> {
        self.formats
            .get(&kind.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownFormat(kind.to_string()))
    }

    /// Hub shared by every endpoint of the built-in http transport.
    pub fn http_hub(&self) -> &HttpHub {
        &self.http
    }

    pub fn transport_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn format_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.formats.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check kinds, parameters and their combination. No I/O.
    pub fn validate(&self, config: &ConnectorConfig) -> Result<(), ConfigError> {
        let transport = self.transport(&config.transport.kind)?;
        let format = self.format(&config.format.kind)?;
        transport.validate(config.direction, &config.transport.params)?;
        format.validate(&config.format.params)?;
        if format.is_binary() && !transport.supports_binary() {
            return Err(ConfigError::Unsupported(format!(
                "{} records cannot be carried by the line-oriented {} transport",
                format.name(),
                transport.name()
            )));
        }
        Ok(())
    }
}
