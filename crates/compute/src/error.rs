use ripple_catalog::EvalError;
use ripple_connector::{ConfigError, ConnectorError, RecordError};
use thiserror::Error;

/// Errors raised while running a compiled pipeline.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("bad record on connector {connector} ('{table}'): {error}")]
    Record {
        connector: String,
        table: String,
        error: RecordError,
    },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown view '{0}'")]
    UnknownView(String),
}
