use ripple_catalog::CompileError;
use ripple_compute::RuntimeError;
use ripple_connector::{ConfigError, ConnectorError};
use thiserror::Error;

use crate::status::{Action, PipelineStatus};

/// Errors returned by [`crate::PipelineManager`] operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("pipeline '{0}' already exists")]
    DuplicateName(String),

    #[error("pipeline not found: {0}")]
    NotFound(String),

    #[error("connector {connector} is not bound to pipeline '{pipeline}'")]
    UnknownConnector { pipeline: String, connector: String },

    #[error("cannot {action} pipeline '{pipeline}' while it is {status}")]
    InvalidTransition {
        pipeline: String,
        action: Action,
        status: PipelineStatus,
    },

    #[error("pipeline '{0}' has not been compiled")]
    NotCompiled(String),

    #[error("pipeline '{0}' has never been started")]
    NotStarted(String),

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
