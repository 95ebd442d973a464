//! Incremental execution of compiled pipelines.
//!
//! - [`zset`]: weighted row collections used for every delta
//! - [`operator`]: incremental relational operators
//! - [`circuit`]: a plan instantiated with operator state
//! - [`runtime`]: connector workers driving a circuit

pub mod circuit;
pub mod error;
pub mod metrics;
pub mod operator;
pub mod runtime;
pub mod zset;

pub use circuit::Circuit;
pub use error::RuntimeError;
pub use metrics::{CircuitStats, ConnectorMetrics, ConnectorMetricsSnapshot, JobMetrics};
pub use operator::IncrementalOperator;
pub use runtime::{JobRuntime, JobSpec, RunState, ViewReader};
pub use zset::ZSet;
