pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{Config, LogFormat, RecordErrorPolicy, RetryConfig, RuntimeConfig};
pub use error::ValueError;
pub use types::{normalize_ident, ColumnSchema, SqlType};
pub use value::{parse_timestamp, Row, Value};
