//! Pipeline lifecycle management.
//!
//! [`PipelineManager`] owns named pipelines. Each pipeline holds a SQL
//! program, its connector bindings and, once started, a running job:
//!
//! ```text
//! created -> compiling -> compiled -> running <-> paused -> stopped
//!                |                       |
//!                +-> failed (-> created) +-> failed
//! ```

pub mod error;
pub mod manager;
pub mod pipeline;
pub mod status;

pub use error::ManagerError;
pub use manager::PipelineManager;
pub use pipeline::{PipelineConfig, PipelineHandle, PipelineSummary};
pub use status::{Action, PipelineStatus, StatusSnapshot, Transition};
