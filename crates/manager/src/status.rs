//! Pipeline lifecycle states and the transitions between them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Program submitted, no plan yet.
    Created,
    Compiling,
    /// Plan ready; connectors may still change.
    Compiled,
    Running,
    /// Reads halted, connections and state kept.
    Paused,
    Stopped,
    Failed,
}

impl PipelineStatus {
    /// Whether a job is attached and its connector bindings are frozen.
    pub fn is_active(self) -> bool {
        matches!(self, PipelineStatus::Running | PipelineStatus::Paused)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStatus::Created => "created",
            PipelineStatus::Compiling => "compiling",
            PipelineStatus::Compiled => "compiled",
            PipelineStatus::Running => "running",
            PipelineStatus::Paused => "paused",
            PipelineStatus::Stopped => "stopped",
            PipelineStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Consistent view of a pipeline's lifecycle, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: PipelineStatus,
    /// Detail of the last failure. Kept after a failed compile returns the
    /// pipeline to `created`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Program revision, starting at 1.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(status: PipelineStatus, error: Option<String>, revision: u64) -> Self {
        Self {
            status,
            error,
            revision,
            updated_at: Utc::now(),
        }
    }
}

/// A lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Compile,
    Start,
    Pause,
    Stop,
    Reset,
    /// Change the program, pipeline settings or connectors.
    Configure,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Compile => "compile",
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Stop => "stop",
            Action::Reset => "reset",
            Action::Configure => "configure",
        };
        f.write_str(s)
    }
}

/// Outcome of checking a request against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Perform the request.
    Apply,
    /// Already in the requested state; succeed without change.
    Noop,
    Invalid,
}

impl Action {
    pub fn check(self, from: PipelineStatus) -> Transition {
        use PipelineStatus::*;
        match (self, from) {
            (Action::Compile, Created | Compiled) => Transition::Apply,
            (Action::Start, Compiled | Paused) => Transition::Apply,
            (Action::Start, Running) => Transition::Noop,
            (Action::Pause, Running) => Transition::Apply,
            (Action::Pause, Paused) => Transition::Noop,
            (Action::Stop, Running | Paused) => Transition::Apply,
            (Action::Stop, Stopped) => Transition::Noop,
            (Action::Reset, Failed | Stopped) => Transition::Apply,
            (Action::Configure, Created | Compiled | Stopped | Failed) => Transition::Apply,
            _ => Transition::Invalid,
        }
    }
}
