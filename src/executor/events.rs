//! Scheduler notifications for status and UI collaborators.

use std::fmt;

use super::BatchOutcome;
use crate::document::EditorId;
use crate::pass::PassId;

/// Event broadcast through [`PassScheduler::subscribe`](super::PassScheduler::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    BatchStarting {
        batch: u64,
        editors: Vec<EditorId>,
    },
    BatchFinished {
        batch: u64,
        editors: Vec<EditorId>,
        outcome: BatchOutcome,
    },
    /// A final result was applied to `editor`.
    ResultApplied {
        batch: u64,
        pass: PassId,
        editor: EditorId,
    },
}

impl SchedulerEvent {
    pub fn batch(&self) -> u64 {
        match self {
            SchedulerEvent::BatchStarting { batch, .. }
            | SchedulerEvent::BatchFinished { batch, .. }
            | SchedulerEvent::ResultApplied { batch, .. } => *batch,
        }
    }
}

/// Coarse scheduler state for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// A batch is running.
    Analyzing,
    /// A replacement batch is waiting out the restart delay.
    Suspended,
    /// Disabled by settings, or shut down.
    Disabled,
    /// Nothing running or scheduled.
    Finished,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DaemonStatus::Analyzing => "analyzing",
            DaemonStatus::Suspended => "suspended",
            DaemonStatus::Disabled => "disabled",
            DaemonStatus::Finished => "finished",
        };
        f.write_str(label)
    }
}
