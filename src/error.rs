//! Error handling types for passgraph
//!
//! This module provides the error types shared by the graph builder, the
//! scheduler and pass bodies.

use std::sync::PoisonError;
use thiserror::Error;

use crate::document::EditorId;
use crate::pass::PassId;

/// Errors detected while turning descriptors into a pass graph.
///
/// These are programming errors in the descriptor source: they are reported
/// at build time and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two descriptors of one editor share an id
    #[error("Duplicate pass id {id} for editor {editor}: both '{first}' and '{second}'")]
    DuplicatePassId {
        editor: EditorId,
        id: PassId,
        first: String,
        second: String,
    },

    /// Predecessor declarations form a cycle; the listed passes can never start
    #[error("Dependency cycle among passes {passes:?}")]
    DependencyCycle { passes: Vec<(EditorId, PassId)> },
}

/// Errors surfaced by the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The submitted batch was malformed
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The scheduler has been shut down
    #[error("Scheduler is shut down")]
    ShutDown,

    /// The scheduler was created outside a tokio runtime
    #[error("No tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Outcome of a pass body that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    /// The batch was cancelled; expected control flow, never logged as an error
    #[error("Pass cancelled")]
    Cancelled,

    /// The pass body failed; cancels the whole batch
    #[error("Pass failed: {message}")]
    Failed { message: String },
}

impl PassError {
    /// Create a failure from anything printable
    pub fn failed(message: impl Into<String>) -> Self {
        PassError::Failed {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PassError::Cancelled)
    }
}

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid TOML for [`crate::config::DaemonSettings`]
    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    /// Create a configuration error
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Helper trait to recover a guard from a poisoned std lock.
pub trait LockResultExt<T> {
    /// Recover the guard, logging which operation observed the poison.
    ///
    /// A pass body panicking while a lock is held must not wedge the scheduler,
    /// so the inner value is always handed back.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "passgraph::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
