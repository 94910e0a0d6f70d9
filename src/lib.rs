//! Incremental, cancellable scheduling of analysis passes.
//!
//! Passes declare what they depend on. The scheduler turns one batch of
//! declarations into a dependency graph, collects runnable passes in parallel
//! and applies their results one at a time on a coordinator task, visible
//! ranges first.

pub mod config;
pub mod dirty_range;
pub mod document;
pub mod error;
pub mod executor;
pub mod graph;
pub mod pass;
pub mod registry;

#[cfg(test)]
mod test_helpers;

pub use config::DaemonSettings;
pub use dirty_range::{DirtyRange, DirtyRangeTracker, DirtyTarget};
pub use document::{DocumentId, DocumentProvider, EditorId, MemoryDocuments, TextRange};
pub use error::{ConfigError, GraphError, PassError, SchedulerError, SchedulerResult};
pub use executor::{
    BatchOutcome, DaemonStatus, PassScheduler, PassState, ProgressToken, SchedulerEvent,
    SubmittedPass,
};
pub use graph::{PassBatchRequest, PassGraph, PassGraphBuilder};
pub use pass::{
    ApplyTarget, CollectContext, Collected, PassBody, PassDescriptor, PassFlags, PassId,
    PassScope, PassValue,
};
pub use registry::{Anchor, FactoryRequest, PassFactory, PassRegistration, PassRegistry, ScopeKind};
