//! Pass descriptors and the capability every pass body provides.
//!
//! A pass is one unit of incremental analysis. Its body is split in two:
//! [`PassBody::collect`] runs on the worker pool and must not touch the shared
//! model, [`PassBody::apply`] runs on the coordinator and is the only place
//! the model is mutated.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::dirty_range::DirtyRange;
use crate::document::{DocumentId, EditorId, TextRange};
use crate::error::PassError;
use crate::executor::ProgressToken;

/// Identity of a pass, unique per editor within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub u32);

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-erased result handed from `collect` to `apply`.
pub type PassValue = Box<dyn Any + Send>;

/// What a pass runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassScope {
    /// Runs once per document, however many editors display it.
    Document(DocumentId),
    /// Runs for the declaring editor instance only.
    Editor(DocumentId),
    /// Not tied to a document; never dirty-tracked and never stale.
    Free,
}

impl PassScope {
    pub fn document(&self) -> Option<DocumentId> {
        match self {
            PassScope::Document(document) | PassScope::Editor(document) => Some(*document),
            PassScope::Free => None,
        }
    }
}

/// Capability flags of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassFlags {
    /// May run while indexes are unavailable.
    pub dumb_aware: bool,
    /// The registry's follow-up pass is scheduled after this one is applied.
    pub runs_follow_up: bool,
}

/// Final outcome of `collect`.
pub struct Collected {
    /// Span the result covers; `None` means the whole document.
    pub range: Option<TextRange>,
    pub value: PassValue,
}

impl Collected {
    pub fn new(value: impl Any + Send) -> Self {
        Self {
            range: None,
            value: Box::new(value),
        }
    }

    pub fn in_range(range: TextRange, value: impl Any + Send) -> Self {
        Self {
            range: Some(range),
            value: Box::new(value),
        }
    }

    /// A result that carries nothing to apply beyond "done".
    pub fn empty() -> Self {
        Self::new(())
    }
}

/// Where a result is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyTarget {
    pub pass: PassId,
    /// Editor the pass was scheduled for.
    pub owner: EditorId,
    /// Every editor that receives the result, owner included.
    pub editors: Vec<EditorId>,
    pub document: Option<DocumentId>,
    /// True for results streamed with [`CollectContext::publish`].
    pub partial: bool,
}

/// The body of a pass.
pub trait PassBody: Send + Sync {
    /// Compute the result. Poll [`CollectContext::check_canceled`] often.
    fn collect(&self, ctx: &CollectContext<'_>) -> Result<Collected, PassError>;

    /// Apply a partial or final result to the shared model.
    fn apply(&self, value: PassValue, target: &ApplyTarget);
}

/// One pass as produced by a pass factory for one trigger.
#[derive(Clone)]
pub struct PassDescriptor {
    pub id: PassId,
    pub name: String,
    pub completion_predecessors: Vec<PassId>,
    pub start_predecessors: Vec<PassId>,
    pub scope: PassScope,
    pub flags: PassFlags,
    pub body: Arc<dyn PassBody>,
}

impl PassDescriptor {
    pub fn new(
        id: PassId,
        name: impl Into<String>,
        scope: PassScope,
        body: Arc<dyn PassBody>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            completion_predecessors: Vec::new(),
            start_predecessors: Vec::new(),
            scope,
            flags: PassFlags::default(),
            body,
        }
    }

    /// Start only after these passes have been applied.
    pub fn after_completion_of(mut self, ids: impl IntoIterator<Item = PassId>) -> Self {
        self.completion_predecessors.extend(ids);
        self
    }

    /// Start only after these passes have finished collecting.
    pub fn after_start_of(mut self, ids: impl IntoIterator<Item = PassId>) -> Self {
        self.start_predecessors.extend(ids);
        self
    }

    pub fn dumb_aware(mut self, dumb_aware: bool) -> Self {
        self.flags.dumb_aware = dumb_aware;
        self
    }

    pub fn with_follow_up(mut self) -> Self {
        self.flags.runs_follow_up = true;
        self
    }

    pub fn document(&self) -> Option<DocumentId> {
        self.scope.document()
    }
}

impl fmt::Debug for PassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("completion_predecessors", &self.completion_predecessors)
            .field("start_predecessors", &self.start_predecessors)
            .field("scope", &self.scope)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

type Publisher<'a> = dyn Fn(Option<TextRange>, PassValue) + Send + Sync + 'a;

/// What a running pass sees of the scheduler.
pub struct CollectContext<'a> {
    token: &'a ProgressToken,
    editor: EditorId,
    document: Option<DocumentId>,
    dirty: DirtyRange,
    publisher: &'a Publisher<'a>,
}

impl<'a> CollectContext<'a> {
    pub(crate) fn new(
        token: &'a ProgressToken,
        editor: EditorId,
        document: Option<DocumentId>,
        dirty: DirtyRange,
        publisher: &'a Publisher<'a>,
    ) -> Self {
        Self {
            token,
            editor,
            document,
            dirty,
            publisher,
        }
    }

    pub fn token(&self) -> &ProgressToken {
        self.token
    }

    /// Checkpoint: `Err(PassError::Cancelled)` once the batch is cancelled.
    pub fn check_canceled(&self) -> Result<(), PassError> {
        self.token.check_canceled()
    }

    pub fn editor(&self) -> EditorId {
        self.editor
    }

    pub fn document(&self) -> Option<DocumentId> {
        self.document
    }

    /// What changed since this pass last ran cleanly.
    pub fn dirty_range(&self) -> DirtyRange {
        self.dirty
    }

    /// Stream a partial result to the coordinator before collection ends.
    ///
    /// Ignored once the batch is cancelled.
    pub fn publish(&self, range: Option<TextRange>, value: impl Any + Send) {
        if self.token.is_cancelled() {
            return;
        }
        (self.publisher)(range, Box::new(value));
    }
}
