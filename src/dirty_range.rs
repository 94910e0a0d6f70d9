//! Per-document record of what each pass still has to recompute.
//!
//! Every document keeps one entry per pass id. Edits widen entries, and the
//! coordinator clears an entry once that pass's result has been applied.
//! Clearing is guarded by a [`DirtyStamp`] captured when the pass started
//! collecting: if the entry was widened after that point the pass worked on
//! outdated text and the entry stays dirty.
//!
//! # Thread Safety
//!
//! All mutations go through the `DashMap` entry guard of the document, so
//! concurrent edits and concurrent pass completions on one document are
//! serialized without holding a lock across a pass.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::document::{DocumentId, TextRange};
use crate::pass::PassId;

const LOG_TARGET: &str = "passgraph::dirty";

/// What a pass has to recompute for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyRange {
    /// Nothing changed since the pass last ran cleanly.
    Clean,
    /// Only this span changed.
    Span(TextRange),
    /// The whole document needs recomputation.
    Whole,
}

impl DirtyRange {
    /// Widen to cover `range` as well; `None` means the whole document.
    pub fn widen(self, range: Option<TextRange>) -> DirtyRange {
        match (self, range) {
            (DirtyRange::Whole, _) | (_, None) => DirtyRange::Whole,
            (DirtyRange::Clean, Some(range)) => DirtyRange::Span(range),
            (DirtyRange::Span(current), Some(range)) => DirtyRange::Span(current.union(&range)),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, DirtyRange::Clean)
    }

    /// The span to recompute, or `None` for "whole document" and "clean".
    pub fn span(&self) -> Option<TextRange> {
        match self {
            DirtyRange::Span(range) => Some(*range),
            _ => None,
        }
    }
}

/// Which pass ids an edit invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyTarget {
    Pass(PassId),
    All,
}

/// Position in a document's modification sequence, captured at collect start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirtyStamp(u64);

#[derive(Debug, Clone, Copy)]
struct PassStatus {
    range: DirtyRange,
    dirtied_at: u64,
}

#[derive(Debug)]
struct DocumentStatus {
    sequence: u64,
    passes: HashMap<PassId, PassStatus>,
    /// Status inherited by pass ids with no entry yet.
    default: PassStatus,
}

impl Default for DocumentStatus {
    fn default() -> Self {
        Self {
            sequence: 0,
            passes: HashMap::new(),
            default: PassStatus {
                range: DirtyRange::Whole,
                dirtied_at: 0,
            },
        }
    }
}

impl DocumentStatus {
    fn status(&self, pass: PassId) -> PassStatus {
        self.passes.get(&pass).copied().unwrap_or(self.default)
    }
}

/// Tracks dirty ranges per (document, pass id).
#[derive(Default)]
pub struct DirtyRangeTracker {
    documents: DashMap<DocumentId, DocumentStatus>,
}

impl DirtyRangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Widen the dirty range of one pass, or of every pass with [`DirtyTarget::All`].
    ///
    /// `range` of `None` dirties the whole document. Never narrows.
    pub fn mark_dirty(
        &self,
        document: DocumentId,
        target: DirtyTarget,
        range: Option<TextRange>,
        reason: &str,
    ) {
        let mut status = self.documents.entry(document).or_default();
        status.sequence += 1;
        let sequence = status.sequence;

        match target {
            DirtyTarget::Pass(pass) => {
                let current = status.status(pass);
                status.passes.insert(
                    pass,
                    PassStatus {
                        range: current.range.widen(range),
                        dirtied_at: sequence,
                    },
                );
            }
            DirtyTarget::All => {
                for entry in status.passes.values_mut() {
                    entry.range = entry.range.widen(range);
                    entry.dirtied_at = sequence;
                }
                status.default = PassStatus {
                    range: status.default.range.widen(range),
                    dirtied_at: sequence,
                };
            }
        }

        log::trace!(
            target: LOG_TARGET,
            "{} dirty for {:?} ({:?}): {}",
            document,
            target,
            range,
            reason
        );
    }

    /// Capture the modification sequence before a pass starts collecting.
    pub fn begin_collect(&self, document: DocumentId) -> DirtyStamp {
        DirtyStamp(
            self.documents
                .get(&document)
                .map(|status| status.sequence)
                .unwrap_or_default(),
        )
    }

    /// Clear the dirty range of `pass` unless it was widened after `stamp`.
    ///
    /// Only the coordinator calls this, after a successful, non-cancelled
    /// apply. Returns whether the entry is now clean.
    pub(crate) fn mark_clean(&self, document: DocumentId, pass: PassId, stamp: DirtyStamp) -> bool {
        let mut status = self.documents.entry(document).or_default();
        let current = status.status(pass);
        if current.dirtied_at > stamp.0 {
            log::trace!(
                target: LOG_TARGET,
                "{} pass {} re-dirtied during collection, keeping {:?}",
                document,
                pass,
                current.range
            );
            return false;
        }
        status.passes.insert(
            pass,
            PassStatus {
                range: DirtyRange::Clean,
                dirtied_at: current.dirtied_at,
            },
        );
        true
    }

    /// The range `pass` still has to recompute, or [`DirtyRange::Clean`].
    pub fn dirty_range_for(&self, document: DocumentId, pass: PassId) -> DirtyRange {
        self.documents
            .get(&document)
            .map(|status| status.status(pass).range)
            .unwrap_or(DirtyRange::Whole)
    }

    pub fn is_clean(&self, document: DocumentId, pass: PassId) -> bool {
        self.dirty_range_for(document, pass).is_clean()
    }

    /// Drop all state for a closed document.
    pub fn forget(&self, document: DocumentId) {
        self.documents.remove(&document);
    }
}
