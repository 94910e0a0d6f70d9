use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;

use super::{DocumentId, DocumentProvider, EditorId, TextRange};
use crate::dirty_range::{DirtyRangeTracker, DirtyTarget};

struct DocumentEntry {
    text: Arc<str>,
    stamp: u64,
}

struct EditorEntry {
    document: DocumentId,
    visible: Option<TextRange>,
    selected_at: u64,
}

/// In-memory documents and editors, usable as the scheduler's provider.
pub struct MemoryDocuments {
    documents: DashMap<DocumentId, DocumentEntry>,
    editors: DashMap<EditorId, EditorEntry>,
    focused: ArcSwapOption<EditorId>,
    dumb: AtomicBool,
    selection_clock: AtomicU64,
    tracker: Option<Arc<DirtyRangeTracker>>,
}

impl Default for MemoryDocuments {
    fn default() -> Self {
        Self {
            documents: DashMap::new(),
            editors: DashMap::new(),
            focused: ArcSwapOption::empty(),
            dumb: AtomicBool::new(false),
            selection_clock: AtomicU64::new(0),
            tracker: None,
        }
    }
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edits made through [`edit`](Self::edit) also mark the tracker dirty.
    pub fn with_tracker(tracker: Arc<DirtyRangeTracker>) -> Self {
        Self {
            tracker: Some(tracker),
            ..Self::default()
        }
    }

    pub fn open_document(&self, document: DocumentId, text: impl Into<Arc<str>>) {
        self.documents.insert(
            document,
            DocumentEntry {
                text: text.into(),
                stamp: 0,
            },
        );
    }

    /// Show a document in a new editor. The editor becomes the selected one.
    pub fn open_editor(&self, editor: EditorId, document: DocumentId) {
        let selected_at = self.selection_clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.editors.insert(
            editor,
            EditorEntry {
                document,
                visible: None,
                selected_at,
            },
        );
    }

    pub fn close_editor(&self, editor: EditorId) {
        self.editors.remove(&editor);
    }

    /// Remove a document and every editor displaying it.
    pub fn close_document(&self, document: DocumentId) {
        self.documents.remove(&document);
        self.editors.retain(|_, entry| entry.document != document);
        if let Some(tracker) = &self.tracker {
            tracker.forget(document);
        }
    }

    pub fn set_visible_range(&self, editor: EditorId, range: TextRange) {
        if let Some(mut entry) = self.editors.get_mut(&editor) {
            entry.visible = Some(range);
        }
    }

    pub fn select_editor(&self, editor: EditorId) {
        let selected_at = self.selection_clock.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut entry) = self.editors.get_mut(&editor) {
            entry.selected_at = selected_at;
        }
    }

    pub fn set_focused(&self, editor: Option<EditorId>) {
        self.focused.store(editor.map(Arc::new));
    }

    pub fn set_dumb(&self, dumb: bool) {
        self.dumb.store(dumb, Ordering::SeqCst);
    }

    /// Replace `range` with `replacement`, bump the stamp and return it.
    ///
    /// Returns `None` for unknown documents.
    pub fn edit(&self, document: DocumentId, range: TextRange, replacement: &str) -> Option<u64> {
        let stamp = {
            let mut entry = self.documents.get_mut(&document)?;
            let text = &entry.text;
            let start = range.start.min(text.len());
            let end = range.end.min(text.len());
            let mut updated = String::with_capacity(text.len() + replacement.len());
            updated.push_str(text.get(..start).unwrap_or_default());
            updated.push_str(replacement);
            updated.push_str(text.get(end..).unwrap_or_default());
            entry.text = updated.into();
            entry.stamp += 1;
            entry.stamp
        };

        if let Some(tracker) = &self.tracker {
            let dirty = TextRange::new(
                range.start,
                range.start + replacement.len().max(range.len()),
            );
            tracker.mark_dirty(document, DirtyTarget::All, Some(dirty), "document edit");
        }
        Some(stamp)
    }

    /// Snapshot of the current text.
    pub fn text(&self, document: DocumentId) -> Option<Arc<str>> {
        self.documents.get(&document).map(|entry| Arc::clone(&entry.text))
    }
}

impl DocumentProvider for MemoryDocuments {
    fn modification_stamp(&self, document: DocumentId) -> u64 {
        self.documents
            .get(&document)
            .map(|entry| entry.stamp)
            .unwrap_or_default()
    }

    fn priority_range(&self, editor: EditorId) -> Option<TextRange> {
        self.editors.get(&editor).and_then(|entry| entry.visible)
    }

    fn active_editors(&self) -> Vec<(EditorId, DocumentId)> {
        let mut editors: Vec<_> = self
            .editors
            .iter()
            .map(|entry| (*entry.key(), entry.document))
            .collect();
        editors.sort();
        editors
    }

    fn focused_editor(&self) -> Option<EditorId> {
        self.focused.load_full().map(|editor| *editor)
    }

    fn selected_editor(&self, document: DocumentId) -> Option<EditorId> {
        self.editors
            .iter()
            .filter(|entry| entry.document == document)
            .max_by_key(|entry| entry.selected_at)
            .map(|entry| *entry.key())
    }

    fn is_dumb(&self) -> bool {
        self.dumb.load(Ordering::SeqCst)
    }

    fn is_editor_valid(&self, editor: EditorId) -> bool {
        self.editors.contains_key(&editor)
    }
}
