use super::{DocumentId, EditorId, TextRange};

/// Document/session state the scheduler reads but never owns.
///
/// Implementations must be cheap to query: the coordinator consults
/// [`modification_stamp`](Self::modification_stamp) and
/// [`priority_range`](Self::priority_range) once per applied result.
pub trait DocumentProvider: Send + Sync {
    /// Monotonic stamp bumped on every modification of the document.
    fn modification_stamp(&self, document: DocumentId) -> u64;

    /// The visible portion of the document in this editor, if known.
    fn priority_range(&self, editor: EditorId) -> Option<TextRange>;

    /// Editors currently open, with the document each displays.
    fn active_editors(&self) -> Vec<(EditorId, DocumentId)>;

    /// The editor holding input focus.
    fn focused_editor(&self) -> Option<EditorId> {
        None
    }

    /// The most recently selected editor for a document.
    fn selected_editor(&self, _document: DocumentId) -> Option<EditorId> {
        None
    }

    /// True while indexes are unavailable; only dumb-aware passes run.
    fn is_dumb(&self) -> bool {
        false
    }

    /// False once the editor has been closed.
    fn is_editor_valid(&self, _editor: EditorId) -> bool {
        true
    }
}
