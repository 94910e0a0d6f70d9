//! Registered pass factories, built once at startup.
//!
//! The registry is an explicit value handed to the scheduler. For every
//! trigger it asks each factory for a pass per active editor, skipping passes
//! the dirty range tracker reports clean, and resolves registration anchors
//! into predecessor ids.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::dirty_range::{DirtyRange, DirtyRangeTracker};
use crate::document::{DocumentId, DocumentProvider, EditorId};
use crate::graph::PassBatchRequest;
use crate::pass::{PassBody, PassDescriptor, PassFlags, PassId, PassScope};

/// What a factory is asked to create a pass for.
#[derive(Debug, Clone, Copy)]
pub struct FactoryRequest {
    pub editor: EditorId,
    pub document: DocumentId,
    pub dirty: DirtyRange,
}

/// Creates the body of one registered pass per trigger.
pub trait PassFactory: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when there is nothing to do for this editor.
    fn create_pass(&self, request: &FactoryRequest) -> Option<Arc<dyn PassBody>>;
}

/// Scope kind of a registered pass; the document comes from the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Document,
    Editor,
    Free,
}

/// Where a registered pass sits relative to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Listed before all others, no implicit predecessors.
    First,
    /// Runs after every non-`Last` pass has been applied.
    Last,
    /// The anchor pass waits for this one.
    Before(PassId),
    /// Waits for the anchor pass.
    After(PassId),
}

/// Registration of one pass factory.
pub struct PassRegistration {
    pub factory: Arc<dyn PassFactory>,
    pub scope: ScopeKind,
    pub anchor: Anchor,
    pub completion_predecessors: Vec<PassId>,
    pub start_predecessors: Vec<PassId>,
    pub flags: PassFlags,
}

impl PassRegistration {
    pub fn new(factory: Arc<dyn PassFactory>, scope: ScopeKind) -> Self {
        Self {
            factory,
            scope,
            anchor: Anchor::First,
            completion_predecessors: Vec::new(),
            start_predecessors: Vec::new(),
            flags: PassFlags::default(),
        }
    }

    pub fn anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn after_completion_of(mut self, ids: impl IntoIterator<Item = PassId>) -> Self {
        self.completion_predecessors.extend(ids);
        self
    }

    pub fn after_start_of(mut self, ids: impl IntoIterator<Item = PassId>) -> Self {
        self.start_predecessors.extend(ids);
        self
    }

    pub fn flags(mut self, flags: PassFlags) -> Self {
        self.flags = flags;
        self
    }
}

struct RegisteredPass {
    id: PassId,
    factory: Arc<dyn PassFactory>,
    scope: ScopeKind,
    anchor: Anchor,
    completion_predecessors: Vec<PassId>,
    start_predecessors: Vec<PassId>,
    flags: PassFlags,
}

/// Collects registrations; ids are handed out in registration order from 1.
#[derive(Default)]
pub struct PassRegistryBuilder {
    passes: Vec<RegisteredPass>,
    follow_up: Option<Arc<dyn PassFactory>>,
}

impl PassRegistryBuilder {
    pub fn register(&mut self, registration: PassRegistration) -> PassId {
        let id = PassId(self.passes.len() as u32 + 1);
        self.passes.push(RegisteredPass {
            id,
            factory: registration.factory,
            scope: registration.scope,
            anchor: registration.anchor,
            completion_predecessors: registration.completion_predecessors,
            start_predecessors: registration.start_predecessors,
            flags: registration.flags,
        });
        id
    }

    /// Pass scheduled after every pass flagged `runs_follow_up`.
    pub fn follow_up(&mut self, factory: Arc<dyn PassFactory>) -> &mut Self {
        self.follow_up = Some(factory);
        self
    }

    pub fn build(mut self) -> PassRegistry {
        let ids: Vec<PassId> = self.passes.iter().map(|pass| pass.id).collect();
        let not_last: Vec<PassId> = self
            .passes
            .iter()
            .filter(|pass| pass.anchor != Anchor::Last)
            .map(|pass| pass.id)
            .collect();

        let mut before_edges = Vec::new();
        for pass in &mut self.passes {
            match pass.anchor {
                Anchor::After(anchor) if ids.contains(&anchor) => {
                    push_unique(&mut pass.completion_predecessors, anchor);
                }
                Anchor::Before(anchor) if ids.contains(&anchor) => {
                    before_edges.push((anchor, pass.id));
                }
                Anchor::Last => {
                    for id in &not_last {
                        push_unique(&mut pass.completion_predecessors, *id);
                    }
                }
                _ => {}
            }
        }
        for (anchor, predecessor) in before_edges {
            if let Some(pass) = self.passes.iter_mut().find(|pass| pass.id == anchor) {
                push_unique(&mut pass.completion_predecessors, predecessor);
            }
        }

        // Firsts, then the rest in registration order.
        self.passes.sort_by_key(|pass| pass.anchor != Anchor::First);

        let next_id = AtomicU32::new(ids.len() as u32);
        PassRegistry {
            passes: self.passes,
            follow_up: self.follow_up,
            next_id,
        }
    }
}

fn push_unique(ids: &mut Vec<PassId>, id: PassId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Registered passes, the source of per-trigger descriptors.
pub struct PassRegistry {
    passes: Vec<RegisteredPass>,
    follow_up: Option<Arc<dyn PassFactory>>,
    next_id: AtomicU32,
}

impl PassRegistry {
    pub fn builder() -> PassRegistryBuilder {
        PassRegistryBuilder::default()
    }

    /// Id for a pass generated at scheduling time; never collides with registered ids.
    pub fn next_available_id(&self) -> PassId {
        PassId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Descriptors for every active editor of the provider.
    pub fn create_passes(
        &self,
        provider: &dyn DocumentProvider,
        tracker: &DirtyRangeTracker,
    ) -> PassBatchRequest {
        self.create_passes_for(&provider.active_editors(), tracker)
    }

    /// Descriptors for the given editors.
    ///
    /// Document and editor passes that are clean for the document are not
    /// created; their dependents treat them as satisfied.
    pub fn create_passes_for(
        &self,
        editors: &[(EditorId, DocumentId)],
        tracker: &DirtyRangeTracker,
    ) -> PassBatchRequest {
        let mut request = PassBatchRequest::new();
        for &(editor, document) in editors {
            let passes: Vec<PassDescriptor> = self
                .passes
                .iter()
                .filter_map(|pass| self.describe(pass, editor, document, tracker))
                .collect();
            if !passes.is_empty() {
                request.insert(editor, passes);
            }
        }
        request
    }

    fn describe(
        &self,
        pass: &RegisteredPass,
        editor: EditorId,
        document: DocumentId,
        tracker: &DirtyRangeTracker,
    ) -> Option<PassDescriptor> {
        let dirty = match pass.scope {
            ScopeKind::Free => DirtyRange::Whole,
            ScopeKind::Document | ScopeKind::Editor => tracker.dirty_range_for(document, pass.id),
        };
        if dirty.is_clean() {
            return None;
        }
        let request = FactoryRequest {
            editor,
            document,
            dirty,
        };
        let body = pass.factory.create_pass(&request)?;
        let scope = match pass.scope {
            ScopeKind::Document => PassScope::Document(document),
            ScopeKind::Editor => PassScope::Editor(document),
            ScopeKind::Free => PassScope::Free,
        };
        let mut descriptor = PassDescriptor::new(pass.id, pass.factory.name(), scope, body)
            .after_completion_of(pass.completion_predecessors.iter().copied())
            .after_start_of(pass.start_predecessors.iter().copied());
        descriptor.flags = pass.flags;
        Some(descriptor)
    }

    /// Follow-up pass for `predecessor`, bound to `editor`, with a fresh id.
    pub(crate) fn follow_up_for(
        &self,
        editor: EditorId,
        document: Option<DocumentId>,
        predecessor: PassId,
    ) -> Option<PassDescriptor> {
        let factory = self.follow_up.as_ref()?;
        let document = document?;
        let request = FactoryRequest {
            editor,
            document,
            dirty: DirtyRange::Whole,
        };
        let body = factory.create_pass(&request)?;
        Some(
            PassDescriptor::new(
                self.next_available_id(),
                factory.name(),
                PassScope::Editor(document),
                body,
            )
            .after_completion_of([predecessor]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirty_range::DirtyTarget;
    use crate::document::MemoryDocuments;
    use crate::graph::PassGraphBuilder;
    use crate::test_helpers::NamedFactory;

    fn factory(name: &'static str) -> Arc<dyn PassFactory> {
        Arc::new(NamedFactory(name))
    }

    fn descriptors(registry: &PassRegistry) -> Vec<PassDescriptor> {
        let tracker = DirtyRangeTracker::new();
        let mut request =
            registry.create_passes_for(&[(EditorId(1), DocumentId(10))], &tracker);
        request.remove(&EditorId(1)).unwrap_or_default()
    }

    #[test]
    fn ids_follow_registration_order() {
        let mut builder = PassRegistry::builder();
        let syntax = builder.register(
            PassRegistration::new(factory("syntax"), ScopeKind::Document)
                .anchor(Anchor::First),
        );
        let semantic = builder.register(
            PassRegistration::new(factory("semantic"), ScopeKind::Document)
                .anchor(Anchor::First),
        );
        assert_eq!((syntax, semantic), (PassId(1), PassId(2)));

        let registry = builder.build();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.next_available_id(), PassId(3));
        assert_eq!(registry.next_available_id(), PassId(4));
    }

    #[test]
    fn anchors_become_completion_predecessors() {
        let mut builder = PassRegistry::builder();
        let general = builder.register(
            PassRegistration::new(factory("general"), ScopeKind::Document).anchor(Anchor::First),
        );
        let inspections = builder.register(
            PassRegistration::new(factory("inspections"), ScopeKind::Document)
                .anchor(Anchor::After(general)),
        );
        let markers = builder.register(
            PassRegistration::new(factory("markers"), ScopeKind::Document)
                .anchor(Anchor::Before(inspections)),
        );
        let wrap_up = builder.register(
            PassRegistration::new(factory("wrap-up"), ScopeKind::Editor).anchor(Anchor::Last),
        );
        let registry = builder.build();

        let passes = descriptors(&registry);
        let by_id = |id: PassId| passes.iter().find(|pass| pass.id == id).unwrap();

        assert!(by_id(general).completion_predecessors.is_empty());
        assert_eq!(by_id(inspections).completion_predecessors, vec![general, markers]);
        assert!(by_id(markers).completion_predecessors.is_empty());
        assert_eq!(
            by_id(wrap_up).completion_predecessors,
            vec![general, inspections, markers]
        );
        assert_eq!(by_id(wrap_up).scope, PassScope::Editor(DocumentId(10)));
    }

    #[test]
    fn first_anchored_passes_are_listed_first() {
        let mut builder = PassRegistry::builder();
        builder.register(
            PassRegistration::new(factory("late"), ScopeKind::Free)
                .anchor(Anchor::After(PassId(9))),
        );
        builder.register(
            PassRegistration::new(factory("early"), ScopeKind::Free)
                .anchor(Anchor::First),
        );
        let registry = builder.build();

        let names: Vec<String> = descriptors(&registry).into_iter().map(|pass| pass.name).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn clean_passes_are_not_created() {
        let mut builder = PassRegistry::builder();
        let syntax =
            builder.register(PassRegistration::new(factory("syntax"), ScopeKind::Document));
        let free = builder.register(PassRegistration::new(factory("free"), ScopeKind::Free));
        let registry = builder.build();
        let tracker = DirtyRangeTracker::new();
        let stamp = tracker.begin_collect(DocumentId(10));
        tracker.mark_clean(DocumentId(10), syntax, stamp);

        let request = registry.create_passes_for(&[(EditorId(1), DocumentId(10))], &tracker);
        let ids: Vec<PassId> = request[&EditorId(1)].iter().map(|pass| pass.id).collect();
        assert_eq!(ids, vec![free]);

        tracker.mark_dirty(DocumentId(10), DirtyTarget::Pass(syntax), None, "edit");
        let request = registry.create_passes_for(&[(EditorId(1), DocumentId(10))], &tracker);
        assert_eq!(request[&EditorId(1)].len(), 2);
    }

    #[test]
    fn follow_up_is_scheduled_after_flagged_pass() {
        let mut builder = PassRegistry::builder();
        let general = builder.register(
            PassRegistration::new(factory("general"), ScopeKind::Document).flags(PassFlags {
                runs_follow_up: true,
                ..PassFlags::default()
            }),
        );
        builder.follow_up(factory("intentions"));
        let registry = builder.build();
        let docs = MemoryDocuments::new();

        let request =
            registry.create_passes_for(&[(EditorId(1), DocumentId(10))], &DirtyRangeTracker::new());
        let graph = PassGraphBuilder::new(&docs)
            .with_registry(&registry)
            .build(request)
            .unwrap();

        assert_eq!(graph.len(), 2);
        let general_node = graph.find(EditorId(1), general).unwrap();
        let follow_up = graph.nodes[general_node].on_completion[0];
        assert_eq!(graph.nodes[follow_up].descriptor.name, "intentions");
        assert_eq!(graph.nodes[follow_up].descriptor.id, PassId(2));
        assert_eq!(
            graph.nodes[follow_up].descriptor.scope,
            PassScope::Editor(DocumentId(10))
        );
    }
}
