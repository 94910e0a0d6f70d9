//! Turns per-editor descriptor lists into a schedulable dependency graph.
//!
//! # Deduplication
//!
//! Several editors may display one document and each declares the same
//! document-scoped passes. Only the passes of one owning editor are scheduled
//! per document; every declaring editor is recorded as an apply target so
//! it still receives the result.
//!
//! # Edges
//!
//! Predecessor counters are incremented while linking, so the initial
//! runnable set is known before anything runs. A predecessor id with no
//! descriptor in the batch counts as already satisfied.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::document::{DocumentId, DocumentProvider, EditorId};
use crate::error::GraphError;
use crate::pass::{PassDescriptor, PassId, PassScope};
use crate::registry::PassRegistry;

/// Descriptors requested for one trigger, per editor, in declaration order.
pub type PassBatchRequest = BTreeMap<EditorId, Vec<PassDescriptor>>;

/// One schedulable pass.
#[derive(Debug)]
pub struct GraphNode {
    pub descriptor: PassDescriptor,
    /// Editor the pass runs for.
    pub owner: EditorId,
    /// Editors the result is applied to, owner first.
    pub targets: Vec<EditorId>,
    /// Released once this pass has been applied.
    pub on_completion: Vec<usize>,
    /// Released once this pass has finished collecting.
    pub on_start: Vec<usize>,
    /// Number of incoming edges.
    pub predecessors: usize,
}

/// Dependency graph for one batch.
#[derive(Debug, Default)]
pub struct PassGraph {
    pub nodes: Vec<GraphNode>,
    /// Nodes with no predecessors, in creation order.
    pub free: Vec<usize>,
}

impl PassGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node scheduled for `(editor, id)`.
    pub fn find(&self, editor: EditorId, id: PassId) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| node.owner == editor && node.descriptor.id == id)
    }
}

#[derive(Default)]
struct BuildState {
    nodes: Vec<GraphNode>,
    index: HashMap<(EditorId, PassId), usize>,
}

/// Builds a [`PassGraph`] from a [`PassBatchRequest`].
pub struct PassGraphBuilder<'a> {
    provider: &'a dyn DocumentProvider,
    registry: Option<&'a PassRegistry>,
}

impl<'a> PassGraphBuilder<'a> {
    pub fn new(provider: &'a dyn DocumentProvider) -> Self {
        Self {
            provider,
            registry: None,
        }
    }

    /// Use the registry's follow-up pass for descriptors flagged `runs_follow_up`.
    pub fn with_registry(mut self, registry: &'a PassRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(&self, request: PassBatchRequest) -> Result<PassGraph, GraphError> {
        let mut declared: HashMap<EditorId, HashMap<PassId, PassDescriptor>> = HashMap::new();
        let mut documents: BTreeMap<DocumentId, Vec<EditorId>> = BTreeMap::new();

        for (editor, passes) in &request {
            let by_id = declared.entry(*editor).or_default();
            for pass in passes {
                if let Some(previous) = by_id.insert(pass.id, pass.clone()) {
                    return Err(GraphError::DuplicatePassId {
                        editor: *editor,
                        id: pass.id,
                        first: previous.name,
                        second: pass.name.clone(),
                    });
                }
                if let PassScope::Document(document) = pass.scope {
                    let editors = documents.entry(document).or_default();
                    if !editors.contains(editor) {
                        editors.push(*editor);
                    }
                }
            }
        }

        let owners: BTreeMap<DocumentId, EditorId> = documents
            .iter()
            .map(|(document, editors)| (*document, self.select_owner(*document, editors)))
            .collect();

        let linker = Linker {
            builder: self,
            declared: &declared,
            documents: &documents,
            owners: &owners,
        };
        let mut state = BuildState::default();

        for (document, owner) in &owners {
            let mut passes: Vec<&PassDescriptor> = request
                .get(owner)
                .into_iter()
                .flatten()
                .filter(|pass| pass.scope == PassScope::Document(*document))
                .collect();
            passes.sort_by_key(|pass| pass.id);
            for pass in passes {
                linker.create(&mut state, *owner, pass.clone());
            }
        }

        for (editor, passes) in &request {
            for pass in passes.iter().filter(|pass| matches!(pass.scope, PassScope::Editor(_))) {
                linker.create(&mut state, *editor, pass.clone());
            }
        }

        for (editor, passes) in &request {
            for pass in passes.iter().filter(|pass| pass.scope == PassScope::Free) {
                linker.create(&mut state, *editor, pass.clone());
            }
        }

        let graph = PassGraph {
            free: (0..state.nodes.len())
                .filter(|&index| state.nodes[index].predecessors == 0)
                .collect(),
            nodes: state.nodes,
        };
        check_consistency(&graph)?;
        Ok(graph)
    }

    /// The focused editor, else the document's selected editor, else the first declaring editor.
    fn select_owner(&self, document: DocumentId, editors: &[EditorId]) -> EditorId {
        if let Some(focused) = self.provider.focused_editor() {
            if editors.contains(&focused) {
                return focused;
            }
        }
        if let Some(selected) = self.provider.selected_editor(document) {
            if editors.contains(&selected) {
                return selected;
            }
        }
        editors[0]
    }
}

struct Linker<'b, 'a> {
    builder: &'b PassGraphBuilder<'a>,
    declared: &'b HashMap<EditorId, HashMap<PassId, PassDescriptor>>,
    documents: &'b BTreeMap<DocumentId, Vec<EditorId>>,
    owners: &'b BTreeMap<DocumentId, EditorId>,
}

impl Linker<'_, '_> {
    fn create(
        &self,
        state: &mut BuildState,
        editor: EditorId,
        descriptor: PassDescriptor,
    ) -> usize {
        if let Some(&existing) = state.index.get(&(editor, descriptor.id)) {
            return existing;
        }

        let targets = match descriptor.scope {
            PassScope::Document(document) => {
                let mut targets = vec![editor];
                targets.extend(
                    self.documents
                        .get(&document)
                        .into_iter()
                        .flatten()
                        .filter(|other| **other != editor),
                );
                targets
            }
            PassScope::Editor(_) | PassScope::Free => vec![editor],
        };

        let index = state.nodes.len();
        state.index.insert((editor, descriptor.id), index);
        let completion = descriptor.completion_predecessors.clone();
        let start = descriptor.start_predecessors.clone();
        let follow_up = descriptor.flags.runs_follow_up && descriptor.scope != PassScope::Free;
        let (id, document) = (descriptor.id, descriptor.document());
        state.nodes.push(GraphNode {
            descriptor,
            owner: editor,
            targets,
            on_completion: Vec::new(),
            on_start: Vec::new(),
            predecessors: 0,
        });

        for predecessor in completion {
            if let Some(from) = self.resolve(state, editor, predecessor) {
                state.nodes[from].on_completion.push(index);
                state.nodes[index].predecessors += 1;
            }
        }
        for predecessor in start {
            if let Some(from) = self.resolve(state, editor, predecessor) {
                state.nodes[from].on_start.push(index);
                state.nodes[index].predecessors += 1;
            }
        }

        if follow_up {
            if let Some(registry) = self.builder.registry {
                if let Some(mut next) = registry.follow_up_for(editor, document, id) {
                    // Declared descriptors may use ids beyond the registry's range.
                    while self.is_taken(state, editor, next.id) {
                        next.id = registry.next_available_id();
                    }
                    self.create(state, editor, next);
                }
            }
        }

        index
    }

    fn is_taken(&self, state: &BuildState, editor: EditorId, id: PassId) -> bool {
        state.index.contains_key(&(editor, id))
            || self
                .declared
                .get(&editor)
                .is_some_and(|declared| declared.contains_key(&id))
    }

    /// Node for a predecessor id, creating it on demand; `None` means satisfied.
    fn resolve(&self, state: &mut BuildState, editor: EditorId, id: PassId) -> Option<usize> {
        if let Some(&existing) = state.index.get(&(editor, id)) {
            return Some(existing);
        }
        let descriptor = self.declared.get(&editor)?.get(&id)?;
        if let PassScope::Document(document) = descriptor.scope {
            let owner = *self.owners.get(&document)?;
            if owner != editor {
                if let Some(&existing) = state.index.get(&(owner, id)) {
                    return Some(existing);
                }
                let owned = self.declared.get(&owner)?.get(&id)?.clone();
                if owned.scope != descriptor.scope {
                    return None;
                }
                return Some(self.create(state, owner, owned));
            }
        }
        Some(self.create(state, editor, descriptor.clone()))
    }
}

/// Simulate the run from the free set; every node must be released exactly once.
fn check_consistency(graph: &PassGraph) -> Result<(), GraphError> {
    let mut waiting: Vec<usize> = graph.nodes.iter().map(|node| node.predecessors).collect();
    let mut queue: VecDeque<usize> = graph.free.iter().copied().collect();
    let mut visited = 0;

    while let Some(index) = queue.pop_front() {
        visited += 1;
        let node = &graph.nodes[index];
        for &successor in node.on_completion.iter().chain(&node.on_start) {
            waiting[successor] -= 1;
            if waiting[successor] == 0 {
                queue.push_back(successor);
            }
        }
    }

    if visited == graph.nodes.len() {
        return Ok(());
    }
    Err(GraphError::DependencyCycle {
        passes: graph
            .nodes
            .iter()
            .zip(&waiting)
            .filter(|(_, waiting)| **waiting > 0)
            .map(|(node, _)| (node.owner, node.descriptor.id))
            .collect(),
    })
}
