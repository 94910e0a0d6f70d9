//! Worker-side execution of one batch.
//!
//! A [`Batch`] owns the nodes of one pass graph together with their
//! remaining-predecessor counters. A node is handed to the worker pool by
//! whichever release brings its counter to zero, so it is submitted at most
//! once. Workers never apply results: every outcome travels to the
//! coordinator as a [`CoordinatorMessage`].

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use super::coordinator::{Collection, CoordinatorMessage};
use super::session::StampedResult;
use super::{ProgressToken, SchedulerContext};
use crate::dirty_range::DirtyRange;
use crate::document::{DocumentId, EditorId, TextRange};
use crate::error::PassError;
use crate::graph::GraphNode;
use crate::pass::{ApplyTarget, CollectContext, PassId, PassValue};

const LOG_TARGET: &str = "passgraph::executor";

/// Lifecycle of one scheduled pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Waiting for predecessors.
    Pending,
    /// Submitted to the worker pool.
    Runnable,
    Running,
    /// Applied, skipped as clean, or discarded as stale.
    Completed,
    Canceled,
    Failed,
}

impl PassState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PassState::Pending,
            1 => PassState::Runnable,
            2 => PassState::Running,
            3 => PassState::Completed,
            4 => PassState::Canceled,
            _ => PassState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PassState::Pending => 0,
            PassState::Runnable => 1,
            PassState::Running => 2,
            PassState::Completed => 3,
            PassState::Canceled => 4,
            PassState::Failed => 5,
        }
    }
}

/// Snapshot of a scheduled pass, for debugging views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedPass {
    pub batch: u64,
    pub editor: EditorId,
    pub id: PassId,
    pub name: String,
    pub state: PassState,
}

pub(crate) struct ScheduledPass {
    pub(crate) node: GraphNode,
    waiting: AtomicUsize,
    state: AtomicU8,
}

/// The live state of one submitted batch.
pub(crate) struct Batch {
    pub(crate) token: ProgressToken,
    pub(crate) passes: Vec<ScheduledPass>,
    /// Nodes submitted whose outcome the coordinator has not handled yet.
    in_flight: AtomicUsize,
    ctx: Arc<SchedulerContext>,
}

impl Batch {
    pub(crate) fn new(
        token: ProgressToken,
        nodes: Vec<GraphNode>,
        ctx: Arc<SchedulerContext>,
    ) -> Self {
        let passes = nodes
            .into_iter()
            .map(|node| ScheduledPass {
                waiting: AtomicUsize::new(node.predecessors),
                state: AtomicU8::new(PassState::Pending.as_u8()),
                node,
            })
            .collect();
        Self {
            token,
            passes,
            in_flight: AtomicUsize::new(0),
            ctx,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.token.id()
    }

    pub(crate) fn node(&self, index: usize) -> &GraphNode {
        &self.passes[index].node
    }

    pub(crate) fn state(&self, index: usize) -> PassState {
        PassState::from_u8(self.passes[index].state.load(Ordering::SeqCst))
    }

    /// Move a pass to `state`. A failed pass stays failed.
    pub(crate) fn set_state(&self, index: usize, state: PassState) {
        let _ = self.passes[index]
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != PassState::Failed.as_u8()).then_some(state.as_u8())
            });
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Account for one handled outcome. Returns `true` when nothing is in flight any more.
    pub(crate) fn settle(&self) -> bool {
        self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub(crate) fn snapshot(&self) -> Vec<SubmittedPass> {
        self.passes
            .iter()
            .enumerate()
            .map(|(index, pass)| SubmittedPass {
                batch: self.id(),
                editor: pass.node.owner,
                id: pass.node.descriptor.id,
                name: pass.node.descriptor.name.clone(),
                state: self.state(index),
            })
            .collect()
    }

    pub(crate) fn apply_target(&self, index: usize, partial: bool) -> ApplyTarget {
        let node = self.node(index);
        ApplyTarget {
            pass: node.descriptor.id,
            owner: node.owner,
            editors: node.targets.clone(),
            document: node.descriptor.document(),
            partial,
        }
    }

    /// Submit the initially runnable nodes.
    pub(crate) fn start(self: &Arc<Self>, free: &[usize]) {
        for &index in free {
            self.submit(index);
        }
    }

    /// Count one satisfied edge into each successor.
    pub(crate) fn release(self: &Arc<Self>, successors: &[usize]) {
        for &successor in successors {
            if self.passes[successor].waiting.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.submit(successor);
            }
        }
    }

    fn submit(self: &Arc<Self>, index: usize) {
        if self.token.is_cancelled() {
            return;
        }
        self.set_state(index, PassState::Runnable);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let batch = Arc::clone(self);
        self.ctx.pool.spawn(move || batch.run(index));
    }

    /// Record a fault; only the fault that cancels the batch is logged.
    pub(crate) fn fault(&self, index: usize, phase: &str, message: String) {
        self.set_state(index, PassState::Failed);
        let node = self.node(index);
        let flipped = self.token.fail(message.clone());
        if flipped {
            self.ctx.faults.fetch_add(1, Ordering::SeqCst);
            log::error!(
                target: LOG_TARGET,
                "Pass {} '{}' failed during {} for {}: {}",
                node.descriptor.id,
                node.descriptor.name,
                phase,
                describe_document(node.descriptor.document()),
                message
            );
        }
    }

    fn send(&self, message: CoordinatorMessage) {
        if self.ctx.coordinator.send(message).is_err() {
            log::trace!(
                target: LOG_TARGET,
                "Coordinator gone, dropping outcome of batch {}",
                self.id()
            );
        }
    }

    fn abort(self: &Arc<Self>, index: usize) {
        self.send(CoordinatorMessage::Aborted {
            batch: Arc::clone(self),
            node: index,
        });
    }

    fn skip(self: &Arc<Self>, index: usize, reason: &str) {
        let node = self.node(index);
        log::trace!(
            target: LOG_TARGET,
            "Skipping pass {} '{}' for {}: {}",
            node.descriptor.id,
            node.descriptor.name,
            node.owner,
            reason
        );
        self.release(&node.on_start);
        self.send(CoordinatorMessage::Skipped {
            batch: Arc::clone(self),
            node: index,
        });
    }

    /// Run one node on a worker thread.
    fn run(self: &Arc<Self>, index: usize) {
        let node = self.node(index);
        if self.token.is_cancelled() {
            self.set_state(index, PassState::Canceled);
            self.abort(index);
            return;
        }
        self.set_state(index, PassState::Running);

        let provider = &self.ctx.provider;
        if !provider.is_editor_valid(node.owner) {
            log::debug!(
                target: LOG_TARGET,
                "{} closed, cancelling batch {}",
                node.owner,
                self.id()
            );
            self.token.cancel();
            self.set_state(index, PassState::Canceled);
            self.abort(index);
            return;
        }

        let document = node.descriptor.document();
        let dirty = match document {
            Some(document) => self.ctx.tracker.dirty_range_for(document, node.descriptor.id),
            None => DirtyRange::Whole,
        };
        if dirty.is_clean() {
            self.skip(index, "clean");
            return;
        }
        if !node.descriptor.flags.dumb_aware && provider.is_dumb() {
            self.skip(index, "indexes unavailable");
            return;
        }

        let dirty_stamp = document.map(|document| self.ctx.tracker.begin_collect(document));
        let collected_at = document.map(|document| StampedResult {
            collected_at: provider.modification_stamp(document),
        });

        let publish = |range: Option<TextRange>, value: PassValue| {
            self.send(CoordinatorMessage::Partial {
                batch: Arc::clone(self),
                node: index,
                range,
                value,
                collected_at,
            });
        };
        let ctx = CollectContext::new(&self.token, node.owner, document, dirty, &publish);
        let outcome = catch_unwind(AssertUnwindSafe(|| node.descriptor.body.collect(&ctx)));

        match outcome {
            Ok(Ok(collected)) => {
                if self.token.is_cancelled() {
                    self.set_state(index, PassState::Canceled);
                    self.abort(index);
                    return;
                }
                self.release(&node.on_start);
                self.send(CoordinatorMessage::Collected {
                    batch: Arc::clone(self),
                    node: index,
                    collection: Collection {
                        range: collected.range,
                        value: collected.value,
                        collected_at,
                        dirty_stamp,
                    },
                });
            }
            Ok(Err(PassError::Cancelled)) => {
                // Returned without the token being cancelled: the batch can never complete.
                if self.token.cancel() {
                    log::debug!(
                        target: LOG_TARGET,
                        "Pass {} '{}' gave up, cancelling batch {}",
                        node.descriptor.id,
                        node.descriptor.name,
                        self.id()
                    );
                } else {
                    log::trace!(
                        target: LOG_TARGET,
                        "Pass {} '{}' cancelled in batch {}",
                        node.descriptor.id,
                        node.descriptor.name,
                        self.id()
                    );
                }
                self.set_state(index, PassState::Canceled);
                self.abort(index);
            }
            Ok(Err(PassError::Failed { message })) => {
                self.fault(index, "collect", message);
                self.abort(index);
            }
            Err(payload) => {
                self.fault(index, "collect", panic_message(payload.as_ref()));
                self.abort(index);
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "panic with a non-string payload".to_string()
}

fn describe_document(document: Option<DocumentId>) -> String {
    match document {
        Some(document) => document.to_string(),
        None => "no document".to_string(),
    }
}
