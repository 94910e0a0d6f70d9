//! The single task that applies pass results.
//!
//! Workers report every outcome over an unbounded channel. Before each
//! apply the coordinator drains whatever has arrived into a
//! [`SessionCoordinator`] and pops the next result from it, so results that
//! are ready together obey the priority rule even while a slow apply runs.
//! It is also the only place a batch is finished.
//!
//! ```text
//! worker ──Partial/Collected──► queue ──pop──► stale? ──► apply ──► mark clean
//! worker ──Skipped/Aborted────► count down, release successors, settle
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::scheduled_pass::{Batch, PassState, panic_message};
use super::session::{ResultClass, SessionCoordinator, StampedResult};
use super::{BatchOutcome, SchedulerEvent, SchedulerShared};
use crate::dirty_range::DirtyStamp;
use crate::document::TextRange;
use crate::pass::PassValue;

const LOG_TARGET: &str = "passgraph::coordinator";

/// Final result of a collect, as sent by the worker.
pub(crate) struct Collection {
    pub(crate) range: Option<TextRange>,
    pub(crate) value: PassValue,
    pub(crate) collected_at: Option<StampedResult>,
    pub(crate) dirty_stamp: Option<DirtyStamp>,
}

pub(crate) enum CoordinatorMessage {
    /// Streamed from inside `collect`.
    Partial {
        batch: Arc<Batch>,
        node: usize,
        range: Option<TextRange>,
        value: PassValue,
        collected_at: Option<StampedResult>,
    },
    Collected {
        batch: Arc<Batch>,
        node: usize,
        collection: Collection,
    },
    /// Nothing to collect; counts as applied.
    Skipped { batch: Arc<Batch>, node: usize },
    /// Cancelled or failed; never applied.
    Aborted { batch: Arc<Batch>, node: usize },
    /// The batch token was cancelled from outside.
    Cancelled { batch: Arc<Batch> },
}

enum QueuedResult {
    Partial {
        batch: Arc<Batch>,
        node: usize,
        value: PassValue,
        collected_at: Option<StampedResult>,
    },
    Final {
        batch: Arc<Batch>,
        node: usize,
        collection: Collection,
    },
}

pub(crate) struct Coordinator {
    shared: Arc<SchedulerShared>,
    receiver: mpsc::UnboundedReceiver<CoordinatorMessage>,
    session: SessionCoordinator<(u64, usize), QueuedResult>,
}

impl Coordinator {
    pub(crate) fn new(
        shared: Arc<SchedulerShared>,
        receiver: mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) -> Self {
        Self {
            shared,
            receiver,
            session: SessionCoordinator::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let shutdown = self.shared.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::debug!(target: LOG_TARGET, "Coordinator shutting down");
                    break;
                }
                message = self.receiver.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.accept(message);
                    self.flush();
                }
            }
        }
    }

    fn accept(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Partial {
                batch,
                node,
                range,
                value,
                collected_at,
            } => {
                let class = self.classify(&batch, node, range);
                self.session.push(
                    (batch.id(), node),
                    class,
                    QueuedResult::Partial {
                        batch,
                        node,
                        value,
                        collected_at,
                    },
                );
            }
            CoordinatorMessage::Collected {
                batch,
                node,
                collection,
            } => {
                let class = self.classify(&batch, node, collection.range);
                self.session.push(
                    (batch.id(), node),
                    class,
                    QueuedResult::Final {
                        batch,
                        node,
                        collection,
                    },
                );
            }
            CoordinatorMessage::Skipped { batch, node } => self.complete(&batch, node),
            CoordinatorMessage::Aborted { batch, node } => {
                batch.set_state(node, PassState::Canceled);
                self.settle(&batch);
            }
            CoordinatorMessage::Cancelled { batch } => {
                if batch.in_flight() == 0 {
                    self.shared.finish_batch(&batch, BatchOutcome::Canceled);
                }
            }
        }
    }

    fn classify(&self, batch: &Batch, node: usize, range: Option<TextRange>) -> ResultClass {
        let owner = batch.node(node).owner;
        ResultClass::classify(range, self.shared.ctx.provider.priority_range(owner))
    }

    /// Queue everything that has arrived so far.
    fn drain(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            self.accept(message);
        }
    }

    /// Apply queued results, picking up new arrivals before every pop.
    fn flush(&mut self) {
        loop {
            self.drain();
            let Some(result) = self.session.pop() else {
                break;
            };
            match result {
                QueuedResult::Partial {
                    batch,
                    node,
                    value,
                    collected_at,
                } => self.apply_partial(&batch, node, value, collected_at),
                QueuedResult::Final {
                    batch,
                    node,
                    collection,
                } => self.apply_final(&batch, node, collection),
            }
        }
    }

    fn is_stale(&self, batch: &Batch, node: usize, collected_at: Option<StampedResult>) -> bool {
        match (batch.node(node).descriptor.document(), collected_at) {
            (Some(document), Some(stamp)) => {
                stamp.is_stale(self.shared.ctx.provider.modification_stamp(document))
            }
            _ => false,
        }
    }

    fn apply_partial(
        &self,
        batch: &Arc<Batch>,
        node: usize,
        value: PassValue,
        collected_at: Option<StampedResult>,
    ) {
        if batch.token.is_cancelled() || self.is_stale(batch, node, collected_at) {
            return;
        }
        let target = batch.apply_target(node, true);
        let body = &batch.node(node).descriptor.body;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body.apply(value, &target))) {
            batch.fault(node, "apply", panic_message(payload.as_ref()));
        }
    }

    fn apply_final(&self, batch: &Arc<Batch>, node: usize, collection: Collection) {
        if batch.token.is_cancelled() {
            batch.set_state(node, PassState::Canceled);
            self.settle(batch);
            return;
        }

        let descriptor = &batch.node(node).descriptor;
        let owner = batch.node(node).owner;
        if !self.shared.ctx.provider.is_editor_valid(owner) {
            log::debug!(
                target: LOG_TARGET,
                "{} closed before pass {} applied, cancelling batch {}",
                owner,
                descriptor.id,
                batch.id()
            );
            batch.token.cancel();
            batch.set_state(node, PassState::Canceled);
            self.settle(batch);
            return;
        }

        if self.is_stale(batch, node, collection.collected_at) {
            log::debug!(
                target: LOG_TARGET,
                "Discarding stale result of pass {} '{}' for {}",
                descriptor.id,
                descriptor.name,
                owner
            );
            self.complete(batch, node);
            return;
        }

        let target = batch.apply_target(node, false);
        let value = collection.value;
        let applied = catch_unwind(AssertUnwindSafe(|| descriptor.body.apply(value, &target)));
        if let Err(payload) = applied {
            batch.fault(node, "apply", panic_message(payload.as_ref()));
            self.settle(batch);
            return;
        }

        if let (Some(document), Some(stamp)) = (target.document, collection.dirty_stamp) {
            self.shared.ctx.tracker.mark_clean(document, descriptor.id, stamp);
        }
        for editor in &target.editors {
            self.shared.emit(SchedulerEvent::ResultApplied {
                batch: batch.id(),
                pass: descriptor.id,
                editor: *editor,
            });
        }
        self.complete(batch, node);
    }

    /// The pass is done: count it down and release what waited for its completion.
    fn complete(&self, batch: &Arc<Batch>, node: usize) {
        if batch.token.is_cancelled() {
            batch.set_state(node, PassState::Canceled);
            self.settle(batch);
            return;
        }
        batch.set_state(node, PassState::Completed);
        if batch.token.finish_one() {
            self.shared.finish_batch(batch, BatchOutcome::Completed);
        } else {
            batch.release(&batch.node(node).on_completion);
        }
        self.settle(batch);
    }

    fn settle(&self, batch: &Arc<Batch>) {
        if batch.settle() && batch.token.is_cancelled() {
            self.shared.finish_batch(batch, BatchOutcome::Canceled);
        }
    }
}
