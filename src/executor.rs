//! Concurrent execution of pass graphs.
//!
//! [`PassScheduler`] builds a [`PassGraph`](crate::graph::PassGraph) for every
//! submitted batch, runs `collect` for runnable passes on a rayon pool and
//! funnels every result through one coordinator task, which is the only place
//! `apply` is called.
//!
//! # Architecture
//!
//! ```text
//! submit_batch ──► PassGraphBuilder ──► Batch ──► rayon workers (collect)
//!                                                     │
//!                                                     ▼
//!                              coordinator task (apply, mark clean, finish)
//!                                                     │
//!                                                     ▼
//!                                        broadcast::Sender<SchedulerEvent>
//!
//! cancel_batch(restart) ──► Restarter ──(delay)──► PassRegistry::create_passes ──► submit_batch
//! ```

pub mod progress;
pub mod session;

mod coordinator;
mod events;
mod pool;
mod restart;
mod scheduled_pass;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

pub use events::{DaemonStatus, SchedulerEvent};
pub use progress::{BatchOutcome, ProgressToken};
pub use scheduled_pass::{PassState, SubmittedPass};
pub use session::{ResultClass, SessionCoordinator, StampedResult};

use crate::config::DaemonSettings;
use crate::dirty_range::DirtyRangeTracker;
use crate::document::{DocumentProvider, EditorId};
use crate::error::{ConfigError, LockResultExt, SchedulerError, SchedulerResult};
use crate::graph::{PassBatchRequest, PassGraphBuilder};
use crate::registry::PassRegistry;
use coordinator::{Coordinator, CoordinatorMessage};
use pool::WorkerPool;
use restart::Restarter;
use scheduled_pass::Batch;

const LOG_TARGET: &str = "passgraph::executor";

/// Capacity of the event channel; slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// What worker jobs need while a batch runs.
pub(crate) struct SchedulerContext {
    pub(crate) provider: Arc<dyn DocumentProvider>,
    pub(crate) tracker: Arc<DirtyRangeTracker>,
    pub(crate) pool: WorkerPool,
    pub(crate) coordinator: mpsc::UnboundedSender<CoordinatorMessage>,
    /// Batches cancelled by a pass fault.
    pub(crate) faults: AtomicUsize,
}

pub(crate) struct SchedulerShared {
    ctx: Arc<SchedulerContext>,
    registry: Arc<PassRegistry>,
    settings: ArcSwap<DaemonSettings>,
    events: broadcast::Sender<SchedulerEvent>,
    /// Batches that have not terminated yet.
    batches: Mutex<Vec<Arc<Batch>>>,
    restarter: Restarter,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl SchedulerShared {
    fn submit(&self, request: PassBatchRequest) -> SchedulerResult<ProgressToken> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }

        let editors: Vec<EditorId> = request.keys().copied().collect();
        let graph = PassGraphBuilder::new(self.ctx.provider.as_ref())
            .with_registry(&self.registry)
            .build(request)?;

        let token = ProgressToken::new(editors.clone());
        token.add_remaining(graph.len());
        let free = graph.free;
        let batch = Arc::new(Batch::new(token.clone(), graph.nodes, Arc::clone(&self.ctx)));

        log::debug!(
            target: LOG_TARGET,
            "Starting batch {} with {} passes for {:?}",
            token.id(),
            batch.passes.len(),
            editors
        );
        self.batches
            .lock()
            .recover_poison("SchedulerShared::submit")
            .push(Arc::clone(&batch));
        self.emit(SchedulerEvent::BatchStarting {
            batch: token.id(),
            editors,
        });

        if batch.passes.is_empty() {
            self.finish_batch(&batch, BatchOutcome::Completed);
        } else {
            batch.start(&free);
        }
        Ok(token)
    }

    /// Stop the batch, emit `BatchFinished` and forget it. Only the first call has an effect.
    fn finish_batch(&self, batch: &Arc<Batch>, outcome: BatchOutcome) {
        if !batch.token.stop_if_running(outcome) {
            return;
        }
        self.batches
            .lock()
            .recover_poison("SchedulerShared::finish_batch")
            .retain(|live| !Arc::ptr_eq(live, batch));
        log::debug!(
            target: LOG_TARGET,
            "Batch {} finished: {:?}",
            batch.id(),
            outcome
        );
        self.emit(SchedulerEvent::BatchFinished {
            batch: batch.id(),
            editors: batch.token.editors().to_vec(),
            outcome,
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn live_batches(&self) -> Vec<Arc<Batch>> {
        self.batches
            .lock()
            .recover_poison("SchedulerShared::live_batches")
            .clone()
    }

    fn find_batch(&self, token: &ProgressToken) -> Option<Arc<Batch>> {
        self.live_batches()
            .into_iter()
            .find(|batch| batch.id() == token.id())
    }

    /// Cancel a batch and let the coordinator finish it. Returns `true` if this call cancelled it.
    fn cancel(&self, token: &ProgressToken) -> bool {
        let flipped = token.cancel();
        if flipped {
            log::trace!(target: LOG_TARGET, "Batch {} cancelled", token.id());
            if let Some(batch) = self.find_batch(token) {
                let _ = self.ctx.coordinator.send(CoordinatorMessage::Cancelled { batch });
            }
        }
        flipped
    }

    fn cancel_live(&self) -> usize {
        self.live_batches()
            .iter()
            .filter(|batch| self.cancel(&batch.token))
            .count()
    }

    fn schedule_restart(self: &Arc<Self>) {
        let settings = self.settings.load();
        if !settings.enabled || !settings.update_by_timer || self.shutdown.is_cancelled() {
            return;
        }
        self.restarter
            .schedule(Arc::downgrade(self), &self.runtime, settings.autoreparse_delay());
    }

    /// Submit a replacement batch for every active editor.
    fn run_restart(&self) {
        if !self.settings.load().enabled {
            return;
        }
        let request = self
            .registry
            .create_passes(self.ctx.provider.as_ref(), &self.ctx.tracker);
        if let Err(err) = self.submit(request) {
            log::warn!(target: "passgraph::restart", "Replacement batch rejected: {}", err);
        }
    }
}

/// Schedules pass batches and applies their results.
///
/// Must be created inside a tokio runtime; the coordinator and restart timer
/// run on it. Dropping the scheduler stops the coordinator.
pub struct PassScheduler {
    shared: Arc<SchedulerShared>,
}

impl PassScheduler {
    pub fn new(
        registry: Arc<PassRegistry>,
        provider: Arc<dyn DocumentProvider>,
        tracker: Arc<DirtyRangeTracker>,
        settings: DaemonSettings,
    ) -> SchedulerResult<Self> {
        let runtime = Handle::try_current()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let ctx = Arc::new(SchedulerContext {
            provider,
            tracker,
            pool: WorkerPool::from_settings(&settings),
            coordinator: sender,
            faults: AtomicUsize::new(0),
        });
        let shared = Arc::new(SchedulerShared {
            ctx,
            registry,
            settings: ArcSwap::from_pointee(settings),
            events,
            batches: Mutex::new(Vec::new()),
            restarter: Restarter::new(),
            shutdown: CancellationToken::new(),
            runtime,
        });

        let coordinator = Coordinator::new(Arc::clone(&shared), receiver);
        shared.runtime.spawn(coordinator.run());

        Ok(Self { shared })
    }

    /// Build and start a batch. Graph violations are reported here and nothing runs.
    pub fn submit_batch(&self, request: PassBatchRequest) -> SchedulerResult<ProgressToken> {
        self.shared.submit(request)
    }

    /// Cancel a batch, optionally scheduling a debounced replacement.
    ///
    /// Returns `true` only for the call that cancelled the batch. A repeated
    /// request within the restart delay pushes the pending restart back
    /// instead of scheduling another one.
    pub fn cancel_batch(&self, token: &ProgressToken, restart: bool) -> bool {
        let flipped = self.shared.cancel(token);
        if restart && (flipped || self.shared.restarter.is_pending()) {
            self.shared.schedule_restart();
        }
        flipped
    }

    /// Wait until the batch terminates. Returns `false` on timeout.
    pub async fn wait_for_batch(&self, token: &ProgressToken, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, token.stopped()).await.is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Cancel everything running and schedule a debounced replacement batch.
    ///
    /// Dirtying documents beforehand is up to the caller.
    pub fn restart(&self) {
        let cancelled = self.shared.cancel_live();
        log::debug!(target: LOG_TARGET, "Restart requested, cancelled {} batches", cancelled);
        self.shared.schedule_restart();
    }

    /// Cancel every live batch and any pending restart.
    pub fn cancel_all(&self) -> usize {
        self.shared.restarter.cancel();
        self.shared.cancel_live()
    }

    /// Passes of every live, non-cancelled batch, sorted by pass id.
    pub fn submitted_passes(&self) -> Vec<SubmittedPass> {
        let mut passes: Vec<SubmittedPass> = self
            .shared
            .live_batches()
            .iter()
            .filter(|batch| !batch.token.is_cancelled())
            .flat_map(|batch| batch.snapshot())
            .collect();
        passes.sort_by_key(|pass| (pass.id, pass.editor, pass.batch));
        passes
    }

    pub fn status(&self) -> DaemonStatus {
        if self.shared.shutdown.is_cancelled() || !self.shared.settings.load().enabled {
            return DaemonStatus::Disabled;
        }
        let analyzing = self
            .shared
            .live_batches()
            .iter()
            .any(|batch| !batch.token.is_cancelled());
        if analyzing {
            DaemonStatus::Analyzing
        } else if self.shared.restarter.is_pending() {
            DaemonStatus::Suspended
        } else {
            DaemonStatus::Finished
        }
    }

    pub fn settings(&self) -> Arc<DaemonSettings> {
        self.shared.settings.load_full()
    }

    /// Swap settings at runtime; the change restarts the current analysis.
    ///
    /// `worker_threads` only takes effect for schedulers created afterwards.
    pub fn update_settings(&self, settings: DaemonSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        let enabled = settings.enabled;
        self.shared.settings.store(Arc::new(settings));
        if enabled {
            self.restart();
        } else {
            self.cancel_all();
        }
        Ok(())
    }

    /// Number of batches cancelled by a pass fault.
    pub fn fault_count(&self) -> usize {
        self.shared.ctx.faults.load(Ordering::SeqCst)
    }

    /// Number of threads collecting passes.
    pub fn worker_threads(&self) -> usize {
        self.shared.ctx.pool.threads()
    }

    /// Cancel everything and stop the coordinator. Later submissions fail.
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.restarter.cancel();
        self.shared.shutdown.cancel();
        for batch in self.shared.live_batches() {
            batch.token.cancel();
            self.shared.finish_batch(&batch, BatchOutcome::Canceled);
        }
        log::debug!(target: LOG_TARGET, "Scheduler shut down");
    }
}

impl Drop for PassScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
