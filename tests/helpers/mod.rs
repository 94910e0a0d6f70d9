//! Shared test helpers for scheduler integration tests.

#![allow(dead_code)]

pub mod passes;

use std::sync::Arc;
use std::time::Duration;

use passgraph::{
    DaemonSettings, DirtyRangeTracker, DocumentId, DocumentProvider, EditorId, MemoryDocuments,
    PassBatchRequest, PassDescriptor, PassRegistry, PassScheduler, SchedulerEvent,
};
use tokio::sync::broadcast;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Route scheduler logs through the test harness; `RUST_LOG=passgraph=trace` to see them.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Documents and editors for `(editor, document)` pairs, edits tracked.
pub fn workspace(editors: &[(u64, u64)]) -> (Arc<MemoryDocuments>, Arc<DirtyRangeTracker>) {
    init_logging();
    let tracker = Arc::new(DirtyRangeTracker::new());
    let docs = Arc::new(MemoryDocuments::with_tracker(Arc::clone(&tracker)));
    for &(editor, document) in editors {
        if docs.text(DocumentId(document)).is_none() {
            docs.open_document(DocumentId(document), "fn main() {}\n".repeat(64));
        }
        docs.open_editor(EditorId(editor), DocumentId(document));
    }
    (docs, tracker)
}

pub fn scheduler_with(
    docs: &Arc<MemoryDocuments>,
    tracker: &Arc<DirtyRangeTracker>,
    registry: PassRegistry,
    settings: DaemonSettings,
) -> PassScheduler {
    PassScheduler::new(
        Arc::new(registry),
        Arc::clone(docs) as Arc<dyn DocumentProvider>,
        Arc::clone(tracker),
        settings,
    )
    .expect("scheduler must start inside a runtime")
}

pub fn scheduler(docs: &Arc<MemoryDocuments>, tracker: &Arc<DirtyRangeTracker>) -> PassScheduler {
    scheduler_with(docs, tracker, PassRegistry::builder().build(), DaemonSettings::default())
}

pub fn request<const N: usize>(entries: [(u64, Vec<PassDescriptor>); N]) -> PassBatchRequest {
    entries
        .into_iter()
        .map(|(editor, passes)| (EditorId(editor), passes))
        .collect()
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

/// Every event received until `window` elapses.
pub async fn drain_events(
    events: &mut broadcast::Receiver<SchedulerEvent>,
    window: Duration,
) -> Vec<SchedulerEvent> {
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => received.push(event),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return received,
        }
    }
}

/// Ids of batches that started within `window`.
pub async fn batches_started(
    events: &mut broadcast::Receiver<SchedulerEvent>,
    window: Duration,
) -> Vec<u64> {
    drain_events(events, window)
        .await
        .into_iter()
        .filter_map(|event| match event {
            SchedulerEvent::BatchStarting { batch, .. } => Some(batch),
            _ => None,
        })
        .collect()
}
