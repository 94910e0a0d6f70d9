//! Lifecycle handle shared by every pass of one batch.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::document::EditorId;
use crate::error::{LockResultExt, PassError};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

fn next_token_id() -> u64 {
    NEXT_TOKEN_ID.fetch_add(1, Ordering::SeqCst)
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every pass was applied or skipped.
    Completed,
    /// The batch was cancelled, externally or by a pass fault.
    Canceled,
}

struct TokenInner {
    id: u64,
    cancelled: AtomicBool,
    running: AtomicBool,
    editors: Vec<EditorId>,
    /// Passes not yet applied or skipped.
    remaining: AtomicUsize,
    failure: Mutex<Option<String>>,
    stopped: watch::Sender<Option<BatchOutcome>>,
}

/// Cancellation and lifecycle handle for one batch.
///
/// Cheap to clone; every clone observes the same state.
#[derive(Clone)]
pub struct ProgressToken {
    inner: Arc<TokenInner>,
}

impl ProgressToken {
    pub(crate) fn new(editors: Vec<EditorId>) -> Self {
        let (stopped, _) = watch::channel(None);
        Self {
            inner: Arc::new(TokenInner {
                id: next_token_id(),
                cancelled: AtomicBool::new(false),
                running: AtomicBool::new(true),
                editors,
                remaining: AtomicUsize::new(0),
                failure: Mutex::new(None),
                stopped,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Request cancellation. Returns `true` only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.inner.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Checkpoint for pass bodies.
    pub fn check_canceled(&self) -> Result<(), PassError> {
        if self.is_cancelled() {
            Err(PassError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// True until the batch has terminated.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Editors the batch was submitted for.
    pub fn editors(&self) -> &[EditorId] {
        &self.inner.editors
    }

    /// Passes still waiting to be applied or skipped.
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::SeqCst)
    }

    /// The first fault recorded for this batch.
    pub fn failure(&self) -> Option<String> {
        self.inner.failure.lock().recover_poison("ProgressToken::failure").clone()
    }

    /// Outcome once the batch has terminated.
    pub fn outcome(&self) -> Option<BatchOutcome> {
        *self.inner.stopped.borrow()
    }

    /// Resolve once the batch has terminated.
    pub async fn stopped(&self) -> BatchOutcome {
        let mut rx = self.inner.stopped.subscribe();
        match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => {
                let outcome = *outcome;
                outcome.unwrap_or(BatchOutcome::Canceled)
            }
            // The sender lives in `self`, so the channel cannot close first
            Err(_) => BatchOutcome::Canceled,
        }
    }

    pub(crate) fn add_remaining(&self, count: usize) {
        self.inner.remaining.fetch_add(count, Ordering::SeqCst);
    }

    /// Count one pass as applied or skipped. Returns `true` when it was the last.
    pub(crate) fn finish_one(&self) -> bool {
        self.inner.remaining.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// Record a fault and cancel. Returns `true` if this fault cancelled the batch.
    pub(crate) fn fail(&self, message: String) -> bool {
        let flipped = self.cancel();
        if flipped {
            let mut failure = self.inner.failure.lock().recover_poison("ProgressToken::fail");
            failure.get_or_insert(message);
        }
        flipped
    }

    /// Mark the batch terminated. Returns `false` if it already was.
    pub(crate) fn stop_if_running(&self, outcome: BatchOutcome) -> bool {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.inner.stopped.send_replace(Some(outcome));
        true
    }
}

impl std::fmt::Debug for ProgressToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressToken")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .field("running", &self.is_running())
            .field("remaining", &self.remaining())
            .finish()
    }
}
