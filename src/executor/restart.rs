//! Debounced restart after cancellation.
//!
//! Cancellations arriving in a burst collapse into one replacement batch.
//! There is at most one timer: a new request only pushes the deadline back,
//! and the timer re-checks the deadline when it wakes instead of firing early.
//!
//! ```text
//! cancel_batch(restart) ──► schedule(delay)
//!                               │
//!                               ├─► deadline = max(deadline, now + delay)
//!                               │
//!                               └─► timer running? reuse it : spawn timer
//!                                        │
//!                                        ├─► sleep until deadline
//!                                        ├─► deadline moved? sleep again
//!                                        └─► submit replacement batch
//! ```

use std::sync::{Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::SchedulerShared;
use crate::error::LockResultExt;

const LOG_TARGET: &str = "passgraph::restart";

#[derive(Default)]
struct RestartState {
    deadline: Option<Instant>,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
pub(crate) struct Restarter {
    state: Mutex<RestartState>,
}

impl Restarter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run a replacement batch once `delay` has passed without another request.
    pub(crate) fn schedule(
        &self,
        shared: Weak<SchedulerShared>,
        runtime: &Handle,
        delay: Duration,
    ) {
        let mut state = self.state.lock().recover_poison("Restarter::schedule");
        let deadline = Instant::now() + delay;
        state.deadline = Some(match state.deadline {
            Some(current) if current > deadline => current,
            _ => deadline,
        });

        if let Some(timer) = &state.timer {
            if !timer.is_finished() {
                log::trace!(target: LOG_TARGET, "Restart already pending, deadline pushed back");
                return;
            }
        }

        let task = runtime.spawn(async move {
            loop {
                let Some(scheduler) = shared.upgrade() else {
                    return;
                };
                let Some(deadline) = scheduler.restarter.deadline() else {
                    return;
                };
                drop(scheduler);

                tokio::time::sleep_until(deadline).await;

                let Some(scheduler) = shared.upgrade() else {
                    return;
                };
                if scheduler.restarter.take_if_due() {
                    log::debug!(target: LOG_TARGET, "Restart delay elapsed, rescheduling");
                    scheduler.run_restart();
                    return;
                }
            }
        });
        state.timer = Some(task.abort_handle());
    }

    /// Drop the pending restart, if any.
    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock().recover_poison("Restarter::cancel");
        state.deadline = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
            log::trace!(target: LOG_TARGET, "Cancelled pending restart");
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state
            .lock()
            .recover_poison("Restarter::is_pending")
            .deadline
            .is_some()
    }

    fn deadline(&self) -> Option<Instant> {
        self.state.lock().recover_poison("Restarter::deadline").deadline
    }

    /// Clear the deadline if it has passed; the timer then ends.
    fn take_if_due(&self) -> bool {
        let mut state = self.state.lock().recover_poison("Restarter::take_if_due");
        match state.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                state.deadline = None;
                state.timer = None;
                true
            }
            _ => false,
        }
    }
}
