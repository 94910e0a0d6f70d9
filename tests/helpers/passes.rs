//! Scripted pass bodies that record what the scheduler made them do.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use passgraph::{
    ApplyTarget, CollectContext, Collected, EditorId, FactoryRequest, PassBody, PassDescriptor,
    PassError, PassFactory, PassId, PassScope, PassValue, TextRange,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Collect(u32),
    Apply {
        pass: u32,
        editors: Vec<EditorId>,
        partial: bool,
    },
}

/// Ordered log shared by every pass of a test.
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<Step>>>);

impl Timeline {
    fn push(&self, step: Step) {
        self.0.lock().unwrap().push(step);
    }

    pub fn steps(&self) -> Vec<Step> {
        self.0.lock().unwrap().clone()
    }

    /// Pass ids of final applies, in order.
    pub fn applies(&self) -> Vec<u32> {
        self.steps()
            .into_iter()
            .filter_map(|step| match step {
                Step::Apply {
                    pass,
                    partial: false,
                    ..
                } => Some(pass),
                _ => None,
            })
            .collect()
    }

    pub fn collects(&self, pass: u32) -> usize {
        self.steps()
            .iter()
            .filter(|step| **step == Step::Collect(pass))
            .count()
    }

    pub fn collect_position(&self, pass: u32) -> Option<usize> {
        self.steps().iter().position(|step| *step == Step::Collect(pass))
    }

    pub fn apply_position(&self, pass: u32) -> Option<usize> {
        self.steps().iter().position(|step| {
            matches!(step, Step::Apply { pass: applied, partial: false, .. } if *applied == pass)
        })
    }

    /// Editors that received the final result of `pass`.
    pub fn applied_editors(&self, pass: u32) -> Vec<EditorId> {
        self.steps()
            .into_iter()
            .find_map(|step| match step {
                Step::Apply {
                    pass: applied,
                    editors,
                    partial: false,
                } if applied == pass => Some(editors),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// What `collect` does after logging itself.
#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    BlockUntilCancelled,
    /// Return `PassError::Cancelled` although nobody cancelled the batch.
    GiveUp,
    /// Spin until the flag is raised.
    WaitFor(Arc<AtomicBool>),
}

pub struct ScriptedPass {
    id: u32,
    timeline: Timeline,
    behavior: Behavior,
    delay: Duration,
    apply_delay: Duration,
    range: Option<TextRange>,
    partial: Option<TextRange>,
    started: Arc<AtomicBool>,
}

impl ScriptedPass {
    pub fn new(id: u32, timeline: &Timeline) -> Self {
        Self {
            id,
            timeline: timeline.clone(),
            behavior: Behavior::Succeed,
            delay: Duration::ZERO,
            apply_delay: Duration::ZERO,
            range: None,
            partial: None,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Time spent collecting before returning.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Time spent inside `apply`, on the coordinator.
    pub fn apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    /// The final result covers `range` instead of the whole document.
    pub fn range(mut self, range: TextRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Publish one partial result covering `range` before finishing.
    pub fn publish_partial(mut self, range: TextRange) -> Self {
        self.partial = Some(range);
        self
    }

    /// Raised once `collect` has been entered.
    pub fn started_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }

    pub fn descriptor(self, scope: PassScope) -> PassDescriptor {
        let id = PassId(self.id);
        PassDescriptor::new(id, format!("scripted-{}", self.id), scope, Arc::new(self))
    }
}

fn spin(ctx: &CollectContext<'_>, mut done: impl FnMut() -> bool) -> Result<(), PassError> {
    while !done() {
        ctx.check_canceled()?;
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

impl PassBody for ScriptedPass {
    fn collect(&self, ctx: &CollectContext<'_>) -> Result<Collected, PassError> {
        self.timeline.push(Step::Collect(self.id));
        self.started.store(true, Ordering::SeqCst);

        if let Some(range) = self.partial {
            ctx.publish(Some(range), ());
        }

        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => return Err(PassError::failed(format!("pass {} failed", self.id))),
            Behavior::Panic => panic!("pass {} panicked", self.id),
            Behavior::BlockUntilCancelled => spin(ctx, || false)?,
            Behavior::GiveUp => return Err(PassError::Cancelled),
            Behavior::WaitFor(flag) => spin(ctx, || flag.load(Ordering::SeqCst))?,
        }

        let until = std::time::Instant::now() + self.delay;
        spin(ctx, || std::time::Instant::now() >= until)?;

        Ok(match self.range {
            Some(range) => Collected::in_range(range, ()),
            None => Collected::empty(),
        })
    }

    fn apply(&self, _value: PassValue, target: &ApplyTarget) {
        std::thread::sleep(self.apply_delay);
        self.timeline.push(Step::Apply {
            pass: self.id,
            editors: target.editors.clone(),
            partial: target.partial,
        });
    }
}

/// Factory for registry-driven tests; the first pass it creates blocks until cancelled.
pub struct ScriptedFactory {
    id: u32,
    timeline: Timeline,
    block_first: bool,
    created: AtomicUsize,
}

impl ScriptedFactory {
    /// `id` must match the registration order.
    pub fn new(id: u32, timeline: &Timeline, block_first: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            timeline: timeline.clone(),
            block_first,
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl PassFactory for ScriptedFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create_pass(&self, _request: &FactoryRequest) -> Option<Arc<dyn PassBody>> {
        let first = self.created.fetch_add(1, Ordering::SeqCst) == 0;
        let behavior = if first && self.block_first {
            Behavior::BlockUntilCancelled
        } else {
            Behavior::Succeed
        };
        Some(Arc::new(ScriptedPass::new(self.id, &self.timeline).behavior(behavior)))
    }
}
