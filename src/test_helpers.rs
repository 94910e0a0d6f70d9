//! Shared test utilities for unit tests.
//!
//! Import from module tests via `use crate::test_helpers::*;`

use std::sync::{Arc, Mutex};

use crate::document::{DocumentId, EditorId};
use crate::error::PassError;
use crate::pass::{
    ApplyTarget, CollectContext, Collected, PassBody, PassDescriptor, PassId, PassScope, PassValue,
};
use crate::registry::{FactoryRequest, PassFactory};

/// Pass body that collects nothing and applies nothing.
pub(crate) struct NoopPass;

impl PassBody for NoopPass {
    fn collect(&self, _ctx: &CollectContext<'_>) -> Result<Collected, PassError> {
        Ok(Collected::empty())
    }

    fn apply(&self, _value: PassValue, _target: &ApplyTarget) {}
}

/// Factory creating [`NoopPass`] bodies under a fixed name.
pub(crate) struct NamedFactory(pub(crate) &'static str);

impl PassFactory for NamedFactory {
    fn name(&self) -> &str {
        self.0
    }

    fn create_pass(&self, _request: &FactoryRequest) -> Option<Arc<dyn PassBody>> {
        Some(Arc::new(NoopPass))
    }
}

/// Log of `(pass, editors)` in apply order, shared between recording passes.
pub(crate) type ApplyLog = Arc<Mutex<Vec<(PassId, Vec<EditorId>)>>>;

/// Pass body that appends every final apply to a shared log.
pub(crate) struct RecordingPass {
    pub(crate) log: ApplyLog,
}

impl PassBody for RecordingPass {
    fn collect(&self, ctx: &CollectContext<'_>) -> Result<Collected, PassError> {
        ctx.check_canceled()?;
        Ok(Collected::empty())
    }

    fn apply(&self, _value: PassValue, target: &ApplyTarget) {
        if !target.partial {
            self.log.lock().unwrap().push((target.pass, target.editors.clone()));
        }
    }
}

pub(crate) fn noop(id: u32, scope: PassScope) -> PassDescriptor {
    PassDescriptor::new(PassId(id), format!("pass-{id}"), scope, Arc::new(NoopPass))
}

pub(crate) fn document_pass(id: u32, document: u64) -> PassDescriptor {
    noop(id, PassScope::Document(DocumentId(document)))
}

pub(crate) fn editor_pass(id: u32, document: u64) -> PassDescriptor {
    noop(id, PassScope::Editor(DocumentId(document)))
}
