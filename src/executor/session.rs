//! Ordering of result application within the coordinator.
//!
//! Results are queued as [`ResultClass::Priority`] when they touch the visible
//! part of the document and [`ResultClass::Rest`] otherwise. Every queued
//! priority result is handed out before any rest result, whatever order the
//! passes finished in. Results of one pass keep their relative order: a
//! priority result queued behind a rest result of the same pass is demoted.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use crate::document::TextRange;

/// Visibility class of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Priority,
    Rest,
}

impl ResultClass {
    /// Classify a result covering `range` (`None` = whole document).
    ///
    /// Without a known priority range nothing is visible, so everything is `Rest`.
    pub fn classify(range: Option<TextRange>, priority_range: Option<TextRange>) -> Self {
        match (range, priority_range) {
            (_, None) => ResultClass::Rest,
            (None, Some(_)) => ResultClass::Priority,
            (Some(range), Some(visible)) if range.intersects(&visible) => ResultClass::Priority,
            (Some(_), Some(_)) => ResultClass::Rest,
        }
    }
}

/// Document stamp captured when collection began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StampedResult {
    pub collected_at: u64,
}

impl StampedResult {
    /// True if the document changed since collection began.
    pub fn is_stale(&self, current: u64) -> bool {
        self.collected_at != current
    }
}

struct Queued<K, T> {
    key: K,
    item: T,
}

/// Two-class queue for results waiting on the coordinator.
pub struct SessionCoordinator<K, T> {
    priority: VecDeque<Queued<K, T>>,
    rest: VecDeque<Queued<K, T>>,
    /// Rest results per key still queued.
    rest_pending: HashMap<K, usize>,
}

impl<K: Eq + Hash + Clone, T> Default for SessionCoordinator<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, T> SessionCoordinator<K, T> {
    pub fn new() -> Self {
        Self {
            priority: VecDeque::new(),
            rest: VecDeque::new(),
            rest_pending: HashMap::new(),
        }
    }

    /// Queue a result of the pass identified by `key`.
    pub fn push(&mut self, key: K, class: ResultClass, item: T) {
        let demoted = class == ResultClass::Priority && self.rest_pending.contains_key(&key);
        if class == ResultClass::Rest || demoted {
            *self.rest_pending.entry(key.clone()).or_default() += 1;
            self.rest.push_back(Queued { key, item });
        } else {
            self.priority.push_back(Queued { key, item });
        }
    }

    /// Next result to apply: priority results first, each class in arrival order.
    pub fn pop(&mut self) -> Option<T> {
        if let Some(queued) = self.priority.pop_front() {
            return Some(queued.item);
        }
        let queued = self.rest.pop_front()?;
        if let Some(count) = self.rest_pending.get_mut(&queued.key) {
            *count -= 1;
            if *count == 0 {
                self.rest_pending.remove(&queued.key);
            }
        }
        Some(queued.item)
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.rest.is_empty()
    }
}
