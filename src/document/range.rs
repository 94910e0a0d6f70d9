/// Half-open byte range `[start, end)` within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    /// Create a range, swapping the bounds if they are reversed.
    pub fn new(start: usize, end: usize) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &TextRange) -> TextRange {
        TextRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// True if the ranges share at least one offset.
    ///
    /// An empty range intersects a range that contains its position, so an
    /// insertion point inside the visible area counts as visible.
    pub fn intersects(&self, other: &TextRange) -> bool {
        if self.is_empty() {
            return other.start <= self.start && self.start < other.end.max(other.start + 1);
        }
        if other.is_empty() {
            return other.intersects(self);
        }
        self.start < other.end && other.start < self.end
    }

    pub fn contains_range(&self, other: &TextRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}
