pub mod live;
pub mod resolve;
pub mod store;

pub use live::DocumentSelection;
pub use live::Editor;
pub use live::GravityToken;
pub use live::SelectionEvent;

use crate::model::document::transaction;
use crate::model::live_range::LiveRange;
use crate::model::position::InvalidPosition;
use crate::model::position::Position;
use crate::model::range::Range;

/// Anything a [Selection] can hold.
pub trait SelectionRange {
    fn to_range(&self) -> Range;
}

impl SelectionRange for Range {
    fn to_range(&self) -> Range {
        self.clone()
    }
}

impl SelectionRange for LiveRange {
    fn to_range(&self) -> Range {
        self.range()
    }
}

/// Non-intersecting ranges in the order they were pushed, plus whether the
/// last of them was made backwards.
#[derive(Debug, Clone)]
pub struct Selection<R> {
    ranges: Vec<R>,
    last_backward: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    InvalidRange(InvalidPosition),
    RangesIntersect,
    Transaction(transaction::TransactionError),
}

impl<R: SelectionRange> Selection<R> {
    pub fn new() -> Self {
        Selection {
            ranges: Vec::new(),
            last_backward: false,
        }
    }

    pub fn ranges(&self) -> &[R] {
        &self.ranges
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Rejects ranges that intersect one already held. The backward flag is
    /// reset, since it describes the last range.
    pub fn push_range(&mut self, range: R) -> Result<(), SelectionError> {
        let new = range.to_range();
        if self.ranges.iter().any(|r| r.to_range().intersects(&new)) {
            return Err(SelectionError::RangesIntersect);
        }

        self.ranges.push(range);
        self.last_backward = false;
        Ok(())
    }

    pub fn pop_range(&mut self) -> Option<R> {
        self.last_backward = false;
        self.ranges.pop()
    }

    /// Empties the selection and hands back what it held.
    pub fn clear(&mut self) -> Vec<R> {
        self.last_backward = false;
        std::mem::take(&mut self.ranges)
    }

    pub fn retain_ranges<F: FnMut(&R) -> bool>(&mut self, f: F) -> Vec<R> {
        let (kept, dropped): (Vec<R>, Vec<R>) = std::mem::take(&mut self.ranges).into_iter().partition(f);
        self.ranges = kept;
        dropped
    }

    pub fn set_backward(&mut self, backward: bool) {
        self.last_backward = backward;
    }

    /// Whether the last range runs from its end to its start. Collapsed ranges
    /// have no direction.
    pub fn is_backward(&self) -> bool {
        self.last_backward && self.ranges.last().map_or(false, |r| !r.to_range().is_collapsed())
    }

    /// Exactly one range, and it is collapsed.
    pub fn is_collapsed(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0].to_range().is_collapsed()
    }

    /// The range that starts earliest in the document.
    pub fn first_range(&self) -> Option<Range> {
        self.ranges.iter().map(|r| r.to_range()).min_by(|a, b| a.start.cmp(&b.start))
    }

    /// The most recently pushed range.
    pub fn last_range(&self) -> Option<Range> {
        self.ranges.last().map(|r| r.to_range())
    }

    pub fn anchor(&self) -> Option<Position> {
        let range = self.last_range()?;
        Some(if self.is_backward() { range.end } else { range.start })
    }

    pub fn focus(&self) -> Option<Position> {
        let range = self.last_range()?;
        Some(if self.is_backward() { range.start } else { range.end })
    }
}

impl<R: SelectionRange> Default for Selection<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl From<InvalidPosition> for SelectionError {
    fn from(e: InvalidPosition) -> SelectionError {
        SelectionError::InvalidRange(e)
    }
}

impl From<transaction::TransactionError> for SelectionError {
    fn from(e: transaction::TransactionError) -> SelectionError {
        SelectionError::Transaction(e)
    }
}

impl std::fmt::Display for SelectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionError::InvalidRange(e) => write!(f, "invalid range: {}", e),
            SelectionError::RangesIntersect => write!(f, "range intersects one already in the selection"),
            SelectionError::Transaction(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SelectionError {}
