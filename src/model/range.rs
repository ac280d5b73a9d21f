use std::sync;

use crate::config;
use crate::model::document::change;
use crate::model::document::structure;
use crate::model::position::InvalidPosition;
use crate::model::position::Position;

/// A span between two positions, `start <= end` in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// One step of a walk over a range's contents.
#[derive(Debug, Clone)]
pub enum Item<'a> {
    ElementStart {
        node: &'a sync::Arc<structure::Node>,
        path: structure::Path,
    },

    ElementEnd {
        node: &'a sync::Arc<structure::Node>,
        path: structure::Path,
    },

    /// The part of a text run between `start` and `end` (offsets in `parent`)
    /// that lies inside the range.
    Text {
        node: &'a sync::Arc<structure::Node>,
        parent: structure::Path,
        start: usize,
        end: usize,
    },
}

/// Walks a range's contents in document order.
pub struct Items<'a> {
    stack: Vec<&'a sync::Arc<structure::Node>>,
    position: Position,
    end: Position,
}

impl Range {
    /// Orders the two positions.
    pub fn new(a: Position, b: Position) -> Range {
        if b < a {
            Range { start: b, end: a }
        } else {
            Range { start: a, end: b }
        }
    }

    pub fn collapsed(position: Position) -> Range {
        Range {
            start: position.clone(),
            end: position,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Both ends share a parent.
    pub fn is_flat(&self) -> bool {
        self.start.parent == self.end.parent
    }

    pub fn validate(&self, root: &sync::Arc<structure::Node>) -> Result<(), InvalidPosition> {
        self.start.validate(root)?;
        self.end.validate(root)?;

        if self.end < self.start {
            return Err(InvalidPosition::Reversed { start: self.start.clone(), end: self.end.clone() });
        }

        Ok(())
    }

    /// Strictly between the ends.
    pub fn contains_position(&self, position: &Position) -> bool {
        &self.start < position && position < &self.end
    }

    /// Ranges that merely touch do not intersect. Equal ranges always do, even
    /// when collapsed.
    pub fn intersects(&self, other: &Range) -> bool {
        self == other || (self.start < other.end && other.start < self.end)
    }

    pub fn items<'a>(&self, root: &'a sync::Arc<structure::Node>) -> Items<'a> {
        let mut stack = vec![root];
        let mut current = root;

        for offset in &self.start.parent {
            match current.element_index_at(*offset) {
                Some(index) => {
                    current = &current.children()[index];
                    stack.push(current);
                },
                None => {
                    /* not a real address. yield nothing. */
                    stack.clear();
                    break;
                },
            }
        }

        Items {
            stack,
            position: self.start.clone(),
            end: self.end.clone(),
        }
    }

    /// Moves both ends through a structural change. Returns whether either
    /// end moved.
    pub fn rebase(&mut self, change: &change::Change, stickiness: config::Stickiness) -> bool {
        let start = change.update_position(&mut self.start, stickiness);
        let end = change.update_position(&mut self.end, stickiness);

        /* a move can carry the end away from a start that stayed put */
        if self.end < self.start {
            self.end = self.start.clone();
        }

        start != change::UpdatePositionResult::Unmoved || end != change::UpdatePositionResult::Unmoved
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Item<'a>;

    fn next(&mut self) -> Option<Item<'a>> {
        if self.position >= self.end {
            return None;
        }

        let parent = *self.stack.last()?;

        match parent.locate(self.position.offset) {
            None => {
                self.stack.clear();
                None
            },

            Some(structure::Locus::Boundary { index }) if index == parent.child_count() => {
                /* end of this element; step out of it */
                let node = self.stack.pop()?;
                let path = self.position.parent.clone();
                self.position = Position::from_path(path.clone())?;
                self.position.offset+= 1;

                Some(Item::ElementEnd { node, path })
            },

            Some(locus) => {
                let (index, within) = match locus {
                    structure::Locus::Boundary { index } => (index, 0),
                    structure::Locus::Inside { index, within } => (index, within),
                };
                let child = &parent.children()[index];

                if child.is_text_bearing() {
                    let start = self.position.offset;
                    let mut end = start - within + child.offset_size();

                    if self.end.parent == self.position.parent && self.end.offset < end {
                        end = self.end.offset;
                    }

                    self.position.offset = end;

                    Some(Item::Text {
                        node: child,
                        parent: self.position.parent.clone(),
                        start,
                        end,
                    })
                } else {
                    let path = self.position.path();
                    self.stack.push(child);
                    self.position = Position::new(path.clone(), 0);

                    Some(Item::ElementStart { node: child, path })
                }
            },
        }
    }
}
