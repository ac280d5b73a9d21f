use std::sync;

use crate::model::document::structure;

/// An address between two offset units of an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    /// Path to the containing element.
    pub parent: structure::Path,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPosition {
    NoSuchElement(structure::Path),
    OffsetOutOfBounds { offset: usize, max_offset: usize },
    /// A range whose end comes before its start.
    Reversed { start: Position, end: Position },
}

impl Position {
    pub fn new(parent: structure::Path, offset: usize) -> Position {
        Position { parent, offset }
    }

    pub fn at_root(offset: usize) -> Position {
        Position { parent: vec![], offset }
    }

    /// Splits a full path, whose last step is the offset within the parent.
    pub fn from_path(mut path: structure::Path) -> Option<Position> {
        let offset = path.pop()?;
        Some(Position { parent: path, offset })
    }

    pub fn path(&self) -> structure::Path {
        let mut path = self.parent.clone();
        path.push(self.offset);
        path
    }

    pub fn parent_element<'a>(&self, root: &'a sync::Arc<structure::Node>) -> Option<&'a sync::Arc<structure::Node>> {
        root.lookup_element(&self.parent)
    }

    pub fn validate(&self, root: &sync::Arc<structure::Node>) -> Result<(), InvalidPosition> {
        let parent = self.parent_element(root).ok_or_else(|| InvalidPosition::NoSuchElement(self.parent.clone()))?;
        let max_offset = parent.max_offset();

        if self.offset > max_offset {
            Err(InvalidPosition::OffsetOutOfBounds { offset: self.offset, max_offset })
        } else {
            Ok(())
        }
    }

    pub fn is_valid(&self, root: &sync::Arc<structure::Node>) -> bool {
        self.validate(root).is_ok()
    }
}

impl Ord for Position {
    /// Document order. A position inside an element comes after the position
    /// just before that element and before the position just after it.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.parent.iter().chain(std::iter::once(&self.offset))
            .cmp(other.parent.iter().chain(std::iter::once(&other.offset)))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.parent, self.offset)
    }
}

impl std::fmt::Display for InvalidPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidPosition::NoSuchElement(path) => write!(f, "no element at path {:?}", path),
            InvalidPosition::OffsetOutOfBounds { offset, max_offset } => write!(f, "offset {} is beyond the end of its element ({})", offset, max_offset),
            InvalidPosition::Reversed { start, end } => write!(f, "range ends at {:?} before it starts at {:?}", end, start),
        }
    }
}

impl std::error::Error for InvalidPosition {}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    use crate::model::document::structure::Node;

    #[test]
    fn test_document_order() {
        let before_element = Position::at_root(1);
        let inside_element = Position::new(vec![1], 0);
        let deep_inside = Position::new(vec![1, 0], 4);
        let after_element = Position::at_root(2);

        assert!(before_element < inside_element);
        assert!(inside_element < deep_inside);
        assert!(deep_inside < after_element);
        assert!(Position::new(vec![1], 3) < Position::new(vec![1], 4));
    }

    #[test]
    fn test_validate() {
        let root = Node::builder()
            .child(|b| b
                   .name("paragraph")
                   .text("AB", [("bold", true)]))
            .build();

        assert_eq!(Position::new(vec![0], 2).validate(&root), Ok(()));
        assert_eq!(Position::new(vec![0], 1).validate(&root), Ok(()));
        assert_matches!(Position::new(vec![0], 3).validate(&root), Err(InvalidPosition::OffsetOutOfBounds { offset: 3, max_offset: 2 }));
        assert_matches!(Position::new(vec![1], 0).validate(&root), Err(InvalidPosition::NoSuchElement(_)));
    }

    #[test]
    fn test_path_round_trip() {
        let position = Position::new(vec![2, 0], 7);
        assert_eq!(position.path(), vec![2, 0, 7]);
        assert_eq!(Position::from_path(position.path()), Some(position));
        assert_eq!(Position::from_path(vec![]), None);
    }
}
