use std::sync;

use crate::config::Stickiness;
use crate::model::attributes;
use crate::model::document::structure;
use crate::model::position::Position;
use crate::model::range::Range;

#[derive(Debug, Clone)]
pub enum ChangeType {
    /// Inserts nodes at the position, splitting a text run if the position
    /// falls inside one.
    Insert {
        position: Position,
        nodes: Vec<sync::Arc<structure::Node>>,
    },

    /// Removes `how_many` offset units starting at the position.
    Remove {
        position: Position,
        how_many: usize,
    },

    /// Moves `how_many` offset units from `source` to `target`. The target is
    /// expressed in terms of the tree before the move.
    Move {
        source: Position,
        how_many: usize,
        target: Position,
    },

    /// Merges the element just after the position into the element just
    /// before it. `target_size` is the offset size of the element before.
    Merge {
        position: Position,
        target_size: usize,
    },

    /// Splits the element containing the position in two. The new element
    /// takes everything after the position and copies the original's
    /// attributes.
    Split {
        position: Position,
    },

    /// Sets (`Some`) or removes (`None`) one attribute of an element.
    AlterNode {
        path: structure::Path,
        key: String,
        value: Option<attributes::Value>,
    },

    /// Sets or removes one attribute on every node of a flat range.
    AlterRange {
        range: Range,
        key: String,
        value: Option<attributes::Value>,
    },
}

#[derive(Debug, Clone)]
pub struct Change {
    pub ty: ChangeType,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePathResult {
    /// The node indicated by the provided path wasn't moved by this change.
    Unmoved,

    /// The node indicated by the provided path was moved somewhere else.
    Moved,

    /// The node indicated by the provided path was deleted. The path now
    /// points at where it used to be.
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePositionResult {
    Unmoved,
    Moved,

    /// Content around the position was removed, and the position now sits at
    /// the point where the removal happened.
    Collapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    InvalidParameters(&'static str),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::InvalidParameters(message) => write!(f, "invalid change parameters: {}", message),
        }
    }
}

impl std::error::Error for ApplyError {}

impl From<structure::StructureError> for ApplyError {
    fn from(e: structure::StructureError) -> ApplyError {
        match e {
            structure::StructureError::NotAnElement => ApplyError::InvalidParameters("attempted to address children of a text run"),
            structure::StructureError::OffsetOutOfBounds { .. } => ApplyError::InvalidParameters("offset is beyond the end of its element"),
        }
    }
}

/// What a path being rebased stands for. Positions treat their last step as
/// a boundary between units, which is where stickiness comes in; node paths
/// treat every step as the start of an element.
#[derive(Debug, Clone, Copy)]
enum Subject {
    Position(Stickiness),
    Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unmoved,
    Moved,
    Deleted,
}

fn has_prefix(path: &[usize], prefix: &[usize]) -> bool {
    path.len() > prefix.len() && path[..prefix.len()] == prefix[..]
}

fn is_leaf(path: &[usize], parent: &[usize], subject: Subject) -> bool {
    matches!(subject, Subject::Position(_)) && path.len() == parent.len() + 1
}

fn shifts_on_insert(path: &[usize], parent: &[usize], at: usize, subject: Subject) -> bool {
    let k = path[parent.len()];
    match subject {
        Subject::Position(stickiness) if path.len() == parent.len() + 1 => k > at || (k == at && stickiness == Stickiness::After),
        _ => k >= at,
    }
}

fn transform_insert(path: &mut structure::Path, parent: &[usize], at: usize, size: usize, subject: Subject) -> Outcome {
    if !has_prefix(path, parent) || !shifts_on_insert(path, parent, at, subject) {
        return Outcome::Unmoved;
    }

    path[parent.len()]+= size;
    Outcome::Moved
}

fn transform_remove(path: &mut structure::Path, parent: &[usize], at: usize, how_many: usize, subject: Subject) -> Outcome {
    if !has_prefix(path, parent) {
        return Outcome::Unmoved;
    }

    let i = parent.len();
    let k = path[i];

    if is_leaf(path, parent, subject) {
        if k <= at {
            Outcome::Unmoved
        } else if beyond_span(k, at, how_many) {
            path[i]-= how_many;
            Outcome::Moved
        } else {
            path[i] = at;
            Outcome::Deleted
        }
    } else if k < at {
        Outcome::Unmoved
    } else if beyond_span(k, at, how_many) {
        path[i]-= how_many;
        Outcome::Moved
    } else {
        path.truncate(i + 1);
        path[i] = at;
        Outcome::Deleted
    }
}

/// Whether `k` lies at least `how_many` units past `at`. Never overflows.
fn beyond_span(k: usize, at: usize, how_many: usize) -> bool {
    k >= at && k - at >= how_many
}

/// Whether the path travels along with a moved span.
fn inside_span(path: &[usize], parent: &[usize], at: usize, how_many: usize, subject: Subject) -> bool {
    if !has_prefix(path, parent) {
        return false;
    }

    let k = path[parent.len()];
    if is_leaf(path, parent, subject) {
        k > at && !beyond_span(k, at, how_many)
    } else {
        k >= at && !beyond_span(k, at, how_many)
    }
}

impl Change {
    /// Where the target of a move ends up once the moved span is taken out.
    fn move_target_after_removal(source: &Position, how_many: usize, target: &Position) -> Position {
        let mut path = target.path();
        transform_remove(&mut path, &source.parent, source.offset, how_many, Subject::Position(Stickiness::Before));
        Position::from_path(path).unwrap_or_else(|| target.clone())
    }

    fn transform(&self, path: &mut structure::Path, subject: Subject) -> Outcome {
        match &self.ty {
            ChangeType::AlterNode { .. } | ChangeType::AlterRange { .. } => Outcome::Unmoved,

            ChangeType::Insert { position, nodes } => {
                let size = nodes.iter().map(|n| n.offset_size()).sum();
                transform_insert(path, &position.parent, position.offset, size, subject)
            },

            ChangeType::Remove { position, how_many } => transform_remove(path, &position.parent, position.offset, *how_many, subject),

            ChangeType::Move { source, how_many, target } => {
                let target = Self::move_target_after_removal(source, *how_many, target);

                if inside_span(path, &source.parent, source.offset, *how_many, subject) {
                    /* carried along with the content */
                    let i = source.parent.len();
                    let mut relocated = target.parent.clone();
                    relocated.push(target.offset + path[i] - source.offset);
                    relocated.extend_from_slice(&path[i + 1..]);
                    *path = relocated;
                    return Outcome::Moved;
                }

                let removed = transform_remove(path, &source.parent, source.offset, *how_many, subject);
                let inserted = transform_insert(path, &target.parent, target.offset, *how_many, subject);

                match (removed, inserted) {
                    (Outcome::Unmoved, Outcome::Unmoved) => Outcome::Unmoved,
                    (Outcome::Deleted, _) => Outcome::Deleted,
                    _ => Outcome::Moved,
                }
            },

            ChangeType::Merge { position, target_size } => {
                if !has_prefix(path, &position.parent) || position.offset == 0 {
                    return Outcome::Unmoved;
                }

                let i = position.parent.len();
                let k = path[i];

                if is_leaf(path, &position.parent, subject) {
                    if k == position.offset {
                        /* between the two elements: lands where their contents meet */
                        path[i] = position.offset - 1;
                        path.push(*target_size);
                        Outcome::Moved
                    } else if k > position.offset {
                        path[i]-= 1;
                        Outcome::Moved
                    } else {
                        Outcome::Unmoved
                    }
                } else if k == position.offset {
                    if path.len() == i + 1 {
                        /* the merged element itself is gone; point at the survivor */
                        path[i] = position.offset - 1;
                        Outcome::Deleted
                    } else {
                        path[i] = position.offset - 1;
                        path[i + 1]+= *target_size;
                        Outcome::Moved
                    }
                } else if k > position.offset {
                    path[i]-= 1;
                    Outcome::Moved
                } else {
                    Outcome::Unmoved
                }
            },

            ChangeType::Split { position } => {
                let element = &position.parent;
                let Some((&element_offset, grandparent)) = element.split_last() else {
                    return Outcome::Unmoved;
                };

                if has_prefix(path, element) {
                    if !shifts_on_insert(path, element, position.offset, subject) {
                        return Outcome::Unmoved;
                    }

                    let j = element.len();
                    let mut relocated = grandparent.to_vec();
                    relocated.push(element_offset + 1);
                    relocated.push(path[j] - position.offset);
                    relocated.extend_from_slice(&path[j + 1..]);
                    *path = relocated;
                    Outcome::Moved
                } else {
                    /* the new element behaves like an insertion right after the original */
                    transform_insert(path, grandparent, element_offset + 1, 1, subject)
                }
            },
        }
    }

    /// Rebases a node path through this change.
    #[must_use]
    pub fn update_path(&self, path: &mut structure::Path) -> UpdatePathResult {
        match self.transform(path, Subject::Node) {
            Outcome::Unmoved => UpdatePathResult::Unmoved,
            Outcome::Moved => UpdatePathResult::Moved,
            Outcome::Deleted => UpdatePathResult::Deleted,
        }
    }

    /// Rebases a position through this change. The result always addresses a
    /// real location in the tree the change produces.
    pub fn update_position(&self, position: &mut Position, stickiness: Stickiness) -> UpdatePositionResult {
        let mut path = position.path();
        let outcome = self.transform(&mut path, Subject::Position(stickiness));

        if let Some(updated) = Position::from_path(path) {
            *position = updated;
        }

        match outcome {
            Outcome::Unmoved => UpdatePositionResult::Unmoved,
            Outcome::Moved => UpdatePositionResult::Moved,
            Outcome::Deleted => UpdatePositionResult::Collapsed,
        }
    }

    /// Elements that may have gained content through this change, in terms of
    /// the tree before it.
    pub fn filled_elements(&self) -> Vec<structure::Path> {
        match &self.ty {
            ChangeType::Insert { position, .. } => vec![position.parent.clone()],
            ChangeType::Move { target, .. } => vec![target.parent.clone()],
            ChangeType::Merge { position, .. } if position.offset > 0 => {
                let mut path = position.parent.clone();
                path.push(position.offset - 1);
                vec![path]
            },
            _ => vec![],
        }
    }

    pub fn is_structural(&self) -> bool {
        !matches!(self.ty, ChangeType::AlterNode { .. } | ChangeType::AlterRange { .. })
    }

    pub fn apply(&self, root: &sync::Arc<structure::Node>) -> Result<sync::Arc<structure::Node>, ApplyError> {
        let new_root = match &self.ty {
            ChangeType::Insert { position, nodes } => rebuild_node_tree(root, &position.parent, |parent| {
                insert_children(parent, position.offset, nodes.iter().cloned())
            })?,

            ChangeType::Remove { position, how_many } => rebuild_node_tree(root, &position.parent, |parent| {
                take_children(parent, position.offset, *how_many).map(std::mem::drop)
            })?,

            ChangeType::Move { source, how_many, target } => {
                if source.offset.checked_add(*how_many).is_none() {
                    return Err(ApplyError::InvalidParameters("attempted to move beyond the end of an element"));
                }

                if inside_span(&target.path(), &source.parent, source.offset, *how_many, Subject::Position(Stickiness::Before)) {
                    return Err(ApplyError::InvalidParameters("attempted to move a span into itself"));
                }

                let mut taken = Vec::new();
                let intermediate = rebuild_node_tree(root, &source.parent, |parent| {
                    taken = take_children(parent, source.offset, *how_many)?;
                    Ok(())
                })?;

                let target = Self::move_target_after_removal(source, *how_many, target);
                rebuild_node_tree(&intermediate, &target.parent, |parent| {
                    insert_children(parent, target.offset, taken.into_iter())
                })?
            },

            ChangeType::Merge { position, target_size } => rebuild_node_tree(root, &position.parent, |parent| {
                let index = match parent.locate(position.offset) {
                    Some(structure::Locus::Boundary { index }) if index > 0 && index < parent.child_count() => index,
                    _ => return Err(ApplyError::InvalidParameters("merge position is not between two children")),
                };

                let (before, after) = (&parent.children()[index - 1], &parent.children()[index]);
                if !before.is_element() || !after.is_element() {
                    return Err(ApplyError::InvalidParameters("attempted to merge something other than two elements"));
                }

                if before.max_offset() != *target_size {
                    return Err(ApplyError::InvalidParameters("merge target size does not match the tree"));
                }

                let mut merged = (**before).clone();
                if let Some(children) = merged.children_mut() {
                    children.extend(after.children().iter().cloned());
                }
                merged.normalize_children();

                let children = parent.children_mut().ok_or(ApplyError::InvalidParameters("attempted to merge children of a text run"))?;
                children.splice(index - 1..=index, [sync::Arc::new(merged)]);
                Ok(())
            })?,

            ChangeType::Split { position } => {
                let Some((&element_offset, grandparent)) = position.parent.split_last() else {
                    return Err(ApplyError::InvalidParameters("cannot split the root"));
                };

                rebuild_node_tree(root, grandparent, |parent| {
                    let index = parent.element_index_at(element_offset).ok_or(ApplyError::InvalidParameters("split position is not inside an element"))?;

                    let mut head = (*parent.children()[index]).clone();
                    let at = head.split_children_at(position.offset)?;
                    let tail_children = head.children_mut().map(|c| c.split_off(at)).unwrap_or_default();

                    let mut tail = head.clone();
                    if let Some(children) = tail.children_mut() {
                        *children = tail_children;
                    }

                    let children = parent.children_mut().ok_or(ApplyError::InvalidParameters("attempted to split children of a text run"))?;
                    children.splice(index..=index, [sync::Arc::new(head), sync::Arc::new(tail)]);
                    Ok(())
                })?
            },

            ChangeType::AlterNode { path, key, value } => rebuild_node_tree(root, path, |target| {
                if !target.is_element() {
                    return Err(ApplyError::InvalidParameters("attempted to alter an attribute of something other than an element"));
                }

                match value {
                    Some(value) => { target.attributes.set(key.clone(), value.clone()); },
                    None => { target.attributes.remove(key); },
                }

                Ok(())
            })?,

            ChangeType::AlterRange { range, key, value } => {
                if !range.is_flat() {
                    return Err(ApplyError::InvalidParameters("attribute range must start and end in the same element"));
                }

                rebuild_node_tree(root, &range.start.parent, |parent| {
                    let first = parent.split_children_at(range.start.offset)?;
                    let last = parent.split_children_at(range.end.offset)?;
                    let children = parent.children_mut().ok_or(ApplyError::InvalidParameters("attempted to alter children of a text run"))?;

                    for child in &mut children[first..last] {
                        let mut altered = (**child).clone();
                        match value {
                            Some(value) => { altered.attributes.set(key.clone(), value.clone()); },
                            None => { altered.attributes.remove(key); },
                        }
                        *child = sync::Arc::new(altered);
                    }

                    parent.normalize_children();
                    Ok(())
                })?
            },
        };

        Ok(sync::Arc::new(new_root))
    }
}

fn insert_children<I: Iterator<Item = sync::Arc<structure::Node>>>(parent: &mut structure::Node, offset: usize, nodes: I) -> Result<(), ApplyError> {
    let index = parent.split_children_at(offset)?;
    let children = parent.children_mut().ok_or(ApplyError::InvalidParameters("attempted to insert into a text run"))?;
    children.splice(index..index, nodes);
    parent.normalize_children();
    Ok(())
}

fn take_children(parent: &mut structure::Node, offset: usize, how_many: usize) -> Result<Vec<sync::Arc<structure::Node>>, ApplyError> {
    let end = offset.checked_add(how_many)
        .filter(|end| *end <= parent.max_offset())
        .ok_or(ApplyError::InvalidParameters("attempted to remove beyond the end of an element"))?;

    let first = parent.split_children_at(offset)?;
    let last = parent.split_children_at(end)?;
    let children = parent.children_mut().ok_or(ApplyError::InvalidParameters("attempted to remove from a text run"))?;
    let taken = children.drain(first..last).collect();

    parent.normalize_children();
    Ok(taken)
}

fn rebuild_node_tree<F>(target: &structure::Node, path: structure::PathSlice, target_modifier: F) -> Result<structure::Node, ApplyError> where
    F: FnOnce(&mut structure::Node) -> Result<(), ApplyError> {
    match path.split_first() {
        Some((offset, rest)) => {
            /* Recurse to rebuild the child, then rebuild the target with the new child. */
            let index = target.element_index_at(*offset).ok_or(ApplyError::InvalidParameters("path does not lead to an element"))?;
            let new_child = rebuild_node_tree(&target.children()[index], rest, target_modifier)?;
            let mut new_target = target.clone();
            if let Some(children) = new_target.children_mut() {
                children[index] = sync::Arc::new(new_child);
            }
            Ok(new_target)
        },
        None => {
            /* Reached the end of the path. Just modify this node directly. */
            let mut new_target = target.clone();
            target_modifier(&mut new_target)?;
            Ok(new_target)
        }
    }
}
