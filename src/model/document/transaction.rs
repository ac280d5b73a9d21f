use tracing::{event, Level};

use crate::model::attributes;
use crate::model::document;
use crate::model::document::change;
use crate::model::document::structure;

/// A deferred attribute mutation, queued while a transaction is open and run
/// when it closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetAttribute {
        path: structure::Path,
        key: String,
        value: attributes::Value,
    },

    RemoveAttribute {
        path: structure::Path,
        key: String,
    },

    /// Removes every attribute whose key starts with `prefix`, then sets
    /// `attributes`. Runs as one unit.
    ReplacePrefixed {
        path: structure::Path,
        prefix: String,
        attributes: attributes::Attributes,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    NoOpenTransaction,
    Apply(change::ApplyError),
}

impl From<change::ApplyError> for TransactionError {
    fn from(e: change::ApplyError) -> TransactionError {
        TransactionError::Apply(e)
    }
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionError::NoOpenTransaction => write!(f, "no transaction is open"),
            TransactionError::Apply(e) => write!(f, "failed to flush transaction: {}", e),
        }
    }
}

impl std::error::Error for TransactionError {}

#[derive(Debug, Default)]
pub struct Transaction {
    depth: usize,

    /* every change applied since the transaction opened */
    log: Vec<change::Change>,

    /* each mutation remembers how much of the log existed when it was queued */
    pending: Vec<(usize, Mutation)>,
}

/// The primitive attribute writes deferred mutations are made of.
pub struct Batch<'a> {
    document: &'a mut document::Document,
}

impl Mutation {
    pub fn path(&self) -> &structure::Path {
        match self {
            Mutation::SetAttribute { path, .. } => path,
            Mutation::RemoveAttribute { path, .. } => path,
            Mutation::ReplacePrefixed { path, .. } => path,
        }
    }

    fn path_mut(&mut self) -> &mut structure::Path {
        match self {
            Mutation::SetAttribute { path, .. } => path,
            Mutation::RemoveAttribute { path, .. } => path,
            Mutation::ReplacePrefixed { path, .. } => path,
        }
    }

    pub fn run(self, batch: &mut Batch) -> Result<(), change::ApplyError> {
        match self {
            Mutation::SetAttribute { path, key, value } => batch.set_attribute(key, value, &path),
            Mutation::RemoveAttribute { path, key } => batch.remove_attribute(key, &path),
            Mutation::ReplacePrefixed { path, prefix, attributes } => {
                let stale: Vec<String> = match batch.document.root().lookup_element(&path) {
                    Some(node) => node.attributes.keys()
                        .filter(|key| key.starts_with(prefix.as_str()))
                        .map(str::to_string)
                        .collect(),
                    None => return Err(change::ApplyError::InvalidParameters("path does not lead to an element")),
                };

                for key in stale {
                    batch.remove_attribute(key, &path)?;
                }

                for (key, value) in attributes.iter() {
                    batch.set_attribute(key, value.clone(), &path)?;
                }

                Ok(())
            },
        }
    }
}

impl Transaction {
    pub(super) fn open() -> Transaction {
        Transaction {
            depth: 1,
            ..Default::default()
        }
    }

    pub(super) fn nest(&mut self) {
        self.depth+= 1;
    }

    /// Returns whether this was the outermost level.
    pub(super) fn unnest(&mut self) -> bool {
        self.depth-= 1;
        self.depth == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(super) fn record(&mut self, change: change::Change) {
        self.log.push(change);
    }

    pub fn enqueue(&mut self, mutation: Mutation) {
        event!(Level::TRACE, "queued {:?}", mutation);
        self.pending.push((self.log.len(), mutation));
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Rebases every queued mutation through the changes applied after it was
    /// queued. Mutations whose target was deleted are dropped.
    pub(super) fn take_rebased_mutations(&mut self) -> Vec<Mutation> {
        let log = &self.log;

        std::mem::take(&mut self.pending).into_iter().filter_map(|(since, mut mutation)| {
            for change in &log[since..] {
                if change.update_path(mutation.path_mut()) == change::UpdatePathResult::Deleted {
                    event!(Level::WARN, "dropping {:?}: its element was deleted", mutation);
                    return None;
                }
            }

            Some(mutation)
        }).collect()
    }

    /// Elements that gained content during the transaction, as they are
    /// addressed now. Elements that were later deleted are left out.
    pub(super) fn filled_elements(&self) -> Vec<structure::Path> {
        let mut paths: Vec<structure::Path> = Vec::new();

        for (index, change) in self.log.iter().enumerate() {
            'element: for mut path in change.filled_elements() {
                for later in &self.log[index..] {
                    if later.update_path(&mut path) == change::UpdatePathResult::Deleted {
                        continue 'element;
                    }
                }

                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }

        paths
    }
}

impl<'a> Batch<'a> {
    pub(super) fn new(document: &'a mut document::Document) -> Batch<'a> {
        Batch { document }
    }

    pub fn set_attribute<K: Into<String>>(&mut self, key: K, value: attributes::Value, path: &structure::Path) -> Result<(), change::ApplyError> {
        self.document.apply_without_resolution(change::ChangeType::AlterNode {
            path: path.clone(),
            key: key.into(),
            value: Some(value),
        })
    }

    pub fn remove_attribute<K: Into<String>>(&mut self, key: K, path: &structure::Path) -> Result<(), change::ApplyError> {
        self.document.apply_without_resolution(change::ChangeType::AlterNode {
            path: path.clone(),
            key: key.into(),
            value: None,
        })
    }
}
