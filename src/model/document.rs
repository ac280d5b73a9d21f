pub mod change;
pub mod structure;
pub mod transaction;

use std::sync;

use tracing::{event, instrument, Level};

use crate::config;
use crate::model::attributes;
use crate::model::live_range;
use crate::model::position;
use crate::model::range;
use crate::model::selection;
use crate::model::selection::store;
use crate::util;

/// A mutable tree plus everything that has to follow it around: live ranges,
/// the document's one selection, and the transaction collecting deferred
/// attribute writes.
pub struct Document {
    root: sync::Arc<structure::Node>,
    generation: u64,
    config: config::Config,

    changes: util::Emitter<change::Change>,
    selection: selection::DocumentSelection,
    transaction: Option<transaction::Transaction>,
}

impl Document {
    pub fn new(root: sync::Arc<structure::Node>) -> Document {
        Self::build(root, config::Config::default())
    }

    pub fn with_config(root: sync::Arc<structure::Node>, config: config::Config) -> Result<Document, config::ConfigError> {
        config.validate()?;
        Ok(Self::build(root, config))
    }

    fn build(root: sync::Arc<structure::Node>, config: config::Config) -> Document {
        Document {
            root,
            generation: 0,
            selection: selection::DocumentSelection::new(config.store_prefix.clone()),
            config,
            changes: util::Emitter::new(),
            transaction: None,
        }
    }

    pub fn root(&self) -> &sync::Arc<structure::Node> {
        &self.root
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    pub fn lookup_element(&self, path: structure::PathSlice) -> Option<&sync::Arc<structure::Node>> {
        self.root.lookup_element(path)
    }

    /// Registers a listener that sees every change right after it is applied,
    /// before the selection reacts to it.
    pub fn subscribe<F: FnMut(&change::Change) + Send + 'static>(&self, listener: F) -> util::Subscription<change::Change> {
        self.changes.subscribe(listener)
    }

    pub fn live_range(&self, range: range::Range) -> Result<live_range::LiveRange, position::InvalidPosition> {
        range.validate(&self.root)?;
        Ok(live_range::LiveRange::new(range, &self.changes, self.config.stickiness))
    }

    pub fn selection(&self) -> &selection::DocumentSelection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> selection::Editor<'_> {
        selection::Editor::new(
            &mut self.selection,
            &self.root,
            &self.changes,
            &self.config,
            &mut self.transaction)
    }

    #[instrument(level = "debug", skip(self), fields(generation = self.generation))]
    pub fn apply(&mut self, ty: change::ChangeType) -> Result<(), change::ApplyError> {
        self.apply_impl(ty, true)
    }

    /// Store writes go through here so that they never feed back into the
    /// selection's attribute resolution.
    pub(crate) fn apply_without_resolution(&mut self, ty: change::ChangeType) -> Result<(), change::ApplyError> {
        self.apply_impl(ty, false)
    }

    fn apply_impl(&mut self, ty: change::ChangeType, resolve: bool) -> Result<(), change::ApplyError> {
        let change = change::Change {
            ty,
            generation: self.generation,
        };

        self.root = change.apply(&self.root)?;
        self.generation+= 1;

        let before = self.selection.snapshot();

        /* live ranges first, so the selection sees rebased boundaries */
        self.changes.emit(&change);

        let structural = change.is_structural();
        let filled: Vec<structure::Path> = change.filled_elements().into_iter()
            .filter_map(|mut path| (change.update_path(&mut path) != change::UpdatePathResult::Deleted).then_some(path))
            .collect();

        let in_transaction = match self.transaction.as_mut() {
            Some(transaction) => {
                transaction.record(change);
                true
            },
            None => false,
        };

        self.selection.port_change(&self.root, before, resolve && structural);

        /* transactions clean up once, when the outermost level commits */
        if structural && !in_transaction {
            self.clear_stale_stores(filled)?;
        }

        Ok(())
    }

    pub fn insert(&mut self, position: position::Position, nodes: Vec<sync::Arc<structure::Node>>) -> Result<(), change::ApplyError> {
        self.apply(change::ChangeType::Insert { position, nodes })
    }

    pub fn remove(&mut self, position: position::Position, how_many: usize) -> Result<(), change::ApplyError> {
        self.apply(change::ChangeType::Remove { position, how_many })
    }

    pub fn move_nodes(&mut self, source: position::Position, how_many: usize, target: position::Position) -> Result<(), change::ApplyError> {
        self.apply(change::ChangeType::Move { source, how_many, target })
    }

    /// Merges the element after `position` into the element before it.
    pub fn merge(&mut self, position: position::Position) -> Result<(), change::ApplyError> {
        let target_size = position.parent_element(&self.root)
            .and_then(|parent| parent.node_before(position.offset))
            .filter(|node| node.is_element())
            .map(|node| node.max_offset())
            .ok_or(change::ApplyError::InvalidParameters("merge position is not after an element"))?;

        self.apply(change::ChangeType::Merge { position, target_size })
    }

    pub fn split(&mut self, position: position::Position) -> Result<(), change::ApplyError> {
        self.apply(change::ChangeType::Split { position })
    }

    pub fn set_node_attribute<K: Into<String>, V: Into<attributes::Value>>(&mut self, path: structure::Path, key: K, value: V) -> Result<(), change::ApplyError> {
        self.apply(change::ChangeType::AlterNode { path, key: key.into(), value: Some(value.into()) })
    }

    pub fn remove_node_attribute<K: Into<String>>(&mut self, path: structure::Path, key: K) -> Result<(), change::ApplyError> {
        self.apply(change::ChangeType::AlterNode { path, key: key.into(), value: None })
    }

    pub fn set_range_attribute<K: Into<String>, V: Into<attributes::Value>>(&mut self, range: range::Range, key: K, value: V) -> Result<(), change::ApplyError> {
        self.apply(change::ChangeType::AlterRange { range, key: key.into(), value: Some(value.into()) })
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Opens a transaction, or nests inside the one already open.
    pub fn begin_transaction(&mut self) {
        match self.transaction.as_mut() {
            Some(transaction) => transaction.nest(),
            None => self.transaction = Some(transaction::Transaction::open()),
        }
    }

    /// Closes one level of transaction. Closing the outermost level runs the
    /// queued mutations in the order they were queued. A mutation that fails
    /// does not stop the ones after it; the first failure is returned once the
    /// transaction is closed and stale stores are cleared.
    pub fn commit_transaction(&mut self) -> Result<(), transaction::TransactionError> {
        let outermost = self.transaction.as_mut()
            .ok_or(transaction::TransactionError::NoOpenTransaction)?
            .unnest();

        if !outermost {
            return Ok(());
        }

        let Some(mut transaction) = self.transaction.take() else {
            return Ok(());
        };

        let mutations = transaction.take_rebased_mutations();
        event!(Level::DEBUG, "flushing {} queued mutations", mutations.len());

        let mut first_error = None;
        let mut batch = transaction::Batch::new(self);
        for mutation in mutations {
            let path = mutation.path().clone();
            if let Err(e) = mutation.run(&mut batch) {
                event!(Level::WARN, "queued mutation on {:?} failed: {}", path, e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.clear_stale_stores(transaction.filled_elements()) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Runs the closure inside a transaction.
    pub fn transaction<R, F: FnOnce(&mut Document) -> R>(&mut self, f: F) -> Result<R, transaction::TransactionError> {
        self.begin_transaction();
        let result = f(self);
        self.commit_transaction()?;
        Ok(result)
    }

    pub fn enqueue_into_current_transaction(&mut self, mutation: transaction::Mutation) -> Result<(), transaction::TransactionError> {
        self.transaction.as_mut()
            .ok_or(transaction::TransactionError::NoOpenTransaction)?
            .enqueue(mutation);
        Ok(())
    }

    /// Stored caret attributes only make sense on empty elements. Elements
    /// that gained content lose theirs.
    fn clear_stale_stores(&mut self, filled: Vec<structure::Path>) -> Result<(), change::ApplyError> {
        for path in filled {
            let stale: Vec<String> = match self.root.lookup_element(&path) {
                Some(node) if !node.is_empty() => store::stored_keys(node, &self.config.store_prefix).map(str::to_string).collect(),
                _ => continue,
            };

            for key in stale {
                event!(Level::DEBUG, "clearing stored attribute {} from {:?}", key, path);
                self.apply_without_resolution(change::ChangeType::AlterNode { path: path.clone(), key, value: None })?;
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("generation", &self.generation)
            .field("in_transaction", &self.transaction.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    use crate::model::attributes::Value;
    use crate::model::document::structure::Node;
    use crate::model::position::Position;
    use crate::model::range::Range;

    const NONE: [(&str, bool); 0] = [];

    fn create_test_document() -> Document {
        Document::new(Node::builder()
                      .child(|b| b
                             .name("p")
                             .text("Hello", NONE))
                      .child(|b| b
                             .name("p"))
                      .build())
    }

    #[test]
    fn test_generation_advances() {
        let mut doc = create_test_document();
        assert_eq!(doc.generation(), 0);

        doc.insert(Position::new(vec![0], 5), vec![sync::Arc::new(Node::new_text("!"))]).unwrap();
        assert_eq!(doc.generation(), 1);

        assert_matches!(doc.remove(Position::new(vec![0], 5), 9), Err(change::ApplyError::InvalidParameters(_)));
        assert_eq!(doc.generation(), 1);

        assert_matches!(doc.remove(Position::new(vec![0], 1), usize::MAX), Err(change::ApplyError::InvalidParameters(_)));
        assert_matches!(doc.move_nodes(Position::new(vec![0], 1), usize::MAX, Position::at_root(2)), Err(change::ApplyError::InvalidParameters(_)));
        assert_eq!(doc.generation(), 1);
        assert_eq!(doc.lookup_element(&[0]).unwrap().children()[0].text(), Some("Hello!"));
    }

    #[test]
    fn test_config_is_validated() {
        let config = config::Config {
            store_prefix: String::new(),
            ..config::Config::default()
        };

        assert_matches!(Document::with_config(Node::builder().build(), config), Err(config::ConfigError::EmptyStorePrefix));
        assert!(Document::with_config(Node::builder().build(), config::Config::default()).is_ok());
    }

    #[test]
    fn test_change_listeners() {
        let mut doc = create_test_document();
        let seen = sync::Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let mut subscription = doc.subscribe(move |change| seen_clone.lock().push(change.generation));

        doc.remove(Position::new(vec![0], 0), 1).unwrap();
        doc.remove(Position::new(vec![0], 0), 1).unwrap();
        subscription.cancel();
        doc.remove(Position::new(vec![0], 0), 1).unwrap();

        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn test_live_range_validation() {
        let doc = create_test_document();

        assert!(doc.live_range(Range::collapsed(Position::new(vec![0], 5))).is_ok());
        assert_matches!(doc.live_range(Range::collapsed(Position::new(vec![0], 6))), Err(position::InvalidPosition::OffsetOutOfBounds { .. }));
    }

    #[test]
    fn test_enqueue_requires_transaction() {
        let mut doc = create_test_document();
        let mutation = transaction::Mutation::SetAttribute { path: vec![1], key: "x".to_string(), value: Value::Bool(true) };

        assert_eq!(doc.enqueue_into_current_transaction(mutation.clone()), Err(transaction::TransactionError::NoOpenTransaction));
        assert_eq!(doc.commit_transaction(), Err(transaction::TransactionError::NoOpenTransaction));

        doc.begin_transaction();
        doc.enqueue_into_current_transaction(mutation).unwrap();
        /* nothing happens until the transaction closes */
        assert!(doc.lookup_element(&[1]).unwrap().attributes.is_empty());

        doc.commit_transaction().unwrap();
        assert_eq!(doc.lookup_element(&[1]).unwrap().attributes.get("x"), Some(&Value::Bool(true)));
        assert!(!doc.is_in_transaction());
    }

    #[test]
    fn test_nested_transactions_flush_once() {
        let mut doc = create_test_document();

        doc.begin_transaction();
        doc.begin_transaction();
        doc.enqueue_into_current_transaction(transaction::Mutation::SetAttribute { path: vec![1], key: "a".to_string(), value: Value::Integer(1) }).unwrap();
        doc.commit_transaction().unwrap();
        assert!(doc.lookup_element(&[1]).unwrap().attributes.is_empty());

        doc.commit_transaction().unwrap();
        assert_eq!(doc.lookup_element(&[1]).unwrap().attributes.get("a"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_mutations_follow_their_element() {
        let mut doc = create_test_document();

        doc.transaction(|doc| {
            doc.enqueue_into_current_transaction(transaction::Mutation::SetAttribute { path: vec![1], key: "a".to_string(), value: Value::Bool(true) }).unwrap();
            /* push the empty paragraph along by one */
            doc.insert(Position::at_root(0), vec![sync::Arc::new(Node::new_element("p"))]).unwrap();
        }).unwrap();

        assert!(doc.lookup_element(&[1]).unwrap().attributes.is_empty());
        assert_eq!(doc.lookup_element(&[2]).unwrap().attributes.get("a"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_mutations_on_deleted_elements_are_dropped() {
        let mut doc = create_test_document();

        doc.transaction(|doc| {
            doc.enqueue_into_current_transaction(transaction::Mutation::SetAttribute { path: vec![1], key: "a".to_string(), value: Value::Bool(true) }).unwrap();
            doc.remove(Position::at_root(1), 1).unwrap();
        }).unwrap();

        assert_eq!(doc.root().child_count(), 1);
        assert!(doc.lookup_element(&[0]).unwrap().attributes.is_empty());
    }

    #[test]
    fn test_replace_prefixed_runs_as_one_unit() {
        let mut doc = create_test_document();
        doc.set_node_attribute(vec![1], "stored:bold", true).unwrap();
        doc.set_node_attribute(vec![1], "align", "left").unwrap();

        doc.transaction(|doc| {
            doc.enqueue_into_current_transaction(transaction::Mutation::ReplacePrefixed {
                path: vec![1],
                prefix: "stored:".to_string(),
                attributes: [("stored:italic", true)].into_iter().collect(),
            }).unwrap();
        }).unwrap();

        let p = doc.lookup_element(&[1]).unwrap();
        assert!(!p.attributes.contains_key("stored:bold"));
        assert_eq!(p.attributes.get("stored:italic"), Some(&Value::Bool(true)));
        assert_eq!(p.attributes.get("align"), Some(&Value::from("left")));
    }

    #[test]
    fn test_filled_elements_lose_their_store() {
        let mut doc = create_test_document();
        doc.set_node_attribute(vec![1], "stored:bold", true).unwrap();
        doc.set_node_attribute(vec![1], "align", "left").unwrap();

        doc.transaction(|doc| {
            doc.insert(Position::new(vec![1], 0), vec![sync::Arc::new(Node::new_text("x"))]).unwrap();
        }).unwrap();

        let p = doc.lookup_element(&[1]).unwrap();
        assert!(!p.attributes.contains_key("stored:bold"));
        assert!(p.attributes.contains_key("align"));
    }

    #[test]
    fn test_filled_elements_lose_their_store_outside_transactions() {
        let mut doc = create_test_document();
        doc.set_node_attribute(vec![1], "stored:bold", true).unwrap();
        doc.selection_mut().set_ranges(vec![Range::collapsed(Position::new(vec![1], 0))], false).unwrap();
        assert_eq!(doc.selection().get_attribute("bold"), Some(&Value::Bool(true)));

        doc.insert(Position::new(vec![1], 0), vec![sync::Arc::new(Node::new_text("x"))]).unwrap();
        assert!(!doc.lookup_element(&[1]).unwrap().attributes.contains_key("stored:bold"));

        doc.remove(Position::new(vec![1], 0), 1).unwrap();
        doc.selection_mut().set_ranges(vec![Range::collapsed(Position::new(vec![1], 0))], false).unwrap();
        assert_eq!(doc.selection().get_attribute("bold"), None);
    }

    #[test]
    fn test_failed_mutation_does_not_stop_the_flush() {
        let mut doc = create_test_document();
        doc.set_node_attribute(vec![1], "stored:bold", true).unwrap();

        doc.begin_transaction();
        doc.enqueue_into_current_transaction(transaction::Mutation::ReplacePrefixed {
            path: vec![7],
            prefix: "stored:".to_string(),
            attributes: attributes::Attributes::new(),
        }).unwrap();
        doc.enqueue_into_current_transaction(transaction::Mutation::SetAttribute { path: vec![0], key: "a".to_string(), value: Value::Bool(true) }).unwrap();
        doc.insert(Position::new(vec![1], 0), vec![sync::Arc::new(Node::new_text("x"))]).unwrap();

        assert_matches!(doc.commit_transaction(), Err(transaction::TransactionError::Apply(change::ApplyError::InvalidParameters(_))));
        assert!(!doc.is_in_transaction());
        assert_eq!(doc.lookup_element(&[0]).unwrap().attributes.get("a"), Some(&Value::Bool(true)));
        /* cleanup still ran */
        assert!(!doc.lookup_element(&[1]).unwrap().attributes.contains_key("stored:bold"));
    }

    #[test]
    fn test_merge_and_split_helpers() {
        let mut doc = create_test_document();

        doc.split(Position::new(vec![0], 2)).unwrap();
        assert_eq!(doc.root().child_count(), 3);

        doc.merge(Position::at_root(1)).unwrap();
        assert_eq!(doc.root().child_count(), 2);
        assert_eq!(doc.lookup_element(&[0]).unwrap().children()[0].text(), Some("Hello"));

        assert_matches!(doc.merge(Position::at_root(0)), Err(change::ApplyError::InvalidParameters(_)));
    }
}
