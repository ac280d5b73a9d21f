use std::sync;

use itertools::Itertools;
use tracing::{event, instrument, Level};

use crate::config;
use crate::model::attributes;
use crate::model::document::change;
use crate::model::document::structure;
use crate::model::document::transaction;
use crate::model::live_range::LiveRange;
use crate::model::position::Position;
use crate::model::range::Range;
use crate::model::selection::resolve;
use crate::model::selection::store;
use crate::model::selection::Selection;
use crate::model::selection::SelectionError;
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    /// The set of ranges changed, or one of them moved. `direct` is false when
    /// a document change caused it.
    RangesChanged { direct: bool },

    /// The attribute map was written. `keys` lists the keys whose values
    /// actually differ, and may be empty.
    AttributesChanged { keys: Vec<String>, direct: bool },
}

/// Returned by [Editor::override_gravity]. Hand it back to
/// [Editor::restore_gravity] to release the override.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct GravityToken(u64);

/// The document's selection. Every range it holds is live, and it keeps an
/// attribute map describing what typing at the selection would produce.
///
/// Reads go through this type directly. Anything that changes the selection
/// goes through the [Editor] that `Document::selection_mut` hands out.
pub struct DocumentSelection {
    selection: Selection<LiveRange>,
    attributes: attributes::Attributes,
    store_prefix: String,

    gravity_overrides: Vec<u64>,
    next_gravity_token: u64,

    events: util::Emitter<SelectionEvent>,
}

/// Mutable access to a [DocumentSelection], together with the parts of its
/// document that mutations need.
pub struct Editor<'a> {
    selection: &'a mut DocumentSelection,
    root: &'a sync::Arc<structure::Node>,
    changes: &'a util::Emitter<change::Change>,
    config: &'a config::Config,
    transaction: &'a mut Option<transaction::Transaction>,
}

fn changed_keys(old: &attributes::Attributes, new: &attributes::Attributes) -> Vec<String> {
    old.iter()
        .filter(|(key, value)| new.get(key) != Some(*value))
        .map(|(key, _)| key)
        .chain(new.keys().filter(|key| !old.contains_key(key)))
        .map(str::to_string)
        .collect()
}

impl DocumentSelection {
    pub(crate) fn new(store_prefix: String) -> DocumentSelection {
        DocumentSelection {
            selection: Selection::new(),
            attributes: attributes::Attributes::new(),
            store_prefix,
            gravity_overrides: Vec::new(),
            next_gravity_token: 0,
            events: util::Emitter::new(),
        }
    }

    pub fn subscribe<F: FnMut(&SelectionEvent) + Send + 'static>(&self, listener: F) -> util::Subscription<SelectionEvent> {
        self.events.subscribe(listener)
    }

    /// Current boundaries of every range, in the order they were added.
    pub fn ranges(&self) -> Vec<Range> {
        self.selection.ranges().iter().map(LiveRange::range).collect()
    }

    pub fn range_count(&self) -> usize {
        self.selection.range_count()
    }

    pub fn first_range(&self) -> Option<Range> {
        self.selection.first_range()
    }

    pub fn last_range(&self) -> Option<Range> {
        self.selection.last_range()
    }

    pub fn anchor(&self) -> Option<Position> {
        self.selection.anchor()
    }

    pub fn focus(&self) -> Option<Position> {
        self.selection.focus()
    }

    pub fn is_collapsed(&self) -> bool {
        self.selection.is_collapsed()
    }

    pub fn is_backward(&self) -> bool {
        self.selection.is_backward()
    }

    pub fn get_attribute(&self, key: &str) -> Option<&attributes::Value> {
        self.attributes.get(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Walks the attribute map as it is now. Each call starts over.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &attributes::Value)> + '_ {
        self.attributes.iter()
    }

    pub fn attribute_map(&self) -> &attributes::Attributes {
        &self.attributes
    }

    pub fn is_gravity_overridden(&self) -> bool {
        !self.gravity_overrides.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Range> {
        self.ranges()
    }

    /// Called once every live range has seen a change. `before` is what
    /// [DocumentSelection::snapshot] returned ahead of the change.
    pub(crate) fn port_change(&mut self, root: &sync::Arc<structure::Node>, before: Vec<Range>, resolve: bool) {
        let dropped = self.selection.retain_ranges(|range| range.is_valid(root));
        let dropped_any = !dropped.is_empty();

        for mut range in dropped {
            event!(Level::WARN, "dropping selection range {} that no longer addresses the document", range.range());
            range.detach();
        }

        if dropped_any || self.snapshot() != before {
            self.emit(SelectionEvent::RangesChanged { direct: false });
        }

        if resolve && self.selection.range_count() > 0 {
            self.resolve(root, false);
        }
    }

    fn resolve(&mut self, root: &sync::Arc<structure::Node>, direct: bool) {
        let resolution = resolve::Resolver::new(root, &self.store_prefix)
            .with_gravity_overridden(self.is_gravity_overridden())
            .resolve(self.selection.first_range().as_ref(), self.selection.is_collapsed());

        self.replace_attributes(resolution.attributes, direct);
    }

    fn replace_attributes(&mut self, attributes: attributes::Attributes, direct: bool) {
        let keys = changed_keys(&self.attributes, &attributes);
        self.attributes = attributes;
        self.emit(SelectionEvent::AttributesChanged { keys, direct });
    }

    fn detach_all(&mut self) {
        for mut range in self.selection.clear() {
            range.detach();
        }
    }

    fn emit(&self, event: SelectionEvent) {
        event!(Level::TRACE, "selection event: {:?}", event);
        self.events.emit(&event);
    }
}

impl std::fmt::Debug for DocumentSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSelection")
            .field("ranges", &self.ranges())
            .field("backward", &self.is_backward())
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl<'a> Editor<'a> {
    pub(crate) fn new(
        selection: &'a mut DocumentSelection,
        root: &'a sync::Arc<structure::Node>,
        changes: &'a util::Emitter<change::Change>,
        config: &'a config::Config,
        transaction: &'a mut Option<transaction::Transaction>) -> Editor<'a> {
        Editor { selection, root, changes, config, transaction }
    }

    fn make_live(&self, range: Range) -> LiveRange {
        LiveRange::new(range, self.changes, self.config.stickiness)
    }

    /// Replaces every range. Nothing changes unless all of the new ranges
    /// address the document and none of them intersect.
    #[instrument(level = "debug", skip(self))]
    pub fn set_ranges(&mut self, ranges: Vec<Range>, last_backward: bool) -> Result<(), SelectionError> {
        for range in &ranges {
            range.validate(self.root)?;
        }

        if ranges.iter().tuple_combinations().any(|(a, b)| a.intersects(b)) {
            return Err(SelectionError::RangesIntersect);
        }

        self.selection.detach_all();

        let has_ranges = !ranges.is_empty();
        for range in ranges {
            let live = self.make_live(range);
            self.selection.selection.push_range(live)?;
        }
        self.selection.selection.set_backward(last_backward && has_ranges);

        self.selection.emit(SelectionEvent::RangesChanged { direct: true });
        self.selection.resolve(self.root, true);
        Ok(())
    }

    /// Drops every range. The attribute map is left as it is.
    pub fn remove_all_ranges(&mut self) {
        self.selection.detach_all();
        self.selection.emit(SelectionEvent::RangesChanged { direct: true });
    }

    pub fn push_range(&mut self, range: Range, backward: bool) -> Result<(), SelectionError> {
        range.validate(self.root)?;

        let live = self.make_live(range);
        self.selection.selection.push_range(live)?;
        self.selection.selection.set_backward(backward);

        self.selection.emit(SelectionEvent::RangesChanged { direct: true });
        self.selection.resolve(self.root, true);
        Ok(())
    }

    pub fn pop_range(&mut self) -> Option<Range> {
        let mut live = self.selection.selection.pop_range()?;
        live.detach();

        self.selection.emit(SelectionEvent::RangesChanged { direct: true });
        self.selection.resolve(self.root, true);
        Some(live.range())
    }

    /// Re-runs attribute resolution against the document as it is now.
    pub fn refresh_attributes(&mut self) {
        self.selection.resolve(self.root, true);
    }

    /// Makes resolution ignore the content before the caret until the token is
    /// restored. Overrides nest.
    pub fn override_gravity(&mut self) -> GravityToken {
        let token = self.selection.next_gravity_token;
        self.selection.next_gravity_token+= 1;
        self.selection.gravity_overrides.push(token);

        self.selection.resolve(self.root, true);
        GravityToken(token)
    }

    pub fn restore_gravity(&mut self, token: GravityToken) {
        let before = self.selection.gravity_overrides.len();
        self.selection.gravity_overrides.retain(|t| *t != token.0);

        if self.selection.gravity_overrides.len() != before {
            self.selection.resolve(self.root, true);
        }
    }

    /// The element that caret attributes get persisted on, if any. Persisting
    /// needs a transaction, so this fails early rather than letting the map
    /// and the store drift apart.
    fn store_target(&self) -> Result<Option<structure::Path>, SelectionError> {
        if !self.selection.is_collapsed() {
            return Ok(None);
        }

        let target = self.selection.first_range().and_then(|range| store::target(&range, self.root));
        if target.is_some() && self.transaction.is_none() {
            return Err(transaction::TransactionError::NoOpenTransaction.into());
        }

        Ok(target)
    }

    fn enqueue(&mut self, mutation: transaction::Mutation) -> Result<(), SelectionError> {
        self.transaction.as_mut()
            .ok_or(transaction::TransactionError::NoOpenTransaction)?
            .enqueue(mutation);
        Ok(())
    }

    pub fn set_attribute<K: Into<String>, V: Into<attributes::Value>>(&mut self, key: K, value: V) -> Result<(), SelectionError> {
        let key = key.into();
        let value = value.into();
        let target = self.store_target()?;

        let previous = self.selection.attributes.set(key.clone(), value.clone());

        if let Some(path) = target {
            self.enqueue(transaction::Mutation::SetAttribute {
                path,
                key: store::encode_key(&self.config.store_prefix, &key),
                value: value.clone(),
            })?;
        }

        let keys = if previous.as_ref() == Some(&value) { vec![] } else { vec![key] };
        self.selection.emit(SelectionEvent::AttributesChanged { keys, direct: true });
        Ok(())
    }

    pub fn remove_attribute(&mut self, key: &str) -> Result<(), SelectionError> {
        let target = self.store_target()?;

        let previous = self.selection.attributes.remove(key);

        if let Some(path) = target {
            self.enqueue(transaction::Mutation::RemoveAttribute {
                path,
                key: store::encode_key(&self.config.store_prefix, key),
            })?;
        }

        let keys = previous.map(|_| key.to_string()).into_iter().collect();
        self.selection.emit(SelectionEvent::AttributesChanged { keys, direct: true });
        Ok(())
    }

    /// Replaces the whole attribute map. A persisted store is replaced as one
    /// unit.
    pub fn set_attributes_to(&mut self, attributes: attributes::Attributes) -> Result<(), SelectionError> {
        let target = self.store_target()?;

        if let Some(path) = target {
            self.enqueue(transaction::Mutation::ReplacePrefixed {
                path,
                prefix: self.config.store_prefix.clone(),
                attributes: store::encode_attributes(&self.config.store_prefix, &attributes),
            })?;
        }

        self.selection.replace_attributes(attributes, true);
        Ok(())
    }

    pub fn clear_attributes(&mut self) -> Result<(), SelectionError> {
        self.set_attributes_to(attributes::Attributes::new())
    }
}

impl<'a> std::ops::Deref for Editor<'a> {
    type Target = DocumentSelection;

    fn deref(&self) -> &DocumentSelection {
        &*self.selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use crate::model::attributes::Value;
    use crate::model::document::Document;
    use crate::model::document::structure::Node;
    use crate::model::position::InvalidPosition;

    const NONE: [(&str, bool); 0] = [];

    fn attrs<const N: usize>(entries: [(&str, bool); N]) -> attributes::Attributes {
        entries.into_iter().collect()
    }

    fn caret(parent: Vec<usize>, offset: usize) -> Range {
        Range::collapsed(Position::new(parent, offset))
    }

    fn record(doc: &Document) -> (sync::Arc<parking_lot::Mutex<Vec<SelectionEvent>>>, util::Subscription<SelectionEvent>) {
        let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(Level::TRACE).try_init();

        let events = sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let subscription = doc.selection().subscribe(move |event| events_clone.lock().push(event.clone()));
        (events, subscription)
    }

    fn create_empty_paragraph_document() -> Document {
        Document::new(Node::builder()
                      .child(|b| b
                             .name("p")
                             .text("Hello", NONE))
                      .child(|b| b
                             .name("p"))
                      .build())
    }

    #[test]
    fn test_caret_attributes_persist_on_empty_element() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();

        doc.transaction(|doc| doc.selection_mut().set_attribute("bold", true)).unwrap().unwrap();

        assert_eq!(doc.selection().get_attribute("bold"), Some(&Value::Bool(true)));
        assert_eq!(doc.lookup_element(&[1]).unwrap().attributes.get("stored:bold"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_store_write_waits_for_commit() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();

        doc.begin_transaction();
        doc.selection_mut().set_attribute("bold", true).unwrap();
        assert!(doc.selection().has_attribute("bold"));
        assert!(doc.lookup_element(&[1]).unwrap().attributes.is_empty());

        doc.commit_transaction().unwrap();
        assert!(doc.lookup_element(&[1]).unwrap().attributes.contains_key("stored:bold"));
    }

    #[test]
    fn test_store_write_needs_transaction() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();
        let (events, _subscription) = record(&doc);

        assert_eq!(
            doc.selection_mut().set_attribute("bold", true),
            Err(SelectionError::Transaction(transaction::TransactionError::NoOpenTransaction)));

        assert!(!doc.selection().has_attribute("bold"));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_no_store_outside_empty_elements() {
        let mut doc = create_empty_paragraph_document();

        /* no transaction needed here, nothing is persisted */
        doc.selection_mut().set_ranges(vec![caret(vec![0], 5)], false).unwrap();
        doc.selection_mut().set_attribute("bold", true).unwrap();

        doc.selection_mut().set_ranges(vec![Range::new(Position::new(vec![1], 0), Position::at_root(2))], false).unwrap();
        doc.selection_mut().set_attribute("italic", true).unwrap();

        assert!(doc.lookup_element(&[0]).unwrap().attributes.is_empty());
        assert!(doc.lookup_element(&[1]).unwrap().attributes.is_empty());
    }

    #[test]
    fn test_caret_after_text_run() {
        let mut doc = Document::new(Node::builder()
                                    .child(|b| b
                                           .name("p")
                                           .text("AB", [("bold", true)]))
                                    .build());

        doc.selection_mut().set_ranges(vec![caret(vec![0], 2)], false).unwrap();
        assert_eq!(doc.selection().attribute_map(), &attrs([("bold", true)]));
    }

    #[test]
    fn test_range_takes_first_text_run() {
        let mut doc = Document::new(Node::builder()
                                    .child(|b| b
                                           .name("p")
                                           .text("Hello", NONE)
                                           .text(" World", [("italic", true)]))
                                    .build());

        doc.selection_mut().set_ranges(vec![caret(vec![0], 11)], false).unwrap();
        assert!(doc.selection().has_attribute("italic"));

        doc.selection_mut().set_ranges(vec![Range::new(Position::new(vec![0], 0), Position::new(vec![0], 11))], false).unwrap();
        assert_eq!(doc.selection().attribute_map(), &attrs(NONE));
    }

    #[test]
    fn test_caret_reads_store() {
        let mut doc = Document::new(Node::builder()
                                    .child(|b| b
                                           .name("p")
                                           .attribute("stored:bold", true))
                                    .build());

        doc.selection_mut().set_ranges(vec![caret(vec![0], 0)], false).unwrap();
        assert_eq!(doc.selection().attribute_map(), &attrs([("bold", true)]));
    }

    #[test]
    fn test_clear_attributes_clears_store() {
        let mut doc = create_empty_paragraph_document();
        let x = attrs([("bold", true), ("italic", true)]);

        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();
        doc.transaction(|doc| doc.selection_mut().set_attributes_to(x.clone())).unwrap().unwrap();

        /* reselecting the same spot brings the attributes back */
        doc.selection_mut().remove_all_ranges();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();
        assert_eq!(doc.selection().attribute_map(), &x);

        doc.transaction(|doc| doc.selection_mut().clear_attributes()).unwrap().unwrap();
        assert!(doc.lookup_element(&[1]).unwrap().attributes.is_empty());

        doc.selection_mut().remove_all_ranges();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();
        assert_eq!(doc.selection().attribute_map(), &attrs(NONE));
    }

    #[test]
    fn test_set_attributes_to_replaces_store() {
        let mut doc = create_empty_paragraph_document();
        doc.set_node_attribute(vec![1], "stored:underline", true).unwrap();
        doc.set_node_attribute(vec![1], "align", "left").unwrap();

        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();
        assert!(doc.selection().has_attribute("underline"));

        doc.transaction(|doc| doc.selection_mut().set_attributes_to(attrs([("bold", true)]))).unwrap().unwrap();

        let p = doc.lookup_element(&[1]).unwrap();
        assert!(!p.attributes.contains_key("stored:underline"));
        assert!(p.attributes.contains_key("stored:bold"));
        assert!(p.attributes.contains_key("align"));
    }

    #[test]
    fn test_remove_attribute_removes_stored_key() {
        let mut doc = create_empty_paragraph_document();
        doc.set_node_attribute(vec![1], "stored:bold", true).unwrap();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();

        doc.transaction(|doc| doc.selection_mut().remove_attribute("bold")).unwrap().unwrap();

        assert!(!doc.selection().has_attribute("bold"));
        assert!(!doc.lookup_element(&[1]).unwrap().attributes.contains_key("stored:bold"));
    }

    #[test]
    fn test_attribute_writes_always_notify() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![0], 2)], false).unwrap();
        let (events, _subscription) = record(&doc);

        doc.selection_mut().set_attribute("bold", true).unwrap();
        doc.selection_mut().set_attribute("bold", true).unwrap();

        assert_eq!(doc.selection().attributes().collect::<Vec<_>>(), vec![("bold", &Value::Bool(true))]);
        assert_eq!(*events.lock(), vec![
            SelectionEvent::AttributesChanged { keys: vec!["bold".to_string()], direct: true },
            SelectionEvent::AttributesChanged { keys: vec![], direct: true },
        ]);
    }

    #[test]
    fn test_set_ranges_notifies_once() {
        let mut doc = create_empty_paragraph_document();
        let (events, _subscription) = record(&doc);

        doc.selection_mut().set_ranges(vec![caret(vec![0], 1), caret(vec![0], 3), caret(vec![1], 0)], false).unwrap();

        assert_eq!(doc.selection().range_count(), 3);
        assert_eq!(*events.lock(), vec![
            SelectionEvent::RangesChanged { direct: true },
            SelectionEvent::AttributesChanged { keys: vec![], direct: true },
        ]);
    }

    #[test]
    fn test_set_ranges_rejects_bad_input() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![0], 1)], false).unwrap();

        assert_matches!(
            doc.selection_mut().set_ranges(vec![caret(vec![0], 9)], false),
            Err(SelectionError::InvalidRange(InvalidPosition::OffsetOutOfBounds { offset: 9, max_offset: 5 })));

        assert_matches!(
            doc.selection_mut().set_ranges(vec![
                Range::new(Position::new(vec![0], 0), Position::new(vec![0], 3)),
                Range::new(Position::new(vec![0], 2), Position::new(vec![0], 4)),
            ], false),
            Err(SelectionError::RangesIntersect));

        let reversed = Range {
            start: Position::new(vec![0], 4),
            end: Position::new(vec![0], 2),
        };
        assert_matches!(
            doc.selection_mut().set_ranges(vec![reversed], false),
            Err(SelectionError::InvalidRange(InvalidPosition::Reversed { .. })));

        /* the old selection survives */
        assert_eq!(doc.selection().ranges(), vec![caret(vec![0], 1)]);
    }

    #[test]
    fn test_ranges_left_invalid_are_dropped() {
        /* no change produces such a range, so hand the selection a tree that
         * no longer has the range's element */
        let changes = util::Emitter::new();
        let mut selection = DocumentSelection::new("stored:".to_string());
        selection.selection.push_range(LiveRange::new(caret(vec![1], 0), &changes, config::Stickiness::After)).unwrap();
        selection.selection.push_range(LiveRange::new(caret(vec![0], 2), &changes, config::Stickiness::After)).unwrap();
        assert_eq!(changes.listener_count(), 2);

        let events = sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let _subscription = selection.subscribe(move |event| events_clone.lock().push(event.clone()));

        let root = Node::builder()
            .child(|b| b
                   .name("p")
                   .text("Hello", NONE))
            .build();

        let before = selection.snapshot();
        selection.port_change(&root, before, false);

        assert_eq!(selection.ranges(), vec![caret(vec![0], 2)]);
        assert_eq!(changes.listener_count(), 1);
        assert_eq!(*events.lock(), vec![SelectionEvent::RangesChanged { direct: false }]);
    }

    #[test]
    fn test_replaced_ranges_are_detached() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![0], 1), caret(vec![0], 3)], false).unwrap();
        doc.selection_mut().set_ranges(vec![caret(vec![0], 2)], false).unwrap();
        doc.selection_mut().remove_all_ranges();

        doc.selection_mut().push_range(caret(vec![0], 4), false).unwrap();
        assert_eq!(doc.selection().range_count(), 1);

        /* the document's feed only has the one live range left on it */
        assert_eq!(doc.selection_mut().changes.listener_count(), 1);
    }

    #[test]
    fn test_remove_all_ranges_keeps_attributes() {
        let mut doc = Document::new(Node::builder()
                                    .child(|b| b
                                           .name("p")
                                           .text("AB", [("bold", true)]))
                                    .build());

        doc.selection_mut().set_ranges(vec![caret(vec![0], 1)], false).unwrap();
        let (events, _subscription) = record(&doc);

        doc.selection_mut().remove_all_ranges();

        assert_eq!(doc.selection().range_count(), 0);
        assert!(doc.selection().has_attribute("bold"));
        assert_eq!(*events.lock(), vec![SelectionEvent::RangesChanged { direct: true }]);
    }

    #[test]
    fn test_backward_selection() {
        let mut doc = create_empty_paragraph_document();
        let range = Range::new(Position::new(vec![0], 1), Position::new(vec![0], 4));

        doc.selection_mut().set_ranges(vec![range.clone()], true).unwrap();

        assert!(doc.selection().is_backward());
        assert_eq!(doc.selection().anchor(), Some(Position::new(vec![0], 4)));
        assert_eq!(doc.selection().focus(), Some(Position::new(vec![0], 1)));

        assert_eq!(doc.selection_mut().pop_range(), Some(range));
        assert!(!doc.selection().is_backward());
    }

    #[test]
    fn test_push_range_rejects_intersection() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().push_range(Range::new(Position::new(vec![0], 0), Position::new(vec![0], 3)), false).unwrap();

        assert_matches!(
            doc.selection_mut().push_range(Range::new(Position::new(vec![0], 2), Position::new(vec![0], 5)), false),
            Err(SelectionError::RangesIntersect));
        assert_eq!(doc.selection().range_count(), 1);
    }

    #[test]
    fn test_document_changes_move_caret_and_reresolve() {
        let mut doc = Document::new(Node::builder()
                                    .child(|b| b
                                           .name("p")
                                           .text("AB", [("bold", true)]))
                                    .build());

        doc.selection_mut().set_ranges(vec![caret(vec![0], 2)], false).unwrap();
        let (events, _subscription) = record(&doc);

        let run = Node::new_text("C").with_attributes(attrs([("italic", true)]));
        doc.insert(Position::new(vec![0], 2), vec![sync::Arc::new(run)]).unwrap();

        assert_eq!(doc.selection().ranges(), vec![caret(vec![0], 3)]);
        assert_eq!(doc.selection().attribute_map(), &attrs([("italic", true)]));
        assert_eq!(*events.lock(), vec![
            SelectionEvent::RangesChanged { direct: false },
            SelectionEvent::AttributesChanged { keys: vec!["bold".to_string(), "italic".to_string()], direct: false },
        ]);
    }

    #[test]
    fn test_attribute_changes_to_tree_do_not_reresolve() {
        let mut doc = Document::new(Node::builder()
                                    .child(|b| b
                                           .name("p")
                                           .text("AB", [("bold", true)]))
                                    .build());

        doc.selection_mut().set_ranges(vec![caret(vec![0], 2)], false).unwrap();
        let (events, _subscription) = record(&doc);

        doc.set_node_attribute(vec![0], "align", "left").unwrap();
        assert!(events.lock().is_empty());

        doc.selection_mut().refresh_attributes();
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_caret_survives_removal_of_its_element() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();

        doc.remove(Position::at_root(1), 1).unwrap();

        assert_eq!(doc.selection().ranges(), vec![caret(vec![], 1)]);
        assert!(doc.selection().is_collapsed());
        assert_eq!(doc.selection().attribute_map(), &attrs(NONE));
    }

    #[test]
    fn test_gravity_override() {
        let mut doc = Document::new(Node::builder()
                                    .child(|b| b
                                           .name("p")
                                           .text("AB", [("bold", true)])
                                           .text("CD", [("italic", true)]))
                                    .build());

        doc.selection_mut().set_ranges(vec![caret(vec![0], 2)], false).unwrap();
        assert!(doc.selection().has_attribute("bold"));

        let outer = doc.selection_mut().override_gravity();
        let inner = doc.selection_mut().override_gravity();
        assert!(doc.selection().is_gravity_overridden());
        assert_eq!(doc.selection().attribute_map(), &attrs([("italic", true)]));

        doc.selection_mut().restore_gravity(GravityToken(99));
        doc.selection_mut().restore_gravity(inner);
        assert!(doc.selection().has_attribute("italic"));

        doc.selection_mut().restore_gravity(outer);
        assert!(!doc.selection().is_gravity_overridden());
        assert_eq!(doc.selection().attribute_map(), &attrs([("bold", true)]));
    }

    #[test]
    fn test_store_cleared_once_element_fills() {
        let mut doc = create_empty_paragraph_document();
        doc.selection_mut().set_ranges(vec![caret(vec![1], 0)], false).unwrap();

        doc.transaction(|doc| {
            doc.selection_mut().set_attribute("bold", true)?;
            doc.insert(Position::new(vec![1], 0), vec![sync::Arc::new(Node::new_text("x").with_attributes(attrs([("bold", true)])))])
                .map_err(|e| SelectionError::Transaction(e.into()))
        }).unwrap().unwrap();

        assert!(!doc.lookup_element(&[1]).unwrap().attributes.contains_key("stored:bold"));
        assert!(doc.selection().has_attribute("bold"));
    }
}
