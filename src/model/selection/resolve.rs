use std::sync;

use tracing::{event, Level};

use crate::model::attributes;
use crate::model::document::structure;
use crate::model::position::Position;
use crate::model::range;
use crate::model::range::Range;
use crate::model::selection::store;

/// Which rule produced a set of caret attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The first text run inside a non-collapsed range.
    Contents,
    /// The text run just before the caret.
    Before,
    /// The text run just after the caret.
    After,
    /// The nearest text run further left among the caret's siblings.
    WalkLeft,
    /// The nearest text run further right among the caret's siblings.
    WalkRight,
    /// Attributes stored on the caret's empty parent.
    Store,
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub source: Source,
    pub attributes: attributes::Attributes,
}

/// Works out which attributes a selection inherits from the content around it.
pub struct Resolver<'a> {
    root: &'a sync::Arc<structure::Node>,
    store_prefix: &'a str,

    /* when set, content before the caret is ignored */
    gravity_overridden: bool,
}

impl Resolution {
    fn new(source: Source, attributes: &attributes::Attributes) -> Resolution {
        Resolution {
            source,
            attributes: attributes.clone(),
        }
    }

    fn nothing() -> Resolution {
        Resolution {
            source: Source::Nothing,
            attributes: attributes::Attributes::new(),
        }
    }
}

fn text_run_attributes(node: &structure::Node) -> Option<&attributes::Attributes> {
    node.is_text_bearing().then_some(&node.attributes)
}

impl<'a> Resolver<'a> {
    pub fn new(root: &'a sync::Arc<structure::Node>, store_prefix: &'a str) -> Resolver<'a> {
        Resolver {
            root,
            store_prefix,
            gravity_overridden: false,
        }
    }

    pub fn with_gravity_overridden(mut self, overridden: bool) -> Self {
        self.gravity_overridden = overridden;
        self
    }

    /// `range` is the selection's first range; `collapsed` says whether the
    /// selection as a whole is a caret.
    pub fn resolve(&self, range: Option<&Range>, collapsed: bool) -> Resolution {
        let resolution = match range {
            None => Resolution::nothing(),
            Some(range) if collapsed => self.resolve_caret(&range.start),
            Some(range) => self.resolve_contents(range),
        };

        event!(Level::TRACE, "resolved selection attributes from {:?}: {:?}", resolution.source, resolution.attributes);
        resolution
    }

    /// Takes the attributes of the first text run in the range. A range without
    /// any text resolves to nothing, even when a store exists.
    pub fn resolve_contents(&self, range: &Range) -> Resolution {
        range.items(self.root)
            .find_map(|item| match item {
                range::Item::Text { node, .. } => Some(Resolution::new(Source::Contents, &node.attributes)),
                _ => None,
            })
            .unwrap_or_else(Resolution::nothing)
    }

    pub fn resolve_caret(&self, position: &Position) -> Resolution {
        let Some(parent) = position.parent_element(self.root) else {
            return Resolution::nothing();
        };

        let before = parent.index_before(position.offset);
        let after = parent.index_after(position.offset);

        if !self.gravity_overridden {
            if let Some(attributes) = before.and_then(|i| text_run_attributes(&parent.children()[i])) {
                return Resolution::new(Source::Before, attributes);
            }
        }

        if let Some(attributes) = after.and_then(|i| text_run_attributes(&parent.children()[i])) {
            return Resolution::new(Source::After, attributes);
        }

        if !self.gravity_overridden {
            let left = before.and_then(|i| parent.children()[..i].iter().rev().find_map(|node| text_run_attributes(node)));
            if let Some(attributes) = left {
                return Resolution::new(Source::WalkLeft, attributes);
            }
        }

        let right = after.and_then(|i| parent.children()[i+1..].iter().find_map(|node| text_run_attributes(node)));
        if let Some(attributes) = right {
            return Resolution::new(Source::WalkRight, attributes);
        }

        if parent.is_empty() {
            let stored = store::stored_attributes(parent, self.store_prefix);
            if !stored.is_empty() {
                return Resolution {
                    source: Source::Store,
                    attributes: stored,
                };
            }
        }

        Resolution::nothing()
    }
}
