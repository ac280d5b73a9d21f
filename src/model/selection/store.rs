//! Caret attributes persisted on empty elements. A stored attribute is an
//! ordinary element attribute whose key carries a reserved prefix.

use std::sync;

use crate::model::attributes;
use crate::model::document::structure;
use crate::model::range::Range;

pub fn encode_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

pub fn decode_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

/// Keys of the element's own attributes that carry the prefix, still encoded.
pub fn stored_keys<'a>(node: &'a structure::Node, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    node.attributes.keys().filter(move |key| key.starts_with(prefix))
}

pub fn has_stored_attributes(node: &structure::Node, prefix: &str) -> bool {
    stored_keys(node, prefix).next().is_some()
}

/// The element's stored attributes under their logical names.
pub fn stored_attributes(node: &structure::Node, prefix: &str) -> attributes::Attributes {
    node.attributes.iter()
        .filter_map(|(key, value)| decode_key(prefix, key).map(|key| (key, value.clone())))
        .collect()
}

pub fn encode_attributes(prefix: &str, attributes: &attributes::Attributes) -> attributes::Attributes {
    attributes.iter()
        .map(|(key, value)| (encode_key(prefix, key), value.clone()))
        .collect()
}

/// Where a caret sitting in `range` would persist its attributes: the
/// caret's parent element, as long as the range is collapsed and the parent
/// has no children.
pub fn target(range: &Range, root: &sync::Arc<structure::Node>) -> Option<structure::Path> {
    if !range.is_collapsed() {
        return None;
    }

    match range.start.parent_element(root) {
        Some(parent) if parent.is_empty() => Some(range.start.parent.clone()),
        _ => None,
    }
}
