use std::sync;

use crate::model::attributes;

/// Offsets from the root, one per level. Every step addresses an element that
/// starts exactly at that offset within its parent.
pub type Path = Vec<usize>;
pub type PathSlice<'a> = &'a [usize];

#[derive(Debug, Clone)]
pub enum Content {
    Element {
        name: String,
        children: Vec<sync::Arc<Node>>,
    },

    /// A run of characters sharing one attribute set.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub content: Content,
    pub attributes: attributes::Attributes,
}

/// Where an offset falls among an element's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locus {
    /// Between two children. `index` is the child starting at the offset, or
    /// the child count if the offset is the end of the element.
    Boundary { index: usize },

    /// Strictly inside the text run at `index`, `within` units from its start.
    Inside { index: usize, within: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    NotAnElement,
    OffsetOutOfBounds { offset: usize, max_offset: usize },
}

impl Node {
    pub fn new_element<S: Into<String>>(name: S) -> Node {
        Node {
            content: Content::Element {
                name: name.into(),
                children: Vec::new(),
            },
            attributes: attributes::Attributes::new(),
        }
    }

    pub fn new_text<S: Into<String>>(data: S) -> Node {
        Node {
            content: Content::Text(data.into()),
            attributes: attributes::Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: attributes::Attributes) -> Node {
        self.attributes = attributes;
        self
    }

    pub fn builder() -> Builder {
        Builder {
            node: Node::new_element("root"),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.content {
            Content::Element { name, .. } => Some(name.as_str()),
            Content::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Element { .. } => None,
            Content::Text(data) => Some(data.as_str()),
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.content, Content::Element { .. })
    }

    /// Text-bearing nodes are literal content and carry the formatting a
    /// caret next to them inherits.
    pub fn is_text_bearing(&self) -> bool {
        matches!(self.content, Content::Text(_))
    }

    /// How many offset units this node occupies in its parent.
    pub fn offset_size(&self) -> usize {
        match &self.content {
            Content::Element { .. } => 1,
            Content::Text(data) => data.chars().count(),
        }
    }

    pub fn children(&self) -> &[sync::Arc<Node>] {
        match &self.content {
            Content::Element { children, .. } => &children[..],
            Content::Text(_) => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<sync::Arc<Node>>> {
        match &mut self.content {
            Content::Element { children, .. } => Some(children),
            Content::Text(_) => None,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    pub fn is_empty(&self) -> bool {
        match &self.content {
            Content::Element { children, .. } => children.is_empty(),
            Content::Text(data) => data.is_empty(),
        }
    }

    pub fn max_offset(&self) -> usize {
        self.children().iter().map(|c| c.offset_size()).sum()
    }

    /// Offset at which the child at `index` starts.
    pub fn child_start(&self, index: usize) -> usize {
        self.children()[..index].iter().map(|c| c.offset_size()).sum()
    }

    pub fn locate(&self, offset: usize) -> Option<Locus> {
        let mut start = 0;
        for (index, child) in self.children().iter().enumerate() {
            if offset == start {
                return Some(Locus::Boundary { index });
            }

            let end = start + child.offset_size();
            if offset < end {
                return Some(Locus::Inside { index, within: offset - start });
            }

            start = end;
        }

        if offset == start {
            Some(Locus::Boundary { index: self.child_count() })
        } else {
            None
        }
    }

    /// The child starting exactly at the offset.
    pub fn child_at_offset(&self, offset: usize) -> Option<&sync::Arc<Node>> {
        match self.locate(offset)? {
            Locus::Boundary { index } => self.children().get(index),
            Locus::Inside { .. } => None,
        }
    }

    pub fn element_index_at(&self, offset: usize) -> Option<usize> {
        match self.locate(offset)? {
            Locus::Boundary { index } if self.children().get(index).map_or(false, |c| c.is_element()) => Some(index),
            _ => None,
        }
    }

    /// The text run that strictly contains the offset, if any.
    pub fn text_run_at(&self, offset: usize) -> Option<&sync::Arc<Node>> {
        match self.locate(offset)? {
            Locus::Inside { index, .. } => Some(&self.children()[index]),
            Locus::Boundary { .. } => None,
        }
    }

    /// Index of the child ending exactly at the offset. A position strictly
    /// inside a text run has that run on both sides.
    pub fn index_before(&self, offset: usize) -> Option<usize> {
        match self.locate(offset)? {
            Locus::Boundary { index } => index.checked_sub(1),
            Locus::Inside { index, .. } => Some(index),
        }
    }

    pub fn index_after(&self, offset: usize) -> Option<usize> {
        match self.locate(offset)? {
            Locus::Boundary { index } if index < self.child_count() => Some(index),
            Locus::Boundary { .. } => None,
            Locus::Inside { index, .. } => Some(index),
        }
    }

    pub fn node_before(&self, offset: usize) -> Option<&sync::Arc<Node>> {
        self.index_before(offset).map(|i| &self.children()[i])
    }

    pub fn node_after(&self, offset: usize) -> Option<&sync::Arc<Node>> {
        self.index_after(offset).map(|i| &self.children()[i])
    }

    pub fn previous_sibling(&self, index: usize) -> Option<&sync::Arc<Node>> {
        index.checked_sub(1).and_then(|i| self.children().get(i))
    }

    pub fn next_sibling(&self, index: usize) -> Option<&sync::Arc<Node>> {
        self.children().get(index + 1)
    }

    /// Follows a path of element offsets down from this node.
    pub fn lookup_element(self: &sync::Arc<Self>, path: PathSlice) -> Option<&sync::Arc<Node>> {
        let mut current = self;

        for offset in path {
            let index = current.element_index_at(*offset)?;
            current = &current.children()[index];
        }

        if current.is_element() {
            Some(current)
        } else {
            None
        }
    }

    /// Makes sure a child boundary exists at the offset, splitting a text run
    /// if necessary, and returns the index of the child that starts there.
    pub fn split_children_at(&mut self, offset: usize) -> Result<usize, StructureError> {
        let max_offset = self.max_offset();
        let locus = self.locate(offset).ok_or(StructureError::OffsetOutOfBounds { offset, max_offset })?;
        let children = self.children_mut().ok_or(StructureError::NotAnElement)?;

        match locus {
            Locus::Boundary { index } => Ok(index),
            Locus::Inside { index, within } => {
                let run = &children[index];
                let data = run.text().unwrap_or_default();
                let split = data.char_indices().nth(within).map_or(data.len(), |(i, _)| i);

                let head = Node::new_text(&data[..split]).with_attributes(run.attributes.clone());
                let tail = Node::new_text(&data[split..]).with_attributes(run.attributes.clone());

                children.splice(index..=index, [sync::Arc::new(head), sync::Arc::new(tail)]);
                Ok(index + 1)
            },
        }
    }

    /// Drops empty text runs and joins adjacent runs with equal attributes.
    pub fn normalize_children(&mut self) {
        let Some(children) = self.children_mut() else {
            return;
        };

        let mut normalized: Vec<sync::Arc<Node>> = Vec::with_capacity(children.len());
        for child in children.drain(..) {
            if child.is_text_bearing() && child.is_empty() {
                continue;
            }

            match normalized.last_mut() {
                Some(last) if last.is_text_bearing() && child.is_text_bearing() && last.attributes == child.attributes => {
                    let joined = format!("{}{}", last.text().unwrap_or_default(), child.text().unwrap_or_default());
                    *last = sync::Arc::new(Node::new_text(joined).with_attributes(last.attributes.clone()));
                },
                _ => normalized.push(child),
            }
        }

        *children = normalized;
    }
}

pub struct Builder {
    node: Node,
}

impl Builder {
    pub fn name<S: Into<String>>(mut self, new_name: S) -> Self {
        if let Content::Element { name, .. } = &mut self.node.content {
            *name = new_name.into();
        }
        self
    }

    pub fn attribute<K: Into<String>, V: Into<attributes::Value>>(mut self, key: K, value: V) -> Self {
        self.node.attributes.set(key, value);
        self
    }

    /// Appends an element child.
    pub fn child<F>(mut self, f: F) -> Self where F: FnOnce(Builder) -> Builder {
        let child = f(Builder { node: Node::new_element("") }).node;
        self.push(child);
        self
    }

    /// Appends a text run.
    pub fn text<S, I, K, V>(mut self, data: S, attributes: I) -> Self where
        S: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<attributes::Value> {
        let run = Node::new_text(data).with_attributes(attributes.into_iter().collect());
        self.push(run);
        self
    }

    fn push(&mut self, child: Node) {
        if let Some(children) = self.node.children_mut() {
            children.push(sync::Arc::new(child));
        }
    }

    pub fn build_node(mut self) -> Node {
        self.node.normalize_children();
        self.node
    }

    pub fn build(self) -> sync::Arc<Node> {
        sync::Arc::new(self.build_node())
    }
}
