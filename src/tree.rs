//! Record trees and the builder that materializes them one at a time.
//!
//! A dump is a single root element wrapping many sibling records (`<siteinfo>`,
//! `<page>`, ...). [`TreeBuilder`] turns the flat open/text/close event stream
//! into one [`RecordNode`] per sibling and forgets it as soon as it is handed
//! out, so memory stays proportional to the largest record, not the document.

/// One element with its attributes, direct text content and children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub content: String,
    pub children: Children,
}

/// Children grouped by element name, in first-seen order.
///
/// A name seen once maps to [`Child::Single`]; the second occurrence
/// promotes the entry to [`Child::Many`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Children {
    entries: Vec<(String, Child)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Single(RecordNode),
    Many(Vec<RecordNode>),
}

/// Borrowed view of the children stored under one name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildRef<'a> {
    Absent,
    Single(&'a RecordNode),
    Many(&'a [RecordNode]),
}

impl<'a> ChildRef<'a> {
    pub fn first(self) -> Option<&'a RecordNode> {
        match self {
            ChildRef::Absent => None,
            ChildRef::Single(node) => Some(node),
            ChildRef::Many(nodes) => nodes.first(),
        }
    }

    pub fn last(self) -> Option<&'a RecordNode> {
        match self {
            ChildRef::Absent => None,
            ChildRef::Single(node) => Some(node),
            ChildRef::Many(nodes) => nodes.last(),
        }
    }

    pub fn len(self) -> usize {
        match self {
            ChildRef::Absent => 0,
            ChildRef::Single(_) => 1,
            ChildRef::Many(nodes) => nodes.len(),
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn iter(self) -> impl Iterator<Item = &'a RecordNode> {
        let slice: &'a [RecordNode] = match self {
            ChildRef::Absent => &[],
            ChildRef::Single(node) => std::slice::from_ref(node),
            ChildRef::Many(nodes) => nodes,
        };
        slice.iter()
    }
}

impl Children {
    pub fn get(&self, name: &str) -> ChildRef<'_> {
        match self.entries.iter().find(|(n, _)| n == name) {
            None => ChildRef::Absent,
            Some((_, Child::Single(node))) => ChildRef::Single(node),
            Some((_, Child::Many(nodes))) => ChildRef::Many(nodes),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, node: RecordNode) {
        match self.entries.iter_mut().find(|(n, _)| *n == node.name) {
            None => self.entries.push((node.name.clone(), Child::Single(node))),
            Some((_, slot)) => {
                let previous = std::mem::replace(slot, Child::Many(Vec::new()));
                *slot = match previous {
                    Child::Single(first) => Child::Many(vec![first, node]),
                    Child::Many(mut nodes) => {
                        nodes.push(node);
                        Child::Many(nodes)
                    }
                };
            }
        }
    }
}

impl RecordNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> ChildRef<'_> {
        self.children.get(name)
    }

    /// Follows `path` taking the first child at each step.
    pub fn find(&self, path: &[&str]) -> Option<&RecordNode> {
        path.iter()
            .try_fold(self, |node, name| node.child(name).first())
    }

    /// Text content at `path`, if every element along it exists.
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.find(path).map(|n| n.content.as_str())
    }
}

/// Push-driven builder fed by markup events.
///
/// The first element opened is the document root and is not materialized;
/// each element directly under it becomes one record.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    stack: Vec<RecordNode>,
    root: Option<String>,
    root_closed: bool,
    records: u64,
    peak_depth: usize,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, name: &str, attrs: Vec<(String, String)>) {
        if self.root.is_none() {
            self.root = Some(name.to_string());
            return;
        }
        self.stack.push(RecordNode {
            name: name.to_string(),
            attrs,
            ..RecordNode::default()
        });
        self.peak_depth = self.peak_depth.max(self.stack.len());
    }

    pub fn text(&mut self, text: &str) {
        if let Some(node) = self.stack.last_mut() {
            node.content.push_str(text);
        }
    }

    /// Closes the innermost element; returns the record when a top-level
    /// element completes.
    pub fn close(&mut self) -> Option<RecordNode> {
        let node = match self.stack.pop() {
            Some(node) => node,
            None => {
                self.root_closed = self.root.is_some();
                return None;
            }
        };
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.insert(node);
                None
            }
            None => {
                self.records += 1;
                Some(node)
            }
        }
    }

    /// Number of open elements below the root.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Name of the innermost open element, including the root.
    pub fn open_element(&self) -> Option<&str> {
        self.stack
            .last()
            .map(|n| n.name.as_str())
            .or(if self.root_closed { None } else { self.root.as_deref() })
    }

    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.root_closed && self.stack.is_empty()
    }

    pub fn records_emitted(&self) -> u64 {
        self.records
    }

    /// Deepest stack seen so far; bounded by the deepest single record.
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }
}
