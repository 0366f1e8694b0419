use chrono::NaiveDateTime;
use std::borrow::Cow;
use std::fmt;

/// Canonical address of a page: title with the namespace prefix removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageLocation {
    pub title: String,
    pub namespace: Option<String>,
}

impl PageLocation {
    pub fn new(title: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            title: title.into(),
            namespace: namespace.map(str::to_string),
        }
    }

    pub fn main(title: impl Into<String>) -> Self {
        Self::new(title, None)
    }

    /// Graph key: the bare title in the main namespace, `Namespace:Title` elsewhere.
    pub fn qualified(&self) -> Cow<'_, str> {
        match &self.namespace {
            None => Cow::Borrowed(&self.title),
            Some(ns) => Cow::Owned(format!("{ns}:{}", self.title)),
        }
    }
}

/// An inline `[[link]]` and where it starts in the citation-stripped body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub target: PageLocation,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageKind {
    Redirect { target: PageLocation },
    Content { text: String, references: Vec<Reference> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: u64,
    pub location: PageLocation,
    pub last_edit: NaiveDateTime,
    pub kind: PageKind,
}

impl Page {
    pub fn title(&self) -> &str {
        &self.location.title
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.kind, PageKind::Redirect { .. })
    }

    /// Body text and references; `None` for redirects.
    pub fn content(&self) -> Option<(&str, &[Reference])> {
        match &self.kind {
            PageKind::Content { text, references } => Some((text, references)),
            PageKind::Redirect { .. } => None,
        }
    }
}

/// Paragraph ids follow the corpus convention `<Title_with_underscores>_<index>`.
pub fn paragraph_id(title: &str, index: usize) -> String {
    let mut id = title.replace(' ', "_");
    id.push('_');
    id.push_str(itoa::Buffer::new().format(index));
    id
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactKind {
    PageNode,
    Link,
    ParagraphNode,
    ParagraphEdge,
}

impl FactKind {
    pub const ALL: [FactKind; 4] = [
        FactKind::PageNode,
        FactKind::Link,
        FactKind::ParagraphNode,
        FactKind::ParagraphEdge,
    ];

    /// Base file name used by file-backed sinks.
    pub fn file_stem(self) -> &'static str {
        match self {
            FactKind::PageNode => "pages",
            FactKind::Link => "links",
            FactKind::ParagraphNode => "paragraphs",
            FactKind::ParagraphEdge => "paragraph_links",
        }
    }

    pub fn is_edge(self) -> bool {
        matches!(self, FactKind::Link | FactKind::ParagraphEdge)
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageNode {
    pub id: u64,
    pub title: String,
    pub namespace: Option<String>,
    pub last_edit: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkEdge {
    pub source_title: String,
    pub target_title: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphNode {
    pub id: String,
    pub title: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParagraphLinkKind {
    /// From the first aligned paragraph of a page to the others.
    Lead,
    /// From an aligned paragraph to the next aligned one.
    Next,
    /// From a paragraph to the first paragraph of a page it links to.
    Reference,
}

impl ParagraphLinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParagraphLinkKind::Lead => "LEAD",
            ParagraphLinkKind::Next => "NEXT",
            ParagraphLinkKind::Reference => "REFERENCES",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub kind: ParagraphLinkKind,
}

/// One extracted fact, owned by the batch coordinator once pushed.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    PageNode(PageNode),
    Link(LinkEdge),
    ParagraphNode(ParagraphNode),
    ParagraphEdge(ParagraphEdge),
}

impl Fact {
    pub fn kind(&self) -> FactKind {
        match self {
            Fact::PageNode(_) => FactKind::PageNode,
            Fact::Link(_) => FactKind::Link,
            Fact::ParagraphNode(_) => FactKind::ParagraphNode,
            Fact::ParagraphEdge(_) => FactKind::ParagraphEdge,
        }
    }

    /// Stable upsert key: the node id, or the edge's source key.
    pub fn key(&self) -> &str {
        match self {
            Fact::PageNode(n) => &n.title,
            Fact::Link(e) => &e.source_title,
            Fact::ParagraphNode(n) => &n.id,
            Fact::ParagraphEdge(e) => &e.source_id,
        }
    }

    /// `(source, target)` keys for edges, with the node kind they refer to.
    pub fn endpoints(&self) -> Option<(FactKind, &str, &str)> {
        match self {
            Fact::Link(e) => Some((FactKind::PageNode, &e.source_title, &e.target_title)),
            Fact::ParagraphEdge(e) => {
                Some((FactKind::ParagraphNode, &e.source_id, &e.target_id))
            }
            Fact::PageNode(_) | Fact::ParagraphNode(_) => None,
        }
    }
}
