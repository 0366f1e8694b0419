//! Title canonicalization against the dump's namespace vocabulary.
//!
//! Canonical form: whitespace and underscore runs collapse to one space, the
//! string is trimmed, a declared namespace prefix is split off into
//! [`PageLocation::namespace`], and the first character is upper-cased.

use crate::models::PageLocation;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use std::collections::BTreeMap;

static SEPARATOR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_]+").unwrap());

const TALK: &str = "Talk";

/// Namespace names declared in the dump's `<siteinfo>` record.
#[derive(Debug, Clone, Default)]
pub struct NamespaceSet {
    names: FxHashSet<String>,
    by_key: BTreeMap<i32, String>,
}

impl NamespaceSet {
    /// Builds the set from `(key, name)` pairs; the unnamed main namespace is
    /// kept in the key lookup only.
    pub fn from_declarations<I, S>(declarations: I) -> Self
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for (key, name) in declarations {
            let name = name.into();
            if !name.is_empty() {
                set.names.insert(name.clone());
            }
            set.by_key.insert(key, name);
        }
        set
    }

    pub fn contains(&self, name: &str) -> bool {
        !name.is_empty() && self.names.contains(name)
    }

    pub fn name_for_key(&self, key: i32) -> Option<&str> {
        self.by_key.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Mutable state shared by the mapper across records of one document.
///
/// The namespace vocabulary is set once from `<siteinfo>`; pages that arrive
/// before it cannot be resolved.
#[derive(Debug, Default)]
pub struct ParserContext {
    namespaces: Option<NamespaceSet>,
}

impl ParserContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaces(namespaces: NamespaceSet) -> Self {
        Self {
            namespaces: Some(namespaces),
        }
    }

    pub fn set_namespaces(&mut self, namespaces: NamespaceSet) {
        self.namespaces = Some(namespaces);
    }

    pub fn namespaces(&self) -> Option<&NamespaceSet> {
        self.namespaces.as_ref()
    }
}

/// Collapses `[\s_]+` to a single space and trims.
pub fn normalize_separators(title: &str) -> Cow<'_, str> {
    let trimmed = title.trim_matches(|c: char| c.is_whitespace() || c == '_');
    let needs_rewrite = trimmed.contains('_')
        || trimmed
            .char_indices()
            .any(|(i, c)| c.is_whitespace() && (c != ' ' || trimmed[i + 1..].starts_with(' ')));
    if needs_rewrite {
        Cow::Owned(SEPARATOR_RUN.replace_all(trimmed, " ").into_owned())
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// Upper-cases a one-character string entirely, otherwise only its first character.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.push_str(chars.as_str());
            out
        }
    }
}

/// Resolves a raw title or link target to its canonical location.
pub fn resolve(namespaces: &NamespaceSet, raw_title: &str) -> PageLocation {
    let sanitized = normalize_separators(raw_title);
    let mut title: &str = &sanitized;

    // Forced links ([[:Category:Foo]]) name the page itself.
    if let Some(rest) = title.strip_prefix(':') {
        title = rest.trim_start();
    }

    if let Some(rest) = title.strip_prefix("W:").or_else(|| title.strip_prefix("w:")) {
        return PageLocation::main(capitalize(rest.trim_start()));
    }

    if let Some((prefix, rest)) = title.split_once(':') {
        if prefix == TALK {
            let subject = rest.split('/').next().unwrap_or_default().trim();
            return PageLocation::new(capitalize(subject), Some(TALK));
        }
        if namespaces.contains(prefix) {
            return PageLocation::new(capitalize(rest.trim_start()), Some(prefix));
        }
    }

    PageLocation::main(capitalize(title))
}
