use crate::models::FactKind;
use crate::sink::KeyIndex;
use crate::title::normalize_separators;
use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

/// Page titles known to exist downstream, e.g. the `title.csv` written by
/// `convert-paragraphs`. Backs a `KnownEndpoints` route filter.
#[derive(Debug, Default, Clone)]
pub struct TitleSet {
    titles: FxHashSet<String>,
}

impl TitleSet {
    /// Loads the first column of a headed CSV file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open title file: {}", path.display()))?;
        let set = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to read title file: {}", path.display()))?;
        info!(titles = set.len(), path = %path.display(), "Loaded known titles");
        Ok(set)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let mut set = Self::default();
        for record in rdr.records() {
            let record = record?;
            if let Some(title) = record.get(0) {
                set.insert(title);
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, title: &str) {
        let title = normalize_separators(title);
        if !title.is_empty() {
            self.titles.insert(title.into_owned());
        }
    }

    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains(normalize_separators(title).as_ref())
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for TitleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::default();
        for title in iter {
            set.insert(title.as_ref());
        }
        set
    }
}

impl KeyIndex for TitleSet {
    fn exists(&self, kind: FactKind, key: &str) -> bool {
        kind == FactKind::PageNode && self.contains(key)
    }
}
