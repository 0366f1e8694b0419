//! Storage sinks for extracted facts.

use crate::config::CSV_BUFFER_SIZE;
use crate::error::SinkError;
use crate::models::{Fact, FactKind};
use crate::paragraphs::format_embedding;
use csv::Writer;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Answers whether a node key is known to exist.
pub trait KeyIndex {
    fn exists(&self, kind: FactKind, key: &str) -> bool;
}

/// A destination for facts. Writes are upserts; the coordinator may redeliver
/// a batch after a transient failure.
pub trait Sink {
    fn name(&self) -> &str;

    fn put_node(&mut self, fact: &Fact) -> Result<(), SinkError>;

    fn put_edge(&mut self, fact: &Fact) -> Result<(), SinkError>;

    /// Bulk upsert of facts that all have `kind`.
    fn put_batch(&mut self, kind: FactKind, facts: &[Fact]) -> Result<(), SinkError> {
        for fact in facts {
            if kind.is_edge() {
                self.put_edge(fact)?;
            } else {
                self.put_node(fact)?;
            }
        }
        Ok(())
    }

    fn exists(&self, kind: FactKind, key: &str) -> bool;

    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Column headers per fact kind.
pub fn csv_header(kind: FactKind) -> &'static [&'static str] {
    match kind {
        FactKind::PageNode => &["title", "id", "namespace", "last_edit"],
        FactKind::Link => &["source_title", "target_title", "position"],
        FactKind::ParagraphNode => &["id", "title", "text", "embedding"],
        FactKind::ParagraphEdge => &["source_id", "target_id", "kind"],
    }
}

/// `pages.csv`, or `pages_003.csv` when sharded.
pub fn csv_file_name(kind: FactKind, shard: u32, shards: u32) -> String {
    if shards > 1 {
        format!("{}_{:03}.csv", kind.file_stem(), shard)
    } else {
        format!("{}.csv", kind.file_stem())
    }
}

/// Shard of a node key or edge source.
pub fn shard_for(key: &str, shards: u32) -> u32 {
    if shards <= 1 {
        return 0;
    }
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() % u64::from(shards)) as u32
}

type CsvWriter = Writer<BufWriter<File>>;

/// Writes one CSV file per fact kind (and shard) into a directory.
pub struct CsvSink {
    name: String,
    dir: PathBuf,
    shards: u32,
    writers: FxHashMap<FactKind, Vec<CsvWriter>>,
    rows: FxHashMap<FactKind, u64>,
    page_titles: FxHashSet<String>,
    paragraph_ids: FxHashSet<String>,
}

impl CsvSink {
    /// Creates every output file up front, each with its header row.
    pub fn create(dir: &Path, shards: u32) -> Result<Self, SinkError> {
        let shards = shards.max(1);
        fs::create_dir_all(dir)?;

        let mut writers = FxHashMap::default();
        for kind in FactKind::ALL {
            let mut shard_writers = Vec::with_capacity(shards as usize);
            for shard in 0..shards {
                let path = dir.join(csv_file_name(kind, shard, shards));
                let mut writer = Writer::from_writer(BufWriter::with_capacity(
                    CSV_BUFFER_SIZE,
                    File::create(&path)?,
                ));
                writer.write_record(csv_header(kind))?;
                shard_writers.push(writer);
            }
            writers.insert(kind, shard_writers);
        }
        debug!(dir = %dir.display(), shards, "CSV sink opened");

        Ok(Self {
            name: format!("csv:{}", dir.display()),
            dir: dir.to_path_buf(),
            shards,
            writers,
            rows: FxHashMap::default(),
            page_titles: FxHashSet::default(),
            paragraph_ids: FxHashSet::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shards(&self) -> u32 {
        self.shards
    }

    /// Data rows written for `kind`, headers excluded.
    pub fn rows(&self, kind: FactKind) -> u64 {
        self.rows.get(&kind).copied().unwrap_or(0)
    }

    fn write(&mut self, fact: &Fact) -> Result<(), SinkError> {
        let kind = fact.kind();
        let shard = shard_for(fact.key(), self.shards) as usize;
        let writer = self
            .writers
            .get_mut(&kind)
            .and_then(|w| w.get_mut(shard))
            .ok_or_else(|| SinkError::Fatal(format!("{} is already finished", self.name)))?;

        let mut num = itoa::Buffer::new();
        match fact {
            Fact::PageNode(n) => {
                let last_edit = n.last_edit.format("%Y-%m-%dT%H:%M:%S").to_string();
                writer.write_record([
                    n.title.as_str(),
                    num.format(n.id),
                    n.namespace.as_deref().unwrap_or_default(),
                    last_edit.as_str(),
                ])?;
                self.page_titles.insert(n.title.clone());
            }
            Fact::Link(e) => {
                writer.write_record([
                    e.source_title.as_str(),
                    e.target_title.as_str(),
                    num.format(e.position),
                ])?;
            }
            Fact::ParagraphNode(n) => {
                let embedding = format_embedding(&n.embedding);
                writer.write_record([
                    n.id.as_str(),
                    n.title.as_str(),
                    n.text.as_str(),
                    embedding.as_str(),
                ])?;
                self.paragraph_ids.insert(n.id.clone());
            }
            Fact::ParagraphEdge(e) => {
                writer.write_record([e.source_id.as_str(), e.target_id.as_str(), e.kind.as_str()])?;
            }
        }
        *self.rows.entry(kind).or_default() += 1;
        Ok(())
    }
}

impl Sink for CsvSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn put_node(&mut self, fact: &Fact) -> Result<(), SinkError> {
        if fact.kind().is_edge() {
            return Err(SinkError::Fatal(format!("{} fact is not a node", fact.kind())));
        }
        self.write(fact)
    }

    fn put_edge(&mut self, fact: &Fact) -> Result<(), SinkError> {
        if !fact.kind().is_edge() {
            return Err(SinkError::Fatal(format!("{} fact is not an edge", fact.kind())));
        }
        self.write(fact)
    }

    fn put_batch(&mut self, _kind: FactKind, facts: &[Fact]) -> Result<(), SinkError> {
        for fact in facts {
            self.write(fact)?;
        }
        Ok(())
    }

    fn exists(&self, kind: FactKind, key: &str) -> bool {
        match kind {
            FactKind::PageNode => self.page_titles.contains(key),
            FactKind::ParagraphNode => self.paragraph_ids.contains(key),
            FactKind::Link | FactKind::ParagraphEdge => false,
        }
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        for (_, writers) in self.writers.drain() {
            for mut writer in writers {
                writer.flush()?;
            }
        }
        info!(
            pages = self.rows(FactKind::PageNode),
            links = self.rows(FactKind::Link),
            paragraphs = self.rows(FactKind::ParagraphNode),
            paragraph_links = self.rows(FactKind::ParagraphEdge),
            "CSV output flushed"
        );
        Ok(())
    }
}

/// Keeps every batch in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    name: String,
    batches: Vec<(FactKind, Vec<Fact>)>,
    keys: FxHashSet<(FactKind, String)>,
    finished: bool,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> &[(FactKind, Vec<Fact>)] {
        &self.batches
    }

    /// Every fact of `kind`, in delivery order.
    pub fn facts(&self, kind: FactKind) -> impl Iterator<Item = &Fact> {
        self.batches
            .iter()
            .filter(move |(k, _)| *k == kind)
            .flat_map(|(_, facts)| facts.iter())
    }

    pub fn len(&self) -> usize {
        self.batches.iter().map(|(_, f)| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn record(&mut self, kind: FactKind, facts: Vec<Fact>) {
        for fact in &facts {
            if !kind.is_edge() {
                self.keys.insert((kind, fact.key().to_string()));
            }
        }
        self.batches.push((kind, facts));
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn put_node(&mut self, fact: &Fact) -> Result<(), SinkError> {
        self.record(fact.kind(), vec![fact.clone()]);
        Ok(())
    }

    fn put_edge(&mut self, fact: &Fact) -> Result<(), SinkError> {
        self.record(fact.kind(), vec![fact.clone()]);
        Ok(())
    }

    fn put_batch(&mut self, kind: FactKind, facts: &[Fact]) -> Result<(), SinkError> {
        self.record(kind, facts.to_vec());
        Ok(())
    }

    fn exists(&self, kind: FactKind, key: &str) -> bool {
        self.keys.contains(&(kind, key.to_string()))
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }
}
