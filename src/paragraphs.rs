//! External paragraph corpus: records, sources and the lookahead cursor.
//!
//! The corpus is a title-sorted stream of pre-segmented paragraphs with
//! embeddings. It is pulled lazily, one title group at a time, through a
//! [`ParagraphCursor`] that has exactly one owner.

use crate::title::{capitalize, normalize_separators};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalParagraph {
    pub id: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl ExternalParagraph {
    /// Number of `\n` in the text; a paragraph with `n` breaks spans `n + 1` page lines.
    pub fn line_breaks(&self) -> usize {
        memchr::memchr_iter(b'\n', self.text.as_bytes()).count()
    }
}

/// Comparison form of a title: separators collapsed, first letter uppercased.
pub fn title_key(title: &str) -> String {
    capitalize(&normalize_separators(title))
}

/// Whether a corpus title and a canonical page title name the same page.
pub fn same_title(corpus_title: &str, page_title: &str) -> bool {
    title_key(corpus_title) == title_key(page_title)
}

/// A lazily pulled, title-sorted stream of paragraphs.
pub trait ParagraphSource {
    /// Next record, or `None` at the end of the stream.
    fn next_paragraph(&mut self) -> Result<Option<ExternalParagraph>>;
}

impl<S: ParagraphSource + ?Sized> ParagraphSource for Box<S> {
    fn next_paragraph(&mut self) -> Result<Option<ExternalParagraph>> {
        (**self).next_paragraph()
    }
}

/// In-memory source, mostly for tests and small corpora.
#[derive(Debug, Default)]
pub struct VecParagraphSource {
    records: std::vec::IntoIter<ExternalParagraph>,
}

impl VecParagraphSource {
    pub fn new(records: Vec<ExternalParagraph>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl ParagraphSource for VecParagraphSource {
    fn next_paragraph(&mut self) -> Result<Option<ExternalParagraph>> {
        Ok(self.records.next())
    }
}

#[derive(Deserialize)]
struct CsvParagraphRow {
    id: String,
    title: String,
    text: String,
    #[serde(default)]
    embedding: String,
}

/// CSV with an `id,title,text,embedding` header; embeddings are `;`-separated floats.
pub struct CsvParagraphSource<R: Read> {
    records: csv::DeserializeRecordsIntoIter<R, CsvParagraphRow>,
    row: u64,
}

impl CsvParagraphSource<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open paragraph file: {}", path.display()))?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> CsvParagraphSource<R> {
    pub fn from_reader(reader: R) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader)
            .into_deserialize();
        Self { records, row: 0 }
    }
}

impl<R: Read> ParagraphSource for CsvParagraphSource<R> {
    fn next_paragraph(&mut self) -> Result<Option<ExternalParagraph>> {
        let Some(row) = self.records.next() else {
            return Ok(None);
        };
        self.row += 1;
        let row: CsvParagraphRow =
            row.with_context(|| format!("Malformed paragraph row {}", self.row))?;
        let embedding = parse_embedding(&row.embedding)
            .with_context(|| format!("Malformed embedding for paragraph {}", row.id))?;
        Ok(Some(ExternalParagraph {
            id: row.id,
            title: row.title,
            text: row.text,
            embedding,
        }))
    }
}

/// One JSON object per line with `id`, `title`, `text` and an `embedding` array.
pub struct JsonlParagraphSource<R: BufRead> {
    lines: Lines<R>,
    line: u64,
}

impl JsonlParagraphSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open paragraph file: {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlParagraphSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> ParagraphSource for JsonlParagraphSource<R> {
    fn next_paragraph(&mut self) -> Result<Option<ExternalParagraph>> {
        for line in self.lines.by_ref() {
            self.line += 1;
            let line = line.context("Failed to read paragraph line")?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .with_context(|| format!("Malformed paragraph on line {}", self.line))?;
            return Ok(Some(record));
        }
        Ok(None)
    }
}

/// Opens a paragraph file by extension: `.jsonl`/`.ndjson` or CSV otherwise.
pub fn open_source(path: &Path) -> Result<Box<dyn ParagraphSource>> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    Ok(match ext {
        "jsonl" | "ndjson" => Box::new(JsonlParagraphSource::open(path)?),
        _ => Box::new(CsvParagraphSource::open(path)?),
    })
}

pub fn parse_embedding(raw: &str) -> Result<Vec<f32>> {
    raw.split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<f32>()
                .with_context(|| format!("Invalid embedding component {v:?}"))
        })
        .collect()
}

pub fn format_embedding(embedding: &[f32]) -> String {
    embedding
        .iter()
        .map(|v| format!("{v:.8}"))
        .collect::<Vec<_>>()
        .join(";")
}

enum CursorState {
    Unprimed,
    At(ExternalParagraph),
    Exhausted,
}

/// Lookahead over a [`ParagraphSource`].
pub struct ParagraphCursor<S> {
    source: S,
    state: CursorState,
    consumed: u64,
}

impl<S: ParagraphSource> ParagraphCursor<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: CursorState::Unprimed,
            consumed: 0,
        }
    }

    /// Current record without consuming it; `None` once exhausted.
    pub fn peek(&mut self) -> Result<Option<&ExternalParagraph>> {
        if matches!(self.state, CursorState::Unprimed) {
            self.state = match self.source.next_paragraph()? {
                Some(record) => CursorState::At(record),
                None => CursorState::Exhausted,
            };
        }
        Ok(match &self.state {
            CursorState::At(record) => Some(record),
            CursorState::Unprimed | CursorState::Exhausted => None,
        })
    }

    /// Consumes and returns the current record.
    pub fn advance(&mut self) -> Result<Option<ExternalParagraph>> {
        self.peek()?;
        match std::mem::replace(&mut self.state, CursorState::Unprimed) {
            CursorState::At(record) => {
                self.consumed += 1;
                Ok(Some(record))
            }
            CursorState::Exhausted => {
                self.state = CursorState::Exhausted;
                Ok(None)
            }
            CursorState::Unprimed => Ok(None),
        }
    }

    pub fn is_exhausted(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_none())
    }

    /// Title of the current record, if any.
    pub fn current_title(&mut self) -> Result<Option<&str>> {
        Ok(self.peek()?.map(|r| r.title.as_str()))
    }

    /// Consumes every consecutive record whose title matches `page_title`.
    pub fn take_group(&mut self, page_title: &str) -> Result<Vec<ExternalParagraph>> {
        let mut group = Vec::new();
        while let Some(record) = self.peek()? {
            if !same_title(&record.title, page_title) {
                break;
            }
            if let Some(record) = self.advance()? {
                group.push(record);
            }
        }
        Ok(group)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn para(id: &str, title: &str, text: &str) -> ExternalParagraph {
        ExternalParagraph {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            embedding: vec![0.5, -1.0],
        }
    }

    #[test]
    fn cursor_peeks_without_consuming() {
        let mut cursor = ParagraphCursor::new(VecParagraphSource::new(vec![
            para("a0", "A", "x"),
            para("b0", "B", "y"),
        ]));
        assert_eq!(cursor.peek().unwrap().unwrap().id, "a0");
        assert_eq!(cursor.peek().unwrap().unwrap().id, "a0");
        assert_eq!(cursor.advance().unwrap().unwrap().id, "a0");
        assert_eq!(cursor.peek().unwrap().unwrap().id, "b0");
        assert_eq!(cursor.advance().unwrap().unwrap().id, "b0");
        assert!(cursor.peek().unwrap().is_none());
        assert!(cursor.advance().unwrap().is_none());
        assert!(cursor.is_exhausted().unwrap());
        assert_eq!(cursor.consumed(), 2);
    }

    #[test]
    fn take_group_stops_at_next_title() {
        let mut cursor = ParagraphCursor::new(VecParagraphSource::new(vec![
            para("a0", "Alpha_beta", "1"),
            para("a1", "Alpha beta", "2"),
            para("b0", "Beta", "3"),
        ]));
        let group = cursor.take_group("Alpha beta").unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(cursor.current_title().unwrap(), Some("Beta"));
        assert!(cursor.take_group("Gamma").unwrap().is_empty());
        assert_eq!(cursor.take_group("Beta").unwrap().len(), 1);
        assert!(cursor.is_exhausted().unwrap());
    }

    #[test]
    fn csv_source_parses_embeddings() {
        let data = "id,title,text,embedding\n\
                    Rust_0,Rust,\"Rust is fast.\",0.1;0.2;-0.3\n\
                    Rust_1,Rust,\"Line one\nLine two\",\n";
        let mut source = CsvParagraphSource::from_reader(Cursor::new(data));
        let first = source.next_paragraph().unwrap().unwrap();
        assert_eq!(first.id, "Rust_0");
        assert_eq!(first.embedding, vec![0.1, 0.2, -0.3]);
        let second = source.next_paragraph().unwrap().unwrap();
        assert_eq!(second.line_breaks(), 1);
        assert!(second.embedding.is_empty());
        assert!(source.next_paragraph().unwrap().is_none());
    }

    #[test]
    fn csv_source_reports_bad_embedding() {
        let data = "id,title,text,embedding\nX_0,X,text,0.1;abc\n";
        let mut source = CsvParagraphSource::from_reader(Cursor::new(data));
        assert!(source.next_paragraph().is_err());
    }

    #[test]
    fn jsonl_source_skips_blank_lines() {
        let data = "{\"id\":\"A_0\",\"title\":\"A\",\"text\":\"t\",\"embedding\":[1.0,2.0]}\n\n\
                    {\"id\":\"A_1\",\"title\":\"A\",\"text\":\"u\"}\n";
        let mut source = JsonlParagraphSource::from_reader(Cursor::new(data));
        assert_eq!(source.next_paragraph().unwrap().unwrap().embedding, vec![1.0, 2.0]);
        assert_eq!(source.next_paragraph().unwrap().unwrap().id, "A_1");
        assert!(source.next_paragraph().unwrap().is_none());
    }

    #[test]
    fn embedding_format_roundtrips_through_parse() {
        let formatted = format_embedding(&[0.25, -1.5]);
        assert_eq!(formatted, "0.25000000;-1.50000000");
        assert_eq!(parse_embedding(&formatted).unwrap(), vec![0.25, -1.5]);
    }
}
