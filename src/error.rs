//! Error taxonomy for the extraction pipeline.
//!
//! Errors are split by their unit of failure: a [`ParseError`] aborts the whole
//! run, a [`MapError`] costs one record, an [`IntegrityError`] costs one page's
//! paragraph alignment, and a [`SinkError`] is retried per batch before it is
//! escalated into a [`PipelineError`].

use crate::models::FactKind;
use thiserror::Error;

/// Malformed or unreadable markup. Always fatal.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },

    #[error("I/O error while reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("input ended inside <{element}> ({depth} elements still open)")]
    UnexpectedEof { element: String, depth: usize },

    #[error("input ended before the document root was opened")]
    EmptyDocument,
}

/// A single record could not be mapped to a page.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("page record is missing <{0}>")]
    MissingField(&'static str),

    #[error("page id {0:?} is not an integer")]
    InvalidId(String),

    #[error("timestamp {0:?} is malformed")]
    InvalidTimestamp(String),

    #[error("page {0:?} appeared before the <siteinfo> namespace declaration")]
    NoSiteinfo(String),
}

impl MapError {
    /// Whether the run must stop instead of skipping the record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MapError::NoSiteinfo(_))
    }
}

/// The page body has fewer paragraphs than the external corpus holds for its title.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("page {title:?} has {page_paragraphs} paragraphs but the paragraph corpus has {external_paragraphs}")]
pub struct IntegrityError {
    pub title: String,
    pub page_paragraphs: usize,
    pub external_paragraphs: usize,
}

/// A sink rejected a write.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Retryable, e.g. a write conflict or deadlock.
    #[error("transient sink failure: {0}")]
    Transient(String),

    #[error("sink failure: {0}")]
    Fatal(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                SinkError::Transient(e.to_string())
            }
            _ => SinkError::Fatal(e.to_string()),
        }
    }
}

impl From<csv::Error> for SinkError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            if let csv::ErrorKind::Io(io) = e.into_kind() {
                return SinkError::from(io);
            }
            return SinkError::Fatal("csv I/O error".to_string());
        }
        SinkError::Fatal(e.to_string())
    }
}

/// Anything that stops an extraction run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("record {index}: {source}")]
    Mapping {
        index: u64,
        #[source]
        source: MapError,
    },

    #[error("sink {sink:?} failed to write a batch of {items} {kind} facts after {attempts} attempt(s): {source}")]
    Sink {
        sink: String,
        kind: FactKind,
        items: usize,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    #[error("sink {sink:?} failed to finish: {source}")]
    SinkFinish {
        sink: String,
        #[source]
        source: SinkError,
    },

    #[error("paragraph source failed: {0:#}")]
    ParagraphSource(anyhow::Error),
}

/// Failure while aligning one page; only `Source` stops the run.
#[derive(Error, Debug)]
pub enum AlignError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("paragraph source failed: {0:#}")]
    Source(anyhow::Error),
}
