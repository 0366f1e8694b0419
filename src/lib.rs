//! wikigraph: streaming Wikipedia dump to page/paragraph link graph
//!
//! The pipeline reads a (optionally bzip2-compressed) XML export one record at
//! a time and turns it into graph facts:
//!
//! 1. **Tree building** -- Streaming quick-xml events become one materialized
//!    record tree per top-level element; only one record is held in memory
//! 2. **Page mapping** -- `<siteinfo>` installs the namespace vocabulary,
//!    `<page>` records become content pages or redirects with canonical titles
//! 3. **Reference extraction** -- `[[links]]` outside citation blocks, with
//!    their byte offsets
//! 4. **Paragraph alignment** (optional) -- Page lines are matched against a
//!    title-sorted external paragraph corpus by token overlap, producing
//!    paragraph nodes and LEAD/NEXT/REFERENCES edges
//! 5. **Batching** -- Facts are buffered per kind and flushed to pluggable
//!    sinks with retry on transient failures
//!
//! Two side commands complete the toolchain: parallel conversion of paragraph
//! files into import CSVs, and an idempotent Neo4j `LOAD CSV` importer.
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML reader with BZ2 decompression
//! - [`tree`] -- Record trees with single/repeated children
//! - [`title`] -- Namespace-aware title canonicalization
//! - [`references`] -- Link and citation scanning
//! - [`mapper`] -- Record tree to typed page
//! - [`align`] -- Paragraph alignment and edge emission
//! - [`paragraphs`] -- External paragraph sources and the corpus cursor
//! - [`batch`] -- Per-kind batching, routing and retry
//! - [`sink`] -- Sink trait, CSV and in-memory sinks
//! - [`extract`] -- The extraction pass
//! - [`convert`] -- Parallel paragraph-file conversion
//! - [`import`] -- Neo4j import via Bolt
//!
//! # Example Usage
//!
//! ```bash
//! # Pages and links only
//! wikigraph extract -i enwiki-latest-pages-articles.xml.bz2 -o output/
//!
//! # With paragraph alignment, keeping links between known titles
//! wikigraph extract -i dump.xml.bz2 -o output/ \
//!     --paragraphs paragraphs.csv --known-titles output/nodes/title.csv
//!
//! # Load into Neo4j
//! wikigraph import -o output/
//! ```

pub mod align;
pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod extract;
pub mod import;
pub mod known;
pub mod mapper;
pub mod models;
pub mod paragraphs;
pub mod parser;
pub mod progress;
pub mod references;
pub mod sink;
pub mod stats;
pub mod title;
pub mod tree;
