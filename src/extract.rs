//! Single-pass extraction: records → pages → facts → batched sinks.
//!
//! Parsing and mapping are sequential. When a paragraph corpus is supplied,
//! every main-namespace content page is also handed to the aligner, whose
//! facts go through the same coordinator.

use crate::align::{AlignConfig, AlignOutcome, ParagraphAligner};
use crate::batch::{BatchCoordinator, RetryPolicy, RouteFilter};
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_CSV_SHARDS, PROGRESS_INTERVAL_SECS};
use crate::error::{AlignError, MapError, PipelineError};
use crate::known::TitleSet;
use crate::mapper::map_record;
use crate::models::{Fact, FactKind, LinkEdge, Page, PageKind, PageNode};
use crate::paragraphs::{open_source, ParagraphSource};
use crate::parser::WikiReader;
use crate::progress::ProgressMonitor;
use crate::sink::CsvSink;
use crate::stats::ExtractionStats;
use crate::title::ParserContext;
use anyhow::{Context, Result};
use std::fs;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Aligner over whichever corpus format was opened at runtime.
pub type DynAligner = ParagraphAligner<Box<dyn ParagraphSource>>;

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Title-sorted paragraph corpus (`.csv`, `.jsonl`); enables alignment.
    pub paragraphs: Option<PathBuf>,
    /// Titles that link edges must connect; other links are dropped.
    pub known_titles: Option<PathBuf>,
    pub batch_size: usize,
    pub csv_shards: u32,
    pub align: AlignConfig,
    pub retry: RetryPolicy,
    pub options: ExtractOptions,
    /// Parse and count without writing any files.
    pub dry_run: bool,
}

impl ExtractConfig {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            paragraphs: None,
            known_titles: None,
            batch_size: DEFAULT_BATCH_SIZE,
            csv_shards: DEFAULT_CSV_SHARDS,
            align: AlignConfig::default(),
            retry: RetryPolicy::default(),
            options: ExtractOptions::default(),
            dry_run: false,
        }
    }
}

/// Knobs of the record loop itself.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Stop after this many pages (content and redirects).
    pub limit: Option<u64>,
    pub progress_interval: Duration,
    pub spinner: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            limit: None,
            progress_interval: Duration::from_secs_f64(PROGRESS_INTERVAL_SECS),
            spinner: false,
        }
    }
}

/// Opens the input and output described by `config` and runs the record loop.
pub fn run_extraction(config: &ExtractConfig) -> Result<ExtractionStats> {
    let input = config.input.to_string_lossy();
    let mut reader = WikiReader::open(&input)
        .with_context(|| format!("Failed to open dump: {}", config.input.display()))?;

    let mut coordinator = BatchCoordinator::new(config.batch_size).with_retry(config.retry);
    if config.dry_run {
        info!("Dry run: no output will be written");
    } else {
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("Failed to create output directory: {}", config.output_dir.display())
        })?;
        let sink = CsvSink::create(&config.output_dir, config.csv_shards)
            .with_context(|| format!("Failed to create CSV output in {}", config.output_dir.display()))?;
        let id = coordinator.add_sink(Box::new(sink));
        coordinator.route(
            id,
            &[FactKind::PageNode, FactKind::ParagraphNode, FactKind::ParagraphEdge],
            RouteFilter::All,
        );
        let link_filter = match &config.known_titles {
            Some(path) => RouteFilter::KnownEndpoints(Arc::new(TitleSet::load(path)?)),
            None => RouteFilter::All,
        };
        coordinator.route(id, &[FactKind::Link], link_filter);
    }

    let mut aligner = match &config.paragraphs {
        Some(path) => {
            let source = open_source(path)?;
            info!(path = %path.display(), "Aligning paragraphs");
            Some(ParagraphAligner::new(source, config.align))
        }
        None => None,
    };

    let stats = extract_records(&mut reader, &mut coordinator, aligner.as_mut(), &config.options)?;

    if let Some(aligner) = aligner.as_mut() {
        if !aligner.is_exhausted().map_err(align_source_error)? {
            warn!(
                consumed = aligner.consumed(),
                "Paragraph corpus not fully consumed; it may not be sorted like the dump"
            );
        }
    }
    Ok(stats)
}

/// Drives `reader` to the end (or the page limit), pushing every fact into
/// `coordinator`, then finishes all sinks.
///
/// Recoverable mapping errors and integrity errors are logged and counted;
/// everything else stops the run.
pub fn extract_records<R: BufRead>(
    reader: &mut WikiReader<R>,
    coordinator: &mut BatchCoordinator,
    mut aligner: Option<&mut DynAligner>,
    options: &ExtractOptions,
) -> Result<ExtractionStats, PipelineError> {
    let stats = ExtractionStats::new();
    let mut ctx = ParserContext::new();
    let mut progress = ProgressMonitor::new(options.progress_interval);
    if options.spinner {
        progress = progress.with_spinner();
    }
    let mut pages = 0u64;

    while let Some(record) = reader.next_record()? {
        stats.inc_records();
        progress.on_record();
        let index = stats.records();

        let page = match map_record(&record, &mut ctx) {
            Ok(Some(page)) => page,
            Ok(None) => continue,
            Err(source) if source.is_fatal() => {
                return Err(PipelineError::Mapping { index, source });
            }
            Err(e) => {
                warn!(record = index, error = %e, "Skipping record");
                stats.inc_skipped();
                continue;
            }
        };

        emit_page(&page, coordinator, &stats)?;

        if let (Some(aligner), PageKind::Content { text, .. }) = (aligner.as_deref_mut(), &page.kind) {
            if page.location.namespace.is_none() {
                let namespaces = ctx.namespaces().ok_or_else(|| PipelineError::Mapping {
                    index,
                    source: MapError::NoSiteinfo(page.title().to_string()),
                })?;
                match aligner.align_page(page.title(), text, namespaces) {
                    Ok(AlignOutcome::Skipped) => {}
                    Ok(AlignOutcome::Aligned(alignment)) => {
                        stats.add_paragraphs_aligned(alignment.nodes.len() as u64);
                        stats.add_paragraphs_unmatched(alignment.unmatched as u64);
                        stats.add_paragraph_edges(alignment.edges.len() as u64);
                        coordinator.push_all(alignment.nodes.into_iter().map(Fact::ParagraphNode))?;
                        coordinator.push_all(alignment.edges.into_iter().map(Fact::ParagraphEdge))?;
                    }
                    Err(AlignError::Integrity(e)) => {
                        error!(error = %e, "Paragraph integrity error");
                        stats.inc_integrity_errors();
                    }
                    Err(e) => return Err(align_source_error(e)),
                }
            }
        }

        pages += 1;
        if options.limit.is_some_and(|limit| pages >= limit) {
            info!(pages, "Page limit reached");
            break;
        }
    }

    coordinator.finish()?;
    stats.add_links_filtered(coordinator.filtered());
    progress.finish();

    info!(
        records = stats.records(),
        content = stats.content(),
        redirects = stats.redirects(),
        links = stats.links(),
        elapsed_secs = progress.elapsed().as_secs(),
        "Extraction complete"
    );
    Ok(stats)
}

/// Page node and links for content pages; redirects are only counted.
fn emit_page(
    page: &Page,
    coordinator: &mut BatchCoordinator,
    stats: &ExtractionStats,
) -> Result<(), PipelineError> {
    let references = match &page.kind {
        PageKind::Redirect { target } => {
            debug!(title = page.title(), target = %target.title, "Redirect");
            stats.inc_redirects();
            return Ok(());
        }
        PageKind::Content { references, .. } => references,
    };
    stats.inc_content_pages();
    stats.add_references(references.len() as u64);

    let source = page.location.qualified().into_owned();
    coordinator.push(Fact::PageNode(PageNode {
        id: page.id,
        title: source.clone(),
        namespace: page.location.namespace.clone(),
        last_edit: page.last_edit,
    }))?;

    for reference in references {
        coordinator.push(Fact::Link(LinkEdge {
            source_title: source.clone(),
            target_title: reference.target.qualified().into_owned(),
            position: reference.offset,
        }))?;
    }
    stats.add_links_emitted(references.len() as u64);
    Ok(())
}

fn align_source_error(e: AlignError) -> PipelineError {
    match e {
        AlignError::Source(source) => PipelineError::ParagraphSource(source),
        AlignError::Integrity(e) => PipelineError::ParagraphSource(e.into()),
    }
}
