//! Parallel conversion of paragraph files into graph-import CSVs.
//!
//! Every input file yields a paragraph node file and a paragraph→page edge
//! file of the same name; titles seen across all files are deduplicated into
//! `nodes/title.csv`.

use crate::config::CSV_BUFFER_SIZE;
use crate::paragraphs::{format_embedding, open_source, ParagraphSource};
use anyhow::{bail, Context, Result};
use csv::Writer;
use dashmap::DashSet;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

pub const PARAGRAPH_NODE_DIR: &str = "nodes/paragraph";
pub const PARAGRAPH_EDGE_DIR: &str = "edges/paragraph_pages";
pub const TITLE_FILE: &str = "nodes/title.csv";

#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Worker threads; 0 lets rayon decide.
    pub threads: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConvertSummary {
    pub files: usize,
    pub paragraphs: u64,
    pub titles: usize,
}

/// Paragraph files (`.csv`, `.jsonl`, `.ndjson`) in `dir`, sorted by name.
pub fn input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if path.is_file() && matches!(ext, "csv" | "jsonl" | "ndjson") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn run_convert(config: &ConvertConfig) -> Result<ConvertSummary> {
    let files = input_files(&config.input_dir)?;
    if files.is_empty() {
        bail!(
            "No paragraph files found in {}",
            config.input_dir.display()
        );
    }

    let node_dir = config.output_dir.join(PARAGRAPH_NODE_DIR);
    let edge_dir = config.output_dir.join(PARAGRAPH_EDGE_DIR);
    fs::create_dir_all(&node_dir)
        .with_context(|| format!("Failed to create {}", node_dir.display()))?;
    fs::create_dir_all(&edge_dir)
        .with_context(|| format!("Failed to create {}", edge_dir.display()))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .thread_name(|i| format!("wikigraph-convert-{i}"))
        .build()
        .context("Failed to build conversion thread pool")?;

    let titles: DashSet<String> = DashSet::new();
    let paragraphs = AtomicU64::new(0);
    let pb = make_progress_bar(files.len() as u64);

    let results: Vec<Result<()>> = pool.install(|| {
        files
            .par_iter()
            .map(|input| -> Result<()> {
                let name = output_name(input)?;
                let count = convert_file(input, &node_dir.join(&name), &edge_dir.join(&name), &titles)
                    .with_context(|| format!("Failed to convert {}", input.display()))?;
                paragraphs.fetch_add(count, Ordering::Relaxed);
                pb.inc(1);
                Ok(())
            })
            .collect()
    });
    pb.finish_and_clear();

    let failed: Vec<_> = results.into_iter().filter_map(Result::err).collect();
    for e in &failed {
        warn!("Conversion failed: {e:#}");
    }
    if let Some(first) = failed.into_iter().next() {
        return Err(first);
    }

    let title_count = write_titles(&config.output_dir.join(TITLE_FILE), titles)?;
    let summary = ConvertSummary {
        files: files.len(),
        paragraphs: paragraphs.into_inner(),
        titles: title_count,
    };
    info!(
        files = summary.files,
        paragraphs = summary.paragraphs,
        titles = summary.titles,
        "Paragraph conversion complete"
    );
    Ok(summary)
}

fn output_name(input: &Path) -> Result<String> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Unusable file name: {}", input.display()))?;
    Ok(format!("{stem}.csv"))
}

fn csv_writer(path: &Path) -> Result<Writer<BufWriter<File>>> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(Writer::from_writer(BufWriter::with_capacity(CSV_BUFFER_SIZE, file)))
}

/// Converts one file; returns the number of paragraphs written.
fn convert_file(
    input: &Path,
    node_path: &Path,
    edge_path: &Path,
    titles: &DashSet<String>,
) -> Result<u64> {
    let mut source = open_source(input)?;
    let mut nodes = csv_writer(node_path)?;
    let mut edges = csv_writer(edge_path)?;
    nodes.write_record(["id:ID", "text", "embedding:float[]"])?;
    edges.write_record(["id:START_ID", "title:END_ID"])?;

    let mut count = 0u64;
    while let Some(paragraph) = source.next_paragraph()? {
        let title = paragraph.title.replace(' ', "_");
        nodes.write_record([
            paragraph.id.as_str(),
            paragraph.text.as_str(),
            format_embedding(&paragraph.embedding).as_str(),
        ])?;
        edges.write_record([paragraph.id.as_str(), title.as_str()])?;
        if !titles.contains(&title) {
            titles.insert(title);
        }
        count += 1;
    }
    nodes.flush()?;
    edges.flush()?;
    Ok(count)
}

fn write_titles(path: &Path, titles: DashSet<String>) -> Result<usize> {
    let mut sorted: Vec<String> = titles.into_iter().collect();
    sorted.sort_unstable();
    let mut writer = csv_writer(path)?;
    writer.write_record(["title:ID"])?;
    for title in &sorted {
        writer.write_record([title])?;
    }
    writer.flush()?;
    Ok(sorted.len())
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} Converting [{bar:30.cyan/blue}] {pos}/{len} files")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
