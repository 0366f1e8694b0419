//! Idempotent Neo4j import of the CSV sink's output over Bolt.
//!
//! Every statement is a `LOAD CSV ... MERGE`, so an interrupted import can be
//! re-run over the same directory. Nodes are loaded before the edges that
//! match on them.

use crate::config::{IMPORT_MAX_RETRIES, IMPORT_RETRY_DELAY_SECS};
use crate::models::FactKind;
use crate::progress::make_spinner;
use crate::sink::csv_file_name;
use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use neo4rs::{query, Graph};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CYPHER_LOAD_PAGES: &str = r#"LOAD CSV WITH HEADERS FROM '{file}' AS row
CALL { WITH row
    MERGE (p:Page {title: row.title})
    SET p.id = toInteger(row.id),
        p.namespace = CASE row.namespace WHEN '' THEN null ELSE row.namespace END,
        p.last_edit = localdatetime(row.last_edit)
} IN TRANSACTIONS OF 10000 ROWS;"#;

const CYPHER_LOAD_LINKS: &str = r#"LOAD CSV WITH HEADERS FROM '{file}' AS row
CALL { WITH row
    MATCH (a:Page {title: row.source_title})
    MATCH (b:Page {title: row.target_title})
    MERGE (a)-[r:LINKS_TO]->(b)
    SET r.position = toInteger(row.position)
} IN TRANSACTIONS OF 10000 ROWS;"#;

const CYPHER_LOAD_PARAGRAPHS: &str = r#"LOAD CSV WITH HEADERS FROM '{file}' AS row
CALL { WITH row
    MERGE (para:Paragraph {id: row.id})
    SET para.title = row.title,
        para.text = row.text,
        para.embedding = [x IN split(row.embedding, ';') WHERE x <> '' | toFloat(x)]
    WITH para, row
    MATCH (page:Page {title: row.title})
    MERGE (page)-[:HAS_PARAGRAPH]->(para)
} IN TRANSACTIONS OF 10000 ROWS;"#;

const CYPHER_LOAD_PARAGRAPH_LINKS: &str = r#"LOAD CSV WITH HEADERS FROM '{file}' AS row
CALL { WITH row
    MATCH (a:Paragraph {id: row.source_id})
    MATCH (b:Paragraph {id: row.target_id})
    FOREACH (_ IN CASE WHEN row.kind = 'LEAD' THEN [1] ELSE [] END | MERGE (a)-[:LEAD]->(b))
    FOREACH (_ IN CASE WHEN row.kind = 'NEXT' THEN [1] ELSE [] END | MERGE (a)-[:NEXT]->(b))
    FOREACH (_ IN CASE WHEN row.kind = 'REFERENCES' THEN [1] ELSE [] END | MERGE (a)-[:REFERENCES]->(b))
} IN TRANSACTIONS OF 10000 ROWS;"#;

const CYPHER_SCHEMA: &[&str] = &[
    "CREATE CONSTRAINT page_title_unique IF NOT EXISTS FOR (p:Page) REQUIRE p.title IS UNIQUE;",
    "CREATE CONSTRAINT paragraph_id_unique IF NOT EXISTS FOR (p:Paragraph) REQUIRE p.id IS UNIQUE;",
    "CREATE INDEX page_id IF NOT EXISTS FOR (p:Page) ON (p.id);",
    "CREATE INDEX paragraph_title IF NOT EXISTS FOR (p:Paragraph) ON (p.title);",
];

/// One fact kind's load: which files, which statement, how to count the result.
struct ImportStep {
    kind: FactKind,
    label: &'static str,
    cypher: &'static str,
    count_query: &'static str,
}

/// Nodes first; edge statements MATCH their endpoints.
const IMPORT_STEPS: [ImportStep; 4] = [
    ImportStep {
        kind: FactKind::PageNode,
        label: "Pages",
        cypher: CYPHER_LOAD_PAGES,
        count_query: "MATCH (p:Page) RETURN count(p) AS cnt",
    },
    ImportStep {
        kind: FactKind::ParagraphNode,
        label: "Paragraphs",
        cypher: CYPHER_LOAD_PARAGRAPHS,
        count_query: "MATCH (p:Paragraph) RETURN count(p) AS cnt",
    },
    ImportStep {
        kind: FactKind::Link,
        label: "Links",
        cypher: CYPHER_LOAD_LINKS,
        count_query: "MATCH ()-[r:LINKS_TO]->() RETURN count(r) AS cnt",
    },
    ImportStep {
        kind: FactKind::ParagraphEdge,
        label: "Para links",
        cypher: CYPHER_LOAD_PARAGRAPH_LINKS,
        count_query: "MATCH (:Paragraph)-[r:LEAD|NEXT|REFERENCES]->(:Paragraph) RETURN count(r) AS cnt",
    },
];

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub output_dir: PathBuf,
    pub bolt_uri: String,
    /// URI under which Neo4j sees `output_dir`.
    pub import_prefix: String,
    /// Concurrent LOAD CSV statements per fact kind.
    pub max_parallel: usize,
}

pub async fn run_import(config: ImportConfig) -> Result<()> {
    let start = Instant::now();

    let shards = detect_shards(&config.output_dir)?;
    check_files(&config.output_dir, shards)?;
    println!();
    if shards == 1 {
        println!("==> Found single-file CSV output");
    } else {
        println!("==> Found CSV output in {shards} shards");
    }

    println!();
    println!("==> Connecting to Neo4j at {} ...", config.bolt_uri);
    let graph = connect(&config.bolt_uri).await?;
    println!("    Connected.");

    let mp = MultiProgress::new();
    let pb = mp.add(make_spinner("Creating constraints and indexes ..."));
    for cypher in CYPHER_SCHEMA {
        run_cypher(&graph, cypher).await?;
    }
    pb.finish_with_message("Constraints and indexes created.");

    let mut counts = Vec::with_capacity(IMPORT_STEPS.len());
    for step in &IMPORT_STEPS {
        println!();
        println!("==> Loading {} ...", step.label.to_lowercase());
        let files = files_for(step.kind, shards);
        let pb = mp.add(make_progress_bar(files.len() as u64, step.label));
        load_files(&graph, step, &files, &config, &pb).await?;
        let count = query_count(&graph, step.count_query).await?;
        println!("    {}: {count}", step.label);
        counts.push((step.label, count));
    }

    println!();
    println!("============================================");
    println!("  SUCCESS: Import complete!");
    println!("============================================");
    println!();
    println!("Total time:         {:.2}s", start.elapsed().as_secs_f64());
    for (label, count) in counts {
        println!("{:<20}{count}", format!("{label}:"));
    }
    println!();
    println!("Available at:");
    println!("  Bolt:   {}", config.bolt_uri);

    Ok(())
}

/// Number of page shards in `dir`: 1 for `pages.csv`, N for `pages_000..N`.
fn detect_shards(dir: &Path) -> Result<u32> {
    let stem = FactKind::PageNode.file_stem();
    if dir.join(format!("{stem}.csv")).exists() {
        return Ok(1);
    }
    let mut count = 0u32;
    while dir.join(format!("{stem}_{count:03}.csv")).exists() {
        count += 1;
    }
    if count == 0 {
        bail!(
            "No CSV files found in {}. Expected {stem}.csv or {stem}_000.csv.\n\
             Run 'wikigraph extract' first.",
            dir.display()
        );
    }
    Ok(count)
}

fn files_for(kind: FactKind, shards: u32) -> Vec<String> {
    (0..shards).map(|s| csv_file_name(kind, s, shards)).collect()
}

/// Every kind must have the same shard layout as the pages.
fn check_files(dir: &Path, shards: u32) -> Result<()> {
    let missing: Vec<String> = FactKind::ALL
        .iter()
        .flat_map(|&kind| files_for(kind, shards))
        .filter(|file| !dir.join(file).exists())
        .collect();
    if !missing.is_empty() {
        bail!(
            "Missing CSV files in {}: {}\nRun 'wikigraph extract' first.",
            dir.display(),
            missing.join(", ")
        );
    }
    Ok(())
}

/// Connects and verifies the session, retrying while the server starts up.
async fn connect(bolt_uri: &str) -> Result<Graph> {
    let delay = Duration::from_secs(IMPORT_RETRY_DELAY_SECS);
    let mut attempt = 1;
    loop {
        let result = match Graph::new(bolt_uri, "", "") {
            Ok(graph) => match graph.run(query("RETURN 1;")).await {
                Ok(()) => Ok(graph),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(graph) => return Ok(graph),
            Err(e) if attempt < IMPORT_MAX_RETRIES => {
                info!(attempt, error = %e, "Neo4j not reachable yet, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Cannot connect to Neo4j at {bolt_uri} after {attempt} attempts")
                });
            }
        }
    }
}

async fn run_cypher(graph: &Graph, cypher: &str) -> Result<()> {
    graph
        .run(query(cypher))
        .await
        .with_context(|| format!("Failed to execute: {cypher}"))
}

async fn query_count(graph: &Graph, cypher: &str) -> Result<i64> {
    let mut result = graph
        .execute(query(cypher))
        .await
        .with_context(|| format!("Failed to execute count query: {cypher}"))?;
    match result.next().await? {
        Some(row) => row.get("cnt").context("Missing 'cnt' field in result"),
        None => Ok(0),
    }
}

/// `template` with `{file}` replaced by the file's URI under `import_prefix`.
fn load_statement(template: &str, import_prefix: &str, file: &str) -> String {
    let separator = if import_prefix.ends_with('/') { "" } else { "/" };
    template.replace("{file}", &format!("{import_prefix}{separator}{file}"))
}

/// Runs one LOAD CSV per file, at most `max_parallel` at a time. Every file
/// is attempted; the step fails if any of them did.
async fn load_files(
    graph: &Graph,
    step: &ImportStep,
    files: &[String],
    config: &ImportConfig,
    pb: &ProgressBar,
) -> Result<()> {
    let results: Vec<(&String, Result<()>)> = stream::iter(files)
        .map(|file| {
            let cypher = load_statement(step.cypher, &config.import_prefix, file);
            async move {
                debug!(file = %file, "LOAD CSV");
                let result = run_cypher(graph, &cypher).await;
                pb.inc(1);
                (file, result)
            }
        })
        .buffer_unordered(config.max_parallel.max(1))
        .collect()
        .await;

    let mut failed = 0usize;
    for (file, result) in &results {
        if let Err(e) = result {
            failed += 1;
            warn!(file = %file, error = %format!("{e:#}"), "LOAD CSV failed");
            eprintln!("    FAILED: {file}: {e:#}");
        }
    }
    pb.finish_with_message(format!(
        "{}: {} loaded, {failed} failed",
        step.label,
        results.len() - failed
    ));

    if failed > 0 {
        bail!("{failed} of {} {} loads failed", files.len(), step.label.to_lowercase());
    }
    Ok(())
}

fn make_progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "    {{spinner:.cyan}} {label:<12} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} files"
            ))
            .unwrap()
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
