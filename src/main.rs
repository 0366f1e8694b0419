use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wikigraph::align::{AlignConfig, TieBreak};
use wikigraph::batch::RetryPolicy;
use wikigraph::convert::ConvertConfig;
use wikigraph::extract::{ExtractConfig, ExtractOptions};
use wikigraph::import::ImportConfig;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikigraph")]
#[command(about = "Extract Wikipedia dumps into a page and paragraph link graph")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv); RUST_LOG overrides it
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract pages, links and aligned paragraphs into CSV files
    Extract(ExtractArgs),
    /// Convert paragraph files into paragraph node, edge and title CSVs
    ConvertParagraphs(ConvertArgs),
    /// Import extracted CSV files into Neo4j
    Import(ImportArgs),
}

#[derive(Args)]
struct ExtractArgs {
    /// Path to the Wikipedia dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for generated files
    #[arg(short, long)]
    output: PathBuf,

    /// Title-sorted paragraph corpus (.csv or .jsonl) to align against
    #[arg(long)]
    paragraphs: Option<PathBuf>,

    /// CSV of known titles; links to other pages are dropped
    #[arg(long)]
    known_titles: Option<PathBuf>,

    /// Facts buffered per kind before a flush
    #[arg(long, default_value_t = wikigraph::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Number of CSV output shards per file (1 = single file)
    #[arg(long, default_value_t = wikigraph::config::DEFAULT_CSV_SHARDS)]
    csv_shards: u32,

    /// Minimum length of a page line to count as a paragraph
    #[arg(long, default_value_t = wikigraph::config::MIN_PARAGRAPH_LEN)]
    min_paragraph_len: usize,

    /// Token-overlap score a paragraph match must exceed
    #[arg(long, default_value_t = wikigraph::config::ALIGN_THRESHOLD)]
    align_threshold: f64,

    /// Pick the best-scoring candidate instead of the first one above the threshold
    #[arg(long)]
    best_match: bool,

    /// Limit number of pages to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Dry run - don't write output files
    #[arg(long)]
    dry_run: bool,

    /// Clear existing outputs before starting
    #[arg(long)]
    clean: bool,
}

#[derive(Args)]
struct ConvertArgs {
    /// Directory of paragraph files (.csv, .jsonl)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for converted files
    #[arg(short, long)]
    output: PathBuf,

    /// Worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[derive(Args)]
struct ImportArgs {
    /// Directory containing wikigraph CSV output files
    #[arg(short, long)]
    output: PathBuf,

    /// Neo4j Bolt URI
    #[arg(long, default_value = wikigraph::config::DEFAULT_BOLT_URI)]
    bolt_uri: String,

    /// Import file URI prefix for Neo4j LOAD CSV
    #[arg(long, default_value = wikigraph::config::DEFAULT_IMPORT_PREFIX)]
    import_prefix: String,

    /// Max parallel LOAD CSV jobs per file kind
    #[arg(long, default_value_t = wikigraph::config::IMPORT_MAX_PARALLEL)]
    max_parallel: usize,
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    if args.clean && args.output.exists() {
        info!("Cleaning output directory: {}", args.output.display());
        fs::remove_dir_all(&args.output).with_context(|| {
            format!("Failed to clean output directory: {}", args.output.display())
        })?;
    }

    let config = ExtractConfig {
        paragraphs: args.paragraphs,
        known_titles: args.known_titles,
        batch_size: args.batch_size,
        csv_shards: args.csv_shards.max(1),
        align: AlignConfig {
            min_paragraph_len: args.min_paragraph_len,
            threshold: args.align_threshold,
            tie_break: if args.best_match {
                TieBreak::Best
            } else {
                TieBreak::First
            },
        },
        retry: RetryPolicy::default(),
        options: ExtractOptions {
            limit: args.limit,
            spinner: true,
            ..ExtractOptions::default()
        },
        dry_run: args.dry_run,
        ..ExtractConfig::new(args.input, args.output)
    };

    info!("Starting extraction pass");
    let start = Instant::now();
    let stats = wikigraph::extract::run_extraction(&config)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Extraction time:      {:.2}s", duration.as_secs_f64());
    println!();
    println!("Records processed:    {}", stats.records());
    println!("Content pages:        {}", stats.content());
    println!("Redirects:            {}", stats.redirects());
    println!("Records skipped:      {}", stats.skipped());
    println!("References found:     {}", stats.references());
    println!("Links emitted:        {}", stats.links());
    println!("Links filtered:       {}", stats.filtered());
    if config.paragraphs.is_some() {
        println!("Paragraphs aligned:   {}", stats.aligned());
        println!("Paragraphs unmatched: {}", stats.unmatched());
        println!("Paragraph edges:      {}", stats.paragraph_edges());
        println!("Integrity errors:     {}", stats.integrity_errors());
    }

    Ok(())
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    let config = ConvertConfig {
        input_dir: args.input,
        output_dir: args.output,
        threads: args.threads,
    };
    let start = Instant::now();
    let summary = wikigraph::convert::run_convert(&config)?;

    println!();
    println!("=== Summary ===");
    println!("Conversion time: {:.2}s", start.elapsed().as_secs_f64());
    println!("Files:           {}", summary.files);
    println!("Paragraphs:      {}", summary.paragraphs);
    println!("Titles:          {}", summary.titles);
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<()> {
    let config = ImportConfig {
        output_dir: args.output,
        bolt_uri: args.bolt_uri,
        import_prefix: args.import_prefix,
        max_parallel: args.max_parallel.max(1),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("wikigraph-import-worker")
        .enable_io()
        .enable_time()
        .build()?;
    rt.block_on(wikigraph::import::run_import(config))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::ConvertParagraphs(args) => run_convert(args),
        Commands::Import(args) => run_import(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
