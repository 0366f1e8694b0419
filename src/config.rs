/// Facts buffered per kind before a flush
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// Page lines shorter than this (in characters) are not paragraph candidates
pub const MIN_PARAGRAPH_LEN: usize = 32;

/// Minimum symmetric token-overlap score for a paragraph match
pub const ALIGN_THRESHOLD: f64 = 0.5;

/// Seconds between throughput reports
pub const PROGRESS_INTERVAL_SECS: f64 = 1.0;

/// Attempts per batch before a transient sink failure becomes fatal
pub const SINK_MAX_ATTEMPTS: u32 = 3;

/// Base delay between sink retries; doubled per attempt
pub const SINK_RETRY_BASE_MS: u64 = 50;

/// Upper bound of the random jitter added to each retry delay
pub const SINK_RETRY_JITTER_MS: u64 = 25;

/// Read buffer for the dump (the bzip2 decoder sits underneath it)
pub const INPUT_BUFFER_SIZE: usize = 256 * 1024;

/// Write buffer per CSV output file
pub const CSV_BUFFER_SIZE: usize = 128 * 1024;

/// Number of CSV output shards per fact kind (1 = single file)
pub const DEFAULT_CSV_SHARDS: u32 = 1;

pub const DEFAULT_BOLT_URI: &str = "bolt://localhost:7687";

/// Prefix under which Neo4j sees the output directory for LOAD CSV
pub const DEFAULT_IMPORT_PREFIX: &str = "file:///";

/// Max concurrent LOAD CSV statements per fact kind
pub const IMPORT_MAX_PARALLEL: usize = 4;

pub const IMPORT_MAX_RETRIES: u32 = 30;

pub const IMPORT_RETRY_DELAY_SECS: u64 = 2;
