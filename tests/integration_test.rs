//! Integration tests for the wikigraph extraction pipeline.
//!
//! These drive the public API end to end: BZ2-compressed or plain XML in,
//! CSV files out. Sections:
//!
//! - **Parser Tests** -- record streaming from compressed and plain dumps
//! - **Extraction Tests** -- page and link CSVs, redirects, limits, dry runs
//! - **Alignment Tests** -- paragraph nodes and edges against a corpus file
//! - **Filtering Tests** -- known-title link filtering, including titles
//!   produced by `convert-paragraphs`
//! - **Sharding Tests** -- CSV shard distribution
//!
//! All tests share the `sample_xml()` fixture:
//! - siteinfo declaring the File and Category namespaces
//! - 2 articles: "Rust (programming language)", "Python (programming language)"
//! - 1 redirect: "Rust" -> "Rust (programming language)"
//! - 2 namespaced pages: File:Rust logo.svg, Category:Programming languages

use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::{Builder, NamedTempFile, TempDir};
use wikigraph::convert::{run_convert, ConvertConfig, TITLE_FILE};
use wikigraph::extract::{run_extraction, ExtractConfig};
use wikigraph::parser::WikiReader;

/// Helper: write `xml` to a temp file ending in `.xml.bz2`, BZ2-compressed.
fn create_bz2_xml(xml: &str) -> NamedTempFile {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut tmp = Builder::new().suffix(".xml.bz2").tempfile().unwrap();
    tmp.write_all(&compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn create_plain_xml(xml: &str) -> NamedTempFile {
    let mut tmp = Builder::new().suffix(".xml").tempfile().unwrap();
    tmp.write_all(xml.as_bytes()).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn sample_xml() -> &'static str {
    r#"<mediawiki>
        <siteinfo>
            <sitename>Wikipedia</sitename>
            <namespaces>
                <namespace key="0" case="first-letter" />
                <namespace key="6" case="first-letter">File</namespace>
                <namespace key="14" case="first-letter">Category</namespace>
            </namespaces>
        </siteinfo>
        <page>
            <title>Rust (programming language)</title>
            <ns>0</ns>
            <id>1</id>
            <revision>
                <id>100</id>
                <timestamp>2024-01-15T10:30:00Z</timestamp>
                <text>Rust is a systems programming language focused on safety and speed.&lt;ref&gt;[[Ignored citation]]&lt;/ref&gt;
It was developed at [[Mozilla]] and later moved to the [[Rust Foundation]].
See also [[Python (programming language)|Python]] and [[C++#History]].
[[Category:Programming languages]]</text>
            </revision>
        </page>
        <page>
            <title>Python (programming language)</title>
            <ns>0</ns>
            <id>2</id>
            <revision>
                <id>200</id>
                <timestamp>2024-02-20T14:00:00Z</timestamp>
                <text>Python is a high-level language. Related: [[Rust (programming language)]].</text>
            </revision>
        </page>
        <page>
            <title>Rust</title>
            <ns>0</ns>
            <id>3</id>
            <redirect title="Rust (programming language)" />
            <revision>
                <id>300</id>
                <timestamp>2024-01-01T00:00:00Z</timestamp>
                <text>#REDIRECT [[Rust (programming language)]]</text>
            </revision>
        </page>
        <page>
            <title>File:Rust logo.svg</title>
            <ns>6</ns>
            <id>4</id>
            <revision>
                <id>400</id>
                <timestamp>2024-01-01T00:00:00Z</timestamp>
                <text>File description page</text>
            </revision>
        </page>
        <page>
            <title>Category:Programming languages</title>
            <ns>14</ns>
            <id>5</id>
            <revision>
                <id>500</id>
                <timestamp>2024-01-01T00:00:00Z</timestamp>
                <text>Category page</text>
            </revision>
        </page>
    </mediawiki>"#
}

/// Title-sorted corpus holding the first two paragraphs of the Rust article.
fn sample_paragraphs() -> &'static str {
    "id,title,text,embedding\n\
     Rust_(programming_language)_0,Rust (programming language),Rust is a systems programming language focused on safety and speed.,0.5;0.25\n\
     Rust_(programming_language)_1,Rust (programming language),It was developed at Mozilla and later moved to the Rust Foundation.,0.75;1\n"
}

/// Data rows of a CSV file, header excluded.
fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    rdr.records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Parser integration tests
// ---------------------------------------------------------------------------

#[test]
fn parser_reads_all_records_from_bz2() {
    let tmp = create_bz2_xml(sample_xml());
    let reader = WikiReader::open(tmp.path().to_str().unwrap()).unwrap();
    let names: Vec<String> = reader.map(|r| r.unwrap().name).collect();
    assert_eq!(names, vec!["siteinfo", "page", "page", "page", "page", "page"]);
}

#[test]
fn parser_reads_plain_xml() {
    let tmp = create_plain_xml(sample_xml());
    let reader = WikiReader::open(tmp.path().to_str().unwrap()).unwrap();
    assert_eq!(reader.count(), 6);
}

#[test]
fn truncated_dump_fails_extraction() {
    let xml = &sample_xml()[..sample_xml().len() / 2];
    let tmp = create_bz2_xml(xml);
    let out = TempDir::new().unwrap();
    let result = run_extraction(&ExtractConfig::new(tmp.path(), out.path()));
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Extraction tests
// ---------------------------------------------------------------------------

#[test]
fn extraction_writes_pages_and_links() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let out = TempDir::new()?;
    let stats = run_extraction(&ExtractConfig::new(tmp.path(), out.path()))?;

    assert_eq!(stats.records(), 6);
    assert_eq!(stats.content(), 4);
    assert_eq!(stats.redirects(), 1);
    assert_eq!(stats.references(), 6);
    assert_eq!(stats.links(), 6);
    assert_eq!(stats.skipped(), 0);

    let pages = read_rows(&out.path().join("pages.csv"));
    assert_eq!(
        pages,
        vec![
            vec!["Rust (programming language)", "1", "", "2024-01-15T10:30:00"],
            vec!["Python (programming language)", "2", "", "2024-02-20T14:00:00"],
            vec!["File:Rust logo.svg", "4", "File", "2024-01-01T00:00:00"],
            vec!["Category:Programming languages", "5", "Category", "2024-01-01T00:00:00"],
        ]
    );

    let links = read_rows(&out.path().join("links.csv"));
    let pairs: Vec<(&str, &str)> = links.iter().map(|r| (r[0].as_str(), r[1].as_str())).collect();
    assert_eq!(
        pairs,
        vec![
            ("Rust (programming language)", "Mozilla"),
            ("Rust (programming language)", "Rust Foundation"),
            ("Rust (programming language)", "Python (programming language)"),
            ("Rust (programming language)", "C++"),
            ("Rust (programming language)", "Category:Programming languages"),
            ("Python (programming language)", "Rust (programming language)"),
        ]
    );
    assert!(!pairs.iter().any(|(_, target)| *target == "Ignored citation"));
    assert_eq!(links[5][2], "Python is a high-level language. Related: ".len().to_string());

    // Alignment is off without a corpus, but its files are still created.
    assert!(read_rows(&out.path().join("paragraphs.csv")).is_empty());
    assert!(read_rows(&out.path().join("paragraph_links.csv")).is_empty());
    Ok(())
}

#[test]
fn redirects_produce_no_rows() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let out = TempDir::new()?;
    run_extraction(&ExtractConfig::new(tmp.path(), out.path()))?;

    let pages = read_rows(&out.path().join("pages.csv"));
    assert!(!pages.iter().any(|r| r[0] == "Rust"));
    let links = read_rows(&out.path().join("links.csv"));
    assert!(!links.iter().any(|r| r[0] == "Rust"));
    Ok(())
}

#[test]
fn limit_stops_early() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let out = TempDir::new()?;
    let mut config = ExtractConfig::new(tmp.path(), out.path());
    config.options.limit = Some(2);
    let stats = run_extraction(&config)?;

    assert_eq!(stats.content(), 2);
    assert_eq!(read_rows(&out.path().join("pages.csv")).len(), 2);
    Ok(())
}

#[test]
fn dry_run_writes_nothing() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let parent = TempDir::new()?;
    let out = parent.path().join("out");
    let mut config = ExtractConfig::new(tmp.path(), &out);
    config.dry_run = true;
    let stats = run_extraction(&config)?;

    assert_eq!(stats.content(), 4);
    assert_eq!(stats.links(), 6);
    assert!(!out.exists());
    Ok(())
}

#[test]
fn small_batches_produce_identical_output() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let big = TempDir::new()?;
    let small = TempDir::new()?;
    run_extraction(&ExtractConfig::new(tmp.path(), big.path()))?;
    let mut config = ExtractConfig::new(tmp.path(), small.path());
    config.batch_size = 1;
    run_extraction(&config)?;

    for file in ["pages.csv", "links.csv"] {
        assert_eq!(
            fs::read_to_string(big.path().join(file))?,
            fs::read_to_string(small.path().join(file))?,
            "{file} differs"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Alignment tests
// ---------------------------------------------------------------------------

#[test]
fn paragraphs_are_aligned_end_to_end() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let corpus_dir = TempDir::new()?;
    let corpus = corpus_dir.path().join("paragraphs.csv");
    fs::write(&corpus, sample_paragraphs())?;
    let out = TempDir::new()?;

    let mut config = ExtractConfig::new(tmp.path(), out.path());
    config.paragraphs = Some(corpus);
    let stats = run_extraction(&config)?;

    assert_eq!(stats.aligned(), 2);
    assert_eq!(stats.unmatched(), 0);
    assert_eq!(stats.integrity_errors(), 0);

    let nodes = read_rows(&out.path().join("paragraphs.csv"));
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0][0], "Rust_(programming_language)_0");
    assert_eq!(nodes[0][1], "Rust (programming language)");
    assert_eq!(nodes[0][3], "0.50000000;0.25000000");
    assert_eq!(nodes[1][0], "Rust_(programming_language)_1");

    let edges = read_rows(&out.path().join("paragraph_links.csv"));
    let edges: Vec<(&str, &str, &str)> = edges
        .iter()
        .map(|r| (r[0].as_str(), r[1].as_str(), r[2].as_str()))
        .collect();
    assert_eq!(
        edges,
        vec![
            ("Rust_(programming_language)_0", "Rust_(programming_language)_1", "LEAD"),
            ("Rust_(programming_language)_1", "Mozilla_0", "REFERENCES"),
            ("Rust_(programming_language)_1", "Rust_Foundation_0", "REFERENCES"),
        ]
    );
    assert_eq!(stats.paragraph_edges(), 3);
    Ok(())
}

#[test]
fn oversized_paragraph_group_is_an_integrity_error() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let corpus_dir = TempDir::new()?;
    let corpus = corpus_dir.path().join("paragraphs.jsonl");
    let mut lines = String::new();
    for i in 0..3 {
        lines.push_str(&format!(
            "{{\"id\":\"Python_(programming_language)_{i}\",\"title\":\"Python (programming language)\",\"text\":\"p{i}\",\"embedding\":[]}}\n"
        ));
    }
    fs::write(&corpus, lines)?;
    let out = TempDir::new()?;

    let mut config = ExtractConfig::new(tmp.path(), out.path());
    config.paragraphs = Some(corpus);
    let stats = run_extraction(&config)?;

    assert_eq!(stats.integrity_errors(), 1);
    assert_eq!(stats.aligned(), 0);
    assert_eq!(stats.content(), 4);
    Ok(())
}

// ---------------------------------------------------------------------------
// Filtering tests
// ---------------------------------------------------------------------------

#[test]
fn known_titles_filter_links() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let dir = TempDir::new()?;
    let known = dir.path().join("known.csv");
    fs::write(
        &known,
        "title\nRust_(programming_language)\nPython_(programming_language)\n",
    )?;
    let out = TempDir::new()?;

    let mut config = ExtractConfig::new(tmp.path(), out.path());
    config.known_titles = Some(known);
    let stats = run_extraction(&config)?;

    assert_eq!(stats.links(), 6);
    assert_eq!(stats.filtered(), 4);
    let links = read_rows(&out.path().join("links.csv"));
    assert_eq!(links.len(), 2);
    // Page nodes are never filtered.
    assert_eq!(read_rows(&out.path().join("pages.csv")).len(), 4);
    Ok(())
}

#[test]
fn converted_titles_can_drive_the_filter() -> anyhow::Result<()> {
    let paragraphs = TempDir::new()?;
    fs::write(
        paragraphs.path().join("part-000.csv"),
        "id,title,text,embedding\n\
         Rust_(programming_language)_0,Rust (programming language),Rust.,0.5\n\
         Python_(programming_language)_0,Python (programming language),Python.,0.5\n",
    )?;
    let converted = TempDir::new()?;
    let summary = run_convert(&ConvertConfig {
        input_dir: paragraphs.path().to_path_buf(),
        output_dir: converted.path().to_path_buf(),
        threads: 1,
    })?;
    assert_eq!(summary.titles, 2);

    let tmp = create_bz2_xml(sample_xml());
    let out = TempDir::new()?;
    let mut config = ExtractConfig::new(tmp.path(), out.path());
    config.known_titles = Some(converted.path().join(TITLE_FILE));
    run_extraction(&config)?;

    let links = read_rows(&out.path().join("links.csv"));
    let pairs: Vec<(&str, &str)> = links.iter().map(|r| (r[0].as_str(), r[1].as_str())).collect();
    assert_eq!(
        pairs,
        vec![
            ("Rust (programming language)", "Python (programming language)"),
            ("Python (programming language)", "Rust (programming language)"),
        ]
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Sharding tests
// ---------------------------------------------------------------------------

#[test]
fn sharded_output_covers_every_row() -> anyhow::Result<()> {
    let tmp = create_bz2_xml(sample_xml());
    let out = TempDir::new()?;
    let mut config = ExtractConfig::new(tmp.path(), out.path());
    config.csv_shards = 3;
    run_extraction(&config)?;

    assert!(!out.path().join("pages.csv").exists());
    let mut pages = 0;
    let mut links = 0;
    for shard in 0..3 {
        pages += read_rows(&out.path().join(format!("pages_{shard:03}.csv"))).len();
        links += read_rows(&out.path().join(format!("links_{shard:03}.csv"))).len();
    }
    assert_eq!(pages, 4);
    assert_eq!(links, 6);
    Ok(())
}
