//! Paragraph alignment between page bodies and the external paragraph corpus.
//!
//! Each content page is split into line paragraphs. The corpus group with the
//! same title is matched against them greedily, in order, by symmetric token
//! overlap. Matched paragraphs become `ParagraphNode`s connected by `Lead`,
//! `Next` and `Reference` edges.

use crate::config::{ALIGN_THRESHOLD, MIN_PARAGRAPH_LEN};
use crate::error::{AlignError, IntegrityError};
use crate::mapper::resolve_references;
use crate::models::{paragraph_id, ParagraphEdge, ParagraphLinkKind, ParagraphNode};
use crate::paragraphs::{same_title, title_key, ExternalParagraph, ParagraphCursor, ParagraphSource};
use crate::references::strip_citations;
use crate::title::NamespaceSet;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::ops::Range;
use tracing::{debug, trace, warn};

static PIPED_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[(?:[^\]|]*\|)?([^\]|]*)\]\]").unwrap());

static EXTERNAL_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[https?://\S+\s*([^\]]*)\]").unwrap());

static HTML_TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").unwrap());

/// Bold/italic quotes, heading markers and leading list markers.
static DECORATION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)'{2,}|={2,}|^[*#:;]+").unwrap());

/// How to choose among candidates above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Accept the first candidate scanning forward.
    #[default]
    First,
    /// Accept the highest-scoring candidate; earliest wins on equal scores.
    Best,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignConfig {
    pub min_paragraph_len: usize,
    /// Candidates must score strictly above this.
    pub threshold: f64,
    pub tie_break: TieBreak,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            min_paragraph_len: MIN_PARAGRAPH_LEN,
            threshold: ALIGN_THRESHOLD,
            tie_break: TieBreak::default(),
        }
    }
}

/// One external paragraph matched to a run of page lines.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphMatch {
    /// Index into the external group.
    pub external: usize,
    /// Page paragraph indices covered by the match.
    pub lines: Range<usize>,
    pub score: f64,
}

/// Facts produced for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alignment {
    pub nodes: Vec<ParagraphNode>,
    pub edges: Vec<ParagraphEdge>,
    /// External paragraphs of the group that found no page text.
    pub unmatched: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlignOutcome {
    /// The corpus is not positioned at this page's title.
    Skipped,
    Aligned(Alignment),
}

/// Splits a page body on `\n`, keeping lines of at least `min_len` characters.
///
/// Falls back to every line when the filter would leave nothing.
pub fn split_paragraphs(text: &str, min_len: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.split('\n').collect();
    let kept: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| line.chars().count() >= min_len)
        .collect();
    if kept.is_empty() {
        lines
    } else {
        kept
    }
}

/// Reduces wiki markup to plain text.
pub fn plain_text(text: &str) -> String {
    let text = strip_citations(text);
    let text = strip_templates(&text);
    let text = PIPED_LINK_REGEX.replace_all(&text, "$1");
    let text = EXTERNAL_LINK_REGEX.replace_all(&text, "$1");
    let text = HTML_TAG_REGEX.replace_all(&text, " ");
    DECORATION_REGEX.replace_all(&text, " ").into_owned()
}

/// Lower-cased word set of `text` with markup and punctuation removed.
pub fn tokenize(text: &str) -> FxHashSet<String> {
    plain_text(text)
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `sqrt(score1 * score2)`: geometric mean of the two overlap fractions.
pub fn overlap_score(external: &FxHashSet<String>, candidate: &FxHashSet<String>) -> f64 {
    if external.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    let (small, large) = if external.len() <= candidate.len() {
        (external, candidate)
    } else {
        (candidate, external)
    };
    let shared = small.iter().filter(|t| large.contains(*t)).count() as f64;
    let score1 = shared / external.len() as f64;
    let score2 = shared / candidate.len() as f64;
    (score1 * score2).sqrt()
}

/// Greedy in-order alignment of `group` against `page_paragraphs`.
pub fn align_group(
    page_paragraphs: &[&str],
    group: &[ExternalParagraph],
    config: &AlignConfig,
) -> Vec<ParagraphMatch> {
    let mut matches = Vec::new();
    let mut cursor = 0;

    for (external, record) in group.iter().enumerate() {
        let span = record.line_breaks() + 1;
        if cursor + span > page_paragraphs.len() {
            trace!(id = %record.id, "No page text left to align against");
            continue;
        }
        let wanted = tokenize(&record.text);

        let mut accepted: Option<ParagraphMatch> = None;
        for start in cursor..=page_paragraphs.len() - span {
            let lines = start..start + span;
            let candidate = tokenize(&page_paragraphs[lines.clone()].join("\n"));
            let score = overlap_score(&wanted, &candidate);
            if score <= config.threshold {
                continue;
            }
            let better = accepted.as_ref().map_or(true, |m| score > m.score);
            if better {
                accepted = Some(ParagraphMatch {
                    external,
                    lines,
                    score,
                });
            }
            if config.tie_break == TieBreak::First {
                break;
            }
        }

        if let Some(m) = accepted {
            cursor = m.lines.end;
            matches.push(m);
        }
    }
    matches
}

/// Builds paragraph nodes and edges from matches.
///
/// The first aligned paragraph leads every other one; later paragraphs are
/// chained with `Next`. Links in the matched page text point at the first
/// paragraph of the linked article. `Reference` edges form a set per source
/// paragraph: a target linked twice yields one edge, and links into other
/// namespaces yield none, since the corpus only holds article paragraphs.
pub fn emit_alignment(
    page_title: &str,
    page_paragraphs: &[&str],
    group: &[ExternalParagraph],
    matches: &[ParagraphMatch],
    namespaces: &NamespaceSet,
) -> Alignment {
    let mut alignment = Alignment {
        unmatched: group.len() - matches.len(),
        ..Alignment::default()
    };
    let aligned: Vec<&ExternalParagraph> = matches.iter().map(|m| &group[m.external]).collect();

    for record in &aligned {
        alignment.nodes.push(ParagraphNode {
            id: record.id.clone(),
            title: page_title.to_string(),
            text: record.text.clone(),
            embedding: record.embedding.clone(),
        });
    }

    if let Some((lead, rest)) = aligned.split_first() {
        for other in rest {
            alignment.edges.push(edge(&lead.id, &other.id, ParagraphLinkKind::Lead));
        }
    }
    // 0 -> 1 is already a Lead edge.
    for pair in aligned.windows(2).skip(1) {
        alignment.edges.push(edge(&pair[0].id, &pair[1].id, ParagraphLinkKind::Next));
    }

    for (m, record) in matches.iter().zip(&aligned) {
        let text = page_paragraphs[m.lines.clone()].join("\n");
        let mut seen = FxHashSet::default();
        for reference in resolve_references(namespaces, &text) {
            if reference.target.namespace.is_some() {
                continue;
            }
            let target = paragraph_id(&reference.target.title, 0);
            if seen.insert(target.clone()) {
                alignment.edges.push(ParagraphEdge {
                    source_id: record.id.clone(),
                    target_id: target,
                    kind: ParagraphLinkKind::Reference,
                });
            }
        }
    }

    alignment
}

fn edge(source: &str, target: &str, kind: ParagraphLinkKind) -> ParagraphEdge {
    ParagraphEdge {
        source_id: source.to_string(),
        target_id: target.to_string(),
        kind,
    }
}

/// Owns the corpus cursor and aligns pages as they stream past.
pub struct ParagraphAligner<S> {
    cursor: ParagraphCursor<S>,
    config: AlignConfig,
    /// Corpus title already reported as having no page in the dump.
    stalled_on: Option<String>,
}

impl<S: ParagraphSource> ParagraphAligner<S> {
    pub fn new(source: S, config: AlignConfig) -> Self {
        Self {
            cursor: ParagraphCursor::new(source),
            config,
            stalled_on: None,
        }
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Aligns one content page.
    ///
    /// The page is skipped unless the corpus is positioned at its title. On
    /// `IntegrityError` the group has already been consumed.
    pub fn align_page(
        &mut self,
        page_title: &str,
        text: &str,
        namespaces: &NamespaceSet,
    ) -> Result<AlignOutcome, AlignError> {
        let Some(corpus_title) = self.cursor.current_title().map_err(AlignError::Source)? else {
            return Ok(AlignOutcome::Skipped);
        };
        if !same_title(corpus_title, page_title) {
            let corpus_key = title_key(corpus_title);
            let behind = corpus_key < title_key(page_title);
            if behind && self.stalled_on.as_ref() != Some(&corpus_key) {
                warn!(
                    corpus_title = %corpus_key,
                    page_title,
                    "Paragraph corpus is behind the dump; pages are skipped until this title appears"
                );
                self.stalled_on = Some(corpus_key);
            }
            return Ok(AlignOutcome::Skipped);
        }

        let group = self.cursor.take_group(page_title).map_err(AlignError::Source)?;
        let page_paragraphs = split_paragraphs(text, self.config.min_paragraph_len);
        if page_paragraphs.len() < group.len() {
            return Err(IntegrityError {
                title: page_title.to_string(),
                page_paragraphs: page_paragraphs.len(),
                external_paragraphs: group.len(),
            }
            .into());
        }

        let matches = align_group(&page_paragraphs, &group, &self.config);
        debug!(
            title = page_title,
            group = group.len(),
            aligned = matches.len(),
            "Aligned paragraphs"
        );
        Ok(AlignOutcome::Aligned(emit_alignment(
            page_title,
            &page_paragraphs,
            &group,
            &matches,
            namespaces,
        )))
    }

    /// Whether the corpus has been fully consumed.
    pub fn is_exhausted(&mut self) -> Result<bool, AlignError> {
        self.cursor.is_exhausted().map_err(AlignError::Source)
    }

    pub fn consumed(&self) -> u64 {
        self.cursor.consumed()
    }

    /// Corpus title the aligner last found stuck behind the dump, if any.
    pub fn stalled_on(&self) -> Option<&str> {
        self.stalled_on.as_deref()
    }
}

/// Removes `{{...}}` templates, including nested ones. An unterminated
/// template swallows the rest of the text.
fn strip_templates(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut run_start = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
            result.push_str(&text[run_start..i]);
            let mut depth = 0u32;
            while i < bytes.len() {
                if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
                    depth += 1;
                    i += 2;
                } else if i + 1 < bytes.len() && bytes[i] == b'}' && bytes[i + 1] == b'}' {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            run_start = i;
        } else {
            i += 1;
        }
    }

    if run_start < bytes.len() {
        result.push_str(&text[run_start..]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paragraphs::VecParagraphSource;

    fn ext(id: &str, title: &str, text: &str) -> ExternalParagraph {
        ExternalParagraph {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            embedding: vec![0.1, 0.2],
        }
    }

    fn namespaces() -> NamespaceSet {
        NamespaceSet::from_declarations([(0, ""), (14, "Category")])
    }

    fn aligner(records: Vec<ExternalParagraph>) -> ParagraphAligner<VecParagraphSource> {
        ParagraphAligner::new(VecParagraphSource::new(records), AlignConfig::default())
    }

    const BODY: &str = "Rust is a systems programming language focused on memory safety.\n\
                        Gardeners grow tomatoes in warm summer soil with plenty of water.\n\
                        Ocean tides are driven by the gravity of the moon and the sun.";

    #[test]
    fn two_of_three_paragraphs_align_with_one_edge() {
        let mut a = aligner(vec![
            ext("Rust_0", "Rust", "Rust is a systems programming language focused on memory safety."),
            ext("Rust_1", "Rust", "Ocean tides are driven by the gravity of the moon and sun."),
        ]);
        let AlignOutcome::Aligned(alignment) = a.align_page("Rust", BODY, &namespaces()).unwrap()
        else {
            panic!("page should align");
        };

        let ids: Vec<_> = alignment.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["Rust_0", "Rust_1"]);
        assert_eq!(
            alignment.edges,
            vec![ParagraphEdge {
                source_id: "Rust_0".into(),
                target_id: "Rust_1".into(),
                kind: ParagraphLinkKind::Lead,
            }]
        );
        assert_eq!(alignment.unmatched, 0);
        assert!(alignment.nodes.iter().all(|n| !n.text.contains("tomatoes")));
    }

    #[test]
    fn larger_group_than_page_is_an_integrity_error() {
        let body = "A first paragraph that is long enough to count.\n\
                    A second paragraph that is long enough to count.";
        let mut records: Vec<_> = (0..5)
            .map(|i| ext(&format!("Short_{i}"), "Short", "text"))
            .collect();
        records.push(ext("Next_0", "Next", "A first paragraph that is long enough to count."));
        let mut a = aligner(records);

        match a.align_page("Short", body, &namespaces()) {
            Err(AlignError::Integrity(e)) => {
                assert_eq!(e.page_paragraphs, 2);
                assert_eq!(e.external_paragraphs, 5);
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
        assert_eq!(a.consumed(), 5);
        assert!(matches!(
            a.align_page("Next", body, &namespaces()).unwrap(),
            AlignOutcome::Aligned(_)
        ));
    }

    #[test]
    fn page_not_at_cursor_is_skipped() {
        let mut a = aligner(vec![ext("Zeta_0", "Zeta", "zeta")]);
        assert_eq!(
            a.align_page("Alpha", BODY, &namespaces()).unwrap(),
            AlignOutcome::Skipped
        );
        assert_eq!(a.consumed(), 0);
        assert!(!a.is_exhausted().unwrap());
    }

    #[test]
    fn corpus_title_missing_from_dump_is_reported_as_stalled() {
        let mut a = aligner(vec![ext("Beta_0", "Beta", "beta")]);
        assert_eq!(
            a.align_page("Alpha", BODY, &namespaces()).unwrap(),
            AlignOutcome::Skipped
        );
        assert_eq!(a.stalled_on(), None);

        for title in ["Gamma", "Delta"] {
            assert_eq!(
                a.align_page(title, BODY, &namespaces()).unwrap(),
                AlignOutcome::Skipped
            );
        }
        assert_eq!(a.stalled_on(), Some("Beta"));
        assert_eq!(a.consumed(), 0);
    }

    #[test]
    fn exhausted_corpus_skips_everything() {
        let mut a = aligner(Vec::new());
        assert_eq!(
            a.align_page("Rust", BODY, &namespaces()).unwrap(),
            AlignOutcome::Skipped
        );
        assert!(a.is_exhausted().unwrap());
    }

    #[test]
    fn chain_of_three_has_lead_and_next_edges() {
        let body = "Alpha beta gamma delta epsilon zeta eta theta.\n\
                    Iota kappa lambda mu nu xi omicron pi rho sigma.\n\
                    Tau upsilon phi chi psi omega and the end of it.";
        let mut a = aligner(vec![
            ext("G_0", "Greek", "Alpha beta gamma delta epsilon zeta eta theta."),
            ext("G_1", "Greek", "Iota kappa lambda mu nu xi omicron pi rho sigma."),
            ext("G_2", "Greek", "Tau upsilon phi chi psi omega and the end of it."),
        ]);
        let AlignOutcome::Aligned(alignment) = a.align_page("Greek", body, &namespaces()).unwrap()
        else {
            panic!("page should align");
        };
        let kinds: Vec<_> = alignment
            .edges
            .iter()
            .map(|e| (e.source_id.as_str(), e.target_id.as_str(), e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("G_0", "G_1", ParagraphLinkKind::Lead),
                ("G_0", "G_2", ParagraphLinkKind::Lead),
                ("G_1", "G_2", ParagraphLinkKind::Next),
            ]
        );
    }

    #[test]
    fn references_point_at_first_paragraph_of_target() {
        let body = "Rust was influenced by [[OCaml]] and [[Haskell (language)|Haskell]] [[OCaml]].\n\
                    See also [[Category:Languages]] for more programming languages here.";
        let mut a = aligner(vec![ext(
            "Rust_0",
            "Rust",
            "Rust was influenced by OCaml and Haskell OCaml.",
        )]);
        let AlignOutcome::Aligned(alignment) = a.align_page("Rust", body, &namespaces()).unwrap()
        else {
            panic!("page should align");
        };
        let targets: Vec<_> = alignment
            .edges
            .iter()
            .filter(|e| e.kind == ParagraphLinkKind::Reference)
            .map(|e| e.target_id.as_str())
            .collect();
        assert_eq!(targets, vec!["OCaml_0", "Haskell_(language)_0"]);
    }

    #[test]
    fn reference_edges_are_a_set_of_article_targets() {
        let page = ["Uses [[LLVM]], [[LLVM|the LLVM backend]] and [[Category:Compilers]]."];
        let group = [ext("Rust_0", "Rust", "Uses LLVM and the LLVM backend.")];
        let matches = [ParagraphMatch {
            external: 0,
            lines: 0..1,
            score: 1.0,
        }];
        let alignment = emit_alignment("Rust", &page, &group, &matches, &namespaces());
        assert_eq!(
            alignment.edges,
            vec![edge("Rust_0", "LLVM_0", ParagraphLinkKind::Reference)]
        );
    }

    #[test]
    fn multi_line_paragraph_spans_page_lines() {
        let body = "A short note on geology that does not match anything.\n\
                    First half of a paragraph about volcanic eruptions.\n\
                    Second half describing lava flows and magma chambers.\n\
                    Closing line that will not match anything at all here.";
        let group = vec![ext(
            "V_0",
            "Volcano",
            "First half of a paragraph about volcanic eruptions.\n\
             Second half describing lava flows and magma chambers.",
        )];
        let config = AlignConfig {
            threshold: 0.8,
            ..AlignConfig::default()
        };
        let paragraphs = split_paragraphs(body, MIN_PARAGRAPH_LEN);
        let matches = align_group(&paragraphs, &group, &config);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].lines, 1..3);
        assert!(matches[0].score > 0.9);
    }

    #[test]
    fn low_overlap_stays_unmatched() {
        let group = vec![ext("X_0", "X", "completely unrelated words about nothing")];
        let paragraphs = split_paragraphs(BODY, MIN_PARAGRAPH_LEN);
        let matches = align_group(&paragraphs, &group, &AlignConfig::default());
        assert!(matches.is_empty());
        let alignment = emit_alignment("X", &paragraphs, &group, &matches, &namespaces());
        assert_eq!(alignment.unmatched, 1);
        assert!(alignment.nodes.is_empty());
        assert!(alignment.edges.is_empty());
    }

    #[test]
    fn best_tie_break_prefers_higher_score() {
        let paragraphs = vec!["red green blue yellow", "red green blue"];
        let group = vec![ext("C_0", "C", "red green blue")];
        let first = AlignConfig {
            tie_break: TieBreak::First,
            ..AlignConfig::default()
        };
        let best = AlignConfig {
            tie_break: TieBreak::Best,
            ..AlignConfig::default()
        };
        assert_eq!(align_group(&paragraphs, &group, &first)[0].lines, 0..1);
        assert_eq!(align_group(&paragraphs, &group, &best)[0].lines, 1..2);
    }

    #[test]
    fn short_lines_fall_back_to_unfiltered_split() {
        assert_eq!(split_paragraphs("a\nb", 10), vec!["a", "b"]);
        let long = "this line is certainly long enough";
        let text = format!("short\n{long}");
        assert_eq!(split_paragraphs(&text, 10), vec![long]);
    }

    #[test]
    fn tokenizer_strips_markup() {
        let tokens = tokenize(
            "'''Bold''' [[Target|display text]] {{cite|{{nested}}x}} <b>tag</b> \
             [https://example.org label]<ref>[[Hidden]]</ref>, end.",
        );
        let mut words: Vec<_> = tokens.into_iter().collect();
        words.sort();
        assert_eq!(
            words,
            vec!["bold", "display", "end", "label", "tag", "text"]
        );
    }

    #[test]
    fn score_is_symmetric_geometric_mean() {
        let a = tokenize("one two three four");
        let b = tokenize("one two");
        let expected = (1.0f64 * 0.5).sqrt();
        assert!((overlap_score(&a, &b) - expected).abs() < 1e-9);
        assert!((overlap_score(&b, &a) - expected).abs() < 1e-9);
        assert_eq!(overlap_score(&a, &FxHashSet::default()), 0.0);
    }

    #[test]
    fn templates_strip_nested_and_unterminated() {
        assert_eq!(strip_templates("a {{x|{{y}}}} b"), "a  b");
        assert_eq!(strip_templates("a {{open"), "a ");
        assert_eq!(strip_templates("no templates"), "no templates");
    }
}
