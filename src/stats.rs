use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collected during the extraction process
#[derive(Default, Debug)]
pub struct ExtractionStats {
    pub records_processed: AtomicU64,
    pub content_pages: AtomicU64,
    pub redirects: AtomicU64,
    pub references_found: AtomicU64,
    pub links_emitted: AtomicU64,
    pub links_filtered: AtomicU64,
    pub records_skipped: AtomicU64,
    pub paragraphs_aligned: AtomicU64,
    pub paragraphs_unmatched: AtomicU64,
    pub paragraph_edges: AtomicU64,
    pub integrity_errors: AtomicU64,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_records(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_content_pages(&self) {
        self.content_pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_redirects(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_references(&self, count: u64) {
        self.references_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_links_emitted(&self, count: u64) {
        self.links_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_links_filtered(&self, count: u64) {
        self.links_filtered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_paragraphs_aligned(&self, count: u64) {
        self.paragraphs_aligned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_paragraphs_unmatched(&self, count: u64) {
        self.paragraphs_unmatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_paragraph_edges(&self, count: u64) {
        self.paragraph_edges.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_integrity_errors(&self) {
        self.integrity_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    pub fn content(&self) -> u64 {
        self.content_pages.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects.load(Ordering::Relaxed)
    }

    pub fn references(&self) -> u64 {
        self.references_found.load(Ordering::Relaxed)
    }

    pub fn links(&self) -> u64 {
        self.links_emitted.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.links_filtered.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.records_skipped.load(Ordering::Relaxed)
    }

    pub fn aligned(&self) -> u64 {
        self.paragraphs_aligned.load(Ordering::Relaxed)
    }

    pub fn unmatched(&self) -> u64 {
        self.paragraphs_unmatched.load(Ordering::Relaxed)
    }

    pub fn paragraph_edges(&self) -> u64 {
        self.paragraph_edges.load(Ordering::Relaxed)
    }

    pub fn integrity_errors(&self) -> u64 {
        self.integrity_errors.load(Ordering::Relaxed)
    }
}
