//! Threat source ingestion: uploaded documents and scraped web pages.
//!
//! Ingestion is all-or-nothing. A document that cannot be serialized leaves
//! the session's threat sources exactly as they were.
mod document;
mod scrape;

pub use document::{serialize, Document, PageExtractor, PdfToText};
pub use scrape::{Scraper, DEFAULT_TIMEOUT};

use crate::detection::{SourceKind, ThreatSource};
use crate::error::IngestError;
use crate::state::keys::{ScrapedThreatSource, ThreatSources};
use crate::state::SessionState;

/// Serialize an uploaded document and append it to the threat sources.
pub fn add_upload(
    state: &mut SessionState,
    document: &Document,
    pages: &dyn PageExtractor,
) -> Result<(), IngestError> {
    let content = serialize(document, pages)?;
    tracing::info!(name = %document.name, chars = content.len(), "threat source uploaded");
    state.append(
        ThreatSources,
        ThreatSource {
            kind: SourceKind::Upload,
            identifier: document.name.clone(),
            content,
        },
    );
    Ok(())
}

/// Hold a scraped page for review until it is submitted.
pub fn stage_scrape(state: &mut SessionState, url: &str, markdown: String) {
    tracing::info!(url, chars = markdown.len(), "scraped page staged");
    state.set(
        ScrapedThreatSource,
        ThreatSource {
            kind: SourceKind::Scrape,
            identifier: url.to_string(),
            content: markdown,
        },
    );
}

/// Move the staged scrape into the threat sources. Returns the URL, or
/// `None` when nothing was staged.
pub fn submit_scrape(state: &mut SessionState) -> Option<String> {
    let source = state.delete(ScrapedThreatSource)?;
    let url = source.identifier.clone();
    state.append(ThreatSources, source);
    Some(url)
}

/// Drop one threat source by position.
pub fn remove_source(state: &mut SessionState, index: usize) -> Option<ThreatSource> {
    state.remove_at(ThreatSources, index)
}
