//! Uploaded threat reports to plain text.
use crate::error::IngestError;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

/// The kinds of document that can be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Markdown,
    /// Page-structured document (PDF); pages are concatenated in order.
    Paged,
}

/// An uploaded file: name, declared content type, raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its content type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content_type = content_type_for(path);
        Ok(Self::new(name, content_type, bytes))
    }

    /// Classify by content type; markdown often arrives as an octet stream
    /// and is recognised by its `.md` name.
    pub fn kind(&self) -> Result<DocumentKind, IngestError> {
        match self.content_type.as_str() {
            "application/pdf" => Ok(DocumentKind::Paged),
            "text/plain" => Ok(DocumentKind::PlainText),
            "text/markdown" => Ok(DocumentKind::Markdown),
            "application/octet-stream" if self.name.ends_with(".md") => Ok(DocumentKind::Markdown),
            other => Err(IngestError::UnsupportedContent {
                name: self.name.clone(),
                content_type: other.to_string(),
            }),
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Splits a page-structured document into per-page text.
pub trait PageExtractor {
    fn pages(&self, document: &Document) -> Result<Vec<String>, IngestError>;
}

/// Extracts PDF pages with the poppler `pdftotext` tool found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct PdfToText;

impl PageExtractor for PdfToText {
    fn pages(&self, document: &Document) -> Result<Vec<String>, IngestError> {
        let fail = |reason: String| IngestError::PageExtraction {
            name: document.name.clone(),
            reason,
        };
        let tool = which::which("pdftotext")
            .map_err(|err| fail(format!("pdftotext not found on PATH: {err}")))?;

        let mut file = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .map_err(|err| fail(format!("create temp file: {err}")))?;
        std::io::Write::write_all(&mut file, &document.bytes)
            .map_err(|err| fail(format!("write temp file: {err}")))?;

        let output = Command::new(tool)
            .args(["-enc", "UTF-8"])
            .arg(file.path())
            .arg("-")
            .output()
            .map_err(|err| fail(format!("run pdftotext: {err}")))?;
        if !output.status.success() {
            return Err(fail(format!(
                "pdftotext exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(split_pages(&text))
    }
}

/// `pdftotext` separates pages with form feeds.
fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\u{c}').map(str::to_string).collect();
    while pages.last().is_some_and(|page| page.trim().is_empty()) {
        pages.pop();
    }
    pages
}

/// Turn a document into text.
pub fn serialize(document: &Document, pages: &dyn PageExtractor) -> Result<String, IngestError> {
    let kind = document.kind()?;
    tracing::debug!(name = %document.name, ?kind, bytes = document.bytes.len(), "serialize document");
    match kind {
        DocumentKind::PlainText | DocumentKind::Markdown => String::from_utf8(document.bytes.clone())
            .map_err(|_| IngestError::InvalidText {
                name: document.name.clone(),
            }),
        DocumentKind::Paged => {
            let mut content = String::new();
            for page in pages.pages(document)? {
                content.push_str(&page);
                if !content.ends_with('\n') {
                    content.push('\n');
                }
            }
            Ok(content)
        }
    }
}
