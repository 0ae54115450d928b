// Document loading
// Turns files on disk into raw text segments with source metadata


#[cfg(test)]
pub(crate) mod testing;

pub mod staging;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{RagError, Result};

pub use staging::UploadStaging;

/// Where a raw segment came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    pub path: PathBuf,
    /// Zero-based page index for paginated documents
    pub page: Option<usize>,
}

/// A span of raw document text before chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    pub text: String,
    pub source: SourceMetadata,
}

/// The closed set of document formats the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Whole file is one segment
    PlainText,
    /// One segment per page
    Paginated,
}

impl DocumentKind {
    /// Classify a path by its extension, case-insensitively
    #[inline]
    pub fn classify(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Ok(Self::Paginated),
            Some("txt" | "text" | "md" | "markdown") => Ok(Self::PlainText),
            _ => Err(RagError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Load a document into raw segments. The input file is left untouched.
#[inline]
pub fn load_document(path: &Path) -> Result<Vec<RawSegment>> {
    let kind = DocumentKind::classify(path)?;
    debug!("Loading {} as {:?}", path.display(), kind);

    let segments = match kind {
        DocumentKind::PlainText => load_plain_text(path)?,
        DocumentKind::Paginated => load_pdf(path)?,
    };

    debug!(
        "Loaded {} segments from {}",
        segments.len(),
        path.display()
    );
    Ok(segments)
}

fn load_plain_text(path: &Path) -> Result<Vec<RawSegment>> {
    let bytes = fs::read(path).map_err(|e| load_error(path, e))?;
    let text = String::from_utf8(bytes).map_err(|e| load_error(path, e))?;

    Ok(vec![RawSegment {
        text,
        source: SourceMetadata {
            path: path.to_path_buf(),
            page: None,
        },
    }])
}

fn load_pdf(path: &Path) -> Result<Vec<RawSegment>> {
    let document = lopdf::Document::load(path).map_err(|e| load_error(path, e))?;

    if document.is_encrypted() {
        return Err(load_error(path, "document is encrypted"));
    }

    // Page numbers are 1-based and returned in order
    let pages = document.get_pages();
    let mut segments = Vec::with_capacity(pages.len());

    for (index, page_number) in pages.keys().enumerate() {
        let text = document.extract_text(&[*page_number]).map_err(|e| {
            warn!(
                "Failed to extract page {} of {}: {}",
                page_number,
                path.display(),
                e
            );
            load_error(path, format!("page {}: {}", page_number, e))
        })?;

        segments.push(RawSegment {
            text,
            source: SourceMetadata {
                path: path.to_path_buf(),
                page: Some(index),
            },
        });
    }

    Ok(segments)
}

fn load_error(path: &Path, error: impl std::fmt::Display) -> RagError {
    RagError::Load {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}
