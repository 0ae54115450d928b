
use anyhow::{Result, bail};
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::debug;

use crate::loader::RawSegment;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph pattern is valid"));
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n").expect("line pattern is valid"));
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?]["')\]]*(?=\s)"#).expect("sentence pattern is valid")
});
static WORD_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("word pattern is valid"));

/// A chunk of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text, an exact substring of its segment
    pub text: String,
    /// File the segment was loaded from
    pub source_path: PathBuf,
    /// Character offset of the chunk within its segment
    pub source_offset: usize,
    /// Page index for paginated sources
    pub page: Option<usize>,
    /// Position of this chunk within its segment
    pub chunk_index: usize,
}

/// A contiguous slice of a larger text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    /// Offset in characters from the start of the source text
    pub offset: usize,
}

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

/// Split every loaded segment into chunks, keeping source metadata
#[inline]
pub fn chunk_segments(segments: &[RawSegment], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();

    for segment in segments {
        if segment.text.trim().is_empty() {
            continue;
        }

        let spans = split_text(&segment.text, config)?;
        chunks.extend(spans.into_iter().enumerate().map(|(i, span)| Chunk {
            text: span.text,
            source_path: segment.source.path.clone(),
            source_offset: span.offset,
            page: segment.source.page,
            chunk_index: i,
        }));
    }

    debug!(
        "Chunked {} segments into {} chunks (avg {} chars)",
        segments.len(),
        chunks.len(),
        chunks.iter().map(|c| c.text.chars().count()).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// Each window ends at the best natural break available in its second half:
/// a paragraph break, then a line break, then a sentence end, then whitespace.
/// Without any of those the window is cut at exactly `chunk_size` characters.
/// The next window starts `chunk_overlap` characters before the previous end,
/// so dropping the first `chunk_overlap` characters of every span but the
/// first and concatenating yields the input unchanged.
#[inline]
#[expect(clippy::string_slice, reason = "slice bounds come from char_indices")]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextSpan>> {
    let size = config.chunk_size;
    let overlap = config.chunk_overlap;

    if size == 0 {
        bail!("chunk_size must be greater than zero");
    }
    if overlap >= size {
        bail!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            overlap,
            size
        );
    }

    // Byte offset of every char boundary, including the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = boundaries.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0;

    while start < total {
        let end = if total - start <= size {
            total
        } else {
            find_break(text, &boundaries, start, size, overlap)
        };

        spans.push(TextSpan {
            text: text[boundaries[start]..boundaries[end]].to_string(),
            offset: start,
        });

        if end == total {
            break;
        }
        start = end - overlap;
    }

    Ok(spans)
}

/// Pick the end (exclusive, in chars) of the window starting at `start`
#[expect(clippy::string_slice, reason = "slice bounds come from char_indices")]
fn find_break(text: &str, boundaries: &[usize], start: usize, size: usize, overlap: usize) -> usize {
    let total = boundaries.len() - 1;
    let window_end = start + size;
    // The next window must start after this one did
    let earliest = (start + overlap + 1).max(start + size / 2);

    // One extra char so lookahead can see the whitespace after a sentence end
    let search_end = (window_end + 1).min(total);
    let base = boundaries[start];
    let haystack = &text[base..boundaries[search_end]];

    for pattern in [&*PARAGRAPH_BREAK, &*LINE_BREAK, &*SENTENCE_END, &*WORD_BREAK] {
        let candidate = pattern
            .find_iter(haystack)
            .filter_map(|m| m.ok())
            .filter_map(|m| boundaries.binary_search(&(base + m.end())).ok())
            .filter(|&end| end >= earliest && end <= window_end)
            .last();

        if let Some(end) = candidate {
            return end;
        }
    }

    window_end
}
