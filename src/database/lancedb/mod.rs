// LanceDB vector database module
// Handles vector storage and similarity search for embeddings


pub mod vector_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::embeddings::Chunk;
use crate::{RagError, Result};

const MANIFEST_FILE: &str = "manifest.json";

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Unique identifier for this embedding
    pub id: String,
    pub vector: Vec<f32>,
    /// Metadata about the chunk this embedding represents
    pub metadata: ChunkMetadata,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// The actual text content of the chunk
    pub text: String,
    /// File the chunk was ingested from
    pub source_path: String,
    /// Character offset of the chunk within its segment
    pub source_offset: u32,
    /// Page index for paginated sources
    pub page: Option<u32>,
    /// Index of this chunk within its segment (for ordering)
    pub chunk_index: u32,
    /// Timestamp when this embedding was created
    pub created_at: String,
}

impl EmbeddingRecord {
    /// Pair a chunk with its vector under a fresh id
    #[inline]
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>, created_at: &str) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            vector,
            metadata: ChunkMetadata {
                text: chunk.text.clone(),
                source_path: chunk.source_path.to_string_lossy().into_owned(),
                source_offset: to_u32(chunk.source_offset, "source offset")?,
                page: chunk.page.map(|p| to_u32(p, "page index")).transpose()?,
                chunk_index: to_u32(chunk.chunk_index, "chunk index")?,
                created_at: created_at.to_string(),
            },
        })
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RagError::IndexIo(format!("{} {} does not fit the index schema", what, value)))
}

/// Fingerprint of the embedding configuration that built an index.
///
/// Stored as `manifest.json` beside the LanceDB tables. Vectors from different
/// models (or of different length) are not comparable, so every insert and
/// search is checked against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    #[inline]
    pub fn new(embedding_model: &str, dimension: usize) -> Self {
        Self {
            embedding_model: embedding_model.to_string(),
            dimension,
            created_at: Utc::now(),
        }
    }

    /// Read the manifest from an index directory, if one was written
    #[inline]
    pub fn load(index_dir: &Path) -> Result<Option<Self>> {
        let path = index_dir.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RagError::IndexIo(format!(
                    "Failed to read index manifest: {}",
                    e
                )));
            }
        };

        let manifest = serde_json::from_str(&content)
            .map_err(|e| RagError::IndexIo(format!("Index manifest is corrupt: {}", e)))?;
        Ok(Some(manifest))
    }

    #[inline]
    pub fn save(&self, index_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RagError::IndexIo(format!("Failed to serialize manifest: {}", e)))?;
        fs::write(index_dir.join(MANIFEST_FILE), content)
            .map_err(|e| RagError::IndexIo(format!("Failed to write index manifest: {}", e)))?;

        debug!(
            "Wrote index manifest for {} ({} dimensions)",
            self.embedding_model, self.dimension
        );
        Ok(())
    }

    /// Fail unless vectors from `model_id` belong in this index
    #[inline]
    pub fn check_model(&self, model_id: &str) -> Result<()> {
        if self.embedding_model == model_id {
            Ok(())
        } else {
            Err(RagError::EmbeddingMismatch {
                indexed: self.embedding_model.clone(),
                current: model_id.to_string(),
            })
        }
    }

    /// Fail unless a vector of `dimension` matches the indexed ones
    #[inline]
    pub fn check_dimension(&self, dimension: usize) -> Result<()> {
        if self.dimension == dimension {
            Ok(())
        } else {
            Err(RagError::EmbeddingMismatch {
                indexed: format!("{} ({} dimensions)", self.embedding_model, self.dimension),
                current: format!("{} dimensions", dimension),
            })
        }
    }
}
