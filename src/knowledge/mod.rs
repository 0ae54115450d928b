// Knowledge base
// Load -> chunk -> embed -> index for ingestion, embed -> search for retrieval


use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{IndexManifest, SearchHit, VectorStore};
use crate::embeddings::{Chunk, ChunkingConfig, EmbeddingProvider, chunk_segments};
use crate::loader::load_document;
use crate::{RagError, Result};

/// A file that could not be ingested, and why
#[derive(Debug)]
pub struct IngestionFailure {
    pub path: PathBuf,
    pub error: RagError,
}

/// Outcome of one `add_documents` call
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub chunks_added: usize,
    pub files_ingested: usize,
    pub failures: Vec<IngestionFailure>,
}

/// The searchable collection of document chunks under one persistence root.
///
/// Construct one per root and pass it by reference; it reopens whatever an
/// earlier process persisted there.
pub struct KnowledgeBase {
    store: VectorStore,
    chunking: ChunkingConfig,
    top_k: usize,
}

impl KnowledgeBase {
    #[inline]
    pub async fn open(
        persist_dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
        top_k: usize,
    ) -> Result<Self> {
        let store = VectorStore::open(persist_dir, embedder).await?;
        Ok(Self {
            store,
            chunking,
            top_k,
        })
    }

    /// Open the knowledge base at the configured vector path
    #[inline]
    pub async fn from_config(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open(
            config.vector_database_path(),
            embedder,
            config.chunking.clone(),
            config.retrieval.top_k,
        )
        .await
    }

    /// Default number of chunks returned by a query
    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    #[inline]
    pub fn persist_dir(&self) -> &Path {
        self.store.persist_dir()
    }

    #[inline]
    pub fn manifest(&self) -> Option<&IndexManifest> {
        self.store.manifest()
    }

    /// Ingest documents into the index.
    ///
    /// Files with an unsupported format or unreadable content are recorded in
    /// the report and skipped. All chunks from the remaining files go to the
    /// index in one batch; embedding or index failures abort the call.
    #[inline]
    pub async fn add_documents<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<IngestionReport> {
        let mut report = IngestionReport::default();
        let mut chunks: Vec<Chunk> = Vec::new();

        for path in paths {
            let path = path.as_ref();

            let segments = match load_document(path) {
                Ok(segments) => segments,
                Err(e) if e.is_per_file() => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.failures.push(IngestionFailure {
                        path: path.to_path_buf(),
                        error: e,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let file_chunks = chunk_segments(&segments, &self.chunking)
                .map_err(|e| RagError::Config(format!("Invalid chunking settings: {}", e)))?;
            debug!(
                "{}: {} segments, {} chunks",
                path.display(),
                segments.len(),
                file_chunks.len()
            );

            chunks.extend(file_chunks);
            report.files_ingested += 1;
        }

        self.store.add(&chunks).await?;
        report.chunks_added = chunks.len();

        info!(
            "Ingested {} files ({} chunks), {} failed",
            report.files_ingested,
            report.chunks_added,
            report.failures.len()
        );
        Ok(report)
    }

    /// Text of the `k` chunks most similar to `question`
    #[inline]
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<String>> {
        Ok(self
            .query_with_sources(question, k)
            .await?
            .into_iter()
            .map(|hit| hit.chunk_metadata.text)
            .collect())
    }

    /// Like `query`, keeping source metadata and scores
    #[inline]
    pub async fn query_with_sources(&self, question: &str, k: usize) -> Result<Vec<SearchHit>> {
        if !self.has_knowledge().await {
            debug!("Query on empty knowledge base");
            return Ok(Vec::new());
        }
        self.store.similarity_search(question, k).await
    }

    /// Remove every indexed chunk and the persistence root
    #[inline]
    pub async fn clear_database(&mut self) -> bool {
        let cleared = self.store.destroy().await;
        if cleared {
            info!("Knowledge base cleared");
        } else {
            warn!("Knowledge base could not be fully cleared");
        }
        cleared
    }

    #[inline]
    pub async fn has_knowledge(&self) -> bool {
        self.store.exists().await
    }

    #[inline]
    pub async fn chunk_count(&self) -> Result<usize> {
        self.store.count().await
    }
}
