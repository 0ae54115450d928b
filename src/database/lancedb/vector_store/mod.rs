
use super::{ChunkMetadata, EmbeddingRecord, IndexManifest};
use crate::embeddings::{Chunk, EmbeddingProvider};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TABLE_NAME: &str = "chunks";
const DESTROY_ATTEMPTS: u32 = 3;
const DESTROY_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Persistent vector index over document chunks.
///
/// Starts absent when its directory does not exist; the first `add` creates
/// the directory, the LanceDB table and the index manifest.
pub struct VectorStore {
    persist_dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    connection: Option<Connection>,
    table: Option<Table>,
    manifest: Option<IndexManifest>,
    remove_dir: fn(&Path) -> io::Result<()>,
}

/// Search result from vector similarity search
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_metadata: ChunkMetadata,
    pub similarity_score: f32,
    pub distance: f32,
}

impl VectorStore {
    /// Open the index stored under `persist_dir`, if any
    #[inline]
    pub async fn open(
        persist_dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let mut store = Self {
            persist_dir: persist_dir.into(),
            embedder,
            connection: None,
            table: None,
            manifest: None,
            remove_dir: remove_index_dir,
        };

        if store.persist_dir.exists() {
            store.load_existing().await?;
        } else {
            debug!(
                "No vector index at {}, starting empty",
                store.persist_dir.display()
            );
        }

        Ok(store)
    }

    /// Replace how the index directory is removed by `destroy`
    #[cfg(test)]
    pub(crate) fn with_dir_remover(mut self, remove_dir: fn(&Path) -> io::Result<()>) -> Self {
        self.remove_dir = remove_dir;
        self
    }

    #[inline]
    pub fn persist_dir(&self) -> &Path {
        &self.persist_dir
    }

    /// Fingerprint of the embedding configuration that built this index
    #[inline]
    pub fn manifest(&self) -> Option<&IndexManifest> {
        self.manifest.as_ref()
    }

    async fn load_existing(&mut self) -> Result<()> {
        debug!("Loading vector index from {}", self.persist_dir.display());

        self.manifest = IndexManifest::load(&self.persist_dir)?;
        let connection = connect(&self.persist_dir).await?;

        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::IndexIo(format!("Failed to list tables: {}", e)))?;

        if table_names.iter().any(|name| name == TABLE_NAME) {
            let table = connection
                .open_table(TABLE_NAME)
                .execute()
                .await
                .map_err(|e| {
                    RagError::IndexIo(format!("Failed to open existing table: {}", e))
                })?;

            if self.manifest.is_none() {
                warn!("Vector index has no manifest, embedding model cannot be verified");
            }
            self.table = Some(table);
            info!("Loaded vector index from {}", self.persist_dir.display());
        }

        self.connection = Some(connection);
        Ok(())
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: i32) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim,
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("source_path", DataType::Utf8, false),
            Field::new("source_offset", DataType::UInt32, false),
            Field::new("page", DataType::UInt32, true),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    /// Embed chunks and append them to the index.
    ///
    /// The whole batch is embedded before anything is written, so an
    /// embedding failure leaves the index untouched.
    #[inline]
    pub async fn add(&mut self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            debug!("No chunks to store");
            return Ok(());
        }

        let model_id = self.embedder.model_id().to_string();
        if let Some(manifest) = &self.manifest {
            manifest.check_model(&model_id)?;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, received {}",
                chunks.len(),
                vectors.len()
            )));
        }
        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
            return Err(RagError::Embedding(
                "Embedding provider returned vectors of inconsistent length".to_string(),
            ));
        }
        if let Some(manifest) = &self.manifest {
            manifest.check_dimension(dimension)?;
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector, &created_at))
            .collect::<Result<Vec<_>>>()?;

        self.store_embeddings_batch(&records, dimension).await?;

        if self.manifest.is_none() {
            let manifest = IndexManifest::new(&model_id, dimension);
            manifest.save(&self.persist_dir)?;
            self.manifest = Some(manifest);
        }

        info!("Successfully stored {} embeddings", records.len());
        Ok(())
    }

    async fn store_embeddings_batch(
        &mut self,
        records: &[EmbeddingRecord],
        dimension: usize,
    ) -> Result<()> {
        debug!("Storing batch of {} embeddings", records.len());

        let record_batch = Self::create_record_batch(records, dimension)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        if let Some(table) = &self.table {
            table
                .add(reader)
                .execute()
                .await
                .map_err(|e| RagError::IndexIo(format!("Failed to insert embeddings: {}", e)))?;
            return Ok(());
        }

        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                std::fs::create_dir_all(&self.persist_dir).map_err(|e| {
                    RagError::IndexIo(format!("Failed to create vector index directory: {}", e))
                })?;
                connect(&self.persist_dir).await?
            }
        };

        info!(
            "Creating vector table with {} dimensions at {}",
            dimension,
            self.persist_dir.display()
        );
        let created = connection.create_table(TABLE_NAME, reader).execute().await;
        self.connection = Some(connection);

        self.table = Some(
            created.map_err(|e| RagError::IndexIo(format!("Failed to create table: {}", e)))?,
        );
        Ok(())
    }

    /// Create a RecordBatch from embedding records
    fn create_record_batch(records: &[EmbeddingRecord], dimension: usize) -> Result<RecordBatch> {
        let len = records.len();
        let vector_dim = i32::try_from(dimension)
            .map_err(|_| RagError::IndexIo(format!("Vector dimension {} is too large", dimension)))?;

        let mut ids = Vec::with_capacity(len);
        let mut texts = Vec::with_capacity(len);
        let mut source_paths = Vec::with_capacity(len);
        let mut source_offsets = Vec::with_capacity(len);
        let mut pages = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * dimension);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            texts.push(record.metadata.text.as_str());
            source_paths.push(record.metadata.source_path.as_str());
            source_offsets.push(record.metadata.source_offset);
            pages.push(record.metadata.page);
            chunk_indices.push(record.metadata.chunk_index);
            created_ats.push(record.metadata.created_at.as_str());
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim, Arc::new(values_array), None).map_err(
                |e| RagError::IndexIo(format!("Failed to create vector array: {}", e)),
            )?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(source_paths)),
            Arc::new(UInt32Array::from(source_offsets)),
            Arc::new(UInt32Array::from(pages)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| RagError::IndexIo(format!("Failed to create record batch: {}", e)))
    }

    /// Find the `k` chunks closest to `query` by cosine distance.
    ///
    /// An absent index or `k == 0` yields no results rather than an error.
    #[inline]
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let Some(table) = &self.table else {
            debug!("Similarity search on absent index");
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        if let Some(manifest) = &self.manifest {
            manifest.check_model(self.embedder.model_id())?;
        }

        let query_vector = self.embedder.embed(query)?;
        if let Some(manifest) = &self.manifest {
            manifest.check_dimension(query_vector.len())?;
        }

        debug!("Searching for similar vectors with limit: {}", k);

        let results = table
            .vector_search(query_vector)
            .map_err(|e| RagError::IndexIo(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| RagError::IndexIo(format!("Failed to execute search: {}", e)))?;

        let mut hits = Self::parse_search_results_stream(results).await?;
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Parse search results from LanceDB stream into SearchHit structs
    async fn parse_search_results_stream(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::IndexIo(format!("Failed to read result stream: {}", e)))?
        {
            hits.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Parsed {} search results from stream", hits.len());
        Ok(hits)
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
        let texts = string_column(batch, "text")?;
        let source_paths = string_column(batch, "source_path")?;
        let source_offsets = u32_column(batch, "source_offset")?;
        let pages = u32_column(batch, "page")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let created_ats = string_column(batch, "created_at")?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut hits = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let chunk_metadata = ChunkMetadata {
                text: texts.value(row).to_string(),
                source_path: source_paths.value(row).to_string(),
                source_offset: source_offsets.value(row),
                page: (!pages.is_null(row)).then(|| pages.value(row)),
                chunk_index: chunk_indices.value(row),
                created_at: created_ats.value(row).to_string(),
            };

            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            hits.push(SearchHit {
                chunk_metadata,
                // Cosine distance is 1 - cosine similarity
                similarity_score: 1.0 - distance,
                distance,
            });
        }

        Ok(hits)
    }

    /// Number of stored chunks; zero for an absent index
    #[inline]
    pub async fn count(&self) -> Result<usize> {
        let Some(table) = &self.table else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::IndexIo(format!("Failed to count rows: {}", e)))
    }

    /// Whether the index holds at least one chunk
    #[inline]
    pub async fn exists(&self) -> bool {
        match self.count().await {
            Ok(count) => count > 0,
            Err(e) => {
                warn!("Could not inspect vector index: {}", e);
                false
            }
        }
    }

    /// Delete the index and its directory.
    ///
    /// Open handles are released first and removal is retried a few times,
    /// since another handle may briefly keep files locked. If removal still
    /// fails, whatever remains on disk is reopened and `false` is returned.
    #[inline]
    pub async fn destroy(&mut self) -> bool {
        self.table = None;
        self.connection = None;

        for attempt in 1..=DESTROY_ATTEMPTS {
            match (self.remove_dir)(&self.persist_dir) {
                Ok(()) => {
                    self.manifest = None;
                    info!("Removed vector index at {}", self.persist_dir.display());
                    return true;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.manifest = None;
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Failed to remove vector index (attempt {}/{}): {}",
                        attempt, DESTROY_ATTEMPTS, e
                    );
                    if attempt < DESTROY_ATTEMPTS {
                        tokio::time::sleep(DESTROY_RETRY_DELAY * attempt).await;
                    }
                }
            }
        }

        error!(
            "Giving up on removing vector index at {}",
            self.persist_dir.display()
        );
        if self.persist_dir.exists() {
            if let Err(e) = self.load_existing().await {
                error!("Failed to reopen remaining vector index: {}", e);
                self.connection = None;
                self.table = None;
                self.manifest = None;
            }
        } else {
            self.manifest = None;
        }
        false
    }
}

fn remove_index_dir(path: &Path) -> io::Result<()> {
    std::fs::remove_dir_all(path)
}

async fn connect(persist_dir: &Path) -> Result<Connection> {
    let uri = format!("file://{}", persist_dir.display());

    lancedb::connect(&uri)
        .execute()
        .await
        .map_err(|e| RagError::IndexIo(format!("Failed to connect to LanceDB: {}", e)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::IndexIo(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::IndexIo(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::IndexIo(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::IndexIo(format!("Invalid {} column type", name)))
}
