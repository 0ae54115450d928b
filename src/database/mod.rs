// Database module
// LanceDB holds the knowledge base vectors and chunk text

pub mod lancedb;

pub use self::lancedb::{ChunkMetadata, EmbeddingRecord, IndexManifest};
pub use self::lancedb::vector_store::{SearchHit, VectorStore};
