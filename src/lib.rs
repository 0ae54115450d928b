use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported document format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error(
        "Embedding configuration mismatch: index was built with '{indexed}', current provider is '{current}'"
    )]
    EmbeddingMismatch { indexed: String, current: String },

    #[error("Index I/O error: {0}")]
    IndexIo(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Errors that only affect a single input file during ingestion
    #[inline]
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::UnsupportedFormat(_) | Self::Load { .. })
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod knowledge;
pub mod loader;
pub mod session;
