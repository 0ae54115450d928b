// Deterministic embedders for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};

use super::EmbeddingProvider;
use crate::{RagError, Result};

/// Words grouped into the axes of a tiny semantic space
const CONCEPTS: &[&[&str]] = &[
    &["fox", "foxes", "dog", "dogs", "cat", "animal"],
    &["color", "colour", "brown", "red", "blue", "green"],
    &["ran", "run", "runs", "jump", "jumped", "far"],
    &["rust", "cargo", "crate", "compiler"],
];

/// Constant component that keeps every vector away from the origin
const BIAS: f32 = 0.1;

/// Embeds text by counting words from a few concept groups
#[derive(Debug)]
pub(crate) struct ConceptEmbedder {
    model: String,
    pub(crate) calls: AtomicUsize,
}

impl ConceptEmbedder {
    pub(crate) fn new() -> Self {
        Self::with_model("concept-test")
    }

    pub(crate) fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; CONCEPTS.len() + 1];
        vector[0] = BIAS;

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            for (axis, words) in CONCEPTS.iter().enumerate() {
                if words.contains(&word.as_str()) {
                    vector[axis + 1] += 1.0;
                }
            }
        }

        vector
    }
}

impl EmbeddingProvider for ConceptEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Always fails, as an unreachable embedding server would
#[derive(Debug)]
pub(crate) struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn model_id(&self) -> &str {
        "concept-test"
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::Embedding("connection refused".to_string()))
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("connection refused".to_string()))
    }
}
