//! In-memory vector index with cosine similarity search.
//!
//! Stores message embeddings keyed by `(chat_id, message_id)` and answers
//! per-chat nearest-neighbour queries.

use std::collections::HashMap;

use crate::messages::MessageKey;

/// In-memory vector index for semantic search.
pub struct VectorIndex {
    entries: HashMap<MessageKey, Vec<f32>>,
    /// Expected embedding dimensions
    dimensions: usize,
}

/// Search result from the vector index.
#[derive(Debug, Clone)]
pub struct ScoredKey {
    pub key: MessageKey,
    /// Cosine similarity score
    pub score: f32,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: MessageKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Insert or update an entry in the index.
    ///
    /// Returns an error if the embedding has zero norm (cannot be compared).
    pub fn insert(&mut self, key: MessageKey, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = Self::l2_norm(&embedding);
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(key, embedding);
        Ok(())
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (MessageKey, &Vec<f32>)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Search for similar vectors within one chat using cosine similarity.
    ///
    /// Results are sorted by similarity score (highest first) and filtered
    /// by `threshold`.
    pub fn search(
        &self,
        query: &[f32],
        chat_id: i64,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredKey>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = Self::l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<ScoredKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.chat_id == chat_id)
            .filter_map(|(key, embedding)| {
                let score = Self::cosine_similarity(query, embedding, query_norm);
                if score >= threshold {
                    Some(ScoredKey { key: *key, score })
                } else {
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        Ok(results)
    }

    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Assumes query_norm is precomputed for efficiency.
    fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON {
            return 0.0;
        }

        let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        dot_product / (query_norm * target_norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(chat_id: i64, message_id: i32) -> MessageKey {
        MessageKey {
            chat_id,
            message_id,
        }
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_insert_and_contains() {
        let mut index = VectorIndex::new(3);
        index.insert(key(1, 1), vec![1.0, 0.0, 0.0]).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.contains(key(1, 1)));
        assert!(!index.contains(key(1, 2)));
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        let result = index.insert(key(1, 1), vec![1.0, 0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_insert_zero_norm_rejected() {
        let mut index = VectorIndex::new(3);
        let result = index.insert(key(1, 1), vec![0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let mut index = VectorIndex::new(3);
        index.insert(key(7, 1), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(key(7, 2), vec![0.0, 1.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], 7, 0.0, 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, key(7, 1));
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_search_restricted_to_chat() {
        let mut index = VectorIndex::new(3);
        index.insert(key(7, 1), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(key(8, 1), vec![1.0, 0.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 7, 0.0, 10).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key.chat_id, 7);
    }

    #[test]
    fn test_search_with_threshold() {
        let mut index = VectorIndex::new(3);
        index.insert(key(7, 1), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(key(7, 2), vec![0.0, 1.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 7, 0.9, 10).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, key(7, 1));
        assert!((results[0].score - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_search_with_limit() {
        let mut index = VectorIndex::new(3);
        for i in 0..10 {
            index
                .insert(key(7, i), vec![1.0, i as f32 * 0.1, 0.0])
                .unwrap();
        }

        let results = index.search(&[1.0, 0.0, 0.0], 7, 0.0, 3).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_search_zero_norm_query() {
        let mut index = VectorIndex::new(3);
        index.insert(key(7, 1), vec![1.0, 0.0, 0.0]).unwrap();

        let result = index.search(&[0.0, 0.0, 0.0], 7, 0.0, 10);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }
}
