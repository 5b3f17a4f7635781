//! In-process vector side-index: brute-force cosine similarity over cached
//! embeddings.
//!
//! The data model's scale (a single agent's long-term memory, not a
//! multi-tenant corpus) doesn't justify an ANN library; a flat scan over an
//! `f32` matrix is fast enough and keeps the dependency surface aligned with
//! the rest of the engine. Rebuilt wholesale by `rebuild_index`, refreshed
//! per-record by `reindex_memory`.

use memory_palace_core::MemoryId;
use parking_lot::RwLock;

/// One vector-stage hit: the memory id and its cosine similarity to the
/// query embedding, in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub memory_id: MemoryId,
    pub similarity: f32,
}

struct Entry {
    id: MemoryId,
    vector: Vec<f32>,
}

/// Flat, exact-search vector index.
pub struct VectorIndex {
    dim: usize,
    entries: RwLock<Vec<Entry>>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Wipes and rewrites every vector. Used by `rebuild_index`.
    pub fn rebuild(&self, vectors: impl Iterator<Item = (MemoryId, Vec<f32>)>) {
        let fresh: Vec<Entry> = vectors
            .filter(|(_, v)| v.len() == self.dim)
            .map(|(id, vector)| Entry { id, vector })
            .collect();
        *self.entries.write() = fresh;
    }

    /// Inserts or replaces a single vector. Idempotent for identical input.
    pub fn upsert(&self, id: MemoryId, vector: Vec<f32>) {
        if vector.len() != self.dim {
            return;
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| e.id == id) {
            existing.vector = vector;
        } else {
            entries.push(Entry { id, vector });
        }
    }

    pub fn remove(&self, id: MemoryId) {
        self.entries.write().retain(|e| e.id != id);
    }

    /// The stored vector for `id`, if present.
    #[must_use]
    pub fn get(&self, id: MemoryId) -> Option<Vec<f32>> {
        self.entries.read().iter().find(|e| e.id == id).map(|e| e.vector.clone())
    }

    /// Top-`limit` nearest neighbors to `query` by cosine similarity.
    #[must_use]
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<VectorHit> {
        if query.len() != self.dim {
            return Vec::new();
        }
        let entries = self.entries.read();
        let mut scored: Vec<VectorHit> = entries
            .iter()
            .map(|e| VectorHit {
                memory_id: e.id,
                similarity: cosine_similarity(query, &e.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);
        scored
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn search_ranks_nearest_first() {
        let index = VectorIndex::new(2);
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.upsert(near, vec![1.0, 0.0]);
        index.upsert(far, vec![0.0, 1.0]);
        let hits = index.search(&[0.9, 0.1], 2);
        assert_eq!(hits[0].memory_id, near);
        assert_eq!(hits[1].memory_id, far);
    }

    #[test]
    fn upsert_replaces_existing_vector() {
        let index = VectorIndex::new(2);
        let id = Uuid::new_v4();
        index.upsert(id, vec![1.0, 0.0]);
        index.upsert(id, vec![0.0, 1.0]);
        assert_eq!(index.len(), 1);
        let hits = index.search(&[0.0, 1.0], 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimension_vectors_are_rejected() {
        let index = VectorIndex::new(3);
        index.upsert(Uuid::new_v4(), vec![1.0, 0.0]);
        assert!(index.is_empty());
    }
}
