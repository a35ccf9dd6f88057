use common::{error::AppError, storage::types::passage::Passage};

use crate::scoring::{cosine_similarity, l2_norm, sort_by_score_desc};

#[derive(Debug)]
struct IndexEntry {
    vector: Vec<f32>,
    norm: f32,
    passage: Passage,
}

/// Exact nearest-neighbour index over the passages of a single document.
///
/// Immutable once built. Callers share it behind an `Arc`; searching takes `&self` and
/// needs no locking.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimension: Option<usize>,
}

impl VectorIndex {
    pub fn build(entries: Vec<(Vec<f32>, Passage)>) -> Result<Self, AppError> {
        let mut dimension = None;
        let mut indexed = Vec::with_capacity(entries.len());

        for (vector, passage) in entries {
            let expected = *dimension.get_or_insert(vector.len());
            if expected == 0 {
                return Err(AppError::Validation(
                    "cannot index zero-dimensional embeddings".to_string(),
                ));
            }
            if vector.len() != expected {
                return Err(AppError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }

            let norm = l2_norm(&vector);
            indexed.push(IndexEntry {
                vector,
                norm,
                passage,
            });
        }

        Ok(Self {
            entries: indexed,
            dimension,
        })
    }

    /// Top `k` passages by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Passage, f32)>, AppError> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(AppError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                (
                    position,
                    cosine_similarity(query, query_norm, &entry.vector, entry.norm),
                )
            })
            .collect();

        sort_by_score_desc(&mut scored);
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .filter_map(|(position, score)| {
                self.entries
                    .get(position)
                    .map(|entry| (entry.passage.clone(), score))
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.entries.iter().map(|entry| &entry.passage)
    }
}
