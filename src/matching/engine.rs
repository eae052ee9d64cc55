//! Similarity matching.
//!
//! Scores every input row against every unique target row by cosine
//! similarity, keeps the best target (lowest index on ties) and classifies
//! the result against an inclusive threshold.

use std::collections::HashSet;

use serde::Serialize;

use crate::embeddings::scheduler::EmbeddingMatrix;
use crate::error::{Error, Result};

/// Classification of a single input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Match,
    NoMatch,
}

impl MatchStatus {
    /// Classify a score; `score == threshold` is a match.
    #[must_use]
    pub fn classify(score: f32, threshold: f32) -> Self {
        if score < threshold {
            Self::NoMatch
        } else {
            Self::Match
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Match => write!(f, "Match"),
            Self::NoMatch => write!(f, "NO MATCH"),
        }
    }
}

/// Best target for one input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub input_index: usize,
    /// Index into the original (non-deduplicated) target list.
    pub best_target_index: Option<usize>,
    pub similarity_score: f32,
    pub status: MatchStatus,
}

/// Targets de-duplicated by label, first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    labels: Vec<String>,
    original_indices: Vec<usize>,
}

impl TargetSet {
    #[must_use]
    pub fn dedup<S: AsRef<str>>(targets: &[S]) -> Self {
        let mut seen: HashSet<&str> = HashSet::with_capacity(targets.len());
        let mut set = Self::default();
        for (index, target) in targets.iter().enumerate() {
            let label = target.as_ref();
            if seen.insert(label) {
                set.labels.push(label.to_string());
                set.original_indices.push(index);
            }
        }
        set
    }

    /// Unique labels in first-seen order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Original index of the `unique`-th label.
    #[must_use]
    pub fn original_index(&self, unique: usize) -> Option<usize> {
        self.original_indices.get(unique).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Cosine similarity; 0 when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Match every input row against the unique target rows.
///
/// `targets` must be index-aligned with `target_set.labels()`. Results come
/// back ordered by input index with target indices in the original space.
pub fn match_embeddings(
    inputs: &EmbeddingMatrix,
    targets: &EmbeddingMatrix,
    target_set: &TargetSet,
    threshold: f32,
) -> Result<Vec<MatchResult>> {
    if targets.len() != target_set.len() {
        return Err(Error::InvalidArgument(format!(
            "{} target embeddings for {} unique targets",
            targets.len(),
            target_set.len()
        )));
    }
    if !inputs.is_empty() && !targets.is_empty() && inputs.dimensions() != targets.dimensions() {
        return Err(Error::DimensionMismatch {
            expected: targets.dimensions(),
            actual: inputs.dimensions(),
            row: 0,
        });
    }

    let results = inputs
        .rows()
        .iter()
        .enumerate()
        .map(|(input_index, row)| {
            let mut best: Option<(usize, f32)> = None;

            for (unique, target) in targets.rows().iter().enumerate() {
                let score = cosine_similarity(row, target);
                // Strict comparison keeps the lowest index on ties
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((unique, score));
                }
            }

            match best {
                Some((unique, score)) => MatchResult {
                    input_index,
                    best_target_index: target_set.original_index(unique),
                    similarity_score: score,
                    status: MatchStatus::classify(score, threshold),
                },
                None => MatchResult {
                    input_index,
                    best_target_index: None,
                    similarity_score: 0.0,
                    status: MatchStatus::NoMatch,
                },
            }
        })
        .collect();

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: Vec<Vec<f32>>) -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(rows).unwrap()
    }

    /// Unit vector at angle whose cosine with [1, 0] is `cos`.
    fn at_cosine(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_best_match_and_threshold() {
        // apple-ish input scores 0.9 against "apple", 0.2 against "banana"
        let targets = TargetSet::dedup(&["apple", "banana"]);
        let target_rows = matrix(vec![vec![1.0, 0.0], at_cosine(0.2)]);

        let inputs = matrix(vec![at_cosine(0.9)]);
        let results = match_embeddings(&inputs, &target_rows, &targets, 0.85).unwrap();
        assert_eq!(results[0].best_target_index, Some(0));
        assert!((results[0].similarity_score - 0.9).abs() < 1e-5);
        assert_eq!(results[0].status, MatchStatus::Match);

        let results = match_embeddings(&inputs, &target_rows, &targets, 0.95).unwrap();
        assert_eq!(results[0].status, MatchStatus::NoMatch);
        assert_eq!(results[0].best_target_index, Some(0));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(MatchStatus::classify(0.5, 0.5), MatchStatus::Match);
        assert_eq!(MatchStatus::classify(0.499_99, 0.5), MatchStatus::NoMatch);
        assert_eq!(MatchStatus::classify(0.0, 0.0), MatchStatus::Match);
    }

    #[test]
    fn test_ties_pick_lowest_index() {
        let targets = TargetSet::dedup(&["a", "b", "c"]);
        let target_rows = matrix(vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]]);
        let inputs = matrix(vec![vec![1.0, 0.0]]);
        let results = match_embeddings(&inputs, &target_rows, &targets, 0.5).unwrap();
        assert_eq!(results[0].best_target_index, Some(1));
    }

    #[test]
    fn test_dedup_reports_first_occurrence() {
        let targets = TargetSet::dedup(&["x", "x", "y"]);
        assert_eq!(targets.labels(), ["x", "y"]);
        assert_eq!(targets.original_index(0), Some(0));
        assert_eq!(targets.original_index(1), Some(2));

        let target_rows = matrix(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let inputs = matrix(vec![vec![0.1, 1.0], vec![1.0, 0.1]]);
        let results = match_embeddings(&inputs, &target_rows, &targets, 0.0).unwrap();
        assert_eq!(results[0].best_target_index, Some(2));
        assert_eq!(results[1].best_target_index, Some(0));
    }

    #[test]
    fn test_results_ordered_by_input_with_unequal_counts() {
        let targets = TargetSet::dedup(&["only"]);
        let target_rows = matrix(vec![vec![1.0, 0.0]]);
        let inputs = matrix(vec![vec![1.0, 0.0]; 4]);
        let results = match_embeddings(&inputs, &target_rows, &targets, 0.5).unwrap();
        let order: Vec<usize> = results.iter().map(|r| r.input_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_empty_targets_yield_no_match() {
        let targets = TargetSet::dedup::<&str>(&[]);
        let inputs = matrix(vec![vec![1.0, 0.0]; 2]);
        let results =
            match_embeddings(&inputs, &EmbeddingMatrix::default(), &targets, 0.5).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == MatchStatus::NoMatch
            && r.best_target_index.is_none()
            && r.similarity_score == 0.0));
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let targets = TargetSet::dedup(&["t"]);
        let err = match_embeddings(
            &matrix(vec![vec![1.0, 0.0, 0.0]]),
            &matrix(vec![vec![1.0, 0.0]]),
            &targets,
            0.5,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3, .. }));
    }
}
