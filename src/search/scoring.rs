//! Weighted scoring, pruning and classification of evaluated thoughts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SearchError, SearchResult};
use crate::tree::{ThoughtStatus, ThoughtTree};

/// Verdict reached for one evaluated thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Total of at least 7 with no criterion below 5.
    Promising,
    /// Total of at least 5 with no criterion below 3.
    Uncertain,
    /// Anything weaker.
    Failed,
    /// Failed because it fell below the best-score pruning bound.
    Pruned,
}

impl Classification {
    /// Status a thought takes on after this verdict.
    pub fn status(self) -> ThoughtStatus {
        match self {
            Classification::Promising => ThoughtStatus::Promising,
            Classification::Uncertain => ThoughtStatus::Uncertain,
            Classification::Failed | Classification::Pruned => ThoughtStatus::Failed,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Promising => write!(f, "promising"),
            Classification::Uncertain => write!(f, "uncertain"),
            Classification::Failed => write!(f, "failed"),
            Classification::Pruned => write!(f, "pruned"),
        }
    }
}

/// Weighted mean of `scores`.
///
/// A criterion without a configured weight counts with weight 1.0, so an
/// empty weight map yields the plain arithmetic mean. No scores, or a zero
/// total weight, yields 0.
pub fn weighted_score(scores: &BTreeMap<String, f64>, weights: &BTreeMap<String, f64>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    let (weighted_sum, total_weight) =
        scores
            .iter()
            .fold((0.0, 0.0), |(sum, total), (criterion, score)| {
                let weight = weights.get(criterion).copied().unwrap_or(1.0);
                (sum + score * weight, total + weight)
            });

    if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    }
}

/// Score below which a thought at `depth` is pruned, given the best score seen.
pub fn prune_threshold(best_score_seen: f64, depth: u32) -> f64 {
    best_score_seen * (0.5 + 0.1 * f64::from(depth))
}

/// Whether a thought with `total_score` at `depth` falls below the pruning bound.
///
/// Nothing is pruned until some thought has scored above zero.
pub fn should_prune(total_score: f64, depth: u32, best_score_seen: f64) -> bool {
    best_score_seen > 0.0 && total_score < prune_threshold(best_score_seen, depth)
}

/// Three-tier verdict using the weakest criterion as a floor.
pub fn tier(total_score: f64, min_score: f64) -> Classification {
    if total_score >= 7.0 && min_score >= 5.0 {
        Classification::Promising
    } else if total_score >= 5.0 && min_score >= 3.0 {
        Classification::Uncertain
    } else {
        Classification::Failed
    }
}

/// Record `scores` on a thought and classify it.
///
/// Raises the tree's `best_score_seen` before the pruning test, so a batch of
/// siblings is judged against the best sibling already applied.
pub fn apply_scores(
    tree: &mut ThoughtTree,
    thought_id: &str,
    scores: BTreeMap<String, f64>,
) -> SearchResult<Classification> {
    if let Some((criterion, score)) = scores.iter().find(|(_, s)| !s.is_finite()) {
        return Err(SearchError::invalid(
            "scores",
            format!("score for {} is not a finite number: {}", criterion, score),
        ));
    }
    tree.thoughts.get(thought_id)?;

    let total_score = weighted_score(&scores, &tree.criteria_weights);
    if total_score > tree.best_score_seen {
        tree.best_score_seen = total_score;
    }
    let best = tree.best_score_seen;

    let thought = tree.thoughts.get_mut(thought_id)?;
    thought.scores = scores;
    thought.total_score = total_score;

    let verdict = if should_prune(total_score, thought.depth, best) {
        thought.note("pruned", true);
        thought.note(
            "prune_reason",
            format!(
                "Score {:.2} below threshold {:.2} (best: {:.2})",
                total_score,
                prune_threshold(best, thought.depth),
                best
            ),
        );
        debug!(thought_id = %thought_id, total_score, best, "Thought pruned");
        Classification::Pruned
    } else {
        tier(total_score, thought.min_score())
    };

    thought.transition_to(verdict.status())?;
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Strategy;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn tree_with_children(n: usize) -> (ThoughtTree, Vec<String>) {
        let mut tree = ThoughtTree::new(
            "p",
            vec!["feasibility".to_string(), "risk".to_string()],
            Strategy::Greedy,
            5,
            0.3,
        );
        let root_id = tree.root_id.clone();
        let ids = (0..n)
            .map(|i| {
                tree.thoughts
                    .insert_child(&root_id, format!("child {i}"), "r")
                    .unwrap()
                    .id
                    .clone()
            })
            .collect();
        (tree, ids)
    }

    #[test]
    fn test_weighted_score_unweighted_mean() {
        let s = scores(&[("a", 8.0), ("b", 2.0)]);
        assert_eq!(weighted_score(&s, &BTreeMap::new()), 5.0);
    }

    #[test]
    fn test_weighted_score_with_weights() {
        let s = scores(&[("a", 8.0), ("b", 2.0)]);
        let w = scores(&[("a", 1.0), ("b", 0.5)]);
        assert!((weighted_score(&s, &w) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_missing_weight_counts_as_one() {
        let s = scores(&[("a", 9.0), ("extra", 3.0)]);
        let w = scores(&[("a", 1.0)]);
        assert_eq!(weighted_score(&s, &w), 6.0);
    }

    #[test]
    fn test_weighted_score_edges() {
        assert_eq!(weighted_score(&BTreeMap::new(), &BTreeMap::new()), 0.0);
        let s = scores(&[("a", 9.0)]);
        let w = scores(&[("a", 0.0)]);
        assert_eq!(weighted_score(&s, &w), 0.0);
    }

    #[test]
    fn test_prune_threshold_formula() {
        assert_eq!(prune_threshold(10.0, 0), 5.0);
        assert!((prune_threshold(10.0, 3) - 8.0).abs() < 1e-9);
        assert!(!should_prune(1.0, 0, 0.0));
        assert!(should_prune(4.9, 0, 10.0));
        assert!(!should_prune(5.0, 0, 10.0));
    }

    #[test]
    fn test_tier() {
        assert_eq!(tier(8.0, 8.0), Classification::Promising);
        assert_eq!(tier(7.0, 4.0), Classification::Uncertain);
        assert_eq!(tier(5.5, 2.0), Classification::Failed);
        assert_eq!(tier(4.9, 9.0), Classification::Failed);
    }

    #[test]
    fn test_apply_scores_updates_bound_before_pruning() {
        let (mut tree, ids) = tree_with_children(2);

        let first = apply_scores(&mut tree, &ids[0], scores(&[("feasibility", 8.0), ("risk", 8.0)]))
            .unwrap();
        assert_eq!(first, Classification::Promising);
        assert_eq!(tree.best_score_seen, 8.0);

        let second = apply_scores(&mut tree, &ids[1], scores(&[("feasibility", 9.0), ("risk", 2.0)]))
            .unwrap();
        assert_eq!(second, Classification::Failed);

        let b = tree.thoughts.get(&ids[1]).unwrap();
        assert_eq!(b.status, ThoughtStatus::Failed);
        assert_eq!(b.total_score, 5.5);
        assert!(b.metadata.get("pruned").is_none());
    }

    #[test]
    fn test_apply_scores_prunes_weak_sibling() {
        let (mut tree, ids) = tree_with_children(2);
        apply_scores(&mut tree, &ids[0], scores(&[("feasibility", 10.0), ("risk", 10.0)])).unwrap();

        let verdict = apply_scores(&mut tree, &ids[1], scores(&[("feasibility", 5.0), ("risk", 5.0)]))
            .unwrap();
        assert_eq!(verdict, Classification::Pruned);

        let pruned = tree.thoughts.get(&ids[1]).unwrap();
        assert_eq!(pruned.status, ThoughtStatus::Failed);
        assert_eq!(pruned.metadata.get("pruned"), Some(&serde_json::Value::Bool(true)));
        assert!(pruned.note_str("prune_reason").unwrap().contains("below threshold"));
    }

    #[test]
    fn test_apply_scores_rejects_non_finite() {
        let (mut tree, ids) = tree_with_children(1);
        let err = apply_scores(&mut tree, &ids[0], scores(&[("risk", f64::NAN)])).unwrap_err();
        assert!(matches!(err, SearchError::InvalidArgument { .. }));
        assert_eq!(tree.thoughts.get(&ids[0]).unwrap().status, ThoughtStatus::Pending);
    }

    #[test]
    fn test_best_score_seen_never_decreases() {
        let (mut tree, ids) = tree_with_children(3);
        let mut last = tree.best_score_seen;
        for (id, s) in ids.iter().zip([6.0, 9.0, 2.0]) {
            apply_scores(&mut tree, id, scores(&[("risk", s)])).unwrap();
            assert!(tree.best_score_seen >= last);
            last = tree.best_score_seen;
        }
        assert_eq!(tree.best_score_seen, 9.0);
    }
}
