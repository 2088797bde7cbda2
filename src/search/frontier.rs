//! Frontier selection: which children of the cursor to pursue next.

use std::collections::HashSet;

use crate::error::{SearchError, SearchResult};
use crate::tree::{Strategy, Thought, ThoughtStatus, ThoughtTree};

/// The non-failed children of one thought, ranked by descending score.
///
/// Ranking is a stable sort, so equal scores keep generation order.
#[derive(Debug)]
pub struct Frontier<'a> {
    parent_id: &'a str,
    ranked: Vec<&'a Thought>,
}

impl<'a> Frontier<'a> {
    /// Frontier below an arbitrary thought.
    pub fn below(tree: &'a ThoughtTree, parent_id: &'a str) -> SearchResult<Self> {
        let candidates = tree
            .thoughts
            .children_of(parent_id)?
            .into_iter()
            .filter(|t| t.status != ThoughtStatus::Failed)
            .collect();
        Ok(Self::from_candidates(parent_id, candidates))
    }

    /// Rank an explicit candidate list, given in generation order.
    pub fn from_candidates(parent_id: &'a str, mut candidates: Vec<&'a Thought>) -> Self {
        candidates.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        Self {
            parent_id,
            ranked: candidates,
        }
    }

    /// Whether there is nothing to select.
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// Number of viable candidates.
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// Candidates from best to worst.
    pub fn ranked(&self) -> &[&'a Thought] {
        &self.ranked
    }

    /// Choose the thoughts to pursue.
    ///
    /// Returns a non-empty list, best first, or `NoViableCandidates` when the
    /// frontier is empty.
    pub fn select(
        &self,
        strategy: Strategy,
        beam_width: usize,
        diversity_threshold: f64,
    ) -> SearchResult<Vec<&'a Thought>> {
        if self.ranked.is_empty() {
            return Err(SearchError::NoViableCandidates {
                thought_id: self.parent_id.to_string(),
            });
        }
        let beam_width = beam_width.max(1);

        let selected = match strategy {
            Strategy::Greedy => self.ranked[..1].to_vec(),
            // Sampling is deterministic: it takes the same top slice as beam.
            Strategy::Beam | Strategy::Sampling => self.top(beam_width),
            Strategy::Diverse => self.diverse(beam_width, diversity_threshold),
        };
        Ok(selected)
    }

    fn top(&self, n: usize) -> Vec<&'a Thought> {
        self.ranked.iter().take(n).copied().collect()
    }

    fn diverse(&self, beam_width: usize, threshold: f64) -> Vec<&'a Thought> {
        let max_similarity = 1.0 - threshold;
        let mut kept: Vec<&'a Thought> = Vec::with_capacity(beam_width);

        for candidate in &self.ranked {
            if kept.len() >= beam_width {
                break;
            }
            let distinct = kept
                .iter()
                .all(|k| jaccard(&candidate.content, &k.content) <= max_similarity);
            if distinct {
                kept.push(candidate);
            }
        }

        // Backfill with the best remaining candidates.
        for candidate in &self.ranked {
            if kept.len() >= beam_width {
                break;
            }
            if !kept.iter().any(|k| k.id == candidate.id) {
                kept.push(candidate);
            }
        }

        // Backfilled thoughts may be out of score order.
        kept.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        kept
    }
}

/// Jaccard similarity of the lowercased whitespace-separated word sets.
///
/// Two texts without any words have similarity 0.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.split_whitespace().map(str::to_lowercase).collect()
    };
    let (a, b) = (words(a), words(b));

    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}
