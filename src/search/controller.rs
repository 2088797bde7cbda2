//! Search controller - the operations a caller drives a thought tree with.
//!
//! Every operation loads the tree through the [`TreeRepository`], mutates a
//! private copy, and persists it before reporting success. A failed operation
//! therefore never leaves a half-applied tree behind in the cache.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::frontier::Frontier;
use super::scoring::{apply_scores, Classification};
use crate::config::SearchConfig;
use crate::error::{SearchError, SearchResult};
use crate::storage::TreeRepository;
use crate::tree::{Strategy, ThinkingLevel, Thought, ThoughtStatus, ThoughtTree};

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;

// ============================================================================
// Parameters
// ============================================================================

/// Input parameters for creating a tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTreeParams {
    /// The problem statement to explore
    pub problem: String,
    /// Scoring criteria (configured defaults when absent or empty)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Vec<String>>,
    /// Frontier strategy name (greedy when absent or unrecognized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Search depth ceiling (configured default when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<i64>,
}

impl CreateTreeParams {
    /// Create params for a problem
    pub fn new(problem: impl Into<String>) -> Self {
        Self {
            problem: problem.into(),
            ..Default::default()
        }
    }

    /// Set the scoring criteria
    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.criteria = Some(criteria.into_iter().map(Into::into).collect());
        self
    }

    /// Set the strategy name
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Set the depth ceiling
    pub fn with_max_depth(mut self, max_depth: i64) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

/// One caller-generated thought
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtInput {
    /// The step itself
    pub content: String,
    /// Why the step might work
    #[serde(default)]
    pub rationale: String,
}

impl ThoughtInput {
    /// Create a thought input
    pub fn new(content: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            rationale: rationale.into(),
        }
    }
}

/// Input parameters for attaching thoughts under the cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateThoughtsParams {
    /// Target tree
    pub tree_id: String,
    /// Thoughts to attach under the cursor, in order
    #[serde(default)]
    pub thoughts: Vec<ThoughtInput>,
}

impl GenerateThoughtsParams {
    /// Create params with no thoughts
    pub fn new(tree_id: impl Into<String>) -> Self {
        Self {
            tree_id: tree_id.into(),
            thoughts: Vec::new(),
        }
    }

    /// Add a thought
    pub fn with_thought(mut self, content: impl Into<String>, rationale: impl Into<String>) -> Self {
        self.thoughts.push(ThoughtInput::new(content, rationale));
        self
    }
}

/// Caller-supplied scores for one thought
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationInput {
    /// Thought being scored
    pub thought_id: String,
    /// Criterion name to score
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

/// Input parameters for scoring a batch of thoughts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateThoughtsParams {
    /// Target tree
    pub tree_id: String,
    /// Scores to apply
    #[serde(default)]
    pub evaluations: Vec<EvaluationInput>,
}

impl EvaluateThoughtsParams {
    /// Create params with no evaluations
    pub fn new(tree_id: impl Into<String>) -> Self {
        Self {
            tree_id: tree_id.into(),
            evaluations: Vec::new(),
        }
    }

    /// Add scores for one thought
    pub fn with_scores<I, K>(mut self, thought_id: impl Into<String>, scores: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.evaluations.push(EvaluationInput {
            thought_id: thought_id.into(),
            scores: scores.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        });
        self
    }
}

/// Input parameters for advancing the cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectPathParams {
    /// Target tree
    pub tree_id: String,
    /// Strategy for this call only; the tree's strategy when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Candidates kept by beam, diverse and sampling (at least 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beam_width: Option<i64>,
    /// Select this thought directly, bypassing the strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_id: Option<String>,
}

impl SelectPathParams {
    /// Create params using the tree strategy
    pub fn new(tree_id: impl Into<String>) -> Self {
        Self {
            tree_id: tree_id.into(),
            strategy: None,
            beam_width: None,
            thought_id: None,
        }
    }

    /// Override the strategy for this call
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Set the beam width
    pub fn with_beam_width(mut self, beam_width: i64) -> Self {
        self.beam_width = Some(beam_width);
        self
    }

    /// Select a thought directly
    pub fn with_thought(mut self, thought_id: impl Into<String>) -> Self {
        self.thought_id = Some(thought_id.into());
        self
    }
}

/// Input parameters for marking a thought complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandThoughtParams {
    /// Target tree
    pub tree_id: String,
    /// Thought being completed
    pub thought_id: String,
    /// Elaboration of the thought
    pub expansion: String,
    /// Optional implementation notes
    #[serde(default)]
    pub implementation_notes: String,
}

impl ExpandThoughtParams {
    /// Create params for expanding a thought
    pub fn new(
        tree_id: impl Into<String>,
        thought_id: impl Into<String>,
        expansion: impl Into<String>,
    ) -> Self {
        Self {
            tree_id: tree_id.into(),
            thought_id: thought_id.into(),
            expansion: expansion.into(),
            implementation_notes: String::new(),
        }
    }

    /// Set implementation notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.implementation_notes = notes.into();
        self
    }
}

/// Input parameters for abandoning the cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktrackParams {
    /// Target tree
    pub tree_id: String,
    /// Why the cursor is being abandoned
    pub reason: String,
}

impl BacktrackParams {
    /// Create params with a failure reason
    pub fn new(tree_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tree_id: tree_id.into(),
            reason: reason.into(),
        }
    }
}

/// Input parameters for updating criterion weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCriteriaWeightsParams {
    /// Target tree
    pub tree_id: String,
    /// Criterion name to weight in [0.0, 1.0]
    pub weights: BTreeMap<String, f64>,
}

impl SetCriteriaWeightsParams {
    /// Create params from name/weight pairs
    pub fn new<I, K>(tree_id: impl Into<String>, weights: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            tree_id: tree_id.into(),
            weights: weights.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of creating a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTreeResult {
    /// Id of the new tree
    pub tree_id: String,
    /// Problem statement
    pub problem: String,
    /// Criterion names
    pub criteria: Vec<String>,
    /// Initial weights, 1.0 each
    pub criteria_weights: BTreeMap<String, f64>,
    /// Frontier strategy
    pub strategy: Strategy,
    /// Depth ceiling
    pub max_depth: u32,
    /// Suggested reasoning budget
    pub thinking_level: ThinkingLevel,
    /// Where the tree's record is kept.
    pub storage: String,
    /// Next step for the caller
    pub instruction: String,
}

/// Short form of a thought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtPreview {
    /// Thought id
    pub id: String,
    /// Thought content
    pub content: String,
}

/// Result of attaching thoughts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateThoughtsResult {
    /// Tree id
    pub tree_id: String,
    /// Thought the new thoughts were attached to
    pub parent_id: String,
    /// New thoughts, in generation order
    pub added: Vec<ThoughtPreview>,
    /// Next step for the caller
    pub instruction: String,
}

/// Verdict for one evaluated thought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationEntry {
    /// Thought id
    pub thought_id: String,
    /// Thought content
    pub content: String,
    /// Per-criterion scores
    pub scores: BTreeMap<String, f64>,
    /// Weighted total score
    pub total_score: f64,
    /// Verdict reached
    pub classification: Classification,
}

/// An evaluation that was not applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedEvaluation {
    /// Thought that was not scored
    pub thought_id: String,
    /// Why it was skipped
    pub reason: String,
}

/// Result of scoring a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateThoughtsResult {
    /// Tree id
    pub tree_id: String,
    /// Applied evaluations, best total first.
    pub evaluated: Vec<EvaluationEntry>,
    /// Evaluations naming the root or a settled thought
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedEvaluation>,
    /// How many thoughts fell below the pruning bound
    pub pruned: usize,
    /// Pruning bound after the batch
    pub best_score_seen: f64,
    /// Suggested reasoning budget
    pub thinking_level: ThinkingLevel,
    /// Next step for the caller
    pub instruction: String,
}

/// A thought chosen by selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedThought {
    /// Thought id
    pub id: String,
    /// Thought content
    pub content: String,
    /// Total score, rounded
    pub score: f64,
    /// Distance from the root
    pub depth: u32,
    /// Lifecycle state
    pub status: ThoughtStatus,
}

/// Successful selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectPathResult {
    /// Tree id
    pub tree_id: String,
    /// Selected thoughts, best first; the cursor is on the first.
    pub selected: Vec<SelectedThought>,
    /// Depth of the new cursor
    pub current_depth: u32,
    /// Depth ceiling of the tree
    pub max_depth: u32,
    /// The cursor reached the depth ceiling: judge completeness instead of expanding.
    pub at_max_depth: bool,
    /// Strategy name, or `explicit` for a direct selection.
    pub strategy_used: String,
    /// Suggested reasoning budget
    pub thinking_level: ThinkingLevel,
    /// Next step for the caller
    pub instruction: String,
}

/// Outcome of `select_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelectOutcome {
    /// Thoughts were selected and the cursor moved.
    Selected(SelectPathResult),
    /// The cursor has no non-failed children; the caller should backtrack.
    NoViableCandidates {
        /// Tree id
        tree_id: String,
        /// Thought whose children were ranked
        cursor_id: String,
        /// Human-readable explanation
        message: String,
        /// Suggested reasoning budget
        thinking_level: ThinkingLevel,
        /// Next step for the caller
        instruction: String,
    },
}

/// Result of expanding a thought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandThoughtResult {
    /// Tree id
    pub tree_id: String,
    /// Completed thought
    pub thought_id: String,
    /// Status after expansion
    pub status: ThoughtStatus,
    /// Distance from the root
    pub depth: u32,
    /// Next step for the caller
    pub instruction: String,
}

/// A sibling still worth trying after a backtrack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    /// Thought id
    pub id: String,
    /// Thought content
    pub content: String,
    /// Total score, rounded
    pub score: f64,
    /// Lifecycle state
    pub status: ThoughtStatus,
}

/// Successful backtrack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktrackResult {
    /// Tree id
    pub tree_id: String,
    /// Thought marked failed
    pub backtracked_from: String,
    /// Recorded failure reason
    pub reason: String,
    /// New cursor, the parent of the abandoned thought
    pub current_id: String,
    /// Depth of the new cursor
    pub current_depth: u32,
    /// Non-failed siblings of the abandoned thought, best first.
    pub alternatives: Vec<Alternative>,
    /// Next step for the caller
    pub instruction: String,
}

/// Outcome of `backtrack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BacktrackOutcome {
    /// The cursor moved to its parent.
    Backtracked(BacktrackResult),
    /// The cursor is the root; nothing was changed.
    AtRoot {
        /// Tree id
        tree_id: String,
        /// Human-readable explanation
        message: String,
        /// Next step for the caller
        instruction: String,
    },
}

/// Summary of the cursor thought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorSummary {
    /// Thought id
    pub id: String,
    /// Thought content
    pub content: String,
    /// Distance from the root
    pub depth: u32,
    /// Lifecycle state
    pub status: ThoughtStatus,
}

/// Snapshot of a whole tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeStateResult {
    /// Tree id
    pub tree_id: String,
    /// Problem statement
    pub problem: String,
    /// Frontier strategy
    pub strategy: Strategy,
    /// Criterion names
    pub criteria: Vec<String>,
    /// Criterion weights
    pub criteria_weights: BTreeMap<String, f64>,
    /// Suggested reasoning budget
    pub thinking_level: ThinkingLevel,
    /// The cursor thought
    pub current: CursorSummary,
    /// Thought count, root included
    pub total_thoughts: usize,
    /// Number of thoughts per status.
    pub status_counts: BTreeMap<String, usize>,
    /// Depth ceiling
    pub max_depth: u32,
    /// Current pruning bound
    pub best_score_seen: f64,
    /// Indented outline of the tree with status glyphs.
    pub visualization: String,
}

/// One step along the best path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStep {
    /// Thought id
    pub id: String,
    /// Distance from the root
    pub depth: u32,
    /// Thought content
    pub content: String,
    /// Why the step might work
    pub rationale: String,
    /// Per-criterion scores
    pub scores: BTreeMap<String, f64>,
    /// Weighted total score
    pub total_score: f64,
    /// Lifecycle state
    pub status: ThoughtStatus,
    /// Elaboration, if the thought was expanded
    pub expansion: Option<String>,
    /// Implementation notes, if any
    pub implementation_notes: Option<String>,
}

/// Root-to-leaf path judged most valuable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestPathResult {
    /// Tree id
    pub tree_id: String,
    /// Problem statement
    pub problem: String,
    /// Number of steps, root included
    pub path_length: usize,
    /// Raw total score of the chosen leaf.
    pub total_score: f64,
    /// Total score plus the leaf's status bonus.
    pub effective_score: f64,
    /// Steps from the root to the leaf
    pub path: Vec<PathStep>,
    /// Step contents joined with arrows
    pub summary: String,
}

/// Outcome of `best_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BestPathOutcome {
    /// A leaf was found.
    Found(BestPathResult),
    /// The tree has no leaves.
    NoCompletePath {
        /// Tree id
        tree_id: String,
        /// Human-readable explanation
        message: String,
        /// Next step for the caller
        instruction: String,
    },
}

/// One line of `list_trees`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSummary {
    /// Tree id
    pub id: String,
    /// Problem statement, truncated
    pub problem: String,
    /// Thought count, root included
    pub thoughts: usize,
    /// Depth of the cursor
    pub current_depth: u32,
    /// Depth ceiling
    pub max_depth: u32,
    /// Frontier strategy
    pub strategy: Strategy,
    /// Suggested reasoning budget
    pub thinking_level: ThinkingLevel,
    /// Best total score seen
    pub best_score: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last save time
    pub updated_at: DateTime<Utc>,
    /// Where the record is kept
    pub storage: String,
}

/// Every stored tree, most recently updated first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTreesResult {
    /// Tree summaries, most recently updated first
    pub trees: Vec<TreeSummary>,
    /// Number of trees
    pub count: usize,
}

/// Result of deleting a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTreeResult {
    /// Always true on success
    pub deleted: bool,
    /// Removed tree
    pub tree_id: String,
    /// Problem statement of the removed tree
    pub problem: String,
    /// Location of the removed record
    pub record_removed: String,
}

/// Result of updating criterion weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCriteriaWeightsResult {
    /// Tree id
    pub tree_id: String,
    /// Criterion names
    pub criteria: Vec<String>,
    /// Weights after the merge
    pub weights: BTreeMap<String, f64>,
    /// Next step for the caller
    pub instruction: String,
}

// ============================================================================
// Controller
// ============================================================================

/// Drives thought trees through their lifecycle.
pub struct TreeSearch {
    repo: TreeRepository,
    config: SearchConfig,
}

impl TreeSearch {
    /// Create a controller over a repository, applying `config` defaults.
    pub fn new(repo: TreeRepository, config: SearchConfig) -> Self {
        Self { repo, config }
    }

    /// Repository the trees live in.
    pub fn repository(&self) -> &TreeRepository {
        &self.repo
    }

    /// Defaults applied by this controller.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Fetch a tree by id.
    pub async fn tree(&self, tree_id: &str) -> SearchResult<ThoughtTree> {
        self.repo.get(tree_id).await
    }

    /// Create a tree with a selected root and the cursor on it.
    pub async fn create_tree(&self, params: CreateTreeParams) -> SearchResult<CreateTreeResult> {
        let start = Instant::now();

        let problem = params.problem.trim();
        if problem.is_empty() {
            return Err(SearchError::invalid("problem", "Problem cannot be empty"));
        }

        let max_depth = match params.max_depth {
            None => self.config.default_max_depth,
            Some(depth) if depth < 1 => {
                return Err(SearchError::invalid(
                    "max_depth",
                    format!("must be at least 1, got {}", depth),
                ));
            }
            Some(depth) => u32::try_from(depth).map_err(|_| {
                SearchError::invalid("max_depth", format!("{} is too large", depth))
            })?,
        };

        let strategy = params
            .strategy
            .as_deref()
            .map(Strategy::parse_or_greedy)
            .unwrap_or_default();
        let criteria = normalize_criteria(params.criteria, &self.config.default_criteria);

        let mut tree = ThoughtTree::new(
            problem,
            criteria,
            strategy,
            max_depth,
            self.config.diversity_threshold,
        );
        self.repo.save(&mut tree).await?;

        info!(
            tree_id = %tree.id,
            strategy = %tree.strategy,
            max_depth = tree.max_depth,
            thinking_level = %tree.thinking_level,
            latency_ms = start.elapsed().as_millis() as u64,
            "Thought tree created"
        );

        Ok(CreateTreeResult {
            instruction: format!(
                "Generate 3 distinct approaches to solve this problem. \
                 For each approach, provide: content (the approach), rationale (why it might work). \
                 Consider tradeoffs for criteria: {}. Recommended thinking level: {}",
                tree.criteria.join(", "),
                tree.thinking_level
            ),
            storage: self.repo.location(&tree.id),
            tree_id: tree.id,
            problem: tree.problem,
            criteria: tree.criteria,
            criteria_weights: tree.criteria_weights,
            strategy: tree.strategy,
            max_depth: tree.max_depth,
            thinking_level: tree.thinking_level,
        })
    }

    /// Attach thoughts as pending children of the cursor.
    pub async fn generate_thoughts(
        &self,
        params: GenerateThoughtsParams,
    ) -> SearchResult<GenerateThoughtsResult> {
        let start = Instant::now();
        let mut tree = self.repo.get(&params.tree_id).await?;
        let parent_id = tree.cursor_id.clone();

        let mut added = Vec::with_capacity(params.thoughts.len());
        for input in params.thoughts {
            let thought = tree
                .thoughts
                .insert_child(&parent_id, input.content, input.rationale)?;
            added.push(ThoughtPreview {
                id: thought.id.clone(),
                content: preview(&thought.content, 100),
            });
        }
        self.repo.save(&mut tree).await?;

        info!(
            tree_id = %tree.id,
            parent_id = %parent_id,
            added = added.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Thoughts generated"
        );

        Ok(GenerateThoughtsResult {
            instruction: format!(
                "Now evaluate each thought on criteria: {}. Score each criterion 1-10. \
                 Call tot_evaluate_thoughts with the scores.",
                tree.criteria.join(", ")
            ),
            tree_id: tree.id,
            parent_id,
            added,
        })
    }

    /// Score and classify a batch of thoughts.
    ///
    /// Unknown thought ids are skipped silently. Thoughts that can no longer be
    /// reclassified (the root, failed, selected or complete thoughts) are
    /// skipped and reported.
    pub async fn evaluate_thoughts(
        &self,
        params: EvaluateThoughtsParams,
    ) -> SearchResult<EvaluateThoughtsResult> {
        let start = Instant::now();
        let mut tree = self.repo.get(&params.tree_id).await?;

        let mut evaluated = Vec::with_capacity(params.evaluations.len());
        let mut skipped = Vec::new();
        let mut pruned = 0;

        for item in params.evaluations {
            match tree.thoughts.get(&item.thought_id) {
                Err(_) => {
                    debug!(thought_id = %item.thought_id, "Skipping evaluation of unknown thought");
                    continue;
                }
                Ok(thought) if thought.is_root() => {
                    skipped.push(SkippedEvaluation {
                        thought_id: item.thought_id,
                        reason: "the root thought is not evaluated".to_string(),
                    });
                    continue;
                }
                Ok(thought) if !thought.status.is_evaluable() => {
                    skipped.push(SkippedEvaluation {
                        reason: format!("thought is already {}", thought.status),
                        thought_id: item.thought_id,
                    });
                    continue;
                }
                Ok(_) => {}
            }

            let verdict = apply_scores(&mut tree, &item.thought_id, item.scores)?;
            if verdict == Classification::Pruned {
                pruned += 1;
            }

            let thought = tree.thoughts.get(&item.thought_id)?;
            evaluated.push(EvaluationEntry {
                thought_id: thought.id.clone(),
                content: preview(&thought.content, 100),
                scores: thought.scores.clone(),
                total_score: round2(thought.total_score),
                classification: verdict,
            });
        }

        evaluated.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        self.repo.save(&mut tree).await?;

        info!(
            tree_id = %tree.id,
            evaluated = evaluated.len(),
            skipped = skipped.len(),
            pruned,
            best_score_seen = tree.best_score_seen,
            latency_ms = start.elapsed().as_millis() as u64,
            "Thoughts evaluated"
        );

        Ok(EvaluateThoughtsResult {
            instruction: format!(
                "Using {} strategy, call tot_select_path to choose which approach(es) to pursue. \
                 Recommended thinking level: {}",
                tree.strategy, tree.thinking_level
            ),
            tree_id: tree.id,
            evaluated,
            skipped,
            pruned,
            best_score_seen: round2(tree.best_score_seen),
            thinking_level: tree.thinking_level,
        })
    }

    /// Select thoughts below the cursor and move the cursor to the best one.
    pub async fn select_path(&self, params: SelectPathParams) -> SearchResult<SelectOutcome> {
        let start = Instant::now();
        let mut tree = self.repo.get(&params.tree_id).await?;

        let beam_width = match params.beam_width {
            Some(width) => usize::try_from(width.max(1)).unwrap_or(usize::MAX),
            None => self.config.default_beam_width.max(1),
        };

        let (selected_ids, strategy_used) = match params.thought_id.as_deref() {
            Some(thought_id) => {
                let thought = tree.thoughts.get(thought_id)?;
                if thought.status == ThoughtStatus::Failed {
                    return Err(SearchError::invalid(
                        "thought_id",
                        format!("thought {} has failed and cannot be selected", thought_id),
                    ));
                }
                (vec![thought_id.to_string()], "explicit".to_string())
            }
            None => {
                let strategy = match params.strategy.as_deref() {
                    Some(name) => name.parse::<Strategy>().unwrap_or_else(|e| {
                        warn!(error = %e, fallback = %tree.strategy, "Ignoring strategy override");
                        tree.strategy
                    }),
                    None => tree.strategy,
                };

                // Nothing generated under a selected thought yet: rank its
                // siblings again so a repeat selection lands on the same thought.
                let cursor = tree.thoughts.get(&tree.cursor_id)?;
                let anchor_id = match &cursor.parent_id {
                    Some(parent_id) if cursor.is_leaf() => parent_id.clone(),
                    _ => tree.cursor_id.clone(),
                };
                let frontier = Frontier::below(&tree, &anchor_id)?;
                let chosen = frontier.select(strategy, beam_width, tree.diversity_threshold);
                match chosen {
                    Ok(selected) => (
                        selected.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
                        strategy.to_string(),
                    ),
                    Err(SearchError::NoViableCandidates { thought_id }) => {
                        info!(tree_id = %tree.id, cursor_id = %thought_id, "No viable candidates");
                        return Ok(SelectOutcome::NoViableCandidates {
                            tree_id: tree.id.clone(),
                            cursor_id: thought_id,
                            message: "No viable candidates. Consider backtracking.".to_string(),
                            thinking_level: tree.thinking_level,
                            instruction: "Call tot_backtrack with a reason to return to the parent thought."
                                .to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        for id in &selected_ids {
            let thought = tree.thoughts.get_mut(id)?;
            if thought.status != ThoughtStatus::Complete {
                thought.transition_to(ThoughtStatus::Selected)?;
            }
        }
        // `select` never returns an empty list and an explicit id is one entry.
        let Some(first_id) = selected_ids.first().cloned() else {
            return Err(SearchError::invalid("thought_id", "nothing was selected"));
        };
        tree.cursor_id = first_id;
        self.repo.save(&mut tree).await?;

        let selected = selected_ids
            .iter()
            .map(|id| {
                tree.thoughts.get(id).map(|t| SelectedThought {
                    id: t.id.clone(),
                    content: t.content.clone(),
                    score: round2(t.total_score),
                    depth: t.depth,
                    status: t.status,
                })
            })
            .collect::<SearchResult<Vec<_>>>()?;

        let current_depth = selected.first().map(|t| t.depth).unwrap_or_default();
        let at_max_depth = current_depth >= tree.max_depth;

        info!(
            tree_id = %tree.id,
            cursor_id = %tree.cursor_id,
            selected = selected.len(),
            strategy = %strategy_used,
            at_max_depth,
            latency_ms = start.elapsed().as_millis() as u64,
            "Path selected"
        );

        let instruction = if at_max_depth {
            format!(
                "Maximum depth reached. Evaluate if this is a complete solution. \
                 If yes, call tot_get_best_path. If not satisfactory, call tot_backtrack. \
                 Thinking level: {}",
                tree.thinking_level
            )
        } else {
            format!(
                "Expand the selected thought. Generate 3 more specific sub-approaches \
                 that implement or refine this approach. Thinking level: {}",
                tree.thinking_level
            )
        };

        Ok(SelectOutcome::Selected(SelectPathResult {
            tree_id: tree.id,
            selected,
            current_depth,
            max_depth: tree.max_depth,
            at_max_depth,
            strategy_used,
            thinking_level: tree.thinking_level,
            instruction,
        }))
    }

    /// Record an elaboration on a thought and mark it complete.
    pub async fn expand_thought(
        &self,
        params: ExpandThoughtParams,
    ) -> SearchResult<ExpandThoughtResult> {
        let start = Instant::now();
        let mut tree = self.repo.get(&params.tree_id).await?;

        let thought = tree.thoughts.get_mut(&params.thought_id)?;
        if thought.status == ThoughtStatus::Failed {
            return Err(SearchError::invalid(
                "thought_id",
                format!("thought {} has failed and cannot be expanded", params.thought_id),
            ));
        }
        thought.note("expansion", params.expansion);
        thought.note("implementation_notes", params.implementation_notes);
        thought.transition_to(ThoughtStatus::Complete)?;
        let depth = thought.depth;

        self.repo.save(&mut tree).await?;

        info!(
            tree_id = %tree.id,
            thought_id = %params.thought_id,
            latency_ms = start.elapsed().as_millis() as u64,
            "Thought expanded"
        );

        Ok(ExpandThoughtResult {
            tree_id: tree.id,
            thought_id: params.thought_id,
            status: ThoughtStatus::Complete,
            depth,
            instruction: "Thought expanded. Generate child thoughts to further refine, \
                          or call tot_get_best_path if done."
                .to_string(),
        })
    }

    /// Fail the cursor and move it to its parent.
    ///
    /// At the root nothing is changed and `AtRoot` is returned.
    pub async fn backtrack(&self, params: BacktrackParams) -> SearchResult<BacktrackOutcome> {
        let start = Instant::now();
        let mut tree = self.repo.get(&params.tree_id).await?;

        let abandoned_id = tree.cursor_id.clone();
        let abandoned = tree.thoughts.get_mut(&abandoned_id)?;
        let Some(parent_id) = abandoned.parent_id.clone() else {
            info!(tree_id = %tree.id, "Backtrack requested at root");
            return Ok(BacktrackOutcome::AtRoot {
                tree_id: tree.id,
                message: "At root thought, cannot backtrack further.".to_string(),
                instruction: "Generate new initial approaches with tot_generate_thoughts."
                    .to_string(),
            });
        };

        abandoned.transition_to(ThoughtStatus::Failed)?;
        abandoned.note("failure_reason", params.reason.clone());
        tree.cursor_id = parent_id.clone();

        let alternatives: Vec<Alternative> = Frontier::below(&tree, &parent_id)?
            .ranked()
            .iter()
            .filter(|t| t.id != abandoned_id)
            .map(|t| Alternative {
                id: t.id.clone(),
                content: preview(&t.content, 80),
                score: round2(t.total_score),
                status: t.status,
            })
            .collect();
        let current_depth = tree.thoughts.get(&parent_id)?.depth;

        self.repo.save(&mut tree).await?;

        info!(
            tree_id = %tree.id,
            backtracked_from = %abandoned_id,
            cursor_id = %parent_id,
            alternatives = alternatives.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Backtracked"
        );

        let instruction = if alternatives.is_empty() {
            "No alternatives at this level. Backtrack further or generate new approaches."
        } else {
            "Select an alternative path with tot_select_path, or generate new thoughts."
        };

        Ok(BacktrackOutcome::Backtracked(BacktrackResult {
            tree_id: tree.id,
            backtracked_from: abandoned_id,
            reason: params.reason,
            current_id: parent_id,
            current_depth,
            alternatives,
            instruction: instruction.to_string(),
        }))
    }

    /// Snapshot of a tree with a text outline.
    pub async fn get_tree_state(&self, tree_id: &str) -> SearchResult<TreeStateResult> {
        let tree = self.repo.get(tree_id).await?;
        let cursor = tree.thoughts.get(&tree.cursor_id)?;

        let mut status_counts = BTreeMap::new();
        for thought in tree.thoughts.iter() {
            *status_counts.entry(thought.status.to_string()).or_insert(0) += 1;
        }

        debug!(tree_id = %tree.id, thoughts = tree.thoughts.len(), "Tree state read");

        Ok(TreeStateResult {
            current: CursorSummary {
                id: cursor.id.clone(),
                content: cursor.content.clone(),
                depth: cursor.depth,
                status: cursor.status,
            },
            visualization: render_tree(&tree),
            total_thoughts: tree.thoughts.len(),
            status_counts,
            tree_id: tree.id,
            problem: tree.problem,
            strategy: tree.strategy,
            criteria: tree.criteria,
            criteria_weights: tree.criteria_weights,
            thinking_level: tree.thinking_level,
            max_depth: tree.max_depth,
            best_score_seen: round2(tree.best_score_seen),
        })
    }

    /// The root-to-leaf path whose leaf has the highest score plus status bonus.
    pub async fn best_path(&self, tree_id: &str) -> SearchResult<BestPathOutcome> {
        let tree = self.repo.get(tree_id).await?;

        let mut best: Option<(&Thought, f64)> = None;
        for leaf in tree.thoughts.leaves() {
            let effective = leaf.total_score + status_bonus(leaf.status);
            match best {
                Some((_, score)) if score >= effective => {}
                _ => best = Some((leaf, effective)),
            }
        }

        let Some((leaf, effective_score)) = best else {
            return Ok(BestPathOutcome::NoCompletePath {
                tree_id: tree.id.clone(),
                message: "No complete paths found.".to_string(),
                instruction: "Continue exploration with tot_generate_thoughts.".to_string(),
            });
        };

        let path: Vec<PathStep> = tree
            .thoughts
            .path_to_root(&leaf.id)?
            .into_iter()
            .map(|t| PathStep {
                id: t.id.clone(),
                depth: t.depth,
                content: t.content.clone(),
                rationale: t.rationale.clone(),
                scores: t.scores.clone(),
                total_score: round2(t.total_score),
                status: t.status,
                expansion: t.note_str("expansion").map(str::to_string),
                implementation_notes: t.note_str("implementation_notes").map(str::to_string),
            })
            .collect();
        let summary = path
            .iter()
            .map(|step| preview(&step.content, 50))
            .collect::<Vec<_>>()
            .join(" → ");

        debug!(tree_id = %tree.id, leaf_id = %leaf.id, effective_score, "Best path found");

        Ok(BestPathOutcome::Found(BestPathResult {
            tree_id: tree.id.clone(),
            problem: tree.problem.clone(),
            path_length: path.len(),
            total_score: round2(leaf.total_score),
            effective_score: round2(effective_score),
            path,
            summary,
        }))
    }

    /// Summaries of every stored tree, most recently updated first.
    pub async fn list_trees(&self) -> SearchResult<ListTreesResult> {
        let mut trees: Vec<TreeSummary> = self
            .repo
            .list()
            .await?
            .into_iter()
            .map(|tree| TreeSummary {
                current_depth: tree
                    .thoughts
                    .get(&tree.cursor_id)
                    .map(|t| t.depth)
                    .unwrap_or_default(),
                thoughts: tree.thoughts.len(),
                problem: preview(&tree.problem, 80),
                storage: self.repo.location(&tree.id),
                max_depth: tree.max_depth,
                strategy: tree.strategy,
                thinking_level: tree.thinking_level,
                best_score: round2(tree.best_score_seen),
                created_at: tree.created_at,
                updated_at: tree.updated_at,
                id: tree.id,
            })
            .collect();
        trees.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        debug!(count = trees.len(), "Trees listed");
        Ok(ListTreesResult {
            count: trees.len(),
            trees,
        })
    }

    /// Remove a tree and its record. Irreversible.
    pub async fn delete_tree(&self, tree_id: &str) -> SearchResult<DeleteTreeResult> {
        let tree = self.repo.get(tree_id).await?;
        self.repo.delete(tree_id).await?;

        info!(tree_id = %tree_id, "Thought tree deleted");
        Ok(DeleteTreeResult {
            deleted: true,
            tree_id: tree.id,
            problem: preview(&tree.problem, 80),
            record_removed: self.repo.location(tree_id),
        })
    }

    /// Merge new weights into the tree's criterion weights.
    ///
    /// Every key must be one of the tree's criteria and every weight must lie
    /// within [0.0, 1.0]; otherwise nothing is changed.
    pub async fn set_criteria_weights(
        &self,
        params: SetCriteriaWeightsParams,
    ) -> SearchResult<SetCriteriaWeightsResult> {
        let mut tree = self.repo.get(&params.tree_id).await?;

        for (criterion, weight) in &params.weights {
            if !tree.criteria.contains(criterion) {
                return Err(SearchError::invalid(
                    "weights",
                    format!(
                        "Unknown criterion: {}. Available: {}",
                        criterion,
                        tree.criteria.join(", ")
                    ),
                ));
            }
            if !(0.0..=1.0).contains(weight) {
                return Err(SearchError::invalid(
                    "weights",
                    format!("Weight must be between 0.0 and 1.0: {}={}", criterion, weight),
                ));
            }
        }

        tree.criteria_weights.extend(params.weights);
        self.repo.save(&mut tree).await?;

        info!(tree_id = %tree.id, weights = ?tree.criteria_weights, "Criteria weights updated");

        Ok(SetCriteriaWeightsResult {
            tree_id: tree.id,
            criteria: tree.criteria,
            weights: tree.criteria_weights,
            instruction: "Weights updated. Re-evaluate thoughts if needed.".to_string(),
        })
    }
}

/// Bonus added to a leaf's score when ranking paths.
pub fn status_bonus(status: ThoughtStatus) -> f64 {
    match status {
        ThoughtStatus::Complete => 100.0,
        ThoughtStatus::Promising => 50.0,
        ThoughtStatus::Selected => 25.0,
        ThoughtStatus::Uncertain => 10.0,
        ThoughtStatus::Pending => 0.0,
        ThoughtStatus::Failed => -100.0,
    }
}

/// Indented outline of the tree, one thought per line in depth-first order.
pub fn render_tree(tree: &ThoughtTree) -> String {
    let mut lines = Vec::with_capacity(tree.thoughts.len());
    let mut stack = vec![(tree.root_id.as_str(), 0usize)];

    while let Some((id, indent)) = stack.pop() {
        let Ok(thought) = tree.thoughts.get(id) else {
            continue;
        };
        lines.push(format!(
            "{}{} [{}] {}... (score: {:.1})",
            "  ".repeat(indent),
            thought.status.glyph(),
            thought.id,
            preview(&thought.content, 60),
            thought.total_score
        ));
        stack.extend(
            thought
                .children
                .iter()
                .rev()
                .map(|child| (child.as_str(), indent + 1)),
        );
    }

    lines.join("\n")
}

fn normalize_criteria(criteria: Option<Vec<String>>, defaults: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let cleaned: Vec<String> = criteria
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect();

    if cleaned.is_empty() {
        defaults.to_vec()
    } else {
        cleaned
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
