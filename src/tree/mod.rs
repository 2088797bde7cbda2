//! Thought tree data model.
//!
//! A [`ThoughtTree`] is one exploration session. It owns every [`Thought`]
//! through a [`ThoughtStore`] arena; parent and child links are ids into that
//! arena, never references, so a tree serializes as a flat ordered list.

mod store;

pub use store::ThoughtStore;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SearchError, SearchResult};

/// Current version of the persisted tree record layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Lifecycle state of a thought.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtStatus {
    /// Created but not yet evaluated.
    #[default]
    Pending,
    /// Evaluated and worth pursuing.
    Promising,
    /// Evaluated; might work, needs more exploration.
    Uncertain,
    /// Dead end. Terminal.
    Failed,
    /// Chosen by frontier selection and currently pursued.
    Selected,
    /// Expanded into a worked-out solution step.
    Complete,
}

impl ThoughtStatus {
    /// Whether a thought in this state may move to `next`.
    ///
    /// Staying in the same state is always allowed; `Failed` allows nothing else.
    pub fn can_transition_to(self, next: ThoughtStatus) -> bool {
        use ThoughtStatus::*;

        if self == next {
            return true;
        }
        match self {
            Pending | Promising | Uncertain => true,
            Selected => matches!(next, Failed | Complete),
            Complete => next == Failed,
            Failed => false,
        }
    }

    /// Whether evaluation may (re)classify a thought in this state.
    pub fn is_evaluable(self) -> bool {
        matches!(
            self,
            ThoughtStatus::Pending | ThoughtStatus::Promising | ThoughtStatus::Uncertain
        )
    }

    /// Single-character marker used by the tree visualization.
    pub fn glyph(self) -> &'static str {
        match self {
            ThoughtStatus::Pending => "○",
            ThoughtStatus::Promising => "✓",
            ThoughtStatus::Uncertain => "?",
            ThoughtStatus::Failed => "✗",
            ThoughtStatus::Selected => "→",
            ThoughtStatus::Complete => "★",
        }
    }
}

impl std::fmt::Display for ThoughtStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThoughtStatus::Pending => write!(f, "pending"),
            ThoughtStatus::Promising => write!(f, "promising"),
            ThoughtStatus::Uncertain => write!(f, "uncertain"),
            ThoughtStatus::Failed => write!(f, "failed"),
            ThoughtStatus::Selected => write!(f, "selected"),
            ThoughtStatus::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for ThoughtStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ThoughtStatus::Pending),
            "promising" => Ok(ThoughtStatus::Promising),
            "uncertain" => Ok(ThoughtStatus::Uncertain),
            "failed" => Ok(ThoughtStatus::Failed),
            "selected" => Ok(ThoughtStatus::Selected),
            "complete" => Ok(ThoughtStatus::Complete),
            _ => Err(format!("Unknown thought status: {}", s)),
        }
    }
}

/// Frontier selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Single best candidate.
    #[default]
    Greedy,
    /// Top `beam_width` candidates.
    Beam,
    /// Top candidates filtered for content dissimilarity.
    Diverse,
    /// Deterministic top `beam_width`, the same slice as beam.
    Sampling,
}

impl Strategy {
    /// Get the strategy name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Greedy => "greedy",
            Strategy::Beam => "beam",
            Strategy::Diverse => "diverse",
            Strategy::Sampling => "sampling",
        }
    }

    /// Parse a strategy name, falling back to `Greedy` for anything unknown.
    pub fn parse_or_greedy(name: &str) -> Self {
        name.parse().unwrap_or_else(|e: String| {
            tracing::warn!(error = %e, "Falling back to greedy strategy");
            Strategy::Greedy
        })
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "greedy" => Ok(Strategy::Greedy),
            "beam" => Ok(Strategy::Beam),
            "diverse" => Ok(Strategy::Diverse),
            "sampling" => Ok(Strategy::Sampling),
            _ => Err(format!("Unknown search strategy: {}", s)),
        }
    }
}

/// Advisory reasoning budget suggested to the caller generating thoughts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThinkingLevel {
    /// Shallow searches on routine problems.
    #[serde(rename = "think")]
    Think,
    /// Feature work, fixes and debugging.
    #[default]
    #[serde(rename = "think hard")]
    ThinkHard,
    /// Refactoring, optimization and concurrency.
    #[serde(rename = "think harder")]
    ThinkHarder,
    /// Architecture and system design, or deep searches.
    #[serde(rename = "ultrathink")]
    Ultrathink,
}

const ULTRATHINK_KEYWORDS: &[&str] = &[
    "architect",
    "design",
    "system",
    "infrastructure",
    "scalab",
    "microservice",
    "database schema",
    "api design",
    "security model",
];

const THINK_HARDER_KEYWORDS: &[&str] = &[
    "refactor",
    "optimize",
    "complex",
    "algorithm",
    "performance",
    "concurrent",
    "async",
    "parallel",
    "distributed",
];

const THINK_HARD_KEYWORDS: &[&str] = &[
    "implement",
    "feature",
    "module",
    "component",
    "integration",
    "test",
    "fix",
    "debug",
    "error handling",
];

impl ThinkingLevel {
    /// Estimate a thinking level from the problem wording and search depth.
    pub fn estimate(problem: &str, max_depth: u32) -> Self {
        let lower = problem.to_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|kw| lower.contains(kw));

        if mentions(ULTRATHINK_KEYWORDS) || max_depth >= 5 {
            ThinkingLevel::Ultrathink
        } else if mentions(THINK_HARDER_KEYWORDS) || max_depth >= 4 {
            ThinkingLevel::ThinkHarder
        } else if mentions(THINK_HARD_KEYWORDS) || max_depth >= 3 {
            ThinkingLevel::ThinkHard
        } else {
            ThinkingLevel::Think
        }
    }

    /// Get the level as the phrase callers use
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingLevel::Think => "think",
            ThinkingLevel::ThinkHard => "think hard",
            ThinkingLevel::ThinkHarder => "think harder",
            ThinkingLevel::Ultrathink => "ultrathink",
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single reasoning step in a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique thought identifier.
    pub id: String,
    /// The step itself; opaque to the engine.
    pub content: String,
    /// Why the step might work; opaque to the engine.
    pub rationale: String,
    /// Owning thought, `None` only for the root.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Child ids in generation order.
    #[serde(default)]
    pub children: Vec<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: ThoughtStatus,
    /// Caller-supplied per-criterion scores.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    /// Weighted aggregate of `scores`; 0 until evaluated.
    #[serde(default)]
    pub total_score: f64,
    /// Distance from the root.
    #[serde(default)]
    pub depth: u32,
    /// When the thought was generated.
    pub created_at: DateTime<Utc>,
    /// Expansion notes, failure and pruning reasons.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Thought {
    /// Create a new pending thought with a fresh id.
    pub fn new(content: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            rationale: rationale.into(),
            parent_id: None,
            children: Vec::new(),
            status: ThoughtStatus::Pending,
            scores: BTreeMap::new(),
            total_score: 0.0,
            depth: 0,
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Whether this is the tree's root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether no thoughts have been generated below this one.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Minimum per-criterion score, 0 when unscored.
    pub fn min_score(&self) -> f64 {
        self.scores.values().copied().reduce(f64::min).unwrap_or(0.0)
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition_to(&mut self, next: ThoughtStatus) -> SearchResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SearchError::invalid(
                "status",
                format!(
                    "thought {} cannot move from {} to {}",
                    self.id, self.status, next
                ),
            ));
        }
        self.status = next;
        Ok(())
    }

    /// Store a metadata entry.
    pub fn note(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Metadata entry as text, if present and a string.
    pub fn note_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// One Tree-of-Thought exploration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtTree {
    /// Layout version of the persisted record; 0 for records predating it.
    #[serde(default)]
    pub schema_version: u32,
    /// Unique tree identifier.
    pub id: String,
    /// The problem statement being explored.
    pub problem: String,
    /// The depth 0 thought created with the tree.
    pub root_id: String,
    /// The active thought new thoughts attach to.
    pub cursor_id: String,
    /// Every thought of the tree, root included.
    pub thoughts: ThoughtStore,
    /// Criterion names, in the order given at creation.
    pub criteria: Vec<String>,
    /// Criterion name to weight in [0.0, 1.0].
    #[serde(default)]
    pub criteria_weights: BTreeMap<String, f64>,
    /// Default frontier selection strategy.
    #[serde(default)]
    pub strategy: Strategy,
    /// Depth ceiling for the search.
    pub max_depth: u32,
    /// Reasoning budget suggested for this problem.
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
    /// Highest `total_score` of any evaluated thought; the pruning bound.
    #[serde(default)]
    pub best_score_seen: f64,
    /// Minimum dissimilarity for the diverse strategy.
    #[serde(default = "default_diversity_threshold")]
    pub diversity_threshold: f64,
    /// When the tree was created.
    pub created_at: DateTime<Utc>,
    /// Last time the tree was saved.
    pub updated_at: DateTime<Utc>,
}

fn default_diversity_threshold() -> f64 {
    0.3
}

impl ThoughtTree {
    /// Create a tree with its root thought selected and the cursor on it.
    pub fn new(
        problem: impl Into<String>,
        criteria: Vec<String>,
        strategy: Strategy,
        max_depth: u32,
        diversity_threshold: f64,
    ) -> Self {
        let problem = problem.into();
        let mut root = Thought::new(
            format!("Problem: {}", problem),
            "Root node representing the initial problem state",
        );
        root.status = ThoughtStatus::Selected;
        let root_id = root.id.clone();

        let criteria_weights = criteria.iter().map(|c| (c.clone(), 1.0)).collect();
        let now = Utc::now();

        Self {
            schema_version: SCHEMA_VERSION,
            id: Uuid::new_v4().to_string(),
            thinking_level: ThinkingLevel::estimate(&problem, max_depth),
            problem,
            root_id: root_id.clone(),
            cursor_id: root_id,
            thoughts: ThoughtStore::with_root(root),
            criteria,
            criteria_weights,
            strategy,
            max_depth,
            best_score_seen: 0.0,
            diversity_threshold,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the structural invariants of the tree.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let root = self
            .thoughts
            .get(&self.root_id)
            .map_err(|_| format!("root {} missing", self.root_id))?;
        if root.depth != 0 || root.parent_id.is_some() {
            return Err(format!("root {} is not a depth-0 parentless thought", root.id));
        }
        if !self.thoughts.contains(&self.cursor_id) {
            return Err(format!("cursor {} missing", self.cursor_id));
        }
        if self.best_score_seen < 0.0 {
            return Err("best_score_seen is negative".to_string());
        }

        for thought in self.thoughts.iter() {
            match &thought.parent_id {
                None if thought.id != self.root_id => {
                    return Err(format!("thought {} has no parent", thought.id));
                }
                None => {}
                Some(parent_id) => {
                    let parent = self
                        .thoughts
                        .get(parent_id)
                        .map_err(|_| format!("parent {} of {} missing", parent_id, thought.id))?;
                    let listed = parent.children.iter().filter(|c| **c == thought.id).count();
                    if listed != 1 {
                        return Err(format!(
                            "thought {} listed {} times under parent {}",
                            thought.id, listed, parent_id
                        ));
                    }
                    if thought.depth != parent.depth + 1 {
                        return Err(format!(
                            "thought {} has depth {} under parent at depth {}",
                            thought.id, thought.depth, parent.depth
                        ));
                    }
                }
            }
            for child_id in &thought.children {
                let child = self
                    .thoughts
                    .get(child_id)
                    .map_err(|_| format!("child {} of {} missing", child_id, thought.id))?;
                if child.parent_id.as_deref() != Some(thought.id.as_str()) {
                    return Err(format!("child {} does not point back to {}", child_id, thought.id));
                }
            }
        }
        Ok(())
    }
}
