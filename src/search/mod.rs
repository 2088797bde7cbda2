//! Tree-of-Thought search engine.
//!
//! This module provides:
//! - Weighted scoring, pruning and classification ([`scoring`])
//! - Frontier selection strategies ([`frontier`])
//! - The [`TreeSearch`] controller exposing every tree operation

pub mod controller;
pub mod frontier;
pub mod scoring;

pub use controller::*;
pub use frontier::{jaccard, Frontier};
pub use scoring::{apply_scores, weighted_score, Classification};
