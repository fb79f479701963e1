use std::collections::HashSet;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::LineItem;

pub const DESCRIPTION_WEIGHT: f64 = 0.6;
pub const AMOUNT_WEIGHT: f64 = 0.4;
pub const DEFAULT_MIN_LINE_SCORE: f64 = 0.5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineMatch {
    pub candidate_index: usize,
    pub description_similarity: f64,
    pub amount_similarity: f64,
    pub score: f64,
}

/// Pairs one invoice line with the best candidate line from a PO or receipt.
#[derive(Clone, Debug)]
pub struct LineMatcher {
    min_score: f64,
}

impl Default for LineMatcher {
    fn default() -> Self {
        Self { min_score: DEFAULT_MIN_LINE_SCORE }
    }
}

impl LineMatcher {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }

    /// Returns the highest scoring candidate, or `None` when the best score is at or
    /// below the minimum. Equal scores keep the earlier candidate.
    pub fn best_match(&self, line: &LineItem, candidates: &[LineItem]) -> Option<LineMatch> {
        let mut best: Option<LineMatch> = None;

        for (candidate_index, candidate) in candidates.iter().enumerate() {
            let scored = score_pair(line, candidate, candidate_index);
            let better = best.as_ref().map_or(true, |current| scored.score > current.score);
            if better {
                best = Some(scored);
            }
        }

        best.filter(|found| found.score > self.min_score)
    }
}

fn score_pair(line: &LineItem, candidate: &LineItem, candidate_index: usize) -> LineMatch {
    let description_similarity = description_similarity(&line.description, &candidate.description);
    let amount_similarity = amount_similarity(line.total, candidate.total);
    LineMatch {
        candidate_index,
        description_similarity,
        amount_similarity,
        score: DESCRIPTION_WEIGHT * description_similarity + AMOUNT_WEIGHT * amount_similarity,
    }
}

/// Jaccard similarity of lower-cased whitespace tokens.
pub fn description_similarity(left: &str, right: &str) -> f64 {
    let left_tokens = tokens(left);
    let right_tokens = tokens(right);
    if left_tokens.is_empty() || right_tokens.is_empty() {
        return 0.0;
    }

    let shared = left_tokens.intersection(&right_tokens).count();
    let union = left_tokens.union(&right_tokens).count();
    shared as f64 / union as f64
}

/// `1 - |a - b| / max(a, b)`, zero when either side is zero, clamped to `[0, 1]`.
pub fn amount_similarity(left: Decimal, right: Decimal) -> f64 {
    if left.is_zero() || right.is_zero() {
        return 0.0;
    }

    let largest = left.max(right);
    if largest <= Decimal::ZERO {
        return 0.0;
    }

    let ratio = left
        .saturating_sub(right)
        .abs()
        .checked_div(largest)
        .and_then(|ratio| ratio.to_f64())
        .unwrap_or(1.0);
    (1.0 - ratio).clamp(0.0, 1.0)
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}
