//! Importance scoring for eviction.

use super::item::{MemoryItem, MemoryItemType};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Named weights for the eviction score.
///
/// An item scores its type bonus, plus the `important` bonus when flagged,
/// plus up to `length_max` points (one per `length_divisor` characters), plus
/// up to `recency_max` points decaying linearly to zero over
/// `recency_window_secs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportanceWeights {
    /// Bonus for summary items.
    pub summary: f64,
    /// Bonus for action items.
    pub action: f64,
    /// Bonus for observation items.
    pub observation: f64,
    /// Bonus for items whose metadata sets `important = true`.
    pub important: f64,
    /// Ceiling of the content-length component.
    pub length_max: f64,
    /// Characters per length point.
    pub length_divisor: f64,
    /// Ceiling of the recency component.
    pub recency_max: f64,
    /// Window over which the recency component decays to zero.
    pub recency_window_secs: u64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            summary: 50.0,
            action: 30.0,
            observation: 25.0,
            important: 40.0,
            length_max: 15.0,
            length_divisor: 20.0,
            recency_max: 10.0,
            recency_window_secs: 24 * 60 * 60,
        }
    }
}

impl ImportanceWeights {
    /// Scores `item` as of `now`.
    pub fn score(&self, item: &MemoryItem, now: DateTime<Utc>) -> f64 {
        let mut score = match item.kind {
            MemoryItemType::Summary => self.summary,
            MemoryItemType::Action => self.action,
            MemoryItemType::Observation => self.observation,
            _ => 0.0,
        };

        if item.is_important() {
            score += self.important;
        }

        if self.length_divisor > 0.0 {
            score += (item.content.chars().count() as f64 / self.length_divisor).min(self.length_max);
        }

        if self.recency_window_secs > 0 {
            let age = (now - item.created_at).num_milliseconds().max(0) as f64 / 1000.0;
            let factor = (1.0 - age / self.recency_window_secs as f64).max(0.0);
            score += factor * self.recency_max;
        }

        score
    }
}
