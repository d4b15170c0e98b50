//! Weighted compliance scoring.
//!
//! ```text
//! total  = Σ weight(criticality)
//! earned = Σ weight(criticality) × credit(status)
//! score  = round(100 × earned / total), 0 when total = 0
//! ```
//!
//! Rounding is half-up, so `12.5` scores `13`.

use serde::{Deserialize, Serialize};

use crate::models::{CheckStatus, ChecklistItem, Criticality};

/// Credit per status and weight per criticality level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub pass: f64,
    pub warn: f64,
    pub fail: f64,
    pub unknown: f64,
    /// Weight for criticality 1 through 5, by index.
    pub criticality_weights: [f64; 5],
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            pass: 1.0,
            warn: 0.5,
            fail: 0.0,
            unknown: 0.0,
            criticality_weights: [1.0, 2.0, 3.0, 4.0, 5.0],
        }
    }
}

impl ScoringPolicy {
    pub fn credit(&self, status: CheckStatus) -> f64 {
        match status {
            CheckStatus::Pass => self.pass,
            CheckStatus::Warn => self.warn,
            CheckStatus::Fail => self.fail,
            CheckStatus::Unknown => self.unknown,
        }
    }

    pub fn weight(&self, criticality: Criticality) -> f64 {
        self.criticality_weights[usize::from(criticality.get() - Criticality::MIN)]
    }

    /// Credits must lie in `[0, 1]` and weights must be non-negative.
    pub fn validate(&self) -> Result<(), String> {
        for (name, credit) in [
            ("pass", self.pass),
            ("warn", self.warn),
            ("fail", self.fail),
            ("unknown", self.unknown),
        ] {
            if !(0.0..=1.0).contains(&credit) {
                return Err(format!("scoring.{name} must be between 0.0 and 1.0, got {credit}"));
            }
        }
        if let Some(w) = self.criticality_weights.iter().find(|w| w.is_nan() || **w < 0.0) {
            return Err(format!("scoring.criticality_weights must be >= 0, got {w}"));
        }
        Ok(())
    }

    pub fn score(&self, items: &[ChecklistItem]) -> u8 {
        let mut total = 0.0;
        let mut earned = 0.0;
        for item in items {
            let weight = self.weight(item.criticality);
            total += weight;
            earned += weight * self.credit(item.status);
        }
        if total <= 0.0 {
            return 0;
        }
        // f64::round rounds half away from zero, which is half-up here
        (100.0 * earned / total).round().clamp(0.0, 100.0) as u8
    }
}

/// Score with the default policy.
pub fn score(items: &[ChecklistItem]) -> u8 {
    ScoringPolicy::default().score(items)
}
