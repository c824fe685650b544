//! Confidence Scorer — Stage 3, a weighted ensemble producing the single
//! number the Decision Engine matches against its thresholds (spec §4.9).
//!
//! Grounded on the teacher's `ensemble/voting.rs` weighted-vote
//! aggregation (there over several models' votes; here over several
//! pipeline signals) and `ModelId::weight()`'s idea of a fixed,
//! named-factor weight table.

use serde::{Deserialize, Serialize};

use crate::validator::ValidationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Factor {
    ValidatorPass,
    QualityScore,
    AgentHealth,
    IterationPressure,
    HistoricalSuccess,
}

/// Fixed per-factor weights, summing to 1.0. Not user-configurable in
/// the current design (spec §9 Open Question: resolved in favor of a
/// fixed table — see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct Weights {
    pub validator_pass: f64,
    pub quality_score: f64,
    pub agent_health: f64,
    pub iteration_pressure: f64,
    pub historical_success: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            validator_pass: 0.25,
            quality_score: 0.35,
            agent_health: 0.15,
            iteration_pressure: 0.10,
            historical_success: 0.15,
        }
    }
}

/// Inputs to one confidence computation. All fields are pre-normalized
/// to `[0.0, 1.0]` by the caller; this module only combines them.
#[derive(Debug, Clone)]
pub struct ConfidenceInputs {
    pub validation: ValidationOutcome,
    pub quality_score: f64,
    pub agent_health: f64,
    pub iteration: u32,
    pub max_iterations: u32,
    pub historical_success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub value: f64,
    pub breakdown: Vec<(String, f64)>,
}

/// `iteration_pressure` rewards earlier iterations and decays linearly
/// to 0 at `max_iterations`, so a response that only squeaks through on
/// the last allowed attempt scores lower than an equally good one on the
/// first.
fn iteration_pressure(iteration: u32, max_iterations: u32) -> f64 {
    if max_iterations == 0 {
        return 0.0;
    }
    let remaining = max_iterations.saturating_sub(iteration) as f64;
    (remaining / max_iterations as f64).clamp(0.0, 1.0)
}

pub fn score(inputs: &ConfidenceInputs, weights: &Weights) -> ConfidenceScore {
    let validator_component = if inputs.validation.ok { 1.0 } else { 0.0 };
    let pressure_component = iteration_pressure(inputs.iteration, inputs.max_iterations);

    let breakdown = vec![
        ("validator_pass".to_string(), validator_component * weights.validator_pass),
        ("quality_score".to_string(), inputs.quality_score.clamp(0.0, 1.0) * weights.quality_score),
        ("agent_health".to_string(), inputs.agent_health.clamp(0.0, 1.0) * weights.agent_health),
        ("iteration_pressure".to_string(), pressure_component * weights.iteration_pressure),
        (
            "historical_success".to_string(),
            inputs.historical_success_rate.clamp(0.0, 1.0) * weights.historical_success,
        ),
    ];

    let value = breakdown.iter().map(|(_, v)| v).sum::<f64>().clamp(0.0, 1.0);

    ConfidenceScore { value, breakdown }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ValidationOutcome;

    fn passing_validation() -> ValidationOutcome {
        ValidationOutcome { ok: true, violations: Vec::new() }
    }

    #[test]
    fn perfect_inputs_score_near_one() {
        let inputs = ConfidenceInputs {
            validation: passing_validation(),
            quality_score: 1.0,
            agent_health: 1.0,
            iteration: 0,
            max_iterations: 5,
            historical_success_rate: 1.0,
        };
        let result = score(&inputs, &Weights::default());
        assert!((result.value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn failed_validation_caps_score_below_weight_sans_validator() {
        let inputs = ConfidenceInputs {
            validation: ValidationOutcome {
                ok: false,
                violations: vec![],
            },
            quality_score: 1.0,
            agent_health: 1.0,
            iteration: 0,
            max_iterations: 5,
            historical_success_rate: 1.0,
        };
        let weights = Weights::default();
        let result = score(&inputs, &weights);
        assert!((1.0 - result.value - weights.validator_pass).abs() < 1e-9);
    }

    #[test]
    fn iteration_pressure_decays_to_zero_at_max() {
        assert_eq!(iteration_pressure(5, 5), 0.0);
        assert_eq!(iteration_pressure(0, 5), 1.0);
        assert!((iteration_pressure(2, 4) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn late_iteration_scores_lower_than_early_otherwise_equal() {
        let mut inputs = ConfidenceInputs {
            validation: passing_validation(),
            quality_score: 0.8,
            agent_health: 1.0,
            iteration: 0,
            max_iterations: 5,
            historical_success_rate: 0.8,
        };
        let weights = Weights::default();
        let early = score(&inputs, &weights).value;
        inputs.iteration = 4;
        let late = score(&inputs, &weights).value;
        assert!(late < early);
    }
}
