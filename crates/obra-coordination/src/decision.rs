//! Decision Engine — Stage 4, the pure first-match-wins ladder that
//! turns validator/quality/confidence output into one `Action` (spec
//! §4.10).
//!
//! Grounded on `escalation/engine.rs::decide` — already a deterministic,
//! no-LLM-calls function consuming a report plus state to produce a
//! decision enum — re-targeted here from tier-routing to
//! accept/retry/clarify/escalate/stop.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct Thresholds {
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub accept_quality: f64,
    pub retry_cap: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_confidence: 0.85,
            medium_confidence: 0.65,
            accept_quality: 0.7,
            retry_cap: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionState {
    pub iteration: u32,
    pub max_iterations: u32,
    pub consecutive_retries: u32,
    pub stop_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Accept,
    Retry { feedback: Vec<String> },
    Clarify { feedback: Vec<String> },
    Escalate { reason: String },
    Stop,
}

/// Pure decision function (spec §4.10). Never performs I/O and never
/// consults anything beyond its arguments, so it is trivially unit
/// testable and safe to call from the Iteration Driver without a retry
/// wrapper of its own.
pub fn decide(
    validator_ok: bool,
    validator_feedback: &[String],
    quality_score: f64,
    quality_feedback: &[String],
    confidence: f64,
    state: &DecisionState,
    thresholds: &Thresholds,
) -> Action {
    if state.stop_requested {
        return Action::Stop;
    }

    if state.iteration >= state.max_iterations {
        return Action::Escalate {
            reason: "max iterations".to_string(),
        };
    }

    if !validator_ok {
        if state.consecutive_retries >= thresholds.retry_cap {
            return Action::Escalate {
                reason: "retry cap exceeded after validator rejection".to_string(),
            };
        }
        return Action::Retry {
            feedback: validator_feedback.to_vec(),
        };
    }

    if confidence >= thresholds.high_confidence && quality_score >= thresholds.accept_quality {
        return Action::Accept;
    }

    if confidence >= thresholds.medium_confidence {
        return Action::Clarify {
            feedback: quality_feedback.to_vec(),
        };
    }

    Action::Escalate {
        reason: "confidence below medium threshold".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DecisionState {
        DecisionState {
            iteration: 1,
            max_iterations: 5,
            consecutive_retries: 0,
            stop_requested: false,
        }
    }

    #[test]
    fn stop_command_wins_over_everything_else() {
        let mut s = state();
        s.stop_requested = true;
        let action = decide(false, &[], 0.0, &[], 0.0, &s, &Thresholds::default());
        assert_eq!(action, Action::Stop);
    }

    #[test]
    fn max_iterations_escalates_before_validator_check() {
        let mut s = state();
        s.iteration = 5;
        let action = decide(false, &[], 0.0, &[], 0.0, &s, &Thresholds::default());
        assert_eq!(
            action,
            Action::Escalate { reason: "max iterations".to_string() }
        );
    }

    #[test]
    fn validator_rejection_retries_under_cap() {
        let s = state();
        let action = decide(
            false,
            &["missing section".to_string()],
            0.0,
            &[],
            0.0,
            &s,
            &Thresholds::default(),
        );
        assert_eq!(
            action,
            Action::Retry { feedback: vec!["missing section".to_string()] }
        );
    }

    #[test]
    fn validator_rejection_escalates_at_retry_cap() {
        let mut s = state();
        s.consecutive_retries = 3;
        let action = decide(false, &[], 0.0, &[], 0.0, &s, &Thresholds::default());
        assert!(matches!(action, Action::Escalate { .. }));
    }

    #[test]
    fn high_confidence_and_quality_accepts() {
        let s = state();
        let action = decide(true, &[], 0.9, &[], 0.9, &s, &Thresholds::default());
        assert_eq!(action, Action::Accept);
    }

    #[test]
    fn high_confidence_but_low_quality_does_not_accept() {
        let s = state();
        let action = decide(true, &[], 0.5, &[], 0.9, &s, &Thresholds::default());
        assert_eq!(action, Action::Clarify { feedback: vec![] });
    }

    #[test]
    fn medium_confidence_clarifies_with_quality_feedback() {
        let s = state();
        let action = decide(
            true,
            &[],
            0.9,
            &["add doctest".to_string()],
            0.7,
            &s,
            &Thresholds::default(),
        );
        assert_eq!(
            action,
            Action::Clarify { feedback: vec!["add doctest".to_string()] }
        );
    }

    #[test]
    fn low_confidence_escalates() {
        let s = state();
        let action = decide(true, &[], 0.9, &[], 0.3, &s, &Thresholds::default());
        assert!(matches!(action, Action::Escalate { .. }));
    }
}
