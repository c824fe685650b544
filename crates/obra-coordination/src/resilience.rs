//! Degraded-mode response wrapper, carried from the teacher's
//! `resilience.rs` tool-failure idiom and repurposed for the Quality
//! Controller's "LLM call failure is itself a quality signal" rule
//! (spec §4.8): instead of propagating the LLM error, downstream stages
//! see a low-confidence score with a warning attached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DegradationLevel {
    Full,
    Partial,
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedResponse<T> {
    pub payload: T,
    pub level: DegradationLevel,
    pub confidence: f64,
    pub served_by: String,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> DegradedResponse<T> {
    pub fn full(payload: T, served_by: &str) -> Self {
        Self {
            payload,
            level: DegradationLevel::Full,
            confidence: 1.0,
            served_by: served_by.to_string(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn partial(payload: T, served_by: &str, confidence: f64, warning: &str) -> Self {
        Self {
            payload,
            level: DegradationLevel::Partial,
            confidence: confidence.clamp(0.0, 1.0),
            served_by: served_by.to_string(),
            warnings: vec![warning.to_string()],
            timestamp: Utc::now(),
        }
    }

    pub fn unavailable(payload: T, warning: &str) -> Self {
        Self {
            payload,
            level: DegradationLevel::Unavailable,
            confidence: 0.0,
            served_by: "none".to_string(),
            warnings: vec![warning.to_string()],
            timestamp: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.level != DegradationLevel::Full
    }
}
