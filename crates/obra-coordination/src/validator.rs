//! Response Validator — Stage 1, cheap format/completeness gate
//! (spec §4.7).
//!
//! Runs before the Quality Controller; must never perform network or LLM
//! calls. Grounded on the teacher's `Validator::validate` pass/fail shape
//! (`validator.rs`), generalized from a single PASS/FAIL line into a
//! structured set of violations so the Decision Engine can act on
//! specific gaps rather than a single boolean.

use serde::{Deserialize, Serialize};

/// A required section the prompt's structured header declared, checked
/// for presence in the response.
#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub required_sections: Vec<String>,
    pub min_length: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            required_sections: Vec::new(),
            min_length: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Violation {
    Empty,
    TooShort { min: usize, actual: usize },
    MissingSection(String),
    UnbalancedCodeFences,
    UnparseableSchemaField(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    pub fn violation_summaries(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| match v {
                Violation::Empty => "response was empty".to_string(),
                Violation::TooShort { min, actual } => {
                    format!("response too short: {actual} chars, minimum {min}")
                }
                Violation::MissingSection(name) => format!("missing required section: {name}"),
                Violation::UnbalancedCodeFences => "unbalanced code fences".to_string(),
                Violation::UnparseableSchemaField(field) => {
                    format!("could not parse declared schema field: {field}")
                }
            })
            .collect()
    }
}

pub struct ResponseValidator;

impl ResponseValidator {
    pub fn validate(response: &str, rules: &ValidationRules) -> ValidationOutcome {
        let mut violations = Vec::new();

        if response.trim().is_empty() {
            violations.push(Violation::Empty);
        } else if response.len() < rules.min_length {
            violations.push(Violation::TooShort {
                min: rules.min_length,
                actual: response.len(),
            });
        }

        for section in &rules.required_sections {
            if !response.contains(section.as_str()) {
                violations.push(Violation::MissingSection(section.clone()));
            }
        }

        let fence_count = response.matches("```").count();
        if fence_count % 2 != 0 {
            violations.push(Violation::UnbalancedCodeFences);
        }

        ValidationOutcome {
            ok: violations.is_empty(),
            violations,
        }
    }
}
