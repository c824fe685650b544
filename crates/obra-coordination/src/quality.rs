//! Quality Controller — Stage 2, LLM-assisted review of a response that
//! already passed the Response Validator (spec §4.8).
//!
//! Grounded on the teacher's issue-categorization shape in
//! `verifier/report.rs` (a list of `(category, severity, note)` findings)
//! and on its fallback-on-failure idiom in `resilience.rs`: if the
//! review call itself fails, that failure is wrapped as a
//! [`crate::resilience::DegradedResponse`] with a floored score rather
//! than propagated as a hard error, per spec §4.8's "an LLM failure is
//! itself a quality signal" rule.

use serde::{Deserialize, Serialize};

use crate::resilience::DegradedResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueSeverity {
    Minor,
    Moderate,
    Major,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub category: String,
    pub severity: IssueSeverity,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub issues: Vec<Issue>,
}

impl QualityReport {
    /// The floor applied when the review call itself degrades, so a
    /// single LLM hiccup cannot silently read as "flawless response".
    pub const DEGRADED_FLOOR: f64 = 0.4;

    pub fn has_blocking_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity == IssueSeverity::Major)
    }
}

/// Parses the Supervisor LLM's quality-review output. The wire shape is
/// deliberately simple — one issue per line, `category|severity|note` —
/// mirroring the teacher's plain-text report parsing rather than asking
/// the model for nested JSON it regularly gets wrong.
pub fn parse_review(raw: &str) -> QualityReport {
    let mut issues = Vec::new();
    let mut score = 1.0;

    for line in raw.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("score:") {
            if let Ok(parsed) = rest.trim().parse::<f64>() {
                score = parsed.clamp(0.0, 1.0);
            }
            continue;
        }
        let mut parts = line.splitn(3, '|');
        let (Some(category), Some(severity), Some(note)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let severity = match severity.trim().to_ascii_lowercase().as_str() {
            "major" => IssueSeverity::Major,
            "moderate" => IssueSeverity::Moderate,
            _ => IssueSeverity::Minor,
        };
        issues.push(Issue {
            category: category.trim().to_string(),
            severity,
            note: note.trim().to_string(),
        });
    }

    QualityReport { score, issues }
}

/// Wraps a quality review round. `reviewer` is expected to be a thin
/// closure over an `LlmClient::generate` call; kept generic here so this
/// module stays free of the `LlmClient` trait's async machinery and
/// network dependencies.
pub async fn review<F, Fut, E>(
    response: &str,
    reviewer: F,
) -> DegradedResponse<QualityReport>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<String, E>>,
    E: std::fmt::Display,
{
    let prompt = build_review_prompt(response);
    match reviewer(prompt).await {
        Ok(raw) => DegradedResponse::full(parse_review(&raw), "quality-controller"),
        Err(err) => DegradedResponse::partial(
            QualityReport {
                score: QualityReport::DEGRADED_FLOOR,
                issues: vec![Issue {
                    category: "review-unavailable".to_string(),
                    severity: IssueSeverity::Moderate,
                    note: format!("quality review call failed: {err}"),
                }],
            },
            "quality-controller",
            QualityReport::DEGRADED_FLOOR,
            "quality review call failed; score floored rather than withheld",
        ),
    }
}

fn build_review_prompt(response: &str) -> String {
    format!(
        "Review the following agent response for correctness, completeness, \
         and adherence to the stated task. Reply with a `score: <0-1>` line \
         followed by zero or more `category|severity|note` issue lines.\n\n---\n{response}\n---\n"
    )
}
