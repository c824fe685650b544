//! Prompt Builder — turns a built context into the text sent to the
//! executor agent (spec §4.6).
//!
//! Grounded on `debate/orchestrator.rs`'s pattern of wrapping structured
//! facts (`CoderOutput`, `ReviewerOutput`) in a prose turn description:
//! here, a fixed structured header (work item id, required sections,
//! feedback-from-last-decision) precedes a prose body built from the
//! Context Builder's rendered sections.

use obra_coordination::decision::Action;

use crate::context::BuiltContext;

#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    pub required_sections: Vec<String>,
    pub feedback: Vec<String>,
}

pub struct PromptBuilder;

impl PromptBuilder {
    /// Builds the prompt for a fresh iteration (no prior feedback to
    /// inject).
    pub fn initial(context: &BuiltContext, options: &PromptOptions) -> String {
        Self::compose(context, options, None)
    }

    /// Builds a follow-up prompt carrying `last_action`'s feedback
    /// (validator violations on retry, quality issues on clarify).
    pub fn follow_up(context: &BuiltContext, options: &PromptOptions, last_action: &Action) -> String {
        Self::compose(context, options, Some(last_action))
    }

    fn compose(context: &BuiltContext, options: &PromptOptions, last_action: Option<&Action>) -> String {
        let mut header = String::new();
        if !options.required_sections.is_empty() {
            header.push_str("Required response sections: ");
            header.push_str(&options.required_sections.join(", "));
            header.push('\n');
        }

        let feedback = match last_action {
            Some(Action::Retry { feedback }) | Some(Action::Clarify { feedback }) => feedback.clone(),
            _ => options.feedback.clone(),
        };
        if !feedback.is_empty() {
            header.push_str("Address the following before continuing:\n");
            for item in &feedback {
                header.push_str("- ");
                header.push_str(item);
                header.push('\n');
            }
        }

        let body = context.render();
        if header.is_empty() {
            body
        } else {
            format!("{header}\n{body}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Section;

    fn context() -> BuiltContext {
        BuiltContext {
            sections: vec![Section {
                name: "work item".to_string(),
                priority: 0,
                content: "1: do the thing\ndescription".to_string(),
            }],
            dropped: vec![],
        }
    }

    #[test]
    fn initial_prompt_has_no_feedback_header_by_default() {
        let prompt = PromptBuilder::initial(&context(), &PromptOptions::default());
        assert!(!prompt.contains("Address the following"));
        assert!(prompt.contains("do the thing"));
    }

    #[test]
    fn follow_up_injects_retry_feedback() {
        let action = Action::Retry { feedback: vec!["missing summary section".to_string()] };
        let prompt = PromptBuilder::follow_up(&context(), &PromptOptions::default(), &action);
        assert!(prompt.contains("Address the following"));
        assert!(prompt.contains("missing summary section"));
    }

    #[test]
    fn required_sections_are_listed_in_header() {
        let options = PromptOptions {
            required_sections: vec!["## Summary".to_string()],
            feedback: vec![],
        };
        let prompt = PromptBuilder::initial(&context(), &options);
        assert!(prompt.contains("Required response sections: ## Summary"));
    }
}
