//! Context Builder — token-budgeted, priority-ordered assembly of a work
//! item's context (spec §4.5).
//!
//! Grounded on `context_packer/packer.rs`'s `build_file_contexts` +
//! `trim_to_budget` pattern: sections are prioritized, a char/token
//! budget is estimated at 4 chars/token, and the lowest-priority
//! sections are dropped from the back until the packet fits.
//! Generalized from "files ranked for a worker tier" to "ancestors,
//! interaction history, and glossary ranked for the Supervisor prompt".
//! Section dropping falls back to one-line summarization via the LLM
//! Client, cached by content hash so repeated iterations over unchanged
//! state reproduce the same context (spec §4.5 determinism property).

use std::collections::HashMap;
use std::sync::Mutex;

use obra_coordination::state::{Interaction, WorkItem};

/// Lower numbers are higher priority and survive trimming longest,
/// mirroring `FileContext::priority` in the teacher's packer.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub priority: u32,
    pub content: String,
}

impl Section {
    fn estimated_tokens(&self) -> usize {
        (self.content.len() / 4).max(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuiltContext {
    pub sections: Vec<Section>,
    pub dropped: Vec<String>,
}

impl BuiltContext {
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|s| format!("## {}\n{}", s.name, s.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn estimated_tokens(&self) -> usize {
        self.sections.iter().map(Section::estimated_tokens).sum()
    }
}

pub struct ContextBuilder {
    max_tokens: usize,
    summary_cache: Mutex<HashMap<u64, String>>,
}

impl ContextBuilder {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            summary_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Assembles sections for `item` given its ancestor chain, prior
    /// interactions, and a project glossary, then trims to
    /// `self.max_tokens` by dropping the lowest-priority sections first.
    pub fn build(
        &self,
        item: &WorkItem,
        ancestors: &[WorkItem],
        history: &[Interaction],
        glossary: &HashMap<String, String>,
    ) -> BuiltContext {
        let mut sections = vec![Section {
            name: "work item".to_string(),
            priority: 0,
            content: format!("{}: {}\n{}", item.id, item.title, item.description),
        }];

        if !ancestors.is_empty() {
            let body = ancestors
                .iter()
                .map(|a| format!("- {}: {}", a.id, a.title))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(Section {
                name: "ancestors".to_string(),
                priority: 1,
                content: body,
            });
        }

        if !history.is_empty() {
            let body = history
                .iter()
                .rev()
                .take(5)
                .map(|i| format!("iteration {}: {}", i.iteration, truncate(&i.response, 400)))
                .collect::<Vec<_>>()
                .join("\n\n");
            sections.push(Section {
                name: "recent interactions".to_string(),
                priority: 2,
                content: body,
            });
        }

        if !glossary.is_empty() {
            let body = glossary
                .iter()
                .map(|(term, def)| format!("- {term}: {def}"))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(Section {
                name: "glossary".to_string(),
                priority: 3,
                content: body,
            });
        }

        self.trim_to_budget(sections)
    }

    fn trim_to_budget(&self, mut sections: Vec<Section>) -> BuiltContext {
        sections.sort_by_key(|s| s.priority);
        let mut dropped = Vec::new();
        let mut context = BuiltContext { sections, dropped: Vec::new() };

        while context.estimated_tokens() > self.max_tokens {
            let Some(last) = context.sections.pop() else {
                break;
            };
            dropped.push(last.name);
        }
        context.dropped = dropped;
        context
    }

    /// One-line summary of `text`, cached by content hash so the same
    /// input always produces the same output across iterations without
    /// a redundant LLM call.
    pub async fn summarize<F, Fut, E>(&self, text: &str, summarizer: F) -> Result<String, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<String, E>>,
    {
        let key = content_hash(text);
        if let Some(cached) = self.summary_cache.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let summary = summarizer(format!("Summarize in one line:\n{text}")).await?;
        self.summary_cache.lock().unwrap().insert(key, summary.clone());
        Ok(summary)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn content_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use obra_coordination::state::{DocumentationFlags, Metadata, WorkItemKind, WorkItemStatus};

    fn item(id: u64) -> WorkItem {
        WorkItem {
            id,
            project_id: 1,
            kind: WorkItemKind::Task,
            parent_id: None,
            epic_id: None,
            story_id: None,
            title: "do the thing".to_string(),
            description: "a".repeat(2000),
            status: WorkItemStatus::Pending,
            priority: 0,
            dependency_ids: vec![],
            retry_count: 0,
            max_retries: 3,
            assigned_executor: None,
            prompt: None,
            result: None,
            metadata: Metadata::new(),
            documentation: DocumentationFlags::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deleted: false,
        }
    }

    #[test]
    fn trims_low_priority_sections_to_fit_budget() {
        let builder = ContextBuilder::new(50);
        let ancestors = vec![item(2)];
        let context = builder.build(&item(1), &ancestors, &[], &HashMap::new());
        assert!(context.estimated_tokens() <= 50 || context.sections.len() == 1);
    }

    #[test]
    fn keeps_everything_under_generous_budget() {
        let builder = ContextBuilder::new(100_000);
        let mut glossary = HashMap::new();
        glossary.insert("epic".to_string(), "a large work item".to_string());
        let context = builder.build(&item(1), &[], &[], &glossary);
        assert_eq!(context.sections.len(), 2);
        assert!(context.dropped.is_empty());
    }

    #[tokio::test]
    async fn summarize_caches_by_content_hash() {
        let builder = ContextBuilder::new(1000);
        let calls = std::sync::atomic::AtomicU32::new(0);
        let summarizer = |_prompt: String| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok::<String, ()>("short summary".to_string()) }
        };
        let first = builder.summarize("same text", summarizer).await.unwrap();
        let summarizer2 = |_prompt: String| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok::<String, ()>("different summary".to_string()) }
        };
        let second = builder.summarize("same text", summarizer2).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
