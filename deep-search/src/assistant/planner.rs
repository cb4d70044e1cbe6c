use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::configuration::GenerationConfig;
use super::error::ModelError;
use super::model::GenerativeModel;
use super::prompts::{format_query_planner_instructions, with_system_instruction};
use super::utils::strip_think_tags;

/// Turns a topic into search-engine-style queries, one per facet.
pub struct QueryPlanner {
    model: Arc<dyn GenerativeModel>,
    generation: GenerationConfig,
    system_instruction: String,
}

impl QueryPlanner {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        generation: GenerationConfig,
        system_instruction: String,
    ) -> Self {
        Self {
            model,
            generation,
            system_instruction,
        }
    }

    /// Never returns an empty list: unusable model output falls back to the topic.
    /// Only a failed model call is an error.
    pub async fn plan(&self, topic: &str, count: usize) -> Result<Vec<String>, ModelError> {
        let prompt = with_system_instruction(
            &self.system_instruction,
            &format_query_planner_instructions(topic, count),
        );
        let response = self.model.generate(&prompt, &self.generation).await?;

        let queries = parse_queries(&response, topic, count);
        info!(topic, count = queries.len(), "planned search queries");
        Ok(queries)
    }
}

/// Parses model output into queries.
///
/// Accepts a JSON array of strings (optionally fenced, optionally wrapped in
/// prose) or a line list. Bullets,
/// numbering and quotes are stripped; blank lines, `:`-terminated headings and
/// case-insensitive duplicates are dropped. At most `count` queries are kept,
/// and an empty result becomes `[topic]`.
pub fn parse_queries(raw: &str, topic: &str, count: usize) -> Vec<String> {
    let cleaned = strip_code_fence(&strip_think_tags(raw));

    let candidates: Vec<String> = json_array(&cleaned)
        .unwrap_or_else(|| cleaned.lines().map(str::to_string).collect());

    let mut seen = HashSet::new();
    let mut queries: Vec<String> = candidates
        .iter()
        .map(|line| clean_line(line))
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .filter(|line| seen.insert(line.to_lowercase()))
        .take(count.max(1))
        .collect();

    if queries.is_empty() {
        warn!(topic, "model output held no usable queries, falling back to the topic");
        queries.push(topic.trim().to_string());
    }
    queries
}

/// The whole text, or its outermost `[...]` span, as a JSON string array.
fn json_array(text: &str) -> Option<Vec<String>> {
    if let Ok(list) = serde_json::from_str(text) {
        return Some(list);
    }
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
        .to_string()
}

fn clean_line(line: &str) -> String {
    let mut s = line.trim();

    // Bullets.
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = s.strip_prefix(bullet) {
            s = rest.trim_start();
        }
    }

    // Numbering: "1." "2)" "10 -".
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &s[digits..];
        if let Some(rest) = rest
            .strip_prefix('.')
            .or_else(|| rest.strip_prefix(')'))
            .or_else(|| rest.strip_prefix(" -"))
        {
            s = rest.trim_start();
        }
    }

    s.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(',')
        .trim_matches('"')
        .trim()
        .to_string()
}
