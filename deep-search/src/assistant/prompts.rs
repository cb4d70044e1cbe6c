pub const DEFAULT_SYSTEM_INSTRUCTION: &str = r#"You are a research assistant that helps users by finding and synthesizing information from the web.
Provide comprehensive, accurate and well-sourced information.
When combining multiple sources, integrate the information logically.
Always cite your sources."#;

pub const QUERY_PLANNER_INSTRUCTIONS: &str = r#"Given the research topic: "{research_topic}"
Generate {query_count} specific and diverse search engine queries that, when researched individually,
would together give a comprehensive and well-structured explanation of the topic.
Each query should cover a distinct facet: definitions, core concepts, history, examples, benefits, drawbacks, applications or related topics.
Do not repeat a facet.

Output ONLY the queries, one per line, with no numbering and no other text."#;

pub const REPORT_WRITER_INSTRUCTIONS: &str = r#"**Original Research Topic:**
{research_topic}

**Search Queries Used:**
{queries}

**Context Gathered from Web Search:**
--- START CONTEXT ---
{context}
--- END CONTEXT ---

**Task:**
Write a detailed, comprehensive and engaging report that directly addresses the research topic.
Base the report exclusively on the context above and do not introduce outside knowledge.

**Instructions:**
1. Organize the report with clear markdown sections (# for main headings, ## for subheadings).
2. Explain each concept in depth, covering the how and the why found in the context.
3. Cite the source URL immediately after the information it supports.
4. If the context lacks detail on an aspect of the topic, say so explicitly.

Write the report now."#;

pub const FOLLOW_UP_INSTRUCTIONS: &str = r#"You previously researched the topic below and wrote the report that follows.
Answer the user's latest question using the report and the conversation so far.
If the report does not cover the question, say so rather than guessing.

**Research Topic:**
{research_topic}

**Report:**
--- START REPORT ---
{report}
--- END REPORT ---

**Conversation So Far:**
{history}

**Latest Question:**
{question}

Answer:"#;

pub fn format_query_planner_instructions(research_topic: &str, query_count: usize) -> String {
    QUERY_PLANNER_INSTRUCTIONS
        .replace("{research_topic}", research_topic)
        .replace("{query_count}", &query_count.to_string())
}

pub fn format_report_instructions(research_topic: &str, queries: &[String], context: &str) -> String {
    let queries = queries
        .iter()
        .map(|q| format!("- {}", q))
        .collect::<Vec<_>>()
        .join("\n");
    REPORT_WRITER_INSTRUCTIONS
        .replace("{research_topic}", research_topic)
        .replace("{queries}", &queries)
        .replace("{context}", context)
}

pub fn format_follow_up_instructions(
    research_topic: &str,
    report: &str,
    history: &str,
    question: &str,
) -> String {
    let history = if history.is_empty() { "(none)" } else { history };
    FOLLOW_UP_INSTRUCTIONS
        .replace("{research_topic}", research_topic)
        .replace("{report}", report)
        .replace("{history}", history)
        .replace("{question}", question)
}

/// Prepends the system instruction to a task prompt.
pub fn with_system_instruction(system_instruction: &str, prompt: &str) -> String {
    format!("{}\n\n{}", system_instruction.trim(), prompt)
}
