use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use super::error::FailureReason;
use super::utils::unix_timestamp;

/// Which connector produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Web,
    Encyclopedia,
}

/// A reference to a piece of content found for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub origin: Origin,
    /// The query that surfaced this result.
    pub query: String,
}

impl SourceResult {
    /// Encyclopedia results that already carry their article text are used
    /// as-is; everything else has to be downloaded.
    pub fn needs_fetch(&self) -> bool {
        self.origin != Origin::Encyclopedia || self.snippet.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Ok,
    Failed,
    Skipped,
}

/// Cleaned text for one `SourceResult`, or the reason there is none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedDocument {
    pub source: SourceResult,
    pub text: Option<String>,
    pub status: ExtractionStatus,
    pub reason: Option<String>,
}

impl ExtractedDocument {
    pub fn ok(source: SourceResult, text: String) -> Self {
        Self {
            source,
            text: Some(text),
            status: ExtractionStatus::Ok,
            reason: None,
        }
    }

    pub fn failed(source: SourceResult, reason: impl Into<String>) -> Self {
        Self {
            source,
            text: None,
            status: ExtractionStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(source: SourceResult, reason: impl Into<String>) -> Self {
        Self {
            source,
            text: None,
            status: ExtractionStatus::Skipped,
            reason: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExtractionStatus::Ok
    }
}

/// Final synthesized narrative plus the URLs it was built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub body: String,
    pub sources: Vec<String>,
}

impl Report {
    /// Markdown export with a numbered source list.
    pub fn to_markdown(&self, topic: &str) -> String {
        let mut out = format!("# {}\n\n{}\n", topic.trim(), self.body.trim());
        if !self.sources.is_empty() {
            out.push_str("\n## Sources\n\n");
            for (i, url) in self.sources.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, url));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Orchestrator state machine position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumAsInner)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Planning,
    Searching,
    Extracting,
    Synthesizing,
    Done,
    Failed(FailureReason),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Planning => "planning",
            Phase::Searching => "searching",
            Phase::Extracting => "extracting",
            Phase::Synthesizing => "synthesizing",
            Phase::Done => "done",
            Phase::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ok / failed / skipped tallies shown alongside a report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionCounts {
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Everything one research run accumulated. Owned by that run alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchContext {
    /// Run id. Tags every `StatusUpdate` and keys the server session.
    pub id: Uuid,
    pub started_at: u64,
    pub topic: String,
    pub queries: Vec<String>,
    pub documents: Vec<ExtractedDocument>,
    pub sources: Vec<String>,
    pub report: Option<Report>,
    pub phase: Phase,
}

impl ResearchContext {
    pub fn with_topic(topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: unix_timestamp(),
            topic: topic.into(),
            queries: Vec::new(),
            documents: Vec::new(),
            sources: Vec::new(),
            report: None,
            phase: Phase::Idle,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn ok_documents(&self) -> impl Iterator<Item = &ExtractedDocument> {
        self.documents.iter().filter(|d| d.is_ok())
    }

    pub fn counts(&self) -> ExtractionCounts {
        self.documents
            .iter()
            .fold(ExtractionCounts::default(), |mut acc, doc| {
                match doc.status {
                    ExtractionStatus::Ok => acc.ok += 1,
                    ExtractionStatus::Failed => acc.failed += 1,
                    ExtractionStatus::Skipped => acc.skipped += 1,
                }
                acc
            })
    }

    /// Distinct URLs of the Ok documents, in document order.
    pub fn ok_source_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.ok_documents()
            .filter(|d| seen.insert(d.source.url.as_str()))
            .map(|d| d.source.url.clone())
            .collect()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.phase.as_failed()
    }

    pub fn is_done(&self) -> bool {
        self.phase.is_done()
    }
}

/// A finished run plus the follow-up conversation held against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    pub context: ResearchContext,
    pub history: Vec<ConversationTurn>,
}

impl ResearchSession {
    pub fn new(context: ResearchContext) -> Self {
        Self {
            context,
            history: Vec::new(),
        }
    }
}

/// Progress event broadcast on every phase transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub run_id: Uuid,
    pub phase: String,
    pub message: String,
    pub timestamp: u64,
    pub detail: Option<String>,
}
