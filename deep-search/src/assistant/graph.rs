use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::chat::FollowUpChat;
use super::configuration::Configuration;
use super::connectors::{build_http_client, DuckDuckGoSearch, SourceConnector, WikipediaConnector};
use super::error::{ChatError, ConfigurationError, ExtractionError, FailureReason, ModelError};
use super::extractor::{ContentExtractor, HttpFetcher, PageFetcher};
use super::model::{build_model, GenerativeModel};
use super::planner::QueryPlanner;
use super::prompts::{
    format_report_instructions, with_system_instruction, DEFAULT_SYSTEM_INSTRUCTION,
};
use super::state::{
    ConversationTurn, ExtractedDocument, Phase, Report, ResearchContext, SourceResult,
    StatusUpdate,
};
use super::utils::{format_documents, format_sources, strip_think_tags, unix_timestamp};

/// Sequences planning, searching, extraction and synthesis for one topic at a
/// time, then serves follow-up questions against the result.
///
/// A graph holds no per-run state; every `research` call owns a fresh
/// `ResearchContext`, so one graph can serve concurrent runs.
pub struct ResearchGraph {
    config: Configuration,
    model: Arc<dyn GenerativeModel>,
    planner: QueryPlanner,
    connectors: Vec<Arc<dyn SourceConnector>>,
    extractor: ContentExtractor,
    chat: FollowUpChat,
    system_instruction: String,
    status_tx: Option<Sender<StatusUpdate>>,
}

impl ResearchGraph {
    /// Wires the real model backend, DuckDuckGo, Wikipedia and the HTTP fetcher.
    pub fn new(config: Configuration) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let model = build_model(&config)?;
        let client = build_http_client(config.call_timeout())
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        let connectors: Vec<Arc<dyn SourceConnector>> = vec![
            Arc::new(DuckDuckGoSearch::from_config(client.clone(), &config)),
            Arc::new(WikipediaConnector::from_config(client.clone(), &config)),
        ];
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(client));

        Ok(Self::with_components(config, model, connectors, fetcher))
    }

    /// Builds a graph around caller-supplied collaborators.
    pub fn with_components(
        config: Configuration,
        model: Arc<dyn GenerativeModel>,
        connectors: Vec<Arc<dyn SourceConnector>>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let system_instruction = config
            .system_instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());

        Self {
            planner: QueryPlanner::new(
                model.clone(),
                config.planning_generation(),
                system_instruction.clone(),
            ),
            chat: FollowUpChat::new(
                model.clone(),
                config.report_generation(),
                system_instruction.clone(),
            ),
            extractor: ContentExtractor::new(fetcher, config.max_content_length),
            model,
            connectors,
            system_instruction,
            status_tx: None,
            config,
        }
    }

    pub fn set_status_sender(&mut self, tx: Sender<StatusUpdate>) {
        self.status_tx = Some(tx);
    }

    /// Runs the whole pipeline. The returned context is either `Done` with a
    /// report or `Failed` with a reason and whatever was gathered so far.
    pub async fn research(&self, topic: &str) -> ResearchContext {
        self.research_with_cancel(topic, &CancellationToken::new()).await
    }

    /// Like `research`, checking `cancel` at every phase boundary.
    pub async fn research_with_cancel(
        &self,
        topic: &str,
        cancel: &CancellationToken,
    ) -> ResearchContext {
        self.run(ResearchContext::with_topic(topic.trim()), cancel).await
    }

    /// Runs under a caller-chosen id, so status subscribers can pick out
    /// this run's events before it returns.
    pub async fn research_with_id(
        &self,
        run_id: Uuid,
        topic: &str,
        cancel: &CancellationToken,
    ) -> ResearchContext {
        self.run(ResearchContext::with_topic(topic.trim()).with_id(run_id), cancel)
            .await
    }

    async fn run(&self, mut ctx: ResearchContext, cancel: &CancellationToken) -> ResearchContext {
        info!(run_id = %ctx.id, topic = %ctx.topic, "starting research");

        // Planning
        if self.cancelled(&mut ctx, cancel) {
            return ctx;
        }
        self.transition(&mut ctx, Phase::Planning, "Generating search queries...", None);
        if ctx.topic.is_empty() {
            self.fail(&mut ctx, FailureReason::InvalidTopic);
            return ctx;
        }
        let planned = self
            .with_model_timeout(self.planner.plan(&ctx.topic, self.config.query_count))
            .await;
        match planned {
            Ok(queries) if !queries.is_empty() => ctx.queries = queries,
            Ok(_) => {
                self.fail(&mut ctx, FailureReason::NoQueries);
                return ctx;
            }
            Err(e) => {
                self.fail(&mut ctx, FailureReason::ModelUnavailable(e.to_string()));
                return ctx;
            }
        }

        // Searching
        if self.cancelled(&mut ctx, cancel) {
            return ctx;
        }
        let message = format!("Searching {} queries...", ctx.queries.len());
        let detail = ctx.queries.join("\n");
        self.transition(&mut ctx, Phase::Searching, &message, Some(detail));
        let pool = self.search_all(&ctx.queries).await;
        info!(topic = %ctx.topic, results = pool.len(), "search finished");

        // Extracting
        if self.cancelled(&mut ctx, cancel) {
            return ctx;
        }
        let sources: Vec<String> = pool.iter().map(|s| s.url.clone()).collect();
        self.transition(
            &mut ctx,
            Phase::Extracting,
            &format!("Extracting content from {} sources...", pool.len()),
            Some(format_sources(&sources)),
        );
        ctx.documents = self.extract_all(pool).await;
        ctx.sources = ctx.ok_source_urls();
        let counts = ctx.counts();
        info!(
            topic = %ctx.topic,
            ok = counts.ok,
            failed = counts.failed,
            skipped = counts.skipped,
            "extraction finished"
        );

        // Synthesizing
        if self.cancelled(&mut ctx, cancel) {
            return ctx;
        }
        self.transition(
            &mut ctx,
            Phase::Synthesizing,
            &format!("Writing report from {} documents...", counts.ok),
            None,
        );
        if counts.ok == 0 {
            self.fail(&mut ctx, FailureReason::NoUsableContent);
            return ctx;
        }
        match self.synthesize(&ctx).await {
            Ok(report) => ctx.report = Some(report),
            Err(e) => {
                self.fail(&mut ctx, FailureReason::ModelUnavailable(e.to_string()));
                return ctx;
            }
        }

        let message = format!(
            "Research complete: {} sources used, {} failed, {} skipped",
            counts.ok, counts.failed, counts.skipped
        );
        self.transition(&mut ctx, Phase::Done, &message, None);
        ctx
    }

    /// Answers a follow-up question. Only a successful answer touches `history`.
    pub async fn continue_chat(
        &self,
        context: &ResearchContext,
        history: &mut Vec<ConversationTurn>,
        question: &str,
    ) -> Result<ConversationTurn, ChatError> {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, self.chat.ask(context, history, question)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Model(ModelError::Timeout(timeout.as_secs()))),
        }
    }

    async fn search_all(&self, queries: &[String]) -> Vec<SourceResult> {
        let per_query: Vec<Vec<SourceResult>> = stream::iter(queries.to_vec())
            .map(|query| async move { self.search_one(&query).await })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        // First occurrence of a URL wins.
        let mut seen = HashSet::new();
        per_query
            .into_iter()
            .flatten()
            .filter(|result| seen.insert(result.url.clone()))
            .collect()
    }

    async fn search_one(&self, query: &str) -> Vec<SourceResult> {
        let timeout = self.config.call_timeout();
        let calls = self.connectors.iter().map(|connector| async move {
            match tokio::time::timeout(timeout, connector.search(query)).await {
                Ok(results) => results,
                Err(_) => {
                    warn!(query, origin = ?connector.origin(), "connector timed out");
                    Vec::new()
                }
            }
        });
        let results: Vec<SourceResult> = join_all(calls).await.into_iter().flatten().collect();
        debug!(query, results = results.len(), "collected results for query");
        results
    }

    async fn extract_all(&self, pool: Vec<SourceResult>) -> Vec<ExtractedDocument> {
        let budget = self.config.max_extractions;
        let timeout = self.config.call_timeout();

        // Only downloads count against the budget.
        let mut attempts = 0;
        let planned: Vec<(SourceResult, bool)> = pool
            .into_iter()
            .map(|source| {
                if !source.needs_fetch() {
                    return (source, true);
                }
                attempts += 1;
                (source, attempts <= budget)
            })
            .collect();

        stream::iter(planned)
            .map(|(source, within_budget)| async move {
                if !within_budget {
                    return ExtractedDocument::skipped(
                        source,
                        format!("extraction budget of {} reached", budget),
                    );
                }
                let url = source.url.clone();
                match tokio::time::timeout(timeout, self.extractor.extract(source.clone())).await {
                    Ok(doc) => doc,
                    Err(_) => {
                        warn!(url = %url, "extraction timed out");
                        let reason = ExtractionError::Timeout(timeout.as_secs()).to_string();
                        ExtractedDocument::failed(source, reason)
                    }
                }
            })
            .buffered(self.config.concurrency)
            .collect()
            .await
    }

    async fn synthesize(&self, ctx: &ResearchContext) -> Result<Report, ModelError> {
        let documents: Vec<&ExtractedDocument> = ctx.ok_documents().collect();
        let prompt = with_system_instruction(
            &self.system_instruction,
            &format_report_instructions(&ctx.topic, &ctx.queries, &format_documents(&documents)),
        );

        let generation = self.config.report_generation();
        let raw = self
            .with_model_timeout(self.model.generate(&prompt, &generation))
            .await?;
        let body = strip_think_tags(&raw);
        if body.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(Report {
            body,
            sources: ctx.ok_source_urls(),
        })
    }

    async fn with_model_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, ModelError>>,
    ) -> Result<T, ModelError> {
        let timeout: Duration = self.config.call_timeout();
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(ModelError::Timeout(timeout.as_secs())))
    }

    fn cancelled(&self, ctx: &mut ResearchContext, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            self.fail(ctx, FailureReason::Cancelled);
            return true;
        }
        false
    }

    fn fail(&self, ctx: &mut ResearchContext, reason: FailureReason) {
        error!(topic = %ctx.topic, phase = %ctx.phase, reason = %reason, "research failed");
        let message = reason.to_string();
        self.transition(ctx, Phase::Failed(reason), &message, None);
    }

    fn transition(
        &self,
        ctx: &mut ResearchContext,
        phase: Phase,
        message: &str,
        detail: Option<String>,
    ) {
        info!(
            run_id = %ctx.id,
            topic = %ctx.topic,
            from = %ctx.phase,
            to = %phase,
            "phase transition"
        );
        let name = phase.name().to_string();
        ctx.phase = phase;
        self.send_status(ctx.id, &name, message, detail);
    }

    fn send_status(&self, run_id: Uuid, phase: &str, message: &str, detail: Option<String>) {
        if let Some(tx) = &self.status_tx {
            let status = StatusUpdate {
                run_id,
                phase: phase.to_string(),
                message: message.to_string(),
                timestamp: unix_timestamp(),
                detail,
            };

            if let Err(e) = tx.send(status) {
                debug!(phase, error = %e, "no status subscribers");
            }
        }
    }
}
