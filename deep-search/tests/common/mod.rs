//! In-memory fakes for the model, connector and fetcher boundaries.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deep_search::assistant::configuration::{Configuration, GenerationConfig, ModelProvider};
use deep_search::assistant::connectors::SourceConnector;
use deep_search::assistant::error::{ExtractionError, ModelError};
use deep_search::assistant::extractor::{FetchedPage, PageFetcher};
use deep_search::assistant::model::GenerativeModel;
use deep_search::{Origin, ResearchGraph, SourceResult};

/// Answers by prompt kind: planning, report or follow-up.
pub struct FakeModel {
    plan: Result<String, ModelError>,
    report: Result<String, ModelError>,
    answers: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<String>>,
    report_delay: Option<Duration>,
    answer_delay: Option<Duration>,
}

impl FakeModel {
    pub fn new(plan: Result<&str, ModelError>, report: Result<&str, ModelError>) -> Self {
        Self {
            plan: plan.map(str::to_string),
            report: report.map(str::to_string),
            answers: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            report_delay: None,
            answer_delay: None,
        }
    }

    pub fn with_report_delay(mut self, delay: Duration) -> Self {
        self.report_delay = Some(delay);
        self
    }

    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = Some(delay);
        self
    }

    pub fn with_answers(self, answers: Vec<Result<&str, ModelError>>) -> Self {
        *self.answers.lock().unwrap() = answers
            .into_iter()
            .map(|a| a.map(str::to_string))
            .collect();
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeModel for FakeModel {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let (result, delay) = if prompt.contains("Latest Question") {
            let answer = self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelError::EmptyResponse));
            (answer, self.answer_delay)
        } else if prompt.contains("Write the report now") {
            (self.report.clone(), self.report_delay)
        } else {
            (self.plan.clone(), None)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

type ResultsFn = dyn Fn(&str) -> Vec<SourceResult> + Send + Sync;

/// Connector whose results are computed from the query.
pub struct FakeConnector {
    origin: Origin,
    results: Box<ResultsFn>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new<F>(origin: Origin, results: F) -> Self
    where
        F: Fn(&str) -> Vec<SourceResult> + Send + Sync + 'static,
    {
        Self {
            origin,
            results: Box::new(results),
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty(origin: Origin) -> Self {
        Self::new(origin, |_| Vec::new())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceConnector for FakeConnector {
    fn origin(&self) -> Origin {
        self.origin
    }

    async fn search(&self, query: &str) -> Vec<SourceResult> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.results)(query)
    }
}

/// Serves canned pages by URL; unknown URLs are 404.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Makes fetches of `url` hang for `delay` before answering.
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                content_type: "text/html; charset=utf-8".to_string(),
                body: body.clone(),
            }),
            None => Err(ExtractionError::Status(404)),
        }
    }
}

pub fn web_result(query: &str, url: &str) -> SourceResult {
    SourceResult {
        title: format!("Page for {}", query),
        url: url.to_string(),
        snippet: format!("Snippet about {}", query),
        origin: Origin::Web,
        query: query.to_string(),
    }
}

pub fn encyclopedia_result(query: &str, title: &str, summary: &str) -> SourceResult {
    SourceResult {
        title: title.to_string(),
        url: format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_")),
        snippet: summary.to_string(),
        origin: Origin::Encyclopedia,
        query: query.to_string(),
    }
}

pub fn slug(query: &str) -> String {
    query.replace(' ', "-")
}

pub fn test_config() -> Configuration {
    Configuration {
        model_provider: ModelProvider::Local,
        query_count: 3,
        ..Configuration::default()
    }
}

pub struct Harness {
    pub model: Arc<FakeModel>,
    pub web: Arc<FakeConnector>,
    pub encyclopedia: Arc<FakeConnector>,
    pub fetcher: Arc<FakeFetcher>,
}

impl Harness {
    pub fn new(model: FakeModel, web: FakeConnector, encyclopedia: FakeConnector, fetcher: FakeFetcher) -> Self {
        Self {
            model: Arc::new(model),
            web: Arc::new(web),
            encyclopedia: Arc::new(encyclopedia),
            fetcher: Arc::new(fetcher),
        }
    }

    pub fn graph(&self, config: Configuration) -> ResearchGraph {
        let connectors: Vec<Arc<dyn SourceConnector>> =
            vec![self.web.clone(), self.encyclopedia.clone()];
        ResearchGraph::with_components(config, self.model.clone(), connectors, self.fetcher.clone())
    }
}
