//! Source connectors: web search and encyclopedia lookup.
//!
//! Both connectors produce the same `SourceResult` shape tagged with its
//! `Origin`. Provider failures never escape `SourceConnector::search`; they
//! are logged and turned into an empty result list.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::configuration::Configuration;
use super::error::ConnectorError;
use super::state::{Origin, SourceResult};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";
const WIKIPEDIA_ARTICLE_BASE: &str = "https://en.wikipedia.org/wiki/";

const SKIPPED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".zip", ".rar", ".jpg", ".png",
    ".gif", ".svg",
];

/// Shared HTTP client for connectors and the page fetcher.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn origin(&self) -> Origin;

    /// Results for one query. Failures yield an empty list.
    async fn search(&self, query: &str) -> Vec<SourceResult>;
}

// ---------------------------------------------------------------------------
// Web search
// ---------------------------------------------------------------------------

/// A raw hit before it is tagged with its origin and query.
#[derive(Debug, Clone, PartialEq)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self {
            client,
            endpoint: DUCKDUCKGO_HTML_URL.to_string(),
            max_results,
        }
    }

    pub fn from_config(client: Client, config: &Configuration) -> Self {
        Self::new(client, config.max_search_results)
    }

    pub async fn web_search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, ConnectorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("q", query)])
            .header("Accept", "text/html")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(parse_duckduckgo_results(&body, max_results))
    }
}

#[async_trait]
impl SourceConnector for DuckDuckGoSearch {
    fn origin(&self) -> Origin {
        Origin::Web
    }

    async fn search(&self, query: &str) -> Vec<SourceResult> {
        match self.web_search(query, self.max_results).await {
            Ok(hits) => {
                debug!(query, hits = hits.len(), "web search finished");
                hits.into_iter()
                    .map(|hit| SourceResult {
                        title: hit.title,
                        url: hit.url,
                        snippet: hit.snippet,
                        origin: Origin::Web,
                        query: query.to_string(),
                    })
                    .collect()
            }
            Err(e) => {
                warn!(query, error = %e, "web search failed");
                Vec::new()
            }
        }
    }
}

/// Parses the DuckDuckGo HTML result page.
///
/// `Html` is `!Send`, so this stays synchronous and is called after the body
/// has been read.
pub fn parse_duckduckgo_results(body: &str, max_results: usize) -> Vec<WebHit> {
    let doc = Html::parse_document(body);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse("a.result__snippet, .result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for result in doc.select(&result_sel) {
        if hits.len() >= max_results {
            break;
        }
        let Some(link) = result.select(&link_sel).next() else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        let href = link.value().attr("href").unwrap_or_default();
        let url = unwrap_redirect(href);
        let snippet = result
            .select(&snippet_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        if title.is_empty() || !is_fetchable_link(&url) {
            continue;
        }
        if hits.iter().any(|h: &WebHit| h.url == url) {
            continue;
        }
        hits.push(WebHit { title, url, snippet });
    }
    hits
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>&rut=...`.
fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    if let Ok(parsed) = Url::parse(&absolute) {
        if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
            return target.into_owned();
        }
    }
    absolute
}

/// Absolute http(s) links that are not binary documents.
pub fn is_fetchable_link(link: &str) -> bool {
    let Ok(parsed) = Url::parse(link) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return false;
    }
    let path = parsed.path().to_lowercase();
    !SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

// ---------------------------------------------------------------------------
// Encyclopedia
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found {
        title: String,
        url: String,
        summary: String,
    },
    NotFound,
    Disambiguation(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PagesEnvelope {
    query: Option<PagesQuery>,
}

#[derive(Debug, Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<WikiPage>,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    pageprops: Option<serde_json::Value>,
    #[serde(default)]
    links: Vec<PageLink>,
}

#[derive(Debug, Deserialize)]
struct PageLink {
    title: String,
}

pub struct WikipediaConnector {
    client: Client,
    api_url: String,
    max_results: usize,
}

impl WikipediaConnector {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self {
            client,
            api_url: WIKIPEDIA_API_URL.to_string(),
            max_results,
        }
    }

    pub fn from_config(client: Client, config: &Configuration) -> Self {
        Self::new(client, config.max_encyclopedia_results)
    }

    /// Article titles matching a free-text query.
    pub async fn search_titles(&self, query: &str) -> Result<Vec<String>, ConnectorError> {
        let limit = self.max_results.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("format", "json"),
                ("formatversion", "2"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        parse_search_titles(&body)
    }

    pub async fn lookup(&self, title: &str) -> Result<Lookup, ConnectorError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("prop", "extracts|pageprops|links"),
                ("ppprop", "disambiguation"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("pllimit", "20"),
                ("titles", title),
                ("format", "json"),
                ("formatversion", "2"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        parse_lookup(&body)
    }
}

#[async_trait]
impl SourceConnector for WikipediaConnector {
    fn origin(&self) -> Origin {
        Origin::Encyclopedia
    }

    async fn search(&self, query: &str) -> Vec<SourceResult> {
        let titles = match self.search_titles(query).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(query, error = %e, "encyclopedia search failed");
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for title in titles {
            match self.lookup(&title).await {
                Ok(Lookup::Found { title, url, summary }) => results.push(SourceResult {
                    title,
                    url,
                    snippet: summary,
                    origin: Origin::Encyclopedia,
                    query: query.to_string(),
                }),
                Ok(Lookup::NotFound) => debug!(query, title = %title, "encyclopedia article not found"),
                Ok(Lookup::Disambiguation(candidates)) => {
                    debug!(query, title = %title, candidates = candidates.len(), "encyclopedia title is ambiguous")
                }
                Err(e) => warn!(query, title = %title, error = %e, "encyclopedia lookup failed"),
            }
        }
        results
    }
}

pub fn article_url(title: &str) -> String {
    format!("{}{}", WIKIPEDIA_ARTICLE_BASE, title.replace(' ', "_"))
}

fn parse_search_titles(body: &str) -> Result<Vec<String>, ConnectorError> {
    let envelope: SearchEnvelope =
        serde_json::from_str(body).map_err(|e| ConnectorError::Parse(e.to_string()))?;
    Ok(envelope
        .query
        .map(|q| q.search.into_iter().map(|hit| hit.title).collect())
        .unwrap_or_default())
}

fn parse_lookup(body: &str) -> Result<Lookup, ConnectorError> {
    let envelope: PagesEnvelope =
        serde_json::from_str(body).map_err(|e| ConnectorError::Parse(e.to_string()))?;
    let Some(page) = envelope.query.and_then(|q| q.pages.into_iter().next()) else {
        return Ok(Lookup::NotFound);
    };

    if page.missing {
        return Ok(Lookup::NotFound);
    }
    let is_disambiguation = page
        .pageprops
        .as_ref()
        .and_then(|props| props.get("disambiguation"))
        .is_some();
    if is_disambiguation {
        return Ok(Lookup::Disambiguation(
            page.links.into_iter().map(|l| l.title).collect(),
        ));
    }

    let summary = page.extract.unwrap_or_default().trim().to_string();
    if summary.is_empty() {
        return Ok(Lookup::NotFound);
    }
    Ok(Lookup::Found {
        url: article_url(&page.title),
        title: page.title,
        summary,
    })
}
