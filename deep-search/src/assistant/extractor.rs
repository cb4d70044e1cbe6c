use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::ExtractionError;
use super::state::{ExtractedDocument, SourceResult};
use super::utils::{collapse_whitespace, truncate_chars};

const MAX_DOWNLOAD_BYTES: usize = 512_000;

const CONTENT_SELECTORS: &[&str] = &["article", "main", "[role=\"main\"]"];

const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "button", "noscript", "svg",
    "iframe",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "td", "th", "article",
    "section", "main", "blockquote", "pre", "figcaption", "dt", "dd",
];

/// A fetched response body and its declared content type.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub content_type: String,
    pub body: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage, ExtractionError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage, ExtractionError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,text/plain;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        let mut body = response.text().await?;
        if body.len() > MAX_DOWNLOAD_BYTES {
            let mut end = MAX_DOWNLOAD_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }

        Ok(FetchedPage { content_type, body })
    }
}

/// Turns one `SourceResult` into exactly one `ExtractedDocument`.
pub struct ContentExtractor {
    fetcher: Arc<dyn PageFetcher>,
    max_chars: usize,
}

impl ContentExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, max_chars: usize) -> Self {
        Self { fetcher, max_chars }
    }

    pub async fn extract(&self, source: SourceResult) -> ExtractedDocument {
        match self.extract_text(&source).await {
            Ok(text) => {
                debug!(url = %source.url, chars = text.chars().count(), "extracted content");
                ExtractedDocument::ok(source, text)
            }
            Err(e) => {
                warn!(url = %source.url, error = %e, "content extraction failed");
                ExtractedDocument::failed(source, e.to_string())
            }
        }
    }

    async fn extract_text(&self, source: &SourceResult) -> Result<String, ExtractionError> {
        // Encyclopedia bodies already arrive as plain text.
        if !source.needs_fetch() {
            let text = collapse_whitespace(&source.snippet);
            return Ok(truncate_chars(&text, self.max_chars));
        }

        let page = self.fetcher.fetch_html(&source.url).await?;
        let text = page_to_text(&page)?;
        Ok(truncate_chars(&text, self.max_chars))
    }
}

/// Cleans a fetched page according to its content type.
pub fn page_to_text(page: &FetchedPage) -> Result<String, ExtractionError> {
    let text = if page.content_type.contains("html") {
        html_to_text(&page.body)
    } else if page.content_type.contains("text/plain") {
        collapse_whitespace(&page.body)
    } else {
        return Err(ExtractionError::UnsupportedContentType(
            page.content_type.clone(),
        ));
    };

    if text.is_empty() {
        return Err(ExtractionError::NoContent);
    }
    Ok(text)
}

/// Extracts readable text, preferring the main content region over `<body>`.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    for sel_str in CONTENT_SELECTORS {
        if let Ok(sel) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&sel).next() {
                let text = element_text(&el);
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return element_text(&body);
        }
    }

    String::new()
}

fn element_text(el: &ElementRef<'_>) -> String {
    let mut buf = String::new();
    collect_text(el, &mut buf);
    collapse_whitespace(&buf)
}

fn collect_text(node: &ElementRef<'_>, buf: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => buf.push_str(text),
            Node::Element(el) => {
                let tag = el.name();
                if SKIP_TAGS.contains(&tag) {
                    continue;
                }
                let is_block = BLOCK_TAGS.contains(&tag);
                if is_block {
                    buf.push('\n');
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_text(&child_ref, buf);
                }
                if is_block {
                    buf.push('\n');
                }
            }
            _ => {}
        }
    }
}
