//! Web fetch tool for retrieving web content

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::tools::{required_str, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext, ToolResult};

pub const READER_PREFIX: &str = "https://r.jina.ai/";

/// Longest page text returned, in characters
pub const MAX_CONTENT_CHARS: usize = 1_000_000;

const TRUNCATION_NOTE: &str = "\n\n[Content truncated due to size limitations]";

/// Shared HTTP client for connection pooling
static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

pub(crate) fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent("Mozilla/5.0 (compatible; agent-cli/0.1)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Fetches pages through a reader proxy that returns readable text
pub struct FetchTool {
    prefix: String,
}

impl FetchTool {
    pub fn new() -> Self {
        Self::with_prefix(READER_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Prefix `url` with the reader proxy exactly once
    fn reader_url(&self, url: &str) -> String {
        if url.starts_with(&self.prefix) {
            url.to_string()
        } else {
            format!("{}{}", self.prefix, url)
        }
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch content from the provided URL. Returns the page as readable text."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Moderate
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("url", ParameterProperty::string("The URL to fetch"))
    }

    #[instrument(skip(self, args, ctx), fields(url = tracing::field::Empty))]
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let url = required_str(args, "url")?.trim();
        tracing::Span::current().record("url", url.chars().take(100).collect::<String>().as_str());

        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Ok(ToolResult::error(format!(
                    "Unsupported URL scheme '{}': only http and https are allowed",
                    parsed.scheme()
                )))
            }
            Err(e) => return Ok(ToolResult::error(format!("Invalid URL {}: {}", url, e))),
        }

        let target = self.reader_url(url);
        debug!(target = %target, timeout_secs = ctx.http_timeout_secs, "Sending HTTP request");

        let response = match shared_client()
            .get(&target)
            .timeout(Duration::from_secs(ctx.http_timeout_secs))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Failed to fetch URL");
                return Ok(ToolResult::error(format!("Error fetching URL {}: {}", url, e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "HTTP error response");
            return Ok(ToolResult::error(format!("Error fetching URL {}: HTTP {}", url, status)));
        }

        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_lowercase().contains("text/html"));

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Ok(ToolResult::error(format!("Failed to read response: {}", e))),
        };

        let text = if is_html { html_to_text(&body) } else { body };
        Ok(ToolResult::success(format!("[URL]: {}\n\n{}", url, truncate_content(&text))))
    }
}

fn truncate_content(text: &str) -> String {
    match text.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((cut, _)) => {
            warn!(chars = MAX_CONTENT_CHARS, "Truncating fetched content");
            format!("{}{}", &text[..cut], TRUNCATION_NOTE)
        }
        None => text.to_string(),
    }
}

/// Convert HTML to plain text
pub(crate) fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for sel_str in ["article", "main", "[role='main']", "#content", "body"] {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = extract_text_from_element(&element);
                if !text.trim().is_empty() {
                    return text;
                }
            }
        }
    }

    document.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Extract text from an HTML element, one line per block element
fn extract_text_from_element(element: &scraper::ElementRef) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_line = String::new();
    let mut skip_depth = 0;

    for edge in element.traverse() {
        match edge {
            ego_tree::iter::Edge::Open(node) => {
                if skip_depth > 0 {
                    if node.value().is_element() {
                        skip_depth += 1;
                    }
                    continue;
                }

                match node.value() {
                    scraper::Node::Text(text) => {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            if !current_line.is_empty() {
                                current_line.push(' ');
                            }
                            current_line.push_str(trimmed);
                        }
                    }
                    scraper::Node::Element(el) => {
                        let tag = el.name();
                        if matches!(tag, "script" | "style" | "noscript") {
                            skip_depth = 1;
                            continue;
                        }
                        let is_block = matches!(
                            tag,
                            "p" | "div" | "br" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "tr" | "pre"
                        );
                        if is_block && !current_line.is_empty() {
                            lines.push(std::mem::take(&mut current_line));
                        }
                    }
                    _ => {}
                }
            }
            ego_tree::iter::Edge::Close(node) => {
                if skip_depth > 0 && node.value().is_element() {
                    skip_depth -= 1;
                }
            }
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    lines
        .into_iter()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
