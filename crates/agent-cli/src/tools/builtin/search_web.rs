//! Web search tool using DuckDuckGo

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::fetch::shared_client;
use crate::tools::{required_str, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext, ToolResult};

const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";

pub struct SearchWebTool {
    endpoint: String,
}

impl SearchWebTool {
    pub fn new() -> Self {
        Self::with_endpoint(DUCKDUCKGO_HTML)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for SearchWebTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchWebTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web for the provided text. Limit the search to max_results."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Moderate
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("text", ParameterProperty::string("What to search for"))
            .with_property(
                "max_results",
                ParameterProperty::number("Maximum number of results (default: 3)").with_default(Value::Number(3.into())),
            )
    }

    #[instrument(skip(self, args, ctx), fields(query = tracing::field::Empty))]
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let text = required_str(args, "text")?;
        tracing::Span::current().record("query", text.chars().take(50).collect::<String>().as_str());

        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(3);

        debug!(max_results, "Sending search request");
        let response = match shared_client()
            .get(&self.endpoint)
            .query(&[("q", text)])
            .timeout(Duration::from_secs(ctx.http_timeout_secs))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Search request failed");
                return Ok(ToolResult::error(format!("Search request failed: {}", e)));
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "Search returned error status");
            return Ok(ToolResult::error(format!("Search failed with status: {}", response.status())));
        }

        let html = match response.text().await {
            Ok(h) => h,
            Err(e) => return Ok(ToolResult::error(format!("Failed to read response: {}", e))),
        };

        Ok(ToolResult::success(format_results(&parse_duckduckgo_results(&html, max_results))))
    }
}

#[derive(Debug, PartialEq)]
struct SearchResult {
    title: String,
    url: String,
}

fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}\n   {}\n", i + 1, r.title, r.url))
        .collect()
}

/// DuckDuckGo wraps result links as `/l/?uddg=<encoded url>`
fn unwrap_result_url(href: &str) -> String {
    href.split("uddg=")
        .nth(1)
        .and_then(|s| urlencoding::decode(s.split('&').next().unwrap_or(s)).ok())
        .map(|s| s.into_owned())
        .unwrap_or_else(|| href.to_string())
}

fn parse_duckduckgo_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let (Ok(result_selector), Ok(title_selector)) = (Selector::parse(".result"), Selector::parse(".result__a"))
    else {
        return Vec::new();
    };

    document
        .select(&result_selector)
        .filter_map(|result_el| {
            let link = result_el.select(&title_selector).next()?;
            let title = link.text().collect::<Vec<_>>().join(" ").trim().to_string();
            let url = unwrap_result_url(link.value().attr("href")?);
            (!title.is_empty() && !url.is_empty()).then_some(SearchResult { title, url })
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"
        <html><body>
          <div class="result">
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&rut=abc">Rust Programming Language</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://doc.rust-lang.org/book/">The Book</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://crates.io">crates.io</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_empty_results() {
        assert!(parse_duckduckgo_results("<html><body></body></html>", 3).is_empty());
    }

    #[test]
    fn test_parse_and_format() {
        let results = parse_duckduckgo_results(PAGE, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert_eq!(
            format_results(&results),
            "1. Rust Programming Language\n   https://www.rust-lang.org/\n2. The Book\n   https://doc.rust-lang.org/book/\n"
        );
    }

    #[tokio::test]
    async fn test_search_against_mock() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "rust lang"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let tool = SearchWebTool::with_endpoint(format!("{}/html/", server.uri()));
        let result = tool
            .execute(&json!({ "text": "rust lang" }), &ToolContext::default())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.starts_with("1. Rust Programming Language"));
        assert!(result.output.contains("3. crates.io\n   https://crates.io\n"));
    }
}
