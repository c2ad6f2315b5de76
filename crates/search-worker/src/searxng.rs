//! SearXNG JSON API client.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

const USER_AGENT: &str = "toolwire-search-worker/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Arguments of the `search` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(alias = "q")]
    pub query: String,
    #[serde(default = "d_category")]
    pub category: String,
    #[serde(default = "d_language")]
    pub language: String,
    #[serde(default = "d_max_results")]
    pub max_results: usize,
}

fn d_category() -> String {
    "general".into()
}
fn d_language() -> String {
    "en".into()
}
fn d_max_results() -> usize {
    10
}

pub struct SearchClient {
    endpoint: String,
    client: reqwest::Client,
}

impl SearchClient {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    /// Run one search. Failures come back as a one-line message suitable
    /// for a protocol error.
    pub async fn search(&self, params: &SearchParams) -> Result<Value, String> {
        tracing::info!(
            query = %params.query,
            category = %params.category,
            language = %params.language,
            "performing search"
        );
        let max_results = params.max_results.to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", params.query.as_str()),
                ("categories", params.category.as_str()),
                ("language", params.language.as_str()),
                ("format", "json"),
                ("max_results", max_results.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "search request failed");
                format!("Network error: {e}")
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "search endpoint error");
            return Err(format!("SearXNG returned status {}", status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "invalid search response");
            "Invalid response from SearXNG".to_string()
        })?;
        Ok(summarize(&params.query, &body, params.max_results))
    }
}

/// Trim the endpoint's payload to what the model needs.
pub fn summarize(query: &str, body: &Value, max_results: usize) -> Value {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    json!({
        "query": query,
        "results_count": results.len(),
        "results": &results[..results.len().min(max_results)],
    })
}
