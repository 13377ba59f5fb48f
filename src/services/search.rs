//! Serper web search

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, SearchHit, ServiceError, WebSearch};

const SEARCH_URL: &str = "https://google.serper.dev/search";

pub struct SerperSearch {
    client: reqwest::Client,
    api_key: String,
    result_cap: usize,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

impl SerperSearch {
    pub fn new(api_key: Option<String>, result_cap: usize, timeout: Duration) -> Result<Self, ServiceError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or(ServiceError::NotConfigured("Serper API key"))?;

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            result_cap,
        })
    }
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError> {
        let response = self
            .client
            .post(SEARCH_URL)
            .header("X-API-KEY", &self.api_key)
            .json(&SearchRequest { q: query })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), &body));
        }

        let mut results: SearchResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        results.organic.truncate(self.result_cap);

        Ok(results.organic)
    }
}

/// Render search results as a context block for the conversation model
pub fn format_results(query: &str, hits: &[SearchHit]) -> String {
    let mut out = format!("The search results for '{query}' are:\n[start]\n");
    for hit in hits {
        out.push_str(&format!("Title: {}\nDescription: {}\n\n", hit.title, hit.snippet));
    }
    out.push_str("[end]");
    out
}
