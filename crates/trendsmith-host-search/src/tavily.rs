//! Tavily search API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use trendsmith_config::SearchConfig;

use crate::error::SearchError;
use crate::provider::{SearchHit, SearchProvider};

pub struct TavilyClient {
  client: Client,
  endpoint: String,
  api_key: Option<String>,
  max_results: usize,
}

impl TavilyClient {
  pub fn new(
    endpoint: impl Into<String>,
    max_results: usize,
    timeout: Duration,
  ) -> Result<Self, SearchError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SearchError::Request(e.to_string()))?;
    Ok(Self {
      client,
      endpoint: endpoint.into(),
      api_key: None,
      max_results,
    })
  }

  /// Build from configuration, reading the key from `api_key_env`.
  pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
    let client = Self::new(
      config.endpoint.clone(),
      config.max_results,
      Duration::from_millis(config.timeout_ms),
    )?;
    Ok(match std::env::var(&config.api_key_env) {
      Ok(key) if !key.is_empty() => client.with_api_key(key),
      _ => client,
    })
  }

  pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
    self.api_key = Some(key.into());
    self
  }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
  api_key: &'a str,
  query: &'a str,
  max_results: usize,
}

#[derive(Deserialize)]
struct TavilyResponse {
  results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
  #[serde(default)]
  title: String,
  #[serde(default)]
  url: String,
  #[serde(default)]
  content: String,
}

/// Convert a Tavily response body into hits, dropping entries without a url.
pub fn parse_tavily_response(body: &str) -> Result<Vec<SearchHit>, SearchError> {
  let response: TavilyResponse =
    serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;

  Ok(
    response
      .results
      .into_iter()
      .filter(|r| !r.url.trim().is_empty())
      .map(|r| SearchHit::new(r.title.trim(), r.content.trim(), r.url.trim()))
      .collect(),
  )
}

#[async_trait]
impl SearchProvider for TavilyClient {
  #[instrument(skip(self), fields(max_results = self.max_results))]
  async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
    let Some(api_key) = &self.api_key else {
      return Err(SearchError::Auth("no search api key configured".to_string()));
    };

    let response = self
      .client
      .post(&self.endpoint)
      .json(&TavilyRequest {
        api_key,
        query,
        max_results: self.max_results,
      })
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          SearchError::Timeout
        } else {
          SearchError::Request(e.to_string())
        }
      })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| {
      if e.is_timeout() {
        SearchError::Timeout
      } else {
        SearchError::Malformed(e.to_string())
      }
    })?;

    if !status.is_success() {
      warn!(status = status.as_u16(), "search_request_failed");
      return Err(match status.as_u16() {
        401 | 403 => SearchError::Auth(text),
        429 | 432 | 433 => SearchError::Quota(text),
        other => SearchError::Request(format!("{}: {}", other, text)),
      });
    }

    let hits = parse_tavily_response(&text)?;
    debug!(hits = hits.len(), "search_completed");
    Ok(hits)
  }
}
