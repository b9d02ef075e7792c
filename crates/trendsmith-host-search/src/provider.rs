use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
  pub title: String,
  pub snippet: String,
  pub url: String,
}

impl SearchHit {
  pub fn new(
    title: impl Into<String>,
    snippet: impl Into<String>,
    url: impl Into<String>,
  ) -> Self {
    Self {
      title: title.into(),
      snippet: snippet.into(),
      url: url.into(),
    }
  }
}

/// Independent search used to corroborate or replace scraped data.
#[async_trait]
pub trait SearchProvider: Send + Sync {
  async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}
