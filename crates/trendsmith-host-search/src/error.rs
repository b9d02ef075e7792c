use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
  #[error("search timed out")]
  Timeout,

  #[error("search quota exhausted: {0}")]
  Quota(String),

  #[error("malformed search response: {0}")]
  Malformed(String),

  /// No API key configured, or the provider rejected it.
  #[error("search authentication failed: {0}")]
  Auth(String),

  #[error("search request failed: {0}")]
  Request(String),
}

impl SearchError {
  pub fn kind(&self) -> &'static str {
    match self {
      SearchError::Timeout => "timeout",
      SearchError::Quota(_) => "quota",
      SearchError::Malformed(_) => "malformed",
      SearchError::Auth(_) => "auth",
      SearchError::Request(_) => "request",
    }
  }

  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      SearchError::Timeout | SearchError::Quota(_) | SearchError::Request(_)
    )
  }
}
