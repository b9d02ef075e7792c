use thiserror::Error;

/// Why a page could not be analyzed. The analyzer never fails any other way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisFailure {
  /// Refused by policy, transport failure or non-2xx status.
  #[error("unreachable: {url}: {reason}")]
  Unreachable {
    url: String,
    reason: String,
    /// Worth another attempt (server errors, dropped connections).
    transient: bool,
  },

  #[error("timed out fetching {url}")]
  Timeout { url: String },

  #[error("{url} is not html (content type: {content_type})")]
  NonHtml { url: String, content_type: String },
}

impl AnalysisFailure {
  pub fn unreachable(url: impl Into<String>, reason: impl Into<String>, transient: bool) -> Self {
    Self::Unreachable {
      url: url.into(),
      reason: reason.into(),
      transient,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      AnalysisFailure::Unreachable { .. } => "unreachable",
      AnalysisFailure::Timeout { .. } => "timeout",
      AnalysisFailure::NonHtml { .. } => "non_html",
    }
  }

  pub fn is_transient(&self) -> bool {
    match self {
      AnalysisFailure::Unreachable { transient, .. } => *transient,
      AnalysisFailure::Timeout { .. } => true,
      AnalysisFailure::NonHtml { .. } => false,
    }
  }
}
