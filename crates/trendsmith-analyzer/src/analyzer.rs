use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use trendsmith_config::AnalyzerConfig;
use trendsmith_host_http::{HttpError, HttpFetcher, HttpPolicy, PageFetcher};
use url::Url;

use crate::descriptor::StructureDescriptor;
use crate::error::AnalysisFailure;
use crate::reduce::reduce;

/// A successful analysis: the descriptor plus the page it was built from.
#[derive(Debug, Clone)]
pub struct Analysis {
  pub descriptor: StructureDescriptor,
  /// Final URL after redirects.
  pub url: Url,
  pub html: String,
}

/// Fetches a page and reduces it to a [`StructureDescriptor`].
///
/// Stateless between calls. Never executes page scripts.
#[derive(Clone)]
pub struct StructureAnalyzer {
  fetcher: Arc<dyn PageFetcher>,
  timeout: Duration,
  max_descriptor_bytes: usize,
}

impl StructureAnalyzer {
  pub fn new(fetcher: Arc<dyn PageFetcher>, config: &AnalyzerConfig) -> Self {
    Self {
      fetcher,
      timeout: Duration::from_millis(config.timeout_ms),
      max_descriptor_bytes: config.max_descriptor_bytes,
    }
  }

  /// Build an analyzer backed by a policy-checked [`HttpFetcher`].
  pub fn from_config(config: &AnalyzerConfig) -> Result<Self, HttpError> {
    let policy = HttpPolicy::default()
      .with_timeout(Duration::from_millis(config.timeout_ms))
      .with_max_response_bytes(config.max_document_bytes)
      .with_user_agent(config.user_agent.clone());
    let fetcher = HttpFetcher::new(policy)?;
    Ok(Self::new(Arc::new(fetcher), config))
  }

  #[instrument(skip(self), fields(url = %url))]
  pub async fn analyze(&self, url: &Url) -> Result<Analysis, AnalysisFailure> {
    let page = match tokio::time::timeout(self.timeout, self.fetcher.fetch(url)).await {
      Err(_) => return Err(AnalysisFailure::Timeout { url: url.to_string() }),
      Ok(Err(e)) => {
        let failure = map_http_error(url, e);
        warn!(kind = failure.kind(), error = %failure, "analysis_failed");
        return Err(failure);
      }
      Ok(Ok(page)) => page,
    };

    if !page.is_html() {
      return Err(AnalysisFailure::NonHtml {
        url: url.to_string(),
        content_type: page.content_type.unwrap_or_else(|| "unknown".to_string()),
      });
    }

    let descriptor = reduce(page.url.as_str(), &page.body, self.max_descriptor_bytes);
    info!(
      total_elements = descriptor.total_elements,
      approach = descriptor.suggested_approach.as_str(),
      skeleton_bytes = descriptor.skeleton.len(),
      truncated = descriptor.truncated,
      "page_analyzed"
    );

    Ok(Analysis {
      descriptor,
      url: page.url,
      html: page.body,
    })
  }
}

fn map_http_error(url: &Url, err: HttpError) -> AnalysisFailure {
  match err {
    HttpError::Timeout { .. } => AnalysisFailure::Timeout { url: url.to_string() },
    HttpError::Status { status, .. } => AnalysisFailure::unreachable(
      url.as_str(),
      format!("status {}", status),
      status >= 500 || status == 429,
    ),
    HttpError::Transport { message, .. } => AnalysisFailure::unreachable(url.as_str(), message, true),
    other => AnalysisFailure::unreachable(url.as_str(), other.to_string(), false),
  }
}
