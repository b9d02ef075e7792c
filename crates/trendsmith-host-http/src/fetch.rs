use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect;
use tracing::{debug, instrument};
use url::Url;

use crate::error::HttpError;
use crate::policy::HttpPolicy;

/// A fetched response body with the metadata callers route on.
#[derive(Debug, Clone)]
pub struct FetchedPage {
  /// Final URL after redirects.
  pub url: Url,
  pub status: u16,
  pub content_type: Option<String>,
  /// Body decoded as UTF-8 (lossy), cut at the policy limit.
  pub body: String,
  /// Set when the body was cut at `max_response_bytes`.
  pub truncated: bool,
}

impl FetchedPage {
  /// Whether the response declares an HTML (or XHTML) media type.
  pub fn is_html(&self) -> bool {
    self.content_type.as_deref().is_some_and(|ct| {
      let media = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
      media == "text/html" || media == "application/xhtml+xml"
    })
  }
}

/// Read-only page retrieval.
#[async_trait]
pub trait PageFetcher: Send + Sync {
  async fn fetch(&self, url: &Url) -> Result<FetchedPage, HttpError>;
}

/// Policy-checked fetcher backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  policy: HttpPolicy,
}

impl HttpFetcher {
  pub fn new(policy: HttpPolicy) -> Result<Self, HttpError> {
    let client = reqwest::Client::builder()
      .user_agent(policy.user_agent.clone())
      .redirect(redirect_policy(&policy))
      .timeout(policy.timeout)
      .build()
      .map_err(|e| HttpError::Client(e.to_string()))?;

    Ok(Self { client, policy })
  }

  pub fn policy(&self) -> &HttpPolicy {
    &self.policy
  }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
  #[instrument(skip(self), fields(url = %url))]
  async fn fetch(&self, url: &Url) -> Result<FetchedPage, HttpError> {
    self.policy.check(url)?;

    let mut response = self
      .client
      .get(url.as_str())
      .send()
      .await
      .map_err(|e| HttpError::from_reqwest(url.as_str(), e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(HttpError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    let final_url = response.url().clone();
    let content_type = header_string(response.headers());

    let limit = self.policy.max_response_bytes;
    let mut bytes: Vec<u8> = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = response
      .chunk()
      .await
      .map_err(|e| HttpError::from_reqwest(url.as_str(), e))?
    {
      let room = limit - bytes.len();
      if chunk.len() > room {
        bytes.extend_from_slice(&chunk[..room]);
        truncated = true;
        break;
      }
      bytes.extend_from_slice(&chunk);
    }

    debug!(
      status = status.as_u16(),
      bytes = bytes.len(),
      truncated,
      "page_fetched"
    );

    Ok(FetchedPage {
      url: final_url,
      status: status.as_u16(),
      content_type,
      body: String::from_utf8_lossy(&bytes).into_owned(),
      truncated,
    })
  }
}

/// Follow redirects only while every hop still satisfies the policy.
pub(crate) fn redirect_policy(policy: &HttpPolicy) -> redirect::Policy {
  let policy = policy.clone();
  redirect::Policy::custom(move |attempt| {
    if attempt.previous().len() >= policy.max_redirects {
      attempt.error("too many redirects")
    } else if let Err(e) = policy.check(attempt.url()) {
      attempt.error(e.to_string())
    } else {
      attempt.follow()
    }
  })
}

pub(crate) fn header_string(headers: &reqwest::header::HeaderMap) -> Option<String> {
  headers
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn page(content_type: Option<&str>) -> FetchedPage {
    FetchedPage {
      url: Url::parse("https://example.com").unwrap(),
      status: 200,
      content_type: content_type.map(str::to_string),
      body: String::new(),
      truncated: false,
    }
  }

  #[test]
  fn html_detection_ignores_parameters_and_case() {
    assert!(page(Some("text/html; charset=utf-8")).is_html());
    assert!(page(Some("Text/HTML")).is_html());
    assert!(page(Some("application/xhtml+xml")).is_html());
    assert!(!page(Some("application/json")).is_html());
    assert!(!page(None).is_html());
  }
}
