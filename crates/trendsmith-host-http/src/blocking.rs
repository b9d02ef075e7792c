use std::io::Read;
use std::time::Duration;

use tracing::debug;

use crate::error::HttpError;
use crate::fetch::{FetchedPage, header_string, redirect_policy};
use crate::policy::HttpPolicy;

/// Synchronous fetcher for callers that run on their own OS thread.
///
/// Must not be constructed or dropped inside an async runtime.
#[derive(Debug)]
pub struct BlockingFetcher {
  client: reqwest::blocking::Client,
  policy: HttpPolicy,
}

impl BlockingFetcher {
  pub fn new(policy: HttpPolicy) -> Result<Self, HttpError> {
    let client = reqwest::blocking::Client::builder()
      .user_agent(policy.user_agent.clone())
      .redirect(redirect_policy(&policy))
      .timeout(policy.timeout)
      .build()
      .map_err(|e| HttpError::Client(e.to_string()))?;

    Ok(Self { client, policy })
  }

  /// Fetch `raw` after checking it against the policy.
  pub fn get(&self, raw: &str) -> Result<FetchedPage, HttpError> {
    self.get_within(raw, self.policy.timeout)
  }

  /// Like [`get`](Self::get), bounded by `timeout` instead of the policy's
  /// timeout when that is shorter.
  pub fn get_within(&self, raw: &str, timeout: Duration) -> Result<FetchedPage, HttpError> {
    let url = self.policy.check_str(raw)?;

    let response = self
      .client
      .get(url.as_str())
      .timeout(timeout.min(self.policy.timeout))
      .send()
      .map_err(|e| HttpError::from_reqwest(raw, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(HttpError::Status {
        url: raw.to_string(),
        status: status.as_u16(),
      });
    }

    let final_url = response.url().clone();
    let content_type = header_string(response.headers());

    let limit = self.policy.max_response_bytes;
    let mut bytes = Vec::new();
    response
      .take(limit as u64 + 1)
      .read_to_end(&mut bytes)
      .map_err(|e| HttpError::transport(raw, e.to_string()))?;
    let truncated = bytes.len() > limit;
    bytes.truncate(limit);

    debug!(url = %final_url, bytes = bytes.len(), truncated, "sandbox_http_get");

    Ok(FetchedPage {
      url: final_url,
      status: status.as_u16(),
      content_type,
      body: String::from_utf8_lossy(&bytes).into_owned(),
      truncated,
    })
  }
}
