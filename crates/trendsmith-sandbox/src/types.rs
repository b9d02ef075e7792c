use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Language tag of every candidate the executor accepts.
pub const CANDIDATE_LANGUAGE: &str = "lua";

/// A synthesized scraping program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCandidate {
  pub language: String,
  pub source: String,
  /// Revision of the `generated_code` slot this candidate was stored as.
  #[serde(default)]
  pub version: u32,
}

impl CodeCandidate {
  pub fn lua(source: impl Into<String>) -> Self {
    Self {
      language: CANDIDATE_LANGUAGE.to_string(),
      source: source.into(),
      version: 0,
    }
  }
}

/// Read-only copy of a fetched page handed to candidates.
#[derive(Debug, Clone)]
pub struct Document {
  url: Url,
  html: Arc<str>,
}

impl Document {
  pub fn new(url: Url, html: impl Into<Arc<str>>) -> Self {
    Self {
      url,
      html: html.into(),
    }
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn html(&self) -> &str {
    &self.html
  }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Ok,
  Timeout,
  ResourceExceeded,
  RuntimeError,
  BlockedOperation,
}

impl ExecutionStatus {
  pub fn is_ok(&self) -> bool {
    matches!(self, ExecutionStatus::Ok)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionStatus::Ok => "ok",
      ExecutionStatus::Timeout => "timeout",
      ExecutionStatus::ResourceExceeded => "resource_exceeded",
      ExecutionStatus::RuntimeError => "runtime_error",
      ExecutionStatus::BlockedOperation => "blocked_operation",
    }
  }
}

impl fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Outcome of running one candidate. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
  pub status: ExecutionStatus,
  /// Empty unless `status` is `ok`.
  pub extracted_fields: BTreeMap<String, String>,
  pub stdout_excerpt: String,
  #[serde(rename = "duration_ms", with = "duration_ms")]
  pub duration: Duration,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub diagnostic: Option<String>,
  #[serde(default)]
  pub output_truncated: bool,
  /// The candidate read random values, so its fields may differ across runs.
  #[serde(default)]
  pub nondeterministic: bool,
}

impl ExecutionResult {
  pub(crate) fn failed(
    status: ExecutionStatus,
    diagnostic: impl Into<String>,
    duration: Duration,
  ) -> Self {
    Self {
      status,
      extracted_fields: BTreeMap::new(),
      stdout_excerpt: String::new(),
      duration,
      diagnostic: Some(truncate_diagnostic(diagnostic.into())),
      output_truncated: false,
      nondeterministic: false,
    }
  }

  /// One-line description used in error trails and regeneration feedback.
  pub fn describe(&self) -> String {
    match &self.diagnostic {
      Some(diagnostic) => format!("{}: {}", self.status, diagnostic),
      None => self.status.to_string(),
    }
  }
}

/// Longest diagnostic kept on a result.
pub const MAX_DIAGNOSTIC_BYTES: usize = 512;

pub(crate) fn truncate_diagnostic(mut text: String) -> String {
  if text.len() > MAX_DIAGNOSTIC_BYTES {
    let mut end = MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(end) {
      end -= 1;
    }
    text.truncate(end);
    text.push_str("...");
  }
  text
}

mod duration_ms {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn result_serializes_duration_in_millis() {
    let result = ExecutionResult {
      status: ExecutionStatus::Ok,
      extracted_fields: BTreeMap::from([("headline".to_string(), "X wins".to_string())]),
      stdout_excerpt: String::new(),
      duration: Duration::from_millis(42),
      diagnostic: None,
      output_truncated: false,
      nondeterministic: false,
    };

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["duration_ms"], 42);
    assert!(json.get("diagnostic").is_none());
  }

  #[test]
  fn long_diagnostics_are_cut_on_char_boundary() {
    let text = "é".repeat(MAX_DIAGNOSTIC_BYTES);
    let cut = truncate_diagnostic(text);
    assert!(cut.ends_with("..."));
    assert!(cut.len() <= MAX_DIAGNOSTIC_BYTES + 3);
  }

  #[test]
  fn describe_includes_diagnostic() {
    let result =
      ExecutionResult::failed(ExecutionStatus::RuntimeError, "boom", Duration::from_millis(1));
    assert_eq!(result.describe(), "runtime_error: boom");
    assert!(result.extracted_fields.is_empty());
  }
}
