use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::WorkflowError;

/// A trending topic selected for processing.
///
/// Produced by the trend source outside the core; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
  pub id: String,
  pub title: String,
  pub source_url: String,
  #[serde(default)]
  pub related_article_urls: Vec<String>,
}

impl Topic {
  /// Create a topic whose id is derived from its title.
  pub fn new(title: impl Into<String>, source_url: impl Into<String>) -> Self {
    let title = title.into();
    Self {
      id: slug(&title),
      title,
      source_url: source_url.into(),
      related_article_urls: Vec::new(),
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = id.into();
    self
  }

  pub fn with_related(mut self, urls: impl IntoIterator<Item = String>) -> Self {
    self.related_article_urls.extend(urls);
    self
  }

  /// Parsed source URL.
  pub fn url(&self) -> Result<Url, WorkflowError> {
    parse_http_url(&self.source_url)
  }

  pub fn validate(&self) -> Result<(), WorkflowError> {
    if self.title.trim().is_empty() {
      return Err(WorkflowError::InvalidTopic("title is empty".to_string()));
    }
    self.url()?;
    for related in &self.related_article_urls {
      parse_http_url(related)?;
    }
    Ok(())
  }
}

fn parse_http_url(raw: &str) -> Result<Url, WorkflowError> {
  let url = Url::parse(raw)
    .map_err(|e| WorkflowError::InvalidTopic(format!("bad url '{}': {}", raw, e)))?;
  match url.scheme() {
    "http" | "https" => Ok(url),
    other => Err(WorkflowError::InvalidTopic(format!(
      "unsupported url scheme '{}' in '{}'",
      other, raw
    ))),
  }
}

fn slug(title: &str) -> String {
  let mut out = String::with_capacity(title.len());
  let mut dash = false;
  for c in title.chars() {
    if c.is_alphanumeric() {
      out.extend(c.to_lowercase());
      dash = false;
    } else if !dash && !out.is_empty() {
      out.push('-');
      dash = true;
    }
  }
  while out.ends_with('-') {
    out.pop();
  }
  if out.is_empty() {
    out.push_str("topic");
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_derives_slug_id() {
    let topic = Topic::new("AI Chips: What's Next?", "https://example.com/ai");
    assert_eq!(topic.id, "ai-chips-what-s-next");
  }

  #[test]
  fn blank_title_gets_fallback_id() {
    assert_eq!(Topic::new("!!!", "https://example.com").id, "topic");
  }

  #[test]
  fn validate_rejects_non_http_urls() {
    let topic = Topic::new("X", "file:///etc/passwd");
    assert!(matches!(topic.validate(), Err(WorkflowError::InvalidTopic(_))));
  }

  #[test]
  fn validate_checks_related_urls() {
    let topic = Topic::new("X", "https://example.com/x").with_related(["not a url".to_string()]);
    assert!(topic.validate().is_err());
  }

  #[test]
  fn related_urls_default_to_empty() {
    let topic: Topic =
      serde_json::from_str(r#"{"id":"x","title":"X","source_url":"https://example.com/x"}"#)
        .unwrap();
    assert!(topic.related_article_urls.is_empty());
    assert!(topic.validate().is_ok());
  }
}
