use std::collections::BTreeMap;

use tracing::debug;
use trendsmith_host_search::SearchHit;
use trendsmith_sandbox::ExecutionResult;
use trendsmith_workflow::Topic;

use crate::error::AggregationFailure;
use crate::summary::{Provenance, Summary, UNKNOWN};

/// Merge the scrape result, search hits and topic into a [`Summary`].
///
/// Precedence per field is scrape, then search, then `unknown` for required
/// fields. A missing or non-ok execution result contributes nothing, and empty
/// values count as absent. `topic_title` and `topic_url` always come from the
/// topic.
pub fn aggregate(
  execution: Option<&ExecutionResult>,
  search_results: &[SearchHit],
  topic: &Topic,
  required_fields: &[String],
) -> Result<Summary, AggregationFailure> {
  validate(topic, required_fields)?;

  let mut merged = Merge::default();

  if let Some(result) = execution.filter(|r| r.status.is_ok()) {
    for (key, value) in &result.extracted_fields {
      merged.offer(key, value, Provenance::Scrape);
    }
  }

  for (key, value) in search_fields(search_results) {
    merged.offer(key, &value, Provenance::Search);
  }

  merged.set("topic_title", &topic.title, Provenance::Topic);
  merged.set("topic_url", &topic.source_url, Provenance::Topic);

  for field in required_fields {
    if !merged.fields.contains_key(field) {
      merged.set(field, UNKNOWN, Provenance::Unknown);
    }
  }

  let mut sources = vec![topic.source_url.clone()];
  for hit in search_results {
    let url = hit.url.trim();
    if !url.is_empty() && !sources.iter().any(|s| s == url) {
      sources.push(url.to_string());
    }
  }

  debug!(
    fields = merged.fields.len(),
    sources = sources.len(),
    "summary_aggregated"
  );

  Ok(Summary {
    topic_id: topic.id.clone(),
    topic_title: topic.title.clone(),
    source_url: topic.source_url.clone(),
    fields: merged.fields,
    provenance: merged.provenance,
    sources,
  })
}

fn validate(topic: &Topic, required_fields: &[String]) -> Result<(), AggregationFailure> {
  for (name, value) in [
    ("topic.id", &topic.id),
    ("topic.title", &topic.title),
    ("topic.source_url", &topic.source_url),
  ] {
    if value.trim().is_empty() {
      return Err(AggregationFailure::missing(name));
    }
  }
  if let Some(i) = required_fields.iter().position(|f| f.trim().is_empty()) {
    return Err(AggregationFailure::missing(format!("required_fields[{}]", i)));
  }
  Ok(())
}

/// `headline`, `summary`, `source_url` and `related_urls` from search hits.
fn search_fields(hits: &[SearchHit]) -> Vec<(&'static str, String)> {
  let mut fields = Vec::new();

  if let Some(title) = hits.iter().map(|h| h.title.trim()).find(|t| !t.is_empty()) {
    fields.push(("headline", title.to_string()));
  }

  let snippets: Vec<&str> = hits
    .iter()
    .map(|h| h.snippet.trim())
    .filter(|s| !s.is_empty())
    .collect();
  if !snippets.is_empty() {
    fields.push(("summary", snippets.join(" ")));
  }

  let urls: Vec<&str> = hits
    .iter()
    .map(|h| h.url.trim())
    .filter(|u| !u.is_empty())
    .collect();
  if let Some(first) = urls.first() {
    fields.push(("source_url", first.to_string()));
    fields.push(("related_urls", urls.join(", ")));
  }

  fields
}

#[derive(Default)]
struct Merge {
  fields: BTreeMap<String, String>,
  provenance: BTreeMap<String, Provenance>,
}

impl Merge {
  /// Insert unless a higher-precedence source already supplied the field.
  fn offer(&mut self, key: &str, value: &str, from: Provenance) {
    let value = value.trim();
    if key.is_empty() || value.is_empty() || self.fields.contains_key(key) {
      return;
    }
    self.set(key, value, from);
  }

  fn set(&mut self, key: &str, value: &str, from: Provenance) {
    self.fields.insert(key.to_string(), value.to_string());
    self.provenance.insert(key.to_string(), from);
  }
}
