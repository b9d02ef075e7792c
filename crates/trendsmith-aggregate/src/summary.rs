use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Placeholder for a required field no source supplied.
pub const UNKNOWN: &str = "unknown";

/// Where a summary field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  Scrape,
  Search,
  Topic,
  Unknown,
}

/// Merged view of one topic, handed unchanged to the writers.
///
/// Maps are ordered so identical inputs serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
  pub topic_id: String,
  pub topic_title: String,
  pub source_url: String,
  pub fields: BTreeMap<String, String>,
  pub provenance: BTreeMap<String, Provenance>,
  /// URLs that contributed, topic source first.
  pub sources: Vec<String>,
}

impl Summary {
  pub fn get(&self, field: &str) -> Option<&str> {
    self.fields.get(field).map(String::as_str)
  }

  /// Fields a source actually supplied (not `unknown` placeholders).
  pub fn known_fields(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .fields
      .iter()
      .filter(|(k, _)| self.provenance.get(*k) != Some(&Provenance::Unknown))
      .map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Render as `key: value` lines for a writer prompt.
  pub fn to_prompt(&self) -> String {
    let mut out = format!("Topic: {}\nSource: {}\n", self.topic_title, self.source_url);
    for (key, value) in self.known_fields() {
      if key == "topic_title" || key == "topic_url" {
        continue;
      }
      out.push_str(key);
      out.push_str(": ");
      out.push_str(value);
      out.push('\n');
    }
    out
  }
}
