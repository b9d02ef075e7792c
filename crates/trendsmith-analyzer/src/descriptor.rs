use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// Extraction strategy hinted to the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedApproach {
  JsonLd,
  ContentSelector,
  TextExtraction,
  GeneralScraping,
}

impl SuggestedApproach {
  pub fn as_str(&self) -> &'static str {
    match self {
      SuggestedApproach::JsonLd => "json_ld",
      SuggestedApproach::ContentSelector => "content_selector",
      SuggestedApproach::TextExtraction => "text_extraction",
      SuggestedApproach::GeneralScraping => "general_scraping",
    }
  }
}

/// Compact structural summary of a page.
///
/// Holds tag/attribute shape only; page text beyond the title is never copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDescriptor {
  pub url: String,
  pub title: Option<String>,
  pub lang: Option<String>,
  pub total_elements: usize,
  pub has_json_ld: bool,
  pub has_meta_description: bool,
  pub has_microdata: bool,
  pub content_selectors: Vec<String>,
  pub text_selectors: Vec<String>,
  pub image_selectors: Vec<String>,
  pub link_selectors: Vec<String>,
  pub suggested_approach: SuggestedApproach,
  /// Depth-indented `tag#id.class` lines.
  pub skeleton: String,
  /// The skeleton was cut at the size cap.
  pub truncated: bool,
}

impl StructureDescriptor {
  /// Render as a plain-text block for a generation prompt.
  pub fn to_prompt(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "URL: {}", self.url);
    if let Some(title) = &self.title {
      let _ = writeln!(out, "Title: {}", title);
    }
    if let Some(lang) = &self.lang {
      let _ = writeln!(out, "Language: {}", lang);
    }
    let _ = writeln!(out, "Elements: {}", self.total_elements);
    let _ = writeln!(
      out,
      "JSON-LD: {}, meta description: {}, microdata: {}",
      yes_no(self.has_json_ld),
      yes_no(self.has_meta_description),
      yes_no(self.has_microdata)
    );
    let _ = writeln!(out, "Suggested approach: {}", self.suggested_approach.as_str());
    for (label, selectors) in [
      ("Content selectors", &self.content_selectors),
      ("Text selectors", &self.text_selectors),
      ("Image selectors", &self.image_selectors),
      ("Link selectors", &self.link_selectors),
    ] {
      if !selectors.is_empty() {
        let _ = writeln!(out, "{}: {}", label, selectors.join(", "));
      }
    }
    out.push_str("Skeleton:\n");
    out.push_str(&self.skeleton);
    if self.truncated {
      out.push_str("\n(skeleton truncated)");
    }
    out
  }
}

fn yes_no(value: bool) -> &'static str {
  if value { "yes" } else { "no" }
}
