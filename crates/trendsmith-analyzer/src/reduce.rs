use std::fmt::Write;

use scraper::{ElementRef, Html, Selector};

use crate::descriptor::{StructureDescriptor, SuggestedApproach};

/// Subtrees that carry no extractable structure.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "svg", "template"];

const MAX_DEPTH: usize = 24;
const MAX_CLASSES: usize = 3;

const CONTENT_PROBES: &[&str] = &[
  "main",
  "article",
  ".content",
  ".main-content",
  "#content",
  ".post",
  ".entry",
];
const TEXT_PROBES: &[&str] = &["p", "h1", "h2", "h3", ".text", ".description", ".summary"];
const IMAGE_PROBES: &[&str] = &["img", ".image", ".photo", "figure img"];
const LINK_PROBES: &[&str] = &["a[href]", ".link", ".more-link"];

/// Reduce a raw page to a descriptor whose skeleton fits in
/// `max_skeleton_bytes`.
pub fn reduce(url: &str, html: &str, max_skeleton_bytes: usize) -> StructureDescriptor {
  let doc = Html::parse_document(html);

  let content_selectors = probe_all(&doc, CONTENT_PROBES, 3);
  let text_selectors = probe_all(&doc, TEXT_PROBES, 5);
  let image_selectors = probe_all(&doc, IMAGE_PROBES, 3);
  let link_selectors = probe_all(&doc, LINK_PROBES, 3);

  let has_json_ld = matches(&doc, r#"script[type="application/ld+json"]"#);
  let has_meta_description = matches(&doc, r#"meta[name="description"]"#);
  let has_microdata = matches(&doc, "[itemscope]");

  let suggested_approach = if has_json_ld {
    SuggestedApproach::JsonLd
  } else if !content_selectors.is_empty() {
    SuggestedApproach::ContentSelector
  } else if !text_selectors.is_empty() {
    SuggestedApproach::TextExtraction
  } else {
    SuggestedApproach::GeneralScraping
  };

  let lang = doc
    .root_element()
    .value()
    .attr("lang")
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .map(str::to_string);

  let total_elements = doc.tree.nodes().filter(|n| n.value().is_element()).count();

  let mut skeleton = Skeleton::new(max_skeleton_bytes);
  skeleton.walk(doc.root_element(), 0, 1);

  StructureDescriptor {
    url: url.to_string(),
    title: first_text(&doc, "title"),
    lang,
    total_elements,
    has_json_ld,
    has_meta_description,
    has_microdata,
    content_selectors,
    text_selectors,
    image_selectors,
    link_selectors,
    suggested_approach,
    skeleton: skeleton.out,
    truncated: skeleton.truncated,
  }
}

fn matches(doc: &Html, css: &str) -> bool {
  Selector::parse(css)
    .map(|selector| doc.select(&selector).next().is_some())
    .unwrap_or(false)
}

fn probe_all(doc: &Html, probes: &[&str], limit: usize) -> Vec<String> {
  probes
    .iter()
    .filter(|css| matches(doc, css))
    .take(limit)
    .map(|css| css.to_string())
    .collect()
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
  let selector = Selector::parse(css).ok()?;
  let element = doc.select(&selector).next()?;
  let text = element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
  (!text.is_empty()).then_some(text)
}

/// `tag#id.class1.class2`
fn label(element: ElementRef<'_>) -> String {
  let value = element.value();
  let mut label = value.name().to_string();
  if let Some(id) = value.id() {
    label.push('#');
    label.push_str(id);
  }
  for class in value.classes().take(MAX_CLASSES) {
    label.push('.');
    label.push_str(class);
  }
  label
}

struct Skeleton {
  out: String,
  limit: usize,
  truncated: bool,
}

impl Skeleton {
  fn new(limit: usize) -> Self {
    Self {
      out: String::new(),
      limit,
      truncated: false,
    }
  }

  /// Emit `element` (standing for `repeat` identical siblings) and its
  /// subtree.
  fn walk(&mut self, element: ElementRef<'_>, depth: usize, repeat: usize) {
    if self.truncated {
      return;
    }

    let mut line = "  ".repeat(depth);
    line.push_str(&label(element));
    if repeat > 1 {
      let _ = write!(line, " ×{}", repeat);
    }
    if !self.push_line(&line) || depth >= MAX_DEPTH {
      return;
    }

    let children: Vec<(ElementRef<'_>, String)> = element
      .children()
      .filter_map(ElementRef::wrap)
      .filter(|child| !SKIPPED_TAGS.contains(&child.value().name()))
      .map(|child| (child, label(child)))
      .collect();

    let mut i = 0;
    while i < children.len() {
      let mut run = 1;
      while i + run < children.len() && children[i + run].1 == children[i].1 {
        run += 1;
      }
      self.walk(children[i].0, depth + 1, run);
      i += run;
    }
  }

  fn push_line(&mut self, line: &str) -> bool {
    let separator = usize::from(!self.out.is_empty());
    if self.out.len() + separator + line.len() > self.limit {
      self.truncated = true;
      return false;
    }
    if separator == 1 {
      self.out.push('\n');
    }
    self.out.push_str(line);
    true
  }
}
