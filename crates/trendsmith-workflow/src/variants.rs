//! Built-in workflow graphs.

use std::str::FromStr;

use trendsmith_config::{GraphDef, NodeDescriptor};

/// Names of the built-in nodes.
pub mod nodes {
  pub const ANALYZE: &str = "analyze";
  pub const SYNTHESIZE: &str = "synthesize";
  pub const EXECUTE: &str = "execute";
  pub const SEARCH: &str = "search";
  pub const AGGREGATE: &str = "aggregate";
  pub const WRITE_SCRIPT: &str = "write_script";
  pub const WRITE_SOCIAL: &str = "write_social";
}

/// Selector for the built-in graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphVariant {
  Standard,
  SearchOnly,
}

impl GraphVariant {
  pub fn graph_def(&self) -> GraphDef {
    match self {
      GraphVariant::Standard => standard_graph(),
      GraphVariant::SearchOnly => search_only_graph(),
    }
  }
}

impl FromStr for GraphVariant {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "standard" => Ok(GraphVariant::Standard),
      "search-only" | "search_only" => Ok(GraphVariant::SearchOnly),
      other => Err(format!("unknown graph variant: {}", other)),
    }
  }
}

/// The full pipeline.
///
/// ```text
/// analyze ─▶ synthesize ─▶ execute ─▶ search ─▶ aggregate ─▶ write_script ─▶ write_social
///    │            │           │          ▲ │        ▲
///    └────────────┴───────────┴─failure──┘ └failure─┘
/// ```
///
/// Execute refreshes its candidate through synthesize before every retry.
pub fn standard_graph() -> GraphDef {
  GraphDef {
    name: "standard".to_string(),
    entry: nodes::ANALYZE.to_string(),
    nodes: vec![
      NodeDescriptor::new(nodes::ANALYZE)
        .on_success(nodes::SYNTHESIZE)
        .on_failure(nodes::SEARCH)
        .retries(2)
        .timeout_ms(30_000),
      NodeDescriptor::new(nodes::SYNTHESIZE)
        .on_success(nodes::EXECUTE)
        .on_failure(nodes::SEARCH)
        .retries(2)
        .timeout_ms(180_000),
      NodeDescriptor::new(nodes::EXECUTE)
        .on_success(nodes::SEARCH)
        .on_failure(nodes::SEARCH)
        .retries(2)
        .refresh_with(nodes::SYNTHESIZE),
      NodeDescriptor::new(nodes::SEARCH)
        .on_success(nodes::AGGREGATE)
        .on_failure(nodes::AGGREGATE)
        .retries(1)
        .timeout_ms(30_000),
      NodeDescriptor::new(nodes::AGGREGATE).on_success(nodes::WRITE_SCRIPT),
      NodeDescriptor::new(nodes::WRITE_SCRIPT)
        .on_success(nodes::WRITE_SOCIAL)
        .retries(2)
        .timeout_ms(120_000),
      NodeDescriptor::new(nodes::WRITE_SOCIAL)
        .retries(2)
        .timeout_ms(180_000),
    ],
  }
}

/// Skip scraping entirely and summarize from search results.
pub fn search_only_graph() -> GraphDef {
  GraphDef {
    name: "search_only".to_string(),
    entry: nodes::SEARCH.to_string(),
    nodes: vec![
      NodeDescriptor::new(nodes::SEARCH)
        .on_success(nodes::AGGREGATE)
        .on_failure(nodes::AGGREGATE)
        .retries(1)
        .timeout_ms(30_000),
      NodeDescriptor::new(nodes::AGGREGATE).on_success(nodes::WRITE_SCRIPT),
      NodeDescriptor::new(nodes::WRITE_SCRIPT)
        .on_success(nodes::WRITE_SOCIAL)
        .retries(2)
        .timeout_ms(120_000),
      NodeDescriptor::new(nodes::WRITE_SOCIAL)
        .retries(2)
        .timeout_ms(180_000),
    ],
  }
}
