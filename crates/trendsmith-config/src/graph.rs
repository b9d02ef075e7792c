use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One node of a workflow graph, as written in configuration.
///
/// Edges are named by target node. A node without a `success_edge` is a
/// terminal node; a node without a `failure_edge` fails the run once its
/// retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
  pub name: String,
  /// Nodes allowed to hand off to this one. Left empty it is derived from
  /// the edges; when given it must match them exactly.
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub predecessors: BTreeSet<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub success_edge: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure_edge: Option<String>,
  #[serde(default)]
  pub max_retries: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Node re-invoked with the failure as feedback before each retry.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub refresh_with: Option<String>,
}

impl NodeDescriptor {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      predecessors: BTreeSet::new(),
      success_edge: None,
      failure_edge: None,
      max_retries: 0,
      timeout_ms: None,
      refresh_with: None,
    }
  }

  pub fn on_success(mut self, target: impl Into<String>) -> Self {
    self.success_edge = Some(target.into());
    self
  }

  pub fn on_failure(mut self, target: impl Into<String>) -> Self {
    self.failure_edge = Some(target.into());
    self
  }

  pub fn retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn refresh_with(mut self, node: impl Into<String>) -> Self {
    self.refresh_with = Some(node.into());
    self
  }

  /// Outgoing edge targets (success first).
  pub fn targets(&self) -> impl Iterator<Item = &str> {
    self
      .success_edge
      .iter()
      .chain(self.failure_edge.iter())
      .map(String::as_str)
  }
}

/// A workflow graph as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDef {
  pub name: String,
  pub entry: String,
  pub nodes: Vec<NodeDescriptor>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn descriptor_omits_unset_fields() {
    let node = NodeDescriptor::new("aggregate").on_success("write_script");
    let json = serde_json::to_value(&node).unwrap();

    assert_eq!(
      json,
      serde_json::json!({
        "name": "aggregate",
        "success_edge": "write_script",
        "max_retries": 0
      })
    );
  }

  #[test]
  fn graph_def_parses_minimal_nodes() {
    let def: GraphDef = serde_json::from_str(
      r#"{
        "name": "tiny",
        "entry": "a",
        "nodes": [
          { "name": "a", "success_edge": "b", "max_retries": 2, "refresh_with": "b" },
          { "name": "b" }
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(def.nodes.len(), 2);
    assert_eq!(def.nodes[0].max_retries, 2);
    assert_eq!(def.nodes[0].refresh_with.as_deref(), Some("b"));
    assert_eq!(def.nodes[1].targets().count(), 0);
  }

  #[test]
  fn targets_lists_success_before_failure() {
    let node = NodeDescriptor::new("x").on_failure("f").on_success("s");
    assert_eq!(node.targets().collect::<Vec<_>>(), vec!["s", "f"]);
  }
}
