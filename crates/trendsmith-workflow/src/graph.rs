use std::collections::{BTreeSet, HashMap, HashSet};

use trendsmith_config::{GraphDef, NodeDescriptor};

use crate::error::WorkflowError;

/// A validated workflow graph.
///
/// Nodes keep their declaration order; predecessor sets are filled in from
/// the success and failure edges.
#[derive(Debug, Clone)]
pub struct Graph {
  name: String,
  entry: String,
  /// Node descriptors in declaration order.
  nodes: Vec<NodeDescriptor>,
  /// node name -> index into `nodes`.
  index: HashMap<String, usize>,
}

impl Graph {
  /// Validate a graph definition.
  pub fn new(def: GraphDef) -> Result<Self, WorkflowError> {
    if def.nodes.is_empty() {
      return Err(WorkflowError::EmptyGraph);
    }

    let mut index = HashMap::with_capacity(def.nodes.len());
    for (i, node) in def.nodes.iter().enumerate() {
      if index.insert(node.name.clone(), i).is_some() {
        return Err(WorkflowError::DuplicateNode(node.name.clone()));
      }
    }

    if !index.contains_key(&def.entry) {
      return Err(WorkflowError::UnknownEntry(def.entry));
    }

    // Edge and refresh targets must exist
    for node in &def.nodes {
      for target in node.targets().chain(node.refresh_with.as_deref()) {
        if !index.contains_key(target) {
          return Err(WorkflowError::InvalidEdge {
            from: node.name.clone(),
            to: target.to_string(),
          });
        }
      }
      if node.refresh_with.as_deref() == Some(node.name.as_str()) {
        return Err(WorkflowError::SelfRefresh(node.name.clone()));
      }
    }

    // Derive predecessors from edges, verify declared ones
    let mut upstream: HashMap<&str, BTreeSet<String>> = HashMap::new();
    for node in &def.nodes {
      for target in node.targets() {
        upstream
          .entry(target)
          .or_default()
          .insert(node.name.clone());
      }
    }

    let mut nodes = def.nodes.clone();
    for node in &mut nodes {
      let actual = upstream.remove(node.name.as_str()).unwrap_or_default();
      if !node.predecessors.is_empty() && node.predecessors != actual {
        return Err(WorkflowError::PredecessorMismatch {
          node: node.name.clone(),
          declared: node.predecessors.iter().cloned().collect(),
          actual: actual.into_iter().collect(),
        });
      }
      node.predecessors = actual;
    }

    let graph = Self {
      name: def.name,
      entry: def.entry,
      nodes,
      index,
    };

    graph.check_acyclic()?;
    graph.check_reachable()?;

    Ok(graph)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The node every run starts at.
  pub fn entry(&self) -> &str {
    &self.entry
  }

  pub fn node(&self, name: &str) -> Option<&NodeDescriptor> {
    self.index.get(name).map(|&i| &self.nodes[i])
  }

  /// Node descriptors in declaration order.
  pub fn nodes(&self) -> &[NodeDescriptor] {
    &self.nodes
  }

  /// Nodes that may hand off to `name`.
  pub fn upstream(&self, name: &str) -> Option<&BTreeSet<String>> {
    self.node(name).map(|n| &n.predecessors)
  }

  /// Edge targets of `name` (success first).
  pub fn downstream(&self, name: &str) -> Vec<&str> {
    self
      .node(name)
      .map(|n| n.targets().collect())
      .unwrap_or_default()
  }

  /// Convert back into a serializable definition.
  pub fn to_def(&self) -> GraphDef {
    GraphDef {
      name: self.name.clone(),
      entry: self.entry.clone(),
      nodes: self.nodes.clone(),
    }
  }

  fn check_acyclic(&self) -> Result<(), WorkflowError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
      Unvisited,
      InProgress,
      Done,
    }

    let mut marks = vec![Mark::Unvisited; self.nodes.len()];

    for start in 0..self.nodes.len() {
      if marks[start] != Mark::Unvisited {
        continue;
      }
      // Iterative DFS: (node index, next target position)
      let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
      marks[start] = Mark::InProgress;

      while let Some((current, pos)) = stack.pop() {
        let targets: Vec<&str> = self.nodes[current].targets().collect();
        if pos < targets.len() {
          stack.push((current, pos + 1));
          let next = self.index[targets[pos]];
          match marks[next] {
            Mark::InProgress => {
              return Err(WorkflowError::Cycle(self.nodes[next].name.clone()));
            }
            Mark::Unvisited => {
              marks[next] = Mark::InProgress;
              stack.push((next, 0));
            }
            Mark::Done => {}
          }
        } else {
          marks[current] = Mark::Done;
        }
      }
    }

    Ok(())
  }

  fn check_reachable(&self) -> Result<(), WorkflowError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue = vec![self.entry.as_str()];

    while let Some(name) = queue.pop() {
      if !seen.insert(name) {
        continue;
      }
      if let Some(node) = self.node(name) {
        queue.extend(node.targets());
        queue.extend(node.refresh_with.as_deref());
      }
    }

    match self.nodes.iter().find(|n| !seen.contains(n.name.as_str())) {
      Some(orphan) => Err(WorkflowError::Unreachable(orphan.name.clone())),
      None => Ok(()),
    }
  }
}
