use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("graph has no nodes")]
  EmptyGraph,

  #[error("duplicate node name: {0}")]
  DuplicateNode(String),

  #[error("entry node not found: {0}")]
  UnknownEntry(String),

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("node '{0}' refreshes through itself")]
  SelfRefresh(String),

  #[error("declared predecessors of '{node}' do not match its edges: declared {declared:?}, actual {actual:?}")]
  PredecessorMismatch {
    node: String,
    declared: Vec<String>,
    actual: Vec<String>,
  },

  #[error("graph contains a cycle through node '{0}'")]
  Cycle(String),

  #[error("node '{0}' is unreachable from the entry node")]
  Unreachable(String),

  #[error("invalid topic: {0}")]
  InvalidTopic(String),
}
