//! The node seam: a named unit of work that reads the run state and writes
//! one slot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use trendsmith_config::SandboxPolicy;

use crate::state::{RunState, Slot, StateUpdate};

/// Category of a node failure, recorded in the error trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  Analysis,
  Synthesis,
  Execution,
  Search,
  Aggregation,
  Generation,
  /// The per-invocation timeout elapsed.
  Timeout,
  /// Missing inputs or a contract breach by the node itself.
  Internal,
}

/// A failed invocation.
#[derive(Debug, Clone)]
pub struct NodeFailure {
  pub kind: FailureKind,
  pub message: String,
  /// Another attempt may succeed.
  pub retryable: bool,
  /// Partial result applied before the failure is recorded.
  pub update: Option<StateUpdate>,
}

impl NodeFailure {
  pub fn new(kind: FailureKind, message: impl Into<String>, retryable: bool) -> Self {
    Self {
      kind,
      message: message.into(),
      retryable,
      update: None,
    }
  }

  pub fn retryable(kind: FailureKind, message: impl Into<String>) -> Self {
    Self::new(kind, message, true)
  }

  pub fn fatal(kind: FailureKind, message: impl Into<String>) -> Self {
    Self::new(kind, message, false)
  }

  /// A required input slot is empty.
  pub fn missing_input(slot: Slot) -> Self {
    Self::fatal(FailureKind::Internal, format!("missing input: {}", slot))
  }

  pub fn with_update(mut self, update: StateUpdate) -> Self {
    self.update = Some(update);
    self
  }
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct NodeContext {
  pub run_id: String,
  /// Zero for the first attempt.
  pub attempt: u32,
  /// Message of the failure that triggered this invocation, if any.
  pub feedback: Option<String>,
  pub policy: Arc<SandboxPolicy>,
  /// Cancelled when the run is cancelled.
  pub cancel: CancellationToken,
}

#[async_trait]
pub trait Node: Send + Sync {
  /// The only slot this node may write.
  fn slot(&self) -> Slot;

  async fn invoke(&self, state: &RunState, ctx: &NodeContext) -> Result<StateUpdate, NodeFailure>;
}

/// Node implementations by graph node name.
#[derive(Default, Clone)]
pub struct NodeRegistry {
  nodes: HashMap<String, Arc<dyn Node>>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `node` under `name`, replacing any earlier registration.
  pub fn register(&mut self, name: impl Into<String>, node: Arc<dyn Node>) -> &mut Self {
    self.nodes.insert(name.into(), node);
    self
  }

  pub fn with(mut self, name: impl Into<String>, node: Arc<dyn Node>) -> Self {
    self.register(name, node);
    self
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Node>> {
    self.nodes.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.nodes.contains_key(name)
  }
}
