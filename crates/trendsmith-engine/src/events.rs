//! Execution events and notifiers for observability.
//!
//! The engine emits one event per run and node transition. Consumers decide
//! what to do with them (print progress, persist, stream to a UI).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  Success,
  Failure,
}

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  RunStarted {
    run_id: String,
    topic_id: String,
    graph: String,
  },

  NodeStarted {
    run_id: String,
    node: String,
    attempt: u32,
  },

  NodeCompleted {
    run_id: String,
    node: String,
    slot: Slot,
  },

  NodeFailed {
    run_id: String,
    node: String,
    attempt: u32,
    error: String,
    retryable: bool,
  },

  EdgeFollowed {
    run_id: String,
    from: String,
    to: String,
    edge: EdgeKind,
  },

  RunCompleted { run_id: String },

  RunFailed {
    run_id: String,
    node: String,
    error: String,
  },

  RunCancelled { run_id: String, node: String },
}

/// Receives execution events.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a run; volume is a handful of
/// events per node.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
