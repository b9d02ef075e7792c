#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use trendsmith_config::{GraphDef, NodeDescriptor};
use trendsmith_engine::{
  FailureKind, Node, NodeContext, NodeFailure, RunState, Slot, StateUpdate,
};
use trendsmith_workflow::{Graph, Topic};

pub fn topic() -> Topic {
  Topic::new("X", "https://example.com/x")
}

pub fn graph(entry: &str, nodes: Vec<NodeDescriptor>) -> Graph {
  Graph::new(GraphDef {
    name: "test".to_string(),
    entry: entry.to_string(),
    nodes,
  })
  .unwrap()
}

/// Returns a script update every time and counts calls.
#[derive(Default)]
pub struct Succeeds {
  pub calls: AtomicU32,
  pub feedback: Mutex<Vec<Option<String>>>,
}

impl Succeeds {
  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Node for Succeeds {
  fn slot(&self) -> Slot {
    Slot::Script
  }

  async fn invoke(&self, _state: &RunState, ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    self.feedback.lock().unwrap().push(ctx.feedback.clone());
    Ok(StateUpdate::Script(format!("call {}", n)))
  }
}

/// Writes a candidate each call, recording the feedback it was given.
#[derive(Default)]
pub struct Generates {
  pub calls: AtomicU32,
  pub feedback: Mutex<Vec<Option<String>>>,
}

impl Generates {
  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Node for Generates {
  fn slot(&self) -> Slot {
    Slot::GeneratedCode
  }

  async fn invoke(&self, _state: &RunState, ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.feedback.lock().unwrap().push(ctx.feedback.clone());
    Ok(StateUpdate::GeneratedCode(
      trendsmith_sandbox::CodeCandidate::lua("return {}"),
    ))
  }
}

/// Always fails.
pub struct Fails {
  pub slot: Slot,
  pub retryable: bool,
  pub calls: AtomicU32,
}

impl Fails {
  pub fn new(slot: Slot, retryable: bool) -> Self {
    Self {
      slot,
      retryable,
      calls: AtomicU32::new(0),
    }
  }

  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Node for Fails {
  fn slot(&self) -> Slot {
    self.slot
  }

  async fn invoke(&self, _state: &RunState, ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Err(NodeFailure::new(
      FailureKind::Execution,
      format!("attempt {} failed", ctx.attempt),
      self.retryable,
    ))
  }
}

/// Writes a slot it does not claim.
pub struct WrongSlot;

#[async_trait]
impl Node for WrongSlot {
  fn slot(&self) -> Slot {
    Slot::Script
  }

  async fn invoke(&self, _state: &RunState, _ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    Ok(StateUpdate::SocialPosts(Vec::new()))
  }
}

/// Sleeps, optionally ignoring cancellation.
pub struct Sleeps {
  pub duration: Duration,
  pub honor_cancel: bool,
}

#[async_trait]
impl Node for Sleeps {
  fn slot(&self) -> Slot {
    Slot::Script
  }

  async fn invoke(&self, _state: &RunState, ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    if self.honor_cancel {
      tokio::select! {
        _ = tokio::time::sleep(self.duration) => {}
        _ = ctx.cancel.cancelled() => {
          return Err(NodeFailure::fatal(FailureKind::Internal, "cancelled"));
        }
      }
    } else {
      tokio::time::sleep(self.duration).await;
    }
    Ok(StateUpdate::Script("late".to_string()))
  }
}

pub fn arc<T: Node + 'static>(node: T) -> Arc<T> {
  Arc::new(node)
}
