use async_trait::async_trait;
use trendsmith_aggregate::aggregate;

use crate::node::{FailureKind, Node, NodeContext, NodeFailure};
use crate::state::{RunState, Slot, StateUpdate};

pub struct AggregateNode {
  required_fields: Vec<String>,
}

impl AggregateNode {
  pub fn new(required_fields: Vec<String>) -> Self {
    Self { required_fields }
  }
}

#[async_trait]
impl Node for AggregateNode {
  fn slot(&self) -> Slot {
    Slot::Summary
  }

  async fn invoke(&self, state: &RunState, _ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let summary = aggregate(
      state.execution_result(),
      state.search_results().unwrap_or(&[]),
      state.topic(),
      &self.required_fields,
    )
    .map_err(|e| NodeFailure::fatal(FailureKind::Aggregation, e.to_string()))?;
    Ok(StateUpdate::Summary(summary))
  }
}
