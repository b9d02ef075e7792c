use std::sync::Arc;

use async_trait::async_trait;
use trendsmith_host_search::SearchProvider;

use crate::node::{FailureKind, Node, NodeContext, NodeFailure};
use crate::state::{RunState, Slot, StateUpdate};

/// Searches for the topic title.
pub struct SearchNode {
  provider: Arc<dyn SearchProvider>,
}

impl SearchNode {
  pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
    Self { provider }
  }
}

#[async_trait]
impl Node for SearchNode {
  fn slot(&self) -> Slot {
    Slot::SearchResults
  }

  async fn invoke(&self, state: &RunState, _ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let hits = self
      .provider
      .search(&state.topic().title)
      .await
      .map_err(|e| NodeFailure::new(FailureKind::Search, e.to_string(), e.is_transient()))?;
    Ok(StateUpdate::SearchResults(hits))
  }
}
