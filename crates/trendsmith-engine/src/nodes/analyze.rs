use std::sync::Arc;

use async_trait::async_trait;
use trendsmith_analyzer::StructureAnalyzer;
use trendsmith_sandbox::Document;

use crate::node::{FailureKind, Node, NodeContext, NodeFailure};
use crate::state::{RunState, Slot, StateUpdate};

/// Fetches the topic's source page and stores its descriptor and document.
pub struct AnalyzeNode {
  analyzer: Arc<StructureAnalyzer>,
}

impl AnalyzeNode {
  pub fn new(analyzer: Arc<StructureAnalyzer>) -> Self {
    Self { analyzer }
  }
}

#[async_trait]
impl Node for AnalyzeNode {
  fn slot(&self) -> Slot {
    Slot::StructureDescriptor
  }

  async fn invoke(&self, state: &RunState, _ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let url = state
      .topic()
      .url()
      .map_err(|e| NodeFailure::fatal(FailureKind::Analysis, e.to_string()))?;

    let analysis = self.analyzer.analyze(&url).await.map_err(|failure| {
      NodeFailure::new(
        FailureKind::Analysis,
        failure.to_string(),
        failure.is_transient(),
      )
    })?;

    Ok(StateUpdate::Analysis {
      descriptor: analysis.descriptor,
      document: Document::new(analysis.url, analysis.html),
    })
  }
}
