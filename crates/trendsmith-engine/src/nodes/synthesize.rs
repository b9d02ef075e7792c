use async_trait::async_trait;
use trendsmith_synth::Synthesizer;

use crate::node::{FailureKind, Node, NodeContext, NodeFailure};
use crate::state::{RunState, Slot, StateUpdate};

/// Generates a candidate for the analyzed page.
///
/// When invoked as a refresh, the previous failure (for example a sandbox
/// diagnostic) is passed to the synthesizer as an attempt hint.
pub struct SynthesizeNode {
  synthesizer: Synthesizer,
  target_fields: Vec<String>,
}

impl SynthesizeNode {
  pub fn new(synthesizer: Synthesizer, target_fields: Vec<String>) -> Self {
    Self {
      synthesizer,
      target_fields,
    }
  }
}

#[async_trait]
impl Node for SynthesizeNode {
  fn slot(&self) -> Slot {
    Slot::GeneratedCode
  }

  async fn invoke(&self, state: &RunState, ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let descriptor = state
      .structure_descriptor()
      .ok_or_else(|| NodeFailure::missing_input(Slot::StructureDescriptor))?;

    let candidate = self
      .synthesizer
      .synthesize(descriptor, &self.target_fields, ctx.feedback.as_deref())
      .await
      .map_err(|failure| {
        NodeFailure::new(
          FailureKind::Synthesis,
          failure.to_string(),
          failure.is_transient(),
        )
      })?;

    Ok(StateUpdate::GeneratedCode(candidate))
  }
}
