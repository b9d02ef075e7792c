use async_trait::async_trait;
use trendsmith_sandbox::{Isolation, Sandbox};

use crate::node::{FailureKind, Node, NodeContext, NodeFailure};
use crate::state::{RunState, Slot, StateUpdate};

/// Runs the current candidate against the fetched document.
///
/// A non-ok result is still stored, then reported as a retryable failure so
/// the engine can regenerate the candidate with the diagnostic.
#[derive(Debug, Default)]
pub struct ExecuteNode {
  isolation: Isolation,
}

impl ExecuteNode {
  pub fn new(isolation: Isolation) -> Self {
    Self { isolation }
  }
}

#[async_trait]
impl Node for ExecuteNode {
  fn slot(&self) -> Slot {
    Slot::ExecutionResult
  }

  async fn invoke(&self, state: &RunState, ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let candidate = state
      .generated_code()
      .ok_or_else(|| NodeFailure::missing_input(Slot::GeneratedCode))?;
    let document = state
      .document()
      .ok_or_else(|| NodeFailure::missing_input(Slot::StructureDescriptor))?;

    let sandbox = Sandbox::shared(ctx.policy.clone()).with_isolation(self.isolation.clone());
    let result = sandbox
      .execute(candidate, document, &ctx.cancel)
      .await
      .map_err(|e| NodeFailure::fatal(FailureKind::Execution, e.to_string()))?;

    if result.status.is_ok() {
      Ok(StateUpdate::ExecutionResult(result))
    } else {
      Err(
        NodeFailure::retryable(FailureKind::Execution, result.describe())
          .with_update(StateUpdate::ExecutionResult(result)),
      )
    }
  }
}
