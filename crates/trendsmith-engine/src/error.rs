use thiserror::Error;
use trendsmith_workflow::WorkflowError;

/// Errors that prevent a run from starting or the runner from accepting work.
///
/// Node failures are not errors at this level: they are recorded in
/// [`RunState::errors`](crate::RunState::errors) and routed along the graph.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid topic: {0}")]
  InvalidTopic(#[source] WorkflowError),

  #[error("no implementation registered for node '{0}'")]
  UnregisteredNode(String),

  #[error("pipeline runner channel closed")]
  ChannelClosed,
}
