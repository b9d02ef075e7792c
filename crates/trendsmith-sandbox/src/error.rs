use thiserror::Error;

/// Errors from [`Sandbox::execute`](crate::Sandbox::execute).
///
/// Faults inside the candidate never surface here; they are reported through
/// [`ExecutionStatus`](crate::ExecutionStatus).
#[derive(Debug, Error)]
pub enum SandboxError {
  /// The run was cancelled while the candidate was executing.
  #[error("sandbox execution cancelled")]
  Cancelled,
}
