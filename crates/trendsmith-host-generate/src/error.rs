use thiserror::Error;

/// Failures of the text generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
  #[error("generation timed out")]
  Timeout,

  /// Rate limited or out of quota.
  #[error("generation quota exhausted: {0}")]
  Quota(String),

  /// The provider answered with something that is not usable text.
  #[error("malformed generation response: {0}")]
  Malformed(String),

  #[error("generation authentication failed: {0}")]
  Auth(String),

  /// Transport failure or unexpected status.
  #[error("generation request failed: {0}")]
  Request(String),
}

impl GenerationError {
  pub fn kind(&self) -> &'static str {
    match self {
      GenerationError::Timeout => "timeout",
      GenerationError::Quota(_) => "quota",
      GenerationError::Malformed(_) => "malformed",
      GenerationError::Auth(_) => "auth",
      GenerationError::Request(_) => "request",
    }
  }

  /// Worth retrying with the same prompt.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      GenerationError::Timeout
        | GenerationError::Quota(_)
        | GenerationError::Malformed(_)
        | GenerationError::Request(_)
    )
  }
}
