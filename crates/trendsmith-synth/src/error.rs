use thiserror::Error;
use trendsmith_host_generate::GenerationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthesisFailure {
  #[error(transparent)]
  Generation(#[from] GenerationError),

  /// Every attempt was rejected by the static check.
  #[error("candidate rejected after {attempts} attempts: {}", reasons.join("; "))]
  PolicyViolation { reasons: Vec<String>, attempts: u32 },

  #[error("failed to render synthesis prompt: {0}")]
  Template(String),
}

impl SynthesisFailure {
  pub fn kind(&self) -> &'static str {
    match self {
      SynthesisFailure::Generation(e) => e.kind(),
      SynthesisFailure::PolicyViolation { .. } => "policy_violation",
      SynthesisFailure::Template(_) => "template",
    }
  }

  /// A fresh attempt may succeed. Policy rejections count as transient since
  /// generation is not deterministic.
  pub fn is_transient(&self) -> bool {
    match self {
      SynthesisFailure::Generation(e) => e.is_transient(),
      SynthesisFailure::PolicyViolation { .. } => true,
      SynthesisFailure::Template(_) => false,
    }
  }
}
