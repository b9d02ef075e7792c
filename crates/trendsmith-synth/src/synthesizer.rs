use std::sync::Arc;

use tracing::{info, instrument, warn};
use trendsmith_analyzer::StructureDescriptor;
use trendsmith_config::{SandboxPolicy, SynthesisConfig};
use trendsmith_host_generate::{GenerationConstraints, TextGenerator};
use trendsmith_sandbox::CodeCandidate;

use crate::check::check;
use crate::error::SynthesisFailure;
use crate::prompt::{self, SYSTEM_PROMPT, extract_code};

/// Turns a structure descriptor into a statically vetted Lua candidate.
pub struct Synthesizer {
  generator: Arc<dyn TextGenerator>,
  policy: Arc<SandboxPolicy>,
  config: SynthesisConfig,
}

impl Synthesizer {
  pub fn new(
    generator: Arc<dyn TextGenerator>,
    policy: Arc<SandboxPolicy>,
    config: SynthesisConfig,
  ) -> Self {
    Self {
      generator,
      policy,
      config,
    }
  }

  /// Generate a candidate for `target_fields`.
  ///
  /// `attempt_hint` carries feedback from an earlier failure (for example a
  /// sandbox diagnostic). A candidate rejected by the static check is
  /// regenerated with the rejection reasons, up to
  /// `max_policy_regenerations` extra times. Generation errors end the call.
  #[instrument(skip_all, fields(url = %descriptor.url, field_count = target_fields.len()))]
  pub async fn synthesize(
    &self,
    descriptor: &StructureDescriptor,
    target_fields: &[String],
    attempt_hint: Option<&str>,
  ) -> Result<CodeCandidate, SynthesisFailure> {
    let constraints = GenerationConstraints::new(self.config.max_tokens, self.config.temperature)
      .with_system(SYSTEM_PROMPT);
    let attempts = self.config.max_policy_regenerations + 1;

    let mut hint = attempt_hint.map(str::to_string);
    let mut reasons = Vec::new();

    for attempt in 1..=attempts {
      let prompt = prompt::render(descriptor, target_fields, &self.policy, hint.as_deref())?;
      let reply = self.generator.generate(&prompt, &constraints).await?;
      let source = extract_code(&reply);

      match check(&source, &self.policy) {
        Ok(()) => {
          info!(attempt, source_bytes = source.len(), "candidate_accepted");
          return Ok(CodeCandidate::lua(source));
        }
        Err(rejected) => {
          warn!(attempt, reasons = ?rejected, "candidate_rejected");
          hint = Some(format!(
            "The static check rejected the program: {}.",
            rejected.join("; ")
          ));
          reasons = rejected;
        }
      }
    }

    Err(SynthesisFailure::PolicyViolation { reasons, attempts })
  }
}
