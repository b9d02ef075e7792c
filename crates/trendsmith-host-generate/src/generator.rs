use async_trait::async_trait;

use crate::error::GenerationError;

/// Limits passed with each prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConstraints {
  pub max_tokens: u32,
  pub temperature: f32,
  /// Optional system instruction placed before the prompt.
  pub system: Option<String>,
}

impl Default for GenerationConstraints {
  fn default() -> Self {
    Self {
      max_tokens: 1024,
      temperature: 0.7,
      system: None,
    }
  }
}

impl GenerationConstraints {
  pub fn new(max_tokens: u32, temperature: f32) -> Self {
    Self {
      max_tokens,
      temperature,
      system: None,
    }
  }

  pub fn with_system(mut self, system: impl Into<String>) -> Self {
    self.system = Some(system.into());
    self
  }
}

/// Opaque text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
  async fn generate(
    &self,
    prompt: &str,
    constraints: &GenerationConstraints,
  ) -> Result<String, GenerationError>;
}
