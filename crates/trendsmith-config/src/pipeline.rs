use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::GraphDef;
use crate::sandbox::SandboxPolicy;

/// Complete configuration for a trendsmith pipeline.
///
/// Every section has defaults, so `{}` is a valid configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub sandbox: SandboxPolicy,
  pub analyzer: AnalyzerConfig,
  pub synthesis: SynthesisConfig,
  pub aggregation: AggregationConfig,
  pub generation: GenerationConfig,
  pub search: SearchConfig,
  pub writers: WriterConfig,
  pub engine: EngineSettings,
  /// Custom workflow graph. When absent the CLI picks a built-in variant.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub graph: Option<GraphDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
  pub timeout_ms: u64,
  /// Upper bound on the rendered structural descriptor.
  pub max_descriptor_bytes: usize,
  /// Responses larger than this are cut off before parsing.
  pub max_document_bytes: usize,
  pub user_agent: String,
}

impl Default for AnalyzerConfig {
  fn default() -> Self {
    Self {
      timeout_ms: 10_000,
      max_descriptor_bytes: 4 * 1024,
      max_document_bytes: 2 * 1024 * 1024,
      user_agent: concat!("trendsmith/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
  /// Fields the generated candidate is asked to extract.
  pub target_fields: Vec<String>,
  /// How many times a candidate rejected by the static check is regenerated
  /// within one synthesis call.
  pub max_policy_regenerations: u32,
  pub max_tokens: u32,
  pub temperature: f32,
}

impl Default for SynthesisConfig {
  fn default() -> Self {
    Self {
      target_fields: default_fields(),
      max_policy_regenerations: 2,
      max_tokens: 2_048,
      temperature: 0.2,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
  /// Fields that always appear in the summary, `unknown` when no source has them.
  pub required_fields: Vec<String>,
}

impl Default for AggregationConfig {
  fn default() -> Self {
    Self {
      required_fields: default_fields(),
    }
  }
}

fn default_fields() -> Vec<String> {
  ["headline", "summary", "author", "published_at", "source_url"]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  /// Base URL of an OpenAI-compatible API (`.../v1`).
  pub base_url: String,
  pub model: String,
  /// Environment variable holding the API key.
  pub api_key_env: String,
  pub timeout_ms: u64,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.openai.com/v1".to_string(),
      model: "gpt-4o-mini".to_string(),
      api_key_env: "OPENAI_API_KEY".to_string(),
      timeout_ms: 60_000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub endpoint: String,
  pub api_key_env: String,
  pub max_results: usize,
  pub timeout_ms: u64,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      endpoint: "https://api.tavily.com/search".to_string(),
      api_key_env: "TAVILY_API_KEY".to_string(),
      max_results: 5,
      timeout_ms: 15_000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
  pub platforms: Vec<String>,
  pub max_tokens: u32,
}

impl Default for WriterConfig {
  fn default() -> Self {
    Self {
      platforms: vec![
        "twitter".to_string(),
        "instagram".to_string(),
        "linkedin".to_string(),
      ],
      max_tokens: 1_024,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  /// Time a node gets to return after the run is cancelled.
  pub cancel_grace_ms: u64,
  /// Upper bound on concurrently executing runs in the runner.
  pub max_concurrent_runs: usize,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      cancel_grace_ms: 1_000,
      max_concurrent_runs: 4,
    }
  }
}

impl PipelineConfig {
  /// Load configuration from a JSON file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let config: PipelineConfig =
      serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      })?;

    config.validate()?;
    Ok(config)
  }

  /// Load configuration from `path`, falling back to defaults when the file
  /// does not exist.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      Self::load(path)
    } else {
      Ok(Self::default())
    }
  }

  /// Apply the `OPENAI_API_BASE` / `OPENAI_MODEL_NAME` overrides.
  pub fn apply_env(&mut self) {
    self.apply_env_with(|key| std::env::var(key).ok());
  }

  pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(base_url) = lookup("OPENAI_API_BASE").filter(|v| !v.is_empty()) {
      self.generation.base_url = base_url;
    }
    if let Some(model) = lookup("OPENAI_MODEL_NAME").filter(|v| !v.is_empty()) {
      self.generation.model = model;
    }
  }

  /// Check values that serde alone cannot.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.sandbox.max_duration_ms == 0 {
      return Err(ConfigError::invalid(
        "sandbox.max_duration_ms",
        "must be greater than zero",
      ));
    }
    if self.sandbox.max_memory_bytes < 1024 * 1024 {
      return Err(ConfigError::invalid(
        "sandbox.max_memory_bytes",
        "must be at least 1 MiB",
      ));
    }
    if self.sandbox.max_output_bytes == 0 {
      return Err(ConfigError::invalid(
        "sandbox.max_output_bytes",
        "must be greater than zero",
      ));
    }
    if self.synthesis.target_fields.is_empty() {
      return Err(ConfigError::invalid(
        "synthesis.target_fields",
        "at least one field is required",
      ));
    }
    if let Some(field) = self
      .synthesis
      .target_fields
      .iter()
      .chain(self.aggregation.required_fields.iter())
      .find(|f| !is_field_name(f))
    {
      return Err(ConfigError::invalid(
        "fields",
        format!("'{}' is not a valid field name", field),
      ));
    }
    if self.analyzer.max_descriptor_bytes == 0 {
      return Err(ConfigError::invalid(
        "analyzer.max_descriptor_bytes",
        "must be greater than zero",
      ));
    }
    Ok(())
  }
}

fn is_field_name(name: &str) -> bool {
  let mut chars = name.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
    && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn empty_object_yields_defaults() {
    let config: PipelineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, PipelineConfig::default());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn load_reads_partial_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"{{ "sandbox": {{ "max_duration_ms": 250 }}, "writers": {{ "platforms": ["twitter"] }} }}"#
    )
    .unwrap();

    let config = PipelineConfig::load(file.path()).unwrap();
    assert_eq!(config.sandbox.max_duration_ms, 250);
    assert_eq!(config.writers.platforms, vec!["twitter".to_string()]);
    assert_eq!(config.analyzer, AnalyzerConfig::default());
  }

  #[test]
  fn load_or_default_tolerates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::load_or_default(&dir.path().join("missing.json")).unwrap();
    assert_eq!(config, PipelineConfig::default());
  }

  #[test]
  fn load_reports_parse_errors_with_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();

    let err = PipelineConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("failed to parse"));
  }

  #[test]
  fn validate_rejects_zero_duration() {
    let mut config = PipelineConfig::default();
    config.sandbox.max_duration_ms = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("sandbox.max_duration_ms"));
  }

  #[test]
  fn validate_rejects_bad_field_names() {
    let mut config = PipelineConfig::default();
    config.aggregation.required_fields.push("Bad Field".to_string());
    assert!(config.validate().is_err());
  }

  #[test]
  fn env_overrides_generation_endpoint() {
    let mut config = PipelineConfig::default();
    config.apply_env_with(|key| match key {
      "OPENAI_API_BASE" => Some("http://localhost:5003/v1".to_string()),
      "OPENAI_MODEL_NAME" => Some(String::new()),
      _ => None,
    });

    assert_eq!(config.generation.base_url, "http://localhost:5003/v1");
    assert_eq!(config.generation.model, GenerationConfig::default().model);
  }
}
