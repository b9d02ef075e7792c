use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path:?}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("failed to parse config file {path:?}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },

  #[error("invalid config value for '{field}': {message}")]
  Invalid { field: String, message: String },
}

impl ConfigError {
  pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Invalid {
      field: field.into(),
      message: message.into(),
    }
  }
}
