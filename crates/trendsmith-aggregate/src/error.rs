use thiserror::Error;

/// The aggregator's inputs were malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationFailure {
  #[error("missing required field: {field}")]
  MissingRequiredField { field: String },
}

impl AggregationFailure {
  pub fn missing(field: impl Into<String>) -> Self {
    AggregationFailure::MissingRequiredField {
      field: field.into(),
    }
  }
}
