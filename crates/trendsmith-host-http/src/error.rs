use thiserror::Error;

/// Errors returned by the HTTP capability.
#[derive(Debug, Error)]
pub enum HttpError {
  /// The URL could not be parsed or uses an unsupported scheme.
  #[error("invalid url '{url}': {message}")]
  InvalidUrl { url: String, message: String },

  /// The policy refused the request before it was sent.
  #[error("request to '{url}' blocked: {reason}")]
  Blocked { url: String, reason: String },

  /// The request did not complete within the configured timeout.
  #[error("request to '{url}' timed out")]
  Timeout { url: String },

  /// The server answered with a non-success status.
  #[error("request to '{url}' returned status {status}")]
  Status { url: String, status: u16 },

  /// Connection, TLS, redirect or body read failure.
  #[error("request to '{url}' failed: {message}")]
  Transport { url: String, message: String },

  /// The client itself could not be constructed.
  #[error("http client error: {0}")]
  Client(String),
}

impl HttpError {
  pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidUrl {
      url: url.into(),
      message: message.into(),
    }
  }

  pub fn blocked(url: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Blocked {
      url: url.into(),
      reason: reason.into(),
    }
  }

  pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Transport {
      url: url.into(),
      message: message.into(),
    }
  }

  /// Map a reqwest error, keeping timeouts distinguishable.
  pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Timeout {
        url: url.to_string(),
      }
    } else if let Some(status) = err.status() {
      Self::Status {
        url: url.to_string(),
        status: status.as_u16(),
      }
    } else {
      Self::transport(url, err.to_string())
    }
  }
}
