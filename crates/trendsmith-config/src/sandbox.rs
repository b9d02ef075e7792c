use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A capability a candidate may be granted inside the sandbox.
///
/// Filesystem, process, environment and module loading are deliberately not
/// representable: they can never be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
  /// Query the fetched document (`doc:select`, `doc:meta`, ...).
  DocumentRead,
  /// `http.get` against the document's own host.
  NetworkRead,
  /// `print` into the captured stdout buffer.
  Stdout,
  /// `math.random` / `math.randomseed`.
  Random,
}

impl Capability {
  pub fn as_str(&self) -> &'static str {
    match self {
      Capability::DocumentRead => "document_read",
      Capability::NetworkRead => "network_read",
      Capability::Stdout => "stdout",
      Capability::Random => "random",
    }
  }
}

/// Resource and capability limits applied to every sandboxed execution.
///
/// Loaded once per run and shared read-only across concurrent runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
  /// Wall-clock budget for one execution.
  pub max_duration_ms: u64,
  /// Memory ceiling for the execution context.
  pub max_memory_bytes: usize,
  /// Capabilities the candidate may use.
  pub allowed_capabilities: BTreeSet<Capability>,
  /// Cap on captured stdout, and separately on the total size of the
  /// extracted fields (keys and values).
  pub max_output_bytes: usize,
  /// Extra time granted after the deadline before the execution context is
  /// torn down.
  pub cancel_grace_ms: u64,
}

impl Default for SandboxPolicy {
  fn default() -> Self {
    Self {
      max_duration_ms: 5_000,
      max_memory_bytes: 64 * 1024 * 1024,
      allowed_capabilities: BTreeSet::from([Capability::DocumentRead, Capability::Stdout]),
      max_output_bytes: 64 * 1024,
      cancel_grace_ms: 500,
    }
  }
}

impl SandboxPolicy {
  pub fn allows(&self, capability: Capability) -> bool {
    self.allowed_capabilities.contains(&capability)
  }

  pub fn max_duration(&self) -> Duration {
    Duration::from_millis(self.max_duration_ms)
  }

  pub fn cancel_grace(&self) -> Duration {
    Duration::from_millis(self.cancel_grace_ms)
  }

  /// Hard upper bound on how long a caller can wait for one execution.
  pub fn hard_deadline(&self) -> Duration {
    self.max_duration() + self.cancel_grace()
  }
}
