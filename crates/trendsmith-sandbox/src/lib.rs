//! Trendsmith Sandbox
//!
//! Executes synthesized scraping candidates against a fetched document.
//! This is the trust boundary of the pipeline: candidates are untrusted,
//! machine-generated Lua.
//!
//! # Isolation
//!
//! - A fresh VM per execution in a child worker process, killed at the hard
//!   deadline or on cancellation (see [`Isolation`])
//! - Only `table`, `string`, `math` and `utf8` are loaded; filesystem, OS,
//!   module loading and debug access are replaced by traps
//! - Capability-gated names (`print`, `http.get`, `math.random`) exist only
//!   when the [`SandboxPolicy`] grants them
//! - Violations, deadlines and memory exhaustion are recorded outside the
//!   VM, so catching the error with `pcall` does not hide them
//! - Captured output and the extracted fields are each capped at
//!   `max_output_bytes`
//!
//! A binary that uses the default isolation must dispatch
//! [`WORKER_SUBCOMMAND`] to [`serve_worker`] before doing anything else.
//!
//! The names a candidate may use are listed in [`allowlist`], which the
//! synthesizer's static checker shares.
//!
//! [`SandboxPolicy`]: trendsmith_config::SandboxPolicy

pub mod allowlist;
mod error;
mod executor;
mod types;
mod vm;
mod worker;

pub use error::SandboxError;
pub use executor::Sandbox;
pub use types::{
  CANDIDATE_LANGUAGE, CodeCandidate, Document, ExecutionResult, ExecutionStatus,
  MAX_DIAGNOSTIC_BYTES,
};
pub use worker::{Isolation, WORKER_SUBCOMMAND, WorkerCommand, serve_worker};
