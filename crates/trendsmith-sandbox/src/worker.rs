//! The out-of-process side of the sandbox.
//!
//! The host writes one [`WorkerJob`] as JSON to the worker's stdin and reads
//! one [`ExecutionResult`] as JSON from its stdout. The worker runs the VM on
//! its main thread and exits; the host kills it if it overstays.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use trendsmith_config::SandboxPolicy;
use url::Url;

use crate::types::{Document, ExecutionResult, ExecutionStatus};
use crate::vm::{self, Job};

/// Subcommand under which a binary serves [`serve_worker`].
pub const WORKER_SUBCOMMAND: &str = "sandbox-worker";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WorkerJob {
  pub source: String,
  pub url: String,
  pub html: String,
  pub policy: SandboxPolicy,
}

impl WorkerJob {
  pub(crate) fn new(source: &str, document: &Document, policy: &SandboxPolicy) -> Self {
    Self {
      source: source.to_string(),
      url: document.url().to_string(),
      html: document.html().to_string(),
      policy: policy.clone(),
    }
  }

  fn run(self) -> ExecutionResult {
    let url = match Url::parse(&self.url) {
      Ok(url) => url,
      Err(e) => {
        return ExecutionResult::failed(
          ExecutionStatus::RuntimeError,
          format!("invalid document url '{}': {}", self.url, e),
          Duration::ZERO,
        );
      }
    };

    // The host tears the process down instead of raising this.
    vm::run(Job {
      source: self.source,
      document: Document::new(url, self.html),
      policy: self.policy,
      abort: Arc::new(AtomicBool::new(false)),
    })
  }
}

/// Serve one execution over stdin/stdout.
///
/// Called by a binary's hidden [`WORKER_SUBCOMMAND`]. Nothing else may write
/// to stdout while this runs.
pub fn serve_worker() -> io::Result<()> {
  let mut input = String::new();
  io::stdin().lock().read_to_string(&mut input)?;
  let job: WorkerJob = serde_json::from_str(&input).map_err(io::Error::other)?;

  let result = job.run();

  let mut stdout = io::stdout().lock();
  serde_json::to_writer(&mut stdout, &result).map_err(io::Error::other)?;
  stdout.flush()
}

/// How to start a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
  /// `None` re-runs the current executable.
  program: Option<PathBuf>,
  args: Vec<OsString>,
}

impl WorkerCommand {
  /// The running binary with [`WORKER_SUBCOMMAND`].
  pub fn current_exe() -> Self {
    Self {
      program: None,
      args: vec![WORKER_SUBCOMMAND.into()],
    }
  }

  /// A dedicated worker binary.
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: Some(program.into()),
      args: Vec::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub(crate) fn command(&self) -> io::Result<Command> {
    let program = match &self.program {
      Some(program) => program.clone(),
      None => std::env::current_exe()?,
    };
    let mut command = Command::new(program);
    command.args(&self.args);
    Ok(command)
  }
}

/// Where candidates run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Isolation {
  /// A child process per execution, killed at the hard deadline.
  Process(WorkerCommand),
  /// A thread in the host process. A candidate stuck inside a C function
  /// cannot be stopped, so this is only for trusted code and tests.
  InProcess,
}

impl Default for Isolation {
  fn default() -> Self {
    Isolation::Process(WorkerCommand::current_exe())
  }
}
