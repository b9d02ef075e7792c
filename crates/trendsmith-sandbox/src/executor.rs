use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trendsmith_config::SandboxPolicy;

use crate::error::SandboxError;
use crate::types::{CANDIDATE_LANGUAGE, CodeCandidate, Document, ExecutionResult, ExecutionStatus};
use crate::vm::{self, Job};
use crate::worker::{Isolation, WorkerCommand, WorkerJob};

/// Runs candidates in isolated, resource-limited Lua VMs.
///
/// Every call gets a fresh VM in its own worker process; nothing is shared
/// between executions. The VM enforces the memory ceiling and checks the
/// deadline from an instruction hook. The host does not trust that: at
/// `max_duration + cancel_grace`, or as soon as the run is cancelled, it kills
/// the worker.
#[derive(Debug, Clone)]
pub struct Sandbox {
  policy: Arc<SandboxPolicy>,
  isolation: Isolation,
}

impl Sandbox {
  pub fn new(policy: SandboxPolicy) -> Self {
    Self::shared(Arc::new(policy))
  }

  /// Use a policy shared with other runs.
  pub fn shared(policy: Arc<SandboxPolicy>) -> Self {
    Self {
      policy,
      isolation: Isolation::default(),
    }
  }

  pub fn with_isolation(mut self, isolation: Isolation) -> Self {
    self.isolation = isolation;
    self
  }

  pub fn policy(&self) -> &SandboxPolicy {
    &self.policy
  }

  /// Execute `candidate` against a read-only copy of `document`.
  ///
  /// Candidate faults are reported through [`ExecutionResult::status`]; the
  /// only error is cancellation.
  #[instrument(
    name = "sandbox_execute",
    skip_all,
    fields(version = candidate.version, source_bytes = candidate.source.len())
  )]
  pub async fn execute(
    &self,
    candidate: &CodeCandidate,
    document: &Document,
    cancel: &CancellationToken,
  ) -> Result<ExecutionResult, SandboxError> {
    if cancel.is_cancelled() {
      return Err(SandboxError::Cancelled);
    }

    let started = Instant::now();
    if candidate.language != CANDIDATE_LANGUAGE {
      return Ok(ExecutionResult::failed(
        ExecutionStatus::RuntimeError,
        format!("unsupported candidate language '{}'", candidate.language),
        Duration::ZERO,
      ));
    }

    match &self.isolation {
      Isolation::Process(command) => {
        self
          .execute_in_worker(command, candidate, document, cancel, started)
          .await
      }
      Isolation::InProcess => {
        self
          .execute_on_thread(candidate, document, cancel, started)
          .await
      }
    }
  }

  async fn execute_in_worker(
    &self,
    command: &WorkerCommand,
    candidate: &CodeCandidate,
    document: &Document,
    cancel: &CancellationToken,
    started: Instant,
  ) -> Result<ExecutionResult, SandboxError> {
    let job = WorkerJob::new(&candidate.source, document, &self.policy);
    let payload = match serde_json::to_vec(&job) {
      Ok(payload) => payload,
      Err(e) => {
        return Ok(ExecutionResult::failed(
          ExecutionStatus::RuntimeError,
          format!("failed to encode sandbox job: {}", e),
          started.elapsed(),
        ));
      }
    };

    let spawned = command.command().and_then(|mut command| {
      command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    });
    let mut child = match spawned {
      Ok(child) => child,
      Err(e) => {
        return Ok(ExecutionResult::failed(
          ExecutionStatus::RuntimeError,
          format!("failed to start sandbox worker: {}", e),
          started.elapsed(),
        ));
      }
    };
    debug!(pid = child.id(), "sandbox_worker_started");

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let hard_deadline = self.policy.hard_deadline();

    // wait() rather than wait_with_output() so the child stays ours to kill.
    tokio::select! {
      exchanged = async {
        if let Some(mut stdin) = stdin {
          stdin.write_all(&payload).await?;
        }
        let mut output = Vec::new();
        if let Some(mut stdout) = stdout {
          stdout.read_to_end(&mut output).await?;
        }
        let status = child.wait().await?;
        Ok::<_, io::Error>((status, output))
      } => {
        let result = worker_result(exchanged, started);
        info!(
          status = %result.status,
          duration_ms = result.duration.as_millis() as u64,
          fields = result.extracted_fields.len(),
          output_truncated = result.output_truncated,
          "sandbox_finished"
        );
        Ok(result)
      }
      _ = tokio::time::sleep(hard_deadline) => {
        let _ = child.kill().await;
        warn!(
          hard_deadline_ms = hard_deadline.as_millis() as u64,
          "sandbox_worker_killed"
        );
        Ok(ExecutionResult::failed(
          ExecutionStatus::Timeout,
          format!("no result within {} ms; worker killed", hard_deadline.as_millis()),
          started.elapsed(),
        ))
      }
      _ = cancel.cancelled() => {
        let _ = child.kill().await;
        debug!("sandbox_worker_killed");
        Err(SandboxError::Cancelled)
      }
    }
  }

  async fn execute_on_thread(
    &self,
    candidate: &CodeCandidate,
    document: &Document,
    cancel: &CancellationToken,
    started: Instant,
  ) -> Result<ExecutionResult, SandboxError> {
    let abort = Arc::new(AtomicBool::new(false));
    let job = Job {
      source: candidate.source.clone(),
      document: document.clone(),
      policy: (*self.policy).clone(),
      abort: abort.clone(),
    };

    let (tx, mut rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
      .name("trendsmith-sandbox".to_string())
      .spawn(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(|| vm::run(job))).unwrap_or_else(|_| {
          ExecutionResult::failed(
            ExecutionStatus::RuntimeError,
            "sandbox worker panicked",
            started.elapsed(),
          )
        });
        // The host may have stopped listening.
        let _ = tx.send(result);
      });

    if let Err(e) = spawned {
      return Ok(ExecutionResult::failed(
        ExecutionStatus::RuntimeError,
        format!("failed to start sandbox worker: {}", e),
        started.elapsed(),
      ));
    }

    let hard_deadline = self.policy.hard_deadline();

    tokio::select! {
      received = &mut rx => {
        let result = received.unwrap_or_else(|_| {
          ExecutionResult::failed(
            ExecutionStatus::RuntimeError,
            "sandbox worker exited without a result",
            started.elapsed(),
          )
        });
        info!(
          status = %result.status,
          duration_ms = result.duration.as_millis() as u64,
          fields = result.extracted_fields.len(),
          output_truncated = result.output_truncated,
          "sandbox_finished"
        );
        Ok(result)
      }
      _ = tokio::time::sleep(hard_deadline) => {
        abort.store(true, Ordering::Relaxed);
        warn!(
          hard_deadline_ms = hard_deadline.as_millis() as u64,
          "sandbox_worker_abandoned"
        );
        Ok(ExecutionResult::failed(
          ExecutionStatus::Timeout,
          format!("no result within {} ms; worker abandoned", hard_deadline.as_millis()),
          started.elapsed(),
        ))
      }
      _ = cancel.cancelled() => {
        abort.store(true, Ordering::Relaxed);
        match tokio::time::timeout(self.policy.cancel_grace(), &mut rx).await {
          Ok(_) => debug!("sandbox_worker_stopped"),
          Err(_) => warn!(
            grace_ms = self.policy.cancel_grace_ms,
            "sandbox_worker_abandoned"
          ),
        }
        Err(SandboxError::Cancelled)
      }
    }
  }
}

fn worker_result(exchanged: io::Result<(ExitStatus, Vec<u8>)>, started: Instant) -> ExecutionResult {
  match exchanged {
    Ok((status, output)) if status.success() => serde_json::from_slice(&output).unwrap_or_else(|e| {
      ExecutionResult::failed(
        ExecutionStatus::RuntimeError,
        format!("malformed sandbox worker result: {}", e),
        started.elapsed(),
      )
    }),
    Ok((status, _)) => ExecutionResult::failed(
      ExecutionStatus::RuntimeError,
      format!("sandbox worker exited with {}", status),
      started.elapsed(),
    ),
    Err(e) => ExecutionResult::failed(
      ExecutionStatus::RuntimeError,
      format!("sandbox worker I/O failed: {}", e),
      started.elapsed(),
    ),
  }
}
