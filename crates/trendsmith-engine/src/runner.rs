//! Pipeline runner with channel-based submission.
//!
//! The `PipelineRunner` owns an mpsc channel of topics and executes each one
//! as an independent run. Runs share only read-only configuration and execute
//! concurrently up to a fixed bound.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use trendsmith_config::SandboxPolicy;
use trendsmith_workflow::{Graph, Topic};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::state::RunState;

/// Executes submitted topics through one graph.
///
/// # Usage
///
/// ```ignore
/// let runner = PipelineRunner::new(engine, graph, policy, 4);
///
/// // Hand the sender to whatever selects topics
/// let sender = runner.sender();
///
/// // Start the execution loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct PipelineRunner<N: ExecutionNotifier + 'static = NoopNotifier> {
  sender: mpsc::Sender<Topic>,
  receiver: mpsc::Receiver<Topic>,
  engine: Arc<Engine<N>>,
  graph: Arc<Graph>,
  policy: Arc<SandboxPolicy>,
  limit: Arc<Semaphore>,
  results: Option<mpsc::UnboundedSender<RunState>>,
}

impl<N: ExecutionNotifier + 'static> PipelineRunner<N> {
  pub fn new(
    engine: Arc<Engine<N>>,
    graph: Arc<Graph>,
    policy: Arc<SandboxPolicy>,
    max_concurrent_runs: usize,
  ) -> Self {
    Self::with_buffer_size(engine, graph, policy, max_concurrent_runs, 100)
  }

  pub fn with_buffer_size(
    engine: Arc<Engine<N>>,
    graph: Arc<Graph>,
    policy: Arc<SandboxPolicy>,
    max_concurrent_runs: usize,
    buffer_size: usize,
  ) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
      graph,
      policy,
      limit: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
      results: None,
    }
  }

  /// Deliver every terminal run state to `results`.
  pub fn with_results(mut self, results: mpsc::UnboundedSender<RunState>) -> Self {
    self.results = Some(results);
    self
  }

  /// Get a sender handle for submitting topics.
  pub fn sender(&self) -> mpsc::Sender<Topic> {
    self.sender.clone()
  }

  /// Submit a topic through the channel.
  pub async fn run(&self, topic: Topic) -> Result<(), EngineError> {
    self
      .sender
      .send(topic)
      .await
      .map_err(|_| EngineError::ChannelClosed)
  }

  /// Start the execution loop.
  ///
  /// Returns once the token is cancelled or every sender is dropped, after
  /// in-flight runs have finished. Each run gets a child token.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
    // Only external senders keep the loop alive
    drop(self.sender);
    info!(graph = self.graph.name(), "pipeline_runner_started");

    let mut runs = JoinSet::new();
    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(graph = self.graph.name(), "pipeline_runner_cancelled");
          break;
        }
        Some(joined) = runs.join_next(), if !runs.is_empty() => {
          if let Err(e) = joined {
            error!(error = %e, "run_task_panicked");
          }
        }
        topic = self.receiver.recv() => {
          let Some(topic) = topic else {
            info!(graph = self.graph.name(), "pipeline_runner_channel_closed");
            break;
          };

          let permit = tokio::select! {
            permit = self.limit.clone().acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
          };
          let Some(permit) = permit else {
            break;
          };

          let engine = self.engine.clone();
          let graph = self.graph.clone();
          let policy = self.policy.clone();
          let results = self.results.clone();
          let run_cancel = cancel.child_token();

          runs.spawn(async move {
            let _permit = permit;
            let topic_id = topic.id.clone();
            match engine.run(topic, &graph, policy, run_cancel).await {
              Ok(state) => {
                info!(
                  run_id = %state.run_id(),
                  topic_id = %topic_id,
                  outcome = ?state.outcome(),
                  "run_finished"
                );
                if let Some(results) = results {
                  let _ = results.send(state);
                }
              }
              Err(e) => {
                error!(topic_id = %topic_id, error = %e, "run_rejected");
              }
            }
          });
        }
      }
    }

    while let Some(joined) = runs.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "run_task_panicked");
      }
    }
    Ok(())
  }

  /// Execute one topic directly, bypassing the channel.
  pub async fn execute_once(
    &self,
    topic: Topic,
    cancel: CancellationToken,
  ) -> Result<RunState, EngineError> {
    self
      .engine
      .run(topic, &self.graph, self.policy.clone(), cancel)
      .await
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }
}
