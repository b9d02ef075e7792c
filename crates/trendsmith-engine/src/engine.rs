//! Sequential graph walk for one run.
//!
//! The engine starts at the graph's entry node and follows success edges
//! until a node has none. A failing node is retried up to its `max_retries`
//! (refreshing through `refresh_with` first, when set); once retries are
//! exhausted the failure edge is taken, or the run fails when there is none.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use trendsmith_config::{NodeDescriptor, SandboxPolicy};
use trendsmith_workflow::{Graph, Topic};

use crate::error::EngineError;
use crate::events::{EdgeKind, ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::node::{FailureKind, Node, NodeContext, NodeFailure, NodeRegistry};
use crate::state::{RunOutcome, RunState, StateUpdate};

const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(1_000);

/// Runs topics through a graph of registered nodes.
///
/// Generic over `N: ExecutionNotifier`. Use `Engine::new()` for no-op
/// notifications or `Engine::with_notifier()` to observe events.
pub struct Engine<N: ExecutionNotifier = NoopNotifier> {
  registry: NodeRegistry,
  cancel_grace: Duration,
  notifier: N,
}

impl Engine<NoopNotifier> {
  pub fn new(registry: NodeRegistry) -> Self {
    Self::with_notifier(registry, NoopNotifier)
  }
}

/// How one node (including its retries) ended.
enum Step {
  Succeeded,
  Failed(String),
  Cancelled(String),
}

/// How one attempt ended.
enum Attempt {
  Succeeded,
  Failed { message: String, retryable: bool },
  Cancelled,
}

enum Invocation {
  Finished(Result<StateUpdate, NodeFailure>),
  TimedOut(Duration),
  Cancelled,
}

impl<N: ExecutionNotifier> Engine<N> {
  pub fn with_notifier(registry: NodeRegistry, notifier: N) -> Self {
    Self {
      registry,
      cancel_grace: DEFAULT_CANCEL_GRACE,
      notifier,
    }
  }

  /// Time a node gets to return after cancellation before it is dropped.
  pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
    self.cancel_grace = grace;
    self
  }

  pub fn registry(&self) -> &NodeRegistry {
    &self.registry
  }

  /// Run `topic` through `graph` to a terminal state.
  ///
  /// Node failures never surface here: they are in the returned state's
  /// error trail and outcome. Errors are reserved for runs that cannot
  /// start.
  pub async fn run(
    &self,
    topic: Topic,
    graph: &Graph,
    policy: Arc<SandboxPolicy>,
    cancel: CancellationToken,
  ) -> Result<RunState, EngineError> {
    topic.validate().map_err(EngineError::InvalidTopic)?;
    self.check_registered(graph)?;

    let mut state = RunState::new(topic);
    self.drive(&mut state, graph, &policy, &cancel).await;
    Ok(state)
  }

  fn check_registered(&self, graph: &Graph) -> Result<(), EngineError> {
    for node in graph.nodes() {
      if !self.registry.contains(&node.name) {
        return Err(EngineError::UnregisteredNode(node.name.clone()));
      }
    }
    Ok(())
  }

  #[instrument(skip_all, fields(run_id = %state.run_id(), graph = graph.name()))]
  async fn drive(
    &self,
    state: &mut RunState,
    graph: &Graph,
    policy: &Arc<SandboxPolicy>,
    cancel: &CancellationToken,
  ) {
    let run_id = state.run_id().to_string();
    info!(topic_id = %state.topic().id, entry = graph.entry(), "run_started");
    self.notifier.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      topic_id: state.topic().id.clone(),
      graph: graph.name().to_string(),
    });

    let mut current = graph.entry().to_string();
    let outcome = loop {
      let Some(descriptor) = graph.node(&current) else {
        // Graph validation makes every edge target a known node
        break RunOutcome::Failed {
          at_node: current.clone(),
          reason: "unknown node".to_string(),
        };
      };

      if cancel.is_cancelled() {
        break RunOutcome::Cancelled { at_node: current };
      }

      let (edge, next) = match self.run_node(descriptor, graph, state, policy, cancel).await {
        Step::Succeeded => match &descriptor.success_edge {
          Some(next) => (EdgeKind::Success, next.clone()),
          None => break RunOutcome::Completed,
        },
        Step::Failed(reason) => match &descriptor.failure_edge {
          Some(next) => {
            warn!(node = %current, next = %next, reason = %reason, "node_degraded");
            state.mark_degraded(&current);
            (EdgeKind::Failure, next.clone())
          }
          None => {
            break RunOutcome::Failed {
              at_node: current,
              reason,
            };
          }
        },
        Step::Cancelled(at_node) => break RunOutcome::Cancelled { at_node },
      };

      self.notifier.notify(ExecutionEvent::EdgeFollowed {
        run_id: run_id.clone(),
        from: current.clone(),
        to: next.clone(),
        edge,
      });
      current = next;
    };

    match &outcome {
      RunOutcome::Completed => {
        info!(
          errors = state.errors().len(),
          degraded = ?state.degraded(),
          "run_completed"
        );
        self.notifier.notify(ExecutionEvent::RunCompleted {
          run_id: run_id.clone(),
        });
      }
      RunOutcome::Failed { at_node, reason } => {
        error!(node = %at_node, reason = %reason, errors = state.errors().len(), "run_failed");
        self.notifier.notify(ExecutionEvent::RunFailed {
          run_id: run_id.clone(),
          node: at_node.clone(),
          error: reason.clone(),
        });
      }
      RunOutcome::Cancelled { at_node } => {
        info!(node = %at_node, "run_cancelled");
        self.notifier.notify(ExecutionEvent::RunCancelled {
          run_id: run_id.clone(),
          node: at_node.clone(),
        });
      }
      RunOutcome::Running => {}
    }
    state.finish(outcome);
  }

  /// One node with its retry budget.
  async fn run_node(
    &self,
    descriptor: &NodeDescriptor,
    graph: &Graph,
    state: &mut RunState,
    policy: &Arc<SandboxPolicy>,
    cancel: &CancellationToken,
  ) -> Step {
    let name = descriptor.name.as_str();
    let mut feedback: Option<String> = None;
    let mut last_failure = String::new();

    for attempt in 0..=descriptor.max_retries {
      if attempt > 0 {
        if let Some(refresh) = &descriptor.refresh_with {
          let timeout = graph.node(refresh).and_then(|d| d.timeout_ms);
          let refreshed = self
            .attempt(refresh, timeout, state, attempt, feedback.clone(), policy, cancel)
            .await;
          match refreshed {
            Attempt::Succeeded => {}
            Attempt::Failed { message, .. } => {
              return Step::Failed(format!("refresh through '{}' failed: {}", refresh, message));
            }
            Attempt::Cancelled => return Step::Cancelled(refresh.clone()),
          }
        }
      }

      let outcome = self
        .attempt(name, descriptor.timeout_ms, state, attempt, feedback.take(), policy, cancel)
        .await;
      match outcome {
        Attempt::Succeeded => return Step::Succeeded,
        Attempt::Failed { message, retryable } => {
          if !retryable {
            return Step::Failed(message);
          }
          feedback = Some(message.clone());
          last_failure = message;
        }
        Attempt::Cancelled => return Step::Cancelled(name.to_string()),
      }
    }

    Step::Failed(last_failure)
  }

  /// Invoke a node once and apply or record what it returns.
  #[instrument(skip_all, fields(node = name, attempt))]
  #[allow(clippy::too_many_arguments)]
  async fn attempt(
    &self,
    name: &str,
    timeout_ms: Option<u64>,
    state: &mut RunState,
    attempt: u32,
    feedback: Option<String>,
    policy: &Arc<SandboxPolicy>,
    cancel: &CancellationToken,
  ) -> Attempt {
    let run_id = state.run_id().to_string();
    self.notifier.notify(ExecutionEvent::NodeStarted {
      run_id: run_id.clone(),
      node: name.to_string(),
      attempt,
    });

    let failure = match self.registry.get(name) {
      None => NodeFailure::fatal(
        FailureKind::Internal,
        format!("no implementation registered for node '{}'", name),
      ),
      Some(node) => {
        let ctx = NodeContext {
          run_id: run_id.clone(),
          attempt,
          feedback,
          policy: policy.clone(),
          cancel: cancel.child_token(),
        };
        let timeout = timeout_ms.map(Duration::from_millis);

        match self.invoke(node.as_ref(), state, &ctx, timeout, cancel).await {
          Invocation::Cancelled => return Attempt::Cancelled,
          Invocation::TimedOut(limit) => NodeFailure::retryable(
            FailureKind::Timeout,
            format!("timed out after {}ms", limit.as_millis()),
          ),
          Invocation::Finished(Ok(update)) if update.slot() == node.slot() => {
            let slot = update.slot();
            state.apply(update);
            info!(slot = %slot, revision = state.revision(slot), "node_completed");
            self.notifier.notify(ExecutionEvent::NodeCompleted {
              run_id,
              node: name.to_string(),
              slot,
            });
            return Attempt::Succeeded;
          }
          Invocation::Finished(Ok(update)) => NodeFailure::fatal(
            FailureKind::Internal,
            format!(
              "node '{}' wrote slot '{}' owned by another node",
              name,
              update.slot()
            ),
          ),
          Invocation::Finished(Err(mut failure)) => {
            match failure.update.take() {
              Some(update) if update.slot() == node.slot() => state.apply(update),
              Some(update) => warn!(slot = %update.slot(), "partial_update_rejected"),
              None => {}
            }
            failure
          }
        }
      }
    };

    warn!(
      kind = ?failure.kind,
      retryable = failure.retryable,
      error = %failure.message,
      "node_failed"
    );
    state.record_error(
      name,
      attempt,
      failure.kind,
      failure.message.clone(),
      failure.retryable,
    );
    self.notifier.notify(ExecutionEvent::NodeFailed {
      run_id,
      node: name.to_string(),
      attempt,
      error: failure.message.clone(),
      retryable: failure.retryable,
    });

    Attempt::Failed {
      message: failure.message,
      retryable: failure.retryable,
    }
  }

  /// Bound a node call by its timeout and the run's cancellation.
  async fn invoke(
    &self,
    node: &dyn Node,
    state: &RunState,
    ctx: &NodeContext,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
  ) -> Invocation {
    let call = async {
      match timeout {
        Some(limit) => match tokio::time::timeout(limit, node.invoke(state, ctx)).await {
          Ok(result) => Invocation::Finished(result),
          Err(_) => Invocation::TimedOut(limit),
        },
        None => Invocation::Finished(node.invoke(state, ctx).await),
      }
    };
    tokio::pin!(call);

    tokio::select! {
      invocation = &mut call => invocation,
      _ = cancel.cancelled() => {
        // The node sees `ctx.cancel`; wait out the grace period, then drop it.
        if tokio::time::timeout(self.cancel_grace, &mut call).await.is_err() {
          warn!(grace_ms = self.cancel_grace.as_millis() as u64, "node_abandoned");
        }
        Invocation::Cancelled
      }
    }
  }
}
