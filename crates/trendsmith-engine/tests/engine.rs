mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trendsmith_config::{NodeDescriptor, SandboxPolicy};
use trendsmith_engine::{
  ChannelNotifier, EdgeKind, Engine, EngineError, ExecutionEvent, FailureKind, NodeRegistry,
  RunOutcome, Slot,
};

fn policy() -> Arc<SandboxPolicy> {
  Arc::new(SandboxPolicy::default())
}

#[tokio::test]
async fn linear_graph_completes() {
  let first = arc(Generates::default());
  let second = arc(Succeeds::default());
  let registry = NodeRegistry::new()
    .with("first", first.clone())
    .with("second", second.clone());
  let graph = graph(
    "first",
    vec![
      NodeDescriptor::new("first").on_success("second"),
      NodeDescriptor::new("second"),
    ],
  );

  let state = Engine::new(registry)
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(state.outcome(), &RunOutcome::Completed);
  assert_eq!(state.script(), Some("call 1"));
  assert_eq!(state.generated_code().unwrap().version, 1);
  assert!(state.errors().is_empty());
  assert!(state.degraded().is_empty());
}

#[tokio::test]
async fn exhausted_retries_take_failure_edge_after_exactly_three_calls() {
  let synthesize = arc(Generates::default());
  let execute = arc(Fails::new(Slot::ExecutionResult, true));
  let search = arc(Succeeds::default());
  let registry = NodeRegistry::new()
    .with("synthesize", synthesize.clone())
    .with("execute", execute.clone())
    .with("search", search.clone());
  let graph = graph(
    "synthesize",
    vec![
      NodeDescriptor::new("synthesize").on_success("execute"),
      NodeDescriptor::new("execute")
        .on_success("search")
        .on_failure("search")
        .retries(2)
        .refresh_with("synthesize"),
      NodeDescriptor::new("search"),
    ],
  );

  let state = Engine::new(registry)
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(execute.calls(), 3);
  // Initial synthesis plus one refresh per retry
  assert_eq!(synthesize.calls(), 3);
  assert_eq!(search.calls(), 1);
  assert_eq!(state.outcome(), &RunOutcome::Completed);
  assert_eq!(state.degraded(), &["execute".to_string()]);

  let errors = state.errors();
  assert_eq!(errors.len(), 3);
  for (i, error) in errors.iter().enumerate() {
    assert_eq!(error.sequence, i);
    assert_eq!(error.node, "execute");
    assert_eq!(error.attempt, i as u32);
    assert_eq!(error.kind, FailureKind::Execution);
  }

  // Refreshes receive the previous failure as feedback
  let feedback = synthesize.feedback.lock().unwrap().clone();
  assert_eq!(
    feedback,
    vec![
      None,
      Some("attempt 0 failed".to_string()),
      Some("attempt 1 failed".to_string())
    ]
  );
  assert_eq!(state.generated_code().unwrap().version, 3);
}

#[tokio::test]
async fn non_retryable_failure_routes_immediately() {
  let failing = arc(Fails::new(Slot::Script, false));
  let fallback = arc(Generates::default());
  let registry = NodeRegistry::new()
    .with("a", failing.clone())
    .with("b", fallback.clone());
  let graph = graph(
    "a",
    vec![
      NodeDescriptor::new("a").on_failure("b").retries(5),
      NodeDescriptor::new("b"),
    ],
  );

  let state = Engine::new(registry)
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(failing.calls(), 1);
  assert_eq!(fallback.calls(), 1);
  assert!(!state.errors()[0].retryable);
}

#[tokio::test]
async fn failure_without_edge_fails_the_run_with_trail() {
  let failing = arc(Fails::new(Slot::Script, true));
  let registry = NodeRegistry::new().with("only", failing.clone());
  let graph = graph("only", vec![NodeDescriptor::new("only").retries(1)]);

  let state = Engine::new(registry)
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(failing.calls(), 2);
  assert_eq!(
    state.outcome(),
    &RunOutcome::Failed {
      at_node: "only".to_string(),
      reason: "attempt 1 failed".to_string(),
    }
  );
  assert_eq!(state.errors().len(), 2);
}

#[tokio::test]
async fn writing_another_nodes_slot_is_rejected() {
  let registry = NodeRegistry::new().with("rogue", arc(WrongSlot));
  let graph = graph("rogue", vec![NodeDescriptor::new("rogue").retries(3)]);

  let state = Engine::new(registry)
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  assert!(state.social_posts().is_none());
  assert_eq!(state.errors().len(), 1);
  assert_eq!(state.errors()[0].kind, FailureKind::Internal);
  assert!(!state.errors()[0].retryable);
  assert!(matches!(state.outcome(), RunOutcome::Failed { .. }));
}

#[tokio::test]
async fn per_node_timeout_is_a_retryable_failure() {
  let registry = NodeRegistry::new()
    .with(
      "slow",
      arc(Sleeps {
        duration: Duration::from_secs(30),
        honor_cancel: true,
      }),
    )
    .with("next", arc(Generates::default()));
  let graph = graph(
    "slow",
    vec![
      NodeDescriptor::new("slow")
        .on_failure("next")
        .retries(1)
        .timeout_ms(50),
      NodeDescriptor::new("next"),
    ],
  );

  let state = Engine::new(registry)
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(state.errors().len(), 2);
  assert!(state.errors().iter().all(|e| e.kind == FailureKind::Timeout && e.retryable));
  assert_eq!(state.outcome(), &RunOutcome::Completed);
}

#[tokio::test]
async fn cancellation_drops_a_stuck_node_after_grace() {
  let registry = NodeRegistry::new().with(
    "stuck",
    arc(Sleeps {
      duration: Duration::from_secs(30),
      honor_cancel: false,
    }),
  );
  let graph = graph("stuck", vec![NodeDescriptor::new("stuck")]);
  let engine = Engine::new(registry).with_cancel_grace(Duration::from_millis(100));

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.cancel();
  });

  let started = Instant::now();
  let state = engine.run(topic(), &graph, policy(), cancel).await.unwrap();

  assert!(started.elapsed() < Duration::from_secs(2));
  assert_eq!(
    state.outcome(),
    &RunOutcome::Cancelled {
      at_node: "stuck".to_string()
    }
  );
  assert!(state.script().is_none());
}

#[tokio::test]
async fn errors_only_ever_grow() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let registry = NodeRegistry::new()
    .with("a", arc(Fails::new(Slot::Script, true)))
    .with("b", arc(Fails::new(Slot::Script, true)))
    .with("c", arc(Succeeds::default()));
  let graph = graph(
    "a",
    vec![
      NodeDescriptor::new("a").on_failure("b").retries(2),
      NodeDescriptor::new("b").on_failure("c").retries(1),
      NodeDescriptor::new("c"),
    ],
  );

  let state = Engine::with_notifier(registry, ChannelNotifier::new(tx))
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  let sequences: Vec<usize> = state.errors().iter().map(|e| e.sequence).collect();
  assert_eq!(sequences, (0..5).collect::<Vec<_>>());
  assert_eq!(state.degraded(), &["a".to_string(), "b".to_string()]);

  let mut failed = 0;
  let mut edges = Vec::new();
  while let Ok(event) = rx.try_recv() {
    match event {
      ExecutionEvent::NodeFailed { .. } => failed += 1,
      ExecutionEvent::EdgeFollowed { from, to, edge, .. } => edges.push((from, to, edge)),
      _ => {}
    }
  }
  assert_eq!(failed, 5);
  assert_eq!(
    edges,
    vec![
      ("a".to_string(), "b".to_string(), EdgeKind::Failure),
      ("b".to_string(), "c".to_string(), EdgeKind::Failure),
    ]
  );
}

#[tokio::test]
async fn events_bracket_the_run() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let registry = NodeRegistry::new().with("only", arc(Succeeds::default()));
  let graph = graph("only", vec![NodeDescriptor::new("only")]);

  let state = Engine::with_notifier(registry, ChannelNotifier::new(tx))
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap();

  let events: Vec<ExecutionEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
  let run_id = state.run_id().to_string();
  assert_eq!(
    events,
    vec![
      ExecutionEvent::RunStarted {
        run_id: run_id.clone(),
        topic_id: "x".to_string(),
        graph: "test".to_string(),
      },
      ExecutionEvent::NodeStarted {
        run_id: run_id.clone(),
        node: "only".to_string(),
        attempt: 0,
      },
      ExecutionEvent::NodeCompleted {
        run_id: run_id.clone(),
        node: "only".to_string(),
        slot: Slot::Script,
      },
      ExecutionEvent::RunCompleted { run_id },
    ]
  );
}

#[tokio::test]
async fn unregistered_nodes_and_bad_topics_are_rejected_up_front() {
  let graph = graph("missing", vec![NodeDescriptor::new("missing")]);
  let err = Engine::new(NodeRegistry::new())
    .run(topic(), &graph, policy(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::UnregisteredNode(name) if name == "missing"));

  let registry = NodeRegistry::new().with("missing", arc(Succeeds::default()));
  let mut bad = topic();
  bad.source_url = "ftp://example.com/x".to_string();
  let err = Engine::new(registry)
    .run(bad, &graph, policy(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::InvalidTopic(_)));
}
