//! The run state threaded through every node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trendsmith_aggregate::Summary;
use trendsmith_analyzer::StructureDescriptor;
use trendsmith_host_search::SearchHit;
use trendsmith_sandbox::{CodeCandidate, Document, ExecutionResult};
use trendsmith_workflow::Topic;

use crate::node::FailureKind;

/// A named slot of [`RunState`] owned by exactly one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
  StructureDescriptor,
  GeneratedCode,
  ExecutionResult,
  SearchResults,
  Summary,
  Script,
  SocialPosts,
}

impl Slot {
  pub fn as_str(&self) -> &'static str {
    match self {
      Slot::StructureDescriptor => "structure_descriptor",
      Slot::GeneratedCode => "generated_code",
      Slot::ExecutionResult => "execution_result",
      Slot::SearchResults => "search_results",
      Slot::Summary => "summary",
      Slot::Script => "script",
      Slot::SocialPosts => "social_posts",
    }
  }
}

impl std::fmt::Display for Slot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A write to a single slot, returned by a node for the engine to apply.
#[derive(Debug, Clone)]
pub enum StateUpdate {
  /// The analyzer's descriptor plus the document it fetched.
  Analysis {
    descriptor: StructureDescriptor,
    document: Document,
  },
  GeneratedCode(CodeCandidate),
  ExecutionResult(ExecutionResult),
  SearchResults(Vec<SearchHit>),
  Summary(Summary),
  Script(String),
  SocialPosts(Vec<SocialPost>),
}

impl StateUpdate {
  pub fn slot(&self) -> Slot {
    match self {
      StateUpdate::Analysis { .. } => Slot::StructureDescriptor,
      StateUpdate::GeneratedCode(_) => Slot::GeneratedCode,
      StateUpdate::ExecutionResult(_) => Slot::ExecutionResult,
      StateUpdate::SearchResults(_) => Slot::SearchResults,
      StateUpdate::Summary(_) => Slot::Summary,
      StateUpdate::Script(_) => Slot::Script,
      StateUpdate::SocialPosts(_) => Slot::SocialPosts,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialPost {
  pub platform: String,
  pub body: String,
}

/// One entry of the error trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
  /// Position in the trail, starting at 0.
  pub sequence: usize,
  pub node: String,
  pub attempt: u32,
  pub kind: FailureKind,
  pub message: String,
  pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
  Running,
  Completed,
  Failed { at_node: String, reason: String },
  Cancelled { at_node: String },
}

impl RunOutcome {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, RunOutcome::Running)
  }
}

/// State of one run.
///
/// Slots only grow: a populated slot is replaced by a retry, never cleared,
/// and the error trail is append-only. Nodes get a shared reference and hand
/// back a [`StateUpdate`]; only the engine writes.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
  run_id: String,
  topic: Topic,
  #[serde(skip_serializing_if = "Option::is_none")]
  structure_descriptor: Option<StructureDescriptor>,
  #[serde(skip)]
  document: Option<Document>,
  #[serde(skip_serializing_if = "Option::is_none")]
  generated_code: Option<CodeCandidate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  execution_result: Option<ExecutionResult>,
  #[serde(skip_serializing_if = "Option::is_none")]
  search_results: Option<Vec<SearchHit>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  summary: Option<Summary>,
  #[serde(skip_serializing_if = "Option::is_none")]
  script: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  social_posts: Option<Vec<SocialPost>>,
  errors: Vec<RecordedError>,
  revisions: BTreeMap<Slot, u32>,
  /// Nodes whose failure edge was taken, in order.
  degraded: Vec<String>,
  outcome: RunOutcome,
}

impl RunState {
  pub fn new(topic: Topic) -> Self {
    Self::with_run_id(uuid::Uuid::new_v4().to_string(), topic)
  }

  pub fn with_run_id(run_id: impl Into<String>, topic: Topic) -> Self {
    Self {
      run_id: run_id.into(),
      topic,
      structure_descriptor: None,
      document: None,
      generated_code: None,
      execution_result: None,
      search_results: None,
      summary: None,
      script: None,
      social_posts: None,
      errors: Vec::new(),
      revisions: BTreeMap::new(),
      degraded: Vec::new(),
      outcome: RunOutcome::Running,
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn topic(&self) -> &Topic {
    &self.topic
  }

  pub fn structure_descriptor(&self) -> Option<&StructureDescriptor> {
    self.structure_descriptor.as_ref()
  }

  pub fn document(&self) -> Option<&Document> {
    self.document.as_ref()
  }

  pub fn generated_code(&self) -> Option<&CodeCandidate> {
    self.generated_code.as_ref()
  }

  pub fn execution_result(&self) -> Option<&ExecutionResult> {
    self.execution_result.as_ref()
  }

  pub fn search_results(&self) -> Option<&[SearchHit]> {
    self.search_results.as_deref()
  }

  pub fn summary(&self) -> Option<&Summary> {
    self.summary.as_ref()
  }

  pub fn script(&self) -> Option<&str> {
    self.script.as_deref()
  }

  pub fn social_posts(&self) -> Option<&[SocialPost]> {
    self.social_posts.as_deref()
  }

  pub fn errors(&self) -> &[RecordedError] {
    &self.errors
  }

  /// Number of writes to `slot` so far.
  pub fn revision(&self, slot: Slot) -> u32 {
    self.revisions.get(&slot).copied().unwrap_or(0)
  }

  pub fn degraded(&self) -> &[String] {
    &self.degraded
  }

  pub fn outcome(&self) -> &RunOutcome {
    &self.outcome
  }

  pub(crate) fn apply(&mut self, update: StateUpdate) {
    let slot = update.slot();
    let revision = self.revisions.entry(slot).or_insert(0);
    *revision += 1;
    let revision = *revision;

    match update {
      StateUpdate::Analysis {
        descriptor,
        document,
      } => {
        self.structure_descriptor = Some(descriptor);
        self.document = Some(document);
      }
      StateUpdate::GeneratedCode(mut candidate) => {
        candidate.version = revision;
        self.generated_code = Some(candidate);
      }
      StateUpdate::ExecutionResult(result) => self.execution_result = Some(result),
      StateUpdate::SearchResults(hits) => self.search_results = Some(hits),
      StateUpdate::Summary(summary) => self.summary = Some(summary),
      StateUpdate::Script(script) => self.script = Some(script),
      StateUpdate::SocialPosts(posts) => self.social_posts = Some(posts),
    }
  }

  pub(crate) fn record_error(
    &mut self,
    node: &str,
    attempt: u32,
    kind: FailureKind,
    message: impl Into<String>,
    retryable: bool,
  ) -> &RecordedError {
    let sequence = self.errors.len();
    self.errors.push(RecordedError {
      sequence,
      node: node.to_string(),
      attempt,
      kind,
      message: message.into(),
      retryable,
    });
    &self.errors[sequence]
  }

  pub(crate) fn mark_degraded(&mut self, node: &str) {
    self.degraded.push(node.to_string());
  }

  pub(crate) fn finish(&mut self, outcome: RunOutcome) {
    self.outcome = outcome;
  }
}
