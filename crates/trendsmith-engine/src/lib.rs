//! Trendsmith Workflow Engine
//!
//! Walks a validated [`Graph`](trendsmith_workflow::Graph) of named nodes for
//! one topic at a time, threading a single [`RunState`] through them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PipelineRunner                         │
//! │  - owns mpsc channel of topics                              │
//! │  - runs independent topics concurrently (bounded)           │
//! │  - child cancellation token per run                         │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - run(topic, graph, policy, cancel) → RunState             │
//! │  - retries, refresh_with, failure edges, timeouts           │
//! │  - slot ownership, append-only error trail, events          │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Nodes (NodeRegistry)                    │
//! │  analyze → synthesize → execute → search → aggregate →      │
//! │  write_script → write_social                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod engine;
mod error;
mod events;
mod node;
pub mod nodes;
mod runner;
mod state;

pub use engine::Engine;
pub use error::EngineError;
pub use events::{ChannelNotifier, EdgeKind, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use node::{FailureKind, Node, NodeContext, NodeFailure, NodeRegistry};
pub use runner::PipelineRunner;
pub use state::{RecordedError, RunOutcome, RunState, Slot, SocialPost, StateUpdate};
