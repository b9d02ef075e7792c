//! Trendsmith Workflow
//!
//! This crate provides the validated workflow graph for trendsmith.
//! A [`Graph`] is built from a configuration-level [`GraphDef`] and is ready
//! for the engine to walk.
//!
//! Key differences from the raw definition:
//! - Edges and refresh references are checked against known nodes
//! - Predecessor sets are derived (or verified when declared)
//! - The graph is acyclic and every node is reachable from the entry
//!
//! It also holds the [`Topic`] record that seeds every run and the built-in
//! graph variants.
//!
//! [`GraphDef`]: trendsmith_config::GraphDef

mod error;
mod graph;
mod topic;
mod variants;

pub use error::WorkflowError;
pub use graph::Graph;
pub use topic::Topic;
pub use variants::{GraphVariant, nodes, search_only_graph, standard_graph};
