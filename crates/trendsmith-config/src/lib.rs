//! Trendsmith Config
//!
//! This crate contains the serializable configuration types for trendsmith.
//! These types describe a pipeline before the engine validates and runs it.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=pipeline.json`)
//! - Built-in defaults (every section has one)
//!
//! The engine takes the [`GraphDef`] from here, validates it into a runtime
//! graph, and threads the [`SandboxPolicy`] read-only through every run.

mod error;
mod graph;
mod pipeline;
mod sandbox;

pub use error::ConfigError;
pub use graph::{GraphDef, NodeDescriptor};
pub use pipeline::{
  AggregationConfig, AnalyzerConfig, EngineSettings, GenerationConfig, PipelineConfig,
  SearchConfig, SynthesisConfig, WriterConfig,
};
pub use sandbox::{Capability, SandboxPolicy};
