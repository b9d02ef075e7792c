//! Built-in nodes of the content pipeline.

mod aggregate;
mod analyze;
mod execute;
mod search;
mod synthesize;
mod write;

use std::sync::Arc;

use trendsmith_analyzer::StructureAnalyzer;
use trendsmith_config::{PipelineConfig, SandboxPolicy};
use trendsmith_host_generate::TextGenerator;
use trendsmith_host_search::SearchProvider;
use trendsmith_sandbox::Isolation;
use trendsmith_synth::Synthesizer;
use trendsmith_workflow::nodes;

pub use aggregate::AggregateNode;
pub use analyze::AnalyzeNode;
pub use execute::ExecuteNode;
pub use search::SearchNode;
pub use synthesize::SynthesizeNode;
pub use write::{WriteScriptNode, WriteSocialNode};

use crate::node::NodeRegistry;

/// External capabilities the built-in nodes call.
#[derive(Clone)]
pub struct Services {
  pub analyzer: Arc<StructureAnalyzer>,
  pub generator: Arc<dyn TextGenerator>,
  pub search: Arc<dyn SearchProvider>,
  /// Where the execute node runs candidates.
  pub sandbox: Isolation,
}

/// Register every built-in node under its standard name.
pub fn builtin_registry(
  services: &Services,
  config: &PipelineConfig,
  policy: Arc<SandboxPolicy>,
) -> NodeRegistry {
  let synthesizer = Synthesizer::new(
    services.generator.clone(),
    policy,
    config.synthesis.clone(),
  );

  NodeRegistry::new()
    .with(
      nodes::ANALYZE,
      Arc::new(AnalyzeNode::new(services.analyzer.clone())),
    )
    .with(
      nodes::SYNTHESIZE,
      Arc::new(SynthesizeNode::new(
        synthesizer,
        config.synthesis.target_fields.clone(),
      )),
    )
    .with(
      nodes::EXECUTE,
      Arc::new(ExecuteNode::new(services.sandbox.clone())),
    )
    .with(nodes::SEARCH, Arc::new(SearchNode::new(services.search.clone())))
    .with(
      nodes::AGGREGATE,
      Arc::new(AggregateNode::new(
        config.aggregation.required_fields.clone(),
      )),
    )
    .with(
      nodes::WRITE_SCRIPT,
      Arc::new(WriteScriptNode::new(
        services.generator.clone(),
        config.writers.max_tokens,
      )),
    )
    .with(
      nodes::WRITE_SOCIAL,
      Arc::new(WriteSocialNode::new(
        services.generator.clone(),
        config.writers.platforms.clone(),
        config.writers.max_tokens,
      )),
    )
}
