use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use trendsmith_analyzer::StructureAnalyzer;
use trendsmith_config::{GraphDef, PipelineConfig};
use trendsmith_engine::nodes::{Services, builtin_registry};
use trendsmith_engine::{Engine, PipelineRunner, RunOutcome, RunState};
use trendsmith_host_generate::OpenAiClient;
use trendsmith_host_search::TavilyClient;
use trendsmith_sandbox::{CodeCandidate, Document, Isolation, Sandbox, WORKER_SUBCOMMAND};
use trendsmith_workflow::{Graph, GraphVariant, Topic};

/// Trendsmith - turns trending topics into scripts and social posts
#[derive(Parser)]
#[command(name = "trendsmith")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the pipeline config (default: ~/.trendsmith/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
  log_format: LogFormat,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
  Text,
  Json,
}

#[derive(Subcommand)]
enum Commands {
  /// Run topics through the pipeline and print the final run states
  Run {
    /// Built-in variant (standard, search-only) or a graph JSON file
    #[arg(long)]
    graph: Option<String>,

    /// Topic title
    #[arg(long, requires = "url")]
    title: Option<String>,

    /// Topic source URL
    #[arg(long, requires = "title")]
    url: Option<String>,

    /// Related article URL (repeatable)
    #[arg(long)]
    related: Vec<String>,

    /// JSON file holding one topic or an array of topics
    #[arg(long, conflicts_with = "title")]
    topic_file: Option<PathBuf>,
  },

  /// Print a built-in graph as JSON
  Graph {
    #[arg(default_value = "standard")]
    variant: String,
  },

  /// Execute one candidate against a saved page
  Sandbox {
    /// Lua candidate
    candidate: PathBuf,

    /// HTML document to run against
    #[arg(long)]
    document: PathBuf,

    /// URL the document was fetched from
    #[arg(long)]
    url: String,
  },

  /// Run the static allow-list check on a candidate
  Check {
    /// Lua candidate
    candidate: PathBuf,
  },
}

fn main() -> Result<()> {
  // Sandbox workers speak JSON on stdout and must not log or load config.
  if std::env::args_os()
    .nth(1)
    .is_some_and(|arg| arg == WORKER_SUBCOMMAND)
  {
    return trendsmith_sandbox::serve_worker().context("sandbox worker failed");
  }

  let cli = Cli::parse();
  init_logging(cli.log_format);

  let config = load_config(cli.config.as_deref())?;

  match cli.command {
    Some(Commands::Run {
      graph,
      title,
      url,
      related,
      topic_file,
    }) => {
      let topics = collect_topics(title, url, related, topic_file)?;
      let graph = resolve_graph(graph.as_deref(), &config)?;
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_topics(config, graph, topics))
    }
    Some(Commands::Graph { variant }) => {
      let variant: GraphVariant = variant.parse().map_err(anyhow::Error::msg)?;
      let graph = Graph::new(variant.graph_def()).context("built-in graph is invalid")?;
      println!("{}", serde_json::to_string_pretty(&graph.to_def())?);
      Ok(())
    }
    Some(Commands::Sandbox {
      candidate,
      document,
      url,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_sandbox(config, candidate, document, url))
    }
    Some(Commands::Check { candidate }) => check_candidate(&config, &candidate),
    None => {
      println!("trendsmith - use --help to see available commands");
      Ok(())
    }
  }
}

fn init_logging(format: LogFormat) {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trendsmith=info"));

  // Logs go to stderr; stdout carries the JSON result
  match format {
    LogFormat::Text => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
    }
    LogFormat::Json => {
      tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    }
  }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
  let default_path = dirs::home_dir().map(|home| home.join(".trendsmith").join("config.json"));

  let mut config = match path {
    Some(path) => PipelineConfig::load(path)
      .with_context(|| format!("failed to load config: {}", path.display()))?,
    None => match &default_path {
      Some(path) => PipelineConfig::load_or_default(path)
        .with_context(|| format!("failed to load config: {}", path.display()))?,
      None => PipelineConfig::default(),
    },
  };

  config.apply_env();
  config.validate().context("invalid configuration")?;
  Ok(config)
}

fn resolve_graph(arg: Option<&str>, config: &PipelineConfig) -> Result<Graph> {
  let def = match arg {
    Some(arg) => match arg.parse::<GraphVariant>() {
      Ok(variant) => variant.graph_def(),
      Err(_) => {
        let content = std::fs::read_to_string(arg)
          .with_context(|| format!("failed to read graph file: {}", arg))?;
        serde_json::from_str::<GraphDef>(&content)
          .with_context(|| format!("failed to parse graph file: {}", arg))?
      }
    },
    None => config
      .graph
      .clone()
      .unwrap_or_else(|| GraphVariant::Standard.graph_def()),
  };

  Graph::new(def).context("invalid workflow graph")
}

/// Topic as accepted on the command line; the id defaults to a slug of the title.
#[derive(Deserialize)]
struct TopicInput {
  id: Option<String>,
  title: String,
  source_url: String,
  #[serde(default)]
  related_article_urls: Vec<String>,
}

impl TopicInput {
  fn into_topic(self) -> Topic {
    let topic = Topic::new(self.title, self.source_url).with_related(self.related_article_urls);
    match self.id {
      Some(id) => topic.with_id(id),
      None => topic,
    }
  }
}

fn collect_topics(
  title: Option<String>,
  url: Option<String>,
  related: Vec<String>,
  topic_file: Option<PathBuf>,
) -> Result<Vec<Topic>> {
  if let (Some(title), Some(url)) = (title, url) {
    return Ok(vec![Topic::new(title, url).with_related(related)]);
  }

  let content = match topic_file {
    Some(path) => std::fs::read_to_string(&path)
      .with_context(|| format!("failed to read topic file: {}", path.display()))?,
    None => read_topics_from_stdin()?,
  };

  let value: serde_json::Value =
    serde_json::from_str(&content).context("failed to parse topic JSON")?;
  let inputs: Vec<TopicInput> = if value.is_array() {
    serde_json::from_value(value).context("invalid topic list")?
  } else {
    vec![serde_json::from_value(value).context("invalid topic")?]
  };
  let topics: Vec<Topic> = inputs.into_iter().map(TopicInput::into_topic).collect();

  if topics.is_empty() {
    bail!("no topics given");
  }
  Ok(topics)
}

fn read_topics_from_stdin() -> Result<String> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    bail!("no topic given: pass --title/--url, --topic-file, or pipe topic JSON on stdin");
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read topics from stdin")?;
  Ok(input)
}

async fn run_topics(config: PipelineConfig, graph: Graph, topics: Vec<Topic>) -> Result<()> {
  let policy = Arc::new(config.sandbox.clone());
  let services = Services {
    analyzer: Arc::new(
      StructureAnalyzer::from_config(&config.analyzer).context("failed to build page fetcher")?,
    ),
    generator: Arc::new(
      OpenAiClient::from_config(&config.generation)
        .context("failed to build generation client")?,
    ),
    search: Arc::new(TavilyClient::from_config(&config.search).context("failed to build search client")?),
    sandbox: Isolation::default(),
  };

  let registry = builtin_registry(&services, &config, policy.clone());
  let engine = Arc::new(
    Engine::new(registry).with_cancel_grace(Duration::from_millis(config.engine.cancel_grace_ms)),
  );

  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling runs");
      interrupt.cancel();
    }
  });

  info!(graph = graph.name(), topics = topics.len(), "pipeline_started");

  let (results_tx, mut results_rx) = mpsc::unbounded_channel();
  let runner = PipelineRunner::new(
    engine,
    Arc::new(graph),
    policy,
    config.engine.max_concurrent_runs,
  )
  .with_results(results_tx);

  for topic in topics {
    topic.validate().context("invalid topic")?;
    runner.run(topic).await.context("failed to queue topic")?;
  }
  runner.start(cancel).await.context("pipeline runner failed")?;

  let mut states: Vec<RunState> = Vec::new();
  while let Some(state) = results_rx.recv().await {
    states.push(state);
  }

  let failed = states
    .iter()
    .filter(|s| !matches!(s.outcome(), RunOutcome::Completed))
    .count();

  if states.len() == 1 {
    println!("{}", serde_json::to_string_pretty(&states[0])?);
  } else {
    println!("{}", serde_json::to_string_pretty(&states)?);
  }

  if failed > 0 {
    bail!("{} of {} runs did not complete", failed, states.len());
  }
  Ok(())
}

async fn run_sandbox(
  config: PipelineConfig,
  candidate: PathBuf,
  document: PathBuf,
  url: String,
) -> Result<()> {
  let source = tokio::fs::read_to_string(&candidate)
    .await
    .with_context(|| format!("failed to read candidate: {}", candidate.display()))?;
  let html = tokio::fs::read_to_string(&document)
    .await
    .with_context(|| format!("failed to read document: {}", document.display()))?;
  let url = Url::parse(&url).with_context(|| format!("invalid document url: {}", url))?;

  if let Err(reasons) = trendsmith_synth::check(&source, &config.sandbox) {
    // The sandbox enforces the same rules, so run anyway
    warn!(reasons = ?reasons, "candidate_fails_static_check");
  }

  let sandbox = Sandbox::new(config.sandbox.clone());
  let result = sandbox
    .execute(
      &CodeCandidate::lua(source),
      &Document::new(url, html),
      &CancellationToken::new(),
    )
    .await
    .context("sandbox execution failed")?;

  println!("{}", serde_json::to_string_pretty(&result)?);
  Ok(())
}

fn check_candidate(config: &PipelineConfig, candidate: &Path) -> Result<()> {
  let source = std::fs::read_to_string(candidate)
    .with_context(|| format!("failed to read candidate: {}", candidate.display()))?;

  match trendsmith_synth::check(&source, &config.sandbox) {
    Ok(()) => {
      println!("ok");
      Ok(())
    }
    Err(reasons) => {
      for reason in &reasons {
        println!("{}", reason);
      }
      bail!("candidate rejected ({} reasons)", reasons.len())
    }
  }
}
