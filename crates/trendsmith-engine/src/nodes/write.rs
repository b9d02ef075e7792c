use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{Environment, Value};
use serde::Serialize;
use trendsmith_host_generate::{GenerationConstraints, GenerationError, TextGenerator};

use crate::node::{FailureKind, Node, NodeContext, NodeFailure};
use crate::state::{RunState, Slot, SocialPost, StateUpdate};

const SCRIPT_TEMPLATE: &str = r#"You are a viral video scriptwriter. Write a 60-second script about the topic below.
- Hook (0-10s): attention-grabbing opening
- Main content (10-50s): 3 key points with examples
- Call to action (50-60s): clear call to action
Keep it conversational, energetic and easy to understand. Use only the facts given.

## Facts
{{ summary }}"#;

const SOCIAL_TEMPLATE: &str = r#"You are a social media content strategist. Write one {{ platform }} post about the topic below.
{% if platform == "twitter" %}Stay within 280 characters.
{% endif %}Match the platform's tone, use relevant hashtags and emojis where they fit, and optimize for engagement. Use only the facts given.

## Video script
{{ script }}

## Facts
{{ summary }}"#;

#[derive(Serialize)]
struct PromptContext<'a> {
  summary: String,
  script: Option<&'a str>,
  platform: Option<&'a str>,
}

fn render(template: &str, context: &PromptContext<'_>) -> Result<String, NodeFailure> {
  let env = Environment::new();
  env
    .render_str(template, Value::from_serialize(context))
    .map_err(|e| NodeFailure::fatal(FailureKind::Internal, format!("failed to render prompt: {}", e)))
}

fn generation_failure(error: GenerationError) -> NodeFailure {
  NodeFailure::new(
    FailureKind::Generation,
    error.to_string(),
    error.is_transient(),
  )
}

/// Writes a 60-second video script from the summary.
pub struct WriteScriptNode {
  generator: Arc<dyn TextGenerator>,
  max_tokens: u32,
}

impl WriteScriptNode {
  pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
    Self {
      generator,
      max_tokens,
    }
  }
}

#[async_trait]
impl Node for WriteScriptNode {
  fn slot(&self) -> Slot {
    Slot::Script
  }

  async fn invoke(&self, state: &RunState, _ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let summary = state
      .summary()
      .ok_or_else(|| NodeFailure::missing_input(Slot::Summary))?;

    let prompt = render(
      SCRIPT_TEMPLATE,
      &PromptContext {
        summary: summary.to_prompt(),
        script: None,
        platform: None,
      },
    )?;
    let script = self
      .generator
      .generate(&prompt, &GenerationConstraints::new(self.max_tokens, 0.8))
      .await
      .map_err(generation_failure)?;

    Ok(StateUpdate::Script(script.trim().to_string()))
  }
}

/// Writes one post per configured platform from the script and summary.
pub struct WriteSocialNode {
  generator: Arc<dyn TextGenerator>,
  platforms: Vec<String>,
  max_tokens: u32,
}

impl WriteSocialNode {
  pub fn new(generator: Arc<dyn TextGenerator>, platforms: Vec<String>, max_tokens: u32) -> Self {
    Self {
      generator,
      platforms,
      max_tokens,
    }
  }
}

#[async_trait]
impl Node for WriteSocialNode {
  fn slot(&self) -> Slot {
    Slot::SocialPosts
  }

  async fn invoke(&self, state: &RunState, _ctx: &NodeContext) -> Result<StateUpdate, NodeFailure> {
    let summary = state
      .summary()
      .ok_or_else(|| NodeFailure::missing_input(Slot::Summary))?;
    let facts = summary.to_prompt();
    let constraints = GenerationConstraints::new(self.max_tokens, 0.8);

    let mut posts = Vec::with_capacity(self.platforms.len());
    for platform in &self.platforms {
      let prompt = render(
        SOCIAL_TEMPLATE,
        &PromptContext {
          summary: facts.clone(),
          script: state.script(),
          platform: Some(platform.as_str()),
        },
      )?;
      let body = self
        .generator
        .generate(&prompt, &constraints)
        .await
        .map_err(generation_failure)?;
      posts.push(SocialPost {
        platform: platform.clone(),
        body: body.trim().to_string(),
      });
    }

    Ok(StateUpdate::SocialPosts(posts))
  }
}
