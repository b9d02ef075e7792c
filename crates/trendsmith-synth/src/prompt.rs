use minijinja::{Environment, Value};
use serde::Serialize;
use trendsmith_analyzer::StructureDescriptor;
use trendsmith_config::SandboxPolicy;
use trendsmith_sandbox::allowlist;

use crate::error::SynthesisFailure;

pub(crate) const SYSTEM_PROMPT: &str = "You write small, deterministic Lua 5.4 programs that \
extract data from an HTML page through a restricted API. Reply with one ```lua code block.";

const TEMPLATE: &str = r#"Write a Lua 5.4 extractor for the page described below.

## Page structure
{{ descriptor }}

## Fields to extract
{% for field in fields %}- {{ field }}
{% endfor %}
## Rules
- Define `function extract(doc)` returning a table, or return the table from the chunk.
- Table keys are field names, values are strings. Leave out fields you cannot find.
- `doc.url` is the page URL.
- `doc:select(css)` returns a list of elements, `doc:select_one(css)` the first element or nil.
- `doc:meta(name)` returns a meta tag's content by name or property.
- Elements are tables `{ tag = ..., text = ..., attrs = { ... } }`.
- Only these globals exist: {{ globals | join(", ") }}.
- Library members you may use: {{ members | join(", ") }}.
{% if capabilities %}- Granted capabilities: {{ capabilities | join(", ") }}.
{% endif %}- Any other global, file, OS or network access is rejected before execution.
{% if hint %}
## Previous attempt rejected
{{ hint }}
Fix the problem and return a complete program.
{% endif %}"#;

#[derive(Serialize)]
struct PromptContext<'a> {
  descriptor: String,
  fields: &'a [String],
  globals: Vec<String>,
  members: Vec<String>,
  capabilities: Vec<&'static str>,
  hint: Option<&'a str>,
}

/// Render the synthesis prompt for one attempt.
pub(crate) fn render(
  descriptor: &StructureDescriptor,
  fields: &[String],
  policy: &SandboxPolicy,
  hint: Option<&str>,
) -> Result<String, SynthesisFailure> {
  let usable = |name: &str| allowlist::access(name, policy) == allowlist::Access::Allowed;

  let mut globals: Vec<String> = allowlist::BASE_FUNCTIONS
    .iter()
    .chain(allowlist::PROVIDED_GLOBALS)
    .chain(allowlist::LIBRARIES.iter().map(|(lib, _)| lib))
    .map(|name| name.to_string())
    .collect();
  let mut members: Vec<String> = allowlist::LIBRARIES
    .iter()
    .flat_map(|(lib, names)| names.iter().map(move |m| format!("{}.{}", lib, m)))
    .collect();
  for (name, _) in allowlist::GATED {
    if !usable(name) {
      continue;
    }
    match name.split_once('.') {
      Some((lib, _)) => {
        if !globals.iter().any(|g| g == lib) {
          globals.push(lib.to_string());
        }
        members.push(name.to_string());
      }
      None => globals.push(name.to_string()),
    }
  }

  let context = PromptContext {
    descriptor: descriptor.to_prompt(),
    fields,
    globals,
    members,
    capabilities: policy.allowed_capabilities.iter().map(|c| c.as_str()).collect(),
    hint,
  };

  let env = Environment::new();
  env
    .render_str(TEMPLATE, Value::from_serialize(&context))
    .map_err(|e| SynthesisFailure::Template(e.to_string()))
}

/// Pull the program out of a model reply: the first ```lua block, else the
/// first fenced block, else the whole reply.
pub fn extract_code(reply: &str) -> String {
  fenced(reply, "```lua")
    .or_else(|| fenced(reply, "```"))
    .unwrap_or(reply)
    .trim()
    .to_string()
}

fn fenced<'a>(reply: &'a str, opener: &str) -> Option<&'a str> {
  let start = reply.find(opener)?;
  let rest = &reply[start + opener.len()..];
  // Skip the rest of the opening line (info string)
  let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
  let body = &rest[body_start..];
  let end = body.find("```").unwrap_or(body.len());
  Some(&body[..end])
}
