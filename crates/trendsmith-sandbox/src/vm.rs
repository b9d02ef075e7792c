//! The per-execution Lua VM. Everything here runs on one thread, inside the
//! worker process in production.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mlua::{
  ChunkMode, Error as LuaError, Function, HookTriggers, Lua, LuaOptions, MultiValue, ObjectLike,
  StdLib, Table, Value, VmState,
};
use scraper::{ElementRef, Html, Selector};
use trendsmith_config::{Capability, SandboxPolicy};
use trendsmith_host_http::{BlockingFetcher, HttpError, HttpPolicy};

use crate::types::{Document, ExecutionResult, ExecutionStatus, truncate_diagnostic};

/// Instructions between deadline checks.
const HOOK_INSTRUCTION_INTERVAL: u32 = 1000;

const HTTP_TIMEOUT_CAP: Duration = Duration::from_secs(10);
const HTTP_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Base names replaced by traps.
const TRAPPED_FUNCTIONS: &[&str] = &[
  "collectgarbage",
  "dofile",
  "getmetatable",
  "load",
  "loadfile",
  "loadstring",
  "require",
  "warn",
];

/// Library tables replaced by traps.
const TRAPPED_LIBRARIES: &[&str] = &["coroutine", "debug", "io", "os", "package"];

pub(crate) struct Job {
  pub source: String,
  pub document: Document,
  pub policy: SandboxPolicy,
  /// Raised by the host on cancellation or when it gives up on the worker.
  pub abort: Arc<AtomicBool>,
}

/// Side channel the candidate cannot reach or reset.
struct Monitor {
  violations: RefCell<Vec<String>>,
  timed_out: Cell<bool>,
  host_abort: Cell<bool>,
  out_of_memory: Cell<bool>,
  nondeterministic: Cell<bool>,
  fields_truncated: Cell<bool>,
  output: RefCell<OutputBuffer>,
}

impl Monitor {
  fn new(max_output_bytes: usize) -> Self {
    Self {
      violations: RefCell::new(Vec::new()),
      timed_out: Cell::new(false),
      host_abort: Cell::new(false),
      out_of_memory: Cell::new(false),
      nondeterministic: Cell::new(false),
      fields_truncated: Cell::new(false),
      output: RefCell::new(OutputBuffer::new(max_output_bytes)),
    }
  }

  fn record_violation(&self, name: &str) {
    let mut violations = self.violations.borrow_mut();
    if !violations.iter().any(|v| v == name) {
      violations.push(name.to_string());
    }
  }

  /// True once the run must end regardless of what the candidate catches.
  fn aborted(&self) -> bool {
    !self.violations.borrow().is_empty()
      || self.timed_out.get()
      || self.host_abort.get()
      || self.out_of_memory.get()
  }
}

struct OutputBuffer {
  text: String,
  limit: usize,
  truncated: bool,
}

impl OutputBuffer {
  fn new(limit: usize) -> Self {
    Self {
      text: String::new(),
      limit,
      truncated: false,
    }
  }

  fn push(&mut self, chunk: &str) {
    if self.truncated {
      return;
    }
    let room = self.limit.saturating_sub(self.text.len());
    if chunk.len() <= room {
      self.text.push_str(chunk);
      return;
    }
    self.text.push_str(&chunk[..char_floor(chunk, room)]);
    self.truncated = true;
  }
}

/// Largest char boundary in `s` at or below `index`.
fn char_floor(s: &str, index: usize) -> usize {
  let mut end = index.min(s.len());
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  end
}

/// Keep fields in key order until their keys and values use up `limit`
/// bytes. The field that crosses the limit is cut on a char boundary.
fn cap_fields(fields: BTreeMap<String, String>, limit: usize) -> (BTreeMap<String, String>, bool) {
  let mut kept = BTreeMap::new();
  let mut used = 0;
  for (key, mut value) in fields {
    let room = limit.saturating_sub(used + key.len());
    if used + key.len() > limit || value.len() > room {
      value.truncate(char_floor(&value, room));
      if used + key.len() <= limit && !value.is_empty() {
        kept.insert(key, value);
      }
      return (kept, true);
    }
    used += key.len() + value.len();
    kept.insert(key, value);
  }
  (kept, false)
}

/// Run one candidate to completion and classify the outcome.
pub(crate) fn run(job: Job) -> ExecutionResult {
  let started = Instant::now();
  let deadline = started + job.policy.max_duration();
  let monitor = Rc::new(Monitor::new(job.policy.max_output_bytes));

  let outcome = evaluate(&job, &monitor, deadline).map(|fields| {
    let (fields, truncated) = cap_fields(fields, job.policy.max_output_bytes);
    monitor.fields_truncated.set(truncated);
    fields
  });
  classify(outcome, &monitor, &job.policy, started.elapsed())
}

fn evaluate(
  job: &Job,
  monitor: &Rc<Monitor>,
  deadline: Instant,
) -> mlua::Result<BTreeMap<String, String>> {
  let lua = Lua::new_with(
    StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
    LuaOptions::default(),
  )?;

  let doc = install_environment(&lua, job, monitor, deadline)?;
  install_hook(&lua, monitor, job.abort.clone(), deadline);
  lua.set_memory_limit(job.policy.max_memory_bytes)?;

  let returned: Value = lua
    .load(job.source.as_str())
    .set_name("candidate")
    .set_mode(ChunkMode::Text)
    .eval()?;

  let table = match returned {
    Value::Table(table) => table,
    _ => {
      let extract: Option<Function> = lua.globals().get("extract")?;
      let Some(extract) = extract else {
        return Err(LuaError::runtime(
          "candidate must return a table or define extract(doc)",
        ));
      };
      let extracted: Value = extract.call(doc)?;
      match extracted {
        Value::Table(table) => table,
        other => {
          return Err(LuaError::runtime(format!(
            "extract(doc) returned {} instead of a table",
            other.type_name()
          )));
        }
      }
    }
  };

  collect_fields(&table)
}

fn install_hook(lua: &Lua, monitor: &Rc<Monitor>, abort: Arc<AtomicBool>, deadline: Instant) {
  let monitor = monitor.clone();
  lua.set_hook(
    HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
    move |_, _| {
      if abort.load(Ordering::Relaxed) {
        monitor.host_abort.set(true);
        return Err(LuaError::runtime("execution aborted by host"));
      }
      if Instant::now() >= deadline {
        monitor.timed_out.set(true);
        return Err(LuaError::runtime("execution deadline exceeded"));
      }
      Ok(VmState::Continue)
    },
  );
}

/// Build the candidate's globals. Returns the `doc` table.
fn install_environment(
  lua: &Lua,
  job: &Job,
  monitor: &Rc<Monitor>,
  deadline: Instant,
) -> mlua::Result<Table> {
  let globals = lua.globals();
  let policy = &job.policy;

  for name in TRAPPED_FUNCTIONS {
    globals.set(*name, trap_function(lua, monitor, name)?)?;
  }
  for name in TRAPPED_LIBRARIES {
    globals.set(*name, trap_table(lua, monitor, name)?)?;
  }

  let string: Table = globals.get("string")?;
  string.set("dump", trap_function(lua, monitor, "string.dump")?)?;

  if policy.allows(Capability::Stdout) {
    globals.set("print", print_function(lua, monitor)?)?;
  } else {
    globals.set("print", trap_function(lua, monitor, "print")?)?;
  }

  let math: Table = globals.get("math")?;
  for name in ["random", "randomseed"] {
    let path = format!("math.{}", name);
    if policy.allows(Capability::Random) {
      let original: Function = math.get(name)?;
      let monitor = monitor.clone();
      let wrapped = lua.create_function(move |_, args: MultiValue| {
        monitor.nondeterministic.set(true);
        original.call::<MultiValue>(args)
      })?;
      math.set(name, wrapped)?;
    } else {
      math.set(name, trap_function(lua, monitor, &path)?)?;
    }
  }

  if policy.allows(Capability::NetworkRead) {
    globals.set("http", http_table(lua, monitor, &job.document, deadline)?)?;
  } else {
    globals.set("http", trap_table(lua, monitor, "http")?)?;
  }

  globals.set("pcall", protected_call(lua, monitor, false)?)?;
  globals.set("xpcall", protected_call(lua, monitor, true)?)?;

  let doc = if policy.allows(Capability::DocumentRead) {
    document_table(lua, &job.document)?
  } else {
    trap_table(lua, monitor, "doc")?
  };
  globals.set("doc", doc.clone())?;
  Ok(doc)
}

fn trap_function(lua: &Lua, monitor: &Rc<Monitor>, name: &str) -> mlua::Result<Function> {
  let monitor = monitor.clone();
  let name = name.to_string();
  lua.create_function(move |_, _: MultiValue| -> mlua::Result<()> {
    monitor.record_violation(&name);
    Err(LuaError::runtime(format!("blocked operation: {}", name)))
  })
}

/// A table whose every member access is a violation.
fn trap_table(lua: &Lua, monitor: &Rc<Monitor>, name: &str) -> mlua::Result<Table> {
  let table = lua.create_table()?;
  let meta = lua.create_table()?;

  let monitor = monitor.clone();
  let lib = name.to_string();
  let index = lua.create_function(move |_, (_, key): (Value, Value)| -> mlua::Result<()> {
    let member = match key {
      Value::String(key) => format!("{}.{}", lib, key.to_string_lossy()),
      _ => lib.clone(),
    };
    monitor.record_violation(&member);
    Err(LuaError::runtime(format!("blocked operation: {}", member)))
  })?;

  meta.set("__index", index.clone())?;
  meta.set("__newindex", index)?;
  meta.set("__metatable", false)?;
  table.set_metatable(Some(meta));
  Ok(table)
}

/// `pcall` and `xpcall` that cannot catch a violation, a missed deadline, a
/// host abort or memory exhaustion. With `with_handler`, the second argument
/// is the message handler.
fn protected_call(lua: &Lua, monitor: &Rc<Monitor>, with_handler: bool) -> mlua::Result<Function> {
  let monitor = monitor.clone();
  lua.create_function(move |lua, mut args: MultiValue| {
    let callee = args.pop_front().unwrap_or(Value::Nil);
    let on_error = if with_handler {
      args.pop_front().unwrap_or(Value::Nil)
    } else {
      Value::Nil
    };

    let err = match call_value(callee, args) {
      Ok(mut results) => {
        results.push_front(Value::Boolean(true));
        return Ok(results);
      }
      Err(err) => err,
    };

    if is_memory_error(&err) {
      monitor.out_of_memory.set(true);
    }
    if monitor.aborted() {
      return Err(err);
    }

    let message = Value::String(lua.create_string(error_message(&err))?);
    let reported = match on_error {
      Value::Nil => MultiValue::from_iter([message]),
      callback => match call_value(callback, MultiValue::from_iter([message])) {
        Ok(results) => results,
        Err(err) => {
          if is_memory_error(&err) {
            monitor.out_of_memory.set(true);
          }
          if monitor.aborted() {
            return Err(err);
          }
          MultiValue::from_iter([Value::String(lua.create_string(error_message(&err))?)])
        }
      },
    };

    let mut results = reported;
    results.push_front(Value::Boolean(false));
    Ok(results)
  })
}

fn call_value(callee: Value, args: MultiValue) -> mlua::Result<MultiValue> {
  match callee {
    Value::Function(f) => f.call(args),
    Value::Table(t) => t.call(args),
    other => Err(LuaError::runtime(format!(
      "attempt to call a {} value",
      other.type_name()
    ))),
  }
}

/// The message a Lua handler would see, without the callback wrapping or the
/// traceback the host appends.
fn error_message(err: &LuaError) -> String {
  match err {
    LuaError::RuntimeError(message) => match message.split_once("\nstack traceback:") {
      Some((message, _)) => message.to_string(),
      None => message.clone(),
    },
    LuaError::MemoryError(message) => message.clone(),
    LuaError::CallbackError { cause, .. } => error_message(cause),
    other => other.to_string(),
  }
}

fn print_function(lua: &Lua, monitor: &Rc<Monitor>) -> mlua::Result<Function> {
  let tostring: Function = lua.globals().get("tostring")?;
  let monitor = monitor.clone();
  lua.create_function(move |_, args: MultiValue| {
    let mut line = String::new();
    for (i, value) in args.into_iter().enumerate() {
      if i > 0 {
        line.push('\t');
      }
      let text: mlua::String = tostring.call(value)?;
      line.push_str(&text.to_string_lossy());
    }
    line.push('\n');
    monitor.output.borrow_mut().push(&line);
    Ok(())
  })
}

/// `http.get(url)`, restricted to the document's own host.
fn http_table(
  lua: &Lua,
  monitor: &Rc<Monitor>,
  document: &Document,
  deadline: Instant,
) -> mlua::Result<Table> {
  let host = document.url().host_str().unwrap_or_default().to_string();
  let client: RefCell<Option<BlockingFetcher>> = RefCell::new(None);
  let monitor = monitor.clone();

  let get = lua.create_function(move |lua, target: String| {
    // Each request gets whatever is left of the run's budget.
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
      monitor.timed_out.set(true);
      return Err(LuaError::runtime("execution deadline exceeded"));
    }

    if client.borrow().is_none() {
      let policy = HttpPolicy::single_host(host.clone())
        .with_timeout(HTTP_TIMEOUT_CAP)
        .with_max_response_bytes(HTTP_MAX_BODY_BYTES);
      let fetcher = BlockingFetcher::new(policy).map_err(LuaError::external)?;
      *client.borrow_mut() = Some(fetcher);
    }

    let guard = client.borrow();
    let Some(fetcher) = guard.as_ref() else {
      return Err(LuaError::runtime("http client unavailable"));
    };

    match fetcher.get_within(&target, remaining) {
      Ok(page) => {
        let response = lua.create_table()?;
        response.set("status", page.status)?;
        response.set("content_type", page.content_type)?;
        response.set("body", page.body)?;
        Ok(response)
      }
      Err(HttpError::Blocked { .. }) | Err(HttpError::InvalidUrl { .. }) => {
        let operation = format!("http.get({})", target);
        monitor.record_violation(&operation);
        Err(LuaError::runtime(format!("blocked operation: {}", operation)))
      }
      Err(HttpError::Timeout { .. }) if Instant::now() >= deadline => {
        monitor.timed_out.set(true);
        Err(LuaError::runtime("execution deadline exceeded"))
      }
      Err(e) => Err(LuaError::external(e)),
    }
  })?;

  let http = lua.create_table()?;
  http.set("get", get)?;
  Ok(http)
}

/// The `doc` table: `doc.url`, `doc:select(css)`, `doc:select_one(css)`,
/// `doc:meta(name)`.
fn document_table(lua: &Lua, document: &Document) -> mlua::Result<Table> {
  let html = Rc::new(Html::parse_document(document.html()));
  let doc = lua.create_table()?;
  doc.set("url", document.url().as_str())?;

  let page = html.clone();
  let select = lua.create_function(move |lua, (_, css): (Value, String)| {
    let selector = parse_selector(&css)?;
    let list = lua.create_table()?;
    for (i, element) in page.select(&selector).enumerate() {
      list.raw_set(i + 1, element_table(lua, element)?)?;
    }
    Ok(list)
  })?;
  doc.set("select", select)?;

  let page = html.clone();
  let select_one = lua.create_function(move |lua, (_, css): (Value, String)| {
    let selector = parse_selector(&css)?;
    match page.select(&selector).next() {
      Some(element) => Ok(Value::Table(element_table(lua, element)?)),
      None => Ok(Value::Nil),
    }
  })?;
  doc.set("select_one", select_one)?;

  let page = html;
  let meta = lua.create_function(move |_, (_, name): (Value, String)| {
    let selector = parse_selector("meta")?;
    let content = page.select(&selector).find_map(|element| {
      let attrs = element.value();
      let key = attrs.attr("name").or_else(|| attrs.attr("property"))?;
      if key.eq_ignore_ascii_case(&name) {
        attrs.attr("content").map(str::to_string)
      } else {
        None
      }
    });
    Ok(content)
  })?;
  doc.set("meta", meta)?;

  Ok(doc)
}

fn parse_selector(css: &str) -> mlua::Result<Selector> {
  Selector::parse(css).map_err(|_| LuaError::runtime(format!("invalid selector '{}'", css)))
}

/// `{tag, text, attrs}` for one element.
fn element_table(lua: &Lua, element: ElementRef<'_>) -> mlua::Result<Table> {
  let table = lua.create_table()?;
  table.set("tag", element.value().name())?;
  table.set("text", normalize_text(element.text()))?;

  let attrs = lua.create_table()?;
  for (name, value) in element.value().attrs() {
    attrs.set(name, value)?;
  }
  table.set("attrs", attrs)?;
  Ok(table)
}

fn normalize_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
  let mut out = String::new();
  for word in parts.flat_map(str::split_whitespace) {
    if !out.is_empty() {
      out.push(' ');
    }
    out.push_str(word);
  }
  out
}

/// Flatten the returned table into string fields.
///
/// Non-string keys and values with no textual form are skipped.
fn collect_fields(table: &Table) -> mlua::Result<BTreeMap<String, String>> {
  let mut fields = BTreeMap::new();
  for pair in table.clone().pairs::<Value, Value>() {
    let (key, value) = pair?;
    let Value::String(key) = key else {
      continue;
    };
    if let Some(text) = stringify(&value)? {
      fields.insert(key.to_string_lossy().to_string(), text);
    }
  }
  Ok(fields)
}

fn stringify(value: &Value) -> mlua::Result<Option<String>> {
  if let Value::Table(table) = value {
    // An element table stands for its text.
    let text: Value = table.raw_get("text")?;
    if let Some(text) = scalar(&text) {
      return Ok(Some(text));
    }
    let mut parts = Vec::new();
    for item in table.clone().sequence_values::<Value>() {
      let item = item?;
      let part = match &item {
        Value::Table(inner) => {
          let text: Value = inner.raw_get("text")?;
          scalar(&text)
        }
        other => scalar(other),
      };
      parts.extend(part);
    }
    return Ok(if parts.is_empty() {
      None
    } else {
      Some(parts.join(", "))
    });
  }
  Ok(scalar(value))
}

fn scalar(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.to_string_lossy().to_string()),
    Value::Integer(i) => Some(i.to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::Boolean(b) => Some(b.to_string()),
    _ => None,
  }
}

fn is_memory_error(err: &LuaError) -> bool {
  match err {
    LuaError::MemoryError(_) => true,
    LuaError::CallbackError { cause, .. } => is_memory_error(cause),
    _ => false,
  }
}

fn classify(
  outcome: mlua::Result<BTreeMap<String, String>>,
  monitor: &Monitor,
  policy: &SandboxPolicy,
  duration: Duration,
) -> ExecutionResult {
  let violations = monitor.violations.borrow();

  let (status, extracted_fields, diagnostic) = if !violations.is_empty() {
    (
      ExecutionStatus::BlockedOperation,
      BTreeMap::new(),
      Some(format!("blocked operations: {}", violations.join(", "))),
    )
  } else if monitor.timed_out.get() {
    (
      ExecutionStatus::Timeout,
      BTreeMap::new(),
      Some(format!("exceeded {} ms", policy.max_duration_ms)),
    )
  } else if monitor.host_abort.get() {
    (
      ExecutionStatus::Timeout,
      BTreeMap::new(),
      Some("aborted by host".to_string()),
    )
  } else if monitor.out_of_memory.get() || matches!(&outcome, Err(e) if is_memory_error(e)) {
    (
      ExecutionStatus::ResourceExceeded,
      BTreeMap::new(),
      Some(format!(
        "memory limit of {} bytes exceeded",
        policy.max_memory_bytes
      )),
    )
  } else {
    match outcome {
      Ok(fields) => (ExecutionStatus::Ok, fields, None),
      Err(e) => (
        ExecutionStatus::RuntimeError,
        BTreeMap::new(),
        Some(e.to_string()),
      ),
    }
  };

  let output = monitor.output.borrow();
  ExecutionResult {
    status,
    extracted_fields,
    stdout_excerpt: output.text.clone(),
    duration,
    diagnostic: diagnostic.map(truncate_diagnostic),
    output_truncated: output.truncated || monitor.fields_truncated.get(),
    nondeterministic: monitor.nondeterministic.get(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_buffer_cuts_at_limit() {
    let mut buffer = OutputBuffer::new(5);
    buffer.push("abc");
    buffer.push("défg");
    assert_eq!(buffer.text, "abcd");
    assert!(buffer.truncated);
    buffer.push("more");
    assert_eq!(buffer.text, "abcd");
  }

  #[test]
  fn fields_are_capped_in_key_order() {
    let fields: BTreeMap<String, String> = [("a", "xxxx"), ("b", "éé"), ("c", "yy")]
      .into_iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();

    let (kept, truncated) = cap_fields(fields.clone(), 64);
    assert_eq!(kept, fields);
    assert!(!truncated);

    // "a" and its value use 5 bytes, which leaves 2 after the "b" key.
    let (kept, truncated) = cap_fields(fields.clone(), 8);
    assert!(truncated);
    assert_eq!(kept.get("a").map(String::as_str), Some("xxxx"));
    assert_eq!(kept.get("b").map(String::as_str), Some("é"));
    assert!(!kept.contains_key("c"));

    let (kept, truncated) = cap_fields(fields, 0);
    assert!(kept.is_empty());
    assert!(truncated);
  }

  #[test]
  fn error_messages_are_unwrapped() {
    let wrapped = LuaError::CallbackError {
      traceback: String::new(),
      cause: Arc::new(LuaError::runtime("boom")),
    };
    assert_eq!(error_message(&wrapped), "boom");

    let traced = LuaError::runtime("candidate:2: boom\nstack traceback:\n\t[C]: in ?");
    assert_eq!(error_message(&traced), "candidate:2: boom");
  }

  #[test]
  fn text_is_whitespace_normalized() {
    let parts = ["  X ", "\n wins\t", ""];
    assert_eq!(normalize_text(parts.into_iter()), "X wins");
  }

  #[test]
  fn memory_errors_are_found_through_callbacks() {
    let inner = LuaError::MemoryError("not enough memory".to_string());
    let wrapped = LuaError::CallbackError {
      traceback: String::new(),
      cause: Arc::new(inner),
    };
    assert!(is_memory_error(&wrapped));
    assert!(!is_memory_error(&LuaError::runtime("boom")));
  }
}
