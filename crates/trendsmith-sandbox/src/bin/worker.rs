//! Standalone sandbox worker: one job on stdin, one result on stdout.

fn main() -> std::io::Result<()> {
  trendsmith_sandbox::serve_worker()
}
