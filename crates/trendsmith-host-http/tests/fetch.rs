use std::time::Duration;

use trendsmith_host_http::{BlockingFetcher, HttpError, HttpFetcher, HttpPolicy, PageFetcher};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn local_policy() -> HttpPolicy {
  HttpPolicy::single_host("127.0.0.1")
    .allow_private()
    .with_timeout(Duration::from_secs(5))
}

fn url(server: &MockServer, route: &str) -> Url {
  Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn fetches_html_page() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/x"))
    .respond_with(
      ResponseTemplate::new(200).set_body_raw("<html><body><h1>X</h1></body></html>", "text/html"),
    )
    .mount(&server)
    .await;

  let fetcher = HttpFetcher::new(local_policy()).unwrap();
  let page = fetcher.fetch(&url(&server, "/x")).await.unwrap();

  assert_eq!(page.status, 200);
  assert!(page.is_html());
  assert!(page.body.contains("<h1>X</h1>"));
  assert!(!page.truncated);
}

#[tokio::test]
async fn non_success_status_is_an_error() {
  let server = MockServer::start().await;
  Mock::given(path("/missing"))
    .respond_with(ResponseTemplate::new(404))
    .mount(&server)
    .await;

  let fetcher = HttpFetcher::new(local_policy()).unwrap();
  let err = fetcher.fetch(&url(&server, "/missing")).await.unwrap_err();
  assert!(matches!(err, HttpError::Status { status: 404, .. }));
}

#[tokio::test]
async fn body_is_capped() {
  let server = MockServer::start().await;
  Mock::given(path("/big"))
    .respond_with(ResponseTemplate::new(200).set_body_raw("a".repeat(10_000), "text/html"))
    .mount(&server)
    .await;

  let fetcher = HttpFetcher::new(local_policy().with_max_response_bytes(100)).unwrap();
  let page = fetcher.fetch(&url(&server, "/big")).await.unwrap();
  assert_eq!(page.body.len(), 100);
  assert!(page.truncated);
}

#[tokio::test]
async fn slow_response_times_out() {
  let server = MockServer::start().await;
  Mock::given(path("/slow"))
    .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
    .mount(&server)
    .await;

  let fetcher =
    HttpFetcher::new(local_policy().with_timeout(Duration::from_millis(200))).unwrap();
  let err = fetcher.fetch(&url(&server, "/slow")).await.unwrap_err();
  assert!(matches!(err, HttpError::Timeout { .. }));
}

#[tokio::test]
async fn private_target_is_blocked_by_default() {
  let server = MockServer::start().await;
  let fetcher = HttpFetcher::new(HttpPolicy::default()).unwrap();
  let err = fetcher.fetch(&url(&server, "/")).await.unwrap_err();
  assert!(matches!(err, HttpError::Blocked { .. }));
}

#[tokio::test]
async fn redirect_to_disallowed_host_is_refused() {
  let server = MockServer::start().await;
  Mock::given(path("/hop"))
    .respond_with(
      ResponseTemplate::new(302).insert_header("location", "http://169.254.169.254/latest"),
    )
    .mount(&server)
    .await;

  let fetcher = HttpFetcher::new(local_policy()).unwrap();
  assert!(fetcher.fetch(&url(&server, "/hop")).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_fetcher_works_off_runtime() {
  let server = MockServer::start().await;
  Mock::given(path("/data"))
    .respond_with(ResponseTemplate::new(200).set_body_raw("{\"ok\":true}", "application/json"))
    .mount(&server)
    .await;

  let target = format!("{}/data", server.uri());
  let worker = std::thread::spawn(move || {
    let fetcher = BlockingFetcher::new(local_policy()).unwrap();
    let page = fetcher.get(&target).unwrap();
    let refused = fetcher.get("http://example.org/").is_err();
    (page.body, refused)
  });
  let (body, refused) = tokio::task::spawn_blocking(move || worker.join().unwrap())
    .await
    .unwrap();

  assert_eq!(body, "{\"ok\":true}");
  assert!(refused);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_fetcher_honours_per_request_budget() {
  let server = MockServer::start().await;
  Mock::given(path("/slow"))
    .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
    .mount(&server)
    .await;

  let target = format!("{}/slow", server.uri());
  let worker = std::thread::spawn(move || {
    let fetcher = BlockingFetcher::new(local_policy()).unwrap();
    let started = std::time::Instant::now();
    let err = fetcher
      .get_within(&target, Duration::from_millis(150))
      .unwrap_err();
    (err, started.elapsed())
  });
  let (err, elapsed) = tokio::task::spawn_blocking(move || worker.join().unwrap())
    .await
    .unwrap();

  assert!(matches!(err, HttpError::Timeout { .. }), "{:?}", err);
  assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
}
