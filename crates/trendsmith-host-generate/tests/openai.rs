use std::time::Duration;

use serde_json::json;
use trendsmith_host_generate::{
  GenerationConstraints, GenerationError, OpenAiClient, TextGenerator,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> OpenAiClient {
  OpenAiClient::new(server.uri(), "test-model", Duration::from_secs(5))
    .unwrap()
    .with_api_key("sk-test")
}

#[tokio::test]
async fn sends_chat_request_and_returns_content() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/chat/completions"))
    .and(header("authorization", "Bearer sk-test"))
    .and(body_partial_json(json!({
      "model": "test-model",
      "max_tokens": 256,
      "messages": [
        {"role": "system", "content": "be brief"},
        {"role": "user", "content": "hello"}
      ]
    })))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
    })))
    .expect(1)
    .mount(&server)
    .await;

  let constraints = GenerationConstraints::new(256, 0.2).with_system("be brief");
  let reply = client(&server).generate("hello", &constraints).await.unwrap();
  assert_eq!(reply, "hi there");
}

#[tokio::test]
async fn rate_limit_maps_to_quota() {
  let server = MockServer::start().await;
  Mock::given(path("/chat/completions"))
    .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
    .mount(&server)
    .await;

  let err = client(&server)
    .generate("hello", &GenerationConstraints::default())
    .await
    .unwrap_err();
  assert_eq!(err, GenerationError::Quota("slow down".to_string()));
  assert!(err.is_transient());
}

#[tokio::test]
async fn unauthorized_is_not_transient() {
  let server = MockServer::start().await;
  Mock::given(path("/chat/completions"))
    .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
    .mount(&server)
    .await;

  let err = client(&server)
    .generate("hello", &GenerationConstraints::default())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), "auth");
  assert!(!err.is_transient());
}

#[tokio::test]
async fn garbage_body_is_malformed() {
  let server = MockServer::start().await;
  Mock::given(path("/chat/completions"))
    .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
    .mount(&server)
    .await;

  let err = client(&server)
    .generate("hello", &GenerationConstraints::default())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), "malformed");
}

#[tokio::test]
async fn slow_provider_times_out() {
  let server = MockServer::start().await;
  Mock::given(path("/chat/completions"))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(json!({"choices": [{"message": {"content": "late"}}]}))
        .set_delay(Duration::from_secs(2)),
    )
    .mount(&server)
    .await;

  let client = OpenAiClient::new(server.uri(), "m", Duration::from_millis(200)).unwrap();
  let err = client
    .generate("hello", &GenerationConstraints::default())
    .await
    .unwrap_err();
  assert_eq!(err, GenerationError::Timeout);
}
