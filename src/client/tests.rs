use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::*;
use crate::events::SinkError;
use crate::transport::{TransportFailure, TransportRequest, TransportResponse};

#[derive(Clone, Default)]
struct MockTransport {
    responses: Arc<Mutex<VecDeque<Result<TransportResponse, TransportFailure>>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MockTransport {
    fn with_responses(responses: Vec<Result<TransportResponse, TransportFailure>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().expect("lock poisoned").len()
    }

    fn request_body(&self, index: usize) -> Value {
        let requests = self.requests.lock().expect("lock poisoned");
        serde_json::from_str(&requests[index].body).expect("request body is JSON")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportFailure> {
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(request.clone());
        let mut guard = self.responses.lock().expect("lock poisoned");
        guard
            .pop_front()
            .unwrap_or_else(|| Err(TransportFailure::Other("no more mock responses".to_string())))
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingSink {
    fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn event(&self, name: &str, fields: &Value) -> Result<(), SinkError> {
        self.events
            .lock()
            .expect("lock poisoned")
            .push((name.to_string(), fields.clone()));
        Ok(())
    }
}

struct FailingSink;

impl EventSink for FailingSink {
    fn event(&self, _name: &str, _fields: &Value) -> Result<(), SinkError> {
        Err("sink exploded".into())
    }
}

fn ok_response(body: Value) -> Result<TransportResponse, TransportFailure> {
    Ok(TransportResponse {
        status: 200,
        body: body.to_string(),
    })
}

fn status_response(status: u16, body: Value) -> Result<TransportResponse, TransportFailure> {
    Ok(TransportResponse {
        status,
        body: body.to_string(),
    })
}

fn answer_document() -> Value {
    json!({
        "output_text": "Rust is a systems language.",
        "output": [{
            "type": "web_search_call",
            "sources": [{"url": "https://rust-lang.org/", "title": "Rust"}]
        }]
    })
}

fn client_with(transport: MockTransport, options: RawOptions) -> Client {
    Client::builder()
        .options(options)
        .api_key("test-key")
        .transport(transport)
        .build()
        .expect("client builds")
}

#[tokio::test]
async fn blank_query_fails_without_any_network_call() {
    let transport = MockTransport::default();
    let client = client_with(transport.clone(), RawOptions::default());

    let err = client.answer("   ").await.expect_err("blank query fails");
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn disabled_web_access_fails_without_any_network_call() {
    let transport = MockTransport::default();
    let options = RawOptions {
        web_access: Some("false".to_string()),
        ..Default::default()
    };
    let client = client_with(transport.clone(), options);

    let err = client.answer("query").await.expect_err("disabled access fails");
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn missing_credential_fails_at_build() {
    if std::env::var("GROUNDED_API_KEY").is_ok() || std::env::var("OPENAI_API_KEY").is_ok() {
        return;
    }
    let err = Client::builder()
        .transport(MockTransport::default())
        .build()
        .err()
        .expect("no credential");
    assert!(matches!(err, ClientError::Validation(_)));
}

#[test]
fn blank_credentials_fall_through_to_the_next_source() {
    assert_eq!(
        resolve_api_key(
            Some("   ".to_string()),
            Some("".to_string()),
            Some("sk-live".to_string()),
        )
        .as_deref(),
        Some("sk-live")
    );
    assert_eq!(
        resolve_api_key(None, Some("sk-env".to_string()), None).as_deref(),
        Some("sk-env")
    );
    assert_eq!(
        resolve_api_key(Some("sk-explicit".to_string()), Some("sk-env".to_string()), None)
            .as_deref(),
        Some("sk-explicit")
    );
    assert!(resolve_api_key(Some(" ".to_string()), None, Some("\t".to_string())).is_none());
}

#[test]
fn config_exposes_normalized_options() {
    let options = RawOptions {
        max_retries: Some("5".to_string()),
        allowed_domains: vec!["WWW.Example.com".to_string()],
        ..Default::default()
    };
    let client = Client::builder()
        .options(options)
        .api_key("test-key")
        .transport(MockTransport::default())
        .build()
        .expect("client builds");

    assert_eq!(client.config().max_retries, 2);
    assert_eq!(client.config().allowed_domains, vec!["example.com".to_string()]);
}

#[tokio::test]
async fn success_returns_answer_with_sources() {
    let transport = MockTransport::with_responses(vec![ok_response(answer_document())]);
    let sink = RecordingSink::default();
    let client = Client::builder()
        .api_key("test-key")
        .transport(transport.clone())
        .event_sink(sink.clone())
        .build()
        .expect("client builds");

    let answer = client.answer("what is rust?").await.expect("call succeeds");
    assert_eq!(answer.text, "Rust is a systems language.");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].host, "rust-lang.org");
    assert_eq!(transport.calls(), 1);

    let names = sink.names();
    assert_eq!(
        names,
        vec!["start", "attempt", "success", "sources_collected"]
    );
}

#[tokio::test]
async fn compatibility_rejection_strips_fields_and_consumes_no_budget() {
    let rejection = json!({
        "error": {"message": "unknown parameter: tools[0].allowed_domains"}
    });
    let transport = MockTransport::with_responses(vec![
        status_response(400, rejection),
        ok_response(answer_document()),
    ]);
    let sink = RecordingSink::default();
    let options = RawOptions {
        allowed_domains: vec!["rust-lang.org".to_string()],
        // Zero retry budget: the fallback re-attempt must still happen.
        max_retries: Some("0".to_string()),
        ..Default::default()
    };
    let client = Client::builder()
        .options(options)
        .api_key("test-key")
        .transport(transport.clone())
        .event_sink(sink.clone())
        .build()
        .expect("client builds");

    let answer = client.answer("query").await.expect("fallback succeeds");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(transport.calls(), 2);

    let first = transport.request_body(0);
    assert!(first["tools"][0].get("allowed_domains").is_some());
    let second = transport.request_body(1);
    assert!(second["tools"][0].get("allowed_domains").is_none());

    assert!(sink.names().contains(&"compatibility_fallback".to_string()));
}

#[tokio::test]
async fn second_compatibility_rejection_is_a_normal_error() {
    let rejection = json!({
        "error": {"message": "unknown parameter: tools[0].allowed_domains"}
    });
    let transport = MockTransport::with_responses(vec![
        status_response(400, rejection.clone()),
        status_response(400, rejection),
    ]);
    let options = RawOptions {
        allowed_domains: vec!["rust-lang.org".to_string()],
        ..Default::default()
    };
    let client = client_with(transport.clone(), options);

    let err = client.answer("query").await.expect_err("second 400 fails");
    assert_eq!(transport.calls(), 2);
    match err {
        ClientError::AttemptsExhausted { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, ClientError::Http { status: 400, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn plain_400_without_extended_fields_never_triggers_fallback() {
    let rejection = json!({
        "error": {"message": "unknown parameter: tools[0].allowed_domains"}
    });
    // No allow-list configured, so the payload never carried the field.
    let transport = MockTransport::with_responses(vec![status_response(400, rejection)]);
    let client = client_with(transport.clone(), RawOptions::default());

    let err = client.answer("query").await.expect_err("400 fails");
    assert_eq!(transport.calls(), 1);
    assert!(matches!(
        err,
        ClientError::AttemptsExhausted { attempts: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn retryable_status_exhausts_budget_with_backoff() {
    let overloaded = json!({"error": {"message": "overloaded"}});
    let transport = MockTransport::with_responses(vec![
        status_response(503, overloaded.clone()),
        status_response(503, overloaded.clone()),
        status_response(503, overloaded),
    ]);
    let sink = RecordingSink::default();
    let options = RawOptions {
        max_retries: Some("1".to_string()),
        ..Default::default()
    };
    let client = Client::builder()
        .options(options)
        .api_key("test-key")
        .transport(transport.clone())
        .event_sink(sink.clone())
        .build()
        .expect("client builds");

    let err = client.answer("query").await.expect_err("budget exhausted");
    assert_eq!(transport.calls(), 2);
    match err {
        ClientError::AttemptsExhausted { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, ClientError::Http { status: 503, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    let names = sink.names();
    assert_eq!(
        names.iter().filter(|n| *n == "retry_wait").count(),
        1,
        "exactly one backoff wait"
    );
    assert_eq!(names.iter().filter(|n| *n == "attempt").count(), 2);
}

#[tokio::test(start_paused = true)]
async fn network_failure_is_retried_then_succeeds() {
    let transport = MockTransport::with_responses(vec![
        Err(TransportFailure::Network("connection reset".to_string())),
        ok_response(answer_document()),
    ]);
    let client = client_with(transport.clone(), RawOptions::default());

    let answer = client.answer("query").await.expect("retry succeeds");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn non_retryable_transport_failure_is_terminal() {
    let transport = MockTransport::with_responses(vec![Err(TransportFailure::Other(
        "tls misconfigured".to_string(),
    ))]);
    let client = client_with(transport.clone(), RawOptions::default());

    let err = client.answer("query").await.expect_err("terminal failure");
    assert_eq!(transport.calls(), 1);
    assert!(matches!(
        err,
        ClientError::AttemptsExhausted { attempts: 1, .. }
    ));
}

#[tokio::test]
async fn insufficient_sources_still_succeeds_but_is_reported() {
    let transport = MockTransport::with_responses(vec![ok_response(answer_document())]);
    let sink = RecordingSink::default();
    let options = RawOptions {
        min_sources: Some("3".to_string()),
        ..Default::default()
    };
    let client = Client::builder()
        .options(options)
        .api_key("test-key")
        .transport(transport)
        .event_sink(sink.clone())
        .build()
        .expect("client builds");

    let answer = client.answer("query").await.expect("soft policy succeeds");
    assert_eq!(answer.sources.len(), 1);
    assert!(sink.names().contains(&"sources_insufficient".to_string()));
}

#[tokio::test]
async fn allow_list_filters_extracted_sources() {
    let doc = json!({
        "output_text": "answer",
        "output": [{
            "type": "web_search_call",
            "sources": [
                {"url": "https://docs.example.com/a", "title": "in"},
                {"url": "https://example.org/b", "title": "out"}
            ]
        }]
    });
    let transport = MockTransport::with_responses(vec![ok_response(doc)]);
    let options = RawOptions {
        allowed_domains: vec!["example.com".to_string()],
        ..Default::default()
    };
    let client = client_with(transport, options);

    let answer = client.answer("query").await.expect("call succeeds");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].host, "docs.example.com");
}

#[tokio::test]
async fn failing_sink_never_affects_the_outcome() {
    let transport = MockTransport::with_responses(vec![ok_response(answer_document())]);
    let client = Client::builder()
        .api_key("test-key")
        .transport(transport)
        .event_sink(FailingSink)
        .build()
        .expect("client builds");

    let answer = client.answer("query").await.expect("sink errors ignored");
    assert_eq!(answer.text, "Rust is a systems language.");
}
