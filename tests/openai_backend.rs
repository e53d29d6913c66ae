//! The OpenAI-compatible backend against a local fake endpoint.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ir_copilot::completion::{Completion, CompletionClient, CompletionError, OpenAiBackend};
use ir_copilot::models::ChatMessage;
use ir_copilot::retry::RetryPolicy;

const API_KEY: &str = "sk-test";

#[derive(Clone)]
struct FakeOpenAi {
    calls: Arc<AtomicU32>,
    /// Number of leading requests answered with a 500.
    fail_first: u32,
}

async fn chat_completions(
    State(fake): State<FakeOpenAi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let call = fake.calls.fetch_add(1, Ordering::SeqCst);

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {API_KEY}").as_str());
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "message": "invalid api key" } })),
        )
            .into_response();
    }
    if call < fake.fail_first {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream hiccup").into_response();
    }

    let question = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    let answer = format!("You asked: {question}");

    if body["stream"].as_bool() == Some(true) {
        let mut sse = String::from(": keep-alive\n\n");
        sse.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "role": "assistant" } }] })
        ));
        for word in answer.split_inclusive(' ') {
            sse.push_str(&format!(
                "data: {}\n\n",
                json!({ "choices": [{ "delta": { "content": word } }] })
            ));
        }
        sse.push_str("data: [DONE]\n\n");
        return ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response();
    }

    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": answer } }]
    }))
    .into_response()
}

/// Starts the fake endpoint and returns its API base URL.
async fn spawn_fake(fail_first: u32) -> (String, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(FakeOpenAi {
            calls: calls.clone(),
            fail_first,
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1/"), calls)
}

fn client(api_base: &str, api_key: &str) -> CompletionClient {
    let backend = OpenAiBackend::new(api_base, api_key).unwrap();
    CompletionClient::new(Arc::new(backend), "gpt-4o").with_retry_policy(RetryPolicy::immediate(5))
}

fn messages() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a helpful assistant."),
        ChatMessage::user("What was revenue?"),
    ]
}

#[tokio::test]
async fn full_response_is_parsed() {
    let (base, calls) = spawn_fake(0).await;
    let completion = client(&base, API_KEY).complete(&messages(), false).await;

    assert!(matches!(completion, Completion::Text(_)));
    let text = completion.into_text().await.unwrap();
    assert_eq!(text, "You asked: What was revenue?");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn streamed_response_matches_full_response() {
    let (base, _) = spawn_fake(0).await;
    let client = client(&base, API_KEY);

    let full = client
        .complete(&messages(), false)
        .await
        .into_text()
        .await
        .unwrap();
    let streamed = client.complete(&messages(), true).await;
    assert!(matches!(streamed, Completion::Stream(_)));

    assert_eq!(streamed.into_text().await.unwrap(), full);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let (base, calls) = spawn_fake(2).await;
    let text = client(&base, API_KEY)
        .complete(&messages(), false)
        .await
        .into_text()
        .await
        .unwrap();

    assert_eq!(text, "You asked: What was revenue?");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejected_key_fails_after_all_attempts() {
    let (base, calls) = spawn_fake(0).await;
    let completion = client(&base, "sk-wrong").complete(&messages(), true).await;

    let Completion::Failed(failure) = completion else {
        panic!("expected a failure value");
    };
    assert_eq!(failure.attempts, 5);
    match failure.last_error {
        CompletionError::Status { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid api key"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}
