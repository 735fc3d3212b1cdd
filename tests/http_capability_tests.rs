// httpFetch end-to-end against a local HTTP server.

mod common;

use common::error_message;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use tjs::compiler::transpile;
use tjs::vm::capabilities::{Capabilities, UreqFetch};
use tjs::vm::{AgentVM, RunOptions};

/// Serve canned responses on an ephemeral port until the server is dropped.
fn spawn_server() -> (tiny_http::Server, String) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind test server");
    let addr = format!("http://{}", server.server_addr());
    (server, addr)
}

fn serve_one(server: Arc<tiny_http::Server>) {
    thread::spawn(move || {
        if let Ok(request) = server.recv() {
            respond(request);
        }
    });
}

fn respond(request: tiny_http::Request) {
    let (status, body, content_type): (u16, &str, &str) = match request.url() {
        "/json" => (200, r#"{"greeting":"hello"}"#, "application/json"),
        "/missing" => (404, "not here", "text/plain"),
        _ => (200, "plain body", "text/plain"),
    };
    let header =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()).unwrap();
    let response = tiny_http::Response::from_string(body)
        .with_status_code(status)
        .with_header(header);
    let _ = request.respond(response);
}

fn fetch_options() -> RunOptions {
    RunOptions {
        capabilities: Capabilities::default().with_fetch(Arc::new(UreqFetch::default())),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_returns_status_and_body() {
    let (server, addr) = spawn_server();
    let server = Arc::new(server);
    serve_one(Arc::clone(&server));

    let compiled =
        transpile("function get(url: 'http://x') { const r = fetch(url); return r }").unwrap();
    let vm = AgentVM::new();
    let result = vm
        .run(
            compiled.ast,
            json!({ "url": format!("{}/plain", addr) }),
            fetch_options(),
        )
        .await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.result["status"], json!(200));
    assert_eq!(result.result["ok"], json!(true));
    assert_eq!(result.result["body"], json!("plain body"));
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_parses_json_bodies() {
    let (server, addr) = spawn_server();
    let server = Arc::new(server);
    serve_one(Arc::clone(&server));

    let compiled = transpile(
        "function greeting(url: 'http://x') { const r = fetch(url); return r.json.greeting }",
    )
    .unwrap();
    let vm = AgentVM::new();
    let result = vm
        .run(
            compiled.ast,
            json!({ "url": format!("{}/json", addr) }),
            fetch_options(),
        )
        .await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.result, json!("hello"));
}

#[tokio::test(flavor = "multi_thread")]
async fn error_statuses_are_values_not_errors() {
    let (server, addr) = spawn_server();
    let server = Arc::new(server);
    serve_one(Arc::clone(&server));

    let compiled =
        transpile("function get(url: 'http://x') { const r = fetch(url); return r.status }")
            .unwrap();
    let vm = AgentVM::new();
    let result = vm
        .run(
            compiled.ast,
            json!({ "url": format!("{}/missing", addr) }),
            fetch_options(),
        )
        .await;
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(result.result, json!(404));
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_failure_is_a_monadic_error() {
    // Nothing listens on this port.
    let compiled =
        transpile("function get(url: 'http://x') { const r = fetch(url); return r }").unwrap();
    let vm = AgentVM::new();
    let result = vm
        .run(
            compiled.ast,
            json!({ "url": "http://127.0.0.1:9" }),
            fetch_options(),
        )
        .await;
    let err = result.error.expect("expected a monadic error");
    assert_eq!(err["op"], "httpFetch");
    assert_eq!(err["capability"], true);
}

#[tokio::test]
async fn missing_capability_names_the_domain() {
    let compiled =
        transpile("function get(url: 'http://x') { const r = fetch(url); return r }").unwrap();
    let vm = AgentVM::new();
    let result = vm
        .run(
            compiled.ast,
            json!({ "url": "http://localhost" }),
            RunOptions::default(),
        )
        .await;
    assert!(error_message(&result).contains("Capability 'fetch'"));
}
