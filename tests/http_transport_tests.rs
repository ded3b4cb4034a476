//! Streamable HTTP transport behavior: session header echo, 202 for
//! notifications, DELETE-for-termination, and the legacy SSE endpoint
//! handshake.

#![cfg(feature = "http")]

use relay_mcp::prelude::*;
use relay_mcp::transport::{MCP_SESSION_HEADER, StreamableHttpServerTransport};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct EchoArgs {
    message: String,
}

async fn start_http_server() -> (Arc<McpServer>, String) {
    let server = McpServer::new("http-server", "1.0.0");
    server
        .tool("echo", "Echo a message", |_ctx, args: EchoArgs| async move {
            Ok(args.message)
        })
        .await
        .unwrap();

    let transport = StreamableHttpServerTransport::new("127.0.0.1:0".to_string());
    transport.initialize().await.unwrap();
    let addr = transport.local_addr().await.unwrap();

    let server = Arc::new(server);
    server.select_transport(Arc::new(transport)).await;
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    (server, format!("http://{addr}/mcp"))
}

fn initialize_payload() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "1"}
        }
    })
}

#[tokio::test]
async fn post_initialize_echoes_session_header() {
    let (_server, endpoint) = start_http_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&endpoint)
        .body(initialize_payload().to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let session_id = response
        .headers()
        .get(MCP_SESSION_HEADER)
        .expect("session header present")
        .to_str()
        .unwrap()
        .to_string();
    assert!(!session_id.is_empty());
    assert!(session_id.bytes().all(|b| (0x21..=0x7e).contains(&b)));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], json!("2025-03-26"));
}

#[tokio::test]
async fn post_notification_yields_202() {
    let (_server, endpoint) = start_http_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&endpoint)
        .body(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn session_persists_across_posts() {
    let (server, endpoint) = start_http_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&endpoint)
        .body(initialize_payload().to_string())
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(MCP_SESSION_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let call = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {"name": "echo", "arguments": {"message": "over http"}}
    });
    let response = client
        .post(&endpoint)
        .header(MCP_SESSION_HEADER, &session_id)
        .body(call.to_string())
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["result"]["content"][0]["text"],
        json!("over http")
    );

    assert!(server.session(&session_id).is_some());
}

#[tokio::test]
async fn delete_terminates_the_session() {
    let (server, endpoint) = start_http_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&endpoint)
        .body(initialize_payload().to_string())
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(MCP_SESSION_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(server.session(&session_id).is_some());

    let response = client
        .delete(&endpoint)
        .header(MCP_SESSION_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Session teardown runs asynchronously
    let mut gone = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if server.session(&session_id).is_none() {
            gone = true;
            break;
        }
    }
    assert!(gone, "session survived DELETE");
}

#[tokio::test]
async fn env_headers_become_session_environment() {
    let (server, endpoint) = start_http_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&endpoint)
        .header("Mcp-Env-Deploy-Region", "eu-west-1")
        .body(initialize_payload().to_string())
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(MCP_SESSION_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let session = server.session(&session_id).unwrap();
    assert_eq!(
        session.client_env().get("DEPLOY_REGION").map(String::as_str),
        Some("eu-west-1")
    );
}

#[tokio::test]
async fn legacy_sse_emits_endpoint_event_first() {
    use relay_mcp::transport::SseServerTransport;

    let server = McpServer::new("sse-server", "1.0.0");
    let transport = SseServerTransport::new("127.0.0.1:0".to_string());
    transport.initialize().await.unwrap();
    let addr = transport.local_addr().await.unwrap();

    let server = Arc::new(server);
    server.select_transport(Arc::new(transport)).await;
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/sse"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // The first event names the POST path
    let mut stream = response;
    let chunk = tokio::time::timeout(Duration::from_secs(2), stream.chunk())
        .await
        .unwrap()
        .unwrap()
        .expect("endpoint event arrives");
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: endpoint"), "got: {text}");
    assert!(text.contains("/messages?sessionId="), "got: {text}");
}
