//! End-to-end client/server exercises over the embedded transport:
//! handshake, registry operations, notification ordering around
//! initialization, and the bidirectional roots/sampling machinery.

use async_trait::async_trait;
use relay_mcp::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct EchoArgs {
    message: String,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct NoArgs {}

/// Spin up a served embedded pair
async fn start_server(server: McpServer) -> (Arc<McpServer>, relay_mcp::transport::EmbeddedClientTransport) {
    let server = Arc::new(server);
    let client_transport = server.as_embedded().await;
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }
    // Give the serving loop a tick to come up
    tokio::time::sleep(Duration::from_millis(20)).await;
    (server, client_transport)
}

#[tokio::test]
async fn handshake_and_tool_call() {
    let server = McpServer::new("embedded-server", "1.0.0");
    server
        .tool("echo", "Echo a message", |_ctx, args: EchoArgs| async move {
            Ok(args.message)
        })
        .await
        .unwrap();

    let (_server, transport) = start_server(server).await;

    let client = McpClient::new("test-client", "1.0");
    let init = client.connect(transport).await.unwrap();
    assert_eq!(init.protocol_version, "2025-03-26");
    assert_eq!(init.server_info.name, "embedded-server");
    assert_eq!(
        client.protocol_version().await,
        Some(ProtocolVersion::V2025_03_26)
    );

    let tools = client.list_tools(None).await.unwrap();
    assert_eq!(tools.tools.len(), 1);
    assert_eq!(tools.tools[0].name, "echo");

    let mut args = serde_json::Map::new();
    args.insert("message".to_string(), json!("round trip"));
    let outcome = client.call_tool("echo", Some(args)).await.unwrap();
    assert!(!outcome.is_error);
    assert_eq!(outcome.content, vec![ContentItem::text("round trip")]);

    client.ping().await.unwrap();
}

#[tokio::test]
async fn list_changed_queued_until_initialized() {
    let server = McpServer::new("queue-server", "1.0.0");
    let (server, mut transport) = start_server(server).await;

    // Initialize by hand so we control when initialized goes out
    let init = JsonRpcRequest::new(
        RequestId::Number(1),
        "initialize",
        Some(json!({
            "protocolVersion": "draft",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "1"}
        })),
    )
    .unwrap();
    let frame = transport.send_request(init).await.unwrap();
    assert!(frame.error.is_none());

    // Registration while the session is uninitialized queues the
    // list-changed notification
    server
        .tool("late", "Registered mid-handshake", |_ctx, _args: NoArgs| async move {
            Ok("ok".to_string())
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        transport.receive_notification().await.unwrap().is_none(),
        "list-changed leaked before notifications/initialized"
    );

    // Flushes after the client announces initialized
    transport
        .send_notification(
            JsonRpcNotification::new("notifications/initialized", None::<Value>).unwrap(),
        )
        .await
        .unwrap();

    let mut seen = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(notification) = transport.receive_notification().await.unwrap() {
            seen = Some(notification);
            break;
        }
    }
    assert_eq!(
        seen.expect("queued notification flushed").method,
        "notifications/tools/list_changed"
    );
}

#[tokio::test]
async fn list_changed_immediate_after_initialized() {
    let server = McpServer::new("live-server", "1.0.0");
    let (server, transport) = start_server(server).await;

    let client = McpClient::new("test-client", "1.0");
    client.connect(transport).await.unwrap();

    server
        .tool("fresh", "Registered live", |_ctx, _args: NoArgs| async move {
            Ok("ok".to_string())
        })
        .await
        .unwrap();

    let mut seen = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(notification) = client.receive_notification().await.unwrap() {
            seen = Some(notification);
            break;
        }
    }
    assert_eq!(
        seen.expect("live notification delivered").method,
        "notifications/tools/list_changed"
    );
}

#[tokio::test]
async fn server_discovers_roots_from_client() {
    // Scenario: client advertises roots.listChanged; the server issues
    // roots/list after initialized and merges the decoded paths
    let server = McpServer::new("roots-server", "1.0.0");
    let (server, transport) = start_server(server).await;

    let mut client = McpClient::new("test-client", "1.0");
    client.set_capabilities(ClientCapabilities {
        roots: Some(RootsCapability {
            list_changed: Some(true),
        }),
        sampling: None,
    });
    let client = Arc::new(client);
    client
        .set_request_handler(
            StaticClientRequestHandler::new().with_root("file:///ws", None),
        )
        .await;
    client.connect(transport).await.unwrap();

    // Pump server-initiated requests until the roots land
    let mut roots = Vec::new();
    for _ in 0..100 {
        client.process_server_requests().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(session) = server.sessions().first() {
            roots = session.workspace_roots();
            if !roots.is_empty() {
                break;
            }
        }
    }
    assert_eq!(roots, vec!["/ws".to_string()]);
}

struct CannedSampler;

#[async_trait]
impl ClientRequestHandler for CannedSampler {
    async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult> {
        assert_eq!(params.messages.len(), 1);
        Ok(CreateMessageResult {
            role: Role::Assistant,
            content: ContentItem::text("canned completion"),
            model: Some("test-model".to_string()),
            stop_reason: Some("endTurn".to_string()),
        })
    }
}

#[tokio::test]
async fn server_requests_sampling_from_client() {
    let server = McpServer::new("sampling-server", "1.0.0");
    let (server, transport) = start_server(server).await;

    let mut client = McpClient::new("test-client", "1.0");
    client.set_capabilities(ClientCapabilities {
        roots: None,
        sampling: Some(SamplingCapability {
            text: Some(true),
            image: None,
            audio: None,
        }),
    });
    let client = Arc::new(client);
    client.set_request_handler(CannedSampler).await;
    client.connect(transport).await.unwrap();

    let session_id = server.sessions().first().unwrap().id().to_string();

    // Pump the client while the server waits for its answer
    let pump = {
        let client = client.clone();
        tokio::spawn(async move {
            loop {
                let _ = client.process_server_requests().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let result = server
        .request_sampling(
            Some(session_id),
            CreateMessageParams {
                messages: vec![SamplingMessage {
                    role: Role::User,
                    content: ContentItem::text("hello?"),
                }],
                system_prompt: None,
                max_tokens: Some(64),
                temperature: None,
                stop_sequences: None,
            },
        )
        .await
        .unwrap();

    pump.abort();
    assert_eq!(result.content, ContentItem::text("canned completion"));
    assert_eq!(result.model.as_deref(), Some("test-model"));
}

#[tokio::test]
async fn progress_notifications_reach_the_client() {
    let server = McpServer::new("progress-server", "1.0.0");
    server
        .tool("work", "Reports progress", |ctx: RequestContext, _args: NoArgs| async move {
            ctx.report_progress(1.0, Some(2.0), Some("halfway".to_string()))?;
            ctx.report_progress(2.0, Some(2.0), None)?;
            Ok("done".to_string())
        })
        .await
        .unwrap();
    let (_server, transport) = start_server(server).await;

    let client = McpClient::new("test-client", "1.0");
    client.connect(transport).await.unwrap();

    // Attach a progress token via _meta so the reporter has a target
    let result = client
        .request_raw(
            "tools/call",
            Some(json!({
                "name": "work",
                "arguments": {},
                "_meta": {"progressToken": "job-1"}
            })),
        )
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], json!("done"));

    let mut progress = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        while let Some(notification) = client.receive_notification().await.unwrap() {
            if notification.method == "notifications/progress" {
                progress.push(notification.params.unwrap());
            }
        }
        if progress.len() >= 2 {
            break;
        }
    }
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[0]["progressToken"], json!("job-1"));
    assert_eq!(progress[0]["progress"], json!(1.0));
    assert_eq!(progress[0]["message"], json!("halfway"));
    assert_eq!(progress[1]["progress"], json!(2.0));
}
