//! Full-stack round trip: client engine ↔ server engine over the paired
//! in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use strand_mcp_client::{connect_byte_transport, ClientSender, McpClient, RequestOptions};
use strand_mcp_protocol::{Implementation, McpError};
use strand_mcp_server::{serve_transport, McpHandler, McpServerEngine, RequestContext};
use strand_mcp_transport::InMemoryTransport;

struct Adder;

#[async_trait]
impl McpHandler for Adder {
    async fn handle(
        &self,
        _method: &str,
        params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, McpError> {
        let params = params.unwrap_or(json!({}));
        let a = params["a"].as_i64().unwrap_or(0);
        let b = params["b"].as_i64().unwrap_or(0);
        Ok(json!({"sum": a + b}))
    }
}

struct Slow;

#[async_trait]
impl McpHandler for Slow {
    async fn handle(
        &self,
        _method: &str,
        _params: Option<Value>,
        _ctx: RequestContext,
    ) -> Result<Value, McpError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({}))
    }
}

async fn connected_client() -> Arc<McpClient> {
    let (server_end, client_end) = InMemoryTransport::pair(32);
    let engine = Arc::new(
        McpServerEngine::builder()
            .server_info("roundtrip-server", "0.0.1")
            .handler("tools/add", Adder)
            .handler("tools/slow", Slow)
            .build(),
    );
    tokio::spawn(serve_transport(engine, server_end));

    let (sender, incoming) = connect_byte_transport(client_end).await.unwrap();
    let client = Arc::new(McpClient::builder(sender as Arc<dyn ClientSender>).build());
    client.start(incoming);
    client
}

#[tokio::test]
async fn test_initialize_then_call() {
    let client = connected_client().await;

    let result = client
        .initialize(Implementation::new("roundtrip-client", "0.0.1"), None)
        .await
        .unwrap();
    assert_eq!(result.server_info.name, "roundtrip-server");
    // a tools handler was registered, so the capability is advertised
    assert!(result.capabilities.tools.is_some());

    let sum = client
        .request(
            "tools/add",
            Some(json!({"a": 19, "b": 23})),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(sum, json!({"sum": 42}));
}

#[tokio::test]
async fn test_concurrent_requests_complete_independently() {
    let client = connected_client().await;
    client
        .initialize(Implementation::new("c", "0"), None)
        .await
        .unwrap();

    let mut calls = Vec::new();
    for i in 0..4 {
        let client = Arc::clone(&client);
        calls.push(tokio::spawn(async move {
            client
                .request(
                    "tools/add",
                    Some(json!({"a": i, "b": 1})),
                    RequestOptions::default(),
                )
                .await
        }));
    }
    for (i, call) in calls.into_iter().enumerate() {
        let result = call.await.unwrap().unwrap();
        assert_eq!(result["sum"], i as i64 + 1);
    }
}

#[tokio::test]
async fn test_timeout_of_one_call_leaves_siblings_alive() {
    let client = connected_client().await;
    client
        .initialize(Implementation::new("c", "0"), None)
        .await
        .unwrap();

    let slow_client = Arc::clone(&client);
    let slow = tokio::spawn(async move {
        slow_client
            .request(
                "tools/slow",
                None,
                RequestOptions::default().with_timeout(Duration::from_millis(50)),
            )
            .await
    });

    let fast = client
        .request("tools/add", Some(json!({"a": 1, "b": 1})), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(fast["sum"], 2);

    assert!(matches!(
        slow.await.unwrap(),
        Err(McpError::RequestTimeout)
    ));
}

#[tokio::test]
async fn test_requests_rejected_before_handshake() {
    let client = connected_client().await;
    let result = client
        .request("tools/add", None, RequestOptions::default())
        .await;
    assert!(matches!(result, Err(McpError::InvalidRequest(_))));
}
