mod common;
use common::{scripted_app, test_config, ScriptedTransport};

use async_trait::async_trait;
use opproxy::app::App;
use opproxy::mcp::server::McpServer;
use opproxy::services::transport::{HttpTransport, PreparedRequest, RawResponse, TransportError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};

/// Never answers within the lifetime of a test.
struct StalledTransport;

#[async_trait]
impl HttpTransport for StalledTransport {
    async fn send(
        &self,
        _request: &PreparedRequest,
        _timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("stalled transport never completes")
    }
}

async fn run_session(app: App, input: Vec<Value>) -> HashMap<String, Value> {
    let mut script = String::new();
    for line in input {
        script.push_str(&line.to_string());
        script.push('\n');
    }
    let server = McpServer::new(Arc::new(app));
    let (client, server_out) = tokio::io::duplex(1 << 16);
    let reader = BufReader::new(std::io::Cursor::new(script.into_bytes()));

    let serving = async move { server.serve(reader, server_out).await };
    let reading = async move {
        let mut client = client;
        let mut output = String::new();
        client.read_to_string(&mut output).await.expect("read output");
        output
    };
    let (served, output) = tokio::join!(serving, reading);
    served.expect("serve");

    output
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).expect("json line"))
        .map(|response| (response["id"].to_string(), response))
        .collect()
}

#[tokio::test]
async fn answers_lifecycle_listing_and_calls() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, json!({"_type": "Project", "id": 1, "name": "Demo", "identifier": "demo"}));
    let app = scripted_app(transport.clone());

    let responses = run_session(
        app,
        vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "view_project", "arguments": {"project_id": 1}}}),
            json!({"jsonrpc": "2.0", "id": "p", "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"}),
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call",
                   "params": {"name": "view_project", "arguments": {}}}),
        ],
    )
    .await;

    assert_eq!(responses.len(), 6);
    assert_eq!(
        responses["1"]["result"]["serverInfo"]["name"],
        "openproject-api-proxy"
    );

    let tools = responses["2"]["result"]["tools"].as_array().expect("tools");
    assert!(tools.iter().any(|t| t["name"] == "attach_file_to_work_package"));
    assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));

    let call = &responses["3"]["result"];
    assert_eq!(call["isError"], false);
    assert_eq!(call["structuredContent"]["result"]["name"], "Demo");
    let text = call["content"][0]["text"].as_str().expect("text");
    assert!(text.contains("\"tool\":\"view_project\""));

    assert_eq!(responses["\"p\""]["result"], json!({}));
    assert_eq!(responses["4"]["error"]["code"], -32601);
    assert_eq!(responses["5"]["error"]["code"], -32602);
    assert_eq!(responses["5"]["error"]["data"]["kind"], "invalid_params");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn malformed_lines_get_parse_errors() {
    let app = scripted_app(ScriptedTransport::new());
    let server = McpServer::new(Arc::new(app));
    let (mut client, server_out) = tokio::io::duplex(1 << 12);
    let reader = BufReader::new(std::io::Cursor::new(b"{not json\n".to_vec()));

    server.serve(reader, server_out).await.expect("serve");
    let mut output = String::new();
    client.read_to_string(&mut output).await.expect("read");
    let response: Value = serde_json::from_str(output.trim()).expect("json");
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["id"], Value::Null);
}

#[tokio::test]
async fn cancelled_calls_produce_no_response() {
    let app = App::with_transport(test_config("op.example.com"), Arc::new(StalledTransport))
        .expect("app");

    let responses = tokio::time::timeout(
        Duration::from_secs(10),
        run_session(
            app,
            vec![
                json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call",
                       "params": {"name": "view_work_package", "arguments": {"work_package_id": 1}}}),
                json!({"jsonrpc": "2.0", "method": "notifications/cancelled",
                       "params": {"requestId": 7, "reason": "user abort"}}),
                json!({"jsonrpc": "2.0", "id": 8, "method": "ping"}),
            ],
        ),
    )
    .await
    .expect("server drains after cancellation");

    assert!(!responses.contains_key("7"));
    assert!(responses.contains_key("8"));
}
