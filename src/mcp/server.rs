use crate::app::App;
use crate::constants::server::{PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION};
use crate::errors::{ErrorCode, McpError, ToolError, ToolErrorKind};
use crate::mcp::envelope::tool_call_result;
use crate::mcp::protocol::{cancelled_request_id, request_key, JsonRpcRequest, JsonRpcResponse};
use crate::services::dispatch::ToolInvocation;
use crate::services::logger::Logger;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub fn map_tool_error(tool: &str, error: &ToolError) -> McpError {
    let mut lines = vec![
        "ToolError".to_string(),
        format!("tool: {}", tool),
        format!("kind: {:?}", error.kind).to_lowercase(),
        format!("code: {}", error.code),
        format!("retryable: {}", error.retryable),
        format!("message: {}", error.message),
    ];
    if let Some(hint) = &error.hint {
        lines.push(format!("hint: {}", hint));
    }
    let message = lines.join("\n");

    let code = match error.kind {
        ToolErrorKind::InvalidParams => ErrorCode::InvalidParams,
        ToolErrorKind::NotFound => ErrorCode::ResourceNotFound,
        ToolErrorKind::Initialization | ToolErrorKind::Internal => ErrorCode::InternalError,
        ToolErrorKind::Retryable
        | ToolErrorKind::Client
        | ToolErrorKind::Protocol
        | ToolErrorKind::PartialFailure
        | ToolErrorKind::Cancelled => ErrorCode::ServerError,
    };
    let mut data = error.to_value();
    if let Value::Object(map) = &mut data {
        map.insert("tool".to_string(), Value::String(tool.to_string()));
    }
    McpError::new(code, message).with_data(data)
}

#[derive(Clone)]
pub struct McpServer {
    app: Arc<App>,
    logger: Logger,
    in_flight: Arc<DashMap<String, CancellationToken>>,
}

impl McpServer {
    pub fn new(app: Arc<App>) -> Self {
        let logger = app.logger.child("server");
        Self {
            app,
            logger,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })
    }

    fn handle_tools_list(&self) -> Value {
        serde_json::json!({ "tools": self.app.catalog.list_tools() })
    }

    pub async fn handle_tools_call(
        &self,
        params: &Value,
        cancel: CancellationToken,
    ) -> Result<Value, McpError> {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if name.is_empty() {
            return Err(McpError::new(ErrorCode::InvalidParams, "Missing tool name"));
        }
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        let envelope = self
            .app
            .router
            .dispatch(ToolInvocation::new(name, args), cancel)
            .await
            .map_err(|err| map_tool_error(name, &err))?;
        Ok(tool_call_result(&envelope))
    }

    pub async fn run_stdio(&self) -> Result<(), ToolError> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Reads newline-delimited requests until EOF, then waits for in-flight
    /// calls. A single writer task owns the output.
    pub async fn serve<R, W>(&self, reader: R, output: W) -> Result<(), ToolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            let mut writer = BufWriter::new(output);
            while let Some(line) = rx.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut lines = reader.lines();
        let mut calls = JoinSet::new();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    self.handle_line(&line, &tx, &mut calls);
                }
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(err) = joined {
                        self.logger.error("tool call task failed", Some(&serde_json::json!({"error": err.to_string()})));
                    }
                }
            }
        }

        while let Some(joined) = calls.join_next().await {
            if let Err(err) = joined {
                self.logger.error("tool call task failed", Some(&serde_json::json!({"error": err.to_string()})));
            }
        }
        drop(tx);
        writer
            .await
            .map_err(|err| ToolError::internal(format!("Writer task failed: {}", err)))??;
        Ok(())
    }

    fn handle_line(
        &self,
        line: &str,
        tx: &mpsc::UnboundedSender<String>,
        calls: &mut JoinSet<()>,
    ) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        let parsed: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                send(tx, JsonRpcResponse::failure(Value::Null, ErrorCode::ParseError.as_i32(), "Parse error".to_string()));
                return;
            }
        };
        let request: JsonRpcRequest = match serde_json::from_value(parsed) {
            Ok(req) => req,
            Err(_) => {
                send(tx, JsonRpcResponse::failure(Value::Null, ErrorCode::InvalidRequest.as_i32(), "Invalid request".to_string()));
                return;
            }
        };

        match request.method.as_str() {
            "notifications/cancelled" => {
                if let Some(key) = cancelled_request_id(&request.params) {
                    if let Some(token) = self.in_flight.get(&key) {
                        self.logger.info("cancelling tool call", Some(&request.params));
                        token.cancel();
                    }
                }
            }
            _ if request.method.starts_with("notifications/") => {}
            "initialize" => {
                if let Some(id) = request.id {
                    send(tx, JsonRpcResponse::success(id, self.handle_initialize()));
                }
            }
            "ping" => {
                if let Some(id) = request.id {
                    send(tx, JsonRpcResponse::success(id, serde_json::json!({})));
                }
            }
            "tools/list" => {
                if let Some(id) = request.id {
                    send(tx, JsonRpcResponse::success(id, self.handle_tools_list()));
                }
            }
            "tools/call" => {
                let Some(id) = request.id else { return };
                let key = request_key(&id);
                let token = CancellationToken::new();
                self.in_flight.insert(key.clone(), token.clone());
                let server = self.clone();
                let tx = tx.clone();
                calls.spawn(async move {
                    let outcome = server.handle_tools_call(&request.params, token.clone()).await;
                    server.in_flight.remove(&key);
                    if token.is_cancelled() {
                        server.logger.debug("response suppressed after cancellation", Some(&id));
                        return;
                    }
                    let response = match outcome {
                        Ok(result) => JsonRpcResponse::success(id, result),
                        Err(err) => JsonRpcResponse::from_error(id, err),
                    };
                    send(&tx, response);
                });
            }
            _ => {
                if let Some(id) = request.id {
                    send(tx, JsonRpcResponse::failure(id, ErrorCode::MethodNotFound.as_i32(), "Method not found".to_string()));
                }
            }
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, response: JsonRpcResponse) {
    let payload = serde_json::to_string(&response).unwrap_or_default();
    let _ = tx.send(payload);
}

pub async fn run_stdio(app: App) -> Result<(), ToolError> {
    let server = McpServer::new(Arc::new(app));
    server.run_stdio().await
}
