//! Stdio Tool Server
//!
//! Newline-delimited JSON-RPC 2.0 over any reader/writer pair (stdin/stdout
//! in production, in-memory duplex pipes in tests):
//! - Reads one message per line
//! - Answers `initialize`, `ping` and `tools/list` inline
//! - Runs every `tools/call` in its own task, tracked by request id
//! - Aborts a tracked call on `notifications/cancelled`
//! - Drains in-flight calls and stops at end of input
//!
//! ```text
//!   stdin ──lines──► McpServer::run ──► tools/call task ─┐
//!                         │                               │
//!                         └──────► mpsc ◄─────────────────┘
//!                                   │
//!                             writer task ──► stdout
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::future::{AbortHandle, Abortable};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

use model_mesh_core::{Mesh, ToolInvocation};

use crate::jsonrpc::{
    parse_line, Incoming, JsonRpcError, JsonRpcId, JsonRpcResponse, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};

/// A tracked call: its registration token and abort handle
///
/// The token tells a finished call apart from a later call that reused its id.
type Tracked = (u64, AbortHandle);

/// Protocol revision answered when the client does not name one
const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Configuration for the stdio server
pub struct ServerConfig {
    /// Name reported in `initialize`
    pub server_name: String,
    /// Outgoing message queue capacity
    pub output_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "model-mesh".to_string(),
            output_capacity: 256,
        }
    }
}

/// Serves one mesh over one input/output stream pair
pub struct McpServer {
    mesh: Arc<Mesh>,
    config: ServerConfig,
    /// In-flight tool calls by request id
    in_flight: Arc<DashMap<JsonRpcId, Tracked>>,
    next_token: AtomicU64,
}

impl McpServer {
    /// Create a server over a built mesh
    pub fn new(mesh: Arc<Mesh>, config: ServerConfig) -> Self {
        Self {
            mesh,
            config,
            in_flight: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Number of tool calls currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Serve until the input ends
    ///
    /// Calls still running at end of input are allowed to finish and answer.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel::<String>(self.config.output_capacity);
        let writer_task = tokio::spawn(write_loop(writer, out_rx));

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .await
                .context("Failed to read input")?;
            if read == 0 {
                break;
            }

            match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => self.handle_line(line.trim(), &out_tx).await,
                Err(e) => {
                    warn!(error = %e, "Rejected non UTF-8 input line");
                    let error = JsonRpcError::new(
                        PARSE_ERROR,
                        format!("Parse error: input is not valid UTF-8 ({e})"),
                    );
                    send(&out_tx, &JsonRpcResponse::error(None, error)).await;
                }
            }
        }

        info!(in_flight = self.in_flight(), "Input closed, draining in-flight calls");
        drop(out_tx);
        writer_task.await.context("Writer task failed")?
    }

    /// Abort every in-flight call
    pub fn abort_all(&self) {
        for entry in self.in_flight.iter() {
            debug!(id = %entry.key(), "Aborting call");
            entry.value().1.abort();
        }
        self.in_flight.clear();
    }

    async fn handle_line(&self, line: &str, out: &mpsc::Sender<String>) {
        match parse_line(line) {
            Ok(Incoming::Request { id, method, params }) => {
                self.handle_request(id, &method, params, out).await;
            }
            Ok(Incoming::Notification { method, params }) => {
                self.handle_notification(&method, &params);
            }
            Err(rejected) => {
                warn!(code = rejected.error.code, error = %rejected.error.message, "Rejected message");
                send(out, &JsonRpcResponse::error(rejected.id, rejected.error)).await;
            }
        }
    }

    async fn handle_request(
        &self,
        id: JsonRpcId,
        method: &str,
        params: Value,
        out: &mpsc::Sender<String>,
    ) {
        debug!(%id, method, "Request");
        let response = match method {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result(&params)),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                let tools = self.mesh.surface().descriptors();
                JsonRpcResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => match self.start_call(id, params, out) {
                Ok(()) => return,
                Err(response) => response,
            },
            _ => JsonRpcResponse::error(
                Some(id),
                JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
            ),
        };
        send(out, &response).await;
    }

    fn initialize_result(&self, params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        info!(
            protocol_version,
            client = ?params.pointer("/clientInfo/name").and_then(|v| v.as_str()),
            "Client initialized"
        );
        json!({
            "protocolVersion": protocol_version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": self.config.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    /// Spawn a tracked tool call; errors are answered by the caller
    fn start_call(
        &self,
        id: JsonRpcId,
        params: Value,
        out: &mpsc::Sender<String>,
    ) -> Result<(), JsonRpcResponse> {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Err(JsonRpcResponse::error(
                Some(id),
                JsonRpcError::new(INVALID_PARAMS, "Invalid params: 'name' must be a string"),
            ));
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        if !(arguments.is_object() || arguments.is_null()) {
            return Err(JsonRpcResponse::error(
                Some(id),
                JsonRpcError::new(INVALID_PARAMS, "Invalid params: 'arguments' must be an object"),
            ));
        }

        let (abort_handle, registration) = AbortHandle::new_pair();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        match self.in_flight.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(JsonRpcResponse::error(
                    Some(id),
                    JsonRpcError::new(INVALID_REQUEST, "Invalid request: id already in flight"),
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert((token, abort_handle));
            }
        }

        let invocation = ToolInvocation::new(name, arguments).with_call_id(id.to_string());
        let mesh = Arc::clone(&self.mesh);
        let in_flight = Arc::clone(&self.in_flight);
        let out = out.clone();
        let span = tracing::info_span!("tool_call", request_id = %id, tool = name);

        let call = async move { mesh.surface().invoke(invocation).await };
        tokio::spawn(
            async move {
                let outcome = Abortable::new(call, registration).await;
                // A cancelled id may already belong to a newer call
                in_flight.remove_if(&id, |_, (owner, _)| *owner == token);
                match outcome {
                    Ok(response) => {
                        let result = response.to_call_tool_result();
                        send(&out, &JsonRpcResponse::success(id, result)).await;
                    }
                    Err(_) => info!("Call cancelled"),
                }
            }
            .instrument(span),
        );
        Ok(())
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "notifications/initialized" => debug!("Client ready"),
            "notifications/cancelled" => {
                let Some(id) = params.get("requestId").and_then(JsonRpcId::from_value) else {
                    warn!("Cancellation without a usable requestId");
                    return;
                };
                match self.in_flight.remove(&id) {
                    Some((_, (_, handle))) => {
                        info!(
                            %id,
                            reason = ?params.get("reason").and_then(|v| v.as_str()),
                            "Cancelling call"
                        );
                        handle.abort();
                    }
                    None => debug!(%id, "Cancellation for a call no longer running"),
                }
            }
            _ => debug!(method, "Ignoring notification"),
        }
    }
}

/// Queue a response for the writer task
async fn send(out: &mpsc::Sender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if out.send(line).await.is_err() {
                warn!("Output closed, dropping response");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode response"),
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await.context("Write error")?;
        writer.write_all(b"\n").await.context("Write error")?;
        writer.flush().await.context("Flush error")?;
    }
    writer.shutdown().await.context("Failed to close output")?;
    Ok(())
}
