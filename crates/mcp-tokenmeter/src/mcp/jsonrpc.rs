//! Line-delimited JSON-RPC 2.0 over a byte stream pair.
//!
//! One JSON object per line in each direction. The connection is strictly
//! request/response from our side: while waiting for a reply it answers
//! `ping`, refuses any other server-initiated request and drops
//! notifications.

use std::time::Duration;

use rust_mcp_schema::{JSONRPC_VERSION, METHOD_NOT_FOUND};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::RpcFailure;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcMessage {
    fn blank() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            id: Some(Value::from(id)),
            method: Some(method.to_string()),
            params: Some(params),
            ..Self::blank()
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            ..Self::blank()
        }
    }

    pub fn response(id: Value, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::blank()
        }
    }

    pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            ..Self::blank()
        }
    }
}

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Client end of a JSON-RPC conversation.
pub struct Connection {
    reader: Reader,
    writer: Writer,
    next_id: u64,
    line: String,
}

impl Connection {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            writer: Box::new(writer),
            next_id: 1,
            line: String::new(),
        }
    }

    /// Send a request and wait up to `timeout` for its response.
    pub async fn request<P>(
        &mut self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<Value, RpcFailure>
    where
        P: Serialize + ?Sized,
    {
        let id = self.next_id;
        self.next_id += 1;
        let params =
            serde_json::to_value(params).map_err(|e| RpcFailure::Malformed(e.to_string()))?;
        tracing::trace!("-> {} (id {})", method, id);
        self.send(&JsonRpcMessage::request(id, method, params))
            .await?;
        match tokio::time::timeout(timeout, self.await_response(id)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcFailure::Timeout {
                method: method.to_string(),
                after: timeout,
            }),
        }
    }

    pub async fn notify(&mut self, method: &str) -> Result<(), RpcFailure> {
        tracing::trace!("-> {} (notification)", method);
        self.send(&JsonRpcMessage::notification(method)).await
    }

    async fn send(&mut self, msg: &JsonRpcMessage) -> Result<(), RpcFailure> {
        let mut line =
            serde_json::to_string(msg).map_err(|e| RpcFailure::Malformed(e.to_string()))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn await_response(&mut self, id: u64) -> Result<Value, RpcFailure> {
        let expected = Value::from(id);
        loop {
            let msg = self.read_message().await?;
            match (msg.method, msg.id) {
                (Some(method), Some(req_id)) => {
                    let reply = if method == "ping" {
                        JsonRpcMessage::response(req_id, Value::Object(Default::default()))
                    } else {
                        tracing::debug!("refusing server request {}", method);
                        JsonRpcMessage::error_response(
                            req_id,
                            METHOD_NOT_FOUND,
                            format!("method not found: {}", method),
                        )
                    };
                    self.send(&reply).await?;
                }
                (Some(method), None) => {
                    tracing::trace!("<- {} (notification, ignored)", method);
                }
                (None, Some(resp_id)) if resp_id == expected => {
                    tracing::trace!("<- response (id {})", id);
                    return match msg.error {
                        Some(err) => Err(RpcFailure::Remote {
                            code: err.code,
                            message: err.message,
                        }),
                        None => Ok(msg.result.unwrap_or(Value::Null)),
                    };
                }
                // Parse and invalid-request errors come back with a null id.
                (None, None) if msg.error.is_some() => {
                    if let Some(err) = msg.error {
                        tracing::debug!("<- error without id while waiting for id {}", id);
                        return Err(RpcFailure::Remote {
                            code: err.code,
                            message: err.message,
                        });
                    }
                }
                (None, other) => {
                    tracing::debug!("ignoring response with unexpected id {:?}", other);
                }
            }
        }
    }

    async fn read_message(&mut self) -> Result<JsonRpcMessage, RpcFailure> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Err(RpcFailure::Closed);
            }
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcMessage>(text) {
                Ok(msg) => return Ok(msg),
                Err(e) => tracing::debug!("skipping non JSON-RPC line from server: {}", e),
            }
        }
    }
}
