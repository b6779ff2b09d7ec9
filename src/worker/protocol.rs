//! Worker wire protocol
//!
//! Newline-delimited JSON. Every line is a two-element array `[tag, payload]`:
//!
//! - `0` field call, parent to worker
//! - `1` field result, worker to parent
//! - `3` IPC: an RPC request `{name, args, id?}` from the worker, or a response
//!   `{id, type: "response", response}` from the parent. A request without `id` is
//!   fire-and-forget.

use crate::error::BuildError;
use crate::node::Node;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::warn;

pub const TAG_CALL: u64 = 0;
pub const TAG_RESULT: u64 = 1;
pub const TAG_IPC: u64 = 3;

const RESPONSE_TYPE: &str = "response";

/// Resolve one field on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCall {
    pub id: u64,
    pub plugin: String,
    pub type_name: String,
    pub field_name: String,
    pub node: Node,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldReply {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, response: Value) -> Self {
        RpcResponse {
            id,
            kind: RESPONSE_TYPE.to_string(),
            response,
            error: None,
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        RpcResponse {
            id,
            kind: RESPONSE_TYPE.to_string(),
            response: Value::Null,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(FieldCall),
    Result(FieldReply),
    Request(RpcRequest),
    Response(RpcResponse),
}

impl Message {
    /// One line, including the trailing newline
    pub fn encode(&self) -> Result<String, BuildError> {
        let (tag, payload) = match self {
            Message::Call(call) => (TAG_CALL, serde_json::to_value(call)?),
            Message::Result(reply) => (TAG_RESULT, serde_json::to_value(reply)?),
            Message::Request(request) => (TAG_IPC, serde_json::to_value(request)?),
            Message::Response(response) => (TAG_IPC, serde_json::to_value(response)?),
        };
        let mut line = serde_json::to_string(&Value::Array(vec![Value::from(tag), payload]))?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Message, BuildError> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Array(mut parts) = value else {
            return Err(BuildError::Protocol(format!("expected [tag, payload], got {}", line)));
        };
        if parts.len() != 2 {
            return Err(BuildError::Protocol(format!(
                "expected 2 elements, got {}",
                parts.len()
            )));
        }
        let payload = parts.pop().unwrap_or(Value::Null);
        let tag = parts
            .pop()
            .and_then(|t| t.as_u64())
            .ok_or_else(|| BuildError::Protocol("channel tag is not an integer".to_string()))?;

        match tag {
            TAG_CALL => Ok(Message::Call(serde_json::from_value(payload)?)),
            TAG_RESULT => Ok(Message::Result(serde_json::from_value(payload)?)),
            TAG_IPC if payload.get("type").and_then(Value::as_str) == Some(RESPONSE_TYPE) => {
                Ok(Message::Response(serde_json::from_value(payload)?))
            }
            TAG_IPC => Ok(Message::Request(serde_json::from_value(payload)?)),
            other => Err(BuildError::Protocol(format!("unknown channel tag {}", other))),
        }
    }
}

/// Spawn a task that owns the write half; messages sent on the returned channel are written in order
pub fn spawn_writer<W>(mut writer: W) -> mpsc::UnboundedSender<Message>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let line = match message.encode() {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Dropping unencodable message");
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
                break;
            }
        }
    });
    tx
}

pub type MessageLines<R> = Lines<BufReader<R>>;

pub fn message_lines<R: AsyncRead + Unpin>(reader: R) -> MessageLines<R> {
    BufReader::new(reader).lines()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ipc_request_and_response_share_a_tag() {
        let request = Message::Request(RpcRequest {
            name: "getNode".to_string(),
            args: json!(["a"]),
            id: Some(7),
        });
        let line = request.encode().unwrap();
        assert!(line.starts_with("[3,"));
        assert!(line.ends_with('\n'));
        assert_eq!(Message::decode(line.trim_end()).unwrap(), request);

        let response = Message::Response(RpcResponse::ok(7, json!({"id": "a"})));
        let line = response.encode().unwrap();
        assert!(line.contains("\"type\":\"response\""));
        assert_eq!(Message::decode(line.trim_end()).unwrap(), response);
    }

    #[test]
    fn test_fire_and_forget_has_no_id() {
        let line = Message::Request(RpcRequest {
            name: "reporter".to_string(),
            args: json!({"fnName": "warn", "args": ["careful"]}),
            id: None,
        })
        .encode()
        .unwrap();
        assert!(!line.contains("\"id\""));
    }

    #[test]
    fn test_malformed_lines_are_protocol_errors() {
        assert!(matches!(Message::decode("{}"), Err(BuildError::Protocol(_))));
        assert!(matches!(Message::decode("[9, {}]"), Err(BuildError::Protocol(_))));
        assert!(matches!(Message::decode("[\"x\", {}]"), Err(BuildError::Protocol(_))));
    }
}
