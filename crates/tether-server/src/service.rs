//! Default callable surface behind the [`RequestHandler`] seam.
//!
//! The routing layer does not care what the methods do; this module is the
//! replaceable half of the server. It exposes the MCP-style toolbox surface:
//! `initialize`, `ping`, `tools/list`, and `tools/call` with a greeting tool
//! and a notification tool that exercises the session's event stream.

use async_trait::async_trait;
use serde_json::{json, Value};

use tether_core::handler::{HandlerError, RequestCtx, RequestHandler};

/// Protocol revision announced in the initialize result.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Built-in toolbox: a greeting tool and an event-pushing tool.
pub struct ToolboxHandler {
    server_name: String,
    server_version: String,
}

impl ToolboxHandler {
    pub fn new(server_name: impl Into<String>, server_version: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            server_version: server_version.into(),
        }
    }

    fn list_tools(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": "hello",
                    "title": "问候指令",
                    "description": "一个简单的问候指令案例",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string", "description": "被问候人名" }
                        },
                        "required": ["name"]
                    }
                },
                {
                    "name": "notify",
                    "title": "Push a notification",
                    "description": "Emit a notifications/message event onto the session's event stream",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "message": { "type": "string", "description": "Text to deliver" }
                        }
                    }
                }
            ]
        })
    }

    async fn call_tool(&self, ctx: RequestCtx, params: Option<Value>) -> Result<Value, HandlerError> {
        let params = params.unwrap_or(Value::Null);
        let tool = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::InvalidParams("tools/call requires a tool name".into()))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match tool {
            "hello" => {
                let who = arguments
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        HandlerError::InvalidParams("hello requires a string 'name'".into())
                    })?;
                Ok(text_result(format!("👋你好, {who}!")))
            }
            "notify" => {
                let message = arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("ping");
                let event_id = ctx.events.push(json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": { "level": "info", "data": message },
                }));
                tracing::debug!(session_id = %ctx.session_id, event_id, "notification pushed");
                Ok(text_result(format!("delivered as event {event_id}")))
            }
            other => Err(HandlerError::InvalidParams(format!("unknown tool: {other}"))),
        }
    }
}

impl Default for ToolboxHandler {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl RequestHandler for ToolboxHandler {
    async fn initialize(&self, _params: Option<Value>) -> Result<Value, HandlerError> {
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            },
        }))
    }

    async fn call(
        &self,
        ctx: RequestCtx,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, HandlerError> {
        match method {
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(ctx, params).await,
            m if m.starts_with("notifications/") => Ok(Value::Null),
            other => Err(HandlerError::MethodNotFound(other.to_string())),
        }
    }
}

fn text_result(text: String) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}
