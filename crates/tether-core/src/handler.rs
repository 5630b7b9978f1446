//! Service seam between the routing layer and the callable operations.
//!
//! The router owns sessions, ordering, and the wire envelope; everything a
//! method actually *does* lives behind [`RequestHandler`]. Handlers receive a
//! [`RequestCtx`] so they can push server-initiated events into the session's
//! replayable stream without knowing how it is transported.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::ids::SessionId;
use crate::rpc;

/// Outbound event channel exposed to handlers. The implementation assigns
/// the monotonic event id and delivers the payload to any attached stream.
pub trait EventSink: Send + Sync {
    /// Record a server-initiated message for the session. Returns the
    /// assigned event id; delivery to a live stream is best-effort.
    fn push(&self, payload: Value) -> u64;
}

/// Per-call context handed to [`RequestHandler::call`].
#[derive(Clone)]
pub struct RequestCtx {
    pub session_id: SessionId,
    pub events: Arc<dyn EventSink>,
}

/// Failures a handler can signal for a single method call. These become
/// per-message JSON-RPC error responses, never transport-level rejections.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl HandlerError {
    /// JSON-RPC error code for the response envelope.
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound(_) => rpc::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => rpc::INVALID_PARAMS,
            Self::Internal(_) => rpc::INTERNAL_ERROR,
        }
    }
}

/// The callable-operations seam. One implementation serves every session in
/// the process; per-session state stays on the router side.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle the handshake's `initialize` request. The returned value
    /// becomes the JSON-RPC result announcing the server's identity and
    /// capabilities.
    async fn initialize(&self, params: Option<Value>) -> Result<Value, HandlerError>;

    /// Handle any non-handshake method addressed to an active session.
    async fn call(
        &self,
        ctx: RequestCtx,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, HandlerError>;
}
