//! Request dispatch for the single protocol endpoint.
//!
//! Every message on `/mcp` funnels through here. POST bodies are resolved to
//! a session by three rules, evaluated strictly in order:
//!
//! - Rule A: a presented `mcp-session-id` that the registry knows routes to
//!   that session; the handshake is bypassed entirely.
//! - Rule B: no id and a single `initialize` request creates a session. The
//!   session is registered before its id is revealed to the client, so a
//!   racing follow-up request can already be routed.
//! - Rule C: anything else is rejected with the `-32000` envelope and no
//!   state is touched.
//!
//! GET attaches the standalone event stream (resumable via `Last-Event-ID`);
//! DELETE terminates the session.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;

use tether_core::handler::RequestHandler;
use tether_core::rpc::{self, JsonRpcRequest, JsonRpcResponse, RpcPayload};
use tether_core::SessionId;
use tether_session::{EventEnvelope, Session, SessionError, SessionState};

use crate::metrics::{HANDSHAKES_TOTAL, RPC_ERRORS_TOTAL, RPC_REJECTIONS_TOTAL, RPC_REQUESTS_TOTAL};
use crate::server::{AppState, ResponseMode};
use crate::sse;

/// Header carrying the session id, server-generated at handshake time.
pub const SESSION_HEADER: &str = "mcp-session-id";
/// Header a reconnecting stream uses to resume replay.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Faults that escape the normal reply paths. The outer wrapper turns them
/// into the `-32603` envelope, but only when nothing has been emitted yet.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("generated session id is not a valid header value")]
    SessionHeader(#[from] axum::http::header::InvalidHeaderValue),
}

/// Per-request emission state: each exchange produces exactly one response,
/// and every exit path marks it here before handing the response back.
#[derive(Default)]
struct Exchange {
    responded: bool,
}

impl Exchange {
    fn reply(&mut self, response: Response) -> Response {
        self.responded = true;
        response
    }

    /// The `-32603` fallback. Valid only while nothing has been emitted; a
    /// fault after emission is logged and surfaced as a bare status.
    fn internal_error(&mut self, err: &DispatchError) -> Response {
        metrics::counter!(RPC_ERRORS_TOTAL).increment(1);
        if self.responded {
            tracing::error!(error = %err, "fault after response was emitted");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        tracing::error!(error = %err, "request processing failed");
        self.responded = true;
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonRpcResponse::internal_error()),
        )
            .into_response()
    }
}

pub(crate) async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut exchange = Exchange::default();
    match post_exchange(&state, &mut exchange, &headers, &body).await {
        Ok(response) => response,
        Err(err) => exchange.internal_error(&err),
    }
}

async fn post_exchange(
    state: &AppState,
    exchange: &mut Exchange,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, DispatchError> {
    metrics::counter!(RPC_REQUESTS_TOTAL).increment(1);

    let payload = match RpcPayload::parse(body) {
        Ok(payload) => payload,
        Err(err) => {
            metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "parse").increment(1);
            return Ok(exchange.reply(rejection(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::parse_error(err.to_string()),
            )));
        }
    };

    // Rule A.
    if let Some(id) = session_id_from(headers) {
        return match state.registry.lookup(&id) {
            Some(session) => route_to_session(state, exchange, session, payload).await,
            None => {
                metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "unknown_session").increment(1);
                Ok(exchange.reply(rejection(
                    StatusCode::BAD_REQUEST,
                    JsonRpcResponse::invalid_session(),
                )))
            }
        };
    }

    match payload {
        // Rule B.
        RpcPayload::Single(request) if request.is_initialize() => {
            handshake(state, exchange, request).await
        }
        // Only batches reach this arm; an initialize wrapped in a batch is
        // not a handshake.
        payload if payload.contains_initialize() => {
            metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "batched_initialize").increment(1);
            Ok(exchange.reply(rejection(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::invalid_request(
                    "Invalid Request: Only one initialization request is allowed",
                ),
            )))
        }
        // Rule C.
        _ => {
            metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "no_session").increment(1);
            Ok(exchange.reply(rejection(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::invalid_session(),
            )))
        }
    }
}

/// Rule B: create, register, then initialize. A failed initialize closes and
/// unregisters the half-open session.
async fn handshake(
    state: &AppState,
    exchange: &mut Exchange,
    request: JsonRpcRequest,
) -> Result<Response, DispatchError> {
    let session = Arc::new(Session::new(state.config.session_config()));
    let id = session.id().clone();
    state.registry.register(Arc::clone(&session))?;

    match state.handler.initialize(request.params).await {
        Ok(result) => {
            session.activate()?;
            session.touch();
            metrics::counter!(HANDSHAKES_TOTAL, "outcome" => "ok").increment(1);
            tracing::info!(session_id = %id, "session initialized");

            let mut response = Json(JsonRpcResponse::success(request.id, result)).into_response();
            response
                .headers_mut()
                .insert(SESSION_HEADER, HeaderValue::from_str(id.as_str())?);
            Ok(exchange.reply(response))
        }
        Err(err) => {
            state.registry.close_session(&id);
            metrics::counter!(HANDSHAKES_TOTAL, "outcome" => "error").increment(1);
            tracing::warn!(session_id = %id, error = %err, "initialize failed");
            Ok(exchange.reply(rejection(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::error(request.id, err.code(), err.to_string()),
            )))
        }
    }
}

/// Rule A: the session is resolved; process the body through it.
async fn route_to_session(
    state: &AppState,
    exchange: &mut Exchange,
    session: Arc<Session>,
    payload: RpcPayload,
) -> Result<Response, DispatchError> {
    // A returning client is never re-initialized.
    if payload.contains_initialize() {
        metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "reinitialize").increment(1);
        return Ok(exchange.reply(rejection(
            StatusCode::BAD_REQUEST,
            JsonRpcResponse::invalid_request("Invalid Request: Server already initialized"),
        )));
    }

    match session.state() {
        SessionState::Active => {}
        SessionState::Initializing => {
            metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "not_ready").increment(1);
            return Ok(exchange.reply(rejection(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::error(
                    None,
                    rpc::BAD_REQUEST,
                    "Bad Request: Server not initialized",
                ),
            )));
        }
        SessionState::Closed => {
            metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "closed_session").increment(1);
            return Ok(exchange.reply(rejection(
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::invalid_session(),
            )));
        }
    }

    if payload.messages().is_empty() {
        return Ok(exchange.reply(rejection(
            StatusCode::BAD_REQUEST,
            JsonRpcResponse::invalid_request("Invalid Request"),
        )));
    }

    let is_batch = payload.is_batch();
    let expects_response = payload.has_requests();
    let mut responses = Vec::new();
    for message in payload.into_messages() {
        if let Some(response) = session.handle(message, state.handler.as_ref()).await? {
            responses.push(response);
        }
    }

    if !expects_response {
        // Notification-only POST: acknowledged, nothing to say.
        return Ok(exchange.reply(StatusCode::ACCEPTED.into_response()));
    }

    let response = respond_messages(state, &session, responses, is_batch)?;
    Ok(exchange.reply(response))
}

/// Shape the exchange's response per the configured mode: buffered JSON, or
/// a finite event stream whose frames carry log ids for replay.
fn respond_messages(
    state: &AppState,
    session: &Session,
    responses: Vec<JsonRpcResponse>,
    is_batch: bool,
) -> Result<Response, DispatchError> {
    match state.config.response_mode {
        ResponseMode::Json => {
            if is_batch {
                Ok(Json(responses).into_response())
            } else {
                match responses.into_iter().next() {
                    Some(single) => Ok(Json(single).into_response()),
                    None => Ok(StatusCode::ACCEPTED.into_response()),
                }
            }
        }
        ResponseMode::Stream => {
            let mut events = Vec::with_capacity(responses.len());
            for response in responses {
                let payload = serde_json::to_value(&response)?;
                let event_id = session.record_event(payload.clone());
                events.push(EventEnvelope { event_id, payload });
            }
            Ok(sse::exchange_response(events))
        }
    }
}

pub(crate) async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id_from(&headers) else {
        return rejection(StatusCode::BAD_REQUEST, JsonRpcResponse::invalid_session());
    };
    let Some(session) = state.registry.lookup(&id) else {
        metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "unknown_session").increment(1);
        return rejection(StatusCode::BAD_REQUEST, JsonRpcResponse::invalid_session());
    };

    let last_seen = match headers.get(LAST_EVENT_ID_HEADER) {
        None => None,
        Some(value) => match value.to_str().ok().and_then(|raw| raw.parse::<u64>().ok()) {
            Some(event_id) => Some(event_id),
            None => {
                return rejection(
                    StatusCode::BAD_REQUEST,
                    JsonRpcResponse::invalid_request(
                        "Invalid Request: Last-Event-ID must be an unsigned integer",
                    ),
                );
            }
        },
    };

    let Some(guard) = session.try_attach_stream() else {
        metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "stream_conflict").increment(1);
        return rejection(
            StatusCode::CONFLICT,
            JsonRpcResponse::error(
                None,
                rpc::BAD_REQUEST,
                "Conflict: Only one SSE stream is allowed per session",
            ),
        );
    };

    let Some((replay, rx)) = session.resume_from(last_seen) else {
        // Closed between lookup and attach.
        return rejection(StatusCode::BAD_REQUEST, JsonRpcResponse::invalid_session());
    };

    session.touch();
    tracing::debug!(session_id = %id, replayed = replay.len(), "event stream attached");
    Sse::new(sse::standalone_stream(guard, replay, rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
        .into_response()
}

pub(crate) async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id_from(&headers) else {
        return rejection(StatusCode::BAD_REQUEST, JsonRpcResponse::invalid_session());
    };
    if state.registry.close_session(&id) {
        tracing::info!(session_id = %id, "session terminated by client");
        StatusCode::OK.into_response()
    } else {
        metrics::counter!(RPC_REJECTIONS_TOTAL, "reason" => "unknown_session").increment(1);
        rejection(StatusCode::BAD_REQUEST, JsonRpcResponse::invalid_session())
    }
}

fn session_id_from(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|raw| !raw.is_empty())
        .map(SessionId::from_raw)
}

fn rejection(status: StatusCode, body: JsonRpcResponse) -> Response {
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;
    use crate::service::ToolboxHandler;
    use serde_json::{json, Value};
    use tether_session::SessionRegistry;

    fn test_state(mode: ResponseMode) -> AppState {
        let config = ServerConfig {
            response_mode: mode,
            ..ServerConfig::default()
        };
        AppState {
            registry: Arc::new(SessionRegistry::new()),
            handler: Arc::new(ToolboxHandler::new("simple-http-server", "1.0.0")),
            config: Arc::new(config),
            metrics: crate::metrics::install_recorder(),
        }
    }

    async fn post(state: &AppState, headers: HeaderMap, body: &Value) -> Response {
        handle_post(
            State(state.clone()),
            headers,
            Bytes::from(serde_json::to_vec(body).unwrap()),
        )
        .await
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn init_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.0.0"},
            },
            "id": 1,
        })
    }

    fn with_session(sid: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_str(sid).unwrap());
        headers
    }

    async fn initialized_session(state: &AppState) -> String {
        let response = post(state, HeaderMap::new(), &init_body()).await;
        assert_eq!(response.status(), StatusCode::OK);
        response
            .headers()
            .get(SESSION_HEADER)
            .expect("handshake must return a session id")
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn initialize_creates_and_registers_a_session() {
        let state = test_state(ResponseMode::Json);
        let response = post(&state, HeaderMap::new(), &init_body()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let sid = response
            .headers()
            .get(SESSION_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(sid.starts_with("sess_"));
        assert_eq!(state.registry.count(), 1);

        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["serverInfo"]["name"], "simple-http-server");
        assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    }

    #[tokio::test]
    async fn follow_up_request_routes_to_the_session() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let call = json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "hello", "arguments": {"name": "Ada"}},
            "id": 2,
        });
        let response = post(&state, with_session(&sid), &call).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["id"], 2);
        assert_eq!(body["result"]["content"][0]["text"], "👋你好, Ada!");
    }

    #[tokio::test]
    async fn unknown_session_id_is_rejected_exactly() {
        let state = test_state(ResponseMode::Json);
        let response = post(
            &state,
            with_session("unknown"),
            &json!({"jsonrpc": "2.0", "method": "ping", "id": 1}),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Bad Request: No valid session ID provided"},
                "id": null,
            })
        );
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn missing_session_without_initialize_is_rejected() {
        let state = test_state(ResponseMode::Json);
        let response = post(
            &state,
            HeaderMap::new(),
            &json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn reinitialize_of_a_live_session_is_rejected() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let response = post(&state, with_session(&sid), &init_body()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(
            body["error"]["message"],
            "Invalid Request: Server already initialized"
        );
        // The session survives the rejected attempt.
        assert_eq!(state.registry.count(), 1);
    }

    #[tokio::test]
    async fn batched_initialize_is_rejected() {
        let state = test_state(ResponseMode::Json);
        let response = post(&state, HeaderMap::new(), &json!([init_body()])).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(
            body["error"]["message"],
            "Invalid Request: Only one initialization request is allowed"
        );
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let response = post(&state, with_session(&sid), &json!([])).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn notification_only_post_is_accepted() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let response = post(
            &state,
            with_session(&sid),
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn batch_returns_responses_in_order() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let batch = json!([
            {"jsonrpc": "2.0", "method": "ping", "id": 7},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "method": "tools/list", "id": 8},
        ]);
        let response = post(&state, with_session(&sid), &batch).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let responses = body.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[1]["id"], 8);
        assert!(responses[1]["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn unknown_method_gets_a_per_message_error() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let response = post(
            &state,
            with_session(&sid),
            &json!({"jsonrpc": "2.0", "method": "resources/list", "id": 3}),
        )
        .await;
        // Routed fine; the failure is inside the message, not the transport.
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["id"], 3);
        assert_eq!(body["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let state = test_state(ResponseMode::Json);
        let response = handle_post(
            State(state.clone()),
            HeaderMap::new(),
            Bytes::from_static(b"{not json"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["error"]["message"], "Parse error");
    }

    #[tokio::test]
    async fn request_to_initializing_session_is_not_ready() {
        let state = test_state(ResponseMode::Json);
        let session = Arc::new(Session::new(state.config.session_config()));
        let sid = session.id().as_str().to_string();
        state.registry.register(session).unwrap();

        let response = post(
            &state,
            with_session(&sid),
            &json!({"jsonrpc": "2.0", "method": "ping", "id": 1}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Bad Request: Server not initialized");
    }

    #[tokio::test]
    async fn delete_closes_and_unroutes() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let response = handle_delete(State(state.clone()), with_session(&sid)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.registry.count(), 0);

        let response = post(
            &state,
            with_session(&sid),
            &json!({"jsonrpc": "2.0", "method": "ping", "id": 9}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn delete_without_valid_session_is_rejected() {
        let state = test_state(ResponseMode::Json);
        let response = handle_delete(State(state.clone()), with_session("unknown")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_delete(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_requires_a_valid_session() {
        let state = test_state(ResponseMode::Json);
        let response = handle_get(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_get(State(state), with_session("unknown")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn second_standalone_stream_conflicts() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let first = handle_get(State(state.clone()), with_session(&sid)).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert!(first
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let second = handle_get(State(state.clone()), with_session(&sid)).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        // Dropping the first stream frees the slot.
        drop(first);
        let third = handle_get(State(state), with_session(&sid)).await;
        assert_eq!(third.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_last_event_id_is_rejected() {
        let state = test_state(ResponseMode::Json);
        let sid = initialized_session(&state).await;

        let mut headers = with_session(&sid);
        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static("abc"));
        let response = handle_get(State(state), headers).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn stream_mode_frames_responses_with_log_ids() {
        let state = test_state(ResponseMode::Stream);
        let sid = initialized_session(&state).await;

        let call = json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "hello", "arguments": {"name": "流"}},
            "id": 4,
        });
        let response = post(&state, with_session(&sid), &call).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("id: 1"), "missing event id frame: {text}");
        assert!(text.contains("你好"));

        // The response is in the log, recoverable by replay.
        let session = state
            .registry
            .lookup(&SessionId::from_raw(sid.clone()))
            .unwrap();
        assert_eq!(session.last_event_id(), 1);
    }

    #[tokio::test]
    async fn handshake_failure_rolls_back_registration() {
        struct FailingInit;

        #[async_trait::async_trait]
        impl RequestHandler for FailingInit {
            async fn initialize(
                &self,
                _params: Option<Value>,
            ) -> Result<Value, tether_core::handler::HandlerError> {
                Err(tether_core::handler::HandlerError::Internal(
                    "backend unavailable".into(),
                ))
            }

            async fn call(
                &self,
                _ctx: tether_core::handler::RequestCtx,
                _method: &str,
                _params: Option<Value>,
            ) -> Result<Value, tether_core::handler::HandlerError> {
                unreachable!("never activated")
            }
        }

        let state = AppState {
            registry: Arc::new(SessionRegistry::new()),
            handler: Arc::new(FailingInit),
            config: Arc::new(ServerConfig::default()),
            metrics: crate::metrics::install_recorder(),
        };

        let response = post(&state, HeaderMap::new(), &init_body()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(SESSION_HEADER).is_none());

        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["error"]["code"], -32603);
        // The half-open session is gone.
        assert_eq!(state.registry.count(), 0);
    }
}
