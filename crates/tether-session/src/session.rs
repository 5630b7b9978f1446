use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use tether_core::handler::{EventSink, RequestCtx, RequestHandler};
use tether_core::rpc::{JsonRpcRequest, JsonRpcResponse};
use tether_core::SessionId;

use crate::error::SessionError;
use crate::event_log::{EventEnvelope, EventLog};

/// Session lifecycle. `Closed` is terminal; the only transitions are
/// `Initializing -> Active` and `{Initializing, Active} -> Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session resource limits.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Event log capacity; oldest entries are evicted past this.
    pub max_events: usize,
    /// Broadcast channel depth for the live event stream.
    pub broadcast_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_events: 4096,
            broadcast_capacity: 256,
        }
    }
}

/// Log and outbound channel share one lock so broadcast order always
/// matches log order, and so replay + subscribe can happen without a gap.
struct Inner {
    log: EventLog,
    events_tx: Option<broadcast::Sender<EventEnvelope>>,
}

/// One logical client session: identity, state machine, event log, and the
/// exclusively owned outbound channel live streams subscribe to.
pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
    inner: Mutex<Inner>,
    /// Serializes same-session request effects; cross-session traffic is
    /// unordered relative to this one.
    exec: tokio::sync::Mutex<()>,
    /// At most one standalone event stream per session.
    stream_attached: AtomicBool,
    created_at: DateTime<Utc>,
    pub(crate) last_activity: AtomicU64,
}

impl Session {
    /// Fresh id, `Initializing` state, empty log, fresh outbound channel.
    /// Zero capacities are raised to one; `broadcast::channel` panics on an
    /// empty buffer.
    pub fn new(config: SessionConfig) -> Self {
        let (events_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            id: SessionId::new(),
            state: Mutex::new(SessionState::Initializing),
            inner: Mutex::new(Inner {
                log: EventLog::new(config.max_events),
                events_tx: Some(events_tx),
            }),
            exec: tokio::sync::Mutex::new(()),
            stream_attached: AtomicBool::new(false),
            created_at: Utc::now(),
            last_activity: AtomicU64::new(now_secs()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `Initializing -> Active`, once the handshake's initialize call has
    /// succeeded.
    pub fn activate(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        match *state {
            SessionState::Initializing => {
                *state = SessionState::Active;
                Ok(())
            }
            from => Err(SessionError::InvalidTransition {
                from,
                to: SessionState::Active,
            }),
        }
    }

    /// Terminal transition; idempotent. Releases the outbound channel so
    /// attached streams drain and end.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        let tx = self.inner.lock().events_tx.take();
        drop(tx);
        tracing::debug!(session_id = %self.id, "session closed");
    }

    /// Process one message through the configured handler. Valid only when
    /// `Active`. Notifications yield `Ok(None)`; handler failures on
    /// requests become per-message JSON-RPC error responses.
    pub async fn handle(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        handler: &dyn RequestHandler,
    ) -> Result<Option<JsonRpcResponse>, SessionError> {
        match self.state() {
            SessionState::Active => {}
            SessionState::Initializing => return Err(SessionError::NotReady(self.id.clone())),
            SessionState::Closed => return Err(SessionError::Closed(self.id.clone())),
        }

        let _guard = self.exec.lock().await;
        self.touch();

        let ctx = RequestCtx {
            session_id: self.id.clone(),
            events: Arc::clone(self) as Arc<dyn EventSink>,
        };

        let is_notification = request.is_notification();
        let JsonRpcRequest {
            method, params, id, ..
        } = request;

        let result = handler.call(ctx, &method, params).await;

        if is_notification {
            if let Err(err) = result {
                tracing::warn!(
                    session_id = %self.id,
                    method = %method,
                    error = %err,
                    "notification handler failed"
                );
            }
            return Ok(None);
        }

        Ok(Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => {
                tracing::warn!(
                    session_id = %self.id,
                    method = %method,
                    error = %err,
                    "method call failed"
                );
                JsonRpcResponse::error(id, err.code(), err.to_string())
            }
        }))
    }

    /// Append to the log and deliver to any live subscriber, as one step.
    /// Returns the assigned event id. After `close()` the append still
    /// assigns an id but nothing is delivered.
    pub fn push_event(&self, payload: Value) -> u64 {
        let mut inner = self.inner.lock();
        let event_id = inner.log.append(payload.clone());
        if let Some(tx) = &inner.events_tx {
            let _ = tx.send(EventEnvelope { event_id, payload });
        }
        metrics::counter!("events_appended_total").increment(1);
        event_id
    }

    /// Append without live delivery. Response messages already traveling on
    /// their own exchange stream stay recoverable via replay without being
    /// duplicated onto the standalone stream.
    pub fn record_event(&self, payload: Value) -> u64 {
        let mut inner = self.inner.lock();
        let event_id = inner.log.append(payload);
        metrics::counter!("events_appended_total").increment(1);
        event_id
    }

    pub fn last_event_id(&self) -> u64 {
        self.inner.lock().log.last_event_id()
    }

    /// Replay entries after `last_seen` and subscribe to live events under
    /// one lock, so nothing pushed in between is missed. `None` last-seen
    /// skips replay (a fresh stream); `None` result means the session is
    /// closed.
    pub fn resume_from(
        &self,
        last_seen: Option<u64>,
    ) -> Option<(Vec<EventEnvelope>, broadcast::Receiver<EventEnvelope>)> {
        let inner = self.inner.lock();
        let tx = inner.events_tx.as_ref()?;
        let rx = tx.subscribe();
        let replay = match last_seen {
            Some(k) => inner.log.replay_from(k),
            None => Vec::new(),
        };
        Some((replay, rx))
    }

    /// Claim the session's standalone stream slot. `None` while another
    /// stream holds it; the guard releases the slot on drop.
    pub fn try_attach_stream(self: &Arc<Self>) -> Option<StreamGuard> {
        if self
            .stream_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            metrics::gauge!("sse_streams_active").increment(1.0);
            Some(StreamGuard {
                session: Arc::clone(self),
            })
        } else {
            None
        }
    }

    pub fn touch(&self) {
        self.last_activity.store(now_secs(), Ordering::Relaxed);
    }

    pub fn idle_secs(&self) -> u64 {
        now_secs().saturating_sub(self.last_activity.load(Ordering::Relaxed))
    }
}

impl EventSink for Session {
    fn push(&self, payload: Value) -> u64 {
        self.push_event(payload)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Held by the standalone event stream for as long as it is attached.
pub struct StreamGuard {
    session: Arc<Session>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.session.stream_attached.store(false, Ordering::Release);
        metrics::gauge!("sse_streams_active").decrement(1.0);
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
