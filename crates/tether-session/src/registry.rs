use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use tether_core::SessionId;

use crate::error::SessionError;
use crate::session::Session;

/// Process-wide session table. Routing consults this and nothing else, so a
/// removed session is unreachable immediately.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Publish a session under its id. Fails if the id is already taken;
    /// check-and-insert is atomic, concurrent registrations cannot both win.
    pub fn register(&self, session: Arc<Session>) -> Result<(), SessionError> {
        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(_) => {
                return Err(SessionError::DuplicateSession(session.id().clone()));
            }
            Entry::Vacant(entry) => {
                entry.insert(session);
            }
        }
        metrics::counter!("sessions_opened_total").increment(1);
        metrics::gauge!("sessions_active").set(self.sessions.len() as f64);
        Ok(())
    }

    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Unpublish without closing. No-op when absent.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            metrics::counter!("sessions_closed_total").increment(1);
            metrics::gauge!("sessions_active").set(self.sessions.len() as f64);
        }
        removed
    }

    /// Remove then close, in that order: the session stops being routable
    /// before its streams are torn down. Returns false when absent.
    pub fn close_session(&self, id: &SessionId) -> bool {
        match self.remove(id) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every registered session; used at shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut closed = 0;
        for id in ids {
            if self.close_session(&id) {
                closed += 1;
            }
        }
        closed
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Evict sessions whose last activity is at least `idle_timeout` ago.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_secs() >= idle_timeout.as_secs())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in idle {
            if self.close_session(&id) {
                removed += 1;
                tracing::info!(session_id = %id, "idle session evicted");
            }
        }
        removed
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic idle sweep. Runs until aborted. A zero interval is
/// raised to one millisecond; `tokio::time::interval` panics on a zero
/// period.
pub fn start_reaper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.sweep_idle(idle_timeout);
            if removed > 0 {
                tracing::info!(removed, "idle session sweep");
            }
        }
    })
}
