//! Session layer: per-session state machines, replayable event logs, and the
//! process-wide registry the transport routes through.

pub mod error;
pub mod event_log;
pub mod registry;
pub mod session;

pub use error::SessionError;
pub use event_log::{EventEnvelope, EventLog};
pub use registry::{start_reaper, SessionRegistry};
pub use session::{Session, SessionConfig, SessionState, StreamGuard};
