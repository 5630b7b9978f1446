//! HTTP transport for the session router: the single-endpoint dispatcher,
//! the handshake, standalone SSE streams, and server bootstrap.

pub mod dispatch;
pub mod metrics;
pub mod server;
pub mod service;
mod sse;

pub use dispatch::{DispatchError, LAST_EVENT_ID_HEADER, SESSION_HEADER};
pub use server::{build_router, start, AppState, ResponseMode, ServerConfig, ServerHandle};
pub use service::{ToolboxHandler, PROTOCOL_VERSION};
