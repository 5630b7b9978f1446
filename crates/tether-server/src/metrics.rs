//! Prometheus metrics recorder and `/metrics` endpoint handler.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Handle of the process-wide recorder, shared by every server instance.
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// The first call installs the recorder; later calls (a second server in the
/// same process) reuse its handle, so every instance renders the live series.
/// If some other recorder already owns the global slot, a detached handle is
/// returned so startup still succeeds.
pub fn install_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("prometheus metrics recorder installed");
                handle
            }
            Err(_) => PrometheusBuilder::new().build_recorder().handle(),
        })
        .clone()
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Every series this server exports. The session layer records its entries
// under the same literal names.

/// POST exchanges total (counter).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// Rejected exchanges total (counter, labels: reason).
pub const RPC_REJECTIONS_TOTAL: &str = "rpc_rejections_total";
/// Unexpected dispatch faults total (counter).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Handshakes total (counter, labels: outcome).
pub const HANDSHAKES_TOTAL: &str = "handshakes_total";
/// Active sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Sessions opened total (counter).
pub const SESSIONS_OPENED_TOTAL: &str = "sessions_opened_total";
/// Sessions closed total (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "sessions_closed_total";
/// Events appended across all session logs (counter).
pub const EVENTS_APPENDED_TOTAL: &str = "events_appended_total";
/// Attached standalone event streams (gauge).
pub const SSE_STREAMS_ACTIVE: &str = "sse_streams_active";
