//! TCP reachability probe.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use super::Endpoint;

/// True only if a TCP connection to the endpoint succeeds within `timeout`.
///
/// The socket is closed immediately. Refusals, timeouts and resolution
/// failures all yield `false`.
pub async fn reachable(endpoint: &Endpoint, timeout: Duration) -> bool {
    let address = endpoint.address();
    match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            debug!(%address, "Control endpoint reachable");
            true
        },
        Ok(Err(e)) => {
            debug!(%address, error = %e, "Control endpoint refused connection");
            false
        },
        Err(_) => {
            debug!(%address, timeout_ms = timeout.as_millis() as u64, "Probe timed out");
            false
        },
    }
}
