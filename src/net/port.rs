//! Loopback port allocation and readiness polling shared by both adapter
//! families (C1).

use crate::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bind a transient listener to loopback port 0, read back the port the OS
/// assigned, then drop the listener. Racy by design: the port may be taken
/// by another process before the caller binds to it. Callers that launch a
/// child process against this port are expected to retry on failure.
pub fn find_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| Error::Process(format!("failed to bind loopback port: {e}")))?;

    let port = listener
        .local_addr()
        .map_err(|e| Error::Process(format!("failed to read local address: {e}")))?
        .port();

    debug!(port, "allocated free loopback port");
    Ok(port)
}

/// Poll `127.0.0.1:port` with a TCP connect attempt every 100ms until one
/// succeeds or `timeout` elapses.
pub async fn wait_for_port(port: u16, timeout: Option<Duration>) -> Result<()> {
    let timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(_) => {
                debug!(port, "port is accepting connections");
                return Ok(());
            }
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "timed out waiting for port {port} to accept connections after {timeout:?}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn finds_distinct_free_ports() {
        let a = find_free_port().unwrap();
        let b = find_free_port().unwrap();
        assert_ne!(a, b);
        assert!(a > 0 && b > 0);
    }

    #[tokio::test]
    async fn wait_for_port_succeeds_once_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        wait_for_port(port, Some(Duration::from_secs(2)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_port_times_out_when_nothing_listens() {
        let port = find_free_port().unwrap();
        let result = wait_for_port(port, Some(Duration::from_millis(300))).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
