//! Port and service registry.
//!
//! Fixed default ports for the known local services, ephemeral port discovery, and a health
//! poller used to wait for a dependent service to come up.

use std::time::Duration;

/// Default ports for the local development stack.
pub struct ServicePorts;

impl ServicePorts {
    pub const MML_SERVER: u16 = 8001;
    pub const WEB_WORLD_SERVER: u16 = 8002;
    pub const MCP_SERVER_SSE: u16 = 8003;
    pub const MCP_SERVER_HTTP: u16 = 8004;
    pub const GAME_CLIENT_DEV: u16 = 8005;
    pub const SCREENSHOT_SERVER: u16 = 8006;
}

/// A service in the local stack, used to derive its default URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    MmlServer,
    WebWorldServer,
    McpServerSse,
    McpServerHttp,
    GameClientDev,
    ScreenshotServer,
}

impl Service {
    pub fn default_port(self) -> u16 {
        match self {
            Service::MmlServer => ServicePorts::MML_SERVER,
            Service::WebWorldServer => ServicePorts::WEB_WORLD_SERVER,
            Service::McpServerSse => ServicePorts::MCP_SERVER_SSE,
            Service::McpServerHttp => ServicePorts::MCP_SERVER_HTTP,
            Service::GameClientDev => ServicePorts::GAME_CLIENT_DEV,
            Service::ScreenshotServer => ServicePorts::SCREENSHOT_SERVER,
        }
    }

    /// Default URL of the service, including the endpoint path for the MCP transports.
    pub fn default_url(self) -> String {
        let base = format!("http://localhost:{}", self.default_port());
        match self {
            Service::McpServerSse => format!("{}/sse", base),
            Service::McpServerHttp => format!("{}/mcp", base),
            _ => base,
        }
    }
}

/// Ask the OS for a free port by binding port 0 and releasing it again.
///
/// The port is only guaranteed free at the instant it was probed; another process may take it
/// before the caller binds.
pub async fn get_random_port() -> std::io::Result<u16> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Whether `port` can currently be bound on the loopback interface.
pub async fn is_port_available(port: u16) -> bool {
    tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok()
}

/// Poll `GET {base_url}/health` until it answers with a 2xx status.
///
/// Returns `false` once `max_attempts` polls have failed; sleeps `interval` between attempts.
pub async fn wait_for_service(base_url: &str, max_attempts: u32, interval: Duration) -> bool {
    let client = reqwest::Client::new();
    let health_url = format!("{}/health", base_url.trim_end_matches('/'));

    for attempt in 1..=max_attempts {
        match client.get(&health_url).send().await {
            Ok(response) if response.status().is_success() => {
                log::debug!("{} healthy after {} attempt(s)", base_url, attempt);
                return true;
            }
            Ok(response) => {
                log::debug!("{} answered {} (attempt {})", health_url, response.status(), attempt)
            }
            Err(e) => log::debug!("{} not reachable yet: {}", health_url, e),
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    log::warn!("{} did not become healthy after {} attempts", base_url, max_attempts);
    false
}

/// [`wait_for_service`] with 30 attempts one second apart.
pub async fn wait_for_service_default(base_url: &str) -> bool {
    wait_for_service(base_url, 30, Duration::from_secs(1)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        assert_eq!(Service::MmlServer.default_url(), "http://localhost:8001");
        assert_eq!(Service::WebWorldServer.default_url(), "http://localhost:8002");
        assert_eq!(Service::McpServerSse.default_url(), "http://localhost:8003/sse");
        assert_eq!(Service::McpServerHttp.default_url(), "http://localhost:8004/mcp");
        assert_eq!(Service::ScreenshotServer.default_port(), 8006);
    }

    #[tokio::test]
    async fn test_random_port_is_bindable() {
        let port = get_random_port().await.unwrap();
        assert_ne!(port, 0);
        assert!(is_port_available(port).await);
    }

    #[tokio::test]
    async fn test_bound_port_is_unavailable() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(port).await);
    }
}
