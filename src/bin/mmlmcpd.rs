//! Local MML MCP server.
//!
//! Starts the MML object server and web world server (unless external URLs are configured),
//! a screenshot viewer backed by headless Chromium, and the MCP endpoint, then runs until
//! Ctrl-C.
//!
//! ```bash
//! RUST_LOG=info cargo run --bin mmlmcpd
//! ```
//!
//! Then point an MCP client at `http://localhost:8004/mcp`. Configuration comes from the
//! environment; see `MmlMcpConfig::from_env` for the variables.

use mmlmcp::mcp_session::start_mcp_server;
use mmlmcp::screenshot::{HeadlessChromeBackend, ScreenshotService};
use mmlmcp::tool_protocol::ToolProtocol;
use mmlmcp::{connect_clients, MmlMcpConfig, StorageMode, WorldToolProtocol};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    mmlmcp::init_logger();

    let config = MmlMcpConfig::from_env();
    log::info!(
        "Starting in {:?} mode for project {}",
        config.mode,
        config.project_id
    );

    let clients = connect_clients(&config).await?;
    if config.mode == StorageMode::Local {
        if let Some(server) = clients.object_server() {
            println!("MML object server:  {}", server.url());
        }
        if let Some(server) = clients.world_server() {
            println!("Web world server:   {}", server.url());
        }
    }

    let screenshots = Arc::new(ScreenshotService::new(
        clients.objects.clone(),
        Box::new(HeadlessChromeBackend::new(config.browser_path.clone())),
        config.viewer_port,
        config.viewer_build_dir.clone(),
    ));
    // Launching the browser is deferred to the first screenshot call when this fails.
    if let Err(e) = screenshots.initialize().await {
        log::warn!("Screenshot service unavailable at startup: {}", e);
    }

    let tools = WorldToolProtocol::new(clients.objects.clone(), clients.worlds.clone())
        .with_screenshots(screenshots.clone());
    let tool_names: Vec<String> = tools.list_tools().await?.into_iter().map(|t| t.name).collect();
    let mcp = match start_mcp_server(Arc::new(tools), config.mcp_port).await {
        Ok(mcp) => mcp,
        Err(e) => {
            log::error!("Failed to start MCP endpoint on port {}: {}", config.mcp_port, e);
            screenshots.cleanup().await;
            clients.stop().await;
            return Err(e.into());
        }
    };

    println!("MCP endpoint:       {}/mcp", mcp.url());
    println!("Tools: {}", tool_names.join(", "));

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    mcp.stop().await;
    screenshots.cleanup().await;
    clients.stop().await;
    Ok(())
}
