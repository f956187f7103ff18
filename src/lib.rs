//! # mmlmcp
//!
//! mmlmcp is the local backend behind an MCP tool server that builds live 3D scenes out of MML,
//! the HTML-like markup for 3D elements. It bundles:
//!
//! * **Object storage and server**: [`object_storage`] persists MML object instances as JSON
//!   files, and [`object_server`] exposes them over REST plus a per-instance WebSocket that pushes
//!   `mml_source` / `mml_updated` frames to connected viewers.
//! * **World storage and server**: [`world_storage`] and [`world_server`] keep web world
//!   configurations that point at one or more MML documents, resolve a world to its live
//!   WebSocket URL and serve the game client bundle.
//! * **The patch engine**: [`mml`] renders structured elements to markup and applies add /
//!   update / delete operations and script replacement directly on document text.
//! * **Tools**: [`WorldToolProtocol`] implements the world-authoring tools over the
//!   [`clients`] seams, and [`mcp_session`] serves them over streamable HTTP.
//!
//! ## Quick start
//!
//! Start the in-process servers, create a world from two elements and read it back:
//!
//! ```rust,no_run
//! use mmlmcp::tool_protocol::ToolProtocol;
//! use mmlmcp::{connect_clients, MmlMcpConfig, WorldToolProtocol};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     mmlmcp::init_logger();
//!
//!     let clients = connect_clients(&MmlMcpConfig::from_env()).await?;
//!     let tools = WorldToolProtocol::new(clients.objects.clone(), clients.worlds.clone());
//!
//!     let result = tools
//!         .execute(
//!             "create-world",
//!             json!({
//!                 "title": "Plaza",
//!                 "elements": [
//!                     {"tag": "m-cube", "attributes": {"id": "floor", "width": 20, "height": 0.1, "depth": 20}},
//!                     {"tag": "m-cube", "attributes": {"id": "crate", "color": "red", "y": 1}}
//!                 ]
//!             }),
//!         )
//!         .await?;
//!     println!("{}", result.text_output());
//!
//!     clients.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! The `mmlmcpd` binary wires the same pieces together with a screenshot service and the MCP
//! endpoint, configured from the environment (see [`MmlMcpConfig::from_env`]).

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// ```rust
/// mmlmcp::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `mmlmcp` module.
pub mod mmlmcp;

// Re-exporting key items for easier external access.
pub use mmlmcp::clients;
pub use mmlmcp::clients::{connect_clients, MmlObjectApi, StorageClients, WebWorldApi};
pub use mmlmcp::config;
pub use mmlmcp::config::{MmlMcpConfig, StorageMode};
pub use mmlmcp::connections;
pub use mmlmcp::error;
pub use mmlmcp::error::{ApiError, StorageError};
pub use mmlmcp::http_server;
pub use mmlmcp::json_store;
pub use mmlmcp::mcp_session;
pub use mmlmcp::mml;
pub use mmlmcp::object_server;
pub use mmlmcp::object_storage;
pub use mmlmcp::ports;
pub use mmlmcp::screenshot;
pub use mmlmcp::tool_protocol;
pub use mmlmcp::world_server;
pub use mmlmcp::world_storage;
pub use mmlmcp::world_tools;
pub use mmlmcp::world_tools::WorldToolProtocol;
