// src/mmlmcp/mod.rs

pub mod clients;
pub mod config;
pub mod connections;
pub mod error;
pub mod http_server;
pub mod json_store;
pub mod mcp_session;
pub mod mml;
pub mod object_server;
pub mod object_storage;
pub mod ports;
pub mod screenshot;
pub mod tool_protocol;
pub mod world_server;
pub mod world_storage;
pub mod world_tools;

// Re-export the handful of types most callers start from
pub use clients::{connect_clients, StorageClients};
pub use config::{MmlMcpConfig, StorageMode};
pub use world_tools::WorldToolProtocol;
