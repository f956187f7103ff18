//! Runtime configuration.
//!
//! [`MmlMcpConfig`] is resolved once at startup, either built by hand or read from the
//! environment with [`MmlMcpConfig::from_env`], and then passed explicitly to whatever needs
//! it. Nothing in the crate reads the environment after that point.
//!
//! # Example
//!
//! ```rust
//! use mmlmcp::{MmlMcpConfig, StorageMode};
//!
//! let config = MmlMcpConfig::default();
//! assert_eq!(config.mode, StorageMode::Local);
//! assert_eq!(config.project_id, "local-project");
//! ```

use crate::mmlmcp::ports::ServicePorts;
use std::path::PathBuf;

/// Project namespace used by the local stack when none is configured.
pub const LOCAL_PROJECT_ID: &str = "local-project";

/// Base URL of the hosted API used in [`StorageMode::Remote`].
pub const REMOTE_API_URL: &str = "https://api.msquared.io";

/// Which backend the storage clients talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// In-process servers (or an explicitly configured local server URL).
    Local,
    /// The hosted API, authenticated with a bearer key.
    Remote,
}

#[derive(Debug, Clone)]
pub struct MmlMcpConfig {
    pub mode: StorageMode,
    pub project_id: String,
    /// Bearer key for [`StorageMode::Remote`].
    pub api_key: Option<String>,
    /// Use an already running object server instead of starting one in-process.
    pub mml_server_url: Option<String>,
    /// Use an already running world server instead of starting one in-process.
    pub web_world_server_url: Option<String>,
    pub remote_api_url: String,
    /// Port for the in-process object server; `0` picks an ephemeral port.
    pub mml_server_port: u16,
    /// Port for the in-process world server; `0` picks an ephemeral port.
    pub web_world_server_port: u16,
    /// Port for the screenshot viewer page server.
    pub viewer_port: u16,
    /// Port for the MCP streamable HTTP endpoint.
    pub mcp_port: u16,
    /// Directory holding the pre-built viewer client bundle (`index.html`, assets).
    pub viewer_build_dir: PathBuf,
    /// Directory holding the game client bundle served by the world server under `/game`.
    pub game_build_dir: PathBuf,
    /// Headless browser executable used for screenshots.
    pub browser_path: String,
}

impl Default for MmlMcpConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            project_id: LOCAL_PROJECT_ID.to_string(),
            api_key: None,
            mml_server_url: None,
            web_world_server_url: None,
            remote_api_url: REMOTE_API_URL.to_string(),
            mml_server_port: ServicePorts::MML_SERVER,
            web_world_server_port: ServicePorts::WEB_WORLD_SERVER,
            viewer_port: ServicePorts::MCP_SERVER_SSE,
            mcp_port: ServicePorts::MCP_SERVER_HTTP,
            viewer_build_dir: PathBuf::from("viewer/build"),
            game_build_dir: PathBuf::from("apps/game-client/build"),
            browser_path: "chromium".to_string(),
        }
    }
}

impl MmlMcpConfig {
    /// Read configuration from the process environment.
    ///
    /// | Variable | Effect |
    /// |---|---|
    /// | `USE_MSQUARED_APIS` | any non-empty value selects [`StorageMode::Remote`] |
    /// | `MSQUARED_API_KEY` | bearer key for remote mode |
    /// | `MSQUARED_PROJECT_ID` | project namespace |
    /// | `MML_SERVER_URL` / `WEB_WORLD_SERVER_URL` | external local servers |
    /// | `VIEWER_SERVER_PORT` / `MCP_SERVER_PORT` | listener ports |
    /// | `VIEWER_BUILD_DIR` | viewer bundle directory |
    /// | `GAME_CLIENT_BUILD_DIR` | game client bundle directory |
    /// | `SCREENSHOT_BROWSER` | headless browser executable |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let port = |key: &str, default: u16| {
            non_empty(key)
                .and_then(|v| match v.trim().parse::<u16>() {
                    Ok(p) => Some(p),
                    Err(_) => {
                        log::warn!("Ignoring {}={:?}: not a port number", key, v);
                        None
                    }
                })
                .unwrap_or(default)
        };

        let defaults = Self::default();
        let mode = if non_empty("USE_MSQUARED_APIS").is_some() {
            StorageMode::Remote
        } else {
            StorageMode::Local
        };
        let api_key = non_empty("MSQUARED_API_KEY");
        if mode == StorageMode::Remote && api_key.is_none() {
            log::warn!("USE_MSQUARED_APIS is set but MSQUARED_API_KEY is not");
        }

        Self {
            mode,
            project_id: non_empty("MSQUARED_PROJECT_ID").unwrap_or(defaults.project_id),
            api_key,
            mml_server_url: non_empty("MML_SERVER_URL"),
            web_world_server_url: non_empty("WEB_WORLD_SERVER_URL"),
            remote_api_url: defaults.remote_api_url,
            mml_server_port: port("MML_SERVER_PORT", defaults.mml_server_port),
            web_world_server_port: port("WEB_WORLD_SERVER_PORT", defaults.web_world_server_port),
            viewer_port: port("VIEWER_SERVER_PORT", defaults.viewer_port),
            mcp_port: port("MCP_SERVER_PORT", defaults.mcp_port),
            viewer_build_dir: non_empty("VIEWER_BUILD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.viewer_build_dir),
            game_build_dir: non_empty("GAME_CLIENT_BUILD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.game_build_dir),
            browser_path: non_empty("SCREENSHOT_BROWSER").unwrap_or(defaults.browser_path),
        }
    }
}
