//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Verdict policy decision point server
#[derive(Parser, Debug, Clone)]
#[command(name = "verdict-server")]
#[command(about = "Policy decision point over a tree-structured document store")]
pub struct ServerConfig {
    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:8181", env = "VERDICT_LISTEN")]
    pub listen: SocketAddr,

    /// RPC listen address (RPC surface disabled unless set)
    #[arg(long, env = "VERDICT_RPC_LISTEN")]
    pub rpc_listen: Option<SocketAddr>,

    /// Directory for persisted policy modules
    #[arg(long, env = "VERDICT_POLICY_DIR")]
    pub policy_dir: Option<PathBuf>,

    /// Enable permissive CORS on the HTTP surface
    #[arg(long, default_value_t = false, env = "VERDICT_CORS")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: ([127, 0, 0, 1], 8181).into(),
            rpc_listen: None,
            policy_dir: None,
            cors_enabled: false,
        }
    }
}
