//! Verdict policy decision point server.
//!
//! Two façades over one evaluator: an HTTP/JSON management-and-query API
//! under `/v1`, and a framed-TCP RPC returning permit/deny/redirect
//! verdicts for attribute-value requests.
//!
//! # Endpoints
//!
//! - `GET|PUT|PATCH /v1/data[/{path}]` — evaluate and mutate documents
//! - `GET|PUT|DELETE /v1/policies[/{id}]` — manage policy modules
//! - `GET /v1/query?q=...` — ad-hoc queries
//! - `GET /` — HTML query form
//!
//! # Example
//!
//! ```ignore
//! use verdict_server::{ServerConfig, VerdictServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let server = VerdictServer::new(config).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod params;
pub mod routes;
pub mod rpc;
pub mod state;
pub mod v1;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::{AppState, CompilerHolder};

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use verdict_ast::Compiler;
use verdict_store::Store;

use crate::v1::COMPILE_MOD_ERR_MSG;

/// An instance of the verdict server.
pub struct VerdictServer {
    state: Arc<AppState>,
    router: Router,
}

impl VerdictServer {
    /// Create a server: load persisted policies (if configured), compile
    /// the whole set, and publish the initial snapshot. Startup fails if
    /// the persisted set does not compile.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let store = match &config.policy_dir {
            Some(dir) => Store::open(dir.clone())?,
            None => Store::new(),
        };

        let modules = store.modules().await;
        let compiler = Compiler::compile(modules).map_err(|errors| ServerError::Compile {
            message: COMPILE_MOD_ERR_MSG.to_string(),
            errors,
        })?;

        let state = Arc::new(AppState {
            store,
            compiler: CompilerHolder::new(compiler),
            config,
        });
        let router = routes::build_router(state.clone());

        Ok(VerdictServer { state, router })
    }

    /// Shared application state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The router, for driving the server in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind and serve the HTTP surface, plus the RPC surface when
    /// configured. Does not return under normal operation.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.state.config.listen).await?;

        let rpc_task = match self.state.config.rpc_listen {
            Some(addr) => {
                let rpc_listener = TcpListener::bind(addr).await?;
                info!(addr = %addr, "rpc listener starting");
                Some(tokio::spawn(rpc::serve(self.state.clone(), rpc_listener)))
            }
            None => None,
        };

        info!(
            addr = %self.state.config.listen,
            policies = self.state.compiler.current().modules().len(),
            policy_dir = ?self.state.config.policy_dir,
            "verdict server starting"
        );

        let result = axum::serve(listener, self.router).await;

        if let Some(task) = rpc_task {
            task.abort();
        }
        result
    }
}
