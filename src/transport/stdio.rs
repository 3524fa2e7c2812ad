//! Stdio transport.
//!
//! Reads JSON-RPC from stdin and writes responses to stdout, the standard
//! mode for CLI-based MCP integrations. Security is the parent process's
//! concern; stdio carries no authentication of its own.

use crate::error::DbResult;
use crate::mcp::{BrokerService, BrokerState};
use crate::transport::{wait_for_signal, Transport};
use rmcp::{transport::stdio, ServiceExt};
use tracing::{info, warn};

pub struct StdioTransport {
    state: BrokerState,
}

impl StdioTransport {
    pub fn new(state: BrokerState) -> Self {
        Self { state }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("starting MCP server on stdio");

        let service = BrokerService::new(self.state.clone());
        let running = service.serve(stdio()).await.map_err(|e| {
            crate::error::DbError::internal(format!("failed to start stdio transport: {e}"))
        })?;

        let shutdown_requested = tokio::select! {
            result = running.waiting() => {
                if let Err(e) = result {
                    warn!(error = %e, "stdio transport error");
                }
                false
            }
            _ = wait_for_signal() => {
                info!("shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            // A second signal forces exit; stdin reads cannot be interrupted.
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        self.state.manager.disconnect_all().await;
        self.state.cache.destroy();

        if shutdown_requested {
            info!("exiting process");
            std::process::exit(0);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
