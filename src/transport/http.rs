//! HTTP transport with streamable-HTTP/SSE support.

use crate::error::DbResult;
use crate::mcp::{BrokerService, BrokerState};
use crate::transport::{wait_for_signal, Transport};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Open SSE streams can outlive a shutdown request; force exit after this.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    state: BrokerState,
    host: String,
    port: u16,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        state: BrokerState,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            state,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!(addr = %bind_addr, "starting MCP server on HTTP");

        let state = self.state.clone();
        let service = StreamableHttpService::new(
            move || Ok(BrokerService::new(state.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // nest_service rejects the root path; fall back instead.
        let app = if self.endpoint == "/" {
            axum::Router::new().fallback_service(service)
        } else {
            axum::Router::new().nest_service(&self.endpoint, service)
        };

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            crate::error::DbError::connection(format!("failed to bind {bind_addr}: {e}"))
        })?;

        info!(endpoint = %self.endpoint, "MCP endpoint ready");

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let notify = shutdown_notify.clone();

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            wait_for_signal().await;
            notify.notify_one();
        });

        let forced_exit = async {
            shutdown_notify.notified().await;
            tokio::time::sleep(GRACEFUL_TIMEOUT).await;
            warn!("graceful shutdown timed out, forcing exit");
        };

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    warn!(error = %e, "HTTP server error");
                }
            }
            _ = forced_exit => {}
        }

        self.state.manager.disconnect_all().await;
        self.state.cache.destroy();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
