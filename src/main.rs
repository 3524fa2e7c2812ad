//! db-broker-mcp - main entry point.
//!
//! Loads the pool fleet configuration, connects every pool (fatal on any
//! failure), and serves the MCP protocol on the selected transport.

use clap::Parser;
use db_broker_mcp::config::{BrokerConfig, Cli, TransportMode};
use db_broker_mcp::db::ConnectionManager;
use db_broker_mcp::mcp::BrokerState;
use db_broker_mcp::models::SecurityConfig;
use db_broker_mcp::query::QueryExecutor;
use db_broker_mcp::schema::SchemaCache;
use db_broker_mcp::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match BrokerConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            eprintln!("Configure pools via one of:");
            eprintln!("  --config pools.json            (multi-pool document)");
            eprintln!("  DB_<NAME>_HOST / _USER / ...   (environment mapping)");
            eprintln!("  MYSQL_* / POSTGRES_*           (legacy single-pool)");
            std::process::exit(1);
        }
    };

    info!(
        pools = config.pools.len(),
        default = ?config.default_connection,
        "Starting db-broker-mcp v{}",
        env!("CARGO_PKG_VERSION")
    );

    let manager = Arc::new(ConnectionManager::new());
    let default_connection = config.default_connection.clone();
    manager.register_pools(config.pools).await?;

    // A single failing pool is fatal at startup; the error names it.
    if let Err(e) = manager.connect_all().await {
        error!(error = %e, "startup connect failed");
        manager.disconnect_all().await;
        return Err(e.into());
    }
    if let Some(default) = &default_connection {
        manager.set_default_connection(default).await?;
    }

    let executor = Arc::new(QueryExecutor::new(SecurityConfig {
        max_execution_time_ms: cli.query_timeout_ms,
        max_result_rows: cli.max_rows,
        ..SecurityConfig::default()
    }));

    let cache = Arc::new(SchemaCache::with_defaults());
    cache.clone().start_sweeper();

    if cli.warm_cache {
        warm_cache(&manager, &cache).await;
    }

    let state = BrokerState::new(manager, executor, cache);

    let result = match cli.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            StdioTransport::new(state).run().await
        }
        TransportMode::Http => {
            info!(
                host = %cli.http_host,
                port = cli.http_port,
                endpoint = %cli.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(state, &cli.http_host, cli.http_port, &cli.mcp_endpoint)
                .run()
                .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Prefetch introspection payloads for every pool. Warm-up failures are
/// logged by the cache and never abort startup.
async fn warm_cache(manager: &Arc<ConnectionManager>, cache: &Arc<SchemaCache>) {
    for name in manager.connection_names().await {
        let Ok(adapter) = manager.get_connection(Some(&name)).await else {
            continue;
        };
        match (adapter.schema_analyzer().await, adapter.data_profiler().await) {
            (Ok(analyzer), Ok(profiler)) => {
                info!(pool = %name, "warming schema cache");
                cache.warm_up(&name, &analyzer, &profiler).await;
            }
            _ => {
                error!(pool = %name, "cannot warm cache: adapter not ready");
            }
        }
    }
}
