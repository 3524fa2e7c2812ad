//! MySQL adapter.
//!
//! Owns a `MySqlPool` built from the pool config, with SSL wired through
//! when configured. Connect acquires one connection and pings it before the
//! adapter is marked connected, so a registered pool is known to have
//! worked at least once.

use crate::db::adapter::{AdapterOptions, AdapterShared, TransactionItem};
use crate::db::types::{bind_params, mysql_fields, mysql_row_to_json};
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionStatus, DatabaseType, HealthStatus, PoolConfig, QueryParam, QueryResult, SslMode,
};
use crate::profile::{DataProfiler, MySqlDataProfiler};
use crate::schema::{MySqlSchemaAnalyzer, SchemaAnalyzer};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::Connection;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug)]
pub struct MySqlAdapter {
    shared: AdapterShared,
    pool: RwLock<Option<MySqlPool>>,
}

impl MySqlAdapter {
    pub fn new(config: PoolConfig, options: AdapterOptions) -> Self {
        Self {
            shared: AdapterShared::new(DatabaseType::MySql, config, options),
            pool: RwLock::new(None),
        }
    }

    pub fn shared(&self) -> &AdapterShared {
        &self.shared
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let config = &self.shared.config;
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.effective_port(DatabaseType::MySql))
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .charset("utf8mb4");

        if let Some(ssl) = &config.ssl {
            // Required means verified: the CA below participates in the
            // handshake check, matching the PostgreSQL adapter's mapping.
            options = options.ssl_mode(match ssl.mode {
                SslMode::Required => MySqlSslMode::VerifyCa,
                SslMode::Preferred => MySqlSslMode::Preferred,
                SslMode::Disabled => MySqlSslMode::Disabled,
            });
            if let Some(ca) = &ssl.ca {
                options = options.ssl_ca(ca);
            }
            if let Some(cert) = &ssl.cert {
                options = options.ssl_client_cert(cert);
            }
            if let Some(key) = &ssl.key {
                options = options.ssl_client_key(key);
            }
        } else {
            options = options.ssl_mode(MySqlSslMode::Preferred);
        }

        options
    }

    pub async fn connect(&self) -> DbResult<()> {
        let config = &self.shared.config;
        let pool_opts = &self.shared.options.pool;

        let pool = MySqlPoolOptions::new()
            .min_connections(pool_opts.min_connections)
            .max_connections(pool_opts.max_connections)
            .idle_timeout(Duration::from_millis(pool_opts.idle_timeout_ms))
            .acquire_timeout(Duration::from_millis(pool_opts.acquire_timeout_ms))
            .connect_with(self.connect_options())
            .await
            .map_err(|e| DbError::connection(e.to_string()))?;

        // Verify before advertising the pool: acquire one connection and
        // ping it, then hand it back.
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DbError::connection(e.to_string()))?;
        conn.ping()
            .await
            .map_err(|e| DbError::connection(format!("ping failed: {e}")))?;
        drop(conn);

        *self.pool.write().await = Some(pool);
        self.shared.mark_connected().await;
        info!(
            adapter_id = %self.shared.id,
            endpoint = %config.masked_endpoint(),
            "MySQL adapter connected"
        );
        Ok(())
    }

    pub async fn disconnect(&self) -> DbResult<()> {
        self.shared.mark_disconnected().await;
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        info!(adapter_id = %self.shared.id, "MySQL adapter disconnected");
        Ok(())
    }

    async fn pool(&self) -> DbResult<MySqlPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(DbError::NotConnected)
    }

    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        self.shared.ensure_ready()?;
        let pool = self.pool().await?;
        let guard = self.shared.begin_query();
        let start = Instant::now();

        debug!(adapter_id = %self.shared.id, params = params.len(), "executing MySQL query");

        let query = bind_params(sqlx::query(sql), params);

        // Events for this statement come after the in-flight counter drops.
        match query.fetch_all(&pool).await {
            Ok(rows) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let fields = rows.first().map(mysql_fields).unwrap_or_default();
                let json_rows = rows.iter().map(mysql_row_to_json).collect();
                let result = QueryResult::rows(json_rows, fields, elapsed);
                drop(guard);
                self.shared.record_success(elapsed, result.row_count).await;
                Ok(result)
            }
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let err = DbError::from(e);
                drop(guard);
                self.shared.record_failure(elapsed, &err).await;
                Err(err)
            }
        }
    }

    pub async fn transaction(&self, items: &[TransactionItem]) -> DbResult<Vec<QueryResult>> {
        self.shared.ensure_ready()?;
        let pool = self.pool().await?;
        let _guard = self.shared.begin_query();

        // One dedicated connection for the whole batch; sqlx issues BEGIN
        // on begin() and the connection returns to the pool on drop.
        let mut tx = pool.begin().await.map_err(DbError::from)?;
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let start = Instant::now();
            let query = bind_params(sqlx::query(&item.sql), &item.params);
            match query.fetch_all(&mut *tx).await {
                Ok(rows) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    let fields = rows.first().map(mysql_fields).unwrap_or_default();
                    let json_rows = rows.iter().map(mysql_row_to_json).collect();
                    let result = QueryResult::rows(json_rows, fields, elapsed);
                    self.shared.record_success(elapsed, result.row_count).await;
                    results.push(result);
                }
                Err(e) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    let err = DbError::from(e);
                    self.shared.record_failure(elapsed, &err).await;
                    tx.rollback().await.map_err(DbError::from)?;
                    return Err(err);
                }
            }
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(results)
    }

    pub async fn health_check(&self) -> HealthStatus {
        let status = match self.ping().await {
            Ok(response_time_ms) => HealthStatus::healthy(DatabaseType::MySql, response_time_ms),
            Err(e) => HealthStatus::unhealthy(DatabaseType::MySql, e.to_string()),
        };
        self.shared.emit_health(&status);
        status
    }

    async fn ping(&self) -> DbResult<u64> {
        self.shared.ensure_ready()?;
        let pool = self.pool().await?;
        let start = Instant::now();
        sqlx::query("SELECT 1").fetch_one(&pool).await?;
        Ok(start.elapsed().as_millis() as u64)
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let connection_count = self
            .pool
            .read()
            .await
            .as_ref()
            .map(|p| p.size())
            .unwrap_or(0);
        self.shared.status(connection_count).await
    }

    pub async fn schema_analyzer(&self) -> DbResult<SchemaAnalyzer> {
        let pool = self.pool().await?;
        Ok(SchemaAnalyzer::MySql(MySqlSchemaAnalyzer::new(
            pool,
            self.shared.config.database.clone(),
        )))
    }

    pub async fn data_profiler(&self) -> DbResult<DataProfiler> {
        let pool = self.pool().await?;
        Ok(DataProfiler::MySql(MySqlDataProfiler::new(
            pool,
            self.shared.config.database.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> MySqlAdapter {
        let config = PoolConfig {
            port: Some(3306),
            ..PoolConfig::new("app", "localhost", "reader", "secret", "app")
        };
        MySqlAdapter::new(config, AdapterOptions::default())
    }

    #[tokio::test]
    async fn test_query_before_connect_is_rejected() {
        let a = adapter();
        let err = a.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected));
    }

    #[tokio::test]
    async fn test_query_after_disconnect_fails_fast() {
        let a = adapter();
        a.disconnect().await.unwrap();
        let err = a.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_health_check_unconnected_is_unhealthy() {
        let a = adapter();
        let health = a.health_check().await;
        assert!(!health.is_healthy);
        assert_eq!(health.response_time_ms, 0);
        assert!(health.error.is_some());
    }

    #[tokio::test]
    async fn test_connection_status_disconnected() {
        let a = adapter();
        let status = a.connection_status().await;
        assert!(!status.is_connected);
        assert_eq!(status.connection_count, 0);
        assert_eq!(status.uptime_ms, 0);
    }
}
