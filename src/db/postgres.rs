//! PostgreSQL adapter.
//!
//! Mirrors the MySQL adapter over a `PgPool`. SSL modes map onto the pg
//! driver's notion of certificate verification: REQUIRED verifies the
//! server, PREFERRED negotiates TLS without verification, anything else
//! leaves TLS off.

use crate::db::adapter::{AdapterOptions, AdapterShared, TransactionItem};
use crate::db::types::{bind_params, postgres_fields, postgres_row_to_json};
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionStatus, DatabaseType, HealthStatus, PoolConfig, QueryParam, QueryResult, SslMode,
};
use crate::profile::{DataProfiler, PostgresDataProfiler};
use crate::schema::{PostgresSchemaAnalyzer, SchemaAnalyzer};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Connection;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug)]
pub struct PostgresAdapter {
    shared: AdapterShared,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresAdapter {
    pub fn new(config: PoolConfig, options: AdapterOptions) -> Self {
        Self {
            shared: AdapterShared::new(DatabaseType::Postgres, config, options),
            pool: RwLock::new(None),
        }
    }

    pub fn shared(&self) -> &AdapterShared {
        &self.shared
    }

    fn connect_options(&self) -> PgConnectOptions {
        let config = &self.shared.config;
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.effective_port(DatabaseType::Postgres))
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        if let Some(ssl) = &config.ssl {
            options = options.ssl_mode(match ssl.mode {
                SslMode::Required => PgSslMode::VerifyCa,
                SslMode::Preferred => PgSslMode::Prefer,
                SslMode::Disabled => PgSslMode::Disable,
            });
            if let Some(ca) = &ssl.ca {
                options = options.ssl_root_cert(ca);
            }
            if let Some(cert) = &ssl.cert {
                options = options.ssl_client_cert(cert);
            }
            if let Some(key) = &ssl.key {
                options = options.ssl_client_key(key);
            }
        } else {
            options = options.ssl_mode(PgSslMode::Prefer);
        }

        // Server-side statement timeout as a second line of defense behind
        // the executor's timer.
        if let Some(timeout_ms) = config.query_timeout_ms {
            options = options.options([("statement_timeout", timeout_ms.to_string())]);
        }

        options
    }

    pub async fn connect(&self) -> DbResult<()> {
        let config = &self.shared.config;
        let pool_opts = &self.shared.options.pool;

        let pool = PgPoolOptions::new()
            .min_connections(pool_opts.min_connections)
            .max_connections(pool_opts.max_connections)
            .idle_timeout(Duration::from_millis(pool_opts.idle_timeout_ms))
            .acquire_timeout(Duration::from_millis(pool_opts.acquire_timeout_ms))
            .connect_with(self.connect_options())
            .await
            .map_err(|e| DbError::connection(e.to_string()))?;

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
            "PostgreSQL adapter connected"
        );
        Ok(())
    }

    pub async fn disconnect(&self) -> DbResult<()> {
        self.shared.mark_disconnected().await;
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        info!(adapter_id = %self.shared.id, "PostgreSQL adapter disconnected");
        Ok(())
    }

    async fn pool(&self) -> DbResult<PgPool> {
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

        debug!(adapter_id = %self.shared.id, params = params.len(), "executing PostgreSQL query");

        let query = bind_params(sqlx::query(sql), params);

        // Events for this statement come after the in-flight counter drops.
        match query.fetch_all(&pool).await {
            Ok(rows) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let fields = rows.first().map(postgres_fields).unwrap_or_default();
                let json_rows = rows.iter().map(postgres_row_to_json).collect();
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

        let mut tx = pool.begin().await.map_err(DbError::from)?;
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let start = Instant::now();
            let query = bind_params(sqlx::query(&item.sql), &item.params);
            match query.fetch_all(&mut *tx).await {
                Ok(rows) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    let fields = rows.first().map(postgres_fields).unwrap_or_default();
                    let json_rows = rows.iter().map(postgres_row_to_json).collect();
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
            Ok(response_time_ms) => HealthStatus::healthy(DatabaseType::Postgres, response_time_ms),
            Err(e) => HealthStatus::unhealthy(DatabaseType::Postgres, e.to_string()),
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
        Ok(SchemaAnalyzer::Postgres(PostgresSchemaAnalyzer::new(
            pool,
            self.shared.config.database.clone(),
        )))
    }

    pub async fn data_profiler(&self) -> DbResult<DataProfiler> {
        let pool = self.pool().await?;
        Ok(DataProfiler::Postgres(PostgresDataProfiler::new(
            pool,
            self.shared.config.database.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> PostgresAdapter {
        let config = PoolConfig {
            port: Some(5432),
            ..PoolConfig::new("app", "localhost", "reader", "secret", "app")
        };
        PostgresAdapter::new(config, AdapterOptions::default())
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
        assert!(health.error.is_some());
        assert_eq!(health.database_type, DatabaseType::Postgres);
    }
}
