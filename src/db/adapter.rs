//! The uniform adapter contract.
//!
//! Adapters are values, not trait objects: [`DatabaseAdapter`] dispatches
//! over the engine implementations, each of which owns a connection pool
//! and the shared bookkeeping in [`AdapterShared`]. The factory constructs
//! an adapter once; the manager tears it down at shutdown.
//!
//! Lifecycle: created → connecting → connected → disconnecting →
//! disconnected. Connecting twice logs a warning and is a no-op; querying
//! while disconnected or during shutdown fails fast with an explicit error.

use crate::db::events::{AdapterEvent, EventBus, METRICS_EVENT_INTERVAL};
use crate::db::mysql::MySqlAdapter;
use crate::db::postgres::PostgresAdapter;
use crate::error::{DbError, DbResult};
use crate::models::{
    AdapterMetrics, ConnectionInfo, ConnectionStatus, DatabaseType, HealthStatus, PoolConfig,
    PoolOptions, QueryParam, QueryResult, RetryOptions,
};
use crate::profile::DataProfiler;
use crate::schema::SchemaAnalyzer;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::warn;

/// One statement inside an adapter-internal transaction.
#[derive(Debug, Clone)]
pub struct TransactionItem {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl TransactionItem {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Options resolved by the factory and carried for the adapter's lifetime.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub pool: PoolOptions,
    /// Surfaced but unengaged: the query path never retries.
    pub retry: RetryOptions,
    pub metrics_enabled: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            pool: PoolOptions::default(),
            retry: RetryOptions::default(),
            metrics_enabled: true,
        }
    }
}

/// State common to both engine adapters.
#[derive(Debug)]
pub struct AdapterShared {
    /// Derived id: `type-host-port-database`
    pub id: String,
    pub db_type: DatabaseType,
    pub config: PoolConfig,
    pub options: AdapterOptions,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    active_queries: AtomicU32,
    connected_since: RwLock<Option<(Instant, DateTime<Utc>)>>,
    metrics: RwLock<AdapterMetrics>,
    events: EventBus,
}

impl AdapterShared {
    pub fn new(db_type: DatabaseType, config: PoolConfig, options: AdapterOptions) -> Self {
        let id = format!(
            "{}-{}-{}-{}",
            db_type.as_str(),
            config.host,
            config.effective_port(db_type),
            config.database
        );
        Self {
            id,
            db_type,
            config,
            options,
            connected: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            active_queries: AtomicU32::new(0),
            connected_since: RwLock::new(None),
            metrics: RwLock::new(AdapterMetrics::new()),
            events: EventBus::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Reject calls arriving during shutdown or before connect.
    pub fn ensure_ready(&self) -> DbResult<()> {
        if self.is_shutting_down() {
            return Err(DbError::ShuttingDown);
        }
        if !self.is_connected() {
            return Err(DbError::NotConnected);
        }
        Ok(())
    }

    pub async fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        *self.connected_since.write().await = Some((Instant::now(), Utc::now()));
        self.events.emit(AdapterEvent::Connected {
            adapter_id: self.id.clone(),
        });
    }

    pub async fn mark_disconnected(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.events.emit(AdapterEvent::Disconnected {
            adapter_id: self.id.clone(),
        });
    }

    /// Increment the in-flight counter; the guard decrements on every exit
    /// path, including futures dropped by a timeout race.
    pub fn begin_query(&self) -> ActiveQueryGuard<'_> {
        self.active_queries.fetch_add(1, Ordering::SeqCst);
        ActiveQueryGuard(&self.active_queries)
    }

    pub fn active_queries(&self) -> u32 {
        self.active_queries.load(Ordering::SeqCst)
    }

    pub async fn record_success(&self, execution_time_ms: u64, row_count: usize) {
        if self.options.metrics_enabled {
            let snapshot = {
                let mut metrics = self.metrics.write().await;
                metrics.record_success(execution_time_ms);
                (metrics.queries_executed, metrics.clone())
            };
            if snapshot.0 % METRICS_EVENT_INTERVAL == 0 {
                self.events.emit(AdapterEvent::MetricsCollected {
                    adapter_id: self.id.clone(),
                    metrics: snapshot.1,
                });
            }
        }
        self.events.emit(AdapterEvent::QueryExecuted {
            adapter_id: self.id.clone(),
            execution_time_ms,
            row_count,
        });
    }

    pub async fn record_failure(&self, execution_time_ms: u64, error: &DbError) {
        if self.options.metrics_enabled {
            let snapshot = {
                let mut metrics = self.metrics.write().await;
                metrics.record_failure(execution_time_ms);
                (metrics.queries_executed, metrics.clone())
            };
            if snapshot.0 % METRICS_EVENT_INTERVAL == 0 {
                self.events.emit(AdapterEvent::MetricsCollected {
                    adapter_id: self.id.clone(),
                    metrics: snapshot.1,
                });
            }
        }
        self.events.emit(AdapterEvent::QueryFailed {
            adapter_id: self.id.clone(),
            error: error.to_string(),
        });
    }

    pub async fn status(&self, connection_count: u32) -> ConnectionStatus {
        let since = *self.connected_since.read().await;
        ConnectionStatus {
            is_connected: self.is_connected(),
            connection_count,
            active_queries: self.active_queries(),
            last_connection_time: since.map(|(_, at)| at),
            uptime_ms: since
                .filter(|_| self.is_connected())
                .map(|(instant, _)| instant.elapsed().as_millis() as u64)
                .unwrap_or(0),
            database_type: self.db_type,
        }
    }

    pub async fn metrics(&self) -> AdapterMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset_metrics(&self) {
        self.metrics.write().await.reset();
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn emit_health(&self, status: &HealthStatus) {
        if status.is_healthy {
            self.events.emit(AdapterEvent::HealthCheckPassed {
                adapter_id: self.id.clone(),
                response_time_ms: status.response_time_ms,
            });
        } else {
            self.events.emit(AdapterEvent::HealthCheckFailed {
                adapter_id: self.id.clone(),
                error: status.error.clone().unwrap_or_default(),
            });
        }
    }

    pub fn connection_info(&self, name: &str) -> ConnectionInfo {
        ConnectionInfo {
            name: name.to_string(),
            id: self.id.clone(),
            database_type: self.db_type,
            host: self.config.host.clone(),
            port: self.config.effective_port(self.db_type),
            database: self.config.database.clone(),
            description: self.config.description.clone(),
            tags: self.config.tags.clone(),
            is_connected: self.is_connected(),
        }
    }
}

/// Decrements the adapter's in-flight counter when dropped.
pub struct ActiveQueryGuard<'a>(&'a AtomicU32);

impl Drop for ActiveQueryGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connected database behind the uniform contract.
#[derive(Debug)]
pub enum DatabaseAdapter {
    MySql(MySqlAdapter),
    Postgres(PostgresAdapter),
}

impl DatabaseAdapter {
    pub fn shared(&self) -> &AdapterShared {
        match self {
            Self::MySql(a) => a.shared(),
            Self::Postgres(a) => a.shared(),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.shared().db_type
    }

    pub fn id(&self) -> &str {
        &self.shared().id
    }

    /// Establish the pool and verify it with a ping. Idempotent when
    /// already connected.
    pub async fn connect(&self) -> DbResult<()> {
        if self.shared().is_connected() {
            warn!(adapter_id = %self.id(), "connect called on connected adapter, ignoring");
            return Ok(());
        }
        if self.shared().is_shutting_down() {
            return Err(DbError::ShuttingDown);
        }
        match self {
            Self::MySql(a) => a.connect().await,
            Self::Postgres(a) => a.connect().await,
        }
    }

    /// Close the pool. Later `query`/`transaction` calls fail fast.
    pub async fn disconnect(&self) -> DbResult<()> {
        match self {
            Self::MySql(a) => a.disconnect().await,
            Self::Postgres(a) => a.disconnect().await,
        }
    }

    /// Run one parameterized statement. The SQL is passed through
    /// uninterpreted; read-only enforcement happens upstream.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        match self {
            Self::MySql(a) => a.query(sql, params).await,
            Self::Postgres(a) => a.query(sql, params).await,
        }
    }

    /// Run statements on one dedicated connection: BEGIN, each item in
    /// order, COMMIT on success, ROLLBACK on the first failure.
    pub async fn transaction(&self, items: &[TransactionItem]) -> DbResult<Vec<QueryResult>> {
        match self {
            Self::MySql(a) => a.transaction(items).await,
            Self::Postgres(a) => a.transaction(items).await,
        }
    }

    pub async fn health_check(&self) -> HealthStatus {
        match self {
            Self::MySql(a) => a.health_check().await,
            Self::Postgres(a) => a.health_check().await,
        }
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        match self {
            Self::MySql(a) => a.connection_status().await,
            Self::Postgres(a) => a.connection_status().await,
        }
    }

    pub async fn metrics(&self) -> AdapterMetrics {
        self.shared().metrics().await
    }

    pub async fn reset_metrics(&self) {
        self.shared().reset_metrics().await
    }

    pub fn connection_info(&self, name: &str) -> ConnectionInfo {
        self.shared().connection_info(name)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.shared().events().subscribe()
    }

    pub async fn schema_analyzer(&self) -> DbResult<SchemaAnalyzer> {
        match self {
            Self::MySql(a) => a.schema_analyzer().await,
            Self::Postgres(a) => a.schema_analyzer().await,
        }
    }

    pub async fn data_profiler(&self) -> DbResult<DataProfiler> {
        match self {
            Self::MySql(a) => a.data_profiler().await,
            Self::Postgres(a) => a.data_profiler().await,
        }
    }

    /// Record a failure observed outside the adapter call itself, e.g. the
    /// executor's timeout race cancelling the in-flight future.
    pub(crate) async fn note_external_failure(&self, elapsed_ms: u64, error: &DbError) {
        self.shared().record_failure(elapsed_ms, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> AdapterShared {
        let config = PoolConfig {
            port: Some(3306),
            ..PoolConfig::new("app", "localhost", "u", "p", "app")
        };
        AdapterShared::new(DatabaseType::MySql, config, AdapterOptions::default())
    }

    #[test]
    fn test_derived_adapter_id() {
        assert_eq!(shared().id, "mysql-localhost-3306-app");
    }

    #[test]
    fn test_active_query_guard_restores_count() {
        let s = shared();
        assert_eq!(s.active_queries(), 0);
        {
            let _g1 = s.begin_query();
            let _g2 = s.begin_query();
            assert_eq!(s.active_queries(), 2);
        }
        assert_eq!(s.active_queries(), 0);
    }

    #[tokio::test]
    async fn test_ensure_ready_transitions() {
        let s = shared();
        assert!(matches!(s.ensure_ready(), Err(DbError::NotConnected)));

        s.mark_connected().await;
        assert!(s.ensure_ready().is_ok());

        s.mark_disconnected().await;
        assert!(matches!(s.ensure_ready(), Err(DbError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let s = shared();
        s.mark_connected().await;
        let status = s.status(3).await;
        assert!(status.is_connected);
        assert_eq!(status.connection_count, 3);
        assert_eq!(status.active_queries, 0);
        assert!(status.last_connection_time.is_some());
        assert_eq!(status.database_type, DatabaseType::MySql);
    }

    #[tokio::test]
    async fn test_metrics_recorded_through_shared() {
        let s = shared();
        let err = DbError::query("boom", None);
        s.record_success(10, 2).await;
        s.record_failure(20, &err).await;
        let m = s.metrics().await;
        assert_eq!(m.queries_executed, 2);
        assert_eq!(m.error_count, 1);
        assert!((m.success_rate - 50.0).abs() < f64::EPSILON);
    }
}
