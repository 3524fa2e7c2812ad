//! Connection manager: the named registry of adapters.
//!
//! Owns one adapter per configured pool. Startup drives `connect_all`,
//! shutdown drives `disconnect_all`; in between the registry is
//! read-mostly, mutated only by `set_default_connection`.

use crate::db::adapter::DatabaseAdapter;
use crate::db::factory::AdapterFactory;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, DatabaseType, HealthStatus, PoolConfig};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Aggregate of one `health_check_all` sweep.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total_databases: usize,
    pub healthy_databases: usize,
    /// Mean over all probes; failed probes contribute 0 ms.
    pub average_response_time_ms: f64,
}

/// Registry-level counters for `list_databases`.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    pub total_connections: usize,
    /// Optimistic: pools currently in the registry. Precise liveness comes
    /// from `health_check_all`.
    pub healthy_connections: usize,
    pub by_type: HashMap<String, usize>,
    pub by_tag: HashMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_connection: Option<String>,
}

pub struct ConnectionManager {
    adapters: RwLock<HashMap<String, Arc<DatabaseAdapter>>>,
    default_connection: RwLock<Option<String>>,
    factory: AdapterFactory,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            default_connection: RwLock::new(None),
            factory: AdapterFactory::new(),
        }
    }

    /// Create adapters for every config and register them, unconnected.
    /// Duplicate names are a configuration error.
    pub async fn register_pools(&self, configs: Vec<PoolConfig>) -> DbResult<()> {
        let mut adapters = self.adapters.write().await;
        for config in configs {
            let name = config.name.clone();
            if adapters.contains_key(&name) {
                return Err(DbError::config(format!("duplicate pool name '{name}'")));
            }
            let adapter = self.factory.create(config)?;
            adapters.insert(name, Arc::new(adapter));
        }
        Ok(())
    }

    /// Connect every registered adapter concurrently. Fails with a message
    /// naming the first offending pool; adapters that already connected are
    /// left connected — the caller owns cleanup via `disconnect_all`.
    pub async fn connect_all(&self) -> DbResult<()> {
        let adapters: Vec<(String, Arc<DatabaseAdapter>)> = {
            let map = self.adapters.read().await;
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        info!(count = adapters.len(), "connecting all pools");

        let results = join_all(adapters.iter().map(|(name, adapter)| async move {
            (name.clone(), adapter.connect().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                return Err(DbError::connection(format!("pool '{name}': {e}")));
            }
        }
        Ok(())
    }

    /// Disconnect every adapter concurrently. Individual failures are
    /// logged, never propagated; the registry is cleared after the sweep.
    pub async fn disconnect_all(&self) {
        let adapters: Vec<(String, Arc<DatabaseAdapter>)> = {
            let map = self.adapters.read().await;
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let results = join_all(adapters.iter().map(|(name, adapter)| async move {
            (name.clone(), adapter.disconnect().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                error!(pool = %name, error = %e, "disconnect failed");
            }
        }

        self.adapters.write().await.clear();
        *self.default_connection.write().await = None;
        info!("all pools disconnected");
    }

    /// Resolve a pool name, falling back to the default connection.
    pub async fn resolve_name(&self, name: Option<&str>) -> DbResult<String> {
        match name {
            Some(n) if !n.trim().is_empty() => Ok(n.trim().to_string()),
            _ => self
                .default_connection
                .read()
                .await
                .clone()
                .ok_or(DbError::NoDefaultConnection),
        }
    }

    /// Resolve a pool by name, falling back to the default connection.
    pub async fn get_connection(&self, name: Option<&str>) -> DbResult<Arc<DatabaseAdapter>> {
        let resolved = self.resolve_name(name).await?;

        let adapters = self.adapters.read().await;
        adapters.get(&resolved).cloned().ok_or_else(|| {
            let mut available: Vec<&str> = adapters.keys().map(String::as_str).collect();
            available.sort_unstable();
            DbError::ConnectionNotFound {
                name: resolved,
                available: available.join(", "),
            }
        })
    }

    pub async fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub async fn connection_count(&self) -> usize {
        self.adapters.read().await.len()
    }

    pub async fn default_connection(&self) -> Option<String> {
        self.default_connection.read().await.clone()
    }

    /// Set the default pool. Unknown names are rejected.
    pub async fn set_default_connection(&self, name: &str) -> DbResult<()> {
        let adapters = self.adapters.read().await;
        if !adapters.contains_key(name) {
            let mut available: Vec<&str> = adapters.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(DbError::ConnectionNotFound {
                name: name.to_string(),
                available: available.join(", "),
            });
        }
        drop(adapters);
        *self.default_connection.write().await = Some(name.to_string());
        Ok(())
    }

    /// Probe every pool in parallel. A panicking or erroring probe becomes
    /// an unhealthy entry, so one bad pool never hides the others.
    pub async fn health_check_all(&self) -> Vec<(String, HealthStatus)> {
        let adapters: Vec<(String, Arc<DatabaseAdapter>)> = {
            let map = self.adapters.read().await;
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut results = join_all(adapters.iter().map(|(name, adapter)| async move {
            (name.clone(), adapter.health_check().await)
        }))
        .await;

        results.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, status) in &results {
            if !status.is_healthy {
                warn!(pool = %name, error = ?status.error, "health check failed");
            }
        }
        results
    }

    /// Summarize a health sweep. Failed probes contribute 0 ms to the mean.
    pub fn summarize_health(results: &[(String, HealthStatus)]) -> HealthSummary {
        let total = results.len();
        let healthy = results.iter().filter(|(_, s)| s.is_healthy).count();
        let average = if total > 0 {
            results
                .iter()
                .map(|(_, s)| s.response_time_ms as f64)
                .sum::<f64>()
                / total as f64
        } else {
            0.0
        };
        HealthSummary {
            total_databases: total,
            healthy_databases: healthy,
            average_response_time_ms: average,
        }
    }

    /// Pools whose configured tags include `tag`.
    pub async fn connections_by_tag(&self, tag: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .read()
            .await
            .iter()
            .filter(|(_, a)| a.shared().config.tags.iter().any(|t| t == tag))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Connected pools of the given engine type.
    pub async fn connections_by_type(&self, db_type: DatabaseType) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .read()
            .await
            .iter()
            .filter(|(_, a)| a.db_type() == db_type && a.shared().is_connected())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    pub async fn connection_infos(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .adapters
            .read()
            .await
            .iter()
            .map(|(name, adapter)| adapter.connection_info(name))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn statistics(&self) -> ManagerStatistics {
        let adapters = self.adapters.read().await;
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_tag: HashMap<String, usize> = HashMap::new();
        for adapter in adapters.values() {
            *by_type
                .entry(adapter.db_type().as_str().to_string())
                .or_insert(0) += 1;
            for tag in &adapter.shared().config.tags {
                *by_tag.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        ManagerStatistics {
            total_connections: adapters.len(),
            healthy_connections: adapters.len(),
            by_type,
            by_tag,
            default_connection: self.default_connection.read().await.clone(),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
