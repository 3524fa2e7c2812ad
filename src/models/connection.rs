//! Connection-related data models.
//!
//! Pool configuration, adapter status, metrics, and health types shared by
//! the adapters and the connection manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Includes MariaDB
    MySql,
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
}

impl DatabaseType {
    /// Canonical lowercase tag, as used in adapter ids and cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgresql",
        }
    }

    /// Parse a type tag. Accepts the common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgresql" | "postgres" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TLS requirement level for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SslMode {
    Required,
    #[default]
    Preferred,
    Disabled,
}

impl SslMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "REQUIRED" | "REQUIRE" => Some(Self::Required),
            "PREFERRED" | "PREFER" => Some(Self::Preferred),
            "DISABLED" | "DISABLE" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// TLS material for a pool. Paths are loaded by the driver, never read here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslConfig {
    pub mode: SslMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Configuration for one named pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub name: String,
    /// Engine type. When absent the factory detects it from port, then host.
    #[serde(default, rename = "type")]
    pub db_type: Option<DatabaseType>,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    /// Contains sensitive data - never log or serialize
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
}

impl PoolConfig {
    /// Minimal config for one host/database pair. Port defaults per engine
    /// at factory time.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            db_type: None,
            host: host.into(),
            port: None,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            description: None,
            tags: Vec::new(),
            ssl: None,
            connection_timeout_ms: None,
            acquire_timeout_ms: None,
            query_timeout_ms: None,
            connection_limit: None,
            queue_limit: None,
            idle_timeout_ms: None,
        }
    }

    /// Effective port: configured, or the engine default.
    pub fn effective_port(&self, db_type: DatabaseType) -> u16 {
        self.port.unwrap_or_else(|| db_type.default_port())
    }

    /// Validate required fields. Called once at load time.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("pool name cannot be empty".to_string());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("pool name contains invalid characters: {}", self.name));
        }
        if self.host.is_empty() {
            return Err(format!("pool '{}': host is required", self.name));
        }
        if self.user.is_empty() {
            return Err(format!("pool '{}': user is required", self.name));
        }
        if self.database.is_empty() {
            return Err(format!("pool '{}': database is required", self.name));
        }
        Ok(())
    }

    /// Display-safe endpoint string, credentials masked.
    pub fn masked_endpoint(&self) -> String {
        let port = self
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!("{}:****@{}:{}/{}", self.user, self.host, port, self.database)
    }
}

/// Pool and retry options resolved by the factory.
#[derive(Debug, Clone, Serialize)]
pub struct PoolOptions {
    pub min_connections: u32,
    pub max_connections: u32,
    pub idle_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            idle_timeout_ms: 300_000,
            acquire_timeout_ms: 60_000,
        }
    }
}

/// Retry policy surfaced to adapters. Intentionally unengaged in the query
/// path: SELECTs against read-only pools surface the first error.
#[derive(Debug, Clone, Serialize)]
pub struct RetryOptions {
    pub retries: u32,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            min_timeout_ms: 1_000,
            max_timeout_ms: 5_000,
        }
    }
}

/// Point-in-time snapshot of an adapter's connection state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub connection_count: u32,
    pub active_queries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connection_time: Option<DateTime<Utc>>,
    pub uptime_ms: u64,
    pub database_type: DatabaseType,
}

/// Cumulative per-adapter execution counters.
///
/// `average_execution_time_ms` and `success_rate` are derived on every
/// update so a snapshot is always internally consistent.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterMetrics {
    pub queries_executed: u64,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
    pub error_count: u64,
    /// Percentage in 0..=100
    pub success_rate: f64,
    pub last_metrics_reset: DateTime<Utc>,
}

impl AdapterMetrics {
    pub fn new() -> Self {
        Self {
            queries_executed: 0,
            total_execution_time_ms: 0,
            average_execution_time_ms: 0.0,
            error_count: 0,
            success_rate: 100.0,
            last_metrics_reset: Utc::now(),
        }
    }

    pub fn record_success(&mut self, execution_time_ms: u64) {
        self.queries_executed += 1;
        self.total_execution_time_ms += execution_time_ms;
        self.recompute();
    }

    pub fn record_failure(&mut self, execution_time_ms: u64) {
        self.queries_executed += 1;
        self.total_execution_time_ms += execution_time_ms;
        self.error_count += 1;
        self.recompute();
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn recompute(&mut self) {
        if self.queries_executed > 0 {
            self.average_execution_time_ms =
                self.total_execution_time_ms as f64 / self.queries_executed as f64;
            self.success_rate = (self.queries_executed - self.error_count) as f64
                / self.queries_executed as f64
                * 100.0;
        } else {
            self.average_execution_time_ms = 0.0;
            self.success_rate = 100.0;
        }
    }
}

impl Default for AdapterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one health probe against a pool.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub database_type: DatabaseType,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy(database_type: DatabaseType, response_time_ms: u64) -> Self {
        Self {
            is_healthy: true,
            response_time_ms,
            error: None,
            database_type,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(database_type: DatabaseType, error: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            response_time_ms: 0,
            error: Some(error.into()),
            database_type,
            checked_at: Utc::now(),
        }
    }
}

/// Public description of one pool. Never includes credentials.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub name: String,
    /// Derived adapter id: `type-host-port-database`
    pub id: String,
    pub database_type: DatabaseType,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub is_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_parse() {
        assert_eq!(DatabaseType::parse("mysql"), Some(DatabaseType::MySql));
        assert_eq!(DatabaseType::parse("MariaDB"), Some(DatabaseType::MySql));
        assert_eq!(DatabaseType::parse("postgres"), Some(DatabaseType::Postgres));
        assert_eq!(
            DatabaseType::parse("PostgreSQL"),
            Some(DatabaseType::Postgres)
        );
        assert_eq!(DatabaseType::parse("oracle"), None);
    }

    #[test]
    fn test_ssl_mode_parse() {
        assert_eq!(SslMode::parse("required"), Some(SslMode::Required));
        assert_eq!(SslMode::parse("PREFER"), Some(SslMode::Preferred));
        assert_eq!(SslMode::parse("disabled"), Some(SslMode::Disabled));
        assert_eq!(SslMode::parse("verify-full"), None);
    }

    #[test]
    fn test_pool_config_validation() {
        let mut config = PoolConfig::new("sales", "db.example.com", "reader", "secret", "sales");
        assert!(config.validate().is_ok());

        config.name = "bad name!".to_string();
        assert!(config.validate().is_err());

        config.name = "sales".to_string();
        config.host = String::new();
        assert!(config.validate().unwrap_err().contains("host"));
    }

    #[test]
    fn test_masked_endpoint_hides_password() {
        let config = PoolConfig {
            port: Some(5432),
            ..PoolConfig::new("a", "h", "u", "hunter2", "d")
        };
        let masked = config.masked_endpoint();
        assert!(!masked.contains("hunter2"));
        assert!(masked.contains("u:****@h:5432/d"));
    }

    #[test]
    fn test_metrics_invariants() {
        let mut m = AdapterMetrics::new();
        m.record_success(10);
        m.record_success(30);
        m.record_failure(20);

        assert_eq!(m.queries_executed, 3);
        assert_eq!(m.total_execution_time_ms, 60);
        assert!((m.average_execution_time_ms - 20.0).abs() < f64::EPSILON);
        assert!((m.success_rate - (2.0 / 3.0 * 100.0)).abs() < 1e-9);

        m.reset();
        assert_eq!(m.queries_executed, 0);
        assert!((m.success_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_health_status_unhealthy_zero_response_time() {
        let h = HealthStatus::unhealthy(DatabaseType::MySql, "ping failed");
        assert!(!h.is_healthy);
        assert_eq!(h.response_time_ms, 0);
        assert_eq!(h.error.as_deref(), Some("ping failed"));
    }

    #[test]
    fn test_pool_config_password_not_serialized() {
        let config = PoolConfig::new("a", "h", "u", "supersecret", "d");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("supersecret"));
    }
}
