//! MCP service implementation using rmcp.
//!
//! Exposes the broker's tool surface through the rmcp tool-router macros
//! and serves the `database://` resources. Tool handlers validate and
//! resolve their pool, then delegate to the core; every payload is plain
//! JSON so transports stay thin.

use crate::error::DbError;
use crate::mcp::resources::{self, ResourceTarget};
use crate::mcp::BrokerState;
use crate::models::{ProfileOptions, QueryOptions, QueryParam, SchemaInfo};
use crate::nl::SchemaContext;
use crate::query::cross::CrossQueryItem;
use crate::query::cross_query;
use crate::schema::CacheKey;
use rmcp::schemars::{self, JsonSchema};
use rmcp::{
    ErrorData as McpError, Json, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        AnnotateAble, Implementation, ListResourcesResult, PaginatedRequestParam,
        ProtocolVersion, RawResource, ReadResourceRequestParam, ReadResourceResult,
        ResourceContents, ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;

fn to_mcp_error(e: DbError) -> McpError {
    McpError::internal_error(e.to_string(), None)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HealthCheckInput {
    /// Pool name. Omit to check every pool and return an aggregate.
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// Read-only SQL (SELECT/SHOW/DESCRIBE/EXPLAIN/ANALYZE). Writes are rejected.
    pub query: String,
    /// Pool name from list_databases. Omit to use the default connection.
    #[serde(default)]
    pub database: Option<String>,
    /// Positional parameters for ? / $1 placeholders.
    #[serde(default)]
    pub parameters: Vec<JsonValue>,
    /// Row cap for this call.
    #[serde(default)]
    pub max_rows: Option<usize>,
    /// Per-call timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Validate and analyze without touching the database.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NaturalLanguageInput {
    /// Plain-language question, e.g. "how many orders are there?"
    pub question: String,
    /// Pool name. Omit to use the default connection.
    #[serde(default)]
    pub database: Option<String>,
    /// Extra context appended to the question before translation.
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CrossQueryItemInput {
    /// Pool name from list_databases.
    pub pool: String,
    /// Read-only SQL to run on that pool.
    pub sql: String,
    /// Label for this item in the merged result. Defaults to the pool name.
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CrossDatabaseInput {
    /// Queries dispatched concurrently to their pools; results come back
    /// in this order.
    pub queries: Vec<CrossQueryItemInput>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalyzeQueryInput {
    /// SQL to validate and analyze. The database is never contacted.
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExplainQueryInput {
    /// SQL to explain.
    pub query: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub parameters: Vec<JsonValue>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalyzeSchemaInput {
    /// Pool name. Omit to use the default connection.
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProfileTableInput {
    /// Table to profile. PostgreSQL accepts `schema.table`.
    pub table: String,
    #[serde(default)]
    pub database: Option<String>,
    /// Sampling cap; tables above it are sampled randomly.
    #[serde(default)]
    pub sample_size: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TableRelationshipsInput {
    /// Pool name. Omit to use the default connection.
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearSchemaCacheInput {
    /// Regex over cache keys (`kind:db[:entity]`). Omit to clear everything.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Clone)]
pub struct BrokerService {
    state: BrokerState,
    tool_router: ToolRouter<Self>,
}

impl BrokerService {
    pub fn new(state: BrokerState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    fn parse_params(raw: &[JsonValue]) -> Result<Vec<QueryParam>, McpError> {
        raw.iter()
            .map(QueryParam::from_json)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| McpError::invalid_params(e, None))
    }

    /// Schema context for the NL generator, served from the cache when
    /// fresh and refilled on miss.
    async fn schema_context(&self, pool: &str) -> Result<SchemaContext, McpError> {
        let key = CacheKey::schema(pool);
        if let Some(cached) = self.state.cache.get(&key) {
            if let Ok(schema) = serde_json::from_value::<SchemaInfo>(cached) {
                return Ok(SchemaContext::from(&schema));
            }
        }
        let adapter = self
            .state
            .manager
            .get_connection(Some(pool))
            .await
            .map_err(to_mcp_error)?;
        let schema = adapter
            .schema_analyzer()
            .await
            .map_err(to_mcp_error)?
            .schema()
            .await
            .map_err(to_mcp_error)?;
        let _ = self.state.cache.set(&key, &schema);
        Ok(SchemaContext::from(&schema))
    }
}

#[tool_router]
impl BrokerService {
    #[tool(
        description = "List all configured database pools with connection info and registry statistics."
    )]
    async fn list_databases(&self) -> Result<Json<JsonValue>, McpError> {
        let connections = self.state.manager.connection_infos().await;
        let statistics = self.state.manager.statistics().await;
        Ok(Json(json!({
            "count": connections.len(),
            "connections": connections,
            "statistics": statistics,
        })))
    }

    #[tool(
        description = "Health-check one pool, or every pool with an aggregate summary when no database is given."
    )]
    async fn database_health_check(
        &self,
        Parameters(input): Parameters<HealthCheckInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        match input.database {
            Some(ref pool) => {
                let adapter = self
                    .state
                    .manager
                    .get_connection(Some(pool))
                    .await
                    .map_err(to_mcp_error)?;
                let health = adapter.health_check().await;
                Ok(Json(json!({ "database": pool, "health": health })))
            }
            None => {
                let results = self.state.manager.health_check_all().await;
                let summary = crate::db::ConnectionManager::summarize_health(&results);
                let databases: serde_json::Map<String, JsonValue> = results
                    .into_iter()
                    .map(|(name, status)| {
                        (name, serde_json::to_value(status).unwrap_or(JsonValue::Null))
                    })
                    .collect();
                Ok(Json(json!({ "summary": summary, "databases": databases })))
            }
        }
    }

    #[tool(
        description = "Execute a read-only SQL query on a pool. Supports positional parameters, per-call row caps and timeouts, and dry_run for validation plus analysis without execution."
    )]
    async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let adapter = self
            .state
            .manager
            .get_connection(input.database.as_deref())
            .await
            .map_err(to_mcp_error)?;
        let params = Self::parse_params(&input.parameters)?;
        let options = QueryOptions {
            timeout_ms: input.timeout_ms,
            max_rows: input.max_rows,
            enable_audit: None,
            dry_run: input.dry_run,
        };

        let result = self
            .state
            .executor
            .execute_query(&adapter, &input.query, &params, &options)
            .await
            .map_err(to_mcp_error)?;

        info!(
            database = ?input.database,
            row_count = result.row_count,
            cached = result.cached,
            "query executed"
        );
        Ok(Json(
            serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string(), None))?,
        ))
    }

    #[tool(
        description = "Answer a restricted natural-language question (counts, top-N, aggregates, recency, listings) by generating SQL from cached schema context and executing it."
    )]
    async fn natural_language_query(
        &self,
        Parameters(input): Parameters<NaturalLanguageInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let pool = self
            .state
            .manager
            .resolve_name(input.database.as_deref())
            .await
            .map_err(to_mcp_error)?;
        let context = self.schema_context(&pool).await?;

        let question = match &input.context {
            Some(extra) => format!("{} {extra}", input.question),
            None => input.question.clone(),
        };
        let generated = self
            .state
            .nl
            .generate(&question, &context)
            .map_err(to_mcp_error)?;

        let adapter = self
            .state
            .manager
            .get_connection(Some(&pool))
            .await
            .map_err(to_mcp_error)?;
        let result = self
            .state
            .executor
            .execute_query(&adapter, &generated.sql, &[], &QueryOptions::default())
            .await
            .map_err(to_mcp_error)?;

        Ok(Json(json!({
            "generated_sql": generated.sql,
            "confidence": generated.confidence,
            "explanation": generated.explanation,
            "suggested_improvements": generated.suggested_improvements,
            "execution_time_ms": result.execution_time_ms,
            "row_count": result.row_count,
            "rows": result.rows,
            "fields": result.fields,
        })))
    }

    #[tool(
        description = "Run independent read-only queries on multiple pools concurrently and return a merged, per-pool-labeled result. Partial failures are reported per item."
    )]
    async fn cross_database_query(
        &self,
        Parameters(input): Parameters<CrossDatabaseInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        // Admission applies per item before any dispatch.
        let validator = self.state.executor.validator();
        for item in &input.queries {
            let validation = validator.validate(&item.sql);
            if !validation.is_valid {
                return Err(McpError::invalid_params(
                    format!(
                        "query for pool '{}' failed validation: {}",
                        item.pool,
                        validation.errors.join("; ")
                    ),
                    None,
                ));
            }
        }

        let items: Vec<CrossQueryItem> = input
            .queries
            .into_iter()
            .map(|q| CrossQueryItem {
                pool: q.pool,
                sql: q.sql,
                alias: q.alias,
                params: Vec::new(),
            })
            .collect();

        let result = cross_query(&self.state.manager, items)
            .await
            .map_err(to_mcp_error)?;
        Ok(Json(
            serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string(), None))?,
        ))
    }

    #[tool(
        description = "Validate a query and report its structure (operation, tables, joins, complexity) without contacting any database."
    )]
    async fn analyze_query(
        &self,
        Parameters(input): Parameters<AnalyzeQueryInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let inspection = self.state.executor.analyze_query(&input.query);
        Ok(Json(
            serde_json::to_value(inspection)
                .map_err(|e| McpError::internal_error(e.to_string(), None))?,
        ))
    }

    #[tool(description = "Run EXPLAIN on a query and return the plan rows.")]
    async fn explain_query(
        &self,
        Parameters(input): Parameters<ExplainQueryInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let adapter = self
            .state
            .manager
            .get_connection(input.database.as_deref())
            .await
            .map_err(to_mcp_error)?;
        let params = Self::parse_params(&input.parameters)?;
        let result = self
            .state
            .executor
            .explain_query(&adapter, &input.query, &params)
            .await
            .map_err(to_mcp_error)?;
        Ok(Json(
            serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string(), None))?,
        ))
    }

    #[tool(
        description = "Return the full schema of a pool: tables with columns, indexes and foreign keys, plus views and procedures. Served from cache when fresh."
    )]
    async fn analyze_schema(
        &self,
        Parameters(input): Parameters<AnalyzeSchemaInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let pool = self
            .state
            .manager
            .resolve_name(input.database.as_deref())
            .await
            .map_err(to_mcp_error)?;
        let payload = resources::resolve(&self.state, &ResourceTarget::Schema { pool })
            .await
            .map_err(to_mcp_error)?;
        Ok(Json(payload))
    }

    #[tool(
        description = "Profile a table: per-column statistics (nulls, uniqueness, spread, top values, patterns) and a data-quality score with recommendations."
    )]
    async fn profile_table(
        &self,
        Parameters(input): Parameters<ProfileTableInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let pool = self
            .state
            .manager
            .resolve_name(input.database.as_deref())
            .await
            .map_err(to_mcp_error)?;

        // A custom sample size bypasses the cached default profile.
        if let Some(sample_size) = input.sample_size {
            let adapter = self
                .state
                .manager
                .get_connection(Some(&pool))
                .await
                .map_err(to_mcp_error)?;
            let options = ProfileOptions {
                max_sample_rows: sample_size,
                ..ProfileOptions::default()
            };
            let profile = adapter
                .data_profiler()
                .await
                .map_err(to_mcp_error)?
                .profile_table(&input.table, &options)
                .await
                .map_err(to_mcp_error)?;
            return Ok(Json(
                serde_json::to_value(profile)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?,
            ));
        }

        let payload = resources::resolve(
            &self.state,
            &ResourceTarget::Profile {
                pool,
                table: input.table,
            },
        )
        .await
        .map_err(to_mcp_error)?;
        Ok(Json(payload))
    }

    #[tool(
        description = "Return the foreign-key relationship map of a pool: table to referenced tables."
    )]
    async fn get_table_relationships(
        &self,
        Parameters(input): Parameters<TableRelationshipsInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let pool = self
            .state
            .manager
            .resolve_name(input.database.as_deref())
            .await
            .map_err(to_mcp_error)?;

        let key = CacheKey::relationships(&pool);
        if let Some(cached) = self.state.cache.get(&key) {
            return Ok(Json(cached));
        }
        let adapter = self
            .state
            .manager
            .get_connection(Some(&pool))
            .await
            .map_err(to_mcp_error)?;
        let map = adapter
            .schema_analyzer()
            .await
            .map_err(to_mcp_error)?
            .relationships()
            .await
            .map_err(to_mcp_error)?;
        let _ = self.state.cache.set(&key, &map);
        Ok(Json(JsonValue::Object(map)))
    }

    #[tool(
        description = "Invalidate schema-cache entries. Without a pattern, clears the whole cache and resets its counters; with one, removes matching keys."
    )]
    async fn clear_schema_cache(
        &self,
        Parameters(input): Parameters<ClearSchemaCacheInput>,
    ) -> Result<Json<JsonValue>, McpError> {
        let removed = self
            .state
            .cache
            .invalidate(input.pattern.as_deref())
            .map_err(to_mcp_error)?;
        Ok(Json(json!({
            "removed": removed,
            "stats": self.state.cache.stats(),
        })))
    }
}

#[tool_handler]
impl ServerHandler for BrokerService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "db-broker-mcp".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                ..Implementation::default()
            },
            instructions: Some(
                "Read-only broker over a named fleet of MySQL and PostgreSQL pools.\n\
                \n\
                ## Workflow\n\
                1. Call `list_databases` for the pool names\n\
                2. Pass a pool name as `database` in other tools, or rely on the default\n\
                3. `execute_query` accepts SELECT/SHOW/DESCRIBE/EXPLAIN/ANALYZE only;\n\
                   use positional parameters instead of inline literals\n\
                \n\
                ## Introspection\n\
                `analyze_schema`, `profile_table`, and `get_table_relationships` are\n\
                cached; `clear_schema_cache` invalidates by regex. The same payloads\n\
                are exposed as `database://` resources.\n\
                \n\
                ## Fan-out\n\
                `cross_database_query` runs independent queries on several pools\n\
                concurrently and merges the labeled results; items fail independently."
                    .to_string(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let pools = self.state.manager.connection_names().await;
        let resources = resources::list_targets(&pools)
            .into_iter()
            .map(|(target, description)| {
                let mut raw = RawResource::new(target.uri(), description.clone());
                raw.description = Some(description);
                raw.mime_type = Some("application/json".to_string());
                raw.no_annotation()
            })
            .collect();
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let target = ResourceTarget::parse(&request.uri)
            .map_err(|e| McpError::resource_not_found(e.to_string(), None))?;
        let payload = resources::resolve(&self.state, &target)
            .await
            .map_err(to_mcp_error)?;
        let text = serde_json::to_string_pretty(&payload)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnectionManager;
    use crate::query::QueryExecutor;
    use crate::schema::SchemaCache;
    use std::sync::Arc;

    fn service() -> BrokerService {
        let state = BrokerState::new(
            Arc::new(ConnectionManager::new()),
            Arc::new(QueryExecutor::with_defaults()),
            Arc::new(SchemaCache::with_defaults()),
        );
        BrokerService::new(state)
    }

    #[test]
    fn test_server_info_advertises_tools_and_resources() {
        let info = service().get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.resources.is_some());
        assert!(info.instructions.is_some());
    }

    #[test]
    fn test_parse_params_accepts_scalars() {
        let params = BrokerService::parse_params(&[
            json!(null),
            json!(true),
            json!(7),
            json!(1.5),
            json!("x"),
        ])
        .unwrap();
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_parse_params_rejects_arrays() {
        assert!(BrokerService::parse_params(&[json!([1, 2])]).is_err());
    }

    #[tokio::test]
    async fn test_execute_query_without_pools_reports_no_default() {
        let svc = service();
        let err = svc
            .execute_query(Parameters(ExecuteQueryInput {
                query: "SELECT 1".to_string(),
                database: None,
                parameters: Vec::new(),
                max_rows: None,
                timeout_ms: None,
                dry_run: false,
            }))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no default connection"));
    }
}
