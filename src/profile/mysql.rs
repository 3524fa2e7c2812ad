//! MySQL data profiler.
//!
//! Per-column aggregation over the table or a `ORDER BY RAND()` sample:
//! null/unique counts, numeric spread (STDDEV/VARIANCE), an offset-scan
//! median, frequency-ordered mode and top-K, a range-bucketed distribution,
//! REGEXP pattern counts for text, and ENUM/SET member extraction from
//! `COLUMN_TYPE`. Outlier candidates are a PostgreSQL-only feature; the
//! window functions they need are missing from many MySQL versions.
//!
//! The median over a random sample inherits the sample's bias; the profile
//! carries `sampling` metadata so consumers can see when that happened.

use crate::db::types::{mysql_row_to_json, normalize_type};
use crate::error::DbResult;
use crate::models::{
    ColumnProfile, DatabaseType, ProfileOptions, SamplingInfo, TableProfile, TableRelationships,
    TopValue,
};
use crate::profile::{assess_column, quote_mysql, table_quality, TextChecks};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::debug;

const EMAIL_PATTERN: &str = "^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+[.][A-Za-z]{2,}$";
const PHONE_PATTERN: &str = "^[+]?[0-9() -]{7,20}$";
const URL_PATTERN: &str = "^https?://";

pub struct MySqlDataProfiler {
    pool: MySqlPool,
    database: String,
}

impl MySqlDataProfiler {
    pub fn new(pool: MySqlPool, database: String) -> Self {
        Self { pool, database }
    }

    pub async fn profile_table(
        &self,
        table: &str,
        options: &ProfileOptions,
    ) -> DbResult<TableProfile> {
        let quoted = quote_mysql(table);
        let total_rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {quoted}"))
            .fetch_one(&self.pool)
            .await?;
        let total_rows = total_rows as u64;
        let sampling = SamplingInfo::for_table(total_rows, options.max_sample_rows);

        let columns_meta = self.columns_meta(table).await?;
        let estimated_size_bytes = self.estimated_size(table).await?;

        debug!(
            db = %self.database,
            table,
            columns = columns_meta.len(),
            method = %sampling.method,
            "profiling MySQL table"
        );

        let mut columns = Vec::with_capacity(columns_meta.len());
        let mut scores = Vec::with_capacity(columns_meta.len());
        for (name, data_type, column_type) in &columns_meta {
            let mut profile = self
                .profile_column(table, name, data_type, column_type, &sampling, options)
                .await?;
            let text_checks = if normalize_type(data_type, DatabaseType::MySql).is_textual() {
                Some(self.text_checks(table, name, &sampling).await?)
            } else {
                None
            };
            scores.push(assess_column(&mut profile, text_checks, sampling.sample_size));
            columns.push(profile);
        }

        let data_quality = table_quality(&columns, &scores, estimated_size_bytes);
        let relationships = self.table_relationships(table).await?;

        Ok(TableProfile {
            table_name: table.to_string(),
            total_rows,
            total_columns: columns.len(),
            estimated_size_bytes,
            columns,
            data_quality,
            relationships,
            sampling,
        })
    }

    async fn columns_meta(&self, table: &str) -> DbResult<Vec<(String, String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT
                CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
                CONVERT(DATA_TYPE USING utf8) AS DATA_TYPE,
                CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("COLUMN_NAME").unwrap_or_default();
                let data_type: String = row.try_get("DATA_TYPE").unwrap_or_default();
                let column_type: String = row.try_get("COLUMN_TYPE").unwrap_or_default();
                (name, data_type, column_type)
            })
            .collect())
    }

    async fn estimated_size(&self, table: &str) -> DbResult<Option<u64>> {
        let size: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT CAST(DATA_LENGTH + COALESCE(INDEX_LENGTH, 0) AS SIGNED)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_optional(&self.pool)
        .await?
        .flatten();
        Ok(size.map(|v| v as u64))
    }

    /// `FROM` source for one column: the table itself, or a random sample
    /// subquery when the table exceeds the sampling cap.
    fn column_source(&self, table: &str, column: &str, sampling: &SamplingInfo) -> String {
        let table = quote_mysql(table);
        let column = quote_mysql(column);
        if sampling.method == "random" {
            format!(
                "(SELECT {column} FROM {table} ORDER BY RAND() LIMIT {}) AS sample_data",
                sampling.sample_size
            )
        } else {
            table
        }
    }

    async fn profile_column(
        &self,
        table: &str,
        column: &str,
        data_type: &str,
        column_type: &str,
        sampling: &SamplingInfo,
        options: &ProfileOptions,
    ) -> DbResult<ColumnProfile> {
        let category = normalize_type(data_type, DatabaseType::MySql);
        let source = self.column_source(table, column, sampling);
        let qcol = quote_mysql(column);

        let base = sqlx::query(&format!(
            "SELECT COUNT(*) AS total, COUNT({qcol}) AS non_null, \
             COUNT(DISTINCT {qcol}) AS uniq FROM {source}"
        ))
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = base.get("total");
        let non_null: i64 = base.get("non_null");
        let unique: i64 = base.get("uniq");
        let sampled_rows = total as u64;

        let mut profile = ColumnProfile::new(column, category.as_str()).with_counts(
            (total - non_null) as u64,
            unique as u64,
            sampled_rows,
        );

        if category.is_numeric() && non_null > 0 {
            self.numeric_stats(&mut profile, &source, &qcol).await?;
            profile.median_value = self.median(&source, &qcol, non_null as u64).await?;
            profile.distribution = self
                .distribution(&source, &qcol, &profile, options.distribution_buckets)
                .await?;
        }

        if non_null > 0 {
            let top = self.top_values(&source, &qcol, sampled_rows, options.top_k).await?;
            profile.mode = top.first().map(|t| t.value.clone());
            profile.top_values = Some(top);
        }

        if category.is_textual() && non_null > 0 {
            profile.patterns = Some(self.pattern_counts(&source, &qcol).await?);
        }

        if let Some(members) = parse_enum_members(column_type) {
            profile.adapter_specific = Some(serde_json::json!({ "enum_values": members }));
        }

        Ok(profile)
    }

    async fn numeric_stats(
        &self,
        profile: &mut ColumnProfile,
        source: &str,
        qcol: &str,
    ) -> DbResult<()> {
        let row = sqlx::query(&format!(
            "SELECT CAST(MIN({qcol}) AS DOUBLE) AS min_v, \
                    CAST(MAX({qcol}) AS DOUBLE) AS max_v, \
                    CAST(AVG({qcol}) AS DOUBLE) AS avg_v, \
                    CAST(STDDEV({qcol}) AS DOUBLE) AS stddev_v, \
                    CAST(VARIANCE({qcol}) AS DOUBLE) AS variance_v \
             FROM {source}"
        ))
        .fetch_one(&self.pool)
        .await?;

        let get = |name: &str| row.try_get::<Option<f64>, _>(name).ok().flatten();
        profile.min_value = get("min_v").map(json_number);
        profile.max_value = get("max_v").map(json_number);
        profile.avg_value = get("avg_v");
        profile.stddev = get("stddev_v");
        profile.variance = get("variance_v");
        Ok(())
    }

    /// Offset scan to the middle of the ordered non-null values.
    async fn median(&self, source: &str, qcol: &str, non_null: u64) -> DbResult<Option<f64>> {
        let offset = non_null / 2;
        let median: Option<f64> = sqlx::query_scalar(&format!(
            "SELECT CAST({qcol} AS DOUBLE) FROM {source} \
             WHERE {qcol} IS NOT NULL ORDER BY {qcol} LIMIT 1 OFFSET {offset}"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(median)
    }

    async fn top_values(
        &self,
        source: &str,
        qcol: &str,
        sampled_rows: u64,
        top_k: usize,
    ) -> DbResult<Vec<TopValue>> {
        let rows = sqlx::query(&format!(
            "SELECT {qcol} AS v, COUNT(*) AS cnt FROM {source} \
             WHERE {qcol} IS NOT NULL \
             GROUP BY {qcol} ORDER BY cnt DESC LIMIT {top_k}"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let as_json = mysql_row_to_json(row);
                let value = as_json.get("v").cloned().unwrap_or(JsonValue::Null);
                let count = row.try_get::<i64, _>("cnt").unwrap_or(0) as u64;
                TopValue {
                    value,
                    count,
                    percentage: if sampled_rows > 0 {
                        count as f64 / sampled_rows as f64 * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect())
    }

    async fn distribution(
        &self,
        source: &str,
        qcol: &str,
        profile: &ColumnProfile,
        buckets: u32,
    ) -> DbResult<Option<serde_json::Map<String, JsonValue>>> {
        let (Some(min), Some(max)) = (
            profile.min_value.as_ref().and_then(JsonValue::as_f64),
            profile.max_value.as_ref().and_then(JsonValue::as_f64),
        ) else {
            return Ok(None);
        };
        if max <= min || buckets == 0 {
            return Ok(None);
        }
        let width = (max - min) / buckets as f64;

        let rows = sqlx::query(&format!(
            "SELECT LEAST(FLOOR((CAST({qcol} AS DOUBLE) - {min}) / {width}), {top}) AS bucket, \
                    COUNT(*) AS cnt \
             FROM {source} WHERE {qcol} IS NOT NULL \
             GROUP BY bucket ORDER BY bucket",
            top = buckets - 1
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut distribution = serde_json::Map::new();
        for row in &rows {
            let bucket = row.try_get::<i64, _>("bucket").unwrap_or(0).max(0) as f64;
            let count = row.try_get::<i64, _>("cnt").unwrap_or(0);
            let lo = min + bucket * width;
            let hi = lo + width;
            distribution.insert(
                format!("{lo:.2} - {hi:.2}"),
                JsonValue::Number(count.into()),
            );
        }
        Ok(Some(distribution))
    }

    async fn pattern_counts(
        &self,
        source: &str,
        qcol: &str,
    ) -> DbResult<serde_json::Map<String, JsonValue>> {
        let row = sqlx::query(&format!(
            "SELECT \
                CAST(SUM({qcol} REGEXP '{EMAIL_PATTERN}') AS SIGNED) AS email, \
                CAST(SUM({qcol} REGEXP '{PHONE_PATTERN}') AS SIGNED) AS phone, \
                CAST(SUM({qcol} REGEXP '{URL_PATTERN}') AS SIGNED) AS url \
             FROM {source} WHERE {qcol} IS NOT NULL"
        ))
        .fetch_one(&self.pool)
        .await?;

        let mut patterns = serde_json::Map::new();
        for name in ["email", "phone", "url"] {
            let count = row.try_get::<Option<i64>, _>(name).ok().flatten().unwrap_or(0);
            patterns.insert(name.to_string(), JsonValue::Number(count.into()));
        }
        Ok(patterns)
    }

    async fn text_checks(
        &self,
        table: &str,
        column: &str,
        sampling: &SamplingInfo,
    ) -> DbResult<TextChecks> {
        let source = self.column_source(table, column, sampling);
        let qcol = quote_mysql(column);
        let row = sqlx::query(&format!(
            "SELECT \
                CAST(SUM({qcol} = '') AS SIGNED) AS empty_count, \
                CAST(SUM({qcol} != TRIM({qcol})) AS SIGNED) AS whitespace_count \
             FROM {source} WHERE {qcol} IS NOT NULL"
        ))
        .fetch_one(&self.pool)
        .await?;

        Ok(TextChecks {
            empty_count: row
                .try_get::<Option<i64>, _>("empty_count")
                .ok()
                .flatten()
                .unwrap_or(0) as u64,
            whitespace_count: row
                .try_get::<Option<i64>, _>("whitespace_count")
                .ok()
                .flatten()
                .unwrap_or(0) as u64,
        })
    }

    /// FK neighborhood: parents this table references, children that
    /// reference it.
    pub async fn table_relationships(&self, table: &str) -> DbResult<TableRelationships> {
        let parents = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT CONVERT(REFERENCED_TABLE_NAME USING utf8)
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY 1
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let children = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT CONVERT(TABLE_NAME USING utf8)
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND REFERENCED_TABLE_NAME = ?
            ORDER BY 1
            "#,
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(TableRelationships {
            parent_tables: parents,
            child_tables: children,
        })
    }
}

fn json_number(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Pull the member list out of an `enum('a','b')` or `set('x','y')` type.
fn parse_enum_members(column_type: &str) -> Option<Vec<String>> {
    let lower = column_type.to_lowercase();
    let rest = lower
        .strip_prefix("enum(")
        .or_else(|| lower.strip_prefix("set("))?;
    let body = rest.strip_suffix(')')?;
    let members: Vec<String> = body
        .split(',')
        .map(|m| m.trim().trim_matches('\'').to_string())
        .filter(|m| !m.is_empty())
        .collect();
    if members.is_empty() {
        None
    } else {
        Some(members)
    }
}
