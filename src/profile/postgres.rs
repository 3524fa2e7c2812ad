//! PostgreSQL data profiler.
//!
//! Mirrors the MySQL profiler with the engine's own tools:
//! `PERCENTILE_CONT(0.5)` for the median, `STDDEV`/`VARIANCE` for spread,
//! `ORDER BY RANDOM()` sampling, `~*` pattern classes (email, phone, URL,
//! ISO-date prefix), and outlier candidates beyond mean ± 3σ capped at 10.

use crate::db::types::{normalize_type, postgres_row_to_json};
use crate::error::DbResult;
use crate::models::{
    ColumnProfile, DatabaseType, ProfileOptions, SamplingInfo, TableProfile, TableRelationships,
    TopValue,
};
use crate::profile::{assess_column, quote_pg, table_quality, TextChecks};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

const EMAIL_PATTERN: &str = "^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+[.][A-Za-z]{2,}$";
const PHONE_PATTERN: &str = "^[+]?[0-9() -]{7,20}$";
const URL_PATTERN: &str = "^https?://";
const ISO_DATE_PATTERN: &str = "^[0-9]{4}-[0-9]{2}-[0-9]{2}";

const MAX_OUTLIERS: usize = 10;

pub struct PostgresDataProfiler {
    pool: PgPool,
    database: String,
}

impl PostgresDataProfiler {
    pub fn new(pool: PgPool, database: String) -> Self {
        Self { pool, database }
    }

    fn split_table(table: &str) -> (String, String) {
        match table.split_once('.') {
            Some((schema, name)) => (schema.to_string(), name.to_string()),
            None => ("public".to_string(), table.to_string()),
        }
    }

    pub async fn profile_table(
        &self,
        table: &str,
        options: &ProfileOptions,
    ) -> DbResult<TableProfile> {
        let (schema, bare) = Self::split_table(table);
        let qualified = format!("{}.{}", quote_pg(&schema), quote_pg(&bare));

        let total_rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {qualified}"))
            .fetch_one(&self.pool)
            .await?;
        let total_rows = total_rows as u64;
        let sampling = SamplingInfo::for_table(total_rows, options.max_sample_rows);

        let columns_meta = self.columns_meta(&schema, &bare).await?;
        let estimated_size_bytes = self.estimated_size(&schema, &bare).await?;

        debug!(
            db = %self.database,
            table,
            columns = columns_meta.len(),
            method = %sampling.method,
            "profiling PostgreSQL table"
        );

        let mut columns = Vec::with_capacity(columns_meta.len());
        let mut scores = Vec::with_capacity(columns_meta.len());
        for (name, data_type) in &columns_meta {
            let mut profile = self
                .profile_column(&qualified, name, data_type, &sampling, options)
                .await?;
            let text_checks = if normalize_type(data_type, DatabaseType::Postgres).is_textual() {
                Some(self.text_checks(&qualified, name, &sampling).await?)
            } else {
                None
            };
            scores.push(assess_column(&mut profile, text_checks, sampling.sample_size));
            columns.push(profile);
        }

        let data_quality = table_quality(&columns, &scores, estimated_size_bytes);
        let relationships = self.table_relationships(&schema, &bare).await?;

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

    async fn columns_meta(&self, schema: &str, table: &str) -> DbResult<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("column_name"), row.get("data_type")))
            .collect())
    }

    async fn estimated_size(&self, schema: &str, table: &str) -> DbResult<Option<u64>> {
        let size: Option<i64> = sqlx::query_scalar(
            "SELECT pg_total_relation_size(format('%I.%I', $1, $2)::regclass)",
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(size.map(|v| v as u64))
    }

    fn column_source(&self, qualified: &str, column: &str, sampling: &SamplingInfo) -> String {
        let column = quote_pg(column);
        if sampling.method == "random" {
            format!(
                "(SELECT {column} FROM {qualified} ORDER BY RANDOM() LIMIT {}) AS sample_data",
                sampling.sample_size
            )
        } else {
            qualified.to_string()
        }
    }

    async fn profile_column(
        &self,
        qualified: &str,
        column: &str,
        data_type: &str,
        sampling: &SamplingInfo,
        options: &ProfileOptions,
    ) -> DbResult<ColumnProfile> {
        let category = normalize_type(data_type, DatabaseType::Postgres);
        let source = self.column_source(qualified, column, sampling);
        let qcol = quote_pg(column);

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
            profile.outliers = self.outliers(&source, &qcol, &profile).await?;
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

        Ok(profile)
    }

    async fn numeric_stats(
        &self,
        profile: &mut ColumnProfile,
        source: &str,
        qcol: &str,
    ) -> DbResult<()> {
        let row = sqlx::query(&format!(
            "SELECT MIN({qcol})::float8 AS min_v, \
                    MAX({qcol})::float8 AS max_v, \
                    AVG({qcol})::float8 AS avg_v, \
                    STDDEV({qcol})::float8 AS stddev_v, \
                    VARIANCE({qcol})::float8 AS variance_v, \
                    PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {qcol}::float8) AS median_v \
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
        profile.median_value = get("median_v");
        Ok(())
    }

    /// Values beyond mean ± 3σ, capped at [`MAX_OUTLIERS`].
    async fn outliers(
        &self,
        source: &str,
        qcol: &str,
        profile: &ColumnProfile,
    ) -> DbResult<Option<Vec<f64>>> {
        let (Some(avg), Some(stddev)) = (profile.avg_value, profile.stddev) else {
            return Ok(None);
        };
        if stddev <= 0.0 {
            return Ok(None);
        }
        let lower = avg - 3.0 * stddev;
        let upper = avg + 3.0 * stddev;

        let values: Vec<f64> = sqlx::query_scalar(&format!(
            "SELECT {qcol}::float8 FROM {source} \
             WHERE {qcol} IS NOT NULL \
               AND ({qcol}::float8 < {lower} OR {qcol}::float8 > {upper}) \
             ORDER BY {qcol} LIMIT {MAX_OUTLIERS}"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(if values.is_empty() { None } else { Some(values) })
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
                let as_json = postgres_row_to_json(row);
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
            "SELECT LEAST(FLOOR(({qcol}::float8 - {min}) / {width})::int, {top}) AS bucket, \
                    COUNT(*) AS cnt \
             FROM {source} WHERE {qcol} IS NOT NULL \
             GROUP BY bucket ORDER BY bucket",
            top = buckets - 1
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut distribution = serde_json::Map::new();
        for row in &rows {
            let bucket = row.try_get::<i32, _>("bucket").unwrap_or(0).max(0) as f64;
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
                COUNT(*) FILTER (WHERE {qcol} ~* '{EMAIL_PATTERN}') AS email, \
                COUNT(*) FILTER (WHERE {qcol} ~* '{PHONE_PATTERN}') AS phone, \
                COUNT(*) FILTER (WHERE {qcol} ~* '{URL_PATTERN}') AS url, \
                COUNT(*) FILTER (WHERE {qcol} ~* '{ISO_DATE_PATTERN}') AS iso_date \
             FROM {source} WHERE {qcol} IS NOT NULL"
        ))
        .fetch_one(&self.pool)
        .await?;

        let mut patterns = serde_json::Map::new();
        for name in ["email", "phone", "url", "iso_date"] {
            let count = row.try_get::<Option<i64>, _>(name).ok().flatten().unwrap_or(0);
            patterns.insert(name.to_string(), JsonValue::Number(count.into()));
        }
        Ok(patterns)
    }

    async fn text_checks(
        &self,
        qualified: &str,
        column: &str,
        sampling: &SamplingInfo,
    ) -> DbResult<TextChecks> {
        let source = self.column_source(qualified, column, sampling);
        let qcol = quote_pg(column);
        let row = sqlx::query(&format!(
            "SELECT \
                COUNT(*) FILTER (WHERE {qcol} = '') AS empty_count, \
                COUNT(*) FILTER (WHERE {qcol} != TRIM({qcol})) AS whitespace_count \
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

    async fn table_relationships(
        &self,
        schema: &str,
        table: &str,
    ) -> DbResult<TableRelationships> {
        let parents = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT ccu.table_schema || '.' || ccu.table_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
               AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1 AND tc.table_name = $2
            ORDER BY 1
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let children = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT tc.table_schema || '.' || tc.table_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
               AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND ccu.table_schema = $1 AND ccu.table_name = $2
            ORDER BY 1
            "#,
        )
        .bind(schema)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_table() {
        assert_eq!(
            PostgresDataProfiler::split_table("users"),
            ("public".to_string(), "users".to_string())
        );
        assert_eq!(
            PostgresDataProfiler::split_table("analytics.events"),
            ("analytics".to_string(), "events".to_string())
        );
    }
}
