//! Data profiling: per-engine profilers plus shared quality scoring.
//!
//! Engine profilers run aggregate queries only — counts, extremes, spreads,
//! frequency tables — never raw row dumps. The scoring here turns those
//! aggregates into a 0–100 quality figure per column, a table mean, and
//! heuristic recommendations.

pub mod mysql;
pub mod postgres;

pub use mysql::MySqlDataProfiler;
pub use postgres::PostgresDataProfiler;

use crate::error::DbResult;
use crate::models::{ColumnProfile, DataQuality, ProfileOptions, TableProfile};

/// Engine-dispatched data profiler, handed out by the owning adapter.
pub enum DataProfiler {
    MySql(MySqlDataProfiler),
    Postgres(PostgresDataProfiler),
}

impl DataProfiler {
    pub async fn profile_table(
        &self,
        table: &str,
        options: &ProfileOptions,
    ) -> DbResult<TableProfile> {
        match self {
            Self::MySql(p) => p.profile_table(table, options).await,
            Self::Postgres(p) => p.profile_table(table, options).await,
        }
    }
}

/// Counts of problematic string values, fed into scoring for text columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextChecks {
    pub empty_count: u64,
    pub whitespace_count: u64,
}

/// Score one column from its collected aggregates and record the issues on
/// the profile. Combines null rate, uniqueness, top-value dominance, and
/// type-specific checks (outliers for numerics, empty/whitespace strings
/// for text).
pub fn assess_column(
    profile: &mut ColumnProfile,
    text_checks: Option<TextChecks>,
    sampled_rows: u64,
) -> f64 {
    let mut score: f64 = 100.0;

    score -= profile.null_percentage * 0.4;
    if profile.null_percentage > 50.0 {
        profile
            .data_quality_issues
            .push(format!("{:.1}% of values are null", profile.null_percentage));
    }

    if sampled_rows > 1 && profile.unique_count <= 1 && profile.null_count < sampled_rows {
        score -= 10.0;
        profile
            .data_quality_issues
            .push("column holds a single constant value".to_string());
    }

    if let Some(top) = profile.top_values.as_ref().and_then(|t| t.first()) {
        if top.percentage > 90.0 && profile.unique_count > 1 {
            score -= 10.0;
            profile.data_quality_issues.push(format!(
                "top value accounts for {:.1}% of rows",
                top.percentage
            ));
        }
    }

    if let Some(outliers) = &profile.outliers {
        if !outliers.is_empty() {
            score -= (outliers.len() as f64).min(10.0);
            profile
                .data_quality_issues
                .push(format!("{} outlier candidates beyond 3 sigma", outliers.len()));
        }
    }

    if let Some(checks) = text_checks {
        if checks.empty_count > 0 {
            score -= 5.0;
            profile
                .data_quality_issues
                .push(format!("{} empty string values", checks.empty_count));
        }
        if checks.whitespace_count > 0 {
            score -= 5.0;
            profile.data_quality_issues.push(format!(
                "{} values with leading or trailing whitespace",
                checks.whitespace_count
            ));
        }
    }

    score.clamp(0.0, 100.0)
}

/// Column names that legitimately carry few distinct values.
fn looks_like_status_column(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["status", "type", "kind", "state", "flag", "enabled", "active", "deleted"]
        .iter()
        .any(|s| lower.contains(s))
}

/// Fold column scores into the table-level quality summary with
/// heuristic recommendations.
pub fn table_quality(
    columns: &[ColumnProfile],
    column_scores: &[f64],
    estimated_size_bytes: Option<u64>,
) -> DataQuality {
    let overall_score = if column_scores.is_empty() {
        100.0
    } else {
        column_scores.iter().sum::<f64>() / column_scores.len() as f64
    };

    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    for column in columns {
        for issue in &column.data_quality_issues {
            issues.push(format!("{}: {}", column.column_name, issue));
        }
    }

    let high_null: Vec<&str> = columns
        .iter()
        .filter(|c| c.null_percentage > 30.0)
        .map(|c| c.column_name.as_str())
        .collect();
    if !high_null.is_empty() {
        recommendations.push(format!(
            "Review data collection for high-null columns: {}",
            high_null.join(", ")
        ));
    }

    let low_unique: Vec<&str> = columns
        .iter()
        .filter(|c| {
            c.unique_percentage < 1.0
                && c.unique_count > 1
                && !looks_like_status_column(&c.column_name)
        })
        .map(|c| c.column_name.as_str())
        .collect();
    if !low_unique.is_empty() {
        recommendations.push(format!(
            "Low-cardinality columns may benefit from indexing or normalization: {}",
            low_unique.join(", ")
        ));
    }

    if overall_score < 70.0 {
        recommendations
            .push("Overall quality is low; schedule a data cleaning pass".to_string());
    }

    if estimated_size_bytes.unwrap_or(0) > 1024 * 1024 * 1024 {
        recommendations.push(
            "Table exceeds 1 GiB; consider partitioning or pruning unused indexes".to_string(),
        );
    }

    DataQuality {
        overall_score,
        issues,
        recommendations,
    }
}

/// Quote an identifier with backticks (MySQL).
pub(crate) fn quote_mysql(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote an identifier with double quotes (PostgreSQL).
pub(crate) fn quote_pg(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TopValue;

    fn base_profile(name: &str, data_type: &str) -> ColumnProfile {
        ColumnProfile::new(name, data_type)
    }

    #[test]
    fn test_clean_column_scores_high() {
        let mut p = base_profile("id", "integer").with_counts(0, 100, 100);
        let score = assess_column(&mut p, None, 100);
        assert!((score - 100.0).abs() < f64::EPSILON);
        assert!(p.data_quality_issues.is_empty());
    }

    #[test]
    fn test_null_heavy_column_penalized() {
        let mut p = base_profile("email", "string").with_counts(60, 30, 100);
        let score = assess_column(&mut p, None, 100);
        assert!(score < 80.0);
        assert!(p
            .data_quality_issues
            .iter()
            .any(|i| i.contains("null")));
    }

    #[test]
    fn test_dominant_top_value_penalized() {
        let mut p = base_profile("country", "string").with_counts(0, 3, 1000);
        p.top_values = Some(vec![TopValue {
            value: serde_json::json!("US"),
            count: 950,
            percentage: 95.0,
        }]);
        let score = assess_column(&mut p, None, 1000);
        assert!(score <= 90.0);
        assert!(p
            .data_quality_issues
            .iter()
            .any(|i| i.contains("top value")));
    }

    #[test]
    fn test_text_checks_penalize() {
        let mut p = base_profile("name", "string").with_counts(0, 80, 100);
        let score = assess_column(
            &mut p,
            Some(TextChecks {
                empty_count: 4,
                whitespace_count: 2,
            }),
            100,
        );
        assert!((score - 90.0).abs() < f64::EPSILON);
        assert_eq!(p.data_quality_issues.len(), 2);
    }

    #[test]
    fn test_outliers_penalize_capped() {
        let mut p = base_profile("amount", "decimal").with_counts(0, 90, 100);
        p.outliers = Some(vec![1e9; 10]);
        let score = assess_column(&mut p, None, 100);
        assert!((score - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_table_quality_mean_and_recommendations() {
        let mut c1 = base_profile("a", "integer").with_counts(40, 60, 100);
        c1.data_quality_issues.push("noisy".to_string());
        let c2 = base_profile("b", "string").with_counts(0, 100, 100);

        let quality = table_quality(&[c1, c2], &[60.0, 100.0], Some(2 * 1024 * 1024 * 1024));
        assert!((quality.overall_score - 80.0).abs() < f64::EPSILON);
        assert!(quality.issues.iter().any(|i| i.starts_with("a:")));
        assert!(quality
            .recommendations
            .iter()
            .any(|r| r.contains("high-null")));
        assert!(quality
            .recommendations
            .iter()
            .any(|r| r.contains("partitioning")));
    }

    #[test]
    fn test_status_columns_not_flagged_for_low_cardinality() {
        let status = base_profile("order_status", "string").with_counts(0, 4, 10_000);
        let quality = table_quality(&[status], &[95.0], None);
        assert!(!quality
            .recommendations
            .iter()
            .any(|r| r.contains("normalization")));
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_mysql("users"), "`users`");
        assert_eq!(quote_mysql("we`ird"), "`we``ird`");
        assert_eq!(quote_pg("users"), "\"users\"");
    }
}
