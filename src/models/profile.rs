//! Data-profiling models.
//!
//! Per-column statistics and per-table quality summaries produced by the
//! adapter profilers. Scores are clamped ratios; value payloads (min/max/
//! top values) come straight from aggregate queries, never from raw row
//! dumps.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Statistical and quality profile of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableProfile {
    pub table_name: String,
    pub total_rows: u64,
    pub total_columns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_size_bytes: Option<u64>,
    pub columns: Vec<ColumnProfile>,
    pub data_quality: DataQuality,
    pub relationships: TableRelationships,
    pub sampling: SamplingInfo,
}

/// Statistics for a single column over the profiled sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub column_name: String,
    pub data_type: String,
    pub null_count: u64,
    /// 0..=100
    pub null_percentage: f64,
    pub unique_count: u64,
    /// 0..=100
    pub unique_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_values: Option<Vec<TopValue>>,
    /// Range label → count, for numeric columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<serde_json::Map<String, JsonValue>>,
    /// Pattern class → matching count (email, phone, url, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<serde_json::Map<String, JsonValue>>,
    /// Values beyond mean ± 3σ, capped at 10.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outliers: Option<Vec<f64>>,
    pub data_quality_issues: Vec<String>,
    /// Engine-specific extras, e.g. ENUM members on MySQL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_specific: Option<JsonValue>,
}

impl ColumnProfile {
    pub fn new(column_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            data_type: data_type.into(),
            null_count: 0,
            null_percentage: 0.0,
            unique_count: 0,
            unique_percentage: 0.0,
            min_value: None,
            max_value: None,
            avg_value: None,
            median_value: None,
            mode: None,
            stddev: None,
            variance: None,
            top_values: None,
            distribution: None,
            patterns: None,
            outliers: None,
            data_quality_issues: Vec::new(),
            adapter_specific: None,
        }
    }

    /// Set null/unique counts and derive the percentages from the sample size.
    pub fn with_counts(mut self, null_count: u64, unique_count: u64, sampled_rows: u64) -> Self {
        self.null_count = null_count;
        self.unique_count = unique_count;
        if sampled_rows > 0 {
            self.null_percentage = null_count as f64 / sampled_rows as f64 * 100.0;
            self.unique_percentage = unique_count as f64 / sampled_rows as f64 * 100.0;
        }
        self
    }
}

/// One entry of a column's top-K frequency table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopValue {
    pub value: JsonValue,
    pub count: u64,
    /// Share of the sampled rows, 0..=100
    pub percentage: f64,
}

/// Aggregated quality assessment for a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuality {
    /// 0..=100, mean of the column scores
    pub overall_score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// FK neighborhood of the profiled table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRelationships {
    /// Tables this table references
    pub parent_tables: Vec<String>,
    /// Tables referencing this table
    pub child_tables: Vec<String>,
}

/// How the profiled sample was drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingInfo {
    /// "full" or "random"
    pub method: String,
    pub sample_size: u64,
    /// 0..=100
    pub confidence: f64,
}

impl SamplingInfo {
    /// Full scan when the table fits the cap, otherwise a random sample
    /// with confidence proportional to coverage (capped at 95).
    pub fn for_table(total_rows: u64, max_sample_rows: u64) -> Self {
        if total_rows <= max_sample_rows {
            Self {
                method: "full".to_string(),
                sample_size: total_rows,
                confidence: 100.0,
            }
        } else {
            let confidence = (max_sample_rows as f64 / total_rows as f64 * 100.0).min(95.0);
            Self {
                method: "random".to_string(),
                sample_size: max_sample_rows,
                confidence,
            }
        }
    }
}

/// Profiler tuning knobs.
#[derive(Debug, Clone)]
pub struct ProfileOptions {
    /// Tables larger than this are sampled randomly.
    pub max_sample_rows: u64,
    /// Frequency table depth.
    pub top_k: usize,
    /// Number of buckets in numeric distributions.
    pub distribution_buckets: u32,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            max_sample_rows: 10_000,
            top_k: 10,
            distribution_buckets: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_full_when_under_cap() {
        let s = SamplingInfo::for_table(500, 10_000);
        assert_eq!(s.method, "full");
        assert_eq!(s.sample_size, 500);
        assert!((s.confidence - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sampling_random_confidence_capped() {
        let s = SamplingInfo::for_table(20_000, 10_000);
        assert_eq!(s.method, "random");
        assert_eq!(s.sample_size, 10_000);
        assert!((s.confidence - 50.0).abs() < 1e-9);

        // Coverage above 95% is still reported as 95.
        let s = SamplingInfo::for_table(10_001, 10_000);
        assert!((s.confidence - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_column_profile_percentages() {
        let profile = ColumnProfile::new("email", "string").with_counts(25, 90, 100);
        assert!((profile.null_percentage - 25.0).abs() < f64::EPSILON);
        assert!((profile.unique_percentage - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_column_profile_zero_rows() {
        let profile = ColumnProfile::new("c", "integer").with_counts(0, 0, 0);
        assert!((profile.null_percentage - 0.0).abs() < f64::EPSILON);
    }
}
