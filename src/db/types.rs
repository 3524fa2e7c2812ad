//! Cross-engine type normalization and row decoding.
//!
//! Every native driver type is mapped into a small shared category
//! vocabulary; result fields carry the category so callers discriminate on
//! the tag instead of engine-specific names. Decoders turn driver rows into
//! JSON maps keyed by column name, in SELECT order.

use crate::models::{DatabaseType, FieldInfo, QueryParam, SqlRow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Database, Decode, Encode, Row, Type, TypeInfo, ValueRef};

/// Normalized column category shared by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    String,
    Text,
    Binary,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
    Geometry,
    Null,
}

impl TypeCategory {
    /// Canonical lowercase tag used in field metadata and column info.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
            Self::Geometry => "geometry",
            Self::Null => "null",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Decimal)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String | Self::Text)
    }
}

impl std::fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalize a native type name into the shared category.
///
/// Accepts both catalog names (`varchar(255)`, `tinyint(1)`) and driver
/// type-info names (`VARCHAR`, `INT8`), so the same map serves the schema
/// analyzers and the row decoders.
pub fn normalize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();
    let base = lower
        .split('(')
        .next()
        .unwrap_or(&lower)
        .trim()
        .trim_end_matches(" unsigned")
        .to_string();

    match db {
        DatabaseType::MySql => normalize_mysql(&base),
        DatabaseType::Postgres => normalize_postgres(&base),
    }
}

fn normalize_mysql(base: &str) -> TypeCategory {
    match base {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
            TypeCategory::Integer
        }
        "decimal" | "numeric" => TypeCategory::Decimal,
        "float" | "double" | "real" => TypeCategory::Float,
        "bool" | "boolean" => TypeCategory::Boolean,
        "varchar" | "char" | "enum" | "set" => TypeCategory::String,
        "text" | "tinytext" | "mediumtext" | "longtext" => TypeCategory::Text,
        "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" | "bit" => {
            TypeCategory::Binary
        }
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "datetime" => TypeCategory::DateTime,
        "timestamp" => TypeCategory::Timestamp,
        "json" => TypeCategory::Json,
        "geometry" | "point" | "linestring" | "polygon" | "multipoint" | "multilinestring"
        | "multipolygon" | "geometrycollection" => TypeCategory::Geometry,
        _ => TypeCategory::String,
    }
}

fn normalize_postgres(base: &str) -> TypeCategory {
    match base {
        "smallint" | "int2" | "integer" | "int" | "int4" | "bigint" | "int8" | "smallserial"
        | "serial" | "bigserial" | "oid" => TypeCategory::Integer,
        "numeric" | "decimal" | "money" => TypeCategory::Decimal,
        "real" | "float4" | "double precision" | "float8" => TypeCategory::Float,
        "bool" | "boolean" => TypeCategory::Boolean,
        "character varying" | "varchar" | "character" | "char" | "bpchar" | "name" | "uuid"
        | "inet" | "cidr" | "macaddr" => TypeCategory::String,
        "text" | "citext" | "xml" => TypeCategory::Text,
        "bytea" => TypeCategory::Binary,
        "date" => TypeCategory::Date,
        "time" | "time without time zone" | "time with time zone" | "timetz" => TypeCategory::Time,
        "timestamp" | "timestamp without time zone" => TypeCategory::Timestamp,
        "timestamp with time zone" | "timestamptz" => TypeCategory::Timestamp,
        "json" | "jsonb" => TypeCategory::Json,
        "geometry" | "geography" | "point" | "line" | "lseg" | "box" | "path" | "polygon"
        | "circle" => TypeCategory::Geometry,
        "interval" => TypeCategory::String,
        _ => TypeCategory::String,
    }
}

/// Wrapper decoding DECIMAL/NUMERIC columns as their exact string form.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

fn binary_to_json(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn f64_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Field metadata for a MySQL row, types normalized. `nullable` reports
/// whether this row's value is NULL; drivers don't expose declared
/// nullability on result columns.
pub fn mysql_fields(row: &MySqlRow) -> Vec<FieldInfo> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = normalize_type(col.type_info().name(), DatabaseType::MySql);
            let is_null = row
                .try_get_raw(idx)
                .map(|value| value.is_null())
                .unwrap_or(true);
            FieldInfo::new(col.name(), category.as_str(), is_null)
        })
        .collect()
}

/// Field metadata for a PostgreSQL row, types normalized. Same nullability
/// convention as [`mysql_fields`].
pub fn postgres_fields(row: &PgRow) -> Vec<FieldInfo> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = normalize_type(col.type_info().name(), DatabaseType::Postgres);
            let is_null = row
                .try_get_raw(idx)
                .map(|value| value.is_null())
                .unwrap_or(true);
            FieldInfo::new(col.name(), category.as_str(), is_null)
        })
        .collect()
}

/// Bind positional parameters onto a query, one engine-agnostic path for
/// both adapters.
pub fn bind_params<'q, DB>(
    mut query: sqlx::query::Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &'q [QueryParam],
) -> sqlx::query::Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    for param in params {
        query = match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Decode a MySQL row into a JSON map, columns in SELECT order.
pub fn mysql_row_to_json(row: &MySqlRow) -> SqlRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = normalize_type(col.type_info().name(), DatabaseType::MySql);
            (col.name().to_string(), mysql_decode(row, idx, category))
        })
        .collect()
}

/// Decode a PostgreSQL row into a JSON map, columns in SELECT order.
pub fn postgres_row_to_json(row: &PgRow) -> SqlRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = normalize_type(col.type_info().name(), DatabaseType::Postgres);
            (col.name().to_string(), postgres_decode(row, idx, category))
        })
        .collect()
}

fn mysql_decode(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Integer => {
            // MySQL 8 reports unsigned BIGINT columns as u64; try signed
            // widths first, then unsigned.
            if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            JsonValue::Null
        }
        TypeCategory::Float => {
            if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                return f64_to_json(v);
            }
            if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
                return f64_to_json(v as f64);
            }
            JsonValue::Null
        }
        TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            _ => JsonValue::Null,
        },
        TypeCategory::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null),
        TypeCategory::Binary | TypeCategory::Geometry => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_to_json(&v))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Json => row
            .try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null),
        TypeCategory::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|d| JsonValue::String(d.to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Time => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .ok()
            .flatten()
            .map(|t| JsonValue::String(t.to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::DateTime | TypeCategory::Timestamp => {
            if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
                return JsonValue::String(v.to_rfc3339());
            }
            if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
                return JsonValue::String(v.to_string());
            }
            JsonValue::Null
        }
        TypeCategory::String | TypeCategory::Text | TypeCategory::Null => {
            // MySQL may hand back VARBINARY for text depending on the
            // connection charset; fall back to lossy UTF-8.
            if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
                return JsonValue::String(v);
            }
            if let Ok(Some(bytes)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
                return JsonValue::String(String::from_utf8_lossy(&bytes).into_owned());
            }
            JsonValue::Null
        }
    }
}

fn postgres_decode(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Integer => {
            if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            // oid and friends
            if let Ok(Some(v)) = row.try_get::<Option<Oid>, _>(idx) {
                return JsonValue::Number(v.0.into());
            }
            JsonValue::Null
        }
        TypeCategory::Float => {
            if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
                return f64_to_json(v);
            }
            if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
                return f64_to_json(v as f64);
            }
            JsonValue::Null
        }
        TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            _ => JsonValue::Null,
        },
        TypeCategory::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null),
        TypeCategory::Binary | TypeCategory::Geometry => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_to_json(&v))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Json => row
            .try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null),
        TypeCategory::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|d| JsonValue::String(d.to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::Time => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .ok()
            .flatten()
            .map(|t| JsonValue::String(t.to_string()))
            .unwrap_or(JsonValue::Null),
        TypeCategory::DateTime | TypeCategory::Timestamp => {
            if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
                return JsonValue::String(v.to_rfc3339());
            }
            if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
                return JsonValue::String(v.to_string());
            }
            JsonValue::Null
        }
        TypeCategory::String | TypeCategory::Text | TypeCategory::Null => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    }
}
