//! Row to JSON conversion.
//!
//! Decoding is two-phase:
//! 1. `TypeCategory` classifies a column type name into a logical category.
//! 2. A backend-specific decoder extracts the value for that category.
//!
//! Values that cannot be decoded become JSON `null` and are logged at `debug`;
//! a single odd column never fails a whole statement.

use crate::models::{DatabaseType, JsonRow};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Checked first: "numeric" would otherwise never be reached
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    let integer_like =
        lower.contains("int") && !lower.starts_with("interval") && !lower.contains("point");
    if integer_like || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    match lower.as_str() {
        "timestamptz" | "timestamp with time zone" => TypeCategory::TimestampTz,
        "timestamp" | "timestamp without time zone" | "datetime" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" | "time without time zone" => TypeCategory::Time,
        "text" | "varchar" | "char" | "bpchar" | "name" | "citext" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

/// Raw NUMERIC value kept in its textual form, so precision is never lost.
#[derive(Debug)]
pub struct RawDecimal(pub String);

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

/// Binary values are always base64 encoded.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Conversion of a backend row into a JSON object.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
    fn column_names(&self) -> Vec<String>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        let mut map = JsonRow::new();
        for (idx, column) in self.columns().iter().enumerate() {
            let category = categorize_type(column.type_info().name(), DatabaseType::PostgreSQL);
            map.insert(
                column.name().to_string(),
                postgres::decode_column(self, idx, category),
            );
        }
        map
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> JsonRow {
        let mut map = JsonRow::new();
        for (idx, column) in self.columns().iter().enumerate() {
            let declared = column.type_info().name().to_string();
            map.insert(
                column.name().to_string(),
                sqlite::decode_column(self, idx, &declared),
            );
        }
        map
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => get::<RawDecimal>(row, idx).map_or(JsonValue::Null, |v| {
                JsonValue::String(v.0)
            }),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<bool>(row, idx).map_or(JsonValue::Null, JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => {
                get::<Vec<u8>>(row, idx).map_or(JsonValue::Null, |v| encode_binary(&v))
            }
            TypeCategory::Json => get::<JsonValue>(row, idx).unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => get::<uuid::Uuid>(row, idx)
                .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
            TypeCategory::TimestampTz => get::<DateTime<Utc>>(row, idx)
                .map_or(JsonValue::Null, |v| JsonValue::String(v.to_rfc3339())),
            TypeCategory::Timestamp => get::<NaiveDateTime>(row, idx)
                .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
            TypeCategory::Date => get::<NaiveDate>(row, idx)
                .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
            TypeCategory::Time => get::<NaiveTime>(row, idx)
                .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
            TypeCategory::Text | TypeCategory::Unknown => {
                get::<String>(row, idx).map_or(JsonValue::Null, JsonValue::String)
            }
        }
    }

    fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(column = idx, error = %e, "Column decoded as null");
                None
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
        }
        get::<i16>(row, idx).map_or(JsonValue::Null, |v| JsonValue::Number(v.into()))
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map_or(JsonValue::Null, float_value);
        }
        get::<f32>(row, idx).map_or(JsonValue::Null, |v| float_value(v as f64))
    }
}

mod sqlite {
    use super::*;

    /// SQLite is dynamically typed: decode by the value's storage class, using the
    /// declared column type only as a hint for booleans and JSON text.
    pub fn decode_column(row: &SqliteRow, idx: usize, declared: &str) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_uppercase(),
            Err(e) => {
                tracing::debug!(column = idx, error = %e, "Column decoded as null");
                return JsonValue::Null;
            }
        };
        let hint = categorize_type(declared, DatabaseType::SQLite);

        match storage.as_str() {
            "INTEGER" | "BOOLEAN" if hint == TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map_or(JsonValue::Null, JsonValue::Bool),
            "INTEGER" | "BOOLEAN" => row
                .try_get::<i64, _>(idx)
                .map_or(JsonValue::Null, |v| JsonValue::Number(v.into())),
            "REAL" | "NUMERIC" => row
                .try_get::<f64, _>(idx)
                .map_or(JsonValue::Null, float_value),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map_or(JsonValue::Null, |v| encode_binary(&v)),
            _ => match row.try_get::<String, _>(idx) {
                Ok(text) if hint == TypeCategory::Json => {
                    serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
                }
                Ok(text) => JsonValue::String(text),
                Err(_) => row
                    .try_get::<Vec<u8>, _>(idx)
                    .map_or(JsonValue::Null, |v| encode_binary(&v)),
            },
        }
    }
}
