//! Avro interchange schema and native column-type translation
//!
//! Catalog entries carry an inline Avro record schema per canonical name.
//! Every field must translate to exactly one native column type; there is
//! no fallback to an untyped column. Nullable unions `[null, T]` translate
//! to T's type with sign and width preserved - the dtype itself cannot
//! advertise nullability for fixed-width integers, a known limitation
//! inherited from the schema model.

use std::fmt;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// An Avro record schema as found inline in catalog `data_schema` metadata.
///
/// Field types are kept as raw JSON values so unions, logical types and
/// vendor extensions (the `unsigned` marker) survive a round-trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvroSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub fields: Vec<AvroField>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvroField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AvroSchema {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn field(&self, name: &str) -> Option<&AvroField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The closed set of native column types a schema field may translate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int32,
    Int64,
    UInt32,
    Float32,
    Float64,
    Bool,
    Utf8,
    TimestampMillis,
    TimestampMicros,
}

impl ColumnType {
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Int32 => DataType::Int32,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::UInt32 => DataType::UInt32,
            ColumnType::Float32 => DataType::Float32,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Bool => DataType::Boolean,
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::TimestampMillis => DataType::Timestamp(TimeUnit::Millisecond, None),
            ColumnType::TimestampMicros => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::UInt32 => "uint32",
            ColumnType::Float32 => "float32",
            ColumnType::Float64 => "float64",
            ColumnType::Bool => "bool",
            ColumnType::Utf8 => "object",
            ColumnType::TimestampMillis => "datetime64[ms]",
            ColumnType::TimestampMicros => "datetime64[us]",
        };
        f.write_str(s)
    }
}

/// Ordered field-name to column-type mapping derived from an [`AvroSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTypes(Vec<(String, ColumnType)>);

impl ColumnTypes {
    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.0.iter().map(|(n, t)| (n.as_str(), *t))
    }

    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Arrow schema with every field nullable, used to enforce one schema
    /// across all storage modes of a dataset.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.0
                .iter()
                .map(|(name, ct)| Field::new(name, ct.arrow_type(), true))
                .collect::<Vec<_>>(),
        ))
    }

    /// Display-string form (`{"userid": "int64", ...}`) for metadata.
    pub fn display_map(&self) -> serde_json::Map<String, Value> {
        self.0
            .iter()
            .map(|(name, ct)| (name.clone(), Value::String(ct.to_string())))
            .collect()
    }
}

/// Translate an Avro schema into native column types.
///
/// Each field type is flattened to a sorted tuple of type tags and looked
/// up in a fixed table. A miss with a `null` member drops the `null` and
/// retries; a second miss fails with [`Error::UnsupportedAvroType`].
pub fn to_column_types(schema: &AvroSchema) -> Result<ColumnTypes> {
    let mut out = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let mut tags = flatten_tags(&field.field_type);
        tags.sort();
        let ct = match lookup(&tags) {
            Some(ct) => ct,
            None => tags
                .iter()
                .position(|t| t == "null")
                .and_then(|pos| {
                    let mut retry = tags.clone();
                    retry.remove(pos);
                    lookup(&retry)
                })
                .ok_or_else(|| Error::UnsupportedAvroType {
                    field: field.name.clone(),
                    tags: tags.clone(),
                })?,
        };
        out.push((field.name.clone(), ct));
    }
    Ok(ColumnTypes(out))
}

/// Flatten a field type into its constituent tags: a bare string becomes a
/// single tag, arrays flatten recursively, mappings contribute their keys
/// and flattened values.
fn flatten_tags(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Number(n) => vec![n.to_string()],
        Value::Null => vec!["null".to_string()],
        Value::Array(items) => items.iter().flat_map(flatten_tags).collect(),
        Value::Object(map) => map
            .iter()
            .flat_map(|(k, v)| {
                let mut tags = vec![k.clone()];
                tags.extend(flatten_tags(v));
                tags
            })
            .collect(),
    }
}

// Tag tuples are pre-sorted, so composite keys appear in alphabetical order.
fn lookup(tags: &[String]) -> Option<ColumnType> {
    let key: Vec<&str> = tags.iter().map(String::as_str).collect();
    match key.as_slice() {
        ["long"] => Some(ColumnType::Int64),
        ["int"] => Some(ColumnType::Int32),
        ["float"] => Some(ColumnType::Float32),
        ["double"] => Some(ColumnType::Float64),
        ["boolean"] => Some(ColumnType::Bool),
        ["string"] => Some(ColumnType::Utf8),
        ["logicalType", "long", "timestamp-millis", "type"] => Some(ColumnType::TimestampMillis),
        ["logicalType", "long", "timestamp-micros", "type"] => Some(ColumnType::TimestampMicros),
        ["int", "true", "type", "unsigned"] => Some(ColumnType::UInt32),
        ["long", "true", "type", "unsigned"] => Some(ColumnType::Int64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_with(field_type: Value) -> AvroSchema {
        serde_json::from_value(json!({
            "name": "t",
            "type": "record",
            "fields": [{"name": "f", "type": field_type}],
        }))
        .unwrap()
    }

    fn translate_one(field_type: Value) -> Result<ColumnType> {
        to_column_types(&schema_with(field_type)).map(|ct| ct.get("f").unwrap())
    }

    #[test]
    fn primitive_tags() {
        assert_eq!(translate_one(json!("long")).unwrap(), ColumnType::Int64);
        assert_eq!(translate_one(json!("int")).unwrap(), ColumnType::Int32);
        assert_eq!(translate_one(json!("float")).unwrap(), ColumnType::Float32);
        assert_eq!(translate_one(json!("double")).unwrap(), ColumnType::Float64);
        assert_eq!(translate_one(json!("boolean")).unwrap(), ColumnType::Bool);
        assert_eq!(translate_one(json!("string")).unwrap(), ColumnType::Utf8);
    }

    #[test]
    fn logical_timestamps() {
        assert_eq!(
            translate_one(json!({"type": "long", "logicalType": "timestamp-millis"})).unwrap(),
            ColumnType::TimestampMillis
        );
        assert_eq!(
            translate_one(json!({"type": "long", "logicalType": "timestamp-micros"})).unwrap(),
            ColumnType::TimestampMicros
        );
    }

    #[test]
    fn unsigned_variants() {
        assert_eq!(
            translate_one(json!({"type": "int", "unsigned": true})).unwrap(),
            ColumnType::UInt32
        );
        assert_eq!(
            translate_one(json!({"type": "long", "unsigned": true})).unwrap(),
            ColumnType::Int64
        );
    }

    #[test]
    fn nullable_union_matches_bare_type() {
        assert_eq!(
            translate_one(json!(["null", "int"])).unwrap(),
            translate_one(json!("int")).unwrap()
        );
        // width preserved for nullable longs
        assert_eq!(
            translate_one(json!(["null", "long"])).unwrap(),
            ColumnType::Int64
        );
        assert_eq!(
            translate_one(json!(["null", {"type": "long", "logicalType": "timestamp-millis"}]))
                .unwrap(),
            ColumnType::TimestampMillis
        );
    }

    #[test]
    fn unsupported_tag_tuple_fails_with_field_and_tags() {
        let err = translate_one(json!("bytes")).unwrap_err();
        match err {
            Error::UnsupportedAvroType { field, tags } => {
                assert_eq!(field, "f");
                assert_eq!(tags, vec!["bytes".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(translate_one(json!(["null", "bytes"])).is_err());
    }

    #[test]
    fn translation_is_deterministic_and_ordered() {
        let schema: AvroSchema = serde_json::from_value(json!({
            "name": "user_events",
            "type": "record",
            "fields": [
                {"name": "userid", "type": "long"},
                {"name": "home_id", "type": "int"},
                {"name": "action", "type": "string"},
                {"name": "timestamp", "type": {"type": "long", "logicalType": "timestamp-millis"}},
            ],
        }))
        .unwrap();
        let a = to_column_types(&schema).unwrap();
        let b = to_column_types(&schema).unwrap();
        assert_eq!(a, b);
        let names: Vec<&str> = a.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["userid", "home_id", "action", "timestamp"]);
        assert_eq!(
            a.display_map().get("timestamp"),
            Some(&json!("datetime64[ms]"))
        );
    }

    #[test]
    fn schema_json_round_trip_keeps_extra_keys() {
        let text = r#"{"name":"t","type":"record","namespace":"entity.user","fields":[{"name":"f","type":"long","doc":"d"}]}"#;
        let schema = AvroSchema::from_json(text).unwrap();
        assert_eq!(schema.extra.get("namespace"), Some(&json!("entity.user")));
        let round = AvroSchema::from_json(&schema.to_json().unwrap()).unwrap();
        assert_eq!(schema, round);
    }
}
