//! Record-batch to Avro wire translation
//!
//! Rows travel to the online store as a base64-encoded Avro object
//! container, and come back either in the same form (`avro_rows`) or as
//! plain JSON row objects (`data`). Both directions are driven by the
//! dataset's interchange schema so every column lands with the same type
//! it has in every other storage mode.

use std::sync::Arc;

use apache_avro::types::Value as AvroValue;
use apache_avro::{Reader, Writer};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    RecordBatch, StringArray, TimestampMicrosecondArray, TimestampMillisecondArray, UInt32Array,
};
use arrow_schema::SchemaRef;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::NaiveDateTime;
use dal::schema::{AvroSchema, ColumnType, ColumnTypes};
use dal::{Error, Result};
use serde_json::Value;

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// How a field's values must be wrapped for its Avro schema.
#[derive(Debug, Clone, Copy)]
enum FieldWrap {
    Plain,
    Nullable { null_index: u32, value_index: u32 },
}

/// Encoder/decoder for one dataset, pairing the parsed Avro schema with
/// the translated column types.
pub struct AvroCodec {
    avro: apache_avro::Schema,
    arrow: SchemaRef,
    columns: Vec<(String, ColumnType, FieldWrap)>,
}

impl AvroCodec {
    pub fn new(schema: &AvroSchema, column_types: &ColumnTypes) -> Result<Self> {
        let avro = apache_avro::Schema::parse_str(&schema.to_json()?)
            .map_err(|e| Error::AvroSerde(e.to_string()))?;
        let wraps = field_wraps(&avro)?;
        let columns = column_types
            .iter()
            .map(|(name, ct)| {
                let wrap = wraps
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, w)| *w)
                    .unwrap_or(FieldWrap::Plain);
                (name.to_string(), ct, wrap)
            })
            .collect();
        Ok(AvroCodec {
            avro,
            arrow: column_types.arrow_schema(),
            columns,
        })
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        self.arrow.clone()
    }

    /// Serialize rows into a base64 Avro object container.
    pub fn encode_base64(&self, rows: &RecordBatch) -> Result<String> {
        let mut writer = Writer::new(&self.avro, Vec::new());
        for row in 0..rows.num_rows() {
            let mut record = Vec::with_capacity(self.columns.len());
            for (name, ct, wrap) in &self.columns {
                let index = rows.schema().index_of(name)?;
                let cell = cell_from_arrow(*ct, rows.column(index), row, name)?;
                record.push((name.clone(), wrap_cell(cell, *wrap)));
            }
            writer
                .append(AvroValue::Record(record))
                .map_err(|e| Error::AvroSerde(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::AvroSerde(e.to_string()))?;
        Ok(BASE64.encode(bytes))
    }

    /// Deserialize a base64 Avro object container into a record batch.
    pub fn decode_base64(&self, blob: &str) -> Result<RecordBatch> {
        let bytes = BASE64
            .decode(blob)
            .map_err(|e| Error::AvroSerde(e.to_string()))?;
        let reader = Reader::new(&bytes[..]).map_err(|e| Error::AvroSerde(e.to_string()))?;
        let mut records = Vec::new();
        for value in reader {
            let value = value.map_err(|e| Error::AvroSerde(e.to_string()))?;
            match value {
                AvroValue::Record(fields) => records.push(fields),
                other => {
                    return Err(Error::AvroSerde(format!(
                        "expected a record, got {other:?}"
                    )));
                }
            }
        }

        let mut arrays = Vec::with_capacity(self.columns.len());
        for (name, ct, _) in &self.columns {
            let cells: Vec<Option<&AvroValue>> = records
                .iter()
                .map(|record| {
                    record
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| unwrap_union(v))
                        .filter(|v| !matches!(v, AvroValue::Null))
                })
                .collect();
            arrays.push(avro_cells_to_array(*ct, name, &cells)?);
        }
        Ok(RecordBatch::try_new(self.arrow.clone(), arrays)?)
    }

    /// Build a record batch from JSON row objects, one object per row.
    /// Missing keys and empty objects become nulls, so a server response
    /// with gaps still yields one row per requested key.
    pub fn rows_from_json(&self, rows: &[Value]) -> Result<RecordBatch> {
        let mut arrays = Vec::with_capacity(self.columns.len());
        for (name, ct, _) in &self.columns {
            let cells: Vec<Option<&Value>> = rows
                .iter()
                .map(|row| row.get(name).filter(|v| !v.is_null()))
                .collect();
            arrays.push(json_cells_to_array(*ct, name, &cells)?);
        }
        Ok(RecordBatch::try_new(self.arrow.clone(), arrays)?)
    }
}

/// Union wrapping per field of the parsed record schema. Non-record
/// schemas are rejected upstream by the catalog loader.
fn field_wraps(schema: &apache_avro::Schema) -> Result<Vec<(String, FieldWrap)>> {
    let apache_avro::Schema::Record(record) = schema else {
        return Err(Error::AvroSerde(
            "interchange schema must be an Avro record".to_string(),
        ));
    };
    let mut wraps = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        let wrap = match &field.schema {
            apache_avro::Schema::Union(union) => {
                let variants = union.variants();
                let null_index = variants
                    .iter()
                    .position(|v| matches!(v, apache_avro::Schema::Null));
                let value_index = variants
                    .iter()
                    .position(|v| !matches!(v, apache_avro::Schema::Null));
                match (null_index, value_index) {
                    (Some(n), Some(v)) => FieldWrap::Nullable {
                        null_index: n as u32,
                        value_index: v as u32,
                    },
                    _ => FieldWrap::Plain,
                }
            }
            _ => FieldWrap::Plain,
        };
        wraps.push((field.name.clone(), wrap));
    }
    Ok(wraps)
}

fn wrap_cell(cell: Option<AvroValue>, wrap: FieldWrap) -> AvroValue {
    match (cell, wrap) {
        (Some(value), FieldWrap::Plain) => value,
        (None, FieldWrap::Plain) => AvroValue::Null,
        (Some(value), FieldWrap::Nullable { value_index, .. }) => {
            AvroValue::Union(value_index, Box::new(value))
        }
        (None, FieldWrap::Nullable { null_index, .. }) => {
            AvroValue::Union(null_index, Box::new(AvroValue::Null))
        }
    }
}

fn unwrap_union(value: &AvroValue) -> &AvroValue {
    match value {
        AvroValue::Union(_, inner) => unwrap_union(inner),
        other => other,
    }
}

fn downcast<'a, T: 'static>(column: &'a ArrayRef, name: &str) -> Result<&'a T> {
    column
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::AvroSerde(format!("column '{name}' has an unexpected array type")))
}

/// One cell of a record batch as an Avro value, None for nulls.
fn cell_from_arrow(
    ct: ColumnType,
    column: &ArrayRef,
    row: usize,
    name: &str,
) -> Result<Option<AvroValue>> {
    if column.is_null(row) {
        return Ok(None);
    }
    let value = match ct {
        ColumnType::Int32 => AvroValue::Int(downcast::<Int32Array>(column, name)?.value(row)),
        ColumnType::Int64 => AvroValue::Long(downcast::<Int64Array>(column, name)?.value(row)),
        // unsigned columns travel as their two's-complement bit pattern
        ColumnType::UInt32 => {
            AvroValue::Int(downcast::<UInt32Array>(column, name)?.value(row) as i32)
        }
        ColumnType::Float32 => AvroValue::Float(downcast::<Float32Array>(column, name)?.value(row)),
        ColumnType::Float64 => {
            AvroValue::Double(downcast::<Float64Array>(column, name)?.value(row))
        }
        ColumnType::Bool => AvroValue::Boolean(downcast::<BooleanArray>(column, name)?.value(row)),
        ColumnType::Utf8 => {
            AvroValue::String(downcast::<StringArray>(column, name)?.value(row).to_string())
        }
        ColumnType::TimestampMillis => AvroValue::TimestampMillis(
            downcast::<TimestampMillisecondArray>(column, name)?.value(row),
        ),
        ColumnType::TimestampMicros => AvroValue::TimestampMicros(
            downcast::<TimestampMicrosecondArray>(column, name)?.value(row),
        ),
    };
    Ok(Some(value))
}

fn avro_type_error(name: &str, value: &AvroValue) -> Error {
    Error::AvroSerde(format!("field '{name}' holds unexpected value {value:?}"))
}

fn avro_cells_to_array(
    ct: ColumnType,
    name: &str,
    cells: &[Option<&AvroValue>],
) -> Result<ArrayRef> {
    let array: ArrayRef = match ct {
        ColumnType::Int32 => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::Int(n) => Ok(*n),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(Int32Array::from(values))
        }
        ColumnType::Int64 => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::Long(n) => Ok(*n),
                AvroValue::Int(n) => Ok(*n as i64),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(Int64Array::from(values))
        }
        ColumnType::UInt32 => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::Int(n) => Ok(*n as u32),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(UInt32Array::from(values))
        }
        ColumnType::Float32 => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::Float(f) => Ok(*f),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(Float32Array::from(values))
        }
        ColumnType::Float64 => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::Double(d) => Ok(*d),
                AvroValue::Float(f) => Ok(*f as f64),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(Float64Array::from(values))
        }
        ColumnType::Bool => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::Boolean(b) => Ok(*b),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(BooleanArray::from(values))
        }
        ColumnType::Utf8 => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::String(s) => Ok(s.clone()),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(StringArray::from(values))
        }
        ColumnType::TimestampMillis => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::TimestampMillis(n) => Ok(*n),
                AvroValue::Long(n) => Ok(*n),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(TimestampMillisecondArray::from(values))
        }
        ColumnType::TimestampMicros => {
            let values = collect_cells(cells, |v| match v {
                AvroValue::TimestampMicros(n) => Ok(*n),
                AvroValue::Long(n) => Ok(*n),
                other => Err(avro_type_error(name, other)),
            })?;
            Arc::new(TimestampMicrosecondArray::from(values))
        }
    };
    Ok(array)
}

fn collect_cells<T, F>(cells: &[Option<&AvroValue>], extract: F) -> Result<Vec<Option<T>>>
where
    F: Fn(&AvroValue) -> Result<T>,
{
    cells
        .iter()
        .map(|cell| cell.map(|v| extract(v)).transpose())
        .collect()
}

fn json_type_error(name: &str, value: &Value) -> Error {
    Error::AvroSerde(format!("field '{name}' holds unexpected value {value}"))
}

fn json_cells_to_array(ct: ColumnType, name: &str, cells: &[Option<&Value>]) -> Result<ArrayRef> {
    let array: ArrayRef = match ct {
        ColumnType::Int32 => {
            let values = collect_json(cells, |v| {
                v.as_i64()
                    .map(|n| n as i32)
                    .ok_or_else(|| json_type_error(name, v))
            })?;
            Arc::new(Int32Array::from(values))
        }
        ColumnType::Int64 => {
            let values = collect_json(cells, |v| {
                v.as_i64().ok_or_else(|| json_type_error(name, v))
            })?;
            Arc::new(Int64Array::from(values))
        }
        ColumnType::UInt32 => {
            let values = collect_json(cells, |v| {
                v.as_u64()
                    .map(|n| n as u32)
                    .ok_or_else(|| json_type_error(name, v))
            })?;
            Arc::new(UInt32Array::from(values))
        }
        ColumnType::Float32 => {
            let values = collect_json(cells, |v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| json_type_error(name, v))
            })?;
            Arc::new(Float32Array::from(values))
        }
        ColumnType::Float64 => {
            let values = collect_json(cells, |v| {
                v.as_f64().ok_or_else(|| json_type_error(name, v))
            })?;
            Arc::new(Float64Array::from(values))
        }
        ColumnType::Bool => {
            let values = collect_json(cells, |v| {
                v.as_bool().ok_or_else(|| json_type_error(name, v))
            })?;
            Arc::new(BooleanArray::from(values))
        }
        ColumnType::Utf8 => {
            let values = collect_json(cells, |v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            })?;
            Arc::new(StringArray::from(values))
        }
        ColumnType::TimestampMillis => {
            let values =
                collect_json(cells, |v| parse_timestamp(v, name).map(|t| t.and_utc().timestamp_millis()))?;
            Arc::new(TimestampMillisecondArray::from(values))
        }
        ColumnType::TimestampMicros => {
            let values =
                collect_json(cells, |v| parse_timestamp(v, name).map(|t| t.and_utc().timestamp_micros()))?;
            Arc::new(TimestampMicrosecondArray::from(values))
        }
    };
    Ok(array)
}

fn collect_json<T, F>(cells: &[Option<&Value>], extract: F) -> Result<Vec<Option<T>>>
where
    F: Fn(&Value) -> Result<T>,
{
    cells
        .iter()
        .map(|cell| cell.map(|v| extract(v)).transpose())
        .collect()
}

/// Timestamps arrive either as raw epoch integers, as formatted strings,
/// or as `{"format": ..., "time": ...}` objects.
fn parse_timestamp(value: &Value, name: &str) -> Result<NaiveDateTime> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| json_type_error(name, value))?;
            chrono::DateTime::from_timestamp_millis(millis)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| json_type_error(name, value))
        }
        Value::String(s) => parse_time_str(s, DEFAULT_TIME_FORMAT, name),
        Value::Object(map) => {
            let time = map
                .get("time")
                .and_then(Value::as_str)
                .ok_or_else(|| json_type_error(name, value))?;
            // formats come from Python servers, where an optional fraction
            // is spelled ".%f" rather than "%.f"
            let format = map
                .get("format")
                .and_then(Value::as_str)
                .map(|f| f.replace(".%f", "%.f"))
                .unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string());
            parse_time_str(time, &format, name)
        }
        other => Err(json_type_error(name, other)),
    }
}

fn parse_time_str(text: &str, format: &str, name: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format).map_err(|e| {
        Error::AvroSerde(format!("field '{name}': cannot parse '{text}' as a timestamp: {e}"))
    })
}
