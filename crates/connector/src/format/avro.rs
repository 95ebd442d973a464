//! Avro binary datum encoding of a flat record.
//!
//! The writer schema is derived from the table: INTEGER is `long`, FLOAT64
//! is `double`, TIMESTAMP is `long` with the `timestamp-micros` logical
//! type, and nullable columns are `["null", T]` unions. Records carry no
//! container header or schema fingerprint.

use apache_avro::types::Value as AvroValue;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use bytes::Bytes;
use chrono::DateTime;
use ripple_core::{ColumnSchema, Row, SqlType, Value};
use serde_json::json;

use super::{check_nullability, encode_inserts, Decoder, EncodedBatch, Encoder, Format};
use crate::config::{ParamSpec, Params};
use crate::error::{ConfigError, ConnectorError, RecordError};

#[derive(Debug, Default)]
pub struct AvroFormat;

impl Format for AvroFormat {
    fn name(&self) -> &'static str {
        "avro"
    }

    fn params(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn is_binary(&self) -> bool {
        true
    }

    fn decoder(
        &self,
        schema: &[ColumnSchema],
        _params: &Params,
    ) -> Result<Box<dyn Decoder>, ConfigError> {
        Ok(Box::new(AvroDecoder {
            writer: writer_schema(schema)?,
            columns: schema.to_vec(),
        }))
    }

    fn encoder(
        &self,
        schema: &[ColumnSchema],
        _params: &Params,
    ) -> Result<Box<dyn Encoder>, ConfigError> {
        Ok(Box::new(AvroEncoder {
            writer: writer_schema(schema)?,
            columns: schema.to_vec(),
        }))
    }
}

fn schema_json(columns: &[ColumnSchema]) -> serde_json::Value {
    let fields: Vec<serde_json::Value> = columns
        .iter()
        .map(|c| {
            let ty = match c.ty {
                SqlType::Integer => json!("long"),
                SqlType::Float64 => json!("double"),
                SqlType::String => json!("string"),
                SqlType::Boolean => json!("boolean"),
                SqlType::Timestamp => json!({"type": "long", "logicalType": "timestamp-micros"}),
            };
            if c.nullable {
                json!({"name": c.name, "type": ["null", ty], "default": null})
            } else {
                json!({"name": c.name, "type": ty})
            }
        })
        .collect();
    json!({"type": "record", "name": "row", "fields": fields})
}

fn writer_schema(columns: &[ColumnSchema]) -> Result<Schema, ConfigError> {
    Schema::parse(&schema_json(columns))
        .map_err(|e| ConfigError::Unsupported(format!("avro schema for this relation: {e}")))
}

// ── Value mapping ─────────────────────────────────────────────

fn to_avro(column: &ColumnSchema, value: &Value) -> Result<AvroValue, ConnectorError> {
    if column.nullable {
        if value.is_null() {
            return Ok(AvroValue::Union(0, Box::new(AvroValue::Null)));
        }
        let inner = to_avro_inner(column, value)?;
        return Ok(AvroValue::Union(1, Box::new(inner)));
    }
    to_avro_inner(column, value)
}

fn to_avro_inner(column: &ColumnSchema, value: &Value) -> Result<AvroValue, ConnectorError> {
    let avro = match (column.ty, value) {
        (SqlType::Integer, Value::Integer(i)) => AvroValue::Long(*i),
        (SqlType::Float64, Value::Float(f)) => AvroValue::Double(*f),
        (SqlType::Float64, Value::Integer(i)) => AvroValue::Double(*i as f64),
        (SqlType::Boolean, Value::Boolean(b)) => AvroValue::Boolean(*b),
        (SqlType::String, Value::String(s)) => AvroValue::String(s.clone()),
        (SqlType::Timestamp, Value::Timestamp(t)) => AvroValue::TimestampMicros(t.and_utc().timestamp_micros()),
        _ => {
            return Err(ConnectorError::Encode(format!(
                "column '{}' expects {}, found {}",
                column.name,
                column.ty,
                value.kind()
            )))
        }
    };
    Ok(avro)
}

fn from_avro(column: &ColumnSchema, value: AvroValue) -> Result<Value, RecordError> {
    let value = match value {
        AvroValue::Union(_, inner) => *inner,
        other => other,
    };
    let unexpected = |found: &AvroValue| RecordError::field(&column.name, format!("unexpected avro value {found:?}"));
    let value = match (column.ty, value) {
        (_, AvroValue::Null) => Value::Null,
        (SqlType::Integer, AvroValue::Long(i)) => Value::Integer(i),
        (SqlType::Integer, AvroValue::Int(i)) => Value::Integer(i64::from(i)),
        (SqlType::Float64, AvroValue::Double(f)) => Value::Float(f),
        (SqlType::Float64, AvroValue::Float(f)) => Value::Float(f64::from(f)),
        (SqlType::Boolean, AvroValue::Boolean(b)) => Value::Boolean(b),
        (SqlType::String, AvroValue::String(s)) => Value::String(s),
        (SqlType::Timestamp, AvroValue::TimestampMicros(micros) | AvroValue::Long(micros)) => {
            DateTime::from_timestamp_micros(micros)
                .map(|dt| Value::Timestamp(dt.naive_utc()))
                .ok_or_else(|| RecordError::field(&column.name, "timestamp out of range"))?
        }
        (_, other) => return Err(unexpected(&other)),
    };
    Ok(value)
}

struct AvroDecoder {
    writer: Schema,
    columns: Vec<ColumnSchema>,
}

impl Decoder for AvroDecoder {
    fn decode(&mut self, record: &[u8]) -> Result<Vec<(Row, i64)>, RecordError> {
        let mut reader = record;
        let datum = from_avro_datum(&self.writer, &mut reader, None)
            .map_err(|e| RecordError::Malformed(format!("avro datum: {e}")))?;
        if !reader.is_empty() {
            return Err(RecordError::Malformed(format!(
                "{} trailing bytes after avro datum",
                reader.len()
            )));
        }
        let AvroValue::Record(fields) = datum else {
            return Err(RecordError::Malformed("avro datum is not a record".to_string()));
        };
        if fields.len() != self.columns.len() {
            return Err(RecordError::FieldCount {
                expected: self.columns.len(),
                found: fields.len(),
            });
        }
        let values = self
            .columns
            .iter()
            .zip(fields)
            .map(|(column, (_, value))| from_avro(column, value))
            .collect::<Result<Vec<_>, _>>()?;
        let row = Row::new(values);
        check_nullability(&self.columns, &row)?;
        Ok(vec![(row, 1)])
    }
}

struct AvroEncoder {
    writer: Schema,
    columns: Vec<ColumnSchema>,
}

impl Encoder for AvroEncoder {
    fn encode(&mut self, updates: &[(Row, i64)]) -> Result<EncodedBatch, ConnectorError> {
        encode_inserts(updates, |row| {
            let fields = self
                .columns
                .iter()
                .enumerate()
                .map(|(i, column)| Ok((column.name.clone(), to_avro(column, row.get(i))?)))
                .collect::<Result<Vec<_>, ConnectorError>>()?;
            let datum = to_avro_datum(&self.writer, AvroValue::Record(fields))
                .map_err(|e| ConnectorError::Encode(e.to_string()))?;
            Ok(Bytes::from(datum))
        })
    }
}
