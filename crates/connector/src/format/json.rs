//! JSON records: one object per row, keyed by column name.
//!
//! `update_format = raw` carries inserts only. `insert_delete` wraps each
//! row as `{"insert": {..}}` or `{"delete": {..}}`. A record may also be an
//! array of such objects.

use bytes::Bytes;
use ripple_core::{normalize_ident, ColumnSchema, Row, SqlType, Value};
use serde_json::{Map, Number, Value as Json};

use super::{check_nullability, encode_inserts, Decoder, EncodedBatch, Encoder, Format};
use crate::config::{ParamKind, ParamSpec, Params};
use crate::error::{ConfigError, ConnectorError, RecordError};

const PARAMS: &[ParamSpec] = &[ParamSpec::optional(
    "update_format",
    ParamKind::OneOf(&["raw", "insert_delete"]),
    "raw rows or insert/delete envelopes",
)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateFormat {
    Raw,
    InsertDelete,
}

impl UpdateFormat {
    fn from_params(params: &Params) -> Self {
        match params.get("update_format").map(|s| s.trim()) {
            Some("insert_delete") => UpdateFormat::InsertDelete,
            _ => UpdateFormat::Raw,
        }
    }
}

#[derive(Debug, Default)]
pub struct JsonFormat;

impl Format for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn decoder(
        &self,
        schema: &[ColumnSchema],
        params: &Params,
    ) -> Result<Box<dyn Decoder>, ConfigError> {
        Ok(Box::new(JsonDecoder {
            schema: schema.to_vec(),
            update_format: UpdateFormat::from_params(params),
        }))
    }

    fn encoder(
        &self,
        schema: &[ColumnSchema],
        params: &Params,
    ) -> Result<Box<dyn Encoder>, ConfigError> {
        Ok(Box::new(JsonEncoder {
            schema: schema.to_vec(),
            update_format: UpdateFormat::from_params(params),
        }))
    }
}

struct JsonDecoder {
    schema: Vec<ColumnSchema>,
    update_format: UpdateFormat,
}

impl JsonDecoder {
    fn row(&self, object: &Map<String, Json>) -> Result<Row, RecordError> {
        let mut values = vec![Value::Null; self.schema.len()];
        for (key, json) in object {
            let key = normalize_ident(key);
            if let Some(idx) = self.schema.iter().position(|c| c.name == key) {
                values[idx] = json_to_value(&self.schema[idx], json)?;
            }
        }
        let row = Row::new(values);
        check_nullability(&self.schema, &row)?;
        Ok(row)
    }

    fn update(&self, json: &Json, out: &mut Vec<(Row, i64)>) -> Result<(), RecordError> {
        let object = json
            .as_object()
            .ok_or_else(|| RecordError::Malformed("expected a JSON object".to_string()))?;
        match self.update_format {
            UpdateFormat::Raw => out.push((self.row(object)?, 1)),
            UpdateFormat::InsertDelete => {
                let mut matched = false;
                for (key, weight) in [("delete", -1), ("insert", 1)] {
                    if let Some(inner) = object.get(key) {
                        let inner = inner.as_object().ok_or_else(|| {
                            RecordError::Malformed(format!("'{key}' must be an object"))
                        })?;
                        out.push((self.row(inner)?, weight));
                        matched = true;
                    }
                }
                if !matched {
                    return Err(RecordError::Malformed(
                        "expected an 'insert' or 'delete' key".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Decoder for JsonDecoder {
    fn decode(&mut self, record: &[u8]) -> Result<Vec<(Row, i64)>, RecordError> {
        let json: Json =
            serde_json::from_slice(record).map_err(|e| RecordError::Malformed(e.to_string()))?;
        let mut rows = Vec::new();
        match &json {
            Json::Array(items) => {
                for item in items {
                    self.update(item, &mut rows)?;
                }
            }
            other => self.update(other, &mut rows)?,
        }
        Ok(rows)
    }
}

fn json_to_value(column: &ColumnSchema, json: &Json) -> Result<Value, RecordError> {
    let mismatch = || RecordError::field(&column.name, format!("cannot read {json} as {}", column.ty));
    let parse = |s: &str| Value::parse(s, column.ty).map_err(|e| RecordError::field(&column.name, e));
    match (json, column.ty) {
        (Json::Null, _) => Ok(Value::Null),
        (Json::String(s), _) => parse(s),
        (Json::Bool(b), SqlType::Boolean) => Ok(Value::Boolean(*b)),
        (Json::Bool(b), SqlType::String) => Ok(Value::String(b.to_string())),
        (Json::Number(n), SqlType::Integer) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::Integer(f as i64))
                .ok_or_else(mismatch),
        },
        (Json::Number(n), SqlType::Float64) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
        (Json::Number(n), SqlType::String) => Ok(Value::String(n.to_string())),
        _ => Err(mismatch()),
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::String(s) => Json::String(s.clone()),
        Value::Timestamp(_) => Json::String(value.to_string()),
    }
}

struct JsonEncoder {
    schema: Vec<ColumnSchema>,
    update_format: UpdateFormat,
}

impl JsonEncoder {
    fn object(&self, row: &Row) -> Json {
        let map: Map<String, Json> = self
            .schema
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), value_to_json(row.get(i))))
            .collect();
        Json::Object(map)
    }

    fn serialize(json: &Json) -> Result<Bytes, ConnectorError> {
        serde_json::to_vec(json)
            .map(Bytes::from)
            .map_err(|e| ConnectorError::Encode(e.to_string()))
    }
}

impl Encoder for JsonEncoder {
    fn encode(&mut self, updates: &[(Row, i64)]) -> Result<EncodedBatch, ConnectorError> {
        match self.update_format {
            UpdateFormat::Raw => encode_inserts(updates, |row| Self::serialize(&self.object(row))),
            UpdateFormat::InsertDelete => {
                let mut batch = EncodedBatch::default();
                for (row, weight) in updates {
                    let key = if *weight < 0 { "delete" } else { "insert" };
                    let mut envelope = Map::new();
                    envelope.insert(key.to_string(), self.object(row));
                    let record = Self::serialize(&Json::Object(envelope))?;
                    for _ in 0..weight.unsigned_abs() {
                        batch.records.push(record.clone());
                    }
                }
                Ok(batch)
            }
        }
    }
}
