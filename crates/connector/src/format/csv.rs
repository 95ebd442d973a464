//! CSV records: fields in table column order, optionally followed by a weight.
//!
//! NULL is written as the `null` marker (`\N` unless configured). A field
//! equal to the marker reads as NULL; an empty field is the empty string in
//! string columns and NULL in every other column.

use bytes::Bytes;
use ripple_core::{ColumnSchema, Row, Value};

use super::{check_nullability, encode_inserts, Decoder, EncodedBatch, Encoder, Format};
use crate::config::{bool_param, validate_params, ParamKind, ParamSpec, Params};
use crate::error::{ConfigError, ConnectorError, RecordError};

const PARAMS: &[ParamSpec] = &[
    ParamSpec::optional("delimiter", ParamKind::Char, "field separator, default ','"),
    ParamSpec::optional("weights", ParamKind::Bool, "last field is the row weight"),
    ParamSpec::optional("null", ParamKind::String, "text of a NULL field, default \\N"),
];

const DEFAULT_NULL: &str = "\\N";

#[derive(Debug, Default)]
pub struct CsvFormat;

#[derive(Debug, Clone)]
struct CsvOptions {
    delimiter: u8,
    weights: bool,
    null: String,
}

impl CsvOptions {
    fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let delimiter = match params.get("delimiter") {
            None => b',',
            Some(d) => match d.as_bytes() {
                [b] => *b,
                _ => {
                    return Err(ConfigError::InvalidParameter {
                        kind: "csv".into(),
                        key: "delimiter".into(),
                        reason: "expected a single ASCII character".into(),
                    })
                }
            },
        };
        Ok(Self {
            delimiter,
            weights: bool_param(params, "weights", false),
            null: params
                .get("null")
                .cloned()
                .unwrap_or_else(|| DEFAULT_NULL.to_string()),
        })
    }
}

impl Format for CsvFormat {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn validate(&self, params: &Params) -> Result<(), ConfigError> {
        validate_params(self.name(), PARAMS, params)?;
        CsvOptions::from_params(params).map(|_| ())
    }

    fn decoder(
        &self,
        schema: &[ColumnSchema],
        params: &Params,
    ) -> Result<Box<dyn Decoder>, ConfigError> {
        Ok(Box::new(CsvDecoder {
            schema: schema.to_vec(),
            options: CsvOptions::from_params(params)?,
        }))
    }

    fn encoder(
        &self,
        schema: &[ColumnSchema],
        params: &Params,
    ) -> Result<Box<dyn Encoder>, ConfigError> {
        Ok(Box::new(CsvEncoder {
            width: schema.len(),
            options: CsvOptions::from_params(params)?,
        }))
    }
}

struct CsvDecoder {
    schema: Vec<ColumnSchema>,
    options: CsvOptions,
}

impl CsvDecoder {
    fn row(&self, record: &::csv::StringRecord) -> Result<(Row, i64), RecordError> {
        let expected = self.schema.len() + usize::from(self.options.weights);
        if record.len() != expected {
            return Err(RecordError::FieldCount {
                expected,
                found: record.len(),
            });
        }
        let mut values = Vec::with_capacity(self.schema.len());
        for (column, field) in self.schema.iter().zip(record.iter()) {
            let value = if field == self.options.null {
                Value::Null
            } else {
                Value::parse(field, column.ty).map_err(|e| RecordError::field(&column.name, e))?
            };
            values.push(value);
        }
        let row = Row::new(values);
        check_nullability(&self.schema, &row)?;

        let weight = if self.options.weights {
            let field = record.get(self.schema.len()).unwrap_or_default();
            field
                .trim()
                .parse::<i64>()
                .map_err(|e| RecordError::field("weight", e))?
        } else {
            1
        };
        Ok((row, weight))
    }
}

impl Decoder for CsvDecoder {
    fn decode(&mut self, record: &[u8]) -> Result<Vec<(Row, i64)>, RecordError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.options.delimiter)
            .from_reader(record);
        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| RecordError::Malformed(e.to_string()))?;
            rows.push(self.row(&record)?);
        }
        if rows.is_empty() {
            return Err(RecordError::Malformed("empty record".to_string()));
        }
        Ok(rows)
    }
}

struct CsvEncoder {
    width: usize,
    options: CsvOptions,
}

impl CsvEncoder {
    fn write(&self, row: &Row, weight: Option<i64>) -> Result<Bytes, ConnectorError> {
        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .delimiter(self.options.delimiter)
            .from_writer(Vec::new());
        let mut fields: Vec<String> = row
            .values()
            .iter()
            .map(|v| field_text(v, &self.options.null))
            .collect();
        fields.resize(self.width.max(fields.len()), self.options.null.clone());
        if let Some(w) = weight {
            fields.push(w.to_string());
        }
        writer
            .write_record(&fields)
            .map_err(|e| ConnectorError::Encode(e.to_string()))?;
        let mut bytes = writer
            .into_inner()
            .map_err(|e| ConnectorError::Encode(e.to_string()))?;
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        Ok(Bytes::from(bytes))
    }
}

fn field_text(value: &Value, null: &str) -> String {
    match value {
        Value::Null => null.to_string(),
        other => other.to_string(),
    }
}

impl Encoder for CsvEncoder {
    fn encode(&mut self, updates: &[(Row, i64)]) -> Result<EncodedBatch, ConnectorError> {
        if !self.options.weights {
            return encode_inserts(updates, |row| self.write(row, None));
        }
        let mut batch = EncodedBatch::default();
        for (row, weight) in updates.iter().filter(|(_, w)| *w != 0) {
            batch.records.push(self.write(row, Some(*weight))?);
        }
        Ok(batch)
    }
}
