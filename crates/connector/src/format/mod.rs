//! Formats map raw records to weighted rows and back.

pub mod avro;
pub mod csv;
pub mod json;

use bytes::Bytes;
use ripple_core::{ColumnSchema, Row, Value};

use crate::config::{validate_params, ParamSpec, Params};
use crate::error::{ConfigError, ConnectorError, RecordError};

pub use self::avro::AvroFormat;
pub use self::csv::CsvFormat;
pub use self::json::JsonFormat;

/// A data format kind (`csv`, `json`, `avro`, ...).
pub trait Format: Send + Sync {
    fn name(&self) -> &'static str;

    fn params(&self) -> &'static [ParamSpec];

    /// Whether encoded records may contain arbitrary bytes.
    fn is_binary(&self) -> bool {
        false
    }

    fn validate(&self, params: &Params) -> Result<(), ConfigError> {
        validate_params(self.name(), self.params(), params)
    }

    fn decoder(
        &self,
        schema: &[ColumnSchema],
        params: &Params,
    ) -> Result<Box<dyn Decoder>, ConfigError>;

    fn encoder(
        &self,
        schema: &[ColumnSchema],
        params: &Params,
    ) -> Result<Box<dyn Encoder>, ConfigError>;
}

/// Decodes one raw record into weighted rows of the table's schema.
pub trait Decoder: Send {
    fn decode(&mut self, record: &[u8]) -> Result<Vec<(Row, i64)>, RecordError>;
}

/// Output of one encoder call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    pub records: Vec<Bytes>,
    /// Negative-weight rows the format cannot express.
    pub retractions_dropped: u64,
}

/// Encodes weighted view rows into raw records.
pub trait Encoder: Send {
    fn encode(&mut self, updates: &[(Row, i64)]) -> Result<EncodedBatch, ConnectorError>;
}

/// Shared encode loop for formats without retractions: a row of weight `w`
/// is written `w` times, negative weights are counted and skipped.
pub(crate) fn encode_inserts<F>(updates: &[(Row, i64)], mut encode_row: F) -> Result<EncodedBatch, ConnectorError>
where
    F: FnMut(&Row) -> Result<Bytes, ConnectorError>,
{
    let mut batch = EncodedBatch::default();
    for (row, weight) in updates {
        if *weight < 0 {
            batch.retractions_dropped += weight.unsigned_abs();
            continue;
        }
        if *weight == 0 {
            continue;
        }
        let record = encode_row(row)?;
        for _ in 1..*weight {
            batch.records.push(record.clone());
        }
        batch.records.push(record);
    }
    Ok(batch)
}

/// Reject a NULL in a NOT NULL column.
pub(crate) fn check_nullability(schema: &[ColumnSchema], row: &Row) -> Result<(), RecordError> {
    for (column, value) in schema.iter().zip(row.values()) {
        if !column.nullable && value.is_null() {
            return Err(RecordError::NullViolation(column.name.clone()));
        }
    }
    Ok(())
}

/// Coerce a decoded value to the column's declared type.
pub(crate) fn coerce(column: &ColumnSchema, value: Value) -> Result<Value, RecordError> {
    value
        .cast(column.ty)
        .map_err(|e| RecordError::field(&column.name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_only_encoding_expands_and_drops() {
        let row = |i: i64| Row::new(vec![Value::Integer(i)]);
        let updates = vec![(row(1), 2), (row(2), -3), (row(3), 0), (row(4), 1)];
        let batch = encode_inserts(&updates, |r| Ok(Bytes::from(r.get(0).to_string()))).unwrap();
        assert_eq!(
            batch.records,
            vec![Bytes::from("1"), Bytes::from("1"), Bytes::from("4")]
        );
        assert_eq!(batch.retractions_dropped, 3);
    }
}
