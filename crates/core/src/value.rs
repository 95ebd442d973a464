use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::ValueError;
use crate::types::SqlType;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// A single SQL value.
///
/// Values are totally ordered (floats use the IEEE total order) so rows can be
/// used as keys of ordered and hashed collections. SQL comparison semantics,
/// where NULL compares as unknown and integers compare with floats
/// numerically, live in [`Value::sql_cmp`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Name of the runtime variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT64",
            Value::String(_) => "STRING",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// Parse the textual form of a value of type `ty`.
    ///
    /// An empty string parses as NULL for every type except STRING.
    pub fn parse(input: &str, ty: SqlType) -> Result<Value, ValueError> {
        let err = |reason: String| ValueError::Parse {
            ty,
            input: input.to_string(),
            reason,
        };
        if ty != SqlType::String && input.trim().is_empty() {
            return Ok(Value::Null);
        }
        match ty {
            SqlType::Integer => input
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| err(e.to_string())),
            SqlType::Float64 => input
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| err(e.to_string())),
            SqlType::String => Ok(Value::String(input.to_string())),
            SqlType::Boolean => match input.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Boolean(true)),
                "false" | "f" | "0" => Ok(Value::Boolean(false)),
                other => Err(err(format!("'{other}' is not a boolean"))),
            },
            SqlType::Timestamp => parse_timestamp(input.trim())
                .map(Value::Timestamp)
                .ok_or_else(|| err("unrecognized timestamp format".to_string())),
        }
    }

    /// Convert a value into type `ty`, following SQL `CAST` rules.
    pub fn cast(&self, ty: SqlType) -> Result<Value, ValueError> {
        let mismatch = || ValueError::Type {
            expected: ty,
            found: self.kind().to_string(),
        };
        match (self, ty) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Integer(i), SqlType::Integer) => Ok(Value::Integer(*i)),
            (Value::Integer(i), SqlType::Float64) => Ok(Value::Float(*i as f64)),
            (Value::Float(f), SqlType::Integer) => float_to_integer(*f),
            (Value::Float(f), SqlType::Float64) => Ok(Value::Float(*f)),
            (Value::Boolean(b), SqlType::Boolean) => Ok(Value::Boolean(*b)),
            (Value::Boolean(b), SqlType::Integer) => Ok(Value::Integer(i64::from(*b))),
            (Value::Timestamp(t), SqlType::Timestamp) => Ok(Value::Timestamp(*t)),
            (Value::Timestamp(t), SqlType::Integer) => {
                Ok(Value::Integer(t.and_utc().timestamp_micros()))
            }
            (Value::String(s), other) => Value::parse(s, other),
            (v, SqlType::String) => Ok(Value::String(v.to_string())),
            _ => Err(mismatch()),
        }
    }

    /// SQL comparison: `None` when either side is NULL or the types are not comparable.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_), Value::Float(_)) | (Value::Float(_), Value::Integer(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::Timestamp(_) => 5,
        }
    }
}

/// Parse the timestamp spellings seen in CSV/JSON feeds.
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(ts);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn float_to_integer(f: f64) -> Result<Value, ValueError> {
    let t = f.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if t.is_nan() || t < i64::MIN as f64 || t >= i64::MAX as f64 {
        return Err(ValueError::OutOfRange {
            value: f.to_string(),
            ty: SqlType::Integer,
        });
    }
    Ok(Value::Integer(t as i64))
}

/// -0.0 folds into 0.0 and every NaN into one NaN, so keys that compare
/// equal in SQL group and join together.
fn canonical(f: f64) -> f64 {
    if f == 0.0 {
        0.0
    } else if f.is_nan() {
        f64::NAN
    } else {
        f
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => canonical(*a).total_cmp(&canonical(*b)),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => canonical(*f).to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Timestamp(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One tuple, positionally matching a column list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(transparent)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Value {
        self.0.get(idx).unwrap_or(&Value::Null)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Pick the given column positions into a new row.
    pub fn project(&self, columns: &[usize]) -> Row {
        Row(columns.iter().map(|&c| self.get(c).clone()).collect())
    }

    /// Concatenate two rows (join output layout).
    pub fn concat(&self, other: &Row) -> Row {
        let mut values = Vec::with_capacity(self.len() + other.len());
        values.extend_from_slice(&self.0);
        values.extend_from_slice(&other.0);
        Row(values)
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_each_type() {
        assert_eq!(Value::parse("42", SqlType::Integer).unwrap(), Value::Integer(42));
        assert_eq!(Value::parse("4.5", SqlType::Float64).unwrap(), Value::Float(4.5));
        assert_eq!(Value::parse("x", SqlType::String).unwrap(), Value::from("x"));
        assert_eq!(Value::parse("true", SqlType::Boolean).unwrap(), Value::Boolean(true));
        let ts = Value::parse("2020-06-21 12:14:25", SqlType::Timestamp).unwrap();
        assert_eq!(ts.to_string(), "2020-06-21 12:14:25");
    }

    #[test]
    fn empty_text_is_null_except_for_strings() {
        assert!(Value::parse("", SqlType::Integer).unwrap().is_null());
        assert_eq!(Value::parse("", SqlType::String).unwrap(), Value::from(""));
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = Value::parse("abc", SqlType::Integer).unwrap_err();
        assert!(matches!(err, ValueError::Parse { ty: SqlType::Integer, .. }));
    }

    #[test]
    fn timestamps_accept_rfc3339_and_dates() {
        assert!(parse_timestamp("2020-06-21T12:14:25Z").is_some());
        assert!(parse_timestamp("2020-06-21").is_some());
        assert!(parse_timestamp("21/06/2020").is_none());
    }

    #[test]
    fn sql_cmp_promotes_numbers_and_ignores_null() {
        assert_eq!(Value::Integer(2).sql_cmp(&Value::Float(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Null.sql_cmp(&Value::Integer(1)), None);
        assert_eq!(Value::from("a").sql_cmp(&Value::Integer(1)), None);
    }

    #[test]
    fn total_order_is_consistent_for_floats() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert!(Value::Float(-1.0) < Value::Float(1.0));
    }

    #[test]
    fn float_display_round_trips() {
        for x in [0.1, 1e21, -3.25, 123456.789] {
            let text = Value::Float(x).to_string();
            assert_eq!(Value::parse(&text, SqlType::Float64).unwrap(), Value::Float(x));
        }
    }

    #[test]
    fn cast_between_types() {
        assert_eq!(Value::Integer(3).cast(SqlType::Float64).unwrap(), Value::Float(3.0));
        assert_eq!(Value::Float(3.9).cast(SqlType::Integer).unwrap(), Value::Integer(3));
        assert_eq!(Value::from("7").cast(SqlType::Integer).unwrap(), Value::Integer(7));
        assert_eq!(Value::Integer(7).cast(SqlType::String).unwrap(), Value::from("7"));
        assert!(Value::Boolean(true).cast(SqlType::Timestamp).is_err());
        assert_eq!(Value::Float(-3.9).cast(SqlType::Integer).unwrap(), Value::Integer(-3));
    }

    #[test]
    fn float_to_integer_rejects_nan_and_overflow() {
        for f in [f64::NAN, f64::INFINITY, 1e19, -1e19] {
            assert!(matches!(
                Value::Float(f).cast(SqlType::Integer),
                Err(ValueError::OutOfRange { ty: SqlType::Integer, .. })
            ));
        }
    }

    #[test]
    fn negative_zero_is_the_same_key_as_zero() {
        use std::collections::hash_map::DefaultHasher;
        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        let (pos, neg) = (Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(pos, neg);
        assert_eq!(hash(&pos), hash(&neg));
        assert!(Value::Float(-1.0) < neg);
    }

    #[test]
    fn row_project_and_concat() {
        let row = Row::new(vec![Value::Integer(1), Value::from("a"), Value::Null]);
        assert_eq!(row.project(&[1, 0]), Row::new(vec![Value::from("a"), Value::Integer(1)]));
        let joined = row.concat(&Row::new(vec![Value::Boolean(false)]));
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.get(10), &Value::Null);
    }
}
