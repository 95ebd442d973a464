//! Connector configuration records and parameter validation.
//!
//! A connector binds one table or view to a transport (where bytes come from
//! or go to) and a format (how bytes map to rows). Both carry a flat string
//! parameter map that is checked against the parameters the transport or
//! format declares.

use std::collections::BTreeMap;
use std::fmt;

use ripple_core::normalize_ident;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Free-form parameters, as supplied by the caller.
pub type Params = BTreeMap<String, String>;

/// Whether data flows into a table or out of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub kind: String,
    #[serde(default)]
    pub params: Params,
}

impl TransportConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Params::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatConfig {
    pub kind: String,
    #[serde(default)]
    pub params: Params,
}

impl FormatConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Params::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// One connector binding as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Optional unique name within the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub table: String,
    pub direction: Direction,
    pub transport: TransportConfig,
    pub format: FormatConfig,
}

impl ConnectorConfig {
    pub fn input(table: &str, transport: TransportConfig, format: FormatConfig) -> Self {
        Self {
            name: None,
            table: table.to_string(),
            direction: Direction::Input,
            transport,
            format,
        }
    }

    pub fn output(view: &str, transport: TransportConfig, format: FormatConfig) -> Self {
        Self {
            name: None,
            table: view.to_string(),
            direction: Direction::Output,
            transport,
            format,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Table name in canonical (lower-case) form.
    pub fn table_name(&self) -> String {
        normalize_ident(&self.table)
    }
}

// ── Parameter specs ───────────────────────────────────────────

/// Accepted shape of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Bool,
    U64,
    /// Exactly one character.
    Char,
    /// Comma-separated, at least one non-empty item.
    List,
    OneOf(&'static [&'static str]),
}

/// A parameter a transport or format recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub key: &'static str,
    pub required: bool,
    pub kind: ParamKind,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(key: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            key,
            required: true,
            kind,
            description,
        }
    }

    pub const fn optional(key: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            key,
            required: false,
            kind,
            description,
        }
    }

    fn check(&self, value: &str) -> Result<(), String> {
        match self.kind {
            ParamKind::String => Ok(()),
            ParamKind::Bool => parse_bool(value).map(|_| ()),
            ParamKind::U64 => value
                .trim()
                .parse::<u64>()
                .map(|_| ())
                .map_err(|e| e.to_string()),
            ParamKind::Char => {
                if value.chars().count() == 1 {
                    Ok(())
                } else {
                    Err("expected a single character".to_string())
                }
            }
            ParamKind::List => {
                if split_list(value).is_empty() {
                    Err("expected a non-empty comma-separated list".to_string())
                } else {
                    Ok(())
                }
            }
            ParamKind::OneOf(choices) => {
                if choices.contains(&value.trim()) {
                    Ok(())
                } else {
                    Err(format!("expected one of {}", choices.join("|")))
                }
            }
        }
    }
}

/// Check `params` against `specs`: no unknown keys, every required key
/// present, every value well-formed.
pub fn validate_params(kind: &str, specs: &[ParamSpec], params: &Params) -> Result<(), ConfigError> {
    for key in params.keys() {
        if !specs.iter().any(|s| s.key == key) {
            return Err(ConfigError::UnknownParameter {
                kind: kind.to_string(),
                key: key.clone(),
            });
        }
    }
    for spec in specs {
        match params.get(spec.key) {
            None if spec.required => {
                return Err(ConfigError::MissingParameter {
                    kind: kind.to_string(),
                    key: spec.key.to_string(),
                })
            }
            None => {}
            Some(value) => spec
                .check(value)
                .map_err(|reason| ConfigError::InvalidParameter {
                    kind: kind.to_string(),
                    key: spec.key.to_string(),
                    reason,
                })?,
        }
    }
    Ok(())
}

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("'{other}' is not true|false")),
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Typed access to already-validated parameters.
pub(crate) fn bool_param(params: &Params, key: &str, default: bool) -> bool {
    params
        .get(key)
        .and_then(|v| parse_bool(v).ok())
        .unwrap_or(default)
}

pub(crate) fn u64_param(params: &Params, key: &str, default: u64) -> u64 {
    params
        .get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub(crate) fn required_param<'a>(
    kind: &str,
    params: &'a Params,
    key: &str,
) -> Result<&'a str, ConfigError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ConfigError::MissingParameter {
            kind: kind.to_string(),
            key: key.to_string(),
        })
}
