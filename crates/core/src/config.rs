use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub runtime: RuntimeConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RIPPLE_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RIPPLE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            runtime: RuntimeConfig::from_env_profiled(p),
            retry: RetryConfig::from_env_profiled(p),
            log: LogConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  runtime:  workers={}, batch={}, backlog_warn={}, on_record_error={}",
            self.runtime.default_workers,
            self.runtime.max_batch_size,
            self.runtime.output_backlog_warn,
            self.runtime.record_error_policy
        );
        tracing::info!(
            "  retry:    attempts={}, backoff={}..{}ms",
            self.retry.connect_attempts,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms
        );
        tracing::info!("  log:      format={:?}, filter={}", self.log.format, self.log.filter);
    }
}

// ── Runtime ───────────────────────────────────────────────────

/// What to do with an input record that cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorPolicy {
    /// Count the record as dropped and keep going.
    #[default]
    Drop,
    /// Fail the whole job.
    Fail,
}

impl FromStr for RecordErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(RecordErrorPolicy::Drop),
            "fail" => Ok(RecordErrorPolicy::Fail),
            other => Err(format!("unknown record error policy '{other}' (expected drop|fail)")),
        }
    }
}

impl fmt::Display for RecordErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordErrorPolicy::Drop => f.write_str("drop"),
            RecordErrorPolicy::Fail => f.write_str("fail"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Parallelism degree for new pipelines.
    pub default_workers: usize,
    /// Raw records pulled from a connector per circuit step.
    pub max_batch_size: usize,
    /// Queued deltas at which a lagging output connector is reported.
    pub output_backlog_warn: usize,
    pub record_error_policy: RecordErrorPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_workers: 4,
            max_batch_size: 1024,
            output_backlog_warn: 256,
            record_error_policy: RecordErrorPolicy::Drop,
        }
    }
}

impl RuntimeConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            default_workers: profiled_env_parse(p, "RIPPLE_DEFAULT_WORKERS", d.default_workers).max(1),
            max_batch_size: profiled_env_parse(p, "RIPPLE_MAX_BATCH_SIZE", d.max_batch_size).max(1),
            output_backlog_warn: profiled_env_parse(p, "RIPPLE_OUTPUT_BACKLOG_WARN", d.output_backlog_warn)
                .max(1),
            record_error_policy: profiled_env_parse(
                p,
                "RIPPLE_RECORD_ERROR_POLICY",
                d.record_error_policy,
            ),
        }
    }
}

// ── Connector retry ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Connection attempts at job start before the job fails.
    pub connect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            connect_attempts: profiled_env_parse(p, "RIPPLE_CONNECT_ATTEMPTS", d.connect_attempts)
                .max(1),
            initial_backoff_ms: profiled_env_parse(p, "RIPPLE_INITIAL_BACKOFF_MS", d.initial_backoff_ms),
            max_backoff_ms: profiled_env_parse(p, "RIPPLE_MAX_BACKOFF_MS", d.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

// ── Logging ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

impl LogConfig {
    fn from_env_profiled(p: &str) -> Self {
        let format = match profiled_env_opt(p, "RIPPLE_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self {
            format,
            filter: profiled_env_opt(p, "RIPPLE_LOG_FILTER").unwrap_or_else(|| "info".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.profile_label(), "default");
        assert_eq!(config.runtime.record_error_policy, RecordErrorPolicy::Drop);
        assert_eq!(config.retry.connect_attempts, 5);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            connect_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
        assert_eq!(retry.backoff(5), Duration::from_millis(1_000));
        assert_eq!(retry.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn policy_parses() {
        assert_eq!("FAIL".parse::<RecordErrorPolicy>().unwrap(), RecordErrorPolicy::Fail);
        assert!("explode".parse::<RecordErrorPolicy>().is_err());
    }

    #[test]
    fn profiled_lookup_prefers_prefix() {
        env::set_var("RIPPLETEST_RIPPLE_MAX_BATCH_SIZE", "7");
        let config = Config::for_profile("rippletest");
        assert_eq!(config.runtime.max_batch_size, 7);
        assert_eq!(config.profile_label(), "RIPPLETEST");
        env::remove_var("RIPPLETEST_RIPPLE_MAX_BATCH_SIZE");
    }
}
