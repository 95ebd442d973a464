use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use ripple_connector::{ConnectorHandle, Direction};
use serde::Serialize;

/// Live counters of one connector, updated by its worker.
#[derive(Debug)]
pub struct ConnectorMetrics {
    pub connector: ConnectorHandle,
    pub name: Option<String>,
    pub table: String,
    pub direction: Direction,
    records_received: AtomicU64,
    bytes_received: AtomicU64,
    records_parsed: AtomicU64,
    records_dropped: AtomicU64,
    records_emitted: AtomicU64,
    retractions_dropped: AtomicU64,
    reconnects: AtomicU64,
    pending_deltas: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`ConnectorMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorMetricsSnapshot {
    pub connector: ConnectorHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub table: String,
    pub direction: Direction,
    pub records_received: u64,
    pub bytes_received: u64,
    pub records_parsed: u64,
    /// Input records rejected by the decoder.
    pub records_dropped: u64,
    pub records_emitted: u64,
    pub retractions_dropped: u64,
    pub reconnects: u64,
    /// Deltas waiting for an output writer.
    pub pending_deltas: u64,
    pub last_error: Option<String>,
}

impl ConnectorMetrics {
    pub fn new(connector: ConnectorHandle, name: Option<String>, table: String, direction: Direction) -> Self {
        Self {
            connector,
            name,
            table,
            direction,
            records_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            records_parsed: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            retractions_dropped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            pending_deltas: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_received(&self, records: u64, bytes: u64) {
        self.records_received.fetch_add(records, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_parsed(&self, records: u64) {
        self.records_parsed.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, error: &impl ToString) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
        self.set_error(error);
    }

    pub fn record_emitted(&self, records: u64, retractions_dropped: u64) {
        self.records_emitted.fetch_add(records, Ordering::Relaxed);
        self.retractions_dropped
            .fetch_add(retractions_dropped, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delta handed to the output queue; returns the new backlog.
    pub fn record_queued(&self) -> u64 {
        self.pending_deltas.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dequeued(&self) {
        let _ = self
            .pending_deltas
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn set_error(&self, error: &impl ToString) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    pub fn snapshot(&self) -> ConnectorMetricsSnapshot {
        ConnectorMetricsSnapshot {
            connector: self.connector,
            name: self.name.clone(),
            table: self.table.clone(),
            direction: self.direction,
            records_received: self.records_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            records_parsed: self.records_parsed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            retractions_dropped: self.retractions_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            pending_deltas: self.pending_deltas.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Circuit counters published after every step, readable without the
/// circuit lock.
#[derive(Debug, Default)]
pub struct CircuitStats {
    steps: AtomicU64,
    state_size: AtomicUsize,
}

impl CircuitStats {
    pub fn record(&self, steps: u64, state_size: usize) {
        self.steps.store(steps, Ordering::Relaxed);
        self.state_size.store(state_size, Ordering::Relaxed);
    }

    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn state_size(&self) -> usize {
        self.state_size.load(Ordering::Relaxed)
    }
}

/// Job-wide metrics exposed to callers of the pipeline manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobMetrics {
    pub started_at: Option<DateTime<Utc>>,
    /// Circuit steps applied.
    pub steps: u64,
    /// Rows held in operator state.
    pub state_size: usize,
    pub records_parsed: u64,
    pub records_dropped: u64,
    pub records_emitted: u64,
    pub connectors: Vec<ConnectorMetricsSnapshot>,
}

impl JobMetrics {
    pub fn new(
        started_at: Option<DateTime<Utc>>,
        steps: u64,
        state_size: usize,
        connectors: Vec<ConnectorMetricsSnapshot>,
    ) -> Self {
        let sum = |f: fn(&ConnectorMetricsSnapshot) -> u64| -> u64 { connectors.iter().map(f).sum() };
        Self {
            started_at,
            steps,
            state_size,
            records_parsed: sum(|c| c.records_parsed),
            records_dropped: sum(|c| c.records_dropped),
            records_emitted: sum(|c| c.records_emitted),
            connectors,
        }
    }

    /// Metrics of a job that is not running.
    pub fn idle() -> Self {
        Self::new(None, 0, 0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(direction: Direction) -> ConnectorMetrics {
        ConnectorMetrics::new(ConnectorHandle::new(), None, "t".into(), direction)
    }

    #[test]
    fn counters_accumulate() {
        let m = metrics(Direction::Input);
        m.record_received(3, 42);
        m.record_parsed(2);
        m.record_dropped(&"expected 3 fields, found 1");
        let snap = m.snapshot();
        assert_eq!(snap.records_received, 3);
        assert_eq!(snap.bytes_received, 42);
        assert_eq!(snap.records_parsed, 2);
        assert_eq!(snap.records_dropped, 1);
        assert_eq!(snap.last_error.as_deref(), Some("expected 3 fields, found 1"));
    }

    #[test]
    fn backlog_tracks_queued_deltas() {
        let m = metrics(Direction::Output);
        assert_eq!(m.record_queued(), 1);
        assert_eq!(m.record_queued(), 2);
        m.record_dequeued();
        assert_eq!(m.snapshot().pending_deltas, 1);
        m.record_dequeued();
        m.record_dequeued();
        assert_eq!(m.snapshot().pending_deltas, 0);
    }

    #[test]
    fn job_totals_sum_connectors() {
        let input = metrics(Direction::Input);
        input.record_parsed(5);
        let output = metrics(Direction::Output);
        output.record_emitted(4, 1);
        let job = JobMetrics::new(Some(Utc::now()), 2, 7, vec![input.snapshot(), output.snapshot()]);
        assert_eq!(job.records_parsed, 5);
        assert_eq!(job.records_emitted, 4);
        assert_eq!(job.connectors[1].retractions_dropped, 1);

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["connectors"][0]["direction"], "input");
        assert!(json["connectors"][0].get("name").is_none());
    }
}
