use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ripple_compute::{JobRuntime, JobSpec, RunState, RuntimeError};
use ripple_connector::testing::MemoryBroker;
use ripple_connector::{
    ConnectorCatalog, ConnectorConfig, ConnectorError, ConnectorHandle, Direction, EndpointContext, FormatConfig,
    InputEndpoint, OutputEndpoint, ParamSpec, Params, Transport, TransportConfig,
};
use ripple_core::{RecordErrorPolicy, RetryConfig, Row, RuntimeConfig, Value};
use serde_json::json;

const SQL: &str = "
    CREATE TABLE people (id INT NOT NULL, name VARCHAR, age INT);
    CREATE VIEW adults AS SELECT id, name FROM people WHERE age >= 18;
";

fn catalog(broker: &MemoryBroker) -> ConnectorCatalog {
    let mut catalog = ConnectorCatalog::builtin();
    catalog.register_transport(Arc::new(broker.clone()));
    catalog
}

fn kafka_in(topic: &str) -> ConnectorConfig {
    ConnectorConfig::input(
        "people",
        TransportConfig::new("kafka")
            .param("bootstrap.servers", "memory")
            .param("topics", topic),
        FormatConfig::new("csv"),
    )
}

fn kafka_out(topic: &str) -> ConnectorConfig {
    ConnectorConfig::output(
        "adults",
        TransportConfig::new("kafka")
            .param("bootstrap.servers", "memory")
            .param("topic", topic),
        FormatConfig::new("json"),
    )
}

/// Output transport that connects fine but never manages a write.
struct Unreachable;

struct UnreachableEndpoint;

#[async_trait]
impl Transport for Unreachable {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn input_params(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn output_params(&self) -> &'static [ParamSpec] {
        &[]
    }

    async fn open_input(&self, _: &EndpointContext, _: &Params) -> Result<Box<dyn InputEndpoint>, ConnectorError> {
        Err(ConnectorError::Connect("output only".into()))
    }

    async fn open_output(&self, _: &EndpointContext, _: &Params) -> Result<Box<dyn OutputEndpoint>, ConnectorError> {
        Ok(Box::new(UnreachableEndpoint))
    }
}

#[async_trait]
impl OutputEndpoint for UnreachableEndpoint {
    async fn write_batch(&mut self, _: Vec<Bytes>) -> Result<(), ConnectorError> {
        Err(ConnectorError::Write("peer unreachable".into()))
    }
}

fn spec(connectors: Vec<ConnectorConfig>, policy: RecordErrorPolicy) -> JobSpec {
    JobSpec {
        pipeline: "people".into(),
        plan: ripple_catalog::compile(SQL).unwrap().plan,
        connectors: connectors
            .into_iter()
            .map(|c| (ConnectorHandle::new(), c))
            .collect(),
        workers: 2,
        record_error_policy: policy,
        runtime: RuntimeConfig::default(),
        retry: RetryConfig {
            connect_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
    }
}

fn adult(id: i64, name: &str) -> (Row, i64) {
    (Row::new(vec![Value::Integer(id), Value::from(name)]), 1)
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn snapshot_eventually(job: &JobRuntime, expected: Vec<(Row, i64)>) {
    for _ in 0..200 {
        if job.view_snapshot("adults").await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "view never reached {expected:?}, last {:?}",
        job.view_snapshot("adults").await.unwrap()
    );
}

#[tokio::test]
async fn records_flow_from_source_to_sink() {
    let broker = MemoryBroker::new();
    let mut job = JobRuntime::start(spec(vec![kafka_in("in"), kafka_out("out")], RecordErrorPolicy::Drop), &catalog(&broker))
        .await
        .unwrap();
    assert_eq!(job.state(), RunState::Running);

    broker.produce("in", ["1,ann,34", "2,bob,12", "3,cy,18"]);
    snapshot_eventually(&job, vec![adult(1, "ann"), adult(3, "cy")]).await;
    eventually("two output records", || broker.messages("out").len() == 2).await;

    let out: Vec<serde_json::Value> = broker
        .messages("out")
        .iter()
        .map(|m| serde_json::from_slice(m).unwrap())
        .collect();
    assert!(out.contains(&json!({"id": 1, "name": "ann"})));
    assert!(out.contains(&json!({"id": 3, "name": "cy"})));

    job.stop().await;
    assert_eq!(job.state(), RunState::Stopped);
    let metrics = job.metrics();
    assert_eq!(metrics.records_parsed, 3);
    assert_eq!(metrics.records_emitted, 2);
}

#[tokio::test]
async fn malformed_records_are_dropped_and_counted() {
    let broker = MemoryBroker::new();
    let mut job = JobRuntime::start(spec(vec![kafka_in("in")], RecordErrorPolicy::Drop), &catalog(&broker))
        .await
        .unwrap();
    broker.produce("in", ["not,a,number,at all", "4,dee,40"]);
    snapshot_eventually(&job, vec![adult(4, "dee")]).await;

    let metrics = job.metrics();
    let input = &metrics.connectors[0];
    assert_eq!(input.direction, Direction::Input);
    assert_eq!(input.records_received, 2);
    assert_eq!(input.records_dropped, 1);
    assert!(input.last_error.is_some());
    job.stop().await;
}

#[tokio::test]
async fn fail_policy_reports_a_fatal_error() {
    let broker = MemoryBroker::new();
    let mut job = JobRuntime::start(spec(vec![kafka_in("in")], RecordErrorPolicy::Fail), &catalog(&broker))
        .await
        .unwrap();
    let mut failures = job.take_failures().unwrap();
    broker.produce("in", ["oops"]);
    let err = tokio::time::timeout(Duration::from_secs(2), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(err, RuntimeError::Record { .. }));
    job.stop().await;
}

#[tokio::test]
async fn start_fails_after_exhausting_connect_attempts() {
    let broker = MemoryBroker::new();
    broker.refuse_connects(10);
    let result = JobRuntime::start(spec(vec![kafka_in("in")], RecordErrorPolicy::Drop), &catalog(&broker)).await;
    assert!(matches!(result, Err(RuntimeError::Connector(_))));
    assert_eq!(broker.connects(), 0);
}

#[tokio::test]
async fn start_succeeds_within_the_retry_budget() {
    let broker = MemoryBroker::new();
    broker.refuse_connects(2);
    let mut job = JobRuntime::start(spec(vec![kafka_in("in")], RecordErrorPolicy::Drop), &catalog(&broker))
        .await
        .unwrap();
    assert_eq!(broker.connects(), 1);
    job.stop().await;
}

#[tokio::test]
async fn dropped_inputs_reconnect_without_losing_records() {
    let broker = MemoryBroker::new();
    let mut job = JobRuntime::start(spec(vec![kafka_in("in")], RecordErrorPolicy::Drop), &catalog(&broker))
        .await
        .unwrap();
    broker.produce("in", ["1,ann,30"]);
    snapshot_eventually(&job, vec![adult(1, "ann")]).await;

    broker.fail_reads(2);
    broker.produce("in", ["2,bob,31"]);
    snapshot_eventually(&job, vec![adult(1, "ann"), adult(2, "bob")]).await;
    assert!(job.metrics().connectors[0].reconnects >= 1);
    job.stop().await;
}

#[tokio::test]
async fn paused_jobs_buffer_input_until_resumed() {
    let broker = MemoryBroker::new();
    let mut job = JobRuntime::start(spec(vec![kafka_in("in")], RecordErrorPolicy::Drop), &catalog(&broker))
        .await
        .unwrap();
    job.pause();
    assert_eq!(job.state(), RunState::Paused);
    broker.produce("in", ["1,ann,30"]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(job.view_snapshot("adults").await.unwrap().is_empty());

    job.resume();
    snapshot_eventually(&job, vec![adult(1, "ann")]).await;
    job.stop().await;
}

#[tokio::test]
async fn http_input_applies_records_in_push_order() {
    let broker = MemoryBroker::new();
    let catalog = catalog(&broker);
    let handle = ConnectorHandle::new();
    let mut spec = spec(Vec::new(), RecordErrorPolicy::Drop);
    spec.connectors.push((
        handle,
        ConnectorConfig::input("people", TransportConfig::new("http"), FormatConfig::new("csv").param("weights", "true")),
    ));
    let mut job = JobRuntime::start(spec, &catalog).await.unwrap();

    // R1 inserts, R2 retracts it, R3 inserts a replacement.
    let records = ["1,ann,30,1", "1,ann,30,-1", "1,anna,30,1"].map(Bytes::from).to_vec();
    catalog.http_hub().push(handle, records).await.unwrap();
    snapshot_eventually(&job, vec![adult(1, "anna")]).await;
    job.stop().await;
}

#[tokio::test]
async fn stop_is_prompt_and_repeatable() {
    let broker = MemoryBroker::new();
    let mut job = JobRuntime::start(spec(vec![kafka_in("in"), kafka_out("out")], RecordErrorPolicy::Drop), &catalog(&broker))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), job.stop()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), job.stop()).await.unwrap();
    assert_eq!(job.state(), RunState::Stopped);
}

#[tokio::test]
async fn a_failing_sink_does_not_hold_up_the_others() {
    let broker = MemoryBroker::new();
    let mut catalog = catalog(&broker);
    catalog.register_transport(Arc::new(Unreachable));
    let stuck = ConnectorConfig::output("adults", TransportConfig::new("unreachable"), FormatConfig::new("json")).named("stuck");
    let mut spec = spec(vec![kafka_in("in"), kafka_out("good"), stuck], RecordErrorPolicy::Drop);
    spec.runtime.max_batch_size = 1;
    spec.runtime.output_backlog_warn = 1;
    let mut job = JobRuntime::start(spec, &catalog).await.unwrap();

    let records: Vec<String> = (1..=10).map(|i| format!("{i},p{i},30")).collect();
    broker.produce("in", records);
    eventually("every delta at the healthy sink", || broker.messages("good").len() == 10).await;

    let metrics = job.metrics();
    assert_eq!(metrics.records_parsed, 10);
    let stuck = metrics
        .connectors
        .iter()
        .find(|c| c.name.as_deref() == Some("stuck"))
        .unwrap();
    assert_eq!(stuck.records_emitted, 0);
    assert!(stuck.pending_deltas >= 1);
    assert!(stuck.last_error.as_deref().unwrap().contains("peer unreachable"));

    let rows = tokio::time::timeout(Duration::from_secs(2), job.view_snapshot("adults"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rows.len(), 10);

    tokio::time::timeout(Duration::from_secs(2), job.stop()).await.unwrap();
    assert_eq!(job.state(), RunState::Stopped);
}
