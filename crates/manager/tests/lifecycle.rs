use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ripple_catalog::CompileError;
use ripple_connector::testing::MemoryBroker;
use ripple_connector::{
    ConfigError, ConnectorCatalog, ConnectorConfig, ConnectorError, EndpointContext, FormatConfig, InputEndpoint,
    OutputEndpoint, ParamSpec, Params, Transport, TransportConfig,
};
use ripple_core::{Config, RecordErrorPolicy, RetryConfig, Row, Value};
use ripple_manager::{Action, ManagerError, PipelineConfig, PipelineManager, PipelineStatus, StatusSnapshot};
use tokio::sync::watch;

const SQL: &str = "
    CREATE TABLE people (id INT NOT NULL, name VARCHAR, age INT);
    CREATE VIEW adults AS SELECT id, name FROM people WHERE age >= 18;
";

fn manager(broker: &MemoryBroker) -> PipelineManager {
    let mut catalog = ConnectorCatalog::builtin();
    catalog.register_transport(Arc::new(broker.clone()));
    let config = Config {
        retry: RetryConfig {
            connect_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        ..Config::default()
    };
    PipelineManager::with_catalog(config, catalog)
}

/// Output transport whose writes always fail.
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

fn http_input(format: FormatConfig) -> ConnectorConfig {
    ConnectorConfig::input("people", TransportConfig::new("http"), format)
}

fn adult(id: i64, name: &str) -> (Row, i64) {
    (Row::new(vec![Value::Integer(id), Value::from(name)]), 1)
}

async fn wait_for_status(rx: &mut watch::Receiver<StatusSnapshot>, status: PipelineStatus) -> StatusSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.status == status))
        .await
        .unwrap_or_else(|_| panic!("pipeline never became {status}"))
        .unwrap()
        .clone()
}

async fn snapshot_eventually(manager: &PipelineManager, handle: ripple_manager::PipelineHandle, expected: Vec<(Row, i64)>) {
    for _ in 0..200 {
        if manager.view_snapshot(handle, "adults").await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "view never reached {expected:?}, last {:?}",
        manager.view_snapshot(handle, "adults").await.unwrap()
    );
}

#[tokio::test]
async fn project_names_are_unique() {
    let manager = manager(&MemoryBroker::new());
    let first = manager.create_project("foo", SQL).unwrap();
    let err = manager.create_project("foo", "CREATE TABLE t (a INT);").unwrap_err();
    assert!(matches!(err, ManagerError::DuplicateName(name) if name == "foo"));
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.handle("foo"), Some(first));
    assert_eq!(manager.program(first).await.unwrap(), SQL);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager.create_project("idle", SQL).unwrap();
    manager.compile(handle).await.unwrap();
    manager.start(handle).await.unwrap();
    for _ in 0..3 {
        let snapshot = manager.stop(handle).await.unwrap();
        assert_eq!(snapshot.status, PipelineStatus::Stopped);
        assert_eq!(snapshot.error, None);
    }
}

#[tokio::test]
async fn failed_compile_returns_to_created_and_keeps_the_detail() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager
        .create_project("cyclic", "CREATE TABLE t (a INT); CREATE VIEW v AS SELECT a FROM v;")
        .unwrap();
    let mut status = manager.subscribe(handle).unwrap();
    status.borrow_and_update();

    let err = manager.compile(handle).await.unwrap_err();
    assert!(matches!(err, ManagerError::Compile(CompileError::CyclicDependency(ref cycle)) if cycle == &["v"]));

    assert!(status.has_changed().unwrap());
    let snapshot = status.borrow_and_update().clone();
    assert_eq!(snapshot.status, PipelineStatus::Created);
    assert!(snapshot.error.unwrap().contains('v'));
    assert!(matches!(manager.schema(handle).await, Err(ManagerError::NotCompiled(_))));

    let updated = manager.update_program(handle, SQL).await.unwrap();
    assert_eq!(updated.revision, 2);
    assert_eq!(updated.error, None);
    let compiled = manager.compile(handle).await.unwrap();
    assert_eq!(compiled.status, PipelineStatus::Compiled);
    assert_eq!(compiled.revision, 2);
}

#[tokio::test]
async fn invalid_requests_leave_the_status_unchanged() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager.create_project("p", SQL).unwrap();

    let err = manager.start(handle).await.unwrap_err();
    assert!(matches!(
        err,
        ManagerError::InvalidTransition {
            action: Action::Start,
            status: PipelineStatus::Created,
            ..
        }
    ));
    assert!(matches!(manager.pause(handle).await, Err(ManagerError::InvalidTransition { .. })));
    assert!(matches!(manager.reset(handle).await, Err(ManagerError::InvalidTransition { .. })));
    assert_eq!(manager.status(handle).unwrap().status, PipelineStatus::Created);

    manager.compile(handle).await.unwrap();
    manager.start(handle).await.unwrap();
    let err = manager
        .configure_connector(handle, http_input(FormatConfig::new("csv")))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidTransition { action: Action::Configure, .. }));
    assert!(matches!(manager.update_program(handle, SQL).await, Err(ManagerError::InvalidTransition { .. })));
    manager.stop(handle).await.unwrap();
}

#[tokio::test]
async fn unreachable_connectors_fail_the_start_until_reset() {
    let broker = MemoryBroker::new();
    let manager = manager(&broker);
    let handle = manager.create_project("p", SQL).unwrap();
    manager
        .configure_connector(
            handle,
            ConnectorConfig::input(
                "people",
                TransportConfig::new("kafka")
                    .param("bootstrap.servers", "memory")
                    .param("topics", "people"),
                FormatConfig::new("csv"),
            ),
        )
        .await
        .unwrap();
    manager.compile(handle).await.unwrap();

    broker.refuse_connects(10);
    let err = manager.start(handle).await.unwrap_err();
    assert!(matches!(err, ManagerError::Runtime(_)));
    let snapshot = manager.status(handle).unwrap();
    assert_eq!(snapshot.status, PipelineStatus::Failed);
    assert!(snapshot.error.is_some());

    assert!(matches!(manager.start(handle).await, Err(ManagerError::InvalidTransition { .. })));
    assert_eq!(manager.reset(handle).await.unwrap().status, PipelineStatus::Compiled);

    broker.refuse_connects(0);
    assert_eq!(manager.start(handle).await.unwrap().status, PipelineStatus::Running);
    manager.stop(handle).await.unwrap();
}

#[tokio::test]
async fn connector_bindings_are_validated() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager.create_project("p", SQL).unwrap();

    let err = manager
        .configure_connector(
            handle,
            ConnectorConfig::input("people", TransportConfig::new("carrier-pigeon"), FormatConfig::new("csv")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Config(ConfigError::UnknownTransport(_))));

    // Unknown relations are only detectable once the program is compiled.
    manager
        .configure_connector(
            handle,
            ConnectorConfig::input("nobody", TransportConfig::new("http"), FormatConfig::new("csv")),
        )
        .await
        .unwrap();
    let err = manager.compile(handle).await.unwrap_err();
    assert!(matches!(err, ManagerError::Compile(CompileError::UnknownTable(ref t)) if t == "nobody"));
    assert_eq!(manager.status(handle).unwrap().status, PipelineStatus::Created);

    let (stale, _) = manager.connectors(handle).await.unwrap().remove(0);
    manager.remove_connector(handle, stale).await.unwrap();
    manager.compile(handle).await.unwrap();

    let err = manager
        .configure_connector(
            handle,
            ConnectorConfig::input("adults", TransportConfig::new("http"), FormatConfig::new("csv")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Compile(CompileError::Unsupported(_))));
    assert!(manager.connectors(handle).await.unwrap().is_empty());
}

#[tokio::test]
async fn pushed_records_apply_in_order_and_reach_http_outputs() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager.create_project("p", SQL).unwrap();
    let input = manager
        .configure_connector(handle, http_input(FormatConfig::new("csv").param("weights", "true")))
        .await
        .unwrap();
    let output = manager
        .configure_connector(
            handle,
            ConnectorConfig::output("adults", TransportConfig::new("http"), FormatConfig::new("json")).named("adults-out"),
        )
        .await
        .unwrap();
    manager.compile(handle).await.unwrap();

    assert!(matches!(
        manager.push_input(handle, input, vec![Bytes::from("1,ann,30,1")]).await,
        Err(ManagerError::Connector(_))
    ));
    manager.start(handle).await.unwrap();
    let mut emitted = manager.subscribe_output(handle, output).await.unwrap();
    assert!(matches!(
        manager.subscribe_output(handle, input).await,
        Err(ManagerError::UnknownConnector { .. })
    ));

    // Insert, retract, then insert the replacement.
    let records = ["1,ann,30,1", "1,ann,30,-1", "1,anna,30,1"].map(Bytes::from).to_vec();
    assert_eq!(manager.push_input(handle, input, records).await.unwrap(), 3);
    snapshot_eventually(&manager, handle, vec![adult(1, "anna")]).await;

    let record = tokio::time::timeout(Duration::from_secs(2), emitted.recv())
        .await
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&record).unwrap();
    assert_eq!(json["id"], 1);

    manager.stop(handle).await.unwrap();
}

#[tokio::test]
async fn paused_pipelines_resume_on_start() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager.create_project("p", SQL).unwrap();
    let input = manager
        .configure_connector(handle, http_input(FormatConfig::new("csv")))
        .await
        .unwrap();
    manager.compile(handle).await.unwrap();
    manager.start(handle).await.unwrap();

    assert_eq!(manager.pause(handle).await.unwrap().status, PipelineStatus::Paused);
    assert_eq!(manager.pause(handle).await.unwrap().status, PipelineStatus::Paused);
    manager
        .push_input(handle, input, vec![Bytes::from("7,gus,70")])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.view_snapshot(handle, "adults").await.unwrap().is_empty());

    assert_eq!(manager.start(handle).await.unwrap().status, PipelineStatus::Running);
    snapshot_eventually(&manager, handle, vec![adult(7, "gus")]).await;
    manager.stop(handle).await.unwrap();

    let metrics = manager.metrics(handle).await.unwrap();
    assert_eq!(metrics.records_parsed, 1);
    assert!(metrics.started_at.is_some());
}

#[tokio::test]
async fn fail_policy_fails_the_pipeline_on_a_bad_record() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager.create_project("strict", SQL).unwrap();
    manager
        .configure_pipeline(
            handle,
            PipelineConfig {
                workers: 1,
                record_error_policy: RecordErrorPolicy::Fail,
            },
        )
        .await
        .unwrap();
    let input = manager
        .configure_connector(handle, http_input(FormatConfig::new("csv")))
        .await
        .unwrap();
    manager.compile(handle).await.unwrap();
    manager.start(handle).await.unwrap();

    let mut status = manager.subscribe(handle).unwrap();
    manager
        .push_input(handle, input, vec![Bytes::from("not a person")])
        .await
        .unwrap();
    let failed = wait_for_status(&mut status, PipelineStatus::Failed).await;
    assert!(failed.error.unwrap().contains("people"));
    assert_eq!(manager.metrics(handle).await.unwrap().records_dropped, 1);

    assert_eq!(manager.reset(handle).await.unwrap().status, PipelineStatus::Compiled);
}

#[tokio::test]
async fn workers_must_be_positive() {
    let manager = manager(&MemoryBroker::new());
    let handle = manager.create_project("p", SQL).unwrap();
    let err = manager
        .configure_pipeline(
            handle,
            PipelineConfig {
                workers: 0,
                record_error_policy: RecordErrorPolicy::Drop,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidConfig(_)));
    assert_eq!(manager.pipeline_config(handle).await.unwrap(), PipelineConfig::default());
}

#[tokio::test]
async fn deleted_pipelines_are_forgotten() {
    let manager = manager(&MemoryBroker::new());
    let keep = manager.create_project("keep", SQL).unwrap();
    let gone = manager.create_project("gone", SQL).unwrap();
    manager.compile(gone).await.unwrap();
    manager.start(gone).await.unwrap();

    manager.delete(gone).await.unwrap();
    assert!(matches!(manager.status(gone), Err(ManagerError::NotFound(_))));
    assert_eq!(manager.handle("gone"), None);

    let names: Vec<String> = manager.list().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["keep"]);
    assert_eq!(manager.status(keep).unwrap().status, PipelineStatus::Created);

    // The name is free again.
    manager.create_project("gone", SQL).unwrap();
}

#[tokio::test]
async fn a_stuck_output_leaves_the_pipeline_controllable() {
    let broker = MemoryBroker::new();
    let mut catalog = ConnectorCatalog::builtin();
    catalog.register_transport(Arc::new(broker.clone()));
    catalog.register_transport(Arc::new(Unreachable));
    let mut config = Config::default();
    config.runtime.output_backlog_warn = 1;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    let manager = PipelineManager::with_catalog(config, catalog);

    let handle = manager.create_project("p", SQL).unwrap();
    let input = manager
        .configure_connector(handle, http_input(FormatConfig::new("csv")))
        .await
        .unwrap();
    manager
        .configure_connector(
            handle,
            ConnectorConfig::output("adults", TransportConfig::new("unreachable"), FormatConfig::new("json")),
        )
        .await
        .unwrap();
    manager.compile(handle).await.unwrap();
    manager.start(handle).await.unwrap();

    for i in 1..=20 {
        let record = Bytes::from(format!("{i},p{i},30"));
        manager.push_input(handle, input, vec![record]).await.unwrap();
    }
    let rows = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let rows = manager.view_snapshot(handle, "adults").await.unwrap();
            if rows.len() == 20 {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(rows.len(), 20);

    let metrics = tokio::time::timeout(Duration::from_secs(2), manager.metrics(handle))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metrics.records_parsed, 20);
    assert_eq!(metrics.records_emitted, 0);

    let stopped = tokio::time::timeout(Duration::from_secs(2), manager.stop(handle))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stopped.status, PipelineStatus::Stopped);
}
