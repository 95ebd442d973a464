use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ripple_compute::JobMetrics;
use ripple_core::Config;
use ripple_manager::{PipelineManager, PipelineStatus};
use tracing::{info, warn};

use crate::config::PipelineFile;

/// Compile the program in `path` and print it as JSON.
pub fn check(path: &Path, schema_only: bool) -> Result<()> {
    let sql = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read program: {}", path.display()))?;
    let program = ripple_catalog::compile(&sql)
        .with_context(|| format!("failed to compile {}", path.display()))?;
    info!(
        tables = program.schema.tables.len(),
        views = program.schema.views.len(),
        nodes = program.plan.nodes.len(),
        "program compiled"
    );
    let json = if schema_only {
        serde_json::to_string_pretty(&program.schema)?
    } else {
        program.to_json()?
    };
    println!("{json}");
    Ok(())
}

/// Create, compile and start the pipeline, then wait for Ctrl-C or a job
/// failure. Final metrics are printed as JSON either way.
pub async fn run(config: Config, file: PipelineFile, metrics_interval: Duration) -> Result<()> {
    let manager = PipelineManager::new(config.clone());
    let name = file.name.clone();
    let handle = manager.create_project(&name, &file.sql)?;
    manager
        .configure_pipeline(handle, file.pipeline_config(&config))
        .await?;
    for connector in file.connectors {
        let relation = connector.table.clone();
        let direction = connector.direction;
        manager
            .configure_connector(handle, connector)
            .await
            .with_context(|| format!("invalid {direction} connector on '{relation}'"))?;
    }
    manager.compile(handle).await.context("compilation failed")?;

    let mut status = manager.subscribe(handle)?;
    manager.start(handle).await.context("pipeline failed to start")?;
    info!(pipeline = %name, "pipeline running, press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(metrics_interval.max(Duration::from_secs(1)));
    ticker.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(err) = signal {
                    warn!(error = %err, "cannot listen for Ctrl-C");
                }
                info!(pipeline = %name, "stopping");
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = status.borrow_and_update().clone();
                if snapshot.status == PipelineStatus::Failed {
                    let detail = snapshot.error.unwrap_or_else(|| "unknown error".to_string());
                    break Err(anyhow!("pipeline '{name}' failed: {detail}"));
                }
            }
            _ = ticker.tick() => {
                log_metrics(&name, &manager.metrics(handle).await?);
            }
        }
    };

    if manager.status(handle)?.status.is_active() {
        manager.stop(handle).await?;
    }
    let metrics = manager.metrics(handle).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    outcome
}

fn log_metrics(pipeline: &str, metrics: &JobMetrics) {
    info!(
        pipeline,
        steps = metrics.steps,
        state_size = metrics.state_size,
        parsed = metrics.records_parsed,
        dropped = metrics.records_dropped,
        emitted = metrics.records_emitted,
        "metrics"
    );
    for connector in &metrics.connectors {
        if let Some(error) = &connector.last_error {
            warn!(pipeline, table = %connector.table, direction = %connector.direction, %error, "connector error");
        }
    }
}
